use glam::{Affine3A, Mat4, Quat, Vec3, Vec4};
use openxr::{self as xr, Fovf, Posef, ViewStateFlags};

/// Views may only be rendered when both their position and orientation can be trusted.
pub fn is_view_valid(view_flags: &ViewStateFlags) -> bool {
    view_flags.contains(ViewStateFlags::POSITION_VALID)
        && view_flags.contains(ViewStateFlags::ORIENTATION_VALID)
}

#[inline]
/// Convert a `Posef` from OpenXR into an Affine3
pub fn affine_from_posef(pose: Posef) -> Affine3A {
    let translation: Vec3 = mint::Vector3::from(pose.position).into();
    let rotation: Quat = mint::Quaternion::from(pose.orientation).into();

    Affine3A::from_rotation_translation(rotation, translation)
}

#[inline]
/// Convert a [`glam::Affine3A`] into a [`openxr::Posef`]
pub fn posef_from_affine(transform: Affine3A) -> Posef {
    let (_, rotation, translation) = transform.to_scale_rotation_translation();
    Posef {
        orientation: mint::Quaternion::from(rotation).into(),
        position: mint::Vector3::from(translation).into(),
    }
}

/// Build an infinite, reverse-Z, right handed projection from an OpenXR field of view.
///
/// Points on the near plane map to a depth of 1, points at infinity to 0.
pub fn projection_from_fov(fov: &Fovf, near: f32) -> Mat4 {
    let tan_left = fov.angle_left.tan();
    let tan_right = fov.angle_right.tan();
    let tan_up = fov.angle_up.tan();
    let tan_down = fov.angle_down.tan();

    let width = tan_right - tan_left;
    let height = tan_up - tan_down;

    Mat4::from_cols(
        Vec4::new(2. / width, 0., 0., 0.),
        Vec4::new(0., 2. / height, 0., 0.),
        Vec4::new(
            (tan_right + tan_left) / width,
            (tan_up + tan_down) / height,
            0.,
            -1.,
        ),
        Vec4::new(0., 0., near, 0.),
    )
}

/// The full extent of an image, as a composition layer sub-image rectangle.
pub fn full_image_rect(width: u32, height: u32) -> xr::Rect2Di {
    xr::Rect2Di {
        offset: xr::Offset2Di { x: 0, y: 0 },
        extent: xr::Extent2Di {
            width: width as _,
            height: height as _,
        },
    }
}
