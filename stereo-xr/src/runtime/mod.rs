use glam::{Affine3A, Mat4};
use openxr as xr;
use serde::{Deserialize, Serialize};

use crate::{util, GraphicsContextBinding};

#[cfg(target_os = "android")]
mod openxr_runtime;
mod simulator;

#[cfg(target_os = "android")]
pub use openxr_runtime::{OpenXrRuntime, OpenXrSession};
pub use simulator::{
    Call, SimInstance, SimSession, SimSpace, SimSwapchain, SimulatedRuntime, SimulatorSettings,
    SubmittedFrame, SubmittedView,
};

/// Passed to the runtime when the instance is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationInfo<'a> {
    /// Application name
    pub application_name: &'a str,
    /// Application version
    pub application_version: u32,
    /// Engine name
    pub engine_name: &'a str,
    /// Engine version
    pub engine_version: u32,
}

/// One entry of the runtime's view configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewConfiguration {
    /// Recommended image width
    pub recommended_width: u32,
    /// Recommended image height
    pub recommended_height: u32,
    /// Recommended samples per pixel
    pub recommended_sample_count: u32,
    /// Largest image width the runtime accepts
    pub max_width: u32,
    /// Largest image height the runtime accepts
    pub max_height: u32,
    /// Largest sample count the runtime accepts
    pub max_sample_count: u32,
}

/// The range of graphics API versions the runtime can bind to.
#[derive(Debug, Clone, Copy)]
pub struct GraphicsRequirements {
    /// Oldest supported API version
    pub min_api_version_supported: xr::Version,
    /// Newest supported API version
    pub max_api_version_supported: xr::Version,
}

/// A swapchain pixel format as the runtime enumerates it (a GL internal format under OpenGL ES).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwapchainFormat(pub i64);

impl SwapchainFormat {
    /// `GL_RGBA8`
    pub const RGBA8: SwapchainFormat = SwapchainFormat(0x8058);
    /// `GL_SRGB8_ALPHA8`
    pub const SRGB8_ALPHA8: SwapchainFormat = SwapchainFormat(0x8C43);
    /// `GL_RGB8`
    pub const RGB8: SwapchainFormat = SwapchainFormat(0x8051);
    /// `GL_SRGB8`
    pub const SRGB8: SwapchainFormat = SwapchainFormat(0x8C41);
    /// `GL_RGBA16F`
    pub const RGBA16F: SwapchainFormat = SwapchainFormat(0x881A);
    /// `GL_RGB10_A2`
    pub const RGB10_A2: SwapchainFormat = SwapchainFormat(0x8059);

    /// Four channels of eight bits each.
    pub fn is_rgba8(self) -> bool {
        self == Self::RGBA8 || self == Self::SRGB8_ALPHA8
    }

    /// Three channels of eight bits each.
    pub fn is_rgb8(self) -> bool {
        self == Self::RGB8 || self == Self::SRGB8
    }
}

/// Everything needed to create one eye's swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainDescriptor {
    /// Pixel format
    pub format: SwapchainFormat,
    /// Samples per pixel
    pub sample_count: u32,
    /// Image width
    pub width: u32,
    /// Image height
    pub height: u32,
}

/// Events the core cares about, drained from the runtime's queue.
#[derive(Debug, Clone, Copy)]
pub enum RuntimeEvent {
    /// The session moved to a new state
    SessionStateChanged {
        /// The new state
        state: xr::SessionState,
        /// When the change happened
        time: xr::Time,
    },
    /// The instance is about to be lost
    InstanceLossPending,
    /// The runtime's queue overflowed and events were dropped
    EventsLost(u32),
    /// Anything else (input, interaction profile, reference space changes..)
    Other,
}

/// Where an eye is and what it can see, at one predicted display time.
#[derive(Debug, Clone, Copy)]
pub struct ViewPose {
    /// The eye's pose in the reference space
    pub pose: xr::Posef,
    /// The eye's field of view
    pub fov: xr::Fovf,
}

impl ViewPose {
    /// The eye's transform (reference space from view).
    pub fn transform(&self) -> Affine3A {
        util::affine_from_posef(self.pose)
    }

    /// The view matrix (view from reference space).
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from(self.transform().inverse())
    }

    /// An infinite reverse-Z projection for this eye's asymmetric field of view.
    pub fn projection(&self, near: f32) -> Mat4 {
        util::projection_from_fov(&self.fov, near)
    }
}

impl Default for ViewPose {
    fn default() -> Self {
        Self {
            pose: xr::Posef::IDENTITY,
            fov: xr::Fovf::default(),
        }
    }
}

/// One eye's entry in a projection layer.
pub struct ProjectionView<'a, R: XrRuntime + ?Sized> {
    /// The swapchain the eye was rendered into
    pub swapchain: &'a R::Swapchain,
    /// The region of the image that was rendered
    pub image_rect: xr::Rect2Di,
    /// The pose the eye was rendered with
    pub pose: xr::Posef,
    /// The field of view the eye was rendered with
    pub fov: xr::Fovf,
}

/// A projection composition layer referencing every eye.
pub struct ProjectionLayer<'a, R: XrRuntime + ?Sized> {
    /// The space the poses are expressed in
    pub space: &'a R::Space,
    /// One view per eye, in view order
    pub views: Vec<ProjectionView<'a, R>>,
}

/// An XR runtime, seen through the calls this crate makes.
///
/// Every failure is the runtime's raw result code so that [`crate::classify`] can decide
/// whether it is recoverable. Handles are owned by the caller and given back through the
/// `destroy_*` calls exactly once.
pub trait XrRuntime {
    /// Runtime instance handle
    type Instance;
    /// Session handle, including whatever frame timing state the runtime needs
    type Session;
    /// Reference space handle
    type Space;
    /// Swapchain handle
    type Swapchain;

    /// Names of every extension the runtime advertises.
    fn available_extensions(&mut self) -> xr::Result<Vec<String>>;

    /// Create an instance with `extensions` enabled.
    fn create_instance(
        &mut self,
        application_info: &ApplicationInfo<'_>,
        extensions: &[String],
    ) -> xr::Result<Self::Instance>;

    /// Destroy the instance. Every other handle must already be gone.
    fn destroy_instance(&mut self, instance: Self::Instance) -> xr::Result<()>;

    /// Find the system for `form_factor`.
    fn system(
        &mut self,
        instance: &Self::Instance,
        form_factor: xr::FormFactor,
    ) -> xr::Result<xr::SystemId>;

    /// The per view configuration of `view_type`.
    fn view_configuration_views(
        &mut self,
        instance: &Self::Instance,
        system: xr::SystemId,
        view_type: xr::ViewConfigurationType,
    ) -> xr::Result<Vec<ViewConfiguration>>;

    /// The graphics API versions the runtime supports. Some runtimes refuse to create a
    /// session unless this was called first.
    fn graphics_requirements(
        &mut self,
        instance: &Self::Instance,
        system: xr::SystemId,
    ) -> xr::Result<GraphicsRequirements>;

    /// Create a session bound to the host's graphics context.
    fn create_session(
        &mut self,
        instance: &Self::Instance,
        system: xr::SystemId,
        binding: &GraphicsContextBinding,
    ) -> xr::Result<Self::Session>;

    /// Destroy the session. Its spaces and swapchains must already be gone.
    fn destroy_session(&mut self, session: Self::Session) -> xr::Result<()>;

    /// Pop the next event, if any. Never blocks.
    fn poll_event(&mut self, instance: &Self::Instance) -> xr::Result<Option<RuntimeEvent>>;

    /// Start the session running.
    fn begin_session(
        &mut self,
        session: &mut Self::Session,
        view_type: xr::ViewConfigurationType,
    ) -> xr::Result<()>;

    /// Stop the session running.
    fn end_session(&mut self, session: &mut Self::Session) -> xr::Result<()>;

    /// Create a reference space anchored to the session.
    fn create_reference_space(
        &mut self,
        session: &Self::Session,
        reference_space_type: xr::ReferenceSpaceType,
        pose_in_reference_space: xr::Posef,
    ) -> xr::Result<Self::Space>;

    /// Destroy a reference space.
    fn destroy_space(&mut self, space: Self::Space) -> xr::Result<()>;

    /// The swapchain formats the session supports, in the runtime's order of preference.
    fn swapchain_formats(&mut self, session: &Self::Session) -> xr::Result<Vec<SwapchainFormat>>;

    /// Create a swapchain.
    fn create_swapchain(
        &mut self,
        session: &Self::Session,
        descriptor: &SwapchainDescriptor,
    ) -> xr::Result<Self::Swapchain>;

    /// The images backing a swapchain, in index order.
    fn swapchain_images(&mut self, swapchain: &Self::Swapchain) -> xr::Result<Vec<u32>>;

    /// Acquire the next image, returning its index.
    fn acquire_image(&mut self, swapchain: &mut Self::Swapchain) -> xr::Result<u32>;

    /// Wait until the oldest acquired image may be written to.
    fn wait_image(&mut self, swapchain: &mut Self::Swapchain, timeout: xr::Duration)
        -> xr::Result<()>;

    /// Release the oldest waited image back to the runtime.
    fn release_image(&mut self, swapchain: &mut Self::Swapchain) -> xr::Result<()>;

    /// Destroy a swapchain.
    fn destroy_swapchain(&mut self, swapchain: Self::Swapchain) -> xr::Result<()>;

    /// Throttle the caller to the display and predict when the next frame will be shown.
    fn wait_frame(&mut self, session: &mut Self::Session) -> xr::Result<xr::FrameState>;

    /// Mark the start of rendering for the frame returned by `wait_frame`.
    fn begin_frame(&mut self, session: &mut Self::Session) -> xr::Result<()>;

    /// Locate each view in `space` at `display_time`.
    fn locate_views(
        &mut self,
        session: &Self::Session,
        view_type: xr::ViewConfigurationType,
        display_time: xr::Time,
        space: &Self::Space,
    ) -> xr::Result<(xr::ViewStateFlags, Vec<ViewPose>)>;

    /// Submit the frame. `layer` is `None` for an empty composition.
    fn end_frame(
        &mut self,
        session: &mut Self::Session,
        display_time: xr::Time,
        environment_blend_mode: xr::EnvironmentBlendMode,
        layer: Option<&ProjectionLayer<'_, Self>>,
    ) -> xr::Result<()>;
}
