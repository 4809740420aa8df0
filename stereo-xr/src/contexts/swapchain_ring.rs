use log::{debug, info, warn};
use openxr::{self as xr, sys::Result as OpenXRResult};

use crate::{
    render::{Eye, RenderTarget},
    runtime::{SwapchainDescriptor, SwapchainFormat, XrRuntime},
    util::full_image_rect,
    StereoXrError, StereoXrResult,
};

/// The formats tried, in order, when the config doesn't say otherwise.
pub const DEFAULT_FORMAT_PREFERENCE: [SwapchainFormat; 4] = [
    SwapchainFormat::RGBA8,
    SwapchainFormat::SRGB8_ALPHA8,
    SwapchainFormat::RGB8,
    SwapchainFormat::SRGB8,
];

/// Pick a swapchain format from the runtime's advertised list.
///
/// Four channel, eight bit formats win over three channel ones. Failing both, the runtime's
/// first advertised format is used.
pub fn negotiate_format(supported: &[SwapchainFormat]) -> StereoXrResult<SwapchainFormat> {
    negotiate_format_with(supported, &DEFAULT_FORMAT_PREFERENCE)
}

/// [`negotiate_format`] with a caller supplied preference order.
pub fn negotiate_format_with(
    supported: &[SwapchainFormat],
    preference: &[SwapchainFormat],
) -> StereoXrResult<SwapchainFormat> {
    let first = supported.first().ok_or(StereoXrError::EmptyListError)?;
    let format = preference
        .iter()
        .find(|f| supported.contains(f))
        .or_else(|| supported.iter().find(|f| f.is_rgba8()))
        .or_else(|| supported.iter().find(|f| f.is_rgb8()))
        .unwrap_or(first);
    Ok(*format)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageState {
    Released,
    Acquired(u32),
    Ready(u32),
}

/// One eye's presentation ring: a runtime swapchain and the images backing it.
///
/// Images are handed out strictly in acquire → wait → release order, one at a time.
pub struct SwapchainRing<R: XrRuntime> {
    eye: Eye,
    swapchain: Option<R::Swapchain>,
    images: Vec<u32>,
    format: SwapchainFormat,
    width: u32,
    height: u32,
    sample_count: u32,
    image_state: ImageState,
}

impl<R: XrRuntime> SwapchainRing<R> {
    /// Create the swapchain for `eye` and fetch its images.
    pub fn create(
        runtime: &mut R,
        session: &R::Session,
        eye: Eye,
        descriptor: &SwapchainDescriptor,
    ) -> StereoXrResult<Self> {
        let swapchain = runtime.create_swapchain(session, descriptor)?;
        let images = match runtime.swapchain_images(&swapchain) {
            Ok(images) if !images.is_empty() => images,
            result => {
                if let Err(e) = runtime.destroy_swapchain(swapchain) {
                    warn!("[STEREO_XR_SWAPCHAIN] Unable to destroy {eye:?} swapchain: {e}");
                }
                return Err(match result {
                    Err(e) => e.into(),
                    Ok(_) => StereoXrError::EmptyListError,
                });
            }
        };

        info!(
            "[STEREO_XR_SWAPCHAIN] Created {eye:?} swapchain: {}x{}, {} samples, {} images, format {:#x}",
            descriptor.width,
            descriptor.height,
            descriptor.sample_count,
            images.len(),
            descriptor.format.0
        );

        Ok(Self {
            eye,
            swapchain: Some(swapchain),
            images,
            format: descriptor.format,
            width: descriptor.width,
            height: descriptor.height,
            sample_count: descriptor.sample_count,
            image_state: ImageState::Released,
        })
    }

    /// Acquire the next image, returning its index. Must be followed by [`Self::wait_ready`].
    pub fn acquire_next(&mut self, runtime: &mut R) -> StereoXrResult<u32> {
        if self.image_state != ImageState::Released {
            return Err(StereoXrError::CallOrderError(
                "acquire while an image is outstanding",
            ));
        }
        let swapchain = self
            .swapchain
            .as_mut()
            .ok_or(StereoXrError::CallOrderError("acquire after destroy"))?;

        let index = runtime
            .acquire_image(swapchain)
            .map_err(|e| StereoXrError::per_tick(e, StereoXrError::AcquireError))?;
        self.image_state = ImageState::Acquired(index);
        Ok(index)
    }

    /// Block until the acquired image can be written to.
    pub fn wait_ready(&mut self, runtime: &mut R, timeout: xr::Duration) -> StereoXrResult<()> {
        let ImageState::Acquired(index) = self.image_state else {
            return Err(StereoXrError::CallOrderError("wait without acquire"));
        };
        let swapchain = self
            .swapchain
            .as_mut()
            .ok_or(StereoXrError::CallOrderError("wait after destroy"))?;

        runtime
            .wait_image(swapchain, timeout)
            .map_err(|e| StereoXrError::per_tick(e, StereoXrError::WaitError))?;
        self.image_state = ImageState::Ready(index);
        Ok(())
    }

    /// Give the image back to the runtime. Called exactly once per successful acquire; the ring
    /// is free for the next acquire even if the runtime reports a failure.
    pub fn release(&mut self, runtime: &mut R) -> StereoXrResult<()> {
        if self.image_state == ImageState::Released {
            return Err(StereoXrError::CallOrderError("release without acquire"));
        }
        self.image_state = ImageState::Released;
        let swapchain = self
            .swapchain
            .as_mut()
            .ok_or(StereoXrError::CallOrderError("release after destroy"))?;

        runtime
            .release_image(swapchain)
            .map_err(|e| StereoXrError::per_tick(e, StereoXrError::ReleaseError))
    }

    /// Acquire and wait on the next image, returning a guard that releases it however the
    /// caller's scope is left.
    pub fn acquire<'a>(
        &'a mut self,
        runtime: &'a mut R,
        timeout: xr::Duration,
    ) -> StereoXrResult<AcquiredImage<'a, R>> {
        let index = self.acquire_next(runtime)?;
        if let Err(e) = self.wait_ready(runtime, timeout) {
            if let Err(release_error) = self.release(runtime) {
                debug!("[STEREO_XR_SWAPCHAIN] Release after failed wait: {release_error}");
            }
            return Err(e);
        }

        Ok(AcquiredImage {
            ring: self,
            runtime,
            index,
            released: false,
        })
    }

    /// Destroy the swapchain, releasing any outstanding image first. Safe to call repeatedly.
    pub fn destroy(&mut self, runtime: &mut R) {
        if self.image_state != ImageState::Released {
            if let Err(e) = self.release(runtime) {
                warn!("[STEREO_XR_SWAPCHAIN] Unable to release {:?} image: {e}", self.eye);
            }
        }

        let Some(swapchain) = self.swapchain.take() else {
            return;
        };
        match runtime.destroy_swapchain(swapchain) {
            Ok(()) => debug!("[STEREO_XR_SWAPCHAIN] Destroyed {:?} swapchain", self.eye),
            Err(e) => warn!(
                "[STEREO_XR_SWAPCHAIN] Unable to destroy {:?} swapchain: {e}",
                self.eye
            ),
        }
        self.images.clear();
    }

    /// The eye this ring presents to
    pub fn eye(&self) -> Eye {
        self.eye
    }

    /// The runtime swapchain, until the ring is destroyed
    pub fn swapchain(&self) -> Option<&R::Swapchain> {
        self.swapchain.as_ref()
    }

    /// The runtime's images, in index order
    pub fn images(&self) -> &[u32] {
        &self.images
    }

    /// Pixel format of every image
    pub fn format(&self) -> SwapchainFormat {
        self.format
    }

    /// Image width
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Samples per pixel
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Whether an image has been acquired and not yet released
    pub fn has_outstanding_image(&self) -> bool {
        self.image_state != ImageState::Released
    }

    /// Whether [`Self::destroy`] has run
    pub fn is_destroyed(&self) -> bool {
        self.swapchain.is_none()
    }

    /// The full image, as a composition layer rectangle
    pub fn image_rect(&self) -> xr::Rect2Di {
        full_image_rect(self.width, self.height)
    }

    fn render_target(&self, index: u32) -> StereoXrResult<RenderTarget> {
        let image = self
            .images
            .get(index as usize)
            .copied()
            .ok_or(StereoXrError::AcquireError(OpenXRResult::ERROR_INDEX_OUT_OF_RANGE))?;
        Ok(RenderTarget {
            image,
            image_index: index,
            format: self.format,
            width: self.width,
            height: self.height,
            sample_count: self.sample_count,
        })
    }
}

/// An image that has been acquired and waited on. Released when [`AcquiredImage::release`] is
/// called or the guard is dropped, whichever comes first.
///
/// The guard holds the ring and the runtime, so neither can be torn down while it is alive.
pub struct AcquiredImage<'a, R: XrRuntime> {
    ring: &'a mut SwapchainRing<R>,
    runtime: &'a mut R,
    index: u32,
    released: bool,
}

impl<'a, R: XrRuntime> AcquiredImage<'a, R> {
    /// Position of the image within its ring
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The image as the render callback sees it.
    pub fn target(&self) -> StereoXrResult<RenderTarget> {
        self.ring.render_target(self.index)
    }

    /// Release the image, reporting any runtime failure.
    pub fn release(mut self) -> StereoXrResult<()> {
        self.released = true;
        self.ring.release(self.runtime)
    }
}

impl<'a, R: XrRuntime> Drop for AcquiredImage<'a, R> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.ring.release(self.runtime) {
            warn!(
                "[STEREO_XR_SWAPCHAIN] Unable to release {:?} image {}: {e}",
                self.ring.eye, self.index
            );
        }
    }
}
