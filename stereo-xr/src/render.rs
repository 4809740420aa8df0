use crate::runtime::{SwapchainFormat, ViewPose};

/// Which eye a view, image or ring belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    /// The left eye, view index 0
    Left,
    /// The right eye, view index 1
    Right,
}

impl Eye {
    /// Both eyes, in view order.
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    /// The eye's index into the runtime's view array.
    pub fn index(self) -> usize {
        match self {
            Eye::Left => 0,
            Eye::Right => 1,
        }
    }
}

/// The swapchain image the core has acquired and waited on for one eye.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTarget {
    /// The runtime's image handle, eg. a GL texture name
    pub image: u32,
    /// Position of the image within its ring
    pub image_index: u32,
    /// Pixel format of the image
    pub format: SwapchainFormat,
    /// Viewport width
    pub width: u32,
    /// Viewport height
    pub height: u32,
    /// Samples per pixel
    pub sample_count: u32,
}

/// The rendering content collaborator.
///
/// The frame loop calls [`RenderCallback::bind_target`], then [`RenderCallback::render`], then
/// [`RenderCallback::unbind_target`], once per eye on every tick that renders. Implementations
/// must return promptly: their time is spent inside the display deadline.
pub trait RenderCallback {
    /// Make `target` the current render target and set the viewport to its size.
    ///
    /// An error (eg. an incomplete framebuffer) skips this tick's submission.
    fn bind_target(&mut self, _target: &RenderTarget, _eye: Eye) -> anyhow::Result<()> {
        Ok(())
    }

    /// Issue draw commands for `eye` into the bound target.
    fn render(&mut self, target: &RenderTarget, view: &ViewPose, eye: Eye);

    /// Undo whatever `bind_target` did. Called even when rendering produced nothing.
    fn unbind_target(&mut self, _target: &RenderTarget, _eye: Eye) {}
}

impl<F> RenderCallback for F
where
    F: FnMut(&RenderTarget, &ViewPose, Eye),
{
    fn render(&mut self, target: &RenderTarget, view: &ViewPose, eye: Eye) {
        self(target, view, eye)
    }
}

/// A callback that draws nothing, leaving whatever the runtime put in the image.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRenderer;

impl RenderCallback for NoopRenderer {
    fn render(&mut self, _target: &RenderTarget, _view: &ViewPose, _eye: Eye) {}
}
