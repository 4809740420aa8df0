use std::ffi::c_void;

use crate::{StereoXrError, StereoXrResult};

/// The host's active rendering context, as the runtime needs to see it.
///
/// These are borrowed handles (an `EGLDisplay`, `EGLConfig` and `EGLContext` on Android); the
/// core never creates, owns or destroys them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsContextBinding {
    /// The display the context was created on
    pub display: *mut c_void,
    /// The pixel format (config) the context was created with
    pub config: *mut c_void,
    /// The context itself
    pub context: *mut c_void,
}

impl GraphicsContextBinding {
    /// Wrap raw handle values obtained from the context provider.
    pub fn from_raw(display: usize, config: usize, context: usize) -> Self {
        Self {
            display: display as *mut c_void,
            config: config as *mut c_void,
            context: context as *mut c_void,
        }
    }

    /// Every handle must be non-null before a session can be created.
    pub fn validate(&self) -> StereoXrResult<()> {
        let handles = [
            ("display", self.display),
            ("config", self.config),
            ("context", self.context),
        ];
        match handles.into_iter().find(|(_, handle)| handle.is_null()) {
            Some((field, _)) => Err(StereoXrError::InvalidGraphicsBinding { field }),
            None => Ok(()),
        }
    }
}
