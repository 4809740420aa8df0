use openxr::sys::Result as OpenXRResult;
use thiserror::Error;

use crate::result_policy::{classify, Outcome};

#[derive(Error, Debug)]
/// Everything that can go wrong between the host, the core and the runtime.
pub enum StereoXrError {
    /// The runtime does not advertise every required extension
    #[error("The runtime is missing required extensions: {missing:?}")]
    InitError {
        /// The extensions that were asked for but not advertised
        missing: Vec<String>,
    },
    /// The runtime refused to create an instance
    #[error("Unable to create an OpenXR instance: {0}")]
    InstanceCreateError(OpenXRResult),
    /// No head mounted display is attached
    #[error("No head mounted display is available: {0}")]
    NoDeviceError(OpenXRResult),
    /// The device does not report a stereo view configuration
    #[error("Expected {expected} views but the runtime reported {found}")]
    ConfigMismatchError {
        /// Views the core supports
        expected: usize,
        /// Views the runtime reported
        found: usize,
    },
    /// The runtime refused to create a session
    #[error("Unable to create an OpenXR session: {0}")]
    SessionCreateError(OpenXRResult),
    /// The runtime says the graphics requirements were never queried
    #[error("Graphics requirements must be queried before a session is created")]
    GraphicsRequirementsCallMissing,
    /// One of the graphics context handles is null
    #[error("The graphics binding has a null {field} handle")]
    InvalidGraphicsBinding {
        /// The offending handle
        field: &'static str,
    },
    /// `initialize` has not succeeded yet
    #[error("The instance has not been initialized")]
    NotInitialized,
    /// `create_session` has not succeeded yet
    #[error("No session has been created")]
    NoSession,
    /// `setup_graphics_binding` has not succeeded yet
    #[error("No graphics binding has been provided")]
    MissingGraphicsBinding,
    /// Only one session may be alive per instance
    #[error("A session already exists for this instance")]
    SessionAlreadyCreated,
    /// The list was empty
    #[error("The list was empty")]
    EmptyListError,
    /// acquire, wait and release were called out of order
    #[error("Swapchain call out of order: {0}")]
    CallOrderError(&'static str),
    /// The runtime could not hand out a swapchain image
    #[error("Unable to acquire a swapchain image: {0}")]
    AcquireError(OpenXRResult),
    /// Waiting on an acquired image failed
    #[error("Unable to wait on a swapchain image: {0}")]
    WaitError(OpenXRResult),
    /// Releasing an acquired image failed
    #[error("Unable to release a swapchain image: {0}")]
    ReleaseError(OpenXRResult),
    /// A frame timing call failed
    #[error("{stage} failed: {result}")]
    FrameError {
        /// The frame call that failed
        stage: &'static str,
        /// The runtime's result
        result: OpenXRResult,
    },
    /// Ending the frame failed
    #[error("Unable to submit the frame: {0}")]
    SubmitError(OpenXRResult),
    /// The instance or session was lost
    #[error("The instance or session was lost: {0}")]
    LossError(OpenXRResult),
    /// Shutdown was requested, no further ticks will run
    #[error("Shutting down")]
    ShuttingDown,
    /// There was a problem with an OpenXR operation
    #[error("There was a problem with an OpenXR operation: {0}")]
    OpenXRError(#[from] OpenXRResult),
    /// Anything reported by a collaborator
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StereoXrError {
    /// How the frame loop and the host should treat this error.
    pub fn outcome(&self) -> Outcome {
        match self {
            StereoXrError::LossError(_) | StereoXrError::ShuttingDown => Outcome::Fatal,
            StereoXrError::AcquireError(r)
            | StereoXrError::WaitError(r)
            | StereoXrError::ReleaseError(r)
            | StereoXrError::SubmitError(r)
            | StereoXrError::OpenXRError(r)
            | StereoXrError::FrameError { result: r, .. } => match classify(*r) {
                Outcome::Ok => Outcome::Recoverable,
                outcome => outcome,
            },
            _ => Outcome::Recoverable,
        }
    }

    /// Shorthand for `outcome() == Outcome::Fatal`.
    pub fn is_fatal(&self) -> bool {
        self.outcome() == Outcome::Fatal
    }

    /// Wraps a failed per-tick runtime call, promoting losses to [`StereoXrError::LossError`].
    pub(crate) fn per_tick(result: OpenXRResult, wrap: fn(OpenXRResult) -> StereoXrError) -> Self {
        match classify(result) {
            Outcome::Fatal => StereoXrError::LossError(result),
            _ => wrap(result),
        }
    }
}
