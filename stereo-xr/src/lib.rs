#![deny(missing_docs)]

//! A stereo head-mounted display rendering loop on top of an XR runtime.
//!
//! `stereo_xr` negotiates a device session, allocates one presentation ring per eye and, on
//! every display refresh, drives the `wait → begin → render → end` frame protocol while
//! reacting to session state changes delivered by the runtime.
//!
//! # Getting started
//! Build a [`StereoXr`] around an [`XrRuntime`], then walk it through its lifecycle:
//!
//! ```
//! use stereo_xr::{runtime::SimulatedRuntime, GraphicsContextBinding, StereoXrBuilder};
//!
//! let mut xr = StereoXrBuilder::new().build(SimulatedRuntime::default());
//! assert!(xr.initialize(&stereo_xr::REQUIRED_EXTENSIONS));
//! assert!(xr.setup_graphics_binding(GraphicsContextBinding::from_raw(1, 2, 3)));
//! assert!(xr.create_session());
//! assert!(xr.run_frame());
//! xr.shutdown();
//! ```
//!
//! The graphics context itself is owned by the host: the core only forwards its handles to
//! the runtime and hands each eye's image to a [`RenderCallback`].

pub use glam;
pub use openxr as xr;

pub use contexts::{AcquiredImage, InstanceContext, SessionContext, SwapchainRing};
pub use engine::{ReferenceSpace, ShutdownHandle, StereoXr, StereoXrBuilder, StereoXrConfig};
pub use frame_loop::{EmptyReason, FrameLoop, TickOutcome, TickReport};
pub use graphics_binding::GraphicsContextBinding;
pub use render::{Eye, NoopRenderer, RenderCallback, RenderTarget};
pub use result_policy::{classify, classify_result, Outcome};
pub use runtime::{ViewPose, XrRuntime};
pub use stereo_xr_error::StereoXrError;

/// The contexts own the runtime handles: instance, session, reference space and swapchains
pub mod contexts;
mod engine;
mod frame_loop;
mod graphics_binding;
mod render;
mod result_policy;
/// The boundary between the core and an XR runtime
pub mod runtime;
mod stereo_xr_error;
/// Kitchen sink utility functions
pub mod util;

/// stereo_xr result type
pub type StereoXrResult<T> = std::result::Result<T, StereoXrError>;

/// Number of views
pub const VIEW_COUNT: usize = 2;

/// OpenXR view type
pub const VIEW_TYPE: xr::ViewConfigurationType = xr::ViewConfigurationType::PRIMARY_STEREO;

/// OpenXR blend mode
pub const BLEND_MODE: xr::EnvironmentBlendMode = xr::EnvironmentBlendMode::OPAQUE;

/// OpenXR form factor
pub const FORM_FACTOR: xr::FormFactor = xr::FormFactor::HEAD_MOUNTED_DISPLAY;

/// Lets the loader talk to the Android activity
pub const KHR_ANDROID_CREATE_INSTANCE: &str = "XR_KHR_android_create_instance";

/// Binds sessions to an OpenGL ES context
pub const KHR_OPENGL_ES_ENABLE: &str = "XR_KHR_opengl_es_enable";

/// The extensions every session needs
pub const REQUIRED_EXTENSIONS: [&str; 2] = [KHR_ANDROID_CREATE_INSTANCE, KHR_OPENGL_ES_ENABLE];
