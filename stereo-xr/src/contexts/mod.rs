/// The runtime instance and the selected system
pub mod instance_context;
/// The session, its reference space and its state machine
pub mod session_context;
/// Per eye presentation rings
pub mod swapchain_ring;

pub use instance_context::InstanceContext;
pub use session_context::SessionContext;
pub use swapchain_ring::{AcquiredImage, SwapchainRing};
