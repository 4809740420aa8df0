use log::{debug, error, info, trace, warn};
use openxr::{self as xr, sys::Result as OpenXRResult, SessionState};

use crate::{
    contexts::{swapchain_ring::negotiate_format_with, InstanceContext, SwapchainRing},
    render::Eye,
    result_policy::{classify, Outcome},
    runtime::{RuntimeEvent, SwapchainDescriptor, XrRuntime},
    GraphicsContextBinding, StereoXrConfig, StereoXrError, StereoXrResult, VIEW_TYPE,
};

/// Whether `from → to` is an edge of the session lifecycle graph.
///
/// Any state may move to `LOSS_PENDING`. `EXITING` and `LOSS_PENDING` are terminal.
pub fn is_valid_transition(from: SessionState, to: SessionState) -> bool {
    if to == SessionState::LOSS_PENDING {
        return !is_terminal(from);
    }
    matches!(
        (from, to),
        (SessionState::UNKNOWN, SessionState::IDLE)
            | (SessionState::IDLE, SessionState::READY)
            | (SessionState::IDLE, SessionState::EXITING)
            | (SessionState::READY, SessionState::SYNCHRONIZED)
            | (SessionState::SYNCHRONIZED, SessionState::VISIBLE)
            | (SessionState::SYNCHRONIZED, SessionState::STOPPING)
            | (SessionState::VISIBLE, SessionState::SYNCHRONIZED)
            | (SessionState::VISIBLE, SessionState::FOCUSED)
            | (SessionState::FOCUSED, SessionState::VISIBLE)
            | (SessionState::STOPPING, SessionState::IDLE)
    )
}

/// States a session never leaves.
pub fn is_terminal(state: SessionState) -> bool {
    state == SessionState::EXITING || state == SessionState::LOSS_PENDING
}

/// States in which frames may be rendered.
pub fn is_renderable(state: SessionState) -> bool {
    state == SessionState::SYNCHRONIZED
        || state == SessionState::VISIBLE
        || state == SessionState::FOCUSED
}

/// Owns the session, its reference space and both eyes' swapchain rings, and follows the
/// session state the runtime reports.
pub struct SessionContext<R: XrRuntime> {
    session: Option<R::Session>,
    space: Option<R::Space>,
    rings: Vec<SwapchainRing<R>>,
    state: SessionState,
    running: bool,
    stop_requested: bool,
}

impl<R: XrRuntime> Default for SessionContext<R> {
    fn default() -> Self {
        Self {
            session: None,
            space: None,
            rings: Vec::new(),
            state: SessionState::UNKNOWN,
            running: false,
            stop_requested: false,
        }
    }
}

impl<R: XrRuntime> SessionContext<R> {
    /// An empty context, with no session.
    pub fn new() -> Self {
        Default::default()
    }

    /// Create the session, its reference space and one swapchain ring per eye.
    ///
    /// The runtime's graphics requirements are always queried first. If anything after the
    /// session itself fails, everything created so far is torn down again.
    pub fn create_session(
        &mut self,
        runtime: &mut R,
        instance_context: &InstanceContext<R>,
        binding: &GraphicsContextBinding,
        config: &StereoXrConfig,
    ) -> StereoXrResult<()> {
        if self.session.is_some() {
            return Err(StereoXrError::SessionAlreadyCreated);
        }
        let (Some(instance), Some(system)) =
            (instance_context.instance(), instance_context.system())
        else {
            return Err(StereoXrError::NotInitialized);
        };
        binding.validate()?;

        let requirements = runtime
            .graphics_requirements(instance, system)
            .map_err(StereoXrError::SessionCreateError)?;
        debug!(
            "[STEREO_XR_SESSION] Graphics requirements: {:?} - {:?}",
            requirements.min_api_version_supported, requirements.max_api_version_supported
        );

        let session = runtime
            .create_session(instance, system, binding)
            .map_err(|e| match e {
                OpenXRResult::ERROR_GRAPHICS_REQUIREMENTS_CALL_MISSING => {
                    StereoXrError::GraphicsRequirementsCallMissing
                }
                e => StereoXrError::SessionCreateError(e),
            })?;
        info!("[STEREO_XR_SESSION] Created session");
        self.session = Some(session);
        self.state = SessionState::UNKNOWN;
        self.running = false;
        self.stop_requested = false;

        if let Err(e) = self.create_resources(runtime, instance_context, config) {
            error!("[STEREO_XR_SESSION] Unable to set up the session: {e}");
            self.teardown(runtime);
            return Err(e);
        }
        Ok(())
    }

    fn create_resources(
        &mut self,
        runtime: &mut R,
        instance_context: &InstanceContext<R>,
        config: &StereoXrConfig,
    ) -> StereoXrResult<()> {
        self.create_reference_space(runtime, config.reference_space.space_type())?;

        let session = self
            .session
            .as_ref()
            .ok_or(StereoXrError::NotInitialized)?;
        let supported = runtime.swapchain_formats(session)?;
        let format = negotiate_format_with(&supported, &config.format_preference)?;
        debug!(
            "[STEREO_XR_SESSION] Negotiated swapchain format {:#x} from {:?}",
            format.0, supported
        );

        for (eye, view) in Eye::BOTH.into_iter().zip(instance_context.views()) {
            let descriptor = SwapchainDescriptor {
                format,
                sample_count: config.sample_count.clamp(1, view.max_sample_count.max(1)),
                width: view.recommended_width,
                height: view.recommended_height,
            };
            let ring = SwapchainRing::create(runtime, session, eye, &descriptor)?;
            self.rings.push(ring);
        }

        if self.rings.len() != Eye::BOTH.len() {
            return Err(StereoXrError::ConfigMismatchError {
                expected: Eye::BOTH.len(),
                found: self.rings.len(),
            });
        }
        Ok(())
    }

    /// Create the reference space views are located in, at the identity pose.
    pub fn create_reference_space(
        &mut self,
        runtime: &mut R,
        reference_space_type: xr::ReferenceSpaceType,
    ) -> StereoXrResult<()> {
        let session = self
            .session
            .as_ref()
            .ok_or(StereoXrError::NotInitialized)?;
        if self.space.is_some() {
            return Err(StereoXrError::CallOrderError(
                "the reference space already exists",
            ));
        }

        let space =
            runtime.create_reference_space(session, reference_space_type, xr::Posef::IDENTITY)?;
        debug!("[STEREO_XR_SESSION] Created {reference_space_type:?} reference space");
        self.space = Some(space);
        Ok(())
    }

    /// Drain every pending runtime event, applying session state changes. Never blocks.
    ///
    /// Returns the number of events handled. Only a lost instance or session is an error.
    pub fn poll_events(&mut self, runtime: &mut R, instance: &R::Instance) -> StereoXrResult<usize> {
        let mut handled = 0;
        loop {
            let event = match runtime.poll_event(instance) {
                Ok(Some(event)) => event,
                Ok(None) => return Ok(handled),
                Err(e) => return self.poll_failed(e, handled),
            };
            handled += 1;

            match event {
                RuntimeEvent::SessionStateChanged { state, time } => {
                    trace!("[STEREO_XR_EVENT] Session state changed at {time:?}");
                    self.transition(runtime, state)?;
                }
                RuntimeEvent::InstanceLossPending => {
                    error!("[STEREO_XR_EVENT] The instance is about to be lost, stopping");
                    self.running = false;
                    self.stop_requested = true;
                }
                RuntimeEvent::EventsLost(count) => {
                    warn!("[STEREO_XR_EVENT] The runtime dropped {count} events");
                }
                RuntimeEvent::Other => trace!("[STEREO_XR_EVENT] Ignoring event"),
            }
        }
    }

    fn poll_failed(&mut self, result: OpenXRResult, handled: usize) -> StereoXrResult<usize> {
        if classify(result) == Outcome::Fatal {
            self.running = false;
            self.stop_requested = true;
            return Err(StereoXrError::LossError(result));
        }
        warn!("[STEREO_XR_EVENT] Unable to poll events: {result}");
        Ok(handled)
    }

    fn transition(&mut self, runtime: &mut R, next: SessionState) -> StereoXrResult<()> {
        let previous = self.state;
        if next == previous {
            return Ok(());
        }
        if is_terminal(previous) {
            warn!("[STEREO_XR_SESSION] Ignoring {next:?}, the session is already {previous:?}");
            return Ok(());
        }
        if !is_valid_transition(previous, next) {
            warn!("[STEREO_XR_SESSION] Unexpected transition {previous:?} -> {next:?}");
        }

        info!("[STEREO_XR_SESSION] State changed from {previous:?} to {next:?}");
        self.state = next;

        match next {
            SessionState::READY => self.begin_session(runtime),
            SessionState::STOPPING => {
                self.end_session(runtime);
                Ok(())
            }
            SessionState::EXITING | SessionState::LOSS_PENDING => {
                info!("[STEREO_XR_SESSION] The session is over, stopping");
                self.running = false;
                self.stop_requested = true;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn begin_session(&mut self, runtime: &mut R) -> StereoXrResult<()> {
        let Some(session) = self.session.as_mut() else {
            warn!("[STEREO_XR_SESSION] READY without a session");
            return Ok(());
        };

        match runtime.begin_session(session, VIEW_TYPE) {
            Ok(()) => {
                info!("[STEREO_XR_SESSION] Session began");
                self.running = true;
                Ok(())
            }
            Err(e) if classify(e) == Outcome::Fatal => {
                self.running = false;
                self.stop_requested = true;
                Err(StereoXrError::LossError(e))
            }
            Err(e) => {
                warn!("[STEREO_XR_SESSION] Unable to begin session, will stay READY: {e}");
                Ok(())
            }
        }
    }

    fn end_session(&mut self, runtime: &mut R) {
        self.running = false;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match runtime.end_session(session) {
            Ok(()) => info!("[STEREO_XR_SESSION] Session ended"),
            Err(e) => warn!("[STEREO_XR_SESSION] Unable to end session: {e}"),
        }
    }

    /// Frames may be rendered in the current state.
    pub fn can_render(&self) -> bool {
        self.session.is_some() && is_renderable(self.state)
    }

    /// Destroy the rings, the reference space and the session, in that order. Failures are
    /// logged and every step is still attempted. Safe to call repeatedly, or on a partially
    /// created session.
    pub fn teardown(&mut self, runtime: &mut R) {
        for ring in self.rings.iter_mut() {
            ring.destroy(runtime);
        }
        self.rings.clear();

        if let Some(space) = self.space.take() {
            if let Err(e) = runtime.destroy_space(space) {
                warn!("[STEREO_XR_SESSION] Unable to destroy reference space: {e}");
            }
        }

        if let Some(session) = self.session.take() {
            match runtime.destroy_session(session) {
                Ok(()) => info!("[STEREO_XR_SESSION] Destroyed session"),
                Err(e) => warn!("[STEREO_XR_SESSION] Unable to destroy session: {e}"),
            }
        }

        self.state = SessionState::UNKNOWN;
        self.running = false;
        self.stop_requested = false;
    }

    /// The session state as of the last drained event
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session has begun and not yet ended
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Whether the runtime told us to stop: the session is exiting or lost
    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Whether a session exists
    pub fn is_created(&self) -> bool {
        self.session.is_some()
    }

    /// The session, if created
    pub fn session(&self) -> Option<&R::Session> {
        self.session.as_ref()
    }

    /// The reference space, if created
    pub fn space(&self) -> Option<&R::Space> {
        self.space.as_ref()
    }

    /// One ring per eye, in view order
    pub fn rings(&self) -> &[SwapchainRing<R>] {
        &self.rings
    }

    /// Everything a frame needs, borrowed at once.
    pub(crate) fn frame_parts(
        &mut self,
    ) -> Option<(&mut R::Session, &R::Space, &mut [SwapchainRing<R>])> {
        match (self.session.as_mut(), self.space.as_ref()) {
            (Some(session), Some(space)) => Some((session, space, &mut self.rings)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        runtime::{ApplicationInfo, Call, SimulatedRuntime, SimulatorSettings, SwapchainFormat},
        FORM_FACTOR, REQUIRED_EXTENSIONS,
    };

    fn initialized(
        settings: SimulatorSettings,
    ) -> (SimulatedRuntime, InstanceContext<SimulatedRuntime>) {
        let mut runtime = SimulatedRuntime::new(settings);
        let mut instance = InstanceContext::new();
        let app = ApplicationInfo {
            application_name: "test",
            application_version: 1,
            engine_name: "stereo-xr",
            engine_version: 1,
        };
        let extensions: Vec<String> = REQUIRED_EXTENSIONS.iter().map(|e| e.to_string()).collect();
        instance
            .create_instance(&mut runtime, &app, &extensions)
            .unwrap();
        instance.get_system(&mut runtime, FORM_FACTOR).unwrap();
        instance.enumerate_views(&mut runtime, VIEW_TYPE).unwrap();
        (runtime, instance)
    }

    fn binding() -> GraphicsContextBinding {
        GraphicsContextBinding::from_raw(1, 2, 3)
    }

    fn drain(
        session: &mut SessionContext<SimulatedRuntime>,
        runtime: &mut SimulatedRuntime,
        instance: &InstanceContext<SimulatedRuntime>,
    ) -> usize {
        session
            .poll_events(runtime, instance.instance().unwrap())
            .unwrap()
    }

    #[test]
    pub fn test_create_session() {
        let (mut runtime, instance) = initialized(Default::default());
        let mut session = SessionContext::new();
        session
            .create_session(&mut runtime, &instance, &binding(), &Default::default())
            .unwrap();

        assert!(session.is_created());
        assert!(session.space().is_some());
        assert_eq!(session.rings().len(), 2);
        assert_eq!(session.rings()[0].eye(), Eye::Left);
        assert_eq!(session.rings()[1].eye(), Eye::Right);
        assert_eq!(session.rings()[0].format(), SwapchainFormat::RGBA8);
        assert_eq!(session.rings()[0].sample_count(), 1);

        // Requirements are queried before the session is created
        let calls = runtime.calls();
        let requirements = calls
            .iter()
            .position(|c| *c == Call::GraphicsRequirements)
            .unwrap();
        let create = calls.iter().position(|c| *c == Call::CreateSession).unwrap();
        assert!(requirements < create);

        assert!(matches!(
            session.create_session(&mut runtime, &instance, &binding(), &Default::default()),
            Err(StereoXrError::SessionAlreadyCreated)
        ));
    }

    #[test]
    pub fn test_create_session_before_initialize() {
        let mut runtime = SimulatedRuntime::default();
        let instance = InstanceContext::new();
        let mut session = SessionContext::new();
        assert!(matches!(
            session.create_session(&mut runtime, &instance, &binding(), &Default::default()),
            Err(StereoXrError::NotInitialized)
        ));
        assert!(!session.is_created());
        assert_eq!(runtime.call_count(Call::CreateSession), 0);
    }

    #[test]
    pub fn test_invalid_binding() {
        let (mut runtime, instance) = initialized(Default::default());
        let mut session = SessionContext::new();
        let binding = GraphicsContextBinding::from_raw(1, 2, 0);
        assert!(matches!(
            session.create_session(&mut runtime, &instance, &binding, &Default::default()),
            Err(StereoXrError::InvalidGraphicsBinding { field: "context" })
        ));
        assert_eq!(runtime.call_count(Call::CreateSession), 0);
    }

    #[test]
    pub fn test_graphics_requirements_call_missing() {
        let (mut runtime, instance) = initialized(Default::default());
        let mut session = SessionContext::new();
        runtime.fail_next(
            Call::CreateSession,
            OpenXRResult::ERROR_GRAPHICS_REQUIREMENTS_CALL_MISSING,
        );
        assert!(matches!(
            session.create_session(&mut runtime, &instance, &binding(), &Default::default()),
            Err(StereoXrError::GraphicsRequirementsCallMissing)
        ));
        assert!(!session.is_created());
        assert!(session.space().is_none());
        assert_eq!(runtime.call_count(Call::CreateReferenceSpace), 0);
        assert_eq!(runtime.live_handles(), 1);

        // Any other refusal is a plain session creation error
        runtime.fail_next(Call::CreateSession, OpenXRResult::ERROR_RUNTIME_FAILURE);
        assert!(matches!(
            session.create_session(&mut runtime, &instance, &binding(), &Default::default()),
            Err(StereoXrError::SessionCreateError(
                OpenXRResult::ERROR_RUNTIME_FAILURE
            ))
        ));
        assert!(session
            .create_session(&mut runtime, &instance, &binding(), &Default::default())
            .is_ok());
    }

    #[test]
    pub fn test_failed_setup_leaves_nothing_behind() {
        let (mut runtime, instance) = initialized(Default::default());
        let mut session = SessionContext::new();
        runtime.fail_next(Call::CreateSwapchain, OpenXRResult::ERROR_OUT_OF_MEMORY);
        assert!(session
            .create_session(&mut runtime, &instance, &binding(), &Default::default())
            .is_err());
        assert!(!session.is_created());
        assert!(session.space().is_none());
        assert!(session.rings().is_empty());
        // Only the instance is left
        assert_eq!(runtime.live_handles(), 1);
    }

    #[test]
    pub fn test_sample_count_is_clamped() {
        let (mut runtime, instance) = initialized(Default::default());
        let mut session = SessionContext::new();
        let config = StereoXrConfig {
            sample_count: 16,
            ..Default::default()
        };
        session
            .create_session(&mut runtime, &instance, &binding(), &config)
            .unwrap();
        assert_eq!(session.rings()[0].sample_count(), 4);
    }

    #[test]
    pub fn test_state_machine() {
        let (mut runtime, instance) = initialized(Default::default());
        let mut session = SessionContext::new();
        session
            .create_session(&mut runtime, &instance, &binding(), &Default::default())
            .unwrap();

        drain(&mut session, &mut runtime, &instance);
        assert_eq!(session.state(), SessionState::IDLE);
        assert!(!session.can_render());

        runtime.push_session_state(SessionState::READY);
        // READY, then the SYNCHRONIZED, VISIBLE and FOCUSED queued by beginning the session
        assert_eq!(drain(&mut session, &mut runtime, &instance), 4);
        assert!(session.is_running());
        assert_eq!(session.state(), SessionState::FOCUSED);
        assert!(session.can_render());

        runtime.push_session_state(SessionState::VISIBLE);
        runtime.push_session_state(SessionState::SYNCHRONIZED);
        runtime.push_session_state(SessionState::STOPPING);
        drain(&mut session, &mut runtime, &instance);
        assert_eq!(session.state(), SessionState::IDLE);
        assert!(!session.is_running());
        assert!(!session.stop_requested());
        assert_eq!(runtime.call_count(Call::EndSession), 1);

        runtime.push_session_state(SessionState::EXITING);
        drain(&mut session, &mut runtime, &instance);
        assert!(session.stop_requested());
        assert!(!session.can_render());

        // Terminal states are never left
        runtime.push_session_state(SessionState::READY);
        drain(&mut session, &mut runtime, &instance);
        assert_eq!(session.state(), SessionState::EXITING);
        assert_eq!(runtime.call_count(Call::BeginSession), 1);
    }

    #[test]
    pub fn test_failed_begin_stays_ready() {
        let (mut runtime, instance) = initialized(Default::default());
        let mut session = SessionContext::new();
        session
            .create_session(&mut runtime, &instance, &binding(), &Default::default())
            .unwrap();
        runtime.push_session_state(SessionState::READY);
        runtime.fail_next(Call::BeginSession, OpenXRResult::ERROR_RUNTIME_FAILURE);
        drain(&mut session, &mut runtime, &instance);
        assert_eq!(session.state(), SessionState::READY);
        assert!(!session.is_running());
        assert!(!session.stop_requested());
    }

    #[test]
    pub fn test_loss_pending_stops() {
        let (mut runtime, instance) = initialized(Default::default());
        let mut session = SessionContext::new();
        session
            .create_session(&mut runtime, &instance, &binding(), &Default::default())
            .unwrap();
        runtime.push_session_state(SessionState::READY);
        runtime.push_session_state(SessionState::LOSS_PENDING);
        drain(&mut session, &mut runtime, &instance);
        assert!(session.stop_requested());
        assert!(!session.is_running());

        let (mut runtime, instance) = initialized(Default::default());
        let mut session = SessionContext::new();
        session
            .create_session(&mut runtime, &instance, &binding(), &Default::default())
            .unwrap();
        runtime.push_event(RuntimeEvent::InstanceLossPending);
        runtime.push_event(RuntimeEvent::EventsLost(3));
        drain(&mut session, &mut runtime, &instance);
        assert!(session.stop_requested());
    }

    #[test]
    pub fn test_transition_graph() {
        use SessionState as S;
        assert!(is_valid_transition(S::IDLE, S::READY));
        assert!(is_valid_transition(S::FOCUSED, S::VISIBLE));
        assert!(is_valid_transition(S::FOCUSED, S::LOSS_PENDING));
        assert!(!is_valid_transition(S::IDLE, S::FOCUSED));
        assert!(!is_valid_transition(S::EXITING, S::LOSS_PENDING));
        assert!(!is_valid_transition(S::EXITING, S::IDLE));
    }

    #[test]
    pub fn test_teardown_is_idempotent() {
        let (mut runtime, instance) = initialized(Default::default());
        let mut session = SessionContext::new();
        session.teardown(&mut runtime);
        session
            .create_session(&mut runtime, &instance, &binding(), &Default::default())
            .unwrap();
        session.teardown(&mut runtime);
        session.teardown(&mut runtime);

        assert_eq!(runtime.call_count(Call::DestroySwapchain), 2);
        assert_eq!(runtime.call_count(Call::DestroySpace), 1);
        assert_eq!(runtime.call_count(Call::DestroySession), 1);
        assert_eq!(runtime.live_handles(), 1);

        // Swapchains go first, the session last
        let calls = runtime.calls();
        let last_swapchain = calls
            .iter()
            .rposition(|c| *c == Call::DestroySwapchain)
            .unwrap();
        let space = calls.iter().position(|c| *c == Call::DestroySpace).unwrap();
        let session = calls.iter().position(|c| *c == Call::DestroySession).unwrap();
        assert!(last_swapchain < space && space < session);
    }
}
