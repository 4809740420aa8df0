use std::collections::{HashMap, HashSet, VecDeque};

use glam::{Affine3A, Vec3};
use log::{debug, trace};
use openxr::{self as xr, sys::Result as OpenXRResult, SessionState};

use super::{
    ApplicationInfo, GraphicsRequirements, ProjectionLayer, RuntimeEvent, SwapchainDescriptor,
    SwapchainFormat, ViewConfiguration, ViewPose, XrRuntime,
};
use crate::{
    util::posef_from_affine, GraphicsContextBinding, KHR_ANDROID_CREATE_INSTANCE,
    KHR_OPENGL_ES_ENABLE,
};

/// About 90Hz
pub const DEFAULT_FRAME_PERIOD_NANOS: i64 = 11_111_111;
/// Recommended per eye resolution
pub const VIEWPORT_WIDTH: u32 = 1440;
/// Recommended per eye resolution
pub const VIEWPORT_HEIGHT: u32 = 1584;
/// Half the distance between the eyes, in metres
pub const HALF_IPD: f32 = 0.032;

/// Every runtime entry point, for failure injection and the call log.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    AvailableExtensions,
    CreateInstance,
    DestroyInstance,
    System,
    ViewConfigurationViews,
    GraphicsRequirements,
    CreateSession,
    DestroySession,
    PollEvent,
    BeginSession,
    EndSession,
    CreateReferenceSpace,
    DestroySpace,
    SwapchainFormats,
    CreateSwapchain,
    SwapchainImages,
    AcquireImage,
    WaitImage,
    ReleaseImage,
    DestroySwapchain,
    WaitFrame,
    BeginFrame,
    LocateViews,
    EndFrame,
}

/// How the simulated device presents itself.
#[derive(Debug, Clone)]
pub struct SimulatorSettings {
    /// Extensions the runtime advertises
    pub extensions: Vec<String>,
    /// Whether a head mounted display is attached
    pub device_present: bool,
    /// The view configuration reported for the stereo view type
    pub views: Vec<ViewConfiguration>,
    /// Swapchain formats, in the runtime's order of preference
    pub swapchain_formats: Vec<SwapchainFormat>,
    /// Images per swapchain
    pub image_count: u32,
    /// Move through SYNCHRONIZED, VISIBLE and FOCUSED after `begin_session`, and to IDLE after
    /// `end_session`, the way a real runtime would
    pub auto_advance: bool,
    /// Refuse to create a session until the graphics requirements have been queried
    pub require_graphics_requirements: bool,
    /// Time between predicted display times, in nanoseconds
    pub frame_period_nanos: i64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        let view = ViewConfiguration {
            recommended_width: VIEWPORT_WIDTH,
            recommended_height: VIEWPORT_HEIGHT,
            recommended_sample_count: 1,
            max_width: VIEWPORT_WIDTH * 2,
            max_height: VIEWPORT_HEIGHT * 2,
            max_sample_count: 4,
        };

        Self {
            extensions: vec![
                KHR_ANDROID_CREATE_INSTANCE.to_string(),
                KHR_OPENGL_ES_ENABLE.to_string(),
                "XR_KHR_convert_timespec_time".to_string(),
            ],
            device_present: true,
            views: vec![view; 2],
            swapchain_formats: vec![SwapchainFormat::SRGB8_ALPHA8, SwapchainFormat::RGBA8],
            image_count: 3,
            auto_advance: true,
            require_graphics_requirements: true,
            frame_period_nanos: DEFAULT_FRAME_PERIOD_NANOS,
        }
    }
}

/// Simulated instance handle
#[derive(Debug, PartialEq, Eq)]
pub struct SimInstance(u64);
/// Simulated session handle
#[derive(Debug, PartialEq, Eq)]
pub struct SimSession(u64);
/// Simulated reference space handle
#[derive(Debug, PartialEq, Eq)]
pub struct SimSpace(u64);
/// Simulated swapchain handle
#[derive(Debug, PartialEq, Eq)]
pub struct SimSwapchain(u64);

impl SimSwapchain {
    /// The raw handle value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// One eye's entry in a submitted projection layer.
#[derive(Debug, Clone, Copy)]
pub struct SubmittedView {
    /// Raw handle of the swapchain the eye was rendered into
    pub swapchain: u64,
    /// The rendered region
    pub image_rect: xr::Rect2Di,
    /// The pose submitted for the eye
    pub pose: xr::Posef,
    /// The field of view submitted for the eye
    pub fov: xr::Fovf,
}

/// A frame handed to `end_frame`.
#[derive(Debug, Clone)]
pub struct SubmittedFrame {
    /// The display time the frame was submitted for
    pub display_time: xr::Time,
    /// Number of composition layers (0 or 1)
    pub layer_count: usize,
    /// The projection views of the layer, if any
    pub views: Vec<SubmittedView>,
}

#[derive(Debug, Default)]
struct SwapchainState {
    images: Vec<u32>,
    cursor: u32,
    acquired: VecDeque<u32>,
    waited: usize,
}

/// A deterministic, in-process XR runtime.
///
/// Session state changes are scripted with [`SimulatedRuntime::push_session_state`] and take
/// effect when the event is polled. The simulator enforces the runtime side of the call
/// ordering contract, so misuse shows up as the same error codes a device would return.
#[derive(Debug)]
pub struct SimulatedRuntime {
    settings: SimulatorSettings,
    next_handle: u64,
    instance: Option<u64>,
    session: Option<u64>,
    spaces: HashSet<u64>,
    swapchains: HashMap<u64, SwapchainState>,
    events: VecDeque<RuntimeEvent>,
    session_state: SessionState,
    session_running: bool,
    requirements_queried: bool,
    frame_waited: bool,
    frame_begun: bool,
    display_time: i64,
    should_render: Option<bool>,
    view_state_flags: xr::ViewStateFlags,
    view_poses: [ViewPose; 2],
    failures: HashMap<Call, VecDeque<OpenXRResult>>,
    calls: Vec<Call>,
    submitted_frames: Vec<SubmittedFrame>,
    index_collisions: usize,
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        Self::new(SimulatorSettings::default())
    }
}

impl SimulatedRuntime {
    /// Create a runtime that presents itself as `settings` describes.
    pub fn new(settings: SimulatorSettings) -> Self {
        Self {
            settings,
            next_handle: 1,
            instance: None,
            session: None,
            spaces: Default::default(),
            swapchains: Default::default(),
            events: Default::default(),
            session_state: SessionState::UNKNOWN,
            session_running: false,
            requirements_queried: false,
            frame_waited: false,
            frame_begun: false,
            display_time: 0,
            should_render: None,
            view_state_flags: xr::ViewStateFlags::EMPTY,
            view_poses: default_view_poses(),
            failures: Default::default(),
            calls: Default::default(),
            submitted_frames: Default::default(),
            index_collisions: 0,
        }
    }

    /// The settings the runtime was created with.
    pub fn settings(&self) -> &SimulatorSettings {
        &self.settings
    }

    /// Queue a session state change. It takes effect when polled.
    pub fn push_session_state(&mut self, state: SessionState) {
        self.push_event(RuntimeEvent::SessionStateChanged {
            state,
            time: xr::Time::from_nanos(self.display_time),
        });
    }

    /// Queue an arbitrary event.
    pub fn push_event(&mut self, event: RuntimeEvent) {
        self.events.push_back(event);
    }

    /// Set the flags `locate_views` reports.
    pub fn set_view_state_flags(&mut self, flags: xr::ViewStateFlags) {
        self.view_state_flags = flags;
    }

    /// Report fully tracked views from now on.
    pub fn set_views_valid(&mut self) {
        self.set_view_state_flags(
            xr::ViewStateFlags::POSITION_VALID
                | xr::ViewStateFlags::ORIENTATION_VALID
                | xr::ViewStateFlags::POSITION_TRACKED
                | xr::ViewStateFlags::ORIENTATION_TRACKED,
        );
    }

    /// Set the poses `locate_views` reports.
    pub fn set_view_poses(&mut self, poses: [ViewPose; 2]) {
        self.view_poses = poses;
    }

    /// Force `should_render`, or `None` to derive it from the session state.
    pub fn set_should_render(&mut self, should_render: Option<bool>) {
        self.should_render = should_render;
    }

    /// Make the next call to `call` fail with `result`. Failures queue up per call.
    pub fn fail_next(&mut self, call: Call, result: OpenXRResult) {
        self.failures.entry(call).or_default().push_back(result);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    /// How many times `call` has been made.
    pub fn call_count(&self, call: Call) -> usize {
        self.calls.iter().filter(|c| **c == call).count()
    }

    /// Forget the call log.
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Every frame passed to `end_frame`.
    pub fn submitted_frames(&self) -> &[SubmittedFrame] {
        &self.submitted_frames
    }

    /// How many times an image index was handed out while a previous acquire of it was still
    /// outstanding.
    pub fn index_collisions(&self) -> usize {
        self.index_collisions
    }

    /// Images acquired but not yet released, across every swapchain.
    pub fn outstanding_images(&self) -> usize {
        self.swapchains.values().map(|s| s.acquired.len()).sum()
    }

    /// The session state as of the last polled event.
    pub fn session_state(&self) -> SessionState {
        self.session_state
    }

    /// Whether `begin_session` succeeded without a matching `end_session`.
    pub fn is_session_running(&self) -> bool {
        self.session_running
    }

    /// Number of handles that have been created and not destroyed.
    pub fn live_handles(&self) -> usize {
        self.instance.iter().count()
            + self.session.iter().count()
            + self.spaces.len()
            + self.swapchains.len()
    }

    fn enter(&mut self, call: Call) -> xr::Result<()> {
        trace!("[STEREO_XR_SIMULATOR] {call:?}");
        self.calls.push(call);
        match self.failures.get_mut(&call).and_then(VecDeque::pop_front) {
            Some(result) => Err(result),
            None => Ok(()),
        }
    }

    fn handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn check_instance(&self, instance: &SimInstance) -> xr::Result<()> {
        match self.instance {
            Some(live) if live == instance.0 => Ok(()),
            _ => Err(OpenXRResult::ERROR_HANDLE_INVALID),
        }
    }

    fn check_session(&self, session: &SimSession) -> xr::Result<()> {
        match self.session {
            Some(live) if live == session.0 => Ok(()),
            _ => Err(OpenXRResult::ERROR_HANDLE_INVALID),
        }
    }

    fn swapchain_state(&mut self, swapchain: &SimSwapchain) -> xr::Result<&mut SwapchainState> {
        self.swapchains
            .get_mut(&swapchain.0)
            .ok_or(OpenXRResult::ERROR_HANDLE_INVALID)
    }
}

impl XrRuntime for SimulatedRuntime {
    type Instance = SimInstance;
    type Session = SimSession;
    type Space = SimSpace;
    type Swapchain = SimSwapchain;

    fn available_extensions(&mut self) -> xr::Result<Vec<String>> {
        self.enter(Call::AvailableExtensions)?;
        Ok(self.settings.extensions.clone())
    }

    fn create_instance(
        &mut self,
        application_info: &ApplicationInfo<'_>,
        extensions: &[String],
    ) -> xr::Result<SimInstance> {
        self.enter(Call::CreateInstance)?;
        if self.instance.is_some() {
            return Err(OpenXRResult::ERROR_LIMIT_REACHED);
        }
        if let Some(missing) = extensions
            .iter()
            .find(|e| !self.settings.extensions.contains(*e))
        {
            debug!("[STEREO_XR_SIMULATOR] Extension {missing} is not supported");
            return Err(OpenXRResult::ERROR_EXTENSION_NOT_PRESENT);
        }

        debug!(
            "[STEREO_XR_SIMULATOR] Creating instance for {} v{}",
            application_info.application_name, application_info.application_version
        );
        let handle = self.handle();
        self.instance = Some(handle);
        Ok(SimInstance(handle))
    }

    fn destroy_instance(&mut self, instance: SimInstance) -> xr::Result<()> {
        self.enter(Call::DestroyInstance)?;
        self.check_instance(&instance)?;
        self.instance = None;
        self.events.clear();
        Ok(())
    }

    fn system(
        &mut self,
        instance: &SimInstance,
        _form_factor: xr::FormFactor,
    ) -> xr::Result<xr::SystemId> {
        self.enter(Call::System)?;
        self.check_instance(instance)?;
        if !self.settings.device_present {
            return Err(OpenXRResult::ERROR_FORM_FACTOR_UNAVAILABLE);
        }
        Ok(xr::SystemId::from_raw(1))
    }

    fn view_configuration_views(
        &mut self,
        instance: &SimInstance,
        _system: xr::SystemId,
        _view_type: xr::ViewConfigurationType,
    ) -> xr::Result<Vec<ViewConfiguration>> {
        self.enter(Call::ViewConfigurationViews)?;
        self.check_instance(instance)?;
        Ok(self.settings.views.clone())
    }

    fn graphics_requirements(
        &mut self,
        instance: &SimInstance,
        _system: xr::SystemId,
    ) -> xr::Result<GraphicsRequirements> {
        self.enter(Call::GraphicsRequirements)?;
        self.check_instance(instance)?;
        self.requirements_queried = true;
        Ok(GraphicsRequirements {
            min_api_version_supported: xr::Version::new(3, 0, 0),
            max_api_version_supported: xr::Version::new(3, 2, 0),
        })
    }

    fn create_session(
        &mut self,
        instance: &SimInstance,
        _system: xr::SystemId,
        binding: &GraphicsContextBinding,
    ) -> xr::Result<SimSession> {
        self.enter(Call::CreateSession)?;
        self.check_instance(instance)?;
        if self.session.is_some() {
            return Err(OpenXRResult::ERROR_LIMIT_REACHED);
        }
        if self.settings.require_graphics_requirements && !self.requirements_queried {
            return Err(OpenXRResult::ERROR_GRAPHICS_REQUIREMENTS_CALL_MISSING);
        }
        if binding.validate().is_err() {
            return Err(OpenXRResult::ERROR_GRAPHICS_DEVICE_INVALID);
        }

        let handle = self.handle();
        self.session = Some(handle);
        self.session_state = SessionState::UNKNOWN;
        self.session_running = false;
        self.push_session_state(SessionState::IDLE);
        Ok(SimSession(handle))
    }

    fn destroy_session(&mut self, session: SimSession) -> xr::Result<()> {
        self.enter(Call::DestroySession)?;
        self.check_session(&session)?;
        self.session = None;
        self.session_running = false;
        self.frame_begun = false;
        self.frame_waited = false;
        Ok(())
    }

    fn poll_event(&mut self, instance: &SimInstance) -> xr::Result<Option<RuntimeEvent>> {
        self.enter(Call::PollEvent)?;
        self.check_instance(instance)?;
        let event = self.events.pop_front();
        if let Some(RuntimeEvent::SessionStateChanged { state, .. }) = event {
            self.session_state = state;
        }
        Ok(event)
    }

    fn begin_session(
        &mut self,
        session: &mut SimSession,
        _view_type: xr::ViewConfigurationType,
    ) -> xr::Result<()> {
        self.enter(Call::BeginSession)?;
        self.check_session(session)?;
        if self.session_running {
            return Err(OpenXRResult::ERROR_SESSION_RUNNING);
        }
        if self.session_state != SessionState::READY {
            return Err(OpenXRResult::ERROR_SESSION_NOT_READY);
        }

        self.session_running = true;
        if self.settings.auto_advance {
            self.push_session_state(SessionState::SYNCHRONIZED);
            self.push_session_state(SessionState::VISIBLE);
            self.push_session_state(SessionState::FOCUSED);
        }
        Ok(())
    }

    fn end_session(&mut self, session: &mut SimSession) -> xr::Result<()> {
        self.enter(Call::EndSession)?;
        self.check_session(session)?;
        if !self.session_running {
            return Err(OpenXRResult::ERROR_SESSION_NOT_RUNNING);
        }
        if self.session_state != SessionState::STOPPING {
            return Err(OpenXRResult::ERROR_SESSION_NOT_STOPPING);
        }

        self.session_running = false;
        if self.settings.auto_advance {
            self.push_session_state(SessionState::IDLE);
        }
        Ok(())
    }

    fn create_reference_space(
        &mut self,
        session: &SimSession,
        _reference_space_type: xr::ReferenceSpaceType,
        _pose_in_reference_space: xr::Posef,
    ) -> xr::Result<SimSpace> {
        self.enter(Call::CreateReferenceSpace)?;
        self.check_session(session)?;
        let handle = self.handle();
        self.spaces.insert(handle);
        Ok(SimSpace(handle))
    }

    fn destroy_space(&mut self, space: SimSpace) -> xr::Result<()> {
        self.enter(Call::DestroySpace)?;
        if !self.spaces.remove(&space.0) {
            return Err(OpenXRResult::ERROR_HANDLE_INVALID);
        }
        Ok(())
    }

    fn swapchain_formats(&mut self, session: &SimSession) -> xr::Result<Vec<SwapchainFormat>> {
        self.enter(Call::SwapchainFormats)?;
        self.check_session(session)?;
        Ok(self.settings.swapchain_formats.clone())
    }

    fn create_swapchain(
        &mut self,
        session: &SimSession,
        descriptor: &SwapchainDescriptor,
    ) -> xr::Result<SimSwapchain> {
        self.enter(Call::CreateSwapchain)?;
        self.check_session(session)?;
        if !self.settings.swapchain_formats.contains(&descriptor.format) {
            return Err(OpenXRResult::ERROR_SWAPCHAIN_FORMAT_UNSUPPORTED);
        }
        if descriptor.width == 0 || descriptor.height == 0 || descriptor.sample_count == 0 {
            return Err(OpenXRResult::ERROR_VALIDATION_FAILURE);
        }

        let handle = self.handle();
        let images = (0..self.settings.image_count)
            .map(|i| (handle as u32) * 100 + i)
            .collect();
        self.swapchains.insert(
            handle,
            SwapchainState {
                images,
                ..Default::default()
            },
        );
        Ok(SimSwapchain(handle))
    }

    fn swapchain_images(&mut self, swapchain: &SimSwapchain) -> xr::Result<Vec<u32>> {
        self.enter(Call::SwapchainImages)?;
        Ok(self.swapchain_state(swapchain)?.images.clone())
    }

    fn acquire_image(&mut self, swapchain: &mut SimSwapchain) -> xr::Result<u32> {
        self.enter(Call::AcquireImage)?;
        let state = self.swapchain_state(swapchain)?;
        let image_count = state.images.len() as u32;
        if state.acquired.len() as u32 >= image_count {
            return Err(OpenXRResult::ERROR_CALL_ORDER_INVALID);
        }

        let index = state.cursor;
        state.cursor = (state.cursor + 1) % image_count;
        let collision = state.acquired.contains(&index);
        state.acquired.push_back(index);
        if collision {
            self.index_collisions += 1;
        }
        Ok(index)
    }

    fn wait_image(&mut self, swapchain: &mut SimSwapchain, _timeout: xr::Duration) -> xr::Result<()> {
        self.enter(Call::WaitImage)?;
        let state = self.swapchain_state(swapchain)?;
        if state.waited >= state.acquired.len() {
            return Err(OpenXRResult::ERROR_CALL_ORDER_INVALID);
        }
        state.waited += 1;
        Ok(())
    }

    fn release_image(&mut self, swapchain: &mut SimSwapchain) -> xr::Result<()> {
        self.enter(Call::ReleaseImage)?;
        let state = self.swapchain_state(swapchain)?;
        if state.waited == 0 {
            return Err(OpenXRResult::ERROR_CALL_ORDER_INVALID);
        }
        state.waited -= 1;
        state.acquired.pop_front();
        Ok(())
    }

    fn destroy_swapchain(&mut self, swapchain: SimSwapchain) -> xr::Result<()> {
        self.enter(Call::DestroySwapchain)?;
        match self.swapchains.remove(&swapchain.0) {
            Some(_) => Ok(()),
            None => Err(OpenXRResult::ERROR_HANDLE_INVALID),
        }
    }

    fn wait_frame(&mut self, session: &mut SimSession) -> xr::Result<xr::FrameState> {
        self.enter(Call::WaitFrame)?;
        self.check_session(session)?;
        if !self.session_running {
            return Err(OpenXRResult::ERROR_SESSION_NOT_RUNNING);
        }

        self.display_time += self.settings.frame_period_nanos;
        self.frame_waited = true;
        let should_render = self.should_render.unwrap_or(
            self.session_state == SessionState::VISIBLE
                || self.session_state == SessionState::FOCUSED,
        );

        Ok(xr::FrameState {
            predicted_display_time: xr::Time::from_nanos(self.display_time),
            predicted_display_period: xr::Duration::from_nanos(self.settings.frame_period_nanos),
            should_render,
        })
    }

    fn begin_frame(&mut self, session: &mut SimSession) -> xr::Result<()> {
        self.enter(Call::BeginFrame)?;
        self.check_session(session)?;
        if !self.session_running {
            return Err(OpenXRResult::ERROR_SESSION_NOT_RUNNING);
        }
        if !self.frame_waited {
            return Err(OpenXRResult::ERROR_CALL_ORDER_INVALID);
        }
        self.frame_waited = false;
        self.frame_begun = true;
        Ok(())
    }

    fn locate_views(
        &mut self,
        session: &SimSession,
        _view_type: xr::ViewConfigurationType,
        _display_time: xr::Time,
        space: &SimSpace,
    ) -> xr::Result<(xr::ViewStateFlags, Vec<ViewPose>)> {
        self.enter(Call::LocateViews)?;
        self.check_session(session)?;
        if !self.spaces.contains(&space.0) {
            return Err(OpenXRResult::ERROR_HANDLE_INVALID);
        }
        let views = self
            .view_poses
            .iter()
            .copied()
            .cycle()
            .take(self.settings.views.len())
            .collect();
        Ok((self.view_state_flags, views))
    }

    fn end_frame(
        &mut self,
        session: &mut SimSession,
        display_time: xr::Time,
        _environment_blend_mode: xr::EnvironmentBlendMode,
        layer: Option<&ProjectionLayer<'_, Self>>,
    ) -> xr::Result<()> {
        self.enter(Call::EndFrame)?;
        self.check_session(session)?;
        if !self.frame_begun {
            return Err(OpenXRResult::ERROR_CALL_ORDER_INVALID);
        }
        self.frame_begun = false;

        let views = layer
            .map(|layer| {
                layer
                    .views
                    .iter()
                    .map(|view| SubmittedView {
                        swapchain: view.swapchain.0,
                        image_rect: view.image_rect,
                        pose: view.pose,
                        fov: view.fov,
                    })
                    .collect()
            })
            .unwrap_or_default();

        self.submitted_frames.push(SubmittedFrame {
            display_time,
            layer_count: layer.iter().count(),
            views,
        });
        Ok(())
    }
}

fn default_view_poses() -> [ViewPose; 2] {
    let fov = xr::Fovf {
        angle_left: -0.87,
        angle_right: 0.75,
        angle_up: 0.82,
        angle_down: -0.9,
    };
    let eye = |x: f32| ViewPose {
        pose: posef_from_affine(Affine3A::from_translation(Vec3::new(x, 1.6, 0.))),
        fov,
    };
    [eye(-HALF_IPD), eye(HALF_IPD)]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_session() -> (SimulatedRuntime, SimInstance, SimSession) {
        let mut runtime = SimulatedRuntime::default();
        let app = ApplicationInfo {
            application_name: "test",
            application_version: 1,
            engine_name: "test",
            engine_version: 1,
        };
        let instance = runtime.create_instance(&app, &[]).unwrap();
        let system = runtime
            .system(&instance, xr::FormFactor::HEAD_MOUNTED_DISPLAY)
            .unwrap();
        runtime.graphics_requirements(&instance, system).unwrap();
        let mut session = runtime
            .create_session(&instance, system, &GraphicsContextBinding::from_raw(1, 1, 1))
            .unwrap();
        runtime.push_session_state(SessionState::READY);
        while runtime.poll_event(&instance).unwrap().is_some() {}
        runtime
            .begin_session(&mut session, xr::ViewConfigurationType::PRIMARY_STEREO)
            .unwrap();
        (runtime, instance, session)
    }

    #[test]
    pub fn test_session_requires_graphics_requirements() {
        let mut runtime = SimulatedRuntime::default();
        let app = ApplicationInfo {
            application_name: "test",
            application_version: 1,
            engine_name: "test",
            engine_version: 1,
        };
        let instance = runtime.create_instance(&app, &[]).unwrap();
        let system = xr::SystemId::from_raw(1);
        let result =
            runtime.create_session(&instance, system, &GraphicsContextBinding::from_raw(1, 1, 1));
        assert_eq!(
            result.unwrap_err(),
            OpenXRResult::ERROR_GRAPHICS_REQUIREMENTS_CALL_MISSING
        );
    }

    #[test]
    pub fn test_auto_advance() {
        let (mut runtime, instance, _session) = running_session();
        let mut states = Vec::new();
        while let Some(RuntimeEvent::SessionStateChanged { state, .. }) =
            runtime.poll_event(&instance).unwrap()
        {
            states.push(state);
        }
        assert_eq!(
            states,
            [
                SessionState::SYNCHRONIZED,
                SessionState::VISIBLE,
                SessionState::FOCUSED
            ]
        );
        assert_eq!(runtime.session_state(), SessionState::FOCUSED);
    }

    #[test]
    pub fn test_image_ordering_is_enforced() {
        let (mut runtime, _instance, session) = running_session();
        let descriptor = SwapchainDescriptor {
            format: SwapchainFormat::RGBA8,
            sample_count: 1,
            width: 16,
            height: 16,
        };
        let mut swapchain = runtime.create_swapchain(&session, &descriptor).unwrap();

        assert_eq!(
            runtime.release_image(&mut swapchain).unwrap_err(),
            OpenXRResult::ERROR_CALL_ORDER_INVALID
        );
        assert_eq!(runtime.acquire_image(&mut swapchain).unwrap(), 0);
        runtime
            .wait_image(&mut swapchain, xr::Duration::INFINITE)
            .unwrap();
        runtime.release_image(&mut swapchain).unwrap();
        assert_eq!(runtime.acquire_image(&mut swapchain).unwrap(), 1);
        assert_eq!(runtime.outstanding_images(), 1);
    }

    #[test]
    pub fn test_frame_pairing_is_enforced() {
        let (mut runtime, _instance, mut session) = running_session();
        assert_eq!(
            runtime.begin_frame(&mut session).unwrap_err(),
            OpenXRResult::ERROR_CALL_ORDER_INVALID
        );
        let frame_state = runtime.wait_frame(&mut session).unwrap();
        runtime.begin_frame(&mut session).unwrap();
        runtime
            .end_frame(
                &mut session,
                frame_state.predicted_display_time,
                xr::EnvironmentBlendMode::OPAQUE,
                None,
            )
            .unwrap();
        assert_eq!(runtime.submitted_frames().len(), 1);
        assert_eq!(runtime.submitted_frames()[0].layer_count, 0);
        assert_eq!(
            runtime
                .end_frame(
                    &mut session,
                    frame_state.predicted_display_time,
                    xr::EnvironmentBlendMode::OPAQUE,
                    None,
                )
                .unwrap_err(),
            OpenXRResult::ERROR_CALL_ORDER_INVALID
        );
    }

    #[test]
    pub fn test_fail_next() {
        let (mut runtime, _instance, mut session) = running_session();
        runtime.fail_next(Call::WaitFrame, OpenXRResult::ERROR_SESSION_LOST);
        assert_eq!(
            runtime.wait_frame(&mut session).err(),
            Some(OpenXRResult::ERROR_SESSION_LOST)
        );
        assert!(runtime.wait_frame(&mut session).is_ok());
        assert_eq!(runtime.call_count(Call::WaitFrame), 2);
    }

    #[test]
    pub fn test_default_view_poses() {
        let [left, right] = default_view_poses();
        assert_eq!(left.pose.position.x, -HALF_IPD);
        assert_eq!(right.pose.position.x, HALF_IPD);
        assert_eq!(left.pose.position.y, 1.6);
        assert_eq!(left.pose.orientation.w, 1.);
        assert_eq!(right.pose.orientation.y, 0.);
    }
}
