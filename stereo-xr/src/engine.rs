use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, ThreadId},
};

use log::{debug, error, info, warn};
use openxr::{self as xr, SessionState};
use serde::{Deserialize, Serialize};

use crate::{
    contexts::{swapchain_ring::DEFAULT_FORMAT_PREFERENCE, InstanceContext, SessionContext},
    frame_loop::{FrameLoop, TickReport},
    render::{NoopRenderer, RenderCallback},
    runtime::{ApplicationInfo, SwapchainFormat, XrRuntime},
    GraphicsContextBinding, StereoXrError, StereoXrResult, FORM_FACTOR, REQUIRED_EXTENSIONS,
    VIEW_TYPE,
};

/// The reference space views are located in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceSpace {
    /// Origin at the head's position when the session started, gravity aligned
    #[default]
    Local,
    /// Origin on the floor, in the middle of the play area
    Stage,
    /// Locked to the head
    View,
}

impl ReferenceSpace {
    /// The matching OpenXR reference space type
    pub fn space_type(self) -> xr::ReferenceSpaceType {
        match self {
            ReferenceSpace::Local => xr::ReferenceSpaceType::LOCAL,
            ReferenceSpace::Stage => xr::ReferenceSpaceType::STAGE,
            ReferenceSpace::View => xr::ReferenceSpaceType::VIEW,
        }
    }
}

/// Everything about a [`StereoXr`] that can be decided before it is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StereoXrConfig {
    /// Reported to the runtime at instance creation
    pub application_name: String,
    /// Reported to the runtime at instance creation
    pub application_version: u32,
    /// Extensions that must be advertised, on top of those passed to `initialize`
    pub required_extensions: Vec<String>,
    /// The space poses are located in
    pub reference_space: ReferenceSpace,
    /// Samples per pixel, clamped to what the runtime supports
    pub sample_count: u32,
    /// Swapchain formats to try, in order
    pub format_preference: Vec<SwapchainFormat>,
}

impl Default for StereoXrConfig {
    fn default() -> Self {
        Self {
            application_name: "stereo-xr".to_string(),
            application_version: 1,
            required_extensions: REQUIRED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            reference_space: ReferenceSpace::Local,
            sample_count: 1,
            format_preference: DEFAULT_FORMAT_PREFERENCE.to_vec(),
        }
    }
}

/// Builder for [`StereoXr`].
#[derive(Default)]
pub struct StereoXrBuilder {
    config: StereoXrConfig,
    render_callback: Option<Box<dyn RenderCallback>>,
}

impl StereoXrBuilder {
    /// Create a `StereoXrBuilder`
    pub fn new() -> Self {
        Default::default()
    }

    /// Replace the whole config
    pub fn config(&mut self, config: StereoXrConfig) -> &mut Self {
        self.config = config;
        self
    }

    /// Set the application name
    pub fn application_name(&mut self, name: &str) -> &mut Self {
        self.config.application_name = name.to_string();
        self
    }

    /// Set the application version
    pub fn application_version(&mut self, version: u32) -> &mut Self {
        self.config.application_version = version;
        self
    }

    /// Set the extensions every `initialize` requires
    pub fn required_extensions(&mut self, extensions: Vec<String>) -> &mut Self {
        self.config.required_extensions = extensions;
        self
    }

    /// Set the reference space
    pub fn reference_space(&mut self, reference_space: ReferenceSpace) -> &mut Self {
        self.config.reference_space = reference_space;
        self
    }

    /// Set the swapchain sample count
    pub fn sample_count(&mut self, sample_count: u32) -> &mut Self {
        self.config.sample_count = sample_count;
        self
    }

    /// Set the swapchain format preference
    pub fn format_preference(&mut self, formats: Vec<SwapchainFormat>) -> &mut Self {
        self.config.format_preference = formats;
        self
    }

    /// Set what draws into each eye's image
    pub fn render_callback(&mut self, callback: impl RenderCallback + 'static) -> &mut Self {
        self.render_callback = Some(Box::new(callback));
        self
    }

    /// Build the `StereoXr`. Nothing is asked of the runtime until `initialize`.
    pub fn build<R: XrRuntime>(&mut self, runtime: R) -> StereoXr<R> {
        StereoXr {
            runtime,
            config: self.config.clone(),
            instance_context: InstanceContext::new(),
            binding: None,
            session_context: SessionContext::new(),
            frame_loop: FrameLoop::new(),
            render_callback: self
                .render_callback
                .take()
                .unwrap_or_else(|| Box::new(NoopRenderer)),
            shutdown_handle: Default::default(),
        }
    }
}

#[derive(Debug, Default)]
struct TickState {
    in_tick: bool,
    tick_thread: Option<ThreadId>,
    shutdown_requested: bool,
}

/// Lets another thread ask the frame loop to stop.
///
/// One mutex guards both the "shutdown requested" flag and the "a tick is running" flag, so a
/// tick either starts before the request or never starts at all.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    inner: Arc<(Mutex<TickState>, Condvar)>,
}

impl ShutdownHandle {
    fn lock(&self) -> MutexGuard<'_, TickState> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// No tick will start after this returns.
    pub fn request_shutdown(&self) {
        self.lock().shutdown_requested = true;
        info!("[STEREO_XR] Shutdown requested");
    }

    /// [`Self::request_shutdown`], then block until any tick in flight has finished.
    ///
    /// Meant for another thread. Called from inside a render callback it only requests the
    /// shutdown, since the tick it would wait for is its own.
    pub fn request_shutdown_and_wait(&self) {
        let mut state = self.lock();
        state.shutdown_requested = true;
        if state.tick_thread == Some(thread::current().id()) {
            warn!("[STEREO_XR] Shutdown requested from inside a tick, not waiting");
            return;
        }
        let _idle = self.wait_idle(state);
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.lock().shutdown_requested
    }

    /// Whether a tick is running right now
    pub fn is_in_tick(&self) -> bool {
        self.lock().in_tick
    }

    fn wait_idle<'a>(&'a self, state: MutexGuard<'a, TickState>) -> MutexGuard<'a, TickState> {
        self.inner
            .1
            .wait_while(state, |s| s.in_tick)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_tick(&self) -> StereoXrResult<TickGuard<'_>> {
        let mut state = self.lock();
        if state.shutdown_requested {
            return Err(StereoXrError::ShuttingDown);
        }
        state.in_tick = true;
        state.tick_thread = Some(thread::current().id());
        Ok(TickGuard { handle: self })
    }

    fn reset(&self) {
        self.lock().shutdown_requested = false;
    }
}

struct TickGuard<'a> {
    handle: &'a ShutdownHandle,
}

impl<'a> Drop for TickGuard<'a> {
    fn drop(&mut self) {
        let mut state = self.handle.lock();
        state.in_tick = false;
        state.tick_thread = None;
        drop(state);
        self.handle.inner.1.notify_all();
    }
}

/// A stereo head mounted display session, from instance creation to teardown.
///
/// Call [`StereoXr::run_frame`] once per display tick. It returns `false` when the host should
/// stop ticking and call [`StereoXr::shutdown`].
pub struct StereoXr<R: XrRuntime> {
    runtime: R,
    config: StereoXrConfig,
    instance_context: InstanceContext<R>,
    binding: Option<GraphicsContextBinding>,
    session_context: SessionContext<R>,
    frame_loop: FrameLoop,
    render_callback: Box<dyn RenderCallback>,
    shutdown_handle: ShutdownHandle,
}

impl<R: XrRuntime> StereoXr<R> {
    /// Create the instance, find the head mounted display and read its view configuration.
    pub fn initialize(&mut self, required_extensions: &[&str]) -> bool {
        report("initialize", self.try_initialize(required_extensions))
    }

    /// [`Self::initialize`], reporting why it failed.
    pub fn try_initialize(&mut self, required_extensions: &[&str]) -> StereoXrResult<()> {
        let mut extensions = self.config.required_extensions.clone();
        for extension in required_extensions {
            if !extensions.iter().any(|e| e == extension) {
                extensions.push(extension.to_string());
            }
        }

        if self.instance_context.is_initialized() {
            let enabled = self.instance_context.enabled_extensions();
            let missing: Vec<String> = extensions
                .into_iter()
                .filter(|e| !enabled.contains(e))
                .collect();
            if !missing.is_empty() {
                return Err(StereoXrError::InitError { missing });
            }
            debug!("[STEREO_XR] Already initialized");
            return Ok(());
        }
        self.shutdown_handle.reset();

        let application_info = ApplicationInfo {
            application_name: &self.config.application_name,
            application_version: self.config.application_version,
            engine_name: "stereo-xr",
            engine_version: 1,
        };
        self.instance_context
            .create_instance(&mut self.runtime, &application_info, &extensions)?;

        let result = self
            .instance_context
            .get_system(&mut self.runtime, FORM_FACTOR)
            .and_then(|_| {
                self.instance_context
                    .enumerate_views(&mut self.runtime, VIEW_TYPE)
                    .map(|_| ())
            });
        if let Err(e) = result {
            self.instance_context.destroy_instance(&mut self.runtime);
            return Err(e);
        }

        info!("[STEREO_XR] Initialized");
        Ok(())
    }

    /// Remember the host's rendering context for session creation.
    pub fn setup_graphics_binding(&mut self, binding: GraphicsContextBinding) -> bool {
        report(
            "setup_graphics_binding",
            self.try_setup_graphics_binding(binding),
        )
    }

    /// [`Self::setup_graphics_binding`], reporting why it failed.
    pub fn try_setup_graphics_binding(
        &mut self,
        binding: GraphicsContextBinding,
    ) -> StereoXrResult<()> {
        binding.validate()?;
        if self.session_context.is_created() {
            warn!("[STEREO_XR] New graphics binding will apply to the next session");
        }
        self.binding = Some(binding);
        Ok(())
    }

    /// Create the session, its reference space and both eyes' swapchains.
    pub fn create_session(&mut self) -> bool {
        report("create_session", self.try_create_session())
    }

    /// [`Self::create_session`], reporting why it failed.
    pub fn try_create_session(&mut self) -> StereoXrResult<()> {
        if !self.instance_context.is_initialized() {
            return Err(StereoXrError::NotInitialized);
        }
        let binding = self.binding.ok_or(StereoXrError::MissingGraphicsBinding)?;
        self.session_context.create_session(
            &mut self.runtime,
            &self.instance_context,
            &binding,
            &self.config,
        )
    }

    /// Run one display tick. Returns `false` when there is no session to run, the session was
    /// lost or is exiting, or shutdown was requested: the host should stop calling this and
    /// call [`Self::shutdown`].
    pub fn run_frame(&mut self) -> bool {
        match self.tick() {
            Ok(report) => !report.stop_requested,
            Err(StereoXrError::ShuttingDown) => false,
            Err(e @ (StereoXrError::NotInitialized | StereoXrError::NoSession)) => {
                warn!("[STEREO_XR] Not running frames: {e}");
                false
            }
            Err(e) => {
                error!("[STEREO_XR] Frame failed: {e}");
                !e.is_fatal()
            }
        }
    }

    /// [`Self::run_frame`], describing what the tick did.
    pub fn tick(&mut self) -> StereoXrResult<TickReport> {
        let _guard = self.shutdown_handle.begin_tick()?;
        if !self.instance_context.is_initialized() {
            return Err(StereoXrError::NotInitialized);
        }
        if !self.session_context.is_created() {
            return Err(StereoXrError::NoSession);
        }
        self.frame_loop.tick(
            &mut self.runtime,
            &self.instance_context,
            &mut self.session_context,
            self.render_callback.as_mut(),
        )
    }

    /// Destroy the swapchains, reference space, session and instance, in that order. Waits for
    /// a tick in flight to finish first. Safe to call any number of times.
    ///
    /// No further ticks run until [`Self::initialize`] succeeds again.
    pub fn shutdown(&mut self) {
        let handle = self.shutdown_handle.clone();
        let mut state = handle.wait_idle(handle.lock());
        state.shutdown_requested = true;
        drop(state);

        if !self.session_context.is_created() && self.instance_context.instance().is_none() {
            debug!("[STEREO_XR] Nothing to shut down");
            return;
        }

        info!("[STEREO_XR] Shutting down..");
        self.session_context.teardown(&mut self.runtime);
        self.instance_context.destroy_instance(&mut self.runtime);
        self.binding = None;
        info!("[STEREO_XR] ..done!");
    }

    /// A handle other threads can use to stop the frame loop
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown_handle.clone()
    }

    /// The session state as of the last tick
    pub fn session_state(&self) -> SessionState {
        self.session_context.state()
    }

    /// The config this was built with
    pub fn config(&self) -> &StereoXrConfig {
        &self.config
    }

    /// The graphics binding, once set up
    pub fn graphics_binding(&self) -> Option<&GraphicsContextBinding> {
        self.binding.as_ref()
    }

    /// The instance context
    pub fn instance_context(&self) -> &InstanceContext<R> {
        &self.instance_context
    }

    /// The session context
    pub fn session_context(&self) -> &SessionContext<R> {
        &self.session_context
    }

    /// The frame loop
    pub fn frame_loop(&self) -> &FrameLoop {
        &self.frame_loop
    }

    /// The runtime
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// The runtime, mutably. Used to script the simulated runtime.
    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }
}

impl<R: XrRuntime> Drop for StereoXr<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn report(operation: &str, result: StereoXrResult<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            error!("[STEREO_XR] {operation} failed: {e}");
            false
        }
    }
}
