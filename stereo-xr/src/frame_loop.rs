use std::time::Instant;

use log::{debug, error, trace, warn};
use openxr::{self as xr, sys::Result as OpenXRResult};

use crate::{
    contexts::{InstanceContext, SessionContext, SwapchainRing},
    render::RenderCallback,
    result_policy::{classify, classify_result, Outcome},
    runtime::{ProjectionLayer, ProjectionView, ViewPose, XrRuntime},
    util::is_view_valid,
    StereoXrError, StereoXrResult, BLEND_MODE, VIEW_TYPE,
};

/// Why a tick submitted a frame with no layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyReason {
    /// The runtime said the frame will not be shown
    ShouldNotRender,
    /// The views' position or orientation could not be trusted
    PoseInvalid,
    /// The views could not be located
    LocateFailed,
    /// Acquiring, binding or releasing an eye's image failed
    RenderFailed,
}

/// What a tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The session isn't in a renderable state; no frame calls were made
    Idle,
    /// Every eye was rendered and a projection layer was submitted
    Rendered {
        /// Number of eyes rendered
        eyes: usize,
    },
    /// The begin/end pair ran with zero layers
    Empty(EmptyReason),
    /// Waiting on or beginning the frame failed, so there was nothing to end
    Abandoned,
}

/// The result of one display tick.
#[derive(Debug)]
pub struct TickReport {
    /// What the tick did
    pub outcome: TickOutcome,
    /// The predicted display time the frame was built for, if frame timing ran
    pub display_time: Option<xr::Time>,
    /// The session is exiting or lost; the host should stop ticking and shut down
    pub stop_requested: bool,
    /// A recoverable failure the tick absorbed
    pub error: Option<StereoXrError>,
}

impl TickReport {
    fn idle(stop_requested: bool) -> Self {
        Self {
            outcome: TickOutcome::Idle,
            display_time: None,
            stop_requested,
            error: None,
        }
    }

    /// Whether a layer was submitted
    pub fn rendered(&self) -> bool {
        matches!(self.outcome, TickOutcome::Rendered { .. }) && self.error.is_none()
    }
}

#[derive(Debug)]
struct TickTimers {
    last_update: Instant,
    timings: Vec<u128>,
}

impl Default for TickTimers {
    fn default() -> Self {
        Self {
            last_update: Instant::now(),
            timings: Default::default(),
        }
    }
}

impl TickTimers {
    fn record(&mut self, tick_start: Instant) {
        let now = Instant::now();
        self.timings.push((now - tick_start).as_micros());

        if (now - self.last_update).as_secs_f32() >= 1.0 {
            let average = self.timings.iter().sum::<u128>() / self.timings.len() as u128;
            debug!("[STEREO_XR_PERF] Average tick time: {average}us");
            self.last_update = now;
            self.timings.clear();
        }
    }
}

/// Drives one `wait → begin → render → end` iteration per call.
///
/// Once `begin_frame` succeeds the matching `end_frame` is always issued, with zero layers if
/// anything went wrong in between.
#[derive(Debug, Default)]
pub struct FrameLoop {
    frames_submitted: u64,
    frames_rendered: u64,
    timers: TickTimers,
}

struct EyeSubmission {
    image_rect: xr::Rect2Di,
    view: ViewPose,
}

impl FrameLoop {
    /// A frame loop that has not ticked yet.
    pub fn new() -> Self {
        Default::default()
    }

    /// Frames handed to `end_frame` successfully, with or without layers
    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// Frames submitted with a projection layer
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Run one display tick.
    ///
    /// Recoverable failures are absorbed into the report. Only a lost instance or session is
    /// returned as an error.
    pub fn tick<R: XrRuntime>(
        &mut self,
        runtime: &mut R,
        instance_context: &InstanceContext<R>,
        session_context: &mut SessionContext<R>,
        renderer: &mut dyn RenderCallback,
    ) -> StereoXrResult<TickReport> {
        let tick_start = Instant::now();
        let instance = instance_context
            .instance()
            .ok_or(StereoXrError::NotInitialized)?;

        session_context.poll_events(runtime, instance)?;
        let stop_requested = session_context.stop_requested();
        if !session_context.can_render() {
            trace!("[STEREO_XR_FRAME] Idle in {:?}", session_context.state());
            return Ok(TickReport::idle(stop_requested));
        }
        let Some((session, space, rings)) = session_context.frame_parts() else {
            return Ok(TickReport::idle(stop_requested));
        };

        let abandon = |error: StereoXrError| -> StereoXrResult<TickReport> {
            if error.is_fatal() {
                return Err(error);
            }
            warn!("[STEREO_XR_FRAME] Abandoning tick: {error}");
            Ok(TickReport {
                outcome: TickOutcome::Abandoned,
                display_time: None,
                stop_requested,
                error: Some(error),
            })
        };

        let frame_state = match runtime.wait_frame(session) {
            Ok(frame_state) => frame_state,
            Err(e) => return abandon(frame_error("xrWaitFrame", e)),
        };
        if let Err(e) = runtime.begin_frame(session) {
            return abandon(frame_error("xrBeginFrame", e));
        }
        let display_time = frame_state.predicted_display_time;
        trace!("[STEREO_XR_FRAME] Began frame for {display_time:?}");

        // From here on the frame must be ended.
        let mut deferred_error = None;
        let mut submissions = Vec::with_capacity(rings.len());
        let mut empty_reason = None;

        if !frame_state.should_render {
            empty_reason = Some(EmptyReason::ShouldNotRender);
        } else {
            match runtime.locate_views(session, VIEW_TYPE, display_time, space) {
                Err(e) => {
                    warn!("[STEREO_XR_FRAME] Unable to locate views: {e}");
                    deferred_error = Some(StereoXrError::per_tick(e, StereoXrError::OpenXRError));
                    empty_reason = Some(EmptyReason::LocateFailed);
                }
                Ok((flags, _)) if !is_view_valid(&flags) => {
                    trace!("[STEREO_XR_FRAME] Views are not valid: {flags:?}");
                    empty_reason = Some(EmptyReason::PoseInvalid);
                }
                Ok((_, views)) if views.len() != rings.len() => {
                    warn!(
                        "[STEREO_XR_FRAME] Located {} views for {} eyes",
                        views.len(),
                        rings.len()
                    );
                    empty_reason = Some(EmptyReason::LocateFailed);
                }
                Ok((_, views)) => {
                    for (ring, view) in rings.iter_mut().zip(views) {
                        let eye = ring.eye();
                        match render_eye(runtime, ring, renderer, &view) {
                            Ok(()) => submissions.push(EyeSubmission {
                                image_rect: ring.image_rect(),
                                view,
                            }),
                            Err(e) => {
                                warn!("[STEREO_XR_FRAME] Unable to render {eye:?} eye: {e}");
                                deferred_error = Some(e);
                                empty_reason = Some(EmptyReason::RenderFailed);
                                break;
                            }
                        }
                    }
                }
            }
        }

        let layer = match empty_reason {
            None => Some(ProjectionLayer {
                space,
                views: rings
                    .iter()
                    .zip(&submissions)
                    .filter_map(|(ring, submission)| {
                        Some(ProjectionView {
                            swapchain: ring.swapchain()?,
                            image_rect: submission.image_rect,
                            pose: submission.view.pose,
                            fov: submission.view.fov,
                        })
                    })
                    .collect(),
            }),
            Some(_) => None,
        };

        let submit_result = runtime.end_frame(session, display_time, BLEND_MODE, layer.as_ref());
        self.timers.record(tick_start);
        match (classify_result(&submit_result), submit_result) {
            (_, Ok(())) => {
                self.frames_submitted += 1;
                if layer.is_some() {
                    self.frames_rendered += 1;
                }
            }
            (Outcome::Fatal, Err(e)) => {
                let error = StereoXrError::LossError(e);
                error!("[STEREO_XR_FRAME] Lost while submitting: {error}");
                return Err(error);
            }
            (_, Err(e)) => {
                let error = StereoXrError::SubmitError(e);
                warn!("[STEREO_XR_FRAME] Unable to submit frame: {error}");
                deferred_error = Some(error);
            }
        }

        if let Some(error) = deferred_error.take() {
            if error.is_fatal() {
                error!("[STEREO_XR_FRAME] Lost during the frame: {error}");
                return Err(error);
            }
            deferred_error = Some(error);
        }

        let outcome = match empty_reason {
            Some(reason) => TickOutcome::Empty(reason),
            None => TickOutcome::Rendered {
                eyes: submissions.len(),
            },
        };
        Ok(TickReport {
            outcome,
            display_time: Some(display_time),
            stop_requested,
            error: deferred_error,
        })
    }
}

fn frame_error(stage: &'static str, result: OpenXRResult) -> StereoXrError {
    match classify(result) {
        Outcome::Fatal => StereoXrError::LossError(result),
        _ => StereoXrError::FrameError { stage, result },
    }
}

/// Acquire, bind, render, unbind and release one eye's image. The image is released on every
/// path out of here.
fn render_eye<R: XrRuntime>(
    runtime: &mut R,
    ring: &mut SwapchainRing<R>,
    renderer: &mut dyn RenderCallback,
    view: &ViewPose,
) -> StereoXrResult<()> {
    let eye = ring.eye();
    let image = ring.acquire(runtime, xr::Duration::INFINITE)?;
    let target = image.target()?;

    renderer.bind_target(&target, eye)?;
    renderer.render(&target, view, eye);
    renderer.unbind_target(&target, eye);

    image.release()
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::{
        render::{Eye, RenderTarget},
        runtime::{ApplicationInfo, Call, SimulatedRuntime, SimulatorSettings},
        GraphicsContextBinding, StereoXrConfig, FORM_FACTOR, REQUIRED_EXTENSIONS,
    };
    use openxr::SessionState;

    #[derive(Default, Clone)]
    struct Recorder {
        rendered: Rc<RefCell<Vec<(Eye, RenderTarget, ViewPose)>>>,
        fail_bind: bool,
    }

    impl RenderCallback for Recorder {
        fn bind_target(&mut self, _target: &RenderTarget, _eye: Eye) -> anyhow::Result<()> {
            if self.fail_bind {
                anyhow::bail!("framebuffer incomplete");
            }
            Ok(())
        }

        fn render(&mut self, target: &RenderTarget, view: &ViewPose, eye: Eye) {
            self.rendered.borrow_mut().push((eye, *target, *view));
        }
    }

    struct Fixture {
        runtime: SimulatedRuntime,
        instance: InstanceContext<SimulatedRuntime>,
        session: SessionContext<SimulatedRuntime>,
        frame_loop: FrameLoop,
        recorder: Recorder,
    }

    impl Fixture {
        fn new(settings: SimulatorSettings) -> Self {
            let mut runtime = SimulatedRuntime::new(settings);
            let mut instance = InstanceContext::new();
            let app = ApplicationInfo {
                application_name: "test",
                application_version: 1,
                engine_name: "stereo-xr",
                engine_version: 1,
            };
            let extensions: Vec<String> =
                REQUIRED_EXTENSIONS.iter().map(|e| e.to_string()).collect();
            instance
                .create_instance(&mut runtime, &app, &extensions)
                .unwrap();
            instance.get_system(&mut runtime, FORM_FACTOR).unwrap();
            instance.enumerate_views(&mut runtime, VIEW_TYPE).unwrap();

            let mut session = SessionContext::new();
            session
                .create_session(
                    &mut runtime,
                    &instance,
                    &GraphicsContextBinding::from_raw(1, 2, 3),
                    &StereoXrConfig::default(),
                )
                .unwrap();

            Self {
                runtime,
                instance,
                session,
                frame_loop: FrameLoop::new(),
                recorder: Default::default(),
            }
        }

        fn running() -> Self {
            let mut fixture = Self::new(Default::default());
            fixture.runtime.push_session_state(SessionState::READY);
            fixture
        }

        fn tick(&mut self) -> StereoXrResult<TickReport> {
            self.frame_loop.tick(
                &mut self.runtime,
                &self.instance,
                &mut self.session,
                &mut self.recorder,
            )
        }

        fn render_count(&self) -> usize {
            self.recorder.rendered.borrow().len()
        }
    }

    #[test]
    pub fn test_idle_is_a_no_op() {
        let mut fixture = Fixture::new(Default::default());
        fixture.runtime.set_views_valid();
        let report = fixture.tick().unwrap();
        assert_eq!(report.outcome, TickOutcome::Idle);
        assert!(!report.stop_requested);
        assert_eq!(fixture.render_count(), 0);
        assert_eq!(fixture.runtime.call_count(Call::WaitFrame), 0);
        assert_eq!(fixture.runtime.call_count(Call::BeginFrame), 0);
    }

    #[test]
    pub fn test_should_not_render() {
        let mut fixture = Fixture::running();
        fixture.runtime.set_views_valid();
        fixture.runtime.set_should_render(Some(false));
        let report = fixture.tick().unwrap();

        assert_eq!(
            report.outcome,
            TickOutcome::Empty(EmptyReason::ShouldNotRender)
        );
        assert_eq!(fixture.runtime.call_count(Call::BeginFrame), 1);
        assert_eq!(fixture.runtime.call_count(Call::EndFrame), 1);
        assert_eq!(fixture.runtime.submitted_frames()[0].layer_count, 0);
        assert_eq!(fixture.runtime.call_count(Call::LocateViews), 0);
        assert_eq!(fixture.render_count(), 0);
    }

    #[test]
    pub fn test_invalid_pose() {
        let mut fixture = Fixture::running();
        fixture
            .runtime
            .set_view_state_flags(xr::ViewStateFlags::ORIENTATION_VALID);
        let report = fixture.tick().unwrap();

        assert_eq!(report.outcome, TickOutcome::Empty(EmptyReason::PoseInvalid));
        assert_eq!(fixture.runtime.call_count(Call::BeginFrame), 1);
        assert_eq!(fixture.runtime.call_count(Call::EndFrame), 1);
        assert_eq!(fixture.runtime.submitted_frames()[0].layer_count, 0);
        assert_eq!(fixture.runtime.call_count(Call::AcquireImage), 0);
        assert_eq!(fixture.render_count(), 0);
    }

    #[test]
    pub fn test_render_both_eyes() {
        let mut fixture = Fixture::running();
        fixture.runtime.set_views_valid();
        let report = fixture.tick().unwrap();
        assert_eq!(report.outcome, TickOutcome::Rendered { eyes: 2 });
        assert!(report.rendered());

        let rendered = fixture.recorder.rendered.borrow();
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0].0, Eye::Left);
        assert_eq!(rendered[1].0, Eye::Right);
        assert_eq!(rendered[0].1.width, 1440);
        assert_eq!(rendered[0].1.height, 1584);

        // The pose submitted is the pose rendered with
        let frame = &fixture.runtime.submitted_frames()[0];
        assert_eq!(frame.layer_count, 1);
        assert_eq!(frame.views.len(), 2);
        for (submitted, (_, target, view)) in frame.views.iter().zip(rendered.iter()) {
            assert_eq!(submitted.pose.position.x, view.pose.position.x);
            assert_eq!(submitted.fov.angle_left, view.fov.angle_left);
            assert_eq!(submitted.image_rect.extent.width, target.width as i32);
        }
        assert_eq!(frame.display_time, report.display_time.unwrap());
        assert_eq!(fixture.runtime.outstanding_images(), 0);
    }

    #[test]
    pub fn test_ring_survives_many_ticks() {
        let mut fixture = Fixture::new(SimulatorSettings {
            image_count: 2,
            ..Default::default()
        });
        fixture.runtime.push_session_state(SessionState::READY);
        fixture.runtime.set_views_valid();
        for _ in 0..7 {
            assert!(fixture.tick().unwrap().rendered());
        }
        assert_eq!(fixture.render_count(), 14);
        assert_eq!(fixture.runtime.index_collisions(), 0);
        assert_eq!(fixture.frame_loop.frames_rendered(), 7);
    }

    #[test]
    pub fn test_acquire_failure_skips_submission() {
        let mut fixture = Fixture::running();
        fixture.runtime.set_views_valid();
        fixture
            .runtime
            .fail_next(Call::AcquireImage, OpenXRResult::ERROR_RUNTIME_FAILURE);
        let report = fixture.tick().unwrap();

        assert_eq!(report.outcome, TickOutcome::Empty(EmptyReason::RenderFailed));
        assert!(matches!(report.error, Some(StereoXrError::AcquireError(_))));
        assert_eq!(fixture.runtime.submitted_frames()[0].layer_count, 0);

        // The next tick renders normally
        assert!(fixture.tick().unwrap().rendered());
    }

    #[test]
    pub fn test_bind_failure_releases_the_image() {
        let mut fixture = Fixture::running();
        fixture.runtime.set_views_valid();
        fixture.recorder.fail_bind = true;
        let report = fixture.tick().unwrap();

        assert_eq!(report.outcome, TickOutcome::Empty(EmptyReason::RenderFailed));
        assert!(matches!(report.error, Some(StereoXrError::Other(_))));
        assert_eq!(fixture.runtime.call_count(Call::AcquireImage), 1);
        assert_eq!(fixture.runtime.call_count(Call::ReleaseImage), 1);
        assert_eq!(fixture.runtime.outstanding_images(), 0);
        assert_eq!(fixture.render_count(), 0);
    }

    #[test]
    pub fn test_wait_failure_abandons_the_tick() {
        let mut fixture = Fixture::running();
        fixture.runtime.set_views_valid();
        fixture
            .runtime
            .fail_next(Call::WaitFrame, OpenXRResult::ERROR_RUNTIME_FAILURE);
        let report = fixture.tick().unwrap();
        assert_eq!(report.outcome, TickOutcome::Abandoned);
        assert_eq!(fixture.runtime.call_count(Call::BeginFrame), 0);
        assert_eq!(fixture.runtime.call_count(Call::EndFrame), 0);
        assert!(fixture.tick().unwrap().rendered());
    }

    #[test]
    pub fn test_submit_failure_is_recoverable() {
        let mut fixture = Fixture::running();
        fixture.runtime.set_views_valid();
        fixture
            .runtime
            .fail_next(Call::EndFrame, OpenXRResult::ERROR_LAYER_INVALID);
        let report = fixture.tick().unwrap();
        assert!(matches!(report.error, Some(StereoXrError::SubmitError(_))));
        assert!(!report.rendered());
        assert_eq!(fixture.runtime.outstanding_images(), 0);
        assert_eq!(fixture.frame_loop.frames_submitted(), 0);

        assert!(fixture.tick().unwrap().rendered());
        assert_eq!(fixture.frame_loop.frames_submitted(), 1);
        assert_eq!(fixture.frame_loop.frames_rendered(), 1);
    }

    #[test]
    pub fn test_loss_is_fatal() {
        let mut fixture = Fixture::running();
        fixture.runtime.set_views_valid();
        fixture
            .runtime
            .fail_next(Call::EndFrame, OpenXRResult::ERROR_SESSION_LOST);
        let error = fixture.tick().unwrap_err();
        assert!(matches!(error, StereoXrError::LossError(_)));
        assert!(error.is_fatal());

        let mut fixture = Fixture::running();
        fixture.runtime.set_views_valid();
        fixture
            .runtime
            .fail_next(Call::BeginFrame, OpenXRResult::ERROR_INSTANCE_LOST);
        assert!(fixture.tick().unwrap_err().is_fatal());
    }

    #[test]
    pub fn test_exit_requests_stop() {
        let mut fixture = Fixture::running();
        fixture.runtime.set_views_valid();
        assert!(!fixture.tick().unwrap().stop_requested);

        fixture.runtime.push_session_state(SessionState::STOPPING);
        let report = fixture.tick().unwrap();
        assert_eq!(report.outcome, TickOutcome::Idle);
        assert!(!report.stop_requested);
        assert_eq!(fixture.runtime.call_count(Call::EndSession), 1);

        fixture.runtime.push_session_state(SessionState::EXITING);
        assert!(fixture.tick().unwrap().stop_requested);
    }
}
