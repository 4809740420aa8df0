use std::{fs, thread::sleep, time::Duration};

use anyhow::{bail, Context, Result};
use log::{info, trace};
use stereo_xr::{
    runtime::SimulatedRuntime, xr::SessionState, Eye, GraphicsContextBinding, RenderTarget,
    StereoXrBuilder, StereoXrConfig, ViewPose,
};

/// How long the host waits between ticks, about 90Hz
const TICK_INTERVAL: Duration = Duration::from_millis(11);
/// Tick at which head tracking becomes valid
const TRACKING_TICK: u64 = 30;
/// Tick at which the simulated user takes the headset off
const STOPPING_TICK: u64 = 600;
/// Tick at which the simulated runtime asks the application to exit
const EXITING_TICK: u64 = 620;
const NEAR_PLANE: f32 = 0.05;

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => load_config(&path)?,
        None => StereoXrConfig::default(),
    };
    info!("[STEREO_XR_DEMO] Starting {}", config.application_name);

    let mut xr = StereoXrBuilder::new()
        .config(config)
        .render_callback(|target: &RenderTarget, view: &ViewPose, eye: Eye| {
            let view_projection = view.projection(NEAR_PLANE) * view.view_matrix();
            trace!(
                "[STEREO_XR_DEMO] Drawing {eye:?} into image {} ({}x{}): {view_projection:?}",
                target.image,
                target.width,
                target.height
            );
        })
        .build(SimulatedRuntime::default());

    // On desktop, Ctrl-C stops the loop after the current tick.
    let shutdown_handle = xr.shutdown_handle();
    ctrlc::set_handler(move || shutdown_handle.request_shutdown_and_wait())
        .context("Unable to install the Ctrl-C handler")?;

    if !xr.initialize(&stereo_xr::REQUIRED_EXTENSIONS) {
        bail!("Unable to initialize");
    }
    // The simulated runtime has no real graphics context; any non-null handles will do.
    if !xr.setup_graphics_binding(GraphicsContextBinding::from_raw(1, 1, 1)) {
        bail!("Unable to set up the graphics binding");
    }
    if !xr.create_session() {
        xr.shutdown();
        bail!("Unable to create a session");
    }

    xr.runtime_mut().push_session_state(SessionState::READY);

    let mut tick = 0;
    while xr.run_frame() {
        tick += 1;
        match tick {
            TRACKING_TICK => xr.runtime_mut().set_views_valid(),
            STOPPING_TICK => xr.runtime_mut().push_session_state(SessionState::STOPPING),
            EXITING_TICK => xr.runtime_mut().push_session_state(SessionState::EXITING),
            _ => {}
        }
        sleep(TICK_INTERVAL);
    }

    info!(
        "[STEREO_XR_DEMO] Stopped after {tick} ticks: {} frames submitted, {} with a layer",
        xr.frame_loop().frames_submitted(),
        xr.frame_loop().frames_rendered()
    );
    xr.shutdown();
    Ok(())
}

fn load_config(path: &str) -> Result<StereoXrConfig> {
    let json = fs::read_to_string(path).with_context(|| format!("Unable to read {path}"))?;
    serde_json::from_str(&json).with_context(|| format!("Invalid config in {path}"))
}
