use anyhow::Context;
use log::{debug, info};
use openxr as xr;

use super::{
    ApplicationInfo, GraphicsRequirements, ProjectionLayer, RuntimeEvent, SwapchainDescriptor,
    SwapchainFormat, ViewConfiguration, ViewPose, XrRuntime,
};
use crate::{GraphicsContextBinding, KHR_ANDROID_CREATE_INSTANCE, KHR_OPENGL_ES_ENABLE};

/// A session together with its frame timing halves.
pub struct OpenXrSession {
    session: xr::Session<xr::OpenGlEs>,
    frame_waiter: xr::FrameWaiter,
    frame_stream: xr::FrameStream<xr::OpenGlEs>,
}

/// The device's OpenXR runtime, bound to OpenGL ES through EGL.
pub struct OpenXrRuntime {
    entry: xr::Entry,
    event_buffer: xr::EventDataBuffer,
}

impl OpenXrRuntime {
    /// Load the OpenXR loader and prepare it for use on Android.
    pub fn new() -> anyhow::Result<Self> {
        let entry = unsafe { xr::Entry::load() }.context("Unable to load the OpenXR loader")?;
        entry.initialize_android_loader()?;
        Ok(Self {
            entry,
            event_buffer: xr::EventDataBuffer::new(),
        })
    }
}

impl XrRuntime for OpenXrRuntime {
    type Instance = xr::Instance;
    type Session = OpenXrSession;
    type Space = xr::Space;
    type Swapchain = xr::Swapchain<xr::OpenGlEs>;

    fn available_extensions(&mut self) -> xr::Result<Vec<String>> {
        let available = self.entry.enumerate_extensions()?;
        let mut names = available.other.clone();
        if available.khr_android_create_instance {
            names.push(KHR_ANDROID_CREATE_INSTANCE.to_string());
        }
        if available.khr_opengl_es_enable {
            names.push(KHR_OPENGL_ES_ENABLE.to_string());
        }
        Ok(names)
    }

    fn create_instance(
        &mut self,
        application_info: &ApplicationInfo<'_>,
        extensions: &[String],
    ) -> xr::Result<xr::Instance> {
        let mut extension_set = xr::ExtensionSet::default();
        for extension in extensions {
            match extension.as_str() {
                KHR_ANDROID_CREATE_INSTANCE => extension_set.khr_android_create_instance = true,
                KHR_OPENGL_ES_ENABLE => extension_set.khr_opengl_es_enable = true,
                other => extension_set.other.push(other.to_string()),
            }
        }

        let app_info = xr::ApplicationInfo {
            application_name: application_info.application_name,
            application_version: application_info.application_version,
            engine_name: application_info.engine_name,
            engine_version: application_info.engine_version,
        };
        let instance = self.entry.create_instance(&app_info, &extension_set, &[])?;
        if let Ok(properties) = instance.properties() {
            info!(
                "[STEREO_XR_RUNTIME] Loaded OpenXR runtime: {} {}",
                properties.runtime_name, properties.runtime_version
            );
        }
        Ok(instance)
    }

    fn destroy_instance(&mut self, instance: xr::Instance) -> xr::Result<()> {
        drop(instance);
        Ok(())
    }

    fn system(
        &mut self,
        instance: &xr::Instance,
        form_factor: xr::FormFactor,
    ) -> xr::Result<xr::SystemId> {
        instance.system(form_factor)
    }

    fn view_configuration_views(
        &mut self,
        instance: &xr::Instance,
        system: xr::SystemId,
        view_type: xr::ViewConfigurationType,
    ) -> xr::Result<Vec<ViewConfiguration>> {
        Ok(instance
            .enumerate_view_configuration_views(system, view_type)?
            .into_iter()
            .map(|view| ViewConfiguration {
                recommended_width: view.recommended_image_rect_width,
                recommended_height: view.recommended_image_rect_height,
                recommended_sample_count: view.recommended_swapchain_sample_count,
                max_width: view.max_image_rect_width,
                max_height: view.max_image_rect_height,
                max_sample_count: view.max_swapchain_sample_count,
            })
            .collect())
    }

    fn graphics_requirements(
        &mut self,
        instance: &xr::Instance,
        system: xr::SystemId,
    ) -> xr::Result<GraphicsRequirements> {
        let requirements = instance.graphics_requirements::<xr::OpenGlEs>(system)?;
        Ok(GraphicsRequirements {
            min_api_version_supported: requirements.min_api_version_supported,
            max_api_version_supported: requirements.max_api_version_supported,
        })
    }

    fn create_session(
        &mut self,
        instance: &xr::Instance,
        system: xr::SystemId,
        binding: &GraphicsContextBinding,
    ) -> xr::Result<OpenXrSession> {
        let create_info = xr::opengles::SessionCreateInfo::Android {
            display: binding.display,
            config: binding.config,
            context: binding.context,
        };
        // The binding was validated by the caller, and the host keeps the context alive for
        // the lifetime of the session.
        let (session, frame_waiter, frame_stream) =
            unsafe { instance.create_session::<xr::OpenGlEs>(system, &create_info)? };
        Ok(OpenXrSession {
            session,
            frame_waiter,
            frame_stream,
        })
    }

    fn destroy_session(&mut self, session: OpenXrSession) -> xr::Result<()> {
        drop(session);
        Ok(())
    }

    fn poll_event(&mut self, instance: &xr::Instance) -> xr::Result<Option<RuntimeEvent>> {
        use xr::Event::*;
        let event = match instance.poll_event(&mut self.event_buffer)? {
            Some(SessionStateChanged(e)) => RuntimeEvent::SessionStateChanged {
                state: e.state(),
                time: e.time(),
            },
            Some(InstanceLossPending(_)) => RuntimeEvent::InstanceLossPending,
            Some(EventsLost(e)) => RuntimeEvent::EventsLost(e.lost_event_count()),
            Some(_) => RuntimeEvent::Other,
            None => return Ok(None),
        };
        Ok(Some(event))
    }

    fn begin_session(
        &mut self,
        session: &mut OpenXrSession,
        view_type: xr::ViewConfigurationType,
    ) -> xr::Result<()> {
        session.session.begin(view_type)?;
        Ok(())
    }

    fn end_session(&mut self, session: &mut OpenXrSession) -> xr::Result<()> {
        session.session.end()?;
        Ok(())
    }

    fn create_reference_space(
        &mut self,
        session: &OpenXrSession,
        reference_space_type: xr::ReferenceSpaceType,
        pose_in_reference_space: xr::Posef,
    ) -> xr::Result<xr::Space> {
        session
            .session
            .create_reference_space(reference_space_type, pose_in_reference_space)
    }

    fn destroy_space(&mut self, space: xr::Space) -> xr::Result<()> {
        drop(space);
        Ok(())
    }

    fn swapchain_formats(&mut self, session: &OpenXrSession) -> xr::Result<Vec<SwapchainFormat>> {
        Ok(session
            .session
            .enumerate_swapchain_formats()?
            .into_iter()
            .map(|format| SwapchainFormat(format as i64))
            .collect())
    }

    fn create_swapchain(
        &mut self,
        session: &OpenXrSession,
        descriptor: &SwapchainDescriptor,
    ) -> xr::Result<xr::Swapchain<xr::OpenGlEs>> {
        debug!("[STEREO_XR_RUNTIME] Creating swapchain: {descriptor:?}");
        session.session.create_swapchain(&xr::SwapchainCreateInfo {
            create_flags: xr::SwapchainCreateFlags::EMPTY,
            usage_flags: xr::SwapchainUsageFlags::COLOR_ATTACHMENT
                | xr::SwapchainUsageFlags::SAMPLED,
            format: descriptor.format.0 as _,
            sample_count: descriptor.sample_count,
            width: descriptor.width,
            height: descriptor.height,
            face_count: 1,
            array_size: 1,
            mip_count: 1,
        })
    }

    fn swapchain_images(&mut self, swapchain: &xr::Swapchain<xr::OpenGlEs>) -> xr::Result<Vec<u32>> {
        swapchain.enumerate_images()
    }

    fn acquire_image(&mut self, swapchain: &mut xr::Swapchain<xr::OpenGlEs>) -> xr::Result<u32> {
        swapchain.acquire_image()
    }

    fn wait_image(
        &mut self,
        swapchain: &mut xr::Swapchain<xr::OpenGlEs>,
        timeout: xr::Duration,
    ) -> xr::Result<()> {
        swapchain.wait_image(timeout)
    }

    fn release_image(&mut self, swapchain: &mut xr::Swapchain<xr::OpenGlEs>) -> xr::Result<()> {
        swapchain.release_image()
    }

    fn destroy_swapchain(&mut self, swapchain: xr::Swapchain<xr::OpenGlEs>) -> xr::Result<()> {
        drop(swapchain);
        Ok(())
    }

    fn wait_frame(&mut self, session: &mut OpenXrSession) -> xr::Result<xr::FrameState> {
        session.frame_waiter.wait()
    }

    fn begin_frame(&mut self, session: &mut OpenXrSession) -> xr::Result<()> {
        session.frame_stream.begin()?;
        Ok(())
    }

    fn locate_views(
        &mut self,
        session: &OpenXrSession,
        view_type: xr::ViewConfigurationType,
        display_time: xr::Time,
        space: &xr::Space,
    ) -> xr::Result<(xr::ViewStateFlags, Vec<ViewPose>)> {
        let (flags, views) = session
            .session
            .locate_views(view_type, display_time, space)?;
        let views = views
            .into_iter()
            .map(|view| ViewPose {
                pose: view.pose,
                fov: view.fov,
            })
            .collect();
        Ok((flags, views))
    }

    fn end_frame(
        &mut self,
        session: &mut OpenXrSession,
        display_time: xr::Time,
        environment_blend_mode: xr::EnvironmentBlendMode,
        layer: Option<&ProjectionLayer<'_, Self>>,
    ) -> xr::Result<()> {
        let Some(layer) = layer else {
            return session
                .frame_stream
                .end(display_time, environment_blend_mode, &[]);
        };

        let views = layer
            .views
            .iter()
            .map(|view| {
                xr::CompositionLayerProjectionView::new()
                    .pose(view.pose)
                    .fov(view.fov)
                    .sub_image(
                        xr::SwapchainSubImage::new()
                            .swapchain(view.swapchain)
                            .image_array_index(0)
                            .image_rect(view.image_rect),
                    )
            })
            .collect::<Vec<_>>();

        let projection = xr::CompositionLayerProjection::new()
            .space(layer.space)
            .views(&views);
        session
            .frame_stream
            .end(display_time, environment_blend_mode, &[&*projection])
    }
}
