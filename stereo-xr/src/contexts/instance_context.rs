use log::{debug, info, warn};
use openxr as xr;

use crate::{
    runtime::{ApplicationInfo, ViewConfiguration, XrRuntime},
    StereoXrError, StereoXrResult, VIEW_COUNT,
};

/// Owns the runtime instance and the head mounted display it selected.
pub struct InstanceContext<R: XrRuntime> {
    instance: Option<R::Instance>,
    system: Option<xr::SystemId>,
    views: Vec<ViewConfiguration>,
    enabled_extensions: Vec<String>,
}

impl<R: XrRuntime> Default for InstanceContext<R> {
    fn default() -> Self {
        Self {
            instance: None,
            system: None,
            views: Vec::new(),
            enabled_extensions: Vec::new(),
        }
    }
}

impl<R: XrRuntime> InstanceContext<R> {
    /// An empty context, with no instance.
    pub fn new() -> Self {
        Default::default()
    }

    /// Create the instance with every extension in `required_extensions` enabled.
    ///
    /// Fails with [`StereoXrError::InitError`] before touching the runtime's instance if any
    /// of them isn't advertised.
    pub fn create_instance(
        &mut self,
        runtime: &mut R,
        application_info: &ApplicationInfo<'_>,
        required_extensions: &[String],
    ) -> StereoXrResult<()> {
        if self.instance.is_some() {
            debug!("[STEREO_XR_INSTANCE] Instance already exists");
            return Ok(());
        }

        let available = runtime
            .available_extensions()
            .map_err(StereoXrError::InstanceCreateError)?;
        let missing: Vec<String> = required_extensions
            .iter()
            .filter(|e| !available.contains(*e))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(StereoXrError::InitError { missing });
        }

        let instance = runtime
            .create_instance(application_info, required_extensions)
            .map_err(StereoXrError::InstanceCreateError)?;
        info!(
            "[STEREO_XR_INSTANCE] Created instance for {} with extensions {:?}",
            application_info.application_name, required_extensions
        );

        self.instance = Some(instance);
        self.enabled_extensions = required_extensions.to_vec();
        Ok(())
    }

    /// Select the system for `form_factor`.
    pub fn get_system(
        &mut self,
        runtime: &mut R,
        form_factor: xr::FormFactor,
    ) -> StereoXrResult<xr::SystemId> {
        let instance = self
            .instance
            .as_ref()
            .ok_or(StereoXrError::NotInitialized)?;
        let system = runtime
            .system(instance, form_factor)
            .map_err(StereoXrError::NoDeviceError)?;
        debug!("[STEREO_XR_INSTANCE] Using system {system:?}");
        self.system = Some(system);
        Ok(system)
    }

    /// Read the per eye view configuration. Anything but exactly two views is rejected.
    pub fn enumerate_views(
        &mut self,
        runtime: &mut R,
        view_type: xr::ViewConfigurationType,
    ) -> StereoXrResult<&[ViewConfiguration]> {
        let instance = self
            .instance
            .as_ref()
            .ok_or(StereoXrError::NotInitialized)?;
        let system = self.system.ok_or(StereoXrError::NotInitialized)?;

        let views = runtime.view_configuration_views(instance, system, view_type)?;
        if views.len() != VIEW_COUNT {
            return Err(StereoXrError::ConfigMismatchError {
                expected: VIEW_COUNT,
                found: views.len(),
            });
        }

        for (i, view) in views.iter().enumerate() {
            debug!("[STEREO_XR_INSTANCE] View {i}: {view:?}");
        }
        self.views = views;
        Ok(&self.views)
    }

    /// Destroy the instance. Does nothing if there isn't one.
    pub fn destroy_instance(&mut self, runtime: &mut R) {
        self.system = None;
        self.views.clear();
        self.enabled_extensions.clear();

        let Some(instance) = self.instance.take() else {
            return;
        };
        match runtime.destroy_instance(instance) {
            Ok(()) => info!("[STEREO_XR_INSTANCE] Destroyed instance"),
            Err(e) => warn!("[STEREO_XR_INSTANCE] Unable to destroy instance: {e}"),
        }
    }

    /// The instance, once created
    pub fn instance(&self) -> Option<&R::Instance> {
        self.instance.as_ref()
    }

    /// The selected system, once found
    pub fn system(&self) -> Option<xr::SystemId> {
        self.system
    }

    /// The stereo view configuration, once enumerated
    pub fn views(&self) -> &[ViewConfiguration] {
        &self.views
    }

    /// The extensions the instance was created with
    pub fn enabled_extensions(&self) -> &[String] {
        &self.enabled_extensions
    }

    /// The instance exists, a system was found and both views were enumerated.
    pub fn is_initialized(&self) -> bool {
        self.instance.is_some() && self.system.is_some() && self.views.len() == VIEW_COUNT
    }
}
