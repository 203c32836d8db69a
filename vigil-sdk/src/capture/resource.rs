//! Static app, device and user resources.

use super::CaptureSource;
use vigil_core::prelude::*;
use vigil_core::resource::keys;

/// Writes a fixed set of resources into storage when started.
///
/// Keys added through [`with_app`](Self::with_app),
/// [`with_device`](Self::with_device) and [`with_user`](Self::with_user) are
/// prefixed so the payload builder can sort them into their sections.
pub struct ResourceCaptureService {
    storage: Storage,
    scope: ResourceScope,
    resources: Vec<(String, AttributeValue)>,
}

impl ResourceCaptureService {
    /// Service writing process-scoped resources.
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            scope: ResourceScope::Process(ProcessId::current()),
            resources: Vec::new(),
        }
    }

    /// Write resources with `scope` instead.
    pub fn with_scope(mut self, scope: ResourceScope) -> Self {
        self.scope = scope;
        self
    }

    /// Add a resource under its literal key.
    pub fn with_resource(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.resources.push((key.into(), value.into()));
        self
    }

    /// Add an app resource.
    pub fn with_app(self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.with_resource(format!("{}{}", keys::APP_PREFIX, key), value)
    }

    /// Add a device resource.
    pub fn with_device(self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.with_resource(format!("{}{}", keys::DEVICE_PREFIX, key), value)
    }

    /// Add a user resource.
    pub fn with_user(self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.with_resource(format!("{}{}", keys::USER_PREFIX, key), value)
    }
}

impl CaptureSource for ResourceCaptureService {
    fn name(&self) -> &str {
        "resources"
    }

    fn start(&self) {
        for (key, value) in &self.resources {
            if let Err(e) = self.storage.add_resource(key.clone(), value.clone(), self.scope) {
                tracing::warn!(key = %key, error = %e, "Failed to store resource");
            }
        }
    }

    fn stop(&self) {}
}
