//! Mock image, network and agent providers
//!
//! One shared object implements all three capabilities so tests can assert
//! on the full call sequence a job made.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use overlord_models::{Chassis, Instance};

use super::failure::{FailureConfig, FailureInjector, ProviderOp};
use crate::providers::{
    AgentClient, ImageInfo, ImageProvider, NetworkProvider, ProviderError, ProviderResult,
};

/// One recorded provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    pub op: ProviderOp,
    /// Image id, or chassis id for chassis-scoped calls
    pub target: String,
}

#[derive(Debug, Default)]
struct MockProvidersInner {
    images: HashMap<String, ImageInfo>,
    /// Unknown images resolve to a generated entry unless strict
    strict_images: bool,
    failures: FailureInjector,
    calls: Vec<ProviderCall>,
}

#[derive(Debug, Clone, Default)]
pub struct MockProviders {
    inner: Arc<Mutex<MockProvidersInner>>,
}

impl MockProviders {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockProvidersInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an image; enables strict lookups.
    pub fn add_image(&self, image: ImageInfo) {
        let mut inner = self.lock();
        inner.strict_images = true;
        inner.images.insert(image.id.clone(), image);
    }

    pub fn inject(&self, op: ProviderOp, config: FailureConfig) {
        self.lock().failures.inject(op, config);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    /// Operations called so far, in order
    pub fn ops(&self) -> Vec<ProviderOp> {
        self.lock().calls.iter().map(|c| c.op).collect()
    }

    pub fn call_count(&self, op: ProviderOp) -> usize {
        self.lock().calls.iter().filter(|c| c.op == op).count()
    }

    fn record(&self, op: ProviderOp, target: &str) -> ProviderResult<()> {
        let delay = {
            let mut inner = self.lock();
            inner.calls.push(ProviderCall {
                op,
                target: target.to_string(),
            });
            if let Some(config) = inner.failures.check(op) {
                let message = config.message.clone().unwrap_or_default();
                let provider = provider_name(op);
                return Err(if config.unreachable {
                    ProviderError::Unreachable { provider, message }
                } else {
                    ProviderError::RequestFailed { provider, message }
                });
            }
            inner.failures.get_delay(op)
        };
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        Ok(())
    }
}

fn provider_name(op: ProviderOp) -> &'static str {
    match op {
        ProviderOp::GetImageInfo => "image",
        ProviderOp::Attach | ProviderOp::Detach => "network",
        ProviderOp::PrepareImage | ProviderOp::RunImage | ProviderOp::Decommission => "agent",
    }
}

impl ImageProvider for MockProviders {
    fn get_image_info(&self, image_id: &str) -> ProviderResult<ImageInfo> {
        self.record(ProviderOp::GetImageInfo, image_id)?;
        let inner = self.lock();
        match inner.images.get(image_id) {
            Some(image) => Ok(image.clone()),
            None if inner.strict_images => Err(ProviderError::ImageNotFound(image_id.to_string())),
            None => Ok(ImageInfo::new(image_id, format!("http://images.test/{image_id}"))),
        }
    }
}

impl NetworkProvider for MockProviders {
    fn attach(&self, chassis: &Chassis, _instance: &Instance) -> ProviderResult<()> {
        self.record(ProviderOp::Attach, &chassis.id)
    }

    fn detach(&self, chassis: &Chassis, _instance: &Instance) -> ProviderResult<()> {
        self.record(ProviderOp::Detach, &chassis.id)
    }
}

impl AgentClient for MockProviders {
    fn prepare_image(&self, chassis: &Chassis, _image: &ImageInfo) -> ProviderResult<()> {
        self.record(ProviderOp::PrepareImage, &chassis.id)
    }

    fn run_image(&self, chassis: &Chassis, _image: &ImageInfo) -> ProviderResult<()> {
        self.record(ProviderOp::RunImage, &chassis.id)
    }

    fn decommission(&self, chassis: &Chassis) -> ProviderResult<()> {
        self.record(ProviderOp::Decommission, &chassis.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_calls_in_order() {
        let mock = MockProviders::new();
        let image = mock.get_image_info("img").unwrap();
        assert_eq!(image.id, "img");

        assert_eq!(mock.ops(), vec![ProviderOp::GetImageInfo]);
        assert_eq!(mock.calls()[0].target, "img");
    }

    #[test]
    fn test_strict_images() {
        let mock = MockProviders::new();
        mock.add_image(ImageInfo::new("known", "http://x"));
        assert!(mock.get_image_info("known").is_ok());
        assert!(matches!(
            mock.get_image_info("unknown"),
            Err(ProviderError::ImageNotFound(id)) if id == "unknown"
        ));
    }

    #[test]
    fn test_injected_failure_is_recorded() {
        let mock = MockProviders::new();
        mock.inject(
            ProviderOp::GetImageInfo,
            FailureConfig::unreachable("glance down").with_fail_count(1),
        );
        assert!(matches!(
            mock.get_image_info("img"),
            Err(ProviderError::Unreachable { provider: "image", .. })
        ));
        assert!(mock.get_image_info("img").is_ok());
        assert_eq!(mock.call_count(ProviderOp::GetImageInfo), 2);
    }
}
