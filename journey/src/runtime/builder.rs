use std::any::type_name;
use std::fmt;
use std::sync::Arc;

use crate::config::HarnessConfig;
use crate::platform::Platform;

use super::shutdown::ShutdownToken;
use super::supervisor::Harness;

/// Builder for constructing a [`Harness`] with explicit dependencies.
///
/// The configuration is validated and the platform must be provided before
/// the harness is built.
///
/// # Example
///
/// ```ignore
/// use journey::*;
///
/// let harness = HarnessBuilder::new(HarnessConfig::from_env()?)
///     .with_platform(Arc::new(NomadClient::new("http://127.0.0.1:4646")?))
///     .build()?;
/// ```
pub struct HarnessBuilder<P: ?Sized> {
    config: HarnessConfig,
    platform: Option<Arc<P>>,
    shutdown: Option<ShutdownToken>,
}

impl<P: ?Sized> fmt::Debug for HarnessBuilder<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("HarnessBuilder");
        debug.field("config", &self.config);
        debug.field("platform_set", &self.platform.is_some());
        debug.field("shutdown_set", &self.shutdown.is_some());
        if self.platform.is_some() {
            debug.field("platform_type", &type_name::<P>());
        }
        debug.finish()
    }
}

impl<P> HarnessBuilder<P>
where
    P: Platform + ?Sized + 'static,
{
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            platform: None,
            shutdown: None,
        }
    }

    pub fn with_platform(mut self, platform: Arc<P>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Use an existing token instead of a fresh one, e.g. one wired to a
    /// signal handler.
    pub fn with_shutdown(mut self, shutdown: ShutdownToken) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn build(self) -> anyhow::Result<Harness<P>> {
        self.config.validate()?;
        let platform = self
            .platform
            .ok_or_else(|| anyhow::anyhow!("platform dependency missing"))?;
        Ok(Harness::new(
            self.config,
            platform,
            self.shutdown.unwrap_or_default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobInstance;
    use crate::platform::{Allocation, JobSummary};
    use async_trait::async_trait;

    struct NullPlatform;

    #[async_trait]
    impl Platform for NullPlatform {
        async fn submit_job(&self, _instance: &JobInstance) -> anyhow::Result<()> {
            Ok(())
        }

        async fn deregister_job(&self, _job_id: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn list_jobs(&self, _prefix: &str) -> anyhow::Result<Vec<JobSummary>> {
            Ok(Vec::new())
        }

        async fn allocations(&self, _job_id: &str) -> anyhow::Result<Vec<Allocation>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_missing_platform() {
        let err = HarnessBuilder::<NullPlatform>::new(HarnessConfig::default())
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "platform dependency missing");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = HarnessBuilder::new(HarnessConfig::default().with_workers(0))
            .with_platform(Arc::new(NullPlatform))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("worker counts"));
    }

    #[test]
    fn test_shared_shutdown_token() {
        let token = ShutdownToken::new();
        let harness = HarnessBuilder::new(HarnessConfig::default())
            .with_platform(Arc::new(NullPlatform))
            .with_shutdown(token.clone())
            .build()
            .unwrap();
        token.cancel();
        assert!(harness.shutdown_token().is_cancelled());
    }

    #[test]
    fn test_builder_accepts_trait_objects() {
        let platform: Arc<dyn Platform> = Arc::new(NullPlatform);
        let harness = HarnessBuilder::new(HarnessConfig::default())
            .with_platform(platform)
            .build()
            .unwrap();
        assert!(format!("{harness:?}").contains("Harness"));
    }

    #[tokio::test]
    async fn test_stop_with_no_jobs() {
        let harness = HarnessBuilder::new(HarnessConfig::default())
            .with_platform(Arc::new(NullPlatform))
            .build()
            .unwrap();
        let summary = harness.stop().await.unwrap();
        assert_eq!(summary.listed, 0);
        assert_eq!(summary.deregistered, 0);
    }
}
