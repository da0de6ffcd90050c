//! Per-request engine wiring.
//!
//! An [`Engine`] holds the remote source, resolved settings, progress sink
//! and extractor chain, and builds every component from them. Components
//! borrow from the engine, so one engine serves any number of requests;
//! each request brings its own cancellation token.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bundle::ManagedBundle;
use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::download::{ChunkedDownloader, WholeFileDownloader};
use crate::error::ProvisionResult;
use crate::extract::ExtractorChain;
use crate::items::ItemSynchronizer;
use crate::progress::{NoopSink, ProgressSink};
use crate::provision::{ProvisionReport, Provisioner};
use crate::reconcile::ArchiveReconciler;
use crate::runtime::RuntimeInstaller;
use crate::transfer::{RemoteSource, ReqwestSource};

/// Shared state for provisioning requests.
pub struct Engine {
    source: Arc<dyn RemoteSource>,
    config: EngineConfig,
    sink: Arc<dyn ProgressSink>,
    extractor: ExtractorChain,
}

impl Engine {
    /// Create an engine over `source` with the given settings.
    pub fn new(source: Arc<dyn RemoteSource>, config: EngineConfig) -> Self {
        Self {
            source,
            config,
            sink: Arc::new(NoopSink),
            extractor: ExtractorChain::default(),
        }
    }

    /// Create an engine with an HTTP source configured from `config`.
    pub fn from_config(config: EngineConfig) -> ProvisionResult<Self> {
        let source = ReqwestSource::with_timeouts(config.request_timeout, config.connect_timeout)?;
        Ok(Self::new(Arc::new(source), config))
    }

    /// Report progress to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Replace the extractor chain.
    pub fn with_extractor(mut self, extractor: ExtractorChain) -> Self {
        self.extractor = extractor;
        self
    }

    /// Resolved settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whole-file downloader with the configured back-off.
    pub fn whole_file(&self) -> WholeFileDownloader<'_> {
        WholeFileDownloader::new(self.source.as_ref())
            .with_retry_delay(self.config.retry_delay)
            .with_progress_interval(self.config.progress_interval)
    }

    /// Chunked downloader with the configured range settings.
    pub fn chunked(&self) -> ChunkedDownloader<'_> {
        ChunkedDownloader::new(self.source.as_ref())
            .with_chunk_size(self.config.chunk_size)
            .with_concurrency(self.config.chunk_concurrency)
            .with_chunk_retries(self.config.chunk_retries)
            .with_retry_delay(self.config.retry_delay)
            .with_progress_interval(self.config.progress_interval)
    }

    /// Archive reconciler over the engine's extractor chain.
    pub fn reconciler(&self) -> ArchiveReconciler<'_> {
        ArchiveReconciler::new(&self.extractor).with_sink(self.sink.as_ref())
    }

    /// Item synchronizer with the configured pool size.
    pub fn item_synchronizer(&self) -> ItemSynchronizer<'_> {
        ItemSynchronizer::new(self.whole_file())
            .with_pool_size(self.config.item_pool)
            .with_retries(self.config.retries)
            .with_sink(self.sink.as_ref())
    }

    /// Runtime installer rooted at the configured runtime directory.
    pub fn runtime_installer(&self) -> RuntimeInstaller<'_> {
        RuntimeInstaller::new(
            self.chunked(),
            self.reconciler(),
            self.config.runtime_dir.clone(),
        )
        .with_url_template(self.config.runtime_url_template.clone())
        .with_sink(self.sink.as_ref())
    }

    /// Provisioner wired from every component above.
    pub fn provisioner(&self) -> Provisioner<'_> {
        Provisioner::new(
            self.chunked(),
            self.whole_file(),
            self.reconciler(),
            self.item_synchronizer(),
        )
        .with_content_folder(self.config.content_folder.clone())
        .with_retries(self.config.retries)
        .with_sink(self.sink.as_ref())
    }

    /// Provision `bundle` into `target_dir`.
    pub fn provision(
        &self,
        bundle: &ManagedBundle,
        target_dir: &Path,
        cancel: &CancellationToken,
    ) -> ProvisionResult<ProvisionReport> {
        self.provisioner().provision(bundle, target_dir, cancel)
    }

    /// Return the runtime executable for `selector`, installing it if needed.
    pub fn ensure_runtime(
        &self,
        selector: &str,
        cancel: &CancellationToken,
    ) -> ProvisionResult<PathBuf> {
        self.runtime_installer().ensure_runtime(selector, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::MemorySource;
    use std::time::Duration;

    #[test]
    fn test_components_use_config() {
        let config = EngineConfig::default()
            .with_chunk_size(1024)
            .with_chunk_concurrency(2)
            .with_retry_delay(Duration::from_millis(5));
        let engine = Engine::new(Arc::new(MemorySource::new()), config);

        let chunked = engine.chunked();
        assert_eq!(chunked.chunk_size(), 1024);
        assert_eq!(chunked.concurrency(), 2);
        assert_eq!(engine.config().retry_delay, Duration::from_millis(5));
    }

    #[test]
    fn test_runtime_install_dir_from_config() {
        let config = EngineConfig::default().with_runtime_dir("/opt/runtimes");
        let engine = Engine::new(Arc::new(MemorySource::new()), config);
        assert_eq!(
            engine.runtime_installer().install_dir(17),
            PathBuf::from("/opt/runtimes/java-17")
        );
    }

    #[test]
    fn test_from_config_builds_http_source() {
        assert!(Engine::from_config(EngineConfig::default()).is_ok());
    }
}
