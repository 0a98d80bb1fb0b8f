use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower::Service;
use tracing::info;

use crate::browser::ChromiumAdapter;
use crate::catalog::CatalogSource;
use crate::config::SyncConfig;
use crate::error::ScraperError;
use crate::feed::FeedSource;
use crate::pipeline::{RunReport, SyncPipeline};
use crate::progress::{ProgressSink, RunState};
use crate::registry::{JobId, SessionRegistry};
use crate::traits::{DomAdapter, SetupSource};

/// 取得元のマーケットプレイス
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Catalog,
    Feed,
}

impl SourceKind {
    pub fn build(self) -> Arc<dyn SetupSource> {
        match self {
            Self::Catalog => Arc::new(CatalogSource::new()),
            Self::Feed => Arc::new(FeedSource::new()),
        }
    }
}

/// 同期リクエスト
///
/// `job_id` は呼び出し前に決まるので、実行中でも `SessionRegistry::cancel` できる。
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub job_id: JobId,
    pub source: SourceKind,
    pub config: SyncConfig,
    pub sink: ProgressSink,
}

impl SyncRequest {
    pub fn new(source: SourceKind, config: SyncConfig, sink: ProgressSink) -> Self {
        Self {
            job_id: JobId::next(),
            source,
            config,
            sink,
        }
    }

    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = job_id;
        self
    }
}

#[derive(Debug)]
pub struct SyncResponse {
    pub job_id: JobId,
    pub report: RunReport,
}

/// tower::Serviceを実装した同期サービス
#[derive(Debug, Clone, Default)]
pub struct SyncService {
    registry: SessionRegistry,
}

impl SyncService {
    pub fn new() -> Self {
        Self::default()
    }

    /// 複数のサービスで同じレジストリを共有する場合
    pub fn with_registry(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }
}

impl Service<SyncRequest> for SyncService {
    type Response = SyncResponse;
    type Error = ScraperError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: SyncRequest) -> Self::Future {
        info!("Sync request received: {} source={:?}", req.job_id, req.source);
        let registry = self.registry.clone();

        Box::pin(async move {
            let SyncRequest {
                job_id,
                source,
                config,
                sink,
            } = req;

            if !registry.register(job_id, config.cancel.clone()) {
                return Err(ScraperError::InvalidConfig(format!(
                    "{} is already running",
                    job_id
                )));
            }

            let result = run_job(source, config, sink).await;
            let state = match &result {
                Ok(report) => report.state,
                Err(_) => RunState::Failed,
            };
            registry.finish(job_id, state);
            info!("{} finished: {:?}", job_id, state);

            result.map(|report| SyncResponse { job_id, report })
        })
    }
}

/// 設定の検証とキャンセル確認を済ませてからブラウザを起動する
async fn run_job(
    source: SourceKind,
    config: SyncConfig,
    sink: ProgressSink,
) -> Result<RunReport, ScraperError> {
    if let Err(e) = config.validate() {
        sink.error(format!("Sync failed: {}", e));
        return Err(e);
    }
    if config.cancel.is_cancelled() {
        sink.info("Sync cancelled");
        return Ok(RunReport::empty(RunState::Cancelled));
    }

    let dom: Arc<dyn DomAdapter> = match ChromiumAdapter::launch(&config).await {
        Ok(adapter) => Arc::new(adapter),
        Err(e) => {
            sink.error(format!("Sync failed: {}", e));
            return Err(e);
        }
    };

    SyncPipeline::new(dom, source.build(), config, sink)
        .run()
        .await
}
