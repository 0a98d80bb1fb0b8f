//! 同期パイプライン
//!
//! `ログイン → フィルター → 一覧 → { 各アイテム: ダウンロード → 整理 } → 完了サマリ`
//!
//! アイテムは1件ずつ順番に処理する。1件の失敗は `error` イベントにして次へ進む。

pub mod cancel;
pub mod downloader;
pub mod enumerator;
pub mod filter;
pub mod organizer;
pub mod session;

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::SyncConfig;
use crate::error::ScraperError;
use crate::progress::{CompletionInfo, ProgressSink, RunState, UnmappedNames};
use crate::traits::{DomAdapter, SetupSource};
use crate::types::ResultDescriptor;

use cancel::{ensure_active, pace};
use downloader::{discard, ItemDownloader};
use enumerator::ResultEnumerator;
use organizer::{OrganizedPath, Organizer};

/// 実行結果
#[derive(Debug, Clone)]
pub struct RunReport {
    pub state: RunState,
    pub completion: CompletionInfo,
    pub organized: Vec<OrganizedPath>,
    /// 失敗したアイテムの表示名
    pub failed_items: Vec<String>,
    pub total_items: usize,
}

impl RunReport {
    /// 何も処理しなかった実行の結果
    pub fn empty(state: RunState) -> Self {
        RunTally::default().into_report(state)
    }
}

/// 実行中の集計
#[derive(Debug, Default)]
struct RunTally {
    organized: Vec<OrganizedPath>,
    failed_items: Vec<String>,
    unmapped: UnmappedNames,
    total_items: usize,
}

impl RunTally {
    fn into_report(self, state: RunState) -> RunReport {
        RunReport {
            state,
            completion: self.unmapped.to_completion(),
            organized: self.organized,
            failed_items: self.failed_items,
            total_items: self.total_items,
        }
    }
}

pub struct SyncPipeline {
    dom: Arc<dyn DomAdapter>,
    source: Arc<dyn SetupSource>,
    config: SyncConfig,
    sink: ProgressSink,
}

impl SyncPipeline {
    pub fn new(
        dom: Arc<dyn DomAdapter>,
        source: Arc<dyn SetupSource>,
        config: SyncConfig,
        sink: ProgressSink,
    ) -> Self {
        let sink = sink.bind(config.cancel.clone());
        Self {
            dom,
            source,
            config,
            sink,
        }
    }

    /// 実行する
    ///
    /// キャンセル時は `Ok(state = Cancelled)`、認証失敗など致命的なエラーは `Err`。
    /// どの場合もブラウザは閉じてから戻る。
    pub async fn run(self) -> Result<RunReport, ScraperError> {
        let mut tally = RunTally::default();
        let result = self.run_inner(&mut tally).await;

        if let Err(e) = self.dom.shutdown().await {
            warn!("Failed to shut down browser: {}", e);
        }

        match result {
            Ok(()) if !self.config.cancel.is_cancelled() => {
                let report = tally.into_report(RunState::Completed);
                self.sink.success(format!(
                    "Sync complete: {} folder(s) organized, {} item(s) failed",
                    report.organized.len(),
                    report.failed_items.len()
                ));
                info!(
                    "Run completed: organized={}, failed={}, unmapped cars={}, unmapped tracks={}",
                    report.organized.len(),
                    report.failed_items.len(),
                    report.completion.unmapped_cars.len(),
                    report.completion.unmapped_tracks.len()
                );
                Ok(report)
            }
            Ok(()) | Err(ScraperError::Cancelled) => {
                info!("Run cancelled");
                self.sink.info("Sync cancelled");
                Ok(tally.into_report(RunState::Cancelled))
            }
            Err(e) => {
                error!("Run failed: {}", e);
                self.sink.error(format!("Sync failed: {}", e));
                Err(e)
            }
        }
    }

    async fn run_inner(&self, tally: &mut RunTally) -> Result<(), ScraperError> {
        let dom = self.dom.as_ref();
        let source = self.source.as_ref();
        let config = &self.config;
        let cancel = &config.cancel;

        config.validate()?;
        ensure_active(cancel)?;
        std::fs::create_dir_all(&config.download_path)?;

        self.sink.info(format!("Logging in to {}", source.name()));
        let view = session::login(dom, source, config).await?;

        self.sink.info("Applying filters");
        filter::apply_filter(dom, view.tab, &source.filter_plan(), config).await?;

        let mut enumerator =
            ResultEnumerator::new(dom, source, view.tab, cancel.clone(), config.step_delay);
        let total = enumerator.count().await?;
        tally.total_items = total;
        if total == 0 {
            self.sink.warning("No setups match the selected filters");
            return Ok(());
        }
        self.sink.info(format!("Found {} setup(s)", total));

        let organizer = Arc::new(Organizer::new(config, source));
        let mut index = 0;
        while let Some(batch) = enumerator.next_batch().await? {
            for item in batch {
                index += 1;
                ensure_active(cancel)?;
                self.sink.info(format!(
                    "[{}/{}] Downloading {}",
                    index,
                    total,
                    item.label()
                ));

                match self.process_item(&item, &organizer, tally).await {
                    Ok(folders) => {
                        self.sink.success(format!(
                            "Organized {} into {} folder(s)",
                            item.label(),
                            folders
                        ));
                    }
                    Err(ScraperError::Cancelled) => return Err(ScraperError::Cancelled),
                    Err(e) => {
                        error!("Item failed: {}: {}", item.label(), e);
                        self.sink
                            .error(format!("Failed to process {}: {}", item.label(), e));
                        tally.failed_items.push(item.label());
                    }
                }

                pace(cancel, config.item_delay).await?;
            }
        }
        Ok(())
    }

    /// 1アイテム分: ダウンロード → 整理
    ///
    /// 整理できたファイルはその都度集計に入れ、失敗したファイルがあっても残りを続ける。
    /// 戻り値は作成したフォルダ数。失敗があれば最初のエラー。
    async fn process_item(
        &self,
        item: &ResultDescriptor,
        organizer: &Arc<Organizer>,
        tally: &mut RunTally,
    ) -> Result<usize, ScraperError> {
        let artifacts = ItemDownloader::new(self.dom.as_ref(), self.source.as_ref(), &self.config)
            .download(item)
            .await?;

        let mut folders = 0;
        let mut failure = None;
        let mut pending = artifacts.into_iter();
        while let Some(artifact) = pending.next() {
            let current = artifact.clone();
            let organizer = Arc::clone(organizer);
            let item = item.clone();
            // キャンセル時も完了を待つ（一時ディレクトリが消えてから戻る）
            let outcome = tokio::task::spawn_blocking(move || organizer.organize(&artifact, &item))
                .await
                .map_err(|e| ScraperError::Extraction(format!("organizer task failed: {}", e)))
                .and_then(|result| result);

            match outcome {
                Ok(outcome) => {
                    folders += outcome.paths.len();
                    tally.organized.extend(outcome.paths);
                    tally.unmapped.merge(outcome.unmapped);
                }
                Err(e) if e.is_cancelled() => {
                    discard(std::slice::from_ref(&current));
                    discard(pending.as_slice());
                    return Err(e);
                }
                Err(e) => {
                    warn!("Leaving {:?} in the staging directory: {}", current.path, e);
                    failure.get_or_insert(e);
                }
            }
        }
        failure.map_or(Ok(folders), Err)
    }
}
