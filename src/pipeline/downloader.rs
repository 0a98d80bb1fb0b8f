//! 詳細ページからのダウンロード

use std::path::Path;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::ScraperError;
use crate::traits::{DomAdapter, SetupSource};
use crate::types::{ArtifactKind, DownloadedFile, RawArtifact, ResultDescriptor, TabId};

use super::cancel::{ensure_active, guarded};
use super::organizer::detect_kind;

pub struct ItemDownloader<'a> {
    dom: &'a dyn DomAdapter,
    source: &'a dyn SetupSource,
    config: &'a SyncConfig,
}

impl<'a> ItemDownloader<'a> {
    pub fn new(dom: &'a dyn DomAdapter, source: &'a dyn SetupSource, config: &'a SyncConfig) -> Self {
        Self {
            dom,
            source,
            config,
        }
    }

    /// 詳細ページを別タブで開き、全てのダウンロードボタンのファイルを取得する
    ///
    /// タブはエラー時も必ず閉じる。
    pub async fn download(&self, item: &ResultDescriptor) -> Result<Vec<RawArtifact>, ScraperError> {
        let cancel = &self.config.cancel;
        ensure_active(cancel)?;
        debug!("Opening detail page: {}", item.detail_url);
        let tab = guarded(cancel, self.dom.open_tab(&item.detail_url)).await?;

        let result = self.download_in(tab, item).await;

        if let Err(e) = self.dom.close_tab(tab).await {
            warn!("Failed to close detail tab: {}", e);
        }
        result
    }

    async fn download_in(
        &self,
        tab: TabId,
        item: &ResultDescriptor,
    ) -> Result<Vec<RawArtifact>, ScraperError> {
        let cancel = &self.config.cancel;
        let selector = self.source.download_selector();

        guarded(cancel, self.dom.wait_for(tab, selector, self.config.timeout))
            .await
            .map_err(|e| match e {
                ScraperError::Timeout(msg) => ScraperError::Download(format!(
                    "no download control on {}: {}",
                    item.detail_url, msg
                )),
                other => other,
            })?;
        let controls = guarded(cancel, self.dom.locate(tab, selector)).await?.len();

        let mut artifacts = Vec::with_capacity(controls);
        for index in 0..controls {
            match self.fetch(tab, selector, index).await {
                Ok(artifact) => {
                    info!("Downloaded {} -> {:?}", artifact.file_name, artifact.path);
                    artifacts.push(artifact);
                }
                Err(e) => {
                    // 同じアイテムの取得済み分は残さない
                    discard(&artifacts);
                    return Err(e);
                }
            }
        }

        if artifacts.is_empty() {
            return Err(ScraperError::Download(format!(
                "no files offered for {}",
                item.label()
            )));
        }
        Ok(artifacts)
    }

    /// `index` 番目のダウンロードボタンのファイルを一時置き場へ
    async fn fetch(
        &self,
        tab: TabId,
        selector: &str,
        index: usize,
    ) -> Result<RawArtifact, ScraperError> {
        let cancel = &self.config.cancel;
        ensure_active(cancel)?;
        let file = guarded(
            cancel,
            self.dom
                .wait_for_download(tab, selector, index, self.config.download_timeout),
        )
        .await?;
        stash(&file, &self.config.download_path)
    }
}

/// 整理しない生ファイルを一時置き場から消す（ディレクトリは対象外）
pub fn discard(artifacts: &[RawArtifact]) {
    for artifact in artifacts {
        if artifact.kind == ArtifactKind::Directory {
            continue;
        }
        match std::fs::remove_file(&artifact.path) {
            Ok(()) => debug!("Discarded {:?}", artifact.path),
            Err(e) => warn!("Failed to discard {:?}: {}", artifact.path, e),
        }
    }
}

/// 一意な名前で一時置き場に移動する
fn stash(file: &DownloadedFile, staging: &Path) -> Result<RawArtifact, ScraperError> {
    std::fs::create_dir_all(staging)?;
    let file_name = if file.suggested_filename.is_empty() {
        file.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "download".to_string())
    } else {
        file.suggested_filename.clone()
    };

    let target = staging.join(unique_name(&file_name));
    move_file(&file.path, &target)?;

    Ok(RawArtifact {
        kind: detect_kind(&target),
        path: target,
        file_name,
    })
}

/// `{日時}-{乱数}-{元の名前}`
pub fn unique_name(original: &str) -> String {
    let safe: String = original
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    format!(
        "{}-{:08x}-{}",
        Utc::now().format("%Y%m%d%H%M%S%3f"),
        rand::random::<u32>(),
        safe
    )
}

fn move_file(from: &Path, to: &Path) -> Result<(), ScraperError> {
    if std::fs::rename(from, to).is_err() {
        // 別ファイルシステム間はコピーして削除
        std::fs::copy(from, to)?;
        std::fs::remove_file(from)?;
    }
    Ok(())
}
