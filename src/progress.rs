//! 進捗イベントと完了サマリ
//!
//! 実行中のイベントは単一コンシューマのチャネルに順番に流す。
//! 表示や保存は呼び出し側の責務。

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::mapping::Mapping;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    Info,
    Success,
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub kind: ProgressKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// 実行状態: `Idle → Running → {Completed | Cancelled | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// イベント送信口
///
/// キャンセル後は `success` と `error` を送らない。
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: UnboundedSender<ProgressEvent>,
    cancel: Option<CancellationToken>,
}

impl ProgressSink {
    pub fn new(tx: UnboundedSender<ProgressEvent>) -> Self {
        Self { tx, cancel: None }
    }

    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// 指定トークンのキャンセルを監視するシンクを返す
    pub fn bind(&self, cancel: CancellationToken) -> Self {
        Self {
            tx: self.tx.clone(),
            cancel: Some(cancel),
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(ProgressKind::Info, message.into());
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(ProgressKind::Success, message.into());
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.emit(ProgressKind::Warning, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(ProgressKind::Error, message.into());
    }

    fn emit(&self, kind: ProgressKind, message: String) {
        let cancelled = self.cancel.as_ref().is_some_and(|c| c.is_cancelled());
        if cancelled && matches!(kind, ProgressKind::Success | ProgressKind::Error) {
            debug!("Suppressed {:?} event after cancellation: {}", kind, message);
            return;
        }

        let event = ProgressEvent {
            kind,
            message,
            timestamp: Utc::now(),
        };
        // 受信側が閉じていても実行は続ける
        if self.tx.send(event).is_err() {
            debug!("Progress receiver dropped");
        }
    }
}

/// 完了時に一度だけ返すサマリ
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionInfo {
    pub unmapped_cars: Vec<String>,
    pub unmapped_tracks: Vec<String>,
}

/// 未登録名の集合（重複なし、順序非依存）
#[derive(Debug, Clone, Default)]
pub struct UnmappedNames {
    cars: BTreeSet<String>,
    tracks: BTreeSet<String>,
}

impl UnmappedNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_car(&mut self, source_name: &str, mapping: &Mapping) {
        if !mapping.was_mapped {
            self.cars.insert(source_name.to_string());
        }
    }

    pub fn record_track(&mut self, source_name: &str, mapping: &Mapping) {
        if !mapping.was_mapped {
            self.tracks.insert(source_name.to_string());
        }
    }

    pub fn merge(&mut self, other: UnmappedNames) {
        self.cars.extend(other.cars);
        self.tracks.extend(other.tracks);
    }

    pub fn is_empty(&self) -> bool {
        self.cars.is_empty() && self.tracks.is_empty()
    }

    pub fn to_completion(&self) -> CompletionInfo {
        CompletionInfo {
            unmapped_cars: self.cars.iter().cloned().collect(),
            unmapped_tracks: self.tracks.iter().cloned().collect(),
        }
    }
}
