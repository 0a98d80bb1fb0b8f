//! セットアップ同期ライブラリ
//!
//! - マーケットプレイスにログインし、シリーズ・シーズン・週・年で絞り込む
//! - 検索結果のセットアップを1件ずつダウンロード
//! - `root/車/チーム/"{年} Season {シーズン}"/コース/取得元/` に整理
//! - 未登録の車名・コース名を完了時にまとめて返す
//!
//! # 使用例
//!
//! ```rust,ignore
//! use setup_sync_service::{
//!     MappingTables, ProgressSink, SetupFilter, SourceKind, SyncConfig, SyncRequest, SyncService,
//! };
//! use tower::Service;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut service = SyncService::new();
//!     let (sink, mut events) = ProgressSink::channel();
//!
//!     let config = SyncConfig::new("user_id", "password")
//!         .with_filter(SetupFilter::new("GT Sprint", "1", "3", "2025"))
//!         .with_destination_root("./setups")
//!         .with_teams(["Team A", "Team B"])
//!         .with_mappings(MappingTables::from_json_file("mappings.json").unwrap());
//!
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("[{:?}] {}", event.kind, event.message);
//!         }
//!     });
//!
//!     let request = SyncRequest::new(SourceKind::Catalog, config, sink);
//!     let response = service.call(request).await.unwrap();
//!     println!("Unmapped: {:?}", response.report.completion);
//! }
//! ```

pub mod browser;
pub mod catalog;
pub mod config;
pub mod error;
pub mod feed;
pub mod mapping;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod service;
pub mod traits;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// 主要な型をリエクスポート
pub use browser::ChromiumAdapter;
pub use catalog::CatalogSource;
pub use config::{SetupFilter, SyncConfig};
pub use error::ScraperError;
pub use feed::FeedSource;
pub use mapping::{Mapping, MappingTable, MappingTables};
pub use pipeline::organizer::OrganizedPath;
pub use pipeline::{RunReport, SyncPipeline};
pub use progress::{CompletionInfo, ProgressEvent, ProgressKind, ProgressSink, RunState};
pub use registry::{JobId, SessionRegistry};
pub use service::{SourceKind, SyncRequest, SyncResponse, SyncService};
pub use traits::{DomAdapter, SetupSource};
