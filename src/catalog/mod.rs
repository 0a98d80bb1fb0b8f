//! Catalog マーケットプレイス
//!
//! ページ送りの一覧から、`car/track/*.sto` 構成のzipを1件ずつ取得する。

mod source;

pub use source::{CatalogSource, DEFAULT_BASE_URL};
