//! Feed マーケットプレイス
//!
//! 無限スクロールの一覧。1件に複数の `.sto` が直接添付されている。
//! 車名はサイト側で正規化済みなので変換しない。

mod source;

pub use source::{FeedSource, DEFAULT_BASE_URL};
