//! ブラウザ操作の実装
//!
//! パイプラインは `DomAdapter` だけを見る。ここには CDP 固有の処理を閉じ込める。

mod chromium;

pub use chromium::ChromiumAdapter;
