//! パイプライン共通の型定義

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::SetupFilter;

/// ブラウジングコンテキスト（タブ）のハンドル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TabId(pub u64);

/// `locate` で取得した要素のスナップショット
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ElementInfo {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl ElementInfo {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    pub fn is_disabled(&self) -> bool {
        self.attributes.contains_key("disabled")
            || self.attr("aria-disabled") == Some("true")
            || self.has_class("disabled")
    }
}

/// ブラウザが保存したダウンロードファイル
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub path: PathBuf,
    pub suggested_filename: String,
}

/// 一覧から取得した1件分の情報（永続化しない）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResultDescriptor {
    pub title: String,
    pub car: String,
    pub track: String,
    pub season: String,
    pub week: String,
    pub year: String,
    pub detail_url: String,
}

impl ResultDescriptor {
    /// 進捗メッセージ用の表示名
    pub fn label(&self) -> String {
        if self.title.is_empty() {
            format!("{} @ {}", self.car, self.track)
        } else {
            self.title.clone()
        }
    }
}

/// 相対リンクをサイトのURLで補完する
pub fn resolve_url(base: &str, href: &str) -> String {
    let href = href.trim();
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    if let Some(path) = href.strip_prefix('/') {
        // scheme://host 部分だけ残す
        let origin_end = base
            .find("://")
            .and_then(|i| base[i + 3..].find('/').map(|j| i + 3 + j))
            .unwrap_or(base.len());
        return format!("{}/{}", &base[..origin_end], path);
    }
    format!("{}/{}", base.trim_end_matches('/'), href)
}

/// ダウンロード成果物の種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// zipアーカイブ（`car/track/...` 構成）
    Archive,
    /// 単一のセットアップファイル
    File,
    /// 展開済みディレクトリ（テスト用フィクスチャなど）
    Directory,
}

/// ダウンロード済みの生ファイル。整理後に削除される。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawArtifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    /// 元のファイル名（サイトが提示した名前）
    pub file_name: String,
}

/// ログインフォームのセレクタ
#[derive(Debug, Clone)]
pub struct LoginForm {
    pub entry_url: String,
    /// ログインフォームを開くリンク（トップページに直接フォームがない場合）
    pub open_login: Option<String>,
    pub username: String,
    pub password: String,
    pub submit: String,
    /// ログイン後に現れる要素
    pub logged_in: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDimension {
    Series,
    Season,
    Week,
    Year,
}

impl FilterDimension {
    pub fn value(self, filter: &SetupFilter) -> &str {
        match self {
            Self::Series => &filter.series,
            Self::Season => &filter.season,
            Self::Week => &filter.week,
            Self::Year => &filter.year,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Series => "series",
            Self::Season => "season",
            Self::Week => "week",
            Self::Year => "year",
        }
    }
}

/// フィルター1項目分の操作手順
#[derive(Debug, Clone)]
pub struct FilterStep {
    pub dimension: FilterDimension,
    /// セレクタを開く要素
    pub opener: String,
    /// 絞り込み入力欄
    pub search: Option<String>,
    /// 選択肢
    pub options: String,
    /// 選択済みの選択肢に付くクラス
    pub selected_class: String,
    pub close: Option<String>,
    /// 論理値から画面上のラベルへの変換
    pub label: fn(&str) -> String,
}

/// フィルター適用手順（順序はサイトの挙動に合わせる）
#[derive(Debug, Clone)]
pub struct FilterPlan {
    pub clear: Option<String>,
    pub open_panel: Option<String>,
    pub steps: Vec<FilterStep>,
    pub apply: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PagedSelectors {
    /// 番号付きページボタン
    pub page_buttons: String,
    /// 現在ページ
    pub active_page: String,
    /// 「次へ」ボタン
    pub next: String,
    /// 「前へ」ボタン
    pub previous: String,
}

/// 一覧の読み込み方式
#[derive(Debug, Clone)]
pub enum ListingStrategy {
    Paged(PagedSelectors),
    InfiniteScroll { max_attempts: u32, settle: Duration },
}
