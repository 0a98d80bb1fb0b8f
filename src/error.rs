use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScraperError {
    #[error("ブラウザ初期化エラー: {0}")]
    BrowserInit(String),

    #[error("ナビゲーションエラー: {0}")]
    Navigation(String),

    #[error("ログインエラー: {0}")]
    Authentication(String),

    #[error("フィルターエラー: {0}")]
    Filter(String),

    #[error("ダウンロードエラー: {0}")]
    Download(String),

    #[error("展開エラー: {0}")]
    Extraction(String),

    #[error("タイムアウト: {0}")]
    Timeout(String),

    #[error("要素が見つかりません: {0}")]
    ElementNotFound(String),

    #[error("JavaScript実行エラー: {0}")]
    JavaScript(String),

    #[error("設定エラー: {0}")]
    InvalidConfig(String),

    #[error("キャンセルされました")]
    Cancelled,

    #[error("ファイル操作エラー: {0}")]
    FileIO(#[from] std::io::Error),

    #[error("アーカイブエラー: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("JSONエラー: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScraperError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// 実行全体を中断するエラーか（認証失敗、ブラウザ起動失敗など）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::BrowserInit(_)
                | Self::Navigation(_)
                | Self::Authentication(_)
                | Self::Filter(_)
                | Self::InvalidConfig(_)
        )
    }

    /// アイテム単位で回復できるエラーか
    pub fn is_item_scoped(&self) -> bool {
        !self.is_cancelled() && !self.is_fatal()
    }
}
