use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::ScraperError;
use crate::types::{
    DownloadedFile, ElementInfo, FilterPlan, ListingStrategy, LoginForm, ResultDescriptor, TabId,
};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// ブラウザ操作の窓口
///
/// セレクタはCSS。上位層（ログイン、フィルター、一覧、ダウンロード）は
/// このトレイトだけに依存する。
#[async_trait]
pub trait DomAdapter: Send + Sync {
    /// 新しいタブでURLを開く
    async fn open_tab(&self, url: &str) -> Result<TabId, ScraperError>;

    /// タブを閉じる（閉じ済みなら何もしない）
    async fn close_tab(&self, tab: TabId) -> Result<(), ScraperError>;

    async fn goto(&self, tab: TabId, url: &str) -> Result<(), ScraperError>;

    async fn wait_for_navigation(&self, tab: TabId) -> Result<(), ScraperError>;

    /// セレクタに一致する要素の一覧（0件は空Vec）
    async fn locate(&self, tab: TabId, selector: &str) -> Result<Vec<ElementInfo>, ScraperError>;

    /// `index` 番目の一致要素をクリック
    async fn click(&self, tab: TabId, selector: &str, index: usize) -> Result<(), ScraperError>;

    async fn fill(&self, tab: TabId, selector: &str, value: &str) -> Result<(), ScraperError>;

    async fn scroll_to_bottom(&self, tab: TabId) -> Result<(), ScraperError>;

    /// ダウンロード待機を登録してから `index` 番目の要素をクリックし、保存完了を待つ
    async fn wait_for_download(
        &self,
        tab: TabId,
        selector: &str,
        index: usize,
        timeout: Duration,
    ) -> Result<DownloadedFile, ScraperError>;

    async fn screenshot(&self, tab: TabId) -> Result<Vec<u8>, ScraperError>;

    /// 全タブとブラウザ本体を閉じる
    async fn shutdown(&self) -> Result<(), ScraperError>;

    /// 要素が現れるまで待機
    async fn wait_for(
        &self,
        tab: TabId,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), ScraperError> {
        let start = Instant::now();
        loop {
            if !self.locate(tab, selector).await?.is_empty() {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(ScraperError::Timeout(format!(
                    "'{}' did not appear within {:?}",
                    selector, timeout
                )));
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }
}

/// マーケットプレイスごとの差分
///
/// ログイン・フィルター・一覧・ダウンロードの流れは共通で、
/// セレクタやパス規約だけをここで与える。
pub trait SetupSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// 出力パス末尾のディレクトリ名
    fn source_tag(&self) -> &str;

    fn login_form(&self) -> LoginForm;

    fn listing_url(&self) -> &str;

    fn filter_plan(&self) -> FilterPlan;

    fn listing(&self) -> ListingStrategy;

    /// 一覧の1件分の要素
    fn item_selector(&self) -> &str;

    fn parse_item(&self, element: &ElementInfo) -> Option<ResultDescriptor>;

    /// 詳細ページのダウンロードボタン
    fn download_selector(&self) -> &str;

    /// 整理対象のファイル拡張子（ドットなし）
    fn setup_extension(&self) -> &str;

    /// 車名も変換テーブルを通すか
    fn maps_car_names(&self) -> bool {
        true
    }
}
