//! 検索結果の列挙
//!
//! ページ送り型と無限スクロール型の2方式を同じインターフェースで扱う。

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ScraperError;
use crate::traits::{DomAdapter, SetupSource};
use crate::types::{ListingStrategy, PagedSelectors, ResultDescriptor, TabId};

use super::cancel::{ensure_active, guarded, pace};

/// ページジャンプの上限（ページ数が収束しないサイト対策）
const MAX_PAGE_JUMPS: u32 = 500;

/// ページ送り型の件数集計結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCount {
    pub per_page: usize,
    pub last_page: u32,
    pub last_page_count: usize,
}

impl PageCount {
    pub fn total(&self) -> usize {
        if self.last_page == 0 {
            return 0;
        }
        (self.last_page as usize - 1) * self.per_page + self.last_page_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Start,
    Page(u32),
    Done,
}

pub struct ResultEnumerator<'a> {
    dom: &'a dyn DomAdapter,
    source: &'a dyn SetupSource,
    tab: TabId,
    cancel: CancellationToken,
    settle: Duration,
    cursor: Cursor,
    total: Option<usize>,
    last_page: Option<u32>,
}

impl<'a> ResultEnumerator<'a> {
    pub fn new(
        dom: &'a dyn DomAdapter,
        source: &'a dyn SetupSource,
        tab: TabId,
        cancel: CancellationToken,
        settle: Duration,
    ) -> Self {
        Self {
            dom,
            source,
            tab,
            cancel,
            settle,
            cursor: Cursor::Start,
            total: None,
            last_page: None,
        }
    }

    /// 総件数（全ページを2回たどらずに求める）
    pub async fn count(&mut self) -> Result<usize, ScraperError> {
        if let Some(total) = self.total {
            return Ok(total);
        }
        let total = match self.source.listing() {
            ListingStrategy::Paged(selectors) => {
                let count = self.count_pages(&selectors).await?;
                self.last_page = Some(count.last_page);
                if count.last_page > 1 {
                    self.return_to_first_page(&selectors).await?;
                }
                count.total()
            }
            ListingStrategy::InfiniteScroll {
                max_attempts,
                settle,
            } => self.load_all(max_attempts, settle).await?,
        };
        info!("Found {} result(s)", total);
        self.total = Some(total);
        Ok(total)
    }

    /// 次のページ分の結果。終端で `None`。
    pub async fn next_batch(&mut self) -> Result<Option<Vec<ResultDescriptor>>, ScraperError> {
        if self.total == Some(0) {
            self.cursor = Cursor::Done;
        }
        match (self.cursor, self.source.listing()) {
            (Cursor::Done, _) => Ok(None),
            (Cursor::Start, ListingStrategy::Paged(_)) => {
                self.cursor = Cursor::Page(1);
                self.collect().await.map(non_empty)
            }
            (Cursor::Page(page), ListingStrategy::Paged(selectors)) => {
                if self.last_page.is_some_and(|last| page >= last) {
                    self.cursor = Cursor::Done;
                    return Ok(None);
                }
                match self.advance_page(&selectors, page).await? {
                    Some(now) => self.cursor = Cursor::Page(now),
                    None => {
                        self.cursor = Cursor::Done;
                        return Ok(None);
                    }
                }
                self.collect().await.map(non_empty)
            }
            (
                _,
                ListingStrategy::InfiniteScroll {
                    max_attempts,
                    settle,
                },
            ) => {
                if self.total.is_none() {
                    self.total = Some(self.load_all(max_attempts, settle).await?);
                }
                self.cursor = Cursor::Done;
                self.collect().await.map(non_empty)
            }
        }
    }

    /// 現在表示中の結果を読み取る
    async fn collect(&self) -> Result<Vec<ResultDescriptor>, ScraperError> {
        let elements = guarded(
            &self.cancel,
            self.dom.locate(self.tab, self.source.item_selector()),
        )
        .await?;
        let items: Vec<ResultDescriptor> = elements
            .iter()
            .filter_map(|el| {
                let item = self.source.parse_item(el);
                if item.is_none() {
                    warn!("Skipping unparseable result: {:?}", el.text);
                }
                item
            })
            .collect();
        debug!("Collected {} item(s) from current view", items.len());
        Ok(items)
    }

    async fn item_count(&self) -> Result<usize, ScraperError> {
        Ok(guarded(
            &self.cancel,
            self.dom.locate(self.tab, self.source.item_selector()),
        )
        .await?
        .len())
    }

    /// 1ページ目の件数を数え、最大番号のページへジャンプを繰り返して最終ページを求める
    ///
    /// 先のページ番号が表示されなければ「次へ」で進む。
    async fn count_pages(&self, selectors: &PagedSelectors) -> Result<PageCount, ScraperError> {
        let per_page = self.item_count().await?;
        if per_page == 0 {
            return Ok(PageCount {
                per_page: 0,
                last_page: 0,
                last_page_count: 0,
            });
        }
        if !self.control_enabled(&selectors.next).await? {
            return Ok(PageCount {
                per_page,
                last_page: 1,
                last_page_count: per_page,
            });
        }

        for _ in 0..MAX_PAGE_JUMPS {
            ensure_active(&self.cancel)?;
            let current = self.active_page(selectors).await?;
            let buttons = self.page_buttons(selectors).await?;
            match buttons.iter().max_by_key(|(_, number)| *number) {
                Some(&(index, highest)) if highest > current => {
                    debug!("Jumping from page {} to page {}", current, highest);
                    self.click_and_settle(&selectors.page_buttons, index).await?;
                }
                _ if self.control_enabled(&selectors.next).await? => {
                    debug!("Stepping forward from page {}", current);
                    self.click_and_settle(&selectors.next, 0).await?;
                }
                _ => break,
            }
        }

        let last_page = self.active_page(selectors).await?;
        let last_page_count = self.item_count().await?;
        debug!(
            "Last page {} holds {} item(s), {} per page",
            last_page, last_page_count, per_page
        );
        Ok(PageCount {
            per_page,
            last_page,
            last_page_count,
        })
    }

    /// 最小番号のページボタン（なければ「前へ」）を押し続けて1ページ目に戻る
    async fn return_to_first_page(&self, selectors: &PagedSelectors) -> Result<(), ScraperError> {
        for _ in 0..MAX_PAGE_JUMPS {
            ensure_active(&self.cancel)?;
            let current = self.active_page(selectors).await?;
            if current <= 1 {
                return Ok(());
            }
            let buttons = self.page_buttons(selectors).await?;
            match buttons.iter().min_by_key(|(_, number)| *number) {
                Some(&(index, lowest)) if lowest < current => {
                    debug!("Jumping back from page {} to page {}", current, lowest);
                    self.click_and_settle(&selectors.page_buttons, index).await?;
                }
                _ if self.control_enabled(&selectors.previous).await? => {
                    debug!("Stepping back from page {}", current);
                    self.click_and_settle(&selectors.previous, 0).await?;
                }
                _ => {
                    return Err(ScraperError::Navigation(format!(
                        "cannot return to page 1 from page {}",
                        current
                    )))
                }
            }
        }
        Err(ScraperError::Navigation(
            "page 1 not reached within jump limit".into(),
        ))
    }

    /// `page + 1` へ進む。番号ボタンがなければ「次へ」を使う。
    ///
    /// 実際に表示されたページ番号を返す。進めなければ `None`。
    async fn advance_page(
        &self,
        selectors: &PagedSelectors,
        page: u32,
    ) -> Result<Option<u32>, ScraperError> {
        ensure_active(&self.cancel)?;
        let target = page + 1;
        let buttons = self.page_buttons(selectors).await?;

        if let Some(&(index, _)) = buttons.iter().find(|(_, number)| *number == target) {
            self.click_and_settle(&selectors.page_buttons, index).await?;
        } else if self.control_enabled(&selectors.next).await? {
            self.click_and_settle(&selectors.next, 0).await?;
        } else {
            return Ok(None);
        }

        let now = self.active_page(selectors).await?;
        if now != target {
            warn!("Expected page {} after advancing, got {}", target, now);
            return Ok((now > page).then_some(now));
        }
        debug!("Moved to page {}", target);
        Ok(Some(now))
    }

    async fn page_buttons(
        &self,
        selectors: &PagedSelectors,
    ) -> Result<Vec<(usize, u32)>, ScraperError> {
        let elements = guarded(
            &self.cancel,
            self.dom.locate(self.tab, &selectors.page_buttons),
        )
        .await?;
        Ok(elements
            .iter()
            .enumerate()
            .filter(|(_, el)| !el.is_disabled())
            .filter_map(|(i, el)| el.text.trim().parse::<u32>().ok().map(|n| (i, n)))
            .collect())
    }

    async fn active_page(&self, selectors: &PagedSelectors) -> Result<u32, ScraperError> {
        let elements = guarded(
            &self.cancel,
            self.dom.locate(self.tab, &selectors.active_page),
        )
        .await?;
        Ok(elements
            .first()
            .and_then(|el| el.text.trim().parse::<u32>().ok())
            .unwrap_or(1))
    }

    /// 「次へ」「前へ」が押せるか
    async fn control_enabled(&self, selector: &str) -> Result<bool, ScraperError> {
        let elements = guarded(&self.cancel, self.dom.locate(self.tab, selector)).await?;
        Ok(elements.first().is_some_and(|el| !el.is_disabled()))
    }

    async fn click_and_settle(&self, selector: &str, index: usize) -> Result<(), ScraperError> {
        guarded(&self.cancel, self.dom.click(self.tab, selector, index)).await?;
        pace(&self.cancel, self.settle).await
    }

    /// 件数が増えなくなるまでスクロールを繰り返す
    async fn load_all(&self, max_attempts: u32, settle: Duration) -> Result<usize, ScraperError> {
        let mut count = self.item_count().await?;
        for attempt in 0..max_attempts {
            ensure_active(&self.cancel)?;
            guarded(&self.cancel, self.dom.scroll_to_bottom(self.tab)).await?;
            pace(&self.cancel, settle).await?;

            let after = self.item_count().await?;
            debug!(
                "Scroll attempt {}/{}: {} -> {} item(s)",
                attempt + 1,
                max_attempts,
                count,
                after
            );
            if after <= count {
                return Ok(after);
            }
            count = after;
        }
        warn!(
            "Listing still growing after {} scroll attempts, stopping at {} item(s)",
            max_attempts, count
        );
        Ok(count)
    }
}

fn non_empty(items: Vec<ResultDescriptor>) -> Option<Vec<ResultDescriptor>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}
