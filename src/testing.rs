//! テスト用の疑似マーケットプレイス

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::config::{SetupFilter, SyncConfig};
use crate::error::ScraperError;
use crate::mapping::MappingTables;
use crate::traits::{DomAdapter, SetupSource};
use crate::types::{
    DownloadedFile, ElementInfo, FilterDimension, FilterPlan, FilterStep, ListingStrategy,
    LoginForm, PagedSelectors, ResultDescriptor, TabId,
};

pub(crate) const USER: &str = "driver@example.com";
pub(crate) const PASSWORD: &str = "hunter2";
const DETAIL_BASE: &str = "https://setups.test/setups/setup-";

pub(crate) fn test_config(dir: &Path) -> SyncConfig {
    let mappings = MappingTables::new()
        .with_car("BMW M4 GT3", "bmwm4gt3")
        .with_car("Porsche 911 GT3 R", "porsche992rgt3")
        .with_track("Spa", "spa")
        .with_track("Monza", "monza");

    SyncConfig::new(USER, PASSWORD)
        .with_filter(SetupFilter::new("GT Sprint", "1", "1", "2025"))
        .with_destination_root(dir.join("out"))
        .with_download_path(dir.join("staging"))
        .with_mappings(mappings)
        .with_timeout(Duration::from_millis(200))
        .with_download_timeout(Duration::from_secs(2))
        .with_item_delay(Duration::ZERO)
        .with_step_delay(Duration::ZERO)
}

pub(crate) fn detail_url(n: usize) -> String {
    format!("{}{}", DETAIL_BASE, n)
}

pub(crate) fn card(n: usize, car: &str, track: &str) -> ElementInfo {
    ElementInfo::new(format!("Setup {}", n))
        .with_attr("class", "setup-card")
        .with_attr("href", detail_url(n))
        .with_attr("data-car", car)
        .with_attr("data-track", track)
        .with_attr("data-season", "1")
        .with_attr("data-week", "1")
        .with_attr("data-year", "2025")
}

/// `Setup 1` から `Setup n` まで（全て BMW M4 GT3 @ Spa）
pub(crate) fn cards(n: usize) -> Vec<ElementInfo> {
    (1..=n).map(|i| card(i, "BMW M4 GT3", "Spa")).collect()
}

pub(crate) fn card_descriptor(n: usize) -> ResultDescriptor {
    parse_card(&card(n, "BMW M4 GT3", "Spa")).expect("test card parses")
}

pub(crate) fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, content) in entries {
        writer.start_file(*name, options).expect("start zip entry");
        writer.write_all(content.as_bytes()).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

fn parse_card(el: &ElementInfo) -> Option<ResultDescriptor> {
    Some(ResultDescriptor {
        title: el.text.trim().to_string(),
        car: el.attr("data-car")?.to_string(),
        track: el.attr("data-track")?.to_string(),
        season: el.attr("data-season").unwrap_or_default().to_string(),
        week: el.attr("data-week").unwrap_or_default().to_string(),
        year: el.attr("data-year").unwrap_or_default().to_string(),
        detail_url: el.attr("href")?.to_string(),
    })
}

fn identity(value: &str) -> String {
    value.to_string()
}

fn season_label(value: &str) -> String {
    format!("Season {}", value)
}

fn week_label(value: &str) -> String {
    format!("Week {}", value)
}

fn step(dimension: FilterDimension, label: fn(&str) -> String) -> FilterStep {
    let name = dimension.name();
    FilterStep {
        dimension,
        opener: format!("#{}-select", name),
        search: (dimension == FilterDimension::Series).then(|| format!("#{}-search", name)),
        options: format!("#{}-options li", name),
        selected_class: "selected".into(),
        close: (dimension == FilterDimension::Series).then(|| format!("#{}-close", name)),
        label,
    }
}

/// ページ送り型のテスト用ソース
pub(crate) struct TestSource;

impl TestSource {
    pub(crate) const ENTRY_URL: &'static str = "https://setups.test/";
    pub(crate) const LISTING_URL: &'static str = "https://setups.test/setups";
}

impl SetupSource for TestSource {
    fn name(&self) -> &'static str {
        "Test Marketplace"
    }

    fn source_tag(&self) -> &str {
        "Test"
    }

    fn login_form(&self) -> LoginForm {
        LoginForm {
            entry_url: Self::ENTRY_URL.into(),
            open_login: None,
            username: "#username".into(),
            password: "#password".into(),
            submit: "#login".into(),
            logged_in: "#account-menu".into(),
        }
    }

    fn listing_url(&self) -> &str {
        Self::LISTING_URL
    }

    fn filter_plan(&self) -> FilterPlan {
        FilterPlan {
            clear: Some("#clear-filters".into()),
            open_panel: Some("#filters".into()),
            steps: vec![
                step(FilterDimension::Year, identity),
                step(FilterDimension::Season, season_label),
                step(FilterDimension::Week, week_label),
                step(FilterDimension::Series, identity),
            ],
            apply: Some("#apply-filters".into()),
        }
    }

    fn listing(&self) -> ListingStrategy {
        ListingStrategy::Paged(PagedSelectors {
            page_buttons: ".pagination .page-number".into(),
            active_page: ".pagination .active".into(),
            next: ".pagination .next".into(),
            previous: ".pagination .prev".into(),
        })
    }

    fn item_selector(&self) -> &str {
        ".setup-card"
    }

    fn parse_item(&self, element: &ElementInfo) -> Option<ResultDescriptor> {
        parse_card(element)
    }

    fn download_selector(&self) -> &str {
        ".download"
    }

    fn setup_extension(&self) -> &str {
        "sto"
    }
}

/// 無限スクロール型のテスト用ソース（車名は変換しない）
pub(crate) struct ScrollSource;

impl ScrollSource {
    pub(crate) const LISTING_URL: &'static str = "https://setups.test/feed";
    pub(crate) const MAX_ATTEMPTS: u32 = 8;
}

impl SetupSource for ScrollSource {
    fn name(&self) -> &'static str {
        "Test Feed"
    }

    fn source_tag(&self) -> &str {
        "Scroll"
    }

    fn login_form(&self) -> LoginForm {
        TestSource.login_form()
    }

    fn listing_url(&self) -> &str {
        Self::LISTING_URL
    }

    fn filter_plan(&self) -> FilterPlan {
        TestSource.filter_plan()
    }

    fn listing(&self) -> ListingStrategy {
        ListingStrategy::InfiniteScroll {
            max_attempts: Self::MAX_ATTEMPTS,
            settle: Duration::ZERO,
        }
    }

    fn item_selector(&self) -> &str {
        ".setup-card"
    }

    fn parse_item(&self, element: &ElementInfo) -> Option<ResultDescriptor> {
        parse_card(element)
    }

    fn download_selector(&self) -> &str {
        ".download"
    }

    fn setup_extension(&self) -> &str {
        "sto"
    }

    fn maps_car_names(&self) -> bool {
        false
    }
}

#[derive(Default)]
enum Listing {
    #[default]
    Empty,
    Paged {
        items: Vec<ElementInfo>,
        per_page: usize,
        window: u32,
        page: u32,
    },
    Scroll {
        items: Vec<ElementInfo>,
        visible: usize,
        step: usize,
    },
}

impl Listing {
    fn pages(items: &[ElementInfo], per_page: usize) -> u32 {
        items.len().div_ceil(per_page.max(1)) as u32
    }
}

#[derive(Default)]
struct FakeState {
    next_tab: u64,
    tabs: HashMap<u64, String>,
    opened_total: usize,
    logged_in: bool,
    fields: HashMap<String, String>,
    selections: Vec<String>,
    selected: HashMap<String, String>,
    listing: Listing,
    downloads: HashMap<String, Vec<(String, Vec<u8>)>>,
    failing: HashSet<String>,
    failing_at: HashSet<(String, usize)>,
    calls: Vec<String>,
    cancel_on: Option<(String, usize, CancellationToken)>,
    shut_down: bool,
    download_seq: u64,
    next_skip: u32,
}

impl FakeState {
    fn record(&mut self, call: String) {
        self.calls.push(call.clone());
        if let Some((name, nth, token)) = &self.cancel_on {
            if *name == call && self.calls.iter().filter(|c| **c == call).count() == *nth {
                token.cancel();
            }
        }
    }

    fn tab_url(&self, tab: TabId) -> Result<String, ScraperError> {
        self.tabs
            .get(&tab.0)
            .cloned()
            .ok_or_else(|| ScraperError::Navigation(format!("tab {} is closed", tab.0)))
    }

    fn options(&self, dimension: &str) -> Vec<ElementInfo> {
        let labels: Vec<String> = match dimension {
            "year" => vec!["2024".into(), "2025".into()],
            "season" => (1..=4).map(|s| format!("Season {}", s)).collect(),
            "week" => (1..=12).map(|w| format!("Week {}", w)).collect(),
            "series" => vec![
                "GT Sprint".into(),
                "IMSA Endurance".into(),
                "Porsche Cup".into(),
            ],
            _ => Vec::new(),
        };
        let search = self
            .fields
            .get(&format!("#{}-search", dimension))
            .map(|s| s.to_lowercase());
        labels
            .into_iter()
            .filter(|l| search.as_ref().map_or(true, |s| l.to_lowercase().contains(s)))
            .map(|l| {
                let class = if self.selected.get(dimension) == Some(&l) {
                    "option selected"
                } else {
                    "option"
                };
                ElementInfo::new(l).with_attr("class", class)
            })
            .collect()
    }

    fn elements(&self, tab: TabId, selector: &str) -> Vec<ElementInfo> {
        let url = self.tabs.get(&tab.0).cloned().unwrap_or_default();
        let present = || vec![ElementInfo::new("")];

        if let Some(dimension) = strip(selector, "-options li") {
            return self.options(dimension);
        }
        if strip(selector, "-select").is_some()
            || strip(selector, "-search").is_some()
            || strip(selector, "-close").is_some()
        {
            return present();
        }

        match selector {
            "#username" | "#password" | "#login" | "#clear-filters" | "#filters"
            | "#apply-filters" => present(),
            "#account-menu" if self.logged_in => present(),
            ".setup-card" => match &self.listing {
                Listing::Empty => Vec::new(),
                Listing::Paged {
                    items,
                    per_page,
                    page,
                    ..
                } => {
                    let start = (*page as usize - 1) * per_page;
                    items.iter().skip(start).take(*per_page).cloned().collect()
                }
                Listing::Scroll { items, visible, .. } => {
                    items.iter().take(*visible).cloned().collect()
                }
            },
            ".pagination .page-number" => match &self.listing {
                Listing::Paged {
                    items,
                    per_page,
                    window,
                    page,
                } => {
                    let pages = Listing::pages(items, *per_page);
                    let first = page.saturating_sub(*window).max(1);
                    let last = (page + window).min(pages);
                    (first..=last)
                        .map(|p| {
                            let class = if p == *page {
                                "page-number active"
                            } else {
                                "page-number"
                            };
                            ElementInfo::new(p.to_string()).with_attr("class", class)
                        })
                        .collect()
                }
                _ => Vec::new(),
            },
            ".pagination .active" => match &self.listing {
                Listing::Paged { items, page, .. } if !items.is_empty() => {
                    vec![ElementInfo::new(page.to_string())]
                }
                _ => Vec::new(),
            },
            ".pagination .next" => match &self.listing {
                Listing::Paged {
                    items,
                    per_page,
                    page,
                    ..
                } if !items.is_empty() => {
                    let class = if *page >= Listing::pages(items, *per_page) {
                        "next disabled"
                    } else {
                        "next"
                    };
                    vec![ElementInfo::new("Next").with_attr("class", class)]
                }
                _ => Vec::new(),
            },
            ".pagination .prev" => match &self.listing {
                Listing::Paged { items, page, .. } if !items.is_empty() => {
                    let class = if *page <= 1 { "prev disabled" } else { "prev" };
                    vec![ElementInfo::new("Prev").with_attr("class", class)]
                }
                _ => Vec::new(),
            },
            ".download" => self
                .downloads
                .get(&url)
                .map(|files| files.iter().map(|(name, _)| ElementInfo::new(name.clone())).collect())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

fn strip<'a>(selector: &'a str, suffix: &str) -> Option<&'a str> {
    selector.strip_prefix('#')?.strip_suffix(suffix)
}

/// 台本どおりに振る舞う `DomAdapter`
pub(crate) struct FakeDom {
    state: Mutex<FakeState>,
    browser_dir: PathBuf,
}

impl FakeDom {
    pub(crate) fn new(dir: &Path) -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            browser_dir: dir.join("browser"),
        }
    }

    fn state_mut(&mut self) -> &mut FakeState {
        self.state.get_mut().expect("fake state poisoned")
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake state poisoned")
    }

    pub(crate) fn with_paged(mut self, items: Vec<ElementInfo>, per_page: usize, window: u32) -> Self {
        self.state_mut().listing = Listing::Paged {
            items,
            per_page,
            window,
            page: 1,
        };
        self
    }

    pub(crate) fn with_scroll(mut self, items: Vec<ElementInfo>, initial: usize, step: usize) -> Self {
        self.state_mut().listing = Listing::Scroll {
            visible: initial.min(items.len()),
            items,
            step,
        };
        self
    }

    /// 「次へ」で `skip` ページ余分に進む（ページが抜けるサイト）
    pub(crate) fn with_next_skip(mut self, skip: u32) -> Self {
        self.state_mut().next_skip = skip;
        self
    }

    /// 詳細ページにzipを1つ置く（ファイル名はURL末尾 + `.zip`）
    pub(crate) fn with_zip(mut self, url: &str, bytes: Vec<u8>) -> Self {
        let name = format!("{}.zip", url.rsplit('/').next().unwrap_or("bundle"));
        self.state_mut()
            .downloads
            .insert(url.to_string(), vec![(name, bytes)]);
        self
    }

    pub(crate) fn with_files(mut self, url: &str, files: Vec<(String, Vec<u8>)>) -> Self {
        self.state_mut().downloads.insert(url.to_string(), files);
        self
    }

    pub(crate) fn fail_download(mut self, url: &str) -> Self {
        self.state_mut().failing.insert(url.to_string());
        self
    }

    /// `index` 番目のダウンロードだけ失敗させる
    pub(crate) fn fail_download_at(mut self, url: &str, index: usize) -> Self {
        self.state_mut().failing_at.insert((url.to_string(), index));
        self
    }

    /// `call` が `nth` 回目に呼ばれた時点でトークンをキャンセルする
    pub(crate) fn cancel_on(mut self, call: &str, nth: usize, token: CancellationToken) -> Self {
        self.state_mut().cancel_on = Some((call.to_string(), nth, token));
        self
    }

    pub(crate) fn open_tab_count(&self) -> usize {
        self.lock().tabs.len()
    }

    pub(crate) fn opened_total(&self) -> usize {
        self.lock().opened_total
    }

    pub(crate) fn tab_url(&self, tab: TabId) -> Option<String> {
        self.lock().tabs.get(&tab.0).cloned()
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub(crate) fn call_count(&self, call: &str) -> usize {
        self.lock().calls.iter().filter(|c| *c == call).count()
    }

    pub(crate) fn selections(&self) -> Vec<String> {
        self.lock().selections.clone()
    }

    pub(crate) fn current_page(&self) -> u32 {
        match self.lock().listing {
            Listing::Paged { page, .. } => page,
            _ => 1,
        }
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.lock().shut_down
    }
}

#[async_trait]
impl DomAdapter for FakeDom {
    async fn open_tab(&self, url: &str) -> Result<TabId, ScraperError> {
        let mut state = self.lock();
        state.record("open_tab".into());
        state.next_tab += 1;
        let id = state.next_tab;
        state.tabs.insert(id, url.to_string());
        state.opened_total += 1;
        Ok(TabId(id))
    }

    async fn close_tab(&self, tab: TabId) -> Result<(), ScraperError> {
        let mut state = self.lock();
        state.record("close_tab".into());
        state.tabs.remove(&tab.0);
        Ok(())
    }

    async fn goto(&self, tab: TabId, url: &str) -> Result<(), ScraperError> {
        let mut state = self.lock();
        state.record(format!("goto:{}", url));
        state.tab_url(tab)?;
        state.tabs.insert(tab.0, url.to_string());
        Ok(())
    }

    async fn wait_for_navigation(&self, tab: TabId) -> Result<(), ScraperError> {
        let mut state = self.lock();
        state.record("wait_for_navigation".into());
        state.tab_url(tab).map(|_| ())
    }

    async fn locate(&self, tab: TabId, selector: &str) -> Result<Vec<ElementInfo>, ScraperError> {
        let state = self.lock();
        state.tab_url(tab)?;
        Ok(state.elements(tab, selector))
    }

    async fn click(&self, tab: TabId, selector: &str, index: usize) -> Result<(), ScraperError> {
        let mut state = self.lock();
        state.record(format!("click:{}", selector));
        state.tab_url(tab)?;
        let elements = state.elements(tab, selector);
        let element = elements
            .get(index)
            .cloned()
            .ok_or_else(|| ScraperError::ElementNotFound(format!("{}[{}]", selector, index)))?;

        if let Some(dimension) = strip(selector, "-options li") {
            state
                .selected
                .insert(dimension.to_string(), element.text.clone());
            state
                .selections
                .push(format!("{}={}", dimension, element.text));
            return Ok(());
        }

        match selector {
            "#login" => {
                state.logged_in = state.fields.get("#username").map(String::as_str) == Some(USER)
                    && state.fields.get("#password").map(String::as_str) == Some(PASSWORD);
            }
            "#clear-filters" => {
                state.selected.clear();
                state.selections.push("clear".into());
            }
            "#apply-filters" => state.selections.push("apply".into()),
            ".pagination .page-number" => {
                if let (Listing::Paged { page, .. }, Ok(target)) =
                    (&mut state.listing, element.text.parse::<u32>())
                {
                    *page = target;
                }
            }
            ".pagination .next" => {
                let skip = state.next_skip;
                if let Listing::Paged {
                    items,
                    per_page,
                    page,
                    ..
                } = &mut state.listing
                {
                    let pages = Listing::pages(items, *per_page);
                    if *page < pages {
                        *page = (*page + 1 + skip).min(pages);
                    }
                }
            }
            ".pagination .prev" => {
                if let Listing::Paged { page, .. } = &mut state.listing {
                    if *page > 1 {
                        *page -= 1;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn fill(&self, tab: TabId, selector: &str, value: &str) -> Result<(), ScraperError> {
        let mut state = self.lock();
        state.record(format!("fill:{}", selector));
        state.tab_url(tab)?;
        state.fields.insert(selector.to_string(), value.to_string());
        Ok(())
    }

    async fn scroll_to_bottom(&self, tab: TabId) -> Result<(), ScraperError> {
        let mut state = self.lock();
        state.record("scroll_to_bottom".into());
        state.tab_url(tab)?;
        if let Listing::Scroll {
            items,
            visible,
            step,
        } = &mut state.listing
        {
            *visible = (*visible + *step).min(items.len());
        }
        Ok(())
    }

    async fn wait_for_download(
        &self,
        tab: TabId,
        selector: &str,
        index: usize,
        _timeout: Duration,
    ) -> Result<DownloadedFile, ScraperError> {
        let (path, name, bytes) = {
            let mut state = self.lock();
            state.record("wait_for_download".into());
            let url = state.tab_url(tab)?;
            if state.failing.contains(&url) || state.failing_at.contains(&(url.clone(), index)) {
                return Err(ScraperError::Download(format!("simulated failure for {}", url)));
            }
            let (name, bytes) = state
                .downloads
                .get(&url)
                .and_then(|files| files.get(index))
                .cloned()
                .ok_or_else(|| ScraperError::ElementNotFound(format!("{}[{}]", selector, index)))?;
            state.download_seq += 1;
            let path = self.browser_dir.join(format!("guid-{}", state.download_seq));
            (path, name, bytes)
        };

        std::fs::create_dir_all(&self.browser_dir)?;
        std::fs::write(&path, bytes)?;
        Ok(DownloadedFile {
            path,
            suggested_filename: name,
        })
    }

    async fn screenshot(&self, tab: TabId) -> Result<Vec<u8>, ScraperError> {
        let mut state = self.lock();
        state.record("screenshot".into());
        state.tab_url(tab)?;
        Ok(b"\x89PNG".to_vec())
    }

    async fn shutdown(&self) -> Result<(), ScraperError> {
        let mut state = self.lock();
        state.record("shutdown".into());
        state.tabs.clear();
        state.shut_down = true;
        Ok(())
    }

    async fn wait_for(
        &self,
        tab: TabId,
        selector: &str,
        _timeout: Duration,
    ) -> Result<(), ScraperError> {
        let mut state = self.lock();
        state.record(format!("wait_for:{}", selector));
        state.tab_url(tab)?;
        if state.elements(tab, selector).is_empty() {
            return Err(ScraperError::Timeout(format!("'{}' did not appear", selector)));
        }
        Ok(())
    }
}
