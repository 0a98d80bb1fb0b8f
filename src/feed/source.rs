use std::time::Duration;

use crate::traits::SetupSource;
use crate::types::{
    resolve_url, ElementInfo, FilterDimension, FilterPlan, FilterStep, ListingStrategy,
    LoginForm, ResultDescriptor,
};

pub const DEFAULT_BASE_URL: &str = "https://feed.setupmarket.net";
const SOURCE_TAG: &str = "Feed";
const MAX_SCROLL_ATTEMPTS: u32 = 40;
const SCROLL_SETTLE: Duration = Duration::from_millis(1500);

pub struct FeedSource {
    base_url: String,
    login_url: String,
    listing_url: String,
    max_scroll_attempts: u32,
}

impl FeedSource {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            login_url: format!("{}/login", base_url),
            listing_url: format!("{}/feed", base_url),
            base_url,
            max_scroll_attempts: MAX_SCROLL_ATTEMPTS,
        }
    }

    pub fn with_max_scroll_attempts(mut self, attempts: u32) -> Self {
        self.max_scroll_attempts = attempts;
        self
    }
}

impl Default for FeedSource {
    fn default() -> Self {
        Self::new()
    }
}

fn listbox(dimension: FilterDimension, searchable: bool, label: fn(&str) -> String) -> FilterStep {
    let root = format!("#filter-{}", dimension.name());
    FilterStep {
        dimension,
        opener: format!("{} [role='combobox']", root),
        search: searchable.then(|| format!("{} input", root)),
        options: format!("{} [role='option']", root),
        selected_class: "is-selected".into(),
        // 検索付きのリストは選択後も開いたまま
        close: searchable.then(|| format!("{} button.listbox-close", root)),
        label,
    }
}

fn plain(value: &str) -> String {
    value.trim().to_string()
}

fn season_label(value: &str) -> String {
    format!("S{}", value.trim())
}

fn week_label(value: &str) -> String {
    format!("W{}", value.trim())
}

impl SetupSource for FeedSource {
    fn name(&self) -> &'static str {
        "Feed"
    }

    fn source_tag(&self) -> &str {
        SOURCE_TAG
    }

    fn login_form(&self) -> LoginForm {
        LoginForm {
            entry_url: self.login_url.clone(),
            open_login: None,
            username: "#email".into(),
            password: "#password".into(),
            submit: "button[type='submit']".into(),
            logged_in: "nav .avatar".into(),
        }
    }

    fn listing_url(&self) -> &str {
        &self.listing_url
    }

    /// シリーズ → 年 → シーズン → 週
    fn filter_plan(&self) -> FilterPlan {
        FilterPlan {
            clear: Some("button[data-action='reset-filters']".into()),
            open_panel: None,
            steps: vec![
                listbox(FilterDimension::Series, true, plain),
                listbox(FilterDimension::Year, false, plain),
                listbox(FilterDimension::Season, false, season_label),
                listbox(FilterDimension::Week, false, week_label),
            ],
            apply: Some("button[data-action='apply-filters']".into()),
        }
    }

    fn listing(&self) -> ListingStrategy {
        ListingStrategy::InfiniteScroll {
            max_attempts: self.max_scroll_attempts,
            settle: SCROLL_SETTLE,
        }
    }

    fn item_selector(&self) -> &str {
        "article.setup-post"
    }

    fn parse_item(&self, element: &ElementInfo) -> Option<ResultDescriptor> {
        let url = element.attr("data-url")?;
        let car = element.attr("data-car").map(str::trim).unwrap_or_default();
        let track = element.attr("data-track").map(str::trim).unwrap_or_default();
        if car.is_empty() || track.is_empty() {
            return None;
        }

        Some(ResultDescriptor {
            title: element
                .attr("data-title")
                .unwrap_or_default()
                .trim()
                .to_string(),
            car: car.to_string(),
            track: track.to_string(),
            season: element.attr("data-season").unwrap_or_default().to_string(),
            week: element.attr("data-week").unwrap_or_default().to_string(),
            year: element.attr("data-year").unwrap_or_default().to_string(),
            detail_url: resolve_url(&self.base_url, url),
        })
    }

    fn download_selector(&self) -> &str {
        ".attachments a[download]"
    }

    fn setup_extension(&self) -> &str {
        "sto"
    }

    fn maps_car_names(&self) -> bool {
        false
    }
}
