use crate::traits::SetupSource;
use crate::types::{
    resolve_url, ElementInfo, FilterDimension, FilterPlan, FilterStep, ListingStrategy,
    LoginForm, PagedSelectors, ResultDescriptor,
};

pub const DEFAULT_BASE_URL: &str = "https://catalog.setupmarket.net";
const LISTING_PATH: &str = "/setups";
const SOURCE_TAG: &str = "Catalog";

pub struct CatalogSource {
    base_url: String,
    listing_url: String,
}

impl CatalogSource {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// ステージング環境などに向ける場合
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let listing_url = format!("{}{}", base_url, LISTING_PATH);
        Self {
            base_url,
            listing_url,
        }
    }
}

impl Default for CatalogSource {
    fn default() -> Self {
        Self::new()
    }
}

fn dropdown(dimension: FilterDimension, searchable: bool, label: fn(&str) -> String) -> FilterStep {
    let scope = format!("[data-filter='{}']", dimension.name());
    FilterStep {
        dimension,
        opener: format!("{} .dropdown-toggle", scope),
        search: searchable.then(|| format!("{} input[type='search']", scope)),
        options: format!("{} .dropdown-item", scope),
        selected_class: "active".into(),
        close: None,
        label,
    }
}

fn year_label(value: &str) -> String {
    value.trim().to_string()
}

fn season_label(value: &str) -> String {
    format!("Season {}", value.trim())
}

fn week_label(value: &str) -> String {
    format!("Week {}", value.trim())
}

fn series_label(value: &str) -> String {
    value.trim().to_string()
}

impl SetupSource for CatalogSource {
    fn name(&self) -> &'static str {
        "Catalog"
    }

    fn source_tag(&self) -> &str {
        SOURCE_TAG
    }

    fn login_form(&self) -> LoginForm {
        LoginForm {
            entry_url: self.base_url.clone(),
            open_login: Some("a[href*='/login']".into()),
            username: "input[name='email']".into(),
            password: "input[name='password']".into(),
            submit: "form button[type='submit']".into(),
            logged_in: ".navbar .user-menu".into(),
        }
    }

    fn listing_url(&self) -> &str {
        &self.listing_url
    }

    /// 年 → シーズン → 週 → シリーズ
    ///
    /// シリーズの候補は前の3項目で絞り込まれるため最後に選ぶ。
    fn filter_plan(&self) -> FilterPlan {
        FilterPlan {
            clear: Some("button.clear-filters".into()),
            open_panel: Some("button.filter-toggle".into()),
            steps: vec![
                dropdown(FilterDimension::Year, false, year_label),
                dropdown(FilterDimension::Season, false, season_label),
                dropdown(FilterDimension::Week, false, week_label),
                dropdown(FilterDimension::Series, true, series_label),
            ],
            apply: Some("button.apply-filters".into()),
        }
    }

    fn listing(&self) -> ListingStrategy {
        ListingStrategy::Paged(PagedSelectors {
            page_buttons: ".pagination .page-item:not(.prev):not(.next) .page-link".into(),
            active_page: ".pagination .page-item.active .page-link".into(),
            next: ".pagination .page-item.next".into(),
            previous: ".pagination .page-item.prev".into(),
        })
    }

    fn item_selector(&self) -> &str {
        "a.setup-card"
    }

    fn parse_item(&self, element: &ElementInfo) -> Option<ResultDescriptor> {
        let href = element.attr("href")?;
        let car = element.attr("data-car")?.trim();
        let track = element.attr("data-track")?.trim();
        if car.is_empty() || track.is_empty() {
            return None;
        }

        let title = element
            .attr("title")
            .map(str::to_string)
            .or_else(|| {
                element
                    .text
                    .lines()
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_default();

        Some(ResultDescriptor {
            title,
            car: car.to_string(),
            track: track.to_string(),
            season: element.attr("data-season").unwrap_or_default().to_string(),
            week: element.attr("data-week").unwrap_or_default().to_string(),
            year: element.attr("data-year").unwrap_or_default().to_string(),
            detail_url: resolve_url(&self.base_url, href),
        })
    }

    fn download_selector(&self) -> &str {
        "a.download-setup"
    }

    fn setup_extension(&self) -> &str {
        "sto"
    }
}
