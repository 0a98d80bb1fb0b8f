use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::ScraperError;
use crate::mapping::MappingTables;

/// 検索フィルター（シリーズ・シーズン・週・年）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupFilter {
    pub series: String,
    pub season: String,
    pub week: String,
    pub year: String,
}

impl SetupFilter {
    pub fn new(
        series: impl Into<String>,
        season: impl Into<String>,
        week: impl Into<String>,
        year: impl Into<String>,
    ) -> Self {
        Self {
            series: series.into(),
            season: season.into(),
            week: week.into(),
            year: year.into(),
        }
    }
}

/// 1回の同期実行の設定。実行中は変更しない。
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub user_id: String,
    pub password: String,
    pub filter: SetupFilter,
    /// 整理済みセットアップの出力先ルート
    pub destination_root: PathBuf,
    pub teams: Vec<String>,
    pub headless: bool,
    pub mappings: MappingTables,
    pub cancel: CancellationToken,
    /// ブラウザのダウンロード先（一時置き場）
    pub download_path: PathBuf,
    pub timeout: Duration,
    pub download_timeout: Duration,
    /// アイテム間の待機
    pub item_delay: Duration,
    /// UI操作ごとの待機
    pub step_delay: Duration,
    pub debug: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            password: String::new(),
            filter: SetupFilter::default(),
            destination_root: PathBuf::new(),
            teams: Vec::new(),
            headless: true,
            mappings: MappingTables::default(),
            cancel: CancellationToken::new(),
            download_path: std::env::temp_dir().join("setup-sync").join("downloads"),
            timeout: Duration::from_secs(60),
            download_timeout: Duration::from_secs(60),
            item_delay: Duration::from_secs(1),
            step_delay: Duration::from_millis(500),
            debug: false,
        }
    }
}

impl SyncConfig {
    pub fn new(user_id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: SetupFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_destination_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.destination_root = path.into();
        self
    }

    pub fn with_teams<I, S>(mut self, teams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.teams = teams.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_mappings(mut self, mappings: MappingTables) -> Self {
        self.mappings = mappings;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_download_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_path = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// 必須項目の確認（値の中身までは検証しない）
    pub fn validate(&self) -> Result<(), ScraperError> {
        let required = [
            ("user_id", self.user_id.as_str()),
            ("password", self.password.as_str()),
            ("series", self.filter.series.as_str()),
            ("season", self.filter.season.as_str()),
            ("week", self.filter.week.as_str()),
            ("year", self.filter.year.as_str()),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ScraperError::InvalidConfig(format!("{} is empty", name)));
            }
        }
        if self.destination_root.as_os_str().is_empty() {
            return Err(ScraperError::InvalidConfig(
                "destination_root is not set".into(),
            ));
        }
        Ok(())
    }
}
