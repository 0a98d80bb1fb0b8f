//! chromiumoxide による `DomAdapter`

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    DownloadProgressState, EventDownloadProgress, EventDownloadWillBegin,
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::ScraperError;
use crate::traits::DomAdapter;
use crate::types::{DownloadedFile, ElementInfo, TabId};

/// ブラウザが保存する先（`download_path` の下）
const INCOMING_DIR: &str = ".incoming";

pub struct ChromiumAdapter {
    browser: Mutex<Option<Browser>>,
    handler: Mutex<Option<JoinHandle<()>>>,
    tabs: Mutex<HashMap<u64, Page>>,
    next_tab: AtomicU64,
    download_dir: PathBuf,
    user_data_dir: PathBuf,
}

impl ChromiumAdapter {
    /// ブラウザを起動し、ダウンロードを `download_path/.incoming` に向ける
    pub async fn launch(config: &SyncConfig) -> Result<Self, ScraperError> {
        info!("Launching browser (headless={})", config.headless);

        let download_dir = incoming_dir(&config.download_path);
        std::fs::create_dir_all(&download_dir)?;
        let download_dir = download_dir.canonicalize().unwrap_or(download_dir);

        // 同時実行でプロファイルが衝突しないように
        let user_data_dir = std::env::temp_dir().join(format!(
            "setup-sync-{}-{:08x}",
            std::process::id(),
            rand::random::<u32>()
        ));

        let chrome_path = std::env::var("CHROME_PATH")
            .or_else(|_| std::env::var("CHROMIUM_PATH"))
            .unwrap_or_else(|_| "chromium".to_string());

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .user_data_dir(&user_data_dir)
            .window_size(1280, 900)
            .request_timeout(config.timeout);

        if !config.headless {
            builder = builder.with_head();
        }

        builder = builder
            .no_sandbox()
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu");

        if config.debug {
            builder = builder.arg("--enable-logging=stderr").arg("--v=1");
        }

        let browser_config = builder
            .build()
            .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {:?}", e);
                }
            }
        });

        let params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::AllowAndName)
            .download_path(download_dir.to_string_lossy().to_string())
            .events_enabled(true)
            .build()
            .map_err(|e| ScraperError::BrowserInit(format!("download behavior: {}", e)))?;
        browser
            .execute(params)
            .await
            .map_err(|e| ScraperError::BrowserInit(format!("download behavior: {}", e)))?;

        info!("Browser ready, downloads go to {:?}", download_dir);
        Ok(Self {
            browser: Mutex::new(Some(browser)),
            handler: Mutex::new(Some(handler_task)),
            tabs: Mutex::new(HashMap::new()),
            next_tab: AtomicU64::new(1),
            download_dir,
            user_data_dir,
        })
    }

    async fn page(&self, tab: TabId) -> Result<Page, ScraperError> {
        self.tabs
            .lock()
            .await
            .get(&tab.0)
            .cloned()
            .ok_or_else(|| ScraperError::Navigation(format!("tab {} is not open", tab.0)))
    }

    async fn eval_string(&self, page: &Page, script: String) -> Result<String, ScraperError> {
        page.evaluate(script)
            .await
            .map_err(|e| ScraperError::JavaScript(e.to_string()))?
            .into_value::<String>()
            .map_err(ScraperError::from)
    }
}

pub(crate) fn incoming_dir(download_path: &Path) -> PathBuf {
    download_path.join(INCOMING_DIR)
}

/// 一致する全要素のテキストと属性を1回の評価で取得するスクリプト
fn locate_script(selector: &str) -> Result<String, ScraperError> {
    let selector = serde_json::to_string(selector)?;
    Ok(format!(
        r#"
        (function() {{
            var nodes = document.querySelectorAll({});
            var out = [];
            for (var i = 0; i < nodes.length; i++) {{
                var el = nodes[i];
                var attrs = {{}};
                for (var j = 0; j < el.attributes.length; j++) {{
                    attrs[el.attributes[j].name] = el.attributes[j].value;
                }}
                out.push({{ text: (el.innerText || el.textContent || '').trim(), attributes: attrs }});
            }}
            return JSON.stringify(out);
        }})()
        "#,
        selector
    ))
}

fn clear_value_script(selector: &str) -> Result<String, ScraperError> {
    let selector = serde_json::to_string(selector)?;
    Ok(format!(
        "(function() {{ var el = document.querySelector({}); if (el) {{ el.value = ''; }} return ''; }})()",
        selector
    ))
}

#[async_trait]
impl DomAdapter for ChromiumAdapter {
    async fn open_tab(&self, url: &str) -> Result<TabId, ScraperError> {
        let page = {
            let browser = self.browser.lock().await;
            let browser = browser
                .as_ref()
                .ok_or_else(|| ScraperError::BrowserInit("browser is closed".into()))?;
            browser
                .new_page(url)
                .await
                .map_err(|e| ScraperError::Navigation(format!("{}: {}", url, e)))?
        };
        let id = self.next_tab.fetch_add(1, Ordering::Relaxed);
        self.tabs.lock().await.insert(id, page);
        debug!("Opened tab {} at {}", id, url);
        Ok(TabId(id))
    }

    async fn close_tab(&self, tab: TabId) -> Result<(), ScraperError> {
        let page = self.tabs.lock().await.remove(&tab.0);
        if let Some(page) = page {
            page.close()
                .await
                .map_err(|e| ScraperError::Navigation(format!("close tab {}: {}", tab.0, e)))?;
            debug!("Closed tab {}", tab.0);
        }
        Ok(())
    }

    async fn goto(&self, tab: TabId, url: &str) -> Result<(), ScraperError> {
        let page = self.page(tab).await?;
        page.goto(url)
            .await
            .map_err(|e| ScraperError::Navigation(format!("{}: {}", url, e)))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| ScraperError::Navigation(e.to_string()))?;
        Ok(())
    }

    async fn wait_for_navigation(&self, tab: TabId) -> Result<(), ScraperError> {
        let page = self.page(tab).await?;
        page.wait_for_navigation()
            .await
            .map_err(|e| ScraperError::Navigation(e.to_string()))?;
        Ok(())
    }

    async fn locate(&self, tab: TabId, selector: &str) -> Result<Vec<ElementInfo>, ScraperError> {
        let page = self.page(tab).await?;
        let json = self.eval_string(&page, locate_script(selector)?).await?;
        let elements: Vec<ElementInfo> = serde_json::from_str(&json)?;
        debug!("locate '{}' -> {} element(s)", selector, elements.len());
        Ok(elements)
    }

    async fn click(&self, tab: TabId, selector: &str, index: usize) -> Result<(), ScraperError> {
        let page = self.page(tab).await?;
        let elements = page
            .find_elements(selector)
            .await
            .map_err(|e| ScraperError::ElementNotFound(format!("{}: {}", selector, e)))?;
        let element = elements
            .get(index)
            .ok_or_else(|| ScraperError::ElementNotFound(format!("{}[{}]", selector, index)))?;
        element
            .scroll_into_view()
            .await
            .map_err(|e| ScraperError::JavaScript(format!("{}: {}", selector, e)))?;
        element
            .click()
            .await
            .map_err(|e| ScraperError::JavaScript(format!("click {}: {}", selector, e)))?;
        Ok(())
    }

    async fn fill(&self, tab: TabId, selector: &str, value: &str) -> Result<(), ScraperError> {
        let page = self.page(tab).await?;
        self.eval_string(&page, clear_value_script(selector)?).await?;
        page.find_element(selector)
            .await
            .map_err(|e| ScraperError::ElementNotFound(format!("{}: {}", selector, e)))?
            .click()
            .await
            .map_err(|e| ScraperError::JavaScript(format!("focus {}: {}", selector, e)))?
            .type_str(value)
            .await
            .map_err(|e| ScraperError::JavaScript(format!("type into {}: {}", selector, e)))?;
        Ok(())
    }

    async fn scroll_to_bottom(&self, tab: TabId) -> Result<(), ScraperError> {
        let page = self.page(tab).await?;
        self.eval_string(
            &page,
            "(function() { window.scrollTo(0, document.body.scrollHeight); return ''; })()".into(),
        )
        .await?;
        Ok(())
    }

    async fn wait_for_download(
        &self,
        tab: TabId,
        selector: &str,
        index: usize,
        timeout: Duration,
    ) -> Result<DownloadedFile, ScraperError> {
        // クリック前に購読しておかないと開始イベントを取りこぼす
        let (mut begins, mut progress) = {
            let browser = self.browser.lock().await;
            let browser = browser
                .as_ref()
                .ok_or_else(|| ScraperError::BrowserInit("browser is closed".into()))?;
            let begins = browser
                .event_listener::<EventDownloadWillBegin>()
                .await
                .map_err(|e| ScraperError::Download(e.to_string()))?;
            let progress = browser
                .event_listener::<EventDownloadProgress>()
                .await
                .map_err(|e| ScraperError::Download(e.to_string()))?;
            (begins, progress)
        };

        self.click(tab, selector, index).await?;

        let download_dir = &self.download_dir;
        let wait = async move {
            let begin = begins
                .next()
                .await
                .ok_or_else(|| ScraperError::Download("download events closed".into()))?;
            debug!(
                "Download started: {} (guid {})",
                begin.suggested_filename, begin.guid
            );

            while let Some(event) = progress.next().await {
                if event.guid != begin.guid {
                    continue;
                }
                match event.state {
                    DownloadProgressState::Completed => {
                        return Ok(DownloadedFile {
                            path: download_dir.join(&begin.guid),
                            suggested_filename: begin.suggested_filename.clone(),
                        });
                    }
                    DownloadProgressState::Canceled => {
                        return Err(ScraperError::Download(format!(
                            "browser cancelled download of {}",
                            begin.suggested_filename
                        )));
                    }
                    _ => {}
                }
            }
            Err(ScraperError::Download("download events closed".into()))
        };

        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            ScraperError::Timeout(format!(
                "download from '{}' did not finish within {}s",
                selector,
                timeout.as_secs()
            ))
        })?
    }

    async fn screenshot(&self, tab: TabId) -> Result<Vec<u8>, ScraperError> {
        let page = self.page(tab).await?;
        page.screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .map_err(|e| ScraperError::JavaScript(format!("screenshot: {}", e)))
    }

    /// 何度呼んでもよい
    async fn shutdown(&self) -> Result<(), ScraperError> {
        let pages: Vec<Page> = self.tabs.lock().await.drain().map(|(_, p)| p).collect();
        for page in pages {
            if let Err(e) = page.close().await {
                debug!("Failed to close tab during shutdown: {}", e);
            }
        }

        let browser = self.browser.lock().await.take();
        if let Some(mut browser) = browser {
            info!("Closing browser");
            if let Err(e) = browser.close().await {
                warn!("Failed to close browser cleanly: {}", e);
            }
            if let Err(e) = browser.wait().await {
                debug!("Browser process wait failed: {}", e);
            }
        }

        if let Some(handler) = self.handler.lock().await.take() {
            handler.abort();
        }

        if self.user_data_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.user_data_dir) {
                debug!("Failed to remove browser profile {:?}: {}", self.user_data_dir, e);
            }
        }
        Ok(())
    }
}
