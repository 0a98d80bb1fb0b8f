//! ログイン処理

use base64::Engine;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::ScraperError;
use crate::traits::{DomAdapter, SetupSource};
use crate::types::TabId;

use super::cancel::{ensure_active, guarded, pace};

/// ログイン済みの一覧ページ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingView {
    pub tab: TabId,
}

/// ログインして一覧ページを開く
///
/// ログイン後の画面が制限時間内に出なければ `Authentication` を返す。
pub async fn login(
    dom: &dyn DomAdapter,
    source: &dyn SetupSource,
    config: &SyncConfig,
) -> Result<ListingView, ScraperError> {
    let cancel = &config.cancel;
    let form = source.login_form();
    info!("Starting login to {}", source.name());

    ensure_active(cancel)?;
    let tab = guarded(cancel, dom.open_tab("about:blank")).await?;
    guarded(cancel, dom.goto(tab, &form.entry_url)).await?;
    debug!("Entry page loaded: {}", form.entry_url);

    if let Some(open_login) = &form.open_login {
        guarded(cancel, dom.wait_for(tab, open_login, config.timeout))
            .await
            .map_err(as_auth_error("login link"))?;
        guarded(cancel, dom.click(tab, open_login, 0)).await?;
        guarded(cancel, dom.wait_for_navigation(tab)).await?;
        pace(cancel, config.step_delay).await?;
    }

    guarded(cancel, dom.wait_for(tab, &form.username, config.timeout))
        .await
        .map_err(as_auth_error("login form"))?;

    // 認証情報を送る直前にもう一度確認
    ensure_active(cancel)?;
    guarded(cancel, dom.fill(tab, &form.username, &config.user_id)).await?;
    guarded(cancel, dom.fill(tab, &form.password, &config.password)).await?;
    debug!("Credentials entered");

    guarded(cancel, dom.click(tab, &form.submit, 0))
        .await
        .map_err(as_auth_error("login button"))?;
    guarded(cancel, dom.wait_for_navigation(tab)).await?;

    let logged_in = guarded(cancel, dom.wait_for(tab, &form.logged_in, config.timeout)).await;
    if let Err(e) = logged_in {
        if e.is_cancelled() {
            return Err(e);
        }
        if config.debug {
            capture_debug_screenshot(dom, tab).await;
        }
        return Err(ScraperError::Authentication(format!(
            "post-login page did not appear for user {}: {}",
            config.user_id, e
        )));
    }
    info!("Login successful");

    guarded(cancel, dom.goto(tab, source.listing_url())).await?;
    pace(cancel, config.step_delay).await?;
    debug!("Listing page opened: {}", source.listing_url());

    Ok(ListingView { tab })
}

fn as_auth_error(what: &'static str) -> impl Fn(ScraperError) -> ScraperError {
    move |e| match e {
        ScraperError::Cancelled => ScraperError::Cancelled,
        ScraperError::Timeout(msg) | ScraperError::ElementNotFound(msg) => {
            ScraperError::Authentication(format!("{} not available: {}", what, msg))
        }
        other => other,
    }
}

async fn capture_debug_screenshot(dom: &dyn DomAdapter, tab: TabId) {
    match dom.screenshot(tab).await {
        Ok(png) => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
            debug!("Login failure screenshot: data:image/png;base64,{}", encoded);
        }
        Err(e) => warn!("Failed to capture login screenshot: {}", e),
    }
}
