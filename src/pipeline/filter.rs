//! 検索フィルターの適用
//!
//! サイトは選択ごとに残りの選択肢を再計算するので、
//! `FilterPlan` の順序を変えずにそのまま操作する。

use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::error::ScraperError;
use crate::traits::DomAdapter;
use crate::types::{ElementInfo, FilterPlan, FilterStep, TabId};

use super::cancel::{guarded, pace};

/// クリア → パネルを開く → 各項目を選択 → 適用
pub async fn apply_filter(
    dom: &dyn DomAdapter,
    tab: TabId,
    plan: &FilterPlan,
    config: &SyncConfig,
) -> Result<(), ScraperError> {
    let cancel = &config.cancel;
    info!(
        "Applying filter: series={}, season={}, week={}, year={}",
        config.filter.series, config.filter.season, config.filter.week, config.filter.year
    );

    if let Some(clear) = &plan.clear {
        // フィルター未設定時はクリアボタンが出ない
        let present = guarded(cancel, dom.locate(tab, clear)).await?;
        if !present.is_empty() {
            guarded(cancel, dom.click(tab, clear, 0)).await?;
            pace(cancel, config.step_delay).await?;
            debug!("Filters cleared");
        }
    }

    if let Some(open_panel) = &plan.open_panel {
        guarded(cancel, dom.wait_for(tab, open_panel, config.timeout))
            .await
            .map_err(as_filter_error)?;
        guarded(cancel, dom.click(tab, open_panel, 0)).await?;
        pace(cancel, config.step_delay).await?;
    }

    for step in &plan.steps {
        let value = step.dimension.value(&config.filter);
        select_option(dom, tab, step, value, config).await?;
    }

    if let Some(apply) = &plan.apply {
        guarded(cancel, dom.click(tab, apply, 0))
            .await
            .map_err(as_filter_error)?;
        guarded(cancel, dom.wait_for_navigation(tab)).await?;
        pace(cancel, config.step_delay).await?;
    }

    info!("Filter applied");
    Ok(())
}

/// 1項目の選択: 開く → 検索 → 未選択の一致候補をクリック → 閉じる
async fn select_option(
    dom: &dyn DomAdapter,
    tab: TabId,
    step: &FilterStep,
    value: &str,
    config: &SyncConfig,
) -> Result<(), ScraperError> {
    let cancel = &config.cancel;
    let label = (step.label)(value);
    debug!("Selecting {} '{}'", step.dimension.name(), label);

    guarded(cancel, dom.wait_for(tab, &step.opener, config.timeout))
        .await
        .map_err(as_filter_error)?;
    guarded(cancel, dom.click(tab, &step.opener, 0)).await?;

    if let Some(search) = &step.search {
        guarded(cancel, dom.fill(tab, search, &label)).await?;
        pace(cancel, config.step_delay).await?;
    }

    // 検索で全て除外されると候補リスト自体が出ない
    guarded(cancel, dom.wait_for(tab, &step.options, config.timeout))
        .await
        .map_err(|e| match as_filter_error(e) {
            ScraperError::Filter(msg) => ScraperError::Filter(format!(
                "no {} option matching '{}': {}",
                step.dimension.name(),
                label,
                msg
            )),
            other => other,
        })?;
    let options = guarded(cancel, dom.locate(tab, &step.options)).await?;

    match pick_option(&options, &label, &step.selected_class) {
        Pick::Click(index) => {
            guarded(cancel, dom.click(tab, &step.options, index)).await?;
            pace(cancel, config.step_delay).await?;
        }
        Pick::AlreadySelected => {
            debug!("{} '{}' already selected", step.dimension.name(), label);
        }
        Pick::Missing => {
            return Err(ScraperError::Filter(format!(
                "no {} option matching '{}'",
                step.dimension.name(),
                label
            )));
        }
    }

    if let Some(close) = &step.close {
        guarded(cancel, dom.click(tab, close, 0)).await?;
    }
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum Pick {
    Click(usize),
    AlreadySelected,
    Missing,
}

/// 完全一致を優先し、なければ部分一致。選択済みの候補は飛ばす。
fn pick_option(options: &[ElementInfo], label: &str, selected_class: &str) -> Pick {
    let wanted = label.trim().to_lowercase();
    let is_selected =
        |o: &ElementInfo| o.has_class(selected_class) || o.attr("aria-selected") == Some("true");

    let exact: Vec<usize> = options
        .iter()
        .enumerate()
        .filter(|(_, o)| o.text.trim().to_lowercase() == wanted)
        .map(|(i, _)| i)
        .collect();
    let candidates = if exact.is_empty() {
        options
            .iter()
            .enumerate()
            .filter(|(_, o)| o.text.to_lowercase().contains(&wanted))
            .map(|(i, _)| i)
            .collect()
    } else {
        exact
    };

    if candidates.is_empty() {
        return Pick::Missing;
    }
    candidates
        .iter()
        .copied()
        .find(|&i| !is_selected(&options[i]))
        .map(Pick::Click)
        .unwrap_or(Pick::AlreadySelected)
}

fn as_filter_error(e: ScraperError) -> ScraperError {
    match e {
        ScraperError::Timeout(msg) | ScraperError::ElementNotFound(msg) => {
            ScraperError::Filter(msg)
        }
        other => other,
    }
}
