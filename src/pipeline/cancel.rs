//! キャンセル監視付きの待機

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::ScraperError;

pub fn ensure_active(cancel: &CancellationToken) -> Result<(), ScraperError> {
    if cancel.is_cancelled() {
        Err(ScraperError::Cancelled)
    } else {
        Ok(())
    }
}

/// 処理の前後でキャンセルを確認し、処理中のキャンセルでも即座に戻る
pub async fn guarded<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, ScraperError>
where
    F: Future<Output = Result<T, ScraperError>>,
{
    ensure_active(cancel)?;
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ScraperError::Cancelled),
        result = fut => result,
    };
    ensure_active(cancel)?;
    result
}

/// キャンセル可能なスリープ
pub async fn pace(cancel: &CancellationToken, delay: Duration) -> Result<(), ScraperError> {
    if delay.is_zero() {
        return ensure_active(cancel);
    }
    guarded(cancel, async {
        tokio::time::sleep(delay).await;
        Ok(())
    })
    .await
}
