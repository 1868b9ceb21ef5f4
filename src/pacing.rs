//! Pauses between remote calls.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Sleep for `delay` unless `cancel` fires first. Zero delays return at once.
pub(crate) async fn pause(delay: Duration, cancel: &CancellationToken) {
    if delay.is_zero() {
        return;
    }
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(delay) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_cancelled_pause_returns_early() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let start = Instant::now();
        pause(Duration::from_secs(30), &cancel).await;
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_waits_full_delay() {
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();
        pause(Duration::from_millis(250), &cancel).await;
        assert!(start.elapsed() >= Duration::from_millis(250));
    }
}
