//! Interruptible sleep (spec.md §4.1.3).

use crate::cancel::CancellationToken;
use std::time::Duration;

/// Waits for `d` or until `ctx` cancels, whichever comes first. Returns
/// `true` if the full duration elapsed, `false` if cancellation won the
/// race.
pub async fn sleep(ctx: &CancellationToken, d: Duration) -> bool {
    if ctx.cancelled() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(d) => true,
        _ = ctx.wait_done() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_duration_elapses_without_cancellation() {
        let ctx = CancellationToken::new();
        assert!(sleep(&ctx, Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn cancellation_interrupts_sleep() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        assert!(!sleep(&ctx, Duration::from_secs(60)).await);
    }
}
