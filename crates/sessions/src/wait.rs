//! Bounded polling helper.

use std::{future::Future, time::Duration};

use tokio::time::{Instant, sleep_until};

/// Poll `check` every `interval` until it returns `true` or `deadline`
/// passes. Returns whether the condition was met.
///
/// The first check runs immediately, so an already-satisfied condition never
/// waits.
pub async fn poll_until<F, Fut>(interval: Duration, deadline: Instant, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    loop {
        if check().await {
            return true;
        }
        let next = Instant::now() + interval;
        if next > deadline {
            return false;
        }
        sleep_until(next).await;
    }
}
