//! Cooperative cancellation shared by every stage of a provisioning request.
//!
//! One [`CancellationToken`] is created per top-level request and passed by
//! reference into every component. Components check it before each network
//! attempt, before each chunk or item, and between buffer reads.

use std::thread;
use std::time::{Duration, Instant};

pub use tokio_util::sync::CancellationToken;

use crate::error::{ProvisionError, ProvisionResult};

/// Granularity used when sleeping or polling with a token.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Return `Cancelled` if the token has fired.
pub fn ensure_active(cancel: &CancellationToken) -> ProvisionResult<()> {
    if cancel.is_cancelled() {
        Err(ProvisionError::Cancelled)
    } else {
        Ok(())
    }
}

/// Sleep for `duration`, waking early if the token fires.
pub fn sleep_cancellable(cancel: &CancellationToken, duration: Duration) -> ProvisionResult<()> {
    let deadline = Instant::now() + duration;
    loop {
        ensure_active(cancel)?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        thread::sleep((deadline - now).min(POLL_INTERVAL));
    }
}
