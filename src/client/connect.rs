//! Channel establishment with a bounded retry/timeout budget.

use std::time::Duration;

use interprocess::local_socket::tokio::prelude::*;
use interprocess::local_socket::GenericNamespaced;
use tokio::time::Instant;
use tracing::debug;

use crate::handshake::Handshake;
use crate::{AppError, Result};

/// Connect budget when this client just performed a cold launch.
pub const COLD_CONNECT_BUDGET: Duration = Duration::from_millis(20_000);

/// Connect budget when the server was already discovered warm.
pub const WARM_CONNECT_BUDGET: Duration = Duration::from_millis(1_000);

/// Delay between connect attempts inside the budget.
const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Establish the local-socket channel for a handshake identity.
///
/// Transient connect failures (listener not up yet, connection refused)
/// recreate the connection attempt and retry while elapsed time stays
/// inside `budget`. A hard timeout on an attempt aborts immediately.
///
/// # Errors
///
/// Returns [`AppError::Connect`] once the budget is exhausted or an attempt
/// times out outright.
pub async fn connect(
    handshake: &Handshake,
    budget: Duration,
) -> Result<interprocess::local_socket::tokio::Stream> {
    let channel = handshake.channel_name();
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let name = channel
            .clone()
            .to_ns_name::<GenericNamespaced>()
            .map_err(|err| AppError::Connect(format!("invalid channel name '{channel}': {err}")))?;

        let remaining = budget.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(AppError::Connect(format!(
                "no connection to '{channel}' within {budget:?} ({attempt} attempts)"
            )));
        }

        match tokio::time::timeout(
            remaining,
            interprocess::local_socket::tokio::Stream::connect(name),
        )
        .await
        {
            Ok(Ok(stream)) => {
                debug!(channel = %channel, attempt, "channel connected");
                return Ok(stream);
            }
            Ok(Err(err)) => {
                debug!(channel = %channel, attempt, %err, "connect attempt failed; retrying");
                tokio::time::sleep(RETRY_DELAY).await;
            }
            Err(_elapsed) => {
                return Err(AppError::Connect(format!(
                    "connect to '{channel}' timed out after {budget:?}"
                )));
            }
        }
    }
}
