/// Check scheduler
/// Drives the periodic checks from a cron-style expression. Only the subset
/// the watcher actually uses is supported: a minute field of `*/N` (or `*`,
/// or a bare `N` meaning every N minutes) with the remaining four fields `*`.
/// Ticks land on wall-clock minute boundaries in the configured timezone.

use anyhow::{bail, Result};
use chrono::Timelike;
use chrono_tz::Tz;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Parse the schedule expression into an every-N-minutes interval.
pub fn parse_interval(expr: &str) -> Result<u32> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        bail!(
            "Schedule expression must have 5 fields, got {} in {:?}",
            fields.len(),
            expr
        );
    }
    for field in &fields[1..] {
        if *field != "*" {
            bail!(
                "Only minute-interval schedules are supported, {:?} restricts more fields",
                expr
            );
        }
    }

    let minute_field = fields[0];
    let every = if minute_field == "*" {
        1
    } else if let Some(n) = minute_field.strip_prefix("*/") {
        n.parse::<u32>()
            .map_err(|_| anyhow::anyhow!("Invalid minute interval in {:?}", expr))?
    } else {
        minute_field
            .parse::<u32>()
            .map_err(|_| anyhow::anyhow!("Invalid minute field in {:?}", expr))?
    };

    if every == 0 || every > 59 {
        bail!("Minute interval must be between 1 and 59, got {}", every);
    }
    Ok(every)
}

/// Seconds to wait from (minute, second) until the next tick of an
/// every-`every`-minutes schedule. Always strictly positive: a clock sitting
/// exactly on a boundary waits a full interval, that tick already fired.
pub fn seconds_until_next_tick(minute: u32, second: u32, every: u32) -> u64 {
    let remainder = minute % every;
    let wait = (every - remainder) as u64 * 60 - second as u64;
    if wait == 0 {
        every as u64 * 60
    } else {
        wait
    }
}

/// Format a wait for log lines.
pub fn format_wait(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

/// Run the scheduler loop until cancelled. The check closure is awaited to
/// completion before the next wait is computed, so a slow check can never
/// stack a second tick behind itself.
pub async fn run_scheduler<F, Fut>(tz: Tz, every: u32, cancel: CancellationToken, mut check_fn: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    info!("Scheduler started: every {} minute(s), timezone {}", every, tz);

    loop {
        let now = chrono::Utc::now().with_timezone(&tz);
        let wait = Duration::from_secs(seconds_until_next_tick(
            now.minute(),
            now.second(),
            every,
        ));
        debug!("Next check in {}", format_wait(wait));

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = cancel.cancelled() => {
                info!("Scheduler stopping");
                return;
            }
        }

        check_fn().await;
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// The wait is always positive and never more than one interval
        #[test]
        fn wait_is_bounded(minute in 0u32..60, second in 0u32..60, every in 1u32..60) {
            let wait = seconds_until_next_tick(minute, second, every);
            prop_assert!(wait >= 1);
            prop_assert!(wait <= every as u64 * 60);
        }

        /// Advancing the clock by the computed wait lands on a tick boundary
        #[test]
        fn wait_lands_on_boundary(minute in 0u32..60, second in 0u32..60, every in 1u32..60) {
            let wait = seconds_until_next_tick(minute, second, every);
            let total = minute as u64 * 60 + second as u64 + wait;
            prop_assert_eq!(total % (every as u64 * 60), 0);
        }

        /// parse_interval never panics on arbitrary input
        #[test]
        fn parse_never_panics(expr in ".{0,40}") {
            let _ = parse_interval(&expr);
        }

        /// Valid expressions always parse back to their interval
        #[test]
        fn valid_expressions_round_trip(every in 1u32..60) {
            let expr = format!("*/{} * * * *", every);
            prop_assert_eq!(parse_interval(&expr).unwrap(), every);
        }
    }
}
