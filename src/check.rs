/// Check cycle orchestration
/// One check is one pass of fetch, extract, decide, notify, recorded into the
/// metrics under a single-outcome tag. Checks never overlap: a tick that
/// arrives while one is in flight is skipped, and the busy flag is released
/// on every exit path via a drop guard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::decide::{self, Outcome};
use crate::fetch::{FetchClient, FetchError};
use crate::health::CheckMetrics;
use crate::notify::{self, Notifier};
use crate::parser::{SchedulerLabelParser, SlotParser};
use crate::store::{AppointmentStore, ReferenceAppointment};

/// What one check tick amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Another check was still in flight.
    SkippedBusy,
    /// No reference appointment is set; nothing to compare against.
    SkippedNoReference,
    /// The page listed no slots.
    NoCandidates,
    /// An earlier slot was found and every channel was told.
    EarlierFound,
    /// Slots exist but none beats the reference.
    NoEarlierFound,
    /// The fetch failed.
    Failed,
}

/// Everything a check needs, shared between the scheduler tick, the command
/// handler and the supervisor.
pub struct AppContext {
    pub config: Arc<Config>,
    pub store: AppointmentStore,
    pub notifier: Notifier,
    pub metrics: Arc<CheckMetrics>,
    pub parser: Box<dyn SlotParser>,
    fetcher: FetchClient,
    reference: RwLock<Option<ReferenceAppointment>>,
    running: AtomicBool,
}

impl AppContext {
    pub fn new(
        config: Arc<Config>,
        notifier: Notifier,
        metrics: Arc<CheckMetrics>,
        reference: Option<ReferenceAppointment>,
    ) -> Result<Self, FetchError> {
        let fetcher = FetchClient::new(&config)?;
        let parser = Box::new(SchedulerLabelParser::new(config.timezone));
        Ok(Self {
            store: AppointmentStore::new(config.appointment_file.clone()),
            notifier,
            metrics,
            parser,
            fetcher,
            reference: RwLock::new(reference),
            running: AtomicBool::new(false),
            config,
        })
    }

    /// Snapshot of the current reference appointment.
    pub fn reference(&self) -> Option<ReferenceAppointment> {
        self.reference.read().unwrap().clone()
    }

    /// Replace the reference appointment. The caller persists it separately.
    pub fn set_reference(&self, appointment: ReferenceAppointment) {
        *self.reference.write().unwrap() = Some(appointment);
    }
}

/// Clears the busy flag when the check leaves scope, panics included.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Run one check and record its outcome.
pub async fn run_check(ctx: &AppContext) -> CheckOutcome {
    let outcome = perform_check(ctx).await;
    ctx.metrics.record(&outcome);
    debug!("Check outcome: {:?}", outcome);
    outcome
}

async fn perform_check(ctx: &AppContext) -> CheckOutcome {
    if ctx
        .running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        warn!("Previous check still running, skipping this tick");
        return CheckOutcome::SkippedBusy;
    }
    let _guard = RunGuard(&ctx.running);

    // Resolved before any network traffic
    let reference = match ctx.reference() {
        Some(r) => r,
        None => {
            info!("No reference appointment set, use /set first");
            return CheckOutcome::SkippedNoReference;
        }
    };

    info!(
        "Checking for slots earlier than {}",
        reference
            .date
            .with_timezone(&reference.timezone)
            .format("%Y-%m-%d")
    );

    let document = match ctx.fetcher.fetch_availability().await {
        Ok(d) => d,
        Err(e) => {
            error!("Availability fetch failed: {}", e);
            // Best effort, the outcome is Failed either way
            ctx.notifier
                .send_chat(&format!("⚠️ Appointment check failed: {}", e))
                .await;
            return CheckOutcome::Failed;
        }
    };

    let candidates = ctx.parser.extract(&document);
    debug!("Extracted {} candidate slot(s)", candidates.len());

    match decide::decide(&reference, &candidates) {
        Outcome::NoCandidates => {
            // Nothing on offer is the common case; log it, do not notify
            info!("No slots listed on the booking page");
            CheckOutcome::NoCandidates
        }
        Outcome::Earlier(slot) => {
            // The stored reference stays as-is: it tracks the appointment the
            // user actually holds, not the best one seen.
            ctx.notifier.notify_found(&reference, &slot).await;
            CheckOutcome::EarlierFound
        }
        Outcome::NotEarlier(slot) => {
            let message = notify::format_no_earlier_message(&reference, &slot, ctx.config.timezone);
            info!("{}", message);
            ctx.notifier.send_chat(&message).await;
            CheckOutcome::NoEarlierFound
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DEFAULT_COMPARISON_TIME;
    use crate::supervisor::BotLink;
    use chrono::{TimeZone, Utc};
    use chrono_tz::Africa::Nairobi;
    use std::collections::HashMap;

    fn test_context(booking_url: &str, reference: Option<ReferenceAppointment>) -> AppContext {
        let mut env = HashMap::new();
        env.insert("BOT_TOKEN", "t");
        env.insert("CHAT_ID", "1");
        env.insert("TIMEZONE", "Africa/Nairobi");
        let mut config = Config::from_map(&env).unwrap();
        config.booking_url = booking_url.to_string();

        let config = Arc::new(config);
        let notifier = Notifier::new(&config, Arc::new(BotLink::new())).unwrap();
        AppContext::new(config, notifier, Arc::new(CheckMetrics::new()), reference).unwrap()
    }

    fn sample_reference() -> ReferenceAppointment {
        ReferenceAppointment {
            date: Nairobi
                .with_ymd_and_hms(2025, 12, 31, 0, 0, 0)
                .unwrap()
                .with_timezone(&Utc),
            comparison_time: DEFAULT_COMPARISON_TIME.to_string(),
            original_input: "31/12/2025".to_string(),
            saved_at: Utc::now(),
            timezone: Nairobi,
        }
    }

    #[tokio::test]
    async fn test_busy_guard_skips_overlapping_check() {
        let ctx = test_context("http://127.0.0.1:9/", Some(sample_reference()));
        ctx.running.store(true, Ordering::SeqCst);

        assert_eq!(run_check(&ctx).await, CheckOutcome::SkippedBusy);
        // The skipped check must not release a flag it never acquired
        assert!(ctx.running.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_no_reference_skips_before_network() {
        // An unroutable URL would hang or error if contacted; the check must
        // bail out before the fetch even starts.
        let ctx = test_context("http://127.0.0.1:9/", None);
        assert_eq!(run_check(&ctx).await, CheckOutcome::SkippedNoReference);
        assert_eq!(ctx.metrics.status().skipped_no_reference, 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_yields_failed_and_releases_guard() {
        let ctx = test_context("http://127.0.0.1:9/", Some(sample_reference()));
        assert_eq!(run_check(&ctx).await, CheckOutcome::Failed);
        assert!(!ctx.running.load(Ordering::SeqCst));
        assert_eq!(ctx.metrics.status().failed, 1);

        // A second check is allowed immediately
        assert_eq!(run_check(&ctx).await, CheckOutcome::Failed);
        assert_eq!(ctx.metrics.status().failed, 2);
    }

    #[tokio::test]
    async fn test_set_reference_replaces_snapshot() {
        let ctx = test_context("http://127.0.0.1:9/", None);
        assert!(ctx.reference().is_none());
        ctx.set_reference(sample_reference());
        assert_eq!(ctx.reference().unwrap().original_input, "31/12/2025");
    }

    #[test]
    fn test_run_guard_releases_on_drop() {
        let flag = AtomicBool::new(true);
        {
            let _guard = RunGuard(&flag);
        }
        assert!(!flag.load(Ordering::SeqCst));
    }
}
