/// Telegram transport supervisor
/// Owns the long-lived bot connection: bounded-retry initialization, a
/// readiness flag the notifier consults, and reconnect-on-fatal-error for the
/// command polling loop. Exactly one initialization attempt may be in flight
/// at a time, and the polling loop is attached at most once for the lifetime
/// of the process, reconnects included.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::check::AppContext;
use crate::commands;
use crate::telegram::TelegramApi;

pub const MAX_INIT_ATTEMPTS: u32 = 5;
pub const INIT_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Consecutive getUpdates failures treated as a fatal transport fault.
pub const FATAL_POLL_FAILURES: u32 = 3;

/// Pause after a non-fatal polling failure.
const POLL_FAILURE_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Ready,
    Reconnecting,
    Failed,
    Stopped,
}

/// Tagged result of a bounded initialization run.
#[derive(Debug, PartialEq, Eq)]
pub enum InitOutcome {
    Ready,
    ExhaustedRetries,
    /// Another caller holds the single-flight guard; its run decides the state.
    AlreadyInitializing,
}

/// Shared transport handle. The notifier reads the readiness flag and a
/// clone of the API client; the supervisor is the only writer.
pub struct BotLink {
    state: RwLock<ConnectionState>,
    api: RwLock<Option<TelegramApi>>,
    init_in_flight: AtomicBool,
    poller_attached: AtomicBool,
}

impl BotLink {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Uninitialized),
            api: RwLock::new(None),
            init_in_flight: AtomicBool::new(false),
            poller_attached: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read().unwrap()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Clone of the current API client, if any.
    pub fn api(&self) -> Option<TelegramApi> {
        self.api.read().unwrap().clone()
    }

    pub fn stop(&self) {
        *self.state.write().unwrap() = ConnectionState::Stopped;
        *self.api.write().unwrap() = None;
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write().unwrap() = state;
    }

    fn install(&self, api: TelegramApi) {
        *self.api.write().unwrap() = Some(api);
        self.set_state(ConnectionState::Ready);
    }

    fn teardown(&self) {
        *self.api.write().unwrap() = None;
    }
}

impl Default for BotLink {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize the transport with a bounded retry loop. Each attempt builds a
/// fresh client and probes liveness with getMe; partial state is torn down on
/// failure. Concurrent callers observe the single-flight guard and back off.
pub async fn initialize(
    link: &BotLink,
    token: &str,
    max_attempts: u32,
    retry_delay: Duration,
) -> InitOutcome {
    initialize_at(link, token, crate::telegram::API_BASE, max_attempts, retry_delay).await
}

/// Initialization against an explicit API host; tests point this at a dead
/// local endpoint to drive the exhaustion path.
async fn initialize_at(
    link: &BotLink,
    token: &str,
    api_base: &str,
    max_attempts: u32,
    retry_delay: Duration,
) -> InitOutcome {
    if link.is_ready() {
        return InitOutcome::Ready;
    }
    if link.init_in_flight.swap(true, Ordering::SeqCst) {
        info!("Bot initialization already in progress");
        return InitOutcome::AlreadyInitializing;
    }

    for attempt in 1..=max_attempts {
        link.set_state(ConnectionState::Initializing);
        info!("Initializing Telegram bot (attempt {}/{})", attempt, max_attempts);

        let result = match TelegramApi::with_base_url(token, api_base) {
            Ok(api) => match api.get_me().await {
                Ok(me) => Ok((api, me)),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        match result {
            Ok((api, me)) => {
                info!(
                    "Bot connected as @{}",
                    me.username.as_deref().unwrap_or(&me.first_name)
                );
                link.install(api);
                link.init_in_flight.store(false, Ordering::SeqCst);
                return InitOutcome::Ready;
            }
            Err(e) => {
                warn!("Bot initialization attempt {} failed: {}", attempt, e);
                link.teardown();
                link.set_state(ConnectionState::Failed);
                if attempt < max_attempts {
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }

    error!("Giving up on bot initialization after {} attempts", max_attempts);
    link.init_in_flight.store(false, Ordering::SeqCst);
    InitOutcome::ExhaustedRetries
}

/// Tear down the current transport and run a fresh bounded initialization.
async fn reconnect(link: &BotLink, token: &str) {
    warn!("Telegram transport fault, reconnecting");
    link.set_state(ConnectionState::Reconnecting);
    link.teardown();
    match initialize(link, token, MAX_INIT_ATTEMPTS, INIT_RETRY_DELAY).await {
        InitOutcome::Ready => info!("Bot reconnected"),
        InitOutcome::ExhaustedRetries => {
            error!("Bot reconnection failed, chat notifications unavailable")
        }
        InitOutcome::AlreadyInitializing => {}
    }
}

/// Long-poll for updates and dispatch commands until cancelled. The
/// attach-once guard makes repeated calls (e.g. across reconnects) no-ops:
/// command handling is never registered twice.
pub async fn run_poller(ctx: Arc<AppContext>, link: Arc<BotLink>, cancel: CancellationToken) {
    if link.poller_attached.swap(true, Ordering::SeqCst) {
        warn!("Command poller already attached, ignoring duplicate start");
        return;
    }
    info!("Command poller attached");

    let mut offset: i64 = 0;
    let mut consecutive_failures: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let api = match (link.is_ready(), link.api()) {
            (true, Some(api)) => api,
            _ => {
                // Transport down; wait for the supervisor to bring it back
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(1)) => continue,
                    _ = cancel.cancelled() => break,
                }
            }
        };

        tokio::select! {
            result = api.get_updates(offset) => match result {
                Ok(updates) => {
                    consecutive_failures = 0;
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        commands::handle_update(&ctx, &update).await;
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    error!(
                        "Polling error ({}/{}): {}",
                        consecutive_failures, FATAL_POLL_FAILURES, e
                    );
                    if consecutive_failures >= FATAL_POLL_FAILURES {
                        consecutive_failures = 0;
                        reconnect(&link, &ctx.config.bot_token).await;
                    } else {
                        tokio::time::sleep(POLL_FAILURE_BACKOFF).await;
                    }
                }
            },
            _ = cancel.cancelled() => break,
        }
    }

    link.stop();
    info!("Command poller stopped");
}
