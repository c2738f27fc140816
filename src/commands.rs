/// Chat command handling
/// Every update from the polling loop lands here. Only messages from the
/// configured chat are acted on; everything else is logged and dropped. The
/// command set is small: /set, /check, /current and /start.

use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::{info, warn};

use crate::check::{self, AppContext};
use crate::store::{ReferenceAppointment, DEFAULT_COMPARISON_TIME};
use crate::telegram::Update;

/// Accepted /set date formats, tried in order. Day-first European formats
/// come before the US one, so "01/02/2026" reads as February 1st.
const INPUT_DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%d.%m.%Y", "%Y-%m-%d", "%m/%d/%Y"];

const SET_USAGE: &str =
    "Usage: /set <date>\nAccepted formats: 31/12/2025, 31.12.2025, 2025-12-31";

/// Parse a user-supplied date string against the accepted formats.
pub fn parse_user_date(input: &str) -> Option<NaiveDate> {
    let input = input.trim();
    INPUT_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(input, format).ok())
}

/// Build the reference appointment for a calendar day: midnight in `tz`, with
/// the synthetic end-of-day comparison label. Returns None only when midnight
/// does not exist in `tz` on that day, which no real zone does.
pub fn build_reference(day: NaiveDate, tz: Tz, original_input: &str) -> Option<ReferenceAppointment> {
    use chrono::TimeZone;
    let midnight = tz
        .from_local_datetime(&day.and_hms_opt(0, 0, 0)?)
        .earliest()?;
    Some(ReferenceAppointment {
        date: midnight.with_timezone(&Utc),
        comparison_time: DEFAULT_COMPARISON_TIME.to_string(),
        original_input: original_input.to_string(),
        saved_at: Utc::now(),
        timezone: tz,
    })
}

/// Dispatch one polled update.
pub async fn handle_update(ctx: &AppContext, update: &Update) {
    let Some(message) = &update.message else {
        return;
    };
    if message.chat.id != ctx.config.chat_id {
        warn!(
            "Ignoring message from unexpected chat {} (configured: {})",
            message.chat.id, ctx.config.chat_id
        );
        return;
    }
    let Some(text) = &message.text else {
        return;
    };

    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or("");
    let argument = parts.next().map(str::trim).unwrap_or("");

    match command {
        "/set" => handle_set(ctx, argument).await,
        "/check" => handle_check(ctx).await,
        "/current" => handle_current(ctx).await,
        "/start" | "/help" => handle_start(ctx).await,
        _ if command.starts_with('/') => {
            ctx.notifier
                .send_chat("Unknown command. Try /start for the command list.")
                .await;
        }
        // Plain chatter, not addressed to the bot
        _ => {}
    }
}

async fn handle_set(ctx: &AppContext, argument: &str) {
    if argument.is_empty() {
        ctx.notifier.send_chat(SET_USAGE).await;
        return;
    }
    let Some(day) = parse_user_date(argument) else {
        ctx.notifier
            .send_chat(&format!("Could not read {:?} as a date.\n{}", argument, SET_USAGE))
            .await;
        return;
    };
    let Some(appointment) = build_reference(day, ctx.config.timezone, argument) else {
        ctx.notifier
            .send_chat("That date does not exist in the configured timezone.")
            .await;
        return;
    };

    info!("Reference appointment set to {}", day);
    let persisted = ctx.store.save(&appointment).await;
    ctx.set_reference(appointment);

    let mut reply = format!(
        "Reference appointment set to {}.\nYou will be alerted when an earlier slot appears.",
        day.format("%A, %B %-d, %Y")
    );
    if !persisted {
        reply.push_str("\n⚠️ Could not persist it; the setting is lost on restart.");
    }
    ctx.notifier.send_chat(&reply).await;

    // Give immediate feedback against the current availability
    check::run_check(ctx).await;
}

async fn handle_check(ctx: &AppContext) {
    if ctx.reference().is_none() {
        ctx.notifier
            .send_chat("No reference appointment set. Use /set <date> first.")
            .await;
        return;
    }
    ctx.notifier.send_chat("Checking now...").await;
    check::run_check(ctx).await;
}

async fn handle_current(ctx: &AppContext) {
    match ctx.reference() {
        Some(appointment) => {
            let day = appointment
                .date
                .with_timezone(&appointment.timezone)
                .format("%A, %B %-d, %Y");
            ctx.notifier
                .send_chat(&format!(
                    "Current reference appointment: {} (set from {:?}).",
                    day, appointment.original_input
                ))
                .await;
        }
        None => {
            ctx.notifier
                .send_chat("No reference appointment set. Use /set <date>.")
                .await;
        }
    }
}

async fn handle_start(ctx: &AppContext) {
    let mut channels = vec!["Telegram"];
    if ctx.notifier.email_enabled() {
        channels.push("email");
    }
    if ctx.notifier.pushbullet_enabled() {
        channels.push("Pushbullet");
    }

    let help = format!(
        "Appointment slot watcher.\n\n\
         /set <date> - set your current appointment date\n\
         /check - run a check right now\n\
         /current - show the saved appointment\n\
         /start - this message\n\n\
         Checks run on the {} schedule. Alerts go to: {}.",
        ctx.config.check_interval,
        channels.join(", ")
    );
    ctx.notifier.send_chat(&help).await;
}
