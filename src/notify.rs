/// Notification fan-out
/// Three independent channels: Telegram chat (through the supervised bot
/// link), email over SMTP, and Pushbullet. A failure in one channel is logged
/// and never stops the others; the found-slot alert is the only message that
/// goes to every channel, everything else is chat-only.

use anyhow::{Context, Result};
use chrono_tz::Tz;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::parser::CandidateSlot;
use crate::store::ReferenceAppointment;
use crate::supervisor::BotLink;

const PUSHBULLET_URL: &str = "https://api.pushbullet.com/v2/pushes";
const PUSHBULLET_TIMEOUT: Duration = Duration::from_secs(10);

const DAY_FORMAT: &str = "%A, %B %-d, %Y";

pub struct Notifier {
    chat_id: i64,
    timezone: Tz,
    booking_url: String,
    link: Arc<BotLink>,
    email: Option<EmailChannel>,
    pushbullet: Option<PushbulletChannel>,
}

struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
    recipient: Mailbox,
}

struct PushbulletChannel {
    client: reqwest::Client,
    api_key: String,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("chat_id", &self.chat_id)
            .field("timezone", &self.timezone)
            .field("booking_url", &self.booking_url)
            .finish_non_exhaustive()
    }
}

impl Notifier {
    /// Build the notifier from config. Email transport and addresses are
    /// constructed eagerly so a bad SMTP setup fails at startup, not at the
    /// moment an alert needs to go out.
    pub fn new(config: &Config, link: Arc<BotLink>) -> Result<Self> {
        let email = if config.email_enabled() {
            // Safe: email_enabled() checked all three
            let sender_addr = config.email_sender.as_ref().unwrap();
            let password = config.email_password.as_ref().unwrap();
            let recipient_addr = config.email_recipient.as_ref().unwrap();

            let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .context("Failed to set up SMTP relay")?
                .port(config.smtp_port)
                .credentials(Credentials::new(sender_addr.clone(), password.clone()))
                .build();

            Some(EmailChannel {
                transport,
                sender: sender_addr
                    .parse()
                    .context("EMAIL_SENDER is not a valid email address")?,
                recipient: recipient_addr
                    .parse()
                    .context("EMAIL_RECIPIENT is not a valid email address")?,
            })
        } else {
            None
        };

        let pushbullet = config.pushbullet_api_key.as_ref().map(|key| PushbulletChannel {
            client: reqwest::Client::new(),
            api_key: key.clone(),
        });

        Ok(Self {
            chat_id: config.chat_id,
            timezone: config.timezone,
            booking_url: config.booking_url.clone(),
            link,
            email,
            pushbullet,
        })
    }

    pub fn email_enabled(&self) -> bool {
        self.email.is_some()
    }

    pub fn pushbullet_enabled(&self) -> bool {
        self.pushbullet.is_some()
    }

    /// Send a chat message through the bot link. Skipped with a warning when
    /// the transport is not ready; returns whether the message went out.
    pub async fn send_chat(&self, text: &str) -> bool {
        let api = match (self.link.is_ready(), self.link.api()) {
            (true, Some(api)) => api,
            _ => {
                warn!(
                    "Bot transport not ready ({:?}), chat message skipped",
                    self.link.state()
                );
                return false;
            }
        };
        match api.send_message(self.chat_id, text).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to send chat message: {}", e);
                false
            }
        }
    }

    /// Alert every enabled channel that an earlier slot is on offer.
    pub async fn notify_found(&self, reference: &ReferenceAppointment, slot: &CandidateSlot) {
        let body = format_found_message(reference, slot, self.timezone, &self.booking_url);
        info!("Earlier slot found, notifying all channels");

        self.send_chat(&body).await;

        if let Some(email) = &self.email {
            if let Err(e) = email.send("Earlier appointment slot available", &body).await {
                error!("Email notification failed: {:#}", e);
            } else {
                info!("Email notification sent");
            }
        }

        if let Some(push) = &self.pushbullet {
            if let Err(e) = push.send("Earlier appointment slot available", &body).await {
                error!("Pushbullet notification failed: {:#}", e);
            } else {
                info!("Pushbullet notification sent");
            }
        }
    }
}

impl EmailChannel {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let message = Message::builder()
            .from(self.sender.clone())
            .to(self.recipient.clone())
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .context("Failed to build email message")?;
        self.transport
            .send(message)
            .await
            .context("SMTP send failed")?;
        Ok(())
    }
}

impl PushbulletChannel {
    async fn send(&self, title: &str, body: &str) -> Result<()> {
        let response = self
            .client
            .post(PUSHBULLET_URL)
            .timeout(PUSHBULLET_TIMEOUT)
            .header("Access-Token", &self.api_key)
            .json(&serde_json::json!({
                "type": "note",
                "title": title,
                "body": body,
            }))
            .send()
            .await
            .context("Pushbullet request failed")?;
        response
            .error_for_status()
            .context("Pushbullet rejected the push")?;
        Ok(())
    }
}

/// The found-slot alert body, shared by all channels.
pub fn format_found_message(
    reference: &ReferenceAppointment,
    slot: &CandidateSlot,
    tz: Tz,
    booking_url: &str,
) -> String {
    let slot_day = slot.date.with_timezone(&tz).format(DAY_FORMAT);
    let reference_day = reference.date.with_timezone(&tz).format(DAY_FORMAT);
    format!(
        "🚨 Earlier appointment slot available!\n\n\
         Found: {} at {}\n\
         Your current appointment: {}\n\n\
         Book it here: {}",
        slot_day, slot.display_time, reference_day, booking_url
    )
}

/// Status line for a poll where slots exist but none beats the reference.
pub fn format_no_earlier_message(reference: &ReferenceAppointment, slot: &CandidateSlot, tz: Tz) -> String {
    let slot_day = slot.date.with_timezone(&tz).format(DAY_FORMAT);
    let reference_day = reference.date.with_timezone(&tz).format(DAY_FORMAT);
    format!(
        "No earlier slot. Earliest on offer: {} at {} (yours: {}).",
        slot_day, slot.display_time, reference_day
    )
}
