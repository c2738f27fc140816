use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use std::env;
use std::path::PathBuf;

/// Runtime configuration, loaded once at startup and validated before any
/// scheduling begins.
#[derive(Debug, Clone)]
pub struct Config {
    // Telegram (required)
    pub bot_token: String,
    pub chat_id: i64,

    // Timezone used for all comparisons and schedules
    pub timezone: Tz,

    // Booking target
    pub booking_url: String,
    pub office: String,
    pub calendar_id: String,
    pub person_count: u32,

    // Check schedule, cron-subset expression (minute interval)
    pub check_interval: String,

    // Where the reference appointment is persisted
    pub appointment_file: PathBuf,

    // Email notifications: all three must be present or all absent
    pub email_sender: Option<String>,
    pub email_password: Option<String>,
    pub email_recipient: Option<String>,
    pub smtp_host: String,
    pub smtp_port: u16,

    // Pushbullet notifications
    pub pushbullet_api_key: Option<String>,

    // Health check HTTP server port (disabled if not set)
    pub health_port: Option<u16>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env if present, ignore if missing
        Self::from_getter(|key| env::var(key).ok())
    }

    /// Parse config from a custom getter function (for testing)
    pub fn from_getter<F>(get: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let timezone_name = get("TIMEZONE").context("TIMEZONE not set")?;
        let timezone: Tz = timezone_name.parse().map_err(|_| {
            anyhow::anyhow!(
                "Invalid TIMEZONE {:?}, use an IANA zone name (e.g. 'Africa/Nairobi')",
                timezone_name
            )
        })?;

        Ok(Config {
            bot_token: get("BOT_TOKEN").context("BOT_TOKEN not set")?,
            chat_id: get("CHAT_ID")
                .context("CHAT_ID not set")?
                .parse()
                .context("CHAT_ID must be a numeric Telegram chat id")?,

            timezone,

            booking_url: get("BOOKING_URL")
                .unwrap_or_else(|| "https://appointment.bmeia.gv.at/".to_string()),
            office: get("EMBASSY_OFFICE").unwrap_or_else(|| "NAIROBI".to_string()),
            calendar_id: get("CALENDAR_ID").unwrap_or_else(|| "2840814".to_string()),
            person_count: get("PERSON_COUNT")
                .unwrap_or_else(|| "1".to_string())
                .parse()
                .context("PERSON_COUNT must be a positive number")?,

            check_interval: get("CHECK_INTERVAL")
                .unwrap_or_else(|| "*/5 * * * *".to_string()),

            appointment_file: get("APPOINTMENT_FILE")
                .unwrap_or_else(|| "appointment.json".to_string())
                .into(),

            email_sender: get("EMAIL_SENDER").filter(|s| !s.is_empty()),
            email_password: get("EMAIL_PASSWORD").filter(|s| !s.is_empty()),
            email_recipient: get("EMAIL_RECIPIENT").filter(|s| !s.is_empty()),
            smtp_host: get("SMTP_HOST").unwrap_or_else(|| "smtp.gmail.com".to_string()),
            smtp_port: get("SMTP_PORT")
                .unwrap_or_else(|| "587".to_string())
                .parse()
                .context("SMTP_PORT must be a valid port number")?,

            pushbullet_api_key: get("PUSHBULLET_API_KEY").filter(|s| !s.is_empty()),

            health_port: get("HEALTH_PORT").and_then(|s| s.parse().ok()),
        })
    }

    /// Create config from a HashMap (convenience for testing)
    #[cfg(test)]
    pub fn from_map(map: &std::collections::HashMap<&str, &str>) -> Result<Self> {
        Self::from_getter(|key| map.get(key).map(|v| v.to_string()))
    }

    /// All three email fields present?
    pub fn email_enabled(&self) -> bool {
        self.email_sender.is_some()
            && self.email_password.is_some()
            && self.email_recipient.is_some()
    }

    pub fn pushbullet_enabled(&self) -> bool {
        self.pushbullet_api_key.is_some()
    }

    /// Validate configuration values at startup.
    /// Returns Ok(()) if all validations pass, or Err with details of what failed.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if let Err(e) = crate::scheduler::parse_interval(&self.check_interval) {
            errors.push(format!("CHECK_INTERVAL invalid: {}", e));
        }

        if self.person_count == 0 {
            errors.push("PERSON_COUNT must be at least 1.".to_string());
        }

        if self.bot_token.trim().is_empty() {
            errors.push("BOT_TOKEN cannot be empty.".to_string());
        }

        // Email is all-or-nothing: a partial trio is a configuration mistake,
        // not a disabled channel.
        let email_fields = [
            ("EMAIL_SENDER", &self.email_sender),
            ("EMAIL_PASSWORD", &self.email_password),
            ("EMAIL_RECIPIENT", &self.email_recipient),
        ];
        let present = email_fields.iter().filter(|(_, v)| v.is_some()).count();
        if present > 0 && present < email_fields.len() {
            let missing: Vec<&str> = email_fields
                .iter()
                .filter(|(_, v)| v.is_none())
                .map(|(name, _)| *name)
                .collect();
            errors.push(format!(
                "Email notifications need EMAIL_SENDER, EMAIL_PASSWORD and EMAIL_RECIPIENT; missing {}",
                missing.join(", ")
            ));
        }

        if !self.booking_url.starts_with("http://") && !self.booking_url.starts_with("https://") {
            errors.push(format!("BOOKING_URL {:?} is not an http(s) URL.", self.booking_url));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )
        }
    }
}
