/// Booking page fetch client
/// One form-encoded POST per check against the appointment system, with a
/// browser-mimicking header set and a fresh session cookie per call so the
/// server cannot hand back a cached or rate-limited session. Redirects are
/// not followed: a redirect means the site changed state and the caller gets
/// to see it. Non-2xx bodies are still returned, the page often carries
/// usable markup next to an error status.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Hard cap on one fetch, including connect and body read.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("empty response body from booking server")]
    EmptyBody,
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

pub struct FetchClient {
    client: reqwest::Client,
    url: String,
    office: String,
    calendar_id: String,
    person_count: u32,
}

impl FetchClient {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        Self::with_timeout(config, FETCH_TIMEOUT)
    }

    /// Same as `new` but with an explicit timeout; tests use short ones.
    pub fn with_timeout(config: &Config, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(FetchError::Client)?;
        Ok(Self {
            client,
            url: config.booking_url.clone(),
            office: config.office.clone(),
            calendar_id: config.calendar_id.clone(),
            person_count: config.person_count,
        })
    }

    /// Fetch the current availability page. Returns the raw document; only
    /// transport failures, timeouts and empty bodies are errors.
    pub async fn fetch_availability(&self) -> Result<String, FetchError> {
        let session_cookie = format!(
            "AspxAutoDetectCookieSupport=1; ASP.NET_SessionId={}",
            fresh_session_id()
        );

        debug!("Requesting availability from {}", self.url);

        let response = self
            .client
            .post(&self.url)
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Cache-Control", "no-cache")
            .header("Pragma", "no-cache")
            .header("Origin", "https://appointment.bmeia.gv.at")
            .header("Referer", "https://appointment.bmeia.gv.at/")
            .header("Upgrade-Insecure-Requests", "1")
            .header("User-Agent", USER_AGENT)
            .header("Cookie", session_cookie)
            .form(&[
                ("fromSpecificInfo", "True"),
                ("Language", "en"),
                ("Office", self.office.as_str()),
                ("CalendarId", self.calendar_id.as_str()),
                ("PersonCount", &self.person_count.to_string()),
                // "Next" pages the calendar forward to the next month with
                // availability.
                ("Command", "Next"),
            ])
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if status.is_redirection() {
            warn!("Booking server redirected ({}), not following", status);
        } else if !status.is_success() {
            warn!("Booking server returned status {}", status);
        } else {
            info!("Booking server responded {}", status);
        }

        let body = response.text().await.map_err(classify)?;
        if body.trim().is_empty() {
            return Err(FetchError::EmptyBody);
        }
        Ok(body)
    }
}

fn classify(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(e)
    }
}

/// A unique per-call ASP.NET session id: random alphanumeric run plus a
/// millisecond timestamp suffix, mirroring what a fresh browser session would
/// produce.
fn fresh_session_id() -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(13)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    let millis = chrono::Utc::now().timestamp_millis();
    format!("s{}{}", random, millis)
}
