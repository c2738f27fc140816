/// Reference appointment persistence
/// A single JSON record at a well-known path holds the user's currently
/// accepted appointment. Reads fail soft (any problem yields None plus a log
/// line); writes go through a temp file and rename so a crash mid-write never
/// corrupts previously valid state.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Time label used when the user did not supply one. The reference time is a
/// synthetic end-of-day marker, only the calendar date takes part in
/// comparisons.
pub const DEFAULT_COMPARISON_TIME: &str = "23:59";

/// The user's currently accepted appointment, used as the comparison baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceAppointment {
    /// Absolute instant of the appointment day (midnight in `timezone`).
    pub date: DateTime<Utc>,
    /// Display-only time-of-day label.
    pub comparison_time: String,
    /// Verbatim user input, kept for audit.
    pub original_input: String,
    pub saved_at: DateTime<Utc>,
    pub timezone: Tz,
}

/// On-disk shape. Every field except `date` is optional so older files keep
/// loading as the record grows.
#[derive(Debug, Serialize, Deserialize)]
struct StoredAppointment {
    date: DateTime<Utc>,
    #[serde(default)]
    comparison_time: Option<String>,
    #[serde(default)]
    original_input: Option<String>,
    #[serde(default)]
    saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    timezone: Option<String>,
}

pub struct AppointmentStore {
    path: PathBuf,
}

impl AppointmentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved reference appointment. Missing file, unreadable JSON or
    /// invalid fields all yield None with a logged diagnostic; the caller
    /// never sees an error.
    pub async fn load(&self, default_tz: Tz) -> Option<ReferenceAppointment> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No saved appointment file at {}", self.path.display());
                return None;
            }
            Err(e) => {
                warn!("Failed to read {}: {}", self.path.display(), e);
                return None;
            }
        };

        let stored: StoredAppointment = match serde_json::from_str(&content) {
            Ok(s) => s,
            Err(e) => {
                warn!("Invalid appointment data in {}: {}", self.path.display(), e);
                return None;
            }
        };

        let timezone = match stored.timezone {
            Some(name) => match name.parse::<Tz>() {
                Ok(tz) => tz,
                Err(_) => {
                    warn!(
                        "Saved timezone {:?} is not a valid IANA zone, using configured {}",
                        name, default_tz
                    );
                    default_tz
                }
            },
            None => default_tz,
        };

        let appointment = ReferenceAppointment {
            date: stored.date,
            comparison_time: stored
                .comparison_time
                .unwrap_or_else(|| DEFAULT_COMPARISON_TIME.to_string()),
            original_input: stored
                .original_input
                .unwrap_or_else(|| stored.date.to_rfc3339()),
            saved_at: stored.saved_at.unwrap_or(stored.date),
            timezone,
        };

        info!(
            "Loaded saved appointment: {} ({})",
            appointment.date.with_timezone(&timezone).format("%Y-%m-%d"),
            appointment.comparison_time
        );
        Some(appointment)
    }

    /// Persist the reference appointment. Returns whether the write landed;
    /// failures are logged, never raised.
    pub async fn save(&self, appointment: &ReferenceAppointment) -> bool {
        let stored = StoredAppointment {
            date: appointment.date,
            comparison_time: Some(appointment.comparison_time.clone()),
            original_input: Some(appointment.original_input.clone()),
            saved_at: Some(Utc::now()),
            timezone: Some(appointment.timezone.name().to_string()),
        };

        let json = match serde_json::to_string_pretty(&stored) {
            Ok(j) => j,
            Err(e) => {
                warn!("Failed to serialize appointment: {}", e);
                return false;
            }
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    warn!("Failed to create {}: {}", parent.display(), e);
                    return false;
                }
            }
        }

        // Write-to-temp-then-rename keeps the previous record intact if the
        // process dies mid-write.
        let tmp_path = self.path.with_extension("tmp");
        if let Err(e) = tokio::fs::write(&tmp_path, &json).await {
            warn!("Failed to write {}: {}", tmp_path.display(), e);
            return false;
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            warn!("Failed to replace {}: {}", self.path.display(), e);
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return false;
        }

        info!(
            "Saved appointment to {}: {}",
            self.path.display(),
            appointment
                .date
                .with_timezone(&appointment.timezone)
                .format("%Y-%m-%d")
        );
        true
    }
}
