/// Slot extraction from the booking page markup
/// The booking page renders each bookable slot as a radio button whose label
/// carries the machine-readable date in its `for` attribute:
///
///   <label for="scheduler_9/25/2025 9:00:00 AM"> 09:00 </label>
///
/// This is a deliberately narrow adapter: the pattern below is the one known
/// document shape, and anything that does not match it simply yields no
/// candidates.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use tracing::warn;

/// Source-side date format inside the `for` attribute, e.g. "9/25/2025 9:00:00 AM".
const SOURCE_DATE_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

/// A single bookable slot advertised by the booking page.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSlot {
    /// Absolute instant of the slot.
    pub date: DateTime<Utc>,
    /// Free-text time label as shown on the page, e.g. "09:00".
    pub display_time: String,
    /// Unparsed source token, kept for diagnostics.
    pub raw_date: String,
}

/// Strategy seam for slot extraction. The orchestrator only depends on this
/// trait, so the matching approach (regex, tokenizer, DOM query) can change
/// without touching the check cycle.
pub trait SlotParser: Send + Sync {
    /// Extract candidate slots in document order. Zero matches is a normal
    /// outcome ("no appointments available"), not an error.
    fn extract(&self, document: &str) -> Vec<CandidateSlot>;
}

/// Regex-based parser for the scheduler label markup.
pub struct SchedulerLabelParser {
    tz: Tz,
    pattern: Regex,
}

impl SchedulerLabelParser {
    pub fn new(tz: Tz) -> Self {
        // Pattern is a compile-time constant; a failure here is a programming
        // error, not an input error.
        let pattern = Regex::new(r#"<label for="scheduler_([^"]+)">\s*([^<]+?)\s*</label>"#)
            .expect("slot label pattern must compile");
        Self { tz, pattern }
    }
}

impl SlotParser for SchedulerLabelParser {
    fn extract(&self, document: &str) -> Vec<CandidateSlot> {
        let mut slots = Vec::new();
        for caps in self.pattern.captures_iter(document) {
            let raw_date = caps[1].to_string();
            let display_time = caps[2].trim().to_string();
            match parse_source_date(&raw_date, self.tz) {
                Some(date) => slots.push(CandidateSlot {
                    date,
                    display_time,
                    raw_date,
                }),
                None => {
                    // Drop-and-continue: one irregular entry must not discard
                    // the rest of the page.
                    warn!("Skipping slot with unparseable date token: {:?}", raw_date);
                }
            }
        }
        slots
    }
}

/// Parse a source date token ("M/D/YYYY h:mm:ss AM|PM") as a wall-clock time
/// in `tz` and return the absolute instant. Returns None for malformed tokens
/// and for wall-clock times that do not exist in `tz` (DST gaps).
pub fn parse_source_date(raw: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), SOURCE_DATE_FORMAT).ok()?;
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use chrono_tz::Africa::Nairobi;
    use proptest::prelude::*;

    proptest! {
        /// extract never panics, whatever the document contains
        #[test]
        fn extract_never_panics(document in ".{0,500}") {
            let parser = SchedulerLabelParser::new(Nairobi);
            let _ = parser.extract(&document);
        }

        /// Well-formed tokens always round-trip through extraction
        #[test]
        fn valid_tokens_are_extracted(
            month in 1u32..=12,
            day in 1u32..=28,
            year in 2024i32..=2030,
            hour in 1u32..=11,
            minute in 0u32..60,
        ) {
            let raw = format!("{}/{}/{} {}:{:02}:00 AM", month, day, year, hour, minute);
            let html = format!(r#"<label for="scheduler_{}">slot</label>"#, raw);
            let parser = SchedulerLabelParser::new(Nairobi);
            let slots = parser.extract(&html);
            prop_assert_eq!(slots.len(), 1);
            prop_assert_eq!(&slots[0].raw_date, &raw);
        }

        /// Documents without the label pattern yield nothing
        #[test]
        fn plain_text_yields_nothing(text in "[a-zA-Z0-9 .,]{0,300}") {
            let parser = SchedulerLabelParser::new(Nairobi);
            prop_assert!(parser.extract(&text).is_empty());
        }
    }
}
