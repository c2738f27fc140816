//! Adversarial Property-Based Tests for Slot Extraction and User Input
//!
//! # Attack Plan
//!
//! 1. **Hostile Markup**: unterminated labels, nested labels, attribute
//!    injection, megabyte documents, label floods.
//!
//! 2. **Date Token Attacks**: month 13, day 0, year 99999, unicode digits,
//!    embedded nulls, AM/PM casing games, trailing garbage.
//!
//! 3. **User Date Bypass**: format confusion (US vs day-first), injection
//!    characters, whitespace padding, datetime strings where a date is
//!    expected.
//!
//! 4. **Config Field Abuse**: malformed chat ids, ports, intervals, zone
//!    names.
//!
//! # Invariants
//!
//! - extract() never panics and every returned slot carries a parseable token
//! - parse_source_date never panics, rejects out-of-range fields
//! - parse_user_date never panics, never returns an impossible day
//! - Config::from_getter and validate() never panic

use proptest::prelude::*;
use std::collections::HashMap;

use chrono_tz::Africa::Nairobi;
use slotwatch::commands::parse_user_date;
use slotwatch::config::Config;
use slotwatch::parser::{parse_source_date, SchedulerLabelParser, SlotParser};

// ============================================================================
// ADVERSARIAL GENERATORS
// ============================================================================

/// Generate malformed source date tokens
fn malformed_date_token() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("".to_string()),
        Just(" ".to_string()),
        Just("13/1/2025 9:00:00 AM".to_string()),   // month 13
        Just("1/32/2025 9:00:00 AM".to_string()),   // day 32
        Just("0/0/2025 9:00:00 AM".to_string()),    // zero fields
        Just("1/15/2025 13:00:00 AM".to_string()),  // hour 13 with AM/PM
        Just("1/15/2025 9:61:00 AM".to_string()),   // minute 61
        Just("1/15/2025 9:00:00".to_string()),      // missing meridiem
        Just("1/15/2025 9:00:00 XX".to_string()),   // bogus meridiem
        Just("2025-01-15 09:00:00".to_string()),    // wrong format entirely
        Just("1/15/2025\u{0}9:00:00 AM".to_string()), // embedded null
        Just("١/١٥/٢٠٢٥ ٩:٠٠:٠٠ AM".to_string()),   // Arabic-Indic digits
        Just("1/15/2025 9:00:00 AM extra".to_string()),
        Just("9".repeat(10_000)),
    ]
}

fn hostile_document() -> impl Strategy<Value = String> {
    prop_oneof![
        // Unterminated label
        Just(r#"<label for="scheduler_1/15/2026 9:00:00 AM"> 09:00"#.to_string()),
        // Nested labels
        Just(
            r#"<label for="scheduler_1/15/2026 9:00:00 AM"><label for="scheduler_x">t</label></label>"#
                .to_string()
        ),
        // Attribute with escaped quote attempt
        Just(r#"<label for="scheduler_a\" onload=\"x"> t </label>"#.to_string()),
        // Flood of empty labels
        Just(r#"<label for="scheduler_"></label>"#.repeat(5_000)),
        // Binary-ish noise around a valid label
        Just(format!(
            "{}{}{}",
            "\u{fffd}\u{0}\u{7f}".repeat(100),
            r#"<label for="scheduler_9/25/2025 9:00:00 AM"> 09:00 </label>"#,
            "\u{fffd}".repeat(100)
        )),
        // Arbitrary text
        ".{0,2000}",
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // ========================================================================
    // SLOT EXTRACTION
    // ========================================================================

    #[test]
    fn extract_survives_hostile_documents(document in hostile_document()) {
        let parser = SchedulerLabelParser::new(Nairobi);
        let slots = parser.extract(&document);
        // Every slot that comes out must carry a token that parses back
        for slot in &slots {
            prop_assert!(parse_source_date(&slot.raw_date, Nairobi).is_some());
        }
    }

    #[test]
    fn extract_scales_with_label_floods(count in 1usize..500) {
        let document = r#"<label for="scheduler_9/25/2025 9:00:00 AM"> 09:00 </label>"#
            .repeat(count);
        let parser = SchedulerLabelParser::new(Nairobi);
        prop_assert_eq!(parser.extract(&document).len(), count);
    }

    // ========================================================================
    // DATE TOKENS
    // ========================================================================

    #[test]
    fn malformed_tokens_are_rejected(token in malformed_date_token()) {
        prop_assert!(parse_source_date(&token, Nairobi).is_none());
    }

    #[test]
    fn source_date_never_panics(token in ".{0,100}") {
        let _ = parse_source_date(&token, Nairobi);
    }

    // ========================================================================
    // USER DATES
    // ========================================================================

    #[test]
    fn user_date_never_panics(input in ".{0,100}") {
        let _ = parse_user_date(&input);
    }

    #[test]
    fn user_date_rejects_impossible_days(month in 13u32..100, day in 32u32..100) {
        let input = format!("{}/{}/2026", day, month);
        prop_assert!(parse_user_date(&input).is_none());
    }

    #[test]
    fn user_date_rejects_datetime_strings(hour in 0u32..24, minute in 0u32..60) {
        let input = format!("2026-01-15T{:02}:{:02}:00", hour, minute);
        prop_assert!(parse_user_date(&input).is_none());
    }

    // ========================================================================
    // CONFIG
    // ========================================================================

    #[test]
    fn config_never_panics_on_arbitrary_env(
        token in ".{0,50}",
        chat_id in ".{0,30}",
        zone in ".{0,40}",
        port in ".{0,20}",
        interval in ".{0,30}",
    ) {
        let mut env: HashMap<&str, String> = HashMap::new();
        env.insert("BOT_TOKEN", token);
        env.insert("CHAT_ID", chat_id);
        env.insert("TIMEZONE", zone);
        env.insert("SMTP_PORT", port);
        env.insert("CHECK_INTERVAL", interval);
        if let Ok(config) = Config::from_getter(|key| env.get(key).cloned()) {
            let _ = config.validate();
        }
    }

    #[test]
    fn bad_intervals_never_validate(interval in "[a-z*/ ]{0,20}") {
        let mut env: HashMap<&str, String> = HashMap::new();
        env.insert("BOT_TOKEN", "t".to_string());
        env.insert("CHAT_ID", "1".to_string());
        env.insert("TIMEZONE", "UTC".to_string());
        env.insert("CHECK_INTERVAL", interval.clone());
        if let Ok(config) = Config::from_getter(|key| env.get(key).cloned()) {
            if config.validate().is_ok() {
                // Whatever validated must genuinely be a usable schedule
                prop_assert!(slotwatch::scheduler::parse_interval(&interval).is_ok());
            }
        }
    }
}
