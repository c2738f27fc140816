/// Comparison policy
/// Pure decision over the reference appointment and the slots parsed from one
/// poll. Only calendar days matter: the reference carries a synthetic
/// end-of-day time, and the source times are booking-desk wall clock, so a
/// time-of-day comparison would be meaningless.

use crate::parser::CandidateSlot;
use crate::store::ReferenceAppointment;

/// Result of comparing one poll's candidates against the reference.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The page listed no slots at all.
    NoCandidates,
    /// The earliest listed slot is on a strictly earlier calendar day than
    /// the reference.
    Earlier(CandidateSlot),
    /// Slots exist but none beats the reference; carries the earliest one for
    /// the informational status message.
    NotEarlier(CandidateSlot),
}

/// Decide whether an earlier slot is on offer. Ties on the minimum date go to
/// the first occurrence in document order.
pub fn decide(reference: &ReferenceAppointment, candidates: &[CandidateSlot]) -> Outcome {
    let earliest = match candidates.iter().reduce(|best, slot| {
        if slot.date < best.date {
            slot
        } else {
            best
        }
    }) {
        Some(slot) => slot.clone(),
        None => return Outcome::NoCandidates,
    };

    let tz = reference.timezone;
    let candidate_day = earliest.date.with_timezone(&tz).date_naive();
    let reference_day = reference.date.with_timezone(&tz).date_naive();

    if candidate_day < reference_day {
        Outcome::Earlier(earliest)
    } else {
        Outcome::NotEarlier(earliest)
    }
}
