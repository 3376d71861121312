//! Allow-lists of spoken confirmations and rejections with fuzzy matching

use crate::similarity::{best_match, normalize_phrase};

use super::types::ResponseClass;

pub const CONFIRM_PHRASES: &[&str] = &[
    "yes",
    "yeah",
    "yep",
    "confirm",
    "confirmed",
    "proceed",
    "do it",
    "go ahead",
    "yes please",
    "yes do it",
    "approved",
    "affirmative",
    "okay",
    "ok",
    "sure",
];

pub const REJECT_PHRASES: &[&str] = &[
    "no",
    "nope",
    "nah",
    "cancel",
    "stop",
    "abort",
    "don't",
    "do not",
    "never mind",
    "nevermind",
    "negative",
    "reject",
    "no thanks",
];

/// Words that negate whatever else the reply says
const NEGATIONS: &[&str] = &[
    "no", "not", "never", "don't", "dont", "can't", "cannot", "won't", "wouldn't", "shouldn't",
];

/// Openings that reject the action named after them, as in "don't do it"
const PROHIBITIVE_OPENINGS: &[&str] = &["don't", "dont", "do not", "never"];

pub fn is_confirmation_phrase(text: &str, threshold: f64) -> bool {
    best_match(text, CONFIRM_PHRASES.iter().copied(), threshold).is_some()
}

pub fn is_rejection_phrase(text: &str, threshold: f64) -> bool {
    best_match(text, REJECT_PHRASES.iter().copied(), threshold).is_some()
}

/// Whole-word occurrence of any phrase inside a longer response
fn contains_phrase(normalized: &str, phrases: &[&str]) -> bool {
    let padded = format!(" {} ", normalized);
    phrases
        .iter()
        .any(|phrase| padded.contains(&format!(" {} ", phrase)))
}

fn starts_with_phrase(normalized: &str, phrases: &[&str]) -> bool {
    phrases
        .iter()
        .any(|phrase| normalized == *phrase || normalized.starts_with(&format!("{} ", phrase)))
}

/// Classify a response. Anything matching both lists, or neither, is ambiguous.
/// A negated reply is never a confirmation.
pub fn classify_response(text: &str, threshold: f64) -> ResponseClass {
    let normalized = normalize_phrase(text);
    if normalized.is_empty() {
        return ResponseClass::Ambiguous;
    }

    if contains_phrase(&normalized, NEGATIONS) {
        return if !contains_phrase(&normalized, CONFIRM_PHRASES)
            || starts_with_phrase(&normalized, PROHIBITIVE_OPENINGS)
        {
            ResponseClass::Reject
        } else {
            ResponseClass::Ambiguous
        };
    }

    let confirm = best_match(&normalized, CONFIRM_PHRASES.iter().copied(), threshold);
    let reject = best_match(&normalized, REJECT_PHRASES.iter().copied(), threshold);

    match (confirm, reject) {
        (Some(_), None) => ResponseClass::Confirm,
        (None, Some(_)) => ResponseClass::Reject,
        (Some((_, c)), Some((_, r))) if c == 1.0 && r < 1.0 => ResponseClass::Confirm,
        (Some((_, c)), Some((_, r))) if r == 1.0 && c < 1.0 => ResponseClass::Reject,
        (Some(_), Some(_)) => ResponseClass::Ambiguous,
        (None, None) => {
            match (
                contains_phrase(&normalized, CONFIRM_PHRASES),
                contains_phrase(&normalized, REJECT_PHRASES),
            ) {
                (true, false) => ResponseClass::Confirm,
                (false, true) => ResponseClass::Reject,
                _ => ResponseClass::Ambiguous,
            }
        }
    }
}
