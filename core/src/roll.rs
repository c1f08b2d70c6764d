//! Roll-code identity: sequence-prefix derivation and code formatting.
//!
//! A roll's human-facing code is `{prefix}{sequence:04}` where the prefix is
//! `{year2}{month2}{item identifier}`. The item identifier is derived
//! deterministically from the fabric name so that the same fabric inspected
//! in the same calendar month always lands on the same sequence counter.

use chrono::{DateTime, Datelike, Utc};

/// Fallback identifier used when a fabric name is empty or reduces to
/// nothing after cleaning.
const EMPTY_IDENTIFIER: &str = "00";

/// Derive the item identifier from a fabric name.
///
/// Rules (in order): split the name on `.`, take the longest segment, strip
/// `/`, `-` and whitespace from it. An empty name — or a segment that
/// cleans down to nothing — yields `"00"`.
///
/// The derivation is a pure function of the name: identical fabric names
/// always produce identical identifiers.
///
/// # Examples
///
/// ```
/// use loomline_core::roll::item_identifier;
///
/// assert_eq!(item_identifier("ABC.DEF/GH.123456"), "123456");
/// assert_eq!(item_identifier(""), "00");
/// assert_eq!(item_identifier("/- -/"), "00");
/// ```
#[must_use]
pub fn item_identifier(fabric_name: &str) -> String {
    let longest = fabric_name
        .split('.')
        .max_by_key(|part| part.len())
        .unwrap_or("");

    let cleaned: String = longest
        .chars()
        .filter(|c| *c != '/' && *c != '-' && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        EMPTY_IDENTIFIER.to_string()
    } else {
        cleaned
    }
}

/// Build the sequence prefix `{year2}{month2}{item identifier}` for a
/// fabric name at a given instant.
///
/// The two-digit year and month bound each counter to a calendar month per
/// fabric; the counter itself is unbounded (no rollover policy — keys are
/// simply never reused across months because the prefix changes).
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use loomline_core::roll::sequence_prefix;
///
/// let at = Utc.with_ymd_and_hms(2026, 1, 15, 8, 0, 0).unwrap();
/// assert_eq!(sequence_prefix("ABC.123456", at), "2601123456");
/// ```
#[must_use]
pub fn sequence_prefix(fabric_name: &str, at: DateTime<Utc>) -> String {
    format!(
        "{:02}{:02}{}",
        at.year() % 100,
        at.month(),
        item_identifier(fabric_name)
    )
}

/// Format a roll code from a prefix and an issued sequence number.
///
/// The sequence is zero-padded to four digits; a sequence wider than four
/// digits renders unpadded rather than erroring (codes stay unique, they
/// just grow).
#[must_use]
pub fn format_roll_code(prefix: &str, sequence: u64) -> String {
    format!("{prefix}{sequence:04}")
}

/// Parse the trailing four-digit sequence out of an existing roll code.
///
/// Returns `None` when the code is shorter than four characters or its last
/// four characters are not all ASCII digits. Used by the degraded sequence
/// tiers to continue from the highest code already assigned.
#[must_use]
pub fn parse_sequence_suffix(code: &str) -> Option<u64> {
    let bytes = code.as_bytes();
    if bytes.len() < 4 {
        return None;
    }
    let suffix = &bytes[bytes.len() - 4..];
    if suffix.iter().all(u8::is_ascii_digit) {
        std::str::from_utf8(suffix).ok()?.parse().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn identifier_takes_longest_dot_segment() {
        assert_eq!(item_identifier("ABC.DEF/GH.123456"), "123456");
        assert_eq!(item_identifier("K31.POLY-220"), "POLY220");
    }

    #[test]
    fn identifier_strips_separators_and_whitespace() {
        assert_eq!(item_identifier("A B/C-D"), "ABCD");
    }

    #[test]
    fn identifier_falls_back_on_empty_input() {
        assert_eq!(item_identifier(""), "00");
        assert_eq!(item_identifier("..."), "00");
        assert_eq!(item_identifier("/-"), "00");
    }

    #[test]
    fn prefix_combines_month_and_identifier() {
        let at = chrono::Utc.with_ymd_and_hms(2026, 1, 3, 12, 0, 0).unwrap();
        assert_eq!(sequence_prefix("XYZ", at), "2601XYZ");
        let december = chrono::Utc.with_ymd_and_hms(2025, 12, 3, 0, 0, 0).unwrap();
        assert_eq!(sequence_prefix("XYZ", december), "2512XYZ");
    }

    #[test]
    fn code_is_zero_padded_to_four_digits() {
        assert_eq!(format_roll_code("2601XYZ", 1), "2601XYZ0001");
        assert_eq!(format_roll_code("2601XYZ", 412), "2601XYZ0412");
        assert_eq!(format_roll_code("2601XYZ", 10_000), "2601XYZ10000");
    }

    #[test]
    fn suffix_parses_back_from_a_formatted_code() {
        assert_eq!(parse_sequence_suffix("2601XYZ0042"), Some(42));
        assert_eq!(parse_sequence_suffix("2601XYZ00A2"), None);
        assert_eq!(parse_sequence_suffix("X1"), None);
    }

    proptest! {
        #[test]
        fn identifier_is_deterministic(name in ".{0,40}") {
            prop_assert_eq!(item_identifier(&name), item_identifier(&name));
        }

        #[test]
        fn identifier_never_contains_stripped_characters(name in ".{0,40}") {
            let id = item_identifier(&name);
            prop_assert!(!id.contains('/'));
            prop_assert!(!id.contains('-'));
            prop_assert!(!id.chars().any(char::is_whitespace));
            prop_assert!(!id.is_empty());
        }

        #[test]
        fn sequence_round_trips_through_a_code(seq in 1u64..=9999) {
            let code = format_roll_code("2601TEST", seq);
            prop_assert_eq!(parse_sequence_suffix(&code), Some(seq));
        }
    }
}
