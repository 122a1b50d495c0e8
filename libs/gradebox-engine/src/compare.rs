//! Output comparison as an ordered list of pure tier functions.
//!
//! Each tier is `fn(actual, expected) -> Option<bool>`: `Some` is a definite
//! verdict, `None` means "not applicable, ask the next tier". Tiers run in
//! strict order and the first definite answer is authoritative; if no tier
//! answers, the test fails.

/// Absolute tolerance for the numeric tier.
pub const NUMERIC_TOLERANCE: f64 = 0.01;

type Tier = fn(&str, &str) -> Option<bool>;

const TIERS: &[Tier] = &[exact_after_trim, quote_normalized, numeric_within_tolerance];

/// Decide pass/fail between observed and expected output text.
pub fn compare(actual: &str, expected: &str) -> bool {
    TIERS
        .iter()
        .find_map(|tier| tier(actual, expected))
        .unwrap_or(false)
}

/// Tier 1: exact match after trimming surrounding whitespace.
fn exact_after_trim(actual: &str, expected: &str) -> Option<bool> {
    if actual.trim() == expected.trim() {
        Some(true)
    } else {
        None
    }
}

/// Tier 2: match after additionally stripping one layer of matching
/// surrounding quote characters from both sides.
fn quote_normalized(actual: &str, expected: &str) -> Option<bool> {
    if strip_quotes(actual.trim()) == strip_quotes(expected.trim()) {
        Some(true)
    } else {
        None
    }
}

/// Tier 3: if both sides parse as numbers, the verdict is definite either
/// way: within tolerance passes, outside it fails.
fn numeric_within_tolerance(actual: &str, expected: &str) -> Option<bool> {
    match (actual.trim().parse::<f64>(), expected.trim().parse::<f64>()) {
        (Ok(a), Ok(e)) => Some((a - e).abs() < NUMERIC_TOLERANCE),
        _ => None,
    }
}

/// Remove one layer of quotes iff leading and trailing characters are the
/// same quote character.
fn strip_quotes(text: &str) -> &str {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'\'' || first == b'"') {
            return &text[1..text.len() - 1];
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_tier_passes() {
        assert!(compare(" 5 ", "5"));
        assert!(compare("hello\n", "hello"));
        assert!(compare("", "   "));
    }

    #[test]
    fn quote_tier_passes() {
        assert!(compare("'hello'", "hello"));
        assert!(compare("\"hello\"", "hello"));
        assert!(compare("hello", "'hello'"));
    }

    #[test]
    fn mismatched_quotes_are_not_stripped() {
        assert!(!compare("'hello\"", "hello"));
        // A single character is never treated as a quoted pair.
        assert!(!compare("'", "x"));
    }

    #[test]
    fn only_one_quote_layer_is_stripped() {
        assert!(!compare("''hello''", "hello"));
    }

    #[test]
    fn numeric_tier_within_tolerance() {
        assert!(compare("3.14159", "3.14"));
        assert!(compare("12.0", "12"));
        assert!(compare("0.009", "0.0"));
    }

    #[test]
    fn numeric_tier_outside_tolerance_is_a_definite_fail() {
        assert!(!compare("3.0", "3.5"));
        assert!(!compare("12", "13"));
    }

    #[test]
    fn non_numeric_mismatch_fails() {
        assert!(!compare("Hello", "hello"));
        assert!(!compare("abc", "abd"));
    }

    #[test]
    fn quoted_numbers_pass_via_quote_tier() {
        assert!(compare("'12'", "12"));
    }
}
