use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Strings that spreadsheet exports use for missing values, compared case-insensitively.
pub const NULL_TOKENS: &[&str] = &["", "null", "none", "nan", "nat"];

/// Canonical rendering of timestamps in hashes and text columns.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Accepted date and time layouts. `%.f` also matches an absent fraction.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// Largest magnitude below which whole floats are rendered and parsed as integers.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// A numeric value parsed from text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Whole(i64),
    Fractional(f64),
}

/// Returns whether `value` stands for a missing value after trimming.
pub fn is_null_token(value: &str) -> bool {
    let value = value.trim();
    NULL_TOKENS
        .iter()
        .any(|token| value.eq_ignore_ascii_case(token))
}

/// Parses a timestamp or a plain date, which maps to midnight.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();

    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
                .map(|date| date.and_time(NaiveTime::MIN))
        })
}

pub fn format_timestamp(value: &NaiveDateTime) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

/// Renders a float, dropping the fractional part of whole values so `80.0` reads `80`.
pub fn format_float(value: f64) -> String {
    match whole_float_to_i64(value) {
        Some(whole) => whole.to_string(),
        None => value.to_string(),
    }
}

/// Parses integers and decimals, classifying `12345.0` as whole.
///
/// Returns [`None`] for text that is not a finite number.
pub fn parse_number(value: &str) -> Option<Number> {
    let value = value.trim();

    if let Ok(whole) = value.parse::<i64>() {
        return Some(Number::Whole(whole));
    }

    let float = value.parse::<f64>().ok().filter(|float| float.is_finite())?;
    Some(number_from_float(float))
}

/// Returns whether `value` spells a non-finite float such as `inf`, `-Infinity` or `NaN`.
pub fn is_non_finite_number(value: &str) -> bool {
    value
        .trim()
        .parse::<f64>()
        .is_ok_and(|float| !float.is_finite())
}

/// Classifies a finite float as whole or fractional.
pub fn number_from_float(value: f64) -> Number {
    match whole_float_to_i64(value) {
        Some(whole) => Number::Whole(whole),
        None => Number::Fractional(value),
    }
}

/// Parses the literals `true` and `false`, ignoring case and surrounding whitespace.
pub fn parse_bool_literal(value: &str) -> Option<bool> {
    let value = value.trim();

    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

fn whole_float_to_i64(value: f64) -> Option<i64> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_EXACT_INTEGER {
        Some(value as i64)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_tokens_ignore_case_and_whitespace() {
        for token in ["", "  ", "NULL", "None", " nan ", "NaT"] {
            assert!(is_null_token(token), "{token:?} should be a null token");
        }
        assert!(!is_null_token("0"));
        assert!(!is_null_token("n/a"));
    }

    #[test]
    fn parses_supported_timestamp_layouts() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 17)
            .unwrap()
            .and_hms_opt(13, 4, 5)
            .unwrap();

        assert_eq!(parse_timestamp("2024-05-17 13:04:05"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-17T13:04:05"), Some(expected));
        assert_eq!(parse_timestamp("2024/05/17 13:04:05"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-05-17"),
            NaiveDate::from_ymd_opt(2024, 5, 17).map(|d| d.and_time(NaiveTime::MIN))
        );
        assert!(parse_timestamp("2024-05-17 13:04:05.250").is_some());
        assert_eq!(parse_timestamp("12345"), None);
        assert_eq!(parse_timestamp("lot 7"), None);
    }

    #[test]
    fn whole_floats_render_as_integers() {
        assert_eq!(format_float(80.0), "80");
        assert_eq!(format_float(-3.0), "-3");
        assert_eq!(format_float(0.5), "0.5");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }

    #[test]
    fn parse_number_classifies_whole_and_fractional() {
        assert_eq!(parse_number("12345"), Some(Number::Whole(12345)));
        assert_eq!(parse_number(" 12345.0 "), Some(Number::Whole(12345)));
        assert_eq!(parse_number("1.5"), Some(Number::Fractional(1.5)));
        assert_eq!(parse_number("inf"), None);
        assert_eq!(parse_number("LOT-1"), None);
    }

    #[test]
    fn non_finite_spellings_are_recognized() {
        for value in ["inf", "-Infinity", " +INF ", "NaN"] {
            assert!(is_non_finite_number(value), "{value:?} should be non-finite");
        }
        assert!(!is_non_finite_number("1e3"));
        assert!(!is_non_finite_number("info"));
    }

    #[test]
    fn bool_literals_are_case_insensitive() {
        assert_eq!(parse_bool_literal("TRUE"), Some(true));
        assert_eq!(parse_bool_literal(" false "), Some(false));
        assert_eq!(parse_bool_literal("1"), None);
    }
}
