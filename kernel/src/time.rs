//! Timestamp parsing used by the preprocessor to synthesize a missing `time` dimension
//! (spec §4.3 step 3), grounded in `examples/original_source/nc2zarr/append.py`'s
//! `_RE_TO_DATETIME_FORMATS` precedence table.

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use std::sync::LazyLock;

/// `(pattern, strptime format, expected digit count)` in priority order -- a later
/// pattern is only tried once all earlier ones fail to match.
static FORMATS: LazyLock<Vec<(Regex, &'static str, usize)>> = LazyLock::new(|| {
    vec![
        (Regex::new(r"\d{14}").unwrap(), "%Y%m%d%H%M%S", 14),
        (Regex::new(r"\d{12}").unwrap(), "%Y%m%d%H%M", 12),
        (Regex::new(r"\d{8}").unwrap(), "%Y%m%d", 8),
        (Regex::new(r"\d{6}").unwrap(), "%Y%m", 6),
        (Regex::new(r"\d{4}").unwrap(), "%Y", 4),
    ]
});

/// Find the first substring of `text` that matches one of the five patterns, in
/// precedence order, and return `(format, start, end)`.
pub fn find_datetime_format(text: &str) -> Option<(&'static str, usize, usize)> {
    for (re, fmt, _len) in FORMATS.iter() {
        if let Some(m) = re.find(text) {
            return Some((fmt, m.start(), m.end()));
        }
    }
    None
}

/// Parse a timestamp from an explicit `datetime_format` (chrono strptime syntax) or, if
/// none is given, by matching the first substring against the five patterns above.
pub fn parse_timestamp(text: &str, datetime_format: Option<&str>) -> Option<NaiveDateTime> {
    if let Some(fmt) = datetime_format {
        return parse_with_format(text, fmt);
    }
    let (fmt, start, end) = find_datetime_format(text)?;
    parse_with_format(&text[start..end], fmt)
}

fn parse_with_format(text: &str, fmt: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
        return Some(dt);
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
        return Some(date.and_hms_opt(0, 0, 0).unwrap());
    }
    // Year-only/year-month formats parse as a date at month/day 1 via chrono's lenient
    // parser for fixed-width inputs; fall back to manual zero-padding.
    match fmt {
        "%Y" => text
            .parse::<i32>()
            .ok()
            .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1))
            .map(|d| d.and_hms_opt(0, 0, 0).unwrap()),
        "%Y%m" if text.len() == 6 => {
            let (y, m) = text.split_at(4);
            let year: i32 = y.parse().ok()?;
            let month: u32 = m.parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, 1).map(|d| d.and_hms_opt(0, 0, 0).unwrap())
        }
        _ => None,
    }
}

/// Find the first two non-overlapping timestamps in a string (e.g. a filename carrying
/// both a start and an end date), trying the five patterns against the remainder after
/// the first match, per `get_timestamps_from_string` in the original source.
pub fn find_two_timestamps(text: &str) -> (Option<NaiveDateTime>, Option<NaiveDateTime>) {
    let Some((fmt, start, end)) = find_datetime_format(text) else {
        return (None, None);
    };
    let first = parse_with_format(&text[start..end], fmt);
    let rest = &text[end..];
    let second = find_datetime_format(rest).and_then(|(fmt2, s2, e2)| parse_with_format(&rest[s2..e2], fmt2));
    (first, second)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_prefers_longest_pattern() {
        let (fmt, start, end) = find_datetime_format("input-20201201-extra").unwrap();
        assert_eq!(fmt, "%Y%m%d");
        assert_eq!(&"input-20201201-extra"[start..end], "20201201");
    }

    #[test]
    fn parses_full_datetime() {
        let dt = parse_timestamp("20201201103000", None).unwrap();
        assert_eq!(dt.to_string(), "2020-12-01 10:30:00");
    }

    #[test]
    fn parses_year_only() {
        let dt = parse_timestamp("data-2020-v1", None).unwrap();
        assert_eq!(dt.to_string(), "2020-01-01 00:00:00");
    }

    #[test]
    fn explicit_format_overrides_pattern_search() {
        let dt = parse_timestamp("01-12-2020", Some("%d-%m-%Y")).unwrap();
        assert_eq!(dt.to_string(), "2020-12-01 00:00:00");
    }

    #[test]
    fn two_timestamps_for_start_and_end() {
        let (first, second) = find_two_timestamps("input-20200101-20200131.nc");
        assert!(first.unwrap() < second.unwrap());
    }
}
