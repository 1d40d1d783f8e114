//! FILENAME: core/pivot-matrix/src/sort.rs
//! Natural sort comparator.
//!
//! Group labels are compared the way a person reads them rather than byte by
//! byte: numeric-looking strings compare as numbers (honouring locale
//! separators), date-looking strings compare as dates, and mixed strings are
//! split into digit and text chunks so that "item 2" sorts before "item 10".

use std::cmp::Ordering;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use crate::locale::LocaleSettings;
use crate::value::Value;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

/// Compares two values with natural ordering. Blanks sort first.
pub fn natural_cmp(
    a: &Value,
    b: &Value,
    case_sensitive: bool,
    locale: &LocaleSettings,
) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }

    if let (Some(x), Some(y)) = (locale.coerce(a), locale.coerce(b)) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }

    let x = normalize(&a.to_string(), case_sensitive);
    let y = normalize(&b.to_string(), case_sensitive);

    if let (Some(dx), Some(dy)) = (parse_date(&x), parse_date(&y)) {
        return dx.cmp(&dy);
    }

    compare_chunks(&x, &y)
}

/// Trims, collapses inner whitespace and optionally lowercases.
fn normalize(s: &str, case_sensitive: bool) -> String {
    let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
    if case_sensitive {
        collapsed
    } else {
        collapsed.to_lowercase()
    }
}

fn parse_date(s: &str) -> Option<NaiveDateTime> {
    if !s.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

#[derive(Debug, PartialEq)]
enum Chunk<'a> {
    Digits(&'a str),
    Text(&'a str),
}

fn chunks(s: &str) -> Vec<Chunk<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_digits: Option<bool> = None;

    for (i, c) in s.char_indices() {
        let is_digit = c.is_ascii_digit();
        match in_digits {
            Some(prev) if prev != is_digit => {
                out.push(make_chunk(&s[start..i], prev));
                start = i;
            }
            _ => {}
        }
        in_digits = Some(is_digit);
    }
    if let Some(prev) = in_digits {
        out.push(make_chunk(&s[start..], prev));
    }
    out
}

fn make_chunk(s: &str, digits: bool) -> Chunk<'_> {
    if digits {
        Chunk::Digits(s)
    } else {
        Chunk::Text(s)
    }
}

fn compare_chunks(x: &str, y: &str) -> Ordering {
    let xs = chunks(x);
    let ys = chunks(y);

    for (cx, cy) in xs.iter().zip(ys.iter()) {
        let ord = match (cx, cy) {
            (Chunk::Digits(a), Chunk::Digits(b)) => compare_digit_runs(a, b),
            // numbers before words
            (Chunk::Digits(_), Chunk::Text(_)) => Ordering::Less,
            (Chunk::Text(_), Chunk::Digits(_)) => Ordering::Greater,
            (Chunk::Text(a), Chunk::Text(b)) => a.cmp(b),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }

    xs.len().cmp(&ys.len())
}

/// Compares two ASCII digit runs by magnitude without overflowing.
fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
