//! FILENAME: core/pivot-matrix/src/locale.rs
//! Locale-aware number parsing and formatting.
//!
//! Value filters and the natural comparator read numbers typed by users
//! ("1,234.50" or "1.234,50" depending on the locale), so separators are
//! stripped before parsing. Aggregate renderers use the same settings to
//! format results.

use serde::{Deserialize, Serialize};
use crate::value::Value;

/// Thousands and decimal separators used for parsing and formatting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocaleSettings {
    pub thousand_separator: String,
    pub decimal_separator: String,
}

impl Default for LocaleSettings {
    fn default() -> Self {
        LocaleSettings {
            thousand_separator: ",".to_string(),
            decimal_separator: ".".to_string(),
        }
    }
}

impl LocaleSettings {
    pub fn new(thousand_separator: &str, decimal_separator: &str) -> Self {
        LocaleSettings {
            thousand_separator: thousand_separator.to_string(),
            decimal_separator: decimal_separator.to_string(),
        }
    }

    /// Parses a user-facing number. Returns None for blank or non-numeric text.
    pub fn parse_number(&self, text: &str) -> Option<f64> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }

        let mut normalized = if self.thousand_separator.is_empty() {
            trimmed.to_string()
        } else {
            trimmed.replace(self.thousand_separator.as_str(), "")
        };
        if !self.decimal_separator.is_empty() && self.decimal_separator != "." {
            normalized = normalized.replace(self.decimal_separator.as_str(), ".");
        }

        // Rust accepts "inf"/"nan" spellings; those are labels, not numbers
        if !normalized
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
        {
            return None;
        }

        normalized.parse::<f64>().ok().filter(|n| n.is_finite())
    }

    /// Numeric reading of a value: numbers as-is, text through `parse_number`.
    pub fn coerce(&self, value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => Some(n.0),
            Value::Text(s) => self.parse_number(s),
            _ => None,
        }
    }

    /// Formats a number with grouped thousands and a fixed number of decimals.
    pub fn format_number(&self, n: f64, decimals: usize) -> String {
        if !n.is_finite() {
            return n.to_string();
        }

        let fixed = format!("{:.*}", decimals, n.abs());
        let (int_part, frac_part) = match fixed.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (fixed.as_str(), None),
        };

        let digits: Vec<char> = int_part.chars().collect();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (i, c) in digits.iter().enumerate() {
            if i > 0 && (digits.len() - i) % 3 == 0 {
                grouped.push_str(&self.thousand_separator);
            }
            grouped.push(*c);
        }

        let is_zero = fixed.chars().all(|c| c == '0' || c == '.');
        let mut out = String::new();
        if n < 0.0 && !is_zero {
            out.push('-');
        }
        out.push_str(&grouped);
        if let Some(frac) = frac_part {
            out.push_str(&self.decimal_separator);
            out.push_str(frac);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_locale() {
        let locale = LocaleSettings::default();
        assert_eq!(locale.parse_number("1,234.5"), Some(1234.5));
        assert_eq!(locale.parse_number(" -12 "), Some(-12.0));
        assert_eq!(locale.parse_number(""), None);
        assert_eq!(locale.parse_number("abc"), None);
        assert_eq!(locale.parse_number("inf"), None);
    }

    #[test]
    fn test_parse_european_locale() {
        let locale = LocaleSettings::new(".", ",");
        assert_eq!(locale.parse_number("1.234,5"), Some(1234.5));
        assert_eq!(locale.parse_number("10"), Some(10.0));
    }

    #[test]
    fn test_format_number() {
        let locale = LocaleSettings::default();
        assert_eq!(locale.format_number(1234567.891, 2), "1,234,567.89");
        assert_eq!(locale.format_number(-5.0, 2), "-5.00");
        assert_eq!(locale.format_number(-0.001, 2), "0.00");
        assert_eq!(locale.format_number(999.0, 0), "999");

        let european = LocaleSettings::new(".", ",");
        assert_eq!(european.format_number(1234.5, 2), "1.234,50");
    }
}
