// Cell-level cleaning rules shared by the silver and gold stages.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use unicode_normalization::UnicodeNormalization;

use crate::table::Table;

/// Textual spellings of "no value" that leak out of spreadsheet exports
/// and dataframe round-trips.
const NULL_TOKENS: &[&str] = &["", "none", "nan", "<na>", "null"];

/// True when the value is empty or one of the textual null spellings.
pub fn is_null_token(value: &str) -> bool {
    let trimmed = value.trim();
    NULL_TOKENS.iter().any(|t| trimmed.eq_ignore_ascii_case(t))
}

/// Replace every null-token cell with a real null. Returns how many cells changed.
pub fn null_tokens_to_null(table: &mut Table) -> usize {
    let mut replaced = 0;
    table.map_cells(|cell| match cell {
        Some(v) if is_null_token(&v) => {
            replaced += 1;
            None
        }
        other => other,
    });
    replaced
}

/// Standardized form used for dimension attributes and join keys:
/// NFC-normalized, trimmed, uppercased. Null tokens become `None`.
pub fn standardize(value: Option<&str>) -> Option<String> {
    let v = value?;
    if is_null_token(v) {
        return None;
    }
    let nfc: String = v.trim().nfc().collect();
    Some(nfc.to_uppercase())
}

/// Replace carriage returns and line feeds with spaces, collapse runs of
/// spaces and trim.
pub fn strip_line_breaks(value: &str) -> String {
    let replaced = value.replace(['\r', '\n'], " ");
    let mut out = String::with_capacity(replaced.len());
    let mut prev_space = false;
    for ch in replaced.chars() {
        if ch == ' ' {
            if !prev_space {
                out.push(ch);
            }
            prev_space = true;
        } else {
            out.push(ch);
            prev_space = false;
        }
    }
    out.trim().to_string()
}

// `%Y` also accepts two-digit years (`24` as year 24), so the `%y` forms
// come first. A four-digit year leaves trailing input under `%y` and falls
// through to the `%Y` forms.
const DAY_FIRST_DATETIME: &[&str] = &[
    "%d/%m/%y %H:%M:%S",
    "%d/%m/%y %H:%M",
    "%d-%m-%y %H:%M:%S",
    "%d-%m-%y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S",
    "%d-%m-%Y %H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
];

const DAY_FIRST_DATE: &[&str] = &["%d/%m/%y", "%d-%m-%y", "%d/%m/%Y", "%d-%m-%Y", "%Y-%m-%d"];

/// Parse a date the way the CRM exports write them (day first) and render
/// it as `YYYY-MM-DD`. Anything unparseable becomes `None`.
pub fn normalize_date(value: &str) -> Option<String> {
    parse_date(value).map(|d| d.format("%Y-%m-%d").to_string())
}

/// Day-first date parsing. Time-of-day and offsets are discarded.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let v = value.trim();
    if is_null_token(v) {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(v) {
        return Some(dt.date_naive());
    }
    for fmt in DAY_FIRST_DATETIME {
        if let Ok(dt) = NaiveDateTime::parse_from_str(v, fmt) {
            return Some(dt.date());
        }
    }
    for fmt in DAY_FIRST_DATE {
        if let Ok(d) = NaiveDate::parse_from_str(v, fmt) {
            return Some(d);
        }
    }
    None
}

/// Parse a monetary or plain decimal value.
///
/// Accepts `1500`, `1500.5`, `1.500,50` and `R$ 1.500,50`. When both
/// separators appear, the last one is the decimal separator.
pub fn parse_decimal(value: &str) -> Option<f64> {
    let cleaned: String = value
        .trim()
        .trim_start_matches("R$")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() || is_null_token(&cleaned) {
        return None;
    }

    let last_comma = cleaned.rfind(',');
    let last_dot = cleaned.rfind('.');
    let normalized = match (last_comma, last_dot) {
        (Some(c), Some(d)) if c > d => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) => cleaned.replace(',', "."),
        _ => cleaned,
    };
    normalized.parse().ok()
}
