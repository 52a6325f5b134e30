//! Text serialization of rendered rows.
//!
//! Quoting is not RFC 4180: embedded `"` become `'` instead of being
//! doubled, and embedded line breaks become spaces. The tokenizer reads this
//! back unchanged.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ExportResult;
use crate::parser::encode_content;

static PLAIN_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$").unwrap());

/// Line terminator of generated files.
pub const LINE_END: &str = "\r\n";

/// Whether `value` reads as a finite plain number.
pub fn is_plain_number(value: &str) -> bool {
    PLAIN_NUMBER.is_match(value) && value.parse::<f64>().is_ok_and(f64::is_finite)
}

/// Escape one data cell.
///
/// Empty cells stay bare. A cell is quoted when it holds the separator or a
/// quote, or is anything but a finite plain number.
pub fn escape_field(value: &str, separator: char) -> String {
    if value.is_empty() {
        return String::new();
    }

    let needs_quotes = value.contains(separator) || value.contains('"') || !is_plain_number(value);
    let cleaned = value.replace('"', "'").replace("\r\n", " ").replace(['\r', '\n'], " ");

    if needs_quotes {
        format!("\"{cleaned}\"")
    } else {
        cleaned
    }
}

/// Escape one header label: quoted only when it could break the line.
pub fn escape_label(label: &str, separator: char) -> String {
    if label.contains(separator) || label.contains('"') || label.contains(['\r', '\n']) {
        escape_field(label, separator)
    } else {
        label.to_string()
    }
}

/// Join a header row and data rows into text.
pub fn to_text(labels: &[String], rows: &[Vec<String>], separator: char) -> String {
    let sep = separator.to_string();
    let mut out = String::new();

    let header: Vec<String> = labels.iter().map(|l| escape_label(l, separator)).collect();
    out.push_str(&header.join(&sep));
    out.push_str(LINE_END);

    for row in rows {
        let cells: Vec<String> = row.iter().map(|c| escape_field(c, separator)).collect();
        out.push_str(&cells.join(&sep));
        out.push_str(LINE_END);
    }
    out
}

/// Encode text for output. UTF-8 output starts with a byte-order mark.
pub fn encode_output(text: &str, charset: &str, utf8: bool) -> ExportResult<Vec<u8>> {
    if utf8 {
        let mut bytes = Vec::with_capacity(text.len() + 3);
        bytes.extend_from_slice("\u{feff}".as_bytes());
        bytes.extend_from_slice(text.as_bytes());
        return Ok(bytes);
    }
    Ok(encode_content(text, charset)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quotes_replaced_not_doubled() {
        assert_eq!(escape_field("He said \"hi\", ok", ','), "\"He said 'hi', ok\"");
    }

    #[test]
    fn test_separator_forces_quotes() {
        assert_eq!(escape_field("1,5", ','), "\"1,5\"");
        assert_eq!(escape_field("1,5", ';'), "\"1,5\"");
        assert_eq!(escape_field("1.5", ';'), "1.5");
    }

    #[test]
    fn test_numbers_stay_bare() {
        assert_eq!(escape_field("30", ';'), "30");
        assert_eq!(escape_field("-2.5e3", ';'), "-2.5e3");
        assert_eq!(escape_field("Ann", ';'), "\"Ann\"");
        assert_eq!(escape_field("", ';'), "");
    }

    #[test]
    fn test_non_finite_is_quoted() {
        assert!(!is_plain_number("NaN"));
        assert!(!is_plain_number("inf"));
        assert!(!is_plain_number("1e999"));
        assert_eq!(escape_field("1e999", ';'), "\"1e999\"");
    }

    #[test]
    fn test_newlines_become_spaces() {
        assert_eq!(escape_field("a\r\nb\nc", ';'), "\"a b c\"");
    }

    #[test]
    fn test_to_text() {
        let labels = vec!["Name".to_string(), "Age".to_string()];
        let rows = vec![vec!["Ann".to_string(), "30".to_string()]];
        assert_eq!(to_text(&labels, &rows, ';'), "Name;Age\r\n\"Ann\";30\r\n");
    }

    #[test]
    fn test_utf8_output_has_bom() {
        let bytes = encode_output("a\r\n", "utf-8", true).unwrap();
        assert_eq!(&bytes[..3], &[0xEF, 0xBB, 0xBF]);
        let latin = encode_output("é", "windows-1252", false).unwrap();
        assert_eq!(latin, vec![0xE9]);
    }
}
