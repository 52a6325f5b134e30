//! Charset and delimiter handling around the tokenizer.
//!
//! Files reach the engine as raw bytes (CLI, HTTP upload); they are decoded
//! into one `String` per file before any parsing starts.

use encoding_rs::Encoding;

use crate::error::{CsvError, CsvResult};

/// Charset label that requests auto-detection.
pub const AUTO_CHARSET: &str = "auto";

/// Detect the encoding of raw bytes using chardet.
pub fn detect_encoding(bytes: &[u8]) -> String {
    let result = chardet::detect(bytes);
    let charset = result.0;

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" | "" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

fn lookup(charset: &str) -> CsvResult<&'static Encoding> {
    Encoding::for_label(charset.trim().as_bytes())
        .ok_or_else(|| CsvError::UnknownCharset(charset.to_string()))
}

/// Decode bytes using `charset`, or a detected charset when it is `auto`.
///
/// Returns the text and the charset actually used.
pub fn decode_content(bytes: &[u8], charset: &str) -> CsvResult<(String, String)> {
    let charset = if charset.eq_ignore_ascii_case(AUTO_CHARSET) {
        detect_encoding(bytes)
    } else {
        charset.to_string()
    };

    let encoding = lookup(&charset)?;
    let (text, _, _) = encoding.decode(bytes);
    Ok((text.into_owned(), charset))
}

/// Encode text into `charset`. Unmappable characters become numeric
/// character references.
pub fn encode_content(text: &str, charset: &str) -> CsvResult<Vec<u8>> {
    let encoding = lookup(charset)?;
    let (bytes, _, _) = encoding.encode(text);
    Ok(bytes.into_owned())
}

/// Detect the delimiter by counting occurrences in the first line.
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");

    let separators = [';', ',', '\t', '|'];
    let mut best_sep = ';';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Format a delimiter for display.
pub fn format_delimiter(d: char) -> String {
    match d {
        '\t' => "\\t".to_string(),
        c => c.to_string(),
    }
}
