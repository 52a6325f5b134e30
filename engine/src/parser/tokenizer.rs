//! Character-level CSV scanner.
//!
//! The quoting rules are bespoke and intentionally not RFC 4180:
//!
//! - `"` toggles quoted mode; inside quotes the separator and line breaks
//!   are literal
//! - `\` escapes the next character, inside and outside quotes
//! - a field ends at an unquoted separator, an unquoted `\r` / `\n`, or the
//!   end of the buffer
//! - cleanup strips one pair of enclosing quotes and removes backslash
//!   markers, nothing else
//!
//! Reading one logical line is atomic: a caller never observes a partially
//! scanned line.

use crate::error::{CsvError, CsvResult};

/// Byte-order mark as a decoded character.
const BOM: char = '\u{feff}';

/// UTF-8 byte-order mark decoded as a single-byte charset.
const BOM_MISDECODED: &str = "\u{ef}\u{bb}\u{bf}";

/// Raw fields of one logical line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    /// Physical line number (1-based) where the logical line starts.
    pub line: usize,
    pub fields: Vec<String>,
}

/// Streaming scanner over one in-memory buffer.
#[derive(Debug, Clone)]
pub struct Tokenizer<'a> {
    buf: &'a str,
    pos: usize,
    line: usize,
    separator: char,
}

impl<'a> Tokenizer<'a> {
    pub fn new(buf: &'a str, separator: char) -> Self {
        Self::at(buf, 0, 1, separator)
    }

    /// Start scanning at byte offset `pos`, which lies on physical line `line`.
    pub fn at(buf: &'a str, pos: usize, line: usize, separator: char) -> Self {
        Self {
            buf,
            pos: pos.min(buf.len()),
            line,
            separator,
        }
    }

    /// Byte offset of the next unread character.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Physical line number of the next unread character.
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.buf.len()
    }

    /// Skip blank lines, leaving the cursor at the start of the next one
    /// holding data.
    fn skip_blank_lines(&mut self) {
        while self.pos < self.buf.len() {
            let rest = &self.buf[self.pos..];
            let end = rest.find(['\r', '\n']).unwrap_or(rest.len());
            if !rest[..end].trim().is_empty() {
                return;
            }
            self.pos += end;
            self.consume_line_break();
        }
    }

    /// Consume one `\r\n`, `\r` or `\n` at the cursor.
    fn consume_line_break(&mut self) {
        let rest = self.buf[self.pos..].as_bytes();
        match rest {
            [b'\r', b'\n', ..] => {
                self.pos += 2;
                self.line += 1;
            }
            [b'\r', ..] | [b'\n', ..] => {
                self.pos += 1;
                self.line += 1;
            }
            _ => {}
        }
    }

    /// Read the next non-blank logical line.
    ///
    /// Returns `None` once the buffer is exhausted. An unterminated quoted
    /// field consumes the rest of the buffer and yields
    /// [`CsvError::UnterminatedQuote`].
    pub fn next_line(&mut self) -> Option<CsvResult<RawLine>> {
        self.skip_blank_lines();
        if self.is_exhausted() {
            return None;
        }

        let start_line = self.line;
        let base = self.pos;
        let mut fields = Vec::new();
        let mut raw = String::new();
        let mut quoted = false;
        let mut chars = self.buf[base..].char_indices().peekable();

        loop {
            let Some((offset, c)) = chars.next() else {
                self.pos = self.buf.len();
                if quoted {
                    return Some(Err(CsvError::UnterminatedQuote(start_line)));
                }
                fields.push(clean_field(&raw));
                break;
            };

            match c {
                '\\' => {
                    raw.push('\\');
                    if let Some((_, escaped)) = chars.next() {
                        if escaped == '\n' {
                            self.line += 1;
                        }
                        raw.push(escaped);
                    }
                }
                '"' => {
                    quoted = !quoted;
                    raw.push('"');
                }
                c if c == self.separator && !quoted => {
                    fields.push(clean_field(&raw));
                    raw.clear();
                }
                '\r' | '\n' if !quoted => {
                    fields.push(clean_field(&raw));
                    self.pos = base + offset;
                    self.consume_line_break();
                    break;
                }
                c => {
                    if c == '\n' {
                        self.line += 1;
                    }
                    raw.push(c);
                }
            }
        }

        Some(Ok(RawLine {
            line: start_line,
            fields,
        }))
    }
}

impl Iterator for Tokenizer<'_> {
    type Item = CsvResult<RawLine>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_line()
    }
}

/// Strip one pair of enclosing quotes and remove backslash markers.
pub fn clean_field(raw: &str) -> String {
    let inner = if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        &raw[1..raw.len() - 1]
    } else {
        raw
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Tokenize one logical line of `line` (convenience for headers and tests).
pub fn split_line(line: &str, separator: char) -> CsvResult<Vec<String>> {
    match Tokenizer::new(line, separator).next_line() {
        Some(result) => result.map(|raw| raw.fields),
        None => Ok(Vec::new()),
    }
}

/// Estimated row count: `\n` occurrences only. A last line without a
/// terminator and `\r`-only breaks are not counted; the result only bounds
/// progress reporting.
pub fn count_rows(content: &str) -> usize {
    content.bytes().filter(|&b| b == b'\n').count()
}

/// Byte length of a leading byte-order mark, or 0.
pub fn bom_len(content: &str) -> usize {
    if content.starts_with(BOM) {
        BOM.len_utf8()
    } else if content.starts_with(BOM_MISDECODED) {
        BOM_MISDECODED.len()
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(content: &str, sep: char) -> Vec<Vec<String>> {
        Tokenizer::new(content, sep)
            .map(|r| r.unwrap().fields)
            .collect()
    }

    #[test]
    fn test_simple_lines() {
        let rows = lines("Name;Age\n\"Ann\";30\n\"Bob\";25\n", ';');
        assert_eq!(rows, vec![
            vec!["Name", "Age"],
            vec!["Ann", "30"],
            vec!["Bob", "25"],
        ]);
    }

    #[test]
    fn test_separator_inside_quotes() {
        let rows = lines("\"a;b\";c", ';');
        assert_eq!(rows, vec![vec!["a;b", "c"]]);
    }

    #[test]
    fn test_newline_inside_quotes() {
        let mut tok = Tokenizer::new("\"one\ntwo\";x\nnext;y\n", ';');
        let first = tok.next_line().unwrap().unwrap();
        assert_eq!(first.fields, vec!["one\ntwo", "x"]);
        assert_eq!(first.line, 1);
        let second = tok.next_line().unwrap().unwrap();
        assert_eq!(second.fields, vec!["next", "y"]);
        assert_eq!(second.line, 3);
        assert!(tok.next_line().is_none());
    }

    #[test]
    fn test_backslash_escapes_separator_and_quote() {
        let rows = lines(r#"a\;b;"say \"hi\"";c"#, ';');
        assert_eq!(rows, vec![vec!["a;b", "say \"hi\"", "c"]]);
    }

    #[test]
    fn test_backslash_is_removed_not_interpreted() {
        let rows = lines(r"tab\there;x", ';');
        assert_eq!(rows[0][0], "tabthere");
    }

    #[test]
    fn test_crlf_and_cr_line_breaks() {
        let rows = lines("a,b\r\n1,2\r3,4\n5,6", ',');
        assert_eq!(rows, vec![
            vec!["a", "b"],
            vec!["1", "2"],
            vec!["3", "4"],
            vec!["5", "6"],
        ]);
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let mut tok = Tokenizer::new("\n\n  \na;b\n\n1;2\n", ';');
        let header = tok.next_line().unwrap().unwrap();
        assert_eq!(header.line, 4);
        let data = tok.next_line().unwrap().unwrap();
        assert_eq!(data.fields, vec!["1", "2"]);
        assert_eq!(data.line, 6);
        assert!(tok.next_line().is_none());
    }

    #[test]
    fn test_empty_fields() {
        let rows = lines("a;;c;", ';');
        assert_eq!(rows, vec![vec!["a", "", "c", ""]]);
    }

    #[test]
    fn test_unterminated_quote_is_fatal() {
        let mut tok = Tokenizer::new("a;b\n\"open;value\n1;2\n", ';');
        tok.next_line().unwrap().unwrap();
        let err = tok.next_line().unwrap().unwrap_err();
        assert_eq!(err, CsvError::UnterminatedQuote(2));
        assert!(err.is_fatal());
        assert!(tok.next_line().is_none());
    }

    #[test]
    fn test_clean_field() {
        assert_eq!(clean_field("\"quoted\""), "quoted");
        assert_eq!(clean_field("\"\""), "");
        assert_eq!(clean_field("plain"), "plain");
        assert_eq!(clean_field("a\\\\b"), "a\\b");
        assert_eq!(clean_field("\"only-open"), "\"only-open");
    }

    #[test]
    fn test_count_rows() {
        assert_eq!(count_rows("a\nb\nc\n"), 3);
        assert_eq!(count_rows("a\r\nb\r\nc"), 2);
        assert_eq!(count_rows("a\rb\rc"), 0);
        assert_eq!(count_rows(""), 0);
        assert_eq!(count_rows("a\n\n"), 2);
    }

    #[test]
    fn test_bom_len() {
        assert_eq!(bom_len("\u{feff}a;b"), 3);
        assert_eq!(bom_len("\u{ef}\u{bb}\u{bf}a;b"), 6);
        assert_eq!(bom_len("a;b"), 0);
    }

    #[test]
    fn test_resume_at_offset() {
        let content = "h1;h2\nx;y\n";
        let mut tok = Tokenizer::at(content, 6, 2, ';');
        let raw = tok.next_line().unwrap().unwrap();
        assert_eq!(raw.line, 2);
        assert_eq!(raw.fields, vec!["x", "y"]);
    }
}
