//! Multi-file preparation: header scanning and resumable line reading.
//!
//! Several files may share one logical row space (the primary file plus
//! supplementary ones). All of their headers are validated before any data
//! line is interpreted.

use crate::diagnostics::Diagnostics;
use crate::error::{CsvError, CsvResult};
use crate::header::scan_headers;
use crate::models::{FileDescriptor, ParsedLine};
use crate::parser::{RawLine, Tokenizer};

/// Scan the headers of every file, collecting all problems together.
///
/// Returns `true` when no error was recorded.
pub fn scan_all(files: &mut [FileDescriptor], separator: char, errors: &mut Diagnostics) -> bool {
    let before = errors.count();
    for file in files.iter_mut() {
        scan_headers(file, separator, errors);
    }
    errors.count() == before
}

/// Build the positional and named views of one data line.
pub fn parse_line(file: &FileDescriptor, raw: RawLine) -> CsvResult<ParsedLine> {
    if raw.fields.len() != file.headers.len() {
        return Err(CsvError::ColumnCount {
            expected: file.headers.len(),
            found: raw.fields.len(),
        });
    }

    let columns_by_name = file
        .headers_by_name
        .iter()
        .map(|(name, &index)| (name.clone(), raw.fields[index].clone()))
        .collect();

    Ok(ParsedLine {
        file: file.name.clone(),
        line: raw.line,
        columns_by_order: raw.fields,
        columns_by_name,
    })
}

/// Resumable position in the data section of one file.
///
/// The cursor owns no borrow of the file so that it can be stored between
/// two progress steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineCursor {
    pos: usize,
    line: usize,
    read: usize,
}

impl LineCursor {
    pub fn new(file: &FileDescriptor) -> Self {
        Self {
            pos: file.start_index,
            line: file.first_row_offset,
            read: 0,
        }
    }

    /// Number of logical lines read so far.
    pub fn rows_read(&self) -> usize {
        self.read
    }

    /// Read the next data line of `file`, with its physical line number.
    pub fn next_line(
        &mut self,
        file: &FileDescriptor,
        separator: char,
    ) -> Option<(usize, CsvResult<ParsedLine>)> {
        let mut tokenizer = Tokenizer::at(&file.content, self.pos, self.line, separator);
        let first_line = self.line;
        let raw = tokenizer.next_line()?;
        self.pos = tokenizer.position();
        self.line = tokenizer.line();
        self.read += 1;

        Some(match raw {
            Ok(raw) => (raw.line, parse_line(file, raw)),
            Err(err) => (first_line, Err(err)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanned(name: &str, content: &str) -> FileDescriptor {
        let mut file = FileDescriptor::new(name, content);
        let mut errors = Diagnostics::new();
        scan_headers(&mut file, ';', &mut errors);
        file
    }

    #[test]
    fn test_cursor_reads_named_columns() {
        let file = scanned("people.csv", "Name;Age\n\"Ann\";30\n\"Bob\";25\n");
        let mut cursor = LineCursor::new(&file);

        let (line, parsed) = cursor.next_line(&file, ';').unwrap();
        let parsed = parsed.unwrap();
        assert_eq!(line, 2);
        assert_eq!(parsed.columns_by_order, vec!["Ann", "30"]);
        assert_eq!(parsed.get("Age"), Some("30"));

        let (line, parsed) = cursor.next_line(&file, ';').unwrap();
        assert_eq!(line, 3);
        assert_eq!(parsed.unwrap().columns_by_order, vec!["Bob", "25"]);

        assert!(cursor.next_line(&file, ';').is_none());
        assert_eq!(cursor.rows_read(), 2);
    }

    #[test]
    fn test_short_line_is_recoverable() {
        let file = scanned("p.csv", "a;b;c\n1;2\n4;5;6\n");
        let mut cursor = LineCursor::new(&file);

        let (_, first) = cursor.next_line(&file, ';').unwrap();
        let err = first.unwrap_err();
        assert_eq!(err, CsvError::ColumnCount { expected: 3, found: 2 });
        assert!(!err.is_fatal());

        let (_, second) = cursor.next_line(&file, ';').unwrap();
        assert_eq!(second.unwrap().columns_by_order, vec!["4", "5", "6"]);
    }

    #[test]
    fn test_scan_all_reports_every_file() {
        let mut files = vec![
            FileDescriptor::new("a.csv", "x;x\n1;2\n"),
            FileDescriptor::new("b.csv", ""),
            FileDescriptor::new("c.csv", "k;v\n1;2\n"),
        ];
        let mut errors = Diagnostics::new();
        assert!(!scan_all(&mut files, ';', &mut errors));
        assert_eq!(errors.count(), 2);
        assert_eq!(files[2].headers, vec!["k", "v"]);
    }
}
