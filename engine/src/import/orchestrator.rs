//! Five-phase import state machine.
//!
//! ```text
//! Idle → HeaderScan → Preload → Check → Import → Delete → PostUpdate → [Closed]
//!                         any state ──────────────────────────────────→ [Aborted]
//! ```
//!
//! [`ImportJob`] is a lazy, non-restartable [`Iterator`] of [`Progress`]:
//! every call to `next` performs one unit of work (one data line, one
//! deletion, one phase boundary) and reports it. Nothing runs until the
//! iterator is driven, and a host that stops driving it simply halts the
//! import. The repository's `end` hook runs exactly once on every path,
//! including when an unfinished job is dropped.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::api::logs::{log_line_error, log_phase, LogLevel};
use crate::diagnostics::{line_label, Diagnostics};
use crate::error::CsvError;
use crate::import::preload::{scan_all, LineCursor};
use crate::models::{Counters, Document, FileDescriptor, ParsedLine};
use crate::repository::{Change, DeleteCandidate, RecordPair, Repository};

/// Caller switches for one import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Skip the preview pass.
    pub skip_check: bool,
    /// Stop after checking; Delete and PostUpdate are skipped too.
    pub skip_import: bool,
    /// Delete existing rows the file does not reference.
    pub delete_missing: bool,
}

/// Import phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Idle,
    HeaderScan,
    Preload,
    Check,
    Import,
    Delete,
    PostUpdate,
    Closed,
    Aborted,
}

impl Phase {
    /// Short lowercase name, as shown in logs.
    pub fn name(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::HeaderScan => "headers",
            Phase::Preload => "preload",
            Phase::Check => "check",
            Phase::Import => "import",
            Phase::Delete => "delete",
            Phase::PostUpdate => "post-update",
            Phase::Closed => "closed",
            Phase::Aborted => "aborted",
        }
    }
}

/// One progress tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub phase: Phase,
    pub current: usize,
    pub max: usize,
    pub message: String,
}

/// Final state of an import.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub phase: Phase,
    pub counters: Counters,
    pub errors: Diagnostics,
}

impl ImportOutcome {
    /// True when the operation ran to the end without any error.
    pub fn is_applied(&self) -> bool {
        self.phase == Phase::Closed && !self.errors.has_error()
    }
}

/// Next unit of work.
#[derive(Debug)]
enum Step {
    Scan,
    Start,
    PreloadFile(usize),
    PreloadLine(usize, LineCursor),
    CheckStart,
    CheckLine(LineCursor),
    ImportStart,
    ImportLine(LineCursor),
    DeleteStart,
    DeleteItem(VecDeque<DeleteCandidate>, usize),
    PostUpdateStart,
    PostUpdateItem(VecDeque<RecordPair>, usize),
    ImportEnd,
    Finish,
    Abort,
    Done,
}

/// Operation-scoped import state, driven as an iterator.
pub struct ImportJob<'r, R: Repository + ?Sized> {
    doc: Document,
    repo: &'r mut R,
    options: ImportOptions,
    errors: Diagnostics,
    step: Step,
    phase: Phase,
    ended: bool,
}

impl<'r, R: Repository + ?Sized> ImportJob<'r, R> {
    /// Prepare an import of `doc.content` (the primary file, named after the
    /// document) plus `extra` files sharing the same row space.
    pub fn new(
        mut doc: Document,
        extra: Vec<FileDescriptor>,
        repo: &'r mut R,
        options: ImportOptions,
    ) -> Self {
        doc.reset();
        doc.will_delete_rows = options.delete_missing;
        doc.files.push(FileDescriptor::new(doc.name.clone(), doc.content.clone()));
        doc.files.extend(extra);

        Self {
            doc,
            repo,
            options,
            errors: Diagnostics::new(),
            step: Step::Scan,
            phase: Phase::Idle,
            ended: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn counters(&self) -> Counters {
        self.doc.counters
    }

    pub fn errors(&self) -> &Diagnostics {
        &self.errors
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Run any remaining work and return the outcome.
    pub fn finish(mut self) -> ImportOutcome {
        self.by_ref().for_each(drop);
        ImportOutcome {
            phase: self.phase,
            counters: self.doc.counters,
            errors: std::mem::take(&mut self.errors),
        }
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn progress(&self, current: usize, max: usize, message: impl Into<String>) -> Progress {
        Progress {
            phase: self.phase,
            current,
            max,
            message: message.into(),
        }
    }

    fn primary_rows(&self) -> usize {
        self.doc.primary().map_or(0, |f| f.row_count)
    }

    /// Whether a start/end hook refused. A refusal without a specific error
    /// records a generic one.
    fn refused(&mut self, accepted: bool) -> bool {
        if !accepted && !self.errors.has_error() {
            self.errors.add_global(CsvError::Aborted);
        }
        !accepted || self.errors.has_fatal()
    }

    /// Leave a phase: any collected error stops the operation here.
    fn end_phase(&mut self, next: Step) -> Step {
        if self.errors.has_error() {
            let message = format!("{} error(s) collected, stopping", self.errors.count());
            log_phase(LogLevel::Warning, self.phase, message);
            Step::Abort
        } else {
            next
        }
    }

    /// Nest line errors under their label; true when one of them is fatal.
    fn merge_line_errors(&mut self, label: String, line_errors: Diagnostics) -> bool {
        if line_errors.has_error() {
            for message in line_errors.lines() {
                log_line_error(self.phase, label.as_str(), message);
            }
        }
        let fatal = line_errors.has_fatal();
        self.errors.nest(label, line_errors);
        fatal
    }

    fn after_preload(&self) -> Step {
        if !self.options.skip_check {
            Step::CheckStart
        } else {
            self.after_check()
        }
    }

    fn after_check(&self) -> Step {
        if !self.options.skip_import {
            Step::ImportStart
        } else {
            Step::Finish
        }
    }

    fn call_end(&mut self) {
        if !self.ended {
            self.ended = true;
            self.repo.end(&self.doc, &mut self.errors);
        }
    }

    fn read_line(&self, file: usize, cursor: &mut LineCursor) -> Option<(usize, Result<ParsedLine, CsvError>)> {
        cursor.next_line(&self.doc.files[file], self.doc.separator)
    }

    // -------------------------------------------------------------------------
    // Steps
    // -------------------------------------------------------------------------

    fn run(&mut self, step: Step) -> (Step, Option<Progress>) {
        match step {
            Step::Scan => self.scan(),
            Step::Start => self.start(),
            Step::PreloadFile(file) => self.preload_file(file),
            Step::PreloadLine(file, cursor) => self.preload_line(file, cursor),
            Step::CheckStart => self.check_start(),
            Step::CheckLine(cursor) => self.check_line(cursor),
            Step::ImportStart => self.import_start(),
            Step::ImportLine(cursor) => self.import_line(cursor),
            Step::DeleteStart => self.delete_start(),
            Step::DeleteItem(queue, total) => self.delete_item(queue, total),
            Step::PostUpdateStart => self.post_update_start(),
            Step::PostUpdateItem(queue, total) => self.post_update_item(queue, total),
            Step::ImportEnd => self.import_end(),
            Step::Finish => self.close(Phase::Closed),
            Step::Abort => self.close(Phase::Aborted),
            Step::Done => (Step::Done, None),
        }
    }

    fn scan(&mut self) -> (Step, Option<Progress>) {
        self.phase = Phase::HeaderScan;
        let separator = self.doc.separator;
        let ok = scan_all(&mut self.doc.files, separator, &mut self.errors);
        self.doc.counters.row_count = self.primary_rows();

        let count = self.doc.files.len();
        let message = format!("Read headers of {count} file(s), {} data row(s)", self.doc.counters.row_count);
        log_phase(LogLevel::Info, self.phase, message);

        let next = if ok { Step::Start } else { Step::Abort };
        let progress = self.progress(0, self.doc.counters.row_count, format!("Reading headers of {count} file(s)"));
        (next, Some(progress))
    }

    fn start(&mut self) -> (Step, Option<Progress>) {
        let accepted = self.repo.start(&self.doc, &mut self.errors);
        if self.refused(accepted) {
            return (Step::Abort, Some(self.progress(0, 0, "Import refused")));
        }

        let next = if self.doc.files.len() > 1 {
            Step::PreloadFile(0)
        } else {
            self.after_preload()
        };
        (next, Some(self.progress(0, self.doc.counters.row_count, "Starting import")))
    }

    fn preload_file(&mut self, file: usize) -> (Step, Option<Progress>) {
        self.phase = Phase::Preload;
        self.doc.current_file = file;
        let accepted = self.repo.start_preloading(&self.doc, &mut self.errors);
        if self.refused(accepted) {
            return (Step::Abort, Some(self.progress(0, 0, "Preloading refused")));
        }

        let descriptor = &self.doc.files[file];
        let cursor = LineCursor::new(descriptor);
        let progress = self.progress(0, descriptor.row_count, format!("Preloading {}", descriptor.name));
        (Step::PreloadLine(file, cursor), Some(progress))
    }

    fn preload_line(&mut self, file: usize, mut cursor: LineCursor) -> (Step, Option<Progress>) {
        let rows = self.doc.files[file].row_count;
        let name = self.doc.files[file].name.clone();

        let Some((line_no, parsed)) = self.read_line(file, &mut cursor) else {
            let accepted = self.repo.end_preloading(&self.doc, &mut self.errors);
            if self.refused(accepted) {
                return (Step::Abort, Some(self.progress(rows, rows, format!("Preloading {name} failed"))));
            }
            let next = if file + 1 < self.doc.files.len() {
                Step::PreloadFile(file + 1)
            } else {
                let next = self.after_preload();
                self.end_phase(next)
            };
            return (next, Some(self.progress(rows, rows, format!("Preloaded {name}"))));
        };

        self.doc.counters.row_number = cursor.rows_read();
        let mut line_errors = Diagnostics::new();
        match parsed {
            Ok(line) => {
                self.repo.preload_record(&self.doc, &line, &mut line_errors);
            }
            Err(err) if err.is_fatal() => line_errors.add_fatal(err),
            Err(err) => line_errors.add_global(err),
        }

        let progress = self.progress(cursor.rows_read(), rows, format!("Preloading {name}"));
        if self.merge_line_errors(line_label(&name, line_no), line_errors) {
            return (Step::Abort, Some(progress));
        }
        (Step::PreloadLine(file, cursor), Some(progress))
    }

    fn check_start(&mut self) -> (Step, Option<Progress>) {
        self.phase = Phase::Check;
        self.doc.current_file = 0;
        self.doc.counters.row_added = 0;
        self.doc.counters.row_updated = 0;
        self.doc.counters.row_deleted = 0;

        let accepted = self.repo.start_checking(&self.doc, &mut self.errors);
        if self.refused(accepted) {
            return (Step::Abort, Some(self.progress(0, 0, "Check refused")));
        }

        let cursor = LineCursor::new(&self.doc.files[0]);
        (Step::CheckLine(cursor), Some(self.progress(0, self.primary_rows(), "Checking")))
    }

    fn check_line(&mut self, mut cursor: LineCursor) -> (Step, Option<Progress>) {
        let rows = self.primary_rows();

        let Some((line_no, parsed)) = self.read_line(0, &mut cursor) else {
            let accepted = self.repo.end_checking(&self.doc, &mut self.errors);
            if self.refused(accepted) {
                return (Step::Abort, Some(self.progress(rows, rows, "Check failed")));
            }
            if self.doc.will_delete_rows {
                self.doc.counters.row_deleted = self.repo.rows_to_delete(&self.doc);
            }

            let c = self.doc.counters;
            let message = format!(
                "Checked: {} to add, {} to update, {} to delete",
                c.row_added, c.row_updated, c.row_deleted
            );
            log_phase(LogLevel::Info, self.phase, message.clone());
            let next = self.after_check();
            let next = self.end_phase(next);
            return (next, Some(self.progress(rows, rows, message)));
        };

        self.doc.counters.row_number = cursor.rows_read();
        let mut line_errors = Diagnostics::new();
        match parsed {
            Ok(line) => {
                let valid = self.repo.check_record(&self.doc, &line, &mut line_errors);
                if valid && !line_errors.has_error() {
                    let pair = self.repo.record_from_line(&self.doc, &line, &mut line_errors);
                    match pair.map(|p| p.classify()) {
                        Some(Change::Add) => self.doc.counters.row_added += 1,
                        Some(Change::Update) => self.doc.counters.row_updated += 1,
                        _ => {}
                    }
                }
            }
            Err(err) if err.is_fatal() => line_errors.add_fatal(err),
            Err(err) => line_errors.add_global(err),
        }

        let name = self.doc.files[0].name.clone();
        let progress = self.progress(cursor.rows_read(), rows, "Checking");
        if self.merge_line_errors(line_label(&name, line_no), line_errors) {
            return (Step::Abort, Some(progress));
        }
        (Step::CheckLine(cursor), Some(progress))
    }

    fn import_start(&mut self) -> (Step, Option<Progress>) {
        self.phase = Phase::Import;
        self.doc.current_file = 0;
        // The check pass was a preview; state may have moved since.
        self.doc.counters.row_added = 0;
        self.doc.counters.row_updated = 0;
        self.doc.counters.row_deleted = 0;

        let accepted = self.repo.start_importing(&self.doc, &mut self.errors);
        if self.refused(accepted) {
            return (Step::Abort, Some(self.progress(0, 0, "Import refused")));
        }

        let cursor = LineCursor::new(&self.doc.files[0]);
        (Step::ImportLine(cursor), Some(self.progress(0, self.primary_rows(), "Importing")))
    }

    fn import_line(&mut self, mut cursor: LineCursor) -> (Step, Option<Progress>) {
        let rows = self.primary_rows();

        let Some((line_no, parsed)) = self.read_line(0, &mut cursor) else {
            let c = self.doc.counters;
            let message = format!("Imported: {} added, {} updated", c.row_added, c.row_updated);
            log_phase(LogLevel::Info, self.phase, message.clone());
            let next = if self.doc.will_delete_rows {
                Step::DeleteStart
            } else {
                Step::PostUpdateStart
            };
            let next = self.end_phase(next);
            return (next, Some(self.progress(rows, rows, message)));
        };

        self.doc.counters.row_number = cursor.rows_read();
        let mut line_errors = Diagnostics::new();
        match parsed {
            Ok(line) => {
                if let Some(pair) = self.repo.record_from_line(&self.doc, &line, &mut line_errors) {
                    self.apply(pair, &mut line_errors);
                }
            }
            Err(err) if err.is_fatal() => line_errors.add_fatal(err),
            Err(err) => line_errors.add_global(err),
        }

        let name = self.doc.files[0].name.clone();
        let progress = self.progress(cursor.rows_read(), rows, "Importing");
        if self.merge_line_errors(line_label(&name, line_no), line_errors) {
            return (Step::Abort, Some(progress));
        }
        (Step::ImportLine(cursor), Some(progress))
    }

    fn apply(&mut self, pair: RecordPair, line_errors: &mut Diagnostics) {
        match pair.classify() {
            Change::Add => {
                if let Some(new) = &pair.new {
                    if self.repo.add_item(&self.doc, new, line_errors) {
                        self.doc.counters.row_added += 1;
                    }
                }
            }
            Change::Update => {
                if let (Some(id), Some(old), Some(new)) = (&pair.id, &pair.old, &pair.new) {
                    if self.repo.update_item(&self.doc, id, old, new, line_errors) {
                        self.doc.counters.row_updated += 1;
                    }
                }
            }
            Change::Unchanged | Change::Skip => {}
        }
    }

    fn delete_start(&mut self) -> (Step, Option<Progress>) {
        self.phase = Phase::Delete;
        let queue: VecDeque<_> = self.repo.items_to_delete(&self.doc, &mut self.errors).into();
        let total = queue.len();
        if self.errors.has_fatal() {
            return (Step::Abort, Some(self.progress(0, total, "Deletion refused")));
        }
        (Step::DeleteItem(queue, total), Some(self.progress(0, total, format!("Deleting {total} row(s)"))))
    }

    fn delete_item(&mut self, mut queue: VecDeque<DeleteCandidate>, total: usize) -> (Step, Option<Progress>) {
        let Some(candidate) = queue.pop_front() else {
            log_phase(LogLevel::Info, self.phase, format!("Deleted {} row(s)", self.doc.counters.row_deleted));
            let next = self.end_phase(Step::PostUpdateStart);
            return (next, Some(self.progress(total, total, "Deletion done")));
        };

        let mut item_errors = Diagnostics::new();
        if self.repo.delete_item(&self.doc, &candidate.id, &candidate.record, &mut item_errors) {
            self.doc.counters.row_deleted += 1;
        }

        let done = total - queue.len();
        let progress = self.progress(done, total, "Deleting");
        if self.merge_line_errors(format!("delete {}", candidate.id), item_errors) {
            return (Step::Abort, Some(progress));
        }
        (Step::DeleteItem(queue, total), Some(progress))
    }

    fn post_update_start(&mut self) -> (Step, Option<Progress>) {
        self.phase = Phase::PostUpdate;
        let queue: VecDeque<_> = self.repo.items_to_post_update(&self.doc, &mut self.errors).into();
        let total = queue.len();
        if self.errors.has_fatal() {
            return (Step::Abort, Some(self.progress(0, total, "Post-update refused")));
        }
        (Step::PostUpdateItem(queue, total), Some(self.progress(0, total, "Resolving keys")))
    }

    fn post_update_item(&mut self, mut queue: VecDeque<RecordPair>, total: usize) -> (Step, Option<Progress>) {
        let Some(pair) = queue.pop_front() else {
            let next = self.end_phase(Step::ImportEnd);
            return (next, Some(self.progress(total, total, "Keys resolved")));
        };

        let mut item_errors = Diagnostics::new();
        let label = format!("post-update {}", pair.id.as_deref().unwrap_or("?"));
        if let (Some(id), Some(old), Some(new)) = (&pair.id, &pair.old, &pair.new) {
            self.repo.update_item(&self.doc, id, old, new, &mut item_errors);
        }

        let done = total - queue.len();
        let progress = self.progress(done, total, "Resolving keys");
        if self.merge_line_errors(label, item_errors) {
            return (Step::Abort, Some(progress));
        }
        (Step::PostUpdateItem(queue, total), Some(progress))
    }

    fn import_end(&mut self) -> (Step, Option<Progress>) {
        let accepted = self.repo.end_importing(&self.doc, &mut self.errors);
        if self.refused(accepted) {
            return (Step::Abort, Some(self.progress(0, 0, "Import not committed")));
        }
        let next = self.end_phase(Step::Finish);
        let rows = self.primary_rows();
        (next, Some(self.progress(rows, rows, "Committing")))
    }

    fn close(&mut self, phase: Phase) -> (Step, Option<Progress>) {
        self.phase = phase;
        self.call_end();
        self.doc.clear_transient();

        let c = self.doc.counters;
        let message = if phase == Phase::Closed && !self.errors.has_error() {
            let message = format!(
                "Import complete: {} added, {} updated, {} deleted",
                c.row_added, c.row_updated, c.row_deleted
            );
            log_phase(LogLevel::Success, phase, message.clone());
            message
        } else {
            let message = format!("Import aborted with {} error(s)", self.errors.count());
            log_phase(LogLevel::Warning, phase, message.clone());
            message
        };
        (Step::Done, Some(self.progress(c.row_count, c.row_count, message)))
    }
}

impl<R: Repository + ?Sized> Iterator for ImportJob<'_, R> {
    type Item = Progress;

    fn next(&mut self) -> Option<Progress> {
        loop {
            let step = std::mem::replace(&mut self.step, Step::Done);
            if matches!(step, Step::Done) {
                return None;
            }
            let (next, progress) = self.run(step);
            self.step = next;
            if progress.is_some() {
                return progress;
            }
        }
    }
}

impl<R: Repository + ?Sized> Drop for ImportJob<'_, R> {
    fn drop(&mut self) {
        // A job dropped mid-way still releases what `start` acquired.
        if !self.ended && self.phase != Phase::Idle {
            self.call_end();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    /// Records every hook call; stores rows by `Name`.
    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        rows: BTreeMap<String, Record>,
        refuse_start: bool,
        fatal_on: Option<String>,
        deletable: Vec<String>,
        preloaded: Vec<String>,
        seen: Vec<String>,
        refuse_preload_end: Option<String>,
        post_update: Vec<RecordPair>,
    }

    impl Recorder {
        fn with_rows(rows: &[(&str, Value)]) -> Self {
            Self {
                rows: rows
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.as_object().cloned().unwrap()))
                    .collect(),
                ..Self::default()
            }
        }

        fn count(&self, hook: &str) -> usize {
            self.calls.iter().filter(|c| *c == hook).count()
        }
    }

    impl Repository for Recorder {
        fn start(&mut self, _: &Document, _: &mut Diagnostics) -> bool {
            self.calls.push("start".into());
            !self.refuse_start
        }

        fn start_preloading(&mut self, doc: &Document, _: &mut Diagnostics) -> bool {
            self.calls.push(format!("start_preloading {}", doc.current().unwrap().name));
            true
        }

        fn preload_record(&mut self, _: &Document, line: &ParsedLine, _: &mut Diagnostics) -> bool {
            self.preloaded.push(format!("{}:{}", line.file, line.line));
            true
        }

        fn end_preloading(&mut self, doc: &Document, _: &mut Diagnostics) -> bool {
            let name = doc.current().unwrap().name.clone();
            self.calls.push(format!("end_preloading {name}"));
            self.refuse_preload_end.as_deref() != Some(name.as_str())
        }

        fn check_record(&mut self, _: &Document, line: &ParsedLine, errors: &mut Diagnostics) -> bool {
            if self.fatal_on.as_deref() == line.get("Name") {
                errors.add_fatal("store unavailable");
                return false;
            }
            true
        }

        fn record_from_line(&mut self, _: &Document, line: &ParsedLine, _: &mut Diagnostics) -> Option<RecordPair> {
            let name = line.get("Name")?.to_string();
            self.seen.push(name.clone());
            let new: Record = line
                .columns_by_name
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            Some(RecordPair {
                id: self.rows.contains_key(&name).then(|| name.clone()),
                old: self.rows.get(&name).cloned(),
                new: Some(new),
            })
        }

        fn rows_to_delete(&mut self, _: &Document) -> usize {
            self.rows.keys().filter(|k| !self.seen.contains(k)).count()
        }

        fn start_importing(&mut self, _: &Document, _: &mut Diagnostics) -> bool {
            self.seen.clear();
            true
        }

        fn add_item(&mut self, _: &Document, record: &Record, _: &mut Diagnostics) -> bool {
            let name = record["Name"].as_str().unwrap().to_string();
            self.rows.insert(name, record.clone());
            true
        }

        fn update_item(&mut self, _: &Document, id: &str, _: &Record, new: &Record, _: &mut Diagnostics) -> bool {
            self.calls.push(format!("update {id}"));
            self.rows.insert(id.to_string(), new.clone());
            true
        }

        fn items_to_delete(&mut self, _: &Document, _: &mut Diagnostics) -> Vec<DeleteCandidate> {
            self.deletable
                .iter()
                .map(|id| DeleteCandidate { id: id.clone(), record: Record::new() })
                .collect()
        }

        fn delete_item(&mut self, _: &Document, id: &str, _: &Record, errors: &mut Diagnostics) -> bool {
            self.calls.push(format!("delete {id}"));
            if id == "boom" {
                errors.add_fatal("cannot delete");
                return false;
            }
            self.rows.remove(id).is_some()
        }

        fn items_to_post_update(&mut self, _: &Document, _: &mut Diagnostics) -> Vec<RecordPair> {
            std::mem::take(&mut self.post_update)
        }

        fn end(&mut self, _: &Document, _: &mut Diagnostics) {
            self.calls.push("end".into());
        }
    }

    const PEOPLE: &str = "Name;Age\n\"Ann\";30\n\"Bob\";25\n";

    fn doc(content: &str) -> Document {
        Document::new("people.csv").with_content(content)
    }

    #[test]
    fn test_import_into_empty_store() {
        let mut repo = Recorder::default();
        let outcome = ImportJob::new(doc(PEOPLE), vec![], &mut repo, ImportOptions::default()).finish();

        assert!(outcome.is_applied());
        assert_eq!(outcome.counters.row_added, 2);
        assert_eq!(outcome.counters.row_updated, 0);
        assert_eq!(repo.rows["Bob"]["Age"], "25");
        assert_eq!(repo.count("end"), 1);
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let mut repo = Recorder::default();
        ImportJob::new(doc(PEOPLE), vec![], &mut repo, ImportOptions::default()).finish();
        let outcome = ImportJob::new(doc(PEOPLE), vec![], &mut repo, ImportOptions::default()).finish();

        assert!(outcome.is_applied());
        assert_eq!(outcome.counters.row_added, 0);
        assert_eq!(outcome.counters.row_updated, 0);
    }

    #[test]
    fn test_check_only_previews_without_applying() {
        let mut repo = Recorder::with_rows(&[("Ann", json!({ "Name": "Ann", "Age": "29" }))]);
        let options = ImportOptions { skip_import: true, ..ImportOptions::default() };
        let outcome = ImportJob::new(doc(PEOPLE), vec![], &mut repo, options).finish();

        assert_eq!(outcome.phase, Phase::Closed);
        assert_eq!(outcome.counters.row_added, 1);
        assert_eq!(outcome.counters.row_updated, 1);
        assert_eq!(repo.rows["Ann"]["Age"], "29");
        assert!(!repo.rows.contains_key("Bob"));
    }

    #[test]
    fn test_update_counts_only_changed_rows() {
        let mut repo = Recorder::with_rows(&[
            ("Ann", json!({ "Name": "Ann", "Age": "31" })),
            ("Bob", json!({ "Name": "Bob", "Age": "25" })),
        ]);
        let outcome = ImportJob::new(doc(PEOPLE), vec![], &mut repo, ImportOptions::default()).finish();

        assert_eq!(outcome.counters.row_updated, 1);
        assert_eq!(repo.count("update Ann"), 1);
        assert_eq!(repo.count("update Bob"), 0);
    }

    #[test]
    fn test_duplicate_headers_abort_before_start() {
        let mut repo = Recorder::default();
        let extra = vec![FileDescriptor::new("extra.csv", "")];
        let outcome = ImportJob::new(doc("Name;Name\nA;B\n"), extra, &mut repo, ImportOptions::default()).finish();

        assert_eq!(outcome.phase, Phase::Aborted);
        assert!(!outcome.errors.has_fatal());
        assert_eq!(outcome.errors.count(), 2);
        assert_eq!(repo.count("start"), 0);
        assert_eq!(repo.count("end"), 1);
        assert!(repo.rows.is_empty());
    }

    #[test]
    fn test_short_line_is_reported_and_phase_completes() {
        let mut repo = Recorder::default();
        let content = "Name;Age\nAnn\nBob;25\n";
        let outcome = ImportJob::new(doc(content), vec![], &mut repo, ImportOptions::default()).finish();

        assert_eq!(outcome.phase, Phase::Aborted);
        assert!(!outcome.errors.has_fatal());
        assert_eq!(outcome.errors.lines(), vec!["people.csv: line 2: Column count mismatch: expected 2, found 1"]);
        // The whole check pass ran, the import pass did not
        assert_eq!(outcome.counters.row_added, 1);
        assert!(repo.rows.is_empty());
        assert_eq!(repo.count("end"), 1);
    }

    #[test]
    fn test_unterminated_quote_is_fatal() {
        let mut repo = Recorder::default();
        let content = "Name;Age\nAnn;30\n\"Bob;25\nCid;40\n";
        let outcome = ImportJob::new(doc(content), vec![], &mut repo, ImportOptions::default()).finish();

        assert_eq!(outcome.phase, Phase::Aborted);
        assert!(outcome.errors.has_fatal());
        assert_eq!(repo.count("end"), 1);
    }

    #[test]
    fn test_fatal_line_error_stops_phase() {
        let mut repo = Recorder { fatal_on: Some("Ann".into()), ..Recorder::default() };
        let outcome = ImportJob::new(doc(PEOPLE), vec![], &mut repo, ImportOptions::default()).finish();

        assert_eq!(outcome.phase, Phase::Aborted);
        assert!(outcome.errors.has_fatal());
        assert_eq!(outcome.counters.row_number, 1);
        assert!(repo.seen.is_empty());
        assert_eq!(repo.count("end"), 1);
    }

    #[test]
    fn test_refused_start_synthesizes_abort() {
        let mut repo = Recorder { refuse_start: true, ..Recorder::default() };
        let outcome = ImportJob::new(doc(PEOPLE), vec![], &mut repo, ImportOptions::default()).finish();

        assert_eq!(outcome.phase, Phase::Aborted);
        assert_eq!(outcome.errors.lines(), vec!["Operation aborted"]);
        assert_eq!(repo.count("end"), 1);
    }

    #[test]
    fn test_preload_visits_every_file_in_order() {
        let mut repo = Recorder::default();
        let extra = vec![FileDescriptor::new("ages.csv", "Name;Town\nAnn;Oslo\n")];
        let outcome = ImportJob::new(doc(PEOPLE), extra, &mut repo, ImportOptions::default()).finish();

        assert!(outcome.is_applied());
        assert_eq!(
            repo.calls[1..5],
            ["start_preloading people.csv", "end_preloading people.csv", "start_preloading ages.csv", "end_preloading ages.csv"]
        );
        assert_eq!(repo.preloaded, vec!["people.csv:2", "people.csv:3", "ages.csv:2"]);
    }

    #[test]
    fn test_short_line_in_extra_file_is_labelled_and_preload_continues() {
        let mut repo = Recorder::default();
        let extra = vec![FileDescriptor::new("towns.csv", "Name;Town\nAnn\nBob;Rome\n")];
        let outcome = ImportJob::new(doc(PEOPLE), extra, &mut repo, ImportOptions::default()).finish();

        assert_eq!(outcome.phase, Phase::Aborted);
        assert!(!outcome.errors.has_fatal());
        assert_eq!(outcome.errors.lines(), vec!["towns.csv: line 2: Column count mismatch: expected 2, found 1"]);
        assert_eq!(repo.preloaded, vec!["people.csv:2", "people.csv:3", "towns.csv:3"]);
        assert_eq!(repo.count("end_preloading towns.csv"), 1);
        // Errors at the end of Preload keep Check and Import from running
        assert!(repo.seen.is_empty());
        assert!(repo.rows.is_empty());
        assert_eq!(repo.count("end"), 1);
    }

    #[test]
    fn test_refused_end_preloading_stops_remaining_files() {
        let mut repo = Recorder { refuse_preload_end: Some("people.csv".into()), ..Recorder::default() };
        let extra = vec![FileDescriptor::new("towns.csv", "Name;Town\nAnn;Oslo\n")];
        let outcome = ImportJob::new(doc(PEOPLE), extra, &mut repo, ImportOptions::default()).finish();

        assert_eq!(outcome.phase, Phase::Aborted);
        assert_eq!(outcome.errors.lines(), vec!["Operation aborted"]);
        assert_eq!(repo.count("end_preloading people.csv"), 1);
        assert_eq!(repo.count("start_preloading towns.csv"), 0);
        assert_eq!(repo.preloaded, vec!["people.csv:2", "people.csv:3"]);
        assert_eq!(repo.count("end"), 1);
    }

    #[test]
    fn test_post_update_pairs_go_through_update_item() {
        let mut repo = Recorder::default();
        let old = json!({ "Name": "Ann", "Age": "30" }).as_object().cloned().unwrap();
        let new = json!({ "Name": "Ann", "Age": "30", "Id": "1" }).as_object().cloned().unwrap();
        repo.post_update = vec![
            RecordPair { id: Some("Ann".into()), old: Some(old), new: Some(new) },
            RecordPair { id: None, old: None, new: None },
        ];
        let outcome = ImportJob::new(doc(PEOPLE), vec![], &mut repo, ImportOptions::default()).finish();

        assert!(outcome.is_applied());
        assert_eq!(outcome.counters.row_added, 2);
        assert_eq!(repo.count("update Ann"), 1);
        assert_eq!(repo.rows["Ann"]["Id"], "1");
        assert!(repo.post_update.is_empty());
    }

    #[test]
    fn test_delete_unreferenced_rows() {
        let mut repo = Recorder::with_rows(&[("Zed", json!({ "Name": "Zed", "Age": "70" }))]);
        repo.deletable = vec!["Zed".into()];
        let options = ImportOptions { delete_missing: true, ..ImportOptions::default() };
        let outcome = ImportJob::new(doc(PEOPLE), vec![], &mut repo, options).finish();

        assert!(outcome.is_applied());
        assert_eq!(outcome.counters.row_deleted, 1);
        assert!(!repo.rows.contains_key("Zed"));
    }

    #[test]
    fn test_fatal_delete_stops_remaining_deletions() {
        let mut repo = Recorder::default();
        repo.deletable = vec!["boom".into(), "later".into()];
        let options = ImportOptions { delete_missing: true, ..ImportOptions::default() };
        let outcome = ImportJob::new(doc(PEOPLE), vec![], &mut repo, options).finish();

        assert_eq!(outcome.phase, Phase::Aborted);
        assert_eq!(repo.count("delete boom"), 1);
        assert_eq!(repo.count("delete later"), 0);
        assert_eq!(repo.count("end"), 1);
    }

    #[test]
    fn test_progress_yields_per_line() {
        let mut repo = Recorder::default();
        let options = ImportOptions { skip_check: true, ..ImportOptions::default() };
        let steps: Vec<Progress> = ImportJob::new(doc(PEOPLE), vec![], &mut repo, options).collect();

        let import_lines = steps
            .iter()
            .filter(|p| p.phase == Phase::Import && p.message == "Importing" && p.current > 0)
            .count();
        assert_eq!(import_lines, 2);
        assert_eq!(steps.first().unwrap().phase, Phase::HeaderScan);
        assert_eq!(steps.last().unwrap().phase, Phase::Closed);
    }

    #[test]
    fn test_dropping_unfinished_job_calls_end_once() {
        let mut repo = Recorder::default();
        {
            let mut job = ImportJob::new(doc(PEOPLE), vec![], &mut repo, ImportOptions::default());
            job.next();
            job.next();
        }
        assert_eq!(repo.count("start"), 1);
        assert_eq!(repo.count("end"), 1);
    }

    #[test]
    fn test_untouched_job_does_not_call_end() {
        let mut repo = Recorder::default();
        drop(ImportJob::new(doc(PEOPLE), vec![], &mut repo, ImportOptions::default()));
        assert!(repo.calls.is_empty());
    }
}
