//! Import path: multi-file preloading and the phase orchestrator.
//!
//! - [`preload`] - header scanning across files and resumable line cursors
//! - [`orchestrator`] - the [`ImportJob`] state machine

pub mod orchestrator;
pub mod preload;

pub use orchestrator::{ImportJob, ImportOptions, ImportOutcome, Phase, Progress};
pub use preload::{parse_line, scan_all, LineCursor};

use crate::models::{Document, FileDescriptor};
use crate::progress::{drive, Event, Pacing};
use crate::repository::Repository;

/// Run a whole import under a cooperative driver.
///
/// `extra` files share the primary file's row space and are only read
/// during preloading.
pub async fn run_import<R, F>(
    doc: Document,
    extra: Vec<FileDescriptor>,
    repo: &mut R,
    options: ImportOptions,
    pacing: &Pacing,
    on_event: F,
) -> ImportOutcome
where
    R: Repository + ?Sized,
    F: FnMut(Event),
{
    let mut job = ImportJob::new(doc, extra, repo, options);
    drive(job.by_ref(), pacing, on_event).await;
    job.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TableSpec;
    use crate::repository::MemoryList;

    fn people() -> MemoryList {
        let mut spec = TableSpec::new("people");
        spec.key = Some("Name".into());
        MemoryList::new(spec)
    }

    #[tokio::test]
    async fn test_run_import_with_eager_pacing() {
        let mut list = people();
        let doc = Document::new("people.csv").with_content("Name;Age\nAnn;30\nBob;25\n");
        let mut events = Vec::new();

        let outcome = run_import(doc, vec![], &mut list, ImportOptions::default(), &Pacing::eager(), |event| {
            events.push(event)
        })
        .await;

        assert!(outcome.is_applied());
        assert_eq!(outcome.counters.row_added, 2);
        assert_eq!(list.len(), 2);
        assert!(!events.contains(&Event::Busy));
        assert!(matches!(events.last(), Some(Event::Progress(p)) if p.phase == Phase::Closed));
    }

    #[tokio::test]
    async fn test_run_import_in_small_batches() {
        let mut list = people();
        let doc = Document::new("people.csv").with_content("Name;Age\nAnn;30\nBob;25\nCid;40\n");
        let pacing = Pacing { frequency: 1, delay: std::time::Duration::ZERO, busy_after: None };

        let outcome = run_import(doc, vec![], &mut list, ImportOptions::default(), &pacing, |_| {}).await;

        assert!(outcome.is_applied());
        assert_eq!(list.len(), 3);
    }
}
