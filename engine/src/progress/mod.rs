//! Cooperative driver for progress sequences.
//!
//! An operation exposes its work as an [`Iterator`] of [`Progress`] tuples.
//! [`drive`] consumes it in batches of `frequency` items, sleeping `delay`
//! between batches so the host runtime can serve other tasks, and announces
//! a busy state once the operation has been running for `busy_after`.

use std::time::{Duration, Instant};

use crate::import::Progress;

/// Largest batch a driver consumes between two pauses.
pub const MAX_FREQUENCY: usize = 1 << 16;

/// Pacing of a cooperative driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Items consumed per batch.
    pub frequency: usize,
    /// Pause between two batches.
    pub delay: Duration,
    /// Elapsed time before the busy notification; `None` disables it.
    pub busy_after: Option<Duration>,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            frequency: 100,
            delay: Duration::from_millis(1),
            busy_after: Some(Duration::from_millis(500)),
        }
    }
}

impl Pacing {
    /// Largest batches, never pause.
    pub fn eager() -> Self {
        Self {
            frequency: MAX_FREQUENCY,
            delay: Duration::ZERO,
            busy_after: None,
        }
    }

    /// `frequency` bounded to `1..=MAX_FREQUENCY`.
    pub fn batch_size(&self) -> usize {
        self.frequency.clamp(1, MAX_FREQUENCY)
    }
}

/// What the driver reports to its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The operation outlived `busy_after`; sent at most once.
    Busy,
    Progress(Progress),
}

/// Drive `steps` to completion. Returns the number of progress items seen.
pub async fn drive<I, F>(steps: I, pacing: &Pacing, mut on_event: F) -> usize
where
    I: Iterator<Item = Progress>,
    F: FnMut(Event),
{
    let started = Instant::now();
    let batch_size = pacing.batch_size();
    let mut steps = steps.peekable();
    let mut busy = false;
    let mut seen = 0;
    let mut first = true;

    while steps.peek().is_some() {
        if !first && !pacing.delay.is_zero() {
            tokio::time::sleep(pacing.delay).await;
        }
        first = false;

        if let Some(threshold) = pacing.busy_after {
            if !busy && started.elapsed() >= threshold {
                busy = true;
                on_event(Event::Busy);
            }
        }

        for progress in steps.by_ref().take(batch_size) {
            seen += 1;
            on_event(Event::Progress(progress));
        }
    }
    seen
}
