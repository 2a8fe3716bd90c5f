//! Progress reporting utilities using indicatif.
//!
//! [`Progress`] implements [`ProgressCallback`] with terminal progress bars
//! for downloads (bytes) and chunk loops (cells). [`PercentDisplay`] is the
//! lightweight percentage counter used by feature copy loops; it also carries
//! the optional early-stop limit.

use std::ops::ControlFlow;
use std::sync::Mutex;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Progress callback for long-running phases.
///
/// Implement this trait to receive progress updates from downloads and
/// chunk loops.
pub trait ProgressCallback: Send + Sync {
    /// Called when a phase starts.
    ///
    /// # Arguments
    ///
    /// * `phase` - Name of the phase (e.g., "download", "chunks")
    /// * `total` - Total number of units to process, 0 when unknown
    fn on_phase_start(&self, phase: &str, total: usize);

    /// Called as work advances.
    ///
    /// # Arguments
    ///
    /// * `current` - Units processed so far
    /// * `label` - What is being processed
    fn on_progress(&self, current: usize, label: &str);

    /// Called when a block of bytes has been processed.
    fn on_item_completed(&self, _bytes: u64) {}

    /// Called when a phase completes.
    fn on_phase_end(&self, phase: &str);

    /// Called to update the progress message.
    fn on_message(&self, _message: &str) {}
}

/// Progress reporter using indicatif.
pub struct Progress {
    multi: MultiProgress,
    download: Mutex<Option<ProgressBar>>,
    chunks: Mutex<Option<ProgressBar>>,
    quiet: bool,
}

impl Progress {
    /// Create a new progress reporter.
    ///
    /// # Arguments
    ///
    /// * `quiet` - If true, no progress bars will be displayed.
    ///
    /// # Examples
    ///
    /// ```
    /// use geostage::progress::Progress;
    ///
    /// let progress = Progress::new(false);
    /// ```
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            download: Mutex::new(None),
            chunks: Mutex::new(None),
            quiet,
        }
    }

    fn bytes_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.green/blue}] {bytes}/{total_bytes} {msg} {bytes_per_sec} (ETA: {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {bytes} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }

    fn count_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }

    fn slot(&self, phase: &str) -> Option<&Mutex<Option<ProgressBar>>> {
        match phase {
            "download" => Some(&self.download),
            "chunks" => Some(&self.chunks),
            _ => None,
        }
    }

    /// The innermost active bar: a running download wins over the chunk loop.
    fn active(&self) -> Option<ProgressBar> {
        [&self.download, &self.chunks]
            .into_iter()
            .find_map(|slot| slot.lock().ok().and_then(|bar| bar.clone()))
    }
}

impl ProgressCallback for Progress {
    fn on_phase_start(&self, phase: &str, total: usize) {
        if self.quiet {
            return;
        }

        let pb = match phase {
            "download" if total == 0 => {
                let pb = self.multi.add(ProgressBar::new_spinner());
                pb.set_style(Self::spinner_style());
                pb
            }
            "download" => {
                let pb = self.multi.add(ProgressBar::new(total as u64));
                pb.set_style(Self::bytes_style());
                pb
            }
            _ => {
                let pb = self.multi.add(ProgressBar::new(total as u64));
                pb.set_style(Self::count_style());
                pb.set_message(phase.to_string());
                pb
            }
        };

        if let Some(slot) = self.slot(phase) {
            if let Ok(mut guard) = slot.lock() {
                *guard = Some(pb);
            }
        }
    }

    fn on_progress(&self, current: usize, label: &str) {
        if self.quiet {
            return;
        }
        if let Some(pb) = self.active() {
            pb.set_position(current as u64);
            pb.set_message(truncate_label(label, 30));
        }
    }

    fn on_phase_end(&self, phase: &str) {
        if self.quiet {
            return;
        }
        let Some(slot) = self.slot(phase) else {
            return;
        };
        if let Some(pb) = slot.lock().ok().and_then(|mut bar| bar.take()) {
            pb.finish_and_clear();
        }
    }

    fn on_message(&self, message: &str) {
        if self.quiet {
            return;
        }
        if let Some(pb) = self.active() {
            pb.set_message(message.to_string());
        }
    }
}

/// Truncate a label for display in a progress bar.
fn truncate_label(label: &str, max_len: usize) -> String {
    if label.chars().count() <= max_len {
        return label.to_string();
    }
    let tail: String = label
        .chars()
        .rev()
        .take(max_len.saturating_sub(3))
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("...{tail}")
}

/// Percentage counter for feature loops.
///
/// The display refreshes every `percent_step` percent. With a limit set,
/// [`inc`](Self::inc) breaks once the counter passes it.
#[derive(Debug)]
pub struct PercentDisplay {
    count: usize,
    brk: usize,
    counter: usize,
    limit: Option<usize>,
    bar: ProgressBar,
}

impl PercentDisplay {
    /// Create a counter over `count` items, refreshing every percent.
    #[must_use]
    pub fn new(count: usize) -> Self {
        let bar = ProgressBar::new(count as u64);
        bar.set_style(
            ProgressStyle::with_template("{percent}%")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self {
            count,
            brk: Self::break_every(count, 1.0),
            counter: 0,
            limit: None,
            bar,
        }
    }

    /// Counter that never draws.
    #[must_use]
    pub fn hidden(count: usize) -> Self {
        let mut display = Self::new(count);
        display.bar = ProgressBar::hidden();
        display
    }

    /// Refresh every `percent_step` percent instead of every percent.
    #[must_use]
    pub fn with_percent_step(mut self, percent_step: f64) -> Self {
        self.brk = Self::break_every(self.count, percent_step);
        self
    }

    /// Stop once more than `limit` items were counted.
    #[must_use]
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    fn break_every(count: usize, percent_step: f64) -> usize {
        (count as f64 / 100.0 * percent_step) as usize + 1
    }

    /// Items counted so far.
    #[must_use]
    pub fn counter(&self) -> usize {
        self.counter
    }

    /// Current percentage, truncated.
    #[must_use]
    pub fn percent(&self) -> usize {
        if self.count == 0 {
            return 100;
        }
        self.counter * 100 / self.count
    }

    /// Count one item.
    pub fn inc(&mut self) -> ControlFlow<()> {
        self.counter += 1;
        if self.limit.is_some_and(|limit| limit < self.counter) {
            return ControlFlow::Break(());
        }
        if self.counter % self.brk == 0 {
            self.bar.set_position(self.counter as u64);
        }
        ControlFlow::Continue(())
    }

    /// Draw the final state.
    pub fn finish(&self) {
        self.bar.set_position(self.counter.min(self.count) as u64);
        self.bar.finish_and_clear();
    }
}
