//! Relay progress display with progress bars.

use ferry_core::ProgressListener;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const BAR_TEMPLATE: &str = "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// Progress bar fed by the upload leg of a relay
pub struct TransferProgress {
    bar: ProgressBar,
}

impl TransferProgress {
    /// Create a new progress tracker
    #[must_use]
    pub fn new(total_bytes: u64, label: &str) -> Self {
        let bar = ProgressBar::new(total_bytes);

        let style = ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.set_message(format!("Relaying: {label}"));

        Self { bar }
    }

    /// Bytes shown so far
    #[must_use]
    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Finish with custom message
    pub fn finish_with_message(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }

    /// Abandon the progress bar (for errors)
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

impl ProgressListener for TransferProgress {
    fn started(&self) {
        self.bar.enable_steady_tick(Duration::from_millis(120));
    }

    fn transferred(&self, len: usize) {
        self.bar.inc(len as u64);
    }

    fn completed(&self) {
        self.bar.set_message("Relay complete");
    }

    fn aborted(&self) {
        self.bar.set_message("Relay aborted");
    }

    fn failed(&self) {
        self.bar.set_message("Relay failed");
    }
}

/// Format bytes in human-readable format
///
/// # Example
///
/// ```text
/// format_bytes(1024)        == "1.00 KB"
/// format_bytes(1024 * 1024) == "1.00 MB"
/// ```
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    format!("{size:.2} {}", UNITS[unit_idx])
}

/// Format a throughput from a byte count and the time it took
#[must_use]
pub fn format_rate(bytes: u64, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs <= f64::EPSILON {
        return "-".to_string();
    }
    format!("{}/s", format_bytes((bytes as f64 / secs) as u64))
}
