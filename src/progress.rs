//! Terminal progress for transfers
//!
//! One byte bar per file entry, plus a summary line once the session ends.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;

/// Session-wide progress display; hands out per-entry byte bars
pub struct TransferProgress {
    enabled: bool,
    start_time: Instant,
}

impl TransferProgress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            start_time: Instant::now(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    /// Byte bar for one file body; hidden when progress is off
    pub fn file_bar(&self, name: &str, total: u64) -> ProgressBar {
        if !self.enabled {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("  {msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.set_message(name.to_string());
        bar
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_bar_is_hidden() {
        let progress = TransferProgress::disabled();
        let bar = progress.file_bar("a.txt", 10);
        assert!(bar.is_hidden());
        bar.inc(10);
        assert_eq!(bar.position(), 10);
    }
}
