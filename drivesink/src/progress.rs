//! Terminal progress bars for file uploads.

use std::io::IsTerminal;
use std::sync::Arc;

use drivesink_core::ProgressFn;
use indicatif::{ProgressBar, ProgressStyle};

const TRANSFER_TEMPLATE: &str =
    "{msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} eta {eta}";

/// Hands out one progress bar per transfer, or hidden bars when disabled.
#[derive(Debug, Clone, Copy)]
pub struct ProgressReporter {
    enabled: bool,
}

impl ProgressReporter {
    pub fn hidden() -> Self {
        Self { enabled: false }
    }

    /// Draws to stderr, but only when it is attached to a terminal.
    pub fn terminal() -> Self {
        Self {
            enabled: std::io::stderr().is_terminal(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn transfer_bar(&self, label: &str, total: u64) -> ProgressBar {
        if !self.enabled {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(total);
        let style = ProgressStyle::with_template(TRANSFER_TEMPLATE)
            .map(|style| style.progress_chars("=> "))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar.set_message(label.to_string());
        bar
    }

    /// Wraps `bar` as the byte-count callback the upload body reports into.
    pub fn callback(bar: &ProgressBar) -> Arc<ProgressFn> {
        let bar = bar.clone();
        Arc::new(move |sent: u64, total: u64| {
            if bar.length() != Some(total) {
                bar.set_length(total);
            }
            bar.set_position(sent);
        })
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::hidden()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_reporter_still_tracks_position() {
        let reporter = ProgressReporter::hidden();
        let bar = reporter.transfer_bar("a.png", 100);
        let report = ProgressReporter::callback(&bar);

        report(40, 100);
        report(100, 100);

        assert!(!reporter.is_enabled());
        assert_eq!(bar.position(), 100);
    }

    #[test]
    fn callback_adopts_reported_total() {
        let bar = ProgressBar::hidden();
        let report = ProgressReporter::callback(&bar);

        report(5, 13);

        assert_eq!(bar.length(), Some(13));
        assert_eq!(bar.position(), 5);
    }
}
