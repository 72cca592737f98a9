//! Download progress for the terminal.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Create a byte progress bar, hidden when progress output is disabled
pub fn download_bar(enabled: bool, name: &str) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_message(name.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Callback feeding `(downloaded, total)` into `pb`
pub fn tracker(pb: ProgressBar) -> impl Fn(u64, u64) + 'static {
    move |downloaded, total| {
        // Servers without Content-Length report a total of zero
        if total > 0 && pb.length() != Some(total) {
            pb.set_length(total);
        }
        pb.set_position(downloaded);
    }
}
