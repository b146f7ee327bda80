// Terminal output: a progress bar per resumable upload and the end-of-run
// summary. Kept apart from the job so the library never draws to the
// terminal itself beyond its plain status lines.

use crate::job::{RunReport, SweepOutcome, UploadOutcome};
use indicatif::{ProgressBar, ProgressStyle};

/// Draws one bar per remote name, replacing it when the next upload starts.
#[derive(Default)]
pub struct UploadProgress {
    current: Option<(String, ProgressBar)>,
}

impl UploadProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn bar_for(&mut self, name: &str) -> ProgressBar {
        if let Some((current, bar)) = &self.current {
            if current == name {
                return bar.clone();
            }
        }
        if let Some((_, old)) = self.current.take() {
            old.abandon();
        }
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template("{msg} [{bar:40}] {pos:>3}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        bar.set_message(name.to_string());
        self.current = Some((name.to_string(), bar.clone()));
        bar
    }

    /// Report `percent` for the upload named `name`.
    pub fn update(&mut self, name: &str, percent: u8) {
        let bar = self.bar_for(name);
        bar.set_position(u64::from(percent));
        if percent >= 100 {
            bar.finish();
        }
    }
}

/// One line per category and phase.
pub fn summary_lines(report: &RunReport) -> Vec<String> {
    let mut lines = Vec::new();
    for category in &report.categories {
        match &category.upload {
            Some(UploadOutcome::Uploaded(obj)) => {
                lines.push(format!("{}: uploaded {} (ID: {})", category.name, obj.name, obj.id))
            }
            Some(UploadOutcome::NoLocalFile) => {
                lines.push(format!("{}: no local backup to upload", category.name))
            }
            Some(UploadOutcome::Failed(e)) => {
                lines.push(format!("{}: upload FAILED: {e}", category.name))
            }
            None => {}
        }
        match &category.sweep {
            Some(SweepOutcome::Swept { deleted }) => {
                lines.push(format!("{}: {deleted} expired backup(s) removed", category.name))
            }
            Some(SweepOutcome::Failed(e)) => {
                lines.push(format!("{}: retention sweep FAILED: {e}", category.name))
            }
            None => {}
        }
    }
    lines
}

pub fn print_summary(report: &RunReport) {
    for line in summary_lines(report) {
        println!("{line}");
    }
}
