// The backup run: upload each category's newest archive, then sweep each
// category's expired uploads. Categories are isolated from each other; a
// failure in one is recorded and the run moves on. Only configuration and
// authentication errors stop the whole run.

use crate::auth::Connect;
use crate::config::{Category, Settings};
use crate::error::{Error, Result};
use crate::locate::latest_backup;
use crate::store::RemoteObject;
use crate::sweep::Sweeper;
use crate::upload::Uploader;
use chrono::{DateTime, Utc};
use tracing::{error, info, info_span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phases {
    pub upload: bool,
    pub sweep: bool,
    pub dry_run: bool,
}

impl Default for Phases {
    fn default() -> Self {
        Self {
            upload: true,
            sweep: true,
            dry_run: false,
        }
    }
}

#[derive(Debug)]
pub enum UploadOutcome {
    Uploaded(RemoteObject),
    NoLocalFile,
    Failed(String),
}

#[derive(Debug)]
pub enum SweepOutcome {
    Swept { deleted: usize },
    Failed(String),
}

#[derive(Debug)]
pub struct CategoryReport {
    pub name: String,
    pub upload: Option<UploadOutcome>,
    pub sweep: Option<SweepOutcome>,
}

impl CategoryReport {
    pub fn failed(&self) -> bool {
        matches!(self.upload, Some(UploadOutcome::Failed(_)))
            || matches!(self.sweep, Some(SweepOutcome::Failed(_)))
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub categories: Vec<CategoryReport>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        self.categories.iter().any(CategoryReport::failed)
    }

    pub fn category(&self, name: &str) -> Option<&CategoryReport> {
        self.categories.iter().find(|c| c.name == name)
    }
}

pub struct Job<'a, C: Connect> {
    settings: &'a Settings,
    connector: &'a C,
    phases: Phases,
}

impl<'a, C: Connect> Job<'a, C> {
    pub fn new(settings: &'a Settings, connector: &'a C, phases: Phases) -> Self {
        Self {
            settings,
            connector,
            phases,
        }
    }

    /// Run the enabled phases. `progress` gets `(remote name, percent)` for
    /// every acknowledged chunk of a resumable upload.
    pub fn run(
        &self,
        now: DateTime<Utc>,
        progress: &mut dyn FnMut(&str, u8),
    ) -> Result<RunReport> {
        let mut report = RunReport {
            categories: self
                .settings
                .active_categories()
                .map(|c| CategoryReport {
                    name: c.name.clone(),
                    upload: None,
                    sweep: None,
                })
                .collect(),
        };

        if self.phases.upload {
            for (category, entry) in self.settings.active_categories().zip(&mut report.categories) {
                let _span = info_span!("upload", category = %category.name).entered();
                let outcome = match self.upload_category(category, progress) {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        error!("upload for {} failed: {e}", category.name);
                        UploadOutcome::Failed(e.to_string())
                    }
                };
                entry.upload = Some(outcome);
            }
        }

        if self.phases.sweep {
            let names = self.settings.category_names();
            for (category, entry) in self.settings.active_categories().zip(&mut report.categories) {
                let _span = info_span!("sweep", category = %category.name).entered();
                let outcome = match self.sweep_category(category, &names, now) {
                    Ok(deleted) => SweepOutcome::Swept { deleted },
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        error!("retention sweep for {} failed: {e}", category.name);
                        SweepOutcome::Failed(e.to_string())
                    }
                };
                entry.sweep = Some(outcome);
            }
        }

        Ok(report)
    }

    fn upload_category(
        &self,
        category: &Category,
        progress: &mut dyn FnMut(&str, u8),
    ) -> Result<UploadOutcome> {
        let Some(latest) = latest_backup(&category.source_dir, category.pattern())? else {
            info!("nothing to upload for {}", category.name);
            return Ok(UploadOutcome::NoLocalFile);
        };

        let name = category.remote_name(&latest.path);
        let store = self.connector.connect()?;
        let object = Uploader::from_settings(&store, self.settings).upload(
            &latest.path,
            &name,
            &mut |pct| progress(&name, pct),
        )?;
        Ok(UploadOutcome::Uploaded(object))
    }

    fn sweep_category(
        &self,
        category: &Category,
        names: &[&str],
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let store = self.connector.connect()?;
        let report = Sweeper::from_settings(&store, self.settings)
            .dry_run(self.phases.dry_run)
            .sweep(&category.name, names, now)?;
        Ok(report.deleted.len())
    }
}

/// Process exit status: 0 all good, 1 some category failed, 2 fatal.
pub fn exit_code(result: &Result<RunReport, Error>) -> u8 {
    match result {
        Ok(report) if !report.has_failures() => 0,
        Ok(_) => 1,
        Err(e) if e.is_fatal() => 2,
        Err(_) => 1,
    }
}
