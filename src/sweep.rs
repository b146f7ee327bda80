// Retention sweep: delete a category's remote backups once they fall
// behind the cutoff date.

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::store::{ListQuery, RemoteObject, RemoteStore};
use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::{debug, info, warn};

/// Midnight (UTC) of the day `retention_days` before `now`. Anything
/// modified strictly before it is expired; the comparison is by date, so
/// 23:59 and 00:01 on the cutoff day are both kept.
pub fn cutoff_date(now: DateTime<Utc>, retention_days: u32) -> Result<DateTime<Utc>> {
    let day = now
        .checked_sub_signed(Duration::days(i64::from(retention_days)))
        .ok_or_else(|| {
            Error::Config(format!("retention_days {retention_days} is out of range"))
        })?
        .date_naive();
    Ok(Utc.from_utc_datetime(&day.and_time(chrono::NaiveTime::MIN)))
}

/// Whether `name` belongs to category `prefix`.
///
/// The remote query only checks `name contains '{prefix}_'`, so this also
/// requires the name to start with it and not to belong to a longer
/// category that extends the prefix (`bot` vs `bot_archive`).
pub fn owns_name(prefix: &str, name: &str, categories: &[&str]) -> bool {
    let own = format!("{prefix}_");
    if !name.starts_with(&own) {
        return false;
    }
    !categories
        .iter()
        .filter(|other| other.len() > prefix.len() && other.starts_with(&own))
        .any(|other| name.starts_with(&format!("{other}_")))
}

#[derive(Debug, Default)]
pub struct SweepReport {
    /// Deleted objects, or the ones that would be deleted on a dry run.
    pub deleted: Vec<RemoteObject>,
    /// Listed by the store but rejected by the local ownership/age check.
    pub skipped: Vec<RemoteObject>,
}

pub struct Sweeper<'a, S: RemoteStore> {
    store: &'a S,
    parent: String,
    retention_days: u32,
    retry: RetryPolicy,
    dry_run: bool,
}

impl<'a, S: RemoteStore> Sweeper<'a, S> {
    pub fn new(store: &'a S, parent: impl Into<String>, retention_days: u32) -> Self {
        Self {
            store,
            parent: parent.into(),
            retention_days,
            retry: RetryPolicy::default(),
            dry_run: false,
        }
    }

    pub fn from_settings(store: &'a S, settings: &Settings) -> Self {
        Self::new(store, &settings.parent_folder_id, settings.retention_days)
            .retry(RetryPolicy::from_settings(settings))
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Every object in the folder matching `query`, all pages drained.
    fn list_all(&self, query: &ListQuery) -> Result<Vec<RemoteObject>> {
        let mut objects = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let what = format!("list {}", query.name_contains);
            let page = self
                .retry
                .run(&what, || self.store.list_objects(query, token.as_deref()))?;
            debug!(count = page.objects.len(), "listed page");
            objects.extend(page.objects);
            match page.next_page_token {
                Some(next) if Some(&next) != token.as_ref() => token = Some(next),
                Some(_) => {
                    warn!("store repeated page token; stopping listing");
                    break;
                }
                None => break,
            }
        }
        Ok(objects)
    }

    /// Delete the expired backups of `prefix`. `categories` is the full set
    /// of configured category names, used to keep overlapping prefixes apart.
    pub fn sweep(
        &self,
        prefix: &str,
        categories: &[&str],
        now: DateTime<Utc>,
    ) -> Result<SweepReport> {
        let cutoff = cutoff_date(now, self.retention_days)?;
        let query = ListQuery {
            parent: self.parent.clone(),
            name_contains: format!("{prefix}_"),
            modified_before: cutoff,
        };

        let listed = self.list_all(&query)?;
        let (expired, skipped): (Vec<_>, Vec<_>) = listed.into_iter().partition(|o| {
            owns_name(prefix, &o.name, categories) && o.modified_time < cutoff
        });
        for object in &skipped {
            debug!(name = %object.name, "not owned by {prefix} or not expired, skipping");
        }

        if expired.is_empty() {
            println!(
                "No backup files older than {} days found for {prefix}.",
                self.retention_days
            );
            return Ok(SweepReport {
                deleted: expired,
                skipped,
            });
        }

        for object in &expired {
            if self.dry_run {
                println!("Would delete file: {} (ID: {})", object.name, object.id);
                continue;
            }
            let what = format!("delete {}", object.name);
            self.retry.run(&what, || self.store.delete_object(&object.id))?;
            println!("Deleted file: {} (ID: {})", object.name, object.id);
        }
        info!(
            prefix,
            count = expired.len(),
            dry_run = self.dry_run,
            "retention sweep finished"
        );

        Ok(SweepReport {
            deleted: expired,
            skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::memory::{MemoryStore, Op};
    use std::time::Duration as StdDuration;

    const FOLDER: &str = "folder";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 15, 30, 0).unwrap()
    }

    fn sweeper(store: &MemoryStore, days: u32) -> Sweeper<'_, MemoryStore> {
        Sweeper::new(store, FOLDER, days).retry(RetryPolicy::new(1, StdDuration::ZERO))
    }

    #[test]
    fn cutoff_truncates_to_midnight() {
        assert_eq!(
            cutoff_date(now(), 2).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 18, 0, 0, 0).unwrap()
        );
        assert_eq!(
            cutoff_date(now(), 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 5, 20, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn cutoff_out_of_range_is_a_config_error() {
        let err = cutoff_date(now(), u32::MAX).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, Error::Config(_)));

        let store = MemoryStore::new();
        store.insert("site_db_old.tar.gz", FOLDER, now() - Duration::days(30));
        assert!(sweeper(&store, u32::MAX).sweep("site_db", &["site_db"], now()).is_err());
        assert_eq!(store.calls(Op::List), 0);
    }

    #[test]
    fn cutoff_day_is_date_grained() {
        let store = MemoryStore::new();
        let cutoff = cutoff_date(now(), 2).unwrap();
        store.insert("site_db_late.tar.gz", FOLDER, cutoff + Duration::minutes(23 * 60 + 59));
        store.insert("site_db_early.tar.gz", FOLDER, cutoff + Duration::minutes(1));
        store.insert("site_db_before.tar.gz", FOLDER, cutoff - Duration::minutes(1));

        let report = sweeper(&store, 2).sweep("site_db", &["site_db"], now()).unwrap();
        assert_eq!(report.deleted.len(), 1);
        assert_eq!(report.deleted[0].name, "site_db_before.tar.gz");
        assert_eq!(store.objects().len(), 2);
    }

    #[test]
    fn deletes_only_objects_before_cutoff() {
        let store = MemoryStore::new();
        store.insert("site_db_t10.tar.gz", FOLDER, now() - Duration::days(10));
        store.insert("site_db_t3.tar.gz", FOLDER, now() - Duration::days(3));
        store.insert("site_db_t1.tar.gz", FOLDER, now() - Duration::days(1));

        let report = sweeper(&store, 2).sweep("site_db", &["site_db"], now()).unwrap();
        let mut deleted: Vec<_> = report.deleted.iter().map(|o| o.name.as_str()).collect();
        deleted.sort_unstable();
        assert_eq!(deleted, vec!["site_db_t10.tar.gz", "site_db_t3.tar.gz"]);
        assert_eq!(store.names(), vec!["site_db_t1.tar.gz".to_string()]);
    }

    #[test]
    fn other_category_is_never_touched() {
        let store = MemoryStore::new();
        store.insert("bot_db_archive.tar.gz", FOLDER, now() - Duration::days(30));
        store.insert("site_db_old.tar.gz", FOLDER, now() - Duration::days(30));

        sweeper(&store, 2)
            .sweep("site_db", &["site_db", "bot_db"], now())
            .unwrap();
        assert_eq!(store.names(), vec!["bot_db_archive.tar.gz".to_string()]);
    }

    #[test]
    fn longer_category_sharing_a_prefix_is_kept_apart() {
        let store = MemoryStore::new();
        let old = now() - Duration::days(30);
        store.insert("bot_2024.tar.gz", FOLDER, old);
        store.insert("bot_archive_2024.tar.gz", FOLDER, old);
        store.insert("robot_x.tar.gz", FOLDER, old);

        let report = sweeper(&store, 2)
            .sweep("bot", &["bot", "bot_archive"], now())
            .unwrap();
        assert_eq!(report.deleted.len(), 1);
        assert_eq!(report.deleted[0].name, "bot_2024.tar.gz");
        assert_eq!(report.skipped.len(), 2);

        assert!(owns_name("bot_archive", "bot_archive_2024.tar.gz", &["bot", "bot_archive"]));
    }

    #[test]
    fn drains_all_pages_before_deleting() {
        let store = MemoryStore::new();
        store.set_page_size(2);
        for i in 0..7 {
            store.insert(&format!("site_db_{i}.tar.gz"), FOLDER, now() - Duration::days(9));
        }

        let report = sweeper(&store, 2).sweep("site_db", &["site_db"], now()).unwrap();
        assert_eq!(report.deleted.len(), 7);
        assert!(store.objects().is_empty());
        assert_eq!(store.calls(Op::List), 4);
    }

    #[test]
    fn nothing_to_delete_is_ok() {
        let store = MemoryStore::new();
        store.insert("site_db_new.tar.gz", FOLDER, now());
        let report = sweeper(&store, 7).sweep("site_db", &["site_db"], now()).unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(store.calls(Op::Delete), 0);
    }

    #[test]
    fn dry_run_deletes_nothing() {
        let store = MemoryStore::new();
        store.insert("site_db_old.tar.gz", FOLDER, now() - Duration::days(30));
        let report = sweeper(&store, 2)
            .dry_run(true)
            .sweep("site_db", &["site_db"], now())
            .unwrap();
        assert_eq!(report.deleted.len(), 1);
        assert_eq!(store.objects().len(), 1);
        assert_eq!(store.calls(Op::Delete), 0);
    }

    #[test]
    fn list_failure_aborts_before_any_delete() {
        let store = MemoryStore::new();
        store.set_page_size(1);
        store.insert("site_db_a.tar.gz", FOLDER, now() - Duration::days(30));
        store.insert("site_db_b.tar.gz", FOLDER, now() - Duration::days(30));
        store.fail_next(Op::List, StoreError::Protocol("bad json".into()));

        let err = sweeper(&store, 2)
            .sweep("site_db", &["site_db"], now())
            .unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::Protocol(_))));
        assert_eq!(store.calls(Op::Delete), 0);
        assert_eq!(store.objects().len(), 2);
    }
}
