// Library root
// -----------
// Uploads the newest local backup archive of each configured category to a
// Google Drive folder and removes uploads older than the retention window.
// The binary (`main.rs`) parses the command line and hands a `Settings`
// plus an authenticator to `job::Job`.
//
// Module responsibilities:
// - `config`: settings file + environment overrides, validation.
// - `auth`: service-account token exchange; the `Connect` seam.
// - `store`: the `RemoteStore` trait and its data types.
// - `drive`: `RemoteStore` over the Drive v3 REST API.
// - `memory`: in-process `RemoteStore` for tests and local experiments.
// - `retry`: bounded exponential backoff around store calls.
// - `locate`: newest matching archive in a directory.
// - `upload`: direct and resumable uploads with progress.
// - `sweep`: retention sweep by name prefix and date.
// - `job`: per-category orchestration and the run report.
// - `ui`: progress bars and the run summary.
pub mod auth;
pub mod config;
pub mod drive;
pub mod error;
pub mod job;
pub mod locate;
pub mod memory;
pub mod retry;
pub mod store;
pub mod sweep;
pub mod ui;
pub mod upload;

pub use error::{Error, Result, StoreError};
