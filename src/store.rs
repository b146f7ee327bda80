// The remote object store seam. `DriveClient` talks to Google Drive,
// `MemoryStore` keeps everything in process for tests and dry runs.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored file entry as the remote store reports it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub parents: Vec<String>,
    pub modified_time: DateTime<Utc>,
    /// Drive returns sizes as decimal strings.
    #[serde(default, with = "size_string")]
    pub size: Option<u64>,
}

/// Metadata for a new object.
#[derive(Debug, Clone, Serialize)]
pub struct NewObject {
    pub name: String,
    pub parents: Vec<String>,
}

impl NewObject {
    pub fn new(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parents: vec![parent.into()],
        }
    }
}

/// An open resumable upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub uri: String,
    pub total_len: u64,
}

/// What the store says after accepting a chunk.
#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    /// More bytes are expected; `received` bytes are persisted so far.
    Incomplete { received: u64 },
    Complete(RemoteObject),
}

/// Listing filter: direct children of `parent` whose name contains
/// `name_contains` and were last modified strictly before `modified_before`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub parent: String,
    pub name_contains: String,
    pub modified_before: DateTime<Utc>,
}

impl ListQuery {
    /// Drive `q` expression for this filter.
    pub fn to_drive_query(&self) -> String {
        format!(
            "'{}' in parents and name contains '{}' and modifiedTime < '{}' and trashed = false",
            escape_literal(&self.parent),
            escape_literal(&self.name_contains),
            self.modified_before.format("%Y-%m-%dT%H:%M:%S"),
        )
    }

    pub fn matches(&self, object: &RemoteObject) -> bool {
        object.parents.iter().any(|p| p == &self.parent)
            && object.name.contains(&self.name_contains)
            && object.modified_time < self.modified_before
    }
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub objects: Vec<RemoteObject>,
    pub next_page_token: Option<String>,
}

/// Remote calls the uploader and sweeper need. Every method is a single
/// blocking request; retrying is the caller's business.
pub trait RemoteStore {
    /// Create an object with its whole content in one request.
    fn create_object(&self, meta: &NewObject, content: Vec<u8>)
        -> Result<RemoteObject, StoreError>;

    /// Open a resumable upload for `total_len` bytes.
    fn start_resumable(&self, meta: &NewObject, total_len: u64)
        -> Result<UploadSession, StoreError>;

    /// Send the bytes starting at `offset`.
    fn put_chunk(
        &self,
        session: &UploadSession,
        offset: u64,
        chunk: &[u8],
    ) -> Result<ChunkOutcome, StoreError>;

    fn list_objects(
        &self,
        query: &ListQuery,
        page_token: Option<&str>,
    ) -> Result<ObjectPage, StoreError>;

    fn delete_object(&self, id: &str) -> Result<(), StoreError>;
}

mod size_string {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| s.parse::<u64>().map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn drive_query_is_date_grained_and_escaped() {
        let query = ListQuery {
            parent: "folder123".into(),
            name_contains: "o'neil_".into(),
            modified_before: Utc.with_ymd_and_hms(2024, 5, 3, 0, 0, 0).unwrap(),
        };
        assert_eq!(
            query.to_drive_query(),
            "'folder123' in parents and name contains 'o\\'neil_' \
             and modifiedTime < '2024-05-03T00:00:00' and trashed = false"
        );
    }

    #[test]
    fn remote_object_parses_drive_json() {
        let json = r#"{
            "id": "1AbC",
            "name": "site_db_2024-05-01.tar.gz",
            "parents": ["folder123"],
            "modifiedTime": "2024-05-01T03:15:22.123Z",
            "size": "52428800"
        }"#;
        let obj: RemoteObject = serde_json::from_str(json).unwrap();
        assert_eq!(obj.id, "1AbC");
        assert_eq!(obj.size, Some(52_428_800));
        assert_eq!(obj.parents, vec!["folder123".to_string()]);
    }

    #[test]
    fn remote_object_without_size_or_parents() {
        let json = r#"{"id":"x","name":"bot_db_a.tar.gz","modifiedTime":"2024-05-01T00:00:00Z"}"#;
        let obj: RemoteObject = serde_json::from_str(json).unwrap();
        assert_eq!(obj.size, None);
        assert!(obj.parents.is_empty());
    }
}
