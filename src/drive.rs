// Google Drive v3 client. A small blocking wrapper around reqwest that
// holds the bearer token from `auth` and implements `RemoteStore` with the
// three endpoints the backup job needs: files.create (multipart and
// resumable), files.list and files.delete.

use crate::error::StoreError;
use crate::store::{
    ChunkOutcome, ListQuery, NewObject, ObjectPage, RemoteObject, RemoteStore, UploadSession,
};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const FILE_FIELDS: &str = "id,name,parents,modifiedTime,size";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,parents,modifiedTime,size)";
const PAGE_SIZE: &str = "1000";
const BOUNDARY: &str = "drive_backup_7d1f0c9e4b2a";

/// Drive answers an unfinished resumable chunk with this non-standard code.
const RESUME_INCOMPLETE: u16 = 308;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteObject>,
    next_page_token: Option<String>,
}

/// Authenticated Drive session.
#[derive(Debug, Clone)]
pub struct DriveClient {
    client: Client,
    token: String,
    timeout: Duration,
}

impl DriveClient {
    pub fn new(token: String, timeout: Duration) -> Result<Self, StoreError> {
        // 308 means "resume incomplete" here, never a redirect.
        let client = Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|e| StoreError::Protocol(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            token,
            timeout,
        })
    }

    fn auth_headers(&self) -> Result<HeaderMap, StoreError> {
        let mut headers = HeaderMap::new();
        let val = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|e| StoreError::Protocol(format!("access token is not a valid header: {e}")))?;
        headers.insert(AUTHORIZATION, val);
        Ok(headers)
    }

    fn send(&self, req: RequestBuilder) -> Result<Response, StoreError> {
        req.headers(self.auth_headers()?).send().map_err(|e| {
            if e.is_timeout() {
                StoreError::Timeout(self.timeout)
            } else {
                StoreError::from(e)
            }
        })
    }

    fn file_json(res: Response) -> Result<RemoteObject, StoreError> {
        res.json()
            .map_err(|e| StoreError::Protocol(format!("parsing file resource: {e}")))
    }
}

/// Turn a non-success response into the matching error kind.
fn check(res: Response) -> Result<Response, StoreError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let txt = res.text().unwrap_or_default();
    Err(status_error(status, txt))
}

fn status_error(status: StatusCode, message: String) -> StoreError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        StoreError::Transient {
            message: format!("HTTP {status}: {message}"),
        }
    } else {
        StoreError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

/// `multipart/related` body: JSON metadata part followed by the media part.
fn related_body(meta: &NewObject, content: &[u8]) -> Result<Vec<u8>, StoreError> {
    let json = serde_json::to_vec(meta)
        .map_err(|e| StoreError::Protocol(format!("encoding metadata: {e}")))?;
    let mut body = Vec::with_capacity(json.len() + content.len() + 256);
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(&json);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    Ok(body)
}

/// `Content-Range` value for `len` bytes at `offset` of `total`.
fn content_range(offset: u64, len: usize, total: u64) -> String {
    if len == 0 {
        format!("bytes */{total}")
    } else {
        format!("bytes {}-{}/{}", offset, offset + len as u64 - 1, total)
    }
}

/// Parse the `Range: bytes=0-N` header of a 308 into a persisted byte count.
fn persisted_bytes(range: Option<&str>) -> Result<u64, StoreError> {
    let Some(range) = range else {
        return Ok(0);
    };
    range
        .trim()
        .strip_prefix("bytes=")
        .and_then(|r| r.split('-').nth(1))
        .and_then(|end| end.parse::<u64>().ok())
        .map(|end| end + 1)
        .ok_or_else(|| StoreError::Protocol(format!("bad Range header `{range}`")))
}

/// Outcome of a 308 reply, read from its `Range` header.
fn incomplete(headers: &HeaderMap) -> Result<ChunkOutcome, StoreError> {
    let range = headers.get(RANGE).and_then(|v| v.to_str().ok());
    Ok(ChunkOutcome::Incomplete {
        received: persisted_bytes(range)?,
    })
}

impl RemoteStore for DriveClient {
    fn create_object(
        &self,
        meta: &NewObject,
        content: Vec<u8>,
    ) -> Result<RemoteObject, StoreError> {
        let body = related_body(meta, &content)?;
        let req = self
            .client
            .post(UPLOAD_URL)
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .header(CONTENT_TYPE, format!("multipart/related; boundary={BOUNDARY}"))
            .body(body);
        let res = check(self.send(req)?)?;
        Self::file_json(res)
    }

    fn start_resumable(
        &self,
        meta: &NewObject,
        total_len: u64,
    ) -> Result<UploadSession, StoreError> {
        let req = self
            .client
            .post(UPLOAD_URL)
            .query(&[("uploadType", "resumable"), ("fields", FILE_FIELDS)])
            .header("X-Upload-Content-Type", "application/octet-stream")
            .header("X-Upload-Content-Length", total_len.to_string())
            .json(meta);
        let res = check(self.send(req)?)?;
        let uri = res
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| StoreError::Protocol("resumable upload without Location".into()))?
            .to_string();
        debug!(%uri, total_len, "opened resumable session");
        Ok(UploadSession { uri, total_len })
    }

    fn put_chunk(
        &self,
        session: &UploadSession,
        offset: u64,
        chunk: &[u8],
    ) -> Result<ChunkOutcome, StoreError> {
        let req = self
            .client
            .put(&session.uri)
            .header(CONTENT_RANGE, content_range(offset, chunk.len(), session.total_len))
            .body(chunk.to_vec());
        let res = self.send(req)?;

        if res.status().as_u16() == RESUME_INCOMPLETE {
            return incomplete(res.headers());
        }
        let res = check(res)?;
        Ok(ChunkOutcome::Complete(Self::file_json(res)?))
    }

    fn list_objects(
        &self,
        query: &ListQuery,
        page_token: Option<&str>,
    ) -> Result<ObjectPage, StoreError> {
        let q = query.to_drive_query();
        let mut params = vec![
            ("q", q.as_str()),
            ("spaces", "drive"),
            ("fields", LIST_FIELDS),
            ("pageSize", PAGE_SIZE),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }
        let req = self.client.get(FILES_URL).query(&params);
        let list: FileList = check(self.send(req)?)?
            .json()
            .map_err(|e| StoreError::Protocol(format!("parsing file list: {e}")))?;
        Ok(ObjectPage {
            objects: list.files,
            next_page_token: list.next_page_token,
        })
    }

    fn delete_object(&self, id: &str) -> Result<(), StoreError> {
        let url = format!("{FILES_URL}/{id}");
        check(self.send(self.client.delete(&url))?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_range_formats() {
        assert_eq!(content_range(0, 10, 25), "bytes 0-9/25");
        assert_eq!(content_range(20, 5, 25), "bytes 20-24/25");
        assert_eq!(content_range(0, 0, 0), "bytes */0");
    }

    #[test]
    fn persisted_bytes_from_range_header() {
        assert_eq!(persisted_bytes(None).unwrap(), 0);
        assert_eq!(persisted_bytes(Some("bytes=0-262143")).unwrap(), 262_144);
        assert!(persisted_bytes(Some("garbage")).is_err());
    }

    #[test]
    fn resume_incomplete_reports_persisted_offset() {
        let mut headers = HeaderMap::new();
        headers.insert(RANGE, HeaderValue::from_static("bytes=0-524287"));
        assert!(matches!(
            incomplete(&headers).unwrap(),
            ChunkOutcome::Incomplete { received: 524_288 }
        ));
        assert!(matches!(
            incomplete(&HeaderMap::new()).unwrap(),
            ChunkOutcome::Incomplete { received: 0 }
        ));
    }

    #[test]
    fn file_list_pages_parse() {
        let page: FileList = serde_json::from_str(
            r#"{
                "nextPageToken": "~!!~AI9FV7Q",
                "files": [{
                    "id": "1a2b3c",
                    "name": "site_db_2024-05-01.tar.gz",
                    "parents": ["12uXxBYCP5AVTWlevr3MvsmwHdBwVsuGe"],
                    "modifiedTime": "2024-05-01T03:00:12.345Z",
                    "size": "1048576"
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(page.next_page_token.as_deref(), Some("~!!~AI9FV7Q"));
        assert_eq!(page.files.len(), 1);
        assert_eq!(page.files[0].name, "site_db_2024-05-01.tar.gz");
        assert_eq!(page.files[0].size, Some(1_048_576));

        let last: FileList = serde_json::from_str(r#"{"files": []}"#).unwrap();
        assert!(last.next_page_token.is_none());
        let empty: FileList = serde_json::from_str("{}").unwrap();
        assert!(empty.files.is_empty());
    }

    #[test]
    fn status_classification() {
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(status_error(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "gone".into()),
            StoreError::Rejected { status: 404, .. }
        ));
    }

    #[test]
    fn related_body_has_both_parts() {
        let meta = NewObject::new("site_db_a.tar.gz", "folder123");
        let body = related_body(&meta, b"\x1f\x8bpayload").unwrap();
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with(&format!("--{BOUNDARY}\r\n")));
        assert!(text.contains(r#""name":"site_db_a.tar.gz""#));
        assert!(text.contains(r#""parents":["folder123"]"#));
        assert!(text.contains("payload"));
        assert!(text.ends_with(&format!("--{BOUNDARY}--\r\n")));
    }
}
