// In-process `RemoteStore`. Behaves like the Drive endpoints we use:
// duplicate names are allowed, listings are paginated, resumable sessions
// report how many bytes they hold. Failures can be injected per operation.

use crate::auth::Connect;
use crate::error::{Result, StoreError};
use crate::store::{
    ChunkOutcome, ListQuery, NewObject, ObjectPage, RemoteObject, RemoteStore, UploadSession,
};
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    StartResumable,
    PutChunk,
    List,
    Delete,
}

#[derive(Debug)]
struct PendingUpload {
    meta: NewObject,
    total_len: u64,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    objects: Vec<RemoteObject>,
    contents: HashMap<String, Vec<u8>>,
    sessions: HashMap<String, PendingUpload>,
    next_id: u64,
    now: Option<DateTime<Utc>>,
    page_size: Option<usize>,
    accept_at_most: Option<usize>,
    failures: HashMap<Op, VecDeque<StoreError>>,
    calls: HashMap<Op, usize>,
}

impl State {
    fn now(&self) -> DateTime<Utc> {
        self.now.unwrap_or_else(Utc::now)
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn enter(&mut self, op: Op) -> Result<(), StoreError> {
        *self.calls.entry(op).or_default() += 1;
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn store(&mut self, meta: &NewObject, content: Vec<u8>) -> RemoteObject {
        let object = RemoteObject {
            id: self.next_id("obj"),
            name: meta.name.clone(),
            parents: meta.parents.clone(),
            modified_time: self.now(),
            size: Some(content.len() as u64),
        };
        self.contents.insert(object.id.clone(), content);
        self.objects.push(object.clone());
        object
    }
}

/// Cheap to clone; clones share the same state, so a test can keep a handle
/// while the code under test owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Rc<RefCell<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the clock used for `modified_time` of new objects.
    pub fn set_now(&self, now: DateTime<Utc>) {
        self.state.borrow_mut().now = Some(now);
    }

    /// Limit listing pages to `size` entries.
    pub fn set_page_size(&self, size: usize) {
        self.state.borrow_mut().page_size = Some(size.max(1));
    }

    /// Persist at most `bytes` of each chunk, like a server that cut the
    /// request short.
    pub fn accept_at_most(&self, bytes: usize) {
        self.state.borrow_mut().accept_at_most = Some(bytes);
    }

    /// Make the next call to `op` fail with `err`. Queued failures are
    /// consumed in order.
    pub fn fail_next(&self, op: Op, err: StoreError) {
        self.state
            .borrow_mut()
            .failures
            .entry(op)
            .or_default()
            .push_back(err);
    }

    /// Seed an existing object.
    pub fn insert(&self, name: &str, parent: &str, modified_time: DateTime<Utc>) -> RemoteObject {
        let mut state = self.state.borrow_mut();
        let object = RemoteObject {
            id: state.next_id("seed"),
            name: name.to_string(),
            parents: vec![parent.to_string()],
            modified_time,
            size: Some(0),
        };
        state.contents.insert(object.id.clone(), Vec::new());
        state.objects.push(object.clone());
        object
    }

    pub fn objects(&self) -> Vec<RemoteObject> {
        self.state.borrow().objects.clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.state
            .borrow()
            .objects
            .iter()
            .map(|o| o.name.clone())
            .collect()
    }

    pub fn content(&self, id: &str) -> Option<Vec<u8>> {
        self.state.borrow().contents.get(id).cloned()
    }

    pub fn calls(&self, op: Op) -> usize {
        self.state.borrow().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn open_sessions(&self) -> usize {
        self.state.borrow().sessions.len()
    }
}

/// Every connection shares the same in-memory state.
impl Connect for MemoryStore {
    type Store = MemoryStore;

    fn connect(&self) -> Result<MemoryStore> {
        Ok(self.clone())
    }
}

impl RemoteStore for MemoryStore {
    fn create_object(
        &self,
        meta: &NewObject,
        content: Vec<u8>,
    ) -> Result<RemoteObject, StoreError> {
        let mut state = self.state.borrow_mut();
        state.enter(Op::Create)?;
        Ok(state.store(meta, content))
    }

    fn start_resumable(
        &self,
        meta: &NewObject,
        total_len: u64,
    ) -> Result<UploadSession, StoreError> {
        let mut state = self.state.borrow_mut();
        state.enter(Op::StartResumable)?;
        let uri = format!("memory://upload/{}", state.next_id("session"));
        state.sessions.insert(
            uri.clone(),
            PendingUpload {
                meta: meta.clone(),
                total_len,
                data: Vec::new(),
            },
        );
        Ok(UploadSession { uri, total_len })
    }

    fn put_chunk(
        &self,
        session: &UploadSession,
        offset: u64,
        chunk: &[u8],
    ) -> Result<ChunkOutcome, StoreError> {
        let mut state = self.state.borrow_mut();
        state.enter(Op::PutChunk)?;
        let limit = state.accept_at_most;

        let pending = state.sessions.get_mut(&session.uri).ok_or_else(|| {
            StoreError::Rejected {
                status: 404,
                message: format!("no upload session {}", session.uri),
            }
        })?;

        let received = pending.data.len() as u64;
        if offset != received {
            return Ok(ChunkOutcome::Incomplete { received });
        }
        let take = limit.map_or(chunk.len(), |n| n.min(chunk.len()));
        if received + take as u64 > pending.total_len {
            return Err(StoreError::Rejected {
                status: 400,
                message: "chunk runs past announced length".into(),
            });
        }
        pending.data.extend_from_slice(&chunk[..take]);

        if (pending.data.len() as u64) < pending.total_len {
            return Ok(ChunkOutcome::Incomplete {
                received: pending.data.len() as u64,
            });
        }

        let done = state
            .sessions
            .remove(&session.uri)
            .ok_or_else(|| StoreError::Protocol("session vanished".into()))?;
        Ok(ChunkOutcome::Complete(state.store(&done.meta, done.data)))
    }

    fn list_objects(
        &self,
        query: &ListQuery,
        page_token: Option<&str>,
    ) -> Result<ObjectPage, StoreError> {
        let mut state = self.state.borrow_mut();
        state.enter(Op::List)?;

        let start = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| StoreError::Protocol(format!("bad page token {token}")))?,
            None => 0,
        };
        let matching: Vec<RemoteObject> = state
            .objects
            .iter()
            .filter(|o| query.matches(o))
            .cloned()
            .collect();
        let end = state
            .page_size
            .map_or(matching.len(), |n| (start + n).min(matching.len()));
        let objects = matching.get(start..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_page_token = (end < matching.len()).then(|| end.to_string());

        Ok(ObjectPage {
            objects,
            next_page_token,
        })
    }

    fn delete_object(&self, id: &str) -> Result<(), StoreError> {
        let mut state = self.state.borrow_mut();
        state.enter(Op::Delete)?;
        let before = state.objects.len();
        state.objects.retain(|o| o.id != id);
        if state.objects.len() == before {
            return Err(StoreError::Rejected {
                status: 404,
                message: format!("File not found: {id}"),
            });
        }
        state.contents.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn query(parent: &str, contains: &str, before: DateTime<Utc>) -> ListQuery {
        ListQuery {
            parent: parent.into(),
            name_contains: contains.into(),
            modified_before: before,
        }
    }

    #[test]
    fn listing_paginates_with_tokens() {
        let store = MemoryStore::new();
        store.set_page_size(2);
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for i in 0..5 {
            store.insert(&format!("site_db_{i}.tar.gz"), "folder", t);
        }
        let q = query("folder", "site_db_", t + Duration::days(1));

        let first = store.list_objects(&q, None).unwrap();
        assert_eq!(first.objects.len(), 2);
        let token = first.next_page_token.unwrap();
        let second = store.list_objects(&q, Some(&token)).unwrap();
        assert_eq!(second.objects.len(), 2);
        let third = store
            .list_objects(&q, second.next_page_token.as_deref())
            .unwrap();
        assert_eq!(third.objects.len(), 1);
        assert!(third.next_page_token.is_none());
    }

    #[test]
    fn resumable_session_reports_short_writes() {
        let store = MemoryStore::new();
        store.accept_at_most(3);
        let session = store
            .start_resumable(&NewObject::new("bot_db_x.tar.gz", "folder"), 5)
            .unwrap();

        match store.put_chunk(&session, 0, b"abcde").unwrap() {
            ChunkOutcome::Incomplete { received } => assert_eq!(received, 3),
            other => panic!("unexpected {other:?}"),
        }
        match store.put_chunk(&session, 3, b"de").unwrap() {
            ChunkOutcome::Complete(obj) => {
                assert_eq!(obj.size, Some(5));
                assert_eq!(store.content(&obj.id).unwrap(), b"abcde");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.open_sessions(), 0);
    }

    #[test]
    fn injected_failures_are_consumed_in_order() {
        let store = MemoryStore::new();
        store.fail_next(
            Op::Delete,
            StoreError::Transient {
                message: "503".into(),
            },
        );
        let obj = store.insert("a", "folder", Utc::now());
        assert!(store.delete_object(&obj.id).is_err());
        store.delete_object(&obj.id).unwrap();
        assert_eq!(store.calls(Op::Delete), 2);
        assert!(store.objects().is_empty());
    }
}
