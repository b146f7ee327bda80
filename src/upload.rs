// Uploads one local archive into the backup folder, either in a single
// request or as a resumable upload sent chunk by chunk.

use crate::config::{Settings, UploadStrategy};
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::store::{ChunkOutcome, NewObject, RemoteObject, RemoteStore, UploadSession};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, info, warn};

/// How many acknowledgements in a row may leave the offset unchanged
/// before we stop sending the same chunk.
const MAX_STALLED_CHUNKS: u32 = 3;

pub struct Uploader<'a, S: RemoteStore> {
    store: &'a S,
    parent: String,
    chunk_size: usize,
    strategy: UploadStrategy,
    retry: RetryPolicy,
}

/// Whole percent of `done` out of `total`; an empty upload is 100% done.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    (done.min(total) * 100 / total) as u8
}

/// Fill `buf` from `reader`, stopping early only at end of file.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

impl<'a, S: RemoteStore> Uploader<'a, S> {
    pub fn new(store: &'a S, parent: impl Into<String>, chunk_size: usize) -> Self {
        Self {
            store,
            parent: parent.into(),
            chunk_size: chunk_size.max(1),
            strategy: UploadStrategy::Auto,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_settings(store: &'a S, settings: &Settings) -> Self {
        Self::new(store, &settings.parent_folder_id, settings.chunk_size)
            .strategy(settings.upload_strategy)
            .retry(RetryPolicy::from_settings(settings))
    }

    pub fn strategy(mut self, strategy: UploadStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Upload `path` as `name`. `progress` receives a percentage after every
    /// acknowledged chunk of a resumable upload; direct uploads don't call it.
    pub fn upload(
        &self,
        path: &Path,
        name: &str,
        progress: &mut dyn FnMut(u8),
    ) -> Result<RemoteObject> {
        let mut file = File::open(path).map_err(|e| Error::local_file(path, e))?;
        let total = file
            .metadata()
            .map_err(|e| Error::local_file(path, e))?
            .len();
        let meta = NewObject::new(name, self.parent.clone());

        let chunked = match self.strategy {
            UploadStrategy::Direct => false,
            UploadStrategy::Chunked => true,
            UploadStrategy::Auto => total > self.chunk_size as u64,
        };

        let object = if chunked {
            self.upload_chunked(&mut file, path, &meta, total, progress)?
        } else {
            self.upload_direct(&mut file, path, &meta)?
        };

        info!(id = %object.id, bytes = total, "upload complete");
        println!("Uploaded file: {} as {}", path.display(), name);
        Ok(object)
    }

    fn upload_direct(&self, file: &mut File, path: &Path, meta: &NewObject) -> Result<RemoteObject> {
        let mut content = Vec::new();
        file.read_to_end(&mut content)
            .map_err(|e| Error::local_file(path, e))?;
        debug!(name = %meta.name, bytes = content.len(), "direct upload");

        let what = format!("create {}", meta.name);
        let object = self
            .retry
            .run(&what, || self.store.create_object(meta, content.clone()))?;
        Ok(object)
    }

    fn upload_chunked(
        &self,
        file: &mut File,
        path: &Path,
        meta: &NewObject,
        total: u64,
        progress: &mut dyn FnMut(u8),
    ) -> Result<RemoteObject> {
        let session: UploadSession = self.retry.run(&format!("start upload {}", meta.name), || {
            self.store.start_resumable(meta, total)
        })?;
        debug!(name = %meta.name, total, chunk_size = self.chunk_size, "resumable upload");

        let mut buf = vec![0u8; self.chunk_size];
        let mut offset = 0u64;
        let mut reported = 0u8;
        let mut stalled = 0u32;

        loop {
            let want = (total - offset).min(self.chunk_size as u64) as usize;
            file.seek(SeekFrom::Start(offset))
                .map_err(|e| Error::local_file(path, e))?;
            let n = read_full(file, &mut buf[..want]).map_err(|e| Error::local_file(path, e))?;
            if n < want {
                return Err(Error::local_file(
                    path,
                    io::Error::new(io::ErrorKind::UnexpectedEof, "file shrank during upload"),
                ));
            }
            let chunk = &buf[..n];

            let what = format!("upload {} at byte {offset}", meta.name);
            let outcome = self
                .retry
                .run(&what, || self.store.put_chunk(&session, offset, chunk))?;

            match outcome {
                ChunkOutcome::Complete(object) => {
                    progress(100);
                    return Ok(object);
                }
                ChunkOutcome::Incomplete { received } => {
                    if received >= total {
                        return Err(crate::error::StoreError::Protocol(format!(
                            "store holds all {total} bytes of {} but did not finish it",
                            meta.name
                        ))
                        .into());
                    }
                    if received == offset {
                        stalled += 1;
                        warn!(offset, "chunk not persisted ({stalled}/{MAX_STALLED_CHUNKS})");
                        if stalled >= MAX_STALLED_CHUNKS {
                            return Err(crate::error::StoreError::Protocol(format!(
                                "upload of {} stalled at byte {offset}",
                                meta.name
                            ))
                            .into());
                        }
                    } else {
                        stalled = 0;
                    }
                    offset = received;
                    reported = reported.max(percent(offset, total));
                    progress(reported);
                }
            }
        }
    }
}
