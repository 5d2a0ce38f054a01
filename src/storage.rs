//! Durable, file-backed event store.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::event::{ProposedEvent, RecordedEvent};
use crate::memory::{InMemoryEventStore, LogState};
use crate::store::{AppendResult, EventStore, EventStream, ExpectedVersion, Subscription};

/// Manages the on-disk directory layout of a durable store.
///
/// The layout follows this structure:
/// ```text
/// <base_dir>/
///     events.jsonl            -- global journal, one RecordedEvent per line
///     sagas/
///         <saga_name>/
///             dead_letters.jsonl
/// ```
///
/// `StoreLayout` is cheap to clone (it wraps a single `PathBuf`).
#[derive(Debug, Clone)]
pub struct StoreLayout {
    base_dir: PathBuf,
}

impl StoreLayout {
    /// Create a new `StoreLayout` rooted at the given base directory.
    ///
    /// The directory does not need to exist yet.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Returns the root directory of this layout.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `<base_dir>/events.jsonl`
    pub fn journal_path(&self) -> PathBuf {
        self.base_dir.join("events.jsonl")
    }

    /// `<base_dir>/sagas`, the root for saga dead-letter logs.
    pub fn sagas_dir(&self) -> PathBuf {
        self.base_dir.join("sagas")
    }
}

/// Event store persisted as an append-only JSONL journal.
///
/// The whole journal is indexed in memory on [`open`](FileEventStore::open).
/// An append is written and synced to disk before it is acknowledged or
/// visible to readers and subscribers. Reads do not wait for a sync in
/// progress; they see the log as it was before that append.
///
/// `Clone` is cheap; clones share the journal and the index.
#[derive(Clone)]
pub struct FileEventStore {
    layout: StoreLayout,
    index: InMemoryEventStore,
    journal: Arc<Mutex<File>>,
}

impl std::fmt::Debug for FileEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileEventStore")
            .field("base_dir", &self.layout.base_dir)
            .finish()
    }
}

impl FileEventStore {
    /// Open (or create) a store rooted at `base_dir`.
    ///
    /// A trailing line without its newline is the remains of an interrupted
    /// append; it is truncated away. Any other undecodable line is corruption.
    ///
    /// # Errors
    ///
    /// * [`StoreError::Io`] if the directory or journal cannot be accessed.
    /// * [`StoreError::CorruptStream`] if a complete record is malformed or
    ///   breaks version or position contiguity.
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let layout = StoreLayout::new(base_dir.as_ref());
        fs::create_dir_all(layout.base_dir())?;
        let path = layout.journal_path();

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let (state, valid_len) = recover_journal(&bytes)?;
        if valid_len < bytes.len() {
            tracing::warn!(
                path = %path.display(),
                discarded = bytes.len() - valid_len,
                "truncating torn record at end of journal"
            );
            file.set_len(valid_len as u64)?;
        }

        tracing::info!(
            path = %path.display(),
            events = state.len(),
            "event journal opened"
        );

        Ok(Self {
            layout,
            index: InMemoryEventStore::from_state(state),
            journal: Arc::new(Mutex::new(file)),
        })
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    fn append_blocking(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        events: Vec<ProposedEvent>,
    ) -> Result<AppendResult, StoreError> {
        // The journal lock serialises appends; the index is only locked to
        // stage and to commit, so reads proceed during the write and sync.
        let mut journal = self
            .journal
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.index
            .append_serialized(stream_id, expected, events, |records| {
                write_records(&mut journal, records)
            })
    }
}

/// Append records to the journal and sync them; on failure, cut the file
/// back to its previous length so no partial record remains.
fn write_records(file: &mut File, records: &[RecordedEvent]) -> Result<(), StoreError> {
    let mut buf = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buf, record)?;
        buf.push(b'\n');
    }

    let previous_len = file.metadata()?.len();
    let written = file.write_all(&buf).and_then(|()| file.sync_data());
    if let Err(e) = written {
        tracing::error!(error = %e, "journal write failed, rolling back");
        file.set_len(previous_len)?;
        return Err(StoreError::Io(e));
    }
    Ok(())
}

/// Rebuild the log index from journal bytes.
///
/// Returns the index and the length of the valid prefix.
fn recover_journal(bytes: &[u8]) -> Result<(LogState, usize), StoreError> {
    let mut state = LogState::default();
    let mut offset = 0;

    while offset < bytes.len() {
        let Some(newline) = bytes[offset..].iter().position(|&b| b == b'\n') else {
            // Unterminated final line: the append that wrote it never completed.
            break;
        };
        let line = &bytes[offset..offset + newline];
        let line_no = state.len() + 1;
        offset += newline + 1;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let record: RecordedEvent =
            serde_json::from_slice(line).map_err(|e| StoreError::CorruptStream {
                stream_id: "$all".into(),
                reason: format!("journal record {line_no} is unreadable: {e}"),
            })?;
        state.restore(record)?;
    }

    let valid_len = offset.min(bytes.len());
    Ok((state, valid_len))
}

#[async_trait]
impl EventStore for FileEventStore {
    async fn append(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        events: Vec<ProposedEvent>,
    ) -> Result<AppendResult, StoreError> {
        let this = self.clone();
        let stream_id = stream_id.to_owned();
        tokio::task::spawn_blocking(move || this.append_blocking(&stream_id, expected, events))
            .await
            .map_err(|e| StoreError::Io(io::Error::other(format!("append task failed: {e}"))))?
    }

    async fn read_stream(
        &self,
        stream_id: &str,
        from_version: u64,
    ) -> Result<EventStream, StoreError> {
        self.index.read_stream(stream_id, from_version).await
    }

    async fn stream_version(&self, stream_id: &str) -> Result<u64, StoreError> {
        self.index.stream_version(stream_id).await
    }

    fn head_position(&self) -> u64 {
        self.index.head_position()
    }

    fn subscribe_all(&self, from_position: u64) -> Subscription {
        self.index.subscribe_all(from_position)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio_stream::StreamExt;

    use super::*;
    use crate::store::SubscriptionMessage;

    fn event(aggregate: &str, id: &str, tag: &str) -> ProposedEvent {
        ProposedEvent::new(aggregate, id, tag, serde_json::json!({"tag": tag}))
    }

    #[test]
    fn layout_paths() {
        let layout = StoreLayout::new("/data");
        assert_eq!(layout.journal_path(), PathBuf::from("/data/events.jsonl"));
        assert_eq!(layout.sagas_dir(), PathBuf::from("/data/sagas"));
    }

    #[tokio::test]
    async fn events_survive_reopen() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        {
            let store = FileEventStore::open(tmp.path()).expect("open");
            store
                .append(
                    "user-u1",
                    ExpectedVersion::NoStream,
                    vec![event("user", "u1", "A"), event("user", "u1", "B")],
                )
                .await
                .expect("append user");
            store
                .append(
                    "auth-u1",
                    ExpectedVersion::NoStream,
                    vec![event("auth", "u1", "C")],
                )
                .await
                .expect("append auth");
        }

        let store = FileEventStore::open(tmp.path()).expect("reopen");
        assert_eq!(store.head_position(), 3);
        assert_eq!(store.stream_version("user-u1").await.unwrap(), 2);
        assert_eq!(store.stream_version("auth-u1").await.unwrap(), 1);

        let err = store
            .append("user-u1", ExpectedVersion::Exact(1), vec![event("user", "u1", "D")])
            .await
            .expect_err("stale version after reopen");
        assert!(err.is_conflict());

        let next = store
            .append("user-u1", ExpectedVersion::Exact(2), vec![event("user", "u1", "D")])
            .await
            .expect("append after reopen");
        assert_eq!(next.events[0].version, 3);
        assert_eq!(next.events[0].global_position, 3);
    }

    #[tokio::test]
    async fn torn_trailing_record_is_truncated() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        {
            let store = FileEventStore::open(tmp.path()).expect("open");
            store
                .append("user-u1", ExpectedVersion::Any, vec![event("user", "u1", "A")])
                .await
                .expect("append");
        }
        let path = StoreLayout::new(tmp.path()).journal_path();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"event_id\":\"half").unwrap();
        drop(file);

        let store = FileEventStore::open(tmp.path()).expect("reopen recovers");
        assert_eq!(store.head_position(), 1);
        store
            .append("user-u1", ExpectedVersion::Exact(1), vec![event("user", "u1", "B")])
            .await
            .expect("append after recovery");

        drop(store);
        let store = FileEventStore::open(tmp.path()).expect("journal stays readable");
        assert_eq!(store.stream_version("user-u1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn reads_proceed_while_an_append_waits_on_the_journal() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        let store = FileEventStore::open(tmp.path()).expect("open");
        store
            .append("user-u1", ExpectedVersion::NoStream, vec![event("user", "u1", "A")])
            .await
            .expect("append");

        // Stall the next append inside its journal section.
        let journal = Arc::clone(&store.journal);
        let held = journal.lock().expect("journal lock");
        let writer = store.clone();
        let pending = tokio::spawn(async move {
            writer
                .append("user-u1", ExpectedVersion::Exact(1), vec![event("user", "u1", "B")])
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let version = tokio::time::timeout(Duration::from_secs(1), store.stream_version("user-u1"))
            .await
            .expect("stream_version blocked by the append")
            .expect("stream_version");
        assert_eq!(version, 1);
        let stream = tokio::time::timeout(Duration::from_secs(1), store.read_stream("user-u1", 1))
            .await
            .expect("read_stream blocked by the append")
            .expect("read_stream");
        assert_eq!(stream.collect::<Vec<_>>().await.len(), 1);

        drop(held);
        let appended = pending.await.expect("append task").expect("append");
        assert_eq!(appended.version, 2);
        assert_eq!(store.head_position(), 2);
    }

    #[test]
    fn complete_garbage_line_is_corruption() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        fs::write(StoreLayout::new(tmp.path()).journal_path(), b"not json\n").unwrap();
        let err = FileEventStore::open(tmp.path()).expect_err("corrupt journal");
        assert!(matches!(err, StoreError::CorruptStream { .. }));
    }

    #[tokio::test]
    async fn subscription_sees_persisted_history() {
        let tmp = TempDir::new().expect("failed to create temp dir");
        {
            let store = FileEventStore::open(tmp.path()).expect("open");
            store
                .append("user-u1", ExpectedVersion::Any, vec![event("user", "u1", "A")])
                .await
                .expect("append");
        }

        let store = FileEventStore::open(tmp.path()).expect("reopen");
        let mut sub = store.subscribe_all(0);
        let first = sub.next().await.expect("item").expect("ok");
        assert!(matches!(first, SubscriptionMessage::Event(e) if e.event_type == "A"));
        assert_eq!(
            sub.next().await.expect("item").expect("ok"),
            SubscriptionMessage::CaughtUp
        );
    }
}
