//! The store handle and its in-memory key directory.

use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, StoreResult};
use crate::lock::DirectoryLock;
use crate::record::{FrameFault, NextFrame, Record, RecordKind, read_frame};
use crate::segment::{Segment, list_segments};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default segment size before rotation.
pub const DEFAULT_MAX_SEGMENT_BYTES: u64 = 64 * 1024 * 1024;

/// Options for opening a [`Store`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Rotate the active segment once it would grow past this size.
    pub max_segment_bytes: u64,
    /// `fsync` after every write.
    pub sync_writes: bool,
    /// Time source for expiry.
    pub clock: Arc<dyn Clock>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_segment_bytes: DEFAULT_MAX_SEGMENT_BYTES,
            sync_writes: false,
            clock: Arc::new(SystemClock),
        }
    }
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_segment_bytes(mut self, bytes: u64) -> Self {
        self.max_segment_bytes = bytes;
        self
    }

    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn validate(&self) -> StoreResult<()> {
        if self.max_segment_bytes == 0 {
            return Err(StoreError::InvalidOption(
                "max_segment_bytes must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where a record lives on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Location {
    pub segment: u64,
    pub offset: u64,
    pub len: u64,
}

/// A live value.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Entry {
    pub location: Location,
    pub expires_at: Option<u64>,
}

impl Entry {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A record that hides older values of a key that is gone.
///
/// Either a `Delete` record or an expired `Put`. It must survive on disk
/// while any segment at or below `origin` remains, since those may still
/// hold values it shadows during replay.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tombstone {
    pub location: Location,
    pub origin: u64,
    /// Bytes at `location` still counted live. For an expired `Put` this is
    /// the size of the `Delete` GC will rewrite it as; the value is stale.
    pub live_bytes: u64,
}

impl Tombstone {
    /// A tombstone backed by a `Delete` record.
    pub fn delete(location: Location, origin: u64) -> Self {
        Self {
            location,
            origin,
            live_bytes: location.len,
        }
    }

    /// A tombstone backed by the expired `Put` of `key` at `location`.
    fn expired(key: &[u8], location: Location) -> StoreResult<Self> {
        let origin = location.segment;
        let compact = Record::delete(key, origin).encode()?.len() as u64;
        Ok(Self {
            location,
            origin,
            live_bytes: compact.min(location.len),
        })
    }
}

#[derive(Debug)]
pub(crate) struct State {
    pub dir: PathBuf,
    pub segments: BTreeMap<u64, Segment>,
    pub active: u64,
    pub keydir: HashMap<Vec<u8>, Entry>,
    pub tombstones: HashMap<Vec<u8>, Tombstone>,
    pub closed: bool,
}

impl State {
    fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            segments: BTreeMap::new(),
            active: 0,
            keydir: HashMap::new(),
            tombstones: HashMap::new(),
            closed: false,
        }
    }

    pub fn ensure_open(&self) -> StoreResult<()> {
        if self.closed {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    pub fn segment_mut(&mut self, id: u64) -> StoreResult<&mut Segment> {
        let dir = &self.dir;
        self.segments.get_mut(&id).ok_or_else(|| StoreError::Corrupt {
            path: dir.join(Segment::file_name(id)),
            offset: 0,
            reason: "segment referenced by the key directory is missing".to_string(),
        })
    }

    pub fn mark_stale(&mut self, location: Location) {
        self.mark_stale_bytes(location.segment, location.len);
    }

    fn mark_stale_bytes(&mut self, segment: u64, bytes: u64) {
        if let Some(segment) = self.segments.get_mut(&segment) {
            segment.mark_stale(bytes);
        }
    }

    /// Count whatever a dropped tombstone still held live as stale.
    fn release(&mut self, tombstone: Tombstone) {
        self.mark_stale_bytes(tombstone.location.segment, tombstone.live_bytes);
    }

    /// Seal the active segment and start a new one.
    pub fn rotate(&mut self) -> StoreResult<()> {
        if let Some(current) = self.segments.get_mut(&self.active) {
            let size = current.size;
            if current.unusable
                && let Err(e) = current.truncate(size)
            {
                warn!(segment = current.id, error = %e, "Sealing segment with a torn tail");
            }
            current.sync()?;
        }
        let id = self.active + 1;
        let segment = Segment::create(&self.dir, id)?;
        self.segments.insert(id, segment);
        self.active = id;
        debug!(segment = id, "Rotated active segment");
        Ok(())
    }

    fn rotate_if_needed(&mut self, incoming: u64, options: &StoreOptions) -> StoreResult<()> {
        let active = self.segment_mut(self.active)?;
        let full = active.size > 0 && active.size + incoming > options.max_segment_bytes;
        if full || active.unusable {
            self.rotate()?;
        }
        Ok(())
    }

    /// Append an encoded frame to the active segment.
    pub fn append_frame(&mut self, frame: &[u8], options: &StoreOptions) -> StoreResult<Location> {
        self.rotate_if_needed(frame.len() as u64, options)?;
        let segment = self.active;
        let offset = self
            .segment_mut(segment)?
            .append(frame, options.sync_writes)?;
        Ok(Location {
            segment,
            offset,
            len: frame.len() as u64,
        })
    }

    fn append_tombstone(&mut self, key: &[u8], options: &StoreOptions) -> StoreResult<Tombstone> {
        // Delete frames have a fixed size for a given key, so the rotation
        // decision can be made before the origin is known.
        let len = Record::delete(key, self.active).encode()?.len() as u64;
        self.rotate_if_needed(len, options)?;

        let origin = self.active;
        let frame = Record::delete(key, origin).encode()?;
        let location = self.append_frame(&frame, options)?;
        Ok(Tombstone::delete(location, origin))
    }

    pub fn insert_entry(&mut self, key: Vec<u8>, entry: Entry) {
        if let Some(tombstone) = self.tombstones.remove(&key) {
            self.release(tombstone);
        }
        if let Some(previous) = self.keydir.insert(key, entry) {
            self.mark_stale(previous.location);
        }
    }

    pub fn insert_tombstone(&mut self, key: Vec<u8>, tombstone: Tombstone) {
        if let Some(previous) = self.keydir.remove(&key) {
            self.mark_stale(previous.location);
        }
        if let Some(previous) = self.tombstones.insert(key, tombstone) {
            self.release(previous);
        }
    }

    /// Record that the `Put` of `key` at `location` has expired.
    ///
    /// The value bytes become reclaimable at once; only the room a
    /// compact `Delete` needs stays live until the tombstone goes.
    fn insert_expired(&mut self, key: Vec<u8>, location: Location) -> StoreResult<()> {
        let tombstone = Tombstone::expired(&key, location)?;
        self.insert_tombstone(key, tombstone);
        self.mark_stale_bytes(location.segment, location.len - tombstone.live_bytes);
        Ok(())
    }

    /// Turn an expired entry into a tombstone. Returns `true` if it had expired.
    fn expire(&mut self, key: &[u8], now: u64) -> StoreResult<bool> {
        let Some(entry) = self.keydir.get(key).copied() else {
            return Ok(false);
        };
        if !entry.is_expired(now) {
            return Ok(false);
        }
        self.keydir.remove(key);
        self.insert_expired(key.to_vec(), entry.location)?;
        Ok(true)
    }

    fn live_entry(&mut self, key: &[u8], now: u64) -> StoreResult<Option<Entry>> {
        if self.expire(key, now)? {
            return Ok(None);
        }
        Ok(self.keydir.get(key).copied())
    }

    /// Expire every entry past its deadline.
    pub fn sweep_expired(&mut self, now: u64) -> StoreResult<usize> {
        let expired: Vec<Vec<u8>> = self
            .keydir
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.expire(key, now)?;
        }
        Ok(expired.len())
    }

    /// Forget tombstones that no longer shadow anything on disk.
    pub fn prune_tombstones(&mut self) {
        let Some(oldest) = self.segments.keys().next().copied() else {
            return;
        };
        let obsolete: Vec<Vec<u8>> = self
            .tombstones
            .iter()
            .filter(|(_, tombstone)| tombstone.origin < oldest)
            .map(|(key, _)| key.clone())
            .collect();
        for key in obsolete {
            if let Some(tombstone) = self.tombstones.remove(&key) {
                self.release(tombstone);
            }
        }
    }

    fn disk_usage(&self) -> u64 {
        self.segments.values().map(|segment| segment.size).sum()
    }
}

#[derive(Debug)]
pub(crate) struct StoreInner {
    pub dir: PathBuf,
    pub options: StoreOptions,
    pub state: Mutex<State>,
    pub lock: Mutex<Option<DirectoryLock>>,
    pub gc_running: AtomicBool,
}

/// Handle to an open store directory.
///
/// Cheap to clone; every clone shares the same engine. Only one `Store`
/// may own a directory at a time.
#[derive(Debug, Clone)]
pub struct Store {
    pub(crate) inner: Arc<StoreInner>,
}

impl Store {
    /// Open (or create) the store at `dir` with default options.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with(dir, StoreOptions::default())
    }

    /// Open (or create) the store at `dir`.
    ///
    /// Replays every segment to rebuild the key directory. A torn record at
    /// the tail of a segment is cut off; damage anywhere else is reported as
    /// [`StoreError::Corrupt`].
    pub fn open_with(dir: impl AsRef<Path>, options: StoreOptions) -> StoreResult<Self> {
        options.validate()?;
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let lock = DirectoryLock::try_acquire(&dir)?;

        let now = options.clock.now_millis();
        let mut state = State::new(dir.clone());
        let found = list_segments(&dir)?;
        let newest = found.last().map(|(id, _)| *id);

        for (id, path) in found {
            replay_segment(&mut state, id, path, Some(id) == newest, now)?;
        }

        match newest {
            Some(id) => state.active = id,
            None => {
                state.segments.insert(1, Segment::create(&dir, 1)?);
                state.active = 1;
            }
        }
        state.prune_tombstones();

        info!(
            path = %dir.display(),
            segments = state.segments.len(),
            keys = state.keydir.len(),
            "Opened embedded store"
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                dir,
                options,
                state: Mutex::new(state),
                lock: Mutex::new(Some(lock)),
                gc_running: AtomicBool::new(false),
            }),
        })
    }

    /// Directory this store lives in.
    pub fn path(&self) -> &Path {
        &self.inner.dir
    }

    pub(crate) fn now(&self) -> u64 {
        self.inner.options.clock.now_millis()
    }

    pub(crate) fn state(&self) -> StoreResult<MutexGuard<'_, State>> {
        let state = self.inner.state.lock();
        state.ensure_open()?;
        Ok(state)
    }

    /// Store `value` under `key`. A `ttl` of `None` or zero never expires.
    pub fn put(&self, key: &[u8], value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        let expires_at = ttl
            .filter(|ttl| !ttl.is_zero())
            .map(|ttl| self.now().saturating_add(ttl.as_millis() as u64));
        let frame = Record::put(key, value, expires_at).encode()?;

        let mut state = self.state()?;
        let location = state.append_frame(&frame, &self.inner.options)?;
        state.insert_entry(
            key.to_vec(),
            Entry {
                location,
                expires_at,
            },
        );
        Ok(())
    }

    /// Fetch the value for `key`, or `None` if absent or expired.
    pub fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let now = self.now();
        let mut state = self.state()?;
        let Some(entry) = state.live_entry(key, now)? else {
            return Ok(None);
        };

        let location = entry.location;
        let segment = state.segment_mut(location.segment)?;
        let record = segment.read_record(location.offset, location.len)?;
        if record.key != key || record.kind != RecordKind::Put {
            return Err(StoreError::Corrupt {
                path: segment.path.clone(),
                offset: location.offset,
                reason: "record does not match key directory".to_string(),
            });
        }
        Ok(Some(record.value))
    }

    /// Whether a live value exists for `key`.
    pub fn contains(&self, key: &[u8]) -> StoreResult<bool> {
        let now = self.now();
        let mut state = self.state()?;
        Ok(state.live_entry(key, now)?.is_some())
    }

    /// Remove `key`. Returns `true` if a live value was removed.
    pub fn delete(&self, key: &[u8]) -> StoreResult<bool> {
        let now = self.now();
        let mut state = self.state()?;
        match state.keydir.get(key).copied() {
            None => Ok(false),
            Some(entry) if entry.is_expired(now) => {
                state.expire(key, now)?;
                Ok(false)
            }
            Some(_) => {
                let tombstone = state.append_tombstone(key, &self.inner.options)?;
                state.insert_tombstone(key.to_vec(), tombstone);
                Ok(true)
            }
        }
    }

    /// Every live key.
    pub fn keys(&self) -> StoreResult<Vec<Vec<u8>>> {
        self.keys_with_prefix(&[])
    }

    /// Every live key starting with `prefix`.
    pub fn keys_with_prefix(&self, prefix: &[u8]) -> StoreResult<Vec<Vec<u8>>> {
        let now = self.now();
        let mut state = self.state()?;
        state.sweep_expired(now)?;
        Ok(state
            .keydir
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    /// Number of live keys.
    pub fn len(&self) -> StoreResult<usize> {
        let now = self.now();
        let mut state = self.state()?;
        state.sweep_expired(now)?;
        Ok(state.keydir.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Total bytes across all segment files.
    pub fn disk_usage(&self) -> StoreResult<u64> {
        Ok(self.state()?.disk_usage())
    }

    pub fn segment_count(&self) -> StoreResult<usize> {
        Ok(self.state()?.segments.len())
    }

    /// Flush the active segment to disk.
    pub fn sync(&self) -> StoreResult<()> {
        let mut state = self.state()?;
        let active = state.active;
        state.segment_mut(active)?.sync()
    }

    /// Flush and release the directory. Further calls on any clone fail
    /// with [`StoreError::Closed`]; closing twice is a no-op.
    pub fn close(&self) -> StoreResult<()> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Ok(());
        }
        let active = state.active;
        let synced = state.segment_mut(active).and_then(|segment| segment.sync());
        state.closed = true;
        drop(state);

        self.inner.lock.lock().take();
        info!(path = %self.inner.dir.display(), "Closed embedded store");
        synced
    }
}

/// Replay one segment into `state`.
fn replay_segment(
    state: &mut State,
    id: u64,
    path: PathBuf,
    newest: bool,
    now: u64,
) -> StoreResult<()> {
    let file = File::open(&path).map_err(|e| StoreError::io(&path, e))?;
    let file_len = file
        .metadata()
        .map_err(|e| StoreError::io(&path, e))?
        .len();
    let mut reader = BufReader::new(file);

    state
        .segments
        .insert(id, Segment::open(path.clone(), id, file_len)?);

    let mut offset = 0u64;
    loop {
        let next = read_frame(&mut reader).map_err(|e| StoreError::io(&path, e))?;
        let (frame, record) = match next {
            NextFrame::Record { frame, record } => (frame, record),
            NextFrame::End => break,
            // A sealed segment can end in a torn frame if rolling back a
            // failed append also failed.
            NextFrame::Fault(fault) if newest || fault == FrameFault::Truncated => {
                warn!(
                    path = %path.display(),
                    offset,
                    dropped_bytes = file_len - offset,
                    %fault,
                    "Truncating damaged segment tail"
                );
                state.segment_mut(id)?.truncate(offset)?;
                break;
            }
            NextFrame::Fault(fault) => {
                return Err(StoreError::Corrupt {
                    path,
                    offset,
                    reason: fault.to_string(),
                });
            }
        };

        let location = Location {
            segment: id,
            offset,
            len: frame.len() as u64,
        };
        offset += location.len;

        match record.kind {
            RecordKind::Put if record.is_expired(now) => {
                state.insert_expired(record.key, location)?;
            }
            RecordKind::Put => {
                state.insert_entry(
                    record.key,
                    Entry {
                        location,
                        expires_at: record.expires_at,
                    },
                );
            }
            RecordKind::Delete { origin } => {
                state.insert_tombstone(record.key, Tombstone::delete(location, origin));
            }
        }
    }

    Ok(())
}
