//! Value-log garbage collection.

use crate::error::{StoreError, StoreResult};
use crate::record::{NextFrame, Record, RecordKind, read_frame};
use crate::store::{Entry, Location, State, Store, StoreOptions, Tombstone};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use parking_lot::MutexGuard;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Records relocated per hold of the engine lock.
const RELOCATE_BATCH: usize = 256;

/// Result of one successful GC pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcOutcome {
    /// Segment that was rewritten and removed.
    pub segment: u64,
    /// Net bytes freed on disk.
    pub reclaimed_bytes: u64,
    /// Live records copied forward.
    pub rewritten_records: usize,
}

/// Clears the in-progress flag when a pass ends.
struct GcGuard<'a>(&'a AtomicBool);

impl<'a> GcGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> StoreResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| StoreError::GcInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for GcGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Store {
    /// Rewrite the segment with the most reclaimable space.
    ///
    /// Only segments whose reclaimable share is at least `discard_ratio`
    /// qualify; if none do, returns [`StoreError::NoRewrite`]. The segment
    /// is read without holding the engine lock and its live records are
    /// copied forward in small batches, so reads and writes proceed while
    /// the pass runs. Expired values are rewritten as compact deletes. Call
    /// repeatedly to keep reclaiming.
    pub fn run_value_log_gc(&self, discard_ratio: f64) -> StoreResult<GcOutcome> {
        if !(discard_ratio > 0.0 && discard_ratio < 1.0) {
            return Err(StoreError::InvalidOption(format!(
                "discard ratio must be between 0 and 1, got {}",
                discard_ratio
            )));
        }
        let _guard = GcGuard::acquire(&self.inner.gc_running)?;

        let (segment_id, path, size) = {
            let now = self.now();
            let mut state = self.state()?;
            state.sweep_expired(now)?;
            let candidate = pick_candidate(&state, discard_ratio).ok_or(StoreError::NoRewrite)?;
            if candidate == state.active {
                state.rotate()?;
            }
            let segment = state.segment_mut(candidate)?;
            (candidate, segment.path.clone(), segment.size)
        };

        debug!(segment = segment_id, size, "Value-log GC reading segment");
        let records = read_sealed(&path, segment_id, size)?;

        let mut rewritten_records = 0usize;
        let mut rewritten_bytes = 0u64;

        for batch in records.chunks(RELOCATE_BATCH) {
            let mut state = self.state()?;
            for (location, frame, record) in batch {
                if let Some(written) =
                    relocate(&mut state, *location, frame, record, &self.inner.options)?
                {
                    rewritten_records += 1;
                    rewritten_bytes += written;
                }
            }
            // Hand the lock to any waiting request before the next batch.
            MutexGuard::unlock_fair(state);
        }

        let mut state = self.state()?;
        if rewritten_records > 0 {
            let active = state.active;
            state.segment_mut(active)?.sync()?;
        }

        if let Some(segment) = state.segments.remove(&segment_id) {
            segment.remove()?;
        }
        state.prune_tombstones();

        let outcome = GcOutcome {
            segment: segment_id,
            reclaimed_bytes: size.saturating_sub(rewritten_bytes),
            rewritten_records,
        };
        info!(
            segment = outcome.segment,
            reclaimed_bytes = outcome.reclaimed_bytes,
            rewritten_records = outcome.rewritten_records,
            "Value-log GC rewrote segment"
        );
        Ok(outcome)
    }
}

fn pick_candidate(state: &State, discard_ratio: f64) -> Option<u64> {
    state
        .segments
        .values()
        .filter(|segment| segment.size > 0 && segment.discard_ratio() >= discard_ratio)
        .max_by(|a, b| a.discard_ratio().total_cmp(&b.discard_ratio()))
        .map(|segment| segment.id)
}

/// Copy a record forward if the key directory still points at it.
///
/// Returns the bytes written, or `None` if the record was dead.
fn relocate(
    state: &mut State,
    location: Location,
    frame: &[u8],
    record: &Record,
    options: &StoreOptions,
) -> StoreResult<Option<u64>> {
    let live_entry = matches!(record.kind, RecordKind::Put)
        && state
            .keydir
            .get(&record.key)
            .is_some_and(|entry| entry.location == location);

    if live_entry {
        let moved = state.append_frame(frame, options)?;
        state.keydir.insert(
            record.key.clone(),
            Entry {
                location: moved,
                expires_at: record.expires_at,
            },
        );
        return Ok(Some(moved.len));
    }

    let live_tombstone = state
        .tombstones
        .get(&record.key)
        .copied()
        .filter(|tombstone| tombstone.location == location);

    if let Some(tombstone) = live_tombstone {
        // An expired value only needs to go on hiding older ones.
        let compact = match record.kind {
            RecordKind::Put => Some(Record::delete(&record.key, tombstone.origin).encode()?),
            RecordKind::Delete { .. } => None,
        };
        let moved = state.append_frame(compact.as_deref().unwrap_or(frame), options)?;
        state
            .tombstones
            .insert(record.key.clone(), Tombstone::delete(moved, tombstone.origin));
        return Ok(Some(moved.len));
    }

    Ok(None)
}

/// Read every record of a sealed segment.
fn read_sealed(
    path: &Path,
    segment: u64,
    size: u64,
) -> StoreResult<Vec<(Location, Vec<u8>, Record)>> {
    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let mut reader = BufReader::new(file).take(size);

    let mut records = Vec::new();
    let mut offset = 0u64;
    loop {
        match read_frame(&mut reader).map_err(|e| StoreError::io(path, e))? {
            NextFrame::Record { frame, record } => {
                let location = Location {
                    segment,
                    offset,
                    len: frame.len() as u64,
                };
                offset += location.len;
                records.push((location, frame, record));
            }
            NextFrame::End => break,
            NextFrame::Fault(fault) => {
                return Err(StoreError::Corrupt {
                    path: path.to_path_buf(),
                    offset,
                    reason: fault.to_string(),
                });
            }
        }
    }
    Ok(records)
}
