//! Append-only segment files.

use crate::error::{StoreError, StoreResult};
use crate::record::{HEADER_LEN, Record, decode_frame};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::error;

pub(crate) const SEGMENT_EXTENSION: &str = "vlog";

/// One `NNNNNNNNNN.vlog` file.
#[derive(Debug)]
pub(crate) struct Segment {
    pub id: u64,
    pub path: PathBuf,
    file: File,
    /// Bytes written so far.
    pub size: u64,
    /// Bytes belonging to records that no longer matter.
    pub stale: u64,
    /// A failed append could not be rolled back, so the file may end past
    /// `size`. Nothing more is appended; the store rotates away from it.
    pub unusable: bool,
}

impl Segment {
    pub fn file_name(id: u64) -> String {
        format!("{:010}.{}", id, SEGMENT_EXTENSION)
    }

    /// Create an empty segment.
    pub fn create(dir: &Path, id: u64) -> StoreResult<Self> {
        let path = dir.join(Self::file_name(id));
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        Ok(Self {
            id,
            path,
            file,
            size: 0,
            stale: 0,
            unusable: false,
        })
    }

    /// Open an existing segment whose valid length is already known.
    pub fn open(path: PathBuf, id: u64, size: u64) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        Ok(Self {
            id,
            path,
            file,
            size,
            stale: 0,
            unusable: false,
        })
    }

    /// Share of this segment that GC could reclaim.
    pub fn discard_ratio(&self) -> f64 {
        if self.size == 0 {
            0.0
        } else {
            self.stale as f64 / self.size as f64
        }
    }

    pub fn mark_stale(&mut self, bytes: u64) {
        self.stale = (self.stale + bytes).min(self.size);
    }

    /// Append a frame, returning the offset it landed at.
    ///
    /// A failed write is truncated away so no partial frame survives. If the
    /// truncate fails too the segment is marked [`unusable`](Self::unusable).
    pub fn append(&mut self, frame: &[u8], sync: bool) -> StoreResult<u64> {
        if self.unusable {
            return Err(self.corrupt(self.size, "segment sealed after a failed write"));
        }
        let offset = self.size;
        let written = self
            .file
            .write_all(frame)
            .and_then(|()| if sync { self.file.sync_data() } else { Ok(()) });

        if let Err(e) = written {
            if let Err(rollback) = self.file.set_len(offset) {
                error!(
                    path = %self.path.display(),
                    offset,
                    error = %rollback,
                    "Could not roll back failed append, sealing segment"
                );
                self.unusable = true;
            }
            return Err(StoreError::io(&self.path, e));
        }

        self.size += frame.len() as u64;
        Ok(offset)
    }

    /// Read and verify the record at `offset`.
    pub fn read_record(&mut self, offset: u64, len: u64) -> StoreResult<Record> {
        if len < HEADER_LEN as u64 || offset + len > self.size {
            return Err(self.corrupt(offset, "record location outside segment"));
        }

        let mut frame = vec![0u8; len as usize];
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(&mut frame))
            .map_err(|e| StoreError::io(&self.path, e))?;

        decode_frame(&frame).map_err(|fault| self.corrupt(offset, &fault.to_string()))
    }

    pub fn sync(&self) -> StoreResult<()> {
        self.file.sync_all().map_err(|e| StoreError::io(&self.path, e))
    }

    /// Drop any bytes past `len`.
    pub fn truncate(&mut self, len: u64) -> StoreResult<()> {
        self.file.set_len(len).map_err(|e| StoreError::io(&self.path, e))?;
        self.size = len;
        self.unusable = false;
        Ok(())
    }

    pub fn remove(self) -> StoreResult<()> {
        let Segment { path, file, .. } = self;
        drop(file);
        fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))
    }

    fn corrupt(&self, offset: u64, reason: &str) -> StoreError {
        StoreError::Corrupt {
            path: self.path.clone(),
            offset,
            reason: reason.to_string(),
        }
    }
}

/// List segment ids in `dir`, oldest first.
pub(crate) fn list_segments(dir: &Path) -> StoreResult<Vec<(u64, PathBuf)>> {
    let mut found = Vec::new();
    let entries = fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| StoreError::io(dir, e))?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(SEGMENT_EXTENSION) {
            continue;
        }
        if let Some(id) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<u64>().ok())
        {
            found.push((id, path));
        }
    }
    found.sort_by_key(|(id, _)| *id);
    Ok(found)
}
