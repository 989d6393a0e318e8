//! Integration tests for larder-store

use larder_store::*;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn small_segments() -> StoreOptions {
    StoreOptions::new().with_max_segment_bytes(16 * 1024)
}

fn key(i: usize) -> Vec<u8> {
    format!("key-{:04}", i).into_bytes()
}

fn value(generation: u8, i: usize) -> Vec<u8> {
    let mut value = vec![generation; 64];
    value[..8].copy_from_slice(&(i as u64).to_le_bytes());
    value
}

fn gc_until_done(store: &Store, ratio: f64) -> Vec<GcOutcome> {
    let mut outcomes = Vec::new();
    for _ in 0..100 {
        match store.run_value_log_gc(ratio) {
            Ok(outcome) => outcomes.push(outcome),
            Err(StoreError::NoRewrite) => return outcomes,
            Err(e) => panic!("GC failed: {}", e),
        }
    }
    panic!("GC did not converge");
}

fn newest_segment(dir: &Path) -> std::path::PathBuf {
    let mut segments: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "vlog"))
        .collect();
    segments.sort();
    segments.pop().unwrap()
}

#[test]
fn test_second_open_is_locked() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(dir.path()).unwrap();

    assert!(matches!(
        Store::open(dir.path()),
        Err(StoreError::Locked(_))
    ));

    store.close().unwrap();
    let reopened = Store::open(dir.path()).unwrap();
    reopened.close().unwrap();
}

#[test]
fn test_reopen_replays_log() {
    let dir = TempDir::new().unwrap();
    {
        let store = Store::open_with(dir.path(), small_segments()).unwrap();
        for i in 0..300 {
            store.put(&key(i), &value(1, i), None).unwrap();
        }
        for i in 0..100 {
            store.delete(&key(i)).unwrap();
        }
        store.put(&key(200), &value(2, 200), None).unwrap();
        store.close().unwrap();
    }

    let store = Store::open_with(dir.path(), small_segments()).unwrap();
    assert_eq!(store.len().unwrap(), 200);
    assert_eq!(store.get(&key(50)).unwrap(), None);
    assert_eq!(store.get(&key(150)).unwrap(), Some(value(1, 150)));
    assert_eq!(store.get(&key(200)).unwrap(), Some(value(2, 200)));
}

#[test]
fn test_expired_value_stays_gone_after_reopen() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::starting_at(1_000_000));
    let options = StoreOptions::new().with_clock(clock.clone());
    {
        let store = Store::open_with(dir.path(), options.clone()).unwrap();
        store
            .put(b"user:42:profile", b"A", Some(Duration::from_secs(60)))
            .unwrap();
        assert!(store.contains(b"user:42:profile").unwrap());
        store.close().unwrap();
    }

    clock.advance(Duration::from_secs(61));
    let store = Store::open_with(dir.path(), options).unwrap();
    assert!(!store.contains(b"user:42:profile").unwrap());
    assert_eq!(store.get(b"user:42:profile").unwrap(), None);
}

#[test]
fn test_torn_tail_is_truncated() {
    let dir = TempDir::new().unwrap();
    {
        let store = Store::open(dir.path()).unwrap();
        store.put(b"a", b"1", None).unwrap();
        store.put(b"b", b"2", None).unwrap();
        store.close().unwrap();
    }

    let segment = newest_segment(dir.path());
    let intact_len = std::fs::metadata(&segment).unwrap().len();
    {
        let mut file = OpenOptions::new().append(true).open(&segment).unwrap();
        file.write_all(&[0x20, 0, 0, 0, 0xde, 0xad]).unwrap();
    }

    let store = Store::open(dir.path()).unwrap();
    assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(std::fs::metadata(&segment).unwrap().len(), intact_len);

    store.put(b"c", b"3", None).unwrap();
    store.close().unwrap();

    let store = Store::open(dir.path()).unwrap();
    assert_eq!(store.get(b"c").unwrap(), Some(b"3".to_vec()));
}

#[test]
fn test_torn_tail_of_sealed_segment_is_truncated() {
    let dir = TempDir::new().unwrap();
    {
        let store = Store::open_with(dir.path(), small_segments()).unwrap();
        for i in 0..400 {
            store.put(&key(i), &value(1, i), None).unwrap();
        }
        store.close().unwrap();
    }

    // What a failed append leaves behind when its rollback also failed.
    let first = dir.path().join("0000000001.vlog");
    let intact_len = std::fs::metadata(&first).unwrap().len();
    {
        let mut file = OpenOptions::new().append(true).open(&first).unwrap();
        file.write_all(&[0x40, 0, 0, 0, 0xbe, 0xef, 0x01]).unwrap();
    }

    let store = Store::open_with(dir.path(), small_segments()).unwrap();
    assert_eq!(store.len().unwrap(), 400);
    assert_eq!(store.get(&key(0)).unwrap(), Some(value(1, 0)));
    assert_eq!(std::fs::metadata(&first).unwrap().len(), intact_len);
}

#[test]
fn test_corruption_in_sealed_segment_is_error() {
    let dir = TempDir::new().unwrap();
    {
        let store = Store::open_with(dir.path(), small_segments()).unwrap();
        for i in 0..400 {
            store.put(&key(i), &value(1, i), None).unwrap();
        }
        store.close().unwrap();
    }

    let first = dir.path().join("0000000001.vlog");
    let mut bytes = std::fs::read(&first).unwrap();
    bytes[20] ^= 0xff;
    std::fs::write(&first, bytes).unwrap();

    assert!(matches!(
        Store::open_with(dir.path(), small_segments()),
        Err(StoreError::Corrupt { .. })
    ));
}

#[test]
fn test_gc_keeps_live_values_and_shrinks_disk() {
    let dir = TempDir::new().unwrap();
    let store = Store::open_with(dir.path(), small_segments()).unwrap();

    for i in 0..1000 {
        store.put(&key(i), &value(1, i), None).unwrap();
    }
    for i in 0..500 {
        store.put(&key(i), &value(2, i), None).unwrap();
    }

    let before = store.disk_usage().unwrap();
    let outcomes = gc_until_done(&store, 0.5);
    let after = store.disk_usage().unwrap();

    assert!(!outcomes.is_empty());
    assert!(after < before, "disk usage {} -> {}", before, after);
    assert_eq!(
        before - after,
        outcomes.iter().map(|o| o.reclaimed_bytes).sum::<u64>()
    );

    assert_eq!(store.len().unwrap(), 1000);
    for i in 0..500 {
        assert_eq!(store.get(&key(i)).unwrap(), Some(value(2, i)));
    }
    for i in 500..1000 {
        assert_eq!(store.get(&key(i)).unwrap(), Some(value(1, i)));
    }

    store.close().unwrap();
    let store = Store::open_with(dir.path(), small_segments()).unwrap();
    assert_eq!(store.len().unwrap(), 1000);
    assert_eq!(store.get(&key(0)).unwrap(), Some(value(2, 0)));
    assert_eq!(store.get(&key(999)).unwrap(), Some(value(1, 999)));
}

#[test]
fn test_deleted_value_not_resurrected_by_gc() {
    let dir = TempDir::new().unwrap();
    {
        let store = Store::open_with(dir.path(), small_segments()).unwrap();
        for i in 0..600 {
            store.put(&key(i), &value(1, i), None).unwrap();
        }
        // Delete keys whose values sit in the oldest segments, then churn
        // newer keys so the segments holding the tombstones become garbage.
        for i in 0..100 {
            store.delete(&key(i)).unwrap();
        }
        for i in 300..600 {
            store.put(&key(i), &value(2, i), None).unwrap();
        }

        gc_until_done(&store, 0.3);
        for i in 0..100 {
            assert_eq!(store.get(&key(i)).unwrap(), None);
        }
        store.close().unwrap();
    }

    let store = Store::open_with(dir.path(), small_segments()).unwrap();
    assert_eq!(store.len().unwrap(), 500);
    for i in 0..100 {
        assert!(!store.contains(&key(i)).unwrap(), "key {} came back", i);
    }
    assert_eq!(store.get(&key(150)).unwrap(), Some(value(1, 150)));
    assert_eq!(store.get(&key(450)).unwrap(), Some(value(2, 450)));
}

#[test]
fn test_expired_value_not_resurrected_by_gc() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::starting_at(5_000));
    let options = small_segments().with_clock(clock.clone());
    {
        let store = Store::open_with(dir.path(), options.clone()).unwrap();
        store.put(b"session", b"old", None).unwrap();
        for i in 0..400 {
            store.put(&key(i), &value(1, i), None).unwrap();
        }
        store
            .put(b"session", b"new", Some(Duration::from_secs(1)))
            .unwrap();
        for i in 0..400 {
            store.put(&key(i), &value(2, i), None).unwrap();
        }

        clock.advance(Duration::from_secs(2));
        gc_until_done(&store, 0.3);
        assert_eq!(store.get(b"session").unwrap(), None);
        store.close().unwrap();
    }

    let store = Store::open_with(dir.path(), options).unwrap();
    assert_eq!(store.get(b"session").unwrap(), None);
}

#[test]
fn test_gc_reclaims_expired_values() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::starting_at(1_000_000));
    let options = StoreOptions::new().with_clock(clock.clone());
    let store = Store::open_with(dir.path(), options.clone()).unwrap();

    for i in 0..100 {
        store.put(&key(i), &[1u8; 500], None).unwrap();
    }
    for i in 100..200 {
        store
            .put(&key(i), &[2u8; 4000], Some(Duration::from_secs(1)))
            .unwrap();
    }
    let before = store.disk_usage().unwrap();

    clock.advance(Duration::from_secs(5));
    let outcomes = gc_until_done(&store, 0.5);
    let after = store.disk_usage().unwrap();

    assert!(!outcomes.is_empty());
    assert!(after * 4 < before, "disk usage {} -> {}", before, after);
    assert_eq!(store.len().unwrap(), 100);
    assert_eq!(store.get(&key(50)).unwrap(), Some(vec![1u8; 500]));
    assert_eq!(store.get(&key(150)).unwrap(), None);

    store.close().unwrap();
    let store = Store::open_with(dir.path(), options).unwrap();
    assert_eq!(store.len().unwrap(), 100);
    assert!(!store.contains(&key(150)).unwrap());
}

#[test]
fn test_gc_runs_alongside_writers() {
    let dir = TempDir::new().unwrap();
    let store = Store::open_with(dir.path(), small_segments()).unwrap();
    for i in 0..500 {
        store.put(&key(i), &value(1, i), None).unwrap();
    }

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || {
                for round in 0..5u8 {
                    for i in (t..500).step_by(4) {
                        store.put(&key(i), &value(round + 2, i), None).unwrap();
                        assert!(store.get(&key(i)).unwrap().is_some());
                    }
                }
            })
        })
        .collect();

    let collector = {
        let store = store.clone();
        thread::spawn(move || {
            let mut passes = 0;
            for _ in 0..200 {
                match store.run_value_log_gc(0.5) {
                    Ok(_) => passes += 1,
                    Err(StoreError::NoRewrite) => thread::yield_now(),
                    Err(e) => panic!("GC failed: {}", e),
                }
            }
            passes
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    collector.join().unwrap();

    for i in 0..500 {
        assert_eq!(store.get(&key(i)).unwrap(), Some(value(6, i)));
    }
}
