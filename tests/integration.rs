//! End-to-end tests against a real temp directory, covering the testable
//! properties and the concrete scenarios.

use std::sync::Arc;

use bitcask::engine::data_filepath;
use bitcask::{Engine, Options};

fn open(dir: &std::path::Path) -> Engine {
    Engine::open(dir, Options::default()).expect("open failed")
}

#[test]
fn open_empty_dir() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(dir.path());
    assert_eq!(engine.len(), 0);
    // bitcask.lock plus the freshly created, empty active file.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
}

#[test]
fn round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(dir.path());
    engine.put(b"key", b"value").unwrap();
    assert_eq!(engine.get(b"key").unwrap(), Some(b"value".to_vec()));

    let data_files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("bitcask.data."))
        .collect();
    assert_eq!(data_files.len(), 1);
}

#[test]
fn last_write_wins() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(dir.path());
    engine.put(b"key", b"one").unwrap();
    engine.put(b"key", b"two").unwrap();
    engine.put(b"key", b"three").unwrap();
    assert_eq!(engine.get(b"key").unwrap(), Some(b"three".to_vec()));
}

#[test]
fn delete_hides_until_next_put() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(dir.path());
    engine.put(b"key", b"value").unwrap();
    engine.delete(b"key").unwrap();
    assert_eq!(engine.get(b"key").unwrap(), None);
    engine.put(b"key", b"again").unwrap();
    assert_eq!(engine.get(b"key").unwrap(), Some(b"again".to_vec()));
}

#[test]
fn durability_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = open(dir.path());
        for i in 0..128u32 {
            let key = i.to_string();
            engine.put(key.as_bytes(), key.as_bytes()).unwrap();
        }
        engine.close().unwrap();
    }
    {
        let engine = open(dir.path());
        assert_eq!(engine.len(), 128);
        for i in 0..128u32 {
            let key = i.to_string();
            assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(key.into_bytes()));
        }
        for i in 0..64u32 {
            engine.delete(i.to_string().as_bytes()).unwrap();
        }
        engine.close().unwrap();
    }
    {
        let engine = open(dir.path());
        assert_eq!(engine.len(), 64);
        for i in 0..64u32 {
            assert_eq!(engine.get(i.to_string().as_bytes()).unwrap(), None);
        }
        for i in 64..128u32 {
            let key = i.to_string();
            assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(key.into_bytes()));
        }
    }
}

#[test]
fn rotation_preserves_semantics() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(dir.path(), Options { max_file_size: 32, sync_on_put: false }).unwrap();

    // "key" -> "value" is 16 + 3 + 5 = 24 bytes: fits in the first file.
    engine.put(b"key", b"value").unwrap();
    // A second identical put would bring the file to 48 bytes, over the
    // 32-byte limit, forcing rotation to file 2 at offset 0.
    engine.put(b"key", b"value").unwrap();

    assert!(data_filepath(dir.path(), 1).exists());
    assert!(data_filepath(dir.path(), 2).exists());
    assert_eq!(engine.get(b"key").unwrap(), Some(b"value".to_vec()));

    let data_files = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("bitcask.data."))
        .count();
    assert!(data_files >= 2);
}

#[test]
fn reopen_after_a_torn_tail_record_truncates_and_continues() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = open(dir.path());
        engine.put(b"key", b"value").unwrap();
        engine.put(b"second", b"record").unwrap();
        engine.close().unwrap();
    }

    // Simulate a crash mid-append: chop the last few bytes off the active
    // file, leaving a truncated final record.
    let path = data_filepath(dir.path(), 1);
    let full_len = std::fs::metadata(&path).unwrap().len();
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(full_len - 3).unwrap();
    drop(file);

    // Recovery should truncate the torn record away rather than failing
    // `open()`, and the prior complete record should still be live.
    let engine = open(dir.path());
    assert_eq!(engine.len(), 1);
    assert_eq!(engine.get(b"key").unwrap(), Some(b"value".to_vec()));
    assert_eq!(engine.get(b"second").unwrap(), None);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 24);

    // The file is still writable after recovery: further puts append past
    // the truncation point without error.
    engine.put(b"third", b"ok").unwrap();
    assert_eq!(engine.get(b"third").unwrap(), Some(b"ok".to_vec()));
}

#[test]
fn oversized_record_is_rejected_and_leaves_state_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(dir.path(), Options { max_file_size: 32, sync_on_put: false }).unwrap();
    let big_value = vec![b'x'; 64];
    let err = engine.put(b"key", &big_value).unwrap_err();
    assert!(matches!(err, bitcask::Error::SizeExceeded { .. }));
    assert_eq!(engine.len(), 0);
    assert_eq!(engine.get(b"key").unwrap(), None);
}

#[test]
fn get_on_fresh_engine_opens_no_read_handles() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(dir.path());
    assert_eq!(engine.get(b"never-written").unwrap(), None);
}

#[test]
fn data_filepath_resolves_expected_name() {
    let dir = std::path::Path::new("/tmp/some-db");
    assert_eq!(data_filepath(dir, 1024), dir.join("bitcask.data.1024"));
}

#[test]
fn empty_value_is_indistinguishable_from_a_tombstone() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(dir.path());
    engine.put(b"key", b"").unwrap();
    // Documented limitation (spec.md Open Questions): a zero-length value
    // is reserved for tombstones, so it reads back as absent.
    assert_eq!(engine.get(b"key").unwrap(), None);
}

#[test]
fn closed_engine_rejects_writes() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open(dir.path());
    engine.close().unwrap();
    assert!(matches!(engine.put(b"key", b"value"), Err(bitcask::Error::Closed)));
    assert!(matches!(engine.get(b"key"), Err(bitcask::Error::Closed)));
    // close() is idempotent.
    assert!(engine.close().is_ok());
}

#[test]
fn concurrent_mixed_operations_never_see_corrupted_data() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(open(dir.path()));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                for i in 0..200u32 {
                    let key = format!("{t}-{i}");
                    let value = format!("value-{t}-{i}");
                    engine.put(key.as_bytes(), value.as_bytes()).unwrap();
                    assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(value.into_bytes()));
                    if i % 10 == 0 {
                        engine.delete(key.as_bytes()).unwrap();
                        assert_eq!(engine.get(key.as_bytes()).unwrap(), None);
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn reopening_after_a_second_engine_is_already_open_fails() {
    let dir = tempfile::tempdir().unwrap();
    let _engine = open(dir.path());
    assert!(Engine::open(dir.path(), Options::default()).is_err());
}
