//! The storage engine: owns the data directory, the active writable log
//! file, a memoized set of read-only file handles, and the keydir. See the
//! module-level docs in [`crate`] for the overall design.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use fs4::FileExt;
use once_cell::sync::OnceCell;

use crate::entry;
use crate::error::{Error, Result};
use crate::keydir::{Item, Keydir};
use crate::options::Options;

const DATA_PREFIX: &str = "bitcask.data.";
const LOCK_FILE: &str = "bitcask.lock";

/// Returns the path of the data file with the given ID inside `dir`.
pub fn data_filepath(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{DATA_PREFIX}{file_id}"))
}

/// Parses the numeric file ID out of a data file name, or `None` if `name`
/// doesn't start with the data file prefix at all (i.e. it's some other,
/// unrelated file in the directory and should simply be ignored).
fn parse_file_id(name: &str) -> Option<Result<u32>> {
    let suffix = name.strip_prefix(DATA_PREFIX)?;
    Some(suffix.parse::<u32>().map_err(|_| Error::InvalidFileName { name: name.to_string() }))
}

fn now_unix() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as u32
}

/// The currently writable log file plus the bookkeeping needed to rotate it.
/// Wrapped in `Option` so `close()` can drop the handle and mark the engine
/// unusable without tearing down the whole `Engine`.
struct WriteState {
    file: File,
    file_id: u32,
    offset: u64,
}

/// A memoized, single-flight-coalesced set of read-only file handles, keyed
/// by file ID. At most one `open()` syscall happens per file ID even under
/// concurrent first-time readers; all waiters receive the same handle.
#[derive(Default)]
struct FileTable {
    inner: Mutex<HashMap<u32, Arc<OnceCell<Arc<File>>>>>,
}

impl FileTable {
    fn get_or_open(&self, dir: &Path, file_id: u32) -> Result<Arc<File>> {
        let cell = {
            let mut inner = self.inner.lock().unwrap();
            Arc::clone(inner.entry(file_id).or_insert_with(|| Arc::new(OnceCell::new())))
        };
        cell.get_or_try_init(|| File::open(data_filepath(dir, file_id)).map(Arc::new).map_err(Error::from))
            .map(Arc::clone)
    }

    /// Installs an already-open handle for `file_id`, as recovery does for
    /// each file it streams through (avoiding a redundant reopen).
    fn install(&self, file_id: u32, file: Arc<File>) {
        let cell = OnceCell::new();
        let _ = cell.set(file);
        self.inner.lock().unwrap().insert(file_id, Arc::new(cell));
    }

    fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

/// An open bitcask database. Safe to share across threads: `get` takes `&self`,
/// `put`/`delete`/`sync`/`close` serialize internally on a single write lock.
pub struct Engine {
    dir: PathBuf,
    options: Options,
    keydir: Keydir,
    files: FileTable,
    write: Mutex<Option<WriteState>>,
    closed: AtomicBool,
    _lock_file: File,
}

impl Engine {
    /// Opens (creating if necessary) a bitcask database in `dir`, replaying
    /// its log files to rebuild the keydir. Errors during recovery abort the
    /// open entirely; no `Engine` is constructed.
    pub fn open(dir: impl AsRef<Path>, options: Options) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let lock_file = OpenOptions::new().create(true).read(true).write(true).open(dir.join(LOCK_FILE))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| Error::AlreadyLocked { path: dir.join(LOCK_FILE) })?;

        let mut names: Vec<String> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();

        let mut file_ids = Vec::new();
        for name in &names {
            match parse_file_id(name) {
                None => continue,
                Some(Ok(id)) => file_ids.push(id),
                Some(Err(err)) => return Err(err),
            }
        }
        file_ids.sort_unstable();

        let keydir = Keydir::new();
        let files = FileTable::default();
        for file_id in &file_ids {
            let path = data_filepath(&dir, *file_id);
            // Opened read-write (not read-only) so that a torn tail record
            // can be truncated away in place during recovery; see
            // `load_data_file`.
            let file = OpenOptions::new().read(true).write(true).open(&path)?;
            load_data_file(&path, &file, &keydir)?;
            files.install(*file_id, Arc::new(file));
        }

        let active_file_id = file_ids.last().copied().unwrap_or(1);
        let active_path = data_filepath(&dir, active_file_id);
        let active_file = open_active(&active_path, options.sync_on_put)?;
        let offset = active_file.metadata()?.len();

        log::info!(
            "opened bitcask database at {} ({} live keys, active file {})",
            dir.display(),
            keydir.len(),
            active_file_id,
        );

        Ok(Self {
            dir,
            options,
            keydir,
            files,
            write: Mutex::new(Some(WriteState { file: active_file, file_id: active_file_id, offset })),
            closed: AtomicBool::new(false),
            _lock_file: lock_file,
        })
    }

    /// Inserts or overwrites `key` with `value`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let timestamp = now_unix();
        let buf = entry::encode(key, value, timestamp);
        self.append(&buf, |file_id, new_offset| Item {
            file_id,
            value_size: value.len() as u32,
            value_offset: new_offset - value.len() as u64,
            timestamp,
        })
        .map(|item| self.keydir.put(key, item))
    }

    /// Looks up `key`, returning its value, or `None` if it isn't present.
    /// A key present in the keydir whose I/O fails surfaces as `Err`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        let Some(item) = self.keydir.get(key) else {
            return Ok(None);
        };
        let file = self.files.get_or_open(&self.dir, item.file_id)?;
        let mut buf = vec![0u8; item.value_size as usize];
        read_at(&file, item.value_offset, &mut buf)?;
        Ok(Some(buf))
    }

    /// Appends a tombstone for `key` and removes it from the keydir.
    /// Deleting an absent key is not an error; a tombstone is still written.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let timestamp = now_unix();
        let buf = entry::encode(key, &[], timestamp);
        self.append(&buf, |_, _| ())?;
        self.keydir.delete(key);
        Ok(())
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.keydir.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keydir.is_empty()
    }

    /// Flushes the active file to disk. A no-op if already closed.
    pub fn sync(&self) -> Result<()> {
        let guard = self.write.lock().unwrap();
        match guard.as_ref() {
            Some(state) => Ok(state.file.sync_all()?),
            None => Ok(()),
        }
    }

    /// Flushes and closes the active file, releasing all read-only handles.
    /// Idempotent: closing an already-closed engine is a no-op. Every
    /// write-path operation on a closed engine returns [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        let mut guard = self.write.lock().unwrap();
        if let Some(state) = guard.take() {
            state.file.sync_all()?;
        }
        self.closed.store(true, Ordering::SeqCst);
        self.files.clear();
        Ok(())
    }

    /// Appends `buf` to the active file, rotating first if needed, and
    /// returns `build(file_id, new_offset)` computed under the write lock
    /// (so that a caller can derive a keydir item from the post-rotation
    /// file ID and offset without re-acquiring the lock).
    fn append<T>(&self, buf: &[u8], build: impl FnOnce(u32, u64) -> T) -> Result<T> {
        let len = buf.len() as u64;
        if len > self.options.max_file_size as u64 {
            return Err(Error::SizeExceeded { size: len, max_file_size: self.options.max_file_size });
        }

        let mut guard = self.write.lock().unwrap();
        let state = guard.as_mut().ok_or(Error::Closed)?;

        if state.offset + len > self.options.max_file_size as u64 {
            let next_id = state.file_id + 1;
            let next_path = data_filepath(&self.dir, next_id);
            let next_file = open_active(&next_path, self.options.sync_on_put)?;
            state.file = next_file;
            state.file_id = next_id;
            state.offset = 0;
        }

        state.file.write_all(buf)?;
        if self.options.sync_on_put {
            state.file.sync_data()?;
        }
        state.offset += len;

        Ok(build(state.file_id, state.offset))
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::error!("failed to close bitcask database at {}: {}", self.dir.display(), err);
        }
    }
}

/// Opens (creating if needed) a log file for appending, used for both the
/// initial active file at startup and each file created by rotation.
fn open_active(path: &Path, _sync_on_put: bool) -> Result<File> {
    // Durability for `sync_on_put` is handled per-write in `append` via
    // `sync_data`, a portable stand-in for opening with the synchronous-
    // write flag.
    Ok(OpenOptions::new().create(true).append(true).read(true).open(path)?)
}

/// Streams every entry in `file` through the codec and applies it to
/// `keydir`, in file order. A truncated tail record (the tell-tale sign of
/// an interrupted write) is logged and the file is truncated to the last
/// complete record rather than rejecting the whole database; a CRC mismatch
/// on an otherwise complete record is a hard error, since that indicates
/// corruption rather than a torn write.
fn load_data_file(path: &Path, file: &File, keydir: &Keydir) -> Result<()> {
    let file_id = parse_file_id(&path.file_name().unwrap().to_string_lossy())
        .and_then(|r| r.ok())
        .expect("load_data_file called with a non-data-file path");

    let mut reader = BufReader::new(file);
    let mut offset: u64 = 0;
    loop {
        match entry::decode(&mut reader, path, offset) {
            Ok(None) => break,
            Ok(Some(e)) => {
                let size = e.encoded_len() as u64;
                if e.is_tombstone() {
                    keydir.delete(&e.key);
                } else {
                    keydir.put(
                        &e.key,
                        Item {
                            file_id,
                            value_size: e.value.len() as u32,
                            value_offset: offset + entry::HEADER_LEN as u64 + e.key.len() as u64,
                            timestamp: e.timestamp,
                        },
                    );
                }
                offset += size;
            }
            Err(Error::TruncatedHeader { .. }) | Err(Error::TruncatedBody { .. }) => {
                log::error!("found incomplete entry at offset {offset} in {}, truncating file", path.display());
                file.set_len(offset)?;
                break;
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[cfg(unix)]
fn read_at(file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.seek_read(&mut buf[filled..], offset + filled as u64)?;
        if n == 0 {
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short positional read"));
        }
        filled += n;
    }
    Ok(())
}
