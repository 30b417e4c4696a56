//! File-backed storage
//!
//! File layout:
//! - `cache.paw`: header + append-only log of set/delete records
//!
//! The whole log is replayed into memory on open. `close()` compacts the log
//! down to one set record per live key.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::parser::{
    create_header, encode_delete, encode_set, parse_header, parse_record, Record,
    FORMAT_VERSION, HEADER_LEN,
};
use crate::storage::{Entries, Storage};

const LOG_FILE: &str = "cache.paw";
const COMPACT_FILE: &str = "cache.paw.tmp";

/// Durable storage handle backed by a log file in a directory
pub struct FileStorage {
    /// Directory holding the log
    path: PathBuf,

    /// Log file handle (append mode)
    log: Mutex<File>,

    /// Replayed key/value state
    entries: RwLock<Entries>,

    /// Optional byte quota
    quota: Option<u64>,

    /// Is the storage closed?
    closed: RwLock<bool>,
}

impl FileStorage {
    /// Open or create a storage directory
    ///
    /// # Arguments
    /// * `path` - Directory for the log file
    ///
    /// # Returns
    /// * `Result<FileStorage>` - Storage handle with the log replayed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_quota(path, None)
    }

    /// Open or create a storage directory that rejects writes past `quota` bytes
    pub fn open_with_quota<P: AsRef<Path>>(path: P, quota: Option<u64>) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path)?;

        let mut log = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path.join(LOG_FILE))?;

        let mut buf = Vec::new();
        log.read_to_end(&mut buf)?;

        let entries = if buf.is_empty() {
            log.write_all(&create_header(FORMAT_VERSION, 0))?;
            Entries::new()
        } else {
            let (entries, valid_len) = Self::replay(&buf)?;
            if valid_len < buf.len() {
                warn!(
                    "Truncating {} bytes of torn record at end of {:?}",
                    buf.len() - valid_len,
                    path.join(LOG_FILE)
                );
                log.set_len(valid_len as u64)?;
            }
            entries
        };

        debug!("Opened {:?} with {} keys", path, entries.len());

        Ok(FileStorage {
            path: path.to_path_buf(),
            log: Mutex::new(log),
            entries: RwLock::new(entries),
            quota,
            closed: RwLock::new(false),
        })
    }

    /// Replay a log buffer, returning the state and the length of the valid prefix
    fn replay(buf: &[u8]) -> Result<(Entries, usize)> {
        let header = parse_header(buf)?;
        if header.version != FORMAT_VERSION {
            return Err(Error::Parse(format!(
                "Unsupported log version {}",
                header.version
            )));
        }

        let mut entries = Entries::new();
        let mut input = &buf[HEADER_LEN..];

        while !input.is_empty() {
            match parse_record(input) {
                Ok((rest, Record::Set { key, value })) => {
                    entries.insert(String::from_utf8(key.to_vec())?, String::from_utf8(value.to_vec())?);
                    input = rest;
                }
                Ok((rest, Record::Delete { key })) => {
                    entries.remove(&String::from_utf8(key.to_vec())?);
                    input = rest;
                }
                Err(_) => break,
            }
        }

        Ok((entries, buf.len() - input.len()))
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.closed.read() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn append(&self, record: &[u8]) -> Result<()> {
        let mut log = self.log.lock();
        log.write_all(record)?;
        log.flush()?;
        Ok(())
    }

    /// Rewrite the log with one record per live key
    pub fn compact(&self) -> Result<()> {
        self.ensure_open()?;

        let entries = self.entries.read();
        let mut log = self.log.lock();

        let tmp_path = self.path.join(COMPACT_FILE);
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&create_header(FORMAT_VERSION, entries.len() as u32))?;
            for (key, value) in entries.iter() {
                tmp.write_all(&encode_set(key, value))?;
            }
            tmp.sync_all()?;
        }

        let log_path = self.path.join(LOG_FILE);
        fs::rename(&tmp_path, &log_path)?;
        *log = OpenOptions::new().read(true).append(true).open(&log_path)?;

        debug!("Compacted {:?} to {} records", log_path, entries.len());
        Ok(())
    }

    /// Directory backing this storage
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compact the log and fsync it
    pub fn close(&mut self) -> Result<()> {
        if *self.closed.read() {
            return Ok(());
        }

        self.compact()?;
        self.log.lock().sync_all()?;
        *self.closed.write() = true;

        Ok(())
    }
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.ensure_open()?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_open()?;

        let mut entries = self.entries.write();
        entries.check_quota(key, value, self.quota)?;
        self.append(&encode_set(key, value))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.ensure_open()?;

        let mut entries = self.entries.write();
        if entries.get(key).is_some() {
            self.append(&encode_delete(key))?;
            entries.remove(key);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        Ok(self.entries.read().sorted_keys())
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn usage_bytes(&self) -> u64 {
        self.entries.read().usage()
    }

    fn quota_bytes(&self) -> Option<u64> {
        self.quota
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
