//! Directory-backed record table.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use parking_lot::Mutex;
use walkdir::WalkDir;

use super::{mirror_dir, record::CacheRecord, Error};

#[derive(Debug)]
struct Entry<R> {
    file: PathBuf,
    record: R,
}

#[derive(Debug)]
/// In-memory list of records mirrored as one file per record under `root`.
pub struct CacheStore<R> {
    root: PathBuf,
    source_root: PathBuf,
    entries: Mutex<Vec<Entry<R>>>,
}

impl<R: CacheRecord> CacheStore<R> {
    /// Empty store writing under `root`. Record files mirror their anchor's directory relative to
    /// `source_root`.
    pub fn new(root: impl Into<PathBuf>, source_root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            source_root: source_root.into(),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Store holding every record found under `root`, see [CacheStore::load].
    pub fn open(root: impl Into<PathBuf>, source_root: impl Into<PathBuf>) -> Result<Self, Error> {
        let store = Self::new(root, source_root);
        store.load()?;
        Ok(store)
    }

    #[allow(missing_docs)]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Append every record file found under the root, creating the root if needed. Files that
    /// cannot be decoded are skipped. Returns the number of records loaded.
    pub fn load(&self) -> Result<usize, Error> {
        std::fs::create_dir_all(&self.root).map_err(Error::io(&self.root))?;

        let mut loaded = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable cache entry: {err}");
                    continue;
                }
            };

            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|ext| ext.to_str()) != Some(R::EXTENSION)
            {
                continue;
            }

            match Self::read(path) {
                Ok(record) => loaded.push(Entry {
                    file: path.to_owned(),
                    record,
                }),
                Err(err) => warn!("Skipping cache record: {err}"),
            }
        }

        let count = loaded.len();
        debug!("Loaded {count} record(s) from `{}`", self.root.display());

        self.entries.lock().extend(loaded);
        Ok(count)
    }

    fn read(path: &Path) -> Result<R, Error> {
        let file = File::open(path).map_err(Error::io(path))?;
        R::read_from(&mut BufReader::new(file)).map_err(Error::io(path))
    }

    /// Whether a record equal to `candidate` is known.
    pub fn contains(&self, candidate: &R) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|entry| &entry.record == candidate)
    }

    /// Path of the record file called `name` for `record`.
    pub fn record_path(&self, name: &str, record: &R) -> PathBuf {
        self.root
            .join(mirror_dir(record.anchor(), &self.source_root))
            .join(format!("{name}.{}", R::EXTENSION))
    }

    /// Persist `record` as `name`, replacing any record previously written under the same name.
    /// The file is written next to its final location and renamed into place.
    pub fn write(&self, name: &str, record: R) -> Result<PathBuf, Error> {
        let file = self.record_path(name, &record);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).map_err(Error::io(parent))?;
        }

        let mut temp = file.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        {
            let mut writer =
                BufWriter::new(File::create(&temp).map_err(Error::io(&temp))?);
            record
                .write_to(&mut writer)
                .and_then(|_| writer.flush())
                .map_err(Error::io(&temp))?;
        }
        std::fs::rename(&temp, &file).map_err(Error::io(&file))?;

        info!("Wrote cache record `{}`", file.display());

        let mut entries = self.entries.lock();
        match entries.iter_mut().find(|entry| entry.file == file) {
            Some(entry) => entry.record = record,
            None => entries.push(Entry {
                file: file.clone(),
                record,
            }),
        }

        Ok(file)
    }

    /// Number of records in memory.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
