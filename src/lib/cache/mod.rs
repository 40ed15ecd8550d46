//! Persisted cache records proving that a compiled artifact matches its inputs.
//!
//! Two independent stores exist: the [ShaderCache] for raw shaders, templates and includes, and
//! the [MaterialCache] for per-material variants. A lookup is a hit only when every field of the
//! candidate record, modification times included, matches a stored record exactly.

pub mod record;
pub mod store;

use std::{
    path::{Component, Path, PathBuf},
    time::UNIX_EPOCH,
};

use xxhash_rust::xxh3::Xxh3;

pub use record::{CacheRecord, MaterialRecord, ShaderRecord};
pub use store::CacheStore;

/// Records of raw shaders, templates and shared includes.
pub type ShaderCache = CacheStore<ShaderRecord>;
/// Records of compiled material variants.
pub type MaterialCache = CacheStore<MaterialRecord>;

#[derive(Debug, thiserror::Error)]
/// Cache error
pub enum Error {
    #[error("I/O error on cache record `{}`: {source}", .path.display())]
    #[allow(missing_docs)]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}

/// Last modification time of `path` in nanoseconds since the Unix epoch, `None` if the file is
/// missing or the platform cannot tell.
pub fn modified_time(path: impl AsRef<Path>) -> Option<u64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let nanos = modified.duration_since(UNIX_EPOCH).ok()?.as_nanos();

    u64::try_from(nanos).ok()
}

/// Hash of a macro set. Order matters, the macros are passed to the compiler as given.
pub fn macro_hash<S: AsRef<str>>(macros: &[S]) -> u64 {
    let mut hasher = Xxh3::new();

    for define in macros {
        hasher.update(define.as_ref().as_bytes());
        hasher.update(&[0]);
    }

    hasher.digest()
}

/// Directory part of `anchor` relative to `root`, reduced to plain components so it can be
/// joined under another root. Paths outside `root` keep their own relative components.
pub fn mirror_dir(anchor: &Path, root: &Path) -> PathBuf {
    let relative = anchor.strip_prefix(root).unwrap_or(anchor);

    relative
        .parent()
        .map(|parent| {
            parent
                .components()
                .filter_map(|component| match component {
                    Component::Normal(part) => Some(part),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}
