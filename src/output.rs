//! Output side of a task.
//!
//! This module contains the [`Asset`] struct, the unit of data flowing
//! through every transformer pipeline, and the routines that write assets to
//! their destination directories.

use std::collections::BTreeMap;
use std::fs;
use std::io;

use camino::Utf8Component;
use camino::{Utf8Path, Utf8PathBuf};

use crate::core::Hash32;

/// A single file travelling through a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Path relative to the destination directory.
    pub path: Utf8PathBuf,
    /// File contents.
    pub data: Vec<u8>,
    /// Where the asset was originally read from, if anywhere.
    pub source: Option<Utf8PathBuf>,
}

impl Asset {
    /// Creates a new asset that doesn't originate from a file.
    pub fn new(path: impl AsRef<Utf8Path>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: normalize_path(path.as_ref()),
            data: data.into(),
            source: None,
        }
    }

    /// Creates a new asset read from `source`.
    pub fn from_source(
        path: impl AsRef<Utf8Path>,
        data: impl Into<Vec<u8>>,
        source: impl Into<Utf8PathBuf>,
    ) -> Self {
        Self {
            path: normalize_path(path.as_ref()),
            data: data.into(),
            source: Some(source.into()),
        }
    }

    /// Contents as UTF-8 text.
    pub fn text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.data)
    }
}

/// Inserts a suffix between the file stem and the extension:
/// `css/a.css` with `.min` becomes `css/a.min.css`.
pub fn with_suffix(path: &Utf8Path, suffix: &str) -> Utf8PathBuf {
    let stem = path.file_stem().unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}{suffix}.{ext}"),
        None => format!("{stem}{suffix}"),
    };
    path.with_file_name(name)
}

/// Normalize a path, removing things like `.` and `..`.
///
/// CAUTION: This does not resolve symlinks (unlike [`std::fs::canonicalize`]).
/// This may cause incorrect or surprising behavior at times. This should be
/// used carefully. Unfortunately, [`std::fs::canonicalize`] can be hard to use
/// correctly, since it can often fail, or on Windows returns annoying device
/// paths.
///
/// Adapted from
/// <https://github.com/rust-lang/cargo/blob/f7acf448fc127df9a77c52cc2bba027790ac4931/crates/cargo-util/src/paths.rs#L76-L116>
pub(crate) fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut components = path.components().peekable();
    let mut ret = if let Some(c @ Utf8Component::Prefix(..)) = components.peek().cloned() {
        components.next();
        Utf8PathBuf::from(c.as_str())
    } else {
        Utf8PathBuf::new()
    };

    for component in components {
        match component {
            Utf8Component::Prefix(..) => unreachable!(),
            Utf8Component::RootDir => {
                ret.push(Utf8Component::RootDir);
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if ret.ends_with(Utf8Component::ParentDir) {
                    ret.push(Utf8Component::ParentDir);
                } else {
                    let popped = ret.pop();
                    if !popped && !ret.has_root() {
                        ret.push(Utf8Component::ParentDir);
                    }
                }
            }
            Utf8Component::Normal(c) => {
                ret.push(c);
            }
        }
    }
    ret
}

/// Decides which directory an asset is written to. Most tasks have a single
/// output directory; sprites route the stylesheet fragment elsewhere.
#[derive(Debug, Clone)]
pub struct Destination {
    default: Utf8PathBuf,
    by_extension: BTreeMap<String, Utf8PathBuf>,
}

impl Destination {
    pub fn dir(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            default: path.into(),
            by_extension: BTreeMap::new(),
        }
    }

    /// Send assets with the given extension to `dir` instead.
    pub fn route(mut self, ext: impl Into<String>, dir: impl Into<Utf8PathBuf>) -> Self {
        self.by_extension.insert(ext.into(), dir.into());
        self
    }

    pub fn resolve(&self, asset: &Asset) -> Utf8PathBuf {
        let dir = asset
            .path
            .extension()
            .and_then(|ext| self.by_extension.get(ext))
            .unwrap_or(&self.default);

        dir.join(&asset.path)
    }
}

/// Counts reported after writing a batch of assets.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteStats {
    pub written: usize,
    pub unchanged: usize,
}

/// Write assets to their destinations, creating directories as needed.
/// Files whose current contents already hash to the same value are left
/// untouched, so their modification time doesn't change.
pub(crate) fn save_assets(dest: &Destination, assets: &[Asset]) -> io::Result<WriteStats> {
    let mut stats = WriteStats::default();

    for asset in assets {
        let file_path = dest.resolve(asset);

        if let Ok(existing) = Hash32::hash_file(&file_path)
            && existing == Hash32::hash(&asset.data)
        {
            stats.unchanged += 1;
            continue;
        }

        if let Some(parent_dir) = file_path.parent() {
            fs::create_dir_all(parent_dir)?;
        }

        fs::write(&file_path, &asset.data)?;
        stats.written += 1;
    }

    Ok(stats)
}
