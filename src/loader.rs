//! Input side of a task: turning glob patterns into in-memory assets.

mod glob;

use std::fs;
use std::io;

use crate::output::Asset;

pub use crate::loader::glob::{GlobInput, GlobSources, SourceFile, build_set};
pub(crate) use crate::loader::glob::split_pattern;

impl GlobSources {
    /// Resolve the patterns and read every matching file. Asset paths are
    /// relative to the root of the glob that matched them.
    pub fn load(&self) -> io::Result<Vec<Asset>> {
        self.resolve()?
            .into_iter()
            .map(|file| {
                let data = fs::read(&file.path)?;
                Ok(Asset::from_source(file.relative(), data, &file.path))
            })
            .collect()
    }
}
