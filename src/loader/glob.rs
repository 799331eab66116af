use std::collections::HashSet;
use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use globset::{GlobBuilder, GlobMatcher};

const WILDCARDS: [char; 4] = ['*', '?', '[', '{'];

/// A single compiled glob pattern, split into a static root directory (the
/// part without wildcards) and a matcher for the full pattern.
///
/// The root serves two purposes: it is where the filesystem walk starts, and
/// it is the base against which output paths are computed. For
/// `src/styles/*.scss` the root is `src/styles`, so `src/styles/a.scss` is
/// written as `a.css` inside the output directory.
#[derive(Debug, Clone)]
pub struct GlobInput {
    root: Utf8PathBuf,
    depth: Option<usize>,
    matcher: GlobMatcher,
}

impl GlobInput {
    pub fn new(pattern: &str) -> Result<Self, globset::Error> {
        let pattern = pattern.trim_start_matches("./");
        let (root, suffix) = split_pattern(Utf8Path::new(pattern));

        let depth = if suffix.as_str().contains("**") {
            None
        } else {
            Some(suffix.components().count())
        };

        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()?
            .compile_matcher();

        Ok(Self {
            root,
            depth,
            matcher,
        })
    }

    /// The static directory this pattern is anchored at.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Walk the root and return every matching file, sorted. A missing root
    /// yields an empty list.
    pub fn resolve(&self) -> io::Result<Vec<Utf8PathBuf>> {
        let mut found = Vec::new();
        let start = if self.root.as_str().is_empty() {
            Utf8Path::new(".")
        } else {
            self.root.as_path()
        };

        match fs::metadata(start) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(found),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(found),
            Err(e) => return Err(e),
        }

        self.walk(start, &self.root, 1, &mut found)?;
        found.sort();
        Ok(found)
    }

    fn walk(
        &self,
        dir: &Utf8Path,
        rel: &Utf8Path,
        depth: usize,
        found: &mut Vec<Utf8PathBuf>,
    ) -> io::Result<()> {
        for entry in dir.read_dir_utf8()? {
            let entry = entry?;
            let path = rel.join(entry.file_name());
            let kind = entry.file_type()?;

            if kind.is_dir() {
                if self.depth.is_none_or(|max| depth < max) {
                    self.walk(entry.path(), &path, depth + 1, found)?;
                }
            } else if self.matcher.is_match(&path) {
                found.push(path);
            }
        }

        Ok(())
    }
}

/// An ordered list of glob patterns resolved together.
#[derive(Debug, Clone)]
pub struct GlobSources {
    globs: Vec<GlobInput>,
}

/// A resolved input file together with the root it was found under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: Utf8PathBuf,
    pub root: Utf8PathBuf,
}

impl SourceFile {
    /// Path of the file relative to its glob root.
    pub fn relative(&self) -> &Utf8Path {
        self.path.strip_prefix(&self.root).unwrap_or(&self.path)
    }
}

impl GlobSources {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, globset::Error> {
        Ok(Self {
            globs: patterns
                .iter()
                .map(|p| GlobInput::new(p.as_ref()))
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn globs(&self) -> &[GlobInput] {
        &self.globs
    }

    /// Resolve all patterns in declaration order, dropping files matched by
    /// more than one pattern.
    pub fn resolve(&self) -> io::Result<Vec<SourceFile>> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for glob in &self.globs {
            for path in glob.resolve()? {
                if seen.insert(path.clone()) {
                    files.push(SourceFile {
                        path,
                        root: glob.root.clone(),
                    });
                }
            }
        }

        Ok(files)
    }
}

/// Compile a set of patterns into a single [`globset::GlobSet`] for fast
/// matching of watch events.
pub fn build_set<S: AsRef<str>>(patterns: &[S]) -> Result<globset::GlobSet, globset::Error> {
    let mut builder = globset::GlobSetBuilder::new();
    for pattern in patterns {
        let pattern = pattern.as_ref().trim_start_matches("./");
        builder.add(GlobBuilder::new(pattern).literal_separator(true).build()?);
    }
    builder.build()
}

/// Splits a pattern into its static root and the dynamic suffix. A pattern
/// without wildcards names a single file, whose parent becomes the root.
pub(crate) fn split_pattern(path: &Utf8Path) -> (Utf8PathBuf, Utf8PathBuf) {
    let components: Vec<_> = path.components().collect();
    let split = components
        .iter()
        .position(|c| c.as_str().contains(WILDCARDS))
        .unwrap_or(components.len().saturating_sub(1));

    let root: Utf8PathBuf = components.iter().take(split).collect();
    let suffix: Utf8PathBuf = components.iter().skip(split).collect();

    (root, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Utf8Path, path: &str) {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn scratch() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, root)
    }

    #[test]
    fn test_split_wildcard() {
        let (root, suffix) = split_pattern(Utf8Path::new("src/styles/**/*.scss"));
        assert_eq!(root, "src/styles");
        assert_eq!(suffix, "**/*.scss");
    }

    #[test]
    fn test_split_concrete_file() {
        let (root, suffix) = split_pattern(Utf8Path::new("vendor/normalize.css"));
        assert_eq!(root, "vendor");
        assert_eq!(suffix, "normalize.css");
    }

    #[test]
    fn test_split_braces() {
        let (root, suffix) = split_pattern(Utf8Path::new("src/images/*.{gif,png}"));
        assert_eq!(root, "src/images");
        assert_eq!(suffix, "*.{gif,png}");
    }

    #[test]
    fn test_star_does_not_cross_directories() {
        let (_dir, root) = scratch();
        touch(&root, "styles/a.scss");
        touch(&root, "styles/nested/b.scss");

        let glob = GlobInput::new(root.join("styles/*.scss").as_str()).unwrap();
        let found = glob.resolve().unwrap();

        assert_eq!(found, vec![root.join("styles/a.scss")]);
    }

    #[test]
    fn test_double_star_recurses() {
        let (_dir, root) = scratch();
        touch(&root, "dist/index.html");
        touch(&root, "dist/css/a.css");
        touch(&root, "dist/css/deep/b.css");

        let glob = GlobInput::new(root.join("dist/**").as_str()).unwrap();
        let found = glob.resolve().unwrap();

        assert_eq!(
            found,
            vec![
                root.join("dist/css/a.css"),
                root.join("dist/css/deep/b.css"),
                root.join("dist/index.html"),
            ]
        );
    }

    #[test]
    fn test_brace_alternatives() {
        let (_dir, root) = scratch();
        touch(&root, "img/a.png");
        touch(&root, "img/b.gif");
        touch(&root, "img/c.txt");

        let glob = GlobInput::new(root.join("img/*.{gif,png}").as_str()).unwrap();
        let found = glob.resolve().unwrap();

        assert_eq!(found, vec![root.join("img/a.png"), root.join("img/b.gif")]);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let (_dir, root) = scratch();
        let glob = GlobInput::new(root.join("nothing/*.js").as_str()).unwrap();
        assert!(glob.resolve().unwrap().is_empty());
    }

    #[test]
    fn test_sources_keep_pattern_order() {
        let (_dir, root) = scratch();
        touch(&root, "js/main.js");
        touch(&root, "js/plugins.js");

        let sources = GlobSources::new(&[
            root.join("js/plugins.js").to_string(),
            root.join("js/*.js").to_string(),
        ])
        .unwrap();

        let files = sources.resolve().unwrap();
        let relative: Vec<_> = files.iter().map(|f| f.relative().to_string()).collect();

        // plugins.js first, then the rest without duplicates
        assert_eq!(relative, vec!["plugins.js", "main.js"]);
    }

    #[test]
    fn test_build_set() {
        let set = build_set(&["src/templates/**/*.twig", "website.json"]).unwrap();
        assert!(set.is_match("src/templates/partials/nav.twig"));
        assert!(set.is_match("website.json"));
        assert!(!set.is_match("src/styles/a.scss"));
    }
}
