use std::fs;
use std::io;
use std::time::Instant;

use camino::Utf8PathBuf;

use crate::error::CleanError;
use crate::utils::as_overhead;

/// Delete every listed directory. Directories that don't exist are skipped,
/// so cleaning twice is a no-op.
pub fn clean_dirs(dirs: &[Utf8PathBuf]) -> Result<(), CleanError> {
    let s = Instant::now();

    for dir in dirs {
        match fs::remove_dir_all(dir) {
            Ok(()) => tracing::debug!(dir = %dir, "removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(CleanError(dir.clone(), e)),
        }
    }

    tracing::info!("cleaned {} directories {}", dirs.len(), as_overhead(s));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_twice() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        let dist = root.join("dist");
        fs::create_dir_all(dist.join("css")).unwrap();
        fs::write(dist.join("css/a.css"), ".x{}").unwrap();

        let dirs = vec![dist.clone(), root.join("never-existed")];

        clean_dirs(&dirs).unwrap();
        assert!(!dist.exists());

        clean_dirs(&dirs).unwrap();
        assert!(!dist.exists());
    }

    #[test]
    fn test_clean_nothing() {
        clean_dirs(&[]).unwrap();
    }
}
