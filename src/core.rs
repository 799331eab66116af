use std::fs::File;

use crate::banner::Banner;

/// A 32-byte BLAKE3 hash used for change detection. Outputs whose hash
/// matches the file already on disk are not rewritten.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub(crate) fn hash_file(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let file = File::open(path)?;
        Ok(blake3::Hasher::new().update_reader(file)?.finalize().into())
    }

    pub(crate) fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in &self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// The mode in which the pipeline is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A one-time build.
    Build,
    /// A continuous watch mode for development.
    Watch,
}

/// Controls whether intermediate source maps are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    Development,
    #[default]
    Production,
}

impl Profile {
    /// Anything other than `development` (case-insensitive) is production.
    pub fn from_env_value(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("development") {
            Profile::Development
        } else {
            Profile::Production
        }
    }

    pub fn source_maps(self) -> bool {
        matches!(self, Profile::Development)
    }
}

/// Settings available to every task run.
#[derive(Debug, Clone)]
pub struct Environment {
    /// The current run mode (Build or Watch).
    pub mode: Mode,
    /// Development or production output.
    pub profile: Profile,
    /// The port of the live-reload socket (if running).
    pub port: Option<u16>,
    /// Comment block prepended to generated CSS and JS.
    pub banner: Banner,
}

impl Environment {
    pub fn new(mode: Mode, profile: Profile, banner: Banner) -> Self {
        Self {
            mode,
            profile,
            port: None,
            banner,
        }
    }

    /// Returns a JavaScript snippet that reloads the page when the live-reload
    /// socket broadcasts a message. Only available in watch mode.
    pub fn get_refresh_script(&self) -> Option<String> {
        if self.mode != Mode::Watch {
            return None;
        }

        self.port.map(|port| {
            format!(
                r#"
const socket = new WebSocket("ws://localhost:{port}");
socket.addEventListener("message", event => {{
    window.location.reload();
}});
"#
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_from_env() {
        assert_eq!(Profile::from_env_value("development"), Profile::Development);
        assert_eq!(Profile::from_env_value(" Development "), Profile::Development);
        assert_eq!(Profile::from_env_value("production"), Profile::Production);
        assert_eq!(Profile::from_env_value(""), Profile::Production);
        assert!(Profile::Development.source_maps());
        assert!(!Profile::Production.source_maps());
    }

    #[test]
    fn test_refresh_script_only_in_watch_mode() {
        let mut env = Environment::new(Mode::Build, Profile::Production, Banner::default());
        env.port = Some(1337);
        assert!(env.get_refresh_script().is_none());

        env.mode = Mode::Watch;
        let script = env.get_refresh_script().unwrap();
        assert!(script.contains("ws://localhost:1337"));
    }

    #[test]
    fn test_hash_hex() {
        let hex = Hash32::hash(b"abc").to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Hash32::hash(b"abc"), Hash32::hash(b"abc"));
        assert_ne!(Hash32::hash(b"abc"), Hash32::hash(b"abd"));
    }
}
