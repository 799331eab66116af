//! Configuration model.
//!
//! The whole build is described by one TOML document. It is deserialized once
//! at startup into an immutable [`Config`], which is then shared by reference
//! with every task constructor. Every asset category is optional; the task
//! graph contains exactly the categories present in the file.

mod loader;

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use serde::{Deserialize, Deserializer};

/// Name of the configuration file looked up when none is given.
pub const DEFAULT_CONFIG: &str = "tsumiki.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directories removed by the `clean` phase.
    #[serde(default)]
    pub clean: Vec<Utf8PathBuf>,
    pub package: Package,
    #[serde(default)]
    pub server: ServerConfig,
    pub archive: Option<ArchiveConfig>,
    pub styles: Option<StylesConfig>,
    pub scripts: Option<ScriptsConfig>,
    pub images: Option<ImagesConfig>,
    pub sprites: Option<SpritesConfig>,
    pub templates: Option<TemplatesConfig>,
    /// Verbatim copy tasks, keyed by name. Each becomes a task `copy:<name>`.
    #[serde(default)]
    pub copy: BTreeMap<String, Paths>,
}

/// Package metadata, used for the banner and the archive file name.
#[derive(Debug, Clone, Deserialize)]
pub struct Package {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub homepage: String,
    #[serde(default)]
    pub license: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory served over HTTP.
    pub root: Utf8PathBuf,
    /// HTTP port.
    pub port: u16,
    /// WebSocket port for live reload. A random free port is used when this
    /// one is taken.
    pub reload_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("dist"),
            port: 8080,
            reload_port: 1337,
        }
    }
}

/// Input, output and watch settings shared by every asset category.
#[derive(Debug, Clone, Deserialize)]
pub struct Paths {
    #[serde(deserialize_with = "one_or_many")]
    pub input: Vec<String>,
    pub output: Utf8PathBuf,
    #[serde(default, deserialize_with = "one_or_many_opt")]
    pub watch: Option<Vec<String>>,
    #[serde(default)]
    pub depends_on: Option<Vec<String>>,
    /// Coalesce bursts of filesystem events before triggering a rebuild.
    #[serde(default = "default_true")]
    pub debounce: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    #[serde(deserialize_with = "one_or_many")]
    pub input: Vec<String>,
    pub output: Utf8PathBuf,
    #[serde(default = "default_archive_extension")]
    pub extension: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StylesConfig {
    #[serde(flatten)]
    pub paths: Paths,
    /// Browserslist queries used for vendor prefixing.
    #[serde(default)]
    pub browsers: Vec<String>,
    /// Extra directories searched by `@use` and `@import`.
    #[serde(default)]
    pub load_paths: Vec<Utf8PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScriptsConfig {
    #[serde(flatten)]
    pub paths: Paths,
    /// File name of the concatenated bundle.
    #[serde(default = "default_bundle")]
    pub bundle: String,
    /// Produce a minified `.min.js` sibling with esbuild.
    #[serde(default = "default_true")]
    pub minify: bool,
    /// Language target passed to esbuild.
    #[serde(default = "default_target")]
    pub target: String,
    /// The esbuild executable.
    #[serde(default = "default_esbuild")]
    pub esbuild: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImagesConfig {
    #[serde(flatten)]
    pub paths: Paths,
    /// JPEG re-encoding quality, 1-100.
    #[serde(default = "default_quality")]
    pub quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpritesConfig {
    #[serde(flatten)]
    pub paths: Paths,
    /// Path of the generated stylesheet fragment.
    pub stylesheet: Utf8PathBuf,
    /// File name of the generated sprite sheet, written to `output`.
    #[serde(default = "default_sprite_image")]
    pub image: String,
    /// Gap between packed sprites, in pixels.
    #[serde(default)]
    pub padding: u32,
    /// Class name prefix used in the stylesheet fragment.
    #[serde(default = "default_sprite_prefix")]
    pub prefix: String,
    /// URL of the sheet as referenced from the stylesheet fragment. Defaults
    /// to `image`.
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TemplatesConfig {
    #[serde(flatten)]
    pub paths: Paths,
    /// JSON file whose top-level keys are exposed to every template.
    pub data: Option<Utf8PathBuf>,
}

/// A fully resolved asset category, with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub name: String,
    pub input: Vec<String>,
    pub output: Utf8PathBuf,
    pub watch: Vec<String>,
    pub depends_on: Vec<String>,
    pub debounce: bool,
}

impl Category {
    fn new(name: impl Into<String>, paths: &Paths, implied: &[&str]) -> Self {
        Self {
            name: name.into(),
            input: paths.input.clone(),
            output: paths.output.clone(),
            watch: paths.watch.clone().unwrap_or_else(|| paths.input.clone()),
            depends_on: paths
                .depends_on
                .clone()
                .unwrap_or_else(|| implied.iter().map(|s| s.to_string()).collect()),
            debounce: paths.debounce,
        }
    }
}

impl Config {
    /// Every configured category, in a stable order.
    ///
    /// Sprites are written into the image sources, so unless told otherwise
    /// the `images` category runs after `sprites`.
    pub fn categories(&self) -> Vec<Category> {
        let mut list = Vec::new();

        if let Some(sprites) = &self.sprites {
            list.push(Category::new("sprites", &sprites.paths, &[]));
        }
        if let Some(styles) = &self.styles {
            list.push(Category::new("styles", &styles.paths, &[]));
        }
        if let Some(scripts) = &self.scripts {
            list.push(Category::new("scripts", &scripts.paths, &[]));
        }
        if let Some(images) = &self.images {
            let implied: &[&str] = match self.sprites {
                Some(_) => &["sprites"],
                None => &[],
            };
            list.push(Category::new("images", &images.paths, implied));
        }
        if let Some(templates) = &self.templates {
            list.push(Category::new("templates", &templates.paths, &[]));
        }
        for (name, paths) in &self.copy {
            list.push(Category::new(format!("copy:{name}"), paths, &[]));
        }

        list
    }
}

fn one_or_many<'de, D>(de: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(de)? {
        OneOrMany::One(one) => vec![one],
        OneOrMany::Many(many) => many,
    })
}

fn one_or_many_opt<'de, D>(de: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    one_or_many(de).map(Some)
}

fn default_true() -> bool {
    true
}

fn default_archive_extension() -> String {
    "zip".into()
}

fn default_bundle() -> String {
    "app.js".into()
}

fn default_target() -> String {
    "es2015".into()
}

fn default_esbuild() -> String {
    "esbuild".into()
}

fn default_quality() -> u8 {
    80
}

fn default_sprite_image() -> String {
    "sprite.png".into()
}

fn default_sprite_prefix() -> String {
    "sprite".into()
}
