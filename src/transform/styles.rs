use std::collections::HashMap;

use camino::Utf8PathBuf;
use lightningcss::rules::CssRule;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use parcel_sourcemap::SourceMap;
use thiserror::Error;

use crate::error::ConfigError;
use crate::output::{Asset, with_suffix};
use crate::transform::{Transform, TransformContext};

/// Errors that can occur when compiling Stylesheets.
#[derive(Debug, Error)]
pub enum StyleError {
    /// A Sass compilation error occurred.
    #[error("Sass compilation error in '{0}': {1}")]
    Sass(Utf8PathBuf, Box<grass::Error>),

    /// The compiled CSS couldn't be parsed for post-processing.
    #[error("CSS parse error in '{0}': {1}")]
    Parse(Utf8PathBuf, String),

    /// Prefixing or minification failed.
    #[error("CSS minify error in '{0}': {1}")]
    Minify(Utf8PathBuf, String),

    /// Printing the processed stylesheet failed.
    #[error("CSS print error in '{0}': {1}")]
    Print(Utf8PathBuf, String),

    /// The source map couldn't be assembled.
    #[error("Source map error in '{0}': {1}")]
    SourceMap(Utf8PathBuf, parcel_sourcemap::SourceMapError),

    /// The input is not valid UTF-8.
    #[error("'{0}' is not valid UTF-8")]
    Utf8(Utf8PathBuf),
}

/// Compiles SCSS entry files to CSS, adds vendor prefixes and produces a
/// minified sibling for each one.
///
/// For an input `a.scss` this emits:
/// - `a.css`, banner followed by the expanded compiler output, with vendor
///   prefixed copies of declarations added in front of the originals,
/// - `a.min.css`, banner followed by minified CSS without comments,
/// - `a.min.css.map` when source maps are enabled.
///
/// Partials (file names starting with `_`) are only compiled as part of the
/// files that import them.
#[derive(Debug, Clone)]
pub struct CompileStyles {
    targets: Targets,
    load_paths: Vec<Utf8PathBuf>,
}

struct Processed {
    expanded: String,
    minified: String,
    map: Option<String>,
}

impl CompileStyles {
    /// `browsers` is a list of browserslist queries; an empty list disables
    /// prefixing.
    pub fn new(browsers: &[String], load_paths: Vec<Utf8PathBuf>) -> Result<Self, ConfigError> {
        let targets = if browsers.is_empty() {
            Targets::default()
        } else {
            Browsers::from_browserslist(browsers)
                .map_err(|e| ConfigError::Browsers("styles".into(), e.to_string()))?
                .map(Targets::from)
                .unwrap_or_default()
        };

        Ok(Self {
            targets,
            load_paths,
        })
    }

    fn compile(&self, asset: &Asset) -> Result<String, StyleError> {
        let mut options = grass::Options::default().style(grass::OutputStyle::Expanded);
        for path in &self.load_paths {
            options = options.load_path(path);
        }

        let result = match &asset.source {
            Some(source) => grass::from_path(source, &options),
            None => {
                let text = asset
                    .text()
                    .map_err(|_| StyleError::Utf8(asset.path.clone()))?;
                grass::from_string(text.to_owned(), &options)
            }
        };

        result.map_err(|e| StyleError::Sass(asset.path.clone(), e))
    }

    fn process(
        &self,
        css: &str,
        path: &Utf8PathBuf,
        source_maps: bool,
        shift: usize,
    ) -> Result<Processed, StyleError> {
        let mut map = source_maps.then(|| SourceMap::new("/"));

        let source_index = match map.as_mut() {
            Some(map) => {
                let index = map.add_source(path.as_str());
                map.set_source_content(index as usize, css)
                    .map_err(|e| StyleError::SourceMap(path.clone(), e))?;
                index
            }
            None => 0,
        };

        let mut sheet = StyleSheet::parse(
            css,
            ParserOptions {
                filename: path.to_string(),
                source_index,
                ..ParserOptions::default()
            },
        )
        .map_err(|e| StyleError::Parse(path.clone(), e.to_string()))?;

        sheet
            .minify(MinifyOptions {
                targets: self.targets,
                ..MinifyOptions::default()
            })
            .map_err(|e| StyleError::Minify(path.clone(), e.to_string()))?;

        let expanded = self.prefix_expanded(css);

        // The banner is the only comment allowed in minified output.
        sheet.license_comments.clear();

        let minified = sheet
            .to_css(PrinterOptions {
                minify: true,
                targets: self.targets,
                source_map: map.as_mut(),
                ..PrinterOptions::default()
            })
            .map_err(|e| StyleError::Print(path.clone(), e.to_string()))?
            .code;

        let map = match map {
            Some(mut map) => {
                map.offset_lines(0, shift as i64)
                    .map_err(|e| StyleError::SourceMap(path.clone(), e))?;
                let json = map
                    .to_json(None)
                    .map_err(|e| StyleError::SourceMap(path.clone(), e))?;
                Some(json)
            }
            None => None,
        };

        Ok(Processed {
            expanded,
            minified,
            map,
        })
    }
}

impl CompileStyles {
    /// Insert vendor prefixed declarations in front of the declarations that
    /// need them. Every other line, comments included, is kept as is.
    fn prefix_expanded(&self, css: &str) -> String {
        if self.targets.browsers.is_none() {
            return css.to_owned();
        }

        let mut out = String::with_capacity(css.len());
        let mut cache: HashMap<&str, Vec<String>> = HashMap::new();
        let mut in_comment = false;

        for line in css.split_inclusive('\n') {
            let trimmed = line.trim();

            if in_comment {
                in_comment = !trimmed.contains("*/");
            } else if trimmed.starts_with("/*") {
                in_comment = !trimmed.contains("*/");
            } else if let Some(decl) = declaration(trimmed) {
                let indent = &line[..line.len() - line.trim_start().len()];
                let prefixed = cache.entry(decl).or_insert_with(|| self.prefixes_for(decl));

                for extra in prefixed.iter() {
                    out.push_str(indent);
                    out.push_str(extra);
                    out.push_str(";\n");
                }
            }

            out.push_str(line);
        }

        out
    }

    /// Prefixed variants of a single `name: value` declaration for the
    /// configured targets, empty when none are needed.
    fn prefixes_for(&self, decl: &str) -> Vec<String> {
        if is_prefixed(decl) {
            return Vec::new();
        }

        let source = format!("a{{{decl}}}");
        let Ok(mut sheet) = StyleSheet::parse(&source, ParserOptions::default()) else {
            return Vec::new();
        };

        let options = MinifyOptions {
            targets: self.targets,
            ..MinifyOptions::default()
        };
        if sheet.minify(options).is_err() {
            return Vec::new();
        }

        let Some(CssRule::Style(rule)) = sheet.rules.0.first() else {
            return Vec::new();
        };

        let block = &rule.declarations;
        let normal = block.declarations.iter().map(|p| (p, false));
        let important = block.important_declarations.iter().map(|p| (p, true));

        let prefixed: Vec<String> = normal
            .chain(important)
            .filter_map(|(property, important)| {
                let options = PrinterOptions {
                    targets: self.targets,
                    ..PrinterOptions::default()
                };
                property.to_css_string(important, options).ok()
            })
            // A property with several prefixes prints one declaration per prefix.
            .flat_map(|text| {
                text.split(";\n")
                    .map(|part| part.trim().to_owned())
                    .collect::<Vec<_>>()
            })
            .filter(|text| is_prefixed(text))
            .collect();

        prefixed
    }
}

/// A `name: value;` line, without the trailing semicolon.
fn declaration(line: &str) -> Option<&str> {
    let decl = line.strip_suffix(';')?;
    let (name, _) = decl.split_once(':')?;
    let name = name.trim();

    let valid = !name.is_empty()
        && !name.starts_with('$')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');

    valid.then_some(decl)
}

fn is_prefixed(text: &str) -> bool {
    ["-webkit-", "-moz-", "-ms-", "-o-"]
        .iter()
        .any(|prefix| text.contains(prefix))
}

impl Transform for CompileStyles {
    fn name(&self) -> &'static str {
        "styles"
    }

    fn apply(&self, ctx: &TransformContext, assets: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        let banner = &ctx.env.banner;
        let source_maps = ctx.env.profile.source_maps();
        let mut out = Vec::with_capacity(assets.len() * 2);

        for asset in assets {
            if asset.path.file_name().is_some_and(|name| name.starts_with('_')) {
                continue;
            }

            let css = self.compile(&asset)?;
            let path_css = asset.path.with_extension("css");
            let path_min = with_suffix(&path_css, ".min");
            let processed = self.process(&css, &path_css, source_maps, banner.lines())?;

            out.push(Asset::new(&path_css, banner.wrap(&processed.expanded)));

            let mut minified = banner.wrap(&processed.minified);
            if let Some(map) = processed.map {
                let path_map = Utf8PathBuf::from(format!("{path_min}.map"));
                let name = path_map.file_name().unwrap_or_default();
                minified.push_str(&format!("\n/*# sourceMappingURL={name} */\n"));
                out.push(Asset::new(&path_map, map));
            }

            out.push(Asset::new(&path_min, minified));
        }

        Ok(out)
    }
}
