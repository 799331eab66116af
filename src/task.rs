//! Task definitions.
//!
//! Every configured asset category becomes one [`PipelineTask`]: it resolves
//! its input globs when invoked, feeds the matching files through an ordered
//! list of [`Transform`] steps and writes the result to its destination.

use std::sync::Arc;

use camino::Utf8Path;

use crate::config::{Category, Config};
use crate::core::Environment;
use crate::error::{ConfigError, TransformError};
use crate::loader::GlobSources;
use crate::output::{Destination, WriteStats, save_assets};
use crate::transform::{
    BundleScripts, CompileStyles, CopyVerbatim, OptimizeImages, PackSprites, PackageArchive,
    RenderTemplates, Transform, TransformContext,
};

/// What a successful task run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub name: String,
    /// Number of input files matched by the globs.
    pub inputs: usize,
    pub outputs: WriteStats,
}

/// A unit of work in the task graph.
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    /// Names of the tasks that must complete first.
    fn dependencies(&self) -> &[String];

    /// Glob patterns that trigger this task in watch mode.
    fn watched(&self) -> &[String];

    /// Whether filesystem events for this task are debounced.
    fn debounced(&self) -> bool {
        true
    }

    fn run(&self, env: &Environment) -> Result<TaskReport, TransformError>;
}

/// A glob input, a chain of transforms and an output destination.
pub struct PipelineTask {
    name: String,
    sources: GlobSources,
    destination: Destination,
    watch: Vec<String>,
    depends_on: Vec<String>,
    debounce: bool,
    steps: Vec<Box<dyn Transform>>,
}

impl PipelineTask {
    pub fn new(name: impl Into<String>, sources: GlobSources, destination: Destination) -> Self {
        Self {
            name: name.into(),
            sources,
            destination,
            watch: Vec::new(),
            depends_on: Vec::new(),
            debounce: true,
            steps: Vec::new(),
        }
    }

    /// Append a step to the pipeline.
    pub fn step(mut self, transform: impl Transform + 'static) -> Self {
        self.steps.push(Box::new(transform));
        self
    }

    pub fn watch(mut self, patterns: Vec<String>) -> Self {
        self.watch = patterns;
        self
    }

    pub fn depends_on(mut self, names: Vec<String>) -> Self {
        self.depends_on = names;
        self
    }

    pub fn debounce(mut self, debounce: bool) -> Self {
        self.debounce = debounce;
        self
    }
}

impl Task for PipelineTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    fn watched(&self) -> &[String] {
        &self.watch
    }

    fn debounced(&self) -> bool {
        self.debounce
    }

    fn run(&self, env: &Environment) -> Result<TaskReport, TransformError> {
        let assets = self
            .sources
            .load()
            .map_err(|e| TransformError::new(&self.name, e))?;
        let inputs = assets.len();

        let ctx = TransformContext {
            category: &self.name,
            env,
        };

        let assets = self.steps.iter().try_fold(assets, |assets, step| {
            step.apply(&ctx, assets).map_err(|e| {
                TransformError::new(&self.name, e.context(format!("in step '{}'", step.name())))
            })
        })?;

        let outputs = save_assets(&self.destination, &assets)
            .map_err(|e| TransformError::new(&self.name, e))?;

        Ok(TaskReport {
            name: self.name.clone(),
            inputs,
            outputs,
        })
    }
}

impl std::fmt::Debug for PipelineTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineTask")
            .field("name", &self.name)
            .field("steps", &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("depends_on", &self.depends_on)
            .finish()
    }
}

fn sources(name: &str, patterns: &[String]) -> Result<GlobSources, ConfigError> {
    GlobSources::new(patterns).map_err(|source| ConfigError::Glob {
        category: name.to_string(),
        pattern: patterns.join(", "),
        source,
    })
}

fn pipeline(category: &Category, destination: Destination) -> Result<PipelineTask, ConfigError> {
    Ok(
        PipelineTask::new(&category.name, sources(&category.name, &category.input)?, destination)
            .watch(category.watch.clone())
            .depends_on(category.depends_on.clone())
            .debounce(category.debounce),
    )
}

/// Build one task per configured category, in [`Config::categories`] order.
pub fn tasks_from_config(config: &Config) -> Result<Vec<Arc<dyn Task>>, ConfigError> {
    let mut tasks: Vec<Arc<dyn Task>> = Vec::new();

    for category in config.categories() {
        let dir = Destination::dir(&category.output);

        let task = match category.name.as_str() {
            "styles" => {
                let Some(styles) = &config.styles else { continue };
                let compile = CompileStyles::new(&styles.browsers, styles.load_paths.clone())?;
                pipeline(&category, dir)?.step(compile)
            }
            "scripts" => {
                let Some(scripts) = &config.scripts else { continue };
                pipeline(&category, dir)?.step(BundleScripts {
                    bundle: scripts.bundle.as_str().into(),
                    minify: scripts.minify,
                    target: scripts.target.clone(),
                    esbuild: scripts.esbuild.clone(),
                })
            }
            "images" => {
                let Some(images) = &config.images else { continue };
                pipeline(&category, dir)?.step(OptimizeImages {
                    quality: images.quality,
                })
            }
            "sprites" => {
                let Some(sprites) = &config.sprites else { continue };
                let sheet = Utf8Path::new(&sprites.image);
                let fragment = sprites.stylesheet.file_name().unwrap_or("_sprites.scss");
                let fragment_dir = sprites.stylesheet.parent().unwrap_or(Utf8Path::new(""));

                let dir = dir.route("scss", fragment_dir);
                pipeline(&category, dir)?.step(PackSprites {
                    image: sheet.to_owned(),
                    stylesheet: fragment.into(),
                    url: sprites.url.clone().unwrap_or_else(|| sprites.image.clone()),
                    padding: sprites.padding,
                    prefix: sprites.prefix.clone(),
                })
            }
            "templates" => {
                let Some(templates) = &config.templates else { continue };
                let task = pipeline(&category, dir)?;
                let root = task
                    .sources
                    .globs()
                    .first()
                    .map(|glob| glob.root().to_owned())
                    .unwrap_or_default();

                task.step(RenderTemplates {
                    root,
                    data: templates.data.clone(),
                })
            }
            _ => pipeline(&category, dir)?.step(CopyVerbatim),
        };

        tasks.push(Arc::new(task));
    }

    Ok(tasks)
}

/// The archive task, if configured. It is never part of the build graph and
/// is never watched.
pub fn archive_task(config: &Config) -> Result<Option<PipelineTask>, ConfigError> {
    let Some(archive) = &config.archive else {
        return Ok(None);
    };

    let task = PipelineTask::new(
        "archive",
        sources("archive", &archive.input)?,
        Destination::dir(&archive.output),
    )
    .step(PackageArchive {
        package: config.package.clone(),
        extension: archive.extension.clone(),
    });

    Ok(Some(task))
}
