//! Transformer adapters.
//!
//! Every step of a task pipeline implements [`Transform`]: it receives the
//! assets produced by the previous step and returns a new list. The heavy
//! lifting is done by external crates (or the `esbuild` executable), the
//! adapters only shape their inputs and outputs.

pub mod archive;
pub mod copy;
pub mod images;
pub mod scripts;
pub mod sprites;
pub mod styles;
pub mod templates;

use crate::core::Environment;
use crate::output::Asset;

pub use archive::PackageArchive;
pub use copy::CopyVerbatim;
pub use images::OptimizeImages;
pub use scripts::BundleScripts;
pub use sprites::PackSprites;
pub use styles::CompileStyles;
pub use templates::RenderTemplates;

/// What a transformer can see about the task invoking it.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'a> {
    /// Name of the task running this step.
    pub category: &'a str,
    pub env: &'a Environment,
}

/// One step of a task pipeline.
pub trait Transform: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Map the incoming assets to outgoing assets. Errors are reported to the
    /// task, which wraps them into a [`TransformError`](crate::TransformError).
    fn apply(&self, ctx: &TransformContext, assets: Vec<Asset>) -> anyhow::Result<Vec<Asset>>;
}
