use crate::output::Asset;
use crate::transform::{Transform, TransformContext};

/// Passes every asset through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyVerbatim;

impl Transform for CopyVerbatim {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn apply(&self, _: &TransformContext, assets: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        Ok(assets)
    }
}
