use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{Context, bail};
use camino::Utf8PathBuf;

use crate::output::{Asset, with_suffix};
use crate::transform::{Transform, TransformContext};

/// Concatenates scripts into a single bundle and lowers it to the target
/// language level with the `esbuild` executable. With `minify`, a second,
/// minified copy is produced as well.
#[derive(Debug, Clone)]
pub struct BundleScripts {
    /// File name of the bundle, e.g. `app.js`.
    pub bundle: Utf8PathBuf,
    pub minify: bool,
    /// Language target passed to esbuild, e.g. `es2015`.
    pub target: String,
    /// The esbuild executable.
    pub esbuild: String,
}

impl BundleScripts {
    fn concat(assets: &[Asset]) -> anyhow::Result<String> {
        let mut parts = Vec::with_capacity(assets.len());
        for asset in assets {
            let text = asset
                .text()
                .with_context(|| format!("'{}' is not valid UTF-8", asset.path))?;
            parts.push(text);
        }

        Ok(parts.join("\n"))
    }

    fn esbuild(
        &self,
        code: &str,
        banner: &str,
        minify: bool,
        source_maps: bool,
    ) -> anyhow::Result<String> {
        let mut cmd = Command::new(&self.esbuild);
        if minify {
            cmd.arg("--minify");
        }

        cmd.arg(format!("--target={}", self.target))
            .arg("--loader=js")
            .arg(format!("--banner:js={}", banner.trim_end()));

        if source_maps {
            cmd.arg("--sourcemap=inline")
                .arg(format!("--sourcefile={}", self.bundle));
        }

        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("couldn't start '{}'", self.esbuild))?;

        {
            let stdin = child.stdin.as_mut().context("esbuild stdin not piped")?;
            stdin.write_all(code.as_bytes())?;
        } // drop closes the pipe

        let output = child.wait_with_output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("esbuild failed:\n{stderr}");
        }

        Ok(String::from_utf8(output.stdout)?)
    }
}

impl Transform for BundleScripts {
    fn name(&self) -> &'static str {
        "scripts"
    }

    fn apply(&self, ctx: &TransformContext, assets: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        if assets.is_empty() {
            return Ok(Vec::new());
        }

        let banner = &ctx.env.banner;
        let code = Self::concat(&assets)?;

        let source_maps = ctx.env.profile.source_maps();

        let bundle = self.esbuild(&code, banner.as_str(), false, source_maps)?;
        let mut out = vec![Asset::new(&self.bundle, bundle)];

        if self.minify {
            let minified = self.esbuild(&code, banner.as_str(), true, source_maps)?;
            out.push(Asset::new(with_suffix(&self.bundle, ".min"), minified));
        }

        Ok(out)
    }
}
