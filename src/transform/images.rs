use anyhow::Context;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ImageFormat};

use crate::output::Asset;
use crate::transform::{Transform, TransformContext};

/// Losslessly recompresses PNG files and re-encodes JPEG files at a fixed
/// quality. Whichever of the original and the re-encoded bytes is smaller
/// is kept. Other formats are passed through untouched.
#[derive(Debug, Clone, Copy)]
pub struct OptimizeImages {
    /// JPEG quality, 1-100.
    pub quality: u8,
}

impl OptimizeImages {
    fn decode(asset: &Asset, format: ImageFormat) -> anyhow::Result<DynamicImage> {
        image::load_from_memory_with_format(&asset.data, format)
            .with_context(|| format!("couldn't decode image '{}'", asset.path))
    }

    fn reencode(&self, asset: &Asset) -> anyhow::Result<Option<Vec<u8>>> {
        let format = asset
            .path
            .extension()
            .and_then(ImageFormat::from_extension);

        let mut out = Vec::new();

        match format {
            Some(ImageFormat::Png) => {
                let img = Self::decode(asset, ImageFormat::Png)?;
                let encoder =
                    PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive);
                img.write_with_encoder(encoder)?;
            }
            Some(ImageFormat::Jpeg) => {
                let img = Self::decode(asset, ImageFormat::Jpeg)?;
                let encoder = JpegEncoder::new_with_quality(&mut out, self.quality.clamp(1, 100));
                img.write_with_encoder(encoder)?;
            }
            _ => return Ok(None),
        }

        Ok(Some(out))
    }
}

impl Transform for OptimizeImages {
    fn name(&self) -> &'static str {
        "images"
    }

    fn apply(&self, _: &TransformContext, assets: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        let mut out = Vec::with_capacity(assets.len());

        for mut asset in assets {
            if let Some(data) = self.reencode(&asset)?
                && data.len() < asset.data.len()
            {
                tracing::debug!(
                    path = %asset.path,
                    before = asset.data.len(),
                    after = data.len(),
                    "image recompressed"
                );
                asset.data = data;
            }

            out.push(asset);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::testing;
    use image::{ImageEncoder, Rgba, RgbaImage};

    fn ctx_apply(images: OptimizeImages, assets: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        let env = testing::env();
        let ctx = TransformContext {
            category: "images",
            env: &env,
        };
        images.apply(&ctx, assets)
    }

    fn sample_png() -> (RgbaImage, Vec<u8>) {
        let img = RgbaImage::from_fn(64, 64, |x, y| {
            if (x / 8 + y / 8) % 2 == 0 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });

        let mut out = Vec::new();
        PngEncoder::new_with_quality(&mut out, CompressionType::Fast, FilterType::NoFilter)
            .write_image(&img, 64, 64, image::ExtendedColorType::Rgba8)
            .unwrap();

        (img, out)
    }

    #[test]
    fn test_png_is_lossless_and_not_larger() {
        let (img, data) = sample_png();
        let before = data.len();

        let out = ctx_apply(OptimizeImages { quality: 80 }, vec![Asset::new("a.png", data)]).unwrap();

        assert_eq!(out.len(), 1);
        assert!(out[0].data.len() <= before);

        let decoded = image::load_from_memory(&out[0].data).unwrap().to_rgba8();
        assert_eq!(decoded, img);
    }

    #[test]
    fn test_other_formats_pass_through() {
        let svg = Asset::new("icon.svg", "<svg xmlns=\"http://www.w3.org/2000/svg\"/>");
        let gif = Asset::new("anim.gif", b"GIF89a not really".to_vec());

        let out = ctx_apply(OptimizeImages { quality: 80 }, vec![svg.clone(), gif.clone()]).unwrap();
        assert_eq!(out, vec![svg, gif]);
    }

    #[test]
    fn test_corrupt_image_is_an_error() {
        let asset = Asset::new("broken.png", b"\x89PNG\r\n\x1a\nnope".to_vec());
        assert!(ctx_apply(OptimizeImages { quality: 80 }, vec![asset]).is_err());
    }

    #[test]
    fn test_idempotent() {
        let (_, data) = sample_png();
        let images = OptimizeImages { quality: 80 };

        let once = ctx_apply(images, vec![Asset::new("a.png", data.clone())]).unwrap();
        let again = ctx_apply(images, vec![Asset::new("a.png", data)]).unwrap();
        assert_eq!(once, again);
    }
}
