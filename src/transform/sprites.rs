//! Sprite sheet generation.
//!
//! Individual images are packed into one RGBA sheet with a shelf packer and
//! described by a stylesheet fragment, so that each sprite can be used as a
//! CSS class.

use std::collections::HashMap;
use std::io::Cursor;

use anyhow::{Context, bail};
use camino::Utf8PathBuf;
use image::{ImageFormat, Rgba, RgbaImage};

use crate::output::Asset;
use crate::transform::{Transform, TransformContext};

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Packs every input image into a single PNG sheet and emits exactly two
/// assets: the sheet itself and an SCSS fragment with one rule per sprite.
#[derive(Debug, Clone)]
pub struct PackSprites {
    /// File name of the sheet, e.g. `sprite.png`.
    pub image: Utf8PathBuf,
    /// File name of the stylesheet fragment, e.g. `_sprites.scss`.
    pub stylesheet: Utf8PathBuf,
    /// URL of the sheet used in `background-image`.
    pub url: String,
    /// Gap between sprites, in pixels.
    pub padding: u32,
    /// Class name prefix.
    pub prefix: String,
}

/// A sprite's position within the sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Position of the sprite in the input list.
    pub index: usize,
    pub name: String,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

#[derive(Debug)]
struct Shelf {
    y: u32,
    height: u32,
    width_used: u32,
}

/// Shelf packing. Sprites are sorted by height (tallest first, ties broken by
/// name) and placed left to right on shelves roughly as wide as the square
/// root of the total area.
/// Returns the frames in placement order and the size of the sheet.
pub fn pack(sizes: &[(String, u32, u32)], padding: u32) -> (Vec<Frame>, u32, u32) {
    if sizes.is_empty() {
        return (Vec::new(), 0, 0);
    }

    let mut sorted: Vec<(usize, &(String, u32, u32))> = sizes.iter().enumerate().collect();
    sorted.sort_by(|(_, a), (_, b)| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));

    let area: u64 = sizes
        .iter()
        .map(|(_, w, h)| u64::from(w + padding) * u64::from(h + padding))
        .sum();
    let widest = sizes.iter().map(|(_, w, _)| w + padding).max().unwrap_or(1);
    let max_width = widest.max((area as f64).sqrt().ceil() as u32);

    let mut shelves: Vec<Shelf> = Vec::new();
    let mut frames = Vec::with_capacity(sorted.len());

    for (index, (name, w, h)) in sorted {
        let padded_w = w + padding;
        let padded_h = h + padding;

        let slot = shelves
            .iter_mut()
            .find(|shelf| *h <= shelf.height && shelf.width_used + padded_w <= max_width);

        let (x, y) = match slot {
            Some(shelf) => {
                let x = shelf.width_used;
                shelf.width_used += padded_w;
                (x, shelf.y)
            }
            None => {
                let y = shelves.last().map(|s| s.y + s.height).unwrap_or(0);
                shelves.push(Shelf {
                    y,
                    height: padded_h,
                    width_used: padded_w,
                });
                (0, y)
            }
        };

        frames.push(Frame {
            index,
            name: name.clone(),
            x,
            y,
            w: *w,
            h: *h,
        });
    }

    // Padding is only kept between sprites, not on the outer edges.
    let width = shelves.iter().map(|s| s.width_used).max().unwrap_or(0);
    let height = shelves.last().map(|s| s.y + s.height).unwrap_or(0);

    (
        frames,
        width.saturating_sub(padding).max(1),
        height.saturating_sub(padding).max(1),
    )
}

fn offset(value: u32) -> String {
    match value {
        0 => "0".into(),
        v => format!("-{v}px"),
    }
}

impl PackSprites {
    fn stylesheet(&self, frames: &[Frame], width: u32, height: u32) -> String {
        let prefix = &self.prefix;
        let mut out = format!(
            "// Generated sprite sheet, do not edit.\n${prefix}-width: {width}px;\n${prefix}-height: {height}px;\n"
        );

        let mut sorted: Vec<&Frame> = frames.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        for frame in sorted {
            out.push_str(&format!(
                "\n.{prefix}-{} {{\n  background-image: url(\"{}\");\n  background-position: {} {};\n  width: {}px;\n  height: {}px;\n}}\n",
                frame.name,
                self.url,
                offset(frame.x),
                offset(frame.y),
                frame.w,
                frame.h,
            ));
        }

        out
    }
}

impl Transform for PackSprites {
    fn name(&self) -> &'static str {
        "sprites"
    }

    fn apply(&self, _: &TransformContext, assets: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        if assets.is_empty() {
            tracing::debug!("no sprites to pack");
            return Ok(Vec::new());
        }

        let mut images = Vec::with_capacity(assets.len());
        let mut seen = HashMap::new();

        for asset in &assets {
            let name = asset.path.file_stem().unwrap_or_default().to_string();
            if let Some(other) = seen.insert(name.clone(), &asset.path) {
                bail!(
                    "sprites '{other}' and '{}' would both be named '.{}-{name}'",
                    asset.path,
                    self.prefix
                );
            }

            let image = image::load_from_memory(&asset.data)
                .with_context(|| format!("couldn't decode sprite '{}'", asset.path))?
                .to_rgba8();
            images.push((name, image));
        }

        let sizes: Vec<_> = images
            .iter()
            .map(|(name, img)| (name.clone(), img.width(), img.height()))
            .collect();

        let (frames, width, height) = pack(&sizes, self.padding);

        let mut sheet = RgbaImage::from_pixel(width, height, TRANSPARENT);
        for frame in &frames {
            let (_, img) = &images[frame.index];
            image::imageops::replace(&mut sheet, img, i64::from(frame.x), i64::from(frame.y));
        }

        let mut png = Cursor::new(Vec::new());
        sheet.write_to(&mut png, ImageFormat::Png)?;

        Ok(vec![
            Asset::new(&self.image, png.into_inner()),
            Asset::new(&self.stylesheet, self.stylesheet(&frames, width, height)),
        ])
    }
}
