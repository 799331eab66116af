use std::io::{Cursor, Write};

use chrono::{DateTime, Local, TimeZone};
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::config::Package;
use crate::output::Asset;
use crate::transform::{Transform, TransformContext};

/// `YYYYMMDDHHMMSS`, every field zero-padded.
pub fn timestamp<Tz>(time: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    time.format("%Y%m%d%H%M%S").to_string()
}

/// `{name}_v{version}-build_{timestamp}.{extension}`
pub fn archive_name<Tz>(package: &Package, extension: &str, time: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}_v{}-build_{}.{}",
        package.name,
        package.version,
        timestamp(time),
        extension
    )
}

/// Packs every incoming asset into one deflate-compressed zip file, named
/// after the package and the local time at invocation.
#[derive(Debug, Clone)]
pub struct PackageArchive {
    pub package: Package,
    pub extension: String,
}

impl PackageArchive {
    fn pack(assets: &[Asset]) -> zip::result::ZipResult<Vec<u8>> {
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        for asset in assets {
            zip.start_file(asset.path.as_str(), options)?;
            zip.write_all(&asset.data)?;
        }

        Ok(zip.finish()?.into_inner())
    }
}

impl Transform for PackageArchive {
    fn name(&self) -> &'static str {
        "archive"
    }

    fn apply(&self, _: &TransformContext, assets: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        let name = archive_name(&self.package, &self.extension, &Local::now());
        let data = Self::pack(&assets)?;

        tracing::info!(archive = %name, files = assets.len(), "packed output tree");

        Ok(vec![Asset::new(name, data)])
    }
}
