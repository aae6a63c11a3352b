use image::{codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use std::path::Path;

use crate::config::ThumbnailRule;
use crate::error::{Error, Result};

/// Re-encoded thumbnail bytes and their dimensions.
pub struct Rendered {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode `source` and shrink it to the rule's width. `None` when the source
/// is already no wider than the rule: thumbnails never upscale.
pub fn render(source: &Path, rule: &ThumbnailRule) -> Result<Option<Rendered>> {
    let reader = ImageReader::open(source)?.with_guessed_format()?;
    let format = reader.format();
    let img = reader
        .decode()
        .map_err(|e| Error::Decode(format!("{}: {e}", source.display())))?;
    if img.width() == 0 || img.height() == 0 {
        return Err(Error::Decode(format!("{}: empty dimensions", source.display())));
    }
    if img.width() <= rule.width {
        return Ok(None);
    }

    let (nw, nh) = target_size(img.width(), img.height(), rule.width);
    let thumb = img.resize_exact(nw, nh, FilterType::Lanczos3);
    let bytes = encode(&thumb, format.unwrap_or(ImageFormat::Jpeg), rule.jpeg_quality())?;
    Ok(Some(Rendered { bytes, width: nw, height: nh }))
}

/// Width pinned, height scaled to keep the aspect ratio.
pub fn target_size(w: u32, h: u32, target_w: u32) -> (u32, u32) {
    let nh = ((h as f64) * (target_w as f64 / w as f64)).round() as u32;
    (target_w, nh.max(1))
}

/// Keeps the source format; JPEG honors the quality factor.
fn encode(img: &DynamicImage, format: ImageFormat, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match format {
        ImageFormat::Jpeg => {
            let mut enc = JpegEncoder::new_with_quality(&mut out, quality);
            enc.encode_image(&img.to_rgb8())?;
        }
        other => {
            img.write_to(&mut Cursor::new(&mut out), other)?;
        }
    }
    Ok(out)
}
