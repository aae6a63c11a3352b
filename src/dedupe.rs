//! Perceptual fingerprints for near-duplicate detection.
//!
//! The image is reduced to a 32x32 grayscale grid, transformed with a 2-D DCT,
//! and the 63 non-DC coefficients of the low-frequency 8x8 block are compared
//! against their mean. The resulting bit string survives re-encoding, mild
//! brightness shifts and format conversion.

use image::{imageops::FilterType, DynamicImage, ImageReader};
use serde::{Deserialize, Serialize};
use std::{fmt, io::Cursor, path::Path, str::FromStr};

use crate::error::{Error, Result};

pub const FINGERPRINT_BITS: usize = 63;
const GRID: usize = 32;
const BLOCK: usize = 8;

/// 63-bit perceptual hash. The text form is 63 chars over `{0,1}`, first char
/// being coefficient (0,1) of the block in row-major order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(u64);

impl Fingerprint {
    const MASK: u64 = (1 << FINGERPRINT_BITS) - 1;

    pub fn from_bits(bits: u64) -> Self { Self(bits & Self::MASK) }

    pub fn bits(&self) -> u64 { self.0 }

    /// Number of differing bit positions.
    pub fn distance(&self, other: &Fingerprint) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    pub fn is_similar(&self, other: &Fingerprint, threshold: u32) -> bool {
        self.distance(other) <= threshold
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in (0..FINGERPRINT_BITS).rev() {
            f.write_str(if (self.0 >> i) & 1 == 1 { "1" } else { "0" })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("fingerprint must be 63 characters of 0/1, got {0:?}")]
pub struct ParseFingerprintError(String);

impl FromStr for Fingerprint {
    type Err = ParseFingerprintError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.len() != FINGERPRINT_BITS {
            return Err(ParseFingerprintError(s.to_string()));
        }
        let mut bits = 0u64;
        for c in s.bytes() {
            bits = match c {
                b'0' => bits << 1,
                b'1' => (bits << 1) | 1,
                _ => return Err(ParseFingerprintError(s.to_string())),
            };
        }
        Ok(Self(bits))
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = ParseFingerprintError;
    fn try_from(s: String) -> std::result::Result<Self, Self::Error> { s.parse() }
}

impl From<Fingerprint> for String {
    fn from(f: Fingerprint) -> Self { f.to_string() }
}

pub struct PerceptualHasher;

impl PerceptualHasher {
    pub fn hash_bytes(bytes: &[u8]) -> Result<Fingerprint> {
        let img = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()?
            .decode()
            .map_err(|e| Error::Decode(e.to_string()))?;
        Self::hash_image(&img)
    }

    /// Decodes by content sniffing, not by extension.
    pub fn hash_path(path: &Path) -> Result<Fingerprint> {
        let img = ImageReader::open(path)?
            .with_guessed_format()?
            .decode()
            .map_err(|e| Error::Decode(format!("{}: {e}", path.display())))?;
        Self::hash_image(&img)
    }

    pub async fn hash_file(path: &Path) -> Result<Fingerprint> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::hash_path(&path)).await?
    }

    pub fn hash_image(img: &DynamicImage) -> Result<Fingerprint> {
        if img.width() == 0 || img.height() == 0 {
            return Err(Error::Decode("image has empty dimensions".into()));
        }
        let gray = img.to_luma8();
        let small = image::imageops::resize(&gray, GRID as u32, GRID as u32, FilterType::Triangle);
        let pixels: Vec<f64> = small.pixels().map(|p| p.0[0] as f64).collect();
        let block = low_frequency_block(&pixels);

        let total: f64 = block.iter().flatten().sum::<f64>() - block[0][0];
        let mean = total / FINGERPRINT_BITS as f64;

        let mut bits = 0u64;
        for (u, row) in block.iter().enumerate() {
            for (v, &c) in row.iter().enumerate() {
                if u == 0 && v == 0 { continue; }
                bits = (bits << 1) | u64::from(c > mean);
            }
        }
        Ok(Fingerprint(bits))
    }
}

/// Top-left 8x8 of the orthonormal 2-D DCT-II of a 32x32 grid; `[u][v]` is
/// vertical frequency `u`, horizontal frequency `v`.
fn low_frequency_block(pixels: &[f64]) -> [[f64; BLOCK]; BLOCK] {
    let n = GRID as f64;
    let mut cos = [[0.0f64; GRID]; BLOCK];
    for (k, row) in cos.iter_mut().enumerate() {
        for (x, c) in row.iter_mut().enumerate() {
            *c = ((2 * x + 1) as f64 * k as f64 * std::f64::consts::PI / (2.0 * n)).cos();
        }
    }
    let scale = |k: usize| if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };

    // rows first, keeping only the low horizontal frequencies
    let mut rows = [[0.0f64; BLOCK]; GRID];
    for y in 0..GRID {
        for v in 0..BLOCK {
            let sum: f64 = (0..GRID).map(|x| pixels[y * GRID + x] * cos[v][x]).sum();
            rows[y][v] = sum * scale(v);
        }
    }

    let mut out = [[0.0f64; BLOCK]; BLOCK];
    for u in 0..BLOCK {
        for v in 0..BLOCK {
            let sum: f64 = (0..GRID).map(|y| rows[y][v] * cos[u][y]).sum();
            out[u][v] = sum * scale(u);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    fn encode(img: &RgbImage, fmt: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), fmt).unwrap();
        buf
    }

    fn pattern(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| {
            let v = ((x * 7 + y * 3) % 256) as u8;
            Rgb([v, (x % 200) as u8, ((x * y) % 256) as u8])
        })
    }

    #[test]
    fn fingerprint_is_63_binary_chars_and_deterministic() {
        let bytes = encode(&pattern(120, 80), ImageFormat::Png);
        let a = PerceptualHasher::hash_bytes(&bytes).unwrap();
        let b = PerceptualHasher::hash_bytes(&bytes).unwrap();
        let text = a.to_string();
        assert_eq!(text.len(), FINGERPRINT_BITS);
        assert!(text.chars().all(|c| c == '0' || c == '1'));
        assert_eq!(a, b);
    }

    #[test]
    fn lossless_format_change_keeps_fingerprint() {
        let img = pattern(64, 64);
        let png = PerceptualHasher::hash_bytes(&encode(&img, ImageFormat::Png)).unwrap();
        let bmp = PerceptualHasher::hash_bytes(&encode(&img, ImageFormat::Bmp)).unwrap();
        assert_eq!(png.distance(&bmp), 0);
    }

    #[test]
    fn undecodable_bytes_are_a_decode_error() {
        let err = PerceptualHasher::hash_bytes(b"definitely not an image").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn text_form_round_trips() {
        let s = "1".repeat(30) + &"0".repeat(32) + "1";
        let f: Fingerprint = s.parse().unwrap();
        assert_eq!(f.to_string(), s);
        assert!(f.bits() & 1 == 1);
        assert!("0101".parse::<Fingerprint>().is_err());
        assert!("2".repeat(63).parse::<Fingerprint>().is_err());
    }

    #[test]
    fn hamming_distance_is_symmetric() {
        let a = Fingerprint::from_bits(0b1011);
        let b = Fingerprint::from_bits(0b0110);
        assert_eq!(a.distance(&b), 3);
        assert_eq!(b.distance(&a), 3);
        assert_eq!(a.distance(&a), 0);
        assert!(a.is_similar(&b, 3));
        assert!(!a.is_similar(&b, 2));
    }
}
