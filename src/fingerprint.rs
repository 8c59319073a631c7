use std::fmt;
use std::path::{Path, PathBuf};

use image::{ImageError, ImageReader};
use image_hasher::{HashAlg, HasherConfig};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Bit width of a fingerprint. All supported algorithms are configured to
/// emit exactly this many bits.
pub const FINGERPRINT_BITS: u32 = 64;

const HASH_WIDTH: u32 = 8;
const HASH_HEIGHT: u32 = 8;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("failed to decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("unsupported image format for {path}: {message}")]
    UnsupportedFormat { path: PathBuf, message: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl FingerprintError {
    fn from_image_error(path: &Path, err: ImageError) -> Self {
        match err {
            ImageError::Unsupported(inner) => FingerprintError::UnsupportedFormat {
                path: path.to_path_buf(),
                message: inner.to_string(),
            },
            ImageError::IoError(source) => FingerprintError::Io {
                path: path.to_path_buf(),
                source,
            },
            other => FingerprintError::Decode {
                path: path.to_path_buf(),
                message: other.to_string(),
            },
        }
    }
}

/// A 64-bit perceptual fingerprint. Visually similar images land on values
/// with a small Hamming distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Number of differing bits between two fingerprints.
    pub fn distance(&self, other: &Fingerprint) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    pub fn is_similar(&self, other: &Fingerprint, max_distance: u32) -> bool {
        self.distance(other) <= max_distance
    }

    /// Fixed-width lowercase hex, the encoding used by the cache file.
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    pub fn from_hex(s: &str) -> Option<Fingerprint> {
        if s.len() != 16 {
            return None;
        }
        u64::from_str_radix(s, 16).ok().map(Fingerprint)
    }

    fn from_hash_bytes(bytes: &[u8]) -> Fingerprint {
        let mut buf = [0u8; 8];
        let n = bytes.len().min(8);
        buf[..n].copy_from_slice(&bytes[..n]);
        Fingerprint(u64::from_be_bytes(buf))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&s)
            .ok_or_else(|| D::Error::custom(format!("invalid fingerprint hex: {s}")))
    }
}

/// Perceptual hash family. All variants produce 64-bit fingerprints; they
/// trade robustness against different kinds of edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FingerprintAlgorithm {
    /// Mean/average hash: each bit compares a cell to the global mean.
    #[default]
    Mean,
    /// Difference hash over horizontal neighbors.
    Gradient,
    /// Difference hash over vertical neighbors.
    VertGradient,
    /// Combined horizontal and vertical gradients at half resolution.
    DoubleGradient,
    /// Blockhash.io algorithm; works without a full decode-and-resize.
    Blockhash,
}

impl FingerprintAlgorithm {
    fn hash_alg(&self) -> HashAlg {
        match self {
            FingerprintAlgorithm::Mean => HashAlg::Mean,
            FingerprintAlgorithm::Gradient => HashAlg::Gradient,
            FingerprintAlgorithm::VertGradient => HashAlg::VertGradient,
            FingerprintAlgorithm::DoubleGradient => HashAlg::DoubleGradient,
            FingerprintAlgorithm::Blockhash => HashAlg::Blockhash,
        }
    }
}

/// Successful extraction result for one file.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub fingerprint: Fingerprint,
    pub width: u32,
    pub height: u32,
    pub format: Option<String>,
}

/// Decodes image files and derives perceptual fingerprints.
///
/// Stateless apart from its configuration; safe to share across worker
/// threads. Decoder resources are scoped to each call, so a failed decode
/// cannot leak file handles.
#[derive(Debug, Clone, Copy)]
pub struct Fingerprinter {
    algorithm: FingerprintAlgorithm,
}

impl Fingerprinter {
    pub fn new(algorithm: FingerprintAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Decode `path` (sniffing the real format from content, the extension is
    /// not trusted) and compute its fingerprint plus basic metadata.
    pub fn extract(&self, path: &Path) -> Result<Extraction, FingerprintError> {
        let reader = ImageReader::open(path)
            .map_err(|source| FingerprintError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .with_guessed_format()
            .map_err(|source| FingerprintError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let format = reader
            .format()
            .and_then(|f| f.extensions_str().first().copied())
            .map(|ext| ext.to_uppercase());

        let img = reader
            .decode()
            .map_err(|e| FingerprintError::from_image_error(path, e))?;

        let hasher = HasherConfig::new()
            .hash_size(HASH_WIDTH, HASH_HEIGHT)
            .hash_alg(self.algorithm.hash_alg())
            .to_hasher();
        let hash = hasher.hash_image(&img);

        Ok(Extraction {
            fingerprint: Fingerprint::from_hash_bytes(hash.as_bytes()),
            width: img.width(),
            height: img.height(),
            format,
        })
    }

    /// Read dimensions and format from the file header without a full decode.
    /// Used on cache hits, where the fingerprint itself is already known.
    pub fn probe(&self, path: &Path) -> Result<(u32, u32, Option<String>), FingerprintError> {
        let reader = ImageReader::open(path)
            .map_err(|source| FingerprintError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .with_guessed_format()
            .map_err(|source| FingerprintError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let format = reader
            .format()
            .and_then(|f| f.extensions_str().first().copied())
            .map(|ext| ext.to_uppercase());

        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| FingerprintError::from_image_error(path, e))?;

        Ok((width, height, format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use tempfile::TempDir;

    fn write_png(dir: &Path, name: &str, img: &RgbImage) -> PathBuf {
        let path = dir.join(name);
        img.save(&path).unwrap();
        path
    }

    fn split_image(horizontal: bool) -> RgbImage {
        RgbImage::from_fn(64, 64, |x, y| {
            let lit = if horizontal { x >= 32 } else { y >= 32 };
            if lit {
                image::Rgb([255, 255, 255])
            } else {
                image::Rgb([0, 0, 0])
            }
        })
    }

    #[test]
    fn distance_counts_differing_bits() {
        let a = Fingerprint(0);
        let b = Fingerprint(0b1111);
        assert_eq!(a.distance(&b), 4);
        assert_eq!(b.distance(&a), 4);
        assert_eq!(a.distance(&a), 0);
        assert!(a.is_similar(&b, 4));
        assert!(!a.is_similar(&b, 3));
    }

    #[test]
    fn hex_round_trip() {
        let fp = Fingerprint(0xdead_beef_0012_3456);
        assert_eq!(fp.to_hex().len(), 16);
        assert_eq!(Fingerprint::from_hex(&fp.to_hex()), Some(fp));
        assert_eq!(Fingerprint::from_hex("xyz"), None);
        assert_eq!(Fingerprint::from_hex(""), None);
    }

    #[test]
    fn identical_files_get_identical_fingerprints() {
        let dir = TempDir::new().unwrap();
        let img = split_image(true);
        let a = write_png(dir.path(), "a.png", &img);
        let b = write_png(dir.path(), "b.png", &img);

        let fp = Fingerprinter::new(FingerprintAlgorithm::Mean);
        let ea = fp.extract(&a).unwrap();
        let eb = fp.extract(&b).unwrap();
        assert_eq!(ea.fingerprint, eb.fingerprint);
        assert_eq!((ea.width, ea.height), (64, 64));
        assert_eq!(ea.format.as_deref(), Some("PNG"));
    }

    #[test]
    fn structurally_different_images_are_far_apart() {
        let dir = TempDir::new().unwrap();
        let a = write_png(dir.path(), "a.png", &split_image(true));
        let c = write_png(dir.path(), "c.png", &split_image(false));

        let fp = Fingerprinter::new(FingerprintAlgorithm::Mean);
        let ea = fp.extract(&a).unwrap();
        let ec = fp.extract(&c).unwrap();
        assert!(
            ea.fingerprint.distance(&ec.fingerprint) > DEFAULT_TEST_THRESHOLD,
            "expected far fingerprints, got distance {}",
            ea.fingerprint.distance(&ec.fingerprint)
        );
    }

    const DEFAULT_TEST_THRESHOLD: u32 = 10;

    #[test]
    fn zero_byte_file_is_a_typed_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"").unwrap();

        let fp = Fingerprinter::new(FingerprintAlgorithm::Mean);
        let err = fp.extract(&path).unwrap_err();
        assert!(matches!(
            err,
            FingerprintError::UnsupportedFormat { .. } | FingerprintError::Decode { .. }
        ));
    }

    #[test]
    fn non_image_content_fails_regardless_of_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake.jpg");
        std::fs::write(&path, b"this is not an image").unwrap();

        let fp = Fingerprinter::new(FingerprintAlgorithm::Mean);
        assert!(fp.extract(&path).is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let fp = Fingerprinter::new(FingerprintAlgorithm::Mean);
        let err = fp.extract(Path::new("/nonexistent/nope.png")).unwrap_err();
        assert!(matches!(err, FingerprintError::Io { .. }));
    }
}
