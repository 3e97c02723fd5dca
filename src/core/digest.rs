//! Content digests
//!
//! Parses `algorithm:hex` digests declared on source files and verifies
//! files on disk against them.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tokio::io::AsyncReadExt;

use crate::error::{DownloadError, ManifestError};

/// Hash algorithm of a declared digest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl Algorithm {
    /// Name used in manifests
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of the raw digest in bytes
    pub fn output_len(self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }

    fn hasher(self) -> Hasher {
        use sha2::Digest as _;
        match self {
            Self::Md5 => Hasher::Md5(md5::Md5::new()),
            Self::Sha1 => Hasher::Sha1(sha1::Sha1::new()),
            Self::Sha256 => Hasher::Sha256(sha2::Sha256::new()),
            Self::Sha512 => Hasher::Sha512(sha2::Sha512::new()),
        }
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(format!("unknown algorithm '{other}'")),
        }
    }
}

enum Hasher {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
}

impl Hasher {
    fn update(&mut self, data: &[u8]) {
        use sha2::Digest as _;
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        use sha2::Digest as _;
        match self {
            Self::Md5(h) => h.finalize().to_vec(),
            Self::Sha1(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// Expected content hash of a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    algorithm: Algorithm,
    expected: Vec<u8>,
}

impl Digest {
    /// Create a digest from an algorithm and raw bytes
    pub fn new(algorithm: Algorithm, expected: Vec<u8>) -> Self {
        Self {
            algorithm,
            expected,
        }
    }

    /// Compute the digest of in-memory data
    pub fn compute(algorithm: Algorithm, data: &[u8]) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.update(data);
        Self::new(algorithm, hasher.finalize())
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Hex encoding of the expected hash
    pub fn hex(&self) -> String {
        hex::encode(&self.expected)
    }

    /// Check a file on disk against this digest
    ///
    /// Reads the file in chunks so large archives are never held in memory.
    pub async fn verify(&self, path: &Path) -> Result<bool, DownloadError> {
        let io_error = |e: std::io::Error| DownloadError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        };

        let mut file = tokio::fs::File::open(path).await.map_err(io_error)?;
        let mut hasher = self.algorithm.hasher();
        let mut buffer = vec![0u8; 64 * 1024];

        loop {
            let read = file.read(&mut buffer).await.map_err(io_error)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        Ok(hasher.finalize() == self.expected)
    }
}

impl FromStr for Digest {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |error: String| ManifestError::InvalidDigest {
            digest: s.to_string(),
            error,
        };

        let (algorithm, value) = s
            .split_once(':')
            .ok_or_else(|| invalid("expected 'algorithm:hex'".to_string()))?;
        let algorithm: Algorithm = algorithm.parse().map_err(invalid)?;
        let expected = hex::decode(value.trim()).map_err(|e| invalid(e.to_string()))?;

        if expected.len() != algorithm.output_len() {
            return Err(invalid(format!(
                "{} digest must be {} hex characters",
                algorithm.as_str(),
                algorithm.output_len() * 2
            )));
        }

        Ok(Self::new(algorithm, expected))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.hex())
    }
}
