use sha2::{Digest, Sha256};

use crate::{Error, Result};

// https://github.com/opencontainers/image-spec/blob/main/descriptor.md#digests
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OciDigest {
    algorithm: Algorithm,
    encoded: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Algorithm {
    Sha256,
    Sha512,
}

impl Algorithm {
    fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha512 => 128,
        }
    }
}

impl TryFrom<&str> for OciDigest {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        let (algo, encoded) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidDigest(s.to_string()))?;

        let algorithm = match algo {
            "sha256" => Algorithm::Sha256,
            "sha512" => Algorithm::Sha512,
            "" => return Err(Error::InvalidDigest(s.to_string())),
            other => return Err(Error::UnsupportedDigestAlgorithm(other.to_string())),
        };

        if encoded.len() != algorithm.encoded_len()
            || !encoded.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        {
            return Err(Error::InvalidDigest(s.to_string()));
        }

        Ok(Self {
            algorithm,
            encoded: encoded.to_string(),
        })
    }
}

impl std::str::FromStr for OciDigest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.try_into()
    }
}

impl std::fmt::Display for OciDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.encoded)
    }
}

impl From<&OciDigest> for String {
    fn from(d: &OciDigest) -> String {
        d.to_string()
    }
}

impl OciDigest {
    /// Canonical digest of the given bytes.
    pub fn from_bytes(bs: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        Digest::update(&mut hasher, bs);
        Self {
            algorithm: Algorithm::Sha256,
            encoded: format!("{:x}", hasher.finalize()),
        }
    }

    pub fn algorithm(&self) -> &str {
        self.algorithm.as_str()
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}
