//! Client identity generation.
//!
//! An identity is a fixed-width decimal string derived from a seed the
//! client supplies on `init`. The same seed always yields the same
//! identity, so a client that reconnects with the same seed is reachable
//! under the same address.
//!
//! Identities are hash-derived and not coordinated across connections:
//! two different seeds can map to the same identity. Uniqueness is
//! probabilistic only.

use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;
use tracing::trace;

/// Default number of digits in an identity.
pub const DEFAULT_IDENTITY_DIGITS: u32 = 9;

/// Largest supported width. The digest prefix carries 60 bits, which
/// covers 18 decimal digits.
pub const MAX_IDENTITY_DIGITS: u32 = 18;

/// Identity generator errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// Requested width outside `1..=MAX_IDENTITY_DIGITS`.
    #[error("Identity width must be between 1 and {MAX_IDENTITY_DIGITS} digits, got {0}")]
    InvalidWidth(u32),
}

/// A client identity.
///
/// Always all-ASCII-digits with a non-zero first digit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity(String);

impl Identity {
    /// Parse an identity, rejecting anything that is not a run of digits
    /// with a non-zero leading digit.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let valid = value.bytes().all(|b| b.is_ascii_digit())
            && value.bytes().next().is_some_and(|b| b != b'0');
        valid.then(|| Self(value.to_string()))
    }

    /// Get the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derives identities from client seeds.
#[derive(Debug, Clone, Copy)]
pub struct IdentityGenerator {
    digits: u32,
    modulus: u64,
}

impl Default for IdentityGenerator {
    fn default() -> Self {
        Self {
            digits: DEFAULT_IDENTITY_DIGITS,
            modulus: 10u64.pow(DEFAULT_IDENTITY_DIGITS),
        }
    }
}

impl IdentityGenerator {
    /// Create a generator producing identities of `digits` digits.
    ///
    /// # Errors
    ///
    /// Returns an error if `digits` is zero or above [`MAX_IDENTITY_DIGITS`].
    pub fn new(digits: u32) -> Result<Self, IdentityError> {
        if digits == 0 || digits > MAX_IDENTITY_DIGITS {
            return Err(IdentityError::InvalidWidth(digits));
        }
        Ok(Self {
            digits,
            modulus: 10u64.pow(digits),
        })
    }

    /// Get the identity width.
    #[must_use]
    pub fn digits(&self) -> u32 {
        self.digits
    }

    /// Compute the candidate for one attempt.
    ///
    /// SHA-256 over `seed` followed by the decimal attempt number. The
    /// first 15 hex digits of the digest are read as an integer and reduced
    /// modulo `10^digits`, zero padded.
    #[must_use]
    pub fn candidate(&self, seed: &str, attempt: u32) -> String {
        let mut hasher = Sha256::new();
        hasher.update(seed.as_bytes());
        hasher.update(attempt.to_string().as_bytes());
        let digest = hasher.finalize();

        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        // 16 hex digits minus the last nibble
        let value = (u64::from_be_bytes(prefix) >> 4) % self.modulus;

        format!("{:0width$}", value, width = self.digits as usize)
    }

    /// Generate the identity for `seed`.
    ///
    /// Attempts start at 0 on every call and advance while the candidate
    /// starts with `0`, so the result is a pure function of the seed.
    #[must_use]
    pub fn generate(&self, seed: &str) -> Identity {
        let mut attempt = 0u32;
        loop {
            let candidate = self.candidate(seed, attempt);
            if !candidate.starts_with('0') {
                return Identity(candidate);
            }
            trace!(attempt, "Identity candidate has a leading zero, retrying");
            attempt = attempt.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_deterministic() {
        let generator = IdentityGenerator::default();
        assert_eq!(generator.generate("abc"), generator.generate("abc"));
        assert_eq!(
            generator.generate("aa:bb:cc:dd:ee:ff"),
            IdentityGenerator::default().generate("aa:bb:cc:dd:ee:ff")
        );
    }

    #[test]
    fn test_generate_fixed_width_no_leading_zero() {
        let generator = IdentityGenerator::default();
        for i in 0..2000 {
            let identity = generator.generate(&format!("seed-{}", i));
            let s = identity.as_str();
            assert_eq!(s.len(), 9, "bad width for {}", s);
            assert!(s.bytes().all(|b| b.is_ascii_digit()));
            assert!(!s.starts_with('0'));
        }
    }

    #[test]
    fn test_generate_takes_first_non_zero_candidate() {
        let generator = IdentityGenerator::default();
        let mut retried = 0;
        for i in 0..500 {
            let seed = format!("client-{}", i);
            let expected = (0..)
                .map(|attempt| generator.candidate(&seed, attempt))
                .find(|c| !c.starts_with('0'))
                .unwrap();
            if generator.candidate(&seed, 0).starts_with('0') {
                retried += 1;
            }
            assert_eq!(generator.generate(&seed).as_str(), expected);
        }
        // Roughly one candidate in ten starts with zero
        assert!(retried > 0);
    }

    #[test]
    fn test_candidate_depends_on_attempt() {
        let generator = IdentityGenerator::default();
        assert_ne!(generator.candidate("abc", 0), generator.candidate("abc", 1));
        assert_eq!(generator.candidate("abc", 3), generator.candidate("abc", 3));
    }

    #[test]
    fn test_custom_width() {
        let generator = IdentityGenerator::new(4).unwrap();
        assert_eq!(generator.digits(), 4);
        assert_eq!(generator.generate("abc").as_str().len(), 4);
    }

    #[test]
    fn test_invalid_width() {
        assert!(matches!(
            IdentityGenerator::new(0),
            Err(IdentityError::InvalidWidth(0))
        ));
        assert!(matches!(
            IdentityGenerator::new(MAX_IDENTITY_DIGITS + 1),
            Err(IdentityError::InvalidWidth(19))
        ));
        assert!(IdentityGenerator::new(MAX_IDENTITY_DIGITS).is_ok());
    }

    #[test]
    fn test_identity_parse() {
        assert_eq!(Identity::parse("123456789").unwrap().as_str(), "123456789");
        assert!(Identity::parse("012345678").is_none());
        assert!(Identity::parse("12a").is_none());
        assert!(Identity::parse("").is_none());
    }
}
