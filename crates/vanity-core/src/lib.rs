pub mod secret;

pub use secret::{
    canonical_secret, decode_secret, encode_secret, normalize_byte, parse_raw_secret, SecretKey,
    SecretEncodingError, SECRET_HEX_LEN, SECRET_KEY_LEN,
};

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_PATTERN: &str = "ab:1";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern suffix is empty")]
    EmptySuffix,
    #[error("invalid match count {0:?}, expected a positive integer")]
    InvalidCount(String),
}

/// A vanity suffix plus the number of matches the worker should stop after,
/// written `SUFFIX:COUNT` on the worker command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrindPattern {
    pub suffix: String,
    pub count: u32,
}

impl GrindPattern {
    pub fn new(suffix: impl Into<String>, count: u32) -> Result<Self, PatternError> {
        let suffix = suffix.into();
        if suffix.trim().is_empty() {
            return Err(PatternError::EmptySuffix);
        }
        if count == 0 {
            return Err(PatternError::InvalidCount(count.to_string()));
        }
        Ok(Self { suffix, count })
    }

    /// Whether `public_key` satisfies the suffix.
    pub fn matches(&self, public_key: &str, ignore_case: bool) -> bool {
        if ignore_case {
            public_key
                .to_lowercase()
                .ends_with(&self.suffix.to_lowercase())
        } else {
            public_key.ends_with(&self.suffix)
        }
    }
}

impl Default for GrindPattern {
    fn default() -> Self {
        Self {
            suffix: "ab".to_string(),
            count: 1,
        }
    }
}

impl FromStr for GrindPattern {
    type Err = PatternError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        match value.rsplit_once(':') {
            Some((suffix, count)) => {
                let count = count
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| PatternError::InvalidCount(count.to_string()))?;
                Self::new(suffix.trim(), count)
            }
            None => Self::new(value, 1),
        }
    }
}

impl fmt::Display for GrindPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.suffix, self.count)
    }
}

/// One found keypair, keyed by its public identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeypairRecord {
    pub public_key: String,
    pub private_key: SecretKey,
}

impl KeypairRecord {
    pub fn from_canonical_hex(
        public_key: impl Into<String>,
        private_key_hex: &str,
    ) -> Result<Self, SecretEncodingError> {
        Ok(Self {
            public_key: public_key.into(),
            private_key: SecretKey::from_hex(private_key_hex)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffix_and_count() {
        let pattern: GrindPattern = "ab:1".parse().expect("pattern");
        assert_eq!(pattern, GrindPattern::default());
        assert_eq!(pattern.to_string(), DEFAULT_PATTERN);

        let pattern: GrindPattern = "Sol:3".parse().expect("pattern");
        assert_eq!(pattern.suffix, "Sol");
        assert_eq!(pattern.count, 3);
    }

    #[test]
    fn bare_suffix_defaults_to_single_match() {
        let pattern: GrindPattern = "xyz".parse().expect("pattern");
        assert_eq!(pattern.to_string(), "xyz:1");
    }

    #[test]
    fn rejects_empty_suffix_and_bad_counts() {
        assert_eq!(":2".parse::<GrindPattern>(), Err(PatternError::EmptySuffix));
        assert_eq!(
            "ab:0".parse::<GrindPattern>(),
            Err(PatternError::InvalidCount("0".to_string()))
        );
        assert!(matches!(
            "ab:many".parse::<GrindPattern>(),
            Err(PatternError::InvalidCount(_))
        ));
    }

    #[test]
    fn suffix_matching_honors_case_toggle() {
        let pattern: GrindPattern = "ab:1".parse().expect("pattern");
        assert!(pattern.matches("9xQeWvG816bUx9EPab", false));
        assert!(!pattern.matches("9xQeWvG816bUx9EPAB", false));
        assert!(pattern.matches("9xQeWvG816bUx9EPAB", true));
    }

    #[test]
    fn record_keeps_canonical_hex() {
        let hex = "0a".repeat(SECRET_KEY_LEN);
        let record = KeypairRecord::from_canonical_hex("pubkey", &hex).expect("record");
        assert_eq!(record.private_key.to_hex(), hex);
        assert!(KeypairRecord::from_canonical_hex("pubkey", "0a0a").is_err());
    }
}
