use std::fmt;
use thiserror::Error;

/// Secret half followed by public half, as written by the keygen grinder.
pub const SECRET_KEY_LEN: usize = 64;
pub const SECRET_HEX_LEN: usize = SECRET_KEY_LEN * 2;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecretEncodingError {
    #[error("artifact is not a JSON byte array: {0}")]
    Parse(String),
    #[error("byte {index} is not an integer: {value}")]
    NonInteger { index: usize, value: String },
    #[error("expected {expected} key bytes, found {found}")]
    Length { expected: usize, found: usize },
    #[error("expected {expected} hex characters, found {found}")]
    HexLength { expected: usize, found: usize },
    #[error("invalid hex secret: {0}")]
    Hex(String),
}

/// Maps any integer into the 0..=255 byte domain (modulo 256).
pub fn normalize_byte(value: i64) -> u8 {
    value.rem_euclid(256) as u8
}

/// Parses the raw artifact text (a JSON array of integers) into bytes,
/// normalizing negative and out-of-range values instead of rejecting them.
pub fn parse_raw_secret(text: &str) -> Result<Vec<u8>, SecretEncodingError> {
    let values: Vec<serde_json::Number> = serde_json::from_str(text.trim())
        .map_err(|err| SecretEncodingError::Parse(err.to_string()))?;

    values
        .iter()
        .enumerate()
        .map(|(index, number)| {
            if let Some(value) = number.as_i64() {
                Ok(normalize_byte(value))
            } else if let Some(value) = number.as_u64() {
                Ok((value % 256) as u8)
            } else {
                Err(SecretEncodingError::NonInteger {
                    index,
                    value: number.to_string(),
                })
            }
        })
        .collect()
}

/// Lowercase hex, no prefix, no separators. Anything other than 64 bytes is
/// a malformed artifact.
pub fn encode_secret(bytes: &[u8]) -> Result<String, SecretEncodingError> {
    if bytes.len() != SECRET_KEY_LEN {
        return Err(SecretEncodingError::Length {
            expected: SECRET_KEY_LEN,
            found: bytes.len(),
        });
    }
    Ok(hex::encode(bytes))
}

pub fn decode_secret(encoded: &str) -> Result<[u8; SECRET_KEY_LEN], SecretEncodingError> {
    if encoded.len() != SECRET_HEX_LEN {
        return Err(SecretEncodingError::HexLength {
            expected: SECRET_HEX_LEN,
            found: encoded.len(),
        });
    }
    let mut bytes = [0u8; SECRET_KEY_LEN];
    hex::decode_to_slice(encoded, &mut bytes)
        .map_err(|err| SecretEncodingError::Hex(err.to_string()))?;
    Ok(bytes)
}

/// Raw artifact text straight to its canonical hex form.
pub fn canonical_secret(artifact_text: &str) -> Result<String, SecretEncodingError> {
    encode_secret(&parse_raw_secret(artifact_text)?)
}

#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey([u8; SECRET_KEY_LEN]);

impl SecretKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SecretEncodingError> {
        let array: [u8; SECRET_KEY_LEN] =
            bytes.try_into().map_err(|_| SecretEncodingError::Length {
                expected: SECRET_KEY_LEN,
                found: bytes.len(),
            })?;
        Ok(Self(array))
    }

    pub fn from_hex(encoded: &str) -> Result<Self, SecretEncodingError> {
        decode_secret(encoded).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}
