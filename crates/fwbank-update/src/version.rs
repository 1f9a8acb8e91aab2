//! Structured firmware versions and the raw token codec
//!
//! Devices report their firmware version as a short sequence of hex byte
//! tokens. A [`VersionLayout`] describes where each version field lives in that
//! sequence and how its tokens are interpreted:
//!
//! - [`FieldRule::AsciiDigits`]: every token is the ASCII code of a decimal
//!   digit (`"30"` is `'0'`, `"31"` is `'1'`), and the digits form the value.
//! - [`FieldRule::RawHex`]: the tokens are big-endian bytes of the value.
//!
//! The canonical display form is `"{major}.{minor}.0x{master}{a}{b}{c}"`, with
//! the raw-hex fields written as zero-padded uppercase hex.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of fields in a [`StructuredVersion`].
pub const FIELD_COUNT: usize = 6;

/// Errors produced while decoding raw version tokens
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Fewer tokens than the layout requires
    #[error("raw version too short: layout requires {required} tokens, got {actual}")]
    TooShort {
        /// Tokens required by the layout
        required: usize,
        /// Tokens supplied
        actual: usize,
    },

    /// A token is not a one-byte hex value
    #[error("invalid hex token {token:?} at index {index} (field {field})")]
    InvalidToken {
        /// Field the token belongs to
        field: &'static str,
        /// Position of the token in the raw sequence
        index: usize,
        /// The offending token
        token: String,
    },

    /// An ASCII-digit field contains a byte that is not `'0'..='9'`
    #[error("byte {byte:#04x} at index {index} is not an ASCII digit (field {field})")]
    NonDigit {
        /// Field the byte belongs to
        field: &'static str,
        /// Position of the byte in the raw sequence
        index: usize,
        /// The offending byte
        byte: u8,
    },

    /// The decoded value does not fit the field type
    #[error("value of field {field} overflows")]
    Overflow {
        /// Field that overflowed
        field: &'static str,
    },
}

/// Errors produced while encoding a version back into raw tokens
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// A field value exceeds what its encoded width can hold
    #[error("field {field} value {value} exceeds encoded maximum {max}")]
    FieldOutOfRange {
        /// Field name
        field: &'static str,
        /// Value that does not fit
        value: u32,
        /// Largest encodable value
        max: u32,
    },
}

/// Errors produced while parsing the canonical display string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseVersionError {
    /// The string does not have the `major.minor.0xHEX` shape
    #[error("malformed version string {0:?}")]
    Malformed(String),

    /// A field parsed but is larger than its encoded width allows
    #[error("field {field} value {value} exceeds encoded maximum {max}")]
    OutOfRange {
        /// Field name
        field: &'static str,
        /// Parsed value
        value: u32,
        /// Largest encodable value
        max: u32,
    },
}

/// How the tokens of one field are turned into an integer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldRule {
    /// Each token is the ASCII code of a decimal digit
    AsciiDigits,
    /// Tokens are big-endian bytes of the value
    RawHex,
}

/// Position and decoding rule of one version field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name used in diagnostics
    pub name: &'static str,
    /// Index of the first token
    pub offset: usize,
    /// Number of tokens
    pub len: usize,
    /// Decoding rule
    pub rule: FieldRule,
}

impl FieldSpec {
    /// Create a field specification
    pub const fn new(name: &'static str, offset: usize, len: usize, rule: FieldRule) -> Self {
        Self {
            name,
            offset,
            len,
            rule,
        }
    }

    /// Largest value the encoded width can represent
    pub fn max_value(&self) -> u32 {
        let max = match self.rule {
            FieldRule::AsciiDigits => 10u64
                .checked_pow(self.len as u32)
                .map_or(u64::MAX, |v| v.saturating_sub(1)),
            FieldRule::RawHex => 1u64
                .checked_shl((self.len as u32).saturating_mul(8))
                .filter(|_| self.len < 8)
                .map_or(u64::MAX, |v| v.saturating_sub(1)),
        };
        u32::try_from(max).unwrap_or(u32::MAX)
    }

    /// Number of hex digits this field occupies in the display string
    fn hex_width(&self) -> usize {
        self.len.saturating_mul(2)
    }

    fn end(&self) -> usize {
        self.offset.saturating_add(self.len)
    }

    fn decode(&self, bytes: &[u8]) -> Result<u32, DecodeError> {
        let overflow = DecodeError::Overflow { field: self.name };
        match self.rule {
            FieldRule::AsciiDigits => {
                let mut value: u32 = 0;
                for (i, &byte) in bytes.iter().enumerate() {
                    if !byte.is_ascii_digit() {
                        return Err(DecodeError::NonDigit {
                            field: self.name,
                            index: self.offset.saturating_add(i),
                            byte,
                        });
                    }
                    value = value
                        .checked_mul(10)
                        .and_then(|v| v.checked_add(u32::from(byte - b'0')))
                        .ok_or_else(|| overflow.clone())?;
                }
                Ok(value)
            }
            FieldRule::RawHex => bytes.iter().try_fold(0u32, |acc, &byte| {
                acc.checked_mul(256)
                    .and_then(|v| v.checked_add(u32::from(byte)))
                    .ok_or_else(|| overflow.clone())
            }),
        }
    }

    fn encode(&self, value: u32) -> Result<Vec<u8>, EncodeError> {
        let max = self.max_value();
        if value > max {
            return Err(EncodeError::FieldOutOfRange {
                field: self.name,
                value,
                max,
            });
        }

        Ok(match self.rule {
            FieldRule::AsciiDigits => format!("{value:0width$}", width = self.len).into_bytes(),
            FieldRule::RawHex => {
                let mut bytes = vec![0u8; self.len];
                for (dst, src) in bytes.iter_mut().rev().zip(value.to_be_bytes().iter().rev()) {
                    *dst = *src;
                }
                bytes
            }
        })
    }
}

/// Static description of where each version field lives in the raw tokens
///
/// Fields are listed in comparison precedence order: major, minor,
/// master beta, then the three subsystem beta counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionLayout {
    fields: [FieldSpec; FIELD_COUNT],
}

impl VersionLayout {
    /// PSU layout: two ASCII digits each for major and minor, then four
    /// single-byte counters.
    pub const PSU: VersionLayout = VersionLayout::new([
        FieldSpec::new("major", 0, 2, FieldRule::AsciiDigits),
        FieldSpec::new("minor", 2, 2, FieldRule::AsciiDigits),
        FieldSpec::new("master_beta", 4, 1, FieldRule::RawHex),
        FieldSpec::new("subsystem_beta_a", 5, 1, FieldRule::RawHex),
        FieldSpec::new("subsystem_beta_b", 6, 1, FieldRule::RawHex),
        FieldSpec::new("subsystem_beta_c", 7, 1, FieldRule::RawHex),
    ]);

    /// Build a layout from field specifications in precedence order
    pub const fn new(fields: [FieldSpec; FIELD_COUNT]) -> Self {
        Self { fields }
    }

    /// Field specifications in precedence order
    pub fn fields(&self) -> &[FieldSpec; FIELD_COUNT] {
        &self.fields
    }

    /// Minimum number of raw tokens needed to decode a version
    pub fn required_len(&self) -> usize {
        self.fields.iter().map(FieldSpec::end).max().unwrap_or(0)
    }

    /// Decode hex tokens such as `["30", "31", "0x02", ...]`
    pub fn decode<T: AsRef<str>>(&self, raw: &[T]) -> Result<StructuredVersion, DecodeError> {
        self.decode_with(raw.len(), |spec, index| {
            let token = raw
                .get(index)
                .map(AsRef::as_ref)
                .ok_or(DecodeError::TooShort {
                    required: self.required_len(),
                    actual: raw.len(),
                })?;
            parse_token(token).ok_or_else(|| DecodeError::InvalidToken {
                field: spec.name,
                index,
                token: token.to_string(),
            })
        })
    }

    /// Decode raw bytes that were already read off the wire as integers
    pub fn decode_bytes(&self, raw: &[u8]) -> Result<StructuredVersion, DecodeError> {
        self.decode_with(raw.len(), |_, index| {
            raw.get(index).copied().ok_or(DecodeError::TooShort {
                required: self.required_len(),
                actual: raw.len(),
            })
        })
    }

    fn decode_with<F>(&self, available: usize, byte_at: F) -> Result<StructuredVersion, DecodeError>
    where
        F: Fn(&FieldSpec, usize) -> Result<u8, DecodeError>,
    {
        let required = self.required_len();
        if available < required {
            return Err(DecodeError::TooShort {
                required,
                actual: available,
            });
        }

        let mut values = [0u32; FIELD_COUNT];
        for (slot, spec) in values.iter_mut().zip(self.fields.iter()) {
            let bytes = (spec.offset..spec.end())
                .map(|index| byte_at(spec, index))
                .collect::<Result<Vec<u8>, _>>()?;
            *slot = spec.decode(&bytes)?;
        }

        Ok(StructuredVersion::from_fields(values))
    }

    /// Encode a version into raw hex tokens, the inverse of [`Self::decode`]
    ///
    /// Token positions not covered by any field are filled with `"00"`.
    pub fn encode_raw(&self, version: &StructuredVersion) -> Result<Vec<String>, EncodeError> {
        let bytes = self.encode_bytes(version)?;
        Ok(bytes.iter().map(|b| format!("{b:02X}")).collect())
    }

    /// Encode a version into raw bytes, the inverse of [`Self::decode_bytes`]
    pub fn encode_bytes(&self, version: &StructuredVersion) -> Result<Vec<u8>, EncodeError> {
        let mut out = vec![0u8; self.required_len()];
        for (spec, value) in self.fields.iter().zip(version.fields()) {
            let encoded = spec.encode(value)?;
            if let Some(dst) = out.get_mut(spec.offset..spec.end()) {
                dst.copy_from_slice(&encoded);
            }
        }
        Ok(out)
    }

    /// Canonical display string for `version` under this layout
    pub fn display(&self, version: &StructuredVersion) -> String {
        let values = version.fields();
        let mut out = format!("{}.{}.0x", values[0], values[1]);
        for (spec, value) in self.fields.iter().zip(values).skip(2) {
            out.push_str(&format!("{value:0width$X}", width = spec.hex_width()));
        }
        out
    }

    /// Parse the canonical display string produced by [`Self::display`]
    pub fn parse_display(&self, s: &str) -> Result<StructuredVersion, ParseVersionError> {
        let malformed = || ParseVersionError::Malformed(s.to_string());

        let (major, rest) = s.trim().split_once('.').ok_or_else(malformed)?;
        let (minor, hex) = rest.split_once('.').ok_or_else(malformed)?;
        let hex = hex
            .strip_prefix("0x")
            .or_else(|| hex.strip_prefix("0X"))
            .ok_or_else(malformed)?;

        let hex_specs = self.fields.iter().skip(2);
        let expected_len: usize = hex_specs.clone().map(FieldSpec::hex_width).sum();
        if hex.len() != expected_len || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(malformed());
        }

        let mut values = [0u32; FIELD_COUNT];
        let decimal = [major, minor];
        for ((slot, spec), text) in values.iter_mut().zip(self.fields.iter()).zip(decimal) {
            if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed());
            }
            *slot = text.parse::<u32>().ok().ok_or_else(malformed)?;
            check_range(spec, *slot)?;
        }

        let mut cursor = 0usize;
        for (slot, spec) in values.iter_mut().skip(2).zip(hex_specs) {
            let end = cursor.saturating_add(spec.hex_width());
            let digits = hex.get(cursor..end).ok_or_else(malformed)?;
            *slot = u32::from_str_radix(digits, 16).ok().ok_or_else(malformed)?;
            check_range(spec, *slot)?;
            cursor = end;
        }

        Ok(StructuredVersion::from_fields(values))
    }
}

impl Default for VersionLayout {
    fn default() -> Self {
        Self::PSU
    }
}

fn check_range(spec: &FieldSpec, value: u32) -> Result<(), ParseVersionError> {
    let max = spec.max_value();
    if value > max {
        return Err(ParseVersionError::OutOfRange {
            field: spec.name,
            value,
            max,
        });
    }
    Ok(())
}

/// Parse one hex byte token: optional `0x` prefix, one or two hex digits
fn parse_token(token: &str) -> Option<u8> {
    let trimmed = token.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() || digits.len() > 2 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(digits, 16).ok()
}

/// A decoded firmware version
///
/// Field order is comparison precedence order, so the derived `Ord` is the
/// lexicographic order used by [`crate::compare::compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StructuredVersion {
    /// Major version
    pub major: u32,
    /// Minor version
    pub minor: u32,
    /// Master beta counter
    pub master_beta: u32,
    /// First subsystem beta counter
    pub subsystem_beta_a: u32,
    /// Second subsystem beta counter
    pub subsystem_beta_b: u32,
    /// Third subsystem beta counter
    pub subsystem_beta_c: u32,
}

impl StructuredVersion {
    /// Create a version from its six fields in precedence order
    pub const fn new(
        major: u32,
        minor: u32,
        master_beta: u32,
        subsystem_beta_a: u32,
        subsystem_beta_b: u32,
        subsystem_beta_c: u32,
    ) -> Self {
        Self {
            major,
            minor,
            master_beta,
            subsystem_beta_a,
            subsystem_beta_b,
            subsystem_beta_c,
        }
    }

    /// Build from a field array in precedence order
    pub const fn from_fields(f: [u32; FIELD_COUNT]) -> Self {
        Self::new(f[0], f[1], f[2], f[3], f[4], f[5])
    }

    /// Field values in precedence order
    pub const fn fields(&self) -> [u32; FIELD_COUNT] {
        [
            self.major,
            self.minor,
            self.master_beta,
            self.subsystem_beta_a,
            self.subsystem_beta_b,
            self.subsystem_beta_c,
        ]
    }

    /// Decode with the PSU layout
    pub fn decode<T: AsRef<str>>(raw: &[T]) -> Result<Self, DecodeError> {
        VersionLayout::PSU.decode(raw)
    }
}

impl fmt::Display for StructuredVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&VersionLayout::PSU.display(self))
    }
}

impl FromStr for StructuredVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionLayout::PSU.parse_display(s)
    }
}

impl TryFrom<String> for StructuredVersion {
    type Error = ParseVersionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StructuredVersion> for String {
    fn from(version: StructuredVersion) -> Self {
        version.to_string()
    }
}
