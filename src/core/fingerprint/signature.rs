//! Perceptual signature type and Hamming comparison.

use crate::error::FingerprintError;
use serde::{Deserialize, Serialize};

/// A fixed-length binary signature derived from a downsampled image region.
///
/// Bits are stored packed, most-significant bit first, with an explicit bit
/// count so grids that are not a multiple of 8 bits still compare correctly.
/// The canonical text form is a string of `'0'`/`'1'` characters in
/// row-major grid order; that form is what the repository persists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    bytes: Vec<u8>,
    bit_len: u32,
}

impl Signature {
    /// Build a signature from an ordered sequence of bits.
    pub fn from_bits<I>(bits: I) -> Self
    where
        I: IntoIterator<Item = bool>,
    {
        let mut bytes = Vec::new();
        let mut current_byte: u8 = 0;
        let mut bit_position = 0;
        let mut bit_len = 0u32;

        for bit in bits {
            if bit {
                current_byte |= 1 << (7 - bit_position);
            }
            bit_position += 1;
            bit_len += 1;

            if bit_position == 8 {
                bytes.push(current_byte);
                current_byte = 0;
                bit_position = 0;
            }
        }

        if bit_position > 0 {
            bytes.push(current_byte);
        }

        Self { bytes, bit_len }
    }

    /// Parse the canonical `'0'`/`'1'` text form.
    pub fn from_bit_string(s: &str) -> Result<Self, FingerprintError> {
        let mut bits = Vec::with_capacity(s.len());
        for (index, c) in s.chars().enumerate() {
            match c {
                '0' => bits.push(false),
                '1' => bits.push(true),
                other => {
                    return Err(FingerprintError::InvalidEncoding(format!(
                        "unexpected character {other:?} at position {index}"
                    )))
                }
            }
        }
        Ok(Self::from_bits(bits))
    }

    /// Render the canonical `'0'`/`'1'` text form.
    pub fn to_bit_string(&self) -> String {
        (0..self.bit_len)
            .map(|i| if self.bit(i) { '1' } else { '0' })
            .collect()
    }

    /// Get the signature as a hexadecimal string
    pub fn to_hex(&self) -> String {
        self.bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Total number of bits in this signature
    pub fn bit_len(&self) -> u32 {
        self.bit_len
    }

    fn bit(&self, index: u32) -> bool {
        let byte = self.bytes[(index / 8) as usize];
        byte & (1 << (7 - (index % 8))) != 0
    }

    /// Compute the Hamming distance to another signature.
    ///
    /// Returns the number of bit positions that differ. Signatures computed
    /// with different grid sizes are not comparable.
    pub fn distance(&self, other: &Self) -> Result<u32, FingerprintError> {
        if self.bit_len != other.bit_len {
            return Err(FingerprintError::LengthMismatch {
                left: self.bit_len,
                right: other.bit_len,
            });
        }

        // Trailing pad bits are always zero, so whole-byte XOR is exact.
        Ok(self
            .bytes
            .iter()
            .zip(other.bytes.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum())
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_bit_string())
    }
}
