//! Dense HyperLogLog sketches carried as opaque aggregate leaves.
//!
//! Datanodes build the sketches; the broker only pairs and unions them.
//! On the wire a sketch is a base64 string framing one precision byte
//! followed by the `2^precision` registers.

use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::{self, Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};

const MIN_PRECISION: u8 = 4;
const MAX_PRECISION: u8 = 18;

/// A dense HyperLogLog sketch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HllSketch {
    precision: u8,
    registers: Vec<u8>,
}

impl HllSketch {
    /// An empty sketch at the given precision (clamped to [4, 18]).
    pub fn new(precision: u8) -> Self {
        let precision = precision.clamp(MIN_PRECISION, MAX_PRECISION);
        Self {
            precision,
            registers: vec![0; 1 << precision],
        }
    }

    /// Rebuild a sketch from its register array.
    pub fn from_registers(precision: u8, registers: Vec<u8>) -> Result<Self> {
        if !(MIN_PRECISION..=MAX_PRECISION).contains(&precision) {
            return Err(Error::Serialization(format!(
                "hll precision {precision} out of range [{MIN_PRECISION}, {MAX_PRECISION}]"
            )));
        }
        if registers.len() != 1 << precision {
            return Err(Error::Serialization(format!(
                "hll register count {} does not match precision {precision}",
                registers.len()
            )));
        }
        Ok(Self {
            precision,
            registers,
        })
    }

    /// Union another sketch into this one (elementwise register max).
    pub fn merge(&mut self, other: &HllSketch) -> Result<()> {
        if self.precision != other.precision {
            return Err(Error::ShapeMismatch(format!(
                "between hll sketches of precision {} and {}",
                self.precision, other.precision
            )));
        }
        for (r, o) in self.registers.iter_mut().zip(&other.registers) {
            *r = (*r).max(*o);
        }
        Ok(())
    }

    /// Estimate the cardinality of the union.
    pub fn estimate(&self) -> u64 {
        let m = self.registers.len() as f64;

        let sum: f64 = self
            .registers
            .iter()
            .map(|&r| 2.0_f64.powi(-(r as i32)))
            .sum();

        let alpha = match self.precision {
            4 => 0.673,
            5 => 0.697,
            6 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m),
        };

        let raw_estimate = alpha * m * m / sum;

        if raw_estimate <= 2.5 * m {
            // small range correction
            let zeros = self.registers.iter().filter(|&&r| r == 0).count();
            if zeros > 0 {
                (m * (m / zeros as f64).ln()) as u64
            } else {
                raw_estimate as u64
            }
        } else if raw_estimate > (1u64 << 32) as f64 / 30.0 {
            // large range correction
            let two_32 = (1u64 << 32) as f64;
            (-two_32 * (1.0 - raw_estimate / two_32).ln()) as u64
        } else {
            raw_estimate as u64
        }
    }

    pub fn to_base64(&self) -> String {
        let mut framed = Vec::with_capacity(1 + self.registers.len());
        framed.push(self.precision);
        framed.extend_from_slice(&self.registers);
        BASE64.encode(framed)
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let framed = BASE64
            .decode(encoded)
            .map_err(|e| Error::Serialization(format!("invalid hll sketch encoding: {e}")))?;
        let (&precision, registers) = framed
            .split_first()
            .ok_or_else(|| Error::Serialization("empty hll sketch frame".to_string()))?;
        Self::from_registers(precision, registers.to_vec())
    }

    #[cfg(test)]
    pub(crate) fn with_register(mut self, index: usize, value: u8) -> Self {
        self.registers[index] = value;
        self
    }
}

impl Serialize for HllSketch {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for HllSketch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        HllSketch::from_base64(&encoded).map_err(de::Error::custom)
    }
}
