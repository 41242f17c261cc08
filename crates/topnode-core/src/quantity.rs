//! Kubernetes-style resource quantities
//!
//! Node capacity and container limits arrive either as plain numbers or as
//! quantity strings such as `300Gi`, `500m` or `4`. [`Quantity`] accepts both
//! and exposes the integer view used by the accounting code.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const BINARY_SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
];

const DECIMAL_SUFFIXES: &[(&str, f64)] = &[
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// A resource quantity, stored as its numeric value.
///
/// Memory quotas for GPU sharing are advertised in GiB units by the device
/// plugins, so a quantity of `80` on `aliyun.com/gpu-mem` means 80 GiB. The
/// suffix forms are still honored for clusters that report raw byte values.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd)]
pub struct Quantity(f64);

impl Quantity {
    /// Create a quantity from a numeric value
    pub fn new(value: f64) -> Self {
        Self(value)
    }

    /// Integer value, rounded up like the Kubernetes `Value()` accessor
    pub fn value(&self) -> i64 {
        self.0.ceil() as i64
    }

    /// Raw numeric value
    pub fn as_f64(&self) -> f64 {
        self.0
    }
}

impl From<i32> for Quantity {
    fn from(value: i32) -> Self {
        Self(value as f64)
    }
}

impl From<i64> for Quantity {
    fn from(value: i64) -> Self {
        Self(value as f64)
    }
}

impl From<f64> for Quantity {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl FromStr for Quantity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_quantity("empty quantity"));
        }

        let (number, multiplier) = split_suffix(trimmed);
        let base: f64 = number
            .parse()
            .map_err(|_| Error::invalid_quantity(format!("cannot parse '{}'", s)))?;

        Ok(Self(base * multiplier))
    }
}

fn split_suffix(s: &str) -> (&str, f64) {
    for (suffix, multiplier) in BINARY_SUFFIXES {
        if let Some(number) = s.strip_suffix(suffix) {
            return (number, *multiplier);
        }
    }
    // Exponent notation ("1e3") must not be mistaken for the exa suffix.
    if s.contains(['e', 'E']) && s.parse::<f64>().is_ok() {
        return (s, 1.0);
    }
    for (suffix, multiplier) in DECIMAL_SUFFIXES {
        if let Some(number) = s.strip_suffix(suffix) {
            return (number, *multiplier);
        }
    }
    (s, 1.0)
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if self.0.fract() == 0.0 && self.0.abs() < i64::MAX as f64 {
            serializer.serialize_i64(self.0 as i64)
        } else {
            serializer.serialize_f64(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Quantity(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}
