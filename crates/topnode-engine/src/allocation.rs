//! Device allocation decoding
//!
//! GPU schedulers record where an instance landed as an annotation holding a
//! JSON map of device id to amount. Two shapes are in circulation: a flat
//! `{"0": 10}` map and a per-container `{"0": {"1": 10}}` map keyed by
//! container index. Both decode into a single per-device [`DeviceAllocation`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use topnode_core::Result;
use tracing::debug;

/// Amount allocated per device id. Units depend on the node variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceAllocation(BTreeMap<String, f64>);

#[derive(Deserialize)]
#[serde(untagged)]
enum Encoded {
    Flat(BTreeMap<String, f64>),
    PerContainer(BTreeMap<String, BTreeMap<String, f64>>),
}

impl DeviceAllocation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-device allocation
    pub fn single(device: impl Into<String>, amount: f64) -> Self {
        let mut allocation = Self::new();
        allocation.add(device, amount);
        allocation
    }

    pub fn add(&mut self, device: impl Into<String>, amount: f64) {
        *self.0.entry(device.into()).or_insert(0.0) += amount;
    }

    pub fn get(&self, device: &str) -> Option<f64> {
        self.0.get(device).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Encode as the flat JSON form
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    /// Decode either the flat or the per-container JSON form
    pub fn decode(raw: &str) -> Result<Self> {
        let encoded: Encoded = serde_json::from_str(raw)?;
        Ok(match encoded {
            Encoded::Flat(map) => Self(map),
            Encoded::PerContainer(containers) => {
                let mut allocation = Self::new();
                for devices in containers.into_values() {
                    for (device, amount) in devices {
                        allocation.add(device, amount);
                    }
                }
                allocation
            }
        })
    }

    /// Decode, treating missing or malformed input as an empty allocation
    pub fn decode_or_default(raw: Option<&str>) -> Self {
        match raw {
            None => Self::new(),
            Some(raw) if raw.trim().is_empty() => Self::new(),
            Some(raw) => Self::decode(raw).unwrap_or_else(|e| {
                debug!("Ignoring malformed device allocation {:?}: {}", raw, e);
                Self::new()
            }),
        }
    }
}

impl FromIterator<(String, f64)> for DeviceAllocation {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        let mut allocation = Self::new();
        for (device, amount) in iter {
            allocation.add(device, amount);
        }
        allocation
    }
}

/// Split a comma-separated device list, dropping empty items
pub fn parse_device_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_flat() {
        let allocation = DeviceAllocation::decode(r#"{"0": 10, "1": 2.5}"#).unwrap();
        assert_eq!(allocation.get("0"), Some(10.0));
        assert_eq!(allocation.get("1"), Some(2.5));
        assert_eq!(allocation.total(), 12.5);
    }

    #[test]
    fn test_decode_per_container_sums_devices() {
        let allocation =
            DeviceAllocation::decode(r#"{"0": {"0": 2, "1": 2}, "1": {"1": 3}}"#).unwrap();
        assert_eq!(allocation.get("0"), Some(2.0));
        assert_eq!(allocation.get("1"), Some(5.0));
        assert_eq!(allocation.len(), 2);
    }

    #[test]
    fn test_encode_then_decode_is_identity() {
        let original: DeviceAllocation = vec![
            ("0".to_string(), 10.0),
            ("3".to_string(), 4.0),
            ("12".to_string(), 0.5),
        ]
        .into_iter()
        .collect();
        let decoded = DeviceAllocation::decode(&original.encode().unwrap()).unwrap();
        assert_eq!(decoded, original);

        let empty = DeviceAllocation::new();
        assert_eq!(DeviceAllocation::decode(&empty.encode().unwrap()).unwrap(), empty);
    }

    #[test]
    fn test_malformed_is_empty() {
        assert!(DeviceAllocation::decode("not json").is_err());
        assert!(DeviceAllocation::decode_or_default(Some("not json")).is_empty());
        assert!(DeviceAllocation::decode_or_default(Some(r#"["0"]"#)).is_empty());
        assert!(DeviceAllocation::decode_or_default(Some("  ")).is_empty());
        assert!(DeviceAllocation::decode_or_default(None).is_empty());
    }

    #[test]
    fn test_parse_device_list() {
        assert_eq!(parse_device_list(Some("0, 2,,3")), vec!["0", "2", "3"]);
        assert!(parse_device_list(Some("")).is_empty());
        assert!(parse_device_list(None).is_empty());
    }
}
