//! Topology descriptor decoding
//!
//! A topology descriptor carries three JSON documents: the device health
//! map under `devices`, the link class matrix under `linkType` and the
//! bandwidth matrix under `bandwith` (the key is spelled that way by the
//! component that publishes it).

use serde::Serialize;
use std::collections::BTreeMap;
use topnode_core::TopologyDescriptor;
use tracing::{debug, warn};

pub const DEVICES_FIELD: &str = "devices";
pub const LINK_TYPE_FIELD: &str = "linkType";
pub const BANDWIDTH_FIELD: &str = "bandwith";

const HEALTHY: &str = "Healthy";

/// Link class and bandwidth between every pair of devices.
///
/// Both arrays are square with one row per device, or empty when the
/// descriptor omits them or their shape does not match the device set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyMatrix {
    #[serde(rename = "linkMatrix")]
    pub link_types: Vec<Vec<String>>,
    #[serde(rename = "bandwidthMatrix")]
    pub bandwidths: Vec<Vec<f64>>,
}

impl TopologyMatrix {
    pub fn is_empty(&self) -> bool {
        self.link_types.is_empty() && self.bandwidths.is_empty()
    }

    /// Decode both matrices, dropping any whose shape is not `device_count` square
    pub fn load(descriptor: &TopologyDescriptor, device_count: usize) -> Self {
        let link_types = decode_square::<String>(descriptor, LINK_TYPE_FIELD, device_count);
        let bandwidths = decode_square::<f64>(descriptor, BANDWIDTH_FIELD, device_count);
        Self {
            link_types,
            bandwidths,
        }
    }
}

fn decode_square<T>(descriptor: &TopologyDescriptor, field: &str, size: usize) -> Vec<Vec<T>>
where
    T: serde::de::DeserializeOwned,
{
    let Some(raw) = descriptor.field(field) else {
        return Vec::new();
    };
    let matrix: Vec<Vec<T>> = match serde_json::from_str(raw) {
        Ok(m) => m,
        Err(e) => {
            debug!(
                "Ignoring malformed {} in topology descriptor {}: {}",
                field, descriptor.name, e
            );
            return Vec::new();
        }
    };
    if matrix.len() != size || matrix.iter().any(|row| row.len() != size) {
        warn!(
            "Dropping {} of topology descriptor {}: expected {}x{} matrix",
            field, descriptor.name, size, size
        );
        return Vec::new();
    }
    matrix
}

/// Device ids and their health flags, ordered by device index
pub fn load_device_health(descriptor: &TopologyDescriptor) -> Vec<(String, bool)> {
    let Some(raw) = descriptor.field(DEVICES_FIELD) else {
        return Vec::new();
    };
    let devices: BTreeMap<String, String> = match serde_json::from_str(raw) {
        Ok(d) => d,
        Err(e) => {
            debug!(
                "Ignoring malformed device map in topology descriptor {}: {}",
                descriptor.name, e
            );
            return Vec::new();
        }
    };
    let mut devices: Vec<(String, bool)> = devices
        .into_iter()
        .map(|(id, health)| {
            let healthy = health == HEALTHY;
            (id, healthy)
        })
        .collect();
    devices.sort_by(|a, b| crate::nodes::compare_device_ids(&a.0, &b.0));
    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> TopologyDescriptor {
        TopologyDescriptor::new("topo", "kube-system")
            .with_data(
                DEVICES_FIELD,
                r#"{"0":"Healthy","1":"Healthy","10":"Healthy","2":"Unhealthy"}"#,
            )
    }

    #[test]
    fn test_device_health_ordered_numerically() {
        let devices = load_device_health(&descriptor());
        let ids: Vec<&str> = devices.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1", "2", "10"]);
        assert!(!devices[2].1);
        assert!(devices[3].1);
    }

    #[test]
    fn test_matrices_decode_independently() {
        let descriptor = TopologyDescriptor::new("topo", "kube-system")
            .with_data(LINK_TYPE_FIELD, r#"[["X","NV1"],["NV1","X"]]"#)
            .with_data(BANDWIDTH_FIELD, r#"[[0, 24.5]]"#);
        let matrix = TopologyMatrix::load(&descriptor, 2);
        assert_eq!(matrix.link_types[0][1], "NV1");
        assert!(matrix.bandwidths.is_empty());
        assert!(!matrix.is_empty());
    }

    #[test]
    fn test_asymmetric_matrix_kept() {
        let descriptor = TopologyDescriptor::new("topo", "kube-system")
            .with_data(BANDWIDTH_FIELD, r#"[[0, 20],[10, 0]]"#);
        let matrix = TopologyMatrix::load(&descriptor, 2);
        assert_eq!(matrix.bandwidths[0][1], 20.0);
        assert_eq!(matrix.bandwidths[1][0], 10.0);
    }

    #[test]
    fn test_missing_or_malformed_fields_are_empty() {
        let empty = TopologyDescriptor::new("topo", "kube-system");
        assert!(TopologyMatrix::load(&empty, 4).is_empty());
        assert!(load_device_health(&empty).is_empty());

        let broken = TopologyDescriptor::new("topo", "kube-system")
            .with_data(DEVICES_FIELD, "{")
            .with_data(LINK_TYPE_FIELD, "[[1]]");
        assert!(load_device_health(&broken).is_empty());
        assert!(TopologyMatrix::load(&broken, 1).link_types.is_empty());
    }
}
