//! Device-topology annotation written onto pods by the device plugin.
//!
//! The annotation is written in a separate API call from the pod itself, so a
//! pod may be observed before it carries one. Absence is not an error here;
//! the worker treats it as "not ready yet".

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use super::{RankTableError, Result};
use crate::types::Pod;

/// Annotation key carrying the pod's [`DeviceInstance`] as JSON.
pub const DEVICE_ANNOTATION: &str = "ascend.kubectl.kubernetes.io/ascend-910-configuration";

/// Annotation key carrying a scheduler-assigned rank index.
pub const RANK_INDEX_ANNOTATION: &str = "hccl/rankIndex";

/// Maximum number of devices a single node can expose.
pub const MAX_DEVICES_PER_NODE: usize = 16;

/// One accelerator device allocated to a pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    pub device_id: String,
    pub device_ip: String,
}

/// The devices allocated to one pod, and the address of the node hosting them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInstance {
    pub pod_name: String,
    /// IP address of the node.
    pub server_id: String,
    pub devices: Vec<DeviceEntry>,
}

impl DeviceInstance {
    /// Reads the device annotation from a pod.
    ///
    /// Returns `Ok(None)` if the pod has no annotation yet.
    pub fn from_pod(pod: &Pod) -> Result<Option<Self>> {
        let Some(raw) = pod.annotation(DEVICE_ANNOTATION) else {
            return Ok(None);
        };
        serde_json::from_str(raw)
            .map(Some)
            .map_err(|source| RankTableError::InvalidAnnotation {
                pod: pod.to_string(),
                source,
            })
    }

    /// Checks the topology before it is folded into a rank table.
    ///
    /// The node address must be an IP, the device count must be within
    /// `1..=MAX_DEVICES_PER_NODE`, and every device needs a non-negative
    /// integer ID and an IP address.
    pub fn validate(&self) -> Result<()> {
        if self.server_id.parse::<IpAddr>().is_err() {
            return Err(RankTableError::InvalidServerIp(self.server_id.clone()));
        }

        let count = self.devices.len();
        if count == 0 || count > MAX_DEVICES_PER_NODE {
            return Err(RankTableError::InvalidDeviceCount {
                count,
                max: MAX_DEVICES_PER_NODE,
            });
        }

        for device in &self.devices {
            if device.device_id.parse::<u32>().is_err() {
                return Err(RankTableError::InvalidDeviceId(device.device_id.clone()));
            }
            if device.device_ip.parse::<IpAddr>().is_err() {
                return Err(RankTableError::InvalidDeviceIp {
                    device_id: device.device_id.clone(),
                    ip: device.device_ip.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Reads the scheduler-assigned rank index from a pod, if any.
pub fn explicit_rank_index(pod: &Pod) -> Result<Option<usize>> {
    let Some(raw) = pod.annotation(RANK_INDEX_ANNOTATION) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<usize>()
        .map(Some)
        .map_err(|_| RankTableError::InvalidRankIndex {
            pod: pod.to_string(),
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{PodBuilder, arb_device_instance, device_instance};
    use proptest::prelude::*;

    #[test]
    fn valid_instance_passes() {
        device_instance("10.0.0.1", 0, 8).validate().unwrap();
    }

    #[test]
    fn server_id_must_be_ip() {
        let mut instance = device_instance("10.0.0.1", 0, 8);
        instance.server_id = "node-a".to_string();
        assert!(matches!(
            instance.validate(),
            Err(RankTableError::InvalidServerIp(ip)) if ip == "node-a"
        ));
    }

    #[test]
    fn device_count_bounds() {
        let empty = DeviceInstance {
            pod_name: "p".to_string(),
            server_id: "10.0.0.1".to_string(),
            devices: Vec::new(),
        };
        assert!(matches!(
            empty.validate(),
            Err(RankTableError::InvalidDeviceCount { count: 0, .. })
        ));

        let too_many = device_instance("10.0.0.1", 0, MAX_DEVICES_PER_NODE + 1);
        assert!(matches!(
            too_many.validate(),
            Err(RankTableError::InvalidDeviceCount { count: 17, max: 16 })
        ));

        device_instance("10.0.0.1", 0, MAX_DEVICES_PER_NODE)
            .validate()
            .unwrap();
    }

    #[test]
    fn device_id_must_be_non_negative_integer() {
        let mut instance = device_instance("10.0.0.1", 0, 2);
        instance.devices[1].device_id = "-1".to_string();
        assert!(matches!(
            instance.validate(),
            Err(RankTableError::InvalidDeviceId(id)) if id == "-1"
        ));
    }

    #[test]
    fn device_ip_must_parse() {
        let mut instance = device_instance("10.0.0.1", 0, 2);
        instance.devices[0].device_ip = "192.168.30".to_string();
        assert!(matches!(
            instance.validate(),
            Err(RankTableError::InvalidDeviceIp { .. })
        ));
    }

    #[test]
    fn from_pod_without_annotation_is_none() {
        let pod = PodBuilder::new("p0", "job-uid").devices(8).build();
        assert!(DeviceInstance::from_pod(&pod).unwrap().is_none());
    }

    #[test]
    fn from_pod_reads_annotation() {
        let instance = device_instance("10.0.0.1", 0, 8);
        let pod = PodBuilder::new("p0", "job-uid")
            .devices(8)
            .instance(&instance)
            .build();
        assert_eq!(DeviceInstance::from_pod(&pod).unwrap(), Some(instance));
    }

    #[test]
    fn from_pod_malformed_annotation_is_error() {
        let pod = PodBuilder::new("p0", "job-uid")
            .annotation(DEVICE_ANNOTATION, "{not json")
            .build();
        assert!(matches!(
            DeviceInstance::from_pod(&pod),
            Err(RankTableError::InvalidAnnotation { .. })
        ));
    }

    #[test]
    fn explicit_rank_index_parsing() {
        let pod = PodBuilder::new("p0", "job-uid").build();
        assert_eq!(explicit_rank_index(&pod).unwrap(), None);

        let pod = PodBuilder::new("p0", "job-uid")
            .annotation(RANK_INDEX_ANNOTATION, " 3 ")
            .build();
        assert_eq!(explicit_rank_index(&pod).unwrap(), Some(3));

        let pod = PodBuilder::new("p0", "job-uid")
            .annotation(RANK_INDEX_ANNOTATION, "three")
            .build();
        assert!(matches!(
            explicit_rank_index(&pod),
            Err(RankTableError::InvalidRankIndex { .. })
        ));
    }

    proptest! {
        #[test]
        fn generated_instances_validate_and_survive_annotation(instance in arb_device_instance()) {
            prop_assert!(instance.validate().is_ok());
            let pod = PodBuilder::new(&instance.pod_name, "job-uid").instance(&instance).build();
            prop_assert_eq!(DeviceInstance::from_pod(&pod).unwrap(), Some(instance));
        }
    }
}
