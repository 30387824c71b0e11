//! Identity record for one discovered robot.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capability map as reported by the robot: capability name to an optional
/// integer level. Older firmware omits the value entirely.
pub type Capabilities = Option<HashMap<String, Option<i64>>>;

/// Validation failures for the broadcast `hostname` field.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostnameError {
    /// The hostname is not in `<Model>-<blid>` form.
    #[error("hostname does not contain a single dash: {0}")]
    MalformedHostname(String),

    /// The part after the dash is empty.
    #[error("empty blid in hostname: {0}")]
    EmptyBlid(String),

    /// The model prefix is not a known robot family.
    #[error("unsupported model in hostname: {0}")]
    UnsupportedModel(String),
}

/// Everything a robot reveals about itself in its discovery response.
///
/// Identity is the MAC address alone: two descriptors with the same `mac`
/// are the same robot, even if the DHCP lease moved it to another IP in the
/// meantime. Equality and hashing follow that rule, which is what lets
/// [`Discovery::query_all`](crate::Discovery::query_all) deduplicate the
/// responses to repeated broadcasts with a plain `HashSet`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Broadcast hostname, `<Model>-<blid>`.
    pub hostname: String,
    /// Firmware version string.
    #[serde(rename = "sw")]
    pub firmware: String,
    pub ip: String,
    pub mac: String,
    /// User-assigned robot name.
    #[serde(rename = "robotname")]
    pub robot_name: String,
    pub sku: String,
    #[serde(rename = "cap", default)]
    pub capabilities: Capabilities,
    /// Filled in after a successful credential exchange; never sent by the
    /// robot itself.
    #[serde(default)]
    pub password: Option<String>,
}

impl DeviceInfo {
    /// The robot login identifier: the hostname part after the first dash.
    /// Doubles as the MQTT username.
    pub fn blid(&self) -> &str {
        self.hostname
            .split_once('-')
            .map(|(_, blid)| blid)
            .unwrap_or("")
    }
}

impl PartialEq for DeviceInfo {
    fn eq(&self, other: &Self) -> bool {
        self.mac == other.mac
    }
}

impl Eq for DeviceInfo {}

impl Hash for DeviceInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.mac.hash(state);
    }
}

/// Checks that a broadcast hostname names a robot family we understand.
///
/// Accepted form is exactly `<Model>-<blid>` with a non-empty blid and a
/// model prefix of `roomba` or `irobot` in any case.
pub fn validate_hostname(value: &str) -> Result<(), HostnameError> {
    let Some((model, blid)) = value.split_once('-') else {
        return Err(HostnameError::MalformedHostname(value.to_string()));
    };
    if blid.contains('-') {
        return Err(HostnameError::MalformedHostname(value.to_string()));
    }
    if blid.is_empty() {
        return Err(HostnameError::EmptyBlid(value.to_string()));
    }
    if !model.eq_ignore_ascii_case("roomba") && !model.eq_ignore_ascii_case("irobot") {
        return Err(HostnameError::UnsupportedModel(value.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn info(hostname: &str, ip: &str, mac: &str) -> DeviceInfo {
        DeviceInfo {
            hostname: hostname.to_string(),
            firmware: "1.2.3".to_string(),
            ip: ip.to_string(),
            mac: mac.to_string(),
            robot_name: "test".to_string(),
            sku: "123".to_string(),
            capabilities: None,
            password: None,
        }
    }

    #[test]
    fn rejects_hostname_without_dash() {
        assert_eq!(
            validate_hostname("test"),
            Err(HostnameError::MalformedHostname("test".to_string()))
        );
    }

    #[test]
    fn rejects_empty_blid() {
        assert_eq!(
            validate_hostname("iRobot-"),
            Err(HostnameError::EmptyBlid("iRobot-".to_string()))
        );
    }

    #[test]
    fn rejects_unknown_model_prefix() {
        assert_eq!(
            validate_hostname("Dustbuster-XYZ"),
            Err(HostnameError::UnsupportedModel("Dustbuster-XYZ".to_string()))
        );
    }

    #[test]
    fn accepts_known_model_prefixes() {
        for hostname in ["Roomba-XYZ", "iRobot-XYZ", "roomba-XYZ", "IROBOT-XYZ"] {
            assert_eq!(validate_hostname(hostname), Ok(()));
        }
    }

    #[test]
    fn blid_is_the_part_after_the_dash() {
        assert_eq!(info("Roomba-XYZ", "10.0.0.2", "aa").blid(), "XYZ");
        assert_eq!(info("iRobot-XYZ", "10.0.0.2", "aa").blid(), "XYZ");
    }

    #[test]
    fn identity_is_mac_only() {
        let a = info("Roomba-AAA", "10.0.0.2", "aa:bb:cc:dd:ee:ff");
        let b = info("Roomba-BBB", "10.0.0.9", "aa:bb:cc:dd:ee:ff");
        let c = info("Roomba-AAA", "10.0.0.2", "ff:ee:dd:cc:bb:aa");

        assert_eq!(a, b);
        assert_ne!(a, c);

        let mut set = HashSet::new();
        set.insert(a);
        set.insert(b);
        set.insert(c);
        assert_eq!(set.len(), 2);
    }
}
