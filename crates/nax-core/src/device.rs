// ── Device identity ──

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Path of the identity subtree in the state document.
pub const DEVICE_INFO_PATH: &str = "Device.DeviceInfo";

/// Identity fields the device publishes under `Device.DeviceInfo`.
/// Any of them may be absent until the first full state frame arrives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceInfo {
    pub name: Option<String>,
    pub mac_address: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    #[serde(rename = "DeviceVersion")]
    pub firmware_version: Option<String>,
    pub serial_number: Option<String>,
}

impl DeviceInfo {
    /// Read identity out of a `Device.DeviceInfo` subtree. Fields with an
    /// unexpected type are treated as absent.
    pub fn from_value(value: &Value) -> Self {
        let field = |key: &str| value.get(key).and_then(Value::as_str).map(String::from);
        Self {
            name: field("Name"),
            mac_address: field("MacAddress"),
            manufacturer: field("Manufacturer"),
            model: field("Model"),
            firmware_version: field("DeviceVersion"),
            serial_number: field("SerialNumber"),
        }
    }
}
