//! Wire models for the EaaS components API.

use serde::{Deserialize, Serialize};

/// Request to start a machine component for an environment with the
/// given drives attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineComponentRequest {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub environment: String,
    pub drives: Vec<Drive>,
    pub archive: String,
}

impl MachineComponentRequest {
    pub fn new(environment: impl Into<String>, drives: Vec<Drive>) -> Self {
        Self {
            kind: "machine",
            environment: environment.into(),
            drives,
            archive: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Drive {
    pub id: String,
    pub data: ObjectDataSource,
    pub bootable: bool,
}

impl Drive {
    /// A non-bootable drive backed by an object from the object archive.
    pub fn object(drive_id: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            id: drive_id.into(),
            data: ObjectDataSource::new(object_id),
            bootable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectDataSource {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub archive: String,
}

impl ObjectDataSource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            kind: "object",
            id: id.into(),
            archive: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovableMedia {
    pub id: String,
    pub archive: Option<String>,
    pub drive_index: Option<String>,
}

/// Response returned after starting a machine component.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineComponentResponse {
    pub id: String,
    pub drive_id: Option<String>,
    #[serde(default)]
    pub removable_media_list: Vec<RemovableMedia>,
}

/// A host device available for passthrough, with the commands that
/// attach it to and detach it from the guest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub id_vendor: i32,
    #[serde(default)]
    pub id_device: i32,
    pub connect_command: String,
    pub disconnect_command: String,
    pub device_type: String,
}

impl DeviceInfo {
    /// Keyboards and mice follow the active display.
    pub fn is_input_device(&self) -> bool {
        matches!(self.device_type.as_str(), "keyboard" | "mouse")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_request_serializes_drive_mapping() {
        let request = MachineComponentRequest::new("env-1", vec![Drive::object("disk", "pkg-9")]);
        let json = serde_json::to_value(&request).expect("serialization should succeed");

        assert_eq!(json["type"], "machine");
        assert_eq!(json["environment"], "env-1");
        assert_eq!(json["archive"], "default");
        assert_eq!(json["drives"][0]["id"], "disk");
        assert_eq!(json["drives"][0]["bootable"], false);
        assert_eq!(json["drives"][0]["data"]["type"], "object");
        assert_eq!(json["drives"][0]["data"]["id"], "pkg-9");
    }

    #[test]
    fn device_info_parses_camel_case() {
        let json = serde_json::json!([{
            "vendor": "Logitech",
            "device": "USB Receiver",
            "idVendor": 1133,
            "idDevice": 50475,
            "connectCommand": "device_add usb-host,vendorid=0x046d",
            "disconnectCommand": "device_del kbd0",
            "deviceType": "keyboard"
        }]);
        let devices: Vec<DeviceInfo> = serde_json::from_value(json).expect("should parse");

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id_vendor, 1133);
        assert_eq!(devices[0].disconnect_command, "device_del kbd0");
        assert!(devices[0].is_input_device());
    }

    #[test]
    fn storage_devices_are_not_input_devices() {
        let device = DeviceInfo {
            vendor: String::new(),
            device: String::new(),
            id_vendor: 0,
            id_device: 0,
            connect_command: "c".into(),
            disconnect_command: "d".into(),
            device_type: "storage".into(),
        };
        assert!(!device.is_input_device());
    }

    #[test]
    fn component_response_tolerates_missing_media() {
        let response: MachineComponentResponse =
            serde_json::from_str(r#"{"id":"comp-1","driveId":null}"#).expect("should parse");
        assert_eq!(response.id, "comp-1");
        assert!(response.removable_media_list.is_empty());
    }
}
