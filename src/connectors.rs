//! Connector registration and dispatch
//!
//! A device id names both the connector and the device. Ids starting with
//! `dummy` go to the emulated radio when that feature is enabled; everything
//! else is a serial or TCP connection string.

use async_trait::async_trait;
use buddyflash_core::{DeviceConnector, DeviceProtocol, Result};
use buddyflash_serial::SerialConnector;

/// Information about a connector
pub struct ConnectorInfo {
    /// Primary name
    pub name: &'static str,
    /// Device id forms it accepts
    pub usage: &'static str,
    /// Short description
    pub description: &'static str,
}

/// Get information about all available connectors (enabled at compile time)
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_connectors() -> Vec<ConnectorInfo> {
    let mut connectors = Vec::new();

    connectors.push(ConnectorInfo {
        name: "serial",
        usage: "dev=<port>[:<baud>] or <port>",
        description: "Radio bootloader on a USB/UART serial port",
    });

    connectors.push(ConnectorInfo {
        name: "tcp",
        usage: "ip=<host>:<port>",
        description: "Radio bootloader behind a serial-to-TCP bridge",
    });

    #[cfg(feature = "dummy")]
    connectors.push(ConnectorInfo {
        name: "dummy",
        usage: "dummy[:<name>]",
        description: "In-memory emulated radio for testing",
    });

    connectors
}

/// Short list of device id forms for CLI help
pub fn device_forms_short() -> String {
    let forms: Vec<&str> = available_connectors().iter().map(|c| c.usage).collect();
    forms.join(", ")
}

/// Routes device ids to the connector that owns them
#[derive(Clone, Default)]
pub struct Connectors {
    serial: SerialConnector,
    #[cfg(feature = "dummy")]
    dummy: buddyflash_dummy::DummyConnector,
}

impl Connectors {
    /// Create a router around a configured serial connector
    pub fn new(serial: SerialConnector) -> Self {
        Self {
            serial,
            #[cfg(feature = "dummy")]
            dummy: buddyflash_dummy::DummyConnector::default(),
        }
    }
}

/// Whether `device_id` names an emulated radio
#[cfg(feature = "dummy")]
fn is_dummy(device_id: &str) -> bool {
    device_id == "dummy" || device_id.starts_with("dummy:")
}

#[async_trait]
impl DeviceConnector for Connectors {
    fn device_key(&self, device_id: &str) -> String {
        #[cfg(feature = "dummy")]
        if is_dummy(device_id) {
            return self.dummy.device_key(device_id);
        }

        self.serial.device_key(device_id)
    }

    async fn connect(&self, device_id: &str) -> Result<Box<dyn DeviceProtocol>> {
        #[cfg(feature = "dummy")]
        if is_dummy(device_id) {
            return self.dummy.connect(device_id).await;
        }

        self.serial.connect(device_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buddyflash_core::ErrorKind;

    #[test]
    fn test_serial_always_listed() {
        let names: Vec<_> = available_connectors().iter().map(|c| c.name).collect();
        assert!(names.contains(&"serial"));
        assert!(names.contains(&"tcp"));
        assert!(device_forms_short().contains("dev=<port>"));
    }

    #[cfg(feature = "dummy")]
    #[tokio::test]
    async fn test_dummy_ids_route_to_emulator() {
        let connectors = Connectors::default();
        let mut driver = connectors.connect("dummy:left").await.unwrap();
        let info = driver.handshake().await.unwrap();
        assert_eq!(info.name, "dummy-radio");
        driver.close().await;

        assert!(!is_dummy("dummyport"));
        assert!(is_dummy("dummy"));
    }

    #[test]
    fn test_serial_aliases_share_a_key() {
        let connectors = Connectors::default();
        assert_eq!(
            connectors.device_key("dev=/dev/ttyUSB0:57600"),
            connectors.device_key("/dev/ttyUSB0")
        );
    }

    #[tokio::test]
    async fn test_other_ids_route_to_serial() {
        let connectors = Connectors::default();
        let err = connectors
            .connect("dev=/dev/buddyflash-no-such-port")
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
