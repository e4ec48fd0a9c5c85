//! List commands implementation

use crate::connectors;
use serialport::SerialPortType;

/// List all supported connectors
pub fn list_connectors() {
    println!("Supported connectors:");
    println!();
    for c in connectors::available_connectors() {
        println!("  {:<8} {:<32} - {}", c.name, c.usage, c.description);
    }
}

/// List serial ports a radio may be attached to
pub fn list_devices() -> Result<(), Box<dyn std::error::Error>> {
    let ports = serialport::available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }

    println!("{:<24} Description", "Port");
    println!("{}", "-".repeat(60));
    for port in ports {
        println!("{:<24} {}", port.port_name, describe(&port.port_type));
    }
    Ok(())
}

fn describe(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let mut desc = format!("USB {:04x}:{:04x}", usb.vid, usb.pid);
            if let Some(product) = &usb.product {
                desc.push(' ');
                desc.push_str(product);
            }
            if let Some(serial) = &usb.serial_number {
                desc.push_str(&format!(" (serial {})", serial));
            }
            desc
        }
        SerialPortType::PciPort => "PCI".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth".to_string(),
        SerialPortType::Unknown => "Unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    #[test]
    fn test_describe_usb_port() {
        let usb = SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x0483,
            pid: 0x5740,
            serial_number: Some("2052".into()),
            manufacturer: None,
            product: Some("Radio bootloader".into()),
        });
        assert_eq!(
            describe(&usb),
            "USB 0483:5740 Radio bootloader (serial 2052)"
        );
        assert_eq!(describe(&SerialPortType::PciPort), "PCI");
    }
}
