//! Capabilities seeded per device type at registration

use crate::capability::{Capability, ParameterSpec};

fn power(description: &str) -> Capability {
    Capability::new("power", description)
        .writable(true)
        .with_operations(["on", "off"])
        .with_parameter("power", ParameterSpec::String)
}

/// Default capabilities for a device type; unknown types get none
pub fn capabilities_for_type(device_type: &str) -> Vec<Capability> {
    match device_type {
        "bulb" => vec![
            power("Turn the bulb on or off"),
            Capability::new("brightness", "Adjust brightness (0-100)")
                .writable(true)
                .with_operations(["set"])
                .with_parameter("level", ParameterSpec::integer(0, 100)),
            Capability::new("color", "Change bulb color using RGB")
                .writable(true)
                .with_operations(["set"])
                .with_parameter("rgb", ParameterSpec::bounded_array(3, 0, 255)),
        ],
        "switch" | "smart_plug" => vec![power("Turn the device on or off")],
        _ => Vec::new(),
    }
}
