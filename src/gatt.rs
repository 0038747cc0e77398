use std::collections::HashMap;
use std::sync::LazyLock;

use btleplug::api::bleuuid::uuid_from_u16;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};
use uuid::Uuid;

/// Standard GATT endpoints used by fitness bands.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display)]
pub enum GattEndpoint {
    /// Heart Rate service (`0x180D`).
    #[strum(to_string = "heart_rate_service")]
    HeartRateService,
    /// Heart Rate Measurement characteristic (`0x2A37`).
    #[strum(to_string = "heart_rate_measurement")]
    HeartRateMeasurement,
    /// Battery service (`0x180F`).
    #[strum(to_string = "battery_service")]
    BatteryService,
    /// Battery Level characteristic (`0x2A19`).
    #[strum(to_string = "battery_level")]
    BatteryLevel,
}

impl GattEndpoint {
    /// Returns the full 128-bit UUID of this endpoint.
    #[must_use]
    pub fn uuid(self) -> Uuid {
        endpoint_metadata(self).uuid()
    }
}

/// Descriptive metadata for one GATT endpoint.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct EndpointMetadata {
    name: &'static str,
    assigned_number: u16,
}

impl EndpointMetadata {
    /// Human-readable endpoint name.
    pub(crate) fn name(self) -> &'static str {
        self.name
    }

    /// Bluetooth SIG 16-bit assigned number.
    pub(crate) fn assigned_number(self) -> u16 {
        self.assigned_number
    }

    /// Assigned number expanded onto the Bluetooth base UUID.
    pub(crate) fn uuid(self) -> Uuid {
        uuid_from_u16(self.assigned_number)
    }
}

static ENDPOINTS_BY_UUID: LazyLock<HashMap<Uuid, GattEndpoint>> = LazyLock::new(|| {
    GattEndpoint::iter()
        .map(|endpoint| (endpoint_metadata(endpoint).uuid(), endpoint))
        .collect()
});

/// Maps a UUID back onto a known endpoint.
pub(crate) fn endpoint_for_uuid(uuid: Uuid) -> Option<GattEndpoint> {
    ENDPOINTS_BY_UUID.get(&uuid).copied()
}

/// Renders a UUID with its endpoint name when it is a known endpoint.
pub(crate) fn describe_uuid(uuid: Uuid) -> String {
    match endpoint_for_uuid(uuid).map(endpoint_metadata) {
        Some(metadata) => format!(
            "{} (0x{:04X})",
            metadata.name(),
            metadata.assigned_number()
        ),
        None => uuid.to_string(),
    }
}

/// Returns metadata for one endpoint.
pub(crate) fn endpoint_metadata(endpoint: GattEndpoint) -> EndpointMetadata {
    match endpoint {
        GattEndpoint::HeartRateService => EndpointMetadata {
            name: "Heart Rate",
            assigned_number: 0x180D,
        },
        GattEndpoint::HeartRateMeasurement => EndpointMetadata {
            name: "Heart Rate Measurement",
            assigned_number: 0x2A37,
        },
        GattEndpoint::BatteryService => EndpointMetadata {
            name: "Battery",
            assigned_number: 0x180F,
        },
        GattEndpoint::BatteryLevel => EndpointMetadata {
            name: "Battery Level",
            assigned_number: 0x2A19,
        },
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(GattEndpoint::HeartRateService, "0000180d-0000-1000-8000-00805f9b34fb")]
    #[case(GattEndpoint::HeartRateMeasurement, "00002a37-0000-1000-8000-00805f9b34fb")]
    #[case(GattEndpoint::BatteryService, "0000180f-0000-1000-8000-00805f9b34fb")]
    #[case(GattEndpoint::BatteryLevel, "00002a19-0000-1000-8000-00805f9b34fb")]
    fn endpoints_expand_sig_assigned_numbers(
        #[case] endpoint: GattEndpoint,
        #[case] expected: &str,
    ) {
        assert_eq!(expected, endpoint.uuid().to_string());
    }

    #[test]
    fn endpoint_for_uuid_round_trips_known_endpoints() {
        for endpoint in GattEndpoint::iter() {
            assert_eq!(Some(endpoint), endpoint_for_uuid(endpoint.uuid()));
        }
        assert_eq!(None, endpoint_for_uuid(uuid_from_u16(0x1800)));
    }

    #[test]
    fn known_uuids_are_described_by_name() {
        assert_eq!(
            "Heart Rate Measurement (0x2A37)",
            describe_uuid(GattEndpoint::HeartRateMeasurement.uuid())
        );
        assert_eq!(
            "00001800-0000-1000-8000-00805f9b34fb",
            describe_uuid(uuid_from_u16(0x1800))
        );
    }
}
