use std::fmt::{self, Display, Formatter};

use crate::hw::{BatteryLevel, CapabilityKind, PeripheralInfo};

use super::painter::Painter;
use super::table::FieldTable;

const BATTERY_UNAVAILABLE: &str = "battery service not available";

/// Renders a connected session: identity, attached capabilities, battery.
pub(crate) struct SessionView<'a> {
    peripheral: &'a PeripheralInfo,
    capabilities: &'a [CapabilityKind],
    battery: Option<BatteryLevel>,
    painter: &'a Painter,
}

impl<'a> SessionView<'a> {
    pub(crate) fn new(
        peripheral: &'a PeripheralInfo,
        capabilities: &'a [CapabilityKind],
        battery: Option<BatteryLevel>,
        painter: &'a Painter,
    ) -> Self {
        Self {
            peripheral,
            capabilities,
            battery,
            painter,
        }
    }
}

impl Display for SessionView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let capabilities = if self.capabilities.is_empty() {
            self.painter.warning("<none>")
        } else {
            let names: Vec<String> = self.capabilities.iter().map(ToString::to_string).collect();
            self.painter.value(names.join(", "))
        };
        let table = FieldTable::new(
            self.painter,
            [
                ("name", self.painter.value(self.peripheral.display_name())),
                ("device_id", self.painter.value(self.peripheral.device_id())),
                ("capabilities", capabilities),
                ("battery", battery_label(self.battery, self.painter)),
            ],
        );

        write!(f, "{}", self.painter.heading("Connected device:"))?;
        write!(f, "\n{table}")
    }
}

/// Renders the one-line result of the `battery` command.
pub(crate) struct BatteryView<'a> {
    peripheral: &'a PeripheralInfo,
    battery: Option<BatteryLevel>,
    painter: &'a Painter,
}

impl<'a> BatteryView<'a> {
    pub(crate) fn new(
        peripheral: &'a PeripheralInfo,
        battery: Option<BatteryLevel>,
        painter: &'a Painter,
    ) -> Self {
        Self {
            peripheral,
            battery,
            painter,
        }
    }
}

impl Display for BatteryView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.painter.heading("Battery:"),
            battery_label(self.battery, self.painter),
            self.painter
                .muted(format!("({})", self.peripheral.display_name()))
        )
    }
}

fn battery_label(battery: Option<BatteryLevel>, painter: &Painter) -> String {
    match battery {
        Some(level) => painter.value(level.to_string()),
        None => painter.warning(BATTERY_UNAVAILABLE),
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;

    fn peripheral(name: Option<&str>) -> PeripheralInfo {
        PeripheralInfo::new("AA:BB".to_string(), name.map(String::from))
    }

    #[test]
    fn battery_view_shows_percentage() {
        let painter = Painter::new(false);
        let device = peripheral(Some("Polar H10"));
        let view = BatteryView::new(&device, Some(BatteryLevel::from(87)), &painter);
        assert_snapshot!(view.to_string(), @"Battery: 87% (Polar H10)");
    }

    #[test]
    fn battery_view_reports_missing_service() {
        let painter = Painter::new(false);
        let device = peripheral(None);
        let view = BatteryView::new(&device, None, &painter);
        assert_snapshot!(
            view.to_string(),
            @"Battery: battery service not available (Unknown Device)"
        );
    }

    #[test]
    fn session_view_lists_identity_and_capabilities() {
        let painter = Painter::new(false);
        let device = peripheral(None);
        let capabilities = [CapabilityKind::HeartRate, CapabilityKind::Battery];
        let rendered =
            SessionView::new(&device, &capabilities, Some(BatteryLevel::from(42)), &painter)
                .to_string();

        assert!(rendered.starts_with("Connected device:\n"));
        assert!(rendered.contains("Unknown Device"));
        assert!(rendered.contains("AA:BB"));
        assert!(rendered.contains("heart-rate, battery"));
        assert!(rendered.contains("42%"));
    }

    #[test]
    fn session_view_flags_a_bare_session() {
        let painter = Painter::new(false);
        let device = peripheral(Some("Polar H10"));
        let rendered = SessionView::new(&device, &[], None, &painter).to_string();

        assert!(rendered.contains("<none>"));
        assert!(rendered.contains(BATTERY_UNAVAILABLE));
    }
}
