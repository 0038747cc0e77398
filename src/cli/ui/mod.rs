mod monitor_view;
mod painter;
mod session_view;
mod table;

pub(crate) use self::monitor_view::{MonitorSummaryView, SampleView};
pub(crate) use self::painter::Painter;
pub(crate) use self::session_view::{BatteryView, SessionView};
