pub(crate) mod battery;
pub(crate) mod command;
pub(crate) mod monitor;
pub(crate) mod ui;

pub use self::command::{Args, Command, DiscoveryArgs, FakeArgs, LogLevel, OutputFormat};
pub use self::monitor::MonitorArgs;
