use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::app::RunOptions;
use crate::cli::monitor::MonitorArgs;
use crate::error::{CliConfigError, FixtureError};
use crate::hw::{FakeBackendConfig, FakeDevice, FakeFaults, HexPayload, NotificationPayloads};

/// Command-line options for the heart-rate band tool.
#[derive(Debug, Parser)]
#[command(
    name = "bandlink",
    about = "Connect to a BLE heart-rate band and stream its measurements."
)]
pub struct Args {
    /// Log verbosity used when `RUST_LOG` is unset.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format. Defaults to `pretty` on a terminal and `json` otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    /// Only pick peripherals whose advertised name starts with this prefix.
    #[arg(long, global = true)]
    name_prefix: Option<String>,
    /// Give up discovery after this long (e.g. `30s`, `2m`).
    #[arg(long, global = true, value_parser = parse_duration)]
    scan_timeout: Option<Duration>,
    /// Uses the fake BLE backend with fixture-driven discovery and payloads.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake peripheral in the form `device_id|name`; use `-` for a nameless device.
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_device: Option<FakeDevice>,
    /// Fake heart-rate notification payloads as comma-separated hexadecimal payloads.
    #[arg(long, global = true, requires = "fake")]
    fake_notifications: Option<NotificationPayloads>,
    /// Fake battery-level read payload as hexadecimal bytes.
    #[arg(long, global = true, requires = "fake")]
    fake_battery: Option<HexPayload>,
    /// Fake peripheral does not expose the heart-rate service.
    #[arg(long, global = true, requires = "fake")]
    fake_without_heart_rate: bool,
    /// Fake peripheral does not expose the battery service.
    #[arg(long, global = true, requires = "fake")]
    fake_without_battery: bool,
    /// Fake peripheral refuses the GATT connection.
    #[arg(long, global = true, requires = "fake")]
    fake_reject_connect: bool,
    /// Artificial fake discovery delay (e.g. `250ms`, `2s`).
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_discovery_delay: Option<Duration>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    ///
    /// ```
    /// use bandlink::{Args, Command, MonitorArgs};
    ///
    /// let battery = Args::new(Command::Battery);
    /// let monitor = Args::new(Command::Monitor(MonitorArgs::new(Some(10))));
    /// let _ = (battery, monitor);
    /// ```
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            output: None,
            name_prefix: None,
            scan_timeout: None,
            fake: false,
            fake_device: None,
            fake_notifications: None,
            fake_battery: None,
            fake_without_heart_rate: false,
            fake_without_battery: false,
            fake_reject_connect: false,
            fake_discovery_delay: None,
            command,
        }
    }

    /// Enables fake backend mode with pre-parsed fake configuration.
    #[must_use]
    pub fn with_fake(mut self, fake: FakeArgs) -> Self {
        let FakeArgs {
            device,
            notifications,
            battery,
            without_heart_rate,
            without_battery,
            reject_connect,
            discovery_delay,
        } = fake;

        self.fake = true;
        self.fake_device = Some(device);
        self.fake_notifications = notifications;
        self.fake_battery = battery;
        self.fake_without_heart_rate = without_heart_rate;
        self.fake_without_battery = without_battery;
        self.fake_reject_connect = reject_connect;
        self.fake_discovery_delay = Some(discovery_delay);
        self
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    /// Returns the discovery settings shared by every command.
    #[must_use]
    pub fn discovery(&self) -> DiscoveryArgs {
        DiscoveryArgs {
            name_prefix: self.name_prefix.clone(),
            scan_timeout: self.scan_timeout,
        }
    }

    /// Collects the global flags into run options.
    #[must_use]
    pub fn run_options(&self) -> RunOptions {
        RunOptions::builder()
            .maybe_log_level(self.log_level)
            .maybe_output_format(self.output)
            .discovery(self.discovery())
            .build()
    }

    /// Splits parsed CLI arguments into command and optional fake-adapter settings.
    ///
    /// # Errors
    ///
    /// Returns an error if CLI backend configuration is invalid.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            fake,
            fake_device,
            fake_notifications,
            fake_battery,
            fake_without_heart_rate,
            fake_without_battery,
            fake_reject_connect,
            fake_discovery_delay,
            command,
            ..
        } = self;

        let fake_args = if fake {
            let Some(device) = fake_device else {
                return Err(CliConfigError::MissingFakeDevice.into());
            };
            Some(FakeArgs {
                device,
                notifications: fake_notifications,
                battery: fake_battery,
                without_heart_rate: fake_without_heart_rate,
                without_battery: fake_without_battery,
                reject_connect: fake_reject_connect,
                discovery_delay: fake_discovery_delay.unwrap_or(Duration::ZERO),
            })
        } else {
            None
        };

        Ok((command, fake_args))
    }
}

/// Discovery narrowing applied to every command.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct DiscoveryArgs {
    name_prefix: Option<String>,
    scan_timeout: Option<Duration>,
}

impl DiscoveryArgs {
    #[must_use]
    pub fn name_prefix(&self) -> Option<&str> {
        self.name_prefix.as_deref()
    }

    #[must_use]
    pub fn scan_timeout(&self) -> Option<Duration> {
        self.scan_timeout
    }
}

/// Fake backend arguments for programmatic runs.
///
/// ```
/// let fake = bandlink::FakeArgs::builder()
///     .device("AA:BB|Polar H10")?
///     .notifications("0048,0049")?
///     .build();
/// let _ = fake;
/// # Ok::<(), bandlink::FixtureError>(())
/// ```
#[derive(Debug, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    device: FakeDevice,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    notifications: Option<NotificationPayloads>,
    #[builder(with = |value: &str| -> std::result::Result<_, FixtureError> { value.parse() })]
    battery: Option<HexPayload>,
    #[builder(default)]
    without_heart_rate: bool,
    #[builder(default)]
    without_battery: bool,
    #[builder(default)]
    reject_connect: bool,
    #[builder(default)]
    discovery_delay: Duration,
}

impl FakeArgs {
    pub(crate) fn into_backend_config(self) -> FakeBackendConfig {
        let Self {
            device,
            notifications,
            battery,
            without_heart_rate,
            without_battery,
            reject_connect,
            discovery_delay,
        } = self;

        FakeBackendConfig::builder()
            .device(device)
            .heart_rate_service(!without_heart_rate)
            .battery_service(!without_battery)
            .maybe_notifications(notifications)
            .maybe_battery_payload(battery)
            .faults(FakeFaults::builder().reject_connect(reject_connect).build())
            .discovery_delay(discovery_delay)
            .build()
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to the first heart-rate band and stream its measurements until Ctrl+C.
    Monitor(MonitorArgs),
    /// Connect to the first heart-rate band, read its battery level once, and disconnect.
    Battery,
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable, coloured output.
    Pretty,
    /// Machine-readable JSON.
    Json,
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn fake_mode_requires_device_fixture() {
        let result = Args::try_parse_from(["bandlink", "--fake", "battery"]);

        let error = result.expect_err("missing --fake-device should fail argument parsing");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn fake_fixture_flags_require_fake_mode() {
        let result = Args::try_parse_from(["bandlink", "--fake-battery", "57", "battery"]);

        let error = result.expect_err("fake payload flags should require --fake");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn malformed_fake_device_is_rejected_at_parse_time() {
        let result = Args::try_parse_from([
            "bandlink",
            "--fake",
            "--fake-device",
            "AA:BB",
            "battery",
        ]);

        let error = result.expect_err("device records need an id and a name");
        assert_eq!(ErrorKind::ValueValidation, error.kind());
    }

    #[test]
    fn fake_mode_builds_fake_settings() {
        let cli = Args::try_parse_from([
            "bandlink",
            "--fake",
            "--fake-device",
            "AA:BB|Polar H10",
            "--fake-without-battery",
            "monitor",
            "--max-samples",
            "3",
        ])
        .expect("valid fake arguments should parse");

        let (command, fake_args) = cli
            .into_command_and_fake_args()
            .expect("valid fake arguments should resolve fake settings");
        assert_matches!(command, Command::Monitor(args) if args.max_samples() == Some(3));
        assert_matches!(fake_args, Some(FakeArgs { without_battery: true, .. }));
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Args::try_parse_from([
            "bandlink",
            "battery",
            "--log-level",
            "debug",
            "--output",
            "json",
            "--name-prefix",
            "Polar",
            "--scan-timeout",
            "30s",
        ])
        .expect("global flags should parse");

        assert_eq!(Some(LogLevel::Debug), cli.log_level());
        assert_eq!(Some(OutputFormat::Json), cli.output_format());
        let discovery = cli.discovery();
        assert_eq!(Some("Polar"), discovery.name_prefix());
        assert_eq!(Some(Duration::from_secs(30)), discovery.scan_timeout());
    }

    #[test]
    fn invalid_scan_timeout_is_rejected() {
        let result = Args::try_parse_from(["bandlink", "--scan-timeout", "soon", "battery"]);

        let error = result.expect_err("non-duration timeout should fail");
        assert_eq!(ErrorKind::ValueValidation, error.kind());
    }
}
