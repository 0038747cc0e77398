use std::io;

use anyhow::Result;
use bon::Builder;
use tracing::instrument;

use crate::cli::{Command, DiscoveryArgs, FakeArgs, LogLevel, OutputFormat};
use crate::hw::{
    BleAdapter, SessionManager, fake_ble_adapter as build_fake_ble_adapter,
    real_ble_adapter as build_real_ble_adapter,
};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Creates a BLE adapter backed by the host radio.
#[must_use]
pub fn real_ble_adapter(discovery: &DiscoveryArgs) -> Box<dyn BleAdapter> {
    build_real_ble_adapter(discovery.scan_timeout())
}

/// Creates a BLE adapter backed by fake fixtures.
#[must_use]
pub fn fake_ble_adapter(fake_args: FakeArgs) -> Box<dyn BleAdapter> {
    build_fake_ble_adapter(fake_args.into_backend_config())
}

/// Settings shared by every command run.
#[derive(Debug, Clone, Default, Builder)]
pub struct RunOptions {
    log_level: Option<LogLevel>,
    /// Falls back to pretty output on a terminal and JSON otherwise.
    output_format: Option<OutputFormat>,
    #[builder(default)]
    discovery: DiscoveryArgs,
}

impl RunOptions {
    fn resolved_output_format(&self, terminal_client: &dyn TerminalClient) -> OutputFormat {
        self.output_format
            .unwrap_or(if terminal_client.stdout_is_terminal() {
                OutputFormat::Pretty
            } else {
                OutputFormat::Json
            })
    }
}

/// Runs the CLI command against the real standard streams.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = bandlink::Args::try_parse_from([
///     "bandlink",
///     "--fake",
///     "--fake-device",
///     "AA:BB|Polar H10",
///     "battery",
/// ])?;
/// let options = args.run_options();
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let adapter = match maybe_fake_args {
///     Some(fake_args) => bandlink::fake_ble_adapter(fake_args),
///     None => bandlink::real_ble_adapter(&bandlink::DiscoveryArgs::default()),
/// };
/// let mut out = Vec::new();
/// bandlink::run(command, &mut out, adapter, options).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
pub async fn run<W>(
    command: Command,
    out: &mut W,
    adapter: Box<dyn BleAdapter>,
    options: RunOptions,
) -> Result<()>
where
    W: io::Write,
{
    run_with_clients(command, out, &SystemTerminalClient, adapter, options).await
}

/// Runs the CLI command with an injected terminal client.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// struct FakeTerminal;
/// impl bandlink::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let fake = bandlink::FakeArgs::builder()
///     .device("AA:BB|Polar H10")?
///     .build();
/// let options = bandlink::RunOptions::builder()
///     .output_format(bandlink::OutputFormat::Pretty)
///     .build();
/// let mut out = Vec::new();
/// bandlink::run_with_clients(
///     bandlink::Command::Monitor(bandlink::MonitorArgs::new(Some(3))),
///     &mut out,
///     &FakeTerminal,
///     bandlink::fake_ble_adapter(fake),
///     options,
/// ).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, BLE interaction fails, or
/// output writing fails.
#[instrument(
    skip(out, terminal_client, adapter, options),
    level = "info",
    fields(command = %command_name(&command), log_level = ?options.log_level)
)]
pub async fn run_with_clients<W>(
    command: Command,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    adapter: Box<dyn BleAdapter>,
    options: RunOptions,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        "bandlink",
        terminal_client.stderr_is_terminal(),
        options.log_level.map(LogLevel::as_level_filter),
    )?;

    let output_format = options.resolved_output_format(terminal_client);
    let mut manager = SessionManager::new(adapter);
    if let Some(prefix) = options.discovery.name_prefix() {
        manager = manager.with_name_prefix(prefix);
    }

    match command {
        Command::Monitor(args) => {
            crate::cli::monitor::run(manager, &args, out, terminal_client, output_format).await
        }
        Command::Battery => {
            crate::cli::battery::run(manager, out, terminal_client, output_format).await
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Monitor(_args) => "monitor",
        Command::Battery => "battery",
    }
}
