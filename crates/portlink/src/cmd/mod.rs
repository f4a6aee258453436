use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod decode;
pub mod probe;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show version information.
    Version(VersionArgs),
    /// Run an in-process host/client handshake and one request.
    Probe(ProbeArgs),
    /// Decode an envelope and print its typed form.
    Decode(DecodeArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Version(args) => version::run(args),
        Command::Probe(args) => probe::run(args, format),
        Command::Decode(args) => decode::run(args, format),
    }
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Origin of the host window.
    #[arg(long, default_value = "https://host.example")]
    pub host_origin: String,
    /// Origin of the embedded client window.
    #[arg(long, default_value = "https://client.example")]
    pub client_origin: String,
    /// Origin the host accepts handshakes from (`*` for any). Default: unrestricted.
    #[arg(long)]
    pub target_origin: Option<String>,
    /// Event to request; the client only answers `echo`.
    #[arg(long, default_value = "echo")]
    pub event: String,
    /// JSON payload; an array is sent as positional arguments.
    #[arg(long)]
    pub json: Option<String>,
    /// Handshake and request timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Direction {
    /// Envelope sent by the host.
    Host,
    /// Envelope sent by the client.
    Client,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Which side sent the envelope.
    #[arg(long, value_enum)]
    pub direction: Direction,
    /// Envelope JSON, e.g. '{"action":1,"data":{"eventName":"ping","payload":[]}}'.
    pub envelope: String,
}

pub(crate) fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
