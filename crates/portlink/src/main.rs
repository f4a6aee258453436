mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "portlink", version, about = "Host/client port handshake diagnostics")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "warn",
        env = "PORTLINK_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_probe_subcommand() {
        let cli = Cli::try_parse_from([
            "portlink",
            "probe",
            "--target-origin",
            "https://client.example",
            "--timeout",
            "500ms",
        ])
        .expect("probe args should parse");

        match cli.command {
            Command::Probe(args) => {
                assert_eq!(args.target_origin.as_deref(), Some("https://client.example"));
                assert_eq!(args.event, "echo");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_decode_subcommand() {
        let cli = Cli::try_parse_from([
            "portlink",
            "decode",
            "--direction",
            "client",
            r#"{"action":0}"#,
        ])
        .expect("decode args should parse");
        assert!(matches!(cli.command, Command::Decode(_)));
    }

    #[test]
    fn global_format_after_subcommand() {
        let cli = Cli::try_parse_from(["portlink", "version", "--format", "pretty"])
            .expect("global flag should parse after subcommand");
        assert_eq!(cli.format, Some(OutputFormat::Pretty));
    }

    #[test]
    fn probe_payload_flag() {
        let cli = Cli::try_parse_from(["portlink", "probe", "--json", "[1,2]"])
            .expect("payload should parse");
        match cli.command {
            Command::Probe(args) => assert_eq!(args.json.as_deref(), Some("[1,2]")),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn decode_requires_direction() {
        let err = Cli::try_parse_from(["portlink", "decode", r#"{"action":0}"#])
            .expect_err("direction is required");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }
}
