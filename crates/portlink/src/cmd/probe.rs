use std::sync::Arc;
use std::time::{Duration, Instant};

use portlink_peer::{ClientBuilder, Handler, HostBuilder, PeerError};
use portlink_transport::{InlineFrame, Window};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::cmd::{parse_timeout, ProbeArgs};
use crate::exit::{io_error, peer_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{millis, print_fields, print_json, print_pretty, OutputFormat};

/// Event the probe client answers.
const ECHO_EVENT: &str = "echo";

#[derive(Debug, Serialize)]
struct ProbeOutput {
    host_origin: String,
    client_origin: String,
    target_origin: String,
    event: String,
    connected: bool,
    handshake_ms: f64,
    roundtrip_ms: f64,
    sequence: u64,
    results: Vec<Value>,
}

pub fn run(args: ProbeArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_timeout(&args.timeout)?;
    let payload = parse_payload(args.json.as_deref())?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start runtime", err))?;
    let out = runtime.block_on(probe(&args, payload, timeout))?;

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_fields(&rows(&out)),
        OutputFormat::Pretty => print_pretty("Probe", &rows(&out)),
        OutputFormat::Raw => println!("{}", Value::Array(out.results.clone())),
    }
    Ok(SUCCESS)
}

async fn probe(args: &ProbeArgs, payload: Vec<Value>, timeout: Duration) -> CliResult<ProbeOutput> {
    let host_window = Window::new(args.host_origin.as_str());
    let client_window = Window::new(args.client_origin.as_str());
    let frame = Arc::new(InlineFrame::with_content(&client_window));

    let mut host = HostBuilder::new(host_window.clone(), frame).with_timeout(Some(timeout));
    if let Some(target) = &args.target_origin {
        host = host.with_target_origin(target.as_str());
    }
    let host = host.build();
    let client = ClientBuilder::new(client_window, host_window)
        .on(ECHO_EVENT, Handler::sync(|_, values| Ok(Value::Array(values))))
        .build();

    let started = Instant::now();
    host.start()
        .map_err(|err| peer_error("host start failed", err))?;
    let handshake = async { tokio::try_join!(host.connect(), client.connect()) };
    let (to_client, _to_host) = tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| {
            CliError::new(
                TIMEOUT,
                format!("handshake timed out after {timeout:?} (state: {})", host.state()),
            )
        })?
        .map_err(|err| peer_error("handshake failed", err))?;
    let handshake_elapsed = started.elapsed();
    info!(elapsed = ?handshake_elapsed, "handshake complete");

    let started = Instant::now();
    let call = to_client.request(&args.event, payload);
    let sequence = call.sequence();
    let results = call.await.map_err(|err| match err {
        PeerError::Timeout(_) if args.event != ECHO_EVENT => CliError::new(
            TIMEOUT,
            format!("request timed out: the probe client does not handle {:?}", args.event),
        ),
        err => peer_error("request failed", err),
    })?;

    Ok(ProbeOutput {
        host_origin: args.host_origin.clone(),
        client_origin: args.client_origin.clone(),
        target_origin: host.target_origin().to_string(),
        event: args.event.clone(),
        connected: host.is_connected() && client.is_connected(),
        handshake_ms: millis(handshake_elapsed),
        roundtrip_ms: millis(started.elapsed()),
        sequence,
        results,
    })
}

fn parse_payload(input: Option<&str>) -> CliResult<Vec<Value>> {
    let Some(input) = input else {
        return Ok(vec![json!("ping")]);
    };
    let value: Value = serde_json::from_str(input)
        .map_err(|err| CliError::new(USAGE, format!("invalid --json payload: {err}")))?;
    Ok(match value {
        Value::Array(items) => items,
        other => vec![other],
    })
}

fn rows(out: &ProbeOutput) -> Vec<(&'static str, String)> {
    vec![
        ("host origin", out.host_origin.clone()),
        ("client origin", out.client_origin.clone()),
        ("target origin", out.target_origin.clone()),
        ("connected", out.connected.to_string()),
        ("handshake", format!("{:.2}ms", out.handshake_ms)),
        ("event", out.event.clone()),
        ("sequence", out.sequence.to_string()),
        ("roundtrip", format!("{:.2}ms", out.roundtrip_ms)),
        ("results", Value::Array(out.results.clone()).to_string()),
    ]
}
