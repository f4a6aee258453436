//! Host and embedded client in one process: handshake, a request, an event,
//! and a cancelled request.
//!
//! Run with:
//!   cargo run --example embedded-echo

use std::sync::Arc;
use std::time::Duration;

use portlink::peer::{HandlerError, RequestOptions};
use portlink::transport::{InlineFrame, Window};
use portlink::{CancelToken, ClientBuilder, Handler, HostBuilder};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let host_window = Window::new("https://host.example");
    let child_window = Window::new("https://widget.example");
    let frame = Arc::new(InlineFrame::with_content(&child_window));

    let host = HostBuilder::new(host_window.clone(), frame)
        .with_target_origin("https://widget.example")
        .with_default_timeout(2_000)
        .on(
            "log",
            Handler::sync(|_, args| {
                eprintln!("client says: {args:?}");
                Ok(json!(null))
            }),
        )
        .build();

    let client = ClientBuilder::new(child_window, host_window)
        .with_target_origin("https://host.example")
        .on("echo", Handler::sync(|_, args| Ok(json!(args))))
        .on(
            "slow",
            Handler::new(|ctx, _| async move {
                let Some(signal) = ctx.signal else {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    return Ok(json!("done"));
                };
                let reason = signal.cancelled().await;
                Err(HandlerError::new(format!("stopped: {reason}")))
            }),
        )
        .build();

    host.start()?;
    let (to_client, to_host) = tokio::try_join!(host.connect(), client.connect())?;
    eprintln!("connected: host={} client={}", host.state(), client.state());

    let echoed = to_client.request("echo", vec![json!("hello"), json!(42)]).await?;
    eprintln!("echo -> {echoed:?}");

    to_host.send("log", vec![json!("ready")])?;

    let token = CancelToken::new();
    let call = to_client.send_and_receive(
        "slow",
        vec![],
        RequestOptions::new()
            .with_cancel(token.clone())
            .propagate(true),
    );
    token.cancel_with("user closed the dialog");
    match call.await {
        Ok(results) => eprintln!("slow -> {results:?}"),
        Err(err) => eprintln!("slow -> {err}"),
    }

    // Let the event reach the host before exiting.
    tokio::time::sleep(Duration::from_millis(10)).await;
    Ok(())
}
