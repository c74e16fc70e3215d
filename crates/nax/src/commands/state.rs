//! State commands: get, set, watch, dump, info.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use nax_core::NaxClient;

use crate::cli::{GetArgs, GlobalOpts, SetArgs, WaitArgs, WatchArgs};
use crate::error::CliError;
use crate::output;

const DEVICE_ROOT: &str = "Device";

/// Wait until `path` has been populated by the stream, or `wait_secs`
/// pass. Returns immediately when there is no stream.
async fn wait_for_path(client: &NaxClient, path: &str, wait_secs: u64) -> Result<(), CliError> {
    if !client.is_connected() {
        return Ok(());
    }
    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = client.subscribe(
        path,
        move |_, _| {
            let _ = tx.send(());
        },
        true,
    )?;
    if tokio::time::timeout(Duration::from_secs(wait_secs), rx.recv())
        .await
        .is_err()
    {
        debug!(path, wait_secs, "no stream update before timeout");
    }
    client.unsubscribe(path, id);
    Ok(())
}

/// Parse a command-line value as JSON, falling back to a JSON string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn get(client: &NaxClient, args: GetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    wait_for_path(client, &args.path, args.wait.wait).await?;
    let value = client
        .get(&args.path)
        .await
        .ok_or_else(|| CliError::NotFound {
            path: args.path.clone(),
        })?;
    output::print_output(
        &output::render_value(&global.output, &args.path, &value),
        global.quiet,
    );
    Ok(())
}

pub async fn set(client: &NaxClient, args: SetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let value = parse_value(&args.value);
    let route = client.put(&args.path, value).await?;
    if !global.quiet {
        eprintln!("✓ Wrote {} via {route}", args.path);
    }
    Ok(())
}

pub async fn watch(
    client: &NaxClient,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, Value)>();
    for path in &args.paths {
        let tx = tx.clone();
        client.subscribe(
            path,
            move |changed, value| {
                let _ = tx.send((changed.to_owned(), value.clone()));
            },
            args.initial,
        )?;
    }
    drop(tx);

    let quiet = global.quiet;
    client.subscribe_connection(
        move |connected| {
            if quiet {
                return;
            }
            if connected {
                eprintln!("● stream connected");
            } else {
                eprintln!("○ stream disconnected, reconnecting");
            }
        },
        false,
    );

    let mut seen = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            change = rx.recv() => {
                let Some((path, value)) = change else { break };
                output::print_output(
                    &output::render_change(&global.output, &path, &value),
                    global.quiet,
                );
                seen += 1;
                if args.count.is_some_and(|limit| seen >= limit) {
                    break;
                }
            }
        }
    }
    Ok(())
}

pub async fn dump(client: &NaxClient, args: &WaitArgs, global: &GlobalOpts) -> Result<(), CliError> {
    wait_for_path(client, DEVICE_ROOT, args.wait).await?;
    let document = Value::Object(client.snapshot());
    output::print_output(
        &output::render_value(&global.output, "", &document),
        global.quiet,
    );
    Ok(())
}

pub async fn info(client: &NaxClient, args: &WaitArgs, global: &GlobalOpts) -> Result<(), CliError> {
    wait_for_path(client, nax_core::device::DEVICE_INFO_PATH, args.wait).await?;
    let info = client.device_info().await;
    output::print_output(&output::render_single(&global.output, &info), global.quiet);
    Ok(())
}
