//! Command dispatch: bridges CLI args -> `NaxClient` -> output formatting.

pub mod config_cmd;
pub mod state;

use nax_core::{ClientConfig, NaxClient};
use tracing::warn;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a device-bound command. The session is always logged out
/// afterwards, whether the command succeeded or not.
pub async fn dispatch(
    cmd: Command,
    config: ClientConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let client = open(config).await?;

    let result = match cmd {
        Command::Get(args) => state::get(&client, args, global).await,
        Command::Set(args) => state::set(&client, args, global).await,
        Command::Watch(args) => state::watch(&client, args, global).await,
        Command::Dump(args) => state::dump(&client, &args, global).await,
        Command::Info(args) => state::info(&client, &args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => unreachable!(),
    };

    client.logout().await;
    result
}

/// Log in and try to open the stream. A failed upgrade is tolerated when
/// HTTP fallback can serve the command.
async fn open(config: ClientConfig) -> Result<NaxClient, CliError> {
    let http_fallback = config.http_fallback;
    let client = NaxClient::new(config);
    client.login().await?;

    if let Err(e) = client.upgrade_to_stream().await {
        if !http_fallback {
            client.logout().await;
            return Err(e.into());
        }
        warn!(error = %e, "stream unavailable, using HTTP fallback");
    }
    Ok(client)
}
