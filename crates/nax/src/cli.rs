//! Clap derive structures for the `nax` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// nax -- read, write, and watch DM NAX device state
#[derive(Debug, Parser)]
#[command(
    name = "nax",
    version,
    about = "Read, write, and watch DM NAX device state from the command line",
    long_about = "Talks to a DM NAX device over its web API.\n\n\
        Logs in over HTTPS, mirrors the device state over the WebSocket\n\
        stream, and falls back to plain HTTP when the stream is unavailable.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Device profile to use
    #[arg(long, short = 'p', env = "NAX_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Device host or URL (overrides profile)
    #[arg(long, short = 'H', env = "NAX_HOST", global = true)]
    pub host: Option<String>,

    /// Login name (overrides profile)
    #[arg(long, short = 'u', env = "NAX_USERNAME", global = true)]
    pub username: Option<String>,

    /// Password (prefer the keyring or a profile's password_env)
    #[arg(long, env = "NAX_PASSWORD", global = true, hide_env_values = true)]
    pub password: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "NAX_OUTPUT",
        default_value = "json",
        global = true
    )]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "NAX_INSECURE", global = true)]
    pub insecure: bool,

    /// Request timeout in seconds
    #[arg(long, env = "NAX_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Never fall back to plain HTTP for reads and writes
    #[arg(long, global = true)]
    pub no_http_fallback: bool,
}

// ── Output Enum ──────────────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed JSON (default)
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one `path=value` per leaf (scripting)
    Plain,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read the value at a dotted path
    Get(GetArgs),

    /// Write a value at a dotted path
    Set(SetArgs),

    /// Stream changes under one or more paths
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Print the full state document
    Dump(WaitArgs),

    /// Show device identity (name, model, firmware, ...)
    Info(WaitArgs),

    /// Manage configuration profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── State commands ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WaitArgs {
    /// Seconds to wait for the device's initial state
    #[arg(long, default_value = "5")]
    pub wait: u64,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Dotted path, e.g. Device.ZoneOutputs.Zones.Zone01.ZoneAudio.Volume
    pub path: String,

    #[command(flatten)]
    pub wait: WaitArgs,
}

#[derive(Debug, Args)]
pub struct SetArgs {
    /// Dotted path to write
    pub path: String,

    /// Value as JSON (`750`, `true`, `"text"`); anything that does not
    /// parse as JSON is sent as a string
    pub value: String,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Dotted paths to watch
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Also print each path's current value once it is known
    #[arg(long)]
    pub initial: bool,

    /// Exit after this many changes
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create initial config file with guided setup
    Init,

    /// Display current configuration
    Show,

    /// Set a value on the active profile
    Set {
        /// Profile key (host, username, password_env, insecure, timeout,
        /// ca_cert, http_fallback, reconnect_interval, stream_url)
        key: String,

        /// Value to set
        value: String,
    },

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Store a profile's password in the system keyring
    SetPassword {
        /// Profile name (defaults to the active profile)
        #[arg(long)]
        profile: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
