//! Server-side CLI configuration (spec §6.4), parsed with `clap`.

use std::path::PathBuf;

use clap::Args;

use crate::message::ServerType;

#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    /// Which kind of stream this server distributes.
    #[arg(short = 'T', long = "server-type", value_enum)]
    pub server_type: ServerType,

    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    pub host: String,

    /// Defaults to 10000 + the server type's ordinal, matching the original's convention.
    #[arg(short = 'P', long)]
    pub port: Option<u16>,

    #[arg(short = 'N', long, default_value = "Server")]
    pub name: String,

    /// `-MC` in the original's flag table; clap shorts are a single character, so the
    /// letter pair is kept as a visible alias instead.
    #[arg(long = "max-clients", visible_alias = "MC")]
    pub max_clients: Option<u32>,

    /// `-MR` in the original's flag table.
    #[arg(long = "message-rate-secs", visible_alias = "MR", default_value_t = 0)]
    pub message_rate_secs: u32,

    /// `-MS` in the original's flag table.
    #[arg(long = "max-message-size", visible_alias = "MS")]
    pub max_message_size: Option<u64>,

    #[arg(short = 'R', long)]
    pub record: bool,

    /// `-CT` in the original's flag table.
    #[arg(long = "cert", visible_alias = "CT")]
    pub cert: Option<PathBuf>,

    #[arg(short = 'K', long = "key")]
    pub key: Option<PathBuf>,

    /// Newline-delimited list of names that are denied access.
    #[arg(short = 'B', long = "banlist")]
    pub banlist: Option<PathBuf>,

    /// Newline-delimited list of names that are the only ones allowed. Mutually
    /// exclusive with `banlist` in practice, though nothing enforces it here; the later
    /// flag on the command line simply wins, matching the original parser's behavior.
    /// `-AL` in the original's flag table.
    #[arg(long = "allowlist", visible_alias = "AL")]
    pub allowlist: Option<PathBuf>,

    /// Reserved: dynamically loaded verifier plugins are out of scope. If given, a
    /// warning is logged and the server falls back to `AllowAllVerifier`. `-AU` in the
    /// original's flag table.
    #[arg(long = "auth-plugin", visible_alias = "AU")]
    pub auth_plugin: Option<PathBuf>,

    /// Where to write the replay log and access list, if recording/persisting at all.
    #[arg(long = "save-directory")]
    pub save_directory: Option<PathBuf>,
}

impl ServerConfig {
    /// Mirrors the original's `Configuration::valid()`: TLS needs both cert and key.
    pub fn valid(&self) -> bool {
        self.cert.is_some() == self.key.is_some()
    }

    pub fn uses_tls(&self) -> bool {
        self.cert.is_some() && self.key.is_some()
    }

    pub fn resolved_port(&self) -> u16 {
        self.port.unwrap_or(10_000 + self.server_type as u16)
    }

    pub fn resolved_max_message_size(&self) -> u64 {
        self.max_message_size
            .unwrap_or(crate::net::connection::DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn resolved_max_clients(&self) -> u32 {
        self.max_clients.unwrap_or(u32::MAX)
    }

    pub fn replay_file_path(&self) -> PathBuf {
        let file_name = format!("{}.temstream_replay", self.name);
        match &self.save_directory {
            Some(dir) => dir.join(file_name),
            None => PathBuf::from(file_name),
        }
    }
}
