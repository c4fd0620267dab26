//! Client-side CLI configuration. Not present in the original's table verbatim, but
//! required to exercise C6/C7 end to end (spec §6.4 supplement).

use std::path::PathBuf;

use clap::Args;

#[derive(Debug, Clone, Args)]
pub struct ClientConfig {
    #[arg(long)]
    pub host: String,

    #[arg(long)]
    pub port: u16,

    /// Display name sent as part of Credentials.
    #[arg(long, default_value = "guest")]
    pub name: String,

    #[arg(long)]
    pub token: Option<String>,

    #[arg(long)]
    pub user: Option<String>,

    #[arg(long)]
    pub pass: Option<String>,

    /// Trust an extra TLS root (PEM); implies a TLS connection.
    #[arg(long)]
    pub cert: Option<PathBuf>,
}

impl ClientConfig {
    pub fn credentials(&self) -> crate::message::Credentials {
        match (&self.token, &self.user, &self.pass) {
            (Some(token), _, _) => crate::message::Credentials::Token(token.clone()),
            (None, Some(user), Some(pass)) => {
                crate::message::Credentials::UserPass(user.clone(), pass.clone())
            }
            _ => crate::message::Credentials::UserPass(self.name.clone(), String::new()),
        }
    }
}
