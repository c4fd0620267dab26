//! ServerPeer (C4): per-connection state machine on the server side.
//!
//! `AwaitingCredentials` → `Live` → `Closed`. A peer only leaves `AwaitingCredentials`
//! once it has sent `Credentials` that the configured `Verifier` accepts and the
//! resulting username clears the server's `Access` list; any other payload received
//! while awaiting credentials is a protocol error and closes the connection.

use std::time::Instant;

use crate::error::{Result, TemStreamError};
use crate::message::{Access, PeerFlags, PeerInformation};
use crate::net::Connection;
use crate::server::auth::Verifier;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerState {
    AwaitingCredentials,
    Live,
    Closed,
}

pub struct ServerPeer {
    pub connection: Connection,
    pub state: PeerState,
    pub info: Option<PeerInformation>,
    pub last_message_at: Option<Instant>,
    pub message_rate_secs: u32,
}

impl ServerPeer {
    pub fn new(connection: Connection, message_rate_secs: u32) -> Self {
        Self {
            connection,
            state: PeerState::AwaitingCredentials,
            info: None,
            last_message_at: None,
            message_rate_secs,
        }
    }

    pub fn is_live(&self) -> bool {
        self.state == PeerState::Live
    }

    pub fn name(&self) -> Option<&str> {
        self.info.as_ref().map(|i| i.name.as_str())
    }

    /// True if this peer has sent a stream payload before and it arrived within
    /// `message_rate_secs` of this one; a 0 window means rate limiting is disabled, and
    /// a peer's first stream payload is never rate-limited (there is no previous one).
    pub fn is_rate_limited(&self, now: Instant) -> bool {
        self.message_rate_secs > 0
            && self
                .last_message_at
                .is_some_and(|last| now.duration_since(last).as_secs() < self.message_rate_secs as u64)
    }

    pub fn mark_message_sent(&mut self, now: Instant) {
        self.last_message_at = Some(now);
    }

    /// Attempt the handshake: verify credentials, then check the access list. On
    /// success, transitions to `Live` and returns the granted `PeerInformation`.
    pub fn complete_handshake(
        &mut self,
        username: String,
        flags: PeerFlags,
        access: Option<&Access>,
    ) -> Result<PeerInformation> {
        if let Some(access) = access {
            if access.is_banned(&username) {
                self.state = PeerState::Closed;
                return Err(TemStreamError::Authentication {
                    addr: None,
                    reason: format!("{username} is not permitted by this server's access list"),
                });
            }
        }
        let info = PeerInformation { name: username, flags };
        self.info = Some(info.clone());
        self.state = PeerState::Live;
        Ok(info)
    }

    pub fn close(&mut self) {
        self.state = PeerState::Closed;
        self.connection.close();
    }
}

/// Verify a `Credentials` value against `verifier`, returning the username it resolves
/// to, or `None` if verification failed.
pub fn verify_credentials(
    verifier: &dyn Verifier,
    credentials: &crate::message::Credentials,
) -> Option<String> {
    match credentials {
        crate::message::Credentials::Token(token) => verifier.verify_token(token),
        crate::message::Credentials::UserPass(user, pass) => {
            if verifier.verify_username_and_password(user, pass) {
                Some(user.clone())
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Credentials;
    use crate::net::FramedSocket;
    use crate::server::auth::AllowAllVerifier;
    use std::net::{TcpListener, TcpStream};

    fn dummy_connection() -> Connection {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let _ = listener.accept().unwrap();
        Connection::new(FramedSocket::Plain(client))
    }

    #[test]
    fn allow_all_verifier_resolves_token_as_username() {
        let verifier = AllowAllVerifier;
        let creds = Credentials::Token("alice".into());
        assert_eq!(verify_credentials(&verifier, &creds), Some("alice".into()));
    }

    #[test]
    fn handshake_rejects_banned_username() {
        let mut peer = ServerPeer::new(dummy_connection(), 0);
        let mut access = Access::new(true);
        access.members.insert("evil".into());
        let result = peer.complete_handshake("evil".into(), PeerFlags::empty(), Some(&access));
        assert!(result.is_err());
        assert_eq!(peer.state, PeerState::Closed);
    }

    #[test]
    fn handshake_succeeds_and_moves_to_live() {
        let mut peer = ServerPeer::new(dummy_connection(), 0);
        let access = Access::new(true);
        let result = peer.complete_handshake("alice".into(), PeerFlags::WRITE_ACCESS, Some(&access));
        assert!(result.is_ok());
        assert!(peer.is_live());
    }

    #[test]
    fn first_stream_payload_is_never_rate_limited() {
        // A peer freshly past the handshake has no prior stream payload, so even a
        // tight rate window must not reject the first one (spec scenario 6).
        let peer = ServerPeer::new(dummy_connection(), 2);
        assert!(!peer.is_rate_limited(Instant::now()));
    }

    #[test]
    fn second_payload_within_window_is_rate_limited() {
        let mut peer = ServerPeer::new(dummy_connection(), 2);
        let t0 = Instant::now();
        peer.mark_message_sent(t0);
        assert!(peer.is_rate_limited(t0));
    }
}
