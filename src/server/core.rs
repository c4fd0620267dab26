//! ServerCore (C5): accept, broadcast, replay, access control, rate limiting.
//!
//! Owns the listener, the set of live `ServerPeer`s, the `Access` list, the `ServerType`,
//! the recording flag/log path, and the moderator registry — mirrored one-to-one from
//! the ownership list in spec.md §4.4.

use std::net::TcpListener;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::address::{Address, Source};
use crate::error::Result;
use crate::message::{
    Access, BanUser, Credentials, GetReplay, GetTimeRange, Packet, Payload, PeerFlags,
    RequestServerInformation, ServerInformation, VerifyLogin,
};
use crate::net::{Connection, FramedSocket};
use crate::server::auth::{AllowAllVerifier, Verifier};
use crate::server::config::ServerConfig;
use crate::server::peer::{self, PeerState, ServerPeer};
use crate::server::replay;

pub struct ServerCore {
    pub config: ServerConfig,
    pub source: Source,
    access: Mutex<Option<Access>>,
    /// Whichever of `config.banlist`/`config.allowlist` was actually loaded at startup,
    /// if any; rewritten with the live member set on clean shutdown (spec §6.4: "if a
    /// file was loaded, it is rewritten on clean shutdown").
    loaded_access_path: Option<std::path::PathBuf>,
    verifier: Box<dyn Verifier>,
    peers: DashMap<u64, Arc<Mutex<ServerPeer>>>,
    next_id: AtomicU64,
}

impl ServerCore {
    pub fn new(config: ServerConfig) -> Self {
        if config.auth_plugin.is_some() {
            log::warn!("--auth-plugin is not supported; falling back to AllowAllVerifier");
        }
        let (loaded_access_path, access) = load_initial_access(&config);
        let source = Source::new(Address::new(&config.host, config.resolved_port()), &config.name);
        Self {
            config,
            source,
            access: Mutex::new(access),
            loaded_access_path,
            verifier: Box::new(AllowAllVerifier),
            peers: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn with_verifier(mut self, verifier: Box<dyn Verifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.resolved_port()))
            .map_err(|e| crate::error::TemStreamError::Transport(format!("bind failed: {e}")))?;
        Ok(listener)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Rewrite the banlist/allowlist file this server started from with the current
    /// member set, if one was loaded. A no-op when no `--banlist`/`--allowlist` was
    /// given. Called once on clean shutdown.
    pub fn persist_access(&self) -> Result<()> {
        let Some(path) = &self.loaded_access_path else {
            return Ok(());
        };
        let access = self.access.lock();
        let Some(access) = access.as_ref() else {
            return Ok(());
        };
        crate::server::access::save(path, access)
    }

    pub fn accept(&self, socket: FramedSocket) -> Option<u64> {
        if self.peers.len() as u32 >= self.config.resolved_max_clients() {
            log::warn!("rejecting connection: at max-clients capacity");
            return None;
        }
        let connection = Connection::new(socket).with_max_message_size(self.config.resolved_max_message_size());
        let peer = ServerPeer::new(connection, self.config.message_rate_secs);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.peers.insert(id, Arc::new(Mutex::new(peer)));
        Some(id)
    }

    fn replay_path(&self) -> std::path::PathBuf {
        self.config.replay_file_path()
    }

    /// Service one peer for a single poll round: read what's available, handle every
    /// fully-framed packet, flush the outbound queue. Returns `false` if the peer has
    /// hung up or failed fatally, at which point the caller should drop it.
    pub fn service_peer(&self, id: u64, timeout_ms: u64) -> bool {
        let Some(entry) = self.peers.get(&id) else {
            return false;
        };
        let peer_arc = Arc::clone(&entry);
        drop(entry);

        let mut incoming = Vec::new();
        {
            let mut peer = peer_arc.lock();
            if !peer.connection.read_and_handle(timeout_ms, &mut incoming) {
                peer.close();
                self.peers.remove(&id);
                return false;
            }
        }

        for packet in incoming {
            if let Err(e) = self.handle_packet(id, &peer_arc, packet) {
                log::warn!("closing peer {id}: {e}");
                let mut peer = peer_arc.lock();
                peer.close();
                self.peers.remove(&id);
                return false;
            }
        }

        let mut peer = peer_arc.lock();
        if !peer.connection.flush() {
            peer.close();
            self.peers.remove(&id);
            return false;
        }
        true
    }

    fn handle_packet(&self, id: u64, peer_arc: &Arc<Mutex<ServerPeer>>, packet: Packet) -> Result<()> {
        let state = peer_arc.lock().state.clone();
        match state {
            PeerState::AwaitingCredentials => self.handle_handshake(peer_arc, packet),
            PeerState::Live => self.handle_live_packet(id, peer_arc, packet),
            PeerState::Closed => Ok(()),
        }
    }

    fn handle_handshake(&self, peer_arc: &Arc<Mutex<ServerPeer>>, packet: Packet) -> Result<()> {
        let Payload::Credentials(credentials) = packet.payload else {
            return Err(crate::error::TemStreamError::Protocol {
                addr: None,
                reason: "expected Credentials while awaiting handshake".into(),
            });
        };
        let username = peer::verify_credentials(self.verifier.as_ref(), &credentials).ok_or_else(|| {
            crate::error::TemStreamError::Authentication {
                addr: None,
                reason: format!("credential rejected ({})", redact_credentials(&credentials)),
            }
        })?;
        let flags = match &credentials {
            Credentials::Token(_) => PeerFlags::WRITE_ACCESS,
            Credentials::UserPass(_, _) => PeerFlags::WRITE_ACCESS,
        };
        let access_guard = self.access.lock();
        let info = {
            let mut peer = peer_arc.lock();
            peer.complete_handshake(username, flags, access_guard.as_ref())?
        };
        drop(access_guard);

        let reply = Packet {
            source: self.source.clone(),
            payload: Payload::VerifyLogin(VerifyLogin {
                server_name: self.config.name.clone(),
                peer_information: info,
                server_type: self.config.server_type,
                send_rate_secs: self.config.message_rate_secs,
            }),
        };
        peer_arc.lock().connection.send_packet(&reply)
    }

    fn handle_live_packet(&self, id: u64, peer_arc: &Arc<Mutex<ServerPeer>>, packet: Packet) -> Result<()> {
        let now = std::time::Instant::now();
        {
            let mut peer = peer_arc.lock();
            if is_stream_payload(&packet.payload) && peer.is_rate_limited(now) {
                return Err(crate::error::TemStreamError::Rate { addr: None });
            }
        }

        // Step 1: variant check.
        if is_stream_payload(&packet.payload) {
            if !self.config.server_type.accepts(&packet.payload) {
                return Err(crate::error::TemStreamError::Protocol {
                    addr: None,
                    reason: "payload variant not allowed by this server's type".into(),
                });
            }
            peer_arc.lock().mark_message_sent(now);
            return self.handle_stream_payload(id, packet);
        }

        match packet.payload {
            Payload::RequestServerInformation(RequestServerInformation) => {
                self.handle_request_server_information(peer_arc)
            }
            Payload::BanUser(ban) => self.handle_ban_user(peer_arc, ban),
            Payload::GetTimeRange(GetTimeRange) => self.handle_get_time_range(peer_arc),
            Payload::GetReplay(get) => self.handle_get_replay(peer_arc, get),
            _ => Err(crate::error::TemStreamError::Protocol {
                addr: None,
                reason: "unexpected payload while live".into(),
            }),
        }
    }

    fn handle_stream_payload(&self, sender_id: u64, mut packet: Packet) -> Result<()> {
        packet.source = self.source.clone();
        if self.config.record {
            let now_ms = now_ms();
            let encoded = crate::message::codec::encode_packet(&packet)?;
            replay::append(&self.replay_path(), now_ms, &encoded)?;
        }
        let access = self.access.lock().clone();
        for entry in self.peers.iter() {
            let (&other_id, other) = (entry.key(), entry.value());
            if other_id == sender_id {
                continue;
            }
            let other = Arc::clone(other);
            let mut other_peer = other.lock();
            if !other_peer.is_live() {
                continue;
            }
            if let (Some(name), Some(access)) = (other_peer.name(), access.as_ref()) {
                if access.is_banned(name) {
                    continue;
                }
            }
            if let Err(e) = other_peer.connection.send_packet(&packet) {
                log::warn!("failed to queue broadcast for peer {other_id}: {e}");
            }
        }
        Ok(())
    }

    fn handle_request_server_information(&self, peer_arc: &Arc<Mutex<ServerPeer>>) -> Result<()> {
        {
            let peer = peer_arc.lock();
            if !peer.info.as_ref().map(|i| i.flags.is_moderator()).unwrap_or(false) {
                return Err(crate::error::TemStreamError::Authentication {
                    addr: None,
                    reason: "RequestServerInformation requires Moderator or Owner".into(),
                });
            }
        }
        let access = self.access.lock();
        let peers = self
            .peers
            .iter()
            .filter_map(|entry| entry.value().lock().info.clone())
            .collect();
        let ban_list = access.as_ref().map(|a| a.members.clone()).unwrap_or_default();
        let info = ServerInformation { peers, ban_list };
        if log::log_enabled!(log::Level::Debug) {
            match serde_json::to_string(&info) {
                Ok(json) => log::debug!("server information snapshot: {json}"),
                Err(e) => log::debug!("failed to serialize server information for logging: {e}"),
            }
        }
        let reply = Packet { source: self.source.clone(), payload: Payload::ServerInformation(info) };
        peer_arc.lock().connection.send_packet(&reply)
    }

    fn handle_ban_user(&self, peer_arc: &Arc<Mutex<ServerPeer>>, ban: BanUser) -> Result<()> {
        {
            let peer = peer_arc.lock();
            if !peer.info.as_ref().map(|i| i.flags.is_moderator()).unwrap_or(false) {
                return Err(crate::error::TemStreamError::Authentication {
                    addr: None,
                    reason: "BanUser requires Moderator or Owner".into(),
                });
            }
        }
        {
            let mut access = self.access.lock();
            let access = access.get_or_insert_with(|| Access::new(true));
            access.members.insert(ban.name.clone());
        }
        for entry in self.peers.iter() {
            let other = Arc::clone(entry.value());
            let mut other_peer = other.lock();
            if other_peer.name() == Some(ban.name.as_str()) {
                other_peer.close();
            }
        }
        self.peers.retain(|_, p| p.lock().state != PeerState::Closed);
        Ok(())
    }

    fn handle_get_time_range(&self, peer_arc: &Arc<Mutex<ServerPeer>>) -> Result<()> {
        let range = replay::time_range(&self.replay_path())?;
        let payload = match range {
            Some(range) => Payload::TimeRange(range),
            None => Payload::NoReplay(crate::message::NoReplay),
        };
        let reply = Packet { source: self.source.clone(), payload };
        peer_arc.lock().connection.send_packet(&reply)
    }

    fn handle_get_replay(&self, peer_arc: &Arc<Mutex<ServerPeer>>, get: GetReplay) -> Result<()> {
        let records = replay::replay_at(&self.replay_path(), get.timestamp_ms)?;
        let peer = peer_arc.lock();
        for encoded in records {
            let reply = Packet {
                source: self.source.clone(),
                payload: Payload::Replay(crate::message::Replay { encoded_packet: encoded }),
            };
            peer.connection.send_packet(&reply)?;
        }
        let terminator = Packet {
            source: self.source.clone(),
            payload: Payload::NoReplay(crate::message::NoReplay),
        };
        peer.connection.send_packet(&terminator)
    }
}

/// A short, non-reversible tag for a rejected credential, safe to put in logs without
/// leaking the token or password itself.
fn redact_credentials(credentials: &Credentials) -> String {
    use sha2::{Digest, Sha256};
    let raw = match credentials {
        Credentials::Token(token) => token.as_bytes(),
        Credentials::UserPass(user, _) => user.as_bytes(),
    };
    let digest = Sha256::digest(raw);
    let hex = format!("{digest:x}");
    format!("sha256:{}", &hex[..8])
}

fn is_stream_payload(payload: &Payload) -> bool {
    matches!(
        payload,
        Payload::Text(_)
            | Payload::Chat(_)
            | Payload::Image(_)
            | Payload::Video(_)
            | Payload::Audio(_)
            | Payload::ServerLinks(_)
    )
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn load_initial_access(config: &ServerConfig) -> (Option<std::path::PathBuf>, Option<Access>) {
    if let Some(path) = &config.banlist {
        match crate::server::access::load(path, true) {
            Ok(a) => return (Some(path.clone()), Some(a)),
            Err(e) => log::error!("failed to load banlist {path:?}: {e}"),
        }
    }
    if let Some(path) = &config.allowlist {
        match crate::server::access::load(path, false) {
            Ok(a) => return (Some(path.clone()), Some(a)),
            Err(e) => log::error!("failed to load allowlist {path:?}: {e}"),
        }
    }
    (None, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Audio, Chat};
    use std::net::{TcpListener, TcpStream};

    fn test_config(server_type: crate::message::ServerType) -> ServerConfig {
        ServerConfig {
            server_type,
            host: "127.0.0.1".into(),
            port: None,
            name: "test-server".into(),
            max_clients: None,
            message_rate_secs: 0,
            max_message_size: None,
            record: false,
            cert: None,
            key: None,
            banlist: None,
            allowlist: None,
            auth_plugin: None,
            save_directory: None,
        }
    }

    /// Connect a fresh loopback pair: a client-side `Connection` the test drives
    /// directly, and the matching server-side `FramedSocket` to hand to `accept`.
    fn connect_pair(listener: &TcpListener) -> (Connection, FramedSocket) {
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server_stream, _) = listener.accept().unwrap();
        (Connection::new(FramedSocket::Plain(client)), FramedSocket::Plain(server_stream))
    }

    /// Drive a full handshake for `username` against `core`, returning the assigned
    /// peer id and the client-side `Connection` used to send/receive after it.
    fn handshake(core: &ServerCore, listener: &TcpListener, username: &str) -> (u64, Connection) {
        let (mut conn, socket) = connect_pair(listener);
        let id = core.accept(socket).expect("server accepted the connection");
        let creds = Packet {
            payload: Payload::Credentials(Credentials::Token(username.into())),
            source: Source::empty(),
        };
        conn.send_packet(&creds).unwrap();
        assert!(conn.flush());
        assert!(core.service_peer(id, 200));

        let mut received = Vec::new();
        for _ in 0..50 {
            if !conn.read_and_handle(20, &mut received) || !received.is_empty() {
                break;
            }
        }
        assert_eq!(received.len(), 1, "expected exactly one VerifyLogin reply");
        assert!(matches!(received[0].payload, Payload::VerifyLogin(_)));
        (id, conn)
    }

    #[test]
    fn chat_broadcast_reaches_only_the_other_peer() {
        let core = ServerCore::new(test_config(crate::message::ServerType::Chat));
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (id_a, mut conn_a) = handshake(&core, &listener, "A");
        let (id_b, mut conn_b) = handshake(&core, &listener, "B");

        let chat = Packet {
            payload: Payload::Chat(Chat { author: "A".into(), message: "hi".into(), timestamp_ms: 1 }),
            source: Source::empty(),
        };
        conn_a.send_packet(&chat).unwrap();
        assert!(conn_a.flush());
        assert!(core.service_peer(id_a, 200));
        // B has nothing incoming this round, but service_peer still flushes the
        // broadcast that was just queued onto B's connection.
        assert!(core.service_peer(id_b, 200));

        let mut out_b = Vec::new();
        for _ in 0..50 {
            if !conn_b.read_and_handle(20, &mut out_b) || !out_b.is_empty() {
                break;
            }
        }
        assert_eq!(out_b.len(), 1);
        match &out_b[0].payload {
            Payload::Chat(c) => {
                assert_eq!(c.author, "A");
                assert_eq!(c.message, "hi");
            }
            other => panic!("expected Chat, got {other:?}"),
        }

        let mut out_a = Vec::new();
        conn_a.read_and_handle(20, &mut out_a);
        assert!(out_a.is_empty(), "the sender must not receive its own broadcast");
    }

    #[test]
    fn variant_mismatch_disconnects_the_sender_without_broadcasting() {
        let core = ServerCore::new(test_config(crate::message::ServerType::Text));
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (id_k, mut conn_k) = handshake(&core, &listener, "K");
        let (_id_other, mut conn_other) = handshake(&core, &listener, "Other");

        let audio = Packet {
            payload: Payload::Audio(Audio { bytes: vec![1, 2, 3] }),
            source: Source::empty(),
        };
        conn_k.send_packet(&audio).unwrap();
        assert!(conn_k.flush());
        assert!(!core.service_peer(id_k, 200), "variant mismatch must close the sender");
        assert_eq!(core.peer_count(), 1);

        let mut out_other = Vec::new();
        conn_other.read_and_handle(20, &mut out_other);
        assert!(out_other.is_empty(), "a rejected payload must never be broadcast");
    }

    #[test]
    fn moderator_ban_closes_peer_and_blocks_its_reconnect() {
        let core = ServerCore::new(test_config(crate::message::ServerType::Chat));
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let (id_mod, mut conn_mod) = handshake(&core, &listener, "M");
        let (id_x, mut conn_x) = handshake(&core, &listener, "X");

        // Credential-driven flag assignment only ever grants write access today; grant
        // Moderator directly on the peer record to exercise the ban path itself.
        {
            let entry = core.peers.get(&id_mod).unwrap();
            let mut peer = entry.lock();
            peer.info.as_mut().unwrap().flags = PeerFlags::MODERATOR;
        }

        let ban = Packet {
            payload: Payload::BanUser(BanUser { name: "X".into() }),
            source: Source::empty(),
        };
        conn_mod.send_packet(&ban).unwrap();
        assert!(conn_mod.flush());
        assert!(core.service_peer(id_mod, 200));

        assert_eq!(core.peer_count(), 1);
        assert!(core.peers.get(&id_x).is_none());
        assert!(core.access.lock().as_ref().unwrap().members.contains("X"));

        let mut out_x = Vec::new();
        let mut closed = false;
        for _ in 0..50 {
            if !conn_x.read_and_handle(20, &mut out_x) {
                closed = true;
                break;
            }
        }
        assert!(closed, "the banned peer's connection must be closed");

        // Reconnecting with the same banned name must be rejected during handshake.
        let (mut retry_conn, retry_socket) = connect_pair(&listener);
        let retry_id = core.accept(retry_socket).expect("server accepted the connection");
        let creds = Packet {
            payload: Payload::Credentials(Credentials::Token("X".into())),
            source: Source::empty(),
        };
        retry_conn.send_packet(&creds).unwrap();
        assert!(retry_conn.flush());
        assert!(!core.service_peer(retry_id, 200), "banned name must fail the handshake");

        let mut out_retry = Vec::new();
        retry_conn.read_and_handle(20, &mut out_retry);
        assert!(out_retry.is_empty(), "a rejected handshake must not receive VerifyLogin");
    }

    #[test]
    fn persist_access_rewrites_the_loaded_banlist_with_current_members() {
        let path = std::env::temp_dir()
            .join(format!("temstream-core-test-banlist-{}", std::process::id()));
        std::fs::write(&path, "carol\n").unwrap();

        let mut config = test_config(crate::message::ServerType::Chat);
        config.banlist = Some(path.clone());
        let core = ServerCore::new(config);
        core.access.lock().as_mut().unwrap().members.insert("dave".into());

        core.persist_access().unwrap();

        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.contains("carol"));
        assert!(saved.contains("dave"));
        std::fs::remove_file(&path).ok();
    }
}
