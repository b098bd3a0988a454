//! DCC listener and the multiplexed inbound loop.
//!
//! One task owns the listening socket and the read half of every connected
//! peer. It waits on whichever becomes ready first: a new connection, data
//! from any peer, or shutdown. Each peer's write half is driven by a small
//! writer task fed from the registry.

use crate::config::DccConfig;
use crate::dcc::framing::LineBuffer;
use crate::dcc::ip;
use crate::dcc::manager::DccManager;
use crate::dcc::registry::{ConnId, PeerHandle};
use crate::error::DccError;
use futures::stream::{self, BoxStream, SelectAll};
use futures::StreamExt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub type PeerReader = Box<dyn AsyncRead + Send + Unpin>;
pub type PeerWriter = Box<dyn AsyncWrite + Send + Unpin>;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Where peers reach this bot. Resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub local: SocketAddr,
    pub public_ip: Ipv4Addr,
}

/// Bind the listener and resolve the public address advertised in offers.
pub async fn bind(config: &DccConfig) -> Result<(TcpListener, Endpoint), DccError> {
    let listener = TcpListener::bind((config.listen_host.as_str(), config.listen_port))
        .await
        .map_err(DccError::Bind)?;
    let local = listener.local_addr().map_err(DccError::Bind)?;
    let public_ip = discover_public_ip(config).await?;
    Ok((listener, Endpoint { local, public_ip }))
}

/// Use `public_ip` from the config, or ask the lookup service.
pub async fn discover_public_ip(config: &DccConfig) -> Result<Ipv4Addr, DccError> {
    if let Some(configured) = &config.public_ip {
        let long = ip::encode(configured).map_err(|e| DccError::Discovery(e.to_string()))?;
        return Ok(Ipv4Addr::from(long));
    }

    let client = reqwest::Client::builder()
        .timeout(LOOKUP_TIMEOUT)
        .build()
        .map_err(|e| DccError::Discovery(e.to_string()))?;
    let body = client
        .get(&config.ip_lookup_url)
        .send()
        .await
        .and_then(|resp| resp.error_for_status())
        .map_err(|e| DccError::Discovery(e.to_string()))?
        .text()
        .await
        .map_err(|e| DccError::Discovery(e.to_string()))?;

    let long = ip::encode(&body)
        .map_err(|_| DccError::Discovery(format!("lookup service returned {:?}", body.trim())))?;
    Ok(Ipv4Addr::from(long))
}

/// A freshly admitted peer, ready to be watched by the loop.
pub(crate) struct Admitted {
    id: ConnId,
    nick: String,
    reader: PeerReader,
    cancel: CancellationToken,
}

enum ReadOutcome {
    Lines(Vec<String>),
    Closed,
    Failed(io::Error),
}

struct PeerRead {
    id: ConnId,
    nick: String,
    outcome: ReadOutcome,
}

impl DccManager {
    /// Run the inbound loop until the shutdown token fires.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        let shutdown = self.shutdown_token().clone();
        let mut peers: SelectAll<BoxStream<'static, PeerRead>> = SelectAll::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!(%addr, "Received DCC connection request");
                        let (reader, writer) = stream.into_split();
                        let admitted = self.admit(addr, Box::new(reader), Box::new(writer));
                        if let Some(admitted) = admitted {
                            peers.push(watch(admitted, self.read_chunk()));
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "DCC accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(read) = peers.next(), if !peers.is_empty() => self.on_read(read),
            }
        }

        let closed = self.registry().close_all();
        info!(closed, "DCC inbound loop exited");
    }

    /// Promote a new transport to a connected peer if its IP was expected.
    ///
    /// Unidentified transports are dropped, which closes them.
    pub(crate) fn admit(
        &self,
        addr: SocketAddr,
        reader: PeerReader,
        writer: PeerWriter,
    ) -> Option<Admitted> {
        let ip = addr.ip().to_canonical();
        let Some(nick) = self.registry().claim_pending(ip) else {
            warn!(%addr, error = %DccError::UnidentifiedPeer(ip), "DCC connect from unknown ip");
            return None;
        };
        info!(%nick, %ip, "DCC user identified");

        let id = self.next_conn_id();
        let cancel = self.shutdown_token().child_token();
        let outbound = spawn_writer(nick.clone(), writer, cancel.clone());
        let addr = SocketAddr::new(ip, addr.port());
        let handle = PeerHandle::new(id, nick.clone(), addr, outbound, cancel.clone());
        if let Some(previous) = self.registry().insert(handle) {
            info!(%nick, previous = previous.id, "replacing existing DCC connection");
            previous.close();
        }

        if let Err(e) = self.say(&nick, &format!("Connection with user {nick} established")) {
            warn!(%nick, error = %e, "DCC greeting not queued");
        }
        Some(Admitted {
            id,
            nick,
            reader,
            cancel,
        })
    }

    fn on_read(&self, read: PeerRead) {
        let PeerRead { id, nick, outcome } = read;
        match outcome {
            ReadOutcome::Lines(lines) => {
                for line in lines {
                    debug!(%nick, line = ?line, "<");
                    self.process_message(&nick, line);
                }
            }
            ReadOutcome::Closed => {
                info!(%nick, "DCC connection closed [no data]");
                self.release(&nick, id);
            }
            ReadOutcome::Failed(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                info!(%nick, "DCC connection closed [reset]");
                self.release(&nick, id);
            }
            ReadOutcome::Failed(source) => {
                let err = DccError::PeerIo {
                    nick: nick.clone(),
                    source,
                };
                error!(error = %err, "DCC connection closed [error]");
                self.release(&nick, id);
            }
        }
    }

    fn release(&self, nick: &str, id: ConnId) {
        match self.registry().remove_conn(nick, id) {
            Some(handle) => handle.close(),
            None => info!(%nick, "DCC peer not in registry"),
        }
    }
}

/// Turn a peer's read half into a stream of framed reads.
///
/// The stream ends after a close or error, or as soon as the peer's token is
/// cancelled. The line buffer lives and dies with it.
fn watch(admitted: Admitted, chunk: usize) -> BoxStream<'static, PeerRead> {
    let Admitted {
        id,
        nick,
        reader,
        cancel,
    } = admitted;

    stream::unfold(Some((reader, LineBuffer::new())), move |state| {
        let nick = nick.clone();
        async move {
            let (mut reader, mut buffer) = state?;
            let mut buf = vec![0u8; chunk];
            let (outcome, next) = match reader.read(&mut buf).await {
                Ok(0) => (ReadOutcome::Closed, None),
                Ok(n) => {
                    let lines = buffer.push(&buf[..n]);
                    (ReadOutcome::Lines(lines), Some((reader, buffer)))
                }
                Err(e) => (ReadOutcome::Failed(e), None),
            };
            Some((PeerRead { id, nick, outcome }, next))
        }
    })
    .take_until(cancel.cancelled_owned())
    .boxed()
}

/// Drain queued lines into the peer's write half until cancelled or the
/// registry drops the sender, then shut the write half down.
fn spawn_writer(
    nick: String,
    mut writer: PeerWriter,
    cancel: CancellationToken,
) -> mpsc::UnboundedSender<String> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                line = rx.recv() => {
                    let Some(line) = line else { break };
                    debug!(%nick, line = ?line, ">");
                    let framed = format!("{line}\r\n");
                    if let Err(e) = writer.write_all(framed.as_bytes()).await {
                        warn!(%nick, error = %e, "DCC write failed");
                        break;
                    }
                }
            }
        }
        let _ = writer.shutdown().await;
    });
    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dcc::manager::{APPLICATION_PREFIX, MESSAGE_COMMAND};
    use crate::dcc::registry::PeerState;
    use crate::logging::TracingEventLog;
    use crate::pool::WorkerPool;
    use crate::protocol::{Dispatcher, Event, HandlerSet};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpStream;

    fn loopback_config() -> DccConfig {
        DccConfig {
            listen_host: "127.0.0.1".to_string(),
            public_ip: Some("203.0.113.7".to_string()),
            ..DccConfig::default()
        }
    }

    fn manager_with_lines() -> (Arc<DccManager>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = HandlerSet::new(APPLICATION_PREFIX).on(MESSAGE_COMMAND, move |ev: &Event| {
            let _ = tx.send(ev.message().to_string());
            Ok(())
        });
        let (pool, _failures) = WorkerPool::new(2);
        let manager = DccManager::new(
            "DevBot",
            &loopback_config(),
            Dispatcher::new(Arc::new(TracingEventLog)),
            app,
            pool,
            CancellationToken::new(),
        );
        (manager, rx)
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        cond()
    }

    #[tokio::test]
    async fn test_configured_public_ip_skips_lookup() {
        let ip = discover_public_ip(&loopback_config()).await.unwrap();
        assert_eq!(ip, Ipv4Addr::new(203, 0, 113, 7));

        let bad = DccConfig {
            public_ip: Some("203.0.113".to_string()),
            ..DccConfig::default()
        };
        let err = discover_public_ip(&bad).await.unwrap_err();
        assert!(err.is_startup());
    }

    #[tokio::test]
    async fn test_admit_registered_peer() {
        let (manager, _rx) = manager_with_lines();
        manager.register_pending("alice", "10.0.0.5").unwrap();

        let (client, server_side) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(server_side);
        let admitted = manager.admit(
            "10.0.0.5:5000".parse().unwrap(),
            Box::new(reader),
            Box::new(writer),
        );
        assert!(admitted.is_some());
        assert_eq!(manager.registry().state("alice"), PeerState::Connected);
        assert_eq!(manager.connected(), vec!["alice"]);

        let mut lines = BufReader::new(client).lines();
        let greeting = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(greeting.as_deref(), Some("Connection with user alice established"));
    }

    #[tokio::test]
    async fn test_admit_rejects_unknown_ip() {
        let (manager, _rx) = manager_with_lines();
        manager.register_pending("alice", "10.0.0.5").unwrap();

        let (_client, server_side) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(server_side);
        let admitted = manager.admit(
            "10.0.0.6:5000".parse().unwrap(),
            Box::new(reader),
            Box::new(writer),
        );
        assert!(admitted.is_none());
        assert!(manager.connected().is_empty());
        assert_eq!(manager.registry().state("alice"), PeerState::Pending);
    }

    #[tokio::test]
    async fn test_loop_frames_lines_and_cleans_up() {
        let (manager, mut rx) = manager_with_lines();
        let endpoint = manager.start(&loopback_config()).await.unwrap();
        manager.register_pending("alice", "127.0.0.1").unwrap();

        let offer = manager.offer("alice", "127.0.0.1").unwrap();
        assert_eq!(offer.port, endpoint.local.port());
        assert_eq!(offer.ip, Ipv4Addr::new(203, 0, 113, 7));

        let stream = TcpStream::connect(endpoint.local).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let greeting = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(greeting.as_deref(), Some("Connection with user alice established"));

        write_half.write_all(b"PING\r\nPO").await.unwrap();
        write_half.flush().await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(first.as_deref(), Some("PING"));

        write_half.write_all(b"NG\r\nINC").await.unwrap();
        write_half.flush().await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(second.as_deref(), Some("PONG"));

        // "INC" has no separator yet and must not be dispatched
        assert!(tokio::time::timeout(Duration::from_millis(200), rx.recv()).await.is_err());

        manager.say("alice", "hello back").unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.as_deref(), Some("hello back"));

        drop(write_half);
        drop(lines);
        assert!(wait_until(|| !manager.registry().contains("alice")).await);
        assert!(matches!(manager.say("alice", "gone"), Err(DccError::NotConnected(_))));

        manager.shutdown_token().cancel();
    }

    #[tokio::test]
    async fn test_loop_drops_unidentified_connection() {
        let (manager, _rx) = manager_with_lines();
        let endpoint = manager.start(&loopback_config()).await.unwrap();

        let mut stream = TcpStream::connect(endpoint.local).await.unwrap();
        let mut buf = [0u8; 16];
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(n, 0);
        assert!(manager.connected().is_empty());

        manager.shutdown_token().cancel();
    }

    #[tokio::test]
    async fn test_disconnect_closes_socket() {
        let (manager, _rx) = manager_with_lines();
        let endpoint = manager.start(&loopback_config()).await.unwrap();
        manager.register_pending("bob", "127.0.0.1").unwrap();

        let stream = TcpStream::connect(endpoint.local).await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        let greeting = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap();
        assert!(greeting.is_some());

        assert!(manager.disconnect("bob"));
        assert_eq!(manager.registry().state("bob"), PeerState::Closed);
        let eof = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap_or(None);
        assert!(eof.is_none());

        manager.shutdown_token().cancel();
    }

    #[tokio::test]
    async fn test_reset_removes_peer() {
        let (manager, _rx) = manager_with_lines();
        let endpoint = manager.start(&loopback_config()).await.unwrap();
        manager.register_pending("alice", "127.0.0.1").unwrap();

        let mut stream = TcpStream::connect(endpoint.local).await.unwrap();
        let mut greeting = [0u8; 8];
        tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut greeting))
            .await
            .unwrap()
            .unwrap();
        assert!(manager.registry().contains("alice"));

        stream.set_linger(Some(Duration::ZERO)).unwrap();
        drop(stream);
        assert!(wait_until(|| !manager.registry().contains("alice")).await);
        assert_eq!(manager.registry().state("alice"), PeerState::Closed);

        manager.shutdown_token().cancel();
    }

    #[tokio::test]
    async fn test_read_error_releases_peer() {
        let (manager, _rx) = manager_with_lines();
        manager.register_pending("bob", "10.0.0.7").unwrap();

        let (_client, server_side) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(server_side);
        let admitted = manager
            .admit("10.0.0.7:5000".parse().unwrap(), Box::new(reader), Box::new(writer))
            .unwrap();
        let cancel = admitted.cancel.clone();
        assert!(manager.registry().contains("bob"));

        manager.on_read(PeerRead {
            id: admitted.id,
            nick: admitted.nick.clone(),
            outcome: ReadOutcome::Failed(io::Error::other("broken pipe on read")),
        });
        assert!(!manager.registry().contains("bob"));
        assert!(cancel.is_cancelled());
        assert!(matches!(manager.say("bob", "gone"), Err(DccError::NotConnected(_))));
    }

    #[tokio::test]
    async fn test_stale_read_error_keeps_newer_connection() {
        let (manager, _rx) = manager_with_lines();
        let mut ids = Vec::new();
        let mut clients = Vec::new();
        for port in [5000, 5001] {
            manager.register_pending("carol", "10.0.0.8").unwrap();
            let (client, server_side) = tokio::io::duplex(1024);
            let (reader, writer) = tokio::io::split(server_side);
            let addr = SocketAddr::from(([10, 0, 0, 8], port));
            let admitted = manager.admit(addr, Box::new(reader), Box::new(writer)).unwrap();
            ids.push(admitted.id);
            clients.push(client);
        }

        manager.on_read(PeerRead {
            id: ids[0],
            nick: "carol".to_string(),
            outcome: ReadOutcome::Failed(io::ErrorKind::ConnectionReset.into()),
        });
        assert!(manager.registry().contains("carol"));

        manager.on_read(PeerRead {
            id: ids[1],
            nick: "carol".to_string(),
            outcome: ReadOutcome::Closed,
        });
        assert!(!manager.registry().contains("carol"));
    }

    #[tokio::test]
    async fn test_admit_stores_canonical_address() {
        let (manager, _rx) = manager_with_lines();
        manager.register_pending("dave", "10.0.0.9").unwrap();

        let (_client, server_side) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(server_side);
        let mapped: SocketAddr = "[::ffff:10.0.0.9]:5000".parse().unwrap();
        assert!(manager.admit(mapped, Box::new(reader), Box::new(writer)).is_some());

        manager.register_pending("dave", "10.0.0.9").unwrap();
        assert!(manager.disconnect("dave"));
        assert_eq!(manager.registry().pending_nick("10.0.0.9".parse().unwrap()), None);
    }

    #[tokio::test]
    async fn test_shutdown_closes_peers() {
        let (manager, _rx) = manager_with_lines();
        let endpoint = manager.start(&loopback_config()).await.unwrap();
        manager.register_pending("carol", "127.0.0.1").unwrap();

        let stream = TcpStream::connect(endpoint.local).await.unwrap();
        let mut lines = BufReader::new(stream).lines();
        tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap();
        assert!(manager.registry().contains("carol"));

        manager.shutdown_token().cancel();
        assert!(wait_until(|| manager.connected().is_empty()).await);
    }
}
