//! DCC chat manager.
//!
//! Owns the connection registry and the two handler layers. Command events
//! (`DCC <CMD> ...` requests relayed from the IRC connection) are dispatched
//! synchronously; chat lines read from peer sockets are recorded and then
//! handed to the worker pool so that slow handlers never stall the I/O loop.

use crate::config::DccConfig;
use crate::dcc::ip;
use crate::dcc::parser::{parse_chat_offer, DccChatOffer};
use crate::dcc::registry::{ConnId, Registry};
use crate::dcc::server::{self, Endpoint};
use crate::error::DccError;
use crate::pool::WorkerPool;
use crate::protocol::{Dispatcher, Event, HandlerSet, Protocol};
use anyhow::Context;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Prefix of the built-in protocol handlers.
pub const PROTOCOL_PREFIX: &str = "onRawDCC_";
/// Prefix of the bot's own DCC handlers.
pub const APPLICATION_PREFIX: &str = "onDCC_";
/// Command token given to chat lines read from peer sockets.
pub const MESSAGE_COMMAND: &str = "DCCMSG";

pub struct DccManager {
    nick: String,
    registry: Registry,
    dispatcher: Dispatcher,
    protocol: Arc<HandlerSet>,
    application: Arc<HandlerSet>,
    pool: WorkerPool,
    shutdown: CancellationToken,
    endpoint: OnceCell<Endpoint>,
    next_conn: AtomicU64,
    read_chunk: usize,
}

impl DccManager {
    /// `shutdown` stops the inbound loop and every peer connection.
    pub fn new(
        nick: impl Into<String>,
        config: &DccConfig,
        dispatcher: Dispatcher,
        application: HandlerSet,
        pool: WorkerPool,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            nick: nick.into(),
            registry: Registry::new(),
            dispatcher,
            protocol: Arc::new(protocol_handlers()),
            application: Arc::new(application),
            pool,
            shutdown,
            endpoint: OnceCell::new(),
            next_conn: AtomicU64::new(1),
            read_chunk: config.read_chunk.max(1),
        })
    }

    /// Bind the listener, resolve the public address and spawn the inbound
    /// loop. On error the subsystem stays disabled.
    ///
    /// Only the first successful call binds; concurrent and later calls
    /// return the same endpoint.
    pub async fn start(self: &Arc<Self>, config: &DccConfig) -> Result<Endpoint, DccError> {
        let endpoint = self
            .endpoint
            .get_or_try_init(|| async {
                let (listener, endpoint) = server::bind(config).await?;
                info!(local = %endpoint.local, public = %endpoint.public_ip, "DCC listening");
                tokio::spawn(Arc::clone(self).serve(listener));
                Ok::<_, DccError>(endpoint)
            })
            .await?;
        Ok(*endpoint)
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint.get().copied()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub(crate) fn read_chunk(&self) -> usize {
        self.read_chunk
    }

    pub(crate) fn next_conn_id(&self) -> ConnId {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    /// Expect `nick` to connect from the dotted-quad `ip`.
    pub fn register_pending(&self, nick: &str, ip: &str) -> Result<(), DccError> {
        let ip = Ipv4Addr::from(ip::encode(ip)?);
        debug!(%nick, %ip, "DCC peer pending");
        self.registry.register_pending(nick, IpAddr::V4(ip));
        Ok(())
    }

    /// Register `nick` as pending from `peer_ip` and build the CHAT offer
    /// pointing at this bot's listener. The caller sends it as CTCP.
    pub fn offer(&self, nick: &str, peer_ip: &str) -> Result<DccChatOffer, DccError> {
        let endpoint = self.endpoint().ok_or(DccError::Disabled)?;
        self.register_pending(nick, peer_ip)?;
        Ok(DccChatOffer {
            ip: endpoint.public_ip,
            port: endpoint.local.port(),
        })
    }

    /// Send one chat line to a connected peer.
    pub fn say(&self, nick: &str, text: &str) -> Result<(), DccError> {
        let line = text.replace(['\r', '\n'], " ");
        if self.registry.send_line(nick, line) {
            Ok(())
        } else {
            Err(DccError::NotConnected(nick.to_string()))
        }
    }

    /// Close the connection with `nick`, if any.
    pub fn disconnect(&self, nick: &str) -> bool {
        match self.registry.remove(nick) {
            Some(handle) => {
                info!(%nick, "DCC connection closed [removed]");
                handle.close();
                true
            }
            None => false,
        }
    }

    /// Nicknames with a live DCC connection.
    pub fn connected(&self) -> Vec<String> {
        self.registry.nicks()
    }

    /// Handle a `DCC <CMD> <args>` request received over IRC.
    ///
    /// Runs the protocol layer, then the application layer, on the calling
    /// thread. Returns how many layers failed.
    pub fn process_command(&self, sender: &str, target: &str, text: &str) -> usize {
        let (command, args) = text.split_once(' ').unwrap_or((text, ""));
        let event = Event::new(sender, command, target, args, Protocol::Dcc);
        self.dispatcher
            .dispatch(&[self.protocol.as_ref(), self.application.as_ref()], &event)
    }

    /// Handle one chat line read from `sender`'s socket.
    ///
    /// The event is recorded immediately; both layers run on the worker pool,
    /// in order for a given sender.
    pub fn process_message(&self, sender: &str, line: String) {
        let event = Arc::new(Event::new(
            sender,
            MESSAGE_COMMAND,
            self.nick.as_str(),
            line,
            Protocol::DccMessage,
        ));
        self.dispatcher.record(&event);

        for set in [&self.protocol, &self.application] {
            let set = Arc::clone(set);
            let event = Arc::clone(&event);
            let dispatcher = self.dispatcher.clone();
            let task = format!("{}{}", set.prefix(), MESSAGE_COMMAND);
            self.pool
                .submit_keyed(sender, task, move || dispatcher.invoke(&set, &event));
        }
    }
}

fn protocol_handlers() -> HandlerSet {
    HandlerSet::new(PROTOCOL_PREFIX)
        .on("CHAT", |ev: &Event| {
            let offer = parse_chat_offer(ev.message())
                .with_context(|| format!("malformed DCC CHAT offer from {}", ev.sender()))?;
            info!(
                sender = ev.sender(),
                ip = %offer.ip,
                port = offer.port,
                "DCC CHAT offer received"
            );
            Ok(())
        })
        .on("SEND", |ev: &Event| {
            info!(sender = ev.sender(), "DCC SEND ignored, file transfer is not supported");
            Ok(())
        })
        .on(MESSAGE_COMMAND, |ev: &Event| {
            trace!(sender = ev.sender(), line = ev.message(), "DCC line");
            Ok(())
        })
        .on_default(|ev: &Event| {
            debug!(sender = ev.sender(), command = ev.command(), "unknown DCC request");
            Ok(())
        })
}
