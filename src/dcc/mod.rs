//! DCC CHAT subsystem.
//!
//! Peers announced over IRC are registered by IP, connect to the bot's
//! listener and exchange CRLF-terminated chat lines. Every line becomes an
//! event dispatched through the protocol and application handler sets.

pub mod framing;
pub mod ip;
pub mod manager;
pub mod parser;
pub mod registry;
pub mod server;

pub use manager::DccManager;
pub use parser::{parse_chat_offer, DccChatOffer};
pub use registry::{PeerState, Registry};
pub use server::Endpoint;
