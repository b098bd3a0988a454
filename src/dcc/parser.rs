//! DCC CHAT offer parsing and formatting.
//!
//! Offers travel inside CTCP as `DCC CHAT chat <ip_decimal> <port>`. The IP is
//! the packed network-order integer handled by [`crate::dcc::ip`].

use crate::dcc::ip;
use std::fmt;
use std::net::Ipv4Addr;

/// A parsed or locally built DCC CHAT offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DccChatOffer {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl fmt::Display for DccChatOffer {
    /// The CTCP payload, without the surrounding `\x01` delimiters.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DCC CHAT chat {} {}", u32::from(self.ip), self.port)
    }
}

/// Parse a DCC CHAT offer into a [`DccChatOffer`].
///
/// Accepts the full CTCP payload (`DCC CHAT chat <ip> <port>`) or just the
/// arguments that follow the `CHAT` command token (`chat <ip> <port>`).
pub fn parse_chat_offer(ctcp: &str) -> Option<DccChatOffer> {
    let content = ctcp.trim();
    let content = content.strip_prefix("DCC CHAT ").unwrap_or(content);

    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() < 3 || !parts[0].eq_ignore_ascii_case("chat") {
        return None;
    }

    let ip = ip::parse_long(parts[1]).ok()?;
    let port: u16 = parts[2].parse().ok()?;
    if port == 0 {
        return None;
    }

    Some(DccChatOffer { ip, port })
}
