//! Packed-integer <-> dotted-quad conversion used by the DCC handshake.
//!
//! DCC advertises IPv4 addresses as a single decimal integer in network byte
//! order (`a<<24 | b<<16 | c<<8 | d`).

use crate::error::DccError;
use std::net::Ipv4Addr;

fn invalid(input: impl std::fmt::Display) -> DccError {
    DccError::InvalidAddress(input.to_string())
}

/// Pack a dotted quad such as `"10.0.0.5"` into its 32-bit form.
pub fn encode(dotted: &str) -> Result<u32, DccError> {
    let parts: Vec<&str> = dotted.trim().split('.').collect();
    if parts.len() != 4 {
        return Err(invalid(dotted));
    }
    let mut octets = [0u8; 4];
    for (octet, part) in octets.iter_mut().zip(&parts) {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid(dotted));
        }
        *octet = part.parse().map_err(|_| invalid(dotted))?;
    }
    Ok(u32::from(Ipv4Addr::from(octets)))
}

/// Unpack a 32-bit address into dotted-quad text.
///
/// Takes a signed value so that out-of-range input from the wire can be
/// rejected instead of silently wrapping.
pub fn decode(long: i64) -> Result<String, DccError> {
    to_ipv4(long).map(|ip| ip.to_string())
}

/// [`decode`] for the textual integer found in CTCP payloads.
pub fn decode_text(text: &str) -> Result<String, DccError> {
    parse_long(text).map(|ip| ip.to_string())
}

/// Parse the textual integer form straight into an [`Ipv4Addr`].
pub fn parse_long(text: &str) -> Result<Ipv4Addr, DccError> {
    let long: i64 = text.trim().parse().map_err(|_| invalid(text))?;
    to_ipv4(long)
}

fn to_ipv4(long: i64) -> Result<Ipv4Addr, DccError> {
    u32::try_from(long).map(Ipv4Addr::from).map_err(|_| invalid(long))
}
