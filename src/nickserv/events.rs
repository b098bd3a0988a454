//! NickServ notice parsing and the built-in status handlers.

use crate::nickserv::status::StatusCache;
use crate::protocol::{Event, HandlerSet, Protocol};
use anyhow::Context;
use std::sync::Arc;

/// Prefix of the built-in NickServ handlers.
pub const PROTOCOL_PREFIX: &str = "onNSERV_";
/// Prefix of the bot's own NickServ handlers.
pub const APPLICATION_PREFIX: &str = "onNickServ_";

/// Turn the text of a NickServ notice into an event.
///
/// Both status reply shapes become `<nick> <level>` messages:
///
/// - `STATUS <nick> <level>` under the `STATUS` command
/// - `<nick> ACC <level>` under the `ACC` command
///
/// Any other notice uses its first word as the command. Blank notices are
/// dropped.
pub fn parse_notice(sender: &str, target: &str, text: &str) -> Option<Event> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let (command, message) = match words.as_slice() {
        [] => return None,
        ["STATUS", nick, level, ..] => ("STATUS".to_string(), format!("{nick} {level}")),
        [nick, "ACC", level, ..] => ("ACC".to_string(), format!("{nick} {level}")),
        [first, rest @ ..] => (first.to_string(), rest.join(" ")),
    };
    Some(Event::new(sender, command, target, message, Protocol::NickServ))
}

pub(crate) fn protocol_handlers(cache: Arc<StatusCache>) -> HandlerSet {
    let acc_cache = Arc::clone(&cache);
    HandlerSet::new(PROTOCOL_PREFIX)
        .on("ACC", move |ev: &Event| on_status(&acc_cache, ev))
        .on("STATUS", move |ev: &Event| on_status(&cache, ev))
        .on_default(|_: &Event| Ok(()))
}

fn on_status(cache: &StatusCache, ev: &Event) -> anyhow::Result<()> {
    let mut parts = ev.message().split_whitespace();
    let Some(nick) = parts.next() else {
        return Ok(());
    };
    let level = parts
        .next()
        .with_context(|| format!("status reply for {nick} has no level"))?;
    let level: i32 = level
        .parse()
        .with_context(|| format!("status reply for {nick} has bad level {level:?}"))?;
    cache.update(nick, level);
    Ok(())
}
