//! Protocol-neutral event records and the dispatch machinery every layer shares.

pub mod dispatch;
pub mod event;

pub use dispatch::{Dispatcher, Handler, HandlerSet};
pub use event::{Event, Protocol};
