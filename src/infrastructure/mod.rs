//! Adapters: everything that touches the outside world (HTTP, sqlite,
//! metrics). Same split as `rustrade::infrastructure`.

pub mod core;
pub mod exchanges;
pub mod messenger;
pub mod observability;
pub mod persistence;
pub mod realtime;

pub use messenger::TelegramMessenger;
pub use realtime::RealtimeSink;
