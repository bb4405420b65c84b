//! Hush core library — anonymous relay between Telegram users and a single operator.
//!
//! Users write to the bot; each message is copied into the operator chat and the copy's
//! id is correlated with the sender. When the operator replies to a copy, the reply is
//! routed back to the original sender.

pub mod channels;
pub mod config;
pub mod gateway;
pub mod init;
pub mod relay;
pub mod store;
pub mod transport;
