//! Gateway: process supervisor and webhook HTTP endpoint.
//!
//! Selects pull or push ingestion once at startup, feeds events serially into the relay
//! engine, and on shutdown drains queued events and flushes the correlation store.

mod server;

pub use server::{
    drain_source, run_gateway, run_gateway_until, run_relay_loop, shutdown_signal,
    webhook_router, GatewayState, WEBHOOK_PATH,
};
