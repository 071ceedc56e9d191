//! Polymarket whale watcher.
//!
//! Polls market-data sources on a fixed cadence, flags large orders and volume
//! spikes, suppresses anything already alerted on, and forwards new events to
//! a webhook. The binary wires these modules together; they are exposed here
//! so each piece can be tested on its own.

pub mod api;
pub mod config;
pub mod detector;
pub mod enrich;
pub mod fingerprint;
pub mod ledger;
pub mod notify;
pub mod poller;
pub mod ring;
pub mod source;
pub mod state;
