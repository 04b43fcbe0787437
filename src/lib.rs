//! OPC DA to InfluxDB bridge.
//!
//! Polls a set of process tags through a data-access gateway on a fixed
//! interval, suppresses samples that did not change beyond a configured
//! tolerance, and batch-writes the survivors to an InfluxDB v2 sink with
//! retry buffering and reconnect/backoff on transport failure.

pub mod config;
pub mod filter;
pub mod health;
pub mod poll;
pub mod sink;
pub mod source;
pub mod value;
