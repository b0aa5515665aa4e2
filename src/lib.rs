//! Environmental sensor collector.
//!
//! Readings arrive as raw float datagrams over UDP, tagged console lines
//! over serial, or CRC-checked radio frames over MQTT. Every decoded
//! [`codec::Record`] is fanned out through a [`bus::Distributor`] to the
//! [`stats::StatsSupervisor`] and to live HTTP subscribers.

pub mod agent;
pub mod bus;
pub mod codec;
pub mod config;
pub mod metrics;
pub mod stats;
pub mod transport;
pub mod web;
