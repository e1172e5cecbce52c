//! Minimal EtherNet/IP client for reading Logix controller tags.

pub mod cip;
pub mod client;
pub mod encap;

pub use client::{CipTagReader, ConnectOptions};
