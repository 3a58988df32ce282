//! Datanode transport.

pub mod client;

pub use client::{DataNodeQueryClient, HttpDataNodeClient};
