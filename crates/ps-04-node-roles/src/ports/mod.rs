//! Ports layer.

pub mod inbound;

pub use inbound::NodeContext;
