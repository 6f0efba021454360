//! Test fixtures
//!
//! Helpers for standing up small Strand networks over loopback TCP.

mod nodes;

pub use nodes::{close_all, echo_handler, link, loopback_node, node_with_config};
