//! These modules are shared plumbing used by both directions of the bridge.
pub mod box_error;
pub mod config;
pub mod sock_with_tos;
pub mod timing;
