//! Path-based reverse proxy from workspace addresses to loopback ports.

pub mod address;
pub mod forward;

pub use address::{
    decode_valid_workspace, decode_workspace_path, encode_workspace_path, is_valid_workspace_path,
    resolve_target_port, ProxyRoute,
};
pub use forward::ProxyForwarder;
