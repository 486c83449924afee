//! §6's configuration record. Loading it from a file or the command line is
//! an external collaborator and out of scope; the shape and its defaults are
//! not.

use serde::{Deserialize, Serialize};

/// Configuration consumed by the self-descriptor builder and the directory
/// parser's version check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Configuration {
    /// Explicit address override; if empty, the self-descriptor builder
    /// falls back to the host's fully qualified name.
    pub address: String,
    pub nickname: String,
    pub or_port: u16,
    pub socks_port: u16,
    pub dir_port: u16,
    pub total_bandwidth: u32,
    /// Comma-separated `(accept|reject) PATTERN` rules.
    pub exit_policy: String,
    /// If false, a version mismatch against a directory's
    /// `recommended-software` line is fatal to the caller.
    pub ignore_version: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            address: String::new(),
            nickname: String::new(),
            or_port: 0,
            socks_port: 0,
            dir_port: 0,
            total_bandwidth: 0,
            exit_policy: String::new(),
            ignore_version: false,
        }
    }
}
