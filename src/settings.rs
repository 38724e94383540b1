//! Engine settings.
//!
//! Use `Settings::default()` and override single fields with struct update syntax:
//!
//! ```
//! use acl_bdd::settings::Settings;
//!
//! let settings = Settings {
//!     max_acl_lines: Some(10_000),
//!     ..Settings::default()
//! };
//! assert_eq!(settings.initial_node_bits, 16);
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// The node table starts with `2^initial_node_bits` slots.
    pub initial_node_bits: usize,
    /// The node table never grows beyond `2^max_node_bits` slots.
    pub max_node_bits: usize,
    /// Refuse to compile ACLs with more lines than this.
    pub max_acl_lines: Option<usize>,
    /// Maximum nesting of named ACL / IP space references followed during compilation.
    pub max_reference_depth: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            initial_node_bits: 16,
            max_node_bits: 26,
            max_acl_lines: None,
            max_reference_depth: 64,
        }
    }
}

impl Settings {
    pub(crate) fn check_acl_lines(&self, name: &str, lines: usize) -> crate::error::Result<()> {
        match self.max_acl_lines {
            Some(limit) if lines > limit => Err(crate::error::Error::LimitExceeded {
                what: format!("ACL `{}` line count", name),
                limit,
                actual: lines,
            }),
            _ => Ok(()),
        }
    }
}
