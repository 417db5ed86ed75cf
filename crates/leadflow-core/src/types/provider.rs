//! Provider backend identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The WhatsApp Business API backend a tenant sends through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// Meta's WhatsApp Cloud API (Graph API).
    MetaCloud,
    /// 360dialog BSP; speaks the Cloud API payload dialect.
    Dialog360,
}

impl ProviderType {
    /// Stable string form used in config and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::MetaCloud => "meta_cloud",
            ProviderType::Dialog360 => "dialog360",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
