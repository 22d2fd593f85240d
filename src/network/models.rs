//! Data models for client network lookups

use serde::{Deserialize, Serialize};

/// Administrative region derived from an IP address
///
/// Both fields are empty when the address could not be attributed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Province-level unit (e.g. "山西省", "广西壮族自治区", "北京")
    pub province: String,

    /// City-level unit (e.g. "太原市", "延边朝鲜族自治州")
    pub city: String,
}

impl Region {
    pub fn new(province: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            province: province.into(),
            city: city.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.province.is_empty() && self.city.is_empty()
    }
}
