//! Device identity reported by the recovery.

use serde::{Deserialize, Serialize};

/// The eight identity fields, each answered by one query round-trip.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device: String,
    pub version: String,
    pub sn: String,
    pub codebase: String,
    pub branch: String,
    pub language: String,
    pub region: String,
    pub romzone: String,
}

impl DeviceInfo {
    /// Sentinel identity for sideload-only recoveries, which answer no
    /// queries at all.
    pub fn unknown() -> Self {
        Self {
            device: "unknown".into(),
            version: "unknown".into(),
            sn: "unknown".into(),
            codebase: "unknown".into(),
            branch: "unknown".into(),
            language: "unknown".into(),
            region: "unknown".into(),
            romzone: "unknown".into(),
        }
    }
}
