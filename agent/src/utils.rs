//! Utility functions

use serde::{Deserialize, Serialize};

/// Version information for the binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("FLEETD_GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("FLEETD_BUILD_TIME")
            .unwrap_or("unknown")
            .to_string(),
    }
}

/// Generate a random UUID v4
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Current Unix time in seconds
pub fn unix_now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Current Unix time in milliseconds
pub fn unix_now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Serde helper storing a `Duration` as whole seconds
pub mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
