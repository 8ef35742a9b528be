use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = match option_env!("BUILD_COMMIT") {
    Some(c) => c,
    None => "unknown",
};
pub const BUILD_DATE: &str = match option_env!("BUILD_DATE") {
    Some(d) => d,
    None => "unknown",
};

/// Full version string including commit and build date.
pub fn version_string() -> String {
    format!("{VERSION} (commit: {COMMIT}, built: {BUILD_DATE})")
}

/// `User-Agent` for outbound HTTP (webhooks, CLI client).
pub fn user_agent() -> String {
    format!("herald/{VERSION}")
}

// ============================================================================
// BuildInfo
// ============================================================================

/// Body of `GET /version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub version: String,
    pub commit: String,
    pub build_date: String,
}

impl BuildInfo {
    #[must_use]
    pub fn current() -> Self {
        Self {
            version: VERSION.to_string(),
            commit: COMMIT.to_string(),
            build_date: BUILD_DATE.to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
