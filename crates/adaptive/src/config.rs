use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::AdaptiveResult, logic::LogicType, playlist::RefreshPolicy, util::http::HttpClient,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub logic: LogicType,
    /// Bits per second used by [LogicType::FixedRate].
    pub fixed_bandwidth: Option<u64>,

    pub max_update_failures: u32,
    /// Refresh interval in seconds for playlists without a target duration.
    pub default_update_interval: u64,
    pub live_start_segments: usize,

    /// Retries for a failed segment fetch before it is skipped.
    pub segment_retries: u32,
    /// Request timeout in seconds.
    pub fetch_timeout: u64,
    pub user_agent: Option<String>,
    pub max_keys: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            logic: LogicType::default(),
            fixed_bandwidth: None,
            max_update_failures: 3,
            default_update_interval: 2,
            live_start_segments: 3,
            segment_retries: 2,
            fetch_timeout: 10,
            user_agent: None,
            max_keys: 50,
        }
    }
}

impl ManagerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> AdaptiveResult<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_toml(&data)
    }

    pub fn from_toml(data: &str) -> AdaptiveResult<Self> {
        let config = toml::from_str(data)?;
        Ok(config)
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy {
            max_update_failures: self.max_update_failures.max(1),
            default_interval: Duration::from_secs(self.default_update_interval.max(1)),
            live_start_segments: self.live_start_segments,
        }
    }

    pub fn http_client(&self) -> AdaptiveResult<HttpClient> {
        HttpClient::with_timeout(
            Duration::from_secs(self.fetch_timeout),
            self.user_agent.as_deref(),
        )
    }
}
