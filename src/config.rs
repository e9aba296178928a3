use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// Settings for the frame server and its transport engine binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// STUN/TURN urls handed to the engine
    pub ice_servers: Vec<String>,
    pub video_mime_type: String,
    pub track_id: String,
    pub stream_id: String,
    /// Give up on an offer after this long; unbounded when unset
    pub negotiation_timeout_ms: Option<u64>,
    /// Fail startup if no peer connects within this long; unbounded when unset
    pub startup_timeout_ms: Option<u64>,
    /// Sample duration used until a track has two timestamps to compare
    pub frame_duration_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            video_mime_type: "video/H264".to_string(),
            track_id: "video".to_string(),
            stream_id: "framecast".to_string(),
            negotiation_timeout_ms: None,
            startup_timeout_ms: None,
            frame_duration_ms: 33,
        }
    }
}

impl ServerConfig {
    /// Read a JSON config file; missing fields take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn negotiation_timeout(&self) -> Option<Duration> {
        self.negotiation_timeout_ms.map(Duration::from_millis)
    }

    pub fn startup_timeout(&self) -> Option<Duration> {
        self.startup_timeout_ms.map(Duration::from_millis)
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_duration_ms.max(1))
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ServerConfig::from_json(r#"{"startup_timeout_ms": 5000}"#).unwrap();
        assert_eq!(config.startup_timeout(), Some(Duration::from_millis(5000)));
        assert_eq!(config.negotiation_timeout(), None);
        assert_eq!(config.video_mime_type, "video/H264");
        assert_eq!(config.ice_servers, ServerConfig::default().ice_servers);
        assert_eq!(config.frame_duration(), Duration::from_millis(33));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            ServerConfig::from_json(r#"{"ice_servers": 3}"#),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ServerConfig::load("/nonexistent/framecast.json"),
            Err(Error::Io(_))
        ));
    }
}
