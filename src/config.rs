//! Runtime settings for a troubleshooting run.

use std::path::PathBuf;
use std::time::Duration;

/// Path requested on each forwarded pod when no other is configured.
pub const DEFAULT_PROBE_PATH: &str = "/internal/metrics";

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// HTTP path requested through the tunnel
    pub path: String,
    /// Local port to bind; 0 lets the OS pick
    pub local_port: u16,
    /// How long to wait for a tunnel to report ready
    pub ready_timeout: Duration,
    /// Timeout for the probe request itself
    pub request_timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            path: DEFAULT_PROBE_PATH.to_string(),
            local_port: 0,
            ready_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    /// Used when the operator answers the kubeconfig prompt with a blank line
    pub kubeconfig: Option<PathBuf>,
    pub probe: ProbeSettings,
    /// Consecutive failures tolerated per step; `None` retries forever
    pub max_retries: Option<u32>,
    /// Print the session as JSON when the run finishes
    pub json: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            probe: ProbeSettings::default(),
            max_retries: Some(5),
            json: false,
        }
    }
}

impl ProbeSettings {
    /// Normalizes the path so it can be appended to `http://host:port`.
    pub fn url(&self, local_port: u16) -> String {
        let path = self.path.trim();
        if path.starts_with('/') {
            format!("http://127.0.0.1:{local_port}{path}")
        } else {
            format!("http://127.0.0.1:{local_port}/{path}")
        }
    }
}
