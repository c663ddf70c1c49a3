//! Configuration for the federation engine
//!
//! CLI arguments and environment variable handling using clap, plus the
//! runtime `FederationConfig` derived from them.

use std::time::Duration;

use clap::Parser;

/// Federated query engine settings
#[derive(Parser, Debug, Clone)]
#[command(name = "ngsild-federation")]
#[command(about = "Federated query and temporal resolution for NGSI-LD context brokers")]
pub struct Args {
    /// Identifier of this broker, sent as the `Via` hop marker on outbound queries
    #[arg(long, env = "FEDERATION_BROKER_ID", default_value = "ngsild-broker")]
    pub broker_id: String,

    /// Public base URL of this broker (e.g., "https://broker.example.org")
    /// Registrations pointing back at it are never dispatched to
    #[arg(long, env = "FEDERATION_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Global per-query deadline in milliseconds
    #[arg(long, env = "FEDERATION_DEADLINE_MS", default_value = "5000")]
    pub deadline_ms: u64,

    /// Drain allowance after the deadline, in milliseconds
    #[arg(long, env = "FEDERATION_DRAIN_MS", default_value = "50")]
    pub drain_ms: u64,

    /// Maximum concurrent remote dispatches per query
    #[arg(long, env = "FEDERATION_MAX_CONCURRENT", default_value = "16")]
    pub max_concurrent: usize,

    /// TCP connect timeout for remote sources in milliseconds
    #[arg(long, env = "FEDERATION_CONNECT_TIMEOUT_MS", default_value = "1000")]
    pub connect_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.broker_id.trim().is_empty() {
            return Err("FEDERATION_BROKER_ID must not be empty".to_string());
        }

        if self.deadline_ms == 0 {
            return Err("FEDERATION_DEADLINE_MS must be greater than zero".to_string());
        }

        if self.max_concurrent == 0 {
            return Err("FEDERATION_MAX_CONCURRENT must be greater than zero".to_string());
        }

        if let Some(url) = &self.public_url {
            url::Url::parse(url)
                .map_err(|e| format!("FEDERATION_PUBLIC_URL is not a valid URL: {}", e))?;
        }

        Ok(())
    }
}

/// Runtime federation configuration, derived from CLI args
#[derive(Debug, Clone)]
pub struct FederationConfig {
    /// Hop marker identifying this broker
    pub broker_id: String,
    /// Own public URL, used for loop prevention
    pub public_url: Option<String>,
    /// Default global deadline for a query
    pub default_deadline: Duration,
    /// How long past the deadline the coordinator may spend collecting
    pub drain_allowance: Duration,
    /// Cap on in-flight remote dispatches per query
    pub max_concurrent_dispatches: usize,
    /// Connect timeout for the HTTP client
    pub connect_timeout: Duration,
    /// Bound on reading the registry snapshot
    pub registry_timeout: Duration,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            broker_id: "ngsild-broker".to_string(),
            public_url: None,
            default_deadline: Duration::from_millis(5000),
            drain_allowance: Duration::from_millis(50),
            max_concurrent_dispatches: 16,
            connect_timeout: Duration::from_millis(1000),
            registry_timeout: Duration::from_millis(500),
        }
    }
}

impl FederationConfig {
    /// Build federation config from CLI args.
    pub fn from_args(args: &Args) -> Self {
        let default_deadline = Duration::from_millis(args.deadline_ms);
        Self {
            broker_id: args.broker_id.clone(),
            public_url: args.public_url.clone(),
            default_deadline,
            drain_allowance: Duration::from_millis(args.drain_ms),
            max_concurrent_dispatches: args.max_concurrent.max(1),
            connect_timeout: Duration::from_millis(args.connect_timeout_ms),
            registry_timeout: default_deadline / 10,
        }
    }

    pub fn with_broker_id(mut self, broker_id: impl Into<String>) -> Self {
        self.broker_id = broker_id.into();
        self
    }

    pub fn with_public_url(mut self, public_url: impl Into<String>) -> Self {
        self.public_url = Some(public_url.into());
        self
    }

    pub fn with_default_deadline(mut self, deadline: Duration) -> Self {
        self.default_deadline = deadline;
        self
    }

    pub fn with_drain_allowance(mut self, drain: Duration) -> Self {
        self.drain_allowance = drain;
        self
    }

    pub fn with_max_concurrent_dispatches(mut self, max: usize) -> Self {
        self.max_concurrent_dispatches = max.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["ngsild-federation"]);
        assert!(args.validate().is_ok());

        let config = FederationConfig::from_args(&args);
        assert_eq!(config.default_deadline, Duration::from_millis(5000));
        assert_eq!(config.registry_timeout, Duration::from_millis(500));
        assert_eq!(config.max_concurrent_dispatches, 16);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let args = Args::parse_from(["ngsild-federation", "--deadline-ms", "0"]);
        assert!(args.validate().is_err());

        let args = Args::parse_from(["ngsild-federation", "--public-url", "not a url"]);
        assert!(args.validate().is_err());
    }
}
