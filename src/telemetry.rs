//! Tracing initialization.
//!
//! Installs a `tracing-subscriber` registry with an env-filter (the `RUST_LOG`
//! convention, default `info`) and a formatted output layer.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Builder for the process-wide tracing subscriber.
#[derive(Debug, Default)]
pub struct Telemetry {
    service_name: Option<&'static str>,
    service_version: Option<&'static str>,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.service_name = Some(name);
        self
    }

    pub fn with_version(mut self, version: &'static str) -> Self {
        self.service_version = Some(version);
        self
    }

    /// Installs the subscriber. Safe to call more than once; later calls
    /// keep the first subscriber.
    pub fn register(self) {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let installed = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
            .is_ok();
        if installed {
            tracing::info!(
                service = self.service_name.unwrap_or("unknown"),
                version = self.service_version.unwrap_or("unknown"),
                "telemetry initialized"
            );
        }
    }
}
