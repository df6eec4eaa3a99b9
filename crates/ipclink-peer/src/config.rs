use ipclink_frame::EnvelopeConfig;
use ipclink_transport::{ConnectConfig, Target, TransportError, DEFAULT_PORT};

/// Environment variable naming the router, as `host` or `host:port`.
pub const ROUTER_ENV: &str = "CENTRALHOST";

/// Settings for one participating module.
#[derive(Debug, Clone)]
pub struct ModuleConfig {
    pub module_name: String,
    pub router: Target,
    pub connect: ConnectConfig,
    pub envelope: EnvelopeConfig,
    /// New query references are answered outside their handler and freed
    /// as soon as the response goes out.
    pub detached_responses: bool,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            module_name: "ipclink".to_string(),
            router: Target::new("localhost", DEFAULT_PORT),
            connect: ConnectConfig::default(),
            envelope: EnvelopeConfig::default(),
            detached_responses: false,
        }
    }
}

impl ModuleConfig {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            ..Self::default()
        }
    }

    pub fn with_router(mut self, router: Target) -> Self {
        self.router = router;
        self
    }

    /// Take the router from [`ROUTER_ENV`] when it is set.
    pub fn with_router_from_env(self) -> Result<Self, TransportError> {
        match std::env::var(ROUTER_ENV) {
            Ok(value) if !value.trim().is_empty() => Ok(self.with_router(Target::parse(&value)?)),
            _ => Ok(self),
        }
    }

    pub fn with_connect_config(mut self, connect: ConnectConfig) -> Self {
        self.connect = connect;
        self
    }

    pub fn with_envelope_config(mut self, envelope: EnvelopeConfig) -> Self {
        self.envelope = envelope;
        self
    }

    pub fn with_detached_responses(mut self, detached: bool) -> Self {
        self.detached_responses = detached;
        self
    }
}
