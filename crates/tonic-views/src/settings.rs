//! Engine configuration.
//!
//! [`Settings`] is built once, before any service is bound, and is immutable
//! afterwards. The engine only ever reads it.

use crate::error::{Error, Result};
use std::collections::HashSet;

/// Metadata key carrying the JSON-encoded principal.
pub const DEFAULT_AUTH_USER_KEY: &str = "user";

/// Root location of the generated stub artifacts.
pub const DEFAULT_STUB_LOCATION: &str = "grpc_codegen";

/// Capacity of the per-call channel between a streaming view and the
/// transport.
pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 8;

/// One gRPC service to load at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    /// Service name as declared in the proto file, e.g. `TestService`.
    pub name: String,
    /// Proto package, e.g. `test`.
    pub package: String,
    /// Path of the proto source, e.g. `protos/test.proto`.
    pub proto_path: String,
    /// Logical path of the RPC module holding this service's bindings.
    pub rpc_module: String,
    /// Location of the generated stubs. Falls back to [`Settings::stubs`].
    pub stub_location: Option<String>,
}

impl ServiceDefinition {
    pub fn new(
        name: impl Into<String>,
        package: impl Into<String>,
        proto_path: impl Into<String>,
        rpc_module: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            package: package.into(),
            proto_path: proto_path.into(),
            rpc_module: rpc_module.into(),
            stub_location: None,
        }
    }

    #[must_use]
    pub fn with_stub_location(mut self, location: impl Into<String>) -> Self {
        self.stub_location = Some(location.into());
        self
    }

    /// Fully-qualified service name as it appears on the wire.
    pub fn qualified_name(&self) -> String {
        if self.package.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.package, self.name)
        }
    }

    /// File name of the proto source without directories.
    pub fn proto_filename(&self) -> &str {
        self.proto_path
            .rsplit('/')
            .next()
            .unwrap_or(self.proto_path.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    services: Vec<ServiceDefinition>,
    auth_user_key: String,
    stubs: String,
    stream_buffer_size: usize,
    expose_error_traces: bool,
}

impl Settings {
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    pub fn services(&self) -> &[ServiceDefinition] {
        &self.services
    }

    pub fn auth_user_key(&self) -> &str {
        &self.auth_user_key
    }

    pub fn stubs(&self) -> &str {
        &self.stubs
    }

    pub fn stream_buffer_size(&self) -> usize {
        self.stream_buffer_size
    }

    pub fn expose_error_traces(&self) -> bool {
        self.expose_error_traces
    }

    /// Stub location for `service`, honouring its own override.
    pub fn stub_location_for<'a>(&'a self, service: &'a ServiceDefinition) -> &'a str {
        service.stub_location.as_deref().unwrap_or(&self.stubs)
    }

    pub fn find_service(&self, qualified_name: &str) -> Option<&ServiceDefinition> {
        self.services
            .iter()
            .find(|s| s.qualified_name() == qualified_name)
    }
}

#[derive(Debug, Clone)]
pub struct SettingsBuilder {
    services: Vec<ServiceDefinition>,
    auth_user_key: Option<String>,
    stubs: Option<String>,
    stream_buffer_size: usize,
    expose_error_traces: bool,
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            auth_user_key: None,
            stubs: None,
            stream_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
            expose_error_traces: false,
        }
    }
}

impl SettingsBuilder {
    #[must_use]
    pub fn service(mut self, service: ServiceDefinition) -> Self {
        self.services.push(service);
        self
    }

    /// Empty keys fall back to [`DEFAULT_AUTH_USER_KEY`].
    #[must_use]
    pub fn auth_user_key(mut self, key: impl Into<String>) -> Self {
        self.auth_user_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn stubs(mut self, location: impl Into<String>) -> Self {
        self.stubs = Some(location.into());
        self
    }

    #[must_use]
    pub fn stream_buffer_size(mut self, size: usize) -> Self {
        self.stream_buffer_size = size;
        self
    }

    #[must_use]
    pub fn expose_error_traces(mut self, expose: bool) -> Self {
        self.expose_error_traces = expose;
        self
    }

    /// # Errors
    ///
    /// Fails when no service is configured, when two services share a
    /// qualified name, when a service misses its proto path or RPC module, or
    /// when the stream buffer is empty.
    pub fn build(self) -> Result<Settings> {
        if self.services.is_empty() {
            return Err(Error::InvalidSettings {
                reason: "at least one service must be configured".to_string(),
            });
        }

        let mut seen = HashSet::with_capacity(self.services.len());
        for service in &self.services {
            if service.name.is_empty() {
                return Err(Error::InvalidSettings {
                    reason: "service name cannot be empty".to_string(),
                });
            }
            if service.proto_path.is_empty() {
                return Err(Error::InvalidSettings {
                    reason: format!("missing proto path for service {}", service.name),
                });
            }
            if service.rpc_module.is_empty() {
                return Err(Error::InvalidSettings {
                    reason: format!("missing rpc module for service {}", service.name),
                });
            }
            if !seen.insert(service.qualified_name()) {
                return Err(Error::InvalidSettings {
                    reason: format!("service {} configured twice", service.qualified_name()),
                });
            }
        }

        if self.stream_buffer_size == 0 {
            return Err(Error::InvalidSettings {
                reason: "stream buffer size must be greater than 0".to_string(),
            });
        }

        let auth_user_key = self
            .auth_user_key
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| DEFAULT_AUTH_USER_KEY.to_string());

        Ok(Settings {
            services: self.services,
            auth_user_key,
            stubs: self
                .stubs
                .unwrap_or_else(|| DEFAULT_STUB_LOCATION.to_string()),
            stream_buffer_size: self.stream_buffer_size,
            expose_error_traces: self.expose_error_traces,
        })
    }
}
