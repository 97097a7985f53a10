//! Stub location.
//!
//! Generated protobuf artifacts are registered up front in a [`StubRegistry`]
//! under their logical paths, then resolved per service by the
//! [`StubLocator`]. For a proto file `test.proto` stored at location
//! `grpc_codegen`, the two artifacts live at:
//!
//! - `grpc_codegen.test_messages`: message types of the file.
//! - `grpc_codegen.test_service`: service interfaces of the file.
//!
//! The degenerate location `.` drops the prefix (`test_messages`,
//! `test_service`). Both artifacts must be present or resolution fails, which
//! aborts startup for that service.

use crate::{
    binding::CallShape,
    error::{Error, Result},
    settings::{ServiceDefinition, Settings},
};
use parking_lot::Mutex;
use prost_types::{
    DescriptorProto, FileDescriptorProto, FileDescriptorSet, MethodDescriptorProto,
    ServiceDescriptorProto,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

const MESSAGES_SUFFIX: &str = "_messages";
const SERVICE_SUFFIX: &str = "_service";

/// Generated message types of one proto file.
#[derive(Debug, Clone, Default)]
pub struct MessagesArtifact {
    pub package: String,
    pub messages: Vec<DescriptorProto>,
}

/// Generated service interfaces of one proto file.
#[derive(Debug, Clone, Default)]
pub struct ServiceArtifact {
    pub package: String,
    pub services: Vec<ServiceDescriptorProto>,
}

/// Explicit registry of generated artifacts, keyed by logical path.
#[derive(Debug, Default)]
pub struct StubRegistry {
    messages: HashMap<String, MessagesArtifact>,
    services: HashMap<String, ServiceArtifact>,
}

impl StubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_messages(&mut self, path: impl Into<String>, artifact: MessagesArtifact) {
        self.messages.insert(path.into(), artifact);
    }

    pub fn register_service(&mut self, path: impl Into<String>, artifact: ServiceArtifact) {
        self.services.insert(path.into(), artifact);
    }

    /// Registers both artifacts of a compiled proto file at `location`.
    ///
    /// The file descriptor's `name` (e.g. `protos/test.proto`) decides the
    /// artifact basename.
    pub fn register_file(&mut self, location: &str, file: &FileDescriptorProto) {
        let filename = file.name().rsplit('/').next().unwrap_or_default();
        let (messages_path, service_path) = artifact_paths(location, filename);
        self.register_messages(
            messages_path,
            MessagesArtifact {
                package: file.package().to_string(),
                messages: file.message_type.clone(),
            },
        );
        self.register_service(
            service_path,
            ServiceArtifact {
                package: file.package().to_string(),
                services: file.service.clone(),
            },
        );
    }

    /// Registers every file of a descriptor set, as emitted by `prost-build`,
    /// at `location`.
    pub fn register_file_set(&mut self, location: &str, set: &FileDescriptorSet) {
        for file in &set.file {
            self.register_file(location, file);
        }
    }
}

/// Returns the `(messages, service)` artifact paths for a proto file.
pub fn artifact_paths(location: &str, proto_filename: &str) -> (String, String) {
    let basename = proto_filename.split('.').next().unwrap_or_default();
    let prefix = if location.is_empty() || location == "." {
        String::new()
    } else {
        format!("{location}.")
    };
    (
        format!("{prefix}{basename}{MESSAGES_SUFFIX}"),
        format!("{prefix}{basename}{SERVICE_SUFFIX}"),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: String,
    pub number: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSchema {
    /// Fully-qualified name without the leading dot, e.g. `test.User`.
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSchema {
    pub name: String,
    pub input_type: String,
    pub output_type: String,
    pub client_streaming: bool,
    pub server_streaming: bool,
}

impl MethodSchema {
    fn from_descriptor(method: &MethodDescriptorProto) -> Self {
        Self {
            name: method.name().to_string(),
            input_type: method.input_type().trim_start_matches('.').to_string(),
            output_type: method.output_type().trim_start_matches('.').to_string(),
            client_streaming: method.client_streaming(),
            server_streaming: method.server_streaming(),
        }
    }

    /// Call shape a handler must have to serve this method, or `None` for
    /// client-streaming methods which views cannot serve.
    pub fn shape(&self) -> Option<CallShape> {
        match (self.client_streaming, self.server_streaming) {
            (false, false) => Some(CallShape::Unary),
            (false, true) => Some(CallShape::ServerStreaming),
            _ => None,
        }
    }
}

/// Types and interface of one service, derived from its generated artifacts.
///
/// Never mutated after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStub {
    service: String,
    message_types: BTreeMap<String, MessageSchema>,
    methods: BTreeMap<String, MethodSchema>,
}

impl ResolvedStub {
    /// Fully-qualified service name, as declared by the generated artifact.
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn message_types(&self) -> &BTreeMap<String, MessageSchema> {
        &self.message_types
    }

    pub fn message_type(&self, name: &str) -> Option<&MessageSchema> {
        self.message_types.get(name)
    }

    pub fn method(&self, name: &str) -> Option<&MethodSchema> {
        self.methods.get(name)
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodSchema> {
        self.methods.values()
    }

    /// Names of every method the interface declares.
    pub fn service_interface(&self) -> BTreeSet<&str> {
        self.methods.keys().map(String::as_str).collect()
    }
}

fn collect_messages(
    scope: &str,
    messages: &[DescriptorProto],
    out: &mut BTreeMap<String, MessageSchema>,
) {
    for message in messages {
        let name = if scope.is_empty() {
            message.name().to_string()
        } else {
            format!("{scope}.{}", message.name())
        };
        let fields = message
            .field
            .iter()
            .map(|f| FieldSchema {
                name: f.name().to_string(),
                number: f.number(),
            })
            .collect();
        collect_messages(&name, &message.nested_type, out);
        out.insert(name.clone(), MessageSchema { name, fields });
    }
}

/// Resolves and caches the stubs of configured services.
#[derive(Debug)]
pub struct StubLocator {
    registry: StubRegistry,
    cache: Mutex<HashMap<String, Arc<ResolvedStub>>>,
}

impl StubLocator {
    pub fn new(registry: StubRegistry) -> Self {
        Self {
            registry,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves the stub of `service`, reusing a cached resolution.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StubResolution`] when either artifact is missing or
    /// the service artifact does not declare `service`.
    pub fn locate(
        &self,
        settings: &Settings,
        service: &ServiceDefinition,
    ) -> Result<Arc<ResolvedStub>> {
        let qualified = service.qualified_name();
        if let Some(stub) = self.cache.lock().get(&qualified) {
            return Ok(Arc::clone(stub));
        }

        let location = settings.stub_location_for(service);
        let (messages_path, service_path) =
            artifact_paths(location, service.proto_filename());

        let messages = self
            .registry
            .messages
            .get(&messages_path)
            .ok_or_else(|| Error::StubResolution {
                service: qualified.clone(),
                path: messages_path.clone(),
            })?;
        let services = self
            .registry
            .services
            .get(&service_path)
            .ok_or_else(|| Error::StubResolution {
                service: qualified.clone(),
                path: service_path.clone(),
            })?;

        let interface = services
            .services
            .iter()
            .find(|s| s.name() == service.name)
            .ok_or_else(|| Error::StubResolution {
                service: qualified.clone(),
                path: format!("{service_path}.{}", service.name),
            })?;

        let mut message_types = BTreeMap::new();
        collect_messages(&messages.package, &messages.messages, &mut message_types);

        let methods = interface
            .method
            .iter()
            .map(|m| (m.name().to_string(), MethodSchema::from_descriptor(m)))
            .collect();

        // Named after the package the artifact was generated for, which is
        // what callers see on the wire.
        let declared = if services.package.is_empty() {
            service.name.clone()
        } else {
            format!("{}.{}", services.package, service.name)
        };
        let stub = Arc::new(ResolvedStub {
            service: declared,
            message_types,
            methods,
        });

        tracing::debug!(
            service = %qualified,
            messages = %messages_path,
            interface = %service_path,
            "Resolved stub"
        );

        self.cache.lock().insert(qualified, Arc::clone(&stub));
        Ok(stub)
    }
}
