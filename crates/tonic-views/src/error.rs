//! Error types for service binding and call dispatch.
//!
//! Two families of failures exist and they never mix:
//!
//! - [`Error`]: raised while loading services at startup. Every variant is
//!   fatal for the service being bound; nothing gets registered with the
//!   transport.
//! - [`ViewError`]: raised while a view executes a single call. These never
//!   escape the call: the [`translate`](crate::translate) module turns them
//!   into a wire status and the call still completes with a well-formed
//!   response value.

pub type Result<T> = core::result::Result<T, Error>;

/// Startup failures raised while resolving, validating or building a
/// service.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// A generated stub artifact could not be located.
    #[error("Stub resolution failed for service `{service}`: no artifact registered at `{path}`")]
    StubResolution { service: String, path: String },

    /// The RPC module named by a service definition is not registered.
    #[error("RPC module `{path}` for service `{service}` is not registered")]
    RpcModuleNotFound { service: String, path: String },

    /// A binding names a method the generated interface does not declare.
    #[error("RPC `{rpc}` is not declared by service `{service}`")]
    UndeclaredRpc { service: String, rpc: String },

    /// A binding is malformed (duplicate name, empty name, wrong call shape).
    #[error("Invalid RPC definition `{rpc}` in service `{service}`: {reason}")]
    InvalidRpcDefinition {
        service: String,
        rpc: String,
        reason: String,
    },

    /// A view is missing required configuration.
    #[error("Misconfigured view `{view}`: {reason}")]
    MisconfiguredView { view: String, reason: String },

    /// No service definition matches the requested contract.
    #[error("Service `{service}` is not configured")]
    ServiceNotConfigured { service: String },

    /// The contract type bound to a service does not name that service.
    #[error("Contract `{contract}` does not match resolved service `{service}`")]
    ContractMismatch { contract: String, service: String },

    /// The engine settings are unusable.
    #[error("Invalid settings: {reason}")]
    InvalidSettings { reason: String },
}

/// Per-call failures raised while a view executes.
///
/// Variants that represent a client-visible condition carry a message that is
/// safe to return on the wire. Everything else is treated as an internal
/// error by the translator.
#[derive(thiserror::Error, Debug)]
pub enum ViewError {
    /// The view requires an authenticated principal and none was supplied.
    #[error("Authentication credentials were not provided")]
    NotAuthenticated,

    /// The principal metadata could not be decoded.
    #[error("Invalid principal metadata: {reason}")]
    InvalidPrincipal { reason: String },

    /// An object-level permission hook rejected the call.
    #[error("{0}")]
    PermissionDenied(String),

    /// The request is missing a field the view needs.
    #[error("{0}")]
    InvalidArgument(String),

    /// The lookup matched no object.
    #[error("{0}")]
    ObjectNotFound(String),

    /// The lookup matched more than one object.
    #[error("Lookup `{field}` returned {count} objects")]
    MultipleObjectsReturned { field: String, count: usize },

    /// The serialized payload does not fit the response message.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The data source or serializer failed.
    #[error(transparent)]
    DataSource(#[from] anyhow::Error),

    /// View code panicked.
    #[error("View panicked: {0}")]
    Panicked(String),

    /// A call arrived after the servicer started shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl ViewError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::ObjectNotFound(what.into())
    }

    pub fn invalid_argument(what: impl Into<String>) -> Self {
        Self::InvalidArgument(what.into())
    }

    pub fn permission_denied(what: impl Into<String>) -> Self {
        Self::PermissionDenied(what.into())
    }
}
