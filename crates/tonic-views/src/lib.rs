#![doc = include_str!("../README.md")]

pub mod binding;
pub mod context;
pub mod data;
pub mod engine;
pub mod error;
pub mod principal;
pub mod serialize;
pub mod servicer;
pub mod settings;
pub mod stub;
pub mod translate;
pub mod validate;
pub mod view;

#[cfg(test)]
pub(crate) mod fixtures;

pub use binding::{CallShape, HandlerDescriptor, RpcBinding, RpcModules, rpc};
pub use context::CallContext;
pub use data::{DataSource, Row, StaticRows};
pub use engine::{Engine, LoadedService};
pub use error::{Error, Result, ViewError};
pub use principal::{ContextUser, Principal};
pub use serialize::{IdentitySerializer, Serializer};
pub use servicer::{DispatchConfig, ServiceContract, Servicer, ServicerBuilder};
pub use settings::{ServiceDefinition, Settings, SettingsBuilder};
pub use stub::{StubLocator, StubRegistry};
pub use translate::{ERROR_TRACE_KEY, ExceptionTranslator};
pub use validate::{ValidationReport, validate};
pub use view::{RetrieveView, StreamView, StreamingView, UnaryView};
