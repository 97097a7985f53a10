//! RPC bindings and the registry of RPC modules.
//!
//! A binding maps an RPC name to a handler. An RPC module is the ordered list
//! of bindings one service declares:
//!
//! ```ignore
//! modules.register("tests.rpcs", [
//!     rpc("GetUser", get_user_view),
//!     rpc("ListUsers", list_users_view),
//! ]);
//! ```

use crate::{
    servicer::{Route, StreamingAdapter, UnaryAdapter},
    view::{StreamingView, UnaryView},
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Single-response vs. multi-response call shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallShape {
    Unary,
    ServerStreaming,
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallShape::Unary => write!(f, "unary"),
            CallShape::ServerStreaming => write!(f, "server-streaming"),
        }
    }
}

/// A handler plus the adapter matching its declared call shape.
#[derive(Clone)]
pub struct HandlerDescriptor {
    shape: CallShape,
    route: Arc<dyn Route>,
}

impl HandlerDescriptor {
    pub fn unary<V: UnaryView>(view: V) -> Self {
        Self {
            shape: CallShape::Unary,
            route: Arc::new(UnaryAdapter::new(view)),
        }
    }

    pub fn streaming<V: StreamingView>(view: V) -> Self {
        Self {
            shape: CallShape::ServerStreaming,
            route: Arc::new(StreamingAdapter::new(view)),
        }
    }

    pub fn shape(&self) -> CallShape {
        self.shape
    }

    /// Name of the view type, for diagnostics.
    pub fn view_name(&self) -> &str {
        self.route.view_name()
    }

    /// Fully-qualified response message type, e.g. `test.User`.
    pub fn response_type(&self) -> String {
        self.route.response_type()
    }

    pub(crate) fn route(&self) -> &Arc<dyn Route> {
        &self.route
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("shape", &self.shape)
            .field("view", &self.view_name())
            .field("response", &self.response_type())
            .finish()
    }
}

/// An RPC name bound to a handler. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct RpcBinding {
    name: String,
    handler: HandlerDescriptor,
}

impl RpcBinding {
    pub fn new(name: impl Into<String>, handler: impl Into<HandlerDescriptor>) -> Self {
        Self {
            name: name.into(),
            handler: handler.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &HandlerDescriptor {
        &self.handler
    }
}

/// Shorthand for [`RpcBinding::new`].
pub fn rpc(name: impl Into<String>, handler: impl Into<HandlerDescriptor>) -> RpcBinding {
    RpcBinding::new(name, handler)
}

/// RPC modules keyed by the logical path service definitions refer to.
#[derive(Debug, Default, Clone)]
pub struct RpcModules {
    modules: HashMap<String, Arc<[RpcBinding]>>,
}

impl RpcModules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the bindings of `path`, replacing any earlier registration.
    pub fn register(&mut self, path: impl Into<String>, bindings: impl IntoIterator<Item = RpcBinding>) {
        self.modules
            .insert(path.into(), bindings.into_iter().collect());
    }

    pub fn get(&self, path: &str) -> Option<Arc<[RpcBinding]>> {
        self.modules.get(path).cloned()
    }
}
