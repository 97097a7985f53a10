use super::{RequestMessage, ResponseMessage};
use crate::{
    context::CallContext,
    data::{DataSource, Row},
    error::{Error, ViewError},
    principal::Principal,
    serialize::{IdentitySerializer, Serializer, to_message},
};
use core::marker::PhantomData;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Request field holding the lookup value.
pub const DEFAULT_LOOKUP_KWARG: &str = "id";

/// Row attribute the lookup value is matched against.
pub const DEFAULT_LOOKUP_FIELD: &str = "pk";

/// Object-level permission hook.
pub type ObjectPermission = Arc<dyn Fn(&Principal, &Row) -> Result<(), ViewError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewOptions {
    pub requires_authentication: bool,
    pub lookup_kwarg: String,
    pub lookup_field: String,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self {
            requires_authentication: false,
            lookup_kwarg: DEFAULT_LOOKUP_KWARG.to_string(),
            lookup_field: DEFAULT_LOOKUP_FIELD.to_string(),
        }
    }
}

/// Behaviour shared by every concrete view.
pub struct GenericView<Req, Resp> {
    name: String,
    options: ViewOptions,
    queryset: Arc<dyn DataSource>,
    serializer: Arc<dyn Serializer>,
    object_permissions: Option<ObjectPermission>,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp> GenericView<Req, Resp>
where
    Req: RequestMessage,
    Resp: ResponseMessage,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &ViewOptions {
        &self.options
    }

    /// Reads the caller's principal from the call metadata.
    ///
    /// # Errors
    ///
    /// Fails when the metadata entry is malformed.
    pub fn resolve_principal(&self, ctx: &CallContext) -> Result<Principal, ViewError> {
        Principal::from_metadata(ctx.metadata(), ctx.principal_key())
    }

    /// # Errors
    ///
    /// Returns [`ViewError::NotAuthenticated`] for an anonymous caller when
    /// the view requires authentication.
    pub fn perform_authentication(&self, principal: &Principal) -> Result<(), ViewError> {
        if self.options.requires_authentication && principal.is_anonymous() {
            return Err(ViewError::NotAuthenticated);
        }
        Ok(())
    }

    /// Evaluates the backing collection afresh.
    ///
    /// # Errors
    ///
    /// Propagates data source failures.
    pub fn get_queryset(&self) -> Result<Vec<Row>, ViewError> {
        Ok(self.queryset.rows()?)
    }

    /// Looks up the single row whose `lookup_field` matches the request's
    /// `lookup_kwarg`, then runs the object permission hook on it.
    ///
    /// # Errors
    ///
    /// - [`ViewError::InvalidArgument`] when the request has no lookup field.
    /// - [`ViewError::ObjectNotFound`] when no row matches.
    /// - [`ViewError::MultipleObjectsReturned`] when several rows match.
    pub fn get_object(&self, request: &Req, principal: &Principal) -> Result<Row, ViewError> {
        let kwarg = self.options.lookup_kwarg.as_str();
        let fields = serde_json::to_value(request)?;
        let lookup = fields
            .get(kwarg)
            .ok_or_else(|| ViewError::invalid_argument(format!("Missing argument {kwarg}")))?;

        let field = self.options.lookup_field.as_str();
        let mut matches = self
            .get_queryset()?
            .into_iter()
            .filter(|row| row.get(field).is_some_and(|v| lookup_matches(v, lookup)));

        let object = match (matches.next(), matches.next()) {
            (Some(object), None) => object,
            (None, _) => {
                return Err(ViewError::not_found(format!(
                    "{} matching query does not exist.",
                    Resp::NAME
                )));
            }
            (Some(_), Some(_)) => {
                return Err(ViewError::MultipleObjectsReturned {
                    field: field.to_string(),
                    count: 2 + matches.count(),
                });
            }
        };

        self.check_object_permissions(principal, &object)?;
        Ok(object)
    }

    /// Runs the configured hook. Permissive when none is set.
    ///
    /// # Errors
    ///
    /// Whatever the hook rejects with.
    pub fn check_object_permissions(
        &self,
        principal: &Principal,
        object: &Row,
    ) -> Result<(), ViewError> {
        match &self.object_permissions {
            Some(check) => check(principal, object),
            None => Ok(()),
        }
    }

    /// # Errors
    ///
    /// Fails when the serializer fails or its payload does not fit `Resp`.
    pub fn serialize(&self, object: &Row) -> Result<Resp, ViewError> {
        let payload = self.serializer.serialize(object)?;
        to_message(payload)
    }
}

impl<Req, Resp> fmt::Debug for GenericView<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericView")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("object_permissions", &self.object_permissions.is_some())
            .finish_non_exhaustive()
    }
}

fn lookup_matches(candidate: &Value, lookup: &Value) -> bool {
    if candidate == lookup {
        return true;
    }
    // `1.0` and `1` are the same key.
    if let (Value::Number(a), Value::Number(b)) = (candidate, lookup) {
        return a.as_f64().is_some_and(|a| b.as_f64() == Some(a));
    }
    match (scalar_text(candidate), scalar_text(lookup)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A concrete view built from a [`GenericView`].
pub trait ViewKind: Sized {
    type Request: RequestMessage;
    type Response: ResponseMessage;

    /// Kind name, used as the default view name.
    const KIND: &'static str;

    fn from_generic(base: GenericView<Self::Request, Self::Response>) -> Self;
}

/// Configures and builds a [`ViewKind`].
pub struct ViewBuilder<V: ViewKind> {
    name: Option<String>,
    options: ViewOptions,
    queryset: Option<Arc<dyn DataSource>>,
    serializer: Arc<dyn Serializer>,
    object_permissions: Option<ObjectPermission>,
    _kind: PhantomData<fn() -> V>,
}

impl<V: ViewKind> Default for ViewBuilder<V> {
    fn default() -> Self {
        Self {
            name: None,
            options: ViewOptions::default(),
            queryset: None,
            serializer: Arc::new(IdentitySerializer),
            object_permissions: None,
            _kind: PhantomData,
        }
    }
}

impl<V: ViewKind> ViewBuilder<V> {
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn queryset(mut self, source: impl DataSource) -> Self {
        self.queryset = Some(Arc::new(source));
        self
    }

    #[must_use]
    pub fn serializer(mut self, serializer: impl Serializer) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    #[must_use]
    pub fn requires_authentication(mut self, required: bool) -> Self {
        self.options.requires_authentication = required;
        self
    }

    #[must_use]
    pub fn lookup_kwarg(mut self, kwarg: impl Into<String>) -> Self {
        self.options.lookup_kwarg = kwarg.into();
        self
    }

    #[must_use]
    pub fn lookup_field(mut self, field: impl Into<String>) -> Self {
        self.options.lookup_field = field.into();
        self
    }

    #[must_use]
    pub fn check_object_permissions<F>(mut self, check: F) -> Self
    where
        F: Fn(&Principal, &Row) -> Result<(), ViewError> + Send + Sync + 'static,
    {
        self.object_permissions = Some(Arc::new(check));
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::MisconfiguredView`] when no queryset is set or a
    /// lookup option is empty.
    pub fn build(self) -> Result<V, Error> {
        let name = self.name.unwrap_or_else(|| V::KIND.to_string());
        let misconfigured = |reason: &str| Error::MisconfiguredView {
            view: name.clone(),
            reason: reason.to_string(),
        };

        let Some(queryset) = self.queryset else {
            return Err(misconfigured("a queryset must be configured"));
        };
        if self.options.lookup_kwarg.is_empty() || self.options.lookup_field.is_empty() {
            return Err(misconfigured("lookup options cannot be empty"));
        }

        Ok(V::from_generic(GenericView {
            name,
            options: self.options,
            queryset,
            serializer: self.serializer,
            object_permissions: self.object_permissions,
            _marker: PhantomData,
        }))
    }
}
