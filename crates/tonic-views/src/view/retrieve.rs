use super::{GenericView, RequestMessage, ResponseMessage, UnaryView, ViewBuilder, ViewKind, panic_message};
use crate::{binding::HandlerDescriptor, context::CallContext, error::ViewError};
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Returns the single object matching the request's lookup field.
///
/// ```ignore
/// let get_user = RetrieveView::<GetPayload, User>::builder()
///     .queryset(users)
///     .lookup_field("id")
///     .build()?;
/// ```
#[derive(Debug)]
pub struct RetrieveView<Req, Resp> {
    base: GenericView<Req, Resp>,
}

impl<Req, Resp> RetrieveView<Req, Resp>
where
    Req: RequestMessage,
    Resp: ResponseMessage,
{
    pub fn builder() -> ViewBuilder<Self> {
        ViewBuilder::default()
    }

    pub fn base(&self) -> &GenericView<Req, Resp> {
        &self.base
    }

    /// Runs the lifecycle up to the serialized message.
    ///
    /// # Errors
    ///
    /// Any failure of principal resolution, authentication, lookup, permission
    /// check or serialization.
    pub fn retrieve(&self, request: &Req, ctx: &CallContext) -> Result<Resp, ViewError> {
        let principal = self.base.resolve_principal(ctx)?;
        self.base.perform_authentication(&principal)?;
        let object = self.base.get_object(request, &principal)?;
        self.base.serialize(&object)
    }
}

impl<Req, Resp> ViewKind for RetrieveView<Req, Resp>
where
    Req: RequestMessage,
    Resp: ResponseMessage,
{
    type Request = Req;
    type Response = Resp;

    const KIND: &'static str = "RetrieveView";

    fn from_generic(base: GenericView<Req, Resp>) -> Self {
        Self { base }
    }
}

impl<Req, Resp> UnaryView for RetrieveView<Req, Resp>
where
    Req: RequestMessage,
    Resp: ResponseMessage,
{
    type Request = Req;
    type Response = Resp;

    fn name(&self) -> &str {
        self.base.name()
    }

    fn call(&self, request: Req, ctx: &mut CallContext) -> Resp {
        if ctx.is_cancelled() {
            return ctx.recover(&ViewError::ServiceShutdown);
        }

        match catch_unwind(AssertUnwindSafe(|| self.retrieve(&request, ctx))) {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => ctx.recover(&err),
            Err(payload) => ctx.recover(&ViewError::Panicked(panic_message(payload))),
        }
    }
}

impl<Req, Resp> From<RetrieveView<Req, Resp>> for HandlerDescriptor
where
    Req: RequestMessage,
    Resp: ResponseMessage,
{
    fn from(view: RetrieveView<Req, Resp>) -> Self {
        HandlerDescriptor::unary(view)
    }
}
