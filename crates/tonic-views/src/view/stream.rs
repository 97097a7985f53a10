use super::{
    Emit, GenericView, RequestMessage, ResponseMessage, StreamingView, ViewBuilder, ViewKind,
    panic_message,
};
use crate::{binding::HandlerDescriptor, context::CallContext, error::ViewError};
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Streams one message per object of the collection, in collection order.
#[derive(Debug)]
pub struct StreamView<Req, Resp> {
    base: GenericView<Req, Resp>,
}

impl<Req, Resp> StreamView<Req, Resp>
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

    /// Runs the lifecycle, emitting each serialized object.
    ///
    /// Returns early without error when the sink closes.
    ///
    /// # Errors
    ///
    /// Any failure of principal resolution, authentication, collection
    /// resolution or serialization. Messages emitted before the failure stand.
    pub fn stream(
        &self,
        _request: &Req,
        ctx: &CallContext,
        sink: &mut dyn Emit<Resp>,
    ) -> Result<(), ViewError> {
        let principal = self.base.resolve_principal(ctx)?;
        self.base.perform_authentication(&principal)?;

        for (emitted, object) in self.base.get_queryset()?.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(ViewError::ServiceShutdown);
            }
            let message = self.base.serialize(object)?;
            if sink.emit(message).is_err() {
                tracing::debug!(view = %self.base.name(), emitted, "Stream consumer gone");
                return Ok(());
            }
        }
        Ok(())
    }
}

impl<Req, Resp> ViewKind for StreamView<Req, Resp>
where
    Req: RequestMessage,
    Resp: ResponseMessage,
{
    type Request = Req;
    type Response = Resp;

    const KIND: &'static str = "StreamView";

    fn from_generic(base: GenericView<Req, Resp>) -> Self {
        Self { base }
    }
}

impl<Req, Resp> StreamingView for StreamView<Req, Resp>
where
    Req: RequestMessage,
    Resp: ResponseMessage,
{
    type Request = Req;
    type Response = Resp;

    fn name(&self) -> &str {
        self.base.name()
    }

    fn produce(&self, request: Req, ctx: &mut CallContext, sink: &mut dyn Emit<Resp>) {
        if ctx.is_cancelled() {
            ctx.fail(&ViewError::ServiceShutdown);
            return;
        }

        match catch_unwind(AssertUnwindSafe(|| self.stream(&request, ctx, sink))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => ctx.fail(&err),
            Err(payload) => ctx.fail(&ViewError::Panicked(panic_message(payload))),
        }
    }
}

impl<Req, Resp> From<StreamView<Req, Resp>> for HandlerDescriptor
where
    Req: RequestMessage,
    Resp: ResponseMessage,
{
    fn from(view: StreamView<Req, Resp>) -> Self {
        HandlerDescriptor::streaming(view)
    }
}
