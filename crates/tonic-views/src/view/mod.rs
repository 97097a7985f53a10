//! Request lifecycle.
//!
//! A view turns one call into one response message ([`UnaryView`]) or an
//! ordered, finite sequence of messages ([`StreamingView`]). Both shapes share
//! the same lifecycle, implemented by [`GenericView`]:
//!
//! 1. Resolve the principal from call metadata.
//! 2. Reject anonymous callers when authentication is required.
//! 3. Resolve the object (retrieve) or the collection (stream).
//! 4. Run the object-level permission hook.
//! 5. Serialize into the response message, keeping defaults for absent
//!    fields.
//!
//! Failures never escape a view: they are translated onto the
//! [`CallContext`] and the call completes with a default message (unary) or
//! ends the stream (streaming).

mod generic;
mod retrieve;
mod stream;
#[cfg(test)]
mod tests;

pub use generic::*;
pub use retrieve::*;
pub use stream::*;

use crate::context::CallContext;
use serde::{Serialize, de::DeserializeOwned};
use std::any::Any;

/// Messages a view accepts. Fields are read through their serde form.
pub trait RequestMessage: prost::Message + Default + Serialize + Send + 'static {}

impl<T> RequestMessage for T where T: prost::Message + Default + Serialize + Send + 'static {}

/// Messages a view returns. Built from serialized payloads through serde.
pub trait ResponseMessage:
    prost::Message + prost::Name + Default + DeserializeOwned + Send + 'static
{
}

impl<T> ResponseMessage for T where
    T: prost::Message + prost::Name + Default + DeserializeOwned + Send + 'static
{
}

/// A handler producing exactly one response per call.
pub trait UnaryView: Send + Sync + 'static {
    type Request: RequestMessage;
    type Response: ResponseMessage;

    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Runs one call. On failure the status is recorded on `ctx` and the
    /// response's default is returned.
    fn call(&self, request: Self::Request, ctx: &mut CallContext) -> Self::Response;
}

/// A handler producing a finite sequence of responses per call.
pub trait StreamingView: Send + Sync + 'static {
    type Request: RequestMessage;
    type Response: ResponseMessage;

    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Runs one call, emitting responses into `sink` in production order.
    ///
    /// Production stops at the first failure (recorded on `ctx`) or when the
    /// sink closes. Emitted messages are never retracted.
    fn produce(
        &self,
        request: Self::Request,
        ctx: &mut CallContext,
        sink: &mut dyn Emit<Self::Response>,
    );
}

/// The consumer was dropped; nothing more will be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed;

/// Consumer side of a streaming call.
pub trait Emit<M> {
    /// # Errors
    ///
    /// Returns [`Closed`] when the consumer is gone.
    fn emit(&mut self, message: M) -> Result<(), Closed>;
}

impl<M> Emit<M> for Vec<M> {
    fn emit(&mut self, message: M) -> Result<(), Closed> {
        self.push(message);
        Ok(())
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
