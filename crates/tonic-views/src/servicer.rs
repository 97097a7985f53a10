//! Servicer construction and call dispatch.
//!
//! A [`Servicer`] is the concrete object registered with the tonic server in
//! place of a generated `XxxServer<T>`. Instead of one match arm per method, it
//! holds a table of method name to call adapter, filled once at startup from
//! the validated bindings and read-only afterwards:
//!
//! - unary views run through [`tonic::server::Grpc::unary`],
//! - streaming views run through [`tonic::server::Grpc::server_streaming`],
//!   fed by a bounded channel.
//!
//! Views execute on tokio's blocking pool so data sources may block without
//! stalling the reactor. Paths with no binding answer `UNIMPLEMENTED`.

use crate::{
    binding::RpcBinding,
    context::CallContext,
    error::ViewError,
    settings::{DEFAULT_AUTH_USER_KEY, DEFAULT_STREAM_BUFFER_SIZE, Settings},
    translate::ExceptionTranslator,
    view::{Closed, Emit, StreamingView, UnaryView, panic_message},
};
use core::convert::Infallible;
use core::marker::PhantomData;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{
    Status,
    body::Body,
    codec::Codec,
    codegen::{
        BoxFuture, BoxStream, CompressionEncoding, Context, EnabledCompressionEncodings, Poll,
        Service, http,
    },
    metadata::MetadataMap,
    server::{Grpc, NamedService, ServerStreamingService, UnaryService},
};
use tonic_prost::ProstCodec;

/// The generated service interface a servicer stands in for.
///
/// ```ignore
/// pub struct TestService;
///
/// impl ServiceContract for TestService {
///     const NAME: &'static str = "test.TestService";
/// }
/// ```
pub trait ServiceContract: Send + Sync + 'static {
    /// Fully-qualified service name, `<package>.<Service>`.
    const NAME: &'static str;
}

/// Per-servicer settings applied to every call.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    principal_key: Arc<str>,
    stream_buffer_size: usize,
    translator: ExceptionTranslator,
    accept_compression_encodings: EnabledCompressionEncodings,
    send_compression_encodings: EnabledCompressionEncodings,
    max_decoding_message_size: Option<usize>,
    max_encoding_message_size: Option<usize>,
    shutdown: CancellationToken,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            principal_key: Arc::from(DEFAULT_AUTH_USER_KEY),
            stream_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
            translator: ExceptionTranslator::default(),
            accept_compression_encodings: EnabledCompressionEncodings::default(),
            send_compression_encodings: EnabledCompressionEncodings::default(),
            max_decoding_message_size: None,
            max_encoding_message_size: None,
            shutdown: CancellationToken::new(),
        }
    }
}

impl DispatchConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            principal_key: Arc::from(settings.auth_user_key()),
            stream_buffer_size: settings.stream_buffer_size(),
            translator: ExceptionTranslator::new(settings.expose_error_traces()),
            ..Self::default()
        }
    }

    /// Shares `token` so that cancelling it shuts every servicer built from
    /// this config down at once.
    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    fn call_context(&self, metadata: MetadataMap) -> CallContext {
        CallContext::new(metadata)
            .with_principal_key(Arc::clone(&self.principal_key))
            .with_cancellation(self.shutdown.clone())
            .with_translator(self.translator)
    }

    fn grpc<T: Codec>(&self, codec: T) -> Grpc<T> {
        Grpc::new(codec)
            .apply_compression_config(
                self.accept_compression_encodings,
                self.send_compression_encodings,
            )
            .apply_max_message_size_config(
                self.max_decoding_message_size,
                self.max_encoding_message_size,
            )
    }
}

/// Type-erased call adapter stored in the dispatch table.
pub(crate) trait Route: Send + Sync + 'static {
    fn view_name(&self) -> &str;

    fn response_type(&self) -> String;

    fn serve(
        &self,
        request: http::Request<Body>,
        dispatch: &DispatchConfig,
    ) -> BoxFuture<http::Response<Body>, Infallible>;
}

/// Adapter invoking a [`UnaryView`] once per call.
pub(crate) struct UnaryAdapter<V> {
    view: Arc<V>,
}

impl<V: UnaryView> UnaryAdapter<V> {
    pub(crate) fn new(view: V) -> Self {
        Self {
            view: Arc::new(view),
        }
    }
}

struct UnaryCall<V> {
    view: Arc<V>,
    dispatch: DispatchConfig,
}

impl<V: UnaryView> UnaryService<V::Request> for UnaryCall<V> {
    type Response = V::Response;
    type Future = BoxFuture<tonic::Response<V::Response>, Status>;

    fn call(&mut self, request: tonic::Request<V::Request>) -> Self::Future {
        Box::pin(run_unary(
            Arc::clone(&self.view),
            self.dispatch.clone(),
            request,
        ))
    }
}

#[tracing::instrument(skip_all, fields(view = %view.name()))]
async fn run_unary<V: UnaryView>(
    view: Arc<V>,
    dispatch: DispatchConfig,
    request: tonic::Request<V::Request>,
) -> Result<tonic::Response<V::Response>, Status> {
    let (metadata, _extensions, message) = request.into_parts();
    let mut ctx = dispatch.call_context(metadata);

    let outcome = tokio::task::spawn_blocking(move || {
        let response = view.call(message, &mut ctx);
        (response, ctx.into_status())
    })
    .await;

    match outcome {
        Ok((response, None)) => Ok(tonic::Response::new(response)),
        Ok((_default, Some(status))) => Err(status),
        Err(e) if e.is_panic() => Err(dispatch
            .translator
            .status(&ViewError::Panicked(panic_message(e.into_panic())))),
        Err(e) => {
            tracing::error!("View task failed: {e}");
            Err(Status::internal(format!("View task failed: {e}")))
        }
    }
}

impl<V: UnaryView> Route for UnaryAdapter<V> {
    fn view_name(&self) -> &str {
        self.view.name()
    }

    fn response_type(&self) -> String {
        <V::Response as prost::Name>::full_name()
    }

    fn serve(
        &self,
        request: http::Request<Body>,
        dispatch: &DispatchConfig,
    ) -> BoxFuture<http::Response<Body>, Infallible> {
        let method = UnaryCall {
            view: Arc::clone(&self.view),
            dispatch: dispatch.clone(),
        };
        let mut grpc = dispatch.grpc(ProstCodec::<V::Response, V::Request>::default());
        Box::pin(async move { Ok(grpc.unary(method, request).await) })
    }
}

/// Adapter forwarding a [`StreamingView`]'s production to the caller.
pub(crate) struct StreamingAdapter<V> {
    view: Arc<V>,
}

impl<V: StreamingView> StreamingAdapter<V> {
    pub(crate) fn new(view: V) -> Self {
        Self {
            view: Arc::new(view),
        }
    }
}

struct StreamingCall<V> {
    view: Arc<V>,
    dispatch: DispatchConfig,
}

impl<V: StreamingView> ServerStreamingService<V::Request> for StreamingCall<V> {
    type Response = V::Response;
    type ResponseStream = BoxStream<V::Response>;
    type Future = BoxFuture<tonic::Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: tonic::Request<V::Request>) -> Self::Future {
        let stream = start_stream(Arc::clone(&self.view), &self.dispatch, request);
        Box::pin(async move { Ok(stream) })
    }
}

/// Emits into the per-call response channel, blocking while it is full.
///
/// Must only be used off the async reactor (the view runs on the blocking
/// pool).
pub struct ChannelSink<M> {
    tx: mpsc::Sender<Result<M, Status>>,
}

impl<M> ChannelSink<M> {
    pub fn new(tx: mpsc::Sender<Result<M, Status>>) -> Self {
        Self { tx }
    }
}

impl<M> Emit<M> for ChannelSink<M> {
    fn emit(&mut self, message: M) -> Result<(), Closed> {
        self.tx.blocking_send(Ok(message)).map_err(|_| Closed)
    }
}

fn start_stream<V: StreamingView>(
    view: Arc<V>,
    dispatch: &DispatchConfig,
    request: tonic::Request<V::Request>,
) -> tonic::Response<BoxStream<V::Response>> {
    let (metadata, _extensions, message) = request.into_parts();
    let mut ctx = dispatch.call_context(metadata);
    let (tx, rx) = mpsc::channel(dispatch.stream_buffer_size);
    let span = tracing::info_span!("run_streaming", view = %view.name());

    tokio::task::spawn_blocking(move || {
        let _entered = span.enter();
        let mut sink = ChannelSink::new(tx.clone());
        let produced = catch_unwind(AssertUnwindSafe(|| {
            view.produce(message, &mut ctx, &mut sink);
        }));
        if let Err(payload) = produced {
            ctx.fail(&ViewError::Panicked(panic_message(payload)));
        }

        // The stream ends either cleanly or with the recorded status as its
        // last item. If the caller left, there is no one to tell.
        if let Some(status) = ctx.into_status() {
            if let Err(_e) = tx.blocking_send(Err(status)) {
                tracing::debug!("Failed to forward stream status: caller gone");
            }
        }
    });

    tonic::Response::new(Box::pin(ReceiverStream::new(rx)))
}

impl<V: StreamingView> Route for StreamingAdapter<V> {
    fn view_name(&self) -> &str {
        self.view.name()
    }

    fn response_type(&self) -> String {
        <V::Response as prost::Name>::full_name()
    }

    fn serve(
        &self,
        request: http::Request<Body>,
        dispatch: &DispatchConfig,
    ) -> BoxFuture<http::Response<Body>, Infallible> {
        let method = StreamingCall {
            view: Arc::clone(&self.view),
            dispatch: dispatch.clone(),
        };
        let mut grpc = dispatch.grpc(ProstCodec::<V::Response, V::Request>::default());
        Box::pin(async move { Ok(grpc.server_streaming(method, request).await) })
    }
}

/// Builds a [`Servicer`] by attaching one adapter per binding.
///
/// Bindings are expected to be validated (see [`crate::validate`]); a later
/// binding with the same name replaces an earlier one.
pub struct ServicerBuilder<C> {
    routes: BTreeMap<String, Arc<dyn Route>>,
    dispatch: DispatchConfig,
    _contract: PhantomData<fn() -> C>,
}

impl<C: ServiceContract> Default for ServicerBuilder<C> {
    fn default() -> Self {
        Self {
            routes: BTreeMap::new(),
            dispatch: DispatchConfig::default(),
            _contract: PhantomData,
        }
    }
}

impl<C: ServiceContract> ServicerBuilder<C> {
    #[must_use]
    pub fn dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    #[must_use]
    pub fn bind(mut self, binding: &RpcBinding) -> Self {
        self.routes.insert(
            binding.name().to_string(),
            Arc::clone(binding.handler().route()),
        );
        self
    }

    #[must_use]
    pub fn bind_all<'a>(self, bindings: impl IntoIterator<Item = &'a RpcBinding>) -> Self {
        bindings.into_iter().fold(self, |builder, b| builder.bind(b))
    }

    pub fn build(self) -> Servicer<C> {
        Servicer {
            routes: Arc::new(self.routes),
            dispatch: self.dispatch,
            _contract: PhantomData,
        }
    }
}

/// Dispatch target registered with the transport for contract `C`.
pub struct Servicer<C> {
    routes: Arc<BTreeMap<String, Arc<dyn Route>>>,
    dispatch: DispatchConfig,
    _contract: PhantomData<fn() -> C>,
}

impl<C: ServiceContract> Servicer<C> {
    pub fn builder() -> ServicerBuilder<C> {
        ServicerBuilder::default()
    }

    /// Names of the bound methods, sorted.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    /// Stops accepting calls. New calls answer `UNAVAILABLE` and running
    /// streams stop after their current message.
    pub fn shutdown(&self) {
        self.dispatch.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.dispatch.shutdown.is_cancelled()
    }

    /// Enable decompressing requests with the given encoding.
    #[must_use]
    pub fn accept_compressed(mut self, encoding: CompressionEncoding) -> Self {
        self.dispatch.accept_compression_encodings.enable(encoding);
        self
    }

    /// Compress responses with the given encoding, if the client supports it.
    #[must_use]
    pub fn send_compressed(mut self, encoding: CompressionEncoding) -> Self {
        self.dispatch.send_compression_encodings.enable(encoding);
        self
    }

    /// Limits the maximum size of a decoded message.
    ///
    /// Default: `4MB`
    #[must_use]
    pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
        self.dispatch.max_decoding_message_size = Some(limit);
        self
    }

    /// Limits the maximum size of an encoded message.
    ///
    /// Default: `usize::MAX`
    #[must_use]
    pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
        self.dispatch.max_encoding_message_size = Some(limit);
        self
    }

    fn route(&self, path: &str) -> Option<Arc<dyn Route>> {
        let method = path
            .strip_prefix('/')?
            .strip_prefix(C::NAME)?
            .strip_prefix('/')?;
        self.routes.get(method).cloned()
    }
}

fn unimplemented_response() -> http::Response<Body> {
    let mut response = http::Response::new(Body::default());
    let headers = response.headers_mut();
    headers.insert(
        Status::GRPC_STATUS,
        (tonic::Code::Unimplemented as i32).into(),
    );
    headers.insert(
        http::header::CONTENT_TYPE,
        tonic::metadata::GRPC_CONTENT_TYPE,
    );
    response
}

impl<C: ServiceContract> Service<http::Request<Body>> for Servicer<C> {
    type Response = http::Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: http::Request<Body>) -> Self::Future {
        match self.route(request.uri().path()) {
            Some(route) => route.serve(request, &self.dispatch),
            None => {
                tracing::debug!(path = %request.uri().path(), "No binding for method");
                Box::pin(async move { Ok(unimplemented_response()) })
            }
        }
    }
}

impl<C: ServiceContract> NamedService for Servicer<C> {
    const NAME: &'static str = C::NAME;
}

impl<C> Clone for Servicer<C> {
    fn clone(&self) -> Self {
        Self {
            routes: Arc::clone(&self.routes),
            dispatch: self.dispatch.clone(),
            _contract: PhantomData,
        }
    }
}

impl<C: ServiceContract> fmt::Debug for Servicer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Servicer")
            .field("service", &C::NAME)
            .field("methods", &self.routes.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
