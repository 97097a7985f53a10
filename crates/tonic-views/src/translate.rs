//! Translation of view failures into wire statuses.
//!
//! | Failure                     | Code               |
//! |-----------------------------|--------------------|
//! | `NotAuthenticated`          | `UNAUTHENTICATED`  |
//! | `InvalidPrincipal`          | `UNAUTHENTICATED`  |
//! | `PermissionDenied`          | `PERMISSION_DENIED`|
//! | `InvalidArgument`           | `INVALID_ARGUMENT` |
//! | `ObjectNotFound`            | `NOT_FOUND`        |
//! | `ServiceShutdown`           | `UNAVAILABLE`      |
//! | anything else               | `INTERNAL`         |
//!
//! Internal failures are logged with their full cause chain. When trace
//! exposure is enabled, the chain also travels back to the caller in the
//! [`ERROR_TRACE_KEY`] trailer.

use crate::error::ViewError;
use std::backtrace::BacktraceStatus;
use std::error::Error as _;
use tonic::{
    Code, Status,
    metadata::{MetadataMap, MetadataValue},
};

/// Binary trailer carrying the server-side cause chain of internal errors.
pub const ERROR_TRACE_KEY: &str = "x-error-trace-bin";

#[derive(Debug, Clone, Copy, Default)]
pub struct ExceptionTranslator {
    expose_traces: bool,
}

impl ExceptionTranslator {
    pub const fn new(expose_traces: bool) -> Self {
        Self { expose_traces }
    }

    pub fn code(err: &ViewError) -> Code {
        match err {
            ViewError::NotAuthenticated | ViewError::InvalidPrincipal { .. } => {
                Code::Unauthenticated
            }
            ViewError::PermissionDenied(_) => Code::PermissionDenied,
            ViewError::InvalidArgument(_) => Code::InvalidArgument,
            ViewError::ObjectNotFound(_) => Code::NotFound,
            ViewError::ServiceShutdown => Code::Unavailable,
            ViewError::MultipleObjectsReturned { .. }
            | ViewError::Serialization(_)
            | ViewError::DataSource(_)
            | ViewError::Panicked(_) => Code::Internal,
        }
    }

    pub fn status(&self, err: &ViewError) -> Status {
        let code = Self::code(err);
        if code != Code::Internal {
            tracing::debug!(code = ?code, error = %err, "Call rejected");
            return Status::new(code, err.to_string());
        }

        let trace = trace_of(err);
        tracing::error!(error = %err, trace = %trace, "Call failed");

        if self.expose_traces {
            let mut metadata = MetadataMap::new();
            metadata.insert_bin(ERROR_TRACE_KEY, MetadataValue::from_bytes(trace.as_bytes()));
            Status::with_metadata(code, err.to_string(), metadata)
        } else {
            Status::new(code, err.to_string())
        }
    }
}

fn trace_of(err: &ViewError) -> String {
    let mut trace = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        trace.push_str("\ncaused by: ");
        trace.push_str(&cause.to_string());
        source = cause.source();
    }
    if let ViewError::DataSource(inner) = err {
        let backtrace = inner.backtrace();
        if backtrace.status() == BacktraceStatus::Captured {
            trace.push_str("\n\n");
            trace.push_str(&backtrace.to_string());
        }
    }
    trace
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_keep_their_code() {
        let translator = ExceptionTranslator::default();
        let cases = [
            (ViewError::NotAuthenticated, Code::Unauthenticated),
            (ViewError::permission_denied("nope"), Code::PermissionDenied),
            (ViewError::invalid_argument("Missing argument id"), Code::InvalidArgument),
            (ViewError::not_found("User matching query does not exist."), Code::NotFound),
            (ViewError::ServiceShutdown, Code::Unavailable),
        ];
        for (err, code) in cases {
            let status = translator.status(&err);
            assert_eq!(status.code(), code);
            assert_eq!(status.message(), err.to_string());
            assert!(status.metadata().get_bin(ERROR_TRACE_KEY).is_none());
        }
    }

    #[test]
    fn unclassified_errors_are_internal() {
        let translator = ExceptionTranslator::default();
        let err = ViewError::from(anyhow::anyhow!("connection reset").context("loading users"));
        let status = translator.status(&err);
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "loading users");
        assert!(status.metadata().get_bin(ERROR_TRACE_KEY).is_none());
    }

    #[test]
    fn traces_are_exposed_when_enabled() {
        let translator = ExceptionTranslator::new(true);
        let err = ViewError::from(anyhow::anyhow!("connection reset").context("loading users"));
        let status = translator.status(&err);
        let trace = status
            .metadata()
            .get_bin(ERROR_TRACE_KEY)
            .unwrap()
            .to_bytes()
            .unwrap();
        let trace = String::from_utf8(trace.to_vec()).unwrap();
        assert!(trace.starts_with("loading users"));
        assert!(trace.contains("caused by: connection reset"));
    }
}
