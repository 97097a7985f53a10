use crate::{error::ViewError, settings::DEFAULT_AUTH_USER_KEY, translate::ExceptionTranslator};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tonic::{Status, metadata::MetadataMap};

/// Per-call state handed to a view.
///
/// Carries the incoming metadata and a status sink. A view that fails records
/// the translated status here and still returns a response value; the
/// transport adapter turns a recorded status into the call's final status.
/// Created at call entry and dropped at call exit.
#[derive(Debug)]
pub struct CallContext {
    metadata: MetadataMap,
    principal_key: Arc<str>,
    status: Option<Status>,
    cancellation: CancellationToken,
    translator: ExceptionTranslator,
}

impl CallContext {
    pub fn new(metadata: MetadataMap) -> Self {
        Self {
            metadata,
            principal_key: Arc::from(DEFAULT_AUTH_USER_KEY),
            status: None,
            cancellation: CancellationToken::new(),
            translator: ExceptionTranslator::default(),
        }
    }

    #[must_use]
    pub fn with_principal_key(mut self, key: Arc<str>) -> Self {
        self.principal_key = key;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    #[must_use]
    pub fn with_translator(mut self, translator: ExceptionTranslator) -> Self {
        self.translator = translator;
        self
    }

    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    /// Metadata key holding the JSON principal payload.
    pub fn principal_key(&self) -> &str {
        &self.principal_key
    }

    /// Records the final status of the call. The first failure wins.
    pub fn set_status(&mut self, status: Status) {
        if self.status.is_none() {
            self.status = Some(status);
        }
    }

    /// Translates `err` and records the resulting status.
    pub fn fail(&mut self, err: &ViewError) {
        let status = self.translator.status(err);
        self.set_status(status);
    }

    /// Records the status for `err` and returns the value the call completes
    /// with: the response type's default.
    pub fn recover<M: Default>(&mut self, err: &ViewError) -> M {
        self.fail(err);
        M::default()
    }

    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn into_status(self) -> Option<Status> {
        self.status
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new(MetadataMap::new())
    }
}
