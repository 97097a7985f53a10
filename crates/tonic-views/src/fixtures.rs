//! Contract, stubs and rows shared by the unit tests.

use crate::{
    data::{DataSource, Row, StaticRows},
    servicer::ServiceContract,
    settings::ServiceDefinition,
    stub::StubRegistry,
};
use prost_types::FileDescriptorProto;
use serde_json::json;
use std::sync::Arc;
use portable_atomic::{AtomicUsize, Ordering};

pub use tonic_views_proto::{Empty, GetPayload, User};

pub struct TestService;

impl ServiceContract for TestService {
    const NAME: &'static str = tonic_views_proto::TEST_SERVICE;
}

/// Compiled descriptor of `test.proto`.
pub fn test_file() -> FileDescriptorProto {
    tonic_views_proto::file_descriptor_set()
        .unwrap()
        .file
        .remove(0)
}

pub fn registry() -> StubRegistry {
    let mut registry = StubRegistry::new();
    registry.register_file_set(
        "grpc_codegen",
        &tonic_views_proto::file_descriptor_set().unwrap(),
    );
    registry
}

pub fn definition() -> ServiceDefinition {
    ServiceDefinition::new("TestService", "test", "protos/test.proto", "tests.rpcs")
}

pub fn users() -> StaticRows {
    StaticRows::from_values([
        json!({"id": 1, "name": "Clay Jenson", "username": "clay.jenson"}),
        json!({"id": 2, "name": "Clary Fairchild", "username": "clary.fairchild"}),
    ])
}

/// Wraps a source and counts how often it is evaluated.
#[derive(Clone)]
pub struct Counting<S> {
    inner: S,
    calls: Arc<AtomicUsize>,
}

impl<S> Counting<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<S: DataSource> DataSource for Counting<S> {
    fn rows(&self) -> anyhow::Result<Vec<Row>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.rows()
    }
}
