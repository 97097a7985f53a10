//! Demo user directory served as `test.TestService`.

use serde_json::json;
use tonic_views::{
    RetrieveView, RpcBinding, RpcModules, ServiceContract, ServiceDefinition, StaticRows,
    StreamView, StubRegistry, rpc,
};
use tonic_views_proto::{Empty, GetPayload, TEST_SERVICE, User};

pub const RPC_MODULE: &str = "users.rpcs";
const PACKAGE: &str = "test";
const PROTO_FILE: &str = "test.proto";

/// Contract of `test.TestService`.
pub struct TestService;

impl ServiceContract for TestService {
    const NAME: &'static str = TEST_SERVICE;
}

pub fn users() -> StaticRows {
    StaticRows::from_values([
        json!({"id": 1, "name": "Clay Jenson", "username": "clay.jenson"}),
        json!({"id": 2, "name": "Clary Fairchild", "username": "clary.fairchild"}),
    ])
}

pub fn definition() -> ServiceDefinition {
    ServiceDefinition::new("TestService", PACKAGE, PROTO_FILE, RPC_MODULE)
}

/// Bindings of `test.TestService`.
pub fn rpcs() -> tonic_views::Result<Vec<RpcBinding>> {
    let get_user = RetrieveView::<GetPayload, User>::builder()
        .name("GetUser")
        .queryset(users())
        .lookup_field("id")
        .build()?;
    let list_users = StreamView::<Empty, User>::builder()
        .name("ListUsers")
        .queryset(users())
        .build()?;

    Ok(vec![rpc("GetUser", get_user), rpc("ListUsers", list_users)])
}

pub fn register(
    stubs: &mut StubRegistry,
    modules: &mut RpcModules,
    stub_location: &str,
) -> anyhow::Result<()> {
    stubs.register_file_set(stub_location, &tonic_views_proto::file_descriptor_set()?);
    modules.register(RPC_MODULE, rpcs()?);
    Ok(())
}
