//! Validation of declared bindings against a resolved service interface.

use crate::{
    binding::RpcBinding,
    error::{Error, Result},
    stub::ResolvedStub,
};
use std::collections::HashSet;

/// Outcome of a successful validation.
///
/// `unbound` lists the declared methods no binding covers. Those methods stay
/// unimplemented: the servicer answers them with `UNIMPLEMENTED`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub service: String,
    pub bound: Vec<String>,
    pub unbound: Vec<String>,
}

impl ValidationReport {
    pub fn is_complete(&self) -> bool {
        self.unbound.is_empty()
    }
}

/// Checks every binding against the methods `stub` declares.
///
/// # Errors
///
/// - [`Error::InvalidRpcDefinition`] for an empty or duplicate name, or a
///   call shape that differs from the declared method.
/// - [`Error::UndeclaredRpc`] when a name is not declared by the interface.
/// - [`Error::MisconfiguredView`] when the handler's response type is not the
///   method's declared output type.
pub fn validate(stub: &ResolvedStub, bindings: &[RpcBinding]) -> Result<ValidationReport> {
    let service = stub.service();
    let mut seen = HashSet::with_capacity(bindings.len());
    let mut bound = Vec::with_capacity(bindings.len());

    for binding in bindings {
        let name = binding.name();
        let invalid = |reason: String| Error::InvalidRpcDefinition {
            service: service.to_string(),
            rpc: name.to_string(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("binding name cannot be empty".to_string()));
        }

        let Some(method) = stub.method(name) else {
            return Err(Error::UndeclaredRpc {
                service: service.to_string(),
                rpc: name.to_string(),
            });
        };

        if !seen.insert(name) {
            return Err(invalid("bound more than once".to_string()));
        }

        let handler = binding.handler();
        match method.shape() {
            None => {
                return Err(invalid(
                    "client-streaming methods cannot be bound to a view".to_string(),
                ));
            }
            Some(shape) if shape != handler.shape() => {
                return Err(invalid(format!(
                    "method is {shape} but view `{}` is {}",
                    handler.view_name(),
                    handler.shape()
                )));
            }
            Some(_) => {}
        }

        let response = handler.response_type();
        if stub.message_type(&response).is_none() {
            return Err(Error::MisconfiguredView {
                view: handler.view_name().to_string(),
                reason: format!("response message `{response}` is not generated for {service}"),
            });
        }
        if response != method.output_type {
            return Err(Error::MisconfiguredView {
                view: handler.view_name().to_string(),
                reason: format!(
                    "response message `{response}` does not match `{}` returned by {name}",
                    method.output_type
                ),
            });
        }

        bound.push(name.to_string());
    }

    let unbound = stub
        .service_interface()
        .into_iter()
        .filter(|m| !seen.contains(m))
        .map(str::to_string)
        .collect();

    Ok(ValidationReport {
        service: service.to_string(),
        bound,
        unbound,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        binding::rpc,
        fixtures::{Empty, GetPayload, User, definition, registry, test_file, users},
        settings::Settings,
        stub::{StubLocator, StubRegistry},
        view::{RetrieveView, StreamView},
    };
    use prost_types::MethodDescriptorProto;
    use std::sync::Arc;

    /// A message no artifact of `test.proto` declares.
    #[derive(Clone, PartialEq, prost::Message, serde::Deserialize)]
    #[serde(default)]
    struct Orphan {
        #[prost(int32, tag = "1")]
        id: i32,
    }

    impl prost::Name for Orphan {
        const NAME: &'static str = "Orphan";
        const PACKAGE: &'static str = "test";
    }

    fn stub() -> Arc<ResolvedStub> {
        let settings = Settings::builder().service(definition()).build().unwrap();
        StubLocator::new(registry())
            .locate(&settings, &settings.services()[0])
            .unwrap()
    }

    fn get_user() -> RetrieveView<GetPayload, User> {
        RetrieveView::builder()
            .queryset(users())
            .lookup_field("id")
            .build()
            .unwrap()
    }

    fn list_users() -> StreamView<Empty, User> {
        StreamView::builder().queryset(users()).build().unwrap()
    }

    #[test]
    fn complete_bindings_validate() {
        let bindings = [rpc("GetUser", get_user()), rpc("ListUsers", list_users())];
        let report = validate(&stub(), &bindings).unwrap();

        assert_eq!(report.service, "test.TestService");
        assert_eq!(report.bound, ["GetUser", "ListUsers"]);
        assert!(report.is_complete());
    }

    #[test]
    fn unbound_methods_are_reported() {
        let bindings = [rpc("GetUser", get_user())];
        let report = validate(&stub(), &bindings).unwrap();

        assert_eq!(report.unbound, ["ListUsers"]);
        assert!(!report.is_complete());
    }

    #[test]
    fn undeclared_rpc_fails() {
        let bindings = [rpc("DeleteUser", get_user())];
        assert_eq!(
            validate(&stub(), &bindings).unwrap_err(),
            Error::UndeclaredRpc {
                service: "test.TestService".to_string(),
                rpc: "DeleteUser".to_string(),
            }
        );
    }

    #[test]
    fn duplicate_and_empty_names_fail() {
        let bindings = [rpc("GetUser", get_user()), rpc("GetUser", get_user())];
        assert!(matches!(
            validate(&stub(), &bindings),
            Err(Error::InvalidRpcDefinition { ref rpc, .. }) if rpc == "GetUser"
        ));

        let bindings = [rpc("", get_user())];
        assert!(matches!(
            validate(&stub(), &bindings),
            Err(Error::InvalidRpcDefinition { .. })
        ));
    }

    #[test]
    fn call_shape_must_match() {
        let bindings = [rpc("GetUser", list_users())];
        assert!(matches!(
            validate(&stub(), &bindings),
            Err(Error::InvalidRpcDefinition { ref reason, .. }) if reason.contains("unary")
        ));
    }

    #[test]
    fn response_type_must_match() {
        let wrong = RetrieveView::<GetPayload, GetPayload>::builder()
            .name("GetPayloadView")
            .queryset(users())
            .build()
            .unwrap();
        let bindings = [rpc("GetUser", wrong)];
        assert!(matches!(
            validate(&stub(), &bindings),
            Err(Error::MisconfiguredView { ref view, .. }) if view == "GetPayloadView"
        ));
    }

    #[test]
    fn client_streaming_method_cannot_be_bound() {
        let mut file = test_file();
        file.service[0].method.push(MethodDescriptorProto {
            name: Some("UploadUsers".to_string()),
            input_type: Some(".test.User".to_string()),
            output_type: Some(".test.User".to_string()),
            client_streaming: Some(true),
            ..Default::default()
        });
        let mut stubs = StubRegistry::new();
        stubs.register_file("grpc_codegen", &file);

        let settings = Settings::builder().service(definition()).build().unwrap();
        let stub = StubLocator::new(stubs)
            .locate(&settings, &settings.services()[0])
            .unwrap();

        let upload = RetrieveView::<User, User>::builder()
            .queryset(users())
            .lookup_field("id")
            .build()
            .unwrap();
        let bindings = [rpc("UploadUsers", upload)];
        assert!(matches!(
            validate(&stub, &bindings),
            Err(Error::InvalidRpcDefinition { ref rpc, ref reason, .. })
                if rpc == "UploadUsers" && reason.contains("client-streaming")
        ));
    }

    #[test]
    fn response_type_must_be_generated() {
        let orphan = RetrieveView::<GetPayload, Orphan>::builder()
            .name("OrphanView")
            .queryset(users())
            .lookup_field("id")
            .build()
            .unwrap();
        let bindings = [rpc("GetUser", orphan)];
        assert!(matches!(
            validate(&stub(), &bindings),
            Err(Error::MisconfiguredView { ref view, ref reason })
                if view == "OrphanView" && reason.contains("`test.Orphan` is not generated")
        ));
    }
}
