use super::*;
use crate::{
    context::CallContext,
    data::{Row, StaticRows},
    error::{Error, ViewError},
    fixtures::{Counting, Empty, GetPayload, User, users},
    principal::Principal,
    translate::{ERROR_TRACE_KEY, ExceptionTranslator},
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tonic::{Code, metadata::MetadataMap};

fn get_user() -> RetrieveView<GetPayload, User> {
    RetrieveView::builder()
        .name("GetUser")
        .queryset(users())
        .lookup_field("id")
        .build()
        .unwrap()
}

fn list_users() -> StreamView<Empty, User> {
    StreamView::builder()
        .name("ListUsers")
        .queryset(users())
        .build()
        .unwrap()
}

fn ctx_with_user(raw: &str) -> CallContext {
    let mut metadata = MetadataMap::new();
    metadata.insert("user", raw.parse().unwrap());
    CallContext::new(metadata)
}

fn code_of(ctx: &CallContext) -> Option<Code> {
    ctx.status().map(|s| s.code())
}

fn fail_after_first(row: &Row) -> anyhow::Result<Value> {
    if row.get("id") == Some(&json!(2)) {
        anyhow::bail!("cannot serialize user 2");
    }
    Ok(Value::Object(row.clone()))
}

fn panicking(_row: &Row) -> anyhow::Result<Value> {
    panic!("boom")
}

fn broken() -> anyhow::Result<Vec<Row>> {
    Err(anyhow::anyhow!("connection refused").context("loading users"))
}

#[test]
fn retrieve_returns_matching_object() {
    let mut ctx = CallContext::default();
    let user = get_user().call(GetPayload { id: 1 }, &mut ctx);

    assert!(ctx.status().is_none());
    assert_eq!(
        user,
        User {
            id: 1,
            name: "Clay Jenson".to_string(),
            username: "clay.jenson".to_string(),
        }
    );
}

#[test]
fn retrieve_not_found_yields_default_message() {
    let mut ctx = CallContext::default();
    let user = get_user().call(GetPayload { id: 99 }, &mut ctx);

    assert_eq!(user, User::default());
    let status = ctx.status().unwrap();
    assert_eq!(status.code(), Code::NotFound);
    assert_eq!(status.message(), "User matching query does not exist.");
}

#[test]
fn default_lookup_field_is_pk() {
    let view = RetrieveView::<GetPayload, User>::builder()
        .queryset(users())
        .build()
        .unwrap();
    assert_eq!(view.name(), "RetrieveView");
    assert_eq!(view.base().options().lookup_field, DEFAULT_LOOKUP_FIELD);

    let mut ctx = CallContext::default();
    view.call(GetPayload { id: 1 }, &mut ctx);
    assert_eq!(code_of(&ctx), Some(Code::NotFound));
}

#[test]
fn lookup_matches_textual_scalars() {
    let view = RetrieveView::<GetPayload, User>::builder()
        .queryset(StaticRows::from_values([
            json!({"pk": "7", "username": "seven"}),
        ]))
        .build()
        .unwrap();

    let mut ctx = CallContext::default();
    let user = view.call(GetPayload { id: 7 }, &mut ctx);
    assert!(ctx.status().is_none());
    assert_eq!(user.username, "seven");
}

#[test]
fn lookup_matches_floats_with_integral_values() {
    let view = RetrieveView::<GetPayload, User>::builder()
        .queryset(StaticRows::from_values([
            json!({"pk": 1.5, "username": "half"}),
            json!({"pk": 1.0, "username": "one"}),
        ]))
        .build()
        .unwrap();

    let mut ctx = CallContext::default();
    let user = view.call(GetPayload { id: 1 }, &mut ctx);
    assert!(ctx.status().is_none());
    assert_eq!(user.username, "one");
}

#[test]
fn missing_lookup_argument_is_invalid() {
    let view = RetrieveView::<Empty, User>::builder()
        .queryset(users())
        .build()
        .unwrap();

    let mut ctx = CallContext::default();
    let user = view.call(Empty {}, &mut ctx);

    assert_eq!(user, User::default());
    let status = ctx.status().unwrap();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert_eq!(status.message(), "Missing argument id");
}

#[test]
fn multiple_matches_are_internal() {
    let view = RetrieveView::<GetPayload, User>::builder()
        .queryset(StaticRows::from_values([
            json!({"id": 1, "username": "a"}),
            json!({"id": 1, "username": "b"}),
        ]))
        .lookup_field("id")
        .build()
        .unwrap();

    let mut ctx = CallContext::default();
    view.call(GetPayload { id: 1 }, &mut ctx);
    assert_eq!(code_of(&ctx), Some(Code::Internal));
}

#[test]
fn absent_fields_keep_defaults() {
    let view = RetrieveView::<GetPayload, User>::builder()
        .queryset(StaticRows::from_values([
            json!({"id": 3, "name": null, "nickname": "ignored"}),
        ]))
        .lookup_field("id")
        .build()
        .unwrap();

    let mut ctx = CallContext::default();
    let user = view.call(GetPayload { id: 3 }, &mut ctx);
    assert!(ctx.status().is_none());
    assert_eq!(
        user,
        User {
            id: 3,
            ..User::default()
        }
    );
}

#[test]
fn anonymous_caller_rejected_before_data_resolution() {
    let source = Counting::new(users());
    let retrieve = RetrieveView::<GetPayload, User>::builder()
        .queryset(source.clone())
        .lookup_field("id")
        .requires_authentication(true)
        .build()
        .unwrap();
    let stream = StreamView::<Empty, User>::builder()
        .queryset(source.clone())
        .requires_authentication(true)
        .build()
        .unwrap();

    let mut ctx = CallContext::default();
    let user = retrieve.call(GetPayload { id: 1 }, &mut ctx);
    assert_eq!(user, User::default());
    assert_eq!(code_of(&ctx), Some(Code::Unauthenticated));

    let mut ctx = ctx_with_user("{}");
    let mut sink = Vec::new();
    stream.produce(Empty {}, &mut ctx, &mut sink);
    assert!(sink.is_empty());
    assert_eq!(code_of(&ctx), Some(Code::Unauthenticated));

    assert_eq!(source.calls(), 0);
}

#[test]
fn authenticated_caller_is_served() {
    let view = RetrieveView::<GetPayload, User>::builder()
        .queryset(users())
        .lookup_field("id")
        .requires_authentication(true)
        .build()
        .unwrap();

    let mut ctx = ctx_with_user(r#"{"id": 5, "username": "admin", "is_staff": true}"#);
    let user = view.call(GetPayload { id: 2 }, &mut ctx);
    assert!(ctx.status().is_none());
    assert_eq!(user.username, "clary.fairchild");
}

#[test]
fn malformed_principal_is_unauthenticated() {
    let source = Counting::new(users());
    let view = RetrieveView::<GetPayload, User>::builder()
        .queryset(source.clone())
        .lookup_field("id")
        .build()
        .unwrap();

    let mut ctx = ctx_with_user("not-json");
    view.call(GetPayload { id: 1 }, &mut ctx);
    assert_eq!(code_of(&ctx), Some(Code::Unauthenticated));
    assert_eq!(source.calls(), 0);
}

#[test]
fn object_permission_hook_can_reject() {
    let view = RetrieveView::<GetPayload, User>::builder()
        .queryset(users())
        .lookup_field("id")
        .check_object_permissions(|principal, row| match principal {
            Principal::User(user) if user.is_staff => Ok(()),
            _ if row.get("id") == Some(&json!(1)) => Ok(()),
            _ => Err(ViewError::permission_denied("staff only")),
        })
        .build()
        .unwrap();

    let mut ctx = CallContext::default();
    view.call(GetPayload { id: 1 }, &mut ctx);
    assert!(ctx.status().is_none());

    let mut ctx = CallContext::default();
    view.call(GetPayload { id: 2 }, &mut ctx);
    let status = ctx.status().unwrap();
    assert_eq!(status.code(), Code::PermissionDenied);
    assert_eq!(status.message(), "staff only");

    let mut ctx = ctx_with_user(r#"{"username": "admin", "is_staff": true}"#);
    view.call(GetPayload { id: 2 }, &mut ctx);
    assert!(ctx.status().is_none());
}

#[test]
fn stream_emits_every_object_in_order() {
    let mut ctx = CallContext::default();
    let mut sink = Vec::new();
    list_users().produce(Empty {}, &mut ctx, &mut sink);

    assert!(ctx.status().is_none());
    let usernames: Vec<_> = sink.iter().map(|u| u.username.as_str()).collect();
    assert_eq!(usernames, ["clay.jenson", "clary.fairchild"]);
}

#[test]
fn stream_over_empty_collection_completes() {
    let view = StreamView::<Empty, User>::builder()
        .queryset(StaticRows::default())
        .build()
        .unwrap();

    let mut ctx = CallContext::default();
    let mut sink = Vec::new();
    view.produce(Empty {}, &mut ctx, &mut sink);
    assert!(sink.is_empty());
    assert!(ctx.status().is_none());
}

#[test]
fn stream_failure_keeps_emitted_messages() {
    let view = StreamView::<Empty, User>::builder()
        .queryset(users())
        .serializer(fail_after_first)
        .build()
        .unwrap();

    let mut ctx = CallContext::default();
    let mut sink = Vec::new();
    view.produce(Empty {}, &mut ctx, &mut sink);

    assert_eq!(sink.len(), 1);
    assert_eq!(sink[0].id, 1);
    let status = ctx.status().unwrap();
    assert_eq!(status.code(), Code::Internal);
    assert_eq!(status.message(), "cannot serialize user 2");
}

struct TakeOne(Vec<User>);

impl Emit<User> for TakeOne {
    fn emit(&mut self, message: User) -> Result<(), Closed> {
        if self.0.is_empty() {
            self.0.push(message);
            Ok(())
        } else {
            Err(Closed)
        }
    }
}

#[test]
fn stream_stops_when_consumer_leaves() {
    let mut ctx = CallContext::default();
    let mut sink = TakeOne(Vec::new());
    list_users().produce(Empty {}, &mut ctx, &mut sink);

    assert_eq!(sink.0.len(), 1);
    assert!(ctx.status().is_none());
}

#[test]
fn panics_become_internal_errors() {
    let view = RetrieveView::<GetPayload, User>::builder()
        .queryset(users())
        .lookup_field("id")
        .serializer(panicking)
        .build()
        .unwrap();

    let mut ctx = CallContext::default();
    let user = view.call(GetPayload { id: 1 }, &mut ctx);
    assert_eq!(user, User::default());
    let status = ctx.status().unwrap();
    assert_eq!(status.code(), Code::Internal);
    assert_eq!(status.message(), "View panicked: boom");
}

#[test]
fn data_source_failure_is_internal() {
    let view = StreamView::<Empty, User>::builder()
        .queryset(broken)
        .build()
        .unwrap();

    let mut ctx = CallContext::default().with_translator(ExceptionTranslator::new(true));
    let mut sink = Vec::new();
    view.produce(Empty {}, &mut ctx, &mut sink);

    assert!(sink.is_empty());
    let status = ctx.status().unwrap();
    assert_eq!(status.code(), Code::Internal);
    assert_eq!(status.message(), "loading users");
    let trace = status.metadata().get_bin(ERROR_TRACE_KEY).unwrap();
    let trace = trace.to_bytes().unwrap();
    assert!(String::from_utf8_lossy(&trace).contains("connection refused"));
}

#[test]
fn cancelled_calls_are_unavailable() {
    let token = CancellationToken::new();
    token.cancel();
    let source = Counting::new(users());
    let view = RetrieveView::<GetPayload, User>::builder()
        .queryset(source.clone())
        .lookup_field("id")
        .build()
        .unwrap();

    let mut ctx = CallContext::default().with_cancellation(token.clone());
    view.call(GetPayload { id: 1 }, &mut ctx);
    assert_eq!(code_of(&ctx), Some(Code::Unavailable));

    let mut ctx = CallContext::default().with_cancellation(token);
    let mut sink = Vec::new();
    list_users().produce(Empty {}, &mut ctx, &mut sink);
    assert!(sink.is_empty());
    assert_eq!(code_of(&ctx), Some(Code::Unavailable));

    assert_eq!(source.calls(), 0);
}

#[test]
fn building_without_queryset_is_misconfigured() {
    let err = RetrieveView::<GetPayload, User>::builder()
        .name("GetUser")
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::MisconfiguredView { ref view, .. } if view == "GetUser"));

    let err = StreamView::<Empty, User>::builder()
        .queryset(users())
        .lookup_kwarg("")
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::MisconfiguredView { ref view, .. } if view == "StreamView"));
}
