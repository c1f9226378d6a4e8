//! Request dispatcher: a sorted operation table, looked up by
//! case-insensitive binary search, plus the per-operation handlers
//! themselves. Each handler gets a [`DispatchContext`] borrowing the
//! registry and the session map and returns the wire [`Message`] to send
//! back; the caller (the multiplexer) owns serialization and the actual
//! write.

use std::collections::HashMap;
use std::time::Instant;

use purcrdr_ids::EndpointName;
use purcrdr_protocol::{
    DataType, ErrorCode, Message, RequestMessage, StatusCode, Target,
};
use purcrdr_transport::TransportKind;
use serde_json::Value;

use crate::endpoint::EndpointStatus;
use crate::error::ServerError;
use crate::registry::{Registry, RegistryError};
use crate::session::SessionInfo;
use purcrdr_protocol::constants::{PROTOCOL_MIN_VERSION, PROTOCOL_NAME, PROTOCOL_VERSION};

pub struct DispatchContext<'a> {
    pub registry: &'a mut Registry,
    pub sessions: &'a mut HashMap<u64, SessionInfo>,
    pub endpoint_id: u64,
    pub transport_kind: TransportKind,
    pub now: Instant,
}

type Handler = fn(&mut DispatchContext<'_>, &RequestMessage) -> Message;

/// Sorted (lowercase operation name, handler) pairs. `startSession` is
/// handled before this table is consulted: every other operation is
/// forbidden to an `AUTHING` endpoint, but `startSession` is exactly how
/// an endpoint leaves that state.
const OPERATIONS: &[(&str, Handler)] = &[
    ("append", handle_append),
    ("clear", handle_clear),
    ("createplainwindow", handle_create_plain_window),
    ("destroyplainwindow", handle_destroy_plain_window),
    ("displace", handle_displace),
    ("endsession", handle_end_session),
    ("erase", handle_erase),
    ("insertafter", handle_insert_after),
    ("insertbefore", handle_insert_before),
    ("load", handle_load),
    ("prepend", handle_prepend),
    ("update", handle_update),
    ("updateplainwindow", handle_update_plain_window),
    ("writebegin", handle_write_begin),
    ("writeend", handle_write_end),
    ("writemore", handle_write_more),
];

fn ok(req: &RequestMessage, result_value: u64) -> Message {
    Message::new_response(req.request_id.clone(), StatusCode::Ok, result_value, DataType::Void, vec![])
}

fn accepted(req: &RequestMessage) -> Message {
    Message::new_response(req.request_id.clone(), StatusCode::Accepted, 0, DataType::Void, vec![])
}

fn status_response(req: &RequestMessage, status: StatusCode) -> Message {
    Message::new_response(req.request_id.clone(), status, 0, DataType::Void, vec![])
}

fn error_response(req: &RequestMessage, err: impl Into<ServerError>) -> Message {
    let status = err.into().to_error_code().to_status();
    status_response(req, status)
}

fn parse_ejson(req: &RequestMessage) -> Option<Value> {
    if req.data.is_empty() {
        return Some(Value::Object(Default::default()));
    }
    serde_json::from_slice(&req.data).ok()
}

fn str_field<'a>(obj: &'a Value, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

/// Entry point: route `req` to `startSession` directly, otherwise enforce
/// the `AUTHING`-forbidden rule and fall through to the sorted table.
pub fn dispatch(ctx: &mut DispatchContext<'_>, req: &RequestMessage) -> Message {
    if req.operation.eq_ignore_ascii_case("startSession") {
        return handle_start_session(ctx, req);
    }

    let authing = ctx
        .registry
        .get(crate::endpoint::EndpointId(ctx.endpoint_id))
        .map(|ep| ep.status == EndpointStatus::Authing)
        .unwrap_or(true);
    if authing {
        return status_response(req, StatusCode::Forbidden);
    }

    let key = req.operation.to_ascii_lowercase();
    match OPERATIONS.binary_search_by(|(name, _)| name.cmp(&key.as_str())) {
        Ok(idx) => (OPERATIONS[idx].1)(ctx, req),
        Err(_) => status_response(req, StatusCode::BadRequest),
    }
}

fn handle_start_session(ctx: &mut DispatchContext<'_>, req: &RequestMessage) -> Message {
    let Some(obj) = parse_ejson(req) else {
        return status_response(req, StatusCode::NotAcceptable);
    };
    let protocol_name = str_field(&obj, "protocolName").unwrap_or_default();
    let protocol_version = obj.get("protocolVersion").and_then(Value::as_u64).unwrap_or(0);
    let host_name = str_field(&obj, "hostName").unwrap_or_default();
    let app_name = str_field(&obj, "appName").unwrap_or_default();
    let runner_name = str_field(&obj, "runnerName").unwrap_or_default();

    if protocol_name != PROTOCOL_NAME || protocol_version > PROTOCOL_VERSION as u64 {
        return status_response(req, StatusCode::BadRequest);
    }
    if protocol_version < PROTOCOL_MIN_VERSION as u64 {
        return status_response(req, StatusCode::UpgradeRequired);
    }

    let effective_host = if ctx.transport_kind == TransportKind::Unix { "localhost" } else { host_name };
    let name = match EndpointName::assemble(effective_host, app_name, runner_name) {
        Ok(n) => n,
        Err(_) => return status_response(req, StatusCode::NotAcceptable),
    };

    if ctx.registry.by_name(&name).is_some() {
        return status_response(req, StatusCode::Conflict);
    }

    let endpoint_id = crate::endpoint::EndpointId(ctx.endpoint_id);
    if let Err(e) = ctx.registry.make_ready(endpoint_id, name, ctx.now) {
        return match e {
            RegistryError::Duplicated(_) => status_response(req, StatusCode::Conflict),
            RegistryError::NotDangling => status_response(req, StatusCode::Forbidden),
        };
    }

    let session_handle = ctx.endpoint_id;
    ctx.sessions.insert(ctx.endpoint_id, SessionInfo::new(session_handle));
    ok(req, session_handle)
}

fn session_of<'a>(ctx: &'a mut DispatchContext<'_>) -> Option<&'a mut SessionInfo> {
    ctx.sessions.get_mut(&ctx.endpoint_id)
}

fn handle_end_session(ctx: &mut DispatchContext<'_>, req: &RequestMessage) -> Message {
    match ctx.sessions.remove(&ctx.endpoint_id) {
        Some(_) => ok(req, 0),
        None => status_response(req, StatusCode::Forbidden),
    }
}

fn handle_create_plain_window(ctx: &mut DispatchContext<'_>, req: &RequestMessage) -> Message {
    let Some(obj) = parse_ejson(req) else {
        return status_response(req, StatusCode::BadRequest);
    };
    let name = str_field(&obj, "name").unwrap_or_default().to_string();
    let title = str_field(&obj, "title").unwrap_or_default().to_string();
    let Some(session) = session_of(ctx) else {
        return error_response(req, ErrorCode::ServerError);
    };
    let handle = session.create_window(name, title);
    ok(req, handle)
}

fn handle_update_plain_window(ctx: &mut DispatchContext<'_>, req: &RequestMessage) -> Message {
    let Some(obj) = parse_ejson(req) else {
        return status_response(req, StatusCode::BadRequest);
    };
    let handle = req.target_value;
    let Some(session) = session_of(ctx) else {
        return status_response(req, StatusCode::Forbidden);
    };
    let Some(window) = session.window_mut(handle) else {
        return status_response(req, StatusCode::NotFound);
    };
    if let Some(title) = str_field(&obj, "title") {
        window.title = title.to_string();
    }
    if let Some(name) = str_field(&obj, "name") {
        window.name = name.to_string();
    }
    ok(req, handle)
}

fn resolve_window_handle(req: &RequestMessage) -> Option<u64> {
    if let Some(el) = &req.element {
        if let Ok(v) = u64::from_str_radix(&el.element, 16) {
            return Some(v);
        }
        if let Ok(v) = el.element.parse::<u64>() {
            return Some(v);
        }
    }
    Some(req.target_value)
}

fn handle_destroy_plain_window(ctx: &mut DispatchContext<'_>, req: &RequestMessage) -> Message {
    let Some(handle) = resolve_window_handle(req) else {
        return status_response(req, StatusCode::BadRequest);
    };
    let Some(session) = session_of(ctx) else {
        return status_response(req, StatusCode::Forbidden);
    };
    match session.destroy_window(handle) {
        Some(_) => ok(req, 0),
        None => status_response(req, StatusCode::NotFound),
    }
}

fn handle_load(ctx: &mut DispatchContext<'_>, req: &RequestMessage) -> Message {
    let window = req.target_value;
    let Some(session) = session_of(ctx) else {
        return status_response(req, StatusCode::Forbidden);
    };
    match session.load_document(window, &req.data) {
        Ok(dom) => ok(req, dom),
        Err(e) => error_response(req, e),
    }
}

fn handle_write_begin(ctx: &mut DispatchContext<'_>, req: &RequestMessage) -> Message {
    let window = req.target_value;
    let Some(session) = session_of(ctx) else {
        return status_response(req, StatusCode::Forbidden);
    };
    match session.begin_write(window, &req.data) {
        Ok(()) => accepted(req),
        Err(e) => error_response(req, e),
    }
}

fn handle_write_more(ctx: &mut DispatchContext<'_>, req: &RequestMessage) -> Message {
    let window = req.target_value;
    let Some(session) = session_of(ctx) else {
        return status_response(req, StatusCode::Forbidden);
    };
    match session.append_write(window, &req.data) {
        Ok(()) => accepted(req),
        Err(e) => error_response(req, e),
    }
}

fn handle_write_end(ctx: &mut DispatchContext<'_>, req: &RequestMessage) -> Message {
    let window = req.target_value;
    let Some(session) = session_of(ctx) else {
        return status_response(req, StatusCode::Forbidden);
    };
    match session.end_write(window, &req.data) {
        Ok(dom) => ok(req, dom),
        Err(e) => error_response(req, e),
    }
}

/// Shared body for `update` and the mutation family: resolve the target
/// element by handle within the document named by `target`, build the
/// `MutationOp` the operation name implies, and apply it.
fn apply_mutation_request(
    ctx: &mut DispatchContext<'_>,
    req: &RequestMessage,
    build: impl FnOnce(&'_ RequestMessage) -> Option<purcrdr_dom::MutationOp<'_>>,
) -> Message {
    if req.target != Target::Dom {
        return status_response(req, StatusCode::BadRequest);
    }
    let Some(el) = &req.element else {
        return status_response(req, StatusCode::BadRequest);
    };
    let Ok(element_handle) = u64::from_str_radix(&el.element, 16) else {
        return status_response(req, StatusCode::BadRequest);
    };
    let Some(op) = build(req) else {
        return status_response(req, StatusCode::BadRequest);
    };
    let Some(session) = session_of(ctx) else {
        return status_response(req, StatusCode::Forbidden);
    };
    match session.apply_mutation(req.target_value, element_handle, op) {
        Ok(()) => ok(req, 0),
        Err(e) => error_response(req, e),
    }
}

fn handle_update(ctx: &mut DispatchContext<'_>, req: &RequestMessage) -> Message {
    apply_mutation_request(ctx, req, |r| {
        let property = r.property.as_deref()?;
        Some(purcrdr_dom::MutationOp::Update { property, data: &r.data })
    })
}

fn handle_displace(ctx: &mut DispatchContext<'_>, req: &RequestMessage) -> Message {
    apply_mutation_request(ctx, req, |r| Some(purcrdr_dom::MutationOp::Displace { markup: &r.data }))
}

fn handle_append(ctx: &mut DispatchContext<'_>, req: &RequestMessage) -> Message {
    apply_mutation_request(ctx, req, |r| Some(purcrdr_dom::MutationOp::Append { markup: &r.data }))
}

fn handle_prepend(ctx: &mut DispatchContext<'_>, req: &RequestMessage) -> Message {
    apply_mutation_request(ctx, req, |r| Some(purcrdr_dom::MutationOp::Prepend { markup: &r.data }))
}

fn handle_insert_before(ctx: &mut DispatchContext<'_>, req: &RequestMessage) -> Message {
    apply_mutation_request(ctx, req, |r| Some(purcrdr_dom::MutationOp::InsertBefore { markup: &r.data }))
}

fn handle_insert_after(ctx: &mut DispatchContext<'_>, req: &RequestMessage) -> Message {
    apply_mutation_request(ctx, req, |r| Some(purcrdr_dom::MutationOp::InsertAfter { markup: &r.data }))
}

fn handle_clear(ctx: &mut DispatchContext<'_>, req: &RequestMessage) -> Message {
    apply_mutation_request(ctx, req, |_| Some(purcrdr_dom::MutationOp::Clear))
}

fn handle_erase(ctx: &mut DispatchContext<'_>, req: &RequestMessage) -> Message {
    apply_mutation_request(ctx, req, |_| Some(purcrdr_dom::MutationOp::Erase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointId;
    use crate::registry::Registry;
    use purcrdr_protocol::ElementLocator;

    fn request(op: &str, target: Target, target_value: u64, data: Vec<u8>) -> RequestMessage {
        RequestMessage {
            target,
            target_value,
            operation: op.to_string(),
            element: None,
            property: None,
            request_id: "R1".to_string(),
            data_type: DataType::Ejson,
            data,
        }
    }

    fn fresh_ctx(registry: &mut Registry, sessions: &mut HashMap<u64, SessionInfo>) -> (DispatchContext<'_>, u64) {
        let now = Instant::now();
        let id = registry.new_endpoint(TransportKind::Unix, now);
        (
            DispatchContext { registry, sessions, endpoint_id: id.0, transport_kind: TransportKind::Unix, now },
            id.0,
        )
    }

    #[test]
    fn non_start_session_from_authing_is_forbidden() {
        let mut registry = Registry::new();
        let mut sessions = HashMap::new();
        let (mut ctx, _id) = fresh_ctx(&mut registry, &mut sessions);
        let req = request("endSession", Target::Session, 0, vec![]);
        let resp = dispatch(&mut ctx, &req);
        match resp {
            Message::Response(r) => assert_eq!(r.ret_code, StatusCode::Forbidden.code()),
            _ => panic!("expected response"),
        }
    }

    #[test]
    fn start_session_then_create_window_then_load() {
        let mut registry = Registry::new();
        let mut sessions = HashMap::new();
        let (mut ctx, id) = fresh_ctx(&mut registry, &mut sessions);

        let start = request(
            "startSession",
            Target::Workspace,
            0,
            br#"{"protocolName":"PURCMC","protocolVersion":100,"hostName":"ignored","appName":"cn.fmsoft.test","runnerName":"t1"}"#.to_vec(),
        );
        let resp = dispatch(&mut ctx, &start);
        let Message::Response(r) = resp else { panic!("expected response") };
        assert_eq!(r.ret_code, StatusCode::Ok.code());
        assert_eq!(r.result_value, id);

        let create = request("createPlainWindow", Target::Workspace, 0, br#"{"name":"w0","title":"W0"}"#.to_vec());
        let resp = dispatch(&mut ctx, &create);
        let Message::Response(r) = resp else { panic!("expected response") };
        assert_eq!(r.ret_code, StatusCode::Ok.code());
        let window = r.result_value;

        let mut load = request("load", Target::PlainWindow, window, b"<html><body><div hvml:handle='3'></div></body></html>".to_vec());
        load.data_type = DataType::Text;
        let resp = dispatch(&mut ctx, &load);
        let Message::Response(r) = resp else { panic!("expected response") };
        assert_eq!(r.ret_code, StatusCode::Ok.code());
        let dom = r.result_value;

        let mut update = request("update", Target::Dom, dom, b"hi".to_vec());
        update.element = Some(ElementLocator { element_type: purcrdr_protocol::ElementType::Handle, element: "3".to_string() });
        update.property = Some("textContent".to_string());
        let resp = dispatch(&mut ctx, &update);
        let Message::Response(r) = resp else { panic!("expected response") };
        assert_eq!(r.ret_code, StatusCode::Ok.code());
    }

    #[test]
    fn duplicate_start_session_name_conflicts() {
        let mut registry = Registry::new();
        let mut sessions = HashMap::new();
        let now = Instant::now();
        let id1 = registry.new_endpoint(TransportKind::Unix, now);
        registry
            .make_ready(id1, EndpointName::assemble("localhost", "cn.fmsoft.test", "t1").unwrap(), now)
            .unwrap();

        let id2 = registry.new_endpoint(TransportKind::Unix, now);
        let mut ctx = DispatchContext { registry: &mut registry, sessions: &mut sessions, endpoint_id: id2.0, transport_kind: TransportKind::Unix, now };
        let start = request(
            "startSession",
            Target::Workspace,
            0,
            br#"{"protocolName":"PURCMC","protocolVersion":100,"hostName":"x","appName":"cn.fmsoft.test","runnerName":"t1"}"#.to_vec(),
        );
        let resp = dispatch(&mut ctx, &start);
        let Message::Response(r) = resp else { panic!("expected response") };
        assert_eq!(r.ret_code, StatusCode::Conflict.code());
    }

    #[test]
    fn idempotent_end_session_second_call_forbidden() {
        let mut registry = Registry::new();
        let mut sessions = HashMap::new();
        let (mut ctx, _id) = fresh_ctx(&mut registry, &mut sessions);
        let start = request(
            "startSession",
            Target::Workspace,
            0,
            br#"{"protocolName":"PURCMC","protocolVersion":100,"hostName":"x","appName":"cn.fmsoft.test","runnerName":"t1"}"#.to_vec(),
        );
        dispatch(&mut ctx, &start);
        let end = request("endSession", Target::Session, 0, vec![]);
        let resp1 = dispatch(&mut ctx, &end);
        let resp2 = dispatch(&mut ctx, &end);
        let Message::Response(r1) = resp1 else { panic!() };
        let Message::Response(r2) = resp2 else { panic!() };
        assert_eq!(r1.ret_code, StatusCode::Ok.code());
        assert_eq!(r2.ret_code, StatusCode::Forbidden.code());
    }
}
