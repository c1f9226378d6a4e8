//! The header-block message format: requests, responses, and events carried
//! as the text payload of a packet.

use std::fmt;

use purcrdr_ids::generate_unique_id;
use thiserror::Error;

use crate::error::StatusCode;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),
    #[error("unknown header key: {0}")]
    UnknownKey(String),
    #[error("missing mandatory field {0}")]
    MissingField(&'static str),
    #[error("no header/body separator found")]
    NoSeparator,
    #[error("dataLen {declared} does not match body length {actual}")]
    DataLenMismatch { declared: usize, actual: usize },
    #[error("invalid target: {0:?}")]
    InvalidTarget(String),
    #[error("invalid elementType: {0:?}")]
    InvalidElementType(String),
    #[error("invalid dataType: {0:?}")]
    InvalidDataType(String),
    #[error("invalid hex handle: {0:?}")]
    InvalidHandle(String),
    #[error("invalid result field: {0:?}")]
    InvalidResult(String),
    #[error("non-UTF8 payload")]
    NotUtf8,
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Session,
    Window,
    Tab,
    Dom,
    Workspace,
    PlainWindow,
    Page,
}

impl Target {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            Target::Session => "session",
            Target::Window => "window",
            Target::Tab => "tab",
            Target::Dom => "dom",
            Target::Workspace => "workspace",
            Target::PlainWindow => "plainWindow",
            Target::Page => "page",
        }
    }
}

impl std::str::FromStr for Target {
    type Err = ProtocolError;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "session" => Target::Session,
            "window" => Target::Window,
            "tab" => Target::Tab,
            "dom" => Target::Dom,
            "workspace" => Target::Workspace,
            "plainwindow" => Target::PlainWindow,
            "page" => Target::Page,
            _ => return Err(ProtocolError::InvalidTarget(s.to_string())),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Void,
    Css,
    Xpath,
    Handle,
}

impl ElementType {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            ElementType::Void => "void",
            ElementType::Css => "css",
            ElementType::Xpath => "xpath",
            ElementType::Handle => "handle",
        }
    }
}

impl std::str::FromStr for ElementType {
    type Err = ProtocolError;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "void" => ElementType::Void,
            "css" => ElementType::Css,
            "xpath" => ElementType::Xpath,
            "handle" => ElementType::Handle,
            _ => return Err(ProtocolError::InvalidElementType(s.to_string())),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Void,
    Ejson,
    Text,
}

impl DataType {
    pub fn as_wire_str(self) -> &'static str {
        match self {
            DataType::Void => "void",
            DataType::Ejson => "ejson",
            DataType::Text => "text",
        }
    }
}

impl std::str::FromStr for DataType {
    type Err = ProtocolError;
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "void" => DataType::Void,
            "ejson" => DataType::Ejson,
            "text" => DataType::Text,
            _ => return Err(ProtocolError::InvalidDataType(s.to_string())),
        })
    }
}

/// An element locator: an `elementType` tag plus its free-form identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementLocator {
    pub element_type: ElementType,
    pub element: String,
}

fn parse_hex_handle(s: &str) -> Result<u64> {
    u64::from_str_radix(s, 16).map_err(|_| ProtocolError::InvalidHandle(s.to_string()))
}

fn format_hex_handle(v: u64) -> String {
    format!("{v:x}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMessage {
    pub target: Target,
    pub target_value: u64,
    pub operation: String,
    pub element: Option<ElementLocator>,
    pub property: Option<String>,
    pub request_id: String,
    pub data_type: DataType,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMessage {
    pub request_id: String,
    pub ret_code: u16,
    pub result_value: u64,
    pub data_type: DataType,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMessage {
    pub target: Target,
    pub target_value: u64,
    pub event: String,
    pub element: Option<ElementLocator>,
    pub property: Option<String>,
    pub data_type: DataType,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Request(RequestMessage),
    Response(ResponseMessage),
    Event(EventMessage),
}

impl Message {
    /// Build a request, auto-generating a `requestId` if none is supplied.
    pub fn new_request(
        target: Target,
        target_value: u64,
        operation: impl Into<String>,
        element: Option<ElementLocator>,
        property: Option<String>,
        request_id: Option<String>,
        data_type: DataType,
        data: Vec<u8>,
    ) -> Self {
        Message::Request(RequestMessage {
            target,
            target_value,
            operation: operation.into(),
            element,
            property,
            request_id: request_id.unwrap_or_else(|| generate_unique_id("REQU")),
            data_type,
            data,
        })
    }

    pub fn new_response(
        request_id: impl Into<String>,
        ret_code: StatusCode,
        result_value: u64,
        data_type: DataType,
        data: Vec<u8>,
    ) -> Self {
        Message::Response(ResponseMessage {
            request_id: request_id.into(),
            ret_code: ret_code.code(),
            result_value,
            data_type,
            data,
        })
    }

    pub fn new_event(
        target: Target,
        target_value: u64,
        event: impl Into<String>,
        element: Option<ElementLocator>,
        property: Option<String>,
        data_type: DataType,
        data: Vec<u8>,
    ) -> Self {
        Message::Event(EventMessage {
            target,
            target_value,
            event: event.into(),
            element,
            property,
            data_type,
            data,
        })
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.request_id),
            Message::Response(r) => Some(&r.request_id),
            Message::Event(_) => None,
        }
    }
}

/// Serialize a message into the header-block wire format: headers, a blank
/// line, then the raw body.
pub fn serialize(msg: &Message) -> Vec<u8> {
    let mut out = String::new();
    match msg {
        Message::Request(r) => {
            out.push_str("type: request\n");
            out.push_str(&format!(
                "target: {}/{}\n",
                r.target.as_wire_str(),
                format_hex_handle(r.target_value)
            ));
            out.push_str(&format!("operation: {}\n", r.operation));
            if let Some(el) = &r.element {
                out.push_str(&format!(
                    "element: {}/{}\n",
                    el.element_type.as_wire_str(),
                    el.element
                ));
            }
            if let Some(p) = &r.property {
                out.push_str(&format!("property: {p}\n"));
            }
            out.push_str(&format!("requestId: {}\n", r.request_id));
            out.push_str(&format!("dataType: {}\n", r.data_type.as_wire_str()));
            out.push_str(&format!("dataLen: {}\n", r.data.len()));
            out.push_str(" \n");
            let mut bytes = out.into_bytes();
            bytes.extend_from_slice(&r.data);
            return bytes;
        }
        Message::Response(r) => {
            out.push_str("type: response\n");
            out.push_str(&format!("requestId: {}\n", r.request_id));
            out.push_str(&format!(
                "result: {}/{}\n",
                r.ret_code,
                format_hex_handle(r.result_value)
            ));
            out.push_str(&format!("dataType: {}\n", r.data_type.as_wire_str()));
            out.push_str(&format!("dataLen: {}\n", r.data.len()));
            out.push_str(" \n");
            let mut bytes = out.into_bytes();
            bytes.extend_from_slice(&r.data);
            return bytes;
        }
        Message::Event(e) => {
            out.push_str("type: event\n");
            out.push_str(&format!(
                "target: {}/{}\n",
                e.target.as_wire_str(),
                format_hex_handle(e.target_value)
            ));
            out.push_str(&format!("event: {}\n", e.event));
            if let Some(el) = &e.element {
                out.push_str(&format!(
                    "element: {}/{}\n",
                    el.element_type.as_wire_str(),
                    el.element
                ));
            }
            if let Some(p) = &e.property {
                out.push_str(&format!("property: {p}\n"));
            }
            out.push_str(&format!("dataType: {}\n", e.data_type.as_wire_str()));
            out.push_str(&format!("dataLen: {}\n", e.data.len()));
            out.push_str(" \n");
            let mut bytes = out.into_bytes();
            bytes.extend_from_slice(&e.data);
            return bytes;
        }
    }
}

struct RawHeaders {
    type_: Option<String>,
    target: Option<String>,
    operation: Option<String>,
    event: Option<String>,
    element: Option<String>,
    property: Option<String>,
    request_id: Option<String>,
    result: Option<String>,
    data_type: Option<String>,
    data_len: Option<usize>,
}

impl RawHeaders {
    fn empty() -> Self {
        Self {
            type_: None,
            target: None,
            operation: None,
            event: None,
            element: None,
            property: None,
            request_id: None,
            result: None,
            data_type: None,
            data_len: None,
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key.to_ascii_lowercase().as_str() {
            "type" => self.type_ = Some(value.to_string()),
            "target" => self.target = Some(value.to_string()),
            "operation" => self.operation = Some(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "element" => self.element = Some(value.to_string()),
            "property" => self.property = Some(value.to_string()),
            "requestid" => self.request_id = Some(value.to_string()),
            "result" => self.result = Some(value.to_string()),
            "datatype" => self.data_type = Some(value.to_string()),
            "datalen" => {
                self.data_len = Some(
                    value
                        .trim()
                        .parse()
                        .map_err(|_| ProtocolError::MalformedHeader(format!("dataLen: {value}")))?,
                )
            }
            other => return Err(ProtocolError::UnknownKey(other.to_string())),
        }
        Ok(())
    }
}

fn parse_target(raw: &str) -> Result<(Target, u64)> {
    let (name, handle) = raw
        .split_once('/')
        .ok_or_else(|| ProtocolError::InvalidTarget(raw.to_string()))?;
    let target: Target = name.parse()?;
    let handle = if matches!(target, Target::Session | Target::Workspace) {
        0
    } else {
        parse_hex_handle(handle)?
    };
    Ok((target, handle))
}

fn parse_element(raw: &str) -> Result<ElementLocator> {
    let (ty, value) = raw
        .split_once('/')
        .ok_or_else(|| ProtocolError::InvalidElementType(raw.to_string()))?;
    Ok(ElementLocator {
        element_type: ty.parse()?,
        element: value.to_string(),
    })
}

fn parse_result(raw: &str) -> Result<(u16, u64)> {
    let (code, handle) = raw
        .split_once('/')
        .ok_or_else(|| ProtocolError::InvalidResult(raw.to_string()))?;
    let code: u16 = code
        .parse()
        .map_err(|_| ProtocolError::InvalidResult(raw.to_string()))?;
    let handle = parse_hex_handle(handle)?;
    Ok((code, handle))
}

/// Parse one packet's text payload into a [`Message`].
pub fn parse(payload: &[u8]) -> Result<Message> {
    let text = std::str::from_utf8(payload).map_err(|_| ProtocolError::NotUtf8)?;
    let text = text.trim_end_matches('\0');

    let mut headers = RawHeaders::empty();
    let mut body_start = None;
    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        if line.trim().is_empty() {
            body_start = Some(offset + line.len());
            break;
        }
        let stripped = line.strip_suffix('\n').unwrap_or(line);
        let (key, value) = stripped
            .split_once(':')
            .ok_or_else(|| ProtocolError::MalformedHeader(stripped.to_string()))?;
        headers.set(key.trim(), value.trim())?;
        offset += line.len();
    }
    let body_start = body_start.ok_or(ProtocolError::NoSeparator)?;
    let data_len = headers.data_len.ok_or(ProtocolError::MissingField("dataLen"))?;
    let body_bytes = text.as_bytes();
    if body_start + data_len > body_bytes.len() {
        return Err(ProtocolError::DataLenMismatch {
            declared: data_len,
            actual: body_bytes.len().saturating_sub(body_start),
        });
    }
    let body = body_bytes[body_start..body_start + data_len].to_vec();
    if body_start + data_len != body_bytes.len() {
        return Err(ProtocolError::DataLenMismatch {
            declared: data_len,
            actual: body_bytes.len() - body_start,
        });
    }

    let data_type = headers
        .data_type
        .as_deref()
        .unwrap_or("void")
        .parse::<DataType>()
        .unwrap_or(DataType::Void);

    match headers.type_.as_deref() {
        Some(t) if t.eq_ignore_ascii_case("request") => {
            let (target, target_value) = parse_target(
                headers.target.as_deref().ok_or(ProtocolError::MissingField("target"))?,
            )?;
            let operation = headers
                .operation
                .ok_or(ProtocolError::MissingField("operation"))?;
            let element = headers.element.as_deref().map(parse_element).transpose()?;
            let request_id = headers
                .request_id
                .ok_or(ProtocolError::MissingField("requestId"))?;
            Ok(Message::Request(RequestMessage {
                target,
                target_value,
                operation,
                element,
                property: headers.property,
                request_id,
                data_type,
                data: body,
            }))
        }
        Some(t) if t.eq_ignore_ascii_case("response") => {
            let request_id = headers
                .request_id
                .ok_or(ProtocolError::MissingField("requestId"))?;
            let (ret_code, result_value) = parse_result(
                headers.result.as_deref().ok_or(ProtocolError::MissingField("result"))?,
            )?;
            Ok(Message::Response(ResponseMessage {
                request_id,
                ret_code,
                result_value,
                data_type,
                data: body,
            }))
        }
        Some(t) if t.eq_ignore_ascii_case("event") => {
            let (target, target_value) = parse_target(
                headers.target.as_deref().ok_or(ProtocolError::MissingField("target"))?,
            )?;
            let event = headers.event.ok_or(ProtocolError::MissingField("event"))?;
            let element = headers.element.as_deref().map(parse_element).transpose()?;
            Ok(Message::Event(EventMessage {
                target,
                target_value,
                event,
                element,
                property: headers.property,
                data_type,
                data: body,
            }))
        }
        Some(other) => Err(ProtocolError::MalformedHeader(format!("type: {other}"))),
        None => Err(ProtocolError::MissingField("type")),
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Request(r) => write!(f, "Request({} {})", r.operation, r.request_id),
            Message::Response(r) => write!(f, "Response({} -> {})", r.request_id, r.ret_code),
            Message::Event(e) => write!(f, "Event({})", e.event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn request_round_trips() {
        let msg = Message::new_request(
            Target::Workspace,
            0,
            "createPlainWindow",
            None,
            None,
            Some("REQ1".to_string()),
            DataType::Ejson,
            br#"{"name":"w0"}"#.to_vec(),
        );
        let wire = serialize(&msg);
        let parsed = parse(&wire).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn response_round_trips() {
        let msg = Message::new_response("REQ1", StatusCode::Ok, 0xdead, DataType::Void, vec![]);
        let wire = serialize(&msg);
        let parsed = parse(&wire).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn event_round_trips_with_element_and_property() {
        let msg = Message::new_event(
            Target::Dom,
            3,
            "change",
            Some(ElementLocator {
                element_type: ElementType::Handle,
                element: "3".to_string(),
            }),
            Some("textContent".to_string()),
            DataType::Text,
            b"hi".to_vec(),
        );
        let wire = serialize(&msg);
        let parsed = parse(&wire).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn data_len_mismatch_rejected() {
        let msg = Message::new_response("REQ1", StatusCode::Ok, 0, DataType::Text, b"hi".to_vec());
        let mut wire = serialize(&msg);
        // Corrupt dataLen to be larger than the actual body.
        let text = String::from_utf8(wire.clone()).unwrap();
        let corrupted = text.replace("dataLen: 2", "dataLen: 10");
        wire = corrupted.into_bytes();
        assert!(matches!(parse(&wire), Err(ProtocolError::DataLenMismatch { .. })));
    }

    #[test]
    fn unknown_header_key_rejected() {
        let raw = b"type: request\nbogusHeader: x\nrequestId: R\ndataType: void\ndataLen: 0\n \n";
        assert!(matches!(parse(raw), Err(ProtocolError::UnknownKey(_))));
    }

    #[test]
    fn session_and_workspace_targets_force_zero_handle() {
        let raw = b"type: request\ntarget: session/ffff\noperation: endSession\nrequestId: R\ndataType: void\ndataLen: 0\n \n";
        match parse(raw).unwrap() {
            Message::Request(r) => {
                assert_eq!(r.target, Target::Session);
                assert_eq!(r.target_value, 0);
            }
            _ => panic!("expected request"),
        }
    }

    proptest::proptest! {
        #[test]
        fn response_round_trip_prop(code in 100u16..600, value in any::<u64>(), body in "[ -~]{0,64}") {
            let msg = Message::new_response("R", StatusCode::from_code(code).unwrap_or(StatusCode::InternalServerError), value, DataType::Text, body.into_bytes());
            let wire = serialize(&msg);
            let parsed = parse(&wire).unwrap();
            prop_assert_eq!(parsed, msg);
        }
    }
}
