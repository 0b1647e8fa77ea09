use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors raised while parsing a raw wire frame into an [`Envelope`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("envelope must be a JSON object")]
    NotAnObject,
    #[error("envelope field `{field}` is missing")]
    MissingField { field: &'static str },
    #[error("envelope field `{field}` has the wrong type")]
    InvalidField { field: &'static str },
    #[error("envelope date `{value}` is not an ISO 8601 timestamp")]
    InvalidDate { value: String },
    #[error("buffer {index} is not valid base64")]
    InvalidBuffer { index: usize },
    #[error("parent header is malformed: {0}")]
    ParentHeader(Box<EnvelopeError>),
}

/// Message header. The parent header of a reply is the header of the
/// request it answers, which is how causation ids travel on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub msg_id: String,
    pub msg_type: String,
    pub username: String,
    pub session: String,
    pub date: DateTime<Utc>,
    pub version: String,
}

impl Header {
    fn from_map(raw: &Map<String, Value>) -> Result<Self, EnvelopeError> {
        let date = required_str(raw, "date")?;
        Ok(Self {
            msg_id: required_str(raw, "msg_id")?.to_string(),
            msg_type: required_str(raw, "msg_type")?.to_string(),
            username: required_str(raw, "username")?.to_string(),
            session: required_str(raw, "session")?.to_string(),
            date: parse_timestamp(date).ok_or_else(|| EnvelopeError::InvalidDate {
                value: date.to_string(),
            })?,
            version: required_str(raw, "version")?.to_string(),
        })
    }

    fn to_value(&self) -> Value {
        serde_json::json!({
            "msg_id": self.msg_id,
            "msg_type": self.msg_type,
            "username": self.username,
            "session": self.session,
            "date": self.date.to_rfc3339(),
            "version": self.version,
        })
    }
}

/// One framed unit of the kernel wire protocol.
///
/// Envelopes are immutable once built; the registry shares them between
/// waiters behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    header: Header,
    parent_header: Option<Header>,
    metadata: Map<String, Value>,
    content: Map<String, Value>,
    buffers: Vec<Vec<u8>>,
}

impl Envelope {
    pub fn new(
        header: Header,
        parent_header: Option<Header>,
        metadata: Map<String, Value>,
        content: Map<String, Value>,
        buffers: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            header,
            parent_header,
            metadata,
            content,
            buffers,
        }
    }

    /// Parse a raw frame.
    ///
    /// A missing, `null` or empty `parent_header` means the message is
    /// unsolicited. `metadata`, `content` and `buffers` default to empty.
    pub fn from_value(raw: Value) -> Result<Self, EnvelopeError> {
        let Value::Object(mut raw) = raw else {
            return Err(EnvelopeError::NotAnObject);
        };

        let header = match raw.remove("header") {
            Some(Value::Object(header)) => Header::from_map(&header)?,
            Some(_) => return Err(EnvelopeError::InvalidField { field: "header" }),
            None => return Err(EnvelopeError::MissingField { field: "header" }),
        };

        let parent_header = match raw.remove("parent_header") {
            None | Some(Value::Null) => None,
            Some(Value::Object(parent)) if parent.is_empty() => None,
            Some(Value::Object(parent)) => Some(
                Header::from_map(&parent).map_err(|error| EnvelopeError::ParentHeader(Box::new(error)))?,
            ),
            Some(_) => {
                return Err(EnvelopeError::InvalidField {
                    field: "parent_header",
                })
            }
        };

        let metadata = take_map(&mut raw, "metadata")?;
        let content = take_map(&mut raw, "content")?;

        let buffers = match raw.remove("buffers") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| decode_buffer(index, &item))
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err(EnvelopeError::InvalidField { field: "buffers" }),
        };

        Ok(Self {
            header,
            parent_header,
            metadata,
            content,
            buffers,
        })
    }

    /// Render back into the wire JSON shape. Buffers become base64 strings.
    pub fn to_value(&self) -> Value {
        let parent_header = self
            .parent_header
            .as_ref()
            .map_or_else(|| Value::Object(Map::new()), Header::to_value);
        let buffers = self
            .buffers
            .iter()
            .map(|buffer| Value::String(BASE64.encode(buffer)))
            .collect::<Vec<_>>();

        serde_json::json!({
            "header": self.header.to_value(),
            "parent_header": parent_header,
            "metadata": self.metadata,
            "content": self.content,
            "buffers": buffers,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn parent_header(&self) -> Option<&Header> {
        self.parent_header.as_ref()
    }

    pub fn msg_id(&self) -> &str {
        &self.header.msg_id
    }

    pub fn msg_type(&self) -> &str {
        &self.header.msg_type
    }

    /// Id of the request this message was sent on behalf of.
    pub fn causation_id(&self) -> Option<&str> {
        self.parent_header
            .as_ref()
            .map(|parent| parent.msg_id.as_str())
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn content(&self) -> &Map<String, Value> {
        &self.content
    }

    pub fn buffers(&self) -> &[Vec<u8>] {
        &self.buffers
    }

    /// String-valued content field, if present.
    pub fn content_str(&self, key: &str) -> Option<&str> {
        self.content.get(key).and_then(Value::as_str)
    }

    /// The `text/plain` rendering under `content.data`, as published with
    /// `execute_result` and `display_data` messages.
    pub fn plain_text(&self) -> Option<&str> {
        self.content
            .get("data")
            .and_then(|data| data.get("text/plain"))
            .and_then(Value::as_str)
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

fn required_str<'a>(raw: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, EnvelopeError> {
    match raw.get(field) {
        Some(Value::String(value)) => Ok(value),
        Some(_) => Err(EnvelopeError::InvalidField { field }),
        None => Err(EnvelopeError::MissingField { field }),
    }
}

fn take_map(raw: &mut Map<String, Value>, field: &'static str) -> Result<Map<String, Value>, EnvelopeError> {
    match raw.remove(field) {
        None | Some(Value::Null) => Ok(Map::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(EnvelopeError::InvalidField { field }),
    }
}

fn decode_buffer(index: usize, item: &Value) -> Result<Vec<u8>, EnvelopeError> {
    item.as_str()
        .and_then(|encoded| BASE64.decode(encoded).ok())
        .ok_or(EnvelopeError::InvalidBuffer { index })
}

/// Kernels emit RFC 3339 timestamps, but older sessions write naive ISO
/// 8601 dates. Those are taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
