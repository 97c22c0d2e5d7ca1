//! Message types and their tagged binary bodies.
//!
//! Every frame payload is one tag byte followed by a kind-specific body.
//! Requests and responses use separate tag tables:
//!
//! ```text
//! request:  0 Get  1 Put  2 Delete  3 Batch  4 Iterator  5 Subscribe  6 Unsubscribe
//! response: 0 Callback  1 IteratorData
//! ```

use crate::error::ProtocolError;
use crate::wire::{self, BodyReader};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;

/// Tags of the request channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestKind {
    Get = 0,
    Put = 1,
    Delete = 2,
    Batch = 3,
    Iterator = 4,
    Subscribe = 5,
    Unsubscribe = 6,
}

impl TryFrom<u8> for RequestKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RequestKind::Get),
            1 => Ok(RequestKind::Put),
            2 => Ok(RequestKind::Delete),
            3 => Ok(RequestKind::Batch),
            4 => Ok(RequestKind::Iterator),
            5 => Ok(RequestKind::Subscribe),
            6 => Ok(RequestKind::Unsubscribe),
            _ => Err(ProtocolError::UnknownTag(value)),
        }
    }
}

impl RequestKind {
    /// Returns whether requests of this kind modify the store.
    pub fn is_mutation(&self) -> bool {
        matches!(self, RequestKind::Put | RequestKind::Delete | RequestKind::Batch)
    }
}

/// Tags of the response channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResponseKind {
    Callback = 0,
    IteratorData = 1,
}

impl TryFrom<u8> for ResponseKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ResponseKind::Callback),
            1 => Ok(ResponseKind::IteratorData),
            _ => Err(ProtocolError::UnknownTag(value)),
        }
    }
}

/// A single operation inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Bytes, value: Bytes },
    Del { key: Bytes },
}

impl BatchOp {
    const PUT: u8 = 0;
    const DEL: u8 = 1;

    pub fn put(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        BatchOp::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn del(key: impl Into<Bytes>) -> Self {
        BatchOp::Del { key: key.into() }
    }

    pub fn key(&self) -> &Bytes {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Del { key } => key,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            BatchOp::Put { key, value } => {
                buf.put_u8(Self::PUT);
                wire::put_bytes(buf, key);
                wire::put_opt_bytes(buf, Some(value.as_ref()));
            }
            BatchOp::Del { key } => {
                buf.put_u8(Self::DEL);
                wire::put_bytes(buf, key);
                wire::put_opt_bytes(buf, None);
            }
        }
    }

    fn decode(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        let op_type = r.u8()?;
        let key = r.bytes()?;
        let value = r.opt_bytes()?;
        match op_type {
            Self::PUT => Ok(BatchOp::Put {
                key,
                value: value.ok_or(ProtocolError::MissingValue)?,
            }),
            // A value on a del is meaningless and ignored.
            Self::DEL => Ok(BatchOp::Del { key }),
            other => Err(ProtocolError::UnknownOpType(other)),
        }
    }
}

/// Range and shape of a store iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IteratorOptions {
    pub gt: Option<Bytes>,
    pub gte: Option<Bytes>,
    pub lt: Option<Bytes>,
    pub lte: Option<Bytes>,
    /// Maximum number of entries; `None` means unbounded.
    pub limit: Option<u64>,
    pub reverse: bool,
    /// Include keys in yielded entries.
    pub keys: bool,
    /// Include values in yielded entries.
    pub values: bool,
}

impl Default for IteratorOptions {
    fn default() -> Self {
        Self {
            gt: None,
            gte: None,
            lt: None,
            lte: None,
            limit: None,
            reverse: false,
            keys: true,
            values: true,
        }
    }
}

impl IteratorOptions {
    const GT: u8 = 1 << 0;
    const GTE: u8 = 1 << 1;
    const LT: u8 = 1 << 2;
    const LTE: u8 = 1 << 3;
    const LIMIT: u8 = 1 << 4;
    const REVERSE: u8 = 1 << 5;
    const KEYS: u8 = 1 << 6;
    const VALUES: u8 = 1 << 7;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gt(mut self, key: impl Into<Bytes>) -> Self {
        self.gt = Some(key.into());
        self
    }

    pub fn with_gte(mut self, key: impl Into<Bytes>) -> Self {
        self.gte = Some(key.into());
        self
    }

    pub fn with_lt(mut self, key: impl Into<Bytes>) -> Self {
        self.lt = Some(key.into());
        self
    }

    pub fn with_lte(mut self, key: impl Into<Bytes>) -> Self {
        self.lte = Some(key.into());
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn with_keys(mut self, keys: bool) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_values(mut self, values: bool) -> Self {
        self.values = values;
        self
    }

    fn encode(&self, buf: &mut BytesMut) {
        let mut flags = 0u8;
        let bounds = [
            (Self::GT, &self.gt),
            (Self::GTE, &self.gte),
            (Self::LT, &self.lt),
            (Self::LTE, &self.lte),
        ];
        for (bit, bound) in &bounds {
            if bound.is_some() {
                flags |= bit;
            }
        }
        if self.limit.is_some() {
            flags |= Self::LIMIT;
        }
        if self.reverse {
            flags |= Self::REVERSE;
        }
        if self.keys {
            flags |= Self::KEYS;
        }
        if self.values {
            flags |= Self::VALUES;
        }

        buf.put_u8(flags);
        for (_, bound) in &bounds {
            if let Some(key) = bound {
                wire::put_bytes(buf, key);
            }
        }
        if let Some(limit) = self.limit {
            wire::put_uint(buf, limit);
        }
    }

    fn decode(r: &mut BodyReader) -> Result<Self, ProtocolError> {
        let flags = r.u8()?;
        let mut bound = |bit: u8| -> Result<Option<Bytes>, ProtocolError> {
            if flags & bit != 0 {
                r.bytes().map(Some)
            } else {
                Ok(None)
            }
        };
        let gt = bound(Self::GT)?;
        let gte = bound(Self::GTE)?;
        let lt = bound(Self::LT)?;
        let lte = bound(Self::LTE)?;
        let limit = if flags & Self::LIMIT != 0 {
            Some(r.uint()?)
        } else {
            None
        };

        Ok(Self {
            gt,
            gte,
            lt,
            lte,
            limit,
            reverse: flags & Self::REVERSE != 0,
            keys: flags & Self::KEYS != 0,
            values: flags & Self::VALUES != 0,
        })
    }
}

/// Store change kinds a connection can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Put,
    Del,
    Batch,
}

impl EventKind {
    /// Every kind, in replay order.
    pub const ALL: [EventKind; 3] = [EventKind::Put, EventKind::Del, EventKind::Batch];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Put => "put",
            EventKind::Del => "del",
            EventKind::Batch => "batch",
        }
    }

    /// The request tag that self-describes this event's push payload.
    pub fn tag(&self) -> RequestKind {
        match self {
            EventKind::Put => RequestKind::Put,
            EventKind::Del => RequestKind::Delete,
            EventKind::Batch => RequestKind::Batch,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "put" => Ok(EventKind::Put),
            "del" => Ok(EventKind::Del),
            "batch" => Ok(EventKind::Batch),
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}

/// Client to server message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Get {
        id: u64,
        key: Bytes,
    },
    Put {
        id: u64,
        key: Bytes,
        value: Bytes,
    },
    Delete {
        id: u64,
        key: Bytes,
    },
    Batch {
        id: u64,
        ops: Vec<BatchOp>,
    },
    /// Opens, tops up, or closes (`batch == 0`) the iterator with handle `id`.
    Iterator {
        id: u64,
        options: IteratorOptions,
        batch: u64,
    },
    Subscribe {
        id: u64,
        event: EventKind,
    },
    Unsubscribe {
        id: u64,
        handler: u64,
    },
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Get { .. } => RequestKind::Get,
            Request::Put { .. } => RequestKind::Put,
            Request::Delete { .. } => RequestKind::Delete,
            Request::Batch { .. } => RequestKind::Batch,
            Request::Iterator { .. } => RequestKind::Iterator,
            Request::Subscribe { .. } => RequestKind::Subscribe,
            Request::Unsubscribe { .. } => RequestKind::Unsubscribe,
        }
    }

    /// Correlation id, or the iterator handle for `Iterator` requests.
    pub fn id(&self) -> u64 {
        match self {
            Request::Get { id, .. }
            | Request::Put { id, .. }
            | Request::Delete { id, .. }
            | Request::Batch { id, .. }
            | Request::Iterator { id, .. }
            | Request::Subscribe { id, .. }
            | Request::Unsubscribe { id, .. } => *id,
        }
    }

    /// Encodes the tag byte and body.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.size_hint());
        buf.put_u8(self.kind() as u8);
        wire::put_uint(&mut buf, self.id());
        match self {
            Request::Get { key, .. } | Request::Delete { key, .. } => {
                wire::put_bytes(&mut buf, key);
            }
            Request::Put { key, value, .. } => {
                wire::put_bytes(&mut buf, key);
                wire::put_bytes(&mut buf, value);
            }
            Request::Batch { ops, .. } => {
                wire::put_uint(&mut buf, ops.len() as u64);
                for op in ops {
                    op.encode(&mut buf);
                }
            }
            Request::Iterator { options, batch, .. } => {
                options.encode(&mut buf);
                wire::put_uint(&mut buf, *batch);
            }
            Request::Subscribe { event, .. } => {
                wire::put_bytes(&mut buf, event.as_str().as_bytes());
            }
            Request::Unsubscribe { handler, .. } => {
                wire::put_uint(&mut buf, *handler);
            }
        }
        buf
    }

    /// Decodes a whole frame payload.
    pub fn decode(payload: Bytes) -> Result<Self, ProtocolError> {
        let (tag, mut r) = split_tag(payload)?;
        let kind = RequestKind::try_from(tag)?;
        let id = r.uint()?;
        let request = match kind {
            RequestKind::Get => Request::Get { id, key: r.bytes()? },
            RequestKind::Put => Request::Put {
                id,
                key: r.bytes()?,
                value: r.bytes()?,
            },
            RequestKind::Delete => Request::Delete { id, key: r.bytes()? },
            RequestKind::Batch => {
                let count = r.uint()?;
                // Each op needs at least three bytes; cap the preallocation
                // so a bogus count cannot force a huge allocation.
                let mut ops = Vec::with_capacity(count.min(1024) as usize);
                for _ in 0..count {
                    ops.push(BatchOp::decode(&mut r)?);
                }
                Request::Batch { id, ops }
            }
            RequestKind::Iterator => Request::Iterator {
                id,
                options: IteratorOptions::decode(&mut r)?,
                batch: r.uint()?,
            },
            RequestKind::Subscribe => Request::Subscribe {
                id,
                event: r.string()?.parse()?,
            },
            RequestKind::Unsubscribe => Request::Unsubscribe {
                id,
                handler: r.uint()?,
            },
        };
        r.finish()?;
        Ok(request)
    }

    fn size_hint(&self) -> usize {
        let body = match self {
            Request::Get { key, .. } | Request::Delete { key, .. } => key.len(),
            Request::Put { key, value, .. } => key.len() + value.len(),
            Request::Batch { ops, .. } => ops
                .iter()
                .map(|op| match op {
                    BatchOp::Put { key, value } => key.len() + value.len() + 8,
                    BatchOp::Del { key } => key.len() + 8,
                })
                .sum(),
            _ => 16,
        };
        1 + wire::MAX_VARINT_LEN * 2 + body
    }
}

/// Answer to a request, or a subscription push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Callback {
    pub id: u64,
    pub error: Option<String>,
    pub value: Option<Bytes>,
}

impl Callback {
    pub fn ok(id: u64, value: Option<Bytes>) -> Self {
        Self {
            id,
            error: None,
            value,
        }
    }

    pub fn error(id: u64, error: impl Into<String>) -> Self {
        Self {
            id,
            error: Some(error.into()),
            value: None,
        }
    }
}

/// One element pushed for an open iterator handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IteratorData {
    /// Iterator handle, not a correlation id.
    pub id: u64,
    pub error: Option<String>,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
}

impl IteratorData {
    /// Whether this element marks the end of the cursor.
    pub fn is_end(&self) -> bool {
        self.error.is_none() && self.key.is_none() && self.value.is_none()
    }
}

/// Server to client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Callback(Callback),
    IteratorData(IteratorData),
}

impl Response {
    pub fn kind(&self) -> ResponseKind {
        match self {
            Response::Callback(_) => ResponseKind::Callback,
            Response::IteratorData(_) => ResponseKind::IteratorData,
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(32);
        buf.put_u8(self.kind() as u8);
        match self {
            Response::Callback(cb) => {
                wire::put_uint(&mut buf, cb.id);
                wire::put_opt_str(&mut buf, cb.error.as_deref());
                wire::put_opt_bytes(&mut buf, cb.value.as_deref());
            }
            Response::IteratorData(data) => {
                wire::put_uint(&mut buf, data.id);
                wire::put_opt_str(&mut buf, data.error.as_deref());
                wire::put_opt_bytes(&mut buf, data.key.as_deref());
                wire::put_opt_bytes(&mut buf, data.value.as_deref());
            }
        }
        buf
    }

    pub fn decode(payload: Bytes) -> Result<Self, ProtocolError> {
        let (tag, mut r) = split_tag(payload)?;
        let response = match ResponseKind::try_from(tag)? {
            ResponseKind::Callback => Response::Callback(Callback {
                id: r.uint()?,
                error: r.opt_string()?,
                value: r.opt_bytes()?,
            }),
            ResponseKind::IteratorData => Response::IteratorData(IteratorData {
                id: r.uint()?,
                error: r.opt_string()?,
                key: r.opt_bytes()?,
                value: r.opt_bytes()?,
            }),
        };
        r.finish()?;
        Ok(response)
    }
}

impl From<Callback> for Response {
    fn from(cb: Callback) -> Self {
        Response::Callback(cb)
    }
}

impl From<IteratorData> for Response {
    fn from(data: IteratorData) -> Self {
        Response::IteratorData(data)
    }
}

/// A successful store mutation, as delivered to subscribers.
///
/// Encoded as a Put, Delete or Batch request body with id 0, so the payload
/// describes its own shape through the request tag table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Put { key: Bytes, value: Bytes },
    Del { key: Bytes },
    Batch { ops: Vec<BatchOp> },
}

impl ChangeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChangeEvent::Put { .. } => EventKind::Put,
            ChangeEvent::Del { .. } => EventKind::Del,
            ChangeEvent::Batch { .. } => EventKind::Batch,
        }
    }

    pub fn encode(&self) -> Bytes {
        let request = match self.clone() {
            ChangeEvent::Put { key, value } => Request::Put { id: 0, key, value },
            ChangeEvent::Del { key } => Request::Delete { id: 0, key },
            ChangeEvent::Batch { ops } => Request::Batch { id: 0, ops },
        };
        request.encode().freeze()
    }

    pub fn decode(payload: Bytes) -> Result<Self, ProtocolError> {
        match Request::decode(payload)? {
            Request::Put { key, value, .. } => Ok(ChangeEvent::Put { key, value }),
            Request::Delete { key, .. } => Ok(ChangeEvent::Del { key }),
            Request::Batch { ops, .. } => Ok(ChangeEvent::Batch { ops }),
            other => Err(ProtocolError::UnknownTag(other.kind() as u8)),
        }
    }
}

fn split_tag(mut payload: Bytes) -> Result<(u8, BodyReader), ProtocolError> {
    if payload.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }
    let tag = payload.split_to(1)[0];
    Ok((tag, BodyReader::new(payload)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(request: Request) -> Request {
        Request::decode(request.encode().freeze()).unwrap()
    }

    #[test]
    fn test_request_tags_match_table() {
        let cases = [
            (Request::Get { id: 1, key: Bytes::from("k") }, 0u8),
            (
                Request::Put {
                    id: 1,
                    key: Bytes::from("k"),
                    value: Bytes::from("v"),
                },
                1,
            ),
            (Request::Delete { id: 1, key: Bytes::from("k") }, 2),
            (Request::Batch { id: 1, ops: vec![] }, 3),
            (
                Request::Iterator {
                    id: 1,
                    options: IteratorOptions::default(),
                    batch: 1,
                },
                4,
            ),
            (
                Request::Subscribe {
                    id: 1,
                    event: EventKind::Put,
                },
                5,
            ),
            (Request::Unsubscribe { id: 1, handler: 1 }, 6),
        ];
        for (request, tag) in cases {
            assert_eq!(request.encode()[0], tag, "{:?}", request.kind());
        }
    }

    #[test]
    fn test_batch_request_preserves_op_order() {
        let ops = vec![
            BatchOp::put("hello", "world"),
            BatchOp::del("gone"),
            BatchOp::put("hej", "verden"),
        ];
        let decoded = roundtrip(Request::Batch { id: 9, ops: ops.clone() });
        assert_eq!(decoded, Request::Batch { id: 9, ops });
    }

    #[test]
    fn test_iterator_options_bounds() {
        let options = IteratorOptions::new()
            .with_gt("a")
            .with_lte("z")
            .with_limit(10)
            .with_reverse()
            .with_values(false);
        let decoded = roundtrip(Request::Iterator {
            id: 3,
            options: options.clone(),
            batch: 32,
        });
        match decoded {
            Request::Iterator { id, options: got, batch } => {
                assert_eq!(id, 3);
                assert_eq!(batch, 32);
                assert_eq!(got, options);
                assert!(got.keys);
                assert!(!got.values);
                assert!(got.gte.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_iterator_options_defaults() {
        let options = IteratorOptions::default();
        assert!(options.keys && options.values && !options.reverse);
        assert!(options.limit.is_none());
    }

    #[test]
    fn test_subscribe_event_names() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
            let decoded = roundtrip(Request::Subscribe { id: 4, event: kind });
            assert_eq!(decoded, Request::Subscribe { id: 4, event: kind });
        }
        assert!(matches!(
            "flush".parse::<EventKind>(),
            Err(ProtocolError::UnknownEvent(_))
        ));
    }

    #[test]
    fn test_subscribe_unknown_event_is_decode_error() {
        let mut buf = BytesMut::new();
        buf.put_u8(RequestKind::Subscribe as u8);
        wire::put_uint(&mut buf, 1);
        wire::put_bytes(&mut buf, b"open");
        assert!(matches!(
            Request::decode(buf.freeze()),
            Err(ProtocolError::UnknownEvent(_))
        ));
    }

    #[test]
    fn test_decode_rejects_empty_and_unknown_tag() {
        assert!(matches!(Request::decode(Bytes::new()), Err(ProtocolError::EmptyFrame)));
        assert!(matches!(
            Request::decode(Bytes::from_static(&[7, 1])),
            Err(ProtocolError::UnknownTag(7))
        ));
        assert!(matches!(
            Response::decode(Bytes::from_static(&[2, 1])),
            Err(ProtocolError::UnknownTag(2))
        ));
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut buf = Request::Get { id: 1, key: Bytes::from("k") }.encode();
        buf.put_u8(0);
        assert!(matches!(
            Request::decode(buf.freeze()),
            Err(ProtocolError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_batch_put_without_value() {
        let mut buf = BytesMut::new();
        buf.put_u8(RequestKind::Batch as u8);
        wire::put_uint(&mut buf, 1);
        wire::put_uint(&mut buf, 1);
        buf.put_u8(0);
        wire::put_bytes(&mut buf, b"k");
        wire::put_opt_bytes(&mut buf, None);
        assert!(matches!(
            Request::decode(buf.freeze()),
            Err(ProtocolError::MissingValue)
        ));
    }

    #[test]
    fn test_callback_fields() {
        let cb = Callback::error(12, "NotFound: key not found in database");
        let decoded = Response::decode(Response::from(cb.clone()).encode().freeze()).unwrap();
        assert_eq!(decoded, Response::Callback(cb));

        let cb = Callback::ok(13, None);
        let encoded = Response::from(cb.clone()).encode();
        assert_eq!(encoded[0], ResponseKind::Callback as u8);
        assert_eq!(Response::decode(encoded.freeze()).unwrap(), Response::Callback(cb));
    }

    #[test]
    fn test_iterator_data_end_marker() {
        let end = IteratorData {
            id: 2,
            ..Default::default()
        };
        assert!(end.is_end());

        let encoded = Response::from(end.clone()).encode();
        assert_eq!(encoded[0], ResponseKind::IteratorData as u8);
        match Response::decode(encoded.freeze()).unwrap() {
            Response::IteratorData(data) => assert!(data.is_end()),
            other => panic!("unexpected {:?}", other),
        }

        let failed = IteratorData {
            id: 2,
            error: Some("boom".to_string()),
            ..Default::default()
        };
        assert!(!failed.is_end());
    }

    #[test]
    fn test_change_event_uses_request_tags() {
        let put = ChangeEvent::Put {
            key: Bytes::from("hello"),
            value: Bytes::from("world"),
        };
        let encoded = put.encode();
        assert_eq!(encoded[0], RequestKind::Put as u8);
        assert_eq!(ChangeEvent::decode(encoded).unwrap(), put);

        let del = ChangeEvent::Del {
            key: Bytes::from("hello"),
        };
        let encoded = del.encode();
        assert_eq!(encoded[0], RequestKind::Delete as u8);
        assert_eq!(ChangeEvent::decode(encoded).unwrap(), del);

        let batch = ChangeEvent::Batch {
            ops: vec![BatchOp::put("a", "1"), BatchOp::del("b")],
        };
        let encoded = batch.encode();
        assert_eq!(encoded[0], RequestKind::Batch as u8);
        assert_eq!(ChangeEvent::decode(encoded).unwrap(), batch);
    }

    #[test]
    fn test_change_event_rejects_non_mutation_tags() {
        let get = Request::Get { id: 0, key: Bytes::from("k") }.encode().freeze();
        assert!(matches!(
            ChangeEvent::decode(get),
            Err(ProtocolError::UnknownTag(0))
        ));
    }

    #[test]
    fn test_mutation_kinds() {
        assert!(RequestKind::Put.is_mutation());
        assert!(RequestKind::Delete.is_mutation());
        assert!(RequestKind::Batch.is_mutation());
        assert!(!RequestKind::Get.is_mutation());
        assert!(!RequestKind::Iterator.is_mutation());
        assert!(!RequestKind::Subscribe.is_mutation());
        assert!(!RequestKind::Unsubscribe.is_mutation());
    }
}
