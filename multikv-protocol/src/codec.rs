//! Encoder and decoder combining framing with message bodies.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::{Request, Response};
use bytes::{Bytes, BytesMut};

/// Encodes requests and responses into transport frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a request into a frame.
    pub fn encode_request(request: &Request) -> Result<BytesMut, ProtocolError> {
        Frame::new(request.encode().freeze()).encode()
    }

    /// Encodes a response into a frame.
    pub fn encode_response(response: &Response) -> Result<BytesMut, ProtocolError> {
        Frame::new(response.encode().freeze()).encode()
    }

    /// Appends a framed response to an outbound buffer.
    pub fn append_response(response: &Response, out: &mut BytesMut) -> Result<(), ProtocolError> {
        Frame::encode_into(&response.encode(), out)
    }
}

/// Outcome of decoding one whole frame.
#[derive(Debug)]
pub enum Decoded<T> {
    Message(T),
    /// The frame was malformed and has been consumed. Carries the reason.
    Dropped(ProtocolError),
}

/// Buffers transport bytes and yields whole messages.
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        Frame::decode(&mut self.buffer)
    }

    /// Attempts to decode the next request.
    ///
    /// `Err` means the stream is out of sync and must be closed; malformed
    /// but delimited frames come back as [`Decoded::Dropped`].
    pub fn decode_request(&mut self) -> Result<Option<Decoded<Request>>, ProtocolError> {
        self.decode_with(Request::decode)
    }

    /// Attempts to decode the next response.
    pub fn decode_response(&mut self) -> Result<Option<Decoded<Response>>, ProtocolError> {
        self.decode_with(Response::decode)
    }

    fn decode_with<T>(
        &mut self,
        parse: impl FnOnce(Bytes) -> Result<T, ProtocolError>,
    ) -> Result<Option<Decoded<T>>, ProtocolError> {
        match self.decode_frame() {
            Ok(Some(frame)) => Ok(Some(match parse(frame.payload) {
                Ok(message) => Decoded::Message(message),
                Err(e) => Decoded::Dropped(e),
            })),
            Ok(None) => Ok(None),
            Err(e) if e.is_recoverable() => Ok(Some(Decoded::Dropped(e))),
            Err(e) => Err(e),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Callback, EventKind};
    use proptest::prelude::*;

    fn expect_request(decoded: Option<Decoded<Request>>) -> Request {
        match decoded {
            Some(Decoded::Message(request)) => request,
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_encoder_decoder_roundtrip() {
        let request = Request::Get {
            id: 42,
            key: Bytes::from("hello"),
        };
        let encoded = Encoder::encode_request(&request).unwrap();

        let mut decoder = Decoder::new();
        decoder.extend(&encoded);

        assert_eq!(expect_request(decoder.decode_request().unwrap()), request);
        assert!(decoder.decode_request().unwrap().is_none());
    }

    #[test]
    fn test_partial_frame_decoding() {
        let request = Request::Subscribe {
            id: 1,
            event: EventKind::Batch,
        };
        let encoded = Encoder::encode_request(&request).unwrap();

        let mut decoder = Decoder::new();
        decoder.extend(&encoded[..5]);
        assert!(decoder.decode_request().unwrap().is_none());

        decoder.extend(&encoded[5..]);
        assert_eq!(expect_request(decoder.decode_request().unwrap()), request);
    }

    #[test]
    fn test_malformed_frame_is_dropped_and_decoding_continues() {
        let mut decoder = Decoder::new();
        // Empty frame, unknown tag, truncated body, then a good request.
        decoder.extend(&Frame::new(Bytes::new()).encode().unwrap());
        decoder.extend(&Frame::new(Bytes::from_static(&[9, 1])).encode().unwrap());
        decoder.extend(&Frame::new(Bytes::from_static(&[1, 1, 5])).encode().unwrap());
        let good = Request::Delete {
            id: 3,
            key: Bytes::from("k"),
        };
        decoder.extend(&Encoder::encode_request(&good).unwrap());

        assert!(matches!(
            decoder.decode_request().unwrap(),
            Some(Decoded::Dropped(ProtocolError::EmptyFrame))
        ));
        assert!(matches!(
            decoder.decode_request().unwrap(),
            Some(Decoded::Dropped(ProtocolError::UnknownTag(9)))
        ));
        assert!(matches!(
            decoder.decode_request().unwrap(),
            Some(Decoded::Dropped(ProtocolError::Truncated { .. }))
        ));
        assert_eq!(expect_request(decoder.decode_request().unwrap()), good);
    }

    #[test]
    fn test_lost_sync_is_an_error() {
        let mut decoder = Decoder::new();
        decoder.extend(b"garbage-garbage");
        assert!(matches!(
            decoder.decode_request(),
            Err(ProtocolError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_response_roundtrip() {
        let response = Response::Callback(Callback::ok(7, Some(Bytes::from("world"))));
        let mut out = BytesMut::new();
        Encoder::append_response(&response, &mut out).unwrap();

        let mut decoder = Decoder::new();
        decoder.extend(&out);
        match decoder.decode_response().unwrap() {
            Some(Decoded::Message(decoded)) => assert_eq!(decoded, response),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decoder_buffered() {
        let mut decoder = Decoder::default();
        assert_eq!(decoder.buffered(), 0);

        decoder.extend(b"some data");
        assert_eq!(decoder.buffered(), 9);

        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }

    proptest! {
        #[test]
        fn prop_arbitrary_payloads_never_panic(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            let payload = Bytes::from(payload);
            let _ = Request::decode(payload.clone());
            let _ = Response::decode(payload.clone());

            let mut decoder = Decoder::new();
            decoder.extend(&Frame::new(payload).encode().unwrap());
            prop_assert!(decoder.decode_request().unwrap().is_some());
        }
    }
}
