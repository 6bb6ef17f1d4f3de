//! Framing for one self-delimited event.
//!
//! ```text
//! {"type": "...", "version": "...", "data_length": N, "payload_length": M}\n
//! <N bytes of JSON data><M bytes of payload>
//! ```
//!
//! Inline `data` in the header is accepted on decode and merged under the
//! separate data block. The encoder always writes data as a separate block.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::codec::{Decoder, Encoder};

use super::event::{Event, PROTOCOL_VERSION, RawEvent};
use crate::errors::ProtocolError;

/// Upper bound for a single header line.
pub const MAX_HEADER_LEN: usize = 1024 * 1024;

/// Upper bound for the JSON data block following a header.
pub const MAX_DATA_LEN: usize = MAX_HEADER_LEN;

/// Upper bound for one binary payload.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload_length: Option<usize>,
}

impl Header {
    /// Reject lengths a peer could use to make the decoder buffer without bound.
    fn check_lengths(&self) -> Result<(), ProtocolError> {
        let data_len = self.data_length.unwrap_or(0);
        if data_len > MAX_DATA_LEN {
            return Err(ProtocolError::DataTooLong {
                len: data_len,
                limit: MAX_DATA_LEN,
            });
        }
        let payload_len = self.payload_length.unwrap_or(0);
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLong {
                len: payload_len,
                limit: MAX_PAYLOAD_LEN,
            });
        }
        Ok(())
    }

    fn body_len(&self) -> Result<usize, ProtocolError> {
        let data_len = self.data_length.unwrap_or(0);
        let payload_len = self.payload_length.unwrap_or(0);
        data_len
            .checked_add(payload_len)
            .ok_or(ProtocolError::PayloadTooLong {
                len: payload_len,
                limit: MAX_PAYLOAD_LEN,
            })
    }
}

/// tokio-util codec turning a byte stream into [`Event`]s and back.
#[derive(Debug, Default)]
pub struct EventCodec {
    /// Header already consumed while waiting for its data/payload bytes.
    pending: Option<Header>,
}

impl EventCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_header(&mut self, src: &mut BytesMut) -> Result<Option<Header>, ProtocolError> {
        if let Some(header) = self.pending.take() {
            return Ok(Some(header));
        }

        let Some(newline) = src.iter().position(|b| *b == b'\n') else {
            if src.len() > MAX_HEADER_LEN {
                return Err(ProtocolError::HeaderTooLong {
                    limit: MAX_HEADER_LEN,
                });
            }
            return Ok(None);
        };
        if newline > MAX_HEADER_LEN {
            return Err(ProtocolError::HeaderTooLong {
                limit: MAX_HEADER_LEN,
            });
        }

        let line = src.split_to(newline + 1);
        let header: Header = serde_json::from_slice(&line[..newline])
            .map_err(|e| ProtocolError::InvalidHeader(e.to_string()))?;
        header.check_lengths()?;
        Ok(Some(header))
    }
}

impl Decoder for EventCodec {
    type Item = Event;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Event>, ProtocolError> {
        let Some(header) = self.next_header(src)? else {
            return Ok(None);
        };

        let body_len = header.body_len()?;
        if src.len() < body_len {
            src.reserve(body_len - src.len());
            self.pending = Some(header);
            return Ok(None);
        }

        let mut data = header.data.unwrap_or_default();
        let data_len = header.data_length.unwrap_or(0);
        if data_len > 0 {
            let block = src.split_to(data_len);
            let extra: Map<String, Value> = serde_json::from_slice(&block)
                .map_err(|e| ProtocolError::invalid_data(&header.kind, e))?;
            data.extend(extra);
        }

        let payload_len = header.payload_length.unwrap_or(0);
        let payload = (payload_len > 0).then(|| src.split_to(payload_len).freeze());

        Event::from_raw(RawEvent {
            kind: header.kind,
            data,
            payload,
        })
        .map(Some)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Event>, ProtocolError> {
        match self.decode(src)? {
            Some(event) => Ok(Some(event)),
            None if src.is_empty() && self.pending.is_none() => Ok(None),
            None => Err(ProtocolError::Truncated),
        }
    }
}

impl Encoder<&Event> for EventCodec {
    type Error = ProtocolError;

    fn encode(&mut self, event: &Event, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let RawEvent {
            kind,
            data,
            payload,
        } = event.to_raw();

        let data_bytes = if data.is_empty() {
            Vec::new()
        } else {
            serde_json::to_vec(&data).map_err(|e| ProtocolError::invalid_data(&kind, e))?
        };
        let payload = payload.filter(|p| !p.is_empty());

        let header = Header {
            kind,
            version: Some(PROTOCOL_VERSION.to_string()),
            data: None,
            data_length: (!data_bytes.is_empty()).then_some(data_bytes.len()),
            payload_length: payload.as_ref().map(|p| p.len()),
        };
        let header_bytes = serde_json::to_vec(&header)
            .map_err(|e| ProtocolError::InvalidHeader(e.to_string()))?;

        dst.reserve(
            header_bytes.len() + 1 + data_bytes.len() + payload.as_ref().map_or(0, |p| p.len()),
        );
        dst.put_slice(&header_bytes);
        dst.put_u8(b'\n');
        dst.put_slice(&data_bytes);
        if let Some(payload) = payload {
            dst.put_slice(&payload);
        }
        Ok(())
    }
}

/// Serialize a sequence of events exactly as they would be sent on the wire.
pub fn encode_events(events: &[Event]) -> Result<BytesMut, ProtocolError> {
    let mut codec = EventCodec::new();
    let mut buf = BytesMut::new();
    for event in events {
        codec.encode(event, &mut buf)?;
    }
    Ok(buf)
}

/// Parse a complete byte buffer into events. Trailing partial frames are an error.
pub fn decode_events(bytes: &[u8]) -> Result<Vec<Event>, ProtocolError> {
    let mut codec = EventCodec::new();
    let mut buf = BytesMut::from(bytes);
    let mut events = Vec::new();
    while let Some(event) = codec.decode_eof(&mut buf)? {
        events.push(event);
        if !buf.has_remaining() {
            break;
        }
    }
    Ok(events)
}
