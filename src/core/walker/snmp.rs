//! Minimal SNMPv2c client: GetBulk subtree walks over UDP.
//!
//! Only the subset of BER needed for v2c messages is implemented: definite
//! lengths, the universal INTEGER/OCTET STRING/NULL/OID/SEQUENCE types, the
//! SMI application types and the three v2 exception values. Any other value
//! type is carried through as [`Value::Unknown`].

use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{net::UdpSocket, time::Instant};
use tracing::{debug, trace, warn};

use super::{Oid, SubtreeWalker, Value, VarBind};
use crate::{
    config::targets::Target,
    core::{error::PollError, pool::WalkerFactory},
};

const VERSION_2C: i64 = 1;
const MAX_DATAGRAM: usize = 65_535;

pub mod tag {
    pub const INTEGER: u8 = 0x02;
    pub const OCTET_STRING: u8 = 0x04;
    pub const NULL: u8 = 0x05;
    pub const OBJECT_ID: u8 = 0x06;
    pub const SEQUENCE: u8 = 0x30;
    pub const IP_ADDRESS: u8 = 0x40;
    pub const COUNTER32: u8 = 0x41;
    pub const GAUGE32: u8 = 0x42;
    pub const TIME_TICKS: u8 = 0x43;
    pub const OPAQUE: u8 = 0x44;
    pub const COUNTER64: u8 = 0x46;
    pub const NO_SUCH_OBJECT: u8 = 0x80;
    pub const NO_SUCH_INSTANCE: u8 = 0x81;
    pub const END_OF_MIB_VIEW: u8 = 0x82;
    pub const RESPONSE: u8 = 0xA2;
    pub const GET_BULK: u8 = 0xA5;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message truncated at byte {0}")]
    Truncated(usize),

    #[error("expected tag {expected:#04x}, found {found:#04x}")]
    UnexpectedTag { expected: u8, found: u8 },

    #[error("unsupported length encoding")]
    BadLength,

    #[error("integer is empty or does not fit in 64 bits")]
    BadInteger,

    #[error("malformed object identifier")]
    BadOid,
}

/// Protocol data unit. In GetBulk requests `error_status` and `error_index`
/// carry non-repeaters and max-repetitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub tag: u8,
    pub request_id: i32,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<VarBind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub version: i64,
    pub community: Vec<u8>,
    pub pdu: Pdu,
}

impl Message {
    pub fn get_bulk(community: &[u8], request_id: i32, max_repetitions: u32, start: &Oid) -> Self {
        Message {
            version: VERSION_2C,
            community: community.to_vec(),
            pdu: Pdu {
                tag: tag::GET_BULK,
                request_id,
                error_status: 0,
                error_index: i64::from(max_repetitions),
                varbinds: vec![VarBind::new(start.clone(), Value::Null)],
            },
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut varbinds = Vec::new();
        for binding in &self.pdu.varbinds {
            let mut item = Vec::new();
            encode_oid(&mut item, &binding.oid);
            encode_value(&mut item, &binding.value);
            encode_tlv(&mut varbinds, tag::SEQUENCE, &item);
        }

        let mut pdu = Vec::new();
        encode_integer(&mut pdu, i64::from(self.pdu.request_id));
        encode_integer(&mut pdu, self.pdu.error_status);
        encode_integer(&mut pdu, self.pdu.error_index);
        encode_tlv(&mut pdu, tag::SEQUENCE, &varbinds);

        let mut body = Vec::new();
        encode_integer(&mut body, self.version);
        encode_tlv(&mut body, tag::OCTET_STRING, &self.community);
        encode_tlv(&mut body, self.pdu.tag, &pdu);

        let mut out = Vec::with_capacity(body.len() + 4);
        encode_tlv(&mut out, tag::SEQUENCE, &body);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut message = Reader::new(bytes).expect(tag::SEQUENCE)?;
        let version = message.integer()?;
        let community = message.expect(tag::OCTET_STRING)?.rest().to_vec();

        let (pdu_tag, mut pdu) = message.any()?;
        let request_id = i32::try_from(pdu.integer()?).map_err(|_| DecodeError::BadInteger)?;
        let error_status = pdu.integer()?;
        let error_index = pdu.integer()?;

        let mut list = pdu.expect(tag::SEQUENCE)?;
        let mut varbinds = Vec::new();
        while !list.is_empty() {
            let mut item = list.expect(tag::SEQUENCE)?;
            let oid = decode_oid(item.expect(tag::OBJECT_ID)?.rest())?;
            let (value_tag, value) = item.any()?;
            varbinds.push(VarBind::new(oid, decode_value(value_tag, value.rest())?));
        }

        Ok(Message {
            version,
            community,
            pdu: Pdu {
                tag: pdu_tag,
                request_id,
                error_status,
                error_index,
                varbinds,
            },
        })
    }
}

/// Request id of a datagram whose header is intact, even if its varbinds
/// do not decode.
fn peek_request_id(bytes: &[u8]) -> Option<i32> {
    let mut message = Reader::new(bytes).expect(tag::SEQUENCE).ok()?;
    message.integer().ok()?;
    message.expect(tag::OCTET_STRING).ok()?;
    let (_, mut pdu) = message.any().ok()?;
    i32::try_from(pdu.integer().ok()?).ok()
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos.min(self.buf.len())..]
    }

    fn byte(&mut self) -> Result<u8, DecodeError> {
        let byte = *self.buf.get(self.pos).ok_or(DecodeError::Truncated(self.pos))?;
        self.pos += 1;
        Ok(byte)
    }

    fn length(&mut self) -> Result<usize, DecodeError> {
        let first = self.byte()?;
        if first & 0x80 == 0 {
            return Ok(usize::from(first));
        }

        let count = usize::from(first & 0x7f);
        if count == 0 || count > 4 {
            return Err(DecodeError::BadLength);
        }

        let mut len = 0usize;
        for _ in 0..count {
            len = (len << 8) | usize::from(self.byte()?);
        }
        Ok(len)
    }

    fn any(&mut self) -> Result<(u8, Reader<'a>), DecodeError> {
        let tag = self.byte()?;
        let len = self.length()?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(DecodeError::Truncated(self.pos))?;

        let content = &self.buf[self.pos..end];
        self.pos = end;
        Ok((tag, Reader::new(content)))
    }

    fn expect(&mut self, expected: u8) -> Result<Reader<'a>, DecodeError> {
        let (found, content) = self.any()?;
        if found != expected {
            return Err(DecodeError::UnexpectedTag { expected, found });
        }
        Ok(content)
    }

    fn integer(&mut self) -> Result<i64, DecodeError> {
        decode_signed(self.expect(tag::INTEGER)?.rest())
    }
}

fn encode_length(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }
    let bytes = len.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    out.push(0x80 | (bytes.len() - skip) as u8);
    out.extend_from_slice(&bytes[skip..]);
}

fn encode_tlv(out: &mut Vec<u8>, tag: u8, content: &[u8]) {
    out.push(tag);
    encode_length(out, content.len());
    out.extend_from_slice(content);
}

fn encode_integer(out: &mut Vec<u8>, value: i64) {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant = (bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0)
            || (bytes[start] == 0xff && bytes[start + 1] & 0x80 != 0);
        if !redundant {
            break;
        }
        start += 1;
    }
    encode_tlv(out, tag::INTEGER, &bytes[start..]);
}

fn encode_unsigned(out: &mut Vec<u8>, tag: u8, value: u64) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(bytes.len() - 1);
    let mut content = Vec::with_capacity(9);
    if bytes[skip] & 0x80 != 0 {
        content.push(0);
    }
    content.extend_from_slice(&bytes[skip..]);
    encode_tlv(out, tag, &content);
}

fn encode_base128(out: &mut Vec<u8>, mut value: u64) {
    let mut groups = [0u8; 10];
    let mut count = 0;
    loop {
        groups[count] = (value & 0x7f) as u8;
        count += 1;
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    for i in (0..count).rev() {
        let continuation = if i == 0 { 0 } else { 0x80 };
        out.push(groups[i] | continuation);
    }
}

fn encode_oid(out: &mut Vec<u8>, oid: &Oid) {
    let mut content = Vec::new();
    match oid.arcs() {
        [first, second, rest @ ..] => {
            encode_base128(&mut content, u64::from(*first) * 40 + u64::from(*second));
            for arc in rest {
                encode_base128(&mut content, u64::from(*arc));
            }
        }
        [first] => encode_base128(&mut content, u64::from(*first) * 40),
        [] => {}
    }
    encode_tlv(out, tag::OBJECT_ID, &content);
}

fn encode_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => encode_integer(out, *i),
        Value::OctetString(bytes) => encode_tlv(out, tag::OCTET_STRING, bytes),
        Value::Null => encode_tlv(out, tag::NULL, &[]),
        Value::ObjectId(oid) => encode_oid(out, oid),
        Value::IpAddress(octets) => encode_tlv(out, tag::IP_ADDRESS, octets),
        Value::Counter32(v) => encode_unsigned(out, tag::COUNTER32, u64::from(*v)),
        Value::Gauge32(v) => encode_unsigned(out, tag::GAUGE32, u64::from(*v)),
        Value::TimeTicks(v) => encode_unsigned(out, tag::TIME_TICKS, u64::from(*v)),
        Value::Opaque(bytes) => encode_tlv(out, tag::OPAQUE, bytes),
        Value::Counter64(v) => encode_unsigned(out, tag::COUNTER64, *v),
        Value::Unknown(tag, bytes) => encode_tlv(out, *tag, bytes),
        Value::NoSuchObject => encode_tlv(out, tag::NO_SUCH_OBJECT, &[]),
        Value::NoSuchInstance => encode_tlv(out, tag::NO_SUCH_INSTANCE, &[]),
        Value::EndOfMibView => encode_tlv(out, tag::END_OF_MIB_VIEW, &[]),
    }
}

fn decode_signed(bytes: &[u8]) -> Result<i64, DecodeError> {
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(DecodeError::BadInteger);
    }
    let mut value: i64 = if bytes[0] & 0x80 != 0 { -1 } else { 0 };
    for byte in bytes {
        value = (value << 8) | i64::from(*byte);
    }
    Ok(value)
}

fn decode_unsigned(bytes: &[u8]) -> Result<u64, DecodeError> {
    let bytes = match bytes {
        [0, rest @ ..] if !rest.is_empty() => rest,
        other => other,
    };
    if bytes.is_empty() || bytes.len() > 8 {
        return Err(DecodeError::BadInteger);
    }
    Ok(bytes
        .iter()
        .fold(0u64, |value, byte| (value << 8) | u64::from(*byte)))
}

fn decode_oid(bytes: &[u8]) -> Result<Oid, DecodeError> {
    if bytes.is_empty() || bytes[bytes.len() - 1] & 0x80 != 0 {
        return Err(DecodeError::BadOid);
    }

    let mut arcs = Vec::with_capacity(bytes.len() + 1);
    let mut value: u64 = 0;
    for byte in bytes {
        value = (value << 7) | u64::from(byte & 0x7f);
        if value > u64::from(u32::MAX) + 80 {
            return Err(DecodeError::BadOid);
        }
        if byte & 0x80 != 0 {
            continue;
        }

        if arcs.is_empty() {
            let (first, second) = match value {
                0..=39 => (0, value),
                40..=79 => (1, value - 40),
                _ => (2, value - 80),
            };
            arcs.push(first);
            arcs.push(u32::try_from(second).map_err(|_| DecodeError::BadOid)?);
        } else {
            arcs.push(u32::try_from(value).map_err(|_| DecodeError::BadOid)?);
        }
        value = 0;
    }

    Ok(Oid::new(arcs))
}

fn decode_value(value_tag: u8, content: &[u8]) -> Result<Value, DecodeError> {
    let small = |content: &[u8]| {
        decode_unsigned(content).and_then(|v| u32::try_from(v).map_err(|_| DecodeError::BadInteger))
    };

    Ok(match value_tag {
        tag::INTEGER => Value::Integer(decode_signed(content)?),
        tag::OCTET_STRING => Value::OctetString(content.to_vec()),
        tag::NULL => Value::Null,
        tag::OBJECT_ID => Value::ObjectId(decode_oid(content)?),
        tag::IP_ADDRESS => {
            Value::IpAddress(content.try_into().map_err(|_| DecodeError::BadLength)?)
        }
        tag::COUNTER32 => Value::Counter32(small(content)?),
        tag::GAUGE32 => Value::Gauge32(small(content)?),
        tag::TIME_TICKS => Value::TimeTicks(small(content)?),
        tag::OPAQUE => Value::Opaque(content.to_vec()),
        tag::COUNTER64 => Value::Counter64(decode_unsigned(content)?),
        tag::NO_SUCH_OBJECT => Value::NoSuchObject,
        tag::NO_SUCH_INSTANCE => Value::NoSuchInstance,
        tag::END_OF_MIB_VIEW => Value::EndOfMibView,
        other => Value::Unknown(other, content.to_vec()),
    })
}

/// Per-request behaviour shared by every walker built from one config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkSettings {
    pub timeout: Duration,
    pub retries: u32,
    pub max_repetitions: u32,
}

impl Default for WalkSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3000),
            retries: 3,
            max_repetitions: 10,
        }
    }
}

/// Walks one agent with GetBulk requests.
pub struct SnmpWalker {
    peer: SocketAddr,
    community: Vec<u8>,
    settings: WalkSettings,
    request_id: AtomicI32,
}

impl SnmpWalker {
    pub fn new(peer: SocketAddr, community: &str, settings: WalkSettings) -> Self {
        Self {
            peer,
            community: community.as_bytes().to_vec(),
            settings,
            request_id: AtomicI32::new(1),
        }
    }

    fn next_request_id(&self) -> i32 {
        self.request_id.fetch_add(1, Ordering::Relaxed) & i32::MAX
    }

    fn unreachable(&self, reason: impl ToString) -> PollError {
        PollError::unreachable(self.peer.to_string(), reason)
    }

    /// One GetBulk round trip. Retransmits the same request on timeout;
    /// datagrams that do not answer it are discarded.
    async fn exchange(&self, socket: &UdpSocket, start: &Oid) -> Result<Vec<VarBind>, PollError> {
        let request_id = self.next_request_id();
        let request = Message::get_bulk(
            &self.community,
            request_id,
            self.settings.max_repetitions,
            start,
        )
        .encode();
        let mut buf = vec![0u8; MAX_DATAGRAM];

        for attempt in 1..=self.settings.retries + 1 {
            socket
                .send(&request)
                .await
                .map_err(|e| self.unreachable(e))?;
            let deadline = Instant::now() + self.settings.timeout;

            loop {
                let received = match tokio::time::timeout_at(deadline, socket.recv(&mut buf)).await {
                    Err(_) => break,
                    Ok(Err(e)) => return Err(self.unreachable(e)),
                    Ok(Ok(received)) => received,
                };

                let response = match Message::decode(&buf[..received]) {
                    Ok(response) => response,
                    Err(e) if peek_request_id(&buf[..received]) == Some(request_id) => {
                        return Err(PollError::malformed(self.peer.to_string(), e));
                    }
                    Err(e) => {
                        debug!(peer = %self.peer, "Discarding undecodable datagram: {e}");
                        continue;
                    }
                };

                if response.pdu.tag != tag::RESPONSE || response.pdu.request_id != request_id {
                    trace!(
                        peer = %self.peer,
                        request_id = response.pdu.request_id,
                        "Ignoring unrelated datagram"
                    );
                    continue;
                }

                if response.pdu.error_status != 0 {
                    return Err(PollError::malformed(
                        self.peer.to_string(),
                        format!(
                            "error-status {} at index {}",
                            response.pdu.error_status, response.pdu.error_index
                        ),
                    ));
                }

                return Ok(response.pdu.varbinds);
            }

            debug!(peer = %self.peer, attempt, "SNMP request timed out");
        }

        Err(self.unreachable(format!(
            "no response after {} attempts",
            self.settings.retries + 1
        )))
    }
}

#[async_trait]
impl SubtreeWalker for SnmpWalker {
    async fn walk(&self, root: &Oid) -> Result<Vec<VarBind>, PollError> {
        let local: SocketAddr = if self.peer.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|e| self.unreachable(e))?;
        socket
            .connect(self.peer)
            .await
            .map_err(|e| self.unreachable(e))?;

        let mut bindings = Vec::new();
        let mut cursor = root.clone();

        'walk: loop {
            let page = match self.exchange(&socket, &cursor).await {
                Ok(page) => page,
                Err(e @ PollError::MalformedResponse { .. }) if !bindings.is_empty() => {
                    warn!(
                        peer = %self.peer,
                        root = %root,
                        kept = bindings.len(),
                        "Walk cut short, keeping collected bindings: {e}"
                    );
                    break;
                }
                Err(e) => return Err(e),
            };
            if page.is_empty() {
                break;
            }

            for binding in page {
                // Agents that do not advance would otherwise loop forever.
                if binding.value == Value::EndOfMibView
                    || !binding.oid.is_below(root)
                    || binding.oid <= cursor
                {
                    break 'walk;
                }
                cursor = binding.oid.clone();
                if !binding.value.is_exception() {
                    bindings.push(binding);
                }
            }
        }

        trace!(peer = %self.peer, root = %root, count = bindings.len(), "Walk finished");
        Ok(bindings)
    }
}

/// Builds one [`SnmpWalker`] per target, resolving its address first.
pub struct SnmpWalkerFactory {
    settings: WalkSettings,
}

impl SnmpWalkerFactory {
    pub fn new(settings: WalkSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl WalkerFactory for SnmpWalkerFactory {
    async fn build(&self, target: &Target) -> Result<Arc<dyn SubtreeWalker>, PollError> {
        let endpoint = target.endpoint();
        let peer = tokio::net::lookup_host((target.address.as_str(), target.port))
            .await
            .map_err(|e| PollError::unreachable(endpoint.as_str(), e))?
            .next()
            .ok_or_else(|| PollError::unreachable(endpoint.as_str(), "address did not resolve"))?;

        Ok(Arc::new(SnmpWalker::new(peer, &target.community, self.settings)))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    use super::*;
    use crate::core::{
        cache::DeviceStatus,
        event::{OutboundEvent, StateEvent},
        queue::event_queue,
        worker::{
            tests::{test_settings, MAC},
            PollingWorker,
        },
    };

    fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    #[test]
    fn test_get_bulk_encoding() {
        let bytes = Message::get_bulk(b"public", 1, 10, &oid("1.3.6.1")).encode();
        assert_eq!(
            bytes,
            vec![
                0x30, 0x21, 0x02, 0x01, 0x01, 0x04, 0x06, b'p', b'u', b'b', b'l', b'i', b'c',
                0xA5, 0x14, 0x02, 0x01, 0x01, 0x02, 0x01, 0x00, 0x02, 0x01, 0x0A, 0x30, 0x09,
                0x30, 0x07, 0x06, 0x03, 0x2B, 0x06, 0x01, 0x05, 0x00,
            ]
        );
    }

    #[test]
    fn test_integer_encoding_is_minimal() {
        let mut out = Vec::new();
        encode_integer(&mut out, 128);
        assert_eq!(out, vec![0x02, 0x02, 0x00, 0x80]);

        out.clear();
        encode_integer(&mut out, -129);
        assert_eq!(out, vec![0x02, 0x02, 0xFF, 0x7F]);

        out.clear();
        encode_integer(&mut out, 0);
        assert_eq!(out, vec![0x02, 0x01, 0x00]);

        assert_eq!(decode_signed(&[0xFF, 0x7F]).unwrap(), -129);
        assert_eq!(decode_signed(&[0x80]).unwrap(), -128);
    }

    #[test]
    fn test_unsigned_with_high_bit_gets_leading_zero() {
        let mut out = Vec::new();
        encode_unsigned(&mut out, tag::COUNTER32, u64::from(u32::MAX));
        assert_eq!(out, vec![0x41, 0x05, 0x00, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(decode_unsigned(&out[2..]).unwrap(), u64::from(u32::MAX));
    }

    #[test]
    fn test_oid_multibyte_arcs() {
        let mut out = Vec::new();
        encode_oid(&mut out, &oid("1.3.6.1.4.1.14179"));
        assert_eq!(
            out,
            vec![0x06, 0x07, 0x2B, 0x06, 0x01, 0x04, 0x01, 0xEE, 0x63]
        );
        assert_eq!(decode_oid(&out[2..]).unwrap(), oid("1.3.6.1.4.1.14179"));
    }

    #[test]
    fn test_long_form_length() {
        let mut out = Vec::new();
        encode_tlv(&mut out, tag::OCTET_STRING, &[0u8; 200]);
        assert_eq!(&out[..3], &[0x04, 0x81, 0xC8]);

        let (found, content) = Reader::new(&out).any().unwrap();
        assert_eq!(found, tag::OCTET_STRING);
        assert_eq!(content.rest().len(), 200);
    }

    #[test]
    fn test_response_decoding_with_mixed_values() {
        let response = Message {
            version: VERSION_2C,
            community: b"public".to_vec(),
            pdu: Pdu {
                tag: tag::RESPONSE,
                request_id: 77,
                error_status: 0,
                error_index: 0,
                varbinds: vec![
                    VarBind::new(oid("1.3.6.1.2.1.1.5.0"), Value::OctetString(b"wlc-1".to_vec())),
                    VarBind::new(oid("1.3.6.1.2.1.1.3.0"), Value::TimeTicks(123_456)),
                    VarBind::new(oid("1.3.6.1.2.1.4.20.1.1.1"), Value::IpAddress([10, 0, 0, 1])),
                    VarBind::new(oid("1.3.6.1.2.1.31.1.1.1.6.1"), Value::Counter64(1 << 40)),
                    VarBind::new(oid("1.3.6.1.2.1.1.9.0"), Value::NoSuchInstance),
                ],
            },
        };

        let decoded = Message::decode(&response.encode()).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_decode_rejects_truncated_message() {
        let bytes = Message::get_bulk(b"public", 1, 10, &oid("1.3.6.1")).encode();
        assert!(matches!(
            Message::decode(&bytes[..bytes.len() - 3]),
            Err(DecodeError::Truncated(_))
        ));
        assert!(matches!(
            Message::decode(&[0x02, 0x01, 0x00]),
            Err(DecodeError::UnexpectedTag { .. })
        ));
    }

    /// Answers GetBulk requests from a fixed table. The first `ignore`
    /// requests are silently dropped. Once `clean_pages` responses went out,
    /// every further one carries `error_status`.
    async fn spawn_agent(
        table: Vec<VarBind>,
        ignore: usize,
        error_status: i64,
        clean_pages: usize,
    ) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let table: BTreeMap<Oid, Value> = table.into_iter().map(|vb| (vb.oid, vb.value)).collect();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            let mut seen = 0usize;
            let mut answered = 0usize;
            loop {
                let Ok((n, from)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                seen += 1;
                if seen <= ignore {
                    continue;
                }

                let request = Message::decode(&buf[..n]).unwrap();
                assert_eq!(request.pdu.tag, tag::GET_BULK);
                let start = request.pdu.varbinds[0].oid.clone();
                let repetitions = request.pdu.error_index as usize;

                let mut varbinds: Vec<VarBind> = table
                    .range((std::ops::Bound::Excluded(start.clone()), std::ops::Bound::Unbounded))
                    .take(repetitions)
                    .map(|(oid, value)| VarBind::new(oid.clone(), value.clone()))
                    .collect();
                if varbinds.is_empty() {
                    varbinds.push(VarBind::new(start, Value::EndOfMibView));
                }

                let response = Message {
                    version: request.version,
                    community: request.community,
                    pdu: Pdu {
                        tag: tag::RESPONSE,
                        request_id: request.pdu.request_id,
                        error_status: if answered >= clean_pages { error_status } else { 0 },
                        error_index: 0,
                        varbinds,
                    },
                };
                answered += 1;
                socket.send_to(&response.encode(), from).await.unwrap();
            }
        });

        addr
    }

    fn quick_settings() -> WalkSettings {
        WalkSettings {
            timeout: Duration::from_millis(100),
            retries: 1,
            max_repetitions: 10,
        }
    }

    #[tokio::test]
    async fn test_walk_collects_subtree_across_pages() {
        let root = oid("1.3.6.1.4.1.14179.2.2.1.1.3");
        let mut table: Vec<VarBind> = (0..25)
            .map(|i| VarBind::new(root.child(&[i]), Value::OctetString(format!("ap-{i}").into_bytes())))
            .collect();
        table.push(VarBind::new(
            oid("1.3.6.1.4.1.14179.2.2.1.1.4.0"),
            Value::Integer(1),
        ));

        let addr = spawn_agent(table, 0, 0, 0).await;
        let walker = SnmpWalker::new(addr, "public", quick_settings());

        let bindings = walker.walk(&root).await.unwrap();
        assert_eq!(bindings.len(), 25);
        assert_eq!(bindings[24].oid, root.child(&[24]));
        assert!(bindings.iter().all(|vb| vb.oid.is_below(&root)));
    }

    #[tokio::test]
    async fn test_walk_retransmits_after_timeout() {
        let root = oid("1.3.6.1.4.1.14179.2.2.1.1.3");
        let table = vec![VarBind::new(root.child(&[1]), Value::OctetString(b"ap".to_vec()))];

        let addr = spawn_agent(table, 1, 0, 0).await;
        let walker = SnmpWalker::new(addr, "public", quick_settings());

        let bindings = walker.walk(&root).await.unwrap();
        assert_eq!(bindings.len(), 1);
    }

    #[tokio::test]
    async fn test_walk_unreachable_after_retries() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let walker = SnmpWalker::new(silent.local_addr().unwrap(), "public", quick_settings());

        let err = walker.walk(&oid("1.3.6.1.2.1")).await.unwrap_err();
        assert!(matches!(err, PollError::TargetUnreachable { .. }));
    }

    #[tokio::test]
    async fn test_walk_error_status_is_malformed() {
        let root = oid("1.3.6.1.2.1.1");
        let table = vec![VarBind::new(root.child(&[1, 0]), Value::Integer(1))];

        let addr = spawn_agent(table, 0, 5, 0).await;
        let walker = SnmpWalker::new(addr, "public", quick_settings());

        let err = walker.walk(&root).await.unwrap_err();
        assert!(matches!(err, PollError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_walk_keeps_values_of_unknown_type() {
        let root = oid("1.3.6.1.4.1.14179.2.2.1.1.3");
        let table = vec![
            VarBind::new(root.child(&[1]), Value::OctetString(b"ap".to_vec())),
            VarBind::new(root.child(&[2]), Value::Unknown(0x47, vec![0x05])),
            VarBind::new(root.child(&[3]), Value::Unknown(0x45, vec![0x01, 0x02])),
        ];

        let addr = spawn_agent(table.clone(), 0, 0, 0).await;
        let walker = SnmpWalker::new(addr, "public", quick_settings());

        let bindings = walker.walk(&root).await.unwrap();
        assert_eq!(bindings, table);
    }

    #[tokio::test]
    async fn test_undecodable_response_is_malformed_not_unreachable() {
        let root = oid("1.3.6.1.2.1.1");
        // Nine content bytes cannot hold a Counter32.
        let table = vec![VarBind::new(
            root.child(&[1, 0]),
            Value::Unknown(tag::COUNTER32, vec![0x01; 9]),
        )];

        let addr = spawn_agent(table, 0, 0, 0).await;
        let walker = SnmpWalker::new(addr, "public", quick_settings());

        let err = walker.walk(&root).await.unwrap_err();
        assert!(matches!(err, PollError::MalformedResponse { .. }));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_walk_keeps_pages_before_error() {
        let root = oid("1.3.6.1.4.1.14179.2.2.1.1.3");
        let table: Vec<VarBind> = (1..=15)
            .map(|i| VarBind::new(root.child(&[i]), Value::Gauge32(i)))
            .collect();

        let addr = spawn_agent(table.clone(), 0, 5, 1).await;
        let walker = SnmpWalker::new(addr, "public", quick_settings());

        let bindings = walker.walk(&root).await.unwrap();
        assert_eq!(bindings, table[..10].to_vec());
        assert!(logs_contain("Walk cut short"));
    }

    #[tokio::test]
    async fn test_worker_polls_controller_with_odd_values() {
        let settings = Arc::new(test_settings());
        let columns = &settings.columns;
        let client_count = columns.client_count.clone().unwrap();

        let mut table = vec![
            VarBind::new(columns.name.child(&[1]), Value::OctetString(b"AP-1\0\0".to_vec())),
            VarBind::new(columns.name.child(&[2]), Value::OctetString(b"AP-2".to_vec())),
            VarBind::new(columns.mac.child(&[1, 0]), Value::OctetString(MAC.to_vec())),
            VarBind::new(columns.mac.child(&[2, 0]), Value::Unknown(0x47, vec![0x07])),
        ];
        // More radio slots than one page holds; the second page is refused.
        table.extend((0..12).map(|slot| VarBind::new(client_count.child(&[1, slot]), Value::Gauge32(1))));

        // name, mac and ip fit in one page each; client_count is walked fourth.
        let addr = spawn_agent(table, 0, 5, 4).await;
        let walker = Arc::new(SnmpWalker::new(addr, "public", quick_settings()));
        let target = Target {
            address: "127.0.0.1".into(),
            community: "public".into(),
            ..Default::default()
        };

        let (tx, mut rx) = event_queue();
        let (mut worker, _phase) =
            PollingWorker::new(target, walker, settings.clone(), tx, CancellationToken::new());
        worker.run_cycle(1_000).await.unwrap();

        let states: Vec<StateEvent> = std::iter::from_fn(|| rx.try_recv())
            .filter_map(|event| match event {
                OutboundEvent::State(state) => Some(state),
                OutboundEvent::Stats(_) => None,
            })
            .collect();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].device_id, "aa:bb:cc:dd:ee:01");
        assert_eq!(states[0].device_name.as_deref(), Some("AP-1"));
        assert_eq!(states[0].status, DeviceStatus::On);
        assert_eq!(states[0].client_count, 10);
    }

    #[tokio::test]
    async fn test_factory_resolves_target() {
        let factory = SnmpWalkerFactory::new(WalkSettings::default());
        let target = Target {
            address: "127.0.0.1".into(),
            community: "public".into(),
            ..Default::default()
        };
        assert!(factory.build(&target).await.is_ok());
    }
}
