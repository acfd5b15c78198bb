//! WebSocket frame parsing and serialization
//!
//! Implements the RFC 6455 Section 5.2 wire format:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```
//!
//! [`decode`] and [`encode`] are pure functions over complete buffers.
//! [`FrameParser`] accumulates bytes from a stream and yields frames as
//! they complete.

use crate::{
    error::{Error, FrameError, Result},
    mask::{apply_mask_in_place, generate_mask},
    protocol::{constants::MAX_CONTROL_PAYLOAD, frame::*, Opcode},
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Represents a WebSocket frame according to RFC 6455
///
/// `payload` always holds the unmasked application bytes; masking is
/// applied while writing and removed while parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Indicates if this is the final frame in a message
    pub fin: bool,
    /// Reserved bits (RSV1, RSV2, RSV3)
    pub rsv: [bool; 3],
    /// Frame opcode
    pub opcode: Opcode,
    /// Indicates if the payload is masked on the wire
    pub masked: bool,
    /// Masking key, present iff `masked`
    pub mask: Option<[u8; MASKING_KEY_LEN]>,
    /// Unmasked payload data
    pub payload: Bytes,
}

impl Frame {
    /// Create a new unmasked final frame with the given opcode and payload
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            fin: true,
            rsv: [false; 3],
            opcode,
            masked: false,
            mask: None,
            payload: payload.into(),
        }
    }

    /// Create a text frame
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Text, payload)
    }

    /// Create a binary frame
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Binary, payload)
    }

    /// Create an empty close frame
    pub fn close() -> Self {
        Self::new(Opcode::Close, Bytes::new())
    }

    /// Create a ping frame
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Ping, payload)
    }

    /// Create a pong frame
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(Opcode::Pong, payload)
    }

    /// Mask the frame with an explicit key, or unmask it with `None`
    pub fn with_mask(mut self, key: Option<[u8; MASKING_KEY_LEN]>) -> Self {
        self.masked = key.is_some();
        self.mask = key;
        self
    }

    /// Mask the frame with a freshly generated key
    pub fn masked(self) -> Self {
        self.with_mask(Some(generate_mask()))
    }

    /// Serialize the frame to bytes
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Write the frame to a buffer
    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        let encoding = LengthEncoding::for_len(self.payload.len())?;
        buf.reserve(2 + encoding.extension_len() + MASKING_KEY_LEN + self.payload.len());

        let first_byte = ((self.fin as u8) << 7)
            | ((self.rsv[0] as u8) << 6)
            | ((self.rsv[1] as u8) << 5)
            | ((self.rsv[2] as u8) << 4)
            | self.opcode.value();
        buf.put_u8(first_byte);

        let mask_bit = if self.mask.is_some() { MASK_BIT } else { 0 };
        match encoding {
            LengthEncoding::Normal(len) => buf.put_u8(mask_bit | len),
            LengthEncoding::Extend16(len) => {
                buf.put_u8(mask_bit | PAYLOAD_LEN_16);
                buf.put_u16(len);
            }
            LengthEncoding::Extend64(len) => {
                buf.put_u8(mask_bit | PAYLOAD_LEN_64);
                buf.put_u64(len);
            }
        }

        match self.mask {
            Some(key) => {
                buf.put_slice(&key);
                let start = buf.len();
                buf.put_slice(&self.payload);
                apply_mask_in_place(key, &mut buf[start..]);
            }
            None => buf.put_slice(&self.payload),
        }

        Ok(())
    }

    /// Parse one frame from the front of `buf`, returning it with the number
    /// of bytes it occupied.
    pub fn parse(buf: &[u8], limits: &ParseLimits) -> Result<(Self, usize)> {
        let header = FrameHeader::parse(buf, limits)?;
        let start = header.header_len;
        let end = start + header.payload_len;

        let mut payload = BytesMut::from(&buf[start..end]);
        if let Some(key) = header.mask {
            apply_mask_in_place(key, &mut payload);
        }

        Ok((header.into_frame(payload.freeze()), end))
    }

    /// Get the payload length
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Check if this is a control frame
    pub fn is_control(&self) -> bool {
        self.opcode.is_control()
    }

    /// Check if this is a data frame
    pub fn is_data(&self) -> bool {
        self.opcode.is_data()
    }
}

/// Decode the frame at the front of `bytes`.
///
/// Masked and unmasked frames are both accepted; role-specific masking
/// rules live in [`FrameParser`].
pub fn decode(bytes: &[u8]) -> Result<Frame> {
    Frame::parse(bytes, &ParseLimits::default()).map(|(frame, _)| frame)
}

/// Encode `payload` as a single final frame.
///
/// A random key is generated when `masked` is set; servers send unmasked.
pub fn encode(payload: &[u8], opcode: Opcode, masked: bool) -> Result<Bytes> {
    let key = if masked { Some(generate_mask()) } else { None };
    encode_with_mask(payload, opcode, key)
}

/// Encode `payload` as a single final frame with an explicit masking key.
pub fn encode_with_mask(
    payload: &[u8],
    opcode: Opcode,
    key: Option<[u8; MASKING_KEY_LEN]>,
) -> Result<Bytes> {
    Frame::new(opcode, Bytes::copy_from_slice(payload))
        .with_mask(key)
        .to_bytes()
}

/// How the payload length is carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthEncoding {
    /// 0..=125, in the 7-bit field itself
    Normal(u8),
    /// 126..=65535, marker 126 plus a 16-bit extension
    Extend16(u16),
    /// 65536..=2^63-1, marker 127 plus a 64-bit extension
    Extend64(u64),
}

impl LengthEncoding {
    /// Select the encoding for a payload of `len` bytes
    pub fn for_len(len: usize) -> Result<Self> {
        let wide = u64::try_from(len).map_err(|_| Error::UnrepresentableLength { len })?;
        if wide > MAX_PAYLOAD_LEN_64 {
            return Err(Error::UnrepresentableLength { len });
        }

        Ok(if len <= PAYLOAD_LEN_MAX_NORMAL as usize {
            LengthEncoding::Normal(len as u8)
        } else if len <= u16::MAX as usize {
            LengthEncoding::Extend16(len as u16)
        } else {
            LengthEncoding::Extend64(wide)
        })
    }

    /// The payload length this encoding carries
    pub fn payload_len(&self) -> u64 {
        match *self {
            LengthEncoding::Normal(len) => len as u64,
            LengthEncoding::Extend16(len) => len as u64,
            LengthEncoding::Extend64(len) => len,
        }
    }

    /// Bytes of extended length following the 7-bit field
    pub fn extension_len(&self) -> usize {
        match self {
            LengthEncoding::Normal(_) => 0,
            LengthEncoding::Extend16(_) => 2,
            LengthEncoding::Extend64(_) => 8,
        }
    }
}

/// Decode-time limits and role rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseLimits {
    /// Reject frames that arrive without a masking key
    pub require_mask: bool,
    /// Largest accepted payload
    pub max_frame_size: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            require_mask: false,
            max_frame_size: usize::MAX,
        }
    }
}

impl ParseLimits {
    /// Limits for the server role: client frames must be masked
    pub fn server(max_frame_size: usize) -> Self {
        Self {
            require_mask: true,
            max_frame_size,
        }
    }
}

/// A validated frame header whose payload is fully present in the buffer
#[derive(Debug)]
struct FrameHeader {
    fin: bool,
    rsv: [bool; 3],
    opcode: Opcode,
    mask: Option<[u8; MASKING_KEY_LEN]>,
    header_len: usize,
    payload_len: usize,
}

impl FrameHeader {
    fn parse(buf: &[u8], limits: &ParseLimits) -> Result<Self> {
        let have = buf.len();
        if have < 2 {
            return Err(FrameError::Incomplete { needed: 2, have }.into());
        }

        let mut cursor = buf;

        let first_byte = cursor.get_u8();
        let fin = (first_byte & FIN_BIT) != 0;
        let rsv = [
            (first_byte & RSV1_BIT) != 0,
            (first_byte & RSV2_BIT) != 0,
            (first_byte & RSV3_BIT) != 0,
        ];
        let opcode = Opcode::from(first_byte & OPCODE_MASK)
            .ok_or(FrameError::InvalidOpcode(first_byte & OPCODE_MASK))?;
        if rsv.iter().any(|&bit| bit) {
            return Err(FrameError::ReservedBitsSet.into());
        }

        let second_byte = cursor.get_u8();
        let masked = (second_byte & MASK_BIT) != 0;
        if limits.require_mask && !masked {
            return Err(FrameError::Unmasked.into());
        }

        let len_field = second_byte & PAYLOAD_LEN_MASK;
        let extension_len = match len_field {
            PAYLOAD_LEN_16 => 2,
            PAYLOAD_LEN_64 => 8,
            _ => 0,
        };
        let mask_len = if masked { MASKING_KEY_LEN } else { 0 };
        let header_len = 2 + extension_len + mask_len;
        if have < header_len {
            return Err(FrameError::Incomplete {
                needed: header_len,
                have,
            }
            .into());
        }

        let wide_len = match len_field {
            PAYLOAD_LEN_16 => cursor.get_u16() as u64,
            PAYLOAD_LEN_64 => {
                let len = cursor.get_u64();
                if len > MAX_PAYLOAD_LEN_64 {
                    return Err(FrameError::InvalidLength(len).into());
                }
                len
            }
            len => len as u64,
        };

        if opcode.is_control() {
            if !fin {
                return Err(FrameError::FragmentedControlFrame.into());
            }
            if wide_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(FrameError::ControlFrameTooLarge(wide_len as usize).into());
            }
        }

        let payload_len = usize::try_from(wide_len)
            .ok()
            .filter(|&len| len <= limits.max_frame_size)
            .ok_or(FrameError::TooLarge {
                size: wide_len,
                max: limits.max_frame_size,
            })?;

        let mask = if masked {
            let mut key = [0u8; MASKING_KEY_LEN];
            cursor.copy_to_slice(&mut key);
            Some(key)
        } else {
            None
        };

        let needed = header_len
            .checked_add(payload_len)
            .ok_or(FrameError::TooLarge {
                size: wide_len,
                max: limits.max_frame_size,
            })?;
        if have < needed {
            return Err(FrameError::Incomplete { needed, have }.into());
        }

        Ok(Self {
            fin,
            rsv,
            opcode,
            mask,
            header_len,
            payload_len,
        })
    }

    fn into_frame(self, payload: Bytes) -> Frame {
        Frame {
            fin: self.fin,
            rsv: self.rsv,
            opcode: self.opcode,
            masked: self.mask.is_some(),
            mask: self.mask,
            payload,
        }
    }
}

/// Frame parser for incremental parsing
///
/// Bytes are appended with [`feed`](Self::feed) as they arrive; complete
/// frames are taken off the front with [`next_frame`](Self::next_frame).
#[derive(Debug)]
pub struct FrameParser {
    /// Buffer for partial frame data
    buffer: BytesMut,
    /// Role rules and size bound
    limits: ParseLimits,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(ParseLimits::default())
    }
}

impl FrameParser {
    /// Create a new frame parser
    pub fn new(limits: ParseLimits) -> Self {
        Self {
            buffer: BytesMut::new(),
            limits,
        }
    }

    /// Create a parser for the server role
    pub fn server(max_frame_size: usize) -> Self {
        Self::new(ParseLimits::server(max_frame_size))
    }

    /// Append received bytes
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Take the next complete frame off the buffer.
    ///
    /// Returns `Ok(None)` while the buffered frame is incomplete. A malformed
    /// frame clears the buffer; there is no resynchronization.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        let header = match FrameHeader::parse(&self.buffer, &self.limits) {
            Ok(header) => header,
            Err(Error::MalformedFrame(FrameError::Incomplete { .. })) => return Ok(None),
            Err(e) => {
                self.buffer.clear();
                return Err(e);
            }
        };

        let mut raw = self.buffer.split_to(header.header_len + header.payload_len);
        raw.advance(header.header_len);
        if let Some(key) = header.mask {
            apply_mask_in_place(key, &mut raw);
        }

        Ok(Some(header.into_frame(raw.freeze())))
    }

    /// Get the number of bytes currently buffered
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 4] = [0x37, 0xFA, 0x21, 0x3D];

    #[test]
    fn test_text_frame_serialization() {
        let bytes = encode(b"hello", Opcode::Text, false).unwrap();

        assert_eq!(bytes[0], 0x81); // FIN=1, RSV=000, Opcode=0001
        assert_eq!(bytes[1], 0x05); // MASK=0, Length=5
        assert_eq!(&bytes[2..], b"hello");
    }

    #[test]
    fn test_masked_frame_layout() {
        let bytes = encode_with_mask(b"Hello", Opcode::Text, Some(KEY)).unwrap();

        // RFC 6455 Section 5.7
        assert_eq!(
            &bytes[..],
            &[0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58]
        );
    }

    #[test]
    fn test_decode_masked_rfc_example() {
        let wire = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        let frame = decode(&wire).unwrap();

        assert!(frame.fin);
        assert!(frame.masked);
        assert_eq!(frame.mask, Some(KEY));
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(frame.payload, "Hello");
    }

    #[test]
    fn test_length_encoding_boundaries() {
        assert_eq!(LengthEncoding::for_len(0).unwrap(), LengthEncoding::Normal(0));
        assert_eq!(LengthEncoding::for_len(125).unwrap(), LengthEncoding::Normal(125));
        assert_eq!(LengthEncoding::for_len(126).unwrap(), LengthEncoding::Extend16(126));
        assert_eq!(
            LengthEncoding::for_len(65535).unwrap(),
            LengthEncoding::Extend16(65535)
        );
        assert_eq!(
            LengthEncoding::for_len(65536).unwrap(),
            LengthEncoding::Extend64(65536)
        );
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_unrepresentable_length() {
        let err = LengthEncoding::for_len(usize::MAX).unwrap_err();
        assert!(matches!(err, Error::UnrepresentableLength { len } if len == usize::MAX));
        assert!(LengthEncoding::for_len(i64::MAX as usize).is_ok());
    }

    #[test]
    fn test_encoded_header_by_size() {
        let cases: [(usize, u8, usize); 4] = [
            (125, 125, 2),
            (126, PAYLOAD_LEN_16, 4),
            (65535, PAYLOAD_LEN_16, 4),
            (65536, PAYLOAD_LEN_64, 10),
        ];
        for (len, marker, header_len) in cases {
            let payload = vec![0xAB; len];
            let bytes = encode(&payload, Opcode::Binary, false).unwrap();
            assert_eq!(bytes[1] & PAYLOAD_LEN_MASK, marker, "len {}", len);
            assert_eq!(bytes.len(), header_len + len);

            let frame = decode(&bytes).unwrap();
            assert_eq!(frame.payload_len(), len);
        }
    }

    #[test]
    fn test_large_frame_header() {
        let payload = vec![0u8; 65536];
        let bytes = encode(&payload, Opcode::Binary, false).unwrap();

        assert_eq!(bytes[1], 127);
        assert_eq!(bytes[2..10], (65536u64).to_be_bytes());
    }

    #[test]
    fn test_unmasked_extend64_uses_64_bit_length() {
        let mut wire = vec![0x82, 127];
        wire.extend_from_slice(&70_000u64.to_be_bytes());
        wire.extend(std::iter::repeat(7u8).take(70_000));

        let frame = decode(&wire).unwrap();
        assert!(!frame.masked);
        assert_eq!(frame.payload_len(), 70_000);
    }

    #[test]
    fn test_masked_extend16_round_trip() {
        let payload: Vec<u8> = (0..300u16).map(|i| i as u8).collect();
        let bytes = encode_with_mask(&payload, Opcode::Binary, Some(KEY)).unwrap();
        assert_eq!(bytes[1], MASK_BIT | PAYLOAD_LEN_16);

        let frame = decode(&bytes).unwrap();
        assert_eq!(&frame.payload[..], &payload[..]);
    }

    #[test]
    fn test_reserved_bits_rejected() {
        for rsv in [RSV1_BIT, RSV2_BIT, RSV3_BIT] {
            let wire = [0x81 | rsv, 0x00];
            let err = decode(&wire).unwrap_err();
            assert!(matches!(err, Error::MalformedFrame(FrameError::ReservedBitsSet)));
        }
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        for opcode in [0x3u8, 0x7, 0xB, 0xF] {
            let wire = [0x80 | opcode, 0x00];
            let err = decode(&wire).unwrap_err();
            assert!(matches!(
                err,
                Error::MalformedFrame(FrameError::InvalidOpcode(op)) if op == opcode
            ));
        }
    }

    #[test]
    fn test_short_buffers_are_incomplete() {
        assert!(decode(&[]).unwrap_err().is_incomplete());
        assert!(decode(&[0x81]).unwrap_err().is_incomplete());
        // 16-bit extension missing
        assert!(decode(&[0x82, 126, 0x01]).unwrap_err().is_incomplete());
        // mask key missing
        assert!(decode(&[0x81, 0x85, 0x37]).unwrap_err().is_incomplete());
        // payload short
        assert!(decode(&[0x81, 0x05, b'h', b'e']).unwrap_err().is_incomplete());
    }

    #[test]
    fn test_64_bit_length_with_msb_set() {
        let mut wire = vec![0x82, 127];
        wire.extend_from_slice(&(1u64 << 63).to_be_bytes());
        let err = decode(&wire).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(FrameError::InvalidLength(_))));
    }

    #[test]
    fn test_control_frame_rules() {
        // ping without FIN
        let err = decode(&[0x09, 0x00]).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(FrameError::FragmentedControlFrame)));

        // ping announcing 126 bytes
        let err = decode(&[0x89, 126, 0x00, 0x7E]).unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(FrameError::ControlFrameTooLarge(126))));
    }

    #[test]
    fn test_parser_requires_mask_for_server_role() {
        let mut parser = FrameParser::server(1024);
        parser.feed(&encode(b"hi", Opcode::Text, false).unwrap());

        let err = parser.next_frame().unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(FrameError::Unmasked)));
        assert_eq!(parser.buffered_bytes(), 0);
    }

    #[test]
    fn test_parser_enforces_max_frame_size() {
        let mut parser = FrameParser::server(16);
        parser.feed(&encode(&[0u8; 17], Opcode::Binary, true).unwrap());

        let err = parser.next_frame().unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedFrame(FrameError::TooLarge { size: 17, max: 16 })
        ));
    }

    #[test]
    fn test_frame_parser() {
        let mut parser = FrameParser::server(1024);

        let bytes1 = encode(b"frame1", Opcode::Text, true).unwrap();
        let bytes2 = encode(b"ping", Opcode::Ping, true).unwrap();

        // Feed partial data
        parser.feed(&bytes1[..5]);
        assert!(parser.next_frame().unwrap().is_none());
        assert_eq!(parser.buffered_bytes(), 5);

        // Feed remaining data plus the whole second frame
        parser.feed(&bytes1[5..]);
        parser.feed(&bytes2);

        let first = parser.next_frame().unwrap().unwrap();
        assert!(first.is_data());
        assert_eq!(first.payload, "frame1");

        let second = parser.next_frame().unwrap().unwrap();
        assert!(second.is_control());
        assert_eq!(second.payload, "ping");

        assert!(parser.next_frame().unwrap().is_none());
        assert_eq!(parser.buffered_bytes(), 0);
    }

    #[test]
    fn test_parser_byte_at_a_time() {
        let wire = encode_with_mask(b"fragmented input", Opcode::Text, Some(KEY)).unwrap();
        let mut parser = FrameParser::server(1024);

        let mut frames = Vec::new();
        for byte in wire.iter() {
            parser.feed(std::slice::from_ref(byte));
            if let Some(frame) = parser.next_frame().unwrap() {
                frames.push(frame);
            }
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload, "fragmented input");
    }
}
