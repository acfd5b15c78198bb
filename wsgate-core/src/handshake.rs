//! WebSocket opening handshake (RFC 6455 Section 4.2)
//!
//! The server side only: [`HandshakeProcessor`] reads the HTTP upgrade
//! request incrementally and bounded in size, [`validate`] checks the
//! required headers, and [`render_response`] produces the `101` reply.

use crate::error::{Error, HandshakeError, HandshakeErrorKind, Result};
use crate::protocol::constants::{
    DEFAULT_MAX_HANDSHAKE_SIZE, WEBSOCKET_MAGIC, WEBSOCKET_VERSION,
};
use base64::{engine::general_purpose, Engine as _};
use bytes::BytesMut;
use sha1::{Digest, Sha1};
use std::collections::HashMap;

/// Required request header names, as they appear in error messages
pub mod header {
    /// `Upgrade`
    pub const UPGRADE: &str = "Upgrade";
    /// `Connection`
    pub const CONNECTION: &str = "Connection";
    /// `Sec-WebSocket-Key`
    pub const SEC_WEBSOCKET_KEY: &str = "Sec-WebSocket-Key";
    /// `Sec-WebSocket-Version`
    pub const SEC_WEBSOCKET_VERSION: &str = "Sec-WebSocket-Version";
}

/// Request line and headers of one upgrade request
///
/// Header names are matched case-insensitively; values are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeHeaders {
    method: String,
    path: String,
    version: String,
    headers: HashMap<String, String>,
}

impl HandshakeHeaders {
    /// HTTP method from the request line
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Requested path from the request line
    pub fn path(&self) -> &str {
        &self.path
    }

    /// HTTP version from the request line
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Look up a header value by case-insensitive name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Number of distinct headers
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// True when no header has been read
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Record a header; repeated names are joined with `, `
    pub fn insert(&mut self, name: &str, value: &str) {
        self.headers
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    fn set_request_line(&mut self, method: &str, path: &str, version: &str) {
        self.method = method.to_string();
        self.path = path.to_string();
        self.version = version.to_string();
    }
}

/// Incremental reader for the upgrade request head
///
/// Feed it bytes as they arrive; it yields the headers once the blank line
/// is seen. Anything after the blank line is kept for the frame parser.
#[derive(Debug)]
pub struct HandshakeProcessor {
    buffer: BytesMut,
    headers: HandshakeHeaders,
    request_line_seen: bool,
    consumed: usize,
    max_size: usize,
    complete: bool,
}

impl Default for HandshakeProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HANDSHAKE_SIZE)
    }
}

impl HandshakeProcessor {
    /// Create a processor accepting at most `max_size` bytes of request head
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            headers: HandshakeHeaders::default(),
            request_line_seen: false,
            consumed: 0,
            max_size,
            complete: false,
        }
    }

    /// Append received bytes and process every complete line.
    ///
    /// Returns the headers once the terminating blank line has been read.
    pub fn feed(&mut self, data: &[u8]) -> Result<Option<HandshakeHeaders>> {
        self.buffer.extend_from_slice(data);
        if self.complete {
            return Ok(None);
        }

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw = self.buffer.split_to(pos + 1);
            self.consumed += raw.len();
            if self.consumed > self.max_size {
                return Err(self.too_large());
            }

            let line = trim_line_ending(&raw);
            let line = std::str::from_utf8(line).map_err(|_| {
                self.fail(HandshakeErrorKind::MalformedHeader, &raw)
            })?;

            if line.is_empty() {
                // RFC 7230 Section 3.5: ignore blank lines before the request line
                if !self.request_line_seen {
                    continue;
                }
                self.complete = true;
                return Ok(Some(std::mem::take(&mut self.headers)));
            }

            if self.request_line_seen {
                self.header_line(line)?;
            } else {
                self.request_line(line)?;
            }
        }

        if self.consumed + self.buffer.len() > self.max_size {
            return Err(self.too_large());
        }

        Ok(None)
    }

    /// Whether the blank line has been read
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Bytes received after the end of the request head
    pub fn into_remainder(self) -> BytesMut {
        self.buffer
    }

    /// Error for a stream that ended before the blank line
    pub fn incomplete(&self) -> Error {
        HandshakeError::new(HandshakeErrorKind::Incomplete, self.headers.clone()).into()
    }

    fn request_line(&mut self, line: &str) -> Result<()> {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(path), Some(version), None) if version.starts_with("HTTP/") => {
                self.headers.set_request_line(method, path, version);
                self.request_line_seen = true;
                Ok(())
            }
            _ => Err(self.fail(HandshakeErrorKind::MalformedRequestLine, line.as_bytes())),
        }
    }

    fn header_line(&mut self, line: &str) -> Result<()> {
        let well_formed = line
            .split_once(':')
            .filter(|(name, _)| !name.is_empty() && !name.contains(char::is_whitespace));
        match well_formed {
            Some((name, value)) => {
                self.headers.insert(name, value.trim());
                Ok(())
            }
            None => Err(self.fail(HandshakeErrorKind::MalformedHeader, line.as_bytes())),
        }
    }

    fn fail(&self, kind: HandshakeErrorKind, input: &[u8]) -> Error {
        HandshakeError::new(kind, self.headers.clone())
            .with_input(String::from_utf8_lossy(input))
            .into()
    }

    fn too_large(&self) -> Error {
        HandshakeError::new(
            HandshakeErrorKind::TooLarge { max: self.max_size },
            self.headers.clone(),
        )
        .into()
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Validate an upgrade request, returning the client's `Sec-WebSocket-Key`.
pub fn validate(headers: &HandshakeHeaders) -> Result<&str> {
    if headers.method() != "GET" {
        return Err(reject(
            headers,
            HandshakeErrorKind::InvalidMethod(headers.method().to_string()),
        ));
    }

    let upgrade = required(headers, header::UPGRADE)?;
    if !upgrade.trim().eq_ignore_ascii_case("websocket") {
        return Err(invalid(headers, header::UPGRADE, upgrade));
    }

    let connection = required(headers, header::CONNECTION)?;
    if !connection
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
    {
        return Err(invalid(headers, header::CONNECTION, connection));
    }

    let version = required(headers, header::SEC_WEBSOCKET_VERSION)?;
    if version.trim() != WEBSOCKET_VERSION {
        return Err(invalid(headers, header::SEC_WEBSOCKET_VERSION, version));
    }

    let key = required(headers, header::SEC_WEBSOCKET_KEY)?;
    if key.is_empty() {
        return Err(reject(
            headers,
            HandshakeErrorKind::MissingHeader(header::SEC_WEBSOCKET_KEY),
        ));
    }
    // Repeated key headers are joined by `insert`; only one is allowed
    if key.contains(',') {
        return Err(invalid(headers, header::SEC_WEBSOCKET_KEY, key));
    }

    Ok(key)
}

fn required<'h>(headers: &'h HandshakeHeaders, name: &'static str) -> Result<&'h str> {
    headers
        .get(name)
        .ok_or_else(|| reject(headers, HandshakeErrorKind::MissingHeader(name)))
}

fn invalid(headers: &HandshakeHeaders, name: &'static str, value: &str) -> Error {
    reject(
        headers,
        HandshakeErrorKind::InvalidHeaderValue {
            header: name,
            value: value.to_string(),
        },
    )
}

fn reject(headers: &HandshakeHeaders, kind: HandshakeErrorKind) -> Error {
    HandshakeError::new(kind, headers.clone()).into()
}

/// Compute the `Sec-WebSocket-Accept` value for a client key
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_MAGIC.as_bytes());
    general_purpose::STANDARD.encode(hasher.finalize())
}

/// Render the `101 Switching Protocols` response
pub fn render_response(accept_key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: upgrade\r\n\
         Sec-Websocket-Accept: {}\r\n\
         \r\n",
        accept_key
    )
}

/// Validate a request and render its `101` response in one step
pub fn upgrade_response(headers: &HandshakeHeaders) -> Result<String> {
    let key = validate(headers)?;
    Ok(render_response(&compute_accept_key(key)))
}

/// Render the best-effort `400 Bad Request` sent when an upgrade is refused
pub fn render_bad_request(reason: &str) -> String {
    format!(
        "HTTP/1.1 400 Bad Request\r\n\
         Content-Type: text/plain\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         Sec-WebSocket-Version: {}\r\n\
         \r\n\
         {}",
        reason.len(),
        WEBSOCKET_VERSION,
        reason
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

    fn request(extra: &[(&str, &str)]) -> String {
        let mut raw = String::from("GET /chat HTTP/1.1\r\nHost: example.com\r\n");
        for (name, value) in extra {
            raw.push_str(&format!("{}: {}\r\n", name, value));
        }
        raw.push_str("\r\n");
        raw
    }

    fn valid_request() -> String {
        request(&[
            ("Upgrade", "websocket"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Key", SAMPLE_KEY),
            ("Sec-WebSocket-Version", "13"),
        ])
    }

    fn parse(raw: &str) -> HandshakeHeaders {
        HandshakeProcessor::default()
            .feed(raw.as_bytes())
            .unwrap()
            .expect("complete request")
    }

    fn kind_of(err: Error) -> HandshakeErrorKind {
        match err {
            Error::HandshakeFailed(e) => e.kind,
            other => panic!("expected HandshakeFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_accept_key_calculation() {
        assert_eq!(compute_accept_key(SAMPLE_KEY), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_response_is_byte_exact() {
        let headers = parse(&valid_request());
        let response = upgrade_response(&headers).unwrap();
        assert_eq!(
            response,
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: upgrade\r\n\
             Sec-Websocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
             \r\n"
        );
    }

    #[test]
    fn test_request_parsing() {
        let headers = parse(&valid_request());
        assert_eq!(headers.method(), "GET");
        assert_eq!(headers.path(), "/chat");
        assert_eq!(headers.version(), "HTTP/1.1");
        assert_eq!(headers.get("upgrade"), Some("websocket"));
        assert_eq!(headers.get("SEC-WEBSOCKET-KEY"), Some(SAMPLE_KEY));
        assert_eq!(headers.len(), 5);
    }

    #[test]
    fn test_header_values_are_case_insensitive() {
        let headers = parse(&request(&[
            ("upgrade", "WebSocket"),
            ("connection", "keep-alive, Upgrade"),
            ("sec-websocket-key", SAMPLE_KEY),
            ("sec-websocket-version", "13"),
        ]));
        assert_eq!(validate(&headers).unwrap(), SAMPLE_KEY);
    }

    #[test]
    fn test_rejects_wrong_version() {
        let headers = parse(&request(&[
            ("Upgrade", "websocket"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Key", SAMPLE_KEY),
            ("Sec-WebSocket-Version", "8"),
        ]));
        assert_eq!(
            kind_of(validate(&headers).unwrap_err()),
            HandshakeErrorKind::InvalidHeaderValue {
                header: header::SEC_WEBSOCKET_VERSION,
                value: "8".to_string(),
            }
        );
    }

    #[test]
    fn test_rejects_missing_key() {
        let headers = parse(&request(&[
            ("Upgrade", "websocket"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Version", "13"),
        ]));
        assert_eq!(
            kind_of(validate(&headers).unwrap_err()),
            HandshakeErrorKind::MissingHeader(header::SEC_WEBSOCKET_KEY)
        );
    }

    #[test]
    fn test_rejects_repeated_key() {
        let headers = parse(&request(&[
            ("Upgrade", "websocket"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Key", SAMPLE_KEY),
            ("Sec-WebSocket-Key", "AQIDBAUGBwgJCgsMDQ4PEA=="),
            ("Sec-WebSocket-Version", "13"),
        ]));
        assert_eq!(
            kind_of(validate(&headers).unwrap_err()),
            HandshakeErrorKind::InvalidHeaderValue {
                header: header::SEC_WEBSOCKET_KEY,
                value: format!("{}, AQIDBAUGBwgJCgsMDQ4PEA==", SAMPLE_KEY),
            }
        );
        assert!(upgrade_response(&headers).is_err());
    }

    #[test]
    fn test_rejects_non_websocket_upgrade() {
        let headers = parse(&request(&[
            ("Upgrade", "h2c"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Key", SAMPLE_KEY),
            ("Sec-WebSocket-Version", "13"),
        ]));
        assert!(matches!(
            kind_of(validate(&headers).unwrap_err()),
            HandshakeErrorKind::InvalidHeaderValue { header: "Upgrade", .. }
        ));
    }

    #[test]
    fn test_rejects_post() {
        let raw = valid_request().replacen("GET", "POST", 1);
        let headers = parse(&raw);
        assert_eq!(
            kind_of(validate(&headers).unwrap_err()),
            HandshakeErrorKind::InvalidMethod("POST".to_string())
        );
    }

    #[test]
    fn test_fragmented_feed_and_remainder() {
        let mut raw = valid_request().into_bytes();
        raw.extend_from_slice(&[0x81, 0x80]);

        let mut processor = HandshakeProcessor::default();
        let mut result = None;
        for chunk in raw.chunks(3) {
            if let Some(headers) = processor.feed(chunk).unwrap() {
                result = Some(headers);
            }
        }

        let headers = result.expect("headers complete");
        assert_eq!(headers.path(), "/chat");
        assert!(processor.is_complete());
        assert_eq!(&processor.into_remainder()[..], &[0x81, 0x80]);
    }

    #[test]
    fn test_malformed_header_carries_context() {
        let raw = "GET / HTTP/1.1\r\nHost: a\r\nthis is not a header\r\n\r\n";
        let err = HandshakeProcessor::default().feed(raw.as_bytes()).unwrap_err();
        match err {
            Error::HandshakeFailed(e) => {
                assert_eq!(e.kind, HandshakeErrorKind::MalformedHeader);
                assert_eq!(e.headers.get("host"), Some("a"));
                assert_eq!(e.input.as_deref(), Some("this is not a header"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_malformed_request_line() {
        let err = HandshakeProcessor::default()
            .feed(b"HELLO\r\n")
            .unwrap_err();
        assert_eq!(kind_of(err), HandshakeErrorKind::MalformedRequestLine);
    }

    #[test]
    fn test_oversize_request_rejected() {
        let mut processor = HandshakeProcessor::new(64);
        let mut raw = String::from("GET / HTTP/1.1\r\n");
        raw.push_str(&format!("X-Padding: {}\r\n", "a".repeat(80)));

        let err = processor.feed(raw.as_bytes()).unwrap_err();
        assert_eq!(kind_of(err), HandshakeErrorKind::TooLarge { max: 64 });
    }

    #[test]
    fn test_unterminated_line_counts_toward_limit() {
        let mut processor = HandshakeProcessor::new(32);
        assert!(processor.feed(b"GET / HTTP/1.1\r\n").unwrap().is_none());
        let err = processor.feed(&[b'x'; 40]).unwrap_err();
        assert_eq!(kind_of(err), HandshakeErrorKind::TooLarge { max: 32 });
    }

    #[test]
    fn test_bare_lf_lines_and_leading_blank_line() {
        let raw = "\r\nGET /lf HTTP/1.1\nUpgrade: websocket\n\n";
        let headers = parse(raw);
        assert_eq!(headers.path(), "/lf");
        assert_eq!(headers.get("Upgrade"), Some("websocket"));
    }

    #[test]
    fn test_repeated_headers_are_joined() {
        let headers = parse(&request(&[("Connection", "keep-alive"), ("Connection", "Upgrade")]));
        assert_eq!(headers.get("connection"), Some("keep-alive, Upgrade"));
    }

    #[test]
    fn test_bad_request_rendering() {
        let response = render_bad_request("missing key");
        assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(response.contains("Content-Length: 11\r\n"));
        assert!(response.ends_with("\r\n\r\nmissing key"));
    }
}
