use http::Method;
use std::collections::HashMap;
use std::io::{self, Read};

/// Parsed HTTP/1.1 request head.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// Path without the query string.
    pub path: String,
    /// Raw query string, when present.
    pub raw_query: Option<String>,
    /// Headers with lowercased names; repeated headers join with `, `.
    pub headers: HashMap<String, String>,
    /// True for `HTTP/1.1`, false for `HTTP/1.0`.
    pub http11: bool,
}

impl RequestHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn content_length(&self) -> usize {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }

    /// Whether the connection should close after this exchange.
    pub fn wants_close(&self) -> bool {
        match self.header("connection") {
            Some(v) if v.split(',').any(|t| t.trim().eq_ignore_ascii_case("close")) => true,
            Some(v) if v.split(',').any(|t| t.trim().eq_ignore_ascii_case("keep-alive")) => false,
            _ => !self.http11,
        }
    }

    /// Whether the client asked to switch protocols.
    pub fn is_upgrade(&self) -> bool {
        self.header("upgrade").is_some()
    }
}

/// Decode a raw query string into ordered (name, value) pairs. Repeated
/// keys are preserved in wire order for sequence binding.
pub fn parse_query_params(raw_query: Option<&str>) -> Vec<(String, String)> {
    match raw_query {
        Some(q) => url::form_urlencoded::parse(q.as_bytes())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        None => Vec::new(),
    }
}

const MAX_HEAD_BYTES: usize = 64 * 1024;
const READ_CHUNK: usize = 4096;

/// Buffered reader for one client connection.
///
/// Owns the stream so pipelined bytes read past a request head are kept
/// for the next request (or the body read). The stream can be taken back
/// for protocol upgrades.
pub struct HttpConn<S: Read> {
    stream: S,
    buffer: Vec<u8>,
}

impl<S: Read> HttpConn<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
        }
    }

    /// Read and parse the next request head. `Ok(None)` on a clean EOF
    /// between requests.
    pub fn read_head(&mut self) -> io::Result<Option<RequestHead>> {
        loop {
            if let Some(end) = find_head_end(&self.buffer) {
                let head_bytes: Vec<u8> = self.buffer.drain(..end + 4).collect();
                let head = parse_head(&head_bytes)?;
                return Ok(Some(head));
            }
            if self.buffer.len() > MAX_HEAD_BYTES {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "request head exceeds limit",
                ));
            }
            let mut chunk = [0u8; READ_CHUNK];
            let n = self.stream.read(&mut chunk)?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-request",
                ));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Read exactly `len` body bytes, consuming buffered bytes first.
    pub fn read_body(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut body = Vec::with_capacity(len);
        let buffered = self.buffer.len().min(len);
        body.extend(self.buffer.drain(..buffered));
        while body.len() < len {
            let mut chunk = vec![0u8; (len - body.len()).min(READ_CHUNK)];
            let n = self.stream.read(&mut chunk)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed mid-body",
                ));
            }
            body.extend_from_slice(&chunk[..n]);
        }
        Ok(body)
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Take the stream back for a protocol upgrade.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_head(bytes: &[u8]) -> io::Result<RequestHead> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "request head is not UTF-8"))?;
    let mut lines = text.split("\r\n");

    let request_line = lines
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts
        .next()
        .and_then(|m| m.parse::<Method>().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad request method"))?;
    let target = parts
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "missing request target"))?;
    let version = parts.next().unwrap_or("HTTP/1.1");

    let (path, raw_query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), Some(q.to_string())),
        None => (target.to_string(), None),
    };

    let mut headers: HashMap<String, String> = HashMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "malformed header line",
            ));
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim().to_string();
        headers
            .entry(name)
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    Ok(RequestHead {
        method,
        path,
        raw_query,
        headers,
        http11: version.eq_ignore_ascii_case("HTTP/1.1"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_head_query_and_headers() {
        let wire = b"GET /pets?limit=10&tag=a&tag=b HTTP/1.1\r\nHost: localhost\r\nX-Trace: abc\r\n\r\n";
        let mut conn = HttpConn::new(Cursor::new(wire.to_vec()));
        let head = conn.read_head().unwrap().unwrap();
        assert_eq!(head.method, Method::GET);
        assert_eq!(head.path, "/pets");
        assert_eq!(head.header("x-trace"), Some("abc"));
        assert!(head.http11);
        assert!(!head.wants_close());

        let query = parse_query_params(head.raw_query.as_deref());
        assert_eq!(
            query,
            vec![
                ("limit".to_string(), "10".to_string()),
                ("tag".to_string(), "a".to_string()),
                ("tag".to_string(), "b".to_string()),
            ]
        );
    }

    #[test]
    fn body_bytes_follow_the_head() {
        let wire = b"POST /pets HTTP/1.1\r\nContent-Length: 14\r\n\r\n{\"name\":\"rex\"} trailing";
        let mut conn = HttpConn::new(Cursor::new(wire.to_vec()));
        let head = conn.read_head().unwrap().unwrap();
        assert_eq!(head.content_length(), 14);
        let body = conn.read_body(head.content_length()).unwrap();
        assert_eq!(&body, b"{\"name\":\"rex\"}");
    }

    #[test]
    fn eof_between_requests_is_clean() {
        let mut conn = HttpConn::new(Cursor::new(Vec::new()));
        assert!(conn.read_head().unwrap().is_none());
    }

    #[test]
    fn http10_defaults_to_close() {
        let wire = b"GET / HTTP/1.0\r\n\r\n";
        let mut conn = HttpConn::new(Cursor::new(wire.to_vec()));
        let head = conn.read_head().unwrap().unwrap();
        assert!(head.wants_close());
    }

    #[test]
    fn url_decoding_applies_to_query_values() {
        let query = parse_query_params(Some("q=hello%20world&x=1%2B2"));
        assert_eq!(query[0].1, "hello world");
        assert_eq!(query[1].1, "1+2");
    }
}
