use serde_json::Value;
use std::io::{self, Write};

use crate::dispatcher::HandlerResponse;

fn status_reason(status: u16) -> &'static str {
    match status {
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

/// Write a handler response. String bodies go out as `text/plain`, all
/// other JSON values as `application/json`.
pub fn write_response(
    writer: &mut impl Write,
    response: &HandlerResponse,
    keep_alive: bool,
) -> io::Result<()> {
    let (content_type, body) = match &response.body {
        Value::String(s) => ("text/plain; charset=utf-8", s.clone().into_bytes()),
        Value::Null => ("application/json", Vec::new()),
        other => ("application/json", other.to_string().into_bytes()),
    };

    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n",
        response.status,
        status_reason(response.status),
        content_type,
        body.len()
    );
    for (name, value) in &response.headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str(if keep_alive {
        "Connection: keep-alive\r\n\r\n"
    } else {
        "Connection: close\r\n\r\n"
    });

    writer.write_all(head.as_bytes())?;
    writer.write_all(&body)?;
    writer.flush()
}

/// Write a 301 redirect to `location`.
pub fn write_redirect(
    writer: &mut impl Write,
    location: &str,
    keep_alive: bool,
) -> io::Result<()> {
    let response = HandlerResponse::new(301, Value::Null).with_header("Location", location);
    write_response(writer, &response, keep_alive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_response_has_length_and_type() {
        let mut wire = Vec::new();
        let resp = HandlerResponse::ok(json!({"ok": true}));
        write_response(&mut wire, &resp, true).unwrap();
        let text = String::from_utf8(wire).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: application/json\r\n"));
        assert!(text.contains("Content-Length: 11\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(text.ends_with("{\"ok\":true}"));
    }

    #[test]
    fn redirect_carries_location() {
        let mut wire = Vec::new();
        write_redirect(&mut wire, "/a/b", false).unwrap();
        let text = String::from_utf8(wire).unwrap();
        assert!(text.starts_with("HTTP/1.1 301 Moved Permanently\r\n"));
        assert!(text.contains("Location: /a/b\r\n"));
        assert!(text.contains("Connection: close\r\n"));
    }
}
