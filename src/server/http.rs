//! Just enough HTTP/1.1 for a JSON API: one request per connection.

use std::io::{self, BufRead, BufReader, Read, Write};

use serde::Serialize;
use url::Url;

/// Cap on the request line plus headers.
const MAX_HEAD_BYTES: usize = 16 * 1024;

#[derive(Debug, thiserror::Error)]
pub(crate) enum HttpError {
    #[error("Malformed request: {0}")]
    Malformed(String),
    #[error("Request headers too large")]
    HeadTooLarge,
    #[error("Request body of {length} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge { length: usize, limit: usize },
    #[error("Connection error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Request {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Request {
    /// Last value of a query parameter; empty values count as absent.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .rev()
            .find(|(key, value)| key == name && !value.is_empty())
            .map(|(_, value)| value.as_str())
    }
}

/// Read one request, refusing bodies larger than `max_body_bytes`.
pub(crate) fn read_request(stream: impl Read, max_body_bytes: usize) -> Result<Request, HttpError> {
    let mut reader = BufReader::new(stream);
    let mut head_bytes = 0usize;

    let request_line = read_line(&mut reader, &mut head_bytes)?;
    if request_line.is_empty() {
        return Err(HttpError::Malformed("empty request".to_string()));
    }
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(HttpError::Malformed(format!("bad request line: {request_line}")));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(HttpError::Malformed(format!("unsupported version {version}")));
    }
    let method = method.to_ascii_uppercase();
    let target = parse_target(target)?;

    let mut content_length = 0usize;
    loop {
        let line = read_line(&mut reader, &mut head_bytes)?;
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(HttpError::Malformed(format!("bad header: {line}")));
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value
                .parse()
                .map_err(|_| HttpError::Malformed(format!("bad Content-Length: {value}")))?;
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            return Err(HttpError::Malformed(
                "chunked request bodies are not supported".to_string(),
            ));
        }
    }
    if content_length > max_body_bytes {
        return Err(HttpError::BodyTooLarge {
            length: content_length,
            limit: max_body_bytes,
        });
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;

    Ok(Request {
        method,
        path: target.path().to_string(),
        query: target
            .query_pairs()
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect(),
        body,
    })
}

fn parse_target(target: &str) -> Result<Url, HttpError> {
    if !target.starts_with('/') {
        return Err(HttpError::Malformed(format!("bad request target: {target}")));
    }
    Url::parse(&format!("http://localhost{target}"))
        .map_err(|err| HttpError::Malformed(format!("bad request target {target}: {err}")))
}

fn read_line(reader: &mut impl BufRead, head_bytes: &mut usize) -> Result<String, HttpError> {
    let remaining = MAX_HEAD_BYTES.saturating_sub(*head_bytes);
    let mut raw = Vec::new();
    let read = reader
        .take(remaining as u64 + 1)
        .read_until(b'\n', &mut raw)?;
    *head_bytes += read;
    if *head_bytes > MAX_HEAD_BYTES {
        return Err(HttpError::HeadTooLarge);
    }
    if read > 0 && !raw.ends_with(b"\n") {
        return Err(HttpError::Malformed("truncated request head".to_string()));
    }
    let line = String::from_utf8(raw)
        .map_err(|_| HttpError::Malformed("request head is not UTF-8".to_string()))?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Response {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn json(status: u16, body: &impl Serialize) -> Self {
        match serde_json::to_vec(body) {
            Ok(body) => Self {
                status,
                headers: Vec::new(),
                body,
            },
            Err(err) => {
                tracing::error!("Failed to encode response body: {err}");
                Self {
                    status: 500,
                    headers: Vec::new(),
                    body: br#"{"error":"Failed to encode response"}"#.to_vec(),
                }
            }
        }
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn write_to(&self, mut stream: impl Write) -> io::Result<()> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n",
            self.status,
            reason_phrase(self.status),
            self.body.len()
        );
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        head.push_str("\r\n");
        stream.write_all(head.as_bytes())?;
        stream.write_all(&self.body)?;
        stream.flush()
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<Request, HttpError> {
        read_request(raw.as_bytes(), 64)
    }

    #[test]
    fn parses_request_line_query_and_body() {
        let request = parse(
            "POST /api/reviews/verify?x=1&label=A%20B HTTP/1.1\r\nHost: localhost\r\ncontent-length: 4\r\n\r\nbody",
        )
        .unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/api/reviews/verify");
        assert_eq!(request.query_param("label"), Some("A B"));
        assert_eq!(request.body, b"body");
    }

    #[test]
    fn empty_query_values_are_absent() {
        let request = parse("GET /api/reviews?page=&label=x HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(request.query_param("page"), None);
        assert_eq!(request.query_param("label"), Some("x"));
    }

    #[test]
    fn rejects_malformed_heads() {
        for raw in [
            "",
            "GARBAGE\r\n\r\n",
            "GET /x SPDY/3\r\n\r\n",
            "GET x HTTP/1.1\r\n\r\n",
            "GET /x HTTP/1.1\r\nno-colon\r\n\r\n",
            "POST /x HTTP/1.1\r\nContent-Length: nope\r\n\r\n",
            "POST /x HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n",
        ] {
            assert!(
                matches!(parse(raw), Err(HttpError::Malformed(_))),
                "{raw:?}"
            );
        }
    }

    #[test]
    fn rejects_oversized_body_before_reading_it() {
        let err = parse("POST /x HTTP/1.1\r\nContent-Length: 65\r\n\r\n").unwrap_err();
        assert!(matches!(err, HttpError::BodyTooLarge { length: 65, limit: 64 }));
    }

    #[test]
    fn rejects_oversized_head() {
        let raw = format!("GET /x HTTP/1.1\r\nX-Fill: {}\r\n\r\n", "a".repeat(MAX_HEAD_BYTES));
        let err = read_request(raw.as_bytes(), 64).unwrap_err();
        assert!(matches!(err, HttpError::HeadTooLarge));
    }

    #[test]
    fn response_carries_no_store_and_extra_headers() {
        let response = Response::json(502, &serde_json::json!({"error": "Upstream error"}))
            .with_header("X-Data-Source", "live");
        let mut out = Vec::new();
        response.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
        assert!(text.contains("Cache-Control: no-store\r\n"));
        assert!(text.contains("X-Data-Source: live\r\n"));
        assert!(text.ends_with(r#"{"error":"Upstream error"}"#));
    }
}
