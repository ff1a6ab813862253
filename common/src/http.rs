//! Just enough HTTP/1.1 for a device that answers one client at a time and
//! posts one JSON body per wake-up.

use thiserror::Error;

use crate::{dashboard::render_dashboard, reading::Reading};

pub const MAX_REQUEST_BYTES: usize = 1024;
pub const API_PATH: &str = "/api";
pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_HTML: &str = "text/html; charset=utf-8";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HttpError {
    #[error("malformed request line")]
    MalformedRequestLine,
    #[error("malformed status line")]
    MalformedStatusLine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLine<'a> {
    pub method: &'a str,
    pub target: &'a str,
    pub version: &'a str,
}

impl<'a> RequestLine<'a> {
    pub fn parse(raw: &'a [u8]) -> Result<Self, HttpError> {
        let line = first_line(raw).ok_or(HttpError::MalformedRequestLine)?;
        let mut parts = line.split(' ');

        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(HttpError::MalformedRequestLine);
        };

        if method.is_empty() || !target.starts_with('/') || !version.starts_with("HTTP/") {
            return Err(HttpError::MalformedRequestLine);
        }

        Ok(Self {
            method,
            target,
            version,
        })
    }

    /// Request target without its query string.
    pub fn path(&self) -> &'a str {
        self.target
            .split_once('?')
            .map_or(self.target, |(path, _)| path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Api,
    Dashboard,
}

impl Route {
    /// `GET /api` gets JSON. Everything else, malformed requests included,
    /// gets the dashboard page.
    pub fn from_request(raw: &[u8]) -> Self {
        match RequestLine::parse(raw) {
            Ok(line) if line.method == "GET" && line.path() == API_PATH => Self::Api,
            _ => Self::Dashboard,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub reason: &'static str,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    pub fn ok(content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            reason: "OK",
            content_type,
            body: body.into(),
        }
    }

    pub fn for_route(
        route: Route,
        reading: &Reading,
        refresh_ms: u64,
    ) -> Result<Self, serde_json::Error> {
        Ok(match route {
            Route::Api => Self::ok(CONTENT_TYPE_JSON, serde_json::to_vec(reading)?),
            Route::Dashboard => Self::ok(
                CONTENT_TYPE_HTML,
                render_dashboard(&reading.to_document(), refresh_ms),
            ),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            self.reason,
            self.content_type,
            self.body.len()
        );

        let mut bytes = Vec::with_capacity(head.len() + self.body.len());
        bytes.extend_from_slice(head.as_bytes());
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// A complete `POST` with a JSON body and `Connection: close`.
pub fn post_request(host: &str, path: &str, body: &[u8]) -> Vec<u8> {
    let head = format!(
        "POST {path} HTTP/1.1\r\nHost: {host}\r\nContent-Type: {CONTENT_TYPE_JSON}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let mut bytes = Vec::with_capacity(head.len() + body.len());
    bytes.extend_from_slice(head.as_bytes());
    bytes.extend_from_slice(body);
    bytes
}

pub fn parse_status_code(raw: &[u8]) -> Result<u16, HttpError> {
    let line = first_line(raw).ok_or(HttpError::MalformedStatusLine)?;
    let mut parts = line.splitn(3, ' ');

    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse::<u16>()
            .map_err(|_| HttpError::MalformedStatusLine),
        _ => Err(HttpError::MalformedStatusLine),
    }
}

fn first_line(raw: &[u8]) -> Option<&str> {
    let end = raw
        .iter()
        .position(|byte| *byte == b'\n')
        .unwrap_or(raw.len());
    let line = std::str::from_utf8(&raw[..end]).ok()?;
    let line = line.strip_suffix('\r').unwrap_or(line);
    (!line.is_empty()).then_some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn routes_api_by_request_line() {
        assert_eq!(
            Route::from_request(b"GET /api HTTP/1.1\r\nHost: pico\r\n\r\n"),
            Route::Api
        );
        assert_eq!(
            Route::from_request(b"GET /api?fresh=1 HTTP/1.1\r\n\r\n"),
            Route::Api
        );
    }

    #[test]
    fn everything_else_gets_dashboard() {
        assert_eq!(Route::from_request(b"GET / HTTP/1.1\r\n\r\n"), Route::Dashboard);
        assert_eq!(Route::from_request(b"POST /api HTTP/1.1\r\n\r\n"), Route::Dashboard);
        assert_eq!(Route::from_request(b"GET /apis HTTP/1.1\r\n\r\n"), Route::Dashboard);
        assert_eq!(Route::from_request(b"\xff\xfe garbage"), Route::Dashboard);
        assert_eq!(Route::from_request(b""), Route::Dashboard);
    }

    #[test]
    fn api_mention_in_body_does_not_route() {
        let raw = b"POST /submit HTTP/1.1\r\nContent-Length: 8\r\n\r\nGET /api";
        assert_eq!(Route::from_request(raw), Route::Dashboard);
    }

    #[test]
    fn parses_request_line() {
        let line = RequestLine::parse(b"GET /api?x=1 HTTP/1.0\n").unwrap();
        assert_eq!(line.method, "GET");
        assert_eq!(line.target, "/api?x=1");
        assert_eq!(line.path(), "/api");
        assert_eq!(line.version, "HTTP/1.0");

        assert_eq!(
            RequestLine::parse(b"GET /api\r\n"),
            Err(HttpError::MalformedRequestLine)
        );
    }

    #[test]
    fn response_counts_body_bytes() {
        let response = Response::ok(CONTENT_TYPE_HTML, "21°");
        let bytes = response.to_bytes();

        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: 4\r\nConnection: close\r\n\r\n21°"
        );
    }

    #[test]
    fn api_route_serves_reading_json() {
        let reading = Reading::measured(20.0, 40.0, 4.5, 12);
        let response = Response::for_route(Route::Api, &reading, 30_000).unwrap();

        assert_eq!(response.content_type, CONTENT_TYPE_JSON);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["temp_k"], serde_json::json!(293.15));
        assert_eq!(body["runtime_s"], serde_json::json!(12));
    }

    #[test]
    fn dashboard_route_serves_html() {
        let reading = Reading::measured(20.0, 40.0, 4.5, 12);
        let response = Response::for_route(Route::Dashboard, &reading, 30_000).unwrap();

        assert_eq!(response.content_type, CONTENT_TYPE_HTML);
        let body = String::from_utf8(response.body).unwrap();
        assert!(body.starts_with("<!DOCTYPE html>"));
        assert!(body.contains("68.0°"));
    }

    #[test]
    fn builds_post() {
        let request = post_request("10.0.0.5:5000", "/data", br#"{"temp_c":20}"#);

        assert_eq!(
            String::from_utf8(request).unwrap(),
            "POST /data HTTP/1.1\r\nHost: 10.0.0.5:5000\r\nContent-Type: application/json\r\nContent-Length: 13\r\nConnection: close\r\n\r\n{\"temp_c\":20}"
        );
    }

    #[test]
    fn reads_status_code() {
        assert_eq!(parse_status_code(b"HTTP/1.1 200 OK\r\n\r\n"), Ok(200));
        assert_eq!(parse_status_code(b"HTTP/1.0 400 Bad Request\r\n"), Ok(400));
        assert_eq!(
            parse_status_code(b"hello"),
            Err(HttpError::MalformedStatusLine)
        );
    }
}
