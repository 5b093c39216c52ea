/// An HTTP/1.1 response (RFC 7230 §3).
///
/// Uses a builder pattern: chain [`add_header`](Self::add_header) and
/// [`with_body`](Self::with_body), then call [`serialize`](Self::serialize).
/// `Content-Length` is computed automatically when a body is present.
#[must_use]
pub struct HttpResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

/// Server identification string included in every response.
pub const SERVER_AGENT: &str = "framecast/0.1";

impl HttpResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        HttpResponse {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![("Server".to_string(), SERVER_AGENT.to_string())],
            body: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    pub fn switching_protocols() -> Self {
        Self::new(101, "Switching Protocols")
    }

    pub fn bad_request() -> Self {
        Self::new(400, "Bad Request").closing()
    }

    pub fn not_found() -> Self {
        Self::new(404, "Not Found").closing()
    }

    pub fn method_not_allowed() -> Self {
        Self::new(405, "Method Not Allowed")
            .add_header("Allow", "GET, HEAD")
            .closing()
    }

    /// 426: the client spoke an unsupported WebSocket version (RFC 6455 §4.4).
    pub fn upgrade_required() -> Self {
        Self::new(426, "Upgrade Required")
            .add_header("Sec-WebSocket-Version", "13")
            .closing()
    }

    pub fn service_unavailable() -> Self {
        Self::new(503, "Service Unavailable")
            .add_header("Retry-After", "1")
            .closing()
    }

    pub fn request_header_too_large() -> Self {
        Self::new(431, "Request Header Fields Too Large").closing()
    }

    /// Mark the response as the last one on this connection.
    pub fn closing(self) -> Self {
        self.add_header("Connection", "close")
    }

    pub fn add_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize the status line and headers only.
    ///
    /// `Content-Length` reflects the body even though it is not included,
    /// which is what a `HEAD` response needs.
    pub fn serialize_head(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status_code, self.status_text);

        for (name, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }

        match &self.body {
            Some(body) => head.push_str(&format!("Content-Length: {}\r\n", body.len())),
            None if self.status_code >= 200 => head.push_str("Content-Length: 0\r\n"),
            None => {}
        }
        head.push_str("\r\n");
        head.into_bytes()
    }

    /// Serialize to the HTTP wire format.
    pub fn serialize(&self) -> Vec<u8> {
        let mut response = self.serialize_head();
        if let Some(body) = &self.body {
            response.extend_from_slice(body);
        }
        response
    }
}
