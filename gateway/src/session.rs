//! Per-request session state machines.
//!
//! A session receives the events the transport delivers for one request —
//! headers, then zero or more body chunks in arrival order, then
//! end-of-message — and produces exactly one terminal response. Each event
//! method returns `Some(response)` the moment the session terminates; after
//! that every further event is absorbed silently. Events for one request are
//! delivered sequentially, so sessions need no internal locking, and each
//! session exclusively owns its buffer until it is dropped.

use crate::auth::RequestAuthorizer;
use crate::errors::GatewayError;
use bytes::{Bytes, BytesMut};
use http::request::Parts;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue, WWW_AUTHENTICATE};
use hyper::{Method, Response, StatusCode};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub type SessionBody = BoxBody<Bytes, GatewayError>;

const SERVICE_NAME: &str = "call-gateway";

/// Closed set of per-request sessions, selected by the router from the
/// request path. One value is constructed per request and dropped once the
/// terminal response has been emitted (or the transport aborted).
pub enum Session {
    Health(HealthSession),
    Upload(UploadSession),
    NotFound(NotFoundSession),
}

impl Session {
    pub fn on_headers(&mut self, parts: &Parts) -> Option<Response<SessionBody>> {
        match self {
            Session::Health(session) => session.on_headers(parts),
            Session::Upload(session) => session.on_headers(parts),
            Session::NotFound(_) => None,
        }
    }

    pub fn on_body_chunk(&mut self, chunk: Bytes) -> Option<Response<SessionBody>> {
        match self {
            Session::Upload(session) => session.on_body_chunk(chunk),
            // Neither endpoint expects a body; bytes are dropped unread.
            Session::Health(_) | Session::NotFound(_) => None,
        }
    }

    pub fn on_eom(&mut self) -> Option<Response<SessionBody>> {
        match self {
            Session::Health(session) => session.on_eom(),
            Session::Upload(session) => session.on_eom(),
            Session::NotFound(session) => session.on_eom(),
        }
    }

    /// Endpoint label for logs and metric tags.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Session::Health(_) => "health",
            Session::Upload(_) => "call-upload",
            Session::NotFound(_) => "not-found",
        }
    }
}

/// Responds to `/health` with a fixed-shape status document. No body phase.
pub struct HealthSession {
    request_id: String,
    completed: bool,
}

impl HealthSession {
    pub fn new(request_id: String) -> Self {
        Self {
            request_id,
            completed: false,
        }
    }

    fn on_headers(&mut self, _parts: &Parts) -> Option<Response<SessionBody>> {
        tracing::info!(request_id = %self.request_id, "health check requested");
        None
    }

    fn on_eom(&mut self) -> Option<Response<SessionBody>> {
        if self.completed {
            return None;
        }
        self.completed = true;

        Some(self.status_document().unwrap_or_else(|err| {
            tracing::error!(request_id = %self.request_id, error = %err, "error in health check");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                Bytes::from_static(br#"{"error":"Internal server error"}"#),
            )
        }))
    }

    fn status_document(&self) -> Result<Response<SessionBody>, GatewayError> {
        // TODO: add real dependency checks (database, cache) once those
        // collaborators exist; until then the sub-statuses are placeholders.
        let document = serde_json::json!({
            "status": "healthy",
            "service": SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": unix_timestamp(),
            "dependencies": {
                "database": "healthy",
                "cache": "healthy",
            },
        });

        let mut response = json_response(StatusCode::OK, serde_json::to_vec(&document)?.into());
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        Ok(response)
    }
}

enum UploadState {
    /// Header event not yet processed.
    Authorizing,
    /// Authorized POST; body chunks are appended to the buffer.
    Accumulating,
    /// Terminal response emitted; all further events are ignored.
    Terminated,
}

/// Bounded, authorized accumulation of an upload body.
///
/// State machine: `Authorizing -> {Accumulating | Terminated}` on headers,
/// `Accumulating -> Terminated` on overflow or end-of-message. The running
/// byte total is authoritative for the size cap; the declared
/// `Content-Length` only provides an early exit.
pub struct UploadSession {
    request_id: String,
    authorizer: Arc<RequestAuthorizer>,
    max_body_size: usize,
    state: UploadState,
    credential: Option<String>,
    buffer: BytesMut,
}

impl UploadSession {
    pub fn new(request_id: String, authorizer: Arc<RequestAuthorizer>, max_body_size: usize) -> Self {
        Self {
            request_id,
            authorizer,
            max_body_size,
            state: UploadState::Authorizing,
            credential: None,
            buffer: BytesMut::new(),
        }
    }

    fn on_headers(&mut self, parts: &Parts) -> Option<Response<SessionBody>> {
        if !matches!(self.state, UploadState::Authorizing) {
            return None;
        }

        if parts.method != Method::POST {
            tracing::warn!(
                request_id = %self.request_id,
                method = %parts.method,
                "upload rejected: only POST is allowed"
            );
            self.state = UploadState::Terminated;
            return Some(json_response(
                StatusCode::METHOD_NOT_ALLOWED,
                Bytes::from_static(br#"{"error":"Only POST method is allowed"}"#),
            ));
        }

        match self.authorizer.authorize(&parts.headers) {
            Ok(credential) => self.credential = Some(credential),
            Err(err) => {
                tracing::warn!(request_id = %self.request_id, error = %err, "unauthorized request");
                self.state = UploadState::Terminated;
                let mut response = json_response(
                    StatusCode::UNAUTHORIZED,
                    Bytes::from_static(br#"{"error":"Invalid or missing API key"}"#),
                );
                response
                    .headers_mut()
                    .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
                return Some(response);
            }
        }

        self.state = UploadState::Accumulating;

        // Advisory early exit on the declared length. The running total in
        // on_body_chunk stays authoritative, so a missing or lying header
        // changes nothing about enforcement.
        if let Some(declared) = declared_content_length(&self.request_id, &parts.headers)
            && declared > self.max_body_size as u64
        {
            tracing::warn!(
                request_id = %self.request_id,
                declared_length = declared,
                "request too large"
            );
            self.state = UploadState::Terminated;
            return Some(self.overflow_response());
        }

        None
    }

    fn on_body_chunk(&mut self, chunk: Bytes) -> Option<Response<SessionBody>> {
        if !matches!(self.state, UploadState::Accumulating) {
            return None;
        }

        if self.buffer.len() + chunk.len() > self.max_body_size {
            tracing::warn!(
                request_id = %self.request_id,
                accumulated = self.buffer.len() + chunk.len(),
                "request body exceeded max size"
            );
            // The overflowing chunk is never buffered.
            self.buffer = BytesMut::new();
            self.state = UploadState::Terminated;
            return Some(self.overflow_response());
        }

        self.buffer.extend_from_slice(&chunk);
        None
    }

    fn on_eom(&mut self) -> Option<Response<SessionBody>> {
        if !matches!(self.state, UploadState::Accumulating) {
            // Terminal response already sent.
            return None;
        }
        self.state = UploadState::Terminated;

        Some(self.receipt().unwrap_or_else(|err| {
            tracing::error!(request_id = %self.request_id, error = %err, "error processing call upload");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                Bytes::from_static(br#"{"error":"Failed to process upload"}"#),
            )
        }))
    }

    fn receipt(&self) -> Result<Response<SessionBody>, GatewayError> {
        let document = serde_json::json!({
            "status": "received",
            "message": "Call upload processed successfully",
            "requestId": self.request_id,
            "timestamp": unix_timestamp(),
            "bytesReceived": self.buffer.len(),
        });

        Ok(json_response(
            StatusCode::OK,
            serde_json::to_vec(&document)?.into(),
        ))
    }

    fn overflow_response(&self) -> Response<SessionBody> {
        let body = format!(
            r#"{{"error":"Request body too large. Max size: {} bytes"}}"#,
            self.max_body_size
        );
        json_response(StatusCode::PAYLOAD_TOO_LARGE, body.into())
    }

    /// Number of body bytes accepted so far.
    pub fn bytes_received(&self) -> usize {
        self.buffer.len()
    }

    /// The validated credential, once authorization has passed.
    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    /// Hands the accumulated body to the caller after completion, leaving
    /// the session empty.
    pub fn take_body(&mut self) -> Bytes {
        std::mem::take(&mut self.buffer).freeze()
    }
}

/// Stateless responder for unknown routes: 404 on end-of-message.
pub struct NotFoundSession {
    completed: bool,
}

impl NotFoundSession {
    pub fn new() -> Self {
        Self { completed: false }
    }

    fn on_eom(&mut self) -> Option<Response<SessionBody>> {
        if self.completed {
            return None;
        }
        self.completed = true;
        Some(json_response(
            StatusCode::NOT_FOUND,
            Bytes::from_static(br#"{"error":"Endpoint not found"}"#),
        ))
    }
}

impl Default for NotFoundSession {
    fn default() -> Self {
        Self::new()
    }
}

fn full_body(bytes: Bytes) -> SessionBody {
    Full::new(bytes).map_err(|e| match e {}).boxed()
}

/// Built by hand rather than through `Response::builder` so rejection and
/// fault paths cannot themselves fail.
fn json_response(status: StatusCode, body: Bytes) -> Response<SessionBody> {
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Declared `Content-Length`, if present and well formed. Malformed values
/// are logged and ignored; the running byte total catches liars.
fn declared_content_length(request_id: &str, headers: &hyper::HeaderMap) -> Option<u64> {
    let value = headers.get(CONTENT_LENGTH)?;
    match value.to_str().ok().and_then(|v| v.parse::<u64>().ok()) {
        Some(length) => Some(length),
        None => {
            tracing::error!(request_id, header = ?value, "invalid Content-Length");
            None
        }
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StructuralKeyValidator;
    use http_body_util::Empty;
    use hyper::body::Body;
    use hyper::Request;
    use serde_json::Value;

    const TEST_CAP: usize = 1024;

    fn upload_session() -> UploadSession {
        UploadSession::new(
            "test-request".to_string(),
            Arc::new(RequestAuthorizer::new(Arc::new(StructuralKeyValidator))),
            TEST_CAP,
        )
    }

    fn valid_key() -> String {
        format!("sk_{}", "a".repeat(40))
    }

    fn request_parts(method: Method, headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().method(method).uri("/api/call-upload");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (parts, _body) = builder.body(Empty::<Bytes>::new()).unwrap().into_parts();
        parts
    }

    fn authorized_parts() -> Parts {
        let auth = format!("Bearer {}", valid_key());
        request_parts(Method::POST, &[("authorization", auth.as_str())])
    }

    fn body_json(response: Response<SessionBody>) -> Value {
        let bytes = futures_collect(response.into_body());
        serde_json::from_slice(&bytes).unwrap()
    }

    fn futures_collect(body: SessionBody) -> Bytes {
        // Full bodies resolve immediately; no runtime needed.
        let waker = std::task::Waker::noop();
        let mut cx = std::task::Context::from_waker(waker);
        let mut body = std::pin::pin!(body);
        let mut collected = BytesMut::new();
        loop {
            match body.as_mut().poll_frame(&mut cx) {
                std::task::Poll::Ready(Some(Ok(frame))) => {
                    if let Ok(data) = frame.into_data() {
                        collected.extend_from_slice(&data);
                    }
                }
                std::task::Poll::Ready(Some(Err(_))) => panic!("body errored"),
                std::task::Poll::Ready(None) => return collected.freeze(),
                std::task::Poll::Pending => panic!("body pending"),
            }
        }
    }

    #[test]
    fn get_is_rejected_with_405() {
        let mut session = upload_session();
        let parts = request_parts(Method::GET, &[]);

        let response = session.on_headers(&parts).expect("terminal response");
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            body_json(response)["error"],
            "Only POST method is allowed"
        );
    }

    #[test]
    fn missing_credential_is_rejected_and_body_ignored() {
        let mut session = upload_session();
        let parts = request_parts(Method::POST, &[]);

        let response = session.on_headers(&parts).expect("terminal response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
        assert_eq!(body_json(response)["error"], "Invalid or missing API key");

        // Later body events are absorbed without accumulation or a second
        // response.
        assert!(session.on_body_chunk(Bytes::from(vec![0u8; 64])).is_none());
        assert_eq!(session.bytes_received(), 0);
        assert!(session.on_eom().is_none());
    }

    #[test]
    fn declared_length_over_cap_rejected_before_any_chunk() {
        let mut session = upload_session();
        let auth = format!("Bearer {}", valid_key());
        let declared = (TEST_CAP + 1).to_string();
        let parts = request_parts(
            Method::POST,
            &[
                ("authorization", auth.as_str()),
                ("content-length", declared.as_str()),
            ],
        );

        let response = session.on_headers(&parts).expect("terminal response");
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            body_json(response)["error"],
            format!("Request body too large. Max size: {TEST_CAP} bytes")
        );
    }

    #[test]
    fn malformed_content_length_is_ignored() {
        let mut session = upload_session();
        let auth = format!("Bearer {}", valid_key());
        let parts = request_parts(
            Method::POST,
            &[
                ("authorization", auth.as_str()),
                ("content-length", "not-a-number"),
            ],
        );

        assert!(session.on_headers(&parts).is_none());
        assert!(session.on_body_chunk(Bytes::from_static(b"data")).is_none());
        let response = session.on_eom().expect("terminal response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn running_total_rejects_at_cap_plus_one() {
        let mut session = upload_session();
        assert!(session.on_headers(&authorized_parts()).is_none());

        // Fill exactly to the cap in two chunks, then overflow by one byte.
        assert!(session.on_body_chunk(Bytes::from(vec![1u8; TEST_CAP / 2])).is_none());
        assert!(
            session
                .on_body_chunk(Bytes::from(vec![2u8; TEST_CAP - TEST_CAP / 2]))
                .is_none()
        );
        assert_eq!(session.bytes_received(), TEST_CAP);

        let response = session
            .on_body_chunk(Bytes::from_static(b"x"))
            .expect("terminal response");
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        // Nothing past the cap is buffered, and the stream stays terminal.
        assert_eq!(session.bytes_received(), 0);
        assert!(session.on_body_chunk(Bytes::from_static(b"more")).is_none());
        assert!(session.on_eom().is_none());
    }

    #[test]
    fn zero_length_body_is_a_valid_upload() {
        let mut session = upload_session();
        assert!(session.on_headers(&authorized_parts()).is_none());

        let response = session.on_eom().expect("terminal response");
        assert_eq!(response.status(), StatusCode::OK);
        let document = body_json(response);
        assert_eq!(document["status"], "received");
        assert_eq!(document["bytesReceived"], 0);
        assert_eq!(document["requestId"], "test-request");
    }

    #[test]
    fn chunks_are_concatenated_in_arrival_order() {
        let mut session = upload_session();
        assert!(session.on_headers(&authorized_parts()).is_none());
        assert!(session.on_body_chunk(Bytes::from_static(b"hello ")).is_none());
        assert!(session.on_body_chunk(Bytes::from_static(b"world")).is_none());

        let response = session.on_eom().expect("terminal response");
        assert_eq!(body_json(response)["bytesReceived"], 11);
        assert_eq!(session.take_body(), Bytes::from_static(b"hello world"));
    }

    #[test]
    fn duplicate_end_of_message_produces_no_second_response() {
        let mut session = upload_session();
        assert!(session.on_headers(&authorized_parts()).is_none());
        assert!(session.on_eom().is_some());
        assert!(session.on_eom().is_none());
    }

    #[test]
    fn credential_is_stored_on_success() {
        let mut session = upload_session();
        assert!(session.on_headers(&authorized_parts()).is_none());
        assert_eq!(session.credential(), Some(valid_key().as_str()));
    }

    #[test]
    fn health_session_emits_status_document_once() {
        let mut session = HealthSession::new("hc".to_string());
        let parts = request_parts(Method::GET, &[]);
        assert!(session.on_headers(&parts).is_none());

        let response = session.on_eom().expect("terminal response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(response.headers().get(CACHE_CONTROL).unwrap(), "no-cache");

        let document = body_json(response);
        assert_eq!(document["status"], "healthy");
        assert_eq!(document["service"], SERVICE_NAME);
        assert_eq!(document["dependencies"]["database"], "healthy");

        assert!(session.on_eom().is_none());
    }

    #[test]
    fn not_found_session_emits_404_once() {
        let mut session = NotFoundSession::new();
        let response = session.on_eom().expect("terminal response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response)["error"], "Endpoint not found");
        assert!(session.on_eom().is_none());
    }
}
