//! hyper service implementation: one session driven per request.
//!
//! The transport delivers a request as headers plus a frame stream. This
//! module translates that into the session event sequence (headers, body
//! chunks in arrival order, end-of-message) and returns the session's single
//! terminal response. A terminal response returned mid-stream ends frame
//! delivery; hyper discards whatever the client still sends.

use crate::auth::ApiKeyValidator;
use crate::config::Config;
use crate::errors::GatewayError;
use crate::metrics_defs;
use crate::router::{CounterSnapshot, RequestRouter};
use crate::session::{Session, SessionBody};
use crate::storage::UploadSink;
use http::request::Parts;
use http_body_util::BodyExt;
use hyper::body::{Bytes, Incoming};
use hyper::header::HeaderValue;
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use shared::{counter, histogram};
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

const REQUEST_ID_HEADER: &str = "x-request-id";

struct Inner {
    router: RequestRouter,
    sink: Arc<dyn UploadSink>,
}

#[derive(Clone)]
pub struct GatewayService {
    inner: Arc<Inner>,
}

impl GatewayService {
    pub fn new(
        config: &Config,
        validator: Arc<dyn ApiKeyValidator>,
        sink: Arc<dyn UploadSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                router: RequestRouter::new(validator, config.max_request_body_size),
                sink,
            }),
        }
    }

    /// Final request/error totals; meaningful once serving has quiesced.
    pub fn counter_snapshot(&self) -> CounterSnapshot {
        self.inner.router.counters().snapshot()
    }
}

impl Service<Request<Incoming>> for GatewayService {
    type Response = Response<SessionBody>;
    type Error = GatewayError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move { handle_request(inner, req).await })
    }
}

/// Generic over the body type so tests can feed synthetic bodies.
async fn handle_request<B>(
    inner: Arc<Inner>,
    req: Request<B>,
) -> Result<Response<SessionBody>, GatewayError>
where
    B: hyper::body::Body<Data = Bytes> + Send + Unpin + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    let request_id = Uuid::new_v4().to_string();
    let (parts, body) = req.into_parts();

    let mut session = inner.router.route(&request_id, &parts);
    let endpoint = session.endpoint();

    let mut response = drive_session(&request_id, &mut session, &parts, body).await?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND || status.is_server_error() {
        inner.router.counters().record_error();
        counter!(metrics_defs::ERRORS_TOTAL).increment(1);
    }

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    if let Session::Upload(upload) = &mut session
        && status == StatusCode::OK
    {
        let bytes = upload.take_body();
        histogram!(metrics_defs::UPLOAD_BYTES_RECEIVED).record(bytes.len() as f64);
        tracing::info!(request_id, bytes_received = bytes.len(), "call upload successful");
        if let Err(err) = inner.sink.store(&request_id, bytes).await {
            // The client gets its receipt either way; persistence failures
            // stay server-side.
            tracing::error!(request_id, error = %err, "upload sink failed");
        }
    }

    tracing::debug!(request_id, endpoint, status = %status, "request completed");
    Ok(response)
}

/// Feeds the transport's events to the session and returns its terminal
/// response. A transport failure aborts with no response; the session and
/// its buffer are dropped by the caller.
async fn drive_session<B>(
    request_id: &str,
    session: &mut Session,
    parts: &Parts,
    mut body: B,
) -> Result<Response<SessionBody>, GatewayError>
where
    B: hyper::body::Body<Data = Bytes> + Send + Unpin + 'static,
    B::Error: std::error::Error + Send + Sync + 'static,
{
    if let Some(response) = session.on_headers(parts) {
        return Ok(response);
    }

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|err| {
            tracing::error!(request_id, error = %err, "request body stream failed");
            GatewayError::Transport(err.to_string())
        })?;

        // Trailer frames carry no body bytes.
        if let Ok(chunk) = frame.into_data()
            && let Some(response) = session.on_body_chunk(chunk)
        {
            return Ok(response);
        }
    }

    match session.on_eom() {
        Some(response) => Ok(response),
        // Unreachable for a live session: every state either already
        // produced a terminal response above or answers end-of-message.
        None => Ok(shared::http::make_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
        )),
    }
}
