//! Route table and process-lifetime counters.

use crate::auth::{ApiKeyValidator, RequestAuthorizer};
use crate::metrics_defs;
use crate::session::{HealthSession, NotFoundSession, Session, UploadSession};
use http::request::Parts;
use shared::counter;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every in-flight session. Increments are independent
/// and commutative, so relaxed atomics are all the synchronization needed.
#[derive(Debug, Default)]
pub struct GatewayCounters {
    total_requests: AtomicU64,
    total_errors: AtomicU64,
}

impl GatewayCounters {
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent-enough snapshot for the shutdown summary; read after the
    /// server has quiesced.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
}

/// Builds the per-request session from the request line.
///
/// Matching is exact-string and case-sensitive; no trailing-slash
/// normalization, no query handling beyond what hyper already separates.
pub struct RequestRouter {
    authorizer: Arc<RequestAuthorizer>,
    max_request_body_size: usize,
    counters: Arc<GatewayCounters>,
}

impl RequestRouter {
    pub fn new(validator: Arc<dyn ApiKeyValidator>, max_request_body_size: usize) -> Self {
        Self {
            authorizer: Arc::new(RequestAuthorizer::new(validator)),
            max_request_body_size,
            counters: Arc::new(GatewayCounters::default()),
        }
    }

    pub fn counters(&self) -> &Arc<GatewayCounters> {
        &self.counters
    }

    /// Selects the session for one request and counts it.
    pub fn route(&self, request_id: &str, parts: &Parts) -> Session {
        self.counters.record_request();
        counter!(metrics_defs::REQUESTS_TOTAL).increment(1);

        let path = parts.uri.path();
        tracing::info!(request_id, method = %parts.method, path, "routing request");

        match path {
            "/health" => Session::Health(HealthSession::new(request_id.to_string())),
            "/api/call-upload" | "/call-upload" => Session::Upload(UploadSession::new(
                request_id.to_string(),
                self.authorizer.clone(),
                self.max_request_body_size,
            )),
            _ => {
                tracing::warn!(request_id, path, "no route matched");
                Session::NotFound(NotFoundSession::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StructuralKeyValidator;
    use http_body_util::Empty;
    use hyper::body::Bytes;
    use hyper::{Method, Request};

    fn test_router() -> RequestRouter {
        RequestRouter::new(Arc::new(StructuralKeyValidator), 1024)
    }

    fn parts_for(method: Method, path: &str) -> Parts {
        let (parts, _body) = Request::builder()
            .method(method)
            .uri(path)
            .body(Empty::<Bytes>::new())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn health_route_matches_any_method() {
        let router = test_router();
        for method in [Method::GET, Method::POST, Method::DELETE] {
            let session = router.route("id", &parts_for(method, "/health"));
            assert!(matches!(session, Session::Health(_)));
        }
    }

    #[test]
    fn both_upload_paths_match() {
        let router = test_router();
        for path in ["/api/call-upload", "/call-upload"] {
            let session = router.route("id", &parts_for(Method::POST, path));
            assert!(matches!(session, Session::Upload(_)));
        }
    }

    #[test]
    fn matching_is_exact_and_case_sensitive() {
        let router = test_router();
        for path in ["/health/", "/Health", "/api/call-upload/extra", "/unknown/path"] {
            let session = router.route("id", &parts_for(Method::GET, path));
            assert!(matches!(session, Session::NotFound(_)), "path {path}");
        }
    }

    #[test]
    fn every_routed_request_is_counted() {
        let router = test_router();
        router.route("a", &parts_for(Method::GET, "/health"));
        router.route("b", &parts_for(Method::POST, "/call-upload"));
        router.route("c", &parts_for(Method::GET, "/nope"));

        let snapshot = router.counters().snapshot();
        assert_eq!(snapshot.total_requests, 3);
        // Errors are recorded at response time, not at routing time.
        assert_eq!(snapshot.total_errors, 0);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let counters = Arc::new(GatewayCounters::default());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let counters = counters.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    counters.record_request();
                    counters.record_error();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.total_requests, 8000);
        assert_eq!(snapshot.total_errors, 8000);
    }
}
