use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder;
use hyper_util::server::graceful::GracefulShutdown;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Connection-level knobs applied to every accepted socket.
#[derive(Clone, Copy, Debug)]
pub struct ServerOptions {
    /// How long a connection may sit idle between events before it is
    /// aborted (header read timeout on h1, keep-alive ping timeout on h2).
    pub idle_timeout: Duration,
    /// How long to wait for in-flight requests to drain on shutdown.
    pub shutdown_grace: Duration,
    /// Negotiate HTTP/2 (h2c / prior knowledge) on the listener.
    pub enable_http2: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(10),
            enable_http2: true,
        }
    }
}

/// Bind `host:port` and serve `service` until SIGINT/SIGTERM, then drain
/// in-flight requests within the configured grace period.
pub async fn run_http_service<S, E>(
    host: &str,
    port: u16,
    options: ServerOptions,
    service: S,
) -> Result<(), E>
where
    S: Service<Request<Incoming>, Response = Response<BoxBody<Bytes, E>>, Error = E>
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
    E: From<std::io::Error> + std::error::Error + Send + Sync + 'static,
{
    let listener = TcpListener::bind(format!("{host}:{port}")).await?;
    serve(listener, options, service, shutdown_signal()).await
}

/// Accept loop on an already-bound listener, running until `shutdown`
/// resolves. Split out from [`run_http_service`] so tests can use an
/// ephemeral port and a synthetic shutdown trigger.
pub async fn serve<S, E, F>(
    listener: TcpListener,
    options: ServerOptions,
    service: S,
    shutdown: F,
) -> Result<(), E>
where
    S: Service<Request<Incoming>, Response = Response<BoxBody<Bytes, E>>, Error = E>
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
    E: From<std::io::Error> + std::error::Error + Send + Sync + 'static,
    F: Future<Output = ()>,
{
    let service_arc = Arc::new(service);
    let graceful = GracefulShutdown::new();

    let mut builder = Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(options.idle_timeout);
    builder
        .http2()
        .timer(TokioTimer::new())
        .keep_alive_interval(options.idle_timeout)
        .keep_alive_timeout(options.idle_timeout);

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = accepted?;
                let _ = stream.set_nodelay(true);
                tracing::debug!(%peer_addr, "accepted connection");
                let io = TokioIo::new(stream);
                let svc = service_arc.clone();

                // Hand the connection to hyper; auto-detect h1/h2 on this
                // socket unless h2 is disabled.
                if options.enable_http2 {
                    let conn = graceful.watch(builder.serve_connection(io, svc).into_owned());
                    tokio::spawn(async move {
                        if let Err(err) = conn.await {
                            tracing::debug!(%peer_addr, error = %err, "connection closed with error");
                        }
                    });
                } else {
                    let mut h1 = hyper::server::conn::http1::Builder::new();
                    h1.timer(TokioTimer::new())
                        .header_read_timeout(options.idle_timeout);
                    let conn = graceful.watch(h1.serve_connection(io, svc));
                    tokio::spawn(async move {
                        if let Err(err) = conn.await {
                            tracing::debug!(%peer_addr, error = %err, "connection closed with error");
                        }
                    });
                }
            }
            _ = &mut shutdown => break,
        }
    }

    tracing::info!("draining in-flight requests");
    tokio::select! {
        _ = graceful.shutdown() => {}
        _ = tokio::time::sleep(options.shutdown_grace) => {
            tracing::warn!("shutdown grace period elapsed, dropping open connections");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

/// Minimal response carrying the status code's canonical reason as its body.
/// Used as the fallback when a handler cannot build its own response.
pub fn make_error_response<E>(status_code: StatusCode) -> Response<BoxBody<Bytes, E>> {
    let message = status_code
        .canonical_reason()
        .unwrap_or("an error occurred");

    let mut response = Response::new(Full::new(message.into()).map_err(|e| match e {}).boxed());
    *response.status_mut() = status_code;
    response
}
