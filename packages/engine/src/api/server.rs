// packages/engine/src/api/server.rs
//! HTTP/1.1 front end
//!
//! Routes:
//! - `POST /api/v1/run`: execute a submission, raw output in the body
//! - `GET /api/v1/config`: the language registry
//! - `GET /healthz`: liveness, no auth or throttling
//! - `OPTIONS *`: CORS preflight

use crate::admission::Throttler;
use crate::api::request::RequestParser;
use crate::runtime::engine::ExecutionEngine;
use crate::utils::config::ServerConfig;
use crate::utils::errors::{EngineError, ErrorKind, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const API_PREFIX: &str = "/api/v1/";
const TOKEN_HEADER: &str = "x-api-token";
const TOKEN_PARAM: &str = "api_token";

/// HTTP status for an error class
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Throttled => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::RuntimeUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub struct ApiServer {
    listen: SocketAddr,
    api_token: Option<String>,
    max_body_bytes: usize,
    engine: Arc<ExecutionEngine>,
    parser: RequestParser,
    throttler: Arc<Throttler>,
}

impl ApiServer {
    pub fn new(
        config: &ServerConfig,
        engine: Arc<ExecutionEngine>,
        parser: RequestParser,
        throttler: Arc<Throttler>,
    ) -> Self {
        Self {
            listen: config.listen,
            api_token: config.api_token.clone().filter(|t| !t.is_empty()),
            max_body_bytes: config.max_body_bytes,
            engine,
            parser,
            throttler,
        }
    }

    /// Bind the configured address and serve until cancelled
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.listen).await?;
        info!("API listening on {}", self.listen);
        self.serve(listener, shutdown).await
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        loop {
            let (stream, addr) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let server = Arc::clone(&self);
            tokio::spawn(async move {
                debug!("Accepted connection from {}", addr);

                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let server = Arc::clone(&server);
                    async move { Ok::<_, Infallible>(server.handle(req, addr.ip()).await) }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Connection error from {}: {}", addr, e);
                }
            });
        }

        info!("API server stopped");
        Ok(())
    }

    /// Route one request from `peer`
    pub async fn handle<B>(&self, req: Request<B>, peer: IpAddr) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        debug!("{} {} from {}", req.method(), req.uri().path(), peer);

        if req.method() == Method::OPTIONS {
            return with_cors(empty(StatusCode::NO_CONTENT));
        }

        let path = req.uri().path().to_string();
        if path == "/healthz" && req.method() == Method::GET {
            return text(StatusCode::OK, "ok");
        }
        if !path.starts_with(API_PREFIX) {
            return error_json(StatusCode::NOT_FOUND, "not found");
        }

        let response = match self.handle_api(req, &path, peer).await {
            Ok(response) => response,
            Err(e) => error_response(&e),
        };
        with_cors(response)
    }

    async fn handle_api<B>(
        &self,
        req: Request<B>,
        path: &str,
        peer: IpAddr,
    ) -> Result<Response<Full<Bytes>>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.authorize(&req)?;

        // Held until the response is built
        let _permit = self.throttler.admit(peer)?;

        let method = req.method().clone();
        match (&method, &path[API_PREFIX.len()..]) {
            (&Method::GET, "config") => {
                let body = serde_json::to_vec(self.parser.languages().as_ref())
                    .map_err(|e| EngineError::Internal(e.to_string()))?;
                Ok(json(StatusCode::OK, body))
            }
            (&Method::POST, "run") => self.handle_run(req).await,
            _ => Ok(error_json(StatusCode::NOT_FOUND, "not found")),
        }
    }

    async fn handle_run<B>(&self, req: Request<B>) -> Result<Response<Full<Bytes>>>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let body = Limited::new(req.into_body(), self.max_body_bytes)
            .collect()
            .await
            .map_err(|e| {
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    EngineError::Validation("Request body is too large".into())
                } else {
                    EngineError::Validation(format!("Failed to read request body: {}", e))
                }
            })?
            .to_bytes();

        let parsed = self.parser.parse_body(&body)?;
        let command = parsed.request.command.clone();
        let result = self.engine.execute(parsed.request).await?;

        let mut response = Response::new(Full::new(Bytes::from(result.output.clone())));
        let headers = response.headers_mut();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(&parsed.format)
                .unwrap_or_else(|_| HeaderValue::from_static("text/plain")),
        );
        // Commands are user supplied and may not be valid header text
        if let Ok(value) = HeaderValue::from_str(&command) {
            headers.insert(HeaderName::from_static("x-run-command"), value);
        }
        headers.insert(
            HeaderName::from_static("x-run-exitcode"),
            HeaderValue::from(result.exit_code),
        );
        if let Ok(value) = HeaderValue::from_str(&result.duration_string()) {
            headers.insert(HeaderName::from_static("x-run-duration"), value);
        }

        Ok(response)
    }

    fn authorize<B>(&self, req: &Request<B>) -> Result<()> {
        let Some(expected) = &self.api_token else {
            return Ok(());
        };

        let from_header = req
            .headers()
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());
        let from_query = req.uri().query().and_then(|q| {
            q.split('&')
                .filter_map(|pair| pair.split_once('='))
                .find(|(key, _)| *key == TOKEN_PARAM)
                .map(|(_, value)| value)
        });

        match from_header.or(from_query) {
            Some(token) if token == expected => Ok(()),
            _ => Err(EngineError::Validation("Api token is invalid".into())),
        }
    }
}

fn empty(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn text(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

fn json(status: StatusCode, body: Vec<u8>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn error_json(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({ "error": message }).to_string();
    json(status, body.into_bytes())
}

fn error_response(err: &EngineError) -> Response<Full<Bytes>> {
    let status = status_for(err.kind());
    if status.is_server_error() {
        error!("Request failed: {}", err);
    } else {
        debug!("Request rejected: {}", err);
    }
    error_json(status, &err.public_message())
}

fn with_cors(mut response: Response<Full<Bytes>>) -> Response<Full<Bytes>> {
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        HeaderName::from_static("access-control-expose-headers"),
        HeaderValue::from_static("*"),
    );
    response
}
