use crate::{DiscoveryError, DiscoveryRequest, EndpointDiscoveryServer};
use bytes::Bytes;
use eds_controller_core::DiscoverEndpoints;
use futures::future;
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use hyper_util::{rt::TokioIo, service::TowerToHyperService};
use serde::Serialize;
use std::{convert::Infallible, net::SocketAddr, time::Duration};
use tokio::net::TcpListener;
use tracing::{debug, debug_span, info, instrument, trace, warn, Instrument};

pub const DISCOVERY_PATH: &str = "/v2/discovery:endpoints";

/// Delay before accepting again after a failed accept, e.g. when file descriptors run out.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

type Body = http_body_util::Full<Bytes>;

// === impl EndpointDiscoveryServer ===

impl<T, B> tower::Service<Request<B>> for EndpointDiscoveryServer<T>
where
    T: DiscoverEndpoints + Clone + Send + Sync + 'static,
    B: http_body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Infallible>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        trace!(method = %req.method(), path = %req.uri().path());
        if req.uri().path() != DISCOVERY_PATH {
            return Box::pin(future::ok(empty_response(StatusCode::NOT_FOUND)));
        }
        if req.method() != Method::POST {
            return Box::pin(future::ok(empty_response(StatusCode::METHOD_NOT_ALLOWED)));
        }

        let server = self.clone();
        Box::pin(async move {
            let rsp = match server.fetch_body(req.into_body()).await {
                Ok(rsp) => json_response(StatusCode::OK, &rsp),
                Err(error) => {
                    warn!(%error, "Failed to serve discovery request");
                    error_response(&error)
                }
            };
            Ok(rsp)
        })
    }
}

impl<T> EndpointDiscoveryServer<T>
where
    T: DiscoverEndpoints + Send + Sync + 'static,
{
    async fn fetch_body<B>(&self, body: B) -> Result<crate::DiscoveryResponse, DiscoveryError>
    where
        B: http_body::Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let bytes = body
            .collect()
            .await
            .map_err(|e| DiscoveryError::Body(e.into()))?
            .to_bytes();
        let req = serde_json::from_slice::<DiscoveryRequest>(&bytes)?;
        debug!(
            names = req.resource_names.len(),
            version = %req.version_info,
            nonce = %req.response_nonce,
            "Discovery request"
        );
        self.long_poll(req).await
    }
}

/// Serves discovery requests until the server's drain is signaled.
#[instrument(skip_all, fields(port = %addr.port()))]
pub async fn serve<T>(addr: SocketAddr, server: EndpointDiscoveryServer<T>) -> anyhow::Result<()>
where
    T: DiscoverEndpoints + Clone + Send + Sync + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "EDS server listening");
    serve_listener(listener, server).await
}

pub(crate) async fn serve_listener<T>(
    listener: TcpListener,
    server: EndpointDiscoveryServer<T>,
) -> anyhow::Result<()>
where
    T: DiscoverEndpoints + Clone + Send + Sync + 'static,
{
    let drain = server.drain.clone();
    tokio::pin! {
        let shutdown = drain.clone().signaled();
    }

    loop {
        let (io, client) = tokio::select! {
            res = listener.accept() => match res {
                Ok(conn) => conn,
                Err(error) => {
                    warn!(%error, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            },
            _ = &mut shutdown => {
                debug!("Shutting down");
                return Ok(());
            }
        };

        let svc = TowerToHyperService::new(server.clone());
        let drain = drain.clone();
        tokio::spawn(
            async move {
                let conn = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(io), svc);
                tokio::pin!(conn);
                tokio::select! {
                    res = &mut conn => {
                        if let Err(error) = res {
                            debug!(%error, "Connection failed");
                        }
                    }
                    handle = drain.signaled() => {
                        conn.as_mut().graceful_shutdown();
                        if let Err(error) = handle.release_after(conn).await {
                            debug!(%error, "Connection failed during shutdown");
                        }
                    }
                }
            }
            .instrument(debug_span!("conn", %client)),
        );
    }
}

fn json_response(status: StatusCode, value: &impl Serialize) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(bytes) => {
            let mut rsp = Response::new(Body::from(bytes));
            *rsp.status_mut() = status;
            rsp.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            rsp
        }
        Err(error) => {
            warn!(%error, "Failed to encode response");
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn error_response(error: &DiscoveryError) -> Response<Body> {
    let mut rsp = Response::new(Body::from(error.to_string()));
    *rsp.status_mut() = error.status();
    rsp
}

fn empty_response(status: StatusCode) -> Response<Body> {
    let mut rsp = Response::new(Body::default());
    *rsp.status_mut() = status;
    rsp
}
