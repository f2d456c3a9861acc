//! Minimal JSON-over-HTTP/1.1 client shared by the transport and the agent.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::debug;

/// Where an exchange broke down.
#[derive(Debug)]
pub(crate) enum HttpFailure {
    /// TCP connect or HTTP handshake failed.
    Connect(String),
    /// Connected, but the request or response did not complete.
    Exchange(String),
}

impl HttpFailure {
    pub(crate) fn detail(self) -> String {
        match self {
            HttpFailure::Connect(d) => format!("connect: {d}"),
            HttpFailure::Exchange(d) => format!("exchange: {d}"),
        }
    }
}

/// POST `body` as JSON to `http://{authority}{path}` over a fresh connection.
pub(crate) async fn post_json(
    authority: &str,
    path: &str,
    body: Vec<u8>,
) -> Result<(StatusCode, Bytes), HttpFailure> {
    let stream = TcpStream::connect(authority).await.map_err(|e| {
        debug!(error = %e, %authority, "connection failed");
        HttpFailure::Connect(e.to_string())
    })?;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| HttpFailure::Connect(e.to_string()))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(HOST, authority)
        .header(CONTENT_TYPE, "application/json")
        .header(USER_AGENT, "edgegrid-control/0.1")
        .body(Full::new(Bytes::from(body)))
        .map_err(|e| HttpFailure::Exchange(e.to_string()))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| HttpFailure::Exchange(e.to_string()))?;
    let status = resp.status();
    let bytes = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| HttpFailure::Exchange(e.to_string()))?
        .to_bytes();
    Ok((status, bytes))
}
