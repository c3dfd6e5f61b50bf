//! Hijacked transport wrappers over real loopback TCP with hyper.
//!
//! Each test runs an HTTP/1.1 server and client on `127.0.0.1`, arms a
//! failpoint on one hook and checks that data disappears while the
//! connection keeps serving requests.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use faultline_failpoint::{
    ChannelResponseWriter, FailpointAction, FailpointRegistry, HijackedReader,
    HijackedResponseWriter, HijackedRoundTripper, Hook, Http1Transport, ResponseBody,
    ResponseWriter, RoundTripper, TransportPath, hijack_request,
};

// ============================================================================
// Test Utilities
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Serve connections on an ephemeral port, returning its address.
async fn spawn_server<F, Fut>(handler: F) -> std::net::SocketAddr
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + 'static,
    Fut: std::future::Future<Output = Result<Response<ResponseBody>, Infallible>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let handler = handler.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                if let Err(e) = hyper::server::conn::http1::Builder::new()
                    .serve_connection(io, service_fn(handler))
                    .await
                {
                    tracing::debug!("server connection error: {e}");
                }
            });
        }
    });

    addr
}

async fn connect(addr: std::net::SocketAddr) -> Http1Transport<Full<Bytes>> {
    let stream = TcpStream::connect(addr).await.expect("connect");
    let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .expect("handshake");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!("client connection error: {e}");
        }
    });
    Http1Transport::new(sender)
}

async fn connect_hijacked(
    addr: std::net::SocketAddr,
) -> Http1Transport<faultline_failpoint::HijackedBody<Full<Bytes>>> {
    let stream = TcpStream::connect(addr).await.expect("connect");
    let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .expect("handshake");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!("client connection error: {e}");
        }
    });
    Http1Transport::new(sender)
}

fn post(path: &str, body: &'static [u8]) -> Request<Full<Bytes>> {
    Request::post(path)
        .header("host", "localhost")
        .body(Full::new(Bytes::from_static(body)))
        .expect("request")
}

async fn body_bytes(response: Response<Incoming>) -> Bytes {
    response
        .into_body()
        .collect()
        .await
        .expect("collect")
        .to_bytes()
}

// ============================================================================
// Inbound response writer
// ============================================================================

#[tokio::test]
async fn test_dropped_response_reports_success() {
    init_tracing();
    let registry = Arc::new(FailpointRegistry::new());
    let path = TransportPath::Stream;
    registry.arm(path.failpoint(Hook::ResponseHeader), FailpointAction::Drop);
    registry.arm(path.failpoint(Hook::ResponseBody), FailpointAction::Drop);

    let (results_tx, mut results_rx) = mpsc::unbounded_channel();
    let handler_registry = registry.clone();
    let addr = spawn_server(move |_req: Request<Incoming>| {
        let registry = handler_registry.clone();
        let results = results_tx.clone();
        async move {
            let (writer, pending) = ChannelResponseWriter::new();
            let mut writer = HijackedResponseWriter::for_path(writer, registry, path);
            tokio::spawn(async move {
                writer.write_header(StatusCode::OK).await;
                let written = writer.write(&[b'x'; 50]).await;
                let flushed = writer.flush().await;
                let _ = results.send((written.ok(), flushed.is_ok()));
            });
            let response = pending.into_response().await.expect("pending response");
            Ok::<_, Infallible>(response)
        }
    })
    .await;

    let transport = connect(addr).await;
    let response = transport
        .round_trip(post("/raft/stream", b""))
        .await
        .expect("round trip");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_bytes(response).await;
    assert!(body.is_empty(), "client received {} bytes", body.len());

    let (written, flushed) = results_rx.recv().await.expect("handler result");
    assert_eq!(written, Some(50));
    assert!(flushed);

    // The connection survives: disarm and the next response arrives intact.
    registry.clear();
    let response = transport
        .round_trip(post("/raft/stream", b""))
        .await
        .expect("round trip");
    assert_eq!(&body_bytes(response).await[..], &[b'x'; 50][..]);
}

// ============================================================================
// Inbound request body
// ============================================================================

#[tokio::test]
async fn test_inbound_request_body_drained() {
    init_tracing();
    let registry = Arc::new(FailpointRegistry::new());
    let failpoint = TransportPath::Pipeline.failpoint(Hook::InboundRequestBody);

    let handler_registry = registry.clone();
    let addr = spawn_server(move |req: Request<Incoming>| {
        let registry = handler_registry.clone();
        async move {
            let req = hijack_request(req, registry, failpoint);
            let received = req.into_body().collect().await.expect("collect").to_bytes();
            let (mut writer, pending) = ChannelResponseWriter::new();
            let _ = writer.write(received.len().to_string().as_bytes()).await;
            drop(writer);
            Ok::<_, Infallible>(pending.into_response().await.expect("pending response"))
        }
    })
    .await;

    let transport = connect(addr).await;

    let response = transport
        .round_trip(post("/raft", b"snapshot-chunk"))
        .await
        .expect("round trip");
    assert_eq!(&body_bytes(response).await[..], b"14");

    registry.arm(failpoint, FailpointAction::Drop);
    let response = transport
        .round_trip(post("/raft", b"snapshot-chunk"))
        .await
        .expect("round trip");
    assert_eq!(&body_bytes(response).await[..], b"0");
    assert!(registry.hits(failpoint) >= 1);
}

// ============================================================================
// Outbound round tripper
// ============================================================================

#[tokio::test]
async fn test_outbound_body_dropped_on_stream_path_only() {
    init_tracing();
    let registry = Arc::new(FailpointRegistry::new());
    registry.arm(
        TransportPath::Stream.failpoint(Hook::OutboundRequestBody),
        FailpointAction::Drop,
    );

    let addr = spawn_server(|req: Request<Incoming>| async move {
        let received = req.into_body().collect().await.expect("collect").to_bytes();
        let (mut writer, pending) = ChannelResponseWriter::new();
        let _ = writer.write(&received).await;
        drop(writer);
        Ok::<_, Infallible>(pending.into_response().await.expect("pending response"))
    })
    .await;

    let stream = HijackedRoundTripper::for_path(
        connect_hijacked(addr).await,
        registry.clone(),
        TransportPath::Stream,
    );
    let pipeline = HijackedRoundTripper::for_path(
        connect_hijacked(addr).await,
        registry.clone(),
        TransportPath::Pipeline,
    );

    let response = stream.round_trip(post("/raft/stream", b"append")).await.expect("round trip");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_bytes(response).await.is_empty());

    let response = pipeline.round_trip(post("/raft", b"append")).await.expect("round trip");
    assert_eq!(&body_bytes(response).await[..], b"append");
}

// ============================================================================
// Raw byte stream
// ============================================================================

#[tokio::test]
async fn test_reader_drains_without_delivering() {
    init_tracing();
    let registry = Arc::new(FailpointRegistry::new());
    registry.arm("raw.inbound", FailpointAction::Drop);

    let (mut client, server) = tokio::io::duplex(64);
    let mut reader = HijackedReader::new(server, registry.clone(), "raw.inbound");

    // More than the duplex buffer: the writer only finishes if the armed
    // reader keeps draining.
    let writer = tokio::spawn(async move {
        client.write_all(&[b'x'; 1024]).await.expect("write");
        client
    });

    let mut buf = [0u8; 4];
    let read = tokio::time::timeout(Duration::from_millis(100), reader.read(&mut buf)).await;
    assert!(read.is_err(), "armed read must not complete while the peer is open");
    assert_eq!(buf, [0u8; 4]);

    let mut client = tokio::time::timeout(Duration::from_secs(5), writer)
        .await
        .expect("peer write drained")
        .expect("writer task");
    assert!(registry.hits("raw.inbound") >= 1);

    registry.disarm("raw.inbound");
    client.write_all(b"kept").await.expect("write");
    let mut kept = [0u8; 4];
    reader.read_exact(&mut kept).await.expect("read");
    assert_eq!(&kept, b"kept");

    drop(client);
    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).await.expect("read");
    assert!(rest.is_empty(), "dropped bytes must not resurface");
}
