//! Real server, real driver, loopback TCP.

use hashoff::config::ServerConfig;
use hashoff::driver::{render_response, PayloadRange, RequestContext};
use hashoff::engine::{ChecksumEngine, EngineMode, Sha256Engine};
use hashoff::protocol::{read_message, write_message, Message};
use hashoff::server::Server;
use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct TestServer {
    addr: SocketAddr,
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<std::io::Result<()>>,
}

impl TestServer {
    fn start(salt: &[u8], engine_mode: EngineMode) -> Self {
        let config = ServerConfig {
            host: "127.0.0.1".parse().unwrap(),
            port: 0,
            salt: salt.to_vec(),
            engine_mode,
            max_connections: 64,
            backlog: 64,
        };
        let server: Server = Server::new(config);
        let listener = server.bind().unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve(listener, async {
            let _ = stop_rx.await;
        }));
        Self {
            addr,
            stop_tx,
            handle,
        }
    }

    async fn stop(self) {
        self.stop_tx.send(()).unwrap();
        self.handle.await.unwrap().unwrap();
    }
}

fn expected_lines<C: AsRef<[u8]>>(salt: &[u8], chunks: &[C]) -> Vec<String> {
    let mut engine = Sha256Engine::create(salt);
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let digest = engine.finish(chunk.as_ref());
            engine.reset();
            render_response(i as u32, &digest)
        })
        .collect()
}

async fn run_client(
    addr: SocketAddr,
    request_count: u32,
    range: PayloadRange,
    data: Vec<u8>,
) -> (u32, Vec<String>) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut ctx = RequestContext::new(request_count, range, &data[..], Some(99));
    let mut out: Vec<u8> = Vec::new();
    let summary = ctx.run(&mut stream, &mut out).await.unwrap();
    assert_eq!(summary.responses_received, request_count);

    let lines = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(str::to_owned)
        .collect();
    (summary.adjusted_count, lines)
}

#[tokio::test]
async fn three_single_byte_chunks() {
    let server = TestServer::start(&[], EngineMode::PerSession);

    let range = PayloadRange::new(1, 1).unwrap();
    let (adjusted, lines) = run_client(server.addr, 3, range, b"abc".to_vec()).await;

    assert_eq!(adjusted, 120);
    assert_eq!(lines, expected_lines(&[], &[b"a", b"b", b"c"]));
    assert!(lines[0].starts_with("1: 0x"));
    assert!(lines[2].starts_with("3: 0x"));

    server.stop().await;
}

#[tokio::test]
async fn client_reads_input_file_from_disk() {
    let server = TestServer::start(b"pepper", EngineMode::Shared);

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&[7u8; 300]).unwrap();
    file.flush().unwrap();

    let input = tokio::fs::File::open(file.path()).await.unwrap();
    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let range = PayloadRange::new(100, 100).unwrap();
    let mut ctx = RequestContext::new(3, range, input, None);
    let mut out: Vec<u8> = Vec::new();
    ctx.run(&mut stream, &mut out).await.unwrap();

    let chunk = [7u8; 100];
    let want = expected_lines(b"pepper", &[&chunk, &chunk, &chunk]);
    let got: Vec<String> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(str::to_owned)
        .collect();
    assert_eq!(got, want);

    server.stop().await;
}

#[tokio::test]
async fn zero_requests_ack_then_close() {
    let server = TestServer::start(&[], EngineMode::PerSession);

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    let range = PayloadRange::new(1, 8).unwrap();
    let mut ctx = RequestContext::new(0, range, &b""[..], None);
    let mut out: Vec<u8> = Vec::new();
    let summary = ctx.run(&mut stream, &mut out).await.unwrap();

    assert_eq!(summary.adjusted_count, 0);
    assert!(out.is_empty());

    // Nothing else follows the Ack; the server closes its end.
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
        .await
        .expect("server did not close")
        .unwrap();
    assert!(rest.is_empty());

    server.stop().await;
}

#[tokio::test]
async fn truncated_payload_ends_session_without_hanging() {
    let server = TestServer::start(&[], EngineMode::Shared);

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    write_message(&mut stream, &Message::Init { request_count: 1 })
        .await
        .unwrap();
    assert_eq!(
        read_message(&mut stream).await.unwrap(),
        Message::Ack { adjusted_count: 40 }
    );

    // Advertise 100 bytes, send 5, then close our write half.
    let mut partial = vec![0, 0, 0, 3, 0, 0, 0, 100];
    partial.extend_from_slice(b"short");
    stream.write_all(&partial).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
        .await
        .expect("session hung on short payload")
        .ok();
    assert!(rest.is_empty());

    // The server keeps serving others.
    let range = PayloadRange::new(1, 1).unwrap();
    let (_, lines) = run_client(server.addr, 1, range, b"z".to_vec()).await;
    assert_eq!(lines, expected_lines(&[], &[b"z"]));

    server.stop().await;
}

async fn concurrent_sessions_match_sequential(engine_mode: EngineMode) {
    const CLIENTS: usize = 16;
    const REQUESTS: u32 = 25;
    const CHUNK: usize = 257;

    let salt = b"shared-salt";
    let server = TestServer::start(salt, engine_mode);
    let range = PayloadRange::new(CHUNK as u32, CHUNK as u32).unwrap();

    let inputs: Vec<Vec<u8>> = (0..CLIENTS)
        .map(|c| {
            (0..CHUNK * REQUESTS as usize)
                .map(|i| (i * 31 + c * 7) as u8)
                .collect()
        })
        .collect();

    let tasks: Vec<_> = inputs
        .iter()
        .cloned()
        .map(|data| tokio::spawn(run_client(server.addr, REQUESTS, range, data)))
        .collect();

    for (task, data) in tasks.into_iter().zip(&inputs) {
        let (_, lines) = task.await.unwrap();
        let chunks: Vec<&[u8]> = data.chunks(CHUNK).collect();
        assert_eq!(lines, expected_lines(salt, &chunks));
    }

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sessions_per_session_engines() {
    concurrent_sessions_match_sequential(EngineMode::PerSession).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sessions_shared_engine() {
    concurrent_sessions_match_sequential(EngineMode::Shared).await;
}
