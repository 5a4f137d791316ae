//! Shared fake-server scaffolding for the end-to-end scenarios in
//! `scenarios.rs`. Each test binds its own Unix-domain socket under a fresh
//! temporary directory and drives a hand-rolled server loop on a background
//! thread, mirroring the listener/accept/respond shape in
//! `flux-network/tests/tcp_roundtrip.rs`.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;

/// Installs a `tracing` subscriber writing to the test harness's own
/// captured output, so the `tracing::debug!`/`tracing::warn!` calls
/// `connection`/`reader` emit during a reconnect scenario show up under
/// `cargo test -- --nocapture`. Idempotent: every scenario calls this, but
/// only the first call in the test binary actually installs a subscriber.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Owns the temporary directory a test's socket lives in, kept alive across
/// any number of server restarts at the same path within one test.
pub struct TestSocket {
    pub path: PathBuf,
    _dir: tempfile::TempDir,
}

impl TestSocket {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir for socket");
        let path = dir.path().join("smfp-test.sock");
        Self { path, _dir: dir }
    }
}

pub struct FakeServer {
    listener: UnixListener,
}

impl FakeServer {
    /// Binds at `socket.path`. The caller removes any stale socket file
    /// first when re-binding after a simulated server restart.
    pub fn bind_at(path: &PathBuf) -> Self {
        let listener = UnixListener::bind(path).expect("bind fake server socket");
        Self { listener }
    }

    /// Accepts one connection and runs `handle` against it on a background
    /// thread, returning the thread's `JoinHandle` so the caller can await
    /// the scenario's completion.
    pub fn accept_once(
        self,
        handle: impl FnOnce(UnixStream) + Send + 'static,
    ) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            let (stream, _addr) = self.listener.accept().expect("accept fake client");
            handle(stream);
        })
    }
}

/// Reads one full request frame: 9-byte header plus `argSize` bytes of
/// argument, returning `(request_code, transaction_id, arg)`.
pub fn read_request(stream: &mut UnixStream) -> (u8, u32, Vec<u8>) {
    let mut header = [0u8; 9];
    stream.read_exact(&mut header).expect("read request header");
    let length = u32::from_be_bytes(header[0..4].try_into().unwrap());
    let request_code = header[4];
    let transaction_id = u32::from_be_bytes(header[5..9].try_into().unwrap());
    let arg_size = length - 5;
    let mut arg = vec![0u8; arg_size as usize];
    stream.read_exact(&mut arg).expect("read request arg");
    (request_code, transaction_id, arg)
}

/// Writes one response frame carrying a payload.
pub fn write_response(stream: &mut UnixStream, transaction_id: u32, payload: &[u8]) {
    let mut frame = Vec::with_capacity(8 + payload.len());
    frame.extend_from_slice(&(payload.len() as i32).to_be_bytes());
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(payload);
    stream.write_all(&frame).expect("write response frame");
}

/// Writes one response frame carrying an in-band remote error code.
pub fn write_error(stream: &mut UnixStream, transaction_id: u32, code: i32) {
    let mut frame = [0u8; 8];
    frame[0..4].copy_from_slice(&code.to_be_bytes());
    frame[4..8].copy_from_slice(&transaction_id.to_be_bytes());
    stream.write_all(&frame).expect("write error frame");
}
