// Copyright © 2024 Nathaniel Hardesty
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the “Software”), to
// deal in the Software without restriction, including without limitation the
// rights to use, copy, modify, merge, publish, distribute, sublicense, and/or
// sell copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS
// IN THE SOFTWARE.

//! ## CONNECTION
//! **Based on spec.md §4.3-4.4**
//!
//! Owns the socket path, the connection state, and the transaction registry
//! and id counter behind one mutex — the same shape as the teacher's
//! `semi_e37::primitive::Client` plus `semi_e37::generic::Client`'s outbox,
//! collapsed into a single lock per spec.md §3's invariant (c). The reader
//! thread's `JoinHandle` lives in its own, separate lock: the reader only
//! ever calls back through the state/registry lock, never through this one,
//! so a join through it can never deadlock against a reader still unwinding.

use std::io::{self, IoSlice, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::Error;
use crate::frame::RequestHeader;
use crate::reader;
use crate::transaction::Registry;
use crate::{ClientConfig, Handler};

/// ## CONNECTION STATE
/// **Based on spec.md §4.3**
///
/// `Closed` — no usable socket. `Opening` — a connect attempt (possibly with
/// retries) is in progress. `Open` — both directions usable, reader thread
/// running. Invariant (a) from spec.md §3: the reader thread exists iff this
/// is `Open`.
enum ConnectionState {
    NotConnected,
    Opening,
    Connected(UnixStream),
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::NotConnected
    }
}

struct ConnectionInner {
    state: ConnectionState,
    registry: Registry,
    /// Bumped every time a connect attempt succeeds. Lets a reader thread
    /// that outlives its own connection generation (e.g. one still
    /// unwinding from a write-triggered teardown after a new connection has
    /// already been opened) recognize that its termination no longer
    /// applies and skip cancelling a newer generation's registry.
    generation: u64,
}

impl Default for ConnectionInner {
    fn default() -> Self {
        Self {
            state: ConnectionState::default(),
            registry: Registry::new(),
            generation: 0,
        }
    }
}

/// ## CONNECTION
///
/// See the module documentation. Construct with [`new`], tear down
/// automatically on [`Drop`], redirect with [`switch_socket`].
///
/// [`new`]: Connection::new
/// [`switch_socket`]: Connection::switch_socket
pub struct Connection {
    socket_path: Mutex<PathBuf>,
    config: ClientConfig,
    inner: Mutex<ConnectionInner>,
    /// The presently-active reader thread's handle, if any. Deliberately a
    /// *separate* lock from `inner`: the reader thread only ever needs
    /// `inner` to finish, never this one, so joining through this field can
    /// never deadlock against a reader still unwinding. See `retire_reader`.
    current_reader: Mutex<Option<JoinHandle<()>>>,
    /// Reader threads superseded by a reconnect, parked here instead of
    /// joined inline so that tearing a connection down never has to block
    /// on a thread that might itself be waiting on `inner`'s lock.
    retired_readers: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// ### NEW CONNECTION
    /// **Based on spec.md §6's `Create`**
    ///
    /// Allocates connection state in the `Closed`/`NotConnected` state. Does
    /// **not** connect — the connection is lazy and will dial on the first
    /// [`send_request_receive_responses`] call.
    ///
    /// [`send_request_receive_responses`]: Connection::send_request_receive_responses
    pub fn new(socket_path: impl Into<PathBuf>, config: ClientConfig) -> Arc<Self> {
        Arc::new(Self {
            socket_path: Mutex::new(socket_path.into()),
            config,
            inner: Mutex::new(ConnectionInner::default()),
            current_reader: Mutex::new(None),
            retired_readers: Mutex::new(Vec::new()),
        })
    }

    /// ### SWITCH SOCKET
    /// **Based on spec.md §4.3's "any: explicit `SwitchSocket`" row**
    ///
    /// Shuts down the current socket (if any), replaces the socket path,
    /// and returns to `Closed`. The outgoing reader thread is retired rather
    /// than joined inline; it unblocks on its own once the shutdown call
    /// below reaches it. The next [`send_request_receive_responses`]
    /// reconnects to the new path.
    ///
    /// [`send_request_receive_responses`]: Connection::send_request_receive_responses
    pub fn switch_socket(self: &Arc<Self>, new_path: impl Into<PathBuf>) {
        {
            let mut inner = self.inner.lock().unwrap();
            Self::close_locked(&mut inner);
        }
        if let Some(handle) = self.current_reader.lock().unwrap().take() {
            self.retire_reader(handle);
        }
        *self.socket_path.lock().unwrap() = new_path.into();
    }

    /// Shuts the live socket down, if any, and flips to `NotConnected`.
    /// Never touches `current_reader`/`retired_readers` — callers that also
    /// need to retire the reader thread do so afterward, once `inner`'s
    /// lock has been released (see `switch_socket`, `send_with_retry`,
    /// `Drop`). A reader thread unwinding from the shutdown below still
    /// needs `inner` to call back into [`on_reader_terminated`]; joining it
    /// while holding this same lock would deadlock against that call.
    ///
    /// [`on_reader_terminated`]: Connection::on_reader_terminated
    fn close_locked(inner: &mut ConnectionInner) {
        if let ConnectionState::Connected(stream) = &inner.state {
            let _ = stream.shutdown(Shutdown::Both);
        }
        inner.state = ConnectionState::NotConnected;
    }

    /// Parks a reader thread that's no longer current. Opportunistically
    /// joins any previously retired threads that have already finished —
    /// `is_finished` is checked first so this never blocks on one that
    /// might still need `inner`'s lock to reach its own exit.
    fn retire_reader(&self, handle: JoinHandle<()>) {
        let mut retired = self.retired_readers.lock().unwrap();
        let mut still_running = Vec::with_capacity(retired.len() + 1);
        for old in retired.drain(..) {
            if old.is_finished() {
                let _ = old.join();
            } else {
                still_running.push(old);
            }
        }
        still_running.push(handle);
        *retired = still_running;
    }

    /// Moves the current reader handle (if any) onto the retired list. Safe
    /// to call while `inner` is locked: `current_reader`/`retired_readers`
    /// are independent mutexes the reader thread never touches.
    fn retire_current_reader_locked(self: &Arc<Self>) {
        if let Some(handle) = self.current_reader.lock().unwrap().take() {
            self.retire_reader(handle);
        }
    }

    /// ### SEND REQUEST RECEIVE RESPONSES
    /// **Based on spec.md §4.4 and §6's `SendRequestReceiveResponses`**
    ///
    /// Registers `handler` under a fresh transaction id, ensures the
    /// connection is `Open` (connecting/reconnecting as needed), transmits
    /// the framed request, and blocks the calling thread until `handler`
    /// reports the transaction complete.
    ///
    /// On a broken-pipe write failure this function reconnects and resends
    /// the same request once, reusing the already-registered transaction id.
    /// **This resend is not idempotent-safe**: the server has no memory of
    /// the prior attempt after a reconnect, so only retry-safe (idempotent)
    /// requests should be sent through a connection expected to experience
    /// `EPIPE` (spec.md §9, open question 5).
    pub fn send_request_receive_responses(
        self: &Arc<Self>,
        request_code: u8,
        arg: &[u8],
        handler: impl Handler + 'static,
    ) -> Result<(), Error> {
        let header_template = RequestHeader {
            request_code,
            transaction_id: 0, // filled in once we have an id
            arg_size: arg.len() as u32,
        };
        if arg.len() as u64 > crate::frame::MAX_ARG_SIZE as u64 {
            return Err(Error::InvalidArgument);
        }

        let (completion_tx, completion_rx) = oneshot::channel();
        let mut inner = self.inner.lock().unwrap();
        let id = inner.registry.register(Box::new(handler), completion_tx);

        let result = self.send_with_retry(&mut inner, header_template, id, arg);
        if let Err(err) = result {
            inner.registry.remove(id);
            drop(inner);
            return Err(err);
        }
        drop(inner);

        match completion_rx.recv() {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionFailed),
        }
    }

    /// Ensures the connection is open, writes the framed request, and
    /// reconnects-and-retries exactly once per broken-pipe failure, per
    /// spec.md §4.4 steps 3-6. Held entirely under `inner`'s lock, which
    /// spec.md §5 explicitly permits ("implementations may hold the lock
    /// across the write for simplicity at the cost of throughput"). Closing
    /// a dead socket here only flips state and shuts the fd down
    /// (`close_locked`); the superseded reader thread, if any, is retired
    /// after this call returns, never while `inner` is held.
    fn send_with_retry(
        self: &Arc<Self>,
        inner: &mut ConnectionInner,
        mut header: RequestHeader,
        id: u32,
        arg: &[u8],
    ) -> Result<(), Error> {
        header.transaction_id = id;
        loop {
            self.ensure_open_locked(inner)?;
            match Self::write_request_locked(inner, header, arg) {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                    tracing::warn!(transaction_id = id, "write failed with broken pipe, reconnecting");
                    Self::close_locked(inner);
                    self.retire_current_reader_locked();
                    continue;
                }
                Err(err) => {
                    tracing::error!(transaction_id = id, error = %err, "write failed");
                    Self::close_locked(inner);
                    self.retire_current_reader_locked();
                    return Err(Error::ConnectionFailed);
                }
            }
        }
    }

    /// ### ENSURE OPEN
    /// **Based on spec.md §4.3's state transition table**
    ///
    /// If already `Open`, returns immediately. Otherwise attempts to connect,
    /// retrying on `ECONNREFUSED`/`ENOENT` up to
    /// [`RetryPolicy::max_attempts`] times with [`RetryPolicy::retry_delay`]
    /// between attempts; any other connect error, or exhausting the retry
    /// budget, surfaces [`Error::ConnectionFailed`]. On success spawns the
    /// reader thread — invariant (a): the reader thread exists iff `Open`.
    ///
    /// [`RetryPolicy::max_attempts`]: crate::RetryPolicy::max_attempts
    /// [`RetryPolicy::retry_delay`]: crate::RetryPolicy::retry_delay
    /// [`Error::ConnectionFailed`]: Error::ConnectionFailed
    fn ensure_open_locked(self: &Arc<Self>, inner: &mut ConnectionInner) -> Result<(), Error> {
        if matches!(inner.state, ConnectionState::Connected(_)) {
            return Ok(());
        }

        inner.state = ConnectionState::Opening;
        let path = self.socket_path.lock().unwrap().clone();
        let policy = self.config.retry_policy;

        for attempt in 0..policy.max_attempts {
            match UnixStream::connect(&path) {
                Ok(stream) => {
                    let reader_stream = stream.try_clone().map_err(|_| Error::ConnectionFailed)?;
                    inner.state = ConnectionState::Connected(stream);
                    inner.generation = inner.generation.wrapping_add(1);
                    let generation = inner.generation;
                    // A Weak reference, not a clone: the reader thread must
                    // never be the thing keeping this Connection alive, or
                    // dropping every external handle while it sits blocked
                    // in `read_exact` would leave nobody able to run `Drop`
                    // and close the socket that would unblock it.
                    let weak = Arc::downgrade(self);
                    let handle =
                        thread::spawn(move || reader::run(weak, reader_stream, generation));
                    if let Some(previous) = self.current_reader.lock().unwrap().replace(handle) {
                        self.retire_reader(previous);
                    }
                    return Ok(());
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                    ) =>
                {
                    tracing::debug!(
                        attempt,
                        path = %path.display(),
                        "connect refused or socket missing, retrying"
                    );
                    thread::sleep(policy.retry_delay);
                }
                Err(err) => {
                    tracing::error!(error = %err, path = %path.display(), "connect failed");
                    inner.state = ConnectionState::NotConnected;
                    return Err(Error::ConnectionFailed);
                }
            }
        }

        tracing::error!(
            attempts = policy.max_attempts,
            path = %path.display(),
            "connect retry budget exhausted"
        );
        inner.state = ConnectionState::NotConnected;
        Err(Error::ConnectionFailed)
    }

    /// ### WRITE REQUEST
    /// **Based on spec.md §4.1/§4.4**
    ///
    /// Serializes the header and writes it and `arg` as a single vectored
    /// write, looping on short writes but never interleaving another
    /// request's bytes (the connection lock is held for the duration).
    fn write_request_locked(
        inner: &ConnectionInner,
        header: RequestHeader,
        arg: &[u8],
    ) -> io::Result<()> {
        let stream = match &inner.state {
            ConnectionState::Connected(stream) => stream,
            _ => unreachable!("ensure_open_locked guarantees Connected"),
        };
        let header_bytes = header
            .to_bytes()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "argument too large"))?;
        let mut slices = [IoSlice::new(&header_bytes), IoSlice::new(arg)];
        write_vectored_all(stream, &mut slices)
    }
}

/// ## READER HOOKS
///
/// The narrow surface the background reader thread (`reader::run`) needs
/// into a [`Connection`] — taking and restoring transaction entries under the
/// connection lock, and tearing the connection down on EOF/short read without
/// ever joining its own thread.
///
/// [`Connection`]: Connection
impl Connection {
    pub(crate) fn take_transaction(&self, id: u32) -> Option<crate::transaction::Entry> {
        self.inner.lock().unwrap().registry.take(id)
    }

    pub(crate) fn reinsert_transaction(&self, id: u32, entry: crate::transaction::Entry) {
        self.inner.lock().unwrap().registry.reinsert(id, entry);
    }

    /// Called by the reader thread itself once its stream is dead. Flips the
    /// connection to `Closed` and cancels every outstanding waiter with
    /// `err`, per spec.md §4.5 step 1. Never joins the reader thread's own
    /// handle — a thread cannot join itself, and the owning handle lives in
    /// `current_reader`/`retired_readers` anyway, reaped later from another
    /// thread by `ensure_open_locked`, `send_with_retry`, or `Drop`.
    ///
    /// `generation` guards against a stale reader — one superseded by a
    /// newer connection before it noticed its own stream had died —
    /// cancelling a registry that by now belongs to a different connection
    /// attempt.
    pub(crate) fn on_reader_terminated(&self, generation: u64, err: Error) {
        let mut inner = self.inner.lock().unwrap();
        if inner.generation != generation {
            return;
        }
        inner.state = ConnectionState::NotConnected;
        inner.registry.cancel_all(err);
    }
}

/// Writes every byte of `bufs`, looping on partial `writev` results. Partial
/// writes are a hard transport fault per spec.md §4.4 only in the sense that
/// the caller treats any I/O error as fatal to the connection; a short but
/// successful write is resumed here rather than surfaced.
fn write_vectored_all(mut stream: &UnixStream, bufs: &mut [IoSlice<'_>]) -> io::Result<()> {
    let mut bufs = bufs;
    while !bufs.is_empty() {
        let written = stream.write_vectored(bufs)?;
        if written == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "failed to write whole request",
            ));
        }
        IoSlice::advance_slices(&mut bufs, written);
    }
    Ok(())
}

impl Drop for Connection {
    /// ### DISPOSE
    /// **Based on spec.md §6/§9: "the reference source leaves TODOs here; a
    /// correct implementation MUST perform both [close and join]"**
    ///
    /// Shuts the socket down first and releases `inner`'s lock before
    /// joining anything: the reader thread's last act before exiting is
    /// calling back into [`on_reader_terminated`], which needs that same
    /// lock. Joining while still holding it would deadlock this thread
    /// against the one it's waiting on.
    ///
    /// [`on_reader_terminated`]: Connection::on_reader_terminated
    fn drop(&mut self) {
        {
            let mut inner = self.inner.lock().unwrap();
            Self::close_locked(&mut inner);
        }
        if let Some(handle) = self.current_reader.lock().unwrap().take() {
            let _ = handle.join();
        }
        let retired: Vec<_> = self.retired_readers.lock().unwrap().drain(..).collect();
        for handle in retired {
            let _ = handle.join();
        }
    }
}
