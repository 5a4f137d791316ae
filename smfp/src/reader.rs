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

//! ## READER LOOP
//! **Based on spec.md §4.5 and `SMFPClient.c`'s `_SMFPReaderThread`**
//!
//! One thread per open connection, spawned by [`ensure_open_locked`], reading
//! response frames and dispatching each to the handler registered for its
//! transaction id. Runs entirely outside the connection lock except for the
//! brief, explicit lock-and-release calls back into [`Connection`].
//!
//! The thread holds only a [`Weak`] reference to its [`Connection`], never an
//! owning one: an owning clone would keep the connection alive for as long as
//! this loop is blocked in a read, which is exactly when a caller dropping
//! every other handle most wants the socket closed. A dead weak reference
//! just means the connection is already gone and there is nothing left to
//! report back to.
//!
//! [`ensure_open_locked`]: crate::connection::Connection
//! [`Connection`]: crate::Connection
//! [`Weak`]: std::sync::Weak

use std::io::{self, Read};
use std::os::unix::net::UnixStream;
use std::sync::Weak;

use crate::error::Error;
use crate::frame::ResponseHeader;
use crate::{Connection, ResponseContext};

/// ### RUN
///
/// The reader thread body. Reads response headers until the stream yields a
/// short read or EOF, dispatching each to its transaction's handler. Exits by
/// tearing the connection down via [`Connection::on_reader_terminated`] — the
/// only path by which this loop ends — or, once the connection itself has
/// been dropped, simply by returning.
///
/// `generation` identifies the connect attempt this reader was spawned for;
/// it is handed back to [`Connection::on_reader_terminated`] so a reader that
/// outlives its own generation cannot clobber a newer one's registry.
///
/// [`Connection::on_reader_terminated`]: crate::Connection
pub(crate) fn run(connection: Weak<Connection>, mut stream: UnixStream, generation: u64) {
    loop {
        let mut header_bytes = [0u8; 8];
        if let Err(err) = stream.read_exact(&mut header_bytes) {
            tracing::debug!(error = %err, "reader: short read or EOF, closing connection");
            if let Some(connection) = connection.upgrade() {
                connection.on_reader_terminated(generation, Error::ConnectionFailed);
            }
            return;
        }
        let header = ResponseHeader::from_bytes(header_bytes);

        let Some(connection) = connection.upgrade() else {
            // The last external handle is gone; nobody is left to deliver to.
            return;
        };

        let Some(mut entry) = connection.take_transaction(header.transaction_id) else {
            tracing::warn!(
                transaction_id = header.transaction_id,
                "reader: response for unknown or already-completed transaction, discarding"
            );
            if header.has_payload() {
                if let Err(err) = drain(&mut stream, header.length as u32) {
                    tracing::debug!(error = %err, "reader: failed draining unowned payload");
                    connection.on_reader_terminated(generation, Error::ConnectionFailed);
                    return;
                }
            }
            continue;
        };

        let outcome = if header.has_payload() {
            let ctx = ResponseContext {
                err: None,
                payload_size: header.length as u32,
                reader: &mut stream,
            };
            entry.handler.on_response(ctx)
        } else {
            let ctx = ResponseContext {
                err: Some(Error::from_remote_code(header.length)),
                payload_size: 0,
                reader: &mut io::empty(),
            };
            entry.handler.on_response(ctx)
        };

        if outcome.completed {
            let result = match outcome.err {
                Some(err) => Err(err),
                None => Ok(()),
            };
            let _ = entry.completion.send(result);
        } else {
            connection.reinsert_transaction(header.transaction_id, entry);
        }
    }
}

/// Consumes and discards `len` bytes from `stream` to keep framing aligned
/// when a response arrives for a transaction no longer registered (spec.md
/// §9, open question 3).
fn drain(stream: &mut UnixStream, len: u32) -> io::Result<()> {
    let mut remaining = len as u64;
    let mut buf = [0u8; 4096];
    while remaining > 0 {
        let chunk = remaining.min(buf.len() as u64) as usize;
        stream.read_exact(&mut buf[..chunk])?;
        remaining -= chunk as u64;
    }
    Ok(())
}
