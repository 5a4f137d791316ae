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

//! # SIMPLEST MULTIPLEXED FRAMING PROTOCOL (SMFP) — CLIENT
//! **Based on:** `rentzsch/simplest-multiplexed-framing-protocol`
//!
//! [SMFP] is a length-prefixed request/response protocol over a reliable,
//! ordered byte stream — a Unix-domain socket in this crate's reference
//! deployment — that multiplexes many concurrent in-flight transactions over
//! a single connection. Many application threads may call
//! [Send Request Receive Responses] concurrently; each request is tagged with
//! a unique transaction id and a single background reader thread demultiplexes
//! the server's responses back to the originating caller.
//!
//! ---------------------------------------------------------------------------
//!
//! To use this crate:
//! - Create a [Connection] with [New Connection].
//! - Call [Send Request Receive Responses] with a [Handler] for each request;
//!   the connection lazily connects (and reconnects) as needed.
//! - Optionally redirect future traffic with [Switch Socket].
//! - Dropping the [Connection] closes the socket and joins the reader thread.
//!
//! [SMFP]:                           crate
//! [Connection]:                     Connection
//! [New Connection]:                 Connection::new
//! [Switch Socket]:                  Connection::switch_socket
//! [Send Request Receive Responses]: Connection::send_request_receive_responses
//! [Handler]:                        Handler

mod connection;
pub mod error;
mod frame;
mod reader;
mod transaction;

use std::io::Read;
use std::time::Duration;

pub use connection::Connection;
pub use error::Error;

/// ## RETRY POLICY
/// **Based on spec.md §4.3**
///
/// Governs how many times, and with what delay between attempts, the
/// [Connect Procedure] retries a connect that failed with `ECONNREFUSED` or
/// `ENOENT` before surfacing [Error::ConnectionFailed]. Any other connect
/// errno is not retried.
///
/// [Connect Procedure]: Connection::send_request_receive_responses
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Maximum number of connect attempts on the retryable error class.
    pub max_attempts: u8,
    /// Delay between retry attempts. The reference contract is a fixed
    /// one-second delay with no exponential backoff.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    /// Ten attempts, one second apart — spec.md §4.3's fixed contract.
    fn default() -> Self {
        Self {
            max_attempts: 10,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// ## CLIENT CONFIG
///
/// Construction-time parameters for a [Connection]. This crate carries no
/// configuration-file or CLI surface of its own (the CLI is an external
/// collaborator per spec.md §1) — callers assemble this directly.
///
/// [Connection]: Connection
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub retry_policy: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// ## RESPONSE CONTEXT
/// **Based on spec.md §6's `(err, fd, payloadSize, context)` handler
/// contract**
///
/// Passed to a [Handler] once per response frame belonging to its
/// transaction.
///
/// - If `err` is `Some`, the remote entity reported an error for this
///   transaction in-band; `reader` yields no bytes and `payload_size` is
///   `0`. The [Handler] must not attempt to read a payload.
/// - If `err` is `None`, `reader` is positioned at the start of the
///   payload and the [Handler] **must** read exactly `payload_size` bytes
///   from it before returning — [`read_exact_or_failed`] is offered for
///   this.
///
/// [Handler]: Handler
/// [`read_exact_or_failed`]: read_exact_or_failed
pub struct ResponseContext<'a> {
    pub err: Option<Error>,
    pub payload_size: u32,
    pub reader: &'a mut dyn Read,
}

/// ## HANDLER OUTCOME
/// **Based on spec.md §6's `SMFPResponseReceiverResult`**
///
/// Returned by a [Handler] after processing one response frame.
///
/// [Handler]: Handler
#[derive(Clone, Copy, Debug, Default)]
pub struct HandlerOutcome {
    /// Whether this was the transaction's final response. If `false`, the
    /// same [Handler] is invoked again for the next response frame carrying
    /// this transaction id (streaming responses).
    ///
    /// [Handler]: Handler
    pub completed: bool,
    /// The error to report to the caller once the transaction completes.
    /// Ignored while `completed` is `false`.
    pub err: Option<Error>,
}

/// ## HANDLER
/// **Based on spec.md §6 and §9 ("Dynamic dispatch... Avoid coupling to any
/// particular closure mechanism")**
///
/// The caller-supplied callback invoked by the reader thread for every
/// response frame belonging to one transaction. Modeled as a trait rather
/// than a bare function pointer + context, per spec.md's own invitation to
/// pick whatever dispatch mechanism is idiomatic.
pub trait Handler: Send {
    fn on_response(&mut self, ctx: ResponseContext<'_>) -> HandlerOutcome;
}

impl<F> Handler for F
where
    F: FnMut(ResponseContext<'_>) -> HandlerOutcome + Send,
{
    fn on_response(&mut self, ctx: ResponseContext<'_>) -> HandlerOutcome {
        self(ctx)
    }
}

/// ### READ EXACT OR FAILED
/// **Based on `SMFPClient.c`'s `SMFPRead`**
///
/// Reads exactly `buf.len()` bytes from `reader`, translating a short read
/// or EOF into [Error::ConnectionFailed]. Intended for [Handler]
/// implementations consuming their transaction's payload.
///
/// [Handler]: Handler
pub fn read_exact_or_failed(reader: &mut dyn Read, buf: &mut [u8]) -> Result<(), Error> {
    reader
        .read_exact(buf)
        .map_err(|_| Error::ConnectionFailed)
}
