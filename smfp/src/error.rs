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

//! ## ERROR TAXONOMY
//!
//! [Error] is a tagged integer occupying two disjoint sub-ranges: local
//! (transport/our-side faults) and remote (server-reported, carried in-band as
//! a negative response length). `0` is reserved as the sentinel "no error".
//!
//! [Error]: Error

use std::io;

/// ## ERROR
///
/// The stable error space shared with the wire: local errors occupy
/// `[-199, -100]`, remote errors occupy `[-299, -200]`. `NoErr` (`0`) is never
/// constructed as an [Error] value — its absence is represented as `Ok(())`
/// or `None` at call sites instead.
///
/// [Error]: Error
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Error {
    /// ### CONNECTION FAILED
    ///
    /// The connection could not be established within the configured retry
    /// budget, or an established connection was lost (short read, EOF, or a
    /// non-recoverable write failure).
    #[error("connection failed")]
    ConnectionFailed = -100,

    /// ### INVALID ARGUMENT
    ///
    /// The caller's request argument exceeds the encoder's representable
    /// size (`u32::MAX - 5` bytes).
    #[error("invalid argument")]
    InvalidArgument = -101,

    /// ### UNKNOWN REQUEST CODE
    ///
    /// The remote entity reported, via a negative response length, that it
    /// does not understand the request code sent to it.
    #[error("unknown request code")]
    UnknownRequestCode = -200,

    /// ### REMOTE ERROR (OTHER)
    ///
    /// A remote error code outside the set this crate gives a name to. The
    /// numeric code is preserved for the caller to interpret.
    #[error("remote error {0}")]
    Remote(i32),
}

impl Error {
    /// ### LOCAL BEGIN / REMOTE END
    ///
    /// The numberspace's two boundaries; the sub-ranges themselves
    /// (`[-199, -100]` local, `[-299, -200]` remote) are contiguous between
    /// them.
    const LOCAL_BEGIN: i32 = -100;
    const REMOTE_END: i32 = -299;

    /// ### WIRE CODE
    ///
    /// The stable numeric code for this [Error], as it would be carried on
    /// the wire (for remote errors) or reported to a caller comparing against
    /// the documented numberspace (for local errors).
    ///
    /// [Error]: Error
    pub fn code(self) -> i32 {
        match self {
            Error::ConnectionFailed => -100,
            Error::InvalidArgument => -101,
            Error::UnknownRequestCode => -200,
            Error::Remote(code) => code,
        }
    }

    /// ### FROM REMOTE CODE
    ///
    /// Constructs an [Error] from a negative response length, mapping the
    /// well-known remote codes and preserving the rest as [Error::Remote].
    ///
    /// [Error]: Error
    pub fn from_remote_code(code: i32) -> Self {
        match code {
            -200 => Error::UnknownRequestCode,
            other => Error::Remote(other),
        }
    }

    /// ### IS ERROR
    /// **Based on SMFPClient.h's `IsSMFPErr`**
    ///
    /// True iff `code` falls within the combined local+remote numberspace,
    /// `[-299, -100]`.
    pub fn is_error_code(code: i32) -> bool {
        (Error::REMOTE_END..=Error::LOCAL_BEGIN).contains(&code)
    }

    /// ### IS LOCAL
    ///
    /// True iff this error originates on the client/transport side rather
    /// than being reported in-band by the remote entity.
    pub fn is_local(self) -> bool {
        matches!(self, Error::ConnectionFailed | Error::InvalidArgument)
    }
}

impl From<io::Error> for Error {
    /// Any I/O fault reaching the boundary of this crate is, by definition,
    /// a connection failure: spec.md §7 treats every write/read fault as
    /// `ConnectionFailed` except for the explicitly-handled EPIPE-reconnect
    /// path, which never reaches this conversion.
    fn from(_: io::Error) -> Self {
        Error::ConnectionFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_documented_numberspace() {
        assert_eq!(Error::ConnectionFailed.code(), -100);
        assert_eq!(Error::InvalidArgument.code(), -101);
        assert_eq!(Error::UnknownRequestCode.code(), -200);
        assert_eq!(Error::Remote(-250).code(), -250);
    }

    #[test]
    fn from_remote_code_names_known_codes_and_preserves_others() {
        assert_eq!(Error::from_remote_code(-200), Error::UnknownRequestCode);
        assert_eq!(Error::from_remote_code(-250), Error::Remote(-250));
    }

    #[test]
    fn is_error_code_covers_exactly_the_local_and_remote_ranges() {
        assert!(Error::is_error_code(-100));
        assert!(Error::is_error_code(-200));
        assert!(Error::is_error_code(-299));
        assert!(!Error::is_error_code(-99));
        assert!(!Error::is_error_code(-300));
        assert!(!Error::is_error_code(0));
    }

    #[test]
    fn local_vs_remote_classification() {
        assert!(Error::ConnectionFailed.is_local());
        assert!(Error::InvalidArgument.is_local());
        assert!(!Error::UnknownRequestCode.is_local());
        assert!(!Error::Remote(-250).is_local());
    }
}
