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

//! # FRAMING
//!
//! Encodes and decodes the fixed-size request and response headers used on
//! the wire. All multi-byte fields are big-endian; the length field never
//! includes its own four bytes.
//!
//! [Request Header]: RequestHeader
//! [Response Header]: ResponseHeader

use crate::error::Error;

/// Maximum `arg` size the encoder can represent: `length = 1 + 4 + argSize`
/// must fit in a `u32`.
pub const MAX_ARG_SIZE: u32 = u32::MAX - 5;

/// ## REQUEST HEADER
/// **Based on spec.md §4.1**
///
/// The nine bytes preceding a request's opaque argument: the message length
/// (excluding itself), the request code, and the transaction id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestHeader {
    pub request_code: u8,
    pub transaction_id: u32,
    pub arg_size: u32,
}

impl RequestHeader {
    /// ### SERIALIZE
    ///
    /// Produces the nine header bytes: `length`, `request_code`,
    /// `transaction_id`. The caller appends `arg_size` bytes of argument
    /// after these.
    pub fn to_bytes(self) -> Result<[u8; 9], Error> {
        if self.arg_size > MAX_ARG_SIZE {
            return Err(Error::InvalidArgument);
        }
        let length: u32 = 1 + 4 + self.arg_size;
        let mut bytes = [0u8; 9];
        bytes[0..4].copy_from_slice(&length.to_be_bytes());
        bytes[4] = self.request_code;
        bytes[5..9].copy_from_slice(&self.transaction_id.to_be_bytes());
        Ok(bytes)
    }
}

/// ## RESPONSE HEADER
/// **Based on spec.md §4.1**
///
/// The eight bytes at the start of every response frame: a signed length
/// (negative encodes a remote error code) and the transaction id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponseHeader {
    pub length: i32,
    pub transaction_id: u32,
}

impl ResponseHeader {
    /// ### DESERIALIZE
    ///
    /// Parses the eight-byte response header. `length` sign-extends per the
    /// wire format; a negative value is a remote error code, never a payload
    /// length.
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self {
            length: i32::from_be_bytes(bytes[0..4].try_into().unwrap()),
            transaction_id: u32::from_be_bytes(bytes[4..8].try_into().unwrap()),
        }
    }

    /// True iff this header carries a payload (possibly zero-length) rather
    /// than an in-band remote error.
    pub fn has_payload(&self) -> bool {
        self.length >= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_header_rejects_oversized_arg() {
        let header = RequestHeader {
            request_code: 0,
            transaction_id: 1,
            arg_size: MAX_ARG_SIZE + 1,
        };
        assert_eq!(header.to_bytes().unwrap_err(), Error::InvalidArgument);
    }

    #[test]
    fn response_header_distinguishes_payload_from_error() {
        let zero_length = ResponseHeader::from_bytes([0, 0, 0, 0, 0, 0, 0, 1]);
        assert!(zero_length.has_payload());
        assert_eq!(zero_length.length, 0);

        let mut bytes = [0u8; 8];
        bytes[0..4].copy_from_slice(&(-200i32).to_be_bytes());
        let error_header = ResponseHeader::from_bytes(bytes);
        assert!(!error_header.has_payload());
        assert_eq!(error_header.length, -200);
    }
}
