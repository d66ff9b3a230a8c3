// Copyright 2026 The toolshim Authors
// SPDX-License-Identifier: Apache-2.0

// Stream types
//
// The client-facing sink processors write framed bytes into, UTF-8
// reassembly across chunk boundaries, and stream errors.

use bytes::Bytes;

// ---------------------------------------------------------------------------
// Response sink
// ---------------------------------------------------------------------------

/// Collects framed output for the client. Once ended, writes are dropped.
///
/// Processors write synchronously; the pipe drains the sink into the
/// response channel after every call.
#[derive(Debug, Default)]
pub struct ResponseSink {
    frames: Vec<Bytes>,
    closed: bool,
}

impl ResponseSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, frame: impl Into<Bytes>) {
        if self.closed {
            tracing::trace!("write after stream end dropped");
            return;
        }
        self.frames.push(frame.into());
    }

    /// Close the sink. Returns false if it was already closed.
    pub fn end(&mut self) -> bool {
        !std::mem::replace(&mut self.closed, true)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Take everything written since the last drain.
    pub fn drain(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.frames)
    }
}

// ---------------------------------------------------------------------------
// UTF-8 reassembly
// ---------------------------------------------------------------------------

/// Decodes a byte stream as UTF-8, carrying a multi-byte character split
/// across chunk boundaries into the next chunk. Invalid sequences become
/// U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.carry);
        input.extend_from_slice(chunk);

        let mut out = String::with_capacity(input.len());
        let mut rest = &input[..];
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, tail) = rest.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[len..];
                        }
                        None => {
                            self.carry = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush a dangling partial character at end of stream.
    pub fn finish(&mut self) -> String {
        let carry = std::mem::take(&mut self.carry);
        String::from_utf8_lossy(&carry).into_owned()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of the backend byte stream, reported to the client as an error
/// frame.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    #[error("backend stream failed: {0}")]
    Upstream(String),
}
