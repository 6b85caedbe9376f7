// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Length-prefixed MessagePack framing over a byte stream.
//!
//! Each frame is a big-endian `u32` byte count followed by that many bytes of
//! `rmp_serde::to_vec_named` output.

use std::io::{ErrorKind, Read, Write};
use std::os::unix::io::RawFd;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::{Result, WorkerError};

/// Upper bound on a single frame. Inline raw payloads above the shared buffer
/// capacity still have to fit in here.
pub const MAX_FRAME_LEN: usize = 1 << 30;

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    encode_limited(value, MAX_FRAME_LEN)
}

/// [`encode`] with a custom body limit, itself capped at [`MAX_FRAME_LEN`].
pub fn encode_limited<T: Serialize>(value: &T, limit: usize) -> Result<Vec<u8>> {
    let limit = limit.min(MAX_FRAME_LEN);
    let body = rmp_serde::to_vec_named(value)?;
    if body.len() > limit {
        return Err(WorkerError::Protocol(format!(
            "frame of {} bytes exceeds the {} byte limit",
            body.len(),
            limit
        )));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(body)?)
}

/// Encode and write one frame in a single `write_all`.
pub fn write_frame<W: Write + ?Sized, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
    let frame = encode(value)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame body. `Ok(None)` means the peer closed the stream cleanly
/// between frames.
pub fn read_frame<R: Read + ?Sized>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(WorkerError::Protocol(
                    "stream closed inside a frame header".into(),
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(WorkerError::Protocol(format!(
            "announced frame of {} bytes exceeds the {} byte limit",
            len, MAX_FRAME_LEN
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            WorkerError::Protocol("stream closed inside a frame body".into())
        } else {
            e.into()
        }
    })?;
    Ok(Some(body))
}

/// Read and decode one frame, blocking.
pub fn read_message<R: Read + ?Sized, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>> {
    match read_frame(reader)? {
        Some(body) => Ok(Some(decode(&body)?)),
        None => Ok(None),
    }
}

/// Wait up to `timeout` for `fd` to become readable (or hung up).
pub fn poll_readable(fd: RawFd, timeout: Duration) -> std::io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;

    // SAFETY: `pollfd` is a valid, exclusively borrowed array of length 1.
    let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(rc > 0 && pollfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::{Command, FrameRef, Message, Request};
    use std::io::Cursor;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_frames_are_length_prefixed() {
        let request = Request::new(
            1,
            &Command::ResultsRaw(FrameRef {
                id: "0".into(),
                frame: 2,
            }),
        )
        .unwrap();
        let frame = encode(&Message::Request(request.clone())).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);

        let mut cursor = Cursor::new(frame);
        let decoded: Message = read_message(&mut cursor).unwrap().unwrap();
        assert_eq!(decoded, Message::Request(request));
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_truncated_body_is_protocol_error() {
        let mut frame = encode(&"hello".to_string()).unwrap();
        frame.truncate(frame.len() - 2);
        let err = read_frame(&mut Cursor::new(frame)).unwrap_err();
        assert_eq!(err.kind(), "protocol");
    }

    #[test]
    fn test_oversized_header_rejected() {
        let header = (u32::MAX).to_be_bytes().to_vec();
        let err = read_frame(&mut Cursor::new(header)).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_poll_times_out_then_sees_data() {
        let (a, mut b) = UnixStream::pair().unwrap();
        assert!(!poll_readable(a.as_raw_fd(), Duration::from_millis(10)).unwrap());
        write_frame(&mut b, &42u32).unwrap();
        assert!(poll_readable(a.as_raw_fd(), Duration::from_millis(500)).unwrap());
    }

    #[test]
    fn test_poll_reports_hangup() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(b);
        assert!(poll_readable(a.as_raw_fd(), Duration::from_millis(500)).unwrap());
        let mut reader = &a;
        assert!(read_frame(&mut reader).unwrap().is_none());
    }
}
