//! error taxonomy for the streaming core
//!
//! Transient conditions (packet loss, resync, one-off socket errors) never
//! show up here.  They are absorbed and counted where they happen.  These
//! variants are the conditions that change what a direction is doing.
use std::{error::Error, fmt};

use super::frame::StreamFormat;

#[derive(Debug)]
pub enum StreamError {
    /// no usable device could be resolved or opened.  Retried with backoff
    /// while the direction is recovering.
    DeviceUnavailable(String),
    /// the stream format cannot be resampled to the device format within
    /// tolerance.  The direction stops.
    FormatMismatch {
        stream: StreamFormat,
        device: StreamFormat,
    },
    /// the audio backend failed mid stream (read/write error)
    Backend(String),
    /// socket level failure
    Socket(std::io::Error),
    /// operation on a session that has been closed
    Closed,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StreamError::DeviceUnavailable(what) => {
                write!(f, "no usable audio device: {}", what)
            }
            StreamError::FormatMismatch { stream, device } => {
                write!(
                    f,
                    "cannot resample stream format {} to device format {}",
                    stream, device
                )
            }
            StreamError::Backend(what) => write!(f, "audio backend error: {}", what),
            StreamError::Socket(err) => write!(f, "socket error: {}", err),
            StreamError::Closed => write!(f, "session is closed"),
        }
    }
}

impl Error for StreamError {}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> StreamError {
        StreamError::Socket(err)
    }
}

#[cfg(test)]
mod test_stream_error {
    use super::*;

    #[test]
    fn display() {
        let e = StreamError::DeviceUnavailable("default".to_string());
        assert_eq!(e.to_string(), "no usable audio device: default");
        let e = StreamError::FormatMismatch {
            stream: StreamFormat::new(48_000, 2),
            device: StreamFormat::new(500, 2),
        };
        assert!(e.to_string().contains("cannot resample"));
    }
}
