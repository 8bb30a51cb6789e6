/// Bounded collection of worker output.
///
/// The worker's stdout carries exactly one protocol report. It is read on a
/// dedicated thread so a worker that floods the pipe can neither block the
/// supervisor nor grow host memory past the configured bound.
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::thread;
use std::time::Duration;

/// How a collected stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputIntegrity {
    /// EOF reached within the limit
    Complete,
    /// Stream exceeded the limit; the rest was drained and discarded
    Truncated,
    /// Read failed before EOF
    ReadError,
}

impl std::fmt::Display for OutputIntegrity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputIntegrity::Complete => write!(f, "complete"),
            OutputIntegrity::Truncated => write!(f, "truncated"),
            OutputIntegrity::ReadError => write!(f, "read_error"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Collected {
    pub bytes: Vec<u8>,
    pub integrity: OutputIntegrity,
}

/// Handle to a stream being read in the background.
pub struct OutputCollector {
    rx: Receiver<Collected>,
}

impl OutputCollector {
    /// Start reading `stream` on its own thread, keeping at most `limit` bytes.
    pub fn spawn<R: Read + Send + 'static>(stream: R, limit: usize) -> std::io::Result<Self> {
        let (tx, rx) = bounded(1);
        thread::Builder::new()
            .name("snipbox-collector".to_string())
            .spawn(move || {
                let _ = tx.send(collect_stream(stream, limit));
            })?;
        Ok(Self { rx })
    }

    /// Wait for the stream to reach EOF. `None` when it did not finish in
    /// time, which means something other than the worker still holds the
    /// write end.
    pub fn finish(self, timeout: Duration) -> Option<Collected> {
        match self.rx.recv_timeout(timeout) {
            Ok(collected) => Some(collected),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

/// Read `stream` to EOF keeping at most `limit` bytes.
pub fn collect_stream<R: Read>(mut stream: R, limit: usize) -> Collected {
    let mut bytes = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut integrity = OutputIntegrity::Complete;

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                if integrity == OutputIntegrity::Truncated {
                    continue;
                }
                let room = limit.saturating_sub(bytes.len());
                if n > room {
                    bytes.extend_from_slice(&chunk[..room]);
                    integrity = OutputIntegrity::Truncated;
                } else {
                    bytes.extend_from_slice(&chunk[..n]);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => {
                integrity = OutputIntegrity::ReadError;
                break;
            }
        }
    }

    Collected { bytes, integrity }
}
