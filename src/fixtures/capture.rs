//! Per-unit output capture
//!
//! Each unit writes through its context's sinks instead of the process
//! streams, so concurrent units never interleave captured text. Restoring
//! detaches the buffers; writes after that pass through to the real stream.

use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;

use crate::models::CapturedOutput;

#[derive(Clone, Copy, Debug)]
enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
struct Sink {
    stream: Stream,
    buffer: Mutex<Option<Vec<u8>>>,
}

impl Sink {
    fn new(stream: Stream, enabled: bool) -> Arc<Self> {
        Arc::new(Self {
            stream,
            buffer: Mutex::new(enabled.then(Vec::new)),
        })
    }

    fn detach(&self) -> String {
        self.buffer
            .lock()
            .take()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }
}

/// Capture state for one unit
#[derive(Clone, Debug)]
pub struct OutputCapture {
    stdout: Arc<Sink>,
    stderr: Arc<Sink>,
}

impl OutputCapture {
    /// Start capturing, or pass everything through when `enabled` is false
    pub fn new(enabled: bool) -> Self {
        Self {
            stdout: Sink::new(Stream::Stdout, enabled),
            stderr: Sink::new(Stream::Stderr, enabled),
        }
    }

    pub fn stdout(&self) -> CaptureWriter {
        CaptureWriter {
            sink: self.stdout.clone(),
        }
    }

    pub fn stderr(&self) -> CaptureWriter {
        CaptureWriter {
            sink: self.stderr.clone(),
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.stdout.buffer.lock().is_some() || self.stderr.buffer.lock().is_some()
    }

    /// Stop capturing and return what was written so far
    pub fn restore(&self) -> CapturedOutput {
        CapturedOutput {
            stdout: self.stdout.detach(),
            stderr: self.stderr.detach(),
        }
    }
}

/// `io::Write` handle onto one captured stream
#[derive(Clone, Debug)]
pub struct CaptureWriter {
    sink: Arc<Sink>,
}

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(buffer) = self.sink.buffer.lock().as_mut() {
            buffer.extend_from_slice(buf);
            return Ok(buf.len());
        }
        match self.sink.stream {
            Stream::Stdout => io::stdout().write(buf),
            Stream::Stderr => io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.sink.buffer.lock().is_some() {
            return Ok(());
        }
        match self.sink.stream {
            Stream::Stdout => io::stdout().flush(),
            Stream::Stderr => io::stderr().flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_collects_both_streams() {
        let capture = OutputCapture::new(true);
        writeln!(capture.stdout(), "hello").unwrap();
        write!(capture.stderr(), "warn").unwrap();
        writeln!(capture.stdout(), "again").unwrap();

        let output = capture.restore();
        assert_eq!(output.stdout, "hello\nagain\n");
        assert_eq!(output.stderr, "warn");
        assert!(!capture.is_capturing());
    }

    #[test]
    fn test_restore_detaches_buffers() {
        let capture = OutputCapture::new(true);
        let mut late = capture.stdout();
        write!(late, "kept").unwrap();
        assert_eq!(capture.restore().stdout, "kept");

        assert_eq!(late.write(b"").unwrap(), 0);
        assert!(capture.restore().is_empty());
    }

    #[test]
    fn test_disabled_capture_records_nothing() {
        let capture = OutputCapture::new(false);
        assert!(!capture.is_capturing());
        capture.stdout().flush().unwrap();
        assert!(capture.restore().is_empty());
    }

    #[test]
    fn test_clones_share_buffers() {
        let capture = OutputCapture::new(true);
        let clone = capture.clone();
        write!(clone.stdout(), "from clone").unwrap();
        assert_eq!(capture.restore().stdout, "from clone");
    }
}
