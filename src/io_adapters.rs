//! Output duplication for capturing commands.
//!
//! A capturing command has its stdout and stderr piped; one [`pump`] thread per
//! pipe copies each chunk into a [`TeeWriter`], which forwards it to the terminal
//! and to the command's [`Recorder`].

use colored::Colorize;
use std::io::{self, Read, Result as IoResult, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// Memory-backed, append-only record of a command's output.
///
/// Clones share the same buffer, so both pump threads of one command can write
/// into it. A recorder is never shared between commands.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, data: &[u8]) {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(data);
    }

    /// Copy of the recorded bytes as text; invalid UTF-8 is replaced.
    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// Decoration applied to the terminal copy of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// Bold red, used for stderr.
    Error,
}

impl Marker {
    /// Wraps the raw bytes in the marker's escape codes.
    ///
    /// The codes are taken from a styled placeholder so `colored`'s terminal
    /// detection and overrides still apply; `data` itself is never decoded.
    fn paint(self, data: &[u8]) -> Vec<u8> {
        let styled = match self {
            Marker::Error => "\0".red().bold().to_string(),
        };
        let (prefix, suffix) = styled.split_once('\0').unwrap_or(("", ""));

        let mut out = Vec::with_capacity(prefix.len() + data.len() + suffix.len());
        out.extend_from_slice(prefix.as_bytes());
        out.extend_from_slice(data);
        out.extend_from_slice(suffix.as_bytes());
        out
    }
}

/// Writer that sends every chunk to a terminal sink and to a [`Recorder`].
///
/// The recorder always receives the plain bytes; the optional [`Marker`] only
/// decorates what the terminal sees. A failing terminal never prevents recording.
pub struct TeeWriter<W> {
    terminal: W,
    recorder: Recorder,
    marker: Option<Marker>,
}

impl<W: Write> TeeWriter<W> {
    pub fn new(terminal: W, recorder: Recorder, marker: Option<Marker>) -> Self {
        Self {
            terminal,
            recorder,
            marker,
        }
    }

    pub fn into_inner(self) -> W {
        self.terminal
    }
}

impl<W: Write> Write for TeeWriter<W> {
    fn write(&mut self, data: &[u8]) -> IoResult<usize> {
        self.recorder.append(data);
        let result = match self.marker {
            Some(marker) => self.terminal.write_all(&marker.paint(data)),
            None => self.terminal.write_all(data),
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "terminal write failed, output still recorded");
        }
        // Terminal output is not line buffered.
        let _ = self.terminal.flush();
        Ok(data.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        self.terminal.flush()
    }
}

/// Spawns a thread copying `reader` into `writer` until end of stream.
///
/// Chunks are forwarded as soon as they are read.
pub fn pump<R, W>(mut reader: R, mut writer: W) -> JoinHandle<IoResult<()>>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => writer.write_all(&buf[..n])?,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        writer.flush()
    })
}
