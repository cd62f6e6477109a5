//! Line-based socket transport to the reference simulator.
//!
//! A single Unix stream socket carries the whole session: the runner listens,
//! accepts exactly one connection, and exchanges newline-terminated records
//! over it. Reads ending at EOF with a partial line still deliver that line,
//! matching the producer's close behavior. Interrupted reads and writes are
//! retried by the standard library's buffered I/O; `SIGPIPE` should be
//! ignored process-wide (see [`ignore_sigpipe`]) so a reference crash during
//! an ack write surfaces as an error instead of killing the runner.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::common::error::TransportError;

/// Ignores `SIGPIPE` for the whole process.
///
/// Without this, the reference closing its end between our read and our ack
/// write would terminate the runner instead of failing the write.
pub fn ignore_sigpipe() {
    // SAFETY: installing SIG_IGN for SIGPIPE is async-signal-safe and has no
    // preconditions.
    unsafe {
        let _ = libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

/// A listening socket bound to a filesystem path.
///
/// A stale socket file at the path is unlinked before binding; the file is
/// removed again on drop.
#[derive(Debug)]
pub struct Listener {
    inner: UnixListener,
    path: PathBuf,
}

impl Listener {
    /// Binds the listening socket, replacing any stale socket file.
    ///
    /// # Errors
    ///
    /// `TransportError::Bind` when the path cannot be bound.
    pub fn bind(path: &Path) -> Result<Self, TransportError> {
        let _ = fs::remove_file(path);
        let inner = UnixListener::bind(path).map_err(|source| TransportError::Bind {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "listening");
        Ok(Self {
            inner,
            path: path.to_path_buf(),
        })
    }

    /// Accepts the reference connection.
    ///
    /// # Errors
    ///
    /// `TransportError::Accept` on accept failure.
    pub fn accept(&self) -> Result<Connection, TransportError> {
        let (stream, _) = self.inner.accept().map_err(TransportError::Accept)?;
        Connection::new(stream)
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// One accepted reference connection with buffered line reads.
#[derive(Debug)]
pub struct Connection {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl Connection {
    /// Wraps an accepted (or test-constructed) stream.
    ///
    /// # Errors
    ///
    /// `TransportError::Accept` when the stream cannot be duplicated for the
    /// write half.
    pub fn new(stream: UnixStream) -> Result<Self, TransportError> {
        let writer = stream.try_clone().map_err(TransportError::Accept)?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
        })
    }

    /// Reads one line, without its terminator.
    ///
    /// Returns `Ok(None)` on a clean EOF; a partial line followed by EOF is
    /// still delivered.
    ///
    /// # Errors
    ///
    /// `TransportError::Read` on socket failure.
    pub fn read_line(&mut self) -> Result<Option<String>, TransportError> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .map_err(TransportError::Read)?;
        if n == 0 {
            return Ok(None);
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            let _ = line.pop();
        }
        Ok(Some(line))
    }

    /// Writes one record followed by a newline.
    ///
    /// # Errors
    ///
    /// `TransportError::Write` on socket failure (including broken pipe).
    pub fn write_line(&mut self, line: &str) -> Result<(), TransportError> {
        self.writer
            .write_all(line.as_bytes())
            .and_then(|()| self.writer.write_all(b"\n"))
            .map_err(TransportError::Write)
    }
}
