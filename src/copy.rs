//! Raw body streaming between a file and the transfer socket

use crate::cancel::CancelToken;
use crate::error::{Result, TransferError};
use crate::protocol::TEMP_SUFFIX;
use indicatif::ProgressBar;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Destination file under construction.
/// Bytes go to `<dest>.ncp_temp`; dropping without `commit` deletes it.
pub struct PartialFile {
    dest: PathBuf,
    temp: PathBuf,
    writer: Option<BufWriter<File>>,
    committed: bool,
}

impl PartialFile {
    pub fn temp_path_for(dest: &Path) -> PathBuf {
        let mut s = dest.as_os_str().to_os_string();
        s.push(TEMP_SUFFIX);
        PathBuf::from(s)
    }

    /// Create (or truncate) the temp file next to `dest`
    pub fn create(dest: &Path, buffer_size: usize) -> io::Result<Self> {
        let temp = Self::temp_path_for(dest);
        let file = File::create(&temp)?;
        Ok(Self {
            dest: dest.to_path_buf(),
            temp,
            writer: Some(BufWriter::with_capacity(buffer_size, file)),
            committed: false,
        })
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    /// Flush, sync and rename onto the destination
    pub fn commit(mut self) -> io::Result<()> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "file already closed"))?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&self.temp, &self.dest)?;
        self.committed = true;
        Ok(())
    }
}

impl Write for PartialFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writer.as_mut() {
            Some(w) => w.write(buf),
            None => Err(io::Error::new(io::ErrorKind::Other, "file already closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(w) => w.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed {
            self.writer.take();
            let _ = fs::remove_file(&self.temp);
        }
    }
}

/// Result of pulling one body off the stream
#[derive(Debug)]
pub enum BodyOutcome {
    /// All bytes consumed and written
    Written,
    /// All bytes consumed but a local write failed; the stream is still in sync
    WriteFailed(io::Error),
}

/// Read exactly `size` raw bytes from `reader` into `sink`.
/// A local write error does not stop consumption so the control stream
/// stays aligned for the following TransferResult.
pub fn receive_body<R: Read, W: Write>(
    reader: &mut R,
    sink: &mut W,
    size: u64,
    chunk_size: usize,
    cancel: &CancelToken,
    progress: Option<&ProgressBar>,
) -> Result<BodyOutcome> {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut remaining = size;
    let mut write_err: Option<io::Error> = None;

    while remaining > 0 {
        cancel.check()?;
        let want = remaining.min(buf.len() as u64) as usize;
        let n = match reader.read(&mut buf[..want]) {
            Ok(0) => {
                return Err(cancel.map_err(TransferError::UnexpectedEof(format!(
                    "connection closed after {} of {} bytes",
                    size - remaining,
                    size
                ))))
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(cancel.map_err(TransferError::from_stream_read("receiving file data", e)))
            }
        };
        if write_err.is_none() {
            if let Err(e) = sink.write_all(&buf[..n]) {
                write_err = Some(e);
            }
        }
        remaining -= n as u64;
        if let Some(pb) = progress {
            pb.inc(n as u64);
        }
    }

    Ok(match write_err {
        Some(e) => BodyOutcome::WriteFailed(e),
        None => BodyOutcome::Written,
    })
}

/// Stream the file at `src` to `writer`, expecting exactly `size` bytes.
/// A file that grew or shrank since it was announced fails with
/// `SourceChanged` before the offending chunk is sent.
pub fn send_body<W: Write>(
    src: &Path,
    writer: &mut W,
    size: u64,
    chunk_size: usize,
    cancel: &CancelToken,
    progress: Option<&ProgressBar>,
) -> Result<u64> {
    let file = File::open(src).map_err(|e| TransferError::io(format!("opening {}", src.display()), e))?;
    // One byte past the declared size is enough to detect growth
    let mut limited = file.take(size.saturating_add(1));
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut sent = 0u64;

    loop {
        cancel.check()?;
        let n = match limited.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransferError::io(format!("reading {}", src.display()), e)),
        };
        if sent + n as u64 > size {
            return Err(TransferError::SourceChanged {
                path: src.display().to_string(),
                declared: size,
                actual: sent + n as u64,
            });
        }
        writer
            .write_all(&buf[..n])
            .map_err(|e| cancel.map_err(TransferError::connection("sending file data", e)))?;
        sent += n as u64;
        if let Some(pb) = progress {
            pb.inc(n as u64);
        }
    }

    if sent != size {
        return Err(TransferError::SourceChanged {
            path: src.display().to_string(),
            declared: size,
            actual: sent,
        });
    }
    writer
        .flush()
        .map_err(|e| cancel.map_err(TransferError::connection("sending file data", e)))?;
    Ok(sent)
}
