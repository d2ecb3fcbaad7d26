//! Sending side of a transfer session and the connect-mode retry driver

use crate::cancel::CancelToken;
use crate::copy::send_body;
use crate::error::{AdmissionKind, Result, TransferError};
use crate::fs_enum::{total_size, walk_directory, FileEntry};
use crate::logger::{Logger, NoopLogger};
use crate::net::{Endpoint, Session, TcpSession};
use crate::progress::TransferProgress;
use crate::protocol::{retry, FileMeta, Message, OverwriteMode, TransferStart, DEFAULT_CHUNK_SIZE};
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SendSummary {
    pub entries: u64,
    pub bytes: u64,
}

/// Fixed-delay retry policy for connect mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: retry::DEFAULT_RETRIES,
            delay: Duration::from_millis(retry::DEFAULT_DELAY_MS),
        }
    }
}

/// One entry as it will be announced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedEntry {
    pub path: PathBuf,
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Build the ordered entry list for `source`: a lone file by basename, or a
/// walked tree by relative path.
pub fn plan_entries(source: &Path, logger: &dyn Logger) -> Result<Vec<PlannedEntry>> {
    let md = fs::metadata(source)
        .map_err(|e| TransferError::io(format!("stat {}", source.display()), e))?;
    if md.is_dir() {
        let entries = walk_directory(source, logger)?;
        logger.info(&format!(
            "Sending {} entries ({} bytes)",
            entries.len(),
            total_size(&entries)
        ));
        entries.iter().map(planned_from_walk).collect()
    } else if md.is_file() {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                TransferError::io(
                    format!("encoding name {}", source.display()),
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "file name is missing or not valid UTF-8",
                    ),
                )
            })?;
        Ok(vec![PlannedEntry {
            path: source.to_path_buf(),
            name: name.to_string(),
            is_dir: false,
            size: md.len(),
        }])
    } else {
        Err(TransferError::io(
            format!("reading {}", source.display()),
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "not a regular file or directory",
            ),
        ))
    }
}

fn planned_from_walk(entry: &FileEntry) -> Result<PlannedEntry> {
    Ok(PlannedEntry {
        path: entry.path.clone(),
        name: entry.wire_name()?,
        is_dir: entry.is_dir,
        size: entry.size,
    })
}

pub struct Sender {
    source: PathBuf,
    overwrite: OverwriteMode,
    chunk_size: usize,
    logger: Arc<dyn Logger>,
    cancel: CancelToken,
    progress: TransferProgress,
}

impl Sender {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            overwrite: OverwriteMode::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            logger: Arc::new(NoopLogger),
            cancel: CancelToken::new(),
            progress: TransferProgress::disabled(),
        }
    }

    /// Policy announced in every Meta frame
    pub fn overwrite(mut self, mode: OverwriteMode) -> Self {
        self.overwrite = mode;
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn progress(mut self, progress: TransferProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Run the whole transfer, retrying connection-level failures in connect
    /// mode. Every attempt starts again from the first entry.
    pub fn send(&self, endpoint: &Endpoint, policy: RetryPolicy) -> Result<SendSummary> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match self.attempt(endpoint) {
                Ok(summary) => return Ok(summary),
                Err(e) => e,
            };
            if !endpoint.is_connect() || !err.is_retryable() || self.cancel.is_cancelled() {
                return Err(err);
            }
            if attempt > policy.retries {
                if policy.retries == 0 {
                    return Err(err);
                }
                return Err(TransferError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            self.logger.output(&format!(
                "Attempt {} failed: {}. Retrying in {} ms ({} of {} retries)...",
                attempt,
                err,
                policy.delay.as_millis(),
                attempt,
                policy.retries
            ));
            std::thread::sleep(policy.delay);
            self.cancel.check()?;
        }
    }

    fn attempt(&self, endpoint: &Endpoint) -> Result<SendSummary> {
        let entries = plan_entries(&self.source, &*self.logger)?;
        let stream = endpoint.establish(&*self.logger)?;
        self.cancel.register(&stream);
        let result = TcpSession::from_stream(stream, self.chunk_size)
            .and_then(|mut session| self.run_entries(&mut session, &entries));
        self.cancel.unregister();
        result
    }

    /// Transfer `source` over an already established session
    pub fn run<R: BufRead, W: Write>(&self, session: &mut Session<R, W>) -> Result<SendSummary> {
        let entries = plan_entries(&self.source, &*self.logger)?;
        self.run_entries(session, &entries)
    }

    fn run_entries<R: BufRead, W: Write>(
        &self,
        session: &mut Session<R, W>,
        entries: &[PlannedEntry],
    ) -> Result<SendSummary> {
        let mut summary = SendSummary::default();
        for entry in entries {
            self.cancel.check()?;
            match self.send_entry(session, entry) {
                Ok(bytes) => {
                    summary.entries += 1;
                    summary.bytes += bytes;
                }
                Err(e) => {
                    self.logger.entry_failed(&entry.name, &e.to_string());
                    return Err(e);
                }
            }
        }
        self.logger
            .done(summary.entries, summary.bytes, self.progress.elapsed_secs());
        Ok(summary)
    }

    /// One Meta -> Preflight -> (body) -> Result exchange
    fn send_entry<R: BufRead, W: Write>(
        &self,
        session: &mut Session<R, W>,
        entry: &PlannedEntry,
    ) -> Result<u64> {
        let logger = &*self.logger;
        logger.entry_start(&entry.name, entry.is_dir, entry.size, Path::new(""));
        session
            .send(&Message::Meta(FileMeta {
                name: entry.name.clone(),
                size: entry.size,
                is_dir: entry.is_dir,
                overwrite_mode: self.overwrite,
            }))
            .map_err(|e| self.cancel.map_err(e))?;

        match session
            .expect("preflight response")
            .map_err(|e| self.cancel.map_err(e))?
        {
            Message::PreflightOk(ok) => {
                logger.debug(&format!(
                    "Preflight ok for {}, receiver has {} bytes free",
                    entry.name, ok.available_space
                ));
            }
            Message::PreflightFail(fail) => {
                return Err(TransferError::Rejected {
                    kind: AdmissionKind::from_reason(&fail.reason),
                    reason: fail.reason,
                })
            }
            other => {
                return Err(TransferError::protocol(format!(
                    "expected PreflightOk or PreflightFail, got {}",
                    other.kind()
                )))
            }
        }

        if !entry.is_dir {
            session
                .send(&Message::TransferStart(TransferStart {
                    file_size: entry.size,
                }))
                .map_err(|e| self.cancel.map_err(e))?;
            let bar = self.progress.file_bar(&entry.name, entry.size);
            let sent = send_body(
                &entry.path,
                session.writer_mut(),
                entry.size,
                self.chunk_size,
                &self.cancel,
                Some(&bar),
            );
            bar.finish_and_clear();
            sent?;
        }

        match session
            .expect("TransferResult")
            .map_err(|e| self.cancel.map_err(e))?
        {
            Message::TransferResult(result) => {
                if !result.ok {
                    return Err(TransferError::RemoteFailure {
                        name: entry.name.clone(),
                        received: result.received_bytes,
                    });
                }
                if result.received_bytes != entry.size {
                    return Err(TransferError::protocol(format!(
                        "receiver acknowledged {} bytes for {}, expected {}",
                        result.received_bytes, entry.name, entry.size
                    )));
                }
            }
            other => {
                return Err(TransferError::protocol(format!(
                    "expected TransferResult, got {}",
                    other.kind()
                )))
            }
        }

        logger.entry_done(&entry.name, entry.size);
        Ok(entry.size)
    }
}
