//! Receiving side of a transfer session

use crate::cancel::CancelToken;
use crate::copy::{receive_body, BodyOutcome, PartialFile};
use crate::diskspace::{FsSpaceProbe, SpaceProbe};
use crate::error::{AdmissionKind, Result, TransferError};
use crate::logger::{Logger, NoopLogger};
use crate::net::{Endpoint, Session, TcpSession};
use crate::preflight::{Admission, Admitter, OverwritePrompt, StdinPrompt};
use crate::progress::TransferProgress;
use crate::protocol::{
    FileMeta, Message, OverwriteMode, PreflightFail, PreflightOk, TransferResult,
    DEFAULT_CHUNK_SIZE,
};
use crate::protocol_core::normalize_under_root;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceiveSummary {
    pub entries: u64,
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
    pub rejected: u64,
}

/// Where an entry lands: under `dest` when it is an existing directory,
/// otherwise at `dest` itself.
pub fn resolve_destination(dest: &Path, name: &str) -> std::result::Result<PathBuf, String> {
    if dest.is_dir() {
        normalize_under_root(dest, name)
    } else {
        Ok(dest.to_path_buf())
    }
}

pub struct Receiver {
    dest: PathBuf,
    overwrite: Option<OverwriteMode>,
    chunk_size: usize,
    prompt: Box<dyn OverwritePrompt>,
    space: Box<dyn SpaceProbe>,
    logger: Arc<dyn Logger>,
    cancel: CancelToken,
    progress: TransferProgress,
}

impl Receiver {
    pub fn new(dest: impl Into<PathBuf>) -> Self {
        Self {
            dest: dest.into(),
            overwrite: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            prompt: Box::new(StdinPrompt),
            space: Box::new(FsSpaceProbe),
            logger: Arc::new(NoopLogger),
            cancel: CancelToken::new(),
            progress: TransferProgress::disabled(),
        }
    }

    /// Override the per-entry mode announced by the sender
    pub fn overwrite(mut self, mode: Option<OverwriteMode>) -> Self {
        self.overwrite = mode;
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    pub fn prompt(mut self, prompt: Box<dyn OverwritePrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn space_probe(mut self, probe: Box<dyn SpaceProbe>) -> Self {
        self.space = probe;
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

    /// Obtain the connection and serve it until the peer closes
    pub fn serve(&self, endpoint: &Endpoint) -> Result<ReceiveSummary> {
        let stream = endpoint.establish(&*self.logger)?;
        self.cancel.register(&stream);
        let result = TcpSession::from_stream(stream, self.chunk_size)
            .and_then(|mut session| self.run(&mut session));
        self.cancel.unregister();
        result
    }

    /// Process entries until a clean end-of-stream between entries.
    /// Refused or locally failed entries do not stop the loop, but the first
    /// such failure is returned once the peer closes.
    pub fn run<R: BufRead, W: Write>(
        &self,
        session: &mut Session<R, W>,
    ) -> Result<ReceiveSummary> {
        let logger = &*self.logger;
        let admitter = Admitter::new(&*self.prompt, &*self.space);
        let mut summary = ReceiveSummary::default();
        let mut first_failure: Option<TransferError> = None;

        logger.debug(&format!("Receiving into {}", self.dest.display()));
        loop {
            self.cancel.check()?;
            let msg = match session.recv().map_err(|e| self.cancel.map_err(e))? {
                Some(msg) => msg,
                // An interrupt shuts the socket down, which also reads as EOF
                None => {
                    self.cancel.check()?;
                    break;
                }
            };
            let meta = match msg {
                Message::Meta(meta) => meta,
                other => {
                    return Err(TransferError::protocol(format!(
                        "expected Meta, got {}",
                        other.kind()
                    )))
                }
            };
            summary.entries += 1;
            logger.debug(&format!(
                "Meta name={} size={} dir={} overwrite={:?}",
                meta.name, meta.size, meta.is_dir, meta.overwrite_mode
            ));

            let admission = match resolve_destination(&self.dest, &meta.name) {
                Ok(dest) => {
                    logger.entry_start(&meta.name, meta.is_dir, meta.size, &dest);
                    let mode = self.overwrite.unwrap_or(meta.overwrite_mode);
                    // The Ask prompt blocks on the terminal, not the socket
                    let admission = self
                        .cancel
                        .outside_socket(|| admitter.admit(&dest, &meta, mode));
                    (dest, admission)
                }
                Err(why) => (
                    PathBuf::new(),
                    Admission::Fail {
                        reason: format!("Unsafe entry name {:?}: {}", meta.name, why),
                        kind: AdmissionKind::Io,
                    },
                ),
            };

            self.cancel.check()?;
            let dest = match admission {
                (_, Admission::Fail { reason, kind }) => {
                    logger.entry_failed(&meta.name, &reason);
                    session.send(&Message::PreflightFail(PreflightFail {
                        reason: reason.clone(),
                    }))?;
                    summary.rejected += 1;
                    if first_failure.is_none() {
                        first_failure = Some(TransferError::Rejected { reason, kind });
                    }
                    continue;
                }
                (dest, Admission::Ok { available_space }) => {
                    session.send(&Message::PreflightOk(PreflightOk { available_space }))?;
                    dest
                }
            };

            if meta.is_dir {
                session.send(&Message::TransferResult(TransferResult {
                    ok: true,
                    received_bytes: 0,
                }))?;
                summary.dirs += 1;
                logger.entry_done(&meta.name, 0);
                continue;
            }

            let received = self
                .receive_file(session, &meta, &dest)
                .map_err(|e| self.cancel.map_err(e))?;
            match received {
                Ok(()) => {
                    summary.files += 1;
                    summary.bytes += meta.size;
                    logger.entry_done(&meta.name, meta.size);
                }
                Err(err) => {
                    logger.entry_failed(&meta.name, &err.to_string());
                    if first_failure.is_none() {
                        first_failure = Some(err);
                    }
                }
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => {
                logger.done(summary.entries, summary.bytes, self.progress.elapsed_secs());
                Ok(summary)
            }
        }
    }

    /// Stream one admitted file. The outer error aborts the session; the
    /// inner one is a local failure already reported to the peer.
    fn receive_file<R: BufRead, W: Write>(
        &self,
        session: &mut Session<R, W>,
        meta: &FileMeta,
        dest: &Path,
    ) -> Result<std::result::Result<(), TransferError>> {
        let start = match session.expect("TransferStart")? {
            Message::TransferStart(start) => start,
            other => {
                return Err(TransferError::protocol(format!(
                    "expected TransferStart, got {}",
                    other.kind()
                )))
            }
        };
        if start.file_size != meta.size {
            return Err(TransferError::protocol(format!(
                "TransferStart announces {} bytes but Meta declared {}",
                start.file_size, meta.size
            )));
        }

        let size = start.file_size;
        let bar = self.progress.file_bar(&meta.name, size);
        let created = PartialFile::create(dest, self.chunk_size);
        let outcome = match created {
            Ok(mut partial) => {
                let outcome = receive_body(
                    session.reader_mut(),
                    &mut partial,
                    size,
                    self.chunk_size,
                    &self.cancel,
                    Some(&bar),
                );
                bar.finish_and_clear();
                match outcome? {
                    BodyOutcome::Written => partial.commit().map_err(|e| {
                        TransferError::io(format!("committing {}", dest.display()), e)
                    }),
                    BodyOutcome::WriteFailed(e) => Err(TransferError::io(
                        format!("writing {}", PartialFile::temp_path_for(dest).display()),
                        e,
                    )),
                }
            }
            Err(e) => {
                receive_body(
                    session.reader_mut(),
                    &mut io::sink(),
                    size,
                    self.chunk_size,
                    &self.cancel,
                    Some(&bar),
                )?;
                bar.finish_and_clear();
                Err(TransferError::io(
                    format!("creating {}", PartialFile::temp_path_for(dest).display()),
                    e,
                ))
            }
        };

        session.send(&Message::TransferResult(TransferResult {
            ok: outcome.is_ok(),
            received_bytes: size,
        }))?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diskspace::FixedSpace;
    use crate::preflight::FixedAnswer;
    use crate::protocol::TransferStart;
    use crate::protocol_core::{decode, encode};
    use std::fs;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn meta(name: &str, size: u64, is_dir: bool, mode: OverwriteMode) -> Message {
        Message::Meta(FileMeta {
            name: name.into(),
            size,
            is_dir,
            overwrite_mode: mode,
        })
    }

    fn script(parts: &[&[u8]]) -> Cursor<Vec<u8>> {
        Cursor::new(parts.concat())
    }

    /// Split the receiver's output back into frames
    fn replies(mut out: &[u8]) -> Vec<Message> {
        let mut msgs = Vec::new();
        while !out.is_empty() {
            let len = u32::from_be_bytes([out[1], out[2], out[3], out[4]]) as usize;
            msgs.push(decode(&out[..5 + len]).unwrap());
            out = &out[5 + len..];
        }
        msgs
    }

    fn receiver(dest: &Path) -> Receiver {
        Receiver::new(dest)
            .prompt(Box::new(FixedAnswer(false)))
            .space_probe(Box::new(FixedSpace(1 << 40)))
    }

    #[test]
    fn test_zero_byte_file() {
        let tmp = TempDir::new().unwrap();
        let input = script(&[
            &encode(&meta("a.txt", 0, false, OverwriteMode::Ask)),
            &encode(&Message::TransferStart(TransferStart { file_size: 0 })),
        ]);
        let mut session = Session::new(input, Vec::new());
        let summary = receiver(tmp.path()).run(&mut session).unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(fs::metadata(tmp.path().join("a.txt")).unwrap().len(), 0);

        let (_, out) = session.into_parts();
        assert_eq!(
            replies(&out),
            vec![
                Message::PreflightOk(PreflightOk {
                    available_space: 1 << 40
                }),
                Message::TransferResult(TransferResult {
                    ok: true,
                    received_bytes: 0
                }),
            ]
        );
    }

    #[test]
    fn test_tree_entries() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("fresh");
        let input = script(&[
            &encode(&meta(".", 0, true, OverwriteMode::Ask)),
            &encode(&meta("sub", 0, true, OverwriteMode::Ask)),
            &encode(&meta("sub/b.txt", 8, false, OverwriteMode::Ask)),
            &encode(&Message::TransferStart(TransferStart { file_size: 8 })),
            b"12345678",
        ]);
        let mut session = Session::new(input, Vec::new());
        let summary = receiver(&dest).run(&mut session).unwrap();
        assert_eq!(
            summary,
            ReceiveSummary {
                entries: 3,
                files: 1,
                dirs: 2,
                bytes: 8,
                rejected: 0
            }
        );
        assert_eq!(fs::read(dest.join("sub/b.txt")).unwrap(), b"12345678");
        assert!(!dest.join("sub/b.txt.ncp_temp").exists());
    }

    #[test]
    fn test_truncated_body_leaves_nothing() {
        let tmp = TempDir::new().unwrap();
        let input = script(&[
            &encode(&meta("data.bin", 10, false, OverwriteMode::Ask)),
            &encode(&Message::TransferStart(TransferStart { file_size: 10 })),
            b"abc",
        ]);
        let mut session = Session::new(input, Vec::new());
        let err = receiver(tmp.path()).run(&mut session).unwrap_err();
        assert!(matches!(err, TransferError::UnexpectedEof(_)));
        assert!(!tmp.path().join("data.bin").exists());
        assert!(!tmp.path().join("data.bin.ncp_temp").exists());
    }

    #[test]
    fn test_existing_file_refused_and_untouched() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), b"keep").unwrap();
        let input = script(&[&encode(&meta("a.txt", 3, false, OverwriteMode::No))]);
        let mut session = Session::new(input, Vec::new());
        let err = receiver(tmp.path()).run(&mut session).unwrap_err();
        assert!(matches!(
            err,
            TransferError::Rejected {
                kind: AdmissionKind::Exists,
                ..
            }
        ));
        assert_eq!(fs::read(tmp.path().join("a.txt")).unwrap(), b"keep");
        let (_, out) = session.into_parts();
        assert_eq!(
            replies(&out),
            vec![Message::PreflightFail(PreflightFail {
                reason: "File exists, skipping".into()
            })]
        );
    }

    #[test]
    fn test_receiver_policy_overrides_sender() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), b"old").unwrap();
        let input = script(&[
            &encode(&meta("a.txt", 3, false, OverwriteMode::No)),
            &encode(&Message::TransferStart(TransferStart { file_size: 3 })),
            b"new",
        ]);
        let mut session = Session::new(input, Vec::new());
        receiver(tmp.path())
            .overwrite(Some(OverwriteMode::Yes))
            .run(&mut session)
            .unwrap();
        assert_eq!(fs::read(tmp.path().join("a.txt")).unwrap(), b"new");
    }

    #[test]
    fn test_unsafe_name_rejected() {
        let tmp = TempDir::new().unwrap();
        let input = script(&[&encode(&meta("../escape", 1, false, OverwriteMode::Yes))]);
        let mut session = Session::new(input, Vec::new());
        let err = receiver(tmp.path()).run(&mut session).unwrap_err();
        match err {
            TransferError::Rejected { reason, .. } => assert!(reason.starts_with("Unsafe entry name")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!tmp.path().parent().unwrap().join("escape").exists());
    }

    #[test]
    fn test_unexpected_first_frame_is_protocol_error() {
        let tmp = TempDir::new().unwrap();
        let input = script(&[&encode(&Message::TransferStart(TransferStart { file_size: 1 }))]);
        let mut session = Session::new(input, Vec::new());
        let err = receiver(tmp.path()).run(&mut session).unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
    }

    #[test]
    fn test_missing_transfer_start_is_protocol_error() {
        let tmp = TempDir::new().unwrap();
        let input = script(&[
            &encode(&meta("a.txt", 1, false, OverwriteMode::Yes)),
            &encode(&meta("b.txt", 1, false, OverwriteMode::Yes)),
        ]);
        let mut session = Session::new(input, Vec::new());
        let err = receiver(tmp.path()).run(&mut session).unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
    }

    #[test]
    fn test_single_file_to_new_path() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("renamed.bin");
        let input = script(&[
            &encode(&meta("original.bin", 2, false, OverwriteMode::Ask)),
            &encode(&Message::TransferStart(TransferStart { file_size: 2 })),
            b"hi",
        ]);
        let mut session = Session::new(input, Vec::new());
        receiver(&dest).run(&mut session).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"hi");
        assert!(!tmp.path().join("original.bin").exists());
    }

    #[test]
    fn test_temp_create_failure_reported_to_peer() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("a.txt.ncp_temp")).unwrap();
        let input = script(&[
            &encode(&meta("a.txt", 3, false, OverwriteMode::Ask)),
            &encode(&Message::TransferStart(TransferStart { file_size: 3 })),
            b"abc",
        ]);
        let mut session = Session::new(input, Vec::new());
        let err = receiver(tmp.path()).run(&mut session).unwrap_err();
        assert!(matches!(err, TransferError::Io { .. }));
        assert!(!tmp.path().join("a.txt").exists());

        let (input, out) = session.into_parts();
        assert_eq!(input.position(), input.get_ref().len() as u64);
        assert_eq!(
            replies(&out),
            vec![
                Message::PreflightOk(PreflightOk {
                    available_space: 1 << 40
                }),
                Message::TransferResult(TransferResult {
                    ok: false,
                    received_bytes: 3
                }),
            ]
        );
    }

    /// Stream whose end arrives only because the token was cancelled,
    /// the way a socket shutdown looks to a blocked reader
    struct ShutDownOnRead(CancelToken);

    impl io::Read for ShutDownOnRead {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            self.0.cancel();
            Ok(0)
        }
    }

    #[test]
    fn test_interrupt_while_waiting_for_meta() {
        let tmp = TempDir::new().unwrap();
        let cancel = CancelToken::new();
        let input = io::BufReader::new(ShutDownOnRead(cancel.clone()));
        let mut session = Session::new(input, Vec::new());
        let err = receiver(tmp.path())
            .cancel_token(cancel)
            .run(&mut session)
            .unwrap_err();
        assert!(matches!(err, TransferError::Cancelled));
        assert_eq!(err.exit_code(), 130);
    }

    /// Stands in for a user pressing Ctrl-C at the y/N prompt
    struct InterruptedPrompt(CancelToken);

    impl OverwritePrompt for InterruptedPrompt {
        fn confirm(&self, _path: &Path) -> bool {
            self.0.cancel();
            false
        }
    }

    #[test]
    fn test_interrupt_at_overwrite_prompt() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), b"old").unwrap();
        let cancel = CancelToken::new();
        let input = script(&[&encode(&meta("a.txt", 3, false, OverwriteMode::Ask))]);
        let mut session = Session::new(input, Vec::new());
        let err = receiver(tmp.path())
            .prompt(Box::new(InterruptedPrompt(cancel.clone())))
            .cancel_token(cancel)
            .run(&mut session)
            .unwrap_err();
        assert!(matches!(err, TransferError::Cancelled));
        let (_, out) = session.into_parts();
        assert!(out.is_empty());
        assert_eq!(fs::read(tmp.path().join("a.txt")).unwrap(), b"old");
    }

    #[test]
    fn test_resolve_destination() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(
            resolve_destination(tmp.path(), "sub/b.txt").unwrap(),
            tmp.path().join("sub/b.txt")
        );
        assert_eq!(resolve_destination(tmp.path(), ".").unwrap(), tmp.path());
        let file = tmp.path().join("x.bin");
        assert_eq!(resolve_destination(&file, "anything").unwrap(), file);
        assert!(resolve_destination(tmp.path(), "/etc/passwd").is_err());
    }
}
