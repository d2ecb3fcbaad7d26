//! Control frame codec and receive-side path normalization
//!
//! Frames are `TYPE (1) | LENGTH (4, BE) | PAYLOAD`. Strings are
//! `LEN (4, BE) | BYTES`, integers fixed-width big-endian.

use crate::error::{Result, TransferError};
use crate::protocol::{
    frame, FileMeta, Message, OverwriteMode, PreflightFail, PreflightOk, TransferResult,
    TransferStart, HEADER_LEN, MAX_FRAME_SIZE,
};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

/// Build frame header (5 bytes)
pub fn build_frame_header(frame_type: u8, payload_len: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0] = frame_type;
    header[1..5].copy_from_slice(&payload_len.to_be_bytes());
    header
}

/// Parse frame header
/// Returns: (frame_type, payload_length)
pub fn parse_frame_header(header: &[u8; HEADER_LEN]) -> Result<(u8, u32)> {
    let frame_type = header[0];
    if !(frame::META..=frame::TRANSFER_RESULT).contains(&frame_type) {
        return Err(TransferError::protocol(format!(
            "unknown message type {}",
            frame_type
        )));
    }
    let payload_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    validate_frame_size(payload_len as usize)?;
    Ok((frame_type, payload_len))
}

pub fn validate_frame_size(size: usize) -> Result<()> {
    if size > MAX_FRAME_SIZE {
        return Err(TransferError::protocol(format!(
            "frame payload too large: {} bytes (max: {})",
            size, MAX_FRAME_SIZE
        )));
    }
    Ok(())
}

fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn encode_payload(msg: &Message) -> Vec<u8> {
    let mut p = Vec::new();
    match msg {
        Message::Meta(m) => {
            p.extend_from_slice(&m.size.to_be_bytes());
            p.push(m.is_dir as u8);
            p.push(m.overwrite_mode.to_wire());
            put_string(&mut p, &m.name);
        }
        Message::PreflightOk(m) => p.extend_from_slice(&m.available_space.to_be_bytes()),
        Message::PreflightFail(m) => put_string(&mut p, &m.reason),
        Message::TransferStart(m) => p.extend_from_slice(&m.file_size.to_be_bytes()),
        Message::TransferResult(m) => {
            p.push(m.ok as u8);
            p.extend_from_slice(&m.received_bytes.to_be_bytes());
        }
    }
    p
}

/// Encode a complete frame (header + payload)
pub fn encode(msg: &Message) -> Vec<u8> {
    let payload = encode_payload(msg);
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&build_frame_header(msg.frame_type(), payload.len() as u32));
    buf.extend_from_slice(&payload);
    buf
}

/// Cursor over a payload that refuses to read past its end
struct Payload<'a> {
    buf: &'a [u8],
    kind: &'static str,
}

impl<'a> Payload<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(TransferError::protocol(format!(
                "{} payload truncated",
                self.kind
            )));
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(u64::from_be_bytes(a))
    }

    fn string(&mut self) -> Result<String> {
        let b = self.take(4)?;
        let len = u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| TransferError::protocol(format!("{} string is not UTF-8", self.kind)))
    }

    fn finish(self) -> Result<()> {
        if !self.buf.is_empty() {
            return Err(TransferError::protocol(format!(
                "{} payload has {} trailing bytes",
                self.kind,
                self.buf.len()
            )));
        }
        Ok(())
    }
}

/// Decode a payload of a known frame type
pub fn decode_payload(frame_type: u8, payload: &[u8]) -> Result<Message> {
    let mut p = Payload {
        buf: payload,
        kind: frame::name(frame_type),
    };
    let msg = match frame_type {
        frame::META => {
            let size = p.u64()?;
            let is_dir = p.u8()? != 0;
            let mode_byte = p.u8()?;
            let overwrite_mode = OverwriteMode::from_wire(mode_byte).ok_or_else(|| {
                TransferError::protocol(format!("invalid overwrite mode {}", mode_byte))
            })?;
            let name = p.string()?;
            Message::Meta(FileMeta {
                name,
                size,
                is_dir,
                overwrite_mode,
            })
        }
        frame::PREFLIGHT_OK => Message::PreflightOk(PreflightOk {
            available_space: p.u64()?,
        }),
        frame::PREFLIGHT_FAIL => Message::PreflightFail(PreflightFail { reason: p.string()? }),
        frame::TRANSFER_START => Message::TransferStart(TransferStart {
            file_size: p.u64()?,
        }),
        frame::TRANSFER_RESULT => {
            let ok = p.u8()? != 0;
            let received_bytes = p.u64()?;
            Message::TransferResult(TransferResult { ok, received_bytes })
        }
        other => {
            return Err(TransferError::protocol(format!(
                "unknown message type {}",
                other
            )))
        }
    };
    p.finish()?;
    Ok(msg)
}

/// Decode one complete frame held in memory
pub fn decode(bytes: &[u8]) -> Result<Message> {
    if bytes.len() < HEADER_LEN {
        return Err(TransferError::UnexpectedEof("frame header".into()));
    }
    let mut hdr = [0u8; HEADER_LEN];
    hdr.copy_from_slice(&bytes[..HEADER_LEN]);
    let (typ, len) = parse_frame_header(&hdr)?;
    let body = &bytes[HEADER_LEN..];
    if body.len() < len as usize {
        return Err(TransferError::UnexpectedEof(format!(
            "{} payload: expected {} bytes, have {}",
            frame::name(typ),
            len,
            body.len()
        )));
    }
    if body.len() > len as usize {
        return Err(TransferError::protocol("bytes after end of frame"));
    }
    decode_payload(typ, body)
}

/// Write one frame and flush it
pub fn write_message<W: Write>(writer: &mut W, msg: &Message) -> Result<()> {
    let buf = encode(msg);
    writer
        .write_all(&buf)
        .and_then(|_| writer.flush())
        .map_err(|e| TransferError::connection(format!("sending {}", msg.kind()), e))
}

/// Read one frame.
/// Returns `Ok(None)` on a clean end-of-stream before the first header byte.
pub fn read_message<R: Read>(reader: &mut R) -> Result<Option<Message>> {
    let mut hdr = [0u8; HEADER_LEN];
    let mut got = 0;
    while got == 0 {
        match reader.read(&mut hdr[..1]) {
            Ok(0) => return Ok(None),
            Ok(n) => got = n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransferError::from_stream_read("reading frame header", e)),
        }
    }
    reader
        .read_exact(&mut hdr[1..])
        .map_err(|e| TransferError::from_stream_read("reading frame header", e))?;
    let (typ, len) = parse_frame_header(&hdr)?;
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).map_err(|e| {
        TransferError::from_stream_read(&format!("reading {} payload", frame::name(typ)), e)
    })?;
    decode_payload(typ, &payload).map(Some)
}

/// Read one frame, treating end-of-stream as a truncation
pub fn expect_message<R: Read>(reader: &mut R, waiting_for: &str) -> Result<Message> {
    read_message(reader)?.ok_or_else(|| {
        TransferError::UnexpectedEof(format!("connection closed while waiting for {}", waiting_for))
    })
}

/// Normalize an entry name received from the peer to a path under `root`.
/// Rejects absolute paths, parent directory components, root/prefix
/// components and NUL bytes; `.` components are dropped.
pub fn normalize_under_root(root: &Path, name: &str) -> std::result::Result<PathBuf, String> {
    use Component::{CurDir, Normal, ParentDir, Prefix, RootDir};

    if name.contains('\0') {
        return Err("path contains NUL byte".to_string());
    }

    let mut safe = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            CurDir => {}
            Normal(s) => {
                // On Windows, reject components with ':' (ADS defense)
                #[cfg(windows)]
                if s.to_string_lossy().contains(':') {
                    return Err("path component contains colon".to_string());
                }
                safe.push(s);
            }
            ParentDir | RootDir | Prefix(_) => {
                return Err(format!("path contains disallowed component: {:?}", component));
            }
        }
    }

    if safe.as_os_str().is_empty() {
        Ok(root.to_path_buf())
    } else {
        Ok(root.join(safe))
    }
}
