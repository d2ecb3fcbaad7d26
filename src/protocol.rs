//! Shared protocol constants and message model for the ncp control stream

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

// Frame header: TYPE (1) | LENGTH (4, big-endian)
pub const HEADER_LEN: usize = 5;

// Maximum control frame payload (1MB). Raw file bytes are unframed and not bound by this.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

// Default chunk size for raw body streaming
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

// Appended to the destination file name while bytes are in flight
pub const TEMP_SUFFIX: &str = ".ncp_temp";

// Relative path of the walk root in a directory transfer
pub const ROOT_NAME: &str = ".";

// Message type IDs (keep numeric stable)
pub mod frame {
    pub const META: u8 = 1;
    pub const PREFLIGHT_OK: u8 = 2;
    pub const PREFLIGHT_FAIL: u8 = 3;
    pub const TRANSFER_START: u8 = 4;
    pub const TRANSFER_RESULT: u8 = 5;

    pub fn name(t: u8) -> &'static str {
        match t {
            META => "Meta",
            PREFLIGHT_OK => "PreflightOk",
            PREFLIGHT_FAIL => "PreflightFail",
            TRANSFER_START => "TransferStart",
            TRANSFER_RESULT => "TransferResult",
            _ => "Unknown",
        }
    }
}

// PreflightFail reasons the sender knows how to classify
pub mod reason {
    pub const EXISTS: &str = "File exists, skipping";
    pub const DECLINED: &str = "User declined overwrite";
    pub const DECLINED_DIR: &str = "User declined directory overwrite";
    pub const NO_SPACE: &str = "Insufficient disk space";
}

// Retry driver defaults (send, connect mode)
pub mod retry {
    pub const DEFAULT_RETRIES: u32 = 3;
    pub const DEFAULT_DELAY_MS: u64 = 1000;
}

/// Overwrite policy carried in every Meta frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwriteMode {
    /// Prompt on the receiving terminal
    #[default]
    Ask,
    /// Replace existing destinations
    Yes,
    /// Refuse existing destinations
    No,
}

impl OverwriteMode {
    pub fn to_wire(self) -> u8 {
        match self {
            OverwriteMode::Ask => 0,
            OverwriteMode::Yes => 1,
            OverwriteMode::No => 2,
        }
    }

    pub fn from_wire(b: u8) -> Option<Self> {
        match b {
            0 => Some(OverwriteMode::Ask),
            1 => Some(OverwriteMode::Yes),
            2 => Some(OverwriteMode::No),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub overwrite_mode: OverwriteMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreflightOk {
    pub available_space: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightFail {
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStart {
    pub file_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferResult {
    pub ok: bool,
    pub received_bytes: u64,
}

/// One control frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Meta(FileMeta),
    PreflightOk(PreflightOk),
    PreflightFail(PreflightFail),
    TransferStart(TransferStart),
    TransferResult(TransferResult),
}

impl Message {
    pub fn frame_type(&self) -> u8 {
        match self {
            Message::Meta(_) => frame::META,
            Message::PreflightOk(_) => frame::PREFLIGHT_OK,
            Message::PreflightFail(_) => frame::PREFLIGHT_FAIL,
            Message::TransferStart(_) => frame::TRANSFER_START,
            Message::TransferResult(_) => frame::TRANSFER_RESULT,
        }
    }

    pub fn kind(&self) -> &'static str {
        frame::name(self.frame_type())
    }
}
