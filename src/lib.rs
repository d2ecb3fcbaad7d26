//! ncp library
//!
//! Point-to-point file and directory transfer over one TCP connection:
//! a length-prefixed control protocol interleaved with raw file bytes,
//! preflight admission on the receiver and atomic commits.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod copy;
pub mod diskspace;
pub mod error;
pub mod fs_enum;
pub mod logger;
pub mod net;
pub mod preflight;
pub mod progress;
pub mod protocol;
pub mod protocol_core;
pub mod recv;
pub mod send;

pub use error::{Result, TransferError};
pub use net::Endpoint;
pub use recv::{ReceiveSummary, Receiver};
pub use send::{RetryPolicy, SendSummary, Sender};
