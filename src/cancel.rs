//! Process-interrupt handling for blocking transfers

use crate::error::{Result, TransferError};
use parking_lot::Mutex;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    cancelled: AtomicBool,
    // Set while blocked somewhere a socket shutdown cannot reach
    off_socket: AtomicBool,
    // Clone of the live socket so an interrupt can unblock reads/writes
    socket: Mutex<Option<TcpStream>>,
}

/// Shared interrupt flag.
/// Clones observe the same state.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a Ctrl-C handler that cancels this token.
    /// When the interrupt cannot be delivered through the socket (still in
    /// `accept`, or inside `outside_socket`), the process exits with 130.
    pub fn install_handler(&self) -> std::result::Result<(), ctrlc::Error> {
        let token = self.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nInterrupted by user. Exiting (Ctrl-C)...");
            if !token.cancel() {
                std::process::exit(130);
            }
        })
    }

    /// Mark cancelled and shut down the registered socket.
    /// Returns whether the shutdown unblocks the current wait.
    pub fn cancel(&self) -> bool {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let registered = match self.inner.socket.lock().as_ref() {
            Some(s) => {
                let _ = s.shutdown(Shutdown::Both);
                true
            }
            None => false,
        };
        registered && !self.inner.off_socket.load(Ordering::SeqCst)
    }

    /// Run `f`, which may block on something other than the socket
    /// (the overwrite prompt reads stdin). An interrupt meanwhile is not
    /// deliverable, so `cancel` reports false.
    pub fn outside_socket<T>(&self, f: impl FnOnce() -> T) -> T {
        self.inner.off_socket.store(true, Ordering::SeqCst);
        let out = f();
        self.inner.off_socket.store(false, Ordering::SeqCst);
        out
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once an interrupt has been seen
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(TransferError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn register(&self, stream: &TcpStream) {
        if let Ok(clone) = stream.try_clone() {
            *self.inner.socket.lock() = Some(clone);
        }
    }

    pub fn unregister(&self) {
        self.inner.socket.lock().take();
    }

    /// Replace a stream error with `Cancelled` if the interrupt caused it
    pub fn map_err(&self, err: TransferError) -> TransferError {
        if self.is_cancelled() {
            TransferError::Cancelled
        } else {
            err
        }
    }
}
