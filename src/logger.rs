use anyhow::Result;
use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Progress and diagnostics sink for a transfer.
/// Every hook defaults to a no-op so sinks only implement what they record.
pub trait Logger: Send + Sync {
    /// Plain progress line shown at default verbosity
    fn output(&self, _msg: &str) {}
    /// `-v`
    fn info(&self, _msg: &str) {}
    /// `-vv`
    fn debug(&self, _msg: &str) {}
    fn entry_start(&self, _name: &str, _is_dir: bool, _size: u64, _dst: &Path) {}
    fn entry_done(&self, _name: &str, _bytes: u64) {}
    fn entry_failed(&self, _name: &str, _reason: &str) {}
    fn done(&self, _entries: u64, _bytes: u64, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

/// Terminal logger; verbosity is fixed at construction
pub struct ConsoleLogger {
    verbosity: u8,
}

impl ConsoleLogger {
    pub fn new(verbosity: u8) -> Self {
        Self { verbosity }
    }
}

impl Logger for ConsoleLogger {
    fn output(&self, msg: &str) {
        println!("{}", msg);
    }
    fn info(&self, msg: &str) {
        if self.verbosity >= 1 {
            eprintln!("[INFO] {}", msg);
        }
    }
    fn debug(&self, msg: &str) {
        if self.verbosity >= 2 {
            eprintln!("[DEBUG] {}", msg);
        }
    }
    fn entry_start(&self, name: &str, is_dir: bool, size: u64, dst: &Path) {
        let kind = if is_dir { "directory" } else { "file" };
        if dst.as_os_str().is_empty() {
            println!("Transferring {}: {} ({} bytes)", kind, name, size);
        } else {
            println!(
                "Receiving {}: {} ({} bytes) to {}",
                kind,
                name,
                size,
                dst.display()
            );
        }
    }
    fn entry_done(&self, name: &str, bytes: u64) {
        self.info(&format!("Completed {} ({} bytes)", name, bytes));
    }
    fn entry_failed(&self, name: &str, reason: &str) {
        eprintln!("Transfer of {} failed: {}", name, reason);
    }
    fn done(&self, entries: u64, bytes: u64, seconds: f64) {
        println!(
            "Transfer completed successfully: {} entries, {} bytes in {:.2}s",
            entries, bytes, seconds
        );
    }
}

/// Appends timestamped event lines to a file
pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
    }
}

impl Logger for TextLogger {
    fn output(&self, msg: &str) {
        self.line(msg);
    }
    fn info(&self, msg: &str) {
        self.line(&format!("INFO {}", msg));
    }
    fn debug(&self, msg: &str) {
        self.line(&format!("DEBUG {}", msg));
    }
    fn entry_start(&self, name: &str, is_dir: bool, size: u64, dst: &Path) {
        self.line(&format!(
            "START name={} dir={} size={} dst={}",
            name,
            is_dir,
            size,
            dst.display()
        ));
    }
    fn entry_done(&self, name: &str, bytes: u64) {
        self.line(&format!("DONE name={} bytes={}", name, bytes));
    }
    fn entry_failed(&self, name: &str, reason: &str) {
        self.line(&format!("ERROR name={} msg={}", name, reason));
    }
    fn done(&self, entries: u64, bytes: u64, seconds: f64) {
        self.line(&format!(
            "FINISHED entries={entries} bytes={bytes} seconds={seconds:.3}"
        ));
    }
}

/// Fans every event out to two loggers
pub struct TeeLogger<A, B> {
    first: A,
    second: B,
}

impl<A: Logger, B: Logger> TeeLogger<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A: Logger, B: Logger> Logger for TeeLogger<A, B> {
    fn output(&self, msg: &str) {
        self.first.output(msg);
        self.second.output(msg);
    }
    fn info(&self, msg: &str) {
        self.first.info(msg);
        self.second.info(msg);
    }
    fn debug(&self, msg: &str) {
        self.first.debug(msg);
        self.second.debug(msg);
    }
    fn entry_start(&self, name: &str, is_dir: bool, size: u64, dst: &Path) {
        self.first.entry_start(name, is_dir, size, dst);
        self.second.entry_start(name, is_dir, size, dst);
    }
    fn entry_done(&self, name: &str, bytes: u64) {
        self.first.entry_done(name, bytes);
        self.second.entry_done(name, bytes);
    }
    fn entry_failed(&self, name: &str, reason: &str) {
        self.first.entry_failed(name, reason);
        self.second.entry_failed(name, reason);
    }
    fn done(&self, entries: u64, bytes: u64, seconds: f64) {
        self.first.done(entries, bytes, seconds);
        self.second.done(entries, bytes, seconds);
    }
}
