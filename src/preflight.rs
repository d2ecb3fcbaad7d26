//! Admission checks run by the receiver before any entry bytes are accepted

use crate::diskspace::{format_bytes, has_room, SpaceProbe};
use crate::error::AdmissionKind;
use crate::protocol::{reason, FileMeta, OverwriteMode};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

/// Interactive confirmation for `OverwriteMode::Ask`
pub trait OverwritePrompt: Send + Sync {
    fn confirm(&self, path: &Path) -> bool;
}

/// Asks on the controlling terminal; end of input counts as "no"
pub struct StdinPrompt;

impl OverwritePrompt for StdinPrompt {
    fn confirm(&self, path: &Path) -> bool {
        print!("File {} already exists. Overwrite? (y/N): ", path.display());
        let _ = io::stdout().flush();
        let mut input = String::new();
        match io::stdin().lock().read_line(&mut input) {
            Ok(0) | Err(_) => false,
            Ok(_) => is_yes(&input),
        }
    }
}

/// Always gives the same answer
pub struct FixedAnswer(pub bool);

impl OverwritePrompt for FixedAnswer {
    fn confirm(&self, _path: &Path) -> bool {
        self.0
    }
}

fn is_yes(input: &str) -> bool {
    let answer = input.trim().to_lowercase();
    answer == "y" || answer == "yes"
}

/// Outcome of the admission check for one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Ok { available_space: u64 },
    Fail { reason: String, kind: AdmissionKind },
}

impl Admission {
    fn fail(reason: impl Into<String>, kind: AdmissionKind) -> Self {
        Admission::Fail {
            reason: reason.into(),
            kind,
        }
    }

    fn io_fail(what: String, err: &io::Error) -> Self {
        Admission::fail(format!("{}: {}", what, err), AdmissionKind::from_io(err))
    }
}

pub struct Admitter<'a> {
    prompt: &'a dyn OverwritePrompt,
    space: &'a dyn SpaceProbe,
}

impl<'a> Admitter<'a> {
    pub fn new(prompt: &'a dyn OverwritePrompt, space: &'a dyn SpaceProbe) -> Self {
        Self { prompt, space }
    }

    /// Decide whether `meta` may be written at `dest` under `mode`.
    /// Creates missing directories as a side effect.
    pub fn admit(&self, dest: &Path, meta: &FileMeta, mode: OverwriteMode) -> Admission {
        if meta.is_dir {
            self.admit_dir(dest, mode)
        } else {
            self.admit_file(dest, meta.size, mode)
        }
    }

    fn admit_dir(&self, dest: &Path, mode: OverwriteMode) -> Admission {
        match fs::metadata(dest) {
            Ok(md) if md.is_dir() => Admission::Ok { available_space: 0 },
            Ok(_) => {
                match mode {
                    OverwriteMode::No => {
                        return Admission::fail(reason::EXISTS, AdmissionKind::Exists)
                    }
                    OverwriteMode::Ask => {
                        if !self.prompt.confirm(dest) {
                            return Admission::fail(reason::DECLINED_DIR, AdmissionKind::Declined);
                        }
                    }
                    OverwriteMode::Yes => {}
                }
                if let Err(e) = fs::remove_file(dest) {
                    return Admission::io_fail(
                        format!("Failed to remove existing file {}", dest.display()),
                        &e,
                    );
                }
                match fs::create_dir(dest) {
                    Ok(()) => Admission::Ok { available_space: 0 },
                    Err(e) => Admission::io_fail(
                        format!("Failed to create directory {}", dest.display()),
                        &e,
                    ),
                }
            }
            Err(_) => match fs::create_dir_all(dest) {
                Ok(()) => Admission::Ok { available_space: 0 },
                Err(e) => Admission::io_fail(
                    format!("Failed to create directory {}", dest.display()),
                    &e,
                ),
            },
        }
    }

    fn admit_file(&self, dest: &Path, size: u64, mode: OverwriteMode) -> Admission {
        if let Ok(md) = fs::metadata(dest) {
            if md.is_dir() {
                return Admission::fail(
                    format!("Destination is a directory: {}", dest.display()),
                    AdmissionKind::Io,
                );
            }
            match mode {
                OverwriteMode::No => return Admission::fail(reason::EXISTS, AdmissionKind::Exists),
                OverwriteMode::Ask => {
                    if !self.prompt.confirm(dest) {
                        return Admission::fail(reason::DECLINED, AdmissionKind::Declined);
                    }
                }
                OverwriteMode::Yes => {}
            }
        } else if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = fs::create_dir_all(parent) {
                    return Admission::io_fail(
                        format!("Failed to create parent directories for {}", dest.display()),
                        &e,
                    );
                }
            }
        }

        let available = match self.space.available_space(dest) {
            Ok(n) => n,
            Err(e) => {
                return Admission::io_fail(
                    format!("Failed to check disk space for {}", dest.display()),
                    &e,
                )
            }
        };
        if !has_room(available, size) {
            return Admission::fail(
                format!(
                    "{}. Need: {}, Available: {}",
                    reason::NO_SPACE,
                    format_bytes(size),
                    format_bytes(available)
                ),
                AdmissionKind::NoSpace,
            );
        }
        Admission::Ok {
            available_space: available,
        }
    }
}
