// Repair decision policy
//
// Every detected fault is classified by a code; the active mode turns
// the code into a yes/no decision. AUTO answers yes only to faults
// whose repair cannot lose data, with a fixed answer per code.

use std::io::{self, BufRead, Write};

use log::{info, warn};
use serde::Serialize;

/// Classified fault codes, one per repairable corruption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCode {
    /// Primary boot region fails validation; backup restore available.
    BsBootRegion,
    /// Stream first-cluster inconsistent with the recorded size.
    FileFirstClus,
    /// More clusters chained than the size accounts for.
    FileSmallerSize,
    /// Chain enters a cluster another file already owns (or loops).
    FileDuplicatedClus,
    /// Chain enters a cluster the bitmap marks free, or the FAT points
    /// outside the heap.
    FileInvalidClus,
    /// Chain ends before the recorded size is covered.
    FileLargerSize,
    /// Empty file carrying the contiguous flag.
    FileZeroNofat,
    /// `valid_size` exceeds `size`.
    FileValidSize,
    /// Stored entry-set checksum does not match the entries.
    DeChecksum,
    /// Stored name hash does not match the upcased name.
    DeNameHash,
}

impl FaultCode {
    /// Whether the repair truncates a cluster chain. AUTO never
    /// answers yes to these.
    pub fn truncates(&self) -> bool {
        match self {
            FaultCode::FileFirstClus
            | FaultCode::FileSmallerSize
            | FaultCode::FileDuplicatedClus
            | FaultCode::FileInvalidClus
            | FaultCode::FileLargerSize => true,
            FaultCode::BsBootRegion
            | FaultCode::FileZeroNofat
            | FaultCode::FileValidSize
            | FaultCode::DeChecksum
            | FaultCode::DeNameHash => false,
        }
    }
}

/// User-selected repair mode. The modes are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairMode {
    /// Prompt for every fault.
    Ask,
    /// Repair everything without asking.
    Yes,
    /// Report only; the device stays read-only.
    No,
    /// Repair the conservative subset without asking.
    Auto,
}

impl RepairMode {
    pub fn writeable(&self) -> bool {
        !matches!(self, RepairMode::No)
    }
}

/// Run counters, reported in the end-of-run summary.
#[derive(Debug, Default, Clone, Serialize)]
pub struct FsckStat {
    pub dir_count: u64,
    pub file_count: u64,
    pub error_count: u64,
    pub fixed_count: u64,
}

/// Decision state threaded through the whole walk: the mode, the
/// dirty bookkeeping, and the counters.
pub struct RepairContext {
    pub mode: RepairMode,
    /// Any repair has been written.
    pub dirty: bool,
    /// A repair truncated a chain; the FAT/bitmap reconciliation pass
    /// must run.
    pub dirty_fat: bool,
    /// The user asked to stop during a prompt.
    pub cancel: bool,
    pub stat: FsckStat,
}

impl RepairContext {
    pub fn new(mode: RepairMode) -> Self {
        RepairContext {
            mode,
            dirty: false,
            dirty_fat: false,
            cancel: false,
            stat: FsckStat::default(),
        }
    }

    /// Decide whether to repair the described fault. A yes marks the
    /// run dirty.
    pub fn ask(&mut self, code: FaultCode, desc: &str) -> bool {
        let fix = match self.mode {
            RepairMode::No => {
                warn!("{}", desc);
                false
            }
            RepairMode::Yes => {
                info!("{}. fixing", desc);
                true
            }
            RepairMode::Auto => {
                let fix = !code.truncates();
                if fix {
                    info!("{}. fixing", desc);
                } else {
                    warn!("{}. not fixed in auto mode", desc);
                }
                fix
            }
            RepairMode::Ask => self.prompt(desc),
        };
        if fix {
            self.dirty = true;
        }
        fix
    }

    fn prompt(&mut self, desc: &str) -> bool {
        eprint!("{}. Fix (y/N)? ", desc);
        let _ = io::stderr().flush();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => {
                self.cancel = true;
                false
            }
            Ok(_) => matches!(line.trim(), "y" | "Y" | "yes"),
        }
    }
}
