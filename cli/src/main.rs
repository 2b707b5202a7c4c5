use std::process::ExitCode;

use clap::Parser;
use log::{error, LevelFilter};

use exfsck_fsck::{BlockDevice, Fsck, FsckError, RepairMode};

// Traditional fsck exit contract, bit-exact.
const EXIT_NO_ERRORS: u8 = 0x00;
const EXIT_CORRECTED: u8 = 0x01;
const EXIT_ERRORS_LEFT: u8 = 0x04;
const EXIT_OPERATION_ERROR: u8 = 0x08;
const EXIT_SYNTAX_ERROR: u8 = 0x10;
const EXIT_USER_CANCEL: u8 = 0x20;

#[derive(Parser)]
#[command(name = "exfsck", about = "Check and repair exFAT volumes")]
#[command(disable_version_flag = true)]
struct Args {
    /// Repair interactively
    #[arg(
        short = 'r',
        long = "repair",
        conflicts_with_all = ["repair_yes", "repair_no", "repair_auto"]
    )]
    repair: bool,

    /// Repair without asking
    #[arg(
        short = 'y',
        long = "repair-yes",
        conflicts_with_all = ["repair_no", "repair_auto"]
    )]
    repair_yes: bool,

    /// No repair
    #[arg(short = 'n', long = "repair-no", conflicts_with = "repair_auto")]
    repair_no: bool,

    /// Repair automatically
    #[arg(short = 'p', short_alias = 'a', long = "repair-auto")]
    repair_auto: bool,

    /// Print debug messages
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Show version and exit
    #[arg(short = 'V', long = "version")]
    version: bool,

    /// Block device or image to check
    device: String,
}

impl Args {
    fn mode(&self) -> RepairMode {
        if self.repair {
            RepairMode::Ask
        } else if self.repair_yes {
            RepairMode::Yes
        } else if self.repair_auto {
            RepairMode::Auto
        } else {
            RepairMode::No
        }
    }
}

fn error_exit_code(err: &FsckError) -> u8 {
    if err.is_format() {
        EXIT_ERRORS_LEFT
    } else {
        EXIT_OPERATION_ERROR
    }
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(EXIT_SYNTAX_ERROR);
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .format_timestamp(None)
        .init();

    eprintln!("exfsck version {}", env!("CARGO_PKG_VERSION"));
    if args.version {
        return ExitCode::from(EXIT_SYNTAX_ERROR);
    }

    let mode = args.mode();
    let dev = match BlockDevice::open(&args.device, mode.writeable()) {
        Ok(dev) => dev,
        Err(err) => {
            error!("failed to open {}: {}", args.device, err);
            return ExitCode::from(EXIT_OPERATION_ERROR);
        }
    };

    let mut fsck = match Fsck::new(dev, mode) {
        Ok(fsck) => fsck,
        Err(err) => {
            error!("failed to verify boot region: {}", err);
            return ExitCode::from(error_exit_code(&err));
        }
    };

    let result = fsck.run();
    // Faults the policy declined to repair leave the volume
    // inconsistent even though the walk finished; the summary and the
    // exit code must agree on that.
    let errors_left = fsck.repair.stat.error_count > fsck.repair.stat.fixed_count;
    fsck.show_info(result.is_err() || errors_left);

    if fsck.repair.cancel {
        return ExitCode::from(EXIT_USER_CANCEL);
    }
    match result {
        Err(err) => {
            error!("{}", err);
            ExitCode::from(error_exit_code(&err))
        }
        Ok(()) if errors_left => ExitCode::from(EXIT_ERRORS_LEFT),
        Ok(()) if fsck.repair.dirty => ExitCode::from(EXIT_CORRECTED),
        Ok(()) => ExitCode::from(EXIT_NO_ERRORS),
    }
}
