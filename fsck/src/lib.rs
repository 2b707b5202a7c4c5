pub mod bitmap;
pub mod boot;
pub mod check;
pub mod create;
pub mod de_iter;
pub mod exfat;
pub mod inode;
pub mod lookup;
pub mod ondisk;
pub mod reclaim;
pub mod repair;
pub mod upcase;

pub use check::Fsck;
pub use exfat::Exfat;
pub use repair::{FaultCode, FsckStat, RepairContext, RepairMode};

pub use exfsck_core::{BlockDevice, DeviceInfo, FsckError};
