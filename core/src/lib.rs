pub mod device;
pub mod error;

pub use device::{BlockDevice, DeviceInfo, SECTOR_SIZE};
pub use error::FsckError;
