use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::os::unix::fs::FileExt;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::FsckError;

/// Logical sector size assumed for raw device access. The volume's own
/// sector size comes from the boot sector once it has been validated.
pub const SECTOR_SIZE: u32 = 512;

/// Descriptive snapshot of an opened device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub path: String,
    pub size: u64,
    pub sector_size: u32,
    pub writeable: bool,
}

/// A block device (or image file) opened for checking.
///
/// All I/O is positioned; there is no shared cursor. Short reads and
/// writes are fatal, per the checker's I/O contract.
pub struct BlockDevice {
    file: File,
    path: String,
    size: u64,
    sector_size: u32,
    writeable: bool,
}

impl BlockDevice {
    /// Open `path` and probe its size. Pass `writeable` only for
    /// repair modes that may mutate the volume.
    pub fn open(path: &str, writeable: bool) -> Result<Self, FsckError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(writeable)
            .open(path)
            .map_err(|e| FsckError::Device(format!("failed to open {}: {}", path, e)))?;

        // Block devices report a zero metadata length; seeking to the
        // end works for both devices and image files.
        let size = file.seek(SeekFrom::End(0))?;
        if size == 0 {
            return Err(FsckError::Device(format!("{} is empty", path)));
        }

        info!(
            "opened {} ({} bytes, {})",
            path,
            size,
            if writeable { "read-write" } else { "read-only" }
        );

        Ok(BlockDevice {
            file,
            path: path.to_string(),
            size,
            sector_size: SECTOR_SIZE,
            writeable,
        })
    }

    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            path: self.path.clone(),
            size: self.size,
            sector_size: self.sector_size,
            writeable: self.writeable,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn sector_size(&self) -> u32 {
        self.sector_size
    }

    pub fn writeable(&self) -> bool {
        self.writeable
    }

    /// Fill `buf` from `offset`. A short read is an error.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<(), FsckError> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.file.read_at(&mut buf[done..], offset + done as u64)?;
            if n == 0 {
                return Err(FsckError::ShortIo {
                    op: "read",
                    want: buf.len(),
                    got: done,
                    offset,
                });
            }
            done += n;
        }
        Ok(())
    }

    /// Write all of `buf` at `offset`. A short write is an error.
    pub fn write_at(&self, buf: &[u8], offset: u64) -> Result<(), FsckError> {
        if !self.writeable {
            return Err(FsckError::Device(format!(
                "{} is opened read-only",
                self.path
            )));
        }
        debug!("write {} bytes at offset {}", buf.len(), offset);
        let mut done = 0;
        while done < buf.len() {
            let n = self.file.write_at(&buf[done..], offset + done as u64)?;
            if n == 0 {
                return Err(FsckError::ShortIo {
                    op: "write",
                    want: buf.len(),
                    got: done,
                    offset,
                });
            }
            done += n;
        }
        Ok(())
    }

    /// Flush device caches.
    pub fn fsync(&self) -> Result<(), FsckError> {
        self.file.sync_all()?;
        Ok(())
    }
}
