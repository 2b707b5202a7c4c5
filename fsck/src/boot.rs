// Boot-region validation and backup-driven restoration

use exfsck_core::{BlockDevice, FsckError};
use log::{error, info, warn};

use crate::ondisk::{
    boot_calc_checksum, BootSector, BACKUP_BOOT_SEC_IDX, BOOT_SEC_IDX, VOLUME_DIRTY,
};
use crate::repair::{FaultCode, RepairContext};

const MAX_SECTOR_SIZE: u32 = 4096;
const MIN_SECTOR_SIZE: u32 = 512;
const MAX_CLUSTER_SIZE: u32 = 32 * 1024 * 1024;

/// Verify the 12-sector boot region starting at `bs_offset`: the
/// running checksum over the first 11 sectors must equal every 32-bit
/// word of the 12th.
fn boot_region_checksum(
    dev: &BlockDevice,
    bs_offset: u64,
    sect_size: u32,
) -> Result<(), FsckError> {
    let mut sect = vec![0u8; sect_size as usize];
    let mut checksum = 0u32;
    for i in 0..11u64 {
        dev.read_at(&mut sect, (bs_offset + i) * sect_size as u64)?;
        boot_calc_checksum(&sect, i == 0, &mut checksum);
    }

    dev.read_at(&mut sect, (bs_offset + 11) * sect_size as u64)?;
    for chunk in sect.chunks_exact(4) {
        let stored = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if stored != checksum {
            return Err(FsckError::Format(format!(
                "checksum of boot region is not correct: {:#x}, but expected {:#x}",
                stored, checksum
            )));
        }
    }
    Ok(())
}

/// Read and validate one boot region (primary at sector 0, backup at
/// sector 12).
pub fn read_boot_region(dev: &BlockDevice, bs_offset: u64) -> Result<BootSector, FsckError> {
    let sect_size = dev.sector_size();
    let mut raw = [0u8; 512];
    dev.read_at(&mut raw, bs_offset * sect_size as u64)?;
    let bs = BootSector::from_bytes(raw);

    if bs.oem_name() != b"EXFAT   " {
        return Err(FsckError::Format(
            "failed to find exfat file system".to_string(),
        ));
    }

    boot_region_checksum(dev, bs_offset, sect_size)?;

    if bs.sector_size() < MIN_SECTOR_SIZE || bs.sector_size() > MAX_SECTOR_SIZE {
        return Err(FsckError::Format(format!(
            "too small or big sector size: {}",
            bs.sector_size()
        )));
    }
    if bs.cluster_size() > MAX_CLUSTER_SIZE {
        return Err(FsckError::Format(format!(
            "too big cluster size: {}",
            bs.cluster_size()
        )));
    }
    if bs.fs_version() != 0x0100 {
        return Err(FsckError::Format(format!(
            "unsupported exfat version: {}.{}",
            bs.fs_version() >> 8,
            bs.fs_version() & 0xFF
        )));
    }
    if bs.num_fats() != 1 {
        return Err(FsckError::Format(format!(
            "unsupported FAT count: {}",
            bs.num_fats()
        )));
    }
    if bs.vol_length() * bs.sector_size() as u64 > dev.size() {
        return Err(FsckError::Format(format!(
            "too large sector count: {}",
            bs.vol_length()
        )));
    }
    if bs.clu_count() as u64 * bs.cluster_size() as u64 > dev.size() {
        return Err(FsckError::Format(format!(
            "too large cluster count: {}",
            bs.clu_count()
        )));
    }

    Ok(bs)
}

/// Copy the 12 backup sectors over the primary boot region, forcing
/// percent-in-use to the "unknown" marker, then sync.
pub fn restore_boot_region(dev: &BlockDevice) -> Result<(), FsckError> {
    let sect_size = dev.sector_size() as u64;
    let mut sector = vec![0u8; sect_size as usize];

    for i in 0..12u64 {
        dev.read_at(&mut sector, (BACKUP_BOOT_SEC_IDX + i) * sect_size)?;
        if i == 0 {
            sector[112] = 0xFF;
        }
        dev.write_at(&sector, (BOOT_SEC_IDX + i) * sect_size)?;
    }
    dev.fsync()
}

/// Validate the primary boot region; when it is corrupted and policy
/// allows, fall back to the backup copy and rewrite the primary from
/// it.
pub fn boot_region_check(
    dev: &BlockDevice,
    repair: &mut RepairContext,
) -> Result<BootSector, FsckError> {
    match read_boot_region(dev, BOOT_SEC_IDX) {
        Ok(bs) => Ok(bs),
        Err(FsckError::Format(msg)) => {
            warn!("{}", msg);
            if !repair.ask(
                FaultCode::BsBootRegion,
                "boot region is corrupted. try to restore the region from backup",
            ) {
                return Err(FsckError::Format(msg));
            }
            let bs = read_boot_region(dev, BACKUP_BOOT_SEC_IDX).map_err(|e| {
                error!("backup boot region is also corrupted");
                e
            })?;
            restore_boot_region(dev).map_err(|e| {
                error!("failed to restore boot region from backup");
                e
            })?;
            info!("boot region restored from backup");
            Ok(bs)
        }
        Err(e) => Err(e),
    }
}

/// Toggle the VolumeDirty flag and push the boot sector to the device.
pub fn mark_volume_dirty(
    dev: &BlockDevice,
    bs: &mut BootSector,
    dirty: bool,
) -> Result<(), FsckError> {
    let mut flags = bs.vol_flags();
    if dirty {
        flags |= VOLUME_DIRTY;
    } else {
        flags &= !VOLUME_DIRTY;
    }
    bs.set_vol_flags(flags);

    dev.write_at(bs.as_bytes(), 0)?;
    dev.fsync()
}
