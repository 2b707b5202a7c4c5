// Upcase table loading and decompression
//
// The on-disk table may be stored run-length compressed: the marker
// 0xFFFF followed by a length stands for an identity run at the
// current position. Positions beyond the compressed data are identity.

use exfsck_core::{BlockDevice, FsckError};
use log::{debug, error};

use crate::exfat::Exfat;
use crate::lookup::{lookup_dentry_set, LookupFilter};
use crate::ondisk::{boot_calc_checksum, EXFAT_MAX_UPCASE_CHARS, EXFAT_UPCASE};

/// Expand a compressed upcase table into the full 65,536-entry map.
///
/// Pure and idempotent: the same input always yields the same table.
pub fn decompress_upcase_table(compressed: &[u16]) -> Result<Vec<u16>, FsckError> {
    if compressed.len() > EXFAT_MAX_UPCASE_CHARS {
        return Err(FsckError::Format(format!(
            "upcase table too long: {} entries",
            compressed.len()
        )));
    }

    let mut table: Vec<u16> = (0..EXFAT_MAX_UPCASE_CHARS as u32).map(|c| c as u16).collect();
    let mut i = 0usize;
    while i < compressed.len() {
        let ch = compressed[i];
        if ch == 0xFFFF && i + 1 < compressed.len() {
            let len = compressed[i + 1] as usize;
            if len == 0 {
                // A zero-length run cannot advance the scan.
                break;
            }
            // The run positions are already identity in `table`.
            i += len;
        } else {
            table[i] = ch;
            i += 1;
        }
    }
    Ok(table)
}

/// Locate the upcase table through the root directory, verify its
/// checksum, and decode it into the volume state.
pub fn read_upcase_table(dev: &BlockDevice, exfat: &mut Exfat) -> Result<(), FsckError> {
    let geo = exfat.geometry();
    let root = exfat
        .root
        .clone()
        .ok_or_else(|| FsckError::Other("root directory is not set".to_string()))?;

    let out = lookup_dentry_set(dev, geo, &root, &LookupFilter::ByType(EXFAT_UPCASE))?;
    let dentry = match out.found {
        Some(found) => found.dentry_set[0],
        None => {
            return Err(FsckError::Format(
                "upcase table entry not found in root".to_string(),
            ))
        }
    };

    let start_clu = dentry.upcase_start_clu();
    if !geo.heap_cluster(start_clu) {
        return Err(FsckError::Format(format!(
            "invalid start cluster of upcase table: 0x{:x}",
            start_clu
        )));
    }

    let size = dentry.upcase_size();
    if size == 0 || size % 2 != 0 || size > (EXFAT_MAX_UPCASE_CHARS * 2) as u64 {
        return Err(FsckError::Format(format!(
            "invalid size of upcase table: 0x{:x}",
            size
        )));
    }

    let mut raw = vec![0u8; size as usize];
    dev.read_at(&mut raw, geo.c2o(start_clu))?;

    let mut checksum = 0u32;
    boot_calc_checksum(&raw, false, &mut checksum);
    if checksum != dentry.upcase_checksum() {
        error!(
            "corrupted upcase table {:#x} (expected: {:#x})",
            checksum,
            dentry.upcase_checksum()
        );
        return Err(FsckError::Format("corrupted upcase table".to_string()));
    }

    exfat.alloc_bitmap.set_range(
        start_clu,
        ((size + exfat.clus_size as u64 - 1) / exfat.clus_size as u64) as u32,
    );

    let compressed: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    exfat.upcase_table = Some(decompress_upcase_table(&compressed)?);
    debug!(
        "upcase table: start cluster {:#x}, size {:#x}",
        start_clu, size
    );
    Ok(())
}
