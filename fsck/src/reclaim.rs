// FAT and bitmap reconciliation
//
// Runs only after a repair truncated at least one chain. Clusters the
// walk never saw referenced are freed in the FAT, and the on-disk
// allocation bitmap is rewritten wherever it disagrees with the
// in-memory one.

use exfsck_core::{BlockDevice, FsckError};
use log::{debug, info};

use crate::de_iter::BufferDesc;
use crate::exfat::Exfat;
use crate::ondisk::{EXFAT_FIRST_CLUSTER, EXFAT_FREE_CLUSTER};

/// Sweep the FAT in cluster-sized chunks through the shared buffer
/// pair, clearing entries for clusters absent from the in-memory
/// bitmap.
fn write_dirty_fat(
    dev: &BlockDevice,
    exfat: &Exfat,
    buffers: &mut [BufferDesc; 2],
) -> Result<(), FsckError> {
    let geo = exfat.geometry();
    let read_size = exfat.clus_size as u64;
    let write_size = exfat.sect_size as u64;
    let last_clus = exfat.clus_count as u64 + EXFAT_FIRST_CLUSTER as u64;

    let mut clus: u64 = 0;
    let mut offset = geo.fat_offset;
    let mut idx = 0usize;
    let mut freed = 0u64;

    for buf in buffers.iter_mut() {
        buf.loaded = false;
        buf.clear_dirty();
    }

    while clus < last_clus {
        let chunk = (read_size / 4).min(last_clus - clus);
        let len = chunk * 4;
        // Round the read up to whole sectors so write-back stays
        // sector-aligned; the FAT region itself is sector-granular.
        let read_len = ((len + write_size - 1) / write_size) * write_size;
        dev.read_at(&mut buffers[idx].buffer[..read_len as usize], offset)?;

        let first = clus.max(EXFAT_FIRST_CLUSTER as u64);
        for i in first..clus + chunk {
            let at = ((i - clus) * 4) as usize;
            let entry = u32::from_le_bytes([
                buffers[idx].buffer[at],
                buffers[idx].buffer[at + 1],
                buffers[idx].buffer[at + 2],
                buffers[idx].buffer[at + 3],
            ]);
            if !exfat.alloc_bitmap.get(i as u32) && entry != EXFAT_FREE_CLUSTER {
                buffers[idx].buffer[at..at + 4]
                    .copy_from_slice(&EXFAT_FREE_CLUSTER.to_le_bytes());
                buffers[idx].mark_dirty_sector(at / write_size as usize);
                freed += 1;
            }
        }

        buffers[idx].flush(dev, offset, exfat.sect_size)?;

        idx ^= 1;
        clus += chunk;
        offset += len;
    }

    if freed > 0 {
        info!("freed {} orphaned FAT entries", freed);
    }
    Ok(())
}

/// Rewrite every stretch of the on-disk allocation bitmap that
/// disagrees with the clusters the walk observed as referenced.
fn write_dirty_bitmap(
    dev: &BlockDevice,
    exfat: &Exfat,
    buffers: &mut [BufferDesc; 2],
) -> Result<(), FsckError> {
    let geo = exfat.geometry();
    let read_size = exfat.clus_size as u64;
    let write_size = exfat.sect_size as u64;

    let mut offset = geo.c2o(exfat.disk_bitmap_clus);
    let last_offset = offset + exfat.disk_bitmap_size as u64;
    let mut bitmap_offset = 0usize;
    let mut idx = 0usize;
    let alloc = exfat.alloc_bitmap.as_bytes();

    while offset < last_offset {
        let len = read_size.min(last_offset - offset) as usize;
        dev.read_at(&mut buffers[idx].buffer[..len], offset)?;

        let mut i = 0usize;
        while i < len {
            let size = (write_size as usize).min(len - i);
            let mem = &alloc[bitmap_offset + i..bitmap_offset + i + size];
            if &buffers[idx].buffer[i..i + size] != mem {
                debug!("rewriting bitmap sector at offset {}", offset + i as u64);
                dev.write_at(mem, offset + i as u64)?;
            }
            i += size;
        }

        idx ^= 1;
        offset += len as u64;
        bitmap_offset += len;
    }
    Ok(())
}

/// Free unreferenced clusters in the FAT, then bring the on-disk
/// bitmap in line with the in-memory one.
pub fn reclaim_free_clusters(
    dev: &BlockDevice,
    exfat: &Exfat,
    buffers: &mut [BufferDesc; 2],
) -> Result<(), FsckError> {
    write_dirty_fat(dev, exfat, buffers)?;
    write_dirty_bitmap(dev, exfat, buffers)?;
    Ok(())
}
