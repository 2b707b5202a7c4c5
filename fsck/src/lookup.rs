// Streaming directory lookup
//
// Scans a directory for the first entry set matching a type (and
// optionally an upcased name), remembering the first free slot of the
// trailing free run so creation paths can reuse it.

use exfsck_core::{BlockDevice, FsckError};
use log::debug;

use crate::de_iter::{BufferDesc, DeIter};
use crate::exfat::Geometry;
use crate::inode::Inode;
use crate::ondisk::{Dentry, EXFAT_LAST, EXFAT_STREAM};

/// What to match. The predicate set is closed: lookups are either by
/// bare entry type or by type plus case-insensitive name.
pub enum LookupFilter<'a> {
    ByType(u8),
    ByName {
        entry_type: u8,
        name: &'a [u16],
        upcase: &'a [u16],
    },
}

pub struct LookupResult {
    /// The matched entry set, primary first.
    pub dentry_set: Vec<Dentry>,
    /// Device offset of the primary entry.
    pub dev_offset: u64,
}

pub struct LookupOutcome {
    pub found: Option<LookupResult>,
    /// Device offset of the trailing free run's first slot, when the
    /// directory ends in free (last or deleted) entries.
    pub free_offset: Option<u64>,
}

fn names_equal(upcase: &[u16], a: &[u16], b: &[u16]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(&x, &y)| {
            let ux = upcase.get(x as usize).copied().unwrap_or(x);
            let uy = upcase.get(y as usize).copied().unwrap_or(y);
            ux == uy
        })
}

/// Collect the UTF-16 name of the file entry set at the cursor.
/// Returns `None` when the set is malformed.
fn read_set_name(iter: &mut DeIter<'_>, num_ext: usize) -> Result<Option<Vec<u16>>, FsckError> {
    let stream = match iter.peek(1)? {
        Some(de) if de.entry_type() == EXFAT_STREAM => de,
        _ => return Ok(None),
    };
    let mut units = Vec::with_capacity(num_ext.saturating_sub(1) * 15);
    for i in 2..=num_ext {
        match iter.peek(i)? {
            Some(de) if de.entry_type() == crate::ondisk::EXFAT_NAME => {
                units.extend_from_slice(&de.name_units());
            }
            _ => return Ok(None),
        }
    }
    units.truncate(stream.stream_name_len() as usize);
    Ok(Some(units))
}

/// Scan `parent` for the first entry set matching `filter`.
///
/// The scan runs to the end of the chain even past a terminating
/// entry, so the free-slot offset always reflects the trailing run.
pub fn lookup_dentry_set(
    dev: &BlockDevice,
    geo: Geometry,
    parent: &Inode,
    filter: &LookupFilter<'_>,
) -> Result<LookupOutcome, FsckError> {
    let mut bufs = BufferDesc::alloc_pair(geo.clus_size, geo.sect_size);
    let mut outcome = LookupOutcome {
        found: None,
        free_offset: None,
    };
    if parent.size.get() == 0 {
        return Ok(outcome);
    }
    let mut iter = DeIter::new(dev, &mut bufs, geo, parent)?;
    let mut last_is_free = false;
    let mut free_offset = 0u64;

    let wanted_type = match filter {
        LookupFilter::ByType(t) => *t,
        LookupFilter::ByName { entry_type, .. } => *entry_type,
    };

    loop {
        let dentry = match iter.peek(0)? {
            Some(de) => de,
            None => break,
        };

        let mut dentry_count = 1usize;
        if dentry.entry_type() == wanted_type {
            let matched = match filter {
                LookupFilter::ByType(_) => true,
                LookupFilter::ByName { name, upcase, .. } => {
                    let num_ext = dentry.file_num_ext() as usize;
                    match read_set_name(&mut iter, num_ext)? {
                        Some(units) => {
                            dentry_count = num_ext + 1;
                            names_equal(upcase, &units, name)
                        }
                        None => false,
                    }
                }
            };

            if matched {
                let dev_offset = iter.device_offset()?;
                let mut set = Vec::with_capacity(dentry_count);
                for i in 0..dentry_count {
                    match iter.peek(i)? {
                        Some(de) => set.push(de),
                        None => {
                            return Err(FsckError::Format(
                                "entry set truncated at end of directory".to_string(),
                            ))
                        }
                    }
                }
                debug!(
                    "lookup matched type 0x{:02x} at offset {}",
                    wanted_type, dev_offset
                );
                outcome.found = Some(LookupResult {
                    dentry_set: set,
                    dev_offset,
                });
                return Ok(outcome);
            }
            last_is_free = false;
        } else if dentry.entry_type() == EXFAT_LAST || dentry.is_deleted() {
            if !last_is_free {
                free_offset = iter.device_offset()?;
                last_is_free = true;
            }
        } else {
            last_is_free = false;
        }

        iter.advance(dentry_count)?;
    }

    if last_is_free {
        outcome.free_offset = Some(free_offset);
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ondisk::{
        calc_dentry_checksum, calc_name_hash, Dentry, DENTRY_SIZE, EXFAT_BITMAP, EXFAT_FILE,
        EXFAT_NAME, EXFAT_UPCASE,
    };
    use std::io::Write;

    const SECT: u32 = 512;
    const CLUS: u32 = 1024;

    fn geometry() -> Geometry {
        Geometry {
            sect_size: SECT,
            clus_size: CLUS,
            clus_count: 16,
            fat_offset: 4096,
            heap_offset: 8192,
        }
    }

    fn identity_upcase() -> Vec<u16> {
        let mut up: Vec<u16> = (0..=0xFFFFu32).map(|c| c as u16).collect();
        for c in b'a'..=b'z' {
            up[c as usize] = (c - 0x20) as u16;
        }
        up
    }

    fn file_set(name: &str, upcase: &[u16]) -> Vec<Dentry> {
        let units: Vec<u16> = name.encode_utf16().collect();
        let name_entries = (units.len() + 14) / 15;
        let mut set = vec![Dentry([0u8; DENTRY_SIZE]); 2 + name_entries];

        set[0].0[0] = EXFAT_FILE;
        set[0].0[1] = (1 + name_entries) as u8;

        set[1].0[0] = EXFAT_STREAM;
        set[1].0[3] = units.len() as u8;
        set[1].set_stream_name_hash(calc_name_hash(upcase, &units));

        for (i, chunk) in units.chunks(15).enumerate() {
            set[2 + i].0[0] = EXFAT_NAME;
            for (j, &u) in chunk.iter().enumerate() {
                set[2 + i].0[2 + j * 2..4 + j * 2].copy_from_slice(&u.to_le_bytes());
            }
        }

        let mut checksum = 0u16;
        calc_dentry_checksum(&set[0], &mut checksum, true);
        for de in &set[1..] {
            calc_dentry_checksum(de, &mut checksum, false);
        }
        set[0].set_file_checksum(checksum);
        set
    }

    // Single-cluster root at cluster 2: bitmap entry, upcase entry,
    // one file, then free space.
    fn build_image(upcase: &[u16]) -> Vec<u8> {
        let mut image = vec![0u8; 8192 + 16 * CLUS as usize];
        let base = 8192usize;

        image[base] = EXFAT_BITMAP;
        image[base + DENTRY_SIZE] = EXFAT_UPCASE;

        let set = file_set("notes.txt", upcase);
        for (i, de) in set.iter().enumerate() {
            let off = base + (2 + i) * DENTRY_SIZE;
            image[off..off + DENTRY_SIZE].copy_from_slice(&de.0);
        }

        // FAT: cluster 2 ends the chain.
        image[4096 + 8..4096 + 12].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        image
    }

    fn device(image: &[u8]) -> (BlockDevice, tempfile::NamedTempFile) {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(image).unwrap();
        let dev = BlockDevice::open(tmp.path().to_str().unwrap(), false).unwrap();
        (dev, tmp)
    }

    fn root_inode() -> std::rc::Rc<Inode> {
        let root = Inode::new(crate::ondisk::ATTR_SUBDIR);
        root.first_clus.set(2);
        root.size.set(CLUS as u64);
        root
    }

    #[test]
    fn finds_entry_by_type() {
        let upcase = identity_upcase();
        let (dev, _tmp) = device(&build_image(&upcase));
        let root = root_inode();

        let out =
            lookup_dentry_set(&dev, geometry(), &root, &LookupFilter::ByType(EXFAT_UPCASE))
                .unwrap();
        let found = out.found.unwrap();
        assert_eq!(found.dentry_set.len(), 1);
        assert_eq!(found.dentry_set[0].entry_type(), EXFAT_UPCASE);
        assert_eq!(found.dev_offset, 8192 + DENTRY_SIZE as u64);
    }

    #[test]
    fn finds_file_by_name_case_insensitively() {
        let upcase = identity_upcase();
        let (dev, _tmp) = device(&build_image(&upcase));
        let root = root_inode();

        let wanted: Vec<u16> = "NOTES.TXT".encode_utf16().collect();
        let out = lookup_dentry_set(
            &dev,
            geometry(),
            &root,
            &LookupFilter::ByName {
                entry_type: EXFAT_FILE,
                name: &wanted,
                upcase: &upcase,
            },
        )
        .unwrap();
        let found = out.found.unwrap();
        assert_eq!(found.dentry_set.len(), 3);
        assert_eq!(found.dentry_set[1].entry_type(), EXFAT_STREAM);
        assert_eq!(found.dev_offset, 8192 + 2 * DENTRY_SIZE as u64);
    }

    #[test]
    fn miss_reports_the_trailing_free_run() {
        let upcase = identity_upcase();
        let (dev, _tmp) = device(&build_image(&upcase));
        let root = root_inode();

        let wanted: Vec<u16> = "missing.dat".encode_utf16().collect();
        let out = lookup_dentry_set(
            &dev,
            geometry(),
            &root,
            &LookupFilter::ByName {
                entry_type: EXFAT_FILE,
                name: &wanted,
                upcase: &upcase,
            },
        )
        .unwrap();
        assert!(out.found.is_none());
        // The file set occupies entries 2..5, so the free run starts
        // at entry 5.
        assert_eq!(out.free_offset, Some(8192 + 5 * DENTRY_SIZE as u64));
    }

    #[test]
    fn deleted_entries_join_the_free_run_only_at_the_tail() {
        let upcase = identity_upcase();
        let mut image = build_image(&upcase);
        // A deleted entry between the system entries and the file.
        image[8192 + DENTRY_SIZE] = EXFAT_UPCASE & 0x7F;
        let (dev, _tmp) = device(&image);
        let root = root_inode();

        let out =
            lookup_dentry_set(&dev, geometry(), &root, &LookupFilter::ByType(0x7E)).unwrap();
        assert!(out.found.is_none());
        // The free run restarts after the (in-use) file set.
        assert_eq!(out.free_offset, Some(8192 + 5 * DENTRY_SIZE as u64));
    }
}
