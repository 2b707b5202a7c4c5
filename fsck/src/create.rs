// Building and writing new directory entry sets
//
// Used by repair tooling to materialize a file or directory entry in
// the first free slot of a parent directory found by the lookup scan.

use chrono::{DateTime, Datelike, Timelike, Utc};
use exfsck_core::{BlockDevice, FsckError};
use log::debug;

use crate::exfat::Exfat;
use crate::lookup::{lookup_dentry_set, LookupFilter};
use crate::ondisk::{
    calc_dentry_checksum, calc_name_hash, Dentry, DENTRY_SIZE, ENTRY_NAME_MAX, EXFAT_FILE,
    EXFAT_NAME, EXFAT_NAME_MAX, EXFAT_STREAM,
};

/// Pack a timestamp into the exFAT on-disk form: a 32-bit
/// date-and-time word, a 10 ms resolution supplement, and the "UTC"
/// timezone marker.
fn exfat_timestamp(at: DateTime<Utc>) -> (u32, u8, u8) {
    let date = (((at.year() - 1980) as u32) << 9) | (at.month() << 5) | at.day();
    let time = (at.hour() << 11) | (at.minute() << 5) | (at.second() >> 1);
    let time_10ms = ((at.second() & 1) * 100) as u8;
    ((date << 16) | time, time_10ms, 0x80)
}

/// Build a complete (file, stream, name...) entry set for `name`,
/// including the name hash and the set checksum.
pub fn build_file_dentry_set(
    upcase: &[u16],
    name: &str,
    attr: u16,
    at: DateTime<Utc>,
) -> Result<Vec<Dentry>, FsckError> {
    let units: Vec<u16> = name.encode_utf16().collect();
    if units.is_empty() || units.len() > EXFAT_NAME_MAX {
        return Err(FsckError::Format(format!(
            "invalid file name length: {}",
            units.len()
        )));
    }

    let name_entries = (units.len() + ENTRY_NAME_MAX - 1) / ENTRY_NAME_MAX;
    let mut set = vec![Dentry([0u8; DENTRY_SIZE]); 2 + name_entries];

    let (timestamp, time_10ms, tz) = exfat_timestamp(at);
    set[0].0[0] = EXFAT_FILE;
    set[0].0[1] = (1 + name_entries) as u8;
    set[0].0[4..6].copy_from_slice(&attr.to_le_bytes());
    set[0].0[8..12].copy_from_slice(&timestamp.to_le_bytes()); // created
    set[0].0[12..16].copy_from_slice(&timestamp.to_le_bytes()); // modified
    set[0].0[16..20].copy_from_slice(&timestamp.to_le_bytes()); // accessed
    set[0].0[20] = time_10ms;
    set[0].0[21] = time_10ms;
    set[0].0[22] = tz;
    set[0].0[23] = tz;
    set[0].0[24] = tz;

    set[1].0[0] = EXFAT_STREAM;
    set[1].0[1] = 0x01; // allocation possible
    set[1].0[3] = units.len() as u8;
    set[1].set_stream_name_hash(calc_name_hash(upcase, &units));

    for (i, chunk) in units.chunks(ENTRY_NAME_MAX).enumerate() {
        set[2 + i].0[0] = EXFAT_NAME;
        for (j, &unit) in chunk.iter().enumerate() {
            set[2 + i].0[2 + j * 2..4 + j * 2].copy_from_slice(&unit.to_le_bytes());
        }
    }

    let mut checksum = 0u16;
    calc_dentry_checksum(&set[0], &mut checksum, true);
    for de in &set[1..] {
        calc_dentry_checksum(de, &mut checksum, false);
    }
    set[0].set_file_checksum(checksum);

    Ok(set)
}

/// Create an empty file (or directory entry) named `name` under
/// `parent`, reusing the parent's trailing free slot. Succeeds
/// silently when an entry with the same name and attributes already
/// exists.
pub fn create_file(
    dev: &BlockDevice,
    exfat: &Exfat,
    parent: &crate::inode::Inode,
    name: &str,
    attr: u16,
    at: DateTime<Utc>,
) -> Result<(), FsckError> {
    let geo = exfat.geometry();
    let upcase = exfat
        .upcase_table
        .as_deref()
        .ok_or_else(|| FsckError::Other("upcase table is not loaded".to_string()))?;

    let units: Vec<u16> = name.encode_utf16().collect();
    let out = lookup_dentry_set(
        dev,
        geo,
        parent,
        &LookupFilter::ByName {
            entry_type: EXFAT_FILE,
            name: &units,
            upcase,
        },
    )?;

    if let Some(found) = out.found {
        let existing_attr = found.dentry_set[0].file_attr();
        if existing_attr & attr != attr {
            return Err(FsckError::Format(format!(
                "{} already exists with attributes 0x{:x}",
                name, existing_attr
            )));
        }
        return Ok(());
    }

    let free_offset = out.free_offset.ok_or_else(|| {
        FsckError::Format(format!("no free slot in directory for {}", name))
    })?;

    let set = build_file_dentry_set(upcase, name, attr, at)?;
    let set_len = (set.len() * DENTRY_SIZE) as u32;

    // The set must not spill past its cluster: the free run was only
    // verified up to the cluster holding its first slot.
    let (_, offset_in_clus) = geo.o2c(free_offset)?;
    if offset_in_clus + set_len > exfat.clus_size {
        return Err(FsckError::Other(format!(
            "no space in directory cluster for {}",
            name
        )));
    }

    let mut bytes = Vec::with_capacity(set_len as usize);
    for de in &set {
        bytes.extend_from_slice(&de.0);
    }
    dev.write_at(&bytes, free_offset)?;
    debug!("created entry set for {} at offset {}", name, free_offset);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn identity_upcase() -> Vec<u16> {
        let mut up: Vec<u16> = (0..=0xFFFFu32).map(|c| c as u16).collect();
        for c in b'a'..=b'z' {
            up[c as usize] = (c - 0x20) as u16;
        }
        up
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 12, 30, 45).unwrap()
    }

    #[test]
    fn set_shape_matches_the_name_length() {
        let upcase = identity_upcase();
        let set = build_file_dentry_set(&upcase, "a.txt", 0x20, noon()).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set[0].file_num_ext(), 2);

        let long = "a".repeat(31); // 31 chars -> 3 name entries
        let set = build_file_dentry_set(&upcase, &long, 0x20, noon()).unwrap();
        assert_eq!(set.len(), 5);
        assert_eq!(set[0].file_num_ext(), 4);
        assert_eq!(set[1].stream_name_len(), 31);
    }

    #[test]
    fn stored_checksum_verifies() {
        let upcase = identity_upcase();
        let set = build_file_dentry_set(&upcase, "report.pdf", 0x20, noon()).unwrap();

        let mut checksum = 0u16;
        calc_dentry_checksum(&set[0], &mut checksum, true);
        for de in &set[1..] {
            calc_dentry_checksum(de, &mut checksum, false);
        }
        assert_eq!(checksum, set[0].file_checksum());
    }

    #[test]
    fn name_hash_uses_the_upcase_table() {
        let upcase = identity_upcase();
        let lower = build_file_dentry_set(&upcase, "mixed.Case", 0x20, noon()).unwrap();
        let upper = build_file_dentry_set(&upcase, "MIXED.CASE", 0x20, noon()).unwrap();
        assert_eq!(
            lower[1].stream_name_hash(),
            upper[1].stream_name_hash()
        );
    }

    #[test]
    fn timestamp_packing() {
        let (ts, time_10ms, tz) = exfat_timestamp(noon());
        let date = (ts >> 16) as u16;
        let time = ts as u16;
        assert_eq!(date >> 9, 2024 - 1980);
        assert_eq!((date >> 5) & 0xF, 3);
        assert_eq!(date & 0x1F, 15);
        assert_eq!(time >> 11, 12);
        assert_eq!((time >> 5) & 0x3F, 30);
        assert_eq!((time & 0x1F) << 1, 44); // 2-second resolution
        assert_eq!(time_10ms, 100); // odd second carried here
        assert_eq!(tz, 0x80);
    }

    #[test]
    fn rejects_empty_and_oversized_names() {
        let upcase = identity_upcase();
        assert!(build_file_dentry_set(&upcase, "", 0, noon()).is_err());
        let too_long = "x".repeat(EXFAT_NAME_MAX + 1);
        assert!(build_file_dentry_set(&upcase, &too_long, 0, noon()).is_err());
    }
}
