// On-disk exFAT structures and checksums
// Field offsets follow the Microsoft exFAT specification

pub const DENTRY_SIZE: usize = 32;

// Directory entry types
pub const EXFAT_LAST: u8 = 0x00;
pub const EXFAT_BITMAP: u8 = 0x81;
pub const EXFAT_UPCASE: u8 = 0x82;
pub const EXFAT_VOLUME: u8 = 0x83;
pub const EXFAT_FILE: u8 = 0x85;
pub const EXFAT_GUID: u8 = 0xA0;
pub const EXFAT_STREAM: u8 = 0xC0;
pub const EXFAT_NAME: u8 = 0xC1;

// File attributes
pub const ATTR_READONLY: u16 = 0x0001;
pub const ATTR_HIDDEN: u16 = 0x0002;
pub const ATTR_SYSTEM: u16 = 0x0004;
pub const ATTR_SUBDIR: u16 = 0x0010;
pub const ATTR_ARCHIVE: u16 = 0x0020;

// Stream entry flags
pub const EXFAT_SF_CONTIGUOUS: u8 = 0x02;

// Volume flags in the boot sector
pub const VOLUME_DIRTY: u16 = 0x0002;

// Cluster sentinels
pub const EXFAT_FREE_CLUSTER: u32 = 0;
pub const EXFAT_EOF_CLUSTER: u32 = 0xFFFF_FFFF;
pub const EXFAT_FIRST_CLUSTER: u32 = 2;

pub const BOOT_SEC_IDX: u64 = 0;
pub const BACKUP_BOOT_SEC_IDX: u64 = 12;

pub const ENTRY_NAME_MAX: usize = 15;
pub const EXFAT_NAME_MAX: usize = 255;
pub const VOLUME_LABEL_MAX_LEN: usize = 11;
pub const EXFAT_MAX_UPCASE_CHARS: usize = 0x10000;

/// An entry with the in-use bit clear but a nonzero type code marks a
/// deleted entry.
pub fn is_deleted_dentry(entry_type: u8) -> bool {
    entry_type != EXFAT_LAST && entry_type & 0x80 == 0
}

fn read_u16(raw: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([raw[off], raw[off + 1]])
}

fn read_u32(raw: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([raw[off], raw[off + 1], raw[off + 2], raw[off + 3]])
}

fn read_u64(raw: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&raw[off..off + 8]);
    u64::from_le_bytes(b)
}

/// The boot sector (first sector of the partition boot region).
///
/// The raw bytes are kept verbatim so the sector can be rewritten with
/// only the mutable fields (volume flags, percent-in-use) patched.
#[derive(Clone, Debug)]
pub struct BootSector {
    raw: [u8; 512],
}

impl BootSector {
    pub fn from_bytes(raw: [u8; 512]) -> Self {
        BootSector { raw }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn oem_name(&self) -> &[u8] {
        &self.raw[3..11]
    }

    pub fn partition_offset(&self) -> u64 {
        read_u64(&self.raw, 64)
    }

    /// Volume length in sectors.
    pub fn vol_length(&self) -> u64 {
        read_u64(&self.raw, 72)
    }

    /// First FAT sector.
    pub fn fat_offset(&self) -> u32 {
        read_u32(&self.raw, 80)
    }

    pub fn fat_length(&self) -> u32 {
        read_u32(&self.raw, 84)
    }

    /// First sector of the cluster heap.
    pub fn clu_offset(&self) -> u32 {
        read_u32(&self.raw, 88)
    }

    pub fn clu_count(&self) -> u32 {
        read_u32(&self.raw, 92)
    }

    pub fn root_cluster(&self) -> u32 {
        read_u32(&self.raw, 96)
    }

    pub fn vol_serial(&self) -> u32 {
        read_u32(&self.raw, 100)
    }

    /// 0x0100 for revision 1.0.
    pub fn fs_version(&self) -> u16 {
        read_u16(&self.raw, 104)
    }

    pub fn vol_flags(&self) -> u16 {
        read_u16(&self.raw, 106)
    }

    pub fn set_vol_flags(&mut self, flags: u16) {
        self.raw[106..108].copy_from_slice(&flags.to_le_bytes());
    }

    pub fn sect_size_bits(&self) -> u8 {
        self.raw[108]
    }

    pub fn sect_per_clus_bits(&self) -> u8 {
        self.raw[109]
    }

    pub fn num_fats(&self) -> u8 {
        self.raw[110]
    }

    pub fn perc_in_use(&self) -> u8 {
        self.raw[112]
    }

    pub fn sector_size(&self) -> u32 {
        1u32 << self.sect_size_bits()
    }

    pub fn cluster_size(&self) -> u32 {
        1u32 << (self.sect_size_bits() as u32 + self.sect_per_clus_bits() as u32)
    }
}

/// One 32-byte directory entry, addressed through typed accessors.
///
/// Only the fields the checker reads or rewrites are exposed; which
/// accessors are meaningful depends on `entry_type`.
#[derive(Clone, Copy)]
pub struct Dentry(pub [u8; DENTRY_SIZE]);

impl Dentry {
    pub fn entry_type(&self) -> u8 {
        self.0[0]
    }

    pub fn is_deleted(&self) -> bool {
        is_deleted_dentry(self.0[0])
    }

    // --- file entry (0x85) ---

    pub fn file_num_ext(&self) -> u8 {
        self.0[1]
    }

    pub fn file_checksum(&self) -> u16 {
        read_u16(&self.0, 2)
    }

    pub fn set_file_checksum(&mut self, checksum: u16) {
        self.0[2..4].copy_from_slice(&checksum.to_le_bytes());
    }

    pub fn file_attr(&self) -> u16 {
        read_u16(&self.0, 4)
    }

    // --- stream entry (0xC0) ---

    pub fn stream_flags(&self) -> u8 {
        self.0[1]
    }

    pub fn set_stream_flags(&mut self, flags: u8) {
        self.0[1] = flags;
    }

    pub fn stream_name_len(&self) -> u8 {
        self.0[3]
    }

    pub fn stream_name_hash(&self) -> u16 {
        read_u16(&self.0, 4)
    }

    pub fn set_stream_name_hash(&mut self, hash: u16) {
        self.0[4..6].copy_from_slice(&hash.to_le_bytes());
    }

    pub fn stream_valid_size(&self) -> u64 {
        read_u64(&self.0, 8)
    }

    pub fn set_stream_valid_size(&mut self, size: u64) {
        self.0[8..16].copy_from_slice(&size.to_le_bytes());
    }

    pub fn stream_start_clu(&self) -> u32 {
        read_u32(&self.0, 20)
    }

    pub fn set_stream_start_clu(&mut self, clu: u32) {
        self.0[20..24].copy_from_slice(&clu.to_le_bytes());
    }

    pub fn stream_size(&self) -> u64 {
        read_u64(&self.0, 24)
    }

    pub fn set_stream_size(&mut self, size: u64) {
        self.0[24..32].copy_from_slice(&size.to_le_bytes());
    }

    // --- name entry (0xC1) ---

    pub fn name_units(&self) -> [u16; ENTRY_NAME_MAX] {
        let mut units = [0u16; ENTRY_NAME_MAX];
        for (i, unit) in units.iter_mut().enumerate() {
            *unit = read_u16(&self.0, 2 + i * 2);
        }
        units
    }

    // --- allocation bitmap entry (0x81) ---

    pub fn bitmap_start_clu(&self) -> u32 {
        read_u32(&self.0, 20)
    }

    pub fn bitmap_size(&self) -> u64 {
        read_u64(&self.0, 24)
    }

    // --- upcase table entry (0x82) ---

    pub fn upcase_checksum(&self) -> u32 {
        read_u32(&self.0, 4)
    }

    pub fn upcase_start_clu(&self) -> u32 {
        read_u32(&self.0, 20)
    }

    pub fn upcase_size(&self) -> u64 {
        read_u64(&self.0, 24)
    }

    // --- volume label entry (0x83) ---

    pub fn vol_char_cnt(&self) -> u8 {
        self.0[1]
    }

    pub fn vol_label_units(&self) -> [u16; VOLUME_LABEL_MAX_LEN] {
        let mut units = [0u16; VOLUME_LABEL_MAX_LEN];
        for (i, unit) in units.iter_mut().enumerate() {
            *unit = read_u16(&self.0, 2 + i * 2);
        }
        units
    }
}

impl std::fmt::Debug for Dentry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Dentry(type=0x{:02x})", self.entry_type())
    }
}

/// Feed one sector into the running boot-region checksum.
///
/// `first` marks the boot sector itself, whose volume-flags and
/// percent-in-use bytes (offsets 106, 107, 112) are mutable and
/// excluded from the sum. The same rotate-add is reused, without the
/// skips, for the upcase table checksum.
pub fn boot_calc_checksum(sector: &[u8], first: bool, checksum: &mut u32) {
    for (i, &byte) in sector.iter().enumerate() {
        if first && (i == 106 || i == 107 || i == 112) {
            continue;
        }
        *checksum = ((*checksum << 31) | (*checksum >> 1)).wrapping_add(byte as u32);
    }
}

/// Feed one directory entry into the running entry-set checksum.
///
/// For the primary entry the stored checksum bytes (2..4) are skipped.
pub fn calc_dentry_checksum(dentry: &Dentry, checksum: &mut u16, primary: bool) {
    for (i, &byte) in dentry.0.iter().enumerate() {
        if primary && (i == 2 || i == 3) {
            continue;
        }
        *checksum = ((*checksum << 15) | (*checksum >> 1)).wrapping_add(byte as u16);
    }
}

/// Name hash stored in the stream entry: the rotate-add sum over the
/// upcased UTF-16 name, low byte then high byte of each unit.
pub fn calc_name_hash(upcase: &[u16], name: &[u16]) -> u16 {
    let mut hash: u16 = 0;
    for &unit in name {
        let ch = upcase
            .get(unit as usize)
            .copied()
            .unwrap_or(unit)
            .to_le_bytes();
        hash = ((hash << 15) | (hash >> 1)).wrapping_add(ch[0] as u16);
        hash = ((hash << 15) | (hash >> 1)).wrapping_add(ch[1] as u16);
    }
    hash
}
