// Shared miniature-volume builder for the scenario tests
//
// Lays out a small but structurally complete exFAT image in memory:
// checksummed boot region plus backup, one FAT, allocation bitmap,
// compressed upcase table, and a root directory, with scenario files
// described declaratively.

use std::collections::BTreeMap;
use std::io::Write;

use exfsck_core::BlockDevice;
use exfsck_fsck::ondisk::{
    boot_calc_checksum, calc_dentry_checksum, calc_name_hash, Dentry, ATTR_ARCHIVE, ATTR_SUBDIR,
    DENTRY_SIZE, EXFAT_BITMAP, EXFAT_EOF_CLUSTER, EXFAT_FILE, EXFAT_NAME, EXFAT_SF_CONTIGUOUS,
    EXFAT_STREAM, EXFAT_UPCASE, EXFAT_VOLUME,
};
use exfsck_fsck::upcase::decompress_upcase_table;

pub const SECT: u32 = 512;
pub const CLUS: u32 = 4096;
pub const CLUS_COUNT: u32 = 256;
pub const FAT_SECTOR: u32 = 24;
pub const HEAP_SECTOR: u32 = 64;

pub const BITMAP_CLUS: u32 = 2;
pub const UPCASE_CLUS: u32 = 3;
pub const ROOT_CLUS: u32 = 4;

pub const TOTAL_SECTORS: u64 = HEAP_SECTOR as u64 + (CLUS_COUNT as u64 * CLUS as u64) / SECT as u64;

pub fn fat_off(clus: u32) -> u64 {
    (FAT_SECTOR * SECT) as u64 + 4 * clus as u64
}

pub fn heap_off(clus: u32) -> u64 {
    (HEAP_SECTOR * SECT) as u64 + (clus - 2) as u64 * CLUS as u64
}

/// Root-directory slot index of the first scenario entry: label,
/// bitmap, and upcase entries come first.
pub const FIRST_FILE_SLOT: usize = 3;

pub fn root_entry_off(slot: usize) -> u64 {
    heap_off(ROOT_CLUS) + (slot * DENTRY_SIZE) as u64
}

/// Compressed upcase table: one identity run covering 0..0x61 (the
/// run header's span doubles as padding for the decoder's in-place
/// indexing), then literal uppercase mappings for ASCII a..z.
pub fn upcase_compressed() -> Vec<u16> {
    let mut table = vec![0u16; 0x61];
    table[0] = 0xFFFF;
    table[1] = 0x0061;
    table.extend(0x41..=0x5Au16);
    table
}

pub fn upcase_table() -> Vec<u16> {
    decompress_upcase_table(&upcase_compressed()).unwrap()
}

fn upcase_bytes() -> Vec<u8> {
    upcase_compressed()
        .iter()
        .flat_map(|u| u.to_le_bytes())
        .collect()
}

/// Build a checksummed (file, stream, name...) entry set.
pub fn file_entry_set(
    upcase: &[u16],
    name: &str,
    attr: u16,
    size: u64,
    valid_size: u64,
    first_clus: u32,
    contiguous: bool,
) -> Vec<[u8; DENTRY_SIZE]> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let name_entries = (units.len() + 14) / 15;
    let mut set = vec![Dentry([0u8; DENTRY_SIZE]); 2 + name_entries];

    set[0].0[0] = EXFAT_FILE;
    set[0].0[1] = (1 + name_entries) as u8;
    set[0].0[4..6].copy_from_slice(&attr.to_le_bytes());

    set[1].0[0] = EXFAT_STREAM;
    set[1].0[1] = if contiguous {
        0x01 | EXFAT_SF_CONTIGUOUS
    } else {
        0x01
    };
    set[1].0[3] = units.len() as u8;
    set[1].set_stream_name_hash(calc_name_hash(upcase, &units));
    set[1].set_stream_valid_size(valid_size);
    set[1].set_stream_start_clu(first_clus);
    set[1].set_stream_size(size);

    for (i, chunk) in units.chunks(15).enumerate() {
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

    set.into_iter().map(|de| de.0).collect()
}

pub struct VolumeBuilder {
    fat: Vec<u32>,
    bitmap: Vec<u8>,
    root_sets: Vec<Vec<[u8; DENTRY_SIZE]>>,
    cluster_data: BTreeMap<u32, Vec<u8>>,
    upcase: Vec<u16>,
}

impl VolumeBuilder {
    pub fn new() -> Self {
        let mut builder = VolumeBuilder {
            fat: vec![0u32; (CLUS_COUNT + 2) as usize],
            bitmap: vec![0u8; ((CLUS_COUNT + 7) / 8) as usize],
            root_sets: Vec::new(),
            cluster_data: BTreeMap::new(),
            upcase: upcase_table(),
        };
        builder.fat[0] = 0xFFFF_FFF8;
        builder.fat[1] = EXFAT_EOF_CLUSTER;
        for clus in [BITMAP_CLUS, UPCASE_CLUS, ROOT_CLUS] {
            builder.fat[clus as usize] = EXFAT_EOF_CLUSTER;
            builder.mark(clus);
        }
        builder
    }

    pub fn mark(&mut self, clus: u32) {
        let bit = (clus - 2) as usize;
        self.bitmap[bit / 8] |= 1 << (bit % 8);
    }

    pub fn unmark(&mut self, clus: u32) {
        let bit = (clus - 2) as usize;
        self.bitmap[bit / 8] &= !(1 << (bit % 8));
    }

    pub fn set_fat(&mut self, clus: u32, next: u32) {
        self.fat[clus as usize] = next;
    }

    /// Chain `clusters` in the FAT, terminate with EOF, and mark them
    /// allocated.
    pub fn chain(&mut self, clusters: &[u32]) {
        for pair in clusters.windows(2) {
            self.fat[pair[0] as usize] = pair[1];
        }
        if let Some(&last) = clusters.last() {
            self.fat[last as usize] = EXFAT_EOF_CLUSTER;
        }
        for &clus in clusters {
            self.mark(clus);
        }
    }

    pub fn add_root_set(&mut self, set: Vec<[u8; DENTRY_SIZE]>) {
        self.root_sets.push(set);
    }

    /// A regular file with the given cluster layout. Contiguous files
    /// get bitmap bits but no FAT entries.
    pub fn add_file(&mut self, name: &str, size: u64, clusters: &[u32], contiguous: bool) {
        if contiguous {
            for &clus in clusters {
                self.mark(clus);
            }
        } else {
            self.chain(clusters);
        }
        let first = clusters.first().copied().unwrap_or(0);
        let set = file_entry_set(&self.upcase, name, ATTR_ARCHIVE, size, size, first, contiguous);
        self.add_root_set(set);
    }

    /// A subdirectory whose content clusters hold `sets` followed by
    /// free entries.
    pub fn add_dir(&mut self, name: &str, clusters: &[u32], sets: &[Vec<[u8; DENTRY_SIZE]>]) {
        self.chain(clusters);
        let size = clusters.len() as u64 * CLUS as u64;
        let set = file_entry_set(&self.upcase, name, ATTR_SUBDIR, size, size, clusters[0], false);
        self.add_root_set(set);

        let mut content = Vec::new();
        for entry_set in sets {
            for de in entry_set {
                content.extend_from_slice(de);
            }
        }
        content.resize(clusters.len() * CLUS as usize, 0);
        for (i, &clus) in clusters.iter().enumerate() {
            self.cluster_data
                .insert(clus, content[i * CLUS as usize..(i + 1) * CLUS as usize].to_vec());
        }
    }

    pub fn upcase(&self) -> Vec<u16> {
        self.upcase.clone()
    }

    fn boot_sector(&self) -> [u8; 512] {
        let mut raw = [0u8; 512];
        raw[0] = 0xEB;
        raw[1] = 0x76;
        raw[2] = 0x90;
        raw[3..11].copy_from_slice(b"EXFAT   ");
        raw[72..80].copy_from_slice(&TOTAL_SECTORS.to_le_bytes());
        raw[80..84].copy_from_slice(&FAT_SECTOR.to_le_bytes());
        raw[84..88].copy_from_slice(&8u32.to_le_bytes());
        raw[88..92].copy_from_slice(&HEAP_SECTOR.to_le_bytes());
        raw[92..96].copy_from_slice(&CLUS_COUNT.to_le_bytes());
        raw[96..100].copy_from_slice(&ROOT_CLUS.to_le_bytes());
        raw[100..104].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        raw[104..106].copy_from_slice(&0x0100u16.to_le_bytes());
        raw[108] = 9; // 512-byte sectors
        raw[109] = 3; // 8 sectors per cluster
        raw[110] = 1;
        raw[111] = 0x80;
        raw[510] = 0x55;
        raw[511] = 0xAA;
        raw
    }

    fn boot_region(&self) -> Vec<u8> {
        let sect = SECT as usize;
        let mut region = vec![0u8; 12 * sect];
        region[..sect].copy_from_slice(&self.boot_sector());

        let mut checksum = 0u32;
        for i in 0..11 {
            boot_calc_checksum(&region[i * sect..(i + 1) * sect], i == 0, &mut checksum);
        }
        for chunk in region[11 * sect..].chunks_exact_mut(4) {
            chunk.copy_from_slice(&checksum.to_le_bytes());
        }
        region
    }

    pub fn build(&self) -> Vec<u8> {
        let mut image = vec![0u8; TOTAL_SECTORS as usize * SECT as usize];

        let region = self.boot_region();
        image[..region.len()].copy_from_slice(&region);
        image[12 * SECT as usize..12 * SECT as usize + region.len()].copy_from_slice(&region);

        for (clus, &next) in self.fat.iter().enumerate() {
            let off = fat_off(clus as u32) as usize;
            image[off..off + 4].copy_from_slice(&next.to_le_bytes());
        }

        let bitmap_off = heap_off(BITMAP_CLUS) as usize;
        image[bitmap_off..bitmap_off + self.bitmap.len()].copy_from_slice(&self.bitmap);

        let upcase = upcase_bytes();
        let upcase_off = heap_off(UPCASE_CLUS) as usize;
        image[upcase_off..upcase_off + upcase.len()].copy_from_slice(&upcase);
        let mut upcase_checksum = 0u32;
        boot_calc_checksum(&upcase, false, &mut upcase_checksum);

        // Root directory: label, bitmap, upcase, then scenario sets.
        let root = heap_off(ROOT_CLUS) as usize;
        let mut slot = 0usize;

        let mut label = [0u8; DENTRY_SIZE];
        label[0] = EXFAT_VOLUME;
        let label_units: Vec<u16> = "TESTVOL".encode_utf16().collect();
        label[1] = label_units.len() as u8;
        for (i, &u) in label_units.iter().enumerate() {
            label[2 + i * 2..4 + i * 2].copy_from_slice(&u.to_le_bytes());
        }
        image[root..root + DENTRY_SIZE].copy_from_slice(&label);
        slot += 1;

        let mut bitmap_de = [0u8; DENTRY_SIZE];
        bitmap_de[0] = EXFAT_BITMAP;
        bitmap_de[20..24].copy_from_slice(&BITMAP_CLUS.to_le_bytes());
        bitmap_de[24..32].copy_from_slice(&(self.bitmap.len() as u64).to_le_bytes());
        image[root + slot * DENTRY_SIZE..root + (slot + 1) * DENTRY_SIZE]
            .copy_from_slice(&bitmap_de);
        slot += 1;

        let mut upcase_de = [0u8; DENTRY_SIZE];
        upcase_de[0] = EXFAT_UPCASE;
        upcase_de[4..8].copy_from_slice(&upcase_checksum.to_le_bytes());
        upcase_de[20..24].copy_from_slice(&UPCASE_CLUS.to_le_bytes());
        upcase_de[24..32].copy_from_slice(&(upcase.len() as u64).to_le_bytes());
        image[root + slot * DENTRY_SIZE..root + (slot + 1) * DENTRY_SIZE]
            .copy_from_slice(&upcase_de);
        slot += 1;

        assert_eq!(slot, FIRST_FILE_SLOT);
        for set in &self.root_sets {
            for de in set {
                image[root + slot * DENTRY_SIZE..root + (slot + 1) * DENTRY_SIZE]
                    .copy_from_slice(de);
                slot += 1;
            }
        }

        for (&clus, data) in &self.cluster_data {
            let off = heap_off(clus) as usize;
            image[off..off + data.len()].copy_from_slice(data);
        }

        image
    }
}

pub fn write_image(image: &[u8]) -> tempfile::NamedTempFile {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(image).unwrap();
    tmp.flush().unwrap();
    tmp
}

pub fn open_device(tmp: &tempfile::NamedTempFile, writeable: bool) -> BlockDevice {
    BlockDevice::open(tmp.path().to_str().unwrap(), writeable).unwrap()
}

pub fn read_fat(image: &[u8], clus: u32) -> u32 {
    let off = fat_off(clus) as usize;
    u32::from_le_bytes([image[off], image[off + 1], image[off + 2], image[off + 3]])
}

pub fn bitmap_bit(image: &[u8], clus: u32) -> bool {
    let bit = (clus - 2) as usize;
    image[heap_off(BITMAP_CLUS) as usize + bit / 8] & (1 << (bit % 8)) != 0
}
