// Streaming directory-entry iterator
//
// A directory's cluster chain is viewed through a pair of
// cluster-sized buffers forming a 2-cluster sliding window, so that a
// whole entry set (at most 19 entries) is addressable by index from
// the cursor even when it straddles a cluster boundary. Sectors
// modified through `update` are written back when the window slides
// past them, or on `flush`.

use exfsck_core::{BlockDevice, FsckError};

use crate::exfat::Geometry;
use crate::inode::Inode;
use crate::ondisk::{Dentry, DENTRY_SIZE, EXFAT_EOF_CLUSTER};

/// One cluster-sized I/O buffer with per-sector dirty tracking.
///
/// The checker allocates two of these up front; the entry iterator and
/// the reconciliation writer reuse them, never at the same time.
pub struct BufferDesc {
    /// Physical cluster held in `buffer`, when `loaded`.
    pub p_clus: u32,
    /// Logical cluster index within the directory, when `loaded`.
    pub l_index: u64,
    pub loaded: bool,
    pub buffer: Vec<u8>,
    dirty: Vec<bool>,
}

impl BufferDesc {
    pub fn new(clus_size: u32, sect_size: u32) -> Self {
        BufferDesc {
            p_clus: EXFAT_EOF_CLUSTER,
            l_index: 0,
            loaded: false,
            buffer: vec![0u8; clus_size as usize],
            dirty: vec![false; (clus_size / sect_size) as usize],
        }
    }

    pub fn alloc_pair(clus_size: u32, sect_size: u32) -> [BufferDesc; 2] {
        [
            BufferDesc::new(clus_size, sect_size),
            BufferDesc::new(clus_size, sect_size),
        ]
    }

    pub fn mark_dirty_sector(&mut self, sector: usize) {
        self.dirty[sector] = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty.iter_mut().for_each(|d| *d = false);
    }

    pub fn dirty_sectors(&self) -> impl Iterator<Item = usize> + '_ {
        self.dirty
            .iter()
            .enumerate()
            .filter_map(|(i, &d)| if d { Some(i) } else { None })
    }

    /// Write back dirty sectors of this buffer at `base` and clear the
    /// flags.
    pub fn flush(&mut self, dev: &BlockDevice, base: u64, sect_size: u32) -> Result<(), FsckError> {
        for s in 0..self.dirty.len() {
            if !self.dirty[s] {
                continue;
            }
            let off = s * sect_size as usize;
            dev.write_at(
                &self.buffer[off..off + sect_size as usize],
                base + off as u64,
            )?;
            self.dirty[s] = false;
        }
        Ok(())
    }
}

pub struct DeIter<'a> {
    dev: &'a BlockDevice,
    geo: Geometry,
    bufs: &'a mut [BufferDesc; 2],
    dir_contig: bool,
    dir_size: u64,
    /// Cursor byte offset within the directory.
    de_file_offset: u64,
    /// Logical index of the window's first cluster.
    win_l: u64,
    /// Physical cluster backing `win_l`.
    win_phys: u32,
    /// Set when the chain ended before the cursor's cluster.
    chain_ended: bool,
}

impl<'a> DeIter<'a> {
    /// Position a fresh window at the start of `dir`. The caller must
    /// not pass an empty directory.
    pub fn new(
        dev: &'a BlockDevice,
        bufs: &'a mut [BufferDesc; 2],
        geo: Geometry,
        dir: &Inode,
    ) -> Result<Self, FsckError> {
        let first = dir.first_clus.get();
        if !geo.heap_cluster(first) {
            return Err(FsckError::Format(format!(
                "directory starts at invalid cluster 0x{:x}",
                first
            )));
        }
        for buf in bufs.iter_mut() {
            buf.loaded = false;
            buf.clear_dirty();
        }
        let mut iter = DeIter {
            dev,
            geo,
            bufs,
            dir_contig: dir.is_contiguous.get(),
            dir_size: dir.size.get(),
            de_file_offset: 0,
            win_l: 0,
            win_phys: first,
            chain_ended: false,
        };
        iter.load(0, first)?;
        Ok(iter)
    }

    fn load(&mut self, l_index: u64, p_clus: u32) -> Result<(), FsckError> {
        let k = (l_index % 2) as usize;
        debug_assert!(self.bufs[k].dirty_sectors().next().is_none());
        self.dev
            .read_at(&mut self.bufs[k].buffer, self.geo.c2o(p_clus))?;
        self.bufs[k].p_clus = p_clus;
        self.bufs[k].l_index = l_index;
        self.bufs[k].loaded = true;
        Ok(())
    }

    fn buf_holds(&self, l_index: u64) -> bool {
        let k = (l_index % 2) as usize;
        self.bufs[k].loaded && self.bufs[k].l_index == l_index
    }

    /// Physical successor of the window's first cluster, from the
    /// look-ahead buffer when it is loaded, otherwise from the FAT.
    fn next_of_window(&mut self) -> Result<u32, FsckError> {
        if self.buf_holds(self.win_l + 1) {
            return Ok(self.bufs[((self.win_l + 1) % 2) as usize].p_clus);
        }
        self.geo
            .next_cluster(self.dev, self.dir_contig, self.win_phys)
    }

    /// Slide the window forward until its first cluster is the one
    /// holding the cursor, retiring (flushing) each cluster passed.
    fn sync_window(&mut self) -> Result<(), FsckError> {
        let cur_l = self.de_file_offset / self.geo.clus_size as u64;
        while self.win_l < cur_l && !self.chain_ended {
            let next = self.next_of_window()?;
            let k = (self.win_l % 2) as usize;
            if self.bufs[k].loaded {
                let base = self.geo.c2o(self.bufs[k].p_clus);
                self.bufs[k].flush(self.dev, base, self.geo.sect_size)?;
                self.bufs[k].loaded = false;
            }
            self.win_l += 1;
            if next == EXFAT_EOF_CLUSTER {
                self.chain_ended = true;
            } else if !self.geo.heap_cluster(next) {
                return Err(FsckError::Format(format!(
                    "broken directory chain: next cluster 0x{:x}",
                    next
                )));
            } else {
                self.win_phys = next;
            }
        }
        Ok(())
    }

    /// Resolve the buffer slot and physical base of the cluster
    /// holding byte `off`, loading it on demand. `Ok(None)` means the
    /// chain ends before it.
    fn locate(&mut self, off: u64) -> Result<Option<(usize, usize)>, FsckError> {
        self.sync_window()?;
        if self.chain_ended {
            return Ok(None);
        }
        let l = off / self.geo.clus_size as u64;
        let within = (off % self.geo.clus_size as u64) as usize;

        if l == self.win_l {
            if !self.buf_holds(l) {
                let phys = self.win_phys;
                self.load(l, phys)?;
            }
        } else if l == self.win_l + 1 {
            if !self.buf_holds(l) {
                let next = self
                    .geo
                    .next_cluster(self.dev, self.dir_contig, self.win_phys)?;
                if next == EXFAT_EOF_CLUSTER {
                    return Ok(None);
                }
                if !self.geo.heap_cluster(next) {
                    return Err(FsckError::Format(format!(
                        "broken directory chain: next cluster 0x{:x}",
                        next
                    )));
                }
                self.load(l, next)?;
            }
        } else {
            return Err(FsckError::Format(format!(
                "entry {} bytes past the cursor exceeds the 2-cluster window",
                off - self.de_file_offset
            )));
        }
        Ok(Some(((l % 2) as usize, within)))
    }

    /// Entry `i` past the cursor, or `None` at the end of the
    /// directory (size bound or end of chain).
    pub fn peek(&mut self, i: usize) -> Result<Option<Dentry>, FsckError> {
        let off = self.de_file_offset + (i * DENTRY_SIZE) as u64;
        if off + DENTRY_SIZE as u64 > self.dir_size {
            return Ok(None);
        }
        match self.locate(off)? {
            Some((k, within)) => {
                let mut raw = [0u8; DENTRY_SIZE];
                raw.copy_from_slice(&self.bufs[k].buffer[within..within + DENTRY_SIZE]);
                Ok(Some(Dentry(raw)))
            }
            None => Ok(None),
        }
    }

    /// Rewrite entry `i` past the cursor in the window and mark its
    /// sector for write-back.
    pub fn update(&mut self, i: usize, dentry: &Dentry) -> Result<(), FsckError> {
        let off = self.de_file_offset + (i * DENTRY_SIZE) as u64;
        if off + DENTRY_SIZE as u64 > self.dir_size {
            return Err(FsckError::Format(format!(
                "entry update past the end of the directory (offset {})",
                off
            )));
        }
        match self.locate(off)? {
            Some((k, within)) => {
                self.bufs[k].buffer[within..within + DENTRY_SIZE].copy_from_slice(&dentry.0);
                self.bufs[k].mark_dirty_sector(within / self.geo.sect_size as usize);
                Ok(())
            }
            None => Err(FsckError::Format(format!(
                "entry update past the end of the chain (offset {})",
                off
            ))),
        }
    }

    /// Move the cursor forward by `n` entries, retiring any cluster
    /// the window slides past.
    pub fn advance(&mut self, n: usize) -> Result<(), FsckError> {
        self.de_file_offset += (n * DENTRY_SIZE) as u64;
        self.sync_window()
    }

    /// Write back every dirty sector of both window buffers.
    pub fn flush(&mut self) -> Result<(), FsckError> {
        for buf in self.bufs.iter_mut() {
            if buf.loaded {
                let base = self.geo.c2o(buf.p_clus);
                buf.flush(self.dev, base, self.geo.sect_size)?;
            }
        }
        Ok(())
    }

    /// Device byte offset of the entry at the cursor.
    pub fn device_offset(&mut self) -> Result<u64, FsckError> {
        let off = self.de_file_offset;
        match self.locate(off)? {
            Some((k, within)) => Ok(self.geo.c2o(self.bufs[k].p_clus) + within as u64),
            None => Err(FsckError::Format(
                "cursor is past the end of the directory".to_string(),
            )),
        }
    }

    pub fn file_offset(&self) -> u64 {
        self.de_file_offset
    }
}
