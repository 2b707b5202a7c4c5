// The verification walk
//
// Breadth-first traversal over the directory tree: each directory is
// streamed through the entry iterator, every file's cluster chain is
// reconciled against the FAT, the on-disk allocation bitmap, and its
// recorded size, and repairs are applied through the decision policy.

use std::rc::Rc;

use exfsck_core::{BlockDevice, FsckError};
use log::{debug, error, info, warn};

use crate::bitmap::ClusterBitmap;
use crate::boot::{boot_region_check, mark_volume_dirty};
use crate::de_iter::{BufferDesc, DeIter};
use crate::exfat::{human_size, Exfat};
use crate::inode::{release_ancestors, resolve_path, resolve_path_parent, Inode};
use crate::lookup::{lookup_dentry_set, LookupFilter};
use crate::ondisk::{
    calc_dentry_checksum, calc_name_hash, ATTR_SUBDIR, EXFAT_BITMAP, EXFAT_EOF_CLUSTER,
    EXFAT_FILE, EXFAT_FREE_CLUSTER, EXFAT_LAST, EXFAT_NAME, EXFAT_SF_CONTIGUOUS, EXFAT_STREAM,
    EXFAT_UPCASE, EXFAT_VOLUME, VOLUME_LABEL_MAX_LEN,
};
use crate::reclaim::reclaim_free_clusters;
use crate::repair::{FaultCode, RepairContext, RepairMode};
use crate::upcase::read_upcase_table;

/// Everything one checking run owns: the device, the volume state,
/// the shared buffer pair, and the repair policy with its counters.
pub struct Fsck {
    pub dev: BlockDevice,
    pub exfat: Exfat,
    pub buffers: [BufferDesc; 2],
    pub repair: RepairContext,
}

fn repair_file_ask(
    repair: &mut RepairContext,
    parent: &Rc<Inode>,
    node: &Inode,
    code: FaultCode,
    desc: &str,
) -> bool {
    let path = resolve_path_parent(parent, node);
    repair.ask(code, &format!("ERROR: {}: {}", path, desc))
}

fn fsck_err(parent: &Rc<Inode>, node: &Inode, desc: &str) {
    error!("ERROR: {}: {}", resolve_path_parent(parent, node), desc);
}

/// Cut a file's chain at `count` clusters: rewrite the stream entry's
/// sizes (and start cluster when nothing survives), then terminate the
/// FAT at the last kept cluster. The orphaned tail is left for the
/// reconciliation pass.
fn truncate_file(
    dev: &BlockDevice,
    exfat: &Exfat,
    repair: &mut RepairContext,
    iter: &mut DeIter<'_>,
    node: &Inode,
    prev: u32,
    count: u64,
) -> Result<bool, FsckError> {
    let geo = exfat.geometry();
    let new_size = count * exfat.clus_size as u64;
    node.size.set(new_size);
    if !exfat.heap_cluster(prev) {
        node.first_clus.set(EXFAT_FREE_CLUSTER);
    }

    let mut stream = match iter.peek(1)? {
        Some(de) if de.entry_type() == EXFAT_STREAM => de,
        _ => {
            return Err(FsckError::Format(
                "stream entry vanished during truncation".to_string(),
            ))
        }
    };
    if new_size < stream.stream_valid_size() {
        stream.set_stream_valid_size(new_size);
    }
    if !exfat.heap_cluster(prev) {
        stream.set_stream_start_clu(EXFAT_FREE_CLUSTER);
    }
    stream.set_stream_size(new_size);
    iter.update(1, &stream)?;

    repair.dirty_fat = true;
    if !node.is_contiguous.get() && exfat.heap_cluster(prev) {
        geo.set_fat(dev, prev, EXFAT_EOF_CLUSTER)?;
    }
    Ok(true)
}

/// Walk a file's cluster chain, marking accepted clusters in the
/// in-memory bitmap and truncating on any accepted fault.
///
/// Returns whether a repair was applied; an unrepaired fault surfaces
/// as a `Format` error.
fn check_clus_chain(
    dev: &BlockDevice,
    exfat: &mut Exfat,
    repair: &mut RepairContext,
    iter: &mut DeIter<'_>,
    parent: &Rc<Inode>,
    node: &Inode,
) -> Result<bool, FsckError> {
    let geo = exfat.geometry();
    let clus_size = exfat.clus_size as u64;
    let max_count = (node.size.get() + clus_size - 1) / clus_size;
    let contiguous = node.is_contiguous.get();

    let mut clus = node.first_clus.get();
    let mut prev = EXFAT_EOF_CLUSTER;
    let mut count: u64 = 0;

    if node.size.get() == 0 && node.first_clus.get() == EXFAT_FREE_CLUSTER {
        return Ok(false);
    }

    // The first cluster must agree with the size.
    if (node.size.get() == 0 && node.first_clus.get() != EXFAT_FREE_CLUSTER)
        || (node.size.get() > 0 && !exfat.heap_cluster(node.first_clus.get()))
    {
        if repair_file_ask(
            repair,
            parent,
            node,
            FaultCode::FileFirstClus,
            "first cluster is wrong",
        ) {
            return truncate_file(dev, exfat, repair, iter, node, prev, count);
        }
        return Err(FsckError::Format("first cluster is wrong".to_string()));
    }

    while clus != EXFAT_EOF_CLUSTER {
        if count >= max_count {
            // Contiguous files have no terminator; the size bounds the
            // chain by definition.
            if contiguous {
                break;
            }
            if repair_file_ask(
                repair,
                parent,
                node,
                FaultCode::FileSmallerSize,
                &format!(
                    "more clusters are allocated. truncate to {} bytes",
                    count * clus_size
                ),
            ) {
                return truncate_file(dev, exfat, repair, iter, node, prev, count);
            }
            return Err(FsckError::Format("oversized cluster chain".to_string()));
        }

        // Already seen: shared with another file, or a loop.
        if exfat.alloc_bitmap.get(clus) {
            if repair_file_ask(
                repair,
                parent,
                node,
                FaultCode::FileDuplicatedClus,
                &format!(
                    "cluster is already allocated for the other file. truncated to {} bytes",
                    count * clus_size
                ),
            ) {
                return truncate_file(dev, exfat, repair, iter, node, prev, count);
            }
            return Err(FsckError::Format("duplicated cluster".to_string()));
        }

        if !exfat.disk_bitmap_get(clus) {
            if repair_file_ask(
                repair,
                parent,
                node,
                FaultCode::FileInvalidClus,
                &format!(
                    "cluster is marked as free. truncate to {} bytes",
                    count * clus_size
                ),
            ) {
                return truncate_file(dev, exfat, repair, iter, node, prev, count);
            }
            return Err(FsckError::Format("cluster marked free in bitmap".to_string()));
        }

        let next = match geo.next_cluster(dev, contiguous, clus) {
            Ok(next) => next,
            Err(FsckError::Format(_)) => {
                return truncate_file(dev, exfat, repair, iter, node, prev, count);
            }
            Err(e) => return Err(e),
        };
        if !contiguous && !exfat.heap_cluster(next) && next != EXFAT_EOF_CLUSTER {
            if repair_file_ask(
                repair,
                parent,
                node,
                FaultCode::FileInvalidClus,
                &format!(
                    "broken cluster chain. truncate to {} bytes",
                    count * clus_size
                ),
            ) {
                return truncate_file(dev, exfat, repair, iter, node, prev, count);
            }
            return Err(FsckError::Format("broken cluster chain".to_string()));
        }

        count += 1;
        exfat.alloc_bitmap.set(clus);
        prev = clus;
        clus = next;
    }

    if count < max_count {
        if repair_file_ask(
            repair,
            parent,
            node,
            FaultCode::FileLargerSize,
            &format!(
                "less clusters are allocated. truncates to {} bytes",
                count * clus_size
            ),
        ) {
            return truncate_file(dev, exfat, repair, iter, node, prev, count);
        }
        return Err(FsckError::Format("undersized cluster chain".to_string()));
    }

    Ok(false)
}

/// Recompute the entry-set checksum from the buffered entries.
fn file_calc_checksum(iter: &mut DeIter<'_>, num_ext: usize) -> Result<u16, FsckError> {
    let mut checksum = 0u16;
    let file_de = iter
        .peek(0)?
        .ok_or_else(|| FsckError::Format("entry set vanished".to_string()))?;
    calc_dentry_checksum(&file_de, &mut checksum, true);
    for i in 1..=num_ext {
        let de = iter
            .peek(i)?
            .ok_or_else(|| FsckError::Format("entry set truncated".to_string()))?;
        calc_dentry_checksum(&de, &mut checksum, false);
    }
    Ok(checksum)
}

/// Validate one materialized inode: its chain, its size invariants,
/// its name hash, and the entry-set checksum.
fn check_inode(
    dev: &BlockDevice,
    exfat: &mut Exfat,
    repair: &mut RepairContext,
    iter: &mut DeIter<'_>,
    parent: &Rc<Inode>,
    node: &Inode,
) -> Result<bool, FsckError> {
    let mut fixed = check_clus_chain(dev, exfat, repair, iter, parent, node)?;
    let mut valid = true;

    if node.size.get() > exfat.clus_count as u64 * exfat.clus_size as u64 {
        fsck_err(
            parent,
            node,
            &format!("size {} is greater than cluster heap", node.size.get()),
        );
        valid = false;
    }

    if node.size.get() == 0 && node.is_contiguous.get() {
        if repair_file_ask(
            repair,
            parent,
            node,
            FaultCode::FileZeroNofat,
            "empty, but has no Fat chain",
        ) {
            let mut stream = iter
                .peek(1)?
                .ok_or_else(|| FsckError::Format("stream entry vanished".to_string()))?;
            stream.set_stream_flags(stream.stream_flags() & !EXFAT_SF_CONTIGUOUS);
            iter.update(1, &stream)?;
            node.is_contiguous.set(false);
            fixed = true;
        } else {
            valid = false;
        }
    }

    if node.attr & ATTR_SUBDIR != 0 && node.size.get() % exfat.clus_size as u64 != 0 {
        fsck_err(
            parent,
            node,
            &format!(
                "directory size {} is not divisible by {}",
                node.size.get(),
                exfat.clus_size
            ),
        );
        valid = false;
    }

    // Stale name hashes break case-insensitive lookups even though the
    // name entries themselves are intact.
    if let Some(upcase) = exfat.upcase_table.as_deref() {
        if !node.name.is_empty() {
            let stream = iter
                .peek(1)?
                .ok_or_else(|| FsckError::Format("stream entry vanished".to_string()))?;
            let hash = calc_name_hash(upcase, &node.name);
            if hash != stream.stream_name_hash() {
                if repair_file_ask(
                    repair,
                    parent,
                    node,
                    FaultCode::DeNameHash,
                    "the name hash of a file is wrong",
                ) {
                    let mut stream = stream;
                    stream.set_stream_name_hash(hash);
                    iter.update(1, &stream)?;
                    fixed = true;
                } else {
                    valid = false;
                }
            }
        }
    }

    let file_de = iter
        .peek(0)?
        .ok_or_else(|| FsckError::Format("entry set vanished".to_string()))?;
    let checksum = file_calc_checksum(iter, file_de.file_num_ext() as usize)?;
    if checksum != file_de.file_checksum() {
        if repair_file_ask(
            repair,
            parent,
            node,
            FaultCode::DeChecksum,
            "the checksum of a file is wrong",
        ) {
            let mut file_de = file_de;
            file_de.set_file_checksum(checksum);
            iter.update(0, &file_de)?;
            fixed = true;
        } else {
            valid = false;
        }
    }

    if valid {
        Ok(fixed)
    } else {
        Err(FsckError::Format("inode validation failed".to_string()))
    }
}

/// Parse the (file, stream, name...) set at the cursor into a fresh
/// inode. Returns the inode and the number of entries the set spans.
fn read_file_dentries(
    repair: &mut RepairContext,
    iter: &mut DeIter<'_>,
    parent: &Rc<Inode>,
) -> Result<(Rc<Inode>, usize), FsckError> {
    let file_de = match iter.peek(0)? {
        Some(de) if de.entry_type() == EXFAT_FILE => de,
        other => {
            return Err(FsckError::Format(format!(
                "failed to get file dentry: {:?}",
                other
            )))
        }
    };
    let stream_de = match iter.peek(1)? {
        Some(de) if de.entry_type() == EXFAT_STREAM => de,
        other => {
            return Err(FsckError::Format(format!(
                "failed to get stream dentry: {:?}",
                other
            )))
        }
    };

    let num_ext = file_de.file_num_ext() as usize;
    if num_ext < 2 {
        return Err(FsckError::Format(format!(
            "too few secondary count: {}",
            num_ext
        )));
    }

    let mut name_units = Vec::with_capacity((num_ext - 1) * 15);
    for i in 2..=num_ext {
        match iter.peek(i)? {
            Some(de) if de.entry_type() == EXFAT_NAME => {
                name_units.extend_from_slice(&de.name_units());
            }
            other => {
                return Err(FsckError::Format(format!(
                    "failed to get name dentry: {:?}",
                    other
                )))
            }
        }
    }

    let name_len = stream_de.stream_name_len() as usize;
    if num_ext != 1 + (name_len + 14) / 15 {
        warn!(
            "secondary count {} does not match name length {}",
            num_ext, name_len
        );
    }
    name_units.truncate(name_len.min(name_units.len()));
    while name_units.last() == Some(&0) {
        name_units.pop();
    }

    let node = Inode::with_name(file_de.file_attr(), name_units);
    node.first_clus.set(stream_de.stream_start_clu());
    node.is_contiguous
        .set(stream_de.stream_flags() & EXFAT_SF_CONTIGUOUS != 0);
    node.size.set(stream_de.stream_size());

    if node.size.get() < stream_de.stream_valid_size() {
        if repair_file_ask(
            repair,
            parent,
            &node,
            FaultCode::FileValidSize,
            &format!(
                "valid size {} greater than size {}",
                stream_de.stream_valid_size(),
                node.size.get()
            ),
        ) {
            let mut stream_de = stream_de;
            stream_de.set_stream_valid_size(stream_de.stream_size());
            iter.update(1, &stream_de)?;
        } else {
            return Err(FsckError::Format("valid size exceeds size".to_string()));
        }
    }

    Ok((node, num_ext + 1))
}

/// Result of scanning one file entry set: the inode when it passed
/// validation, how many entries the set spans, and whether a repair
/// was applied.
struct FileScan {
    node: Option<Rc<Inode>>,
    skip: usize,
    fixed: bool,
}

/// Parse and fully validate the file entry set at the cursor.
///
/// A set that fails validation still reports its span so the walk can
/// skip it as a unit and continue with the next sibling.
fn read_file(
    dev: &BlockDevice,
    exfat: &mut Exfat,
    repair: &mut RepairContext,
    iter: &mut DeIter<'_>,
    parent: &Rc<Inode>,
) -> Result<FileScan, FsckError> {
    let (node, skip) = read_file_dentries(repair, iter, parent)?;
    match check_inode(dev, exfat, repair, iter, parent, &node) {
        Ok(fixed) => {
            if node.attr & ATTR_SUBDIR != 0 {
                repair.stat.dir_count += 1;
            } else {
                repair.stat.file_count += 1;
            }
            Ok(FileScan {
                node: Some(node),
                skip,
                fixed,
            })
        }
        Err(FsckError::Format(msg)) => {
            debug!("invalid entry set: {}", msg);
            Ok(FileScan {
                node: None,
                skip,
                fixed: false,
            })
        }
        Err(e) => Err(e),
    }
}

/// Decode the 0x83 volume label entry at the cursor.
fn read_volume_label(exfat: &mut Exfat, iter: &mut DeIter<'_>) -> Result<(), FsckError> {
    let dentry = iter
        .peek(0)?
        .ok_or_else(|| FsckError::Format("volume label entry vanished".to_string()))?;

    let char_cnt = dentry.vol_char_cnt() as usize;
    if char_cnt == 0 {
        return Ok(());
    }
    if char_cnt > VOLUME_LABEL_MAX_LEN {
        return Err(FsckError::Format(format!("too long label: {}", char_cnt)));
    }

    let units = dentry.vol_label_units();
    exfat.volume_label = String::from_utf16_lossy(&units[..char_cnt]);
    info!("volume label [{}]", exfat.volume_label);
    Ok(())
}

/// Stream one directory, materializing and validating every child.
fn read_children(
    dev: &BlockDevice,
    exfat: &mut Exfat,
    buffers: &mut [BufferDesc; 2],
    repair: &mut RepairContext,
    dir: &Rc<Inode>,
) -> Result<(), FsckError> {
    if dir.size.get() == 0 {
        return Ok(());
    }
    let mut iter = DeIter::new(dev, buffers, exfat.geometry(), dir)?;

    let result = loop {
        let dentry = match iter.peek(0) {
            Ok(Some(de)) => de,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        };

        let mut dentry_count = 1usize;
        match dentry.entry_type() {
            EXFAT_FILE => match read_file(dev, exfat, repair, &mut iter, dir) {
                Ok(scan) => {
                    dentry_count = scan.skip;
                    if scan.fixed {
                        repair.stat.error_count += 1;
                        repair.stat.fixed_count += 1;
                    }
                    match scan.node {
                        Some(node) if node.attr & ATTR_SUBDIR != 0 && node.size.get() > 0 => {
                            Inode::link_child(dir, &node);
                            exfat.dir_list.push_back(node);
                        }
                        Some(_) => {}
                        None => repair.stat.error_count += 1,
                    }
                }
                Err(FsckError::Format(msg)) => {
                    debug!("skipping a broken entry set: {}", msg);
                    repair.stat.error_count += 1;
                }
                Err(e) => break Err(e),
            },
            EXFAT_VOLUME => {
                if let Err(e) = read_volume_label(exfat, &mut iter) {
                    error!("failed to verify volume label");
                    break Err(e);
                }
            }
            EXFAT_BITMAP | EXFAT_UPCASE => {}
            EXFAT_LAST => break Ok(()),
            other => {
                if !dentry.is_deleted() {
                    warn!("unknown entry type: 0x{:x}", other);
                }
            }
        }

        if repair.cancel {
            break Ok(());
        }
        if let Err(e) = iter.advance(dentry_count) {
            break Err(e);
        }
    };

    iter.flush()?;
    if result.is_err() {
        dir.children.borrow_mut().clear();
    }
    result
}

/// Follow the root chain to derive the root directory's size. Any
/// fault here is fatal: there is no file entry to truncate.
fn root_get_clus_count(
    dev: &BlockDevice,
    exfat: &mut Exfat,
    root: &Inode,
) -> Result<u32, FsckError> {
    let geo = exfat.geometry();
    let mut clus = root.first_clus.get();
    let mut count = 0u32;

    loop {
        if !exfat.heap_cluster(clus) {
            return Err(FsckError::Format(format!("/: bad cluster 0x{:x}", clus)));
        }
        if exfat.alloc_bitmap.get(clus) {
            return Err(FsckError::Format(
                "/: cluster is already allocated, or there is a loop in cluster chain"
                    .to_string(),
            ));
        }
        exfat.alloc_bitmap.set(clus);

        clus = geo
            .next_cluster(dev, root.is_contiguous.get(), clus)
            .map_err(|_| FsckError::Format("/: broken cluster chain".to_string()))?;
        count += 1;
        if clus == EXFAT_EOF_CLUSTER {
            return Ok(count);
        }
    }
}

/// Locate the allocation bitmap through the root directory and load a
/// byte-for-byte copy of it.
fn read_bitmap(dev: &BlockDevice, exfat: &mut Exfat) -> Result<(), FsckError> {
    let geo = exfat.geometry();
    let root = exfat
        .root
        .clone()
        .ok_or_else(|| FsckError::Other("root directory is not set".to_string()))?;

    let out = lookup_dentry_set(dev, geo, &root, &LookupFilter::ByType(EXFAT_BITMAP))?;
    let dentry = match out.found {
        Some(found) => found.dentry_set[0],
        None => {
            return Err(FsckError::Format(
                "allocation bitmap entry not found in root".to_string(),
            ))
        }
    };

    debug!(
        "bitmap: start cluster {:#x}, size {:#x}",
        dentry.bitmap_start_clu(),
        dentry.bitmap_size()
    );

    let min_size = (exfat.clus_count as u64 + 7) / 8;
    if dentry.bitmap_size() < min_size {
        return Err(FsckError::Format(format!(
            "invalid size of allocation bitmap: {:#x}",
            dentry.bitmap_size()
        )));
    }
    let start_clu = dentry.bitmap_start_clu();
    if !exfat.heap_cluster(start_clu) {
        return Err(FsckError::Format(format!(
            "invalid start cluster of allocation bitmap: {:#x}",
            start_clu
        )));
    }

    exfat.disk_bitmap_clus = start_clu;
    exfat.disk_bitmap_size = min_size as u32;
    exfat.alloc_bitmap.set_range(
        start_clu,
        ((min_size + exfat.clus_size as u64 - 1) / exfat.clus_size as u64) as u32,
    );

    let mut raw = vec![0u8; min_size as usize];
    dev.read_at(&mut raw, geo.c2o(start_clu))?;
    exfat.disk_bitmap = Some(ClusterBitmap::from_bytes(raw, exfat.clus_count));
    Ok(())
}

impl Fsck {
    /// Validate the boot region (restoring from backup when policy
    /// allows) and set up the run.
    pub fn new(dev: BlockDevice, mode: RepairMode) -> Result<Self, FsckError> {
        let mut repair = RepairContext::new(mode);
        let bs = boot_region_check(&dev, &mut repair)?;
        let exfat = Exfat::new(bs);
        let buffers = BufferDesc::alloc_pair(exfat.clus_size, exfat.sect_size);
        Ok(Fsck {
            dev,
            exfat,
            buffers,
            repair,
        })
    }

    pub fn mark_volume_dirty(&mut self, dirty: bool) -> Result<(), FsckError> {
        mark_volume_dirty(&self.dev, &mut self.exfat.bs, dirty)
    }

    /// Build the root inode from the boot sector and load the two
    /// system files (bitmap and upcase table) it references.
    pub fn check_root_dir(&mut self) -> Result<(), FsckError> {
        let root = Inode::new(ATTR_SUBDIR);
        root.first_clus.set(self.exfat.bs.root_cluster());

        let clus_count = root_get_clus_count(&self.dev, &mut self.exfat, &root)?;
        root.size.set(clus_count as u64 * self.exfat.clus_size as u64);
        debug!(
            "root directory: start cluster {:#x} size {:#x}",
            root.first_clus.get(),
            root.size.get()
        );

        self.exfat.root = Some(root);
        self.repair.stat.dir_count += 1;

        read_bitmap(&self.dev, &mut self.exfat)?;
        read_upcase_table(&self.dev, &mut self.exfat)?;
        Ok(())
    }

    /// Drain the directory work list breadth-first, then reconcile the
    /// FAT and bitmap if any repair truncated a chain.
    pub fn check_filesystem(&mut self) -> Result<(), FsckError> {
        let Fsck {
            dev,
            exfat,
            buffers,
            repair,
        } = self;

        let root = exfat
            .root
            .clone()
            .ok_or_else(|| FsckError::Other("root is not set".to_string()))?;
        exfat.dir_list.push_back(root);

        let mut ret: Result<(), FsckError> = Ok(());
        while let Some(dir) = exfat.dir_list.pop_front() {
            if dir.attr & ATTR_SUBDIR == 0 {
                error!(
                    "ERROR: {}: failed to travel directories. the node is not directory",
                    resolve_path(&dir)
                );
                ret = Err(FsckError::Format("work list holds a non-directory".to_string()));
                break;
            }

            if let Err(e) = read_children(dev, exfat, buffers, repair, &dir) {
                debug!("failed to check dentries: {}", resolve_path(&dir));
                ret = Err(e);
            }
            release_ancestors(&dir);

            if repair.cancel {
                break;
            }
        }

        exfat.dir_list.clear();
        exfat.root = None;

        if repair.dirty_fat {
            reclaim_free_clusters(dev, exfat, buffers)?;
        }
        ret
    }

    /// Full run: dirty-flag discipline around root check, walk, and
    /// final sync. On error the volume intentionally stays marked
    /// dirty.
    pub fn run(&mut self) -> Result<(), FsckError> {
        let writeable = self.repair.mode.writeable() && self.dev.writeable();

        if writeable {
            self.mark_volume_dirty(true)?;
        }

        debug!("verifying root directory...");
        self.check_root_dir()?;

        debug!("verifying directory entries...");
        self.check_filesystem()?;

        if writeable {
            self.dev.fsync()?;
            self.mark_volume_dirty(false)?;
        }
        Ok(())
    }

    /// End-of-run summary, printed regardless of outcome.
    pub fn show_info(&self, errors: bool) {
        info!("sector size:  {}", human_size(self.exfat.sect_size as u64));
        info!("cluster size: {}", human_size(self.exfat.clus_size as u64));
        info!("volume size:  {}", human_size(self.dev.size()));

        let stat = &self.repair.stat;
        println!(
            "{}: {}. directories {}, files {}",
            self.dev.path(),
            if errors { "checking stopped" } else { "clean" },
            stat.dir_count,
            stat.file_count
        );
        if errors || self.repair.dirty {
            println!(
                "{}: files corrupted {}, files fixed {}",
                self.dev.path(),
                stat.error_count,
                stat.fixed_count
            );
        }
    }
}
