// In-memory inode tree for the directory walk
// Directories own their children; parents are weak back-references so
// the tree stays acyclic for ownership purposes

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::ondisk::ATTR_SUBDIR;

/// One directory or file, materialized while its entry set is checked.
///
/// File inodes are transient: they exist only long enough to carry the
/// cluster-chain validation. Directory inodes stay linked into the
/// tree until their own contents have been walked.
pub struct Inode {
    parent: RefCell<Weak<Inode>>,
    pub children: RefCell<Vec<Rc<Inode>>>,
    pub first_clus: Cell<u32>,
    pub size: Cell<u64>,
    pub attr: u16,
    pub is_contiguous: Cell<bool>,
    /// UTF-16 name units; empty for the root.
    pub name: Vec<u16>,
}

impl Inode {
    pub fn new(attr: u16) -> Rc<Inode> {
        Inode::with_name(attr, Vec::new())
    }

    pub fn with_name(attr: u16, name: Vec<u16>) -> Rc<Inode> {
        Rc::new(Inode {
            parent: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
            first_clus: Cell::new(0),
            size: Cell::new(0),
            attr,
            is_contiguous: Cell::new(false),
            name,
        })
    }

    pub fn is_dir(&self) -> bool {
        self.attr & ATTR_SUBDIR != 0
    }

    pub fn parent(&self) -> Option<Rc<Inode>> {
        self.parent.borrow().upgrade()
    }

    pub fn name_string(&self) -> String {
        String::from_utf16_lossy(&self.name)
    }

    /// Link `child` under `parent` for path reporting and bottom-up
    /// release.
    pub fn link_child(parent: &Rc<Inode>, child: &Rc<Inode>) {
        *child.parent.borrow_mut() = Rc::downgrade(parent);
        parent.children.borrow_mut().push(Rc::clone(child));
    }
}

/// Absolute path of `inode`, reconstructed by climbing parent links.
pub fn resolve_path(inode: &Inode) -> String {
    let mut names = Vec::new();
    if !inode.name.is_empty() {
        names.push(inode.name_string());
    }
    let mut cur = inode.parent();
    while let Some(node) = cur {
        if !node.name.is_empty() {
            names.push(node.name_string());
        }
        cur = node.parent();
    }
    names.reverse();
    format!("/{}", names.join("/"))
}

/// Path of a node that is not (or not yet) linked under `parent`.
pub fn resolve_path_parent(parent: &Rc<Inode>, child: &Inode) -> String {
    let base = resolve_path(parent);
    let name = child.name_string();
    if name.is_empty() {
        base
    } else if base == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", base, name)
    }
}

/// After a directory has been walked, drop it and any ancestors that
/// no longer have living children. This keeps the resident tree as
/// deep as the filesystem, not as wide as its file count.
pub fn release_ancestors(dir: &Rc<Inode>) {
    let mut cur = Rc::clone(dir);
    while cur.children.borrow().is_empty() {
        let parent = match cur.parent() {
            Some(p) => p,
            None => break,
        };
        parent
            .children
            .borrow_mut()
            .retain(|c| !Rc::ptr_eq(c, &cur));
        cur = parent;
    }
}
