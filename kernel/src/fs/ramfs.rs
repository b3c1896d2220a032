//! RAM-backed filesystem.
//!
//! Nodes live entirely on the kernel heap. A directory owns its children
//! outright and stores them in insertion order; parents are never stored
//! as back-links, `..` resolution happens by path-walk from the mount
//! root, which keeps the tree free of cycles by construction.

use alloc::{string::String, sync::Arc, vec::Vec};

use spin::RwLock;

use super::{Filesystem, FilesystemType, Vnode, VnodeKind};
use crate::error::{KernelError, KernelResult};

struct RamNode {
    kind: VnodeKind,
    /// File contents; empty and unused for directories.
    data: RwLock<Vec<u8>>,
    /// Directory entries in insertion order, names unique.
    children: RwLock<Vec<(String, Arc<RamNode>)>>,
}

impl RamNode {
    fn new_file() -> Self {
        Self {
            kind: VnodeKind::File,
            data: RwLock::new(Vec::new()),
            children: RwLock::new(Vec::new()),
        }
    }

    fn new_directory() -> Self {
        Self {
            kind: VnodeKind::Directory,
            data: RwLock::new(Vec::new()),
            children: RwLock::new(Vec::new()),
        }
    }
}

impl Vnode for RamNode {
    fn kind(&self) -> VnodeKind {
        self.kind
    }

    fn size(&self) -> usize {
        match self.kind {
            VnodeKind::File => self.data.read().len(),
            _ => self.children.read().len(),
        }
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> KernelResult<usize> {
        if self.kind != VnodeKind::File {
            return Err(KernelError::invalid("read of a non-file"));
        }
        let data = self.data.read();
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write(&self, offset: usize, data: &[u8]) -> KernelResult<usize> {
        if self.kind != VnodeKind::File {
            return Err(KernelError::invalid("write of a non-file"));
        }
        let mut bytes = self.data.write();
        if bytes.len() < offset + data.len() {
            bytes.resize(offset + data.len(), 0);
        }
        bytes[offset..offset + data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn lookup(&self, name: &str) -> KernelResult<Arc<dyn Vnode>> {
        if self.kind != VnodeKind::Directory {
            return Err(KernelError::invalid("lookup in a non-directory"));
        }
        self.children
            .read()
            .iter()
            .find(|(child_name, _)| child_name == name)
            .map(|(_, node)| node.clone() as Arc<dyn Vnode>)
            .ok_or(KernelError::NoSuchFile)
    }

    fn create(&self, name: &str, kind: VnodeKind) -> KernelResult<Arc<dyn Vnode>> {
        if self.kind != VnodeKind::Directory {
            return Err(KernelError::invalid("create in a non-directory"));
        }
        if name.is_empty() || name.len() > super::NAME_MAX || name.contains('/') {
            return Err(KernelError::invalid("bad entry name"));
        }
        let node = match kind {
            VnodeKind::File => RamNode::new_file(),
            VnodeKind::Directory => RamNode::new_directory(),
            _ => return Err(KernelError::invalid("ramfs holds files and directories")),
        };

        let mut children = self.children.write();
        if children.iter().any(|(child_name, _)| child_name == name) {
            return Err(KernelError::AlreadyExists);
        }
        let node = Arc::new(node);
        children.push((String::from(name), node.clone()));
        Ok(node)
    }

    fn readdir(&self, cursor: usize) -> KernelResult<Option<(String, usize)>> {
        if self.kind != VnodeKind::Directory {
            return Err(KernelError::invalid("readdir of a non-directory"));
        }
        let children = self.children.read();
        Ok(children
            .get(cursor)
            .map(|(name, _)| (name.clone(), cursor + 1)))
    }

    fn unlink(&self, name: &str) -> KernelResult<()> {
        if self.kind != VnodeKind::Directory {
            return Err(KernelError::invalid("unlink in a non-directory"));
        }
        let mut children = self.children.write();
        let index = children
            .iter()
            .position(|(child_name, _)| child_name == name)
            .ok_or(KernelError::NoSuchFile)?;
        if children[index].1.kind == VnodeKind::Directory
            && !children[index].1.children.read().is_empty()
        {
            return Err(KernelError::invalid("directory not empty"));
        }
        children.remove(index);
        Ok(())
    }
}

/// One mounted RAM filesystem instance.
pub struct RamFs {
    root: Arc<RamNode>,
}

impl RamFs {
    pub fn new() -> Self {
        Self {
            root: Arc::new(RamNode::new_directory()),
        }
    }
}

impl Default for RamFs {
    fn default() -> Self {
        Self::new()
    }
}

impl Filesystem for RamFs {
    fn root(&self) -> Arc<dyn Vnode> {
        self.root.clone()
    }

    fn fs_name(&self) -> &'static str {
        "ramfs"
    }
}

fn mount_ramfs(
    _source: Option<&str>,
    _flags: u32,
) -> KernelResult<Arc<dyn Filesystem>> {
    Ok(Arc::new(RamFs::new()))
}

/// The registered "ramfs" type: virtual, no backing device.
pub static RAMFS_TYPE: FilesystemType = FilesystemType {
    name: "ramfs",
    requires_block_device: false,
    mount: mount_ramfs,
};

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    #[test]
    fn create_lookup_and_duplicate() {
        let fs = RamFs::new();
        let root = fs.root();
        root.create("etc", VnodeKind::Directory).expect("mkdir");
        root.create("motd", VnodeKind::File).expect("create");
        assert!(matches!(
            root.create("motd", VnodeKind::File),
            Err(KernelError::AlreadyExists)
        ));
        assert_eq!(
            root.lookup("etc").expect("found").kind(),
            VnodeKind::Directory
        );
        assert_eq!(root.lookup("missing").err(), Some(KernelError::NoSuchFile));
    }

    #[test]
    fn readdir_iterates_in_insertion_order() {
        let fs = RamFs::new();
        let root = fs.root();
        // Deliberately not alphabetical; insertion order must hold.
        for name in ["zeta", "alpha", "midl"] {
            root.create(name, VnodeKind::File).expect("create");
        }
        let mut names = Vec::new();
        let mut cursor = 0;
        while let Some((name, next)) = root.readdir(cursor).expect("dir") {
            names.push(name);
            cursor = next;
        }
        assert_eq!(names, ["zeta", "alpha", "midl"]);
    }

    #[test]
    fn write_grows_and_read_stops_at_eof() {
        let fs = RamFs::new();
        let file = fs.root().create("f", VnodeKind::File).expect("create");
        assert_eq!(file.write(4, b"abcd").expect("write"), 4);
        assert_eq!(file.size(), 8);

        let mut buf = [0xFFu8; 16];
        assert_eq!(file.read(0, &mut buf).expect("read"), 8);
        assert_eq!(&buf[..8], &[0, 0, 0, 0, b'a', b'b', b'c', b'd']);
        assert_eq!(file.read(8, &mut buf).expect("read"), 0);
        assert_eq!(file.read(100, &mut buf).expect("read"), 0);
    }

    #[test]
    fn overwrite_keeps_surrounding_bytes() {
        let fs = RamFs::new();
        let file = fs.root().create("f", VnodeKind::File).expect("create");
        file.write(0, b"123456").expect("write");
        file.write(2, b"xy").expect("write");
        let mut buf = [0u8; 6];
        file.read(0, &mut buf).expect("read");
        assert_eq!(&buf, b"12xy56");
    }

    #[test]
    fn unlink_removes_files_but_not_full_directories() {
        let fs = RamFs::new();
        let root = fs.root();
        let dir = root.create("d", VnodeKind::Directory).expect("mkdir");
        dir.create("inner", VnodeKind::File).expect("create");

        assert!(root.unlink("d").is_err(), "non-empty directory");
        dir.unlink("inner").expect("unlink file");
        root.unlink("d").expect("unlink now-empty directory");
        assert_eq!(root.lookup("d").err(), Some(KernelError::NoSuchFile));
    }

    #[test]
    fn bad_names_are_rejected() {
        let fs = RamFs::new();
        let root = fs.root();
        assert!(root.create("", VnodeKind::File).is_err());
        assert!(root.create("a/b", VnodeKind::File).is_err());
        let long = alloc::string::String::from_utf8(alloc::vec![b'n'; super::super::NAME_MAX + 1])
            .expect("ascii");
        assert!(root.create(&long, VnodeKind::File).is_err());
    }
}
