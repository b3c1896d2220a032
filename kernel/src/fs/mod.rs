//! Virtual filesystem layer.
//!
//! Filesystems plug in through a type registry; instances graft into the
//! namespace via an ordered mount list resolved by longest matching
//! prefix. Objects inside a filesystem surface as [`Vnode`] trait objects
//! the layer routes through without knowing the implementation.

pub mod blockdev;
pub mod devconsole;
pub mod file;
pub mod path;
pub mod ramfs;

use alloc::{string::String, sync::Arc, vec::Vec};

use spin::RwLock;

use crate::error::{KernelError, KernelResult};
pub use file::{FdTable, OpenFile, OpenFlags};
pub use path::{canonicalize, NAME_MAX, PATH_MAX};

/// Kind of object a vnode refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnodeKind {
    File,
    Directory,
    CharDevice,
    BlockDevice,
}

/// Metadata snapshot for `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub kind: VnodeKind,
    pub size: usize,
}

/// Handle to an object within some filesystem. Operations that make no
/// sense for the object's kind default to `InvalidArgument` so simple
/// nodes (the console device) implement only what they support.
pub trait Vnode: Send + Sync {
    fn kind(&self) -> VnodeKind;

    fn size(&self) -> usize {
        0
    }

    fn stat(&self) -> Stat {
        Stat {
            kind: self.kind(),
            size: self.size(),
        }
    }

    /// Read from byte offset. Reads past end-of-file return 0 bytes.
    fn read(&self, _offset: usize, _buf: &mut [u8]) -> KernelResult<usize> {
        Err(KernelError::invalid("read not supported"))
    }

    /// Write at byte offset, growing the object when supported.
    fn write(&self, _offset: usize, _data: &[u8]) -> KernelResult<usize> {
        Err(KernelError::invalid("write not supported"))
    }

    /// Look up a child by name (directories).
    fn lookup(&self, _name: &str) -> KernelResult<Arc<dyn Vnode>> {
        Err(KernelError::invalid("not a directory"))
    }

    /// Create a child (directories). Duplicate names fail.
    fn create(&self, _name: &str, _kind: VnodeKind) -> KernelResult<Arc<dyn Vnode>> {
        Err(KernelError::invalid("not a directory"))
    }

    /// Iterate children in insertion order: returns the entry at
    /// `cursor` and the next cursor, or `None` at the end.
    fn readdir(&self, _cursor: usize) -> KernelResult<Option<(String, usize)>> {
        Err(KernelError::invalid("not a directory"))
    }

    /// Remove a child by name (directories).
    fn unlink(&self, _name: &str) -> KernelResult<()> {
        Err(KernelError::invalid("not a directory"))
    }

    /// Release hook invoked when the last open file drops.
    fn release(&self) {}
}

/// A mounted filesystem instance.
pub trait Filesystem: Send + Sync {
    fn root(&self) -> Arc<dyn Vnode>;
    fn fs_name(&self) -> &'static str;
    fn sync(&self) -> KernelResult<()> {
        Ok(())
    }
}

/// A registered filesystem type: a named constructor.
pub struct FilesystemType {
    pub name: &'static str,
    /// When set, `mount` requires `source` to name a registered block
    /// device. Virtual filesystems leave it clear and ignore `source`.
    pub requires_block_device: bool,
    pub mount: fn(source: Option<&str>, flags: u32) -> KernelResult<Arc<dyn Filesystem>>,
}

/// One entry of the mount list.
pub struct Mount {
    pub mount_point: String,
    pub fs: Arc<dyn Filesystem>,
}

/// The VFS: filesystem-type registry plus the ordered mount list. One
/// instance backs the kernel; tests build their own.
pub struct Vfs {
    types: Vec<&'static FilesystemType>,
    mounts: Vec<Mount>,
}

impl Vfs {
    pub const fn new() -> Self {
        Self {
            types: Vec::new(),
            mounts: Vec::new(),
        }
    }

    /// Register a filesystem type. Names are unique; registration is
    /// additive only.
    pub fn register_type(&mut self, fs_type: &'static FilesystemType) -> KernelResult<()> {
        if self.types.iter().any(|t| t.name == fs_type.name) {
            return Err(KernelError::AlreadyExists);
        }
        self.types.push(fs_type);
        Ok(())
    }

    /// Mount a filesystem instance at `mountpoint`.
    pub fn mount(
        &mut self,
        source: Option<&str>,
        mountpoint: &str,
        fs_type_name: &str,
        flags: u32,
    ) -> KernelResult<()> {
        let mount_point = path::canonicalize(mountpoint)?;
        let fs_type = self
            .types
            .iter()
            .find(|t| t.name == fs_type_name)
            .copied()
            .ok_or(KernelError::NoSuchFilesystem)?;

        if fs_type.requires_block_device {
            let name = source.ok_or(KernelError::NoSuchDevice)?;
            if blockdev::find(name).is_none() {
                return Err(KernelError::NoSuchDevice);
            }
        }
        if self.mounts.iter().any(|m| m.mount_point == mount_point) {
            return Err(KernelError::AlreadyExists);
        }

        let fs = (fs_type.mount)(source, flags)?;
        self.mounts.push(Mount { mount_point, fs });
        Ok(())
    }

    /// Longest-matching-prefix mount for a canonical path. Returns the
    /// filesystem and the remainder of the path inside it.
    fn mount_for<'p>(&self, canonical: &'p str) -> KernelResult<(&Mount, &'p str)> {
        let mut best: Option<(&Mount, &'p str)> = None;
        for mount in &self.mounts {
            let mp = mount.mount_point.as_str();
            let rest = if mp == "/" {
                Some(canonical.strip_prefix('/').unwrap_or(canonical))
            } else {
                match canonical.strip_prefix(mp) {
                    Some("") => Some(""),
                    Some(rest) if rest.starts_with('/') => Some(&rest[1..]),
                    _ => None,
                }
            };
            if let Some(rest) = rest {
                let better = match best {
                    Some((current, _)) => mp.len() > current.mount_point.len(),
                    None => true,
                };
                if better {
                    best = Some((mount, rest));
                }
            }
        }
        best.ok_or(KernelError::NoSuchFile)
    }

    /// Resolve a path to its vnode.
    pub fn resolve(&self, path_str: &str) -> KernelResult<Arc<dyn Vnode>> {
        let canonical = path::canonicalize(path_str)?;
        let (mount, rest) = self.mount_for(&canonical)?;
        let mut node = mount.fs.root();
        for component in path::components(rest) {
            node = node.lookup(component)?;
        }
        Ok(node)
    }

    /// Resolve the parent directory of `path_str`, returning the final
    /// component as well.
    fn resolve_parent(&self, path_str: &str) -> KernelResult<(Arc<dyn Vnode>, String)> {
        let canonical = path::canonicalize(path_str)?;
        let (parent, name) = path::split_parent(&canonical)?;
        let dir = self.resolve(parent)?;
        if dir.kind() != VnodeKind::Directory {
            return Err(KernelError::invalid("parent is not a directory"));
        }
        Ok((dir, String::from(name)))
    }

    /// Open a path, creating the final component when `CREATE` is set and
    /// the parent directory exists.
    pub fn open(&self, path_str: &str, flags: OpenFlags) -> KernelResult<Arc<OpenFile>> {
        let node = match self.resolve(path_str) {
            Ok(node) => node,
            Err(KernelError::NoSuchFile) if flags.contains(OpenFlags::CREATE) => {
                let (dir, name) = self.resolve_parent(path_str)?;
                dir.create(&name, VnodeKind::File)?
            }
            Err(err) => return Err(err),
        };
        if node.kind() == VnodeKind::Directory && flags.contains(OpenFlags::WRITE) {
            return Err(KernelError::invalid("cannot open directory for writing"));
        }
        Ok(Arc::new(OpenFile::new(node, flags)))
    }

    /// Create a directory.
    pub fn mkdir(&self, path_str: &str) -> KernelResult<()> {
        let canonical = path::canonicalize(path_str)?;
        if canonical == "/" {
            return Err(KernelError::AlreadyExists);
        }
        let (dir, name) = self.resolve_parent(&canonical)?;
        dir.create(&name, VnodeKind::Directory).map(|_| ())
    }

    /// Read one directory entry at `cursor`.
    pub fn readdir(&self, path_str: &str, cursor: usize) -> KernelResult<Option<(String, usize)>> {
        self.resolve(path_str)?.readdir(cursor)
    }

    pub fn stat(&self, path_str: &str) -> KernelResult<Stat> {
        Ok(self.resolve(path_str)?.stat())
    }

    /// Flush every mounted filesystem.
    pub fn sync(&self) -> KernelResult<()> {
        for mount in &self.mounts {
            mount.fs.sync()?;
        }
        Ok(())
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

static VFS: RwLock<Vfs> = RwLock::new(Vfs::new());

pub fn register_type(fs_type: &'static FilesystemType) -> KernelResult<()> {
    VFS.write().register_type(fs_type)
}

pub fn mount(
    source: Option<&str>,
    mountpoint: &str,
    fs_type_name: &str,
    flags: u32,
) -> KernelResult<()> {
    VFS.write().mount(source, mountpoint, fs_type_name, flags)
}

pub fn vfs_open(path_str: &str, flags: OpenFlags) -> KernelResult<Arc<OpenFile>> {
    VFS.read().open(path_str, flags)
}

pub fn vfs_mkdir(path_str: &str) -> KernelResult<()> {
    VFS.read().mkdir(path_str)
}

pub fn vfs_readdir(path_str: &str, cursor: usize) -> KernelResult<Option<(String, usize)>> {
    VFS.read().readdir(path_str, cursor)
}

pub fn vfs_stat(path_str: &str) -> KernelResult<Stat> {
    VFS.read().stat(path_str)
}

pub fn vfs_resolve(path_str: &str) -> KernelResult<Arc<dyn Vnode>> {
    VFS.read().resolve(path_str)
}

/// Register the built-in filesystem types and mount the RAM-backed root.
pub fn init() -> KernelResult<()> {
    register_type(&ramfs::RAMFS_TYPE)?;
    mount(None, "/", "ramfs", 0)?;
    log::info!("VFS: ramfs root mounted");
    Ok(())
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    fn vfs_with_root() -> Vfs {
        let mut vfs = Vfs::new();
        vfs.register_type(&ramfs::RAMFS_TYPE).expect("type");
        vfs.mount(None, "/", "ramfs", 0).expect("root mount");
        vfs
    }

    #[test]
    fn duplicate_type_registration_fails() {
        let mut vfs = Vfs::new();
        vfs.register_type(&ramfs::RAMFS_TYPE).expect("first");
        assert!(matches!(
            vfs.register_type(&ramfs::RAMFS_TYPE),
            Err(KernelError::AlreadyExists)
        ));
    }

    #[test]
    fn open_root_yields_directory() {
        let vfs = vfs_with_root();
        let root = vfs.open("/", OpenFlags::READ).expect("open root");
        assert_eq!(root.vnode.kind(), VnodeKind::Directory);
    }

    #[test]
    fn open_empty_path_is_invalid() {
        let vfs = vfs_with_root();
        assert!(matches!(
            vfs.open("", OpenFlags::READ),
            Err(KernelError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn mkdir_root_already_exists() {
        let vfs = vfs_with_root();
        assert_eq!(vfs.mkdir("/"), Err(KernelError::AlreadyExists));
    }

    #[test]
    fn missing_component_is_no_such_file() {
        let vfs = vfs_with_root();
        assert_eq!(
            vfs.resolve("/no/such/path").err(),
            Some(KernelError::NoSuchFile)
        );
    }

    #[test]
    fn longest_prefix_mount_wins() {
        let mut vfs = vfs_with_root();
        vfs.mkdir("/mnt").expect("mkdir");
        vfs.mount(None, "/mnt", "ramfs", 0).expect("second mount");

        // A file created under /mnt lives in the second instance, so the
        // first instance's /mnt stays empty.
        vfs.open("/mnt/inner", OpenFlags::CREATE | OpenFlags::WRITE)
            .expect("create in mounted fs");
        vfs.resolve("/mnt/inner").expect("resolves via inner mount");

        let root_mnt_entries = {
            let (mount, rest) = vfs.mount_for("/mnt").expect("mount");
            assert_eq!(mount.mount_point, "/mnt");
            assert_eq!(rest, "");
            mount
                .fs
                .root()
                .readdir(0)
                .expect("dir")
        };
        assert_eq!(root_mnt_entries.map(|(name, _)| name).as_deref(), Some("inner"));
    }

    #[test]
    fn mount_with_unknown_type_or_device() {
        let mut vfs = vfs_with_root();
        assert_eq!(
            vfs.mount(None, "/x", "blockfs-missing", 0),
            Err(KernelError::NoSuchFilesystem)
        );
    }

    #[test]
    fn duplicate_mountpoint_fails() {
        let mut vfs = vfs_with_root();
        assert_eq!(vfs.mount(None, "/", "ramfs", 0), Err(KernelError::AlreadyExists));
    }

    #[test]
    fn ramfs_round_trip_through_vfs() {
        let vfs = vfs_with_root();
        vfs.mkdir("/a").expect("mkdir");
        let f = vfs
            .open("/a/hello", OpenFlags::CREATE | OpenFlags::WRITE)
            .expect("create");
        assert_eq!(f.write(b"hi").expect("write"), 2);
        drop(f);

        let f = vfs.open("/a/hello", OpenFlags::READ).expect("open");
        let mut buf = [0u8; 8];
        assert_eq!(f.read(&mut buf).expect("read"), 2);
        assert_eq!(&buf[..2], &[0x68, 0x69]);
        // Subsequent read hits end-of-file.
        assert_eq!(f.read(&mut buf).expect("read"), 0);
    }

    #[test]
    fn stat_reports_kind_and_size() {
        let vfs = vfs_with_root();
        let f = vfs
            .open("/file", OpenFlags::CREATE | OpenFlags::WRITE)
            .expect("create");
        f.write(b"12345").expect("write");
        let stat = vfs.stat("/file").expect("stat");
        assert_eq!(stat.kind, VnodeKind::File);
        assert_eq!(stat.size, 5);
    }
}
