use crate::errno::errno_for;
use crate::inode::{InodeTable, ROOT_INODE};
use depotfs_core::traits::FileSystem;
use depotfs_core::types::{DepotPath, FileAttributes, FileKind};
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;
use std::ffi::OsStr;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

const BLOCK_SIZE: u32 = 1024;
const FREE_INODES: u64 = 1 << 20;

/// Presentation settings for the mounted tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuseOptions {
    /// How long the kernel may cache attributes and entries.
    pub ttl: Duration,
    pub uid: u32,
    pub gid: u32,
}

impl Default for FuseOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(1),
            uid: 0,
            gid: 0,
        }
    }
}

impl FuseOptions {
    /// Reports every node as owned by the owner of `dir`.
    pub fn owned_by(dir: &Path) -> io::Result<Self> {
        let metadata = std::fs::metadata(dir)?;
        Ok(Self {
            uid: metadata.uid(),
            gid: metadata.gid(),
            ..Self::default()
        })
    }
}

/// Serves a [`FileSystem`] to the kernel.
pub struct DepotFuse<F: FileSystem> {
    fs: Arc<F>,
    inodes: InodeTable,
    options: FuseOptions,
}

impl<F: FileSystem> DepotFuse<F> {
    pub fn new(fs: Arc<F>, options: FuseOptions) -> Self {
        Self {
            fs,
            inodes: InodeTable::new(),
            options,
        }
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    fn path_of(&self, ino: u64) -> Result<DepotPath, c_int> {
        self.inodes.path(ino).cloned().ok_or(libc::ENOENT)
    }

    fn child_of(&self, parent: u64, name: &OsStr) -> Result<DepotPath, c_int> {
        let parent = self.path_of(parent)?;
        let name = name.to_str().ok_or(libc::EINVAL)?;
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(libc::EINVAL);
        }
        Ok(parent.join(name))
    }

    /// Attributes of `path` with its inode assigned.
    fn attr_for(&mut self, path: &DepotPath) -> Result<FileAttr, c_int> {
        let attributes = self.fs.get_attributes(path).map_err(|err| errno_for(&err))?;
        let ino = self.inodes.get_or_insert(path);
        Ok(to_file_attr(ino, &attributes, &self.options))
    }

    /// Like [`attr_for`](Self::attr_for), for replies that hand the kernel a
    /// lookup reference.
    fn entry_attr(&mut self, path: &DepotPath) -> Result<FileAttr, c_int> {
        let attr = self.attr_for(path)?;
        self.inodes.remember(path);
        Ok(attr)
    }

    fn reply_entry(&mut self, path: &DepotPath, reply: ReplyEntry) {
        match self.entry_attr(path) {
            Ok(attr) => reply.entry(&self.options.ttl, &attr, 0),
            Err(errno) => reply.error(errno),
        }
    }
}

/// Converts engine attributes into what the kernel expects.
pub(crate) fn to_file_attr(ino: u64, attributes: &FileAttributes, options: &FuseOptions) -> FileAttr {
    let (kind, nlink) = match attributes.kind {
        FileKind::File => (FileType::RegularFile, 1),
        FileKind::Directory => (FileType::Directory, 2),
    };
    FileAttr {
        ino,
        size: attributes.size,
        blocks: attributes.size.div_ceil(512),
        atime: attributes.modified,
        mtime: attributes.modified,
        ctime: attributes.modified,
        crtime: attributes.modified,
        kind,
        perm: (attributes.mode & 0o7777) as u16,
        nlink,
        uid: options.uid,
        gid: options.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

fn file_type(kind: FileKind) -> FileType {
    match kind {
        FileKind::File => FileType::RegularFile,
        FileKind::Directory => FileType::Directory,
    }
}

impl<F: FileSystem + 'static> Filesystem for DepotFuse<F> {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.child_of(parent, name) {
            Ok(path) => self.reply_entry(&path, reply),
            Err(errno) => reply.error(errno),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        let result = self.path_of(ino).and_then(|path| self.attr_for(&path));
        match result {
            Ok(attr) => reply.attr(&self.options.ttl, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let result = self.path_of(ino).and_then(|path| {
            if let Some(size) = size {
                self.fs.truncate(&path, size).map_err(|err| errno_for(&err))?;
            }
            self.attr_for(&path)
        });
        match result {
            Ok(attr) => reply.attr(&self.options.ttl, &attr),
            Err(errno) => reply.error(errno),
        }
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let path = match self.child_of(parent, name) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        match self.fs.make_directory(&path) {
            Ok(()) => self.reply_entry(&path, reply),
            Err(err) => reply.error(errno_for(&err)),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = self.child_of(parent, name).and_then(|path| {
            self.fs.unlink(&path).map_err(|err| errno_for(&err))?;
            Ok(path)
        });
        match result {
            Ok(path) => {
                self.inodes.remove(&path);
                reply.ok();
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.inodes.forget(ino, nlookup);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        if flags & libc::RENAME_EXCHANGE != 0 {
            return reply.error(libc::EINVAL);
        }
        let paths = self
            .child_of(parent, name)
            .and_then(|from| Ok((from, self.child_of(newparent, newname)?)));
        let (from, to) = match paths {
            Ok(paths) => paths,
            Err(errno) => return reply.error(errno),
        };
        if flags & libc::RENAME_NOREPLACE != 0 && self.fs.get_attributes(&to).is_ok() {
            return reply.error(libc::EEXIST);
        }

        match self.fs.rename(&from, &to) {
            Ok(()) => {
                self.inodes.rename_subtree(&from, &to);
                reply.ok();
            }
            Err(err) => reply.error(errno_for(&err)),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let result = self.path_of(ino).and_then(|path| {
            let opened = if flags & libc::O_ACCMODE == libc::O_RDONLY {
                self.fs.open_for_read(&path)
            } else {
                self.fs.open_for_write(&path)
            };
            opened.map_err(|err| errno_for(&err))
        });
        match result {
            Ok(()) => reply.opened(0, 0),
            Err(errno) => reply.error(errno),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(libc::EINVAL);
        };
        let result = self.path_of(ino).and_then(|path| {
            self.fs
                .read_at(&path, offset, size as usize)
                .map_err(|err| errno_for(&err))
        });
        match result {
            Ok(bytes) => reply.data(&bytes),
            Err(errno) => reply.error(errno),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(libc::EINVAL);
        };
        let result = self.path_of(ino).and_then(|path| {
            self.fs
                .write_at(&path, offset, data)
                .map_err(|err| errno_for(&err))
        });
        match result {
            Ok(written) => reply.written(written as u32),
            Err(errno) => {
                warn!(ino, offset, errno, "write failed");
                reply.error(errno)
            }
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let path = match self.path_of(ino) {
            Ok(path) => path,
            Err(errno) => return reply.error(errno),
        };
        let children = match self.fs.list_directory(&path) {
            Ok(children) => children,
            Err(err) => return reply.error(errno_for(&err)),
        };
        let parent_ino = path
            .parent()
            .map_or(ROOT_INODE, |parent| self.inodes.get_or_insert(&parent));

        let mut entries = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent_ino, FileType::Directory, "..".to_string()),
        ];
        for child in children {
            let child_ino = self.inodes.get_or_insert(&path.join(&child.name));
            entries.push((child_ino, file_type(child.kind), child.name));
        }
        debug!(%path, entries = entries.len(), offset, "readdir");

        let skip = usize::try_from(offset).unwrap_or(0);
        for (idx, (child_ino, kind, name)) in entries.into_iter().enumerate().skip(skip) {
            if reply.add(child_ino, (idx + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        match self.fs.filesystem_stats() {
            Ok(stats) => reply.statfs(
                stats.total_blocks,
                stats.free_blocks,
                stats.available_blocks,
                stats.total_files,
                FREE_INODES,
                stats.block_size,
                stats.max_name_length,
                stats.fragment_size,
            ),
            Err(err) => reply.error(errno_for(&err)),
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let result = self.child_of(parent, name).and_then(|path| {
            self.fs.create(&path).map_err(|err| errno_for(&err))?;
            self.entry_attr(&path)
        });
        match result {
            Ok(attr) => reply.created(&self.options.ttl, &attr, 0, 0, flags as u32),
            Err(errno) => reply.error(errno),
        }
    }
}
