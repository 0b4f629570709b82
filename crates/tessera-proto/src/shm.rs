//! Shared-memory pixel buffers.
//!
//! A window's backing store is a POSIX shared-memory object named after a
//! 32-bit key. The client creates, maps and writes it; the server never
//! maps it and copies rows out with positioned reads, so a client that
//! shrinks the object produces a short read rather than a fault. Both
//! sides serialise pixel access with an advisory `flock` on the object:
//! clients take it exclusively while painting, the server takes it shared
//! while reading.

use std::fs::File;
use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::os::unix::fs::FileExt;
use std::ptr::NonNull;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg, OFlag};
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use thiserror::Error;

/// Errors raised while creating or mapping a shared buffer
#[derive(Error, Debug)]
pub enum ShmError {
    #[error("shared memory object {name} could not be opened: {source}")]
    Open { name: String, source: Errno },

    #[error("mapping {name} failed: {source}")]
    Map { name: String, source: Errno },

    #[error("{name} holds {actual} bytes, {expected} needed")]
    TooSmall {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("zero-sized buffer")]
    Empty,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Name of the shared-memory object for `key`
pub fn shm_name(key: u32) -> String {
    format!("/tessera-{:08x}", key)
}

/// A client's mapped, writable ARGB32 pixel buffer
pub struct SharedBuffer {
    key: u32,
    width: u32,
    height: u32,
    file: File,
    ptr: NonNull<u32>,
    len: usize,
}

// The mapping is process-wide memory; access is serialised by `flock`
// across processes and by `&`/`&mut` borrows within one.
unsafe impl Send for SharedBuffer {}

impl SharedBuffer {
    /// Create a fresh buffer for `key`, replacing any stale object
    pub fn create(key: u32, width: u32, height: u32) -> Result<Self, ShmError> {
        let name = shm_name(key);
        let len = byte_len(width, height)?;
        let _ = shm_unlink(name.as_str());
        let fd = shm_open(
            name.as_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )
        .map_err(|source| ShmError::Open {
            name: name.clone(),
            source,
        })?;
        let file = File::from(fd);
        file.set_len(len as u64)?;
        Self::map(key, width, height, file)
    }

    fn map(key: u32, width: u32, height: u32, file: File) -> Result<Self, ShmError> {
        let len = byte_len(width, height)?;
        let length = NonZeroUsize::new(len).ok_or(ShmError::Empty)?;
        // SAFETY: fresh mapping of a file we hold open; no existing memory is aliased.
        let ptr = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                0,
            )
        }
        .map_err(|source| ShmError::Map {
            name: shm_name(key),
            source,
        })?;
        Ok(Self {
            key,
            width,
            height,
            file,
            ptr: ptr.cast(),
            len,
        })
    }

    /// Remove the named object; existing mappings stay valid
    pub fn unlink(key: u32) {
        let _ = shm_unlink(shm_name(key).as_str());
    }

    pub fn key(&self) -> u32 {
        self.key
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixels without taking the lock
    pub fn pixels(&self) -> &[u32] {
        // SAFETY: the mapping is `len` bytes, page aligned, and lives as long as `self`.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len / 4) }
    }

    pub fn pixels_mut(&mut self) -> &mut [u32] {
        // SAFETY: as above, and `&mut self` guarantees exclusive access in this process.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len / 4) }
    }

    /// Try once to take the exclusive (painter) lock
    pub fn try_lock_exclusive(&self) -> Result<BufferLock, Errno> {
        lock_file(&self.file, FlockArg::LockExclusiveNonblock)
    }
}

impl Drop for SharedBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr/len come from the successful mmap in `map`.
        unsafe {
            let _ = munmap(self.ptr.cast(), self.len);
        }
    }
}

impl std::fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("key", &self.key)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// The server's read-only handle on a client buffer
#[derive(Debug)]
pub struct SharedSource {
    key: u32,
    width: u32,
    height: u32,
    file: File,
}

impl SharedSource {
    /// Open the buffer for `key` and check it holds `width`×`height` pixels
    pub fn open(key: u32, width: u32, height: u32) -> Result<Self, ShmError> {
        let name = shm_name(key);
        let len = byte_len(width, height)?;
        let fd = shm_open(name.as_str(), OFlag::O_RDONLY, Mode::empty()).map_err(|source| {
            ShmError::Open {
                name: name.clone(),
                source,
            }
        })?;
        let file = File::from(fd);
        let actual = file.metadata()?.len() as usize;
        if actual < len {
            return Err(ShmError::TooSmall {
                name,
                expected: len,
                actual,
            });
        }
        Ok(Self {
            key,
            width,
            height,
            file,
        })
    }

    pub fn key(&self) -> u32 {
        self.key
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Try once to take the shared (reader) lock
    pub fn try_lock_shared(&self) -> Result<BufferLock, Errno> {
        lock_file(&self.file, FlockArg::LockSharedNonblock)
    }

    /// Copy rows `first..first + count` into `out`.
    ///
    /// Fails with [`ShmError::TooSmall`] when the object no longer holds
    /// those rows.
    pub fn read_rows(&self, first: u32, count: u32, out: &mut Vec<u32>) -> Result<(), ShmError> {
        let row = self.width as usize;
        out.clear();
        out.resize(row * count as usize, 0);
        let offset = (first as u64) * (row as u64) * 4;
        match self
            .file
            .read_exact_at(bytemuck::cast_slice_mut(out.as_mut_slice()), offset)
        {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(ShmError::TooSmall {
                name: shm_name(self.key),
                expected: byte_len(self.width, self.height)?,
                actual: self.file.metadata()?.len() as usize,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

/// Held advisory lock; released on drop
pub struct BufferLock {
    _flock: Flock<File>,
}

fn lock_file(file: &File, arg: FlockArg) -> Result<BufferLock, Errno> {
    // flock applies to the open file description, which the clone shares.
    let file = file
        .try_clone()
        .map_err(|e| e.raw_os_error().map(Errno::from_raw).unwrap_or(Errno::EIO))?;
    let flock = Flock::lock(file, arg).map_err(|(_, errno)| errno)?;
    Ok(BufferLock { _flock: flock })
}

fn byte_len(width: u32, height: u32) -> Result<usize, ShmError> {
    let len = width as usize * height as usize * 4;
    if len == 0 {
        Err(ShmError::Empty)
    } else {
        Ok(len)
    }
}
