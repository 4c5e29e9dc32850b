// SPDX-License-Identifier: Apache-2.0 OR MIT

//! File-backed shared memory mapping.
//!
//! Unlike a POSIX `shm_open` segment, a flow's backing store is a regular
//! file under the domain path so it survives independently of any one
//! process and can be inspected with ordinary filesystem tools. Mapping
//! mechanics are otherwise the same: `open`/`ftruncate`/`mmap(MAP_SHARED)`,
//! unmapped on drop.
//!
//! # Writer exclusivity
//!
//! A flow may have at most one writer. [`MappedFile::create`] takes an
//! advisory `flock(LOCK_EX | LOCK_NB)` on the file descriptor and holds it
//! for the file's lifetime; a second writer attempting to create or take
//! over the same flow gets [`Error::FlowBusy`] instead of corrupting the
//! mapping. Readers never lock.

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr;

/// A memory-mapped flow file, optionally held under an exclusive lock.
pub struct MappedFile {
    ptr: *mut u8,
    size: usize,
    file: File,
    locked: bool,
}

// SAFETY: the mapping is `MAP_SHARED` and every region within it that is
// mutated concurrently is accessed exclusively through atomics (see
// `arena::slot`); plain reads of the immutable header are data-race free
// once the header has been written and `flock`'d writer exclusivity is in
// place.
unsafe impl Send for MappedFile {}
unsafe impl Sync for MappedFile {}

impl MappedFile {
    /// Creates (or truncates) `path`, sizes it to `size` bytes, maps it, and
    /// takes the writer's exclusive lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FlowBusy`] if another writer already holds the lock,
    /// or [`Error::Io`] for any other filesystem/mmap failure.
    pub fn create(path: &Path, size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Self::try_lock(&file)?;

        file.set_len(size as u64)?;

        let ptr = Self::map(&file, size)?;

        // SAFETY: `ptr` was just returned by `mmap` with PROT_WRITE and
        // spans exactly `size` bytes; no other mapping of this file exists
        // yet because we hold the exclusive lock.
        unsafe { ptr::write_bytes(ptr, 0, size) };

        Ok(Self {
            ptr,
            size,
            file,
            locked: true,
        })
    }

    /// Opens an existing flow file read-only and maps it without locking.
    /// Used by every reader and by the header probe in
    /// [`crate::arena::FlowArena::read_layout`]: only a writer, which holds
    /// the exclusive `flock`, may hold a writable mapping of the file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened, sized, or mapped.
    pub fn open(path: &Path, size: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let ptr = Self::map_read_only(&file, size)?;

        Ok(Self {
            ptr,
            size,
            file,
            locked: false,
        })
    }

    /// Opens an existing flow file and takes the writer's exclusive lock,
    /// without truncating or zeroing it. Used when a writer reattaches to a
    /// flow an earlier `create` call already laid out.
    ///
    /// # Errors
    ///
    /// [`Error::FlowBusy`] if another writer already holds the lock.
    pub fn open_for_writer(path: &Path, size: usize) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::try_lock(&file)?;
        let ptr = Self::map(&file, size)?;

        Ok(Self {
            ptr,
            size,
            file,
            locked: true,
        })
    }

    fn try_lock(file: &File) -> Result<()> {
        // SAFETY: `file`'s fd is valid for the duration of this call.
        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock {
                return Err(Error::FlowBusy);
            }
            return Err(Error::Io(err));
        }
        Ok(())
    }

    fn map(file: &File, size: usize) -> Result<*mut u8> {
        // SAFETY: `file`'s fd is open for read/write and at least `size`
        // bytes long by the time this is called; MAP_SHARED with
        // PROT_READ|PROT_WRITE is valid for a regular file opened that way.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(ptr.cast())
    }

    /// Maps `file` read-only. The returned pointer is still `*mut u8` (the
    /// rest of the arena code casts through it for both kinds of mapping),
    /// but writing through it past a read-only mapping segfaults the
    /// process rather than corrupting the file; callers obtained from
    /// [`Self::open`] must never reach the arena's `*_mut` accessors.
    fn map_read_only(file: &File, size: usize) -> Result<*mut u8> {
        // SAFETY: `file`'s fd is open for read only and at least `size`
        // bytes long by the time this is called; MAP_SHARED with
        // PROT_READ is valid for a regular file opened that way.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::Io(io::Error::last_os_error()));
        }
        Ok(ptr.cast())
    }

    /// Raw pointer to the start of the mapping.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Size of the mapping in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether this mapping holds the writer's exclusive lock.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        // SAFETY: `self.ptr` was obtained from a successful `mmap` of
        // exactly `self.size` bytes and has not been unmapped before.
        unsafe {
            libc::munmap(self.ptr.cast(), self.size);
        }
        if self.locked {
            // SAFETY: the fd is still open; unlocking an already-unlocked
            // fd is a harmless no-op.
            unsafe { libc::flock(self.file.as_raw_fd(), libc::LOCK_UN) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_zeroes_and_sizes_the_mapping() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flow.mxl");
        let mapped = MappedFile::create(&path, 4096).unwrap();
        assert_eq!(mapped.size(), 4096);
        assert!(mapped.is_locked());
        // SAFETY: mapping is 4096 bytes, reading one byte is in bounds.
        unsafe { assert_eq!(*mapped.as_ptr(), 0) };
    }

    #[test]
    fn second_writer_gets_flow_busy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flow.mxl");
        let _first = MappedFile::create(&path, 4096).unwrap();
        let second = MappedFile::create(&path, 4096);
        assert!(matches!(second, Err(Error::FlowBusy)));
    }

    #[test]
    fn reader_sees_writer_s_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flow.mxl");
        let writer = MappedFile::create(&path, 4096).unwrap();
        // SAFETY: mapping is 4096 bytes.
        unsafe { *writer.as_ptr() = 0x42 };

        let reader = MappedFile::open(&path, 4096).unwrap();
        assert!(!reader.is_locked());
        // SAFETY: mapping is 4096 bytes.
        unsafe { assert_eq!(*reader.as_ptr(), 0x42) };
    }
}
