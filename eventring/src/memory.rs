//! Shared memory backing for the ring: an anonymous memfd mapped read-write.
//!
//! The owning end creates the memfd and hands copies of the descriptor to
//! peers over the control sideband; peers map the same pages with
//! [`Memory::map_fd`].

use crate::error::RingError;
use core::ptr::NonNull;
use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use nix::unistd::ftruncate;
use std::num::NonZero;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

#[derive(Debug)]
pub struct Memory {
    ptr: NonNull<u8>,
    size: usize,
    fd: OwnedFd,
}

impl Memory {
    /// Create a zero-filled shared region of `size` bytes (page aligned).
    pub fn create(size: usize) -> Result<Self, RingError> {
        let fd = memfd_create(c"eventring", MemFdCreateFlag::MFD_CLOEXEC)?;
        ftruncate(&fd, size as i64)?;
        Self::map(fd, size)
    }

    /// Map an existing region received from a peer.
    pub fn map_fd(fd: OwnedFd, size: usize) -> Result<Self, RingError> {
        Self::map(fd, size)
    }

    fn map(fd: OwnedFd, size: usize) -> Result<Self, RingError> {
        let ptr = unsafe {
            mmap(
                None,
                NonZero::new(size).ok_or(RingError::CapacityTooSmall(0))?,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &fd,
                0,
            )?
        };

        Ok(Memory {
            ptr: ptr.cast(),
            size,
            fd,
        })
    }

    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn fd(&self) -> BorrowedFd {
        self.fd.as_fd()
    }

    /// Duplicate the backing descriptor, e.g. to pass it over a socket.
    pub fn clone_fd(&self) -> Result<OwnedFd, RingError> {
        Ok(self.fd.try_clone()?)
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.ptr.cast(), self.size);
        }
    }
}

unsafe impl Send for Memory {}
unsafe impl Sync for Memory {}

pub(crate) fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_zero_fills() -> Result<(), RingError> {
        let size = page_size();
        let memory = Memory::create(size)?;
        let ptr = memory.as_ptr().as_ptr();
        for i in 0..size {
            assert_eq!(unsafe { ptr.add(i).read() }, 0, "byte {} not zero", i);
        }
        Ok(())
    }

    #[test]
    fn peer_mapping_shares_pages() -> Result<(), RingError> {
        let size = page_size();
        let owner = Memory::create(size)?;
        let peer = Memory::map_fd(owner.clone_fd()?, size)?;

        unsafe {
            owner.as_ptr().as_ptr().write(0xAB);
            owner.as_ptr().as_ptr().add(size - 1).write(0xCD);
        }

        unsafe {
            assert_eq!(peer.as_ptr().as_ptr().read(), 0xAB);
            assert_eq!(peer.as_ptr().as_ptr().add(size - 1).read(), 0xCD);
        }
        Ok(())
    }

    #[test]
    fn mapping_outlives_owner_drop() -> Result<(), RingError> {
        let size = page_size();
        let owner = Memory::create(size)?;
        let peer = Memory::map_fd(owner.clone_fd()?, size)?;

        unsafe { owner.as_ptr().as_ptr().write(0x42) };
        drop(owner);

        assert_eq!(unsafe { peer.as_ptr().as_ptr().read() }, 0x42);
        Ok(())
    }
}
