//! POSIX shared-memory regions.
//!
//! A [`ShmRegion`] wraps a named POSIX shared-memory object mapped into the
//! process. The creator owns the name: dropping the creating region unlinks
//! it, while attached regions only unmap. Names follow the POSIX rule of a
//! single leading `/` with no other slashes.

use std::{ffi::CString, fs::File, os::unix::io::FromRawFd};

use memmap2::MmapMut;
use tracing::{debug, warn};
use wirebit_core::{ErrorKind, Result};

/// A named shared-memory mapping.
pub struct ShmRegion {
    map: MmapMut,
    name: String,
    owner: bool,
}

fn validate_name(name: &str) -> Result<CString> {
    if !name.starts_with('/') || name.len() < 2 || name[1..].contains('/') {
        return Err(ErrorKind::InvalidArgument(format!(
            "shared memory name must be \"/name\": {:?}",
            name
        )));
    }
    CString::new(name)
        .map_err(|_| ErrorKind::InvalidArgument("shared memory name contains NUL".to_string()))
}

impl ShmRegion {
    /// Creates and maps a new shared-memory object of `len` bytes.
    ///
    /// Fails if the name already exists; stale objects from a crashed run
    /// must be removed with [`ShmRegion::unlink`] first.
    pub fn create(name: &str, len: usize) -> Result<Self> {
        let cname = validate_name(name)?;
        if len == 0 {
            return Err(ErrorKind::InvalidArgument(
                "shared memory region must not be empty".to_string(),
            ));
        }

        let fd = unsafe {
            libc::shm_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600 as libc::mode_t,
            )
        };
        if fd < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        // File takes over the descriptor and closes it when dropped; the
        // mapping stays valid independently of the descriptor.
        let file = unsafe { File::from_raw_fd(fd) };

        if let Err(e) = file.set_len(len as u64) {
            unsafe {
                libc::shm_unlink(cname.as_ptr());
            }
            return Err(e.into());
        }
        let map = match unsafe { MmapMut::map_mut(&file) } {
            Ok(map) => map,
            Err(e) => {
                unsafe {
                    libc::shm_unlink(cname.as_ptr());
                }
                return Err(e.into());
            }
        };

        debug!(name, len, "created shared-memory region");
        Ok(Self { map, name: name.to_string(), owner: true })
    }

    /// Maps an existing shared-memory object by name.
    pub fn attach(name: &str) -> Result<Self> {
        let cname = validate_name(name)?;

        let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ENOENT) {
                return Err(ErrorKind::NotFound(format!(
                    "shared memory object {:?} does not exist",
                    name
                )));
            }
            return Err(err.into());
        }
        let file = unsafe { File::from_raw_fd(fd) };
        let map = unsafe { MmapMut::map_mut(&file)? };

        debug!(name, len = map.len(), "attached shared-memory region");
        Ok(Self { map, name: name.to_string(), owner: false })
    }

    /// Removes a named object without mapping it. Useful for cleaning up
    /// after a crashed creator.
    pub fn unlink(name: &str) -> Result<()> {
        let cname = validate_name(name)?;
        let rc = unsafe { libc::shm_unlink(cname.as_ptr()) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ENOENT) {
                return Err(ErrorKind::NotFound(format!(
                    "shared memory object {:?} does not exist",
                    name
                )));
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Region name, including the leading slash.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the mapping is empty (never the case for a region
    /// produced by [`ShmRegion::create`]).
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// True when this handle created the object and will unlink it on drop.
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Base pointer of the mapping.
    pub(crate) fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }

    /// Mutable base pointer of the mapping.
    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
        self.map.as_mut_ptr()
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        match CString::new(self.name.as_str()) {
            Ok(cname) => {
                let rc = unsafe { libc::shm_unlink(cname.as_ptr()) };
                if rc < 0 {
                    warn!(
                        name = %self.name,
                        error = %std::io::Error::last_os_error(),
                        "failed to unlink shared-memory region"
                    );
                } else {
                    debug!(name = %self.name, "unlinked shared-memory region");
                }
            }
            Err(_) => warn!(name = %self.name, "shared-memory name not unlinkable"),
        }
    }
}

impl std::fmt::Debug for ShmRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmRegion")
            .field("name", &self.name)
            .field("len", &self.map.len())
            .field("owner", &self.owner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("/wirebit_shm_{}_{}", tag, std::process::id())
    }

    #[test]
    fn rejects_bad_names() {
        assert!(matches!(
            ShmRegion::create("noslash", 64),
            Err(ErrorKind::InvalidArgument(_))
        ));
        assert!(matches!(
            ShmRegion::create("/a/b", 64),
            Err(ErrorKind::InvalidArgument(_))
        ));
        assert!(matches!(
            ShmRegion::create("/", 64),
            Err(ErrorKind::InvalidArgument(_))
        ));
    }

    #[test]
    fn create_attach_and_unlink_lifecycle() {
        let name = unique_name("lifecycle");
        let region = ShmRegion::create(&name, 4096).unwrap();
        assert_eq!(region.len(), 4096);
        assert!(region.is_owner());

        let attached = ShmRegion::attach(&name).unwrap();
        assert_eq!(attached.len(), 4096);
        assert!(!attached.is_owner());

        drop(attached);
        drop(region); // owner drop unlinks

        assert!(matches!(
            ShmRegion::attach(&name),
            Err(ErrorKind::NotFound(_))
        ));
    }

    #[test]
    fn attach_missing_is_not_found() {
        assert!(matches!(
            ShmRegion::attach("/wirebit_shm_never_created"),
            Err(ErrorKind::NotFound(_))
        ));
    }

    #[test]
    fn writes_are_visible_through_a_second_mapping() {
        let name = unique_name("visible");
        let mut region = ShmRegion::create(&name, 128).unwrap();
        unsafe {
            *region.as_mut_ptr() = 0xAB;
            *region.as_mut_ptr().add(127) = 0xCD;
        }
        let attached = ShmRegion::attach(&name).unwrap();
        unsafe {
            assert_eq!(*attached.as_ptr(), 0xAB);
            assert_eq!(*attached.as_ptr().add(127), 0xCD);
        }
    }
}
