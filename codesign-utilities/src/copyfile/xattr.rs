// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Extended attribute primitives.

use std::{
    ffi::{CString, OsStr, OsString},
    os::unix::ffi::OsStrExt,
    path::Path,
};

fn c_string(value: &OsStr) -> std::io::Result<CString> {
    CString::new(value.as_bytes()).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
}

/// Whether an error means the filesystem has no extended attribute support.
pub fn is_unsupported(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::Unsupported || e.raw_os_error() == Some(libc::ENOTSUP)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
mod imp {
    use {
        super::*,
        crate::copyfile::cvt,
        libc::{c_char, c_void},
        std::os::unix::ffi::OsStringExt,
    };

    /// Call a size probing attribute function until the buffer fits.
    fn read_sized(
        mut call: impl FnMut(*mut c_void, libc::size_t) -> libc::ssize_t,
    ) -> std::io::Result<Vec<u8>> {
        loop {
            let size = cvt(call(std::ptr::null_mut(), 0))? as usize;
            if size == 0 {
                return Ok(vec![]);
            }

            let mut buffer = vec![0u8; size];
            match cvt(call(buffer.as_mut_ptr() as *mut c_void, buffer.len())) {
                Ok(got) => {
                    buffer.truncate(got as usize);
                    return Ok(buffer);
                }
                // Grew between the calls.
                Err(e) if e.raw_os_error() == Some(libc::ERANGE) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn list(path: &Path, follow: bool) -> std::io::Result<Vec<OsString>> {
        let path = c_string(path.as_os_str())?;

        let data = read_sized(|buffer, size| unsafe {
            if follow {
                libc::listxattr(path.as_ptr(), buffer as *mut c_char, size)
            } else {
                libc::llistxattr(path.as_ptr(), buffer as *mut c_char, size)
            }
        })?;

        Ok(data
            .split(|b| *b == 0)
            .filter(|name| !name.is_empty())
            .map(|name| OsString::from_vec(name.to_vec()))
            .collect())
    }

    pub fn get(path: &Path, name: &OsStr, follow: bool) -> std::io::Result<Vec<u8>> {
        let path = c_string(path.as_os_str())?;
        let name = c_string(name)?;

        read_sized(|buffer, size| unsafe {
            if follow {
                libc::getxattr(path.as_ptr(), name.as_ptr(), buffer, size)
            } else {
                libc::lgetxattr(path.as_ptr(), name.as_ptr(), buffer, size)
            }
        })
    }

    pub fn set(path: &Path, name: &OsStr, value: &[u8], follow: bool) -> std::io::Result<()> {
        let path = c_string(path.as_os_str())?;
        let name = c_string(name)?;

        cvt(unsafe {
            if follow {
                libc::setxattr(
                    path.as_ptr(),
                    name.as_ptr(),
                    value.as_ptr() as *const c_void,
                    value.len(),
                    0,
                )
            } else {
                libc::lsetxattr(
                    path.as_ptr(),
                    name.as_ptr(),
                    value.as_ptr() as *const c_void,
                    value.len(),
                    0,
                )
            }
        })?;

        Ok(())
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
mod imp {
    use super::*;

    fn unsupported() -> std::io::Error {
        std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "extended attributes are not supported on this platform",
        )
    }

    pub fn list(path: &Path, _follow: bool) -> std::io::Result<Vec<OsString>> {
        c_string(path.as_os_str())?;
        Err(unsupported())
    }

    pub fn get(_path: &Path, name: &OsStr, _follow: bool) -> std::io::Result<Vec<u8>> {
        c_string(name)?;
        Err(unsupported())
    }

    pub fn set(_path: &Path, name: &OsStr, _value: &[u8], _follow: bool) -> std::io::Result<()> {
        c_string(name)?;
        Err(unsupported())
    }
}

pub use imp::*;

#[cfg(all(test, any(target_os = "linux", target_os = "android")))]
mod tests {
    use super::*;

    #[test]
    fn set_get_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file");
        std::fs::write(&path, b"data").unwrap();

        match set(&path, OsStr::new("user.tag"), b"x", true) {
            Ok(()) => {}
            Err(e) if is_unsupported(&e) || e.raw_os_error() == Some(libc::EPERM) => return,
            Err(e) => panic!("unexpected error: {}", e),
        }

        assert_eq!(get(&path, OsStr::new("user.tag"), true).unwrap(), b"x");
        assert!(list(&path, false)
            .unwrap()
            .contains(&OsString::from("user.tag")));

        let e = get(&path, OsStr::new("user.missing"), true).unwrap_err();
        assert_eq!(e.raw_os_error(), Some(libc::ENODATA));
    }

    #[test]
    fn interior_nul() {
        let e = get(Path::new("a\0b"), OsStr::new("user.tag"), true).unwrap_err();
        assert_eq!(e.kind(), std::io::ErrorKind::InvalidInput);
    }
}
