// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Hashing (sections of) files.

Functions in this module feed file content into a hash state owned by the
caller. They never finalize or reset that state, so a caller can hash the
concatenation of several regions by calling them repeatedly before
finishing the digest.
*/

use {
    crate::error::CodesignUtilError,
    std::{
        fs::File,
        io::{ErrorKind, Read},
        path::Path,
    },
};

/// Size of the buffer used to read file content.
pub const FILE_HASH_BUFFER_SIZE: usize = 4096;

/// An incremental hash state that data can be appended to.
pub trait HashAccumulator {
    fn append(&mut self, data: &[u8]);
}

impl HashAccumulator for ring::digest::Context {
    fn append(&mut self, data: &[u8]) {
        self.update(data);
    }
}

impl<T: HashAccumulator + ?Sized> HashAccumulator for &mut T {
    fn append(&mut self, data: &[u8]) {
        (**self).append(data);
    }
}

/// Hash the entire content of the file at `path`.
///
/// Returns the number of bytes hashed.
pub fn hash_file_data(
    path: impl AsRef<Path>,
    hasher: &mut impl HashAccumulator,
) -> Result<u64, CodesignUtilError> {
    let mut fh = File::open(path.as_ref())?;

    hash_file_data_from(&mut fh, hasher, 0)
}

/// Hash content from a reader, starting at its current position.
///
/// If `limit` is 0, content is read until end of file. Otherwise at most
/// `limit` bytes are read. A limit beyond end of file is fine.
///
/// Returns the number of bytes read, all of which have been appended to
/// `hasher`. The reader is advanced by exactly that many bytes.
pub fn hash_file_data_from(
    reader: &mut impl Read,
    hasher: &mut impl HashAccumulator,
    limit: u64,
) -> Result<u64, CodesignUtilError> {
    let mut buffer = [0u8; FILE_HASH_BUFFER_SIZE];
    let mut remaining = limit;
    let mut total = 0u64;

    loop {
        let size = if limit != 0 && remaining < buffer.len() as u64 {
            remaining as usize
        } else {
            buffer.len()
        };

        let got = match reader.read(&mut buffer[0..size]) {
            Ok(got) => got,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };

        if got == 0 {
            break;
        }

        total += got as u64;
        hasher.append(&buffer[0..got]);

        if limit != 0 {
            remaining -= got as u64;

            if remaining == 0 {
                break;
            }
        }
    }

    Ok(total)
}
