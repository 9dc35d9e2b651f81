// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! A copy facility built on the standard library.

[PortableCopyfile] implements [CopyFlags] without `copyfile(3)`:

* `DATA` copies file content, counting bytes under [StateFlag::Copied].
* `XATTR` copies extended attributes, except ACL attributes.
* `ACL` copies the `system.posix_acl_*` attributes holding POSIX ACLs.
* `STAT` copies permission bits and access/modification times.
* `RECURSIVE` walks a source directory and copies every entry.
* `EXCL` fails with `EEXIST` when the destination exists.
* `UNLINK` removes an existing destination first.
* `NOFOLLOW_SRC` copies a symlink as a symlink.
* `NOFOLLOW_DST` refuses to write through a symlink at the destination.

Attributes in privileged namespaces that the destination refuses are
skipped. A status callback returning [StatusAction::Quit] cancels the copy
with `ECANCELED`.
*/

use {
    crate::copyfile::{
        xattr, CopyFlags, CopyStage, CopyStatus, CopyWhat, CopyfileBackend, StateFlag, StateValue,
        StatusAction, StatusCallback,
    },
    filetime::FileTime,
    log::{debug, warn},
    std::{
        ffi::OsStr,
        fs::{File, Metadata, OpenOptions},
        io::{ErrorKind, Read, Write},
        os::unix::{
            ffi::OsStrExt,
            fs::{MetadataExt, OpenOptionsExt},
        },
        path::{Path, PathBuf},
    },
    walkdir::WalkDir,
};

/// Size of the buffer used to copy file data.
const COPY_BUFFER_SIZE: usize = 65536;

/// Attribute name prefix of POSIX ACLs.
const ACL_XATTR_PREFIX: &[u8] = b"system.posix_acl_";

/// Attribute namespace unprivileged processes can always write.
const USER_XATTR_PREFIX: &[u8] = b"user.";

fn cancelled() -> std::io::Error {
    std::io::Error::from_raw_os_error(libc::ECANCELED)
}

/// Copy facility implemented with `std::fs`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PortableCopyfile;

/// Copy state of [PortableCopyfile].
#[derive(Clone, Default)]
pub struct PortableState {
    callback: Option<StatusCallback>,
    context: usize,
    copied: u64,
}

impl CopyfileBackend for PortableCopyfile {
    type State = PortableState;

    fn alloc_state(&self) -> std::io::Result<Self::State> {
        Ok(PortableState::default())
    }

    fn set_state(&self, state: &mut Self::State, value: StateValue) -> std::io::Result<()> {
        match value {
            StateValue::StatusCallback(callback) => state.callback = callback,
            StateValue::StatusContext(context) => state.context = context,
            StateValue::Copied(_) => return Err(std::io::Error::from_raw_os_error(libc::EINVAL)),
        }

        Ok(())
    }

    fn get_state(&self, state: &Self::State, flag: StateFlag) -> std::io::Result<StateValue> {
        Ok(match flag {
            StateFlag::StatusCallback => StateValue::StatusCallback(state.callback.clone()),
            StateFlag::StatusContext => StateValue::StatusContext(state.context),
            StateFlag::Copied => StateValue::Copied(state.copied),
        })
    }

    fn copy(
        &self,
        source: &Path,
        destination: &Path,
        state: &mut Self::State,
        flags: CopyFlags,
    ) -> std::io::Result<()> {
        state.copied = 0;

        let mut job = CopyJob { state, flags };

        let metadata = job.source_metadata(source)?;

        if metadata.is_dir() && flags.contains(CopyFlags::RECURSIVE) {
            job.copy_tree(source, destination)
        } else if metadata.is_dir() {
            job.copy_directory(source, destination, &metadata)?;
            job.apply_stat(destination, &metadata, false)
        } else {
            job.copy_entry(source, destination, &metadata)
        }
    }

    fn free_state(&self, state: &mut Self::State) -> std::io::Result<()> {
        state.callback = None;

        Ok(())
    }
}

/// A single copy operation.
struct CopyJob<'a> {
    state: &'a mut PortableState,
    flags: CopyFlags,
}

impl<'a> CopyJob<'a> {
    fn source_metadata(&self, path: &Path) -> std::io::Result<Metadata> {
        if self.flags.contains(CopyFlags::NOFOLLOW_SRC) {
            std::fs::symlink_metadata(path)
        } else {
            std::fs::metadata(path)
        }
    }

    fn notify(
        &self,
        what: CopyWhat,
        stage: CopyStage,
        source: &Path,
        destination: &Path,
    ) -> StatusAction {
        match &self.state.callback {
            Some(callback) => callback(&CopyStatus {
                what,
                stage,
                source,
                destination,
                context: self.state.context,
            }),
            None => StatusAction::Continue,
        }
    }

    /// Notify the start of an entry. Returns whether to copy it.
    fn start(&self, what: CopyWhat, source: &Path, destination: &Path) -> std::io::Result<bool> {
        match self.notify(what, CopyStage::Start, source, destination) {
            StatusAction::Continue => Ok(true),
            StatusAction::Skip => {
                debug!("skipping {}", source.display());
                Ok(false)
            }
            StatusAction::Quit => Err(cancelled()),
        }
    }

    fn finish(&self, what: CopyWhat, source: &Path, destination: &Path) -> std::io::Result<()> {
        match self.notify(what, CopyStage::Finish, source, destination) {
            StatusAction::Quit => Err(cancelled()),
            _ => Ok(()),
        }
    }

    /// Report a failure. Returns `Ok` if the callback asked to skip past it.
    fn failed(
        &self,
        what: CopyWhat,
        source: &Path,
        destination: &Path,
        e: std::io::Error,
    ) -> std::io::Result<()> {
        match self.notify(what, CopyStage::Error, source, destination) {
            StatusAction::Skip => {
                warn!("skipping {} after error: {}", source.display(), e);
                Ok(())
            }
            _ => Err(e),
        }
    }

    /// Fail with `EINVAL` if `destination` is the source file itself.
    ///
    /// Truncating or unlinking the destination would destroy the source.
    /// `UNLINK` replaces a destination symlink rather than writing through it.
    fn refuse_same_file(&self, destination: &Path, metadata: &Metadata) -> std::io::Result<()> {
        let existing = if self
            .flags
            .intersects(CopyFlags::NOFOLLOW_DST | CopyFlags::UNLINK)
        {
            std::fs::symlink_metadata(destination)
        } else {
            std::fs::metadata(destination)
        };

        match existing {
            Ok(existing) if existing.dev() == metadata.dev() && existing.ino() == metadata.ino() => {
                Err(std::io::Error::from_raw_os_error(libc::EINVAL))
            }
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Handle an existing destination per `EXCL` and `UNLINK`.
    fn prepare_destination(&self, destination: &Path) -> std::io::Result<()> {
        let existing = match std::fs::symlink_metadata(destination) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        if self.flags.contains(CopyFlags::EXCL) {
            return Err(std::io::Error::from_raw_os_error(libc::EEXIST));
        }

        if self.flags.contains(CopyFlags::UNLINK) {
            if existing.is_dir() {
                std::fs::remove_dir(destination)?;
            } else {
                std::fs::remove_file(destination)?;
            }
        }

        Ok(())
    }

    fn copy_tree(&mut self, source: &Path, destination: &Path) -> std::io::Result<()> {
        let mut directories: Vec<(PathBuf, PathBuf, Metadata)> = vec![];

        let mut walker = WalkDir::new(source)
            .follow_links(!self.flags.contains(CopyFlags::NOFOLLOW_SRC))
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
            .into_iter();

        while let Some(entry) = walker.next() {
            let entry = entry?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|e| std::io::Error::new(ErrorKind::InvalidInput, e))?;
            let target = destination.join(relative);
            let metadata = entry.metadata()?;

            if metadata.is_dir() {
                if !self.start(CopyWhat::Directory, entry.path(), &target)? {
                    walker.skip_current_dir();
                    continue;
                }

                if let Err(e) = self.copy_directory(entry.path(), &target, &metadata) {
                    self.failed(CopyWhat::Directory, entry.path(), &target, e)?;
                    walker.skip_current_dir();
                    continue;
                }

                directories.push((entry.path().to_path_buf(), target, metadata));
            } else {
                self.copy_entry(entry.path(), &target, &metadata)?;
            }
        }

        // Children modify directory times, so directory metadata goes last.
        for (source, target, metadata) in directories.into_iter().rev() {
            self.apply_stat(&target, &metadata, false)?;
            self.finish(CopyWhat::DirectoryCleanup, &source, &target)?;
        }

        Ok(())
    }

    fn copy_directory(
        &mut self,
        source: &Path,
        destination: &Path,
        metadata: &Metadata,
    ) -> std::io::Result<()> {
        match std::fs::symlink_metadata(destination) {
            Ok(existing) if existing.is_dir() => {
                if self.flags.contains(CopyFlags::EXCL) {
                    return Err(std::io::Error::from_raw_os_error(libc::EEXIST));
                }
            }
            Ok(_) => {
                self.prepare_destination(destination)?;
                std::fs::create_dir(destination)?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                std::fs::create_dir(destination)?;
            }
            Err(e) => return Err(e),
        }

        self.copy_xattrs(source, destination, metadata)
    }

    fn copy_entry(
        &mut self,
        source: &Path,
        destination: &Path,
        metadata: &Metadata,
    ) -> std::io::Result<()> {
        if !self.start(CopyWhat::File, source, destination)? {
            return Ok(());
        }

        let res = self
            .refuse_same_file(destination, metadata)
            .and_then(|_| self.prepare_destination(destination))
            .and_then(|_| {
                if metadata.file_type().is_symlink() {
                    let target = std::fs::read_link(source)?;
                    std::os::unix::fs::symlink(target, destination)
                } else if self.flags.contains(CopyFlags::DATA) {
                    self.copy_data(source, destination)
                } else {
                    self.open_destination(destination, false).map(|_| ())
                }
            })
            .and_then(|_| self.copy_xattrs(source, destination, metadata))
            .and_then(|_| {
                self.apply_stat(destination, metadata, metadata.file_type().is_symlink())
            });

        match res {
            Ok(()) => self.finish(CopyWhat::File, source, destination),
            Err(e) if e.raw_os_error() == Some(libc::ECANCELED) => Err(e),
            Err(e) => self.failed(CopyWhat::File, source, destination, e),
        }
    }

    fn open_destination(&self, destination: &Path, truncate: bool) -> std::io::Result<File> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(truncate);

        if self.flags.contains(CopyFlags::NOFOLLOW_DST) {
            options.custom_flags(libc::O_NOFOLLOW);
        }

        options.open(destination)
    }

    fn copy_data(&mut self, source: &Path, destination: &Path) -> std::io::Result<()> {
        let mut reader = if self.flags.contains(CopyFlags::NOFOLLOW_SRC) {
            OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_NOFOLLOW)
                .open(source)?
        } else {
            File::open(source)?
        };
        let mut writer = self.open_destination(destination, true)?;

        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];

        loop {
            let count = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(count) => count,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            writer.write_all(&buffer[0..count])?;
            self.state.copied += count as u64;

            match self.notify(CopyWhat::Data, CopyStage::Progress, source, destination) {
                StatusAction::Continue => {}
                StatusAction::Skip => break,
                StatusAction::Quit => return Err(cancelled()),
            }
        }

        writer.flush()
    }

    fn copy_xattrs(
        &self,
        source: &Path,
        destination: &Path,
        metadata: &Metadata,
    ) -> std::io::Result<()> {
        if !self.flags.intersects(CopyFlags::XATTR | CopyFlags::ACL) {
            return Ok(());
        }

        let follow_source = !metadata.file_type().is_symlink();
        let follow_destination =
            follow_source && !self.flags.contains(CopyFlags::NOFOLLOW_DST);

        let names = match xattr::list(source, follow_source) {
            Ok(names) => names,
            // Nothing can be stored, so there is nothing to copy.
            Err(e) if xattr::is_unsupported(&e) => {
                debug!("{} has no extended attributes: {}", source.display(), e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for name in names {
            let wanted = if name.as_bytes().starts_with(ACL_XATTR_PREFIX) {
                self.flags.contains(CopyFlags::ACL)
            } else {
                self.flags.contains(CopyFlags::XATTR)
            };

            if !wanted {
                continue;
            }

            if self.notify(CopyWhat::Xattr, CopyStage::Start, source, destination)
                == StatusAction::Quit
            {
                return Err(cancelled());
            }

            let value = xattr::get(source, &name, follow_source)?;

            match xattr::set(destination, &name, &value, follow_destination) {
                Ok(()) => {}
                Err(e) if Self::is_privileged_refusal(&name, &e) => {
                    debug!(
                        "not copying attribute {} to {}: {}",
                        name.to_string_lossy(),
                        destination.display(),
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    fn is_privileged_refusal(name: &OsStr, e: &std::io::Error) -> bool {
        !name.as_bytes().starts_with(USER_XATTR_PREFIX)
            && (xattr::is_unsupported(e)
                || matches!(e.raw_os_error(), Some(libc::EPERM) | Some(libc::EACCES)))
    }

    fn apply_stat(
        &self,
        destination: &Path,
        metadata: &Metadata,
        symlink: bool,
    ) -> std::io::Result<()> {
        if !self.flags.contains(CopyFlags::STAT) {
            return Ok(());
        }

        let atime = FileTime::from_last_access_time(metadata);
        let mtime = FileTime::from_last_modification_time(metadata);

        if symlink {
            filetime::set_symlink_file_times(destination, atime, mtime)
        } else {
            std::fs::set_permissions(destination, metadata.permissions())?;
            filetime::set_file_times(destination, atime, mtime)
        }
    }
}
