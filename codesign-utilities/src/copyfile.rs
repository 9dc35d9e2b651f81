// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Metadata preserving file copies.

Copying signed content around must preserve more than file data: extended
attributes, ACLs, and permissions can all be relevant to a signature. This
module wraps a `copyfile(3)` style facility.

A copy facility (a [CopyfileBackend]) hands out an opaque *copy state*.
Configuration values are recorded in the state, the state is used for one or
more copy operations, and then the state is freed. [ScopedCopy] owns one
such state for its lifetime and frees it when dropped.

On macOS, [SystemCopyfile] is the operating system's `copyfile(3)`. Elsewhere
it is [PortableCopyfile], which implements the same flags on top of the
standard library.
*/

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
pub use macos::*;
#[cfg(unix)]
mod portable;
#[cfg(unix)]
pub use portable::*;
#[cfg(unix)]
mod xattr;

use {
    crate::error::CodesignUtilError,
    log::warn,
    std::{
        fmt::{Debug, Formatter},
        path::Path,
        str::FromStr,
        sync::Arc,
    },
};

/// The copy facility of the running platform.
#[cfg(target_os = "macos")]
pub type SystemCopyfile = AppleCopyfile;

/// The copy facility of the running platform.
#[cfg(all(unix, not(target_os = "macos")))]
pub type SystemCopyfile = PortableCopyfile;

bitflags::bitflags! {
    /// Flags controlling what a copy operation transfers and how.
    ///
    /// Values match those of `copyfile(3)`.
    pub struct CopyFlags: u32 {
        /// Copy access control lists.
        const ACL = 1 << 0;
        /// Copy POSIX permissions and timestamps.
        const STAT = 1 << 1;
        /// Copy extended attributes.
        const XATTR = 1 << 2;
        /// Copy file data.
        const DATA = 1 << 3;
        const SECURITY = Self::STAT.bits | Self::ACL.bits;
        const METADATA = Self::SECURITY.bits | Self::XATTR.bits;
        const ALL = Self::METADATA.bits | Self::DATA.bits;
        /// Descend into directories.
        const RECURSIVE = 1 << 15;
        /// Fail if the destination exists.
        const EXCL = 1 << 17;
        /// Don't follow a symlink at the source.
        const NOFOLLOW_SRC = 1 << 18;
        /// Don't follow a symlink at the destination.
        const NOFOLLOW_DST = 1 << 19;
        /// Remove the destination before copying.
        const UNLINK = 1 << 21;
        const NOFOLLOW = Self::NOFOLLOW_SRC.bits | Self::NOFOLLOW_DST.bits;
    }
}

impl FromStr for CopyFlags {
    type Err = CodesignUtilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "acl" => Ok(Self::ACL),
            "stat" => Ok(Self::STAT),
            "xattr" => Ok(Self::XATTR),
            "data" => Ok(Self::DATA),
            "security" => Ok(Self::SECURITY),
            "metadata" => Ok(Self::METADATA),
            "all" => Ok(Self::ALL),
            "recursive" => Ok(Self::RECURSIVE),
            "fail-if-exists" => Ok(Self::EXCL),
            "overwrite" => Ok(Self::UNLINK),
            "nofollow" => Ok(Self::NOFOLLOW),
            "nofollow-src" => Ok(Self::NOFOLLOW_SRC),
            "nofollow-dst" => Ok(Self::NOFOLLOW_DST),
            _ => Err(CodesignUtilError::UnknownCopyFlag(s.to_string())),
        }
    }
}

impl CopyFlags {
    /// Attempt to convert a series of strings into a [CopyFlags].
    pub fn from_strs(s: &[&str]) -> Result<CopyFlags, CodesignUtilError> {
        let mut flags = CopyFlags::empty();

        for s in s {
            flags |= Self::from_str(s)?;
        }

        Ok(flags)
    }
}

/// Keys of values recorded in a copy state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StateFlag {
    /// Function receiving progress notifications.
    StatusCallback,
    /// Opaque value handed to the progress function.
    StatusContext,
    /// Bytes of file data copied so far.
    Copied,
}

impl StateFlag {
    /// The `COPYFILE_STATE_*` value of this flag.
    pub fn as_raw(&self) -> u32 {
        match self {
            Self::StatusCallback => 6,
            Self::StatusContext => 7,
            Self::Copied => 8,
        }
    }
}

/// What a progress notification is about.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CopyWhat {
    Error,
    File,
    Directory,
    DirectoryCleanup,
    Data,
    Xattr,
}

impl CopyWhat {
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Error),
            1 => Some(Self::File),
            2 => Some(Self::Directory),
            3 => Some(Self::DirectoryCleanup),
            4 => Some(Self::Data),
            5 => Some(Self::Xattr),
            _ => None,
        }
    }
}

/// Where in its work a copy operation is.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CopyStage {
    Start,
    Finish,
    Error,
    Progress,
}

impl CopyStage {
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            1 => Some(Self::Start),
            2 => Some(Self::Finish),
            3 => Some(Self::Error),
            4 => Some(Self::Progress),
            _ => None,
        }
    }
}

/// How a copy operation should proceed after a progress notification.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusAction {
    Continue,
    Skip,
    Quit,
}

impl StatusAction {
    pub fn as_raw(&self) -> i32 {
        match self {
            Self::Continue => 0,
            Self::Skip => 1,
            Self::Quit => 2,
        }
    }
}

/// A progress notification.
#[derive(Clone, Debug)]
pub struct CopyStatus<'a> {
    pub what: CopyWhat,
    pub stage: CopyStage,
    pub source: &'a Path,
    pub destination: &'a Path,
    /// The value recorded under [StateFlag::StatusContext].
    pub context: usize,
}

/// Function receiving progress notifications.
pub type StatusCallback = Arc<dyn Fn(&CopyStatus<'_>) -> StatusAction + Send + Sync>;

/// A value recorded in a copy state.
#[derive(Clone)]
pub enum StateValue {
    StatusCallback(Option<StatusCallback>),
    StatusContext(usize),
    Copied(u64),
}

impl StateValue {
    /// The key this value is recorded under.
    pub fn flag(&self) -> StateFlag {
        match self {
            Self::StatusCallback(_) => StateFlag::StatusCallback,
            Self::StatusContext(_) => StateFlag::StatusContext,
            Self::Copied(_) => StateFlag::Copied,
        }
    }
}

impl Debug for StateValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StatusCallback(cb) => f
                .debug_tuple("StatusCallback")
                .field(&cb.as_ref().map(|_| "<function>"))
                .finish(),
            Self::StatusContext(value) => f.debug_tuple("StatusContext").field(value).finish(),
            Self::Copied(value) => f.debug_tuple("Copied").field(value).finish(),
        }
    }
}

impl PartialEq for StateValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::StatusCallback(a), Self::StatusCallback(b)) => match (a, b) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            },
            (Self::StatusContext(a), Self::StatusContext(b)) => a == b,
            (Self::Copied(a), Self::Copied(b)) => a == b,
            _ => false,
        }
    }
}

/// Interface to a `copyfile(3)` style copy facility.
pub trait CopyfileBackend {
    /// Opaque copy state.
    type State;

    /// Allocate a fresh copy state.
    fn alloc_state(&self) -> std::io::Result<Self::State>;

    /// Record a value in a copy state.
    fn set_state(&self, state: &mut Self::State, value: StateValue) -> std::io::Result<()>;

    /// Retrieve a value from a copy state.
    fn get_state(&self, state: &Self::State, flag: StateFlag) -> std::io::Result<StateValue>;

    /// Copy `source` to `destination`.
    fn copy(
        &self,
        source: &Path,
        destination: &Path,
        state: &mut Self::State,
        flags: CopyFlags,
    ) -> std::io::Result<()>;

    /// Free a copy state.
    ///
    /// Called exactly once per allocated state.
    fn free_state(&self, state: &mut Self::State) -> std::io::Result<()>;
}

/// Convert a C style return code into a [std::io::Result].
///
/// Negative values are failures described by `errno`.
pub(crate) fn cvt<T: Copy + Default + PartialOrd>(rc: T) -> std::io::Result<T> {
    if rc < T::default() {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(rc)
    }
}

fn check<T>(result: std::io::Result<T>) -> Result<T, CodesignUtilError> {
    result.map_err(CodesignUtilError::Io)
}

/// Owner of a copy state.
///
/// The state is allocated on construction and freed on drop. In between,
/// values can be recorded with [Self::set] and read with [Self::get], and
/// any number of copies can be performed with [Self::copy].
pub struct ScopedCopy<B: CopyfileBackend = SystemCopyfile> {
    backend: B,
    state: B::State,
}

impl ScopedCopy<SystemCopyfile> {
    /// Construct an instance using the platform's copy facility.
    pub fn new() -> Result<Self, CodesignUtilError> {
        Self::with_backend(SystemCopyfile::default())
    }
}

impl<B: CopyfileBackend> ScopedCopy<B> {
    /// Construct an instance using the given copy facility.
    pub fn with_backend(backend: B) -> Result<Self, CodesignUtilError> {
        let state = check(backend.alloc_state())?;

        Ok(Self { backend, state })
    }

    /// Record a configuration value.
    pub fn set(&mut self, value: StateValue) -> Result<(), CodesignUtilError> {
        check(self.backend.set_state(&mut self.state, value))
    }

    /// Retrieve a recorded or facility maintained value.
    pub fn get(&self, flag: StateFlag) -> Result<StateValue, CodesignUtilError> {
        check(self.backend.get_state(&self.state, flag))
    }

    /// Install a progress callback.
    pub fn set_status_callback(
        &mut self,
        callback: impl Fn(&CopyStatus<'_>) -> StatusAction + Send + Sync + 'static,
    ) -> Result<(), CodesignUtilError> {
        self.set(StateValue::StatusCallback(Some(Arc::new(callback))))
    }

    /// Bytes of file data copied so far.
    pub fn copied(&self) -> Result<u64, CodesignUtilError> {
        match self.get(StateFlag::Copied)? {
            StateValue::Copied(value) => Ok(value),
            other => Err(CodesignUtilError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("copy facility returned {:?} for copied bytes", other),
            ))),
        }
    }

    /// Copy `source` to `destination` using the recorded configuration.
    pub fn copy(
        &mut self,
        source: impl AsRef<Path>,
        destination: impl AsRef<Path>,
        flags: CopyFlags,
    ) -> Result<(), CodesignUtilError> {
        check(
            self.backend
                .copy(source.as_ref(), destination.as_ref(), &mut self.state, flags),
        )
    }
}

impl<B: CopyfileBackend> Drop for ScopedCopy<B> {
    fn drop(&mut self) {
        if let Err(e) = self.backend.free_state(&mut self.state) {
            warn!("failed to free copy state: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::{cell::Cell, rc::Rc},
    };

    #[derive(Default)]
    struct Counters {
        allocs: Cell<usize>,
        frees: Cell<usize>,
        copies: Cell<usize>,
    }

    /// A facility whose copies always fail.
    struct FailingBackend {
        counters: Rc<Counters>,
        fail_alloc: bool,
    }

    impl CopyfileBackend for FailingBackend {
        type State = Option<usize>;

        fn alloc_state(&self) -> std::io::Result<Self::State> {
            if self.fail_alloc {
                return Err(std::io::Error::from_raw_os_error(libc::ENOMEM));
            }

            self.counters.allocs.set(self.counters.allocs.get() + 1);
            Ok(None)
        }

        fn set_state(&self, state: &mut Self::State, value: StateValue) -> std::io::Result<()> {
            match value {
                StateValue::StatusContext(value) => {
                    *state = Some(value);
                    Ok(())
                }
                _ => cvt(-1).map(|_| ()),
            }
        }

        fn get_state(&self, state: &Self::State, flag: StateFlag) -> std::io::Result<StateValue> {
            match flag {
                StateFlag::StatusContext => Ok(StateValue::StatusContext(state.unwrap_or(0))),
                StateFlag::Copied => Ok(StateValue::StatusContext(0)),
                StateFlag::StatusCallback => Ok(StateValue::StatusCallback(None)),
            }
        }

        fn copy(
            &self,
            _source: &Path,
            _destination: &Path,
            _state: &mut Self::State,
            _flags: CopyFlags,
        ) -> std::io::Result<()> {
            self.counters.copies.set(self.counters.copies.get() + 1);
            Err(std::io::Error::from_raw_os_error(libc::ENOSPC))
        }

        fn free_state(&self, _state: &mut Self::State) -> std::io::Result<()> {
            self.counters.frees.set(self.counters.frees.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn state_freed_once_after_failed_copy() {
        let counters = Rc::new(Counters::default());

        {
            let mut copy = ScopedCopy::with_backend(FailingBackend {
                counters: counters.clone(),
                fail_alloc: false,
            })
            .unwrap();

            match copy.copy("/nonexistent/a", "/nonexistent/b", CopyFlags::ALL) {
                Err(CodesignUtilError::Io(e)) => assert_eq!(e.raw_os_error(), Some(libc::ENOSPC)),
                other => panic!("unexpected result: {:?}", other),
            }
            assert!(copy.copy("/nonexistent/a", "/nonexistent/b", CopyFlags::DATA).is_err());

            assert_eq!(counters.frees.get(), 0);
        }

        assert_eq!(counters.allocs.get(), 1);
        assert_eq!(counters.copies.get(), 2);
        assert_eq!(counters.frees.get(), 1);
    }

    #[test]
    fn alloc_failure() {
        let counters = Rc::new(Counters::default());

        match ScopedCopy::with_backend(FailingBackend {
            counters: counters.clone(),
            fail_alloc: true,
        }) {
            Err(CodesignUtilError::Io(e)) => assert_eq!(e.raw_os_error(), Some(libc::ENOMEM)),
            Err(e) => panic!("unexpected error: {:?}", e),
            Ok(_) => panic!("allocation should have failed"),
        }

        assert_eq!(counters.frees.get(), 0);
    }

    #[test]
    fn get_reads_state() {
        let counters = Rc::new(Counters::default());
        let mut copy = ScopedCopy::with_backend(FailingBackend {
            counters,
            fail_alloc: false,
        })
        .unwrap();

        copy.set(StateValue::StatusContext(42)).unwrap();
        assert_eq!(
            copy.get(StateFlag::StatusContext).unwrap(),
            StateValue::StatusContext(42)
        );

        assert!(matches!(
            copy.set(StateValue::Copied(1)),
            Err(CodesignUtilError::Io(_))
        ));
        assert!(matches!(copy.copied(), Err(CodesignUtilError::Io(_))));
    }

    #[test]
    fn cvt_codes() {
        assert_eq!(cvt(0i32).unwrap(), 0);
        assert_eq!(cvt(17isize).unwrap(), 17);
        assert!(cvt(-1i32).is_err());
    }

    #[test]
    fn flag_values() {
        assert_eq!(CopyFlags::SECURITY.bits(), 0x3);
        assert_eq!(CopyFlags::METADATA.bits(), 0x7);
        assert_eq!(CopyFlags::ALL.bits(), 0xf);
        assert_eq!(CopyFlags::NOFOLLOW.bits(), 0xc0000);
        assert_eq!(StateFlag::Copied.as_raw(), 8);

        assert_eq!(CopyFlags::from_str("xattr").unwrap(), CopyFlags::XATTR);
        assert_eq!(CopyFlags::from_str("overwrite").unwrap(), CopyFlags::UNLINK);
        assert!(matches!(
            CopyFlags::from_str("bogus"),
            Err(CodesignUtilError::UnknownCopyFlag(_))
        ));
        assert_eq!(
            CopyFlags::from_strs(&["data", "xattr", "nofollow"]).unwrap(),
            CopyFlags::DATA | CopyFlags::XATTR | CopyFlags::NOFOLLOW
        );
    }

    #[test]
    fn raw_conversions() {
        assert_eq!(CopyWhat::from_raw(4), Some(CopyWhat::Data));
        assert_eq!(CopyWhat::from_raw(9), None);
        assert_eq!(CopyStage::from_raw(1), Some(CopyStage::Start));
        assert_eq!(CopyStage::from_raw(0), None);
        assert_eq!(StatusAction::Quit.as_raw(), 2);
    }

    #[test]
    fn state_value_equality() {
        let callback: StatusCallback = Arc::new(|_| StatusAction::Continue);
        let other: StatusCallback = Arc::new(|_| StatusAction::Continue);

        assert_eq!(
            StateValue::StatusCallback(Some(callback.clone())),
            StateValue::StatusCallback(Some(callback.clone()))
        );
        assert_ne!(
            StateValue::StatusCallback(Some(callback)),
            StateValue::StatusCallback(Some(other))
        );
        assert_ne!(StateValue::Copied(1), StateValue::StatusContext(1));
        assert_eq!(StateValue::Copied(3).flag(), StateFlag::Copied);
    }
}
