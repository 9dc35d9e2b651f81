// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `copyfile(3)` from libSystem.

use {
    crate::copyfile::{
        cvt, CopyFlags, CopyStage, CopyStatus, CopyWhat, CopyfileBackend, StateFlag, StateValue,
        StatusAction, StatusCallback,
    },
    libc::{c_char, c_int, c_void},
    std::{
        ffi::{CStr, CString, OsStr},
        os::unix::ffi::OsStrExt,
        panic::AssertUnwindSafe,
        path::Path,
    },
};

#[allow(non_camel_case_types)]
type copyfile_state_t = *mut c_void;

#[allow(non_camel_case_types)]
type copyfile_callback_t = extern "C" fn(
    what: c_int,
    stage: c_int,
    state: copyfile_state_t,
    src: *const c_char,
    dst: *const c_char,
    ctx: *mut c_void,
) -> c_int;

extern "C" {
    fn copyfile_state_alloc() -> copyfile_state_t;
    fn copyfile_state_free(state: copyfile_state_t) -> c_int;
    fn copyfile_state_get(state: copyfile_state_t, flag: u32, dst: *mut c_void) -> c_int;
    fn copyfile_state_set(state: copyfile_state_t, flag: u32, src: *const c_void) -> c_int;
    fn copyfile(
        from: *const c_char,
        to: *const c_char,
        state: copyfile_state_t,
        flags: u32,
    ) -> c_int;
}

/// Values the status trampoline needs. Boxed so its address is stable.
#[derive(Default)]
struct Hooks {
    callback: Option<StatusCallback>,
    context: usize,
}

/// Copy state of [AppleCopyfile].
pub struct AppleState {
    raw: copyfile_state_t,
    hooks: Box<Hooks>,
}

// The raw state is only touched through the owning value.
unsafe impl Send for AppleState {}

/// The operating system's `copyfile(3)`.
#[derive(Clone, Copy, Debug, Default)]
pub struct AppleCopyfile;

fn c_path(path: &Path) -> std::io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
}

fn c_str_path<'a>(value: *const c_char) -> &'a Path {
    if value.is_null() {
        Path::new("")
    } else {
        Path::new(OsStr::from_bytes(unsafe { CStr::from_ptr(value) }.to_bytes()))
    }
}

extern "C" fn status_trampoline(
    what: c_int,
    stage: c_int,
    _state: copyfile_state_t,
    src: *const c_char,
    dst: *const c_char,
    ctx: *mut c_void,
) -> c_int {
    if ctx.is_null() {
        return StatusAction::Continue.as_raw();
    }

    let hooks = unsafe { &*(ctx as *const Hooks) };

    let callback = match &hooks.callback {
        Some(callback) => callback,
        None => return StatusAction::Continue.as_raw(),
    };

    let (what, stage) = match (CopyWhat::from_raw(what), CopyStage::from_raw(stage)) {
        (Some(what), Some(stage)) => (what, stage),
        _ => return StatusAction::Continue.as_raw(),
    };

    let status = CopyStatus {
        what,
        stage,
        source: c_str_path(src),
        destination: c_str_path(dst),
        context: hooks.context,
    };

    // Unwinding into C is undefined.
    std::panic::catch_unwind(AssertUnwindSafe(|| callback(&status)))
        .unwrap_or(StatusAction::Quit)
        .as_raw()
}

impl CopyfileBackend for AppleCopyfile {
    type State = AppleState;

    fn alloc_state(&self) -> std::io::Result<Self::State> {
        let raw = unsafe { copyfile_state_alloc() };

        if raw.is_null() {
            return Err(std::io::Error::last_os_error());
        }

        let hooks = Box::new(Hooks::default());

        let mut state = AppleState { raw, hooks };

        let callback: copyfile_callback_t = status_trampoline;
        let ctx = &*state.hooks as *const Hooks as *const c_void;

        let res = cvt(unsafe {
            copyfile_state_set(
                state.raw,
                StateFlag::StatusContext.as_raw(),
                ctx,
            )
        })
        .and_then(|_| {
            cvt(unsafe {
                copyfile_state_set(
                    state.raw,
                    StateFlag::StatusCallback.as_raw(),
                    callback as *const c_void,
                )
            })
        });

        if let Err(e) = res {
            // Free errors are secondary to the original failure.
            let _ = self.free_state(&mut state);
            return Err(e);
        }

        Ok(state)
    }

    fn set_state(&self, state: &mut Self::State, value: StateValue) -> std::io::Result<()> {
        match value {
            StateValue::StatusCallback(callback) => state.hooks.callback = callback,
            StateValue::StatusContext(context) => state.hooks.context = context,
            StateValue::Copied(copied) => {
                let copied = copied as libc::off_t;
                cvt(unsafe {
                    copyfile_state_set(
                        state.raw,
                        StateFlag::Copied.as_raw(),
                        &copied as *const libc::off_t as *const c_void,
                    )
                })?;
            }
        }

        Ok(())
    }

    fn get_state(&self, state: &Self::State, flag: StateFlag) -> std::io::Result<StateValue> {
        Ok(match flag {
            StateFlag::StatusCallback => StateValue::StatusCallback(state.hooks.callback.clone()),
            StateFlag::StatusContext => StateValue::StatusContext(state.hooks.context),
            StateFlag::Copied => {
                let mut copied: libc::off_t = 0;
                cvt(unsafe {
                    copyfile_state_get(
                        state.raw,
                        flag.as_raw(),
                        &mut copied as *mut libc::off_t as *mut c_void,
                    )
                })?;

                StateValue::Copied(copied as u64)
            }
        })
    }

    fn copy(
        &self,
        source: &Path,
        destination: &Path,
        state: &mut Self::State,
        flags: CopyFlags,
    ) -> std::io::Result<()> {
        let source = c_path(source)?;
        let destination = c_path(destination)?;

        cvt(unsafe { copyfile(source.as_ptr(), destination.as_ptr(), state.raw, flags.bits()) })?;

        Ok(())
    }

    fn free_state(&self, state: &mut Self::State) -> std::io::Result<()> {
        if state.raw.is_null() {
            return Ok(());
        }

        let raw = std::mem::replace(&mut state.raw, std::ptr::null_mut());

        cvt(unsafe { copyfile_state_free(raw) })?;

        Ok(())
    }
}
