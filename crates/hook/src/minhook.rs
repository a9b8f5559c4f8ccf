use core::ffi::c_void;
use std::sync::OnceLock;

use tracing::{debug, trace, warn};

use crate::{DetourError, DetourResult, HookOp, HookService, HookTransaction};

static INIT: OnceLock<Result<(), i32>> = OnceLock::new();

/// MinHook entry points returning the raw status code on failure.
#[cfg(target_arch = "x86_64")]
mod ffi {
    use core::ffi::c_void;

    use min_hook_rs::HookError;

    pub fn initialize() -> Result<(), i32> {
        match min_hook_rs::initialize() {
            Ok(()) | Err(HookError::AlreadyInitialized) => Ok(()),
            Err(err) => Err(err as i32),
        }
    }

    pub unsafe fn create_hook(target: *mut c_void, detour: *mut c_void) -> Result<*mut c_void, i32> {
        min_hook_rs::create_hook(target, detour).map_err(|err| err as i32)
    }

    pub unsafe fn remove_hook(target: *mut c_void) -> Result<(), i32> {
        min_hook_rs::remove_hook(target).map_err(|err| err as i32)
    }

    pub unsafe fn queue_enable_hook(target: *mut c_void) -> Result<(), i32> {
        min_hook_rs::queue_enable_hook(target).map_err(|err| err as i32)
    }

    pub unsafe fn queue_disable_hook(target: *mut c_void) -> Result<(), i32> {
        min_hook_rs::queue_disable_hook(target).map_err(|err| err as i32)
    }

    pub fn apply_queued() -> Result<(), i32> {
        min_hook_rs::apply_queued().map_err(|err| err as i32)
    }
}

#[cfg(target_arch = "x86")]
mod ffi {
    use core::{ffi::c_void, ptr};

    use minhook_sys::{
        MH_ApplyQueued, MH_CreateHook, MH_ERROR_ALREADY_INITIALIZED, MH_Initialize, MH_OK,
        MH_QueueDisableHook, MH_QueueEnableHook, MH_RemoveHook,
    };

    #[inline]
    fn status(code: i32) -> Result<(), i32> {
        if code == MH_OK { Ok(()) } else { Err(code) }
    }

    pub fn initialize() -> Result<(), i32> {
        match unsafe { MH_Initialize() } {
            MH_ERROR_ALREADY_INITIALIZED => Ok(()),
            code => status(code),
        }
    }

    pub unsafe fn create_hook(target: *mut c_void, detour: *mut c_void) -> Result<*mut c_void, i32> {
        let mut original = ptr::null_mut();
        status(unsafe { MH_CreateHook(target, detour, &mut original) })?;
        Ok(original)
    }

    pub unsafe fn remove_hook(target: *mut c_void) -> Result<(), i32> {
        status(unsafe { MH_RemoveHook(target) })
    }

    pub unsafe fn queue_enable_hook(target: *mut c_void) -> Result<(), i32> {
        status(unsafe { MH_QueueEnableHook(target) })
    }

    pub unsafe fn queue_disable_hook(target: *mut c_void) -> Result<(), i32> {
        status(unsafe { MH_QueueDisableHook(target) })
    }

    pub fn apply_queued() -> Result<(), i32> {
        status(unsafe { MH_ApplyQueued() })
    }
}

/// [`HookService`] backed by MinHook.
///
/// MinHook suspends every other thread of the process while queued hooks are
/// applied, and relocates their instruction pointers out of rewritten code.
#[derive(Debug)]
pub struct MinHookService {
    _priv: (),
}

impl MinHookService {
    #[tracing::instrument]
    pub fn new() -> DetourResult<Self> {
        match *INIT.get_or_init(ffi::initialize) {
            Ok(()) => Ok(Self { _priv: () }),
            Err(code) => Err(DetourError::new(HookOp::Begin, code)),
        }
    }
}

impl HookService for MinHookService {
    type Transaction = MinHookTransaction;

    fn begin(&self) -> DetourResult<MinHookTransaction> {
        trace!("transaction begin");
        Ok(MinHookTransaction {
            created: Vec::new(),
            detached: Vec::new(),
            finished: false,
        })
    }
}

/// A pending MinHook transaction.
#[derive(Debug)]
pub struct MinHookTransaction {
    created: Vec<usize>,
    detached: Vec<usize>,
    finished: bool,
}

impl MinHookTransaction {
    fn rollback(&mut self) {
        self.finished = true;

        for target in self.created.drain(..) {
            if let Err(code) = unsafe { ffi::remove_hook(target as *mut c_void) } {
                warn!("failed to remove staged hook {target:#x}. code: {code}");
            }
        }

        // re-queue the current (enabled) state so a later apply does not pick it up
        for target in self.detached.drain(..) {
            if let Err(code) = unsafe { ffi::queue_enable_hook(target as *mut c_void) } {
                warn!("failed to unqueue detach of {target:#x}. code: {code}");
            }
        }
    }
}

impl HookTransaction for MinHookTransaction {
    fn update_thread(&mut self, thread_id: u32) -> DetourResult<()> {
        // every thread is frozen by apply, nothing to enlist
        trace!("thread {thread_id} covered by apply");
        Ok(())
    }

    unsafe fn attach(&mut self, target: usize, detour: usize) -> DetourResult<usize> {
        let trampoline = wrap_detour_call(HookOp::Attach, || unsafe {
            ffi::create_hook(target as *mut c_void, detour as *mut c_void)
        })?;
        self.created.push(target);

        wrap_detour_call(HookOp::Attach, || unsafe {
            ffi::queue_enable_hook(target as *mut c_void)
        })?;
        trace!("staged {target:#x} -> {detour:#x}");

        Ok(trampoline as usize)
    }

    unsafe fn detach(&mut self, target: usize) -> DetourResult<()> {
        wrap_detour_call(HookOp::Detach, || unsafe {
            ffi::queue_disable_hook(target as *mut c_void)
        })?;
        self.detached.push(target);

        Ok(())
    }

    fn commit(mut self) -> DetourResult<()> {
        if let Err(err) = wrap_detour_call(HookOp::Commit, ffi::apply_queued) {
            self.rollback();
            return Err(err);
        }

        for target in self.detached.drain(..) {
            if let Err(code) = unsafe { ffi::remove_hook(target as *mut c_void) } {
                warn!("failed to free detached hook {target:#x}. code: {code}");
            }
        }
        self.created.clear();
        self.finished = true;
        debug!("transaction committed");

        Ok(())
    }

    fn abort(mut self) {
        debug!("transaction aborted");
        self.rollback();
    }
}

impl Drop for MinHookTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.rollback();
        }
    }
}

/// Wrap a MinHook call and convert its status to [`DetourError`].
#[inline]
fn wrap_detour_call<T>(op: HookOp, f: impl FnOnce() -> Result<T, i32>) -> DetourResult<T> {
    f().map_err(|code| DetourError::new(op, code))
}
