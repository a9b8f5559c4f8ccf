use core::{ffi::c_void, ptr};

use scopeguard::defer;
use tracing::{error, trace};
use windows::Win32::System::{
    Diagnostics::Debug::FlushInstructionCache,
    Memory::{PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS, VirtualProtect},
    Threading::GetCurrentProcess,
};

use super::CodeWriter;
use crate::error::{EngineError, Result};

/// [`CodeWriter`] over the code pages of the current process.
#[derive(Debug)]
pub struct ProcessCode {
    _priv: (),
}

impl ProcessCode {
    /// # Safety
    /// Every address written through this writer must belong to code no thread
    /// is executing during the write.
    pub const unsafe fn new() -> Self {
        Self { _priv: () }
    }
}

impl CodeWriter for ProcessCode {
    #[tracing::instrument(skip(self, bytes), fields(len = bytes.len()))]
    fn write(&mut self, address: usize, bytes: &[u8]) -> Result<()> {
        let target = address as *mut c_void;
        let mut old = PAGE_PROTECTION_FLAGS(0);

        unsafe {
            VirtualProtect(target, bytes.len(), PAGE_EXECUTE_READWRITE, &mut old).map_err(
                |err| {
                    error!("VirtualProtect failed. err: {err:?}");
                    EngineError::Patch {
                        address,
                        len: bytes.len(),
                        reason: "page protection change failed",
                    }
                },
            )?;
            defer!({
                let mut unused = PAGE_PROTECTION_FLAGS(0);
                if let Err(err) = VirtualProtect(target, bytes.len(), old, &mut unused) {
                    error!("failed to restore page protection at {address:#x}. err: {err:?}");
                }
            });

            ptr::copy_nonoverlapping(bytes.as_ptr(), target.cast::<u8>(), bytes.len());

            if let Err(err) = FlushInstructionCache(GetCurrentProcess(), Some(target), bytes.len())
            {
                error!("FlushInstructionCache failed. err: {err:?}");
            }
        }
        trace!("wrote {} byte(s) at {address:#x}", bytes.len());

        Ok(())
    }
}
