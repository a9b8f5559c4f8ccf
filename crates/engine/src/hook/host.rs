use core::{ffi::c_void, ptr, slice};

use anyhow::{Context, bail};
use tracing::debug;
use windows::{
    Win32::{Foundation::MAX_PATH, System::LibraryLoader::GetModuleFileNameW},
    core::{BOOL, PCWSTR, w},
};

use crate::theme::flavor::Flavor;

#[cfg_attr(
    not(target_arch = "x86"),
    link(name = "version.dll", kind = "raw-dylib", modifiers = "+verbatim")
)]
#[cfg_attr(
    target_arch = "x86",
    link(
        name = "version.dll",
        kind = "raw-dylib",
        modifiers = "+verbatim",
        import_name_type = "undecorated"
    )
)]
unsafe extern "system" {
    fn GetFileVersionInfoSizeW(filename: PCWSTR, handle: *mut u32) -> u32;
    fn GetFileVersionInfoW(filename: PCWSTR, handle: u32, len: u32, data: *mut c_void) -> BOOL;
    fn VerQueryValueW(
        block: *const c_void,
        sub_block: PCWSTR,
        buffer: *mut *mut c_void,
        len: *mut u32,
    ) -> BOOL;
}

const PRODUCT_NAME: PCWSTR = w!(r"\StringFileInfo\000004b0\ProductName");

/// Flavor of the host executable, from its version resource product name.
#[tracing::instrument]
pub fn detect_flavor() -> anyhow::Result<Flavor> {
    let name = product_name()?;
    debug!("host product name: {name}");

    match Flavor::from_product_name(&name) {
        Some(flavor) => Ok(flavor),
        None => bail!("unsupported host `{name}`"),
    }
}

fn product_name() -> anyhow::Result<String> {
    let mut path = [0u16; MAX_PATH as usize];
    let len = unsafe { GetModuleFileNameW(None, &mut path) } as usize;
    if len == 0 || len >= path.len() {
        bail!("cannot get host executable path");
    }
    let path = PCWSTR(path.as_ptr());

    unsafe {
        let size = GetFileVersionInfoSizeW(path, ptr::null_mut());
        if size == 0 {
            bail!("host executable has no version resource");
        }

        let mut block = vec![0u8; size as usize];
        GetFileVersionInfoW(path, 0, size, block.as_mut_ptr().cast())
            .ok()
            .context("cannot read version resource")?;

        let mut value = ptr::null_mut();
        let mut value_len = 0;
        VerQueryValueW(block.as_ptr().cast(), PRODUCT_NAME, &mut value, &mut value_len)
            .ok()
            .context("version resource has no product name")?;
        if value.is_null() {
            bail!("version resource has no product name");
        }

        let chars = slice::from_raw_parts(value.cast::<u16>(), value_len as usize);
        let chars = chars.split(|&c| c == 0).next().unwrap_or_default();

        Ok(String::from_utf16_lossy(chars))
    }
}
