//! Main window size persistence.

use tracing::{debug, warn};

use crate::{config::ConfigProvider, geometry::Size, theme::flavor::Flavor};

/// Storage for the last main window client size of each flavor.
pub trait SizeStore {
    /// Stored size, `None` if nothing was stored yet.
    fn load(&self, flavor: Flavor) -> anyhow::Result<Option<Size>>;

    fn save(&self, flavor: Flavor, size: Size) -> anyhow::Result<()>;
}

/// Size the main window should start at instead of its logical size.
///
/// Restoring is on unless configured off. Stored sizes outside
/// `(0, logical]` are ignored.
pub fn restored_size(
    store: &impl SizeStore,
    config: &impl ConfigProvider,
    flavor: Flavor,
    logical: Size,
) -> Option<Size> {
    if !config.restore_size().unwrap_or(true) {
        return None;
    }

    let size = match store.load(flavor) {
        Ok(size) => size?,
        Err(err) => {
            warn!("cannot load window size. err: {err:?}");
            return None;
        }
    };

    if !size.fits_within(logical) {
        warn!("ignoring stored window size {size:?} outside {logical:?}");
        return None;
    }

    debug!("restoring window size {size:?}");
    Some(size)
}

/// Store `current` if it lies within `(0, logical]`.
pub fn persist_size(store: &impl SizeStore, flavor: Flavor, current: Size, logical: Size) {
    if !current.fits_within(logical) {
        debug!("not storing window size {current:?}");
        return;
    }

    if let Err(err) = store.save(flavor, current) {
        warn!("cannot save window size. err: {err:?}");
    }
}

#[cfg(windows)]
mod registry {
    use anyhow::Context;
    use windows::{
        Win32::{
            Foundation::ERROR_FILE_NOT_FOUND,
            System::Registry::{HKEY_CURRENT_USER, REG_DWORD, RRF_RT_REG_DWORD, RegGetValueW, RegSetKeyValueW},
        },
        core::{HSTRING, PCWSTR, w},
    };

    use super::SizeStore;
    use crate::{geometry::Size, theme::flavor::Flavor};

    const WIDTH_VALUE: PCWSTR = w!("window_size_width");
    const HEIGHT_VALUE: PCWSTR = w!("window_size_height");

    /// [`SizeStore`] under `HKCU\VB-Audio\Reskin\<flavor>`.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct RegistryStore;

    impl RegistryStore {
        fn sub_key(flavor: Flavor) -> HSTRING {
            HSTRING::from(format!(r"VB-Audio\Reskin\{}", flavor.key_name()))
        }

        fn read(sub_key: &HSTRING, value: PCWSTR) -> anyhow::Result<Option<u32>> {
            let mut data = 0_u32;
            let mut len = size_of::<u32>() as u32;

            let res = unsafe {
                RegGetValueW(
                    HKEY_CURRENT_USER,
                    sub_key,
                    value,
                    RRF_RT_REG_DWORD,
                    None,
                    Some((&raw mut data).cast()),
                    Some(&mut len),
                )
            };
            if res == ERROR_FILE_NOT_FOUND {
                return Ok(None);
            }
            res.ok().context("cannot read registry value")?;

            Ok(Some(data))
        }

        fn write(sub_key: &HSTRING, value: PCWSTR, data: u32) -> anyhow::Result<()> {
            unsafe {
                RegSetKeyValueW(
                    HKEY_CURRENT_USER,
                    sub_key,
                    value,
                    REG_DWORD.0,
                    Some((&raw const data).cast()),
                    size_of::<u32>() as u32,
                )
            }
            .ok()
            .context("cannot write registry value")
        }
    }

    impl SizeStore for RegistryStore {
        fn load(&self, flavor: Flavor) -> anyhow::Result<Option<Size>> {
            let sub_key = Self::sub_key(flavor);

            let Some(width) = Self::read(&sub_key, WIDTH_VALUE)? else {
                return Ok(None);
            };
            let Some(height) = Self::read(&sub_key, HEIGHT_VALUE)? else {
                return Ok(None);
            };

            Ok(Some(Size::new(
                i32::try_from(width).unwrap_or(0),
                i32::try_from(height).unwrap_or(0),
            )))
        }

        fn save(&self, flavor: Flavor, size: Size) -> anyhow::Result<()> {
            let sub_key = Self::sub_key(flavor);
            Self::write(&sub_key, WIDTH_VALUE, size.width as u32)?;
            Self::write(&sub_key, HEIGHT_VALUE, size.height as u32)?;

            Ok(())
        }
    }
}

#[cfg(windows)]
pub use registry::RegistryStore;
