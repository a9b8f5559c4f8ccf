//! Interceptors installed into the host process.
//!
//! A single bootstrap interceptor on `CreateMutexA` is installed from
//! `DllMain`. The host creates its single instance mutex early on its UI
//! thread, which is where the engine starts and installs everything else.

mod gdi;
mod host;
mod scroll;
mod user;
mod wndproc;

use core::sync::atomic::{AtomicBool, Ordering};
use std::{
    ffi::CString,
    sync::{Arc, Once},
};

use anyhow::Context;
use parking_lot::Mutex;
use reskin_hook::MinHookService;
use tracing::{debug, error, trace, warn};
use windows::{
    Win32::{
        Foundation::HANDLE,
        Security::SECURITY_ATTRIBUTES,
        System::LibraryLoader::{GetModuleHandleW, GetProcAddress},
        UI::WindowsAndMessaging::{MB_ICONERROR, MB_OK, MessageBoxW},
    },
    core::{BOOL, HSTRING, PCSTR, PCWSTR, w},
};

use crate::{
    config::UserDirs,
    engine::{Engine, Lifecycle, load_settings},
    registry::{InterceptorSlot, Registry},
    renderer::d2d::D2dCompositor,
};

type HostEngine = Engine<D2dCompositor>;

static ENGINE: Lifecycle<HostEngine> = Lifecycle::new();
static REGISTRY: Mutex<Option<Registry<MinHookService>>> = Mutex::new(None);

static STARTED: AtomicBool = AtomicBool::new(false);
static FATAL: Once = Once::new();

static CREATE_MUTEX_A: InterceptorSlot = InterceptorSlot::new("CreateMutexA");

type CreateMutexAFn =
    unsafe extern "system" fn(*const SECURITY_ATTRIBUTES, BOOL, PCSTR) -> HANDLE;

const KERNEL32: PCWSTR = w!("kernel32.dll");
const USER32: PCWSTR = w!("user32.dll");
const GDI32: PCWSTR = w!("gdi32.dll");

/// Engine of the running host, `None` before startup and after shutdown.
#[inline]
fn engine() -> Option<Arc<HostEngine>> {
    ENGINE.get()
}

/// Install the bootstrap interceptor.
#[tracing::instrument]
pub fn install() -> anyhow::Result<()> {
    let mut registry = REGISTRY.lock();
    if registry.is_some() {
        anyhow::bail!("already installed");
    }

    let service = MinHookService::new().context("cannot initialize hook service")?;
    let registry = registry.insert(Registry::new(service));

    registry.register(
        &CREATE_MUTEX_A,
        resolve(KERNEL32, &CREATE_MUTEX_A)?,
        hooked_create_mutex_a as usize,
    );
    registry
        .commit("bootstrap")
        .context("cannot install bootstrap interceptor")?;

    Ok(())
}

/// Remove every interceptor and drop the engine.
#[tracing::instrument]
pub fn uninstall() {
    if let Some(registry) = REGISTRY.lock().as_ref() {
        if let Err(err) = registry.detach_all() {
            error!("cannot remove interceptors. err: {err}");
        }
    }

    if ENGINE.shutdown().is_some() {
        debug!("engine shut down");
    }
}

/// Address of export `slot.name()` in the already loaded `module`.
fn resolve(module: PCWSTR, slot: &InterceptorSlot) -> anyhow::Result<usize> {
    let symbol = CString::new(slot.name())?;

    unsafe {
        let module = GetModuleHandleW(module)
            .with_context(|| format!("module of {} not loaded", slot.name()))?;
        let address = GetProcAddress(module, PCSTR(symbol.as_ptr().cast()))
            .with_context(|| format!("{} not exported", slot.name()))?;

        Ok(address as usize)
    }
}

/// Report a startup failure to the user, once per process.
fn fatal(err: &anyhow::Error) {
    FATAL.call_once(|| {
        let text = HSTRING::from(format!(
            "Reskin could not start and is disabled for this session.\n\n{err:#}"
        ));

        unsafe {
            MessageBoxW(None, &text, w!("Reskin"), MB_OK | MB_ICONERROR);
        }
    });
}

#[tracing::instrument]
fn start() -> anyhow::Result<()> {
    let flavor = host::detect_flavor().context("cannot detect host flavor")?;
    debug!("host flavor: {flavor}");

    let dirs = UserDirs::locate()?;
    let (config, theme) = load_settings(&dirs, flavor);
    let themed = theme.is_some();

    let compositor = D2dCompositor::new().context("cannot create compositor")?;
    if !ENGINE.start(Engine::new(flavor, config, theme, compositor)) {
        warn!("engine already started");
        return Ok(());
    }

    let mut registry = REGISTRY.lock();
    let Some(registry) = registry.as_mut() else {
        ENGINE.shutdown();
        anyhow::bail!("interceptor registry missing");
    };

    let always_on = user::register(registry)
        .and_then(|()| {
            wndproc::register(registry);
            registry.commit("always-on").map_err(Into::into)
        })
        .context("cannot install window interceptors");
    if let Err(err) = always_on {
        ENGINE.shutdown();
        return Err(err);
    }

    if themed {
        let theme = gdi::register(registry)
            .and_then(|()| registry.commit("theme").map_err(Into::into));
        if let Err(err) = theme {
            error!("theme interceptors unavailable, theming disabled. err: {err:?}");
        }
    }

    debug!("engine started");
    Ok(())
}

#[tracing::instrument(skip_all)]
extern "system" fn hooked_create_mutex_a(
    attributes: *const SECURITY_ATTRIBUTES,
    initial_owner: BOOL,
    name: PCSTR,
) -> HANDLE {
    trace!("CreateMutexA called");

    if !STARTED.swap(true, Ordering::AcqRel) {
        if let Err(err) = start() {
            error!("startup failed. err: {err:?}");
            fatal(&err);
        }
    }

    unsafe { CREATE_MUTEX_A.wait_fn::<CreateMutexAFn>()(attributes, initial_owner, name) }
}
