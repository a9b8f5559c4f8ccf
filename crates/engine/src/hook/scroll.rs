use core::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace, warn};

use super::HostEngine;
use crate::{config::ConfigProvider, patch::ProcessCode, scan::ImageRegion};

#[cfg(target_arch = "x86_64")]
use anyhow::Context;
#[cfg(target_arch = "x86_64")]
use windows::Win32::{
    Foundation::HWND,
    UI::Input::KeyboardAndMouse::{GetAsyncKeyState, VK_SHIFT},
};

#[cfg(target_arch = "x86_64")]
use super::{REGISTRY, engine};
#[cfg(target_arch = "x86_64")]
use crate::{patch::scroll::HandlerPatch, registry::InterceptorSlot};

#[cfg(target_arch = "x86")]
use crate::patch::scroll::{OperandPatch, StepCell};

static ATTEMPTED: AtomicBool = AtomicBool::new(false);

#[cfg(target_arch = "x86_64")]
static SCROLL_HANDLER: InterceptorSlot = InterceptorSlot::new("scroll handler");

#[cfg(target_arch = "x86_64")]
type ScrollHandlerFn = unsafe extern "system" fn(*mut u64, HWND, u32, u32, u32);

/// Read by both patched `fmul` instructions.
#[cfg(target_arch = "x86")]
static STEP: StepCell = StepCell::new(1.0);

/// Replace the host wheel step multiplier with the configured one.
///
/// Attempted once per process. Any verification failure leaves the host
/// untouched.
pub(super) fn install(engine: &HostEngine) {
    if ATTEMPTED.swap(true, Ordering::AcqRel) {
        return;
    }

    match apply_patch(engine) {
        Ok(true) => debug!("scroll step patch applied"),
        Ok(false) => trace!("no scroll step configured"),
        Err(err) => warn!("scroll step patch skipped. err: {err:?}"),
    }
}

#[cfg(target_arch = "x86_64")]
fn apply_patch(engine: &HostEngine) -> anyhow::Result<bool> {
    let config = engine.config();
    if config.fader_scroll_step().is_none() && config.fader_shift_scroll_step().is_none() {
        return Ok(false);
    }

    let image = unsafe { ImageRegion::host_module() }?;
    let patch = HandlerPatch::locate(&image)?;

    let mut code = unsafe { ProcessCode::new() };
    patch.apply(&mut code)?;

    // the handler is only redirected once both multiplies are gone
    let installed = REGISTRY
        .lock()
        .as_ref()
        .context("interceptor registry missing")
        .and_then(|registry| {
            Ok(registry.install(
                &SCROLL_HANDLER,
                patch.handler(),
                hooked_scroll_handler as usize,
            )?)
        });

    if let Err(err) = installed {
        patch
            .revert(&mut code)
            .context("cannot restore scroll handler")?;
        return Err(err);
    }

    Ok(true)
}

#[cfg(target_arch = "x86")]
fn apply_patch(engine: &HostEngine) -> anyhow::Result<bool> {
    let Some(step) = engine.config().fader_scroll_step() else {
        return Ok(false);
    };

    let image = unsafe { ImageRegion::host_module() }?;
    let patch = OperandPatch::locate(&image, engine.flavor())?;

    STEP.set(f64::from(step));
    patch.apply(&mut unsafe { ProcessCode::new() }, STEP.address())?;

    Ok(true)
}

#[cfg(target_arch = "x86_64")]
#[tracing::instrument(skip_all)]
extern "system" fn hooked_scroll_handler(
    state: *mut u64,
    hwnd: HWND,
    x: u32,
    y: u32,
    step: u32,
) {
    trace!("scroll handler called");

    let modifier = unsafe { GetAsyncKeyState(i32::from(VK_SHIFT.0)) } as u16 & 0x8000 != 0;
    let step = engine().map_or(step, |engine| engine.scroll_step(step, modifier));

    unsafe { SCROLL_HANDLER.wait_fn::<ScrollHandlerFn>()(state, hwnd, x, y, step) }
}
