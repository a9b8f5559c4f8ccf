//! Replacement window procedures of managed windows.

use reskin_hook::MinHookService;
use tracing::{debug, error, trace, warn};
use windows::{
    Win32::{
        Foundation::{HWND, LPARAM, LRESULT, RECT, WPARAM},
        UI::{
            Shell::ShellExecuteW,
            WindowsAndMessaging::{
                CREATESTRUCTA, HTBOTTOMRIGHT, HTCAPTION, HTCLIENT, SW_SHOWNORMAL, SWP_NOREDRAW,
                WM_ERASEBKGND, WM_PAINT, WM_TIMER, WMSZ_BOTTOMRIGHT,
            },
        },
    },
    core::{BOOL, HSTRING, PCWSTR, w},
};

use super::{
    HostEngine, REGISTRY, engine, scroll,
    user::{self, map_screen_point, screen_to_client, window_id},
};
use crate::{
    geometry::{HitZone, Point, Rect, Size},
    persist::{self, RegistryStore},
    registry::{Discovery, InterceptorSlot, LateOutcome, LateTarget, Registry},
    window::{
        WindowId,
        kind::{MAIN_CLASS, WindowKind},
        manager::ChildLayout,
        route::{CHILD_TIMER_INTERVAL, MessageKind, Route, UI_TIMER_ID, route},
    },
};

#[cfg_attr(
    not(target_arch = "x86"),
    link(name = "user32.dll", kind = "raw-dylib", modifiers = "+verbatim")
)]
#[cfg_attr(
    target_arch = "x86",
    link(
        name = "user32.dll",
        kind = "raw-dylib",
        modifiers = "+verbatim",
        import_name_type = "undecorated"
    )
)]
unsafe extern "system" {
    fn SendMessageW(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT;
    fn MoveWindow(hwnd: HWND, x: i32, y: i32, width: i32, height: i32, repaint: BOOL) -> BOOL;
}

static MAIN_PROC: InterceptorSlot = InterceptorSlot::new("main window procedure");
static APP_VOLUME_PROC: InterceptorSlot = InterceptorSlot::new("app volume window procedure");
static COMPRESSOR_PROC: InterceptorSlot = InterceptorSlot::new("compressor window procedure");
static DENOISER_PROC: InterceptorSlot = InterceptorSlot::new("denoiser window procedure");

type MainProcFn = unsafe extern "system" fn(HWND, u32, WPARAM, LPARAM) -> LRESULT;
/// Panel procedures are `cdecl` on x86.
type ChildProcFn = unsafe extern "C" fn(HWND, u32, WPARAM, LPARAM, u64) -> LRESULT;

/// Drag state bit of mouse message `WPARAM`.
const MK_LBUTTON: usize = 0x0001;

/// Declare the window procedures to hook once the host reveals them.
pub(super) fn register(registry: &mut Registry<MinHookService>) {
    registry.register_late(LateTarget::new(&MAIN_PROC, main_proc as usize, MAIN_CLASS));

    let children: [(WindowKind, &'static InterceptorSlot, usize); 3] = [
        (WindowKind::AppVolume, &APP_VOLUME_PROC, app_volume_proc as usize),
        (WindowKind::Compressor, &COMPRESSOR_PROC, compressor_proc as usize),
        (WindowKind::Denoiser, &DENOISER_PROC, denoiser_proc as usize),
    ];

    for (kind, slot, replacement) in children {
        let mut target = LateTarget::new(slot, replacement, kind.class());
        if let Some(ids) = kind.ids() {
            target = target.with_ids(ids);
        }

        registry.register_late(target);
    }
}

/// Report a window procedure seen in a class registration or window creation.
pub(super) fn discover(class: &[u8], id: Option<u32>, address: usize) {
    let registry = REGISTRY.lock();
    let Some(registry) = registry.as_ref() else {
        return;
    };

    match registry.observe(&Discovery { class, id, address }) {
        LateOutcome::Installed(name) => debug!("{name} hooked at {address:#x}"),
        LateOutcome::Failed(name) => warn!("{name} left unmanaged"),
        LateOutcome::Duplicate(_) | LateOutcome::NotMatched => {}
    }
}

extern "system" fn main_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    let original = unsafe { MAIN_PROC.wait_fn::<MainProcFn>() };

    dispatch(WindowKind::Main, hwnd, msg, wparam, lparam, |msg, wparam, lparam| unsafe {
        original(hwnd, msg, wparam, lparam)
    })
}

extern "C" fn app_volume_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
    extra: u64,
) -> LRESULT {
    child_proc(&APP_VOLUME_PROC, WindowKind::AppVolume, hwnd, msg, wparam, lparam, extra)
}

extern "C" fn compressor_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
    extra: u64,
) -> LRESULT {
    child_proc(&COMPRESSOR_PROC, WindowKind::Compressor, hwnd, msg, wparam, lparam, extra)
}

extern "C" fn denoiser_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
    extra: u64,
) -> LRESULT {
    child_proc(&DENOISER_PROC, WindowKind::Denoiser, hwnd, msg, wparam, lparam, extra)
}

fn child_proc(
    slot: &InterceptorSlot,
    kind: WindowKind,
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
    extra: u64,
) -> LRESULT {
    let original = unsafe { slot.wait_fn::<ChildProcFn>() };

    dispatch(kind, hwnd, msg, wparam, lparam, |msg, wparam, lparam| unsafe {
        original(hwnd, msg, wparam, lparam, extra)
    })
}

#[tracing::instrument(skip(forward))]
fn dispatch(
    kind: WindowKind,
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
    forward: impl Fn(u32, WPARAM, LPARAM) -> LRESULT,
) -> LRESULT {
    let Some(engine) = engine() else {
        return forward(msg, wparam, lparam);
    };

    let id = window_id(hwnd);
    let route = route(kind, MessageKind::classify(msg, wparam.0));
    if route != Route::Create && !engine.manager().is_managed(id) {
        return forward(msg, wparam, lparam);
    }
    trace!("{} window message {msg:#x}: {route:?}", kind.name());

    let window = Window {
        engine: &engine,
        hwnd,
        id,
        kind,
        forward,
    };

    match route {
        Route::Create => window.create(msg, wparam, lparam),
        Route::Destroy => window.destroy(msg, wparam, lparam),
        Route::Sizing => window.sizing(wparam, lparam),
        Route::Size => window.size(msg, wparam, lparam),
        Route::Paint => window.paint(msg, wparam, lparam),
        Route::UiTimer => window.ui_timer(msg, wparam, lparam),
        Route::EraseBackground => window.erase_background(msg, wparam, lparam),
        Route::DisplayChange => window.display_change(lparam),
        Route::Pointer { render } => window.pointer(msg, wparam, lparam, render),
        Route::Move => window.pointer_move(msg, wparam, lparam),
        Route::Wheel => window.wheel(msg, wparam, lparam),
        Route::HitTest => window.hit_test(lparam),
        Route::VersionCommand => window.version_command(msg, wparam, lparam),
        Route::Forward => window.forward(msg, wparam, lparam),
    }
}

/// A managed window handling one message.
///
/// The render manager is only locked for the duration of single calls and
/// never while the host procedure runs.
struct Window<'a, F> {
    engine: &'a HostEngine,
    hwnd: HWND,
    id: WindowId,
    kind: WindowKind,
    forward: F,
}

impl<F: Fn(u32, WPARAM, LPARAM) -> LRESULT> Window<'_, F> {
    #[inline]
    fn forward(&self, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
        (self.forward)(msg, wparam, lparam)
    }

    fn is_main(&self) -> bool {
        self.kind == WindowKind::Main
    }

    fn render(&self) {
        if let Err(err) = self.engine.manager().render(self.id) {
            warn!("cannot render {} window. err: {err:?}", self.kind.name());
        }
    }

    /// Run the host UI refresh synchronously.
    fn refresh(&self) {
        unsafe {
            SendMessageW(self.hwnd, WM_TIMER, WPARAM(UI_TIMER_ID), LPARAM(0));
        }
    }

    fn scratch_dc(&self) -> Option<WPARAM> {
        self.engine.manager().scratch_dc(self.id).map(WPARAM)
    }

    fn to_logical(&self, lparam: LPARAM) -> LPARAM {
        let pt = Point::from_lparam(lparam.0);
        match self.engine.manager().to_logical(self.id, pt) {
            Some(pt) => LPARAM(pt.to_lparam()),
            None => lparam,
        }
    }

    fn create(&self, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
        let Some(cs) = (unsafe { (lparam.0 as *const CREATESTRUCTA).as_ref() }) else {
            return self.forward(msg, wparam, lparam);
        };
        let placement = Rect::new(cs.x, cs.y, cs.cx, cs.cy);

        let restored = if self.is_main() {
            persist::restored_size(
                &RegistryStore,
                self.engine.config(),
                self.engine.flavor(),
                placement.size(),
            )
        } else {
            None
        };

        let created = self
            .engine
            .manager()
            .create(self.id, self.kind, placement, restored);
        let rect = match created {
            Ok(rect) => rect,
            Err(err) => {
                error!(
                    "{} window stays unmanaged. err: {err}",
                    self.kind.name()
                );
                return self.forward(msg, wparam, lparam);
            }
        };

        if self.is_main() {
            let res = self.forward(msg, wparam, lparam);

            if restored.is_some()
                && !user::set_window_pos_unfiltered(
                    self.hwnd,
                    rect.x,
                    rect.y,
                    rect.width,
                    rect.height,
                    SWP_NOREDRAW.0,
                )
            {
                warn!("cannot apply restored size {:?}", rect.size());
            }

            scroll::install(self.engine);
            return res;
        }

        user::set_timer_unfiltered(self.hwnd, UI_TIMER_ID, CHILD_TIMER_INTERVAL);
        move_window(self.hwnd, rect);
        self.forward(msg, wparam, lparam)
    }

    fn destroy(&self, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
        if !self.is_main() {
            let res = self.forward(msg, wparam, lparam);
            self.engine.manager().destroy(self.id);
            return res;
        }

        let sizes = self.engine.manager().destroy(self.id);
        if let Some((current, logical)) = sizes {
            persist::persist_size(&RegistryStore, self.engine.flavor(), current, logical);
        }

        self.forward(msg, wparam, lparam)
    }

    fn sizing(&self, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
        if wparam.0 != WMSZ_BOTTOMRIGHT as usize {
            return LRESULT(0);
        }
        let Some(rect) = (unsafe { (lparam.0 as *mut RECT).as_mut() }) else {
            return LRESULT(0);
        };

        let Some(size) = self
            .engine
            .manager()
            .sizing(self.id, rect.right - rect.left)
        else {
            return LRESULT(0);
        };
        rect.right = rect.left + size.width;
        rect.bottom = rect.top + size.height;

        self.resize(size);
        self.refresh();
        LRESULT(1)
    }

    fn size(&self, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
        let [width, height] = bytemuck::cast::<u32, [u16; 2]>(lparam.0 as u32);
        self.resize(Size::new(width.into(), height.into()));

        self.forward(msg, wparam, lparam)
    }

    fn resize(&self, size: Size) {
        let layouts = self.engine.manager().resize(self.id, size);
        match layouts {
            Ok(layouts) => {
                for ChildLayout { window, rect } in layouts {
                    move_window(HWND(window as _), rect);
                }
            }
            Err(err) => error!("cannot resize main window to {size:?}. err: {err:?}"),
        }
    }

    fn paint(&self, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
        let res = self.forward(msg, wparam, lparam);
        if self.is_main() {
            self.refresh();
        }

        self.render();
        res
    }

    fn ui_timer(&self, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
        if !self.is_main() {
            self.render();
            return LRESULT(0);
        }

        let res = self.forward(msg, wparam, lparam);
        self.render();
        res
    }

    fn erase_background(&self, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
        let dc = self.scratch_dc().unwrap_or(wparam);
        let res = self.forward(msg, dc, lparam);

        if self.is_main() { LRESULT(1) } else { res }
    }

    fn display_change(&self, lparam: LPARAM) -> LRESULT {
        if let Some(dc) = self.scratch_dc() {
            unsafe {
                SendMessageW(self.hwnd, WM_ERASEBKGND, dc, lparam);
                SendMessageW(self.hwnd, WM_PAINT, WPARAM(0), LPARAM(0));
            }
        }

        LRESULT(0)
    }

    fn pointer(&self, msg: u32, wparam: WPARAM, lparam: LPARAM, render: bool) -> LRESULT {
        let res = self.forward(msg, wparam, self.to_logical(lparam));
        if render {
            self.render();
        }

        res
    }

    fn pointer_move(&self, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
        let res = self.forward(msg, wparam, self.to_logical(lparam));

        if wparam.0 & MK_LBUTTON != 0 {
            if self.is_main() {
                self.refresh();
            } else {
                self.render();
            }
        }

        res
    }

    fn wheel(&self, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
        let pt = map_screen_point(self.hwnd, Point::from_lparam(lparam.0), |pt| {
            self.engine.manager().to_logical(self.id, pt)
        });

        let res = self.forward(msg, wparam, LPARAM(pt.to_lparam()));
        self.render();
        res
    }

    fn hit_test(&self, lparam: LPARAM) -> LRESULT {
        let zone = screen_to_client(self.hwnd, Point::from_lparam(lparam.0)).and_then(|pt| {
            self.engine
                .manager()
                .hit_test(self.id, pt, |pt| self.engine.in_caption(pt))
        });

        let code = match zone {
            Some(HitZone::ResizeGrip) => HTBOTTOMRIGHT,
            Some(HitZone::Caption) => HTCAPTION,
            Some(HitZone::Client(_)) | None => HTCLIENT,
        };
        LRESULT(code as isize)
    }

    fn version_command(&self, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
        let url = HSTRING::from(env!("CARGO_PKG_REPOSITORY"));
        let res = unsafe {
            ShellExecuteW(
                None,
                w!("open"),
                &url,
                PCWSTR::null(),
                PCWSTR::null(),
                SW_SHOWNORMAL,
            )
        };
        debug!("opened {url}, result: {:?}", res.0);

        self.forward(msg, wparam, lparam)
    }
}

fn move_window(hwnd: HWND, rect: Rect) {
    let moved = unsafe {
        MoveWindow(
            hwnd,
            rect.x,
            rect.y,
            rect.width,
            rect.height,
            BOOL::from(false),
        )
    };

    if !moved.as_bool() {
        warn!("cannot move window {:?} to {rect:?}", hwnd.0);
    }
}
