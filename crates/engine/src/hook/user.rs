//! Always-on `user32` interceptors.

use core::ffi::{CStr, c_void};

use reskin_hook::MinHookService;
use tracing::{debug, trace, warn};
use windows::{
    Win32::{
        Foundation::{HINSTANCE, HWND, LPARAM, POINT, RECT},
        Graphics::Gdi::{HDC, PAINTSTRUCT},
        UI::WindowsAndMessaging::{
            GA_ROOT, GetAncestor, GetClassNameA, HMENU, MF_BITMAP, MF_OWNERDRAW, WNDCLASSA,
        },
    },
    core::{BOOL, PCSTR},
};

use super::{USER32, engine, resolve, wndproc};
use crate::{
    geometry::Point,
    registry::{InterceptorSlot, Registry},
    window::{WindowId, kind::WindowKind, route::VERSION_COMMAND_ID},
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
    fn ScreenToClient(hwnd: HWND, point: *mut POINT) -> BOOL;
    fn ClientToScreen(hwnd: HWND, point: *mut POINT) -> BOOL;
}

static REGISTER_CLASS_A: InterceptorSlot = InterceptorSlot::new("RegisterClassA");
static CREATE_WINDOW_EX_A: InterceptorSlot = InterceptorSlot::new("CreateWindowExA");
static GET_DC: InterceptorSlot = InterceptorSlot::new("GetDC");
static BEGIN_PAINT: InterceptorSlot = InterceptorSlot::new("BeginPaint");
static RELEASE_DC: InterceptorSlot = InterceptorSlot::new("ReleaseDC");
static GET_CLIENT_RECT: InterceptorSlot = InterceptorSlot::new("GetClientRect");
static SET_WINDOW_POS: InterceptorSlot = InterceptorSlot::new("SetWindowPos");
static TRACK_POPUP_MENU: InterceptorSlot = InterceptorSlot::new("TrackPopupMenu");
static DIALOG_BOX_INDIRECT_PARAM_A: InterceptorSlot =
    InterceptorSlot::new("DialogBoxIndirectParamA");
static APPEND_MENU_A: InterceptorSlot = InterceptorSlot::new("AppendMenuA");
static SET_TIMER: InterceptorSlot = InterceptorSlot::new("SetTimer");

type RegisterClassAFn = unsafe extern "system" fn(*const WNDCLASSA) -> u16;
type CreateWindowExAFn = unsafe extern "system" fn(
    u32,
    PCSTR,
    PCSTR,
    u32,
    i32,
    i32,
    i32,
    i32,
    HWND,
    HMENU,
    HINSTANCE,
    *const c_void,
) -> HWND;
type GetDcFn = unsafe extern "system" fn(HWND) -> HDC;
type BeginPaintFn = unsafe extern "system" fn(HWND, *mut PAINTSTRUCT) -> HDC;
type ReleaseDcFn = unsafe extern "system" fn(HWND, HDC) -> i32;
type GetClientRectFn = unsafe extern "system" fn(HWND, *mut RECT) -> BOOL;
type SetWindowPosFn = unsafe extern "system" fn(HWND, HWND, i32, i32, i32, i32, u32) -> BOOL;
type TrackPopupMenuFn =
    unsafe extern "system" fn(HMENU, u32, i32, i32, i32, HWND, *const RECT) -> BOOL;
type DialogBoxIndirectParamAFn =
    unsafe extern "system" fn(HINSTANCE, *const c_void, HWND, usize, LPARAM) -> isize;
type AppendMenuAFn = unsafe extern "system" fn(HMENU, u32, usize, PCSTR) -> BOOL;
type SetTimerFn = unsafe extern "system" fn(HWND, usize, u32, usize) -> usize;

/// Menu item the host closes its about section with.
const ABOUT_ITEM_ID: usize = 0x1F9;

/// Last item of the tray icon menu.
const TRAY_EXIT_ITEM: &[u8] = b"Exit Menu";

const VERSION_ITEM: &str = concat!("Reskin v", env!("CARGO_PKG_VERSION"), "\0");

/// Marker of the host's parameter edit dialogs.
const EDIT_DIALOG_TAG: i32 = 2016;

/// Creation payload the host passes to its panel windows.
#[allow(dead_code)]
#[repr(C)]
struct PanelParams {
    hwnd: HWND,
    x: i32,
    y: i32,
    id: i32,
    reserved: *mut c_void,
    wndproc: *mut c_void,
}

/// Initialization payload of the host's parameter edit dialogs.
#[allow(dead_code)]
#[repr(C)]
struct EditDialogParams {
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    reserved: i32,
    tag: i32,
}

pub(super) fn register(registry: &mut Registry<MinHookService>) -> anyhow::Result<()> {
    let interceptors: [(&'static InterceptorSlot, usize); 11] = [
        (&REGISTER_CLASS_A, hooked_register_class_a as usize),
        (&CREATE_WINDOW_EX_A, hooked_create_window_ex_a as usize),
        (&GET_DC, hooked_get_dc as usize),
        (&BEGIN_PAINT, hooked_begin_paint as usize),
        (&RELEASE_DC, hooked_release_dc as usize),
        (&GET_CLIENT_RECT, hooked_get_client_rect as usize),
        (&SET_WINDOW_POS, hooked_set_window_pos as usize),
        (&TRACK_POPUP_MENU, hooked_track_popup_menu as usize),
        (
            &DIALOG_BOX_INDIRECT_PARAM_A,
            hooked_dialog_box_indirect_param_a as usize,
        ),
        (&APPEND_MENU_A, hooked_append_menu_a as usize),
        (&SET_TIMER, hooked_set_timer as usize),
    ];

    for (slot, replacement) in interceptors {
        registry.register(slot, resolve(USER32, slot)?, replacement);
    }

    Ok(())
}

/// Bytes of a C string argument. `None` for null pointers and atoms.
pub(super) fn c_bytes<'a>(s: PCSTR) -> Option<&'a [u8]> {
    if (s.0 as usize) >> 16 == 0 {
        return None;
    }

    Some(unsafe { CStr::from_ptr(s.0.cast()) }.to_bytes())
}

#[inline]
pub(super) fn window_id(hwnd: HWND) -> WindowId {
    hwnd.0 as WindowId
}

pub(super) fn screen_to_client(hwnd: HWND, pt: Point) -> Option<Point> {
    let mut pt = POINT { x: pt.x, y: pt.y };
    if !unsafe { ScreenToClient(hwnd, &mut pt) }.as_bool() {
        warn!("ScreenToClient failed for window {:?}", hwnd.0);
        return None;
    }

    Some(Point::new(pt.x, pt.y))
}

pub(super) fn client_to_screen(hwnd: HWND, pt: Point) -> Option<Point> {
    let mut pt = POINT { x: pt.x, y: pt.y };
    if !unsafe { ClientToScreen(hwnd, &mut pt) }.as_bool() {
        warn!("ClientToScreen failed for window {:?}", hwnd.0);
        return None;
    }

    Some(Point::new(pt.x, pt.y))
}

/// Map a screen point of `hwnd` through its client space with `map`.
///
/// `pt` is returned unchanged if `map` gives `None` or a conversion fails.
pub(super) fn map_screen_point(
    hwnd: HWND,
    pt: Point,
    map: impl FnOnce(Point) -> Option<Point>,
) -> Point {
    screen_to_client(hwnd, pt)
        .and_then(map)
        .and_then(|mapped| client_to_screen(hwnd, mapped))
        .unwrap_or(pt)
}

/// Map a logical screen point over the main window to physical space.
fn main_to_physical(hwnd: HWND, x: i32, y: i32) -> (i32, i32) {
    let Some(engine) = engine() else {
        return (x, y);
    };

    let id = window_id(hwnd);
    if engine.manager().main() != Some(id) {
        return (x, y);
    }

    let pt = map_screen_point(hwnd, Point::new(x, y), |pt| {
        engine.manager().to_physical(id, pt)
    });
    (pt.x, pt.y)
}

/// Place `hwnd` without going through the placement filter.
pub(super) fn set_window_pos_unfiltered(
    hwnd: HWND,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    flags: u32,
) -> bool {
    unsafe {
        SET_WINDOW_POS.wait_fn::<SetWindowPosFn>()(hwnd, HWND::default(), x, y, width, height, flags)
    }
    .as_bool()
}

/// Start a timer at exactly `interval` milliseconds.
pub(super) fn set_timer_unfiltered(hwnd: HWND, id: usize, interval: u32) -> usize {
    unsafe { SET_TIMER.wait_fn::<SetTimerFn>()(hwnd, id, interval, 0) }
}

#[tracing::instrument(skip_all)]
extern "system" fn hooked_register_class_a(class: *const WNDCLASSA) -> u16 {
    trace!("RegisterClassA called");

    if let Some(class) = unsafe { class.as_ref() } {
        if let (Some(name), Some(proc)) = (c_bytes(class.lpszClassName), class.lpfnWndProc) {
            wndproc::discover(name, None, proc as usize);
        }
    }

    unsafe { REGISTER_CLASS_A.wait_fn::<RegisterClassAFn>()(class) }
}

#[allow(clippy::too_many_arguments)]
#[tracing::instrument(skip_all)]
extern "system" fn hooked_create_window_ex_a(
    ex_style: u32,
    class: PCSTR,
    name: PCSTR,
    style: u32,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    parent: HWND,
    menu: HMENU,
    instance: HINSTANCE,
    param: *const c_void,
) -> HWND {
    trace!("CreateWindowExA called");

    if let Some(class) = c_bytes(class) {
        let panel = WindowKind::child_for_class(class)
            .and_then(|_| unsafe { param.cast::<PanelParams>().as_ref() });

        if let Some(panel) = panel {
            if !panel.wndproc.is_null() {
                wndproc::discover(class, u32::try_from(panel.id).ok(), panel.wndproc as usize);
            }
        }
    }

    unsafe {
        CREATE_WINDOW_EX_A.wait_fn::<CreateWindowExAFn>()(
            ex_style, class, name, style, x, y, width, height, parent, menu, instance, param,
        )
    }
}

fn scratch_dc(hwnd: HWND) -> Option<HDC> {
    let dc = engine()?.manager().scratch_dc(window_id(hwnd))?;
    Some(HDC(dc as _))
}

#[tracing::instrument(skip_all)]
extern "system" fn hooked_get_dc(hwnd: HWND) -> HDC {
    trace!("GetDC called");

    match scratch_dc(hwnd) {
        Some(dc) => dc,
        None => unsafe { GET_DC.wait_fn::<GetDcFn>()(hwnd) },
    }
}

#[tracing::instrument(skip_all)]
extern "system" fn hooked_begin_paint(hwnd: HWND, paint: *mut PAINTSTRUCT) -> HDC {
    trace!("BeginPaint called");

    let scratch = scratch_dc(hwnd);
    let dc = unsafe { BEGIN_PAINT.wait_fn::<BeginPaintFn>()(hwnd, paint) };

    match scratch {
        Some(scratch) if !dc.is_invalid() => scratch,
        _ => dc,
    }
}

#[tracing::instrument(skip_all)]
extern "system" fn hooked_release_dc(hwnd: HWND, dc: HDC) -> i32 {
    trace!("ReleaseDC called");

    let managed = engine().is_some_and(|engine| engine.manager().is_managed(window_id(hwnd)));
    if managed {
        return 1;
    }

    unsafe { RELEASE_DC.wait_fn::<ReleaseDcFn>()(hwnd, dc) }
}

#[tracing::instrument(skip_all)]
extern "system" fn hooked_get_client_rect(hwnd: HWND, rect: *mut RECT) -> BOOL {
    trace!("GetClientRect called");

    let mut class = [0u8; 256];
    let len = unsafe { GetClassNameA(hwnd, &mut class) };
    let design = usize::try_from(len)
        .ok()
        .and_then(|len| WindowKind::child_for_class(&class[..len]))
        .and_then(WindowKind::design_client_size);

    if let (Some(size), Some(rect)) = (design, unsafe { rect.as_mut() }) {
        *rect = RECT {
            left: 0,
            top: 0,
            right: size.width,
            bottom: size.height,
        };
        return BOOL::from(true);
    }

    unsafe { GET_CLIENT_RECT.wait_fn::<GetClientRectFn>()(hwnd, rect) }
}

#[tracing::instrument(skip_all)]
extern "system" fn hooked_set_window_pos(
    hwnd: HWND,
    insert_after: HWND,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    flags: u32,
) -> BOOL {
    trace!("SetWindowPos called");

    let is_main = engine().is_some_and(|engine| engine.manager().main() == Some(window_id(hwnd)));
    if is_main && unsafe { GetAncestor(hwnd, GA_ROOT) } == hwnd {
        debug!("suppressed main window placement to {x},{y} {width}x{height}");
        return BOOL::from(true);
    }

    unsafe {
        SET_WINDOW_POS.wait_fn::<SetWindowPosFn>()(
            hwnd,
            insert_after,
            x,
            y,
            width,
            height,
            flags,
        )
    }
}

#[tracing::instrument(skip_all)]
extern "system" fn hooked_track_popup_menu(
    menu: HMENU,
    flags: u32,
    x: i32,
    y: i32,
    reserved: i32,
    hwnd: HWND,
    rect: *const RECT,
) -> BOOL {
    trace!("TrackPopupMenu called");

    let tray = engine().is_some_and(|engine| engine.is_tray_menu(menu.0 as usize));
    let (x, y) = if tray {
        (x, y)
    } else {
        main_to_physical(hwnd, x, y)
    };

    unsafe {
        TRACK_POPUP_MENU.wait_fn::<TrackPopupMenuFn>()(menu, flags, x, y, reserved, hwnd, rect)
    }
}

#[tracing::instrument(skip_all)]
extern "system" fn hooked_dialog_box_indirect_param_a(
    instance: HINSTANCE,
    template: *const c_void,
    parent: HWND,
    dialog_proc: usize,
    init: LPARAM,
) -> isize {
    trace!("DialogBoxIndirectParamA called");

    if let Some(params) = unsafe { (init.0 as *mut EditDialogParams).as_mut() } {
        let is_main =
            engine().is_some_and(|engine| engine.manager().main() == Some(window_id(parent)));

        if is_main && params.tag == EDIT_DIALOG_TAG {
            (params.x, params.y) = main_to_physical(parent, params.x, params.y);
            trace!(
                "edit dialog {}x{} placed at {},{}",
                params.width, params.height, params.x, params.y
            );
        }
    }

    unsafe {
        DIALOG_BOX_INDIRECT_PARAM_A.wait_fn::<DialogBoxIndirectParamAFn>()(
            instance,
            template,
            parent,
            dialog_proc,
            init,
        )
    }
}

#[tracing::instrument(skip_all)]
extern "system" fn hooked_append_menu_a(menu: HMENU, flags: u32, id: usize, item: PCSTR) -> BOOL {
    trace!("AppendMenuA called");

    let original = unsafe { APPEND_MENU_A.wait_fn::<AppendMenuAFn>() };

    let is_string = flags & (MF_BITMAP.0 | MF_OWNERDRAW.0) == 0;
    if is_string && c_bytes(item) == Some(TRAY_EXIT_ITEM) {
        if let Some(engine) = engine() {
            debug!("tray menu found");
            engine.set_tray_menu(menu.0 as usize);
        }
    }

    let res = unsafe { original(menu, flags, id, item) };
    if id != ABOUT_ITEM_ID || !res.as_bool() {
        return res;
    }

    unsafe { original(menu, flags, VERSION_COMMAND_ID, PCSTR(VERSION_ITEM.as_ptr())) }
}

#[tracing::instrument(skip_all)]
extern "system" fn hooked_set_timer(hwnd: HWND, id: usize, interval: u32, proc: usize) -> usize {
    trace!("SetTimer called");

    let interval = engine().map_or(interval, |engine| engine.timer_interval(id, interval));
    unsafe { SET_TIMER.wait_fn::<SetTimerFn>()(hwnd, id, interval, proc) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_failure_keeps_point() {
        let hwnd = HWND(core::ptr::null_mut());
        let pt = Point::new(5, 7);

        assert_eq!(screen_to_client(hwnd, pt), None);
        assert_eq!(client_to_screen(hwnd, pt), None);
        assert_eq!(
            map_screen_point(hwnd, pt, |_| Some(Point::new(100, 100))),
            pt
        );
    }
}
