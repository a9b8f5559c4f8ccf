//! `gdi32` interceptors applying the configured theme.

use core::{ffi::c_void, ptr, slice};

use reskin_hook::MinHookService;
use tracing::{debug, trace};
use windows::{
    Win32::{
        Foundation::{COLORREF, HANDLE},
        Graphics::Gdi::{
            BITMAPINFO, FONT_QUALITY, HBITMAP, HBRUSH, HDC, HFONT, HPEN, LOGBRUSH, LOGFONTA,
        },
    },
    core::BOOL,
};

use super::{GDI32, engine, resolve};
use crate::{
    registry::{InterceptorSlot, Registry},
    theme::{
        bitmap::dib_image_size,
        color::{ColorCategory, ColorRef},
        font::FontRequest,
    },
};

static CREATE_PEN: InterceptorSlot = InterceptorSlot::new("CreatePen");
static CREATE_BRUSH_INDIRECT: InterceptorSlot = InterceptorSlot::new("CreateBrushIndirect");
static SET_TEXT_COLOR: InterceptorSlot = InterceptorSlot::new("SetTextColor");
static CREATE_FONT_INDIRECT_A: InterceptorSlot = InterceptorSlot::new("CreateFontIndirectA");
static RECTANGLE: InterceptorSlot = InterceptorSlot::new("Rectangle");
static CREATE_DIB_SECTION: InterceptorSlot = InterceptorSlot::new("CreateDIBSection");

type CreatePenFn = unsafe extern "system" fn(i32, i32, COLORREF) -> HPEN;
type CreateBrushIndirectFn = unsafe extern "system" fn(*const LOGBRUSH) -> HBRUSH;
type SetTextColorFn = unsafe extern "system" fn(HDC, COLORREF) -> COLORREF;
type CreateFontIndirectAFn = unsafe extern "system" fn(*const LOGFONTA) -> HFONT;
type RectangleFn = unsafe extern "system" fn(HDC, i32, i32, i32, i32) -> BOOL;
type CreateDibSectionFn = unsafe extern "system" fn(
    HDC,
    *const BITMAPINFO,
    u32,
    *mut *mut c_void,
    HANDLE,
    u32,
) -> HBITMAP;

pub(super) fn register(registry: &mut Registry<MinHookService>) -> anyhow::Result<()> {
    let interceptors: [(&'static InterceptorSlot, usize); 6] = [
        (&CREATE_PEN, hooked_create_pen as usize),
        (&CREATE_BRUSH_INDIRECT, hooked_create_brush_indirect as usize),
        (&SET_TEXT_COLOR, hooked_set_text_color as usize),
        (&CREATE_FONT_INDIRECT_A, hooked_create_font_indirect_a as usize),
        (&RECTANGLE, hooked_rectangle as usize),
        (&CREATE_DIB_SECTION, hooked_create_dib_section as usize),
    ];

    for (slot, replacement) in interceptors {
        registry.register(slot, resolve(GDI32, slot)?, replacement);
    }

    Ok(())
}

fn remap(category: ColorCategory, color: COLORREF) -> COLORREF {
    match engine() {
        Some(engine) => COLORREF(engine.remap_color(category, ColorRef(color.0)).0),
        None => color,
    }
}

#[tracing::instrument(skip_all)]
extern "system" fn hooked_create_pen(style: i32, width: i32, color: COLORREF) -> HPEN {
    trace!("CreatePen called");

    let color = remap(ColorCategory::Shapes, color);
    unsafe { CREATE_PEN.wait_fn::<CreatePenFn>()(style, width, color) }
}

#[tracing::instrument(skip_all)]
extern "system" fn hooked_create_brush_indirect(brush: *const LOGBRUSH) -> HBRUSH {
    trace!("CreateBrushIndirect called");

    let original = unsafe { CREATE_BRUSH_INDIRECT.wait_fn::<CreateBrushIndirectFn>() };
    let Some(brush) = (unsafe { brush.as_ref() }) else {
        return unsafe { original(brush) };
    };

    let brush = LOGBRUSH {
        lbColor: remap(ColorCategory::Shapes, brush.lbColor),
        ..*brush
    };
    unsafe { original(&brush) }
}

#[tracing::instrument(skip_all)]
extern "system" fn hooked_set_text_color(dc: HDC, color: COLORREF) -> COLORREF {
    trace!("SetTextColor called");

    let color = remap(ColorCategory::Text, color);
    unsafe { SET_TEXT_COLOR.wait_fn::<SetTextColorFn>()(dc, color) }
}

#[tracing::instrument(skip_all)]
extern "system" fn hooked_create_font_indirect_a(font: *const LOGFONTA) -> HFONT {
    trace!("CreateFontIndirectA called");

    let original = unsafe { CREATE_FONT_INDIRECT_A.wait_fn::<CreateFontIndirectAFn>() };
    let (Some(engine), Some(font)) = (engine(), unsafe { font.as_ref() }) else {
        return unsafe { original(font) };
    };

    let request = engine.adjust_font(FontRequest {
        height: font.lfHeight,
        quality: font.lfQuality.0,
    });
    let font = LOGFONTA {
        lfHeight: request.height,
        lfQuality: FONT_QUALITY(request.quality),
        ..*font
    };

    unsafe { original(&font) }
}

#[tracing::instrument(skip_all)]
extern "system" fn hooked_rectangle(dc: HDC, left: i32, top: i32, right: i32, bottom: i32) -> BOOL {
    trace!("Rectangle called");

    if engine().is_some_and(|engine| engine.is_masked(left, top)) {
        return BOOL::from(true);
    }

    unsafe { RECTANGLE.wait_fn::<RectangleFn>()(dc, left, top, right, bottom) }
}

#[tracing::instrument(skip_all)]
extern "system" fn hooked_create_dib_section(
    dc: HDC,
    info: *const BITMAPINFO,
    usage: u32,
    bits: *mut *mut c_void,
    section: HANDLE,
    offset: u32,
) -> HBITMAP {
    trace!("CreateDIBSection called");

    let original = unsafe { CREATE_DIB_SECTION.wait_fn::<CreateDibSectionFn>() };
    let (Some(engine), Some(info)) = (engine(), unsafe { info.as_ref() }) else {
        return unsafe { original(dc, info, usage, bits, section, offset) };
    };
    let header = info.bmiHeader;

    let Some(background) = engine.background(header.biWidth) else {
        return unsafe { original(dc, info, usage, bits, section, offset) };
    };

    let mut pixels = ptr::null_mut();
    let bitmap = unsafe { original(dc, info, usage, &mut pixels, section, offset) };
    if bitmap.is_invalid() || pixels.is_null() {
        return bitmap;
    }

    let len = dib_image_size(
        header.biWidth,
        header.biHeight,
        header.biBitCount,
        header.biSizeImage,
    );
    let copied =
        background.copy_pixels(unsafe { slice::from_raw_parts_mut(pixels.cast::<u8>(), len) });
    debug!(
        "replaced {}x{} background, {copied} byte(s)",
        header.biWidth, header.biHeight
    );

    if let Some(bits) = unsafe { bits.as_mut() } {
        *bits = pixels;
    }

    bitmap
}
