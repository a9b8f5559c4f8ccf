use core::mem::ManuallyDrop;

use anyhow::Context;
use tracing::{debug, trace};
use windows::{
    Win32::{
        Foundation::{HMODULE, HWND},
        Graphics::{
            Direct2D::{
                Common::{D2D_RECT_F, D2D1_ALPHA_MODE_IGNORE, D2D1_COMPOSITE_MODE_SOURCE_COPY, D2D1_PIXEL_FORMAT},
                D2D1_BITMAP_OPTIONS, D2D1_BITMAP_OPTIONS_CANNOT_DRAW, D2D1_BITMAP_OPTIONS_NONE,
                D2D1_BITMAP_OPTIONS_TARGET, D2D1_BITMAP_PROPERTIES1,
                D2D1_DEVICE_CONTEXT_OPTIONS_NONE, D2D1_FACTORY_TYPE_SINGLE_THREADED,
                D2D1_INTERPOLATION_MODE_HIGH_QUALITY_CUBIC, D2D1CreateFactory, ID2D1Bitmap1,
                ID2D1Device, ID2D1DeviceContext, ID2D1Factory1,
            },
            Direct3D::{
                D3D_DRIVER_TYPE_HARDWARE, D3D_FEATURE_LEVEL_10_0, D3D_FEATURE_LEVEL_10_1,
                D3D_FEATURE_LEVEL_11_0,
            },
            Direct3D11::{
                D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_CREATE_DEVICE_SINGLETHREADED,
                D3D11_RESOURCE_MISC_GDI_COMPATIBLE, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC,
                D3D11_USAGE_DEFAULT, D3D11CreateDevice, ID3D11Device,
            },
            Dxgi::{
                Common::{
                    DXGI_ALPHA_MODE_IGNORE, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC,
                },
                DXGI_MWA_NO_ALT_ENTER, DXGI_PRESENT, DXGI_SCALING_STRETCH,
                DXGI_SWAP_CHAIN_DESC1, DXGI_SWAP_CHAIN_FLAG, DXGI_SWAP_EFFECT_FLIP_DISCARD,
                DXGI_USAGE_RENDER_TARGET_OUTPUT, IDXGIDevice, IDXGIFactory2, IDXGISurface1,
                IDXGISwapChain1,
            },
            Gdi::{GdiFlush, HDC},
        },
    },
    core::Interface,
};
use windows_numerics::{Matrix3x2, Vector2};

use super::{Compositor, Surfaces};
use crate::{geometry::Size, window::WindowId};

/// Shared Direct2D device drawing GDI output onto DXGI swap chains.
pub struct D2dCompositor {
    device: ID3D11Device,
    factory: IDXGIFactory2,
    d2d_device: ID2D1Device,
}

// Single threaded devices only ever used from the host UI thread
unsafe impl Send for D2dCompositor {}

impl D2dCompositor {
    #[tracing::instrument]
    pub fn new() -> anyhow::Result<Self> {
        unsafe {
            let d2d_factory: ID2D1Factory1 =
                D2D1CreateFactory(D2D1_FACTORY_TYPE_SINGLE_THREADED, None)
                    .context("D2D1CreateFactory failed")?;

            let mut device = None;
            D3D11CreateDevice(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                HMODULE::default(),
                D3D11_CREATE_DEVICE_BGRA_SUPPORT | D3D11_CREATE_DEVICE_SINGLETHREADED,
                Some(&[
                    D3D_FEATURE_LEVEL_11_0,
                    D3D_FEATURE_LEVEL_10_1,
                    D3D_FEATURE_LEVEL_10_0,
                ]),
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                None,
            )
            .context("D3D11CreateDevice failed")?;
            let device = device.context("D3D11CreateDevice returned no device")?;

            let dxgi_device = device.cast::<IDXGIDevice>()?;
            let factory = dxgi_device
                .GetAdapter()?
                .GetParent::<IDXGIFactory2>()
                .context("cannot get DXGI factory")?;
            let d2d_device = d2d_factory
                .CreateDevice(&dxgi_device)
                .context("cannot create Direct2D device")?;
            debug!("Direct2D device created");

            Ok(Self {
                device,
                factory,
                d2d_device,
            })
        }
    }
}

impl Compositor for D2dCompositor {
    type Surfaces = D2dSurfaces;

    #[tracing::instrument(skip(self))]
    fn create_surfaces(
        &self,
        window: WindowId,
        logical: Size,
        current: Size,
    ) -> anyhow::Result<D2dSurfaces> {
        let hwnd = HWND(window as _);

        unsafe {
            let mut texture = None;
            self.device
                .CreateTexture2D(
                    &D3D11_TEXTURE2D_DESC {
                        Width: logical.width as _,
                        Height: logical.height as _,
                        MipLevels: 1,
                        ArraySize: 1,
                        Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                        SampleDesc: DXGI_SAMPLE_DESC {
                            Count: 1,
                            Quality: 0,
                        },
                        Usage: D3D11_USAGE_DEFAULT,
                        BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as _,
                        CPUAccessFlags: 0,
                        MiscFlags: D3D11_RESOURCE_MISC_GDI_COMPATIBLE.0 as _,
                    },
                    None,
                    Some(&mut texture),
                )
                .context("cannot create drawing texture")?;
            let source = texture
                .context("no drawing texture")?
                .cast::<IDXGISurface1>()?;

            let context = self
                .d2d_device
                .CreateDeviceContext(D2D1_DEVICE_CONTEXT_OPTIONS_NONE)
                .context("cannot create Direct2D context")?;

            let source_bitmap = context
                .CreateBitmapFromDxgiSurface(&source, Some(&bitmap_properties(D2D1_BITMAP_OPTIONS_NONE)))
                .context("cannot create drawing bitmap")?;
            let dc = source.GetDC(false).context("cannot acquire drawing DC")?;

            let swapchain = self
                .factory
                .CreateSwapChainForHwnd(
                    &self.device,
                    hwnd,
                    &DXGI_SWAP_CHAIN_DESC1 {
                        Width: current.width as _,
                        Height: current.height as _,
                        Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                        SampleDesc: DXGI_SAMPLE_DESC {
                            Count: 1,
                            Quality: 0,
                        },
                        BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
                        BufferCount: 2,
                        Scaling: DXGI_SCALING_STRETCH,
                        SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
                        AlphaMode: DXGI_ALPHA_MODE_IGNORE,
                        ..Default::default()
                    },
                    None,
                    None,
                )
                .context("cannot create swap chain")?;
            self.factory
                .MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER)
                .context("MakeWindowAssociation failed")?;

            let mut surfaces = D2dSurfaces {
                logical,
                size: current,
                source,
                source_bitmap: Some(source_bitmap),
                dc: Some(dc),
                context,
                swapchain,
                target: None,
            };
            surfaces.bind_target()?;

            Ok(surfaces)
        }
    }
}

fn bitmap_properties(options: D2D1_BITMAP_OPTIONS) -> D2D1_BITMAP_PROPERTIES1 {
    D2D1_BITMAP_PROPERTIES1 {
        pixelFormat: D2D1_PIXEL_FORMAT {
            format: DXGI_FORMAT_B8G8R8A8_UNORM,
            alphaMode: D2D1_ALPHA_MODE_IGNORE,
        },
        dpiX: 96.0,
        dpiY: 96.0,
        bitmapOptions: options,
        colorContext: ManuallyDrop::new(None),
    }
}

/// Drawing texture and swap chain of one window.
pub struct D2dSurfaces {
    logical: Size,
    size: Size,
    source: IDXGISurface1,
    source_bitmap: Option<ID2D1Bitmap1>,
    dc: Option<HDC>,
    context: ID2D1DeviceContext,
    swapchain: IDXGISwapChain1,
    target: Option<ID2D1Bitmap1>,
}

unsafe impl Send for D2dSurfaces {}

impl D2dSurfaces {
    fn bind_target(&mut self) -> anyhow::Result<()> {
        unsafe {
            let buffer = self.swapchain.GetBuffer::<IDXGISurface1>(0)?;
            let target = self
                .context
                .CreateBitmapFromDxgiSurface(
                    &buffer,
                    Some(&bitmap_properties(
                        D2D1_BITMAP_OPTIONS_TARGET | D2D1_BITMAP_OPTIONS_CANNOT_DRAW,
                    )),
                )
                .context("cannot create target bitmap")?;

            self.context.SetTarget(&target);
            self.target = Some(target);
        }

        Ok(())
    }
}

impl Surfaces for D2dSurfaces {
    fn scratch_dc(&self) -> Option<usize> {
        self.dc.map(|dc| dc.0 as usize)
    }

    fn buffer_size(&self) -> Size {
        self.size
    }

    fn resize_buffers(&mut self, size: Size) -> anyhow::Result<()> {
        unsafe {
            self.context.SetTarget(None);
            self.target = None;

            self.swapchain
                .ResizeBuffers(
                    0,
                    size.width as _,
                    size.height as _,
                    DXGI_FORMAT_B8G8R8A8_UNORM,
                    DXGI_SWAP_CHAIN_FLAG(0),
                )
                .context("ResizeBuffers failed")?;
        }
        self.size = size;
        trace!("swap chain resized to {size:?}");

        self.bind_target()
    }

    fn release_scratch(&mut self) -> anyhow::Result<()> {
        if self.dc.take().is_none() {
            return Ok(());
        }

        unsafe {
            _ = GdiFlush();
            self.source.ReleaseDC(None).context("cannot release drawing DC")?;
        }

        Ok(())
    }

    fn draw_scaled(&mut self, factor: (f32, f32)) -> anyhow::Result<()> {
        let source = self
            .source_bitmap
            .as_ref()
            .context("drawing bitmap missing")?;

        unsafe {
            self.context.BeginDraw();
            self.context.SetTransform(&Matrix3x2::scale(factor.0, factor.1));
            self.context.DrawImage(
                source,
                Some(&Vector2::zero()),
                Some(&D2D_RECT_F {
                    left: 0.0,
                    top: 0.0,
                    right: self.logical.width as f32,
                    bottom: self.logical.height as f32,
                }),
                D2D1_INTERPOLATION_MODE_HIGH_QUALITY_CUBIC,
                D2D1_COMPOSITE_MODE_SOURCE_COPY,
            );
            self.context.EndDraw(None, None).context("EndDraw failed")?;
        }

        Ok(())
    }

    fn present(&mut self) -> anyhow::Result<()> {
        unsafe { self.swapchain.Present(1, DXGI_PRESENT(0)) }
            .ok()
            .context("Present failed")
    }

    fn acquire_scratch(&mut self) -> anyhow::Result<()> {
        unsafe {
            self.source_bitmap = None;
            self.source_bitmap = Some(
                self.context
                    .CreateBitmapFromDxgiSurface(
                        &self.source,
                        Some(&bitmap_properties(D2D1_BITMAP_OPTIONS_NONE)),
                    )
                    .context("cannot recreate drawing bitmap")?,
            );

            if self.dc.is_none() {
                self.dc = Some(self.source.GetDC(false).context("cannot acquire drawing DC")?);
            }
        }

        Ok(())
    }
}

impl Drop for D2dSurfaces {
    fn drop(&mut self) {
        unsafe {
            self.context.SetTarget(None);
            if self.dc.take().is_some() {
                _ = self.source.ReleaseDC(None);
            }
        }
    }
}
