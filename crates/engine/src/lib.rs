//! Runtime reskinning engine for the Voicemeeter user interface.
//!
//! The engine is injected into the host process and intercepts the host's
//! window, drawing and menu calls. Managed windows keep drawing at their
//! logical design size into an off-screen surface, which is composited onto
//! the window scaled to its current size.

pub mod config;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod patch;
pub mod persist;
pub mod registry;
pub mod renderer;
pub mod scan;
pub mod theme;
pub mod window;

#[cfg(all(windows, any(target_arch = "x86", target_arch = "x86_64")))]
mod hook;

/// Install the engine into the current process.
///
/// Must be called once, from `DllMain` of the injected module.
#[cfg(all(windows, any(target_arch = "x86", target_arch = "x86_64")))]
pub fn initialize() -> anyhow::Result<()> {
    use anyhow::Context;

    hook::install().context("hook initialization failed")
}

/// Remove every interceptor and release the engine.
#[cfg(all(windows, any(target_arch = "x86", target_arch = "x86_64")))]
pub fn shutdown() {
    hook::uninstall();
}
