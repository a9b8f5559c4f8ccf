#![cfg(all(windows, any(target_arch = "x86", target_arch = "x86_64")))]

mod log;

use tracing::{debug, error};
use windows::Win32::{
    Foundation::HINSTANCE,
    System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH},
};

fn setup_tracing() {
    #[cfg(debug_assertions)]
    let (writer, level) = (
        log::WinDbgMakeWriter::new(),
        tracing::level_filters::LevelFilter::TRACE,
    );

    #[cfg(not(debug_assertions))]
    let (writer, level) = (
        log::LogFileMakeWriter::new(),
        tracing::level_filters::LevelFilter::WARN,
    );

    _ = tracing_subscriber::fmt::fmt()
        .with_ansi(false)
        .with_thread_ids(true)
        .with_max_level(level)
        .with_writer(writer)
        .try_init();
}

#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub unsafe extern "system" fn DllMain(_dll_module: HINSTANCE, fdw_reason: u32, _: *mut ()) -> bool {
    match fdw_reason {
        DLL_PROCESS_ATTACH => {
            // setup tracing first
            setup_tracing();

            if let Err(err) = reskin::initialize() {
                error!("cannot install reskin. err: {err:?}");
                return false;
            }
            debug!("bootstrap interceptor installed");
        }

        DLL_PROCESS_DETACH => reskin::shutdown(),

        _ => {}
    }

    true
}
