//! `tracing` writers for a process without a console.
//!
//! Debug builds write to the debugger output, viewable with tools like
//! [DebugView](https://docs.microsoft.com/en-us/sysinternals/downloads/debugview).
//! Release builds append to a log file next to the user's themes.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
};

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, MutexGuard};
use reskin::config::UserDirs;
use tracing_subscriber::fmt::MakeWriter;
use windows::{Win32::System::Diagnostics::Debug::OutputDebugStringW, core::PCWSTR};

/// Writes each record to the debugger output with `OutputDebugStringW`.
pub struct WinDbgMakeWriter {
    buf: Mutex<Vec<u16>>,
}

impl WinDbgMakeWriter {
    pub const fn new() -> Self {
        Self {
            buf: Mutex::new(Vec::new()),
        }
    }
}

impl<'a> MakeWriter<'a> for WinDbgMakeWriter {
    type Writer = WinDbgWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        WinDbgWriter {
            buf: self.buf.lock(),
        }
    }
}

pub struct WinDbgWriter<'a> {
    buf: MutexGuard<'a, Vec<u16>>,
}

impl Write for WinDbgWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend(String::from_utf8_lossy(buf).encode_utf16());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for WinDbgWriter<'_> {
    fn drop(&mut self) {
        self.buf.push(0);
        unsafe {
            OutputDebugStringW(PCWSTR(self.buf.as_ptr()));
        }
        self.buf.clear();
    }
}

/// Appends records to the user log file.
///
/// The file is opened on the first record, outside of the loader lock in
/// practice. If it cannot be opened, records go to the debugger output.
pub struct LogFileMakeWriter {
    file: OnceCell<Option<Mutex<File>>>,
    fallback: WinDbgMakeWriter,
}

impl LogFileMakeWriter {
    pub const fn new() -> Self {
        Self {
            file: OnceCell::new(),
            fallback: WinDbgMakeWriter::new(),
        }
    }

    fn open() -> anyhow::Result<File> {
        let path = UserDirs::locate()?.log_file();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        Ok(OpenOptions::new().create(true).append(true).open(path)?)
    }
}

impl<'a> MakeWriter<'a> for LogFileMakeWriter {
    type Writer = LogWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        let file = self.file.get_or_init(|| match Self::open() {
            Ok(file) => Some(Mutex::new(file)),
            Err(err) => {
                let mut writer = self.fallback.make_writer();
                _ = write!(writer, "cannot open log file, using debugger output. err: {err:?}");
                None
            }
        });

        match file {
            Some(file) => LogWriter::File(file.lock()),
            None => LogWriter::Debugger(self.fallback.make_writer()),
        }
    }
}

pub enum LogWriter<'a> {
    File(MutexGuard<'a, File>),
    Debugger(WinDbgWriter<'a>),
}

impl Write for LogWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::File(file) => file.write(buf),
            Self::Debugger(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::File(file) => file.flush(),
            Self::Debugger(writer) => writer.flush(),
        }
    }
}
