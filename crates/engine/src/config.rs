//! User configuration.
//!
//! Every value is optional. Malformed values are reported once while loading
//! and then behave as if they were absent.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::theme::flavor::Flavor;

pub const CONFIG_FILE: &str = "reskin.json";
pub const THEMES_DIR: &str = "themes";
pub const LOG_FILE: &str = "reskin.log";

/// Configuration values the engine consumes.
pub trait ConfigProvider {
    /// Theme directory name configured for `flavor`.
    fn theme_name(&self, flavor: Flavor) -> Option<&str>;

    fn font_quality(&self) -> Option<FontQuality>;

    /// Wheel step multiplier.
    fn fader_scroll_step(&self) -> Option<u32>;

    /// Wheel step multiplier while shift is held.
    fn fader_shift_scroll_step(&self) -> Option<u32>;

    /// UI timer interval in milliseconds.
    fn ui_update_interval(&self) -> Option<u32>;

    /// Whether the last main window size is restored on start.
    fn restore_size(&self) -> Option<bool>;
}

/// GDI font quality, `DEFAULT_QUALITY` (0) to `CLEARTYPE_NATURAL_QUALITY` (6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontQuality(u8);

impl FontQuality {
    pub const MAX: u8 = 6;

    pub const fn new(quality: u8) -> Option<Self> {
        if quality <= Self::MAX {
            Some(Self(quality))
        } else {
            None
        }
    }

    #[inline]
    pub const fn get(self) -> u8 {
        self.0
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    theme: Option<Value>,

    #[serde(default)]
    misc: Option<RawMisc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMisc {
    font_quality: Option<Value>,
    fader_scroll_step: Option<Value>,
    fader_shift_scroll_step: Option<Value>,
    #[serde(rename = "updateIntervalUI")]
    update_interval_ui: Option<Value>,
    restore_size: Option<Value>,
}

/// Validated configuration file.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Config {
    themes: [Option<String>; 3],
    font_quality: Option<FontQuality>,
    fader_scroll_step: Option<u32>,
    fader_shift_scroll_step: Option<u32>,
    ui_update_interval: Option<u32>,
    restore_size: Option<bool>,
}

impl Config {
    #[tracing::instrument(skip(json))]
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let raw: RawConfig = serde_json::from_str(json)?;
        let misc = raw.misc.unwrap_or_default();

        let mut themes: [Option<String>; 3] = Default::default();
        match raw.theme {
            Some(Value::Object(map)) => {
                for (flavor, theme) in Flavor::ALL.iter().zip(&mut themes) {
                    *theme = map
                        .get(flavor.name())
                        .and_then(|value| as_string(flavor.name(), value));
                }
            }
            Some(Value::Null) | None => {}
            Some(other) => warn!("`theme` must be an object, found {other}"),
        }

        let config = Self {
            themes,
            font_quality: misc
                .font_quality
                .as_ref()
                .and_then(|value| as_u32("fontQuality", value))
                .and_then(|value| {
                    let quality = u8::try_from(value).ok().and_then(FontQuality::new);
                    if quality.is_none() {
                        warn!("`fontQuality` must be between 0 and {}", FontQuality::MAX);
                    }

                    quality
                }),
            fader_scroll_step: misc
                .fader_scroll_step
                .as_ref()
                .and_then(|value| as_u32("faderScrollStep", value)),
            fader_shift_scroll_step: misc
                .fader_shift_scroll_step
                .as_ref()
                .and_then(|value| as_u32("faderShiftScrollStep", value)),
            ui_update_interval: misc
                .update_interval_ui
                .as_ref()
                .and_then(|value| as_u32("updateIntervalUI", value)),
            restore_size: misc.restore_size.as_ref().and_then(|value| match value {
                Value::Bool(restore) => Some(*restore),
                other => {
                    warn!("`restoreSize` must be a boolean, found {other}");
                    None
                }
            }),
        };
        debug!("config: {config:?}");

        Ok(config)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;

        Self::from_json(&json).with_context(|| format!("cannot parse {}", path.display()))
    }
}

fn as_u32(name: &str, value: &Value) -> Option<u32> {
    let res = value.as_u64().and_then(|value| u32::try_from(value).ok());
    if res.is_none() {
        warn!("`{name}` must be a non-negative integer, found {value}");
    }

    res
}

fn as_string(name: &str, value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::String(_) | Value::Null => None,
        other => {
            warn!("theme for `{name}` must be a string, found {other}");
            None
        }
    }
}

impl ConfigProvider for Config {
    fn theme_name(&self, flavor: Flavor) -> Option<&str> {
        let index = Flavor::ALL.iter().position(|f| *f == flavor)?;
        self.themes[index].as_deref()
    }

    fn font_quality(&self) -> Option<FontQuality> {
        self.font_quality
    }

    fn fader_scroll_step(&self) -> Option<u32> {
        self.fader_scroll_step
    }

    fn fader_shift_scroll_step(&self) -> Option<u32> {
        self.fader_shift_scroll_step
    }

    fn ui_update_interval(&self) -> Option<u32> {
        self.ui_update_interval
    }

    fn restore_size(&self) -> Option<bool> {
        self.restore_size
    }
}

/// Per-user directory holding configuration, themes and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDirs {
    root: PathBuf,
}

impl UserDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn theme_dir(&self, theme: &str) -> PathBuf {
        self.root.join(THEMES_DIR).join(theme)
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join(THEMES_DIR).join(LOG_FILE)
    }
}

#[cfg(windows)]
mod known_folder {
    use std::{ffi::OsString, os::windows::ffi::OsStringExt, path::PathBuf};

    use anyhow::Context;
    use scopeguard::defer;
    use windows::Win32::{
        System::Com::CoTaskMemFree,
        UI::Shell::{FOLDERID_Documents, KF_FLAG_DEFAULT, SHGetKnownFolderPath},
    };

    use super::UserDirs;

    /// Directory the host keeps its user files in, under Documents.
    pub const PRODUCT_DIR: &str = "Voicemeeter";

    impl UserDirs {
        pub fn locate() -> anyhow::Result<Self> {
            let documents = unsafe {
                let path = SHGetKnownFolderPath(&FOLDERID_Documents, KF_FLAG_DEFAULT, None)
                    .context("cannot locate documents folder")?;
                defer!(CoTaskMemFree(Some(path.0 as _)));

                PathBuf::from(OsString::from_wide(path.as_wide()))
            };

            Ok(Self::new(documents.join(PRODUCT_DIR)))
        }
    }
}
