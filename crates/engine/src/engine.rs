//! Process-wide engine state.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, error, warn};

use crate::{
    config::{Config, ConfigProvider, UserDirs},
    geometry::Point,
    patch::scroll,
    renderer::Compositor,
    theme::{
        Theme,
        bitmap::Bitmap,
        color::{ColorCategory, ColorRef},
        flavor::{Flavor, FlavorInfo},
        font::FontRequest,
    },
    window::{manager::RenderManager, route::UI_TIMER_ID},
};

/// Configuration and render state shared by every interceptor.
pub struct Engine<C: Compositor> {
    flavor: Flavor,
    config: Config,
    theme: Option<Theme>,
    manager: Mutex<RenderManager<C>>,
    tray_menu: AtomicUsize,
}

impl<C: Compositor> Engine<C> {
    pub fn new(flavor: Flavor, config: Config, theme: Option<Theme>, compositor: C) -> Self {
        Self {
            flavor,
            config,
            theme,
            manager: Mutex::new(RenderManager::new(compositor)),
            tray_menu: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub const fn flavor(&self) -> Flavor {
        self.flavor
    }

    #[inline]
    pub const fn info(&self) -> &'static FlavorInfo {
        self.flavor.info()
    }

    #[inline]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub const fn theme(&self) -> Option<&Theme> {
        self.theme.as_ref()
    }

    /// Lock the render manager.
    ///
    /// Must not be held while calling into the host.
    #[inline]
    pub fn manager(&self) -> MutexGuard<'_, RenderManager<C>> {
        self.manager.lock()
    }

    pub fn set_tray_menu(&self, menu: usize) {
        self.tray_menu.store(menu, Ordering::Release);
    }

    pub fn is_tray_menu(&self, menu: usize) -> bool {
        let tray = self.tray_menu.load(Ordering::Acquire);
        tray != 0 && tray == menu
    }

    /// Whether a logical point lies in the draggable caption band.
    pub fn in_caption(&self, pt: Point) -> bool {
        self.info().in_caption(pt.x, pt.y)
    }

    pub fn remap_color(&self, category: ColorCategory, color: ColorRef) -> ColorRef {
        match &self.theme {
            Some(theme) => theme.colors().apply(category, color),
            None => color,
        }
    }

    pub fn adjust_font(&self, request: FontRequest) -> FontRequest {
        request.adjust(self.config.font_quality())
    }

    /// Whether a rectangle drawn at `(left, top)` masks the themed background.
    pub fn is_masked(&self, left: i32, top: i32) -> bool {
        self.theme.is_some() && self.info().is_mask(left, top)
    }

    /// Theme bitmap replacing a host bitmap `width` pixels wide.
    pub fn background(&self, width: i32) -> Option<&Bitmap> {
        self.theme.as_ref()?.bitmaps().select(self.info(), width)
    }

    /// Interval for a host timer requested at `interval` milliseconds.
    pub fn timer_interval(&self, id: usize, interval: u32) -> u32 {
        if id != UI_TIMER_ID {
            return interval;
        }

        self.config.ui_update_interval().unwrap_or(interval)
    }

    /// Wheel step after applying the configured multiplier.
    pub fn scroll_step(&self, step: u32, modifier_held: bool) -> u32 {
        let multiplier = if modifier_held {
            self.config.fader_shift_scroll_step()
        } else {
            self.config.fader_scroll_step()
        };

        scroll::scaled_step(step, multiplier)
    }
}

impl<C: Compositor> core::fmt::Debug for Engine<C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("flavor", &self.flavor)
            .field("config", &self.config)
            .field("theme", &self.theme)
            .finish_non_exhaustive()
    }
}

/// Read configuration and the configured theme of `flavor`.
///
/// A missing or malformed configuration file behaves as an empty one. A
/// theme which cannot be loaded disables theming.
#[tracing::instrument]
pub fn load_settings(dirs: &UserDirs, flavor: Flavor) -> (Config, Option<Theme>) {
    let path = dirs.config_file();
    let config = if path.exists() {
        Config::load(&path).unwrap_or_else(|err| {
            warn!("using default configuration. err: {err:?}");
            Config::default()
        })
    } else {
        debug!("{} not found, using default configuration", path.display());
        Config::default()
    };

    let theme = config.theme_name(flavor).and_then(|name| {
        match Theme::load(&dirs.theme_dir(name), flavor) {
            Ok(theme) => Some(theme),
            Err(err) => {
                error!("cannot load theme `{name}`, theming disabled. err: {err:?}");
                None
            }
        }
    });

    (config, theme)
}

/// Explicitly scoped process-wide value.
///
/// Empty until started and after shutdown. Readers get a shared handle so
/// shutdown never invalidates a value still in use.
pub struct Lifecycle<T> {
    state: RwLock<Option<Arc<T>>>,
}

impl<T> Lifecycle<T> {
    pub const fn new() -> Self {
        Self {
            state: RwLock::new(None),
        }
    }

    /// Install `value`. Returns `false` and drops it if already started.
    pub fn start(&self, value: T) -> bool {
        let mut state = self.state.write();
        if state.is_some() {
            return false;
        }

        *state = Some(Arc::new(value));
        true
    }

    #[inline]
    pub fn get(&self) -> Option<Arc<T>> {
        self.state.read().clone()
    }

    #[inline]
    pub fn is_started(&self) -> bool {
        self.state.read().is_some()
    }

    pub fn shutdown(&self) -> Option<Arc<T>> {
        self.state.write().take()
    }
}

impl<T> Default for Lifecycle<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, path::PathBuf};

    use super::*;
    use crate::{
        theme::{
            bitmap::{BitmapSet, tests::bitmap_bytes},
            color::ColorMap,
        },
        window::manager::tests::FakeCompositor,
    };

    fn engine(config: &str, theme: Option<Theme>) -> Engine<FakeCompositor> {
        Engine::new(
            Flavor::Banana,
            Config::from_json(config).unwrap(),
            theme,
            FakeCompositor::default(),
        )
    }

    fn banana_theme() -> Theme {
        let colors = ColorMap::from_json(r##"{ "shapes": { "#112233": "#445566" }, "text": {} }"##)
            .unwrap();
        Theme::new(Flavor::Banana, colors, BitmapSet::default())
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("reskin-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn scroll_steps_follow_modifier() {
        let engine = engine(
            r#"{ "misc": { "faderScrollStep": 2, "faderShiftScrollStep": 10 } }"#,
            None,
        );
        assert_eq!(engine.scroll_step(120, false), 240);
        assert_eq!(engine.scroll_step(120, true), 1200);

        let engine = self::engine("{}", None);
        assert_eq!(engine.scroll_step(120, true), 120);
    }

    #[test]
    fn timer_interval_only_for_ui_timer() {
        let engine = engine(r#"{ "misc": { "updateIntervalUI": 30 } }"#, None);
        assert_eq!(engine.timer_interval(UI_TIMER_ID, 50), 30);
        assert_eq!(engine.timer_interval(1, 50), 50);
        assert_eq!(self::engine("{}", None).timer_interval(UI_TIMER_ID, 50), 50);
    }

    #[test]
    fn theme_lookups() {
        let themed = engine(r#"{ "misc": { "fontQuality": 5 } }"#, Some(banana_theme()));
        assert_eq!(
            themed.remap_color(ColorCategory::Shapes, ColorRef::rgb(0x11, 0x22, 0x33)),
            ColorRef::rgb(0x44, 0x55, 0x66)
        );
        assert_eq!(
            themed.remap_color(ColorCategory::Text, ColorRef::rgb(0x11, 0x22, 0x33)),
            ColorRef::rgb(0x11, 0x22, 0x33)
        );
        assert!(themed.is_masked(848, 15));
        assert!(!themed.is_masked(1469, 15));
        assert_eq!(
            themed.adjust_font(FontRequest {
                height: 20,
                quality: 0
            }),
            FontRequest {
                height: 18,
                quality: 5
            }
        );

        let plain = engine("{}", None);
        assert!(!plain.is_masked(848, 15));
        assert!(plain.background(1024).is_none());
        assert_eq!(
            plain.remap_color(ColorCategory::Shapes, ColorRef::rgb(0x11, 0x22, 0x33)),
            ColorRef::rgb(0x11, 0x22, 0x33)
        );
    }

    #[test]
    fn caption_and_tray_menu() {
        let engine = engine("{}", None);
        assert!(engine.in_caption(Point::new(400, 10)));
        assert!(!engine.in_caption(Point::new(305, 10)));
        assert!(!engine.in_caption(Point::new(400, 40)));

        assert!(!engine.is_tray_menu(0));
        engine.set_tray_menu(0x42);
        assert!(engine.is_tray_menu(0x42));
        assert!(!engine.is_tray_menu(0x43));
    }

    #[test]
    fn settings_without_files() {
        let dir = scratch_dir("empty");
        let (config, theme) = load_settings(&UserDirs::new(&dir), Flavor::Potato);
        assert_eq!(config, Config::default());
        assert!(theme.is_none());
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn settings_with_theme() {
        let dir = scratch_dir("themed");
        let dirs = UserDirs::new(&dir);
        fs::write(
            dirs.config_file(),
            r#"{ "theme": { "banana": "dark", "potato": "missing" } }"#,
        )
        .unwrap();

        let theme_dir = dirs.theme_dir("dark");
        fs::create_dir_all(theme_dir.join("banana")).unwrap();
        fs::write(
            theme_dir.join("colors.json"),
            r##"{ "shapes": { "#000000": "#FFFFFF" }, "text": {} }"##,
        )
        .unwrap();
        for file in ["bg.bmp", "bg_settings.bmp", "bg_cassette.bmp"] {
            fs::write(theme_dir.join("banana").join(file), bitmap_bytes(14, &[1, 2, 3])).unwrap();
        }

        let (_, theme) = load_settings(&dirs, Flavor::Banana);
        let theme = theme.unwrap();
        assert_eq!(theme.colors().len(), 1);
        assert!(theme.bitmaps().select(Flavor::Banana.info(), 1024).is_some());

        let (_, theme) = load_settings(&dirs, Flavor::Potato);
        assert!(theme.is_none());

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn lifecycle_scopes_value() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.get().is_none());

        assert!(lifecycle.start(1));
        assert!(!lifecycle.start(2));
        assert_eq!(lifecycle.get().as_deref(), Some(&1));

        let held = lifecycle.get().unwrap();
        assert_eq!(lifecycle.shutdown().as_deref(), Some(&1));
        assert!(!lifecycle.is_started());
        assert_eq!(*held, 1);

        assert!(lifecycle.start(3));
        assert_eq!(lifecycle.get().as_deref(), Some(&3));
    }
}
