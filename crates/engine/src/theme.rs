//! Theme assets and the static tables the themed hooks consult.

pub mod bitmap;
pub mod color;
pub mod flavor;
pub mod font;

use std::{fs, path::Path};

use anyhow::Context;
use tracing::debug;

use bitmap::BitmapSet;
use color::ColorMap;
use flavor::{Flavor, FlavorInfo};

pub const COLORS_FILE: &str = "colors.json";

/// Assets of the configured theme for the running flavor.
#[derive(Debug)]
pub struct Theme {
    flavor: Flavor,
    colors: ColorMap,
    bitmaps: BitmapSet,
}

impl Theme {
    pub const fn new(flavor: Flavor, colors: ColorMap, bitmaps: BitmapSet) -> Self {
        Self {
            flavor,
            colors,
            bitmaps,
        }
    }

    /// Load a theme from its directory.
    ///
    /// The color tables live in the theme directory, bitmaps in a sub
    /// directory named after the flavor.
    #[tracing::instrument]
    pub fn load(dir: &Path, flavor: Flavor) -> anyhow::Result<Self> {
        let colors_path = dir.join(COLORS_FILE);
        let colors = fs::read_to_string(&colors_path)
            .with_context(|| format!("cannot read {}", colors_path.display()))?;
        let colors = ColorMap::from_json(&colors)
            .with_context(|| format!("cannot parse {}", colors_path.display()))?;

        let bitmaps = BitmapSet::load(&dir.join(flavor.name()), flavor.info())
            .context("cannot load theme bitmaps")?;

        debug!("theme loaded with {} color mapping(s)", colors.len());
        Ok(Self::new(flavor, colors, bitmaps))
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
    pub const fn colors(&self) -> &ColorMap {
        &self.colors
    }

    #[inline]
    pub const fn bitmaps(&self) -> &BitmapSet {
        &self.bitmaps
    }
}
