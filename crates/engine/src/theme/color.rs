use core::fmt::{self, Debug, Display, Formatter};
use std::collections::HashMap;

use nohash_hasher::IntMap;
use serde::Deserialize;
use tracing::warn;

/// GDI color in `0x00BBGGRR` layout.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct ColorRef(pub u32);

impl nohash_hasher::IsEnabled for ColorRef {}

impl ColorRef {
    #[inline]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self(r as u32 | (g as u32) << 8 | (b as u32) << 16)
    }

    #[inline]
    pub const fn r(self) -> u8 {
        self.0 as u8
    }

    #[inline]
    pub const fn g(self) -> u8 {
        (self.0 >> 8) as u8
    }

    #[inline]
    pub const fn b(self) -> u8 {
        (self.0 >> 16) as u8
    }

    /// Parse `#RRGGBB` or `RRGGBB`, case-insensitive.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }

        let value = u32::from_str_radix(hex, 16).ok()?;
        Some(Self::rgb((value >> 16) as u8, (value >> 8) as u8, value as u8))
    }
}

impl Display for ColorRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r(), self.g(), self.b())
    }
}

impl Debug for ColorRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "ColorRef({self})")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorCategory {
    /// Pens and brushes.
    Shapes,
    Text,
}

#[derive(Deserialize)]
struct RawColors {
    #[serde(default)]
    shapes: HashMap<String, String>,

    #[serde(default)]
    text: HashMap<String, String>,
}

/// Color replacement tables of a theme.
#[derive(Debug, Default, Clone)]
pub struct ColorMap {
    shapes: IntMap<ColorRef, ColorRef>,
    text: IntMap<ColorRef, ColorRef>,
}

impl ColorMap {
    /// Parse `colors.json`.
    ///
    /// Entries with an empty replacement are kept unmapped. Malformed entries
    /// are skipped with a warning.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let raw: RawColors = serde_json::from_str(json)?;

        Ok(Self {
            shapes: build_table("shapes", raw.shapes),
            text: build_table("text", raw.text),
        })
    }

    #[inline]
    fn table(&self, category: ColorCategory) -> &IntMap<ColorRef, ColorRef> {
        match category {
            ColorCategory::Shapes => &self.shapes,
            ColorCategory::Text => &self.text,
        }
    }

    /// Replacement for `color`, if the theme has one.
    #[inline]
    pub fn lookup(&self, category: ColorCategory, color: ColorRef) -> Option<ColorRef> {
        self.table(category).get(&color).copied()
    }

    /// `color` after remapping.
    #[inline]
    pub fn apply(&self, category: ColorCategory, color: ColorRef) -> ColorRef {
        self.lookup(category, color).unwrap_or(color)
    }

    pub fn len(&self) -> usize {
        self.shapes.len() + self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty() && self.text.is_empty()
    }
}

fn build_table(name: &str, raw: HashMap<String, String>) -> IntMap<ColorRef, ColorRef> {
    let mut table = IntMap::default();
    for (from, to) in raw {
        if to.is_empty() {
            continue;
        }

        match (ColorRef::from_hex(&from), ColorRef::from_hex(&to)) {
            (Some(from), Some(to)) => {
                table.insert(from, to);
            }
            _ => warn!("skipping malformed {name} color entry `{from}`: `{to}`"),
        }
    }

    table
}
