use core::fmt::{self, Display, Formatter};

/// Host product variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flavor {
    Default,
    Banana,
    Potato,
}

impl Flavor {
    pub const ALL: [Flavor; 3] = [Flavor::Default, Flavor::Banana, Flavor::Potato];

    /// Match the product name of the host version resource.
    pub fn from_product_name(name: &str) -> Option<Self> {
        match name.trim_end_matches('\0') {
            "VoiceMeeter" => Some(Self::Default),
            "VoiceMeeter Banana" => Some(Self::Banana),
            "VoiceMeeter Potato" => Some(Self::Potato),
            _ => None,
        }
    }

    #[inline]
    pub const fn info(self) -> &'static FlavorInfo {
        match self {
            Self::Default => &DEFAULT,
            Self::Banana => &BANANA,
            Self::Potato => &POTATO,
        }
    }

    /// Lowercase name used for configuration keys and theme directories.
    #[inline]
    pub const fn name(self) -> &'static str {
        self.info().name
    }

    /// Name of the registry key holding persisted state.
    #[inline]
    pub const fn key_name(self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::Banana => "Banana",
            Self::Potato => "Potato",
        }
    }
}

impl Display for Flavor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Layout constants of a host flavor, in logical pixels.
#[derive(Debug)]
pub struct FlavorInfo {
    pub name: &'static str,

    /// Widths of the main, settings and cassette background bitmaps. 0 if absent.
    pub bitmap_width_main: i32,
    pub bitmap_width_settings: i32,
    pub bitmap_width_cassette: i32,

    /// Horizontal extent of the draggable caption band.
    pub caption_x: (i32, i32),

    /// Top-left corners of rectangles hiding the background, suppressed when themed.
    pub masks: &'static [(i32, i32)],
}

/// Height of the caption band.
pub const CAPTION_HEIGHT: i32 = 40;

impl FlavorInfo {
    /// Whether a logical point lies on the caption band.
    #[inline]
    pub const fn in_caption(&self, x: i32, y: i32) -> bool {
        x > self.caption_x.0 && x < self.caption_x.1 && y < CAPTION_HEIGHT
    }

    #[inline]
    pub fn is_mask(&self, left: i32, top: i32) -> bool {
        self.masks.contains(&(left, top))
    }
}

static DEFAULT: FlavorInfo = FlavorInfo {
    name: "default",
    bitmap_width_main: 1024,
    bitmap_width_settings: 552,
    bitmap_width_cassette: 0,
    caption_x: (235, 750),
    masks: &[],
};

static BANANA: FlavorInfo = FlavorInfo {
    name: "banana",
    bitmap_width_main: 1024,
    bitmap_width_settings: 550,
    bitmap_width_cassette: 800,
    caption_x: (305, 744),
    masks: &[
        // menu button
        (848, 15),
        // bus fader boxes
        (789, 432),
        (727, 432),
        (913, 432),
        (851, 432),
    ],
};

static POTATO: FlavorInfo = FlavorInfo {
    name: "potato",
    bitmap_width_main: 1645,
    bitmap_width_settings: 835,
    bitmap_width_cassette: 1050,
    caption_x: (340, 1045),
    masks: &[
        // menu button
        (1469, 15),
        // bus fader boxes
        (1221, 581),
        (1159, 581),
        (1345, 581),
        (1283, 581),
    ],
};
