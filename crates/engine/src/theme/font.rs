//! Font adjustments for themed rendering.

use tracing::trace;

use crate::config::FontQuality;

/// Font heights replaced when themed, `(original, replacement)`.
pub const FONT_HEIGHT_MAP: &[(i32, i32)] = &[(20, 18), (16, 15)];

/// Replacement height for `height`, if it is remapped.
#[inline]
pub fn remap_height(height: i32) -> Option<i32> {
    FONT_HEIGHT_MAP
        .iter()
        .find(|(from, _)| *from == height)
        .map(|(_, to)| *to)
}

/// Height and quality a font request ends up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontRequest {
    pub height: i32,
    pub quality: u8,
}

impl FontRequest {
    /// Apply the height table and a configured quality.
    ///
    /// Heights absent from the table keep their original value.
    pub fn adjust(self, quality: Option<FontQuality>) -> Self {
        let height = match remap_height(self.height) {
            Some(height) => height,
            None => {
                trace!("no height mapping for {}", self.height);
                self.height
            }
        };

        Self {
            height,
            quality: quality.map_or(self.quality, FontQuality::get),
        }
    }
}
