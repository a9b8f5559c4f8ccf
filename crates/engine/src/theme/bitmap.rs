use std::{fs, io, path::Path};

use tracing::{debug, warn};

use super::flavor::FlavorInfo;

/// Size of `BITMAPFILEHEADER`.
const FILE_HEADER_LEN: usize = 14;

/// Offset of `bfOffBits` in `BITMAPFILEHEADER`.
const PIXEL_OFFSET_FIELD: usize = 10;

/// A `.bmp` file kept in memory.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    data: Vec<u8>,
}

impl Bitmap {
    pub fn from_bytes(data: Vec<u8>) -> Option<Self> {
        if data.len() < FILE_HEADER_LEN || &data[..2] != b"BM" {
            return None;
        }

        Some(Self { data })
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let data = fs::read(path)?;
        Self::from_bytes(data).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a bitmap file", path.display()),
            )
        })
    }

    /// Offset of the pixel array.
    #[inline]
    pub fn pixel_offset(&self) -> usize {
        u32::from_le(bytemuck::pod_read_unaligned(
            &self.data[PIXEL_OFFSET_FIELD..PIXEL_OFFSET_FIELD + 4],
        )) as usize
    }

    /// Pixel array as stored in the file.
    pub fn pixels(&self) -> &[u8] {
        self.data.get(self.pixel_offset()..).unwrap_or_default()
    }

    /// Copy pixel data into `dst`, bounded by both buffers.
    ///
    /// Returns number of bytes copied.
    pub fn copy_pixels(&self, dst: &mut [u8]) -> usize {
        let src = self.pixels();
        let len = src.len().min(dst.len());
        if len < dst.len() {
            warn!(
                "bitmap pixel data is {} byte(s), section expects {}",
                src.len(),
                dst.len()
            );
        }

        dst[..len].copy_from_slice(&src[..len]);
        len
    }
}

/// Byte length of a DIB pixel array.
///
/// `size_image` is used when set, otherwise it is computed from the
/// dimensions with rows padded to 4 bytes. Top-down DIBs carry a negative
/// height.
pub fn dib_image_size(width: i32, height: i32, bit_count: u16, size_image: u32) -> usize {
    if size_image != 0 {
        return size_image as usize;
    }

    let stride = (width.unsigned_abs() as usize * usize::from(bit_count)).div_ceil(32) * 4;
    stride * height.unsigned_abs() as usize
}

impl core::fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Bitmap")
            .field("len", &self.data.len())
            .field("pixel_offset", &self.pixel_offset())
            .finish()
    }
}

/// Background bitmaps of a theme.
#[derive(Debug, Default, Clone)]
pub struct BitmapSet {
    pub main: Option<Bitmap>,
    pub settings: Option<Bitmap>,
    pub cassette: Option<Bitmap>,
}

pub const MAIN_FILE: &str = "bg.bmp";
pub const SETTINGS_FILE: &str = "bg_settings.bmp";
pub const CASSETTE_FILE: &str = "bg_cassette.bmp";

impl BitmapSet {
    /// Load the bitmaps a flavor uses from `dir`.
    ///
    /// A bitmap the flavor does not have is not required.
    pub fn load(dir: &Path, info: &FlavorInfo) -> io::Result<Self> {
        let load = |width: i32, name: &str| -> io::Result<Option<Bitmap>> {
            if width == 0 {
                return Ok(None);
            }

            let path = dir.join(name);
            debug!("loading {}", path.display());
            Bitmap::load(&path).map(Some)
        };

        Ok(Self {
            main: load(info.bitmap_width_main, MAIN_FILE)?,
            settings: load(info.bitmap_width_settings, SETTINGS_FILE)?,
            cassette: load(info.bitmap_width_cassette, CASSETTE_FILE)?,
        })
    }

    /// Replacement for a DIB section `width` pixels wide.
    pub fn select(&self, info: &FlavorInfo, width: i32) -> Option<&Bitmap> {
        if width <= 0 {
            return None;
        }

        if width == info.bitmap_width_main {
            self.main.as_ref()
        } else if width == info.bitmap_width_settings {
            self.settings.as_ref()
        } else if width == info.bitmap_width_cassette {
            self.cassette.as_ref()
        } else {
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::theme::flavor::Flavor;

    pub fn bitmap_bytes(offset: u32, pixels: &[u8]) -> Vec<u8> {
        let mut data = vec![0; offset as usize];
        data[..2].copy_from_slice(b"BM");
        data[PIXEL_OFFSET_FIELD..PIXEL_OFFSET_FIELD + 4].copy_from_slice(&offset.to_le_bytes());
        data.extend_from_slice(pixels);
        data
    }

    #[test]
    fn header_is_required() {
        assert!(Bitmap::from_bytes(vec![0; 64]).is_none());
        assert!(Bitmap::from_bytes(b"BM".to_vec()).is_none());
        assert!(Bitmap::from_bytes(bitmap_bytes(54, &[])).is_some());
    }

    #[test]
    fn copy_is_bounded_by_both_sides() {
        let bitmap = Bitmap::from_bytes(bitmap_bytes(54, &[1, 2, 3, 4])).unwrap();
        assert_eq!(bitmap.pixel_offset(), 54);
        assert_eq!(bitmap.pixels(), &[1, 2, 3, 4]);

        let mut small = [0u8; 2];
        assert_eq!(bitmap.copy_pixels(&mut small), 2);
        assert_eq!(small, [1, 2]);

        let mut large = [9u8; 6];
        assert_eq!(bitmap.copy_pixels(&mut large), 4);
        assert_eq!(large, [1, 2, 3, 4, 9, 9]);
    }

    #[test]
    fn offset_past_end() {
        let mut data = bitmap_bytes(54, &[1, 2]);
        data[PIXEL_OFFSET_FIELD..PIXEL_OFFSET_FIELD + 4].copy_from_slice(&1000u32.to_le_bytes());
        let bitmap = Bitmap::from_bytes(data).unwrap();
        assert!(bitmap.pixels().is_empty());
        assert_eq!(bitmap.copy_pixels(&mut [0; 4]), 0);
    }

    #[test]
    fn dib_size_from_header() {
        assert_eq!(dib_image_size(1024, 552, 32, 0), 1024 * 552 * 4);
        assert_eq!(dib_image_size(3, -2, 24, 0), 12 * 2);
        assert_eq!(dib_image_size(1024, 552, 32, 100), 100);
    }

    #[test]
    fn select_by_width() {
        let info = Flavor::Default.info();
        let main = Bitmap::from_bytes(bitmap_bytes(54, &[1])).unwrap();
        let settings = Bitmap::from_bytes(bitmap_bytes(54, &[2])).unwrap();
        let set = BitmapSet {
            main: Some(main.clone()),
            settings: Some(settings.clone()),
            cassette: None,
        };

        assert_eq!(set.select(info, 1024), Some(&main));
        assert_eq!(set.select(info, 552), Some(&settings));
        assert_eq!(set.select(info, 0), None);
        assert_eq!(set.select(info, 800), None);
    }
}
