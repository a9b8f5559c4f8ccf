//! Byte signature scanning over the host image.
//!
//! Functions the host does not export are located by matching a byte
//! pattern with wildcard positions against the loaded image. Scanning is a
//! plain left to right search and only runs during startup.

use core::fmt::{self, Debug, Formatter};

use thiserror::Error;

/// Signature construction error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature is empty")]
    Empty,

    #[error("pattern has {pattern} byte(s) but mask has {mask}")]
    LengthMismatch { pattern: usize, mask: usize },

    #[error("invalid mask character `{0}`")]
    InvalidMask(char),

    #[error("invalid pattern token `{0}`")]
    InvalidToken(String),
}

/// A byte pattern where each position either must match or is a wildcard.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature {
    name: &'static str,
    pattern: Vec<u8>,
    mask: Vec<bool>,
}

impl Signature {
    /// Create a signature from a pattern and a mask string.
    ///
    /// Mask uses `x` for a byte that must match and `?` for a wildcard.
    pub fn new(name: &'static str, pattern: &[u8], mask: &str) -> Result<Self, SignatureError> {
        let mask = mask
            .chars()
            .map(|c| match c {
                'x' => Ok(true),
                '?' => Ok(false),
                c => Err(SignatureError::InvalidMask(c)),
            })
            .collect::<Result<Vec<_>, _>>()?;

        if pattern.len() != mask.len() {
            return Err(SignatureError::LengthMismatch {
                pattern: pattern.len(),
                mask: mask.len(),
            });
        }

        if pattern.is_empty() {
            return Err(SignatureError::Empty);
        }

        Ok(Self {
            name,
            pattern: pattern.to_vec(),
            mask,
        })
    }

    /// Parse a space separated hex pattern such as `DC 0D ?? ?? 8D`.
    pub fn parse(name: &'static str, text: &str) -> Result<Self, SignatureError> {
        let mut pattern = Vec::new();
        let mut mask = Vec::new();
        for token in text.split_whitespace() {
            if token.chars().all(|c| c == '?') && token.len() <= 2 {
                pattern.push(0);
                mask.push(false);
                continue;
            }

            let byte = u8::from_str_radix(token, 16)
                .ok()
                .filter(|_| token.len() == 2)
                .ok_or_else(|| SignatureError::InvalidToken(token.to_owned()))?;
            pattern.push(byte);
            mask.push(true);
        }

        if pattern.is_empty() {
            return Err(SignatureError::Empty);
        }

        Ok(Self {
            name,
            pattern,
            mask,
        })
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pattern.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pattern.is_empty()
    }

    /// Test the signature against a window of exactly [`Signature::len`] bytes.
    #[inline]
    pub fn matches(&self, window: &[u8]) -> bool {
        window.len() == self.pattern.len()
            && self
                .pattern
                .iter()
                .zip(&self.mask)
                .zip(window)
                .all(|((&expected, &significant), &actual)| !significant || expected == actual)
    }
}

impl Debug for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}: ", self.name)?;
        for (i, (byte, significant)) in self.pattern.iter().zip(&self.mask).enumerate() {
            if i != 0 {
                f.write_str(" ")?;
            }

            if *significant {
                write!(f, "{byte:02X}")?;
            } else {
                f.write_str("??")?;
            }
        }
        f.write_str(")")
    }
}

/// A readable span of the host image.
#[derive(Clone, Copy)]
pub struct ImageRegion<'a> {
    base: usize,
    bytes: &'a [u8],
}

impl<'a> ImageRegion<'a> {
    /// Region over a byte slice whose first byte lives at `base`.
    pub const fn new(base: usize, bytes: &'a [u8]) -> Self {
        Self { base, bytes }
    }

    /// Region over a byte slice addressed from its own location.
    pub fn from_slice(bytes: &'a [u8]) -> Self {
        Self {
            base: bytes.as_ptr() as usize,
            bytes,
        }
    }

    #[inline]
    pub const fn base(&self) -> usize {
        self.base
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub const fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Sub region starting at `offset`, at most `len` bytes long.
    pub fn slice(&self, offset: usize, len: usize) -> Option<ImageRegion<'a>> {
        let rest = self.bytes.get(offset..)?;
        Some(ImageRegion {
            base: self.base + offset,
            bytes: &rest[..len.min(rest.len())],
        })
    }

    /// Offset of the first match of `sig`.
    pub fn find(&self, sig: &Signature) -> Option<usize> {
        if sig.is_empty() {
            return None;
        }

        self.bytes.windows(sig.len()).position(|w| sig.matches(w))
    }

    /// Address of the first match of `sig`.
    pub fn scan(&self, sig: &Signature) -> Option<usize> {
        self.find(sig).map(|offset| self.base + offset)
    }

    /// Offsets of every match of `sig`, overlapping matches included.
    pub fn find_all<'s>(&self, sig: &'s Signature) -> impl Iterator<Item = usize> + use<'a, 's> {
        let len = if sig.is_empty() { usize::MAX } else { sig.len() };
        self.bytes
            .windows(len.min(self.bytes.len() + 1).max(1))
            .enumerate()
            .filter(move |(_, w)| sig.matches(w))
            .map(|(offset, _)| offset)
    }
}

impl Debug for ImageRegion<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRegion")
            .field("base", &format_args!("{:#x}", self.base))
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[cfg(windows)]
mod module {
    use core::{mem, slice};

    use anyhow::Context;
    use windows::Win32::System::{
        LibraryLoader::GetModuleHandleW,
        ProcessStatus::{GetModuleInformation, MODULEINFO},
        Threading::GetCurrentProcess,
    };

    use super::ImageRegion;

    impl ImageRegion<'static> {
        /// Region covering the host executable image.
        ///
        /// # Safety
        /// The whole image must stay mapped and readable for the process lifetime.
        pub unsafe fn host_module() -> anyhow::Result<Self> {
            unsafe {
                let module = GetModuleHandleW(None).context("failed to get module handle")?;

                let mut info = MODULEINFO::default();
                GetModuleInformation(
                    GetCurrentProcess(),
                    module,
                    &mut info,
                    mem::size_of::<MODULEINFO>() as u32,
                )
                .context("failed to get module information")?;

                let base = info.lpBaseOfDll as usize;
                Ok(ImageRegion::new(
                    base,
                    slice::from_raw_parts(base as *const u8, info.SizeOfImage as usize),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_and_pattern_must_agree() {
        assert_eq!(
            Signature::new("a", &[1, 2, 3], "xx"),
            Err(SignatureError::LengthMismatch {
                pattern: 3,
                mask: 2
            })
        );
        assert_eq!(
            Signature::new("a", &[1], "y"),
            Err(SignatureError::InvalidMask('y'))
        );
        assert_eq!(Signature::new("a", &[], ""), Err(SignatureError::Empty));
    }

    #[test]
    fn parse_equals_masked_form() {
        let parsed = Signature::parse("fmul", "DC 0D ?? ?? ?? ?? 8D ? ?? ?? DE E9").unwrap();
        let masked = Signature::new(
            "fmul",
            &[0xDC, 0x0D, 0, 0, 0, 0, 0x8D, 0, 0, 0, 0xDE, 0xE9],
            "xx????x???xx",
        )
        .unwrap();
        assert_eq!(parsed, masked);
        assert_eq!(
            format!("{parsed:?}"),
            "Signature(fmul: DC 0D ?? ?? ?? ?? 8D ?? ?? ?? DE E9)"
        );

        assert!(matches!(
            Signature::parse("bad", "DC 0DX"),
            Err(SignatureError::InvalidToken(_))
        ));
        assert_eq!(Signature::parse("none", "  "), Err(SignatureError::Empty));
    }

    #[test]
    fn match_at_region_end_is_found() {
        let sig = Signature::parse("tail", "AA BB").unwrap();
        let bytes = [0, 0, 0, 0xAA, 0xBB];
        let region = ImageRegion::new(0x1000, &bytes);
        assert_eq!(region.find(&sig), Some(3));
        assert_eq!(region.scan(&sig), Some(0x1003));
    }

    #[test]
    fn pattern_longer_than_region() {
        let sig = Signature::parse("long", "AA BB CC").unwrap();
        let bytes = [0xAA, 0xBB];
        let region = ImageRegion::new(0, &bytes);
        assert_eq!(region.find(&sig), None);
        assert_eq!(region.find_all(&sig).count(), 0);
    }

    #[test]
    fn find_all_reports_overlaps() {
        let sig = Signature::parse("pair", "AA ?? AA").unwrap();
        let bytes = [0xAA, 1, 0xAA, 2, 0xAA, 3];
        let region = ImageRegion::new(0, &bytes);
        assert_eq!(region.find_all(&sig).collect::<Vec<_>>(), [0, 2]);
    }

    #[test]
    fn slice_is_clamped() {
        let bytes = [0u8; 16];
        let region = ImageRegion::new(0x400000, &bytes);
        let sub = region.slice(10, 100).unwrap();
        assert_eq!(sub.base(), 0x40000A);
        assert_eq!(sub.len(), 6);
        assert!(region.slice(17, 1).is_none());
    }
}
