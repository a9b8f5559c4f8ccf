use core::ops::RangeInclusive;

use crate::geometry::Size;

/// Window class of the host main window.
pub const MAIN_CLASS: &[u8] = b"VBCABLE0Voicemeeter0MainWindow0";

/// Window class shared by the compressor and denoiser panels.
pub const COMP_DENOISE_CLASS: &[u8] = b"C_VB2CTL_Free_00\xA9VBurel";

/// Window class of the application volume panel.
pub const APP_VOLUME_CLASS: &[u8] = b"C_VB2CTL_Free_00_wdb\xA9VBurel";

/// Managed window kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    Main,
    AppVolume,
    Compressor,
    Denoiser,
}

impl WindowKind {
    pub const CHILDREN: [WindowKind; 3] = [Self::AppVolume, Self::Compressor, Self::Denoiser];

    #[inline]
    pub const fn is_child(self) -> bool {
        !matches!(self, Self::Main)
    }

    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::AppVolume => "app volume",
            Self::Compressor => "compressor",
            Self::Denoiser => "denoiser",
        }
    }

    /// ANSI class name the host registers the kind under.
    #[inline]
    pub const fn class(self) -> &'static [u8] {
        match self {
            Self::Main => MAIN_CLASS,
            Self::AppVolume => APP_VOLUME_CLASS,
            Self::Compressor | Self::Denoiser => COMP_DENOISE_CLASS,
        }
    }

    /// Control identifiers the host creates the kind with.
    #[inline]
    pub const fn ids(self) -> Option<RangeInclusive<u32>> {
        match self {
            Self::Main => None,
            Self::AppVolume => Some(1000..=1002),
            Self::Compressor => Some(1100..=1104),
            Self::Denoiser => Some(1200..=1204),
        }
    }

    /// Pixels added around the scaled rect so the panel stays flush with its frame.
    #[inline]
    pub const fn correction(self) -> i32 {
        match self {
            Self::AppVolume => 1,
            _ => 0,
        }
    }

    /// Client size the host layout code expects from the kind.
    #[inline]
    pub const fn design_client_size(self) -> Option<Size> {
        match self {
            Self::Main => None,
            Self::AppVolume => Some(Size::new(100, 386)),
            Self::Compressor | Self::Denoiser => Some(Size::new(153, 413)),
        }
    }

    /// Child kind whose class matches `class`, for reporting its design size.
    pub fn child_for_class(class: &[u8]) -> Option<Self> {
        if class == APP_VOLUME_CLASS {
            Some(Self::AppVolume)
        } else if class == COMP_DENOISE_CLASS {
            Some(Self::Compressor)
        } else {
            None
        }
    }
}
