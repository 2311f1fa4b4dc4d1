//! Waveform update modes.
//!
//! Ordinals are fixed by the controller firmware.

use std::fmt;

/// Waveform used for a display refresh.
///
/// The controller does not check that pixel values in the refreshed area
/// suit the chosen mode; keeping them compatible is the caller's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum UpdateMode {
    /// Full erase to white.
    ///
    /// Use when memory no longer matches the optical state of the panel,
    /// e.g. after a full power-down. Only meaningful on the whole panel.
    Init = 0,
    /// Fast, non-flashy update to black or white only.
    Du = 1,
    /// Full quality 16-level update. With a partial area only changed
    /// pixels update.
    #[default]
    Gc16 = 2,
    /// 16 levels with reduced flash, for sparse content such as
    /// anti-aliased text on white.
    Gl16 = 3,
    /// Like `Gl16` with reduced artifacts; needs matching image
    /// preprocessing.
    Glr16 = 4,
    /// Like `Glr16`; recommended for full-display updates only.
    Gld16 = 5,
    /// Fastest black/white mode for page turns and simple animation.
    A2 = 6,
    /// Fast, non-flashy gray-to-gray update.
    Du4 = 7,
}

impl UpdateMode {
    /// All modes in ordinal order.
    pub const ALL: [Self; 8] = [
        Self::Init,
        Self::Du,
        Self::Gc16,
        Self::Gl16,
        Self::Glr16,
        Self::Gld16,
        Self::A2,
        Self::Du4,
    ];

    /// Firmware ordinal.
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Mode for a firmware ordinal.
    pub fn from_ordinal(value: u8) -> Option<Self> {
        Self::ALL
            .get(usize::from(value))
            .copied()
    }

    /// Number of gray levels the waveform can produce.
    pub fn gray_levels(self) -> u8 {
        match self {
            Self::Init | Self::Du | Self::A2 => 2,
            Self::Du4 => 4,
            Self::Gc16 | Self::Gl16 | Self::Glr16 | Self::Gld16 => 16,
        }
    }

    /// Whether the mode only drives pixels to pure black or white.
    pub fn is_binary(self) -> bool {
        self.gray_levels() == 2
    }

    /// Parse a mode from its name (case-insensitive) or ordinal.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "init" => Some(Self::Init),
            "du" => Some(Self::Du),
            "gc16" => Some(Self::Gc16),
            "gl16" => Some(Self::Gl16),
            "glr16" => Some(Self::Glr16),
            "gld16" => Some(Self::Gld16),
            "a2" => Some(Self::A2),
            "du4" => Some(Self::Du4),
            other => other
                .parse::<u8>()
                .ok()
                .and_then(Self::from_ordinal),
        }
    }
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "INIT"),
            Self::Du => write!(f, "DU"),
            Self::Gc16 => write!(f, "GC16"),
            Self::Gl16 => write!(f, "GL16"),
            Self::Glr16 => write!(f, "GLR16"),
            Self::Gld16 => write!(f, "GLD16"),
            Self::A2 => write!(f, "A2"),
            Self::Du4 => write!(f, "DU4"),
        }
    }
}
