//! Supported aspect ratios and output resolutions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Output aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "4:3")]
    Standard,
    #[serde(rename = "14:9")]
    Cinema,
    #[serde(rename = "9:16")]
    Tall,
    #[serde(rename = "16:9")]
    Wide,
}

impl AspectRatio {
    /// All ratios in menu order.
    pub const ALL: [AspectRatio; 4] = [
        AspectRatio::Standard,
        AspectRatio::Cinema,
        AspectRatio::Tall,
        AspectRatio::Wide,
    ];

    pub const DEFAULT: AspectRatio = AspectRatio::Wide;

    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Standard => "4:3",
            AspectRatio::Cinema => "14:9",
            AspectRatio::Tall => "9:16",
            AspectRatio::Wide => "16:9",
        }
    }

    /// Resolutions offered for this ratio, smallest first.
    pub fn resolutions(self) -> &'static [Resolution] {
        match self {
            AspectRatio::Standard => STANDARD,
            AspectRatio::Cinema => CINEMA,
            AspectRatio::Tall => TALL,
            AspectRatio::Wide => WIDE,
        }
    }

    /// The first listed resolution.
    pub fn default_resolution(self) -> Resolution {
        self.resolutions()[0]
    }

    /// Look up a resolution by label (`"720p"`) or by size (`"1280x720"`).
    pub fn resolution(self, label: &str) -> Result<Resolution, ModelError> {
        let label = label.trim();
        self.resolutions()
            .iter()
            .find(|r| r.label.eq_ignore_ascii_case(label) || r.size_label() == label)
            .copied()
            .ok_or_else(|| ModelError::UnknownResolution {
                aspect: self.as_str().to_string(),
                resolution: label.to_string(),
            })
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        AspectRatio::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| ModelError::UnknownAspectRatio(s.to_string()))
    }
}

/// A concrete output size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,

    /// Whether the player is told to render in widescreen mode.
    pub widescreen: bool,
}

impl Resolution {
    const fn new(label: &'static str, width: u32, height: u32, widescreen: bool) -> Self {
        Self {
            label,
            width,
            height,
            widescreen,
        }
    }

    /// `"{width}x{height}"`.
    pub fn size_label(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Sizes above 720p are known to strain capture.
    pub fn exceeds_recommended(&self) -> bool {
        self.width > 1280 && self.height > 720
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}x{})", self.label, self.width, self.height)
    }
}

const STANDARD: &[Resolution] = &[
    Resolution::new("240p", 320, 240, false),
    Resolution::new("360p", 480, 360, false),
    Resolution::new("420p", 560, 420, false),
    Resolution::new("480p", 640, 480, false),
];

const CINEMA: &[Resolution] = &[
    Resolution::new("360p", 640, 360, false),
    Resolution::new("480p", 854, 480, false),
    Resolution::new("720p", 1280, 720, false),
    Resolution::new("1080p", 1920, 1080, false),
    Resolution::new("2k", 2560, 1440, false),
    Resolution::new("4k", 3840, 2160, false),
    Resolution::new("5k", 5120, 2880, false),
    Resolution::new("8k", 7680, 4320, false),
];

const WIDE: &[Resolution] = &[
    Resolution::new("360p", 640, 360, true),
    Resolution::new("480p", 854, 480, true),
    Resolution::new("720p", 1280, 720, true),
    Resolution::new("1080p", 1920, 1080, true),
    Resolution::new("2k", 2560, 1440, true),
    Resolution::new("4k", 3840, 2160, true),
    Resolution::new("5k", 5120, 2880, true),
    Resolution::new("8k", 7680, 4320, true),
];

const TALL: &[Resolution] = &[
    Resolution::new("360p", 360, 640, false),
    Resolution::new("480p", 480, 854, false),
    Resolution::new("720p", 720, 1280, false),
    Resolution::new("1080p", 1080, 1920, false),
    Resolution::new("2k", 1440, 2560, false),
    Resolution::new("4k", 2160, 3840, false),
    Resolution::new("5k", 2880, 5120, false),
    Resolution::new("8k", 4320, 7680, false),
];
