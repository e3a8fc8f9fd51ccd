//! Branded outro lookup.

use std::path::{Path, PathBuf};

use crate::resolution::{AspectRatio, Resolution};

/// Outro folder for an aspect ratio.
pub fn outro_family(aspect: AspectRatio) -> &'static str {
    match aspect {
        AspectRatio::Wide | AspectRatio::Cinema => "wide",
        AspectRatio::Standard => "standard",
        AspectRatio::Tall => "tall",
    }
}

/// `<assets>/outro/<family>/<W>x<H>.mp4`. The file may not exist.
pub fn outro_path(assets_dir: &Path, aspect: AspectRatio, resolution: &Resolution) -> PathBuf {
    assets_dir
        .join("outro")
        .join(outro_family(aspect))
        .join(format!("{}.mp4", resolution.size_label()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outro_path_by_family() {
        let assets = Path::new("/opt/goexport/assets");
        let r = AspectRatio::Cinema.resolution("720p").unwrap();
        assert_eq!(
            outro_path(assets, AspectRatio::Cinema, &r),
            PathBuf::from("/opt/goexport/assets/outro/wide/1280x720.mp4")
        );

        let r = AspectRatio::Tall.resolution("360p").unwrap();
        assert_eq!(
            outro_path(assets, AspectRatio::Tall, &r),
            PathBuf::from("/opt/goexport/assets/outro/tall/360x640.mp4")
        );
        assert_eq!(outro_family(AspectRatio::Standard), "standard");
    }
}
