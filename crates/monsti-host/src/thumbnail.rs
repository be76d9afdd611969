//! Resized image variants.

use crate::error::{HostError, HostResult};
use image::{DynamicImage, ImageFormat};
use monsti_types::SiteSettings;
use std::{fmt, io::Cursor};

/// Size used by the node chooser.
pub const CHOOSER_THUMBNAIL: &str = "core.ChooserThumbnail";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl ImageSize {
    /// Cache id of a thumbnail of this size.
    pub fn cache_id(&self) -> String {
        format!("core.image.thumbnail.{self}")
    }

    /// Resolve a `?size=` name. Unknown sizes and sizes without a width
    /// yield `None`, meaning the original is served.
    pub fn named(name: &str, settings: &SiteSettings) -> Option<Self> {
        let (width, height) = if name == CHOOSER_THUMBNAIL {
            (150, 150)
        } else {
            settings.image_style(name)?
        };
        (width != 0).then_some(ImageSize { width, height })
    }
}

/// Whether `bytes` decode as a supported image.
pub fn is_image(bytes: &[u8]) -> bool {
    image::load_from_memory(bytes).is_ok()
}

/// Scale an image to fit into `size`, keeping its aspect ratio.
///
/// PNG and GIF sources are encoded as PNG, everything else as JPEG.
pub fn thumbnail(bytes: &[u8], size: ImageSize) -> HostResult<Vec<u8>> {
    let format = image::guess_format(bytes).map_err(|e| HostError::Image(e.to_string()))?;
    let source = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| HostError::Image(e.to_string()))?;
    let height = if size.height == 0 { u32::MAX } else { size.height };
    let resized = source.thumbnail(size.width, height);
    let mut out = Cursor::new(Vec::new());
    let encoded = match format {
        ImageFormat::Png | ImageFormat::Gif => resized.write_to(&mut out, ImageFormat::Png),
        _ => DynamicImage::ImageRgb8(resized.to_rgb8()).write_to(&mut out, ImageFormat::Jpeg),
    };
    encoded.map_err(|e| HostError::Image(e.to_string()))?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, RgbImage, RgbaImage};
    use monsti_types::SiteContext;

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, format).expect("encode");
        out.into_inner()
    }

    #[test]
    fn jpeg_sources_fit_the_box_as_jpeg() {
        let source = encode(DynamicImage::ImageRgb8(RgbImage::new(1600, 400)), ImageFormat::Jpeg);
        let out = thumbnail(&source, ImageSize { width: 800, height: 400 }).expect("thumbnail");
        assert_eq!(image::guess_format(&out).expect("format"), ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&out).expect("decode");
        assert_eq!(decoded.dimensions(), (800, 200));
    }

    #[test]
    fn png_sources_stay_png() {
        let source = encode(DynamicImage::ImageRgba8(RgbaImage::new(300, 600)), ImageFormat::Png);
        let out = thumbnail(&source, ImageSize { width: 150, height: 150 }).expect("thumbnail");
        assert_eq!(image::guess_format(&out).expect("format"), ImageFormat::Png);
        let decoded = image::load_from_memory(&out).expect("decode");
        assert_eq!(decoded.dimensions(), (75, 150));
        assert!(is_image(&source));
        assert!(!is_image(b"not an image"));
    }

    #[test]
    fn sizes_come_from_site_settings() {
        let mut settings = SiteSettings::new(&SiteContext::default()).expect("settings");
        settings.set_image_style("hero", 800, 400).expect("style");
        settings.set_image_style("broken", 0, 100).expect("style");
        let hero = ImageSize::named("hero", &settings).expect("hero");
        assert_eq!(hero.cache_id(), "core.image.thumbnail.800x400");
        assert_eq!(
            ImageSize::named(CHOOSER_THUMBNAIL, &settings),
            Some(ImageSize { width: 150, height: 150 })
        );
        assert_eq!(ImageSize::named("broken", &settings), None);
        assert_eq!(ImageSize::named("unknown", &settings), None);
    }
}
