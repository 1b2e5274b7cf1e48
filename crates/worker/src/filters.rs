//! Pixel filters applied by the execution RPC.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};

use dpip_core::FilterKind;

use crate::error::FilterError;

/// Applies a named filter to encoded image bytes.
///
/// Implementations are CPU-bound and are called from a blocking task.
pub trait FilterEngine: Send + Sync {
    fn apply(&self, filter: FilterKind, input: &[u8]) -> Result<Vec<u8>, FilterError>;
}

/// [`FilterEngine`] on the `image` crate. Accepts PNG or JPEG input and
/// always produces PNG.
#[derive(Debug, Clone, Copy)]
pub struct ImageFilters {
    pub blur_sigma: f32,
}

impl ImageFilters {
    pub fn new(blur_sigma: f32) -> Self {
        Self { blur_sigma }
    }
}

impl FilterEngine for ImageFilters {
    fn apply(&self, filter: FilterKind, input: &[u8]) -> Result<Vec<u8>, FilterError> {
        let img = image::load_from_memory(input).map_err(FilterError::Decode)?;
        let out = match filter {
            FilterKind::Grayscale => img.grayscale(),
            FilterKind::Blur => img.blur(self.blur_sigma),
        };
        encode_png(&out)
    }
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, FilterError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(FilterError::Encode)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn checkerboard() -> Vec<u8> {
        let img = RgbImage::from_fn(8, 8, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        });
        encode_png(&DynamicImage::ImageRgb8(img)).unwrap()
    }

    #[test]
    fn grayscale_drops_colour() {
        let out = ImageFilters::new(1.0).apply(FilterKind::Grayscale, &checkerboard()).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 8));
        assert!(!decoded.color().has_color());
    }

    #[test]
    fn blur_keeps_dimensions_and_changes_pixels() {
        let input = checkerboard();
        let out = ImageFilters::new(2.0).apply(FilterKind::Blur, &input).unwrap();
        let decoded = image::load_from_memory(&out).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (8, 8));
        assert_ne!(decoded.get_pixel(3, 3), &Rgb([255, 0, 0]));
    }

    #[test]
    fn garbage_input_is_a_decode_error() {
        assert!(matches!(
            ImageFilters::new(1.0).apply(FilterKind::Blur, b"not an image"),
            Err(FilterError::Decode(_))
        ));
    }
}
