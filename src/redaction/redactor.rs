use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use image::{imageops, DynamicImage, GenericImage, GenericImageView, ImageFormat, ImageOutputFormat, Rgba};
use log::debug;
use tempfile::NamedTempFile;

use crate::config::RedactionMode;
use crate::constants::{BLUR_SIGMA, FILL_VALUE};
use crate::error::{PipelineError, Result};
use crate::redaction::annotator::{FaceRegion, ImageAnnotator};

/// Applies face redaction to image files.
///
/// Output keeps the input's dimensions and channel layout; only pixels
/// inside detected face regions change. The output file is written through
/// a temporary sibling and appears only once fully encoded.
#[derive(Clone)]
pub struct Redactor {
    annotator: Arc<dyn ImageAnnotator>,
    mode: RedactionMode,
}

impl Redactor {
    pub fn new(annotator: Arc<dyn ImageAnnotator>, mode: RedactionMode) -> Self {
        Redactor { annotator, mode }
    }

    pub fn mode(&self) -> RedactionMode {
        self.mode
    }

    /// Redact `input` into `output`, returning the number of regions applied
    pub fn redact(&self, input: &Path, output: &Path) -> Result<usize> {
        let corrupt = |reason: String| PipelineError::CorruptImage {
            image: input.to_path_buf(),
            reason,
        };

        let mut img = image::open(input).map_err(|e| corrupt(e.to_string()))?;
        let faces = self
            .annotator
            .detect_faces(&img.to_luma8())
            .map_err(|e| corrupt(format!("face detection failed: {:#}", e)))?;

        let applied = self.redact_image(&mut img, &faces);
        save_atomic(&img, output).map_err(corrupt)?;

        debug!(
            "Redacted {} face regions ({}) in {} -> {}",
            applied,
            self.mode,
            input.display(),
            output.display()
        );
        Ok(applied)
    }

    /// Apply the configured mode to each region, ignoring those outside the image
    pub fn redact_image(&self, img: &mut DynamicImage, faces: &[FaceRegion]) -> usize {
        let (width, height) = img.dimensions();
        let mut applied = 0;
        for face in faces {
            let Some((x, y, w, h)) = face.clamp(width, height) else {
                continue;
            };
            match self.mode {
                RedactionMode::Fill => fill_region(img, x, y, w, h),
                RedactionMode::Blur => blur_region(img, x, y, w, h),
            }
            applied += 1;
        }
        applied
    }
}

/// Overwrite a rectangle with the fill value
pub fn fill_region(img: &mut DynamicImage, x: u32, y: u32, w: u32, h: u32) {
    let fill = Rgba([FILL_VALUE, FILL_VALUE, FILL_VALUE, u8::MAX]);
    for py in y..y + h {
        for px in x..x + w {
            img.put_pixel(px, py, fill);
        }
    }
}

/// Replace a rectangle with a heavy Gaussian blur of itself
pub fn blur_region(img: &mut DynamicImage, x: u32, y: u32, w: u32, h: u32) {
    let blurred = img.crop_imm(x, y, w, h).blur(BLUR_SIGMA);
    imageops::replace(img, &blurred, x as i64, y as i64);
}

fn save_atomic(img: &DynamicImage, output: &Path) -> std::result::Result<(), String> {
    let parent = output
        .parent()
        .ok_or_else(|| format!("no parent directory for {}", output.display()))?;
    std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;

    let format = ImageFormat::from_path(output).map_err(|e| e.to_string())?;
    let mut temp = NamedTempFile::new_in(parent).map_err(|e| e.to_string())?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        img.write_to(&mut writer, ImageOutputFormat::from(format))
            .map_err(|e| format!("encode failed: {}", e))?;
        writer.flush().map_err(|e| e.to_string())?;
    }
    temp.persist(output).map_err(|e| e.error.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    use crate::test_utils::fake_annotator::{FailingAnnotator, StubAnnotator};
    use crate::test_utils::{jpeg_bytes, white_png_bytes};

    fn redactor(regions: Vec<FaceRegion>, mode: RedactionMode) -> Redactor {
        Redactor::new(Arc::new(StubAnnotator::new(regions)), mode)
    }

    #[test]
    fn test_fill_blackens_only_face_region() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.png");
        let output = dir.path().join("out/in.png");
        fs::write(&input, white_png_bytes(20, 10)).unwrap();

        let applied = redactor(vec![FaceRegion::new(2, 2, 4, 3)], RedactionMode::Fill)
            .redact(&input, &output)
            .unwrap();
        assert_eq!(applied, 1);

        let result = image::open(&output).unwrap();
        assert_eq!(result.dimensions(), (20, 10));
        assert_eq!(result.color(), image::ColorType::Rgb8);
        assert_eq!(result.get_pixel(3, 3), Rgba([0, 0, 0, 255]));
        assert_eq!(result.get_pixel(5, 4), Rgba([0, 0, 0, 255]));
        assert_eq!(result.get_pixel(6, 4), Rgba([255, 255, 255, 255]));
        assert_eq!(result.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_zero_faces_keeps_dimensions_and_pixels() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.png");
        let output = dir.path().join("out.png");
        fs::write(&input, white_png_bytes(8, 6)).unwrap();

        let applied = redactor(vec![], RedactionMode::Blur).redact(&input, &output).unwrap();
        assert_eq!(applied, 0);
        assert_eq!(
            image::open(&output).unwrap().to_rgb8(),
            image::open(&input).unwrap().to_rgb8()
        );
    }

    #[test]
    fn test_multiple_faces_in_jpeg_preserve_dimensions() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("shot.jpg");
        let output = dir.path().join("redacted/shot.jpg");
        fs::write(&input, jpeg_bytes(64, 48)).unwrap();

        let faces = vec![
            FaceRegion::new(0, 0, 10, 10),
            FaceRegion::new(30, 20, 40, 40),
            FaceRegion::new(100, 100, 5, 5),
        ];
        let applied = redactor(faces, RedactionMode::Blur).redact(&input, &output).unwrap();

        assert_eq!(applied, 2);
        assert_eq!(image::open(&output).unwrap().dimensions(), (64, 48));
    }

    #[test]
    fn test_blur_changes_region_only() {
        let mut img = DynamicImage::ImageRgb8(image::RgbImage::from_fn(32, 32, |x, _| {
            if x % 2 == 0 { image::Rgb([0, 0, 0]) } else { image::Rgb([255, 255, 255]) }
        }));
        let before = img.clone();
        let applied = redactor(vec![], RedactionMode::Blur)
            .redact_image(&mut img, &[FaceRegion::new(0, 0, 16, 16)]);

        assert_eq!(applied, 1);
        let inside = img.get_pixel(4, 4);
        assert!(inside[0] > 0 && inside[0] < 255, "stripes should be smoothed, got {:?}", inside);
        assert_eq!(img.get_pixel(20, 20), before.get_pixel(20, 20));
        assert_eq!(img.get_pixel(21, 30), before.get_pixel(21, 30));
    }

    #[test]
    fn test_undecodable_image_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("broken.jpg");
        let output = dir.path().join("out.jpg");
        fs::write(&input, b"definitely not a jpeg").unwrap();

        let err = redactor(vec![], RedactionMode::Fill).redact(&input, &output).unwrap_err();
        assert!(matches!(err, PipelineError::CorruptImage { .. }));
        assert!(!output.exists());
    }

    #[test]
    fn test_annotator_failure_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.jpg");
        let output = dir.path().join("out.jpg");
        fs::write(&input, jpeg_bytes(16, 16)).unwrap();

        let redactor = Redactor::new(Arc::new(FailingAnnotator), RedactionMode::Fill);
        let err = redactor.redact(&input, &output).unwrap_err();
        assert!(matches!(err, PipelineError::CorruptImage { .. }));
        assert!(!output.exists());
    }
}
