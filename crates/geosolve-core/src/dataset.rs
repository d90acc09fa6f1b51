use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{GeosolveError, Result};
use crate::math::{Real, Vec2};

/// The image collection of a survey.
///
/// The order of `filenames` defines the image index used by edges and
/// cameras. Every image shares the same `rows × cols` pixel dimensions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSet {
    pub filenames: Vec<String>,
    pub rows: u32,
    pub cols: u32,
}

impl DataSet {
    pub fn new(filenames: Vec<String>, rows: u32, cols: u32) -> Self {
        Self {
            filenames,
            rows,
            cols,
        }
    }

    /// Number of images.
    pub fn len(&self) -> usize {
        self.filenames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filenames.is_empty()
    }

    /// Returns `true` if the pixel coordinate `(u, v)` lies inside the image.
    pub fn contains_pixel(&self, pixel: &[Real; 2]) -> bool {
        let [u, v] = *pixel;
        u.is_finite()
            && v.is_finite()
            && u >= 0.0
            && v >= 0.0
            && u <= Real::from(self.cols)
            && v <= Real::from(self.rows)
    }

    /// Convert a pixel coordinate `(u, v)` to a sensor coordinate in metres,
    /// with the principal point at the image centre.
    pub fn sensor_from_pixel(&self, pixel: &[Real; 2], pixel_size: Real) -> Vec2 {
        let cu = Real::from(self.cols) / 2.0;
        let cv = Real::from(self.rows) / 2.0;
        Vec2::new((pixel[0] - cu) * pixel_size, (pixel[1] - cv) * pixel_size)
    }

    /// Check the shape invariants of the collection.
    pub fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.cols == 0 {
            return Err(GeosolveError::validation(format!(
                "image dimensions must be positive, got {}x{}",
                self.rows, self.cols
            )));
        }
        Ok(())
    }

    /// Read each image header under `data_dir` and check it matches `rows × cols`.
    pub fn verify_images(&self, data_dir: &Path) -> Result<()> {
        for (idx, name) in self.filenames.iter().enumerate() {
            let path = data_dir.join(name);
            let (width, height) = image::image_dimensions(&path).map_err(|err| match err {
                image::ImageError::IoError(source) => GeosolveError::io(&path, source),
                other => GeosolveError::validation(format!(
                    "cannot decode header of image {idx} ({}): {other}",
                    path.display()
                )),
            })?;
            debug!("image {idx} {}: {width}x{height}", path.display());
            if width != self.cols || height != self.rows {
                return Err(GeosolveError::validation(format!(
                    "image {idx} ({name}) is {height}x{width}, data set expects {}x{}",
                    self.rows, self.cols
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_images() -> DataSet {
        DataSet::new(vec!["a.png".into(), "b.png".into()], 20, 30)
    }

    #[test]
    fn sensor_origin_is_image_centre() {
        let ds = two_images();
        let s = ds.sensor_from_pixel(&[15.0, 10.0], 0.01);
        assert_eq!(s, Vec2::zeros());
        let s = ds.sensor_from_pixel(&[30.0, 0.0], 0.01);
        assert!((s.x - 0.15).abs() < 1e-12);
        assert!((s.y + 0.1).abs() < 1e-12);
    }

    #[test]
    fn pixel_bounds() {
        let ds = two_images();
        assert!(ds.contains_pixel(&[0.0, 0.0]));
        assert!(ds.contains_pixel(&[30.0, 20.0]));
        assert!(!ds.contains_pixel(&[-0.5, 3.0]));
        assert!(!ds.contains_pixel(&[3.0, 20.5]));
        assert!(!ds.contains_pixel(&[f64::NAN, 1.0]));
    }

    #[test]
    fn zero_dimensions_rejected() {
        let ds = DataSet::new(vec!["a.png".into()], 0, 10);
        assert!(matches!(ds.validate(), Err(GeosolveError::Validation(_))));
    }

    #[test]
    fn verify_images_checks_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbImage::new(30, 20)
            .save(dir.path().join("a.png"))
            .unwrap();
        image::RgbImage::new(31, 20)
            .save(dir.path().join("b.png"))
            .unwrap();

        let ds = two_images();
        let err = ds.verify_images(dir.path()).unwrap_err();
        assert!(err.to_string().contains("image 1"), "{err}");

        let only_first = DataSet::new(vec!["a.png".into()], 20, 30);
        only_first.verify_images(dir.path()).unwrap();
    }

    #[test]
    fn verify_images_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = two_images().verify_images(dir.path()).unwrap_err();
        assert!(matches!(err, GeosolveError::Io { .. }), "{err:?}");
    }
}
