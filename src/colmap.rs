use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use nalgebra::{Matrix3, Matrix4, Vector3};

use crate::error::PrepError;
use crate::geometry::{pinhole_matrix, CoordinateConverter};

/// COLMAP camera model
#[derive(Debug, Clone, PartialEq)]
pub struct ColmapCamera {
    pub camera_id: u32,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub params: Vec<f64>,
}

impl ColmapCamera {
    /// Pinhole matrix for the supported models.
    ///
    /// SIMPLE_RADIAL's distortion coefficient is dropped; any other model is
    /// rejected rather than approximated.
    pub fn intrinsics(&self) -> Result<Matrix3<f64>> {
        let needed = match self.model.as_str() {
            "SIMPLE_PINHOLE" => 3,
            "SIMPLE_RADIAL" => 4,
            "PINHOLE" => 4,
            _ => return Err(PrepError::UnsupportedCameraModel(self.model.clone()).into()),
        };
        if self.params.len() < needed {
            anyhow::bail!(
                "Invalid {} camera parameters for camera {}: expected {}, got {}",
                self.model,
                self.camera_id,
                needed,
                self.params.len()
            );
        }

        let p = &self.params;
        let k = match self.model.as_str() {
            "PINHOLE" => pinhole_matrix(p[0], p[1], p[2], p[3]),
            // SIMPLE_PINHOLE: f, cx, cy / SIMPLE_RADIAL: f, cx, cy, k
            _ => pinhole_matrix(p[0], p[0], p[1], p[2]),
        };
        Ok(k)
    }
}

/// COLMAP image with pose
#[derive(Debug, Clone, PartialEq)]
pub struct ColmapImage {
    pub image_id: u32,
    pub qw: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
    pub tx: f64,
    pub ty: f64,
    pub tz: f64,
    pub camera_id: u32,
    pub name: String,
}

impl ColmapImage {
    /// World-to-camera pose as stored by COLMAP
    pub fn world_to_camera(&self) -> Matrix4<f64> {
        let rotation = CoordinateConverter::quaternion_to_matrix(self.qw, self.qx, self.qy, self.qz);
        let translation = Vector3::new(self.tx, self.ty, self.tz);
        CoordinateConverter::compose(&rotation, &translation)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColmapPoint3D {
    pub point_id: u64,
    pub xyz: [f64; 3],
    pub rgb: [u8; 3],
    pub error: f64,
}

/// cameras, images and points of one sparse reconstruction
#[derive(Debug, Clone, Default)]
pub struct SparseModel {
    pub cameras: HashMap<u32, ColmapCamera>,
    pub images: Vec<ColmapImage>,
    pub points: Vec<ColmapPoint3D>,
}

/// Source of sparse reconstructions
pub trait SparseModelReader {
    fn read_sparse_model(&self, dir: &Path) -> Result<SparseModel>;
}

/// Reads `cameras.txt`, `images.txt` and `points3D.txt`
#[derive(Debug, Clone, Copy, Default)]
pub struct ColmapTextReader;

impl SparseModelReader for ColmapTextReader {
    fn read_sparse_model(&self, dir: &Path) -> Result<SparseModel> {
        let cameras = ColmapParser::parse_cameras(&dir.join("cameras.txt"))?;
        let images = ColmapParser::parse_images(&dir.join("images.txt"))?;

        let points_path = dir.join("points3D.txt");
        let points = if points_path.exists() {
            ColmapParser::parse_points3d(&points_path)?
        } else {
            log::warn!("No points3D.txt in {}", dir.display());
            Vec::new()
        };

        Ok(SparseModel {
            cameras,
            images,
            points,
        })
    }
}

/// Parser for COLMAP text files
pub struct ColmapParser;

impl ColmapParser {
    fn data_lines(content: &str) -> impl Iterator<Item = &str> {
        content
            .lines()
            .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
    }

    /// Parse cameras.txt file
    pub fn parse_cameras(path: &Path) -> Result<HashMap<u32, ColmapCamera>> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read cameras file: {}", path.display()))?;

        let mut cameras = HashMap::new();

        for line in Self::data_lines(&content) {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 5 {
                continue;
            }

            let camera_id = parts[0].parse::<u32>()?;
            let model = parts[1].to_string();
            let width = parts[2].parse::<u32>()?;
            let height = parts[3].parse::<u32>()?;

            let params: Vec<f64> = parts[4..]
                .iter()
                .map(|p| p.parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("Invalid camera parameters in {}", path.display()))?;

            cameras.insert(
                camera_id,
                ColmapCamera {
                    camera_id,
                    model,
                    width,
                    height,
                    params,
                },
            );
        }

        Ok(cameras)
    }

    /// Parse images.txt file.
    ///
    /// Each image occupies two lines; the second (2D observations) may be
    /// empty and is skipped.
    pub fn parse_images(path: &Path) -> Result<Vec<ColmapImage>> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read images file: {}", path.display()))?;

        let mut images = Vec::new();
        let mut lines = content.lines().filter(|line| !line.starts_with('#'));

        while let Some(line) = lines.next() {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 10 {
                continue;
            }

            let image_id = parts[0].parse::<u32>()?;
            let q: Vec<f64> = parts[1..8]
                .iter()
                .map(|p| p.parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .with_context(|| format!("Invalid pose for image {} in {}", image_id, path.display()))?;
            let camera_id = parts[8].parse::<u32>()?;
            // Names may contain spaces
            let name = parts[9..].join(" ");

            images.push(ColmapImage {
                image_id,
                qw: q[0],
                qx: q[1],
                qy: q[2],
                qz: q[3],
                tx: q[4],
                ty: q[5],
                tz: q[6],
                camera_id,
                name,
            });

            lines.next();
        }

        Ok(images)
    }

    /// Parse points3D.txt file; track entries are not kept
    pub fn parse_points3d(path: &Path) -> Result<Vec<ColmapPoint3D>> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read points file: {}", path.display()))?;

        let mut points = Vec::new();
        for line in Self::data_lines(&content) {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 8 {
                continue;
            }

            points.push(ColmapPoint3D {
                point_id: parts[0].parse()?,
                xyz: [parts[1].parse()?, parts[2].parse()?, parts[3].parse()?],
                rgb: [parts[4].parse()?, parts[5].parse()?, parts[6].parse()?],
                error: parts[7].parse()?,
            });
        }

        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    const CAMERAS: &str = "# Camera list with one line of data per camera:\n\
        # CAMERA_ID, MODEL, WIDTH, HEIGHT, PARAMS[]\n\
        1 SIMPLE_RADIAL 640 480 500.0 320.0 240.0 0.01\n\
        2 PINHOLE 640 480 510.0 520.0 321.0 241.0\n";

    const IMAGES: &str = "# Image list with two lines of data per image:\n\
        1 1.0 0.0 0.0 0.0 0.5 0.0 2.0 1 car_0002.png\n\
        \n\
        2 0.7071068 0.0 0.7071068 0.0 0.0 0.0 0.0 2 car_0001.png\n\
        100.0 200.0 1 150.0 250.0 -1\n";

    const POINTS: &str = "# 3D point list\n\
        1 0.1 0.2 0.3 255 0 0 0.5 1 0 2 0\n";

    fn write_model(dir: &Path) {
        fs::write(dir.join("cameras.txt"), CAMERAS).unwrap();
        fs::write(dir.join("images.txt"), IMAGES).unwrap();
        fs::write(dir.join("points3D.txt"), POINTS).unwrap();
    }

    #[test]
    fn test_read_sparse_model() {
        let tmp = TempDir::new().unwrap();
        write_model(tmp.path());

        let model = ColmapTextReader.read_sparse_model(tmp.path()).unwrap();
        assert_eq!(model.cameras.len(), 2);
        assert_eq!(model.images.len(), 2);
        assert_eq!(model.points.len(), 1);

        assert_eq!(model.images[0].name, "car_0002.png");
        assert_eq!(model.images[1].name, "car_0001.png");
        assert_eq!(model.images[1].camera_id, 2);
        assert_eq!(model.points[0].rgb, [255, 0, 0]);
    }

    #[test]
    fn test_camera_models() {
        let tmp = TempDir::new().unwrap();
        write_model(tmp.path());
        let cameras = ColmapParser::parse_cameras(&tmp.path().join("cameras.txt")).unwrap();

        let k = cameras[&1].intrinsics().unwrap();
        assert_relative_eq!(k, pinhole_matrix(500.0, 500.0, 320.0, 240.0));

        let k = cameras[&2].intrinsics().unwrap();
        assert_relative_eq!(k, pinhole_matrix(510.0, 520.0, 321.0, 241.0));

        let simple = ColmapCamera {
            camera_id: 3,
            model: "SIMPLE_PINHOLE".to_string(),
            width: 100,
            height: 100,
            params: vec![80.0, 50.0, 40.0],
        };
        assert_relative_eq!(simple.intrinsics().unwrap(), pinhole_matrix(80.0, 80.0, 50.0, 40.0));
    }

    #[test]
    fn test_unsupported_camera_model() {
        let camera = ColmapCamera {
            camera_id: 1,
            model: "OPENCV_FISHEYE".to_string(),
            width: 100,
            height: 100,
            params: vec![1.0; 8],
        };
        let err = camera.intrinsics().unwrap_err();
        assert_eq!(
            err.downcast_ref::<PrepError>(),
            Some(&PrepError::UnsupportedCameraModel("OPENCV_FISHEYE".to_string()))
        );
    }

    #[test]
    fn test_world_to_camera() {
        let tmp = TempDir::new().unwrap();
        write_model(tmp.path());
        let images = ColmapParser::parse_images(&tmp.path().join("images.txt")).unwrap();

        let pose = images[0].world_to_camera();
        assert_relative_eq!(pose, CoordinateConverter::compose(&Matrix3::identity(), &Vector3::new(0.5, 0.0, 2.0)));

        // 90 degrees about Y
        let pose = images[1].world_to_camera();
        assert_relative_eq!(pose[(0, 2)], 1.0, epsilon = 1e-6);
        assert_relative_eq!(pose[(2, 0)], -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_missing_model_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(ColmapTextReader.read_sparse_model(tmp.path()).is_err());
    }
}
