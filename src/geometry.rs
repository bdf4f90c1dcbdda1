use nalgebra::{Matrix3, Matrix4, Quaternion, UnitQuaternion, Vector3};

/// Conversions between the camera conventions used by the supported datasets.
///
/// Every adapter hands out world-to-camera poses in OpenCV axes
/// (+X right, +Y down, +Z forward). Only CO3D poses are converted; LINEMOD,
/// Onepose and COLMAP poses are passed through as stored, and nothing checks
/// that the converted CO3D poses agree with them downstream.
pub struct CoordinateConverter;

impl CoordinateConverter {
    /// Build a 4x4 homogeneous matrix from rotation and translation
    pub fn compose(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Matrix4<f64> {
        let mut pose = Matrix4::identity();
        pose.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
        pose.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
        pose
    }

    /// Convert a PyTorch3D camera (row-vector convention, +X left, +Y up)
    /// to an OpenCV world-to-camera pose.
    ///
    /// PyTorch3D maps `X_cam = X_world * R + T`, so the column-vector rotation
    /// is `R^T`; the first two camera axes are then negated.
    pub fn pytorch3d_to_opencv(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Matrix4<f64> {
        let flip = Matrix3::from_diagonal(&Vector3::new(-1.0, -1.0, 1.0));

        let r_cv = flip * rotation.transpose();
        let t_cv = flip * translation;

        Self::compose(&r_cv, &t_cv)
    }

    /// Convert quaternion rotation (w, x, y, z) to rotation matrix
    pub fn quaternion_to_matrix(qw: f64, qx: f64, qy: f64, qz: f64) -> Matrix3<f64> {
        let q = UnitQuaternion::from_quaternion(Quaternion::new(qw, qx, qy, qz));
        q.to_rotation_matrix().into_inner()
    }

    /// Row-major 9-element array to 3x3 matrix
    pub fn matrix3_from_row_slice(values: &[f64]) -> Option<Matrix3<f64>> {
        if values.len() != 9 {
            return None;
        }
        Some(Matrix3::from_row_slice(values))
    }

    pub fn millimeters_to_meters(translation: &Vector3<f64>) -> Vector3<f64> {
        translation / 1000.0
    }
}

/// Pinhole intrinsics `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`.
pub fn pinhole_matrix(fx: f64, fy: f64, cx: f64, cy: f64) -> Matrix3<f64> {
    Matrix3::new(
        fx, 0.0, cx,
        0.0, fy, cy,
        0.0, 0.0, 1.0,
    )
}

/// NDC focal length / principal point to pixel intrinsics.
///
/// `image_size` is `(height, width)`. Both NDC axes are scaled by
/// `min(height, width) / 2` and pixels are assumed square, so `fy = fx`.
pub fn ndc_to_pixel_intrinsics(
    focal_length: [f64; 2],
    principal_point: [f64; 2],
    image_size: (u32, u32),
) -> Matrix3<f64> {
    let (height, width) = (image_size.0 as f64, image_size.1 as f64);
    let half_min = height.min(width) / 2.0;

    let fx = focal_length[0] * half_min;
    let fy = fx;
    let cx = width / 2.0 - principal_point[0] * half_min;
    let cy = height / 2.0 - principal_point[1] * half_min;

    pinhole_matrix(fx, fy, cx, cy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pytorch3d_conversion() {
        let rotation = Matrix3::identity();
        let translation = Vector3::new(1.0, 2.0, 3.0);

        let pose = CoordinateConverter::pytorch3d_to_opencv(&rotation, &translation);

        // X and Y flipped, Z unchanged
        assert_eq!(pose[(0, 3)], -1.0);
        assert_eq!(pose[(1, 3)], -2.0);
        assert_eq!(pose[(2, 3)], 3.0);

        let expected = Matrix3::from_diagonal(&Vector3::new(-1.0, -1.0, 1.0)).transpose();
        assert_relative_eq!(pose.fixed_view::<3, 3>(0, 0).into_owned(), expected);
        assert_eq!(pose.row(3).into_owned(), Matrix4::<f64>::identity().row(3).into_owned());
    }

    #[test]
    fn test_pytorch3d_rotation_is_transposed() {
        // 90 degrees about X, row-vector convention
        let rotation = Matrix3::new(
            1.0, 0.0, 0.0,
            0.0, 0.0, 1.0,
            0.0, -1.0, 0.0,
        );
        let pose = CoordinateConverter::pytorch3d_to_opencv(&rotation, &Vector3::zeros());
        let r = pose.fixed_view::<3, 3>(0, 0).into_owned();

        let expected = Matrix3::new(
            -1.0, 0.0, 0.0,
            0.0, 0.0, 1.0,
            0.0, 1.0, 0.0,
        );
        assert_relative_eq!(r, expected);
    }

    #[test]
    fn test_identity_quaternion() {
        let rotation = CoordinateConverter::quaternion_to_matrix(1.0, 0.0, 0.0, 0.0);
        assert_relative_eq!(rotation, Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_ndc_to_pixel() {
        // 200 rows, 400 columns, centred principal point
        let k = ndc_to_pixel_intrinsics([2.0, 2.0], [0.0, 0.0], (200, 400));
        assert_relative_eq!(k[(0, 0)], 200.0);
        assert_relative_eq!(k[(1, 1)], 200.0);
        assert_relative_eq!(k[(0, 2)], 200.0);
        assert_relative_eq!(k[(1, 2)], 100.0);
        assert_relative_eq!(k[(2, 2)], 1.0);

        let k = ndc_to_pixel_intrinsics([2.0, 2.0], [0.5, -0.5], (200, 400));
        assert_relative_eq!(k[(0, 2)], 150.0);
        assert_relative_eq!(k[(1, 2)], 150.0);
    }

    #[test]
    fn test_millimeters_to_meters() {
        let t = CoordinateConverter::millimeters_to_meters(&Vector3::new(1000.0, 2000.0, 3000.0));
        assert_relative_eq!(t, Vector3::new(1.0, 2.0, 3.0));
    }
}
