// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Zoom-to-fit camera placement.
//!
//! Ported from Lars Hassing's L3P auto-camera algorithm: position the
//! viewing pyramid as close as possible so the model just touches the
//! view edges on top and bottom, left and right, or all four. Scanning
//! the model against the four frustum planes yields six equations in six
//! unknowns (two candidate points); the solve picks the one behind the
//! other along the view direction.

use ldraw_lite_core::{DocId, MainModel, Matrix4, Vector3};
use nalgebra::{Matrix6, Vector3 as NaVector3, Vector6};

use crate::error::{Error, Result};

/// Framing parameters for one solve
#[derive(Debug, Clone)]
pub struct CameraOptions {
    /// Field of view in degrees, applied to the smaller viewport axis
    pub fov: f32,
    /// Viewport width in pixels
    pub width: f32,
    /// Viewport height in pixels
    pub height: f32,
    /// Extra border in pixels kept clear around the model
    pub margin: f32,
    /// Scale applied to the solved distance
    pub distance_multiplier: f32,
    /// Limit the scan to steps up to this one
    pub step: Option<usize>,
    /// Include conditional-line control points in the scan
    pub scan_conditional_control_points: bool,
    /// Distance the percentage form of a camera globe scales
    pub base_distance: f32,
}

impl Default for CameraOptions {
    fn default() -> Self {
        CameraOptions {
            fov: 45.0,
            width: 640.0,
            height: 480.0,
            margin: 0.0,
            distance_multiplier: 1.0,
            step: None,
            scan_conditional_control_points: false,
            base_distance: 0.0,
        }
    }
}

/// View-pyramid planes for the current viewport
struct Frustum {
    direction: NaVector3<f64>,
    normals: [NaVector3<f64>; 4],
}

/// Computes a camera position that frames a document
pub struct AutoCamera<'a> {
    model: &'a mut MainModel,
    doc: DocId,
    pub center: Vector3,
    pub rotation: Matrix4,
    pub options: CameraOptions,
    globe_radius: Option<f32>,
}

impl<'a> AutoCamera<'a> {
    pub fn new(model: &'a mut MainModel, doc: DocId) -> AutoCamera<'a> {
        AutoCamera {
            model,
            doc,
            center: Vector3::ZERO,
            rotation: Matrix4::IDENTITY,
            options: CameraOptions::default(),
            globe_radius: None,
        }
    }

    /// `0 !LDVIEW CAMERA_GLOBE lat,lon,radius`: a fixed (or, when
    /// negative, percentage-relative) camera distance that bypasses the
    /// solve. Anything unparseable clears the override.
    pub fn set_camera_globe(&mut self, value: &str) {
        self.globe_radius = parse_camera_globe(value);
    }

    /// Solve for the closest camera position that keeps the whole model
    /// inside the viewport.
    pub fn zoom_to_fit(&mut self) -> Result<Vector3> {
        if let Some(radius) = self.globe_radius {
            let z = if radius >= 0.0 {
                radius
            } else {
                self.options.base_distance * (1.0 - radius / 100.0)
            };
            return Ok(Vector3::new(0.0, 0.0, z));
        }
        let width = self.options.width as f64;
        let height = self.options.height as f64;
        if width <= 0.0 || height <= 0.0 {
            return Err(Error::DegenerateViewport {
                width: self.options.width,
                height: self.options.height,
            });
        }
        let frustum = self.pre_calc_frustum(width, height);

        // Rotate the model about its center before measuring it against
        // the frustum planes.
        let center = self.center;
        let transformation = Matrix4::translation(center)
            .multiply(&self.rotation)
            .multiply(&Matrix4::translation(Vector3::new(
                -center.x, -center.y, -center.z,
            )));

        let mut d_min = [1e6f64; 4];
        let mut any_point = false;
        {
            let saved = self.model.options.scan_conditional_control_points;
            self.model.options.scan_conditional_control_points =
                self.options.scan_conditional_control_points;
            self.model.scan_points(
                self.doc,
                &transformation,
                self.options.step,
                true,
                &mut |point, _conditional| {
                    any_point = true;
                    let relative = NaVector3::new(
                        (point.x - center.x) as f64,
                        (point.y - center.y) as f64,
                        (point.z - center.z) as f64,
                    );
                    for (normal, entry) in frustum.normals.iter().zip(d_min.iter_mut()) {
                        let d = normal.dot(&relative);
                        if d < *entry {
                            *entry = d;
                        }
                    }
                },
            );
            self.model.options.scan_conditional_control_points = saved;
        }
        if !any_point {
            return Err(Error::NoPoints);
        }

        let mut a = Matrix6::<f64>::zeros();
        let mut b = Vector6::<f64>::zeros();
        for i in 0..2 {
            for j in 0..3 {
                a[(i, j)] = frustum.normals[i][j];
            }
            b[i] = d_min[i];
        }
        for i in 2..4 {
            for j in 0..3 {
                a[(i, 3 + j)] = frustum.normals[i][j];
            }
            b[i] = d_min[i];
        }
        fill_direction_rows(&mut a, &frustum.direction);
        let x = a.lu().solve(&b).ok_or(Error::Singular)?;

        // Two candidate points fall out of the solve; the valid one sits
        // behind the other along the view direction.
        let delta = NaVector3::new(x[3] - x[0], x[4] - x[1], x[5] - x[2]);
        let margin = self.options.margin as f64;
        let mut location = if frustum.direction.dot(&delta) > 0.0 {
            Vector3::new(
                x[0] as f32,
                x[1] as f32,
                (x[2] * (height + margin) / height) as f32,
            )
        } else {
            Vector3::new(
                x[3] as f32,
                x[4] as f32,
                (x[5] * (width + margin) / width) as f32,
            )
        };
        location.z *= self.options.distance_multiplier;
        Ok(location)
    }

    /// Plane normals of the viewing pyramid. The configured field of view
    /// spans the smaller viewport axis; the wider axis widens it.
    fn pre_calc_frustum(&self, width: f64, height: f64) -> Frustum {
        let fov = if width > height {
            2.0 * ((self.options.fov as f64 / 2.0).to_radians().tan() * width / height).atan()
        } else {
            (self.options.fov as f64).to_radians()
        };
        let direction = NaVector3::new(0.0, 0.0, -1.0);
        let horizontal = NaVector3::new(1.0, 0.0, 0.0);
        let vertical = NaVector3::new(0.0, -1.0, 0.0);
        let mut d = 1.0 / (fov / 2.0).tan();
        let mut normals = [
            NaVector3::zeros(),
            NaVector3::zeros(),
            direction - horizontal * d,
            direction + horizontal * d,
        ];
        d *= width / height;
        normals[0] = direction - vertical * d;
        normals[1] = direction + vertical * d;
        for normal in &mut normals {
            normal.normalize_mut();
        }
        Frustum { direction, normals }
    }
}

/// Tie the two candidate points together perpendicular to the view
/// direction. Row selection avoids degenerate cross products for axis
/// aligned directions.
fn fill_direction_rows(a: &mut Matrix6<f64>, direction: &NaVector3<f64>) {
    if direction[0] == 0.0 {
        a[(4, 1)] = -direction[2];
        a[(4, 2)] = direction[1];
        a[(4, 4)] = direction[2];
        a[(4, 5)] = -direction[1];
        if direction[1] == 0.0 {
            a[(5, 0)] = -direction[2];
            a[(5, 2)] = direction[0];
            a[(5, 3)] = direction[2];
            a[(5, 5)] = -direction[0];
        } else {
            a[(5, 0)] = -direction[1];
            a[(5, 1)] = direction[0];
            a[(5, 3)] = direction[1];
            a[(5, 4)] = -direction[0];
        }
    } else {
        a[(4, 0)] = -direction[2];
        a[(4, 2)] = direction[0];
        a[(4, 3)] = direction[2];
        a[(4, 5)] = -direction[0];
        if direction[1] == 0.0 && direction[2] != 0.0 {
            a[(5, 1)] = -direction[2];
            a[(5, 2)] = direction[1];
            a[(5, 4)] = direction[2];
            a[(5, 5)] = -direction[1];
        } else {
            a[(5, 0)] = -direction[1];
            a[(5, 1)] = direction[0];
            a[(5, 3)] = direction[1];
            a[(5, 4)] = -direction[0];
        }
    }
}

/// Third comma-separated field of a camera-globe meta, the radius
pub fn parse_camera_globe(value: &str) -> Option<f32> {
    let mut fields = value.split(',');
    fields.next()?;
    fields.next()?;
    fields.next()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ldraw_lite_core::NullHooks;
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_file(path: &Path, contents: &str) {
        let mut f = File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    fn load_model(contents: &str) -> (TempDir, MainModel, DocId) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("parts")).unwrap();
        std::fs::create_dir_all(dir.path().join("p")).unwrap();
        let model_path = dir.path().join("model.ldr");
        write_file(&model_path, contents);
        let mut model = MainModel::new(dir.path());
        model.options.process_ld_config = false;
        let root = model.load(&model_path, &mut NullHooks).unwrap();
        (dir, model, root)
    }

    const PLATE: &str = "0 Plate\n4 16 -10 -10 0 -10 10 0 10 10 0 10 -10 0\n";

    #[test]
    fn test_symmetric_plate_centers_camera() {
        let (_dir, mut model, root) = load_model(PLATE);
        let mut camera = AutoCamera::new(&mut model, root);
        camera.options.width = 480.0;
        camera.options.height = 480.0;
        let location = camera.zoom_to_fit().unwrap();
        assert_relative_eq!(location.x, 0.0, epsilon = 1e-3);
        assert_relative_eq!(location.y, 0.0, epsilon = 1e-3);
        assert!(location.z > 10.0);
    }

    #[test]
    fn test_wider_fov_moves_camera_closer() {
        let (_dir, mut model, root) = load_model(PLATE);
        let narrow = {
            let mut camera = AutoCamera::new(&mut model, root);
            camera.options.fov = 30.0;
            camera.zoom_to_fit().unwrap()
        };
        let wide = {
            let mut camera = AutoCamera::new(&mut model, root);
            camera.options.fov = 60.0;
            camera.zoom_to_fit().unwrap()
        };
        assert!(narrow.z > wide.z);
        assert!(wide.z > 0.0);
    }

    #[test]
    fn test_translation_invariance_about_center() {
        let (_dir, mut model, root) = load_model(PLATE);
        let centered = {
            let mut camera = AutoCamera::new(&mut model, root);
            camera.zoom_to_fit().unwrap()
        };
        let shifted_model = "0 Plate\n4 16 90 -10 0 90 10 0 110 10 0 110 -10 0\n";
        let (_dir2, mut model2, root2) = load_model(shifted_model);
        let shifted = {
            let mut camera = AutoCamera::new(&mut model2, root2);
            camera.center = Vector3::new(100.0, 0.0, 0.0);
            camera.zoom_to_fit().unwrap()
        };
        assert_relative_eq!(centered.x, shifted.x, epsilon = 1e-3);
        assert_relative_eq!(centered.y, shifted.y, epsilon = 1e-3);
        assert_relative_eq!(centered.z, shifted.z, epsilon = 1e-3);
    }

    #[test]
    fn test_margin_backs_the_camera_off() {
        let (_dir, mut model, root) = load_model(PLATE);
        let snug = {
            let mut camera = AutoCamera::new(&mut model, root);
            camera.zoom_to_fit().unwrap()
        };
        let padded = {
            let mut camera = AutoCamera::new(&mut model, root);
            camera.options.margin = 40.0;
            camera.zoom_to_fit().unwrap()
        };
        assert!(padded.z > snug.z);
    }

    #[test]
    fn test_distance_multiplier() {
        let (_dir, mut model, root) = load_model(PLATE);
        let base = {
            let mut camera = AutoCamera::new(&mut model, root);
            camera.zoom_to_fit().unwrap()
        };
        let doubled = {
            let mut camera = AutoCamera::new(&mut model, root);
            camera.options.distance_multiplier = 2.0;
            camera.zoom_to_fit().unwrap()
        };
        assert_relative_eq!(doubled.z, base.z * 2.0, epsilon = 1e-3);
    }

    #[test]
    fn test_camera_globe_override() {
        let (_dir, mut model, root) = load_model(PLATE);
        let mut camera = AutoCamera::new(&mut model, root);
        camera.set_camera_globe("30,45,500");
        assert_eq!(camera.zoom_to_fit().unwrap(), Vector3::new(0.0, 0.0, 500.0));
    }

    #[test]
    fn test_camera_globe_percentage() {
        let (_dir, mut model, root) = load_model(PLATE);
        let mut camera = AutoCamera::new(&mut model, root);
        camera.options.base_distance = 200.0;
        camera.set_camera_globe("0,0,-50");
        let location = camera.zoom_to_fit().unwrap();
        assert_relative_eq!(location.z, 300.0, epsilon = 1e-3);
    }

    #[test]
    fn test_degenerate_viewport() {
        let (_dir, mut model, root) = load_model(PLATE);
        let mut camera = AutoCamera::new(&mut model, root);
        camera.options.width = 0.0;
        assert!(matches!(
            camera.zoom_to_fit(),
            Err(Error::DegenerateViewport { .. })
        ));
    }

    #[test]
    fn test_empty_model() {
        let (_dir, mut model, root) = load_model("0 Nothing here\n");
        let mut camera = AutoCamera::new(&mut model, root);
        assert_eq!(camera.zoom_to_fit(), Err(Error::NoPoints));
    }

    #[test]
    fn test_parse_camera_globe() {
        assert_eq!(parse_camera_globe("30,45,1000"), Some(1000.0));
        assert_eq!(parse_camera_globe("0,0,-25.5"), Some(-25.5));
        assert_eq!(parse_camera_globe("30,45"), None);
        assert_eq!(parse_camera_globe("junk"), None);
    }
}
