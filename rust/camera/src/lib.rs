// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # LDraw-Lite Auto Camera
//!
//! Camera placement for loaded LDraw models: given a viewport, a field
//! of view, and a view rotation, solve for the closest camera position
//! that keeps the whole model on screen. Uses
//! [nalgebra](https://docs.rs/nalgebra) for the 6x6 frustum solve and
//! consumes point scans from `ldraw-lite-core`.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ldraw_lite_camera::AutoCamera;
//! use ldraw_lite_core::{MainModel, NullHooks};
//!
//! let mut model = MainModel::new("/usr/share/ldraw");
//! let root = model.load("models/car.ldr".as_ref(), &mut NullHooks)?;
//! let center = model.bounding_box(root).map(|b| b.center()).unwrap_or_default();
//!
//! let mut camera = AutoCamera::new(&mut model, root);
//! camera.center = center;
//! camera.options.width = 1920.0;
//! camera.options.height = 1080.0;
//! let position = camera.zoom_to_fit()?;
//! ```

pub mod error;
pub mod solver;

pub use error::{Error, Result};
pub use solver::{parse_camera_globe, AutoCamera, CameraOptions};
