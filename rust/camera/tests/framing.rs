// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Framing real loaded models, sub-references and metas included.

use approx::assert_relative_eq;
use ldraw_lite_camera::AutoCamera;
use ldraw_lite_core::{MainModel, NullHooks};
use std::fs::{create_dir_all, File};
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

fn write_file(path: &Path, contents: &str) {
    let mut f = File::create(path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
}

fn library() -> TempDir {
    let dir = TempDir::new().unwrap();
    create_dir_all(dir.path().join("parts")).unwrap();
    create_dir_all(dir.path().join("p")).unwrap();
    dir
}

fn load(library: &TempDir, contents: &str) -> (MainModel, ldraw_lite_core::DocId) {
    let model_path = library.path().join("scene.ldr");
    write_file(&model_path, contents);
    let mut model = MainModel::new(library.path());
    model.options.process_ld_config = false;
    let root = model.load(&model_path, &mut NullHooks).unwrap();
    (model, root)
}

#[test]
fn test_referenced_geometry_widens_the_frame() {
    let library = library();
    write_file(
        &library.path().join("p/plate.dat"),
        "0 Plate\n4 16 -10 -10 0 -10 10 0 10 10 0 10 -10 0\n",
    );
    // One plate at the origin, then a second copy pushed out along +X.
    let (mut model, root) = load(
        &library,
        "0 One\n1 16 0 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n",
    );
    let single = AutoCamera::new(&mut model, root).zoom_to_fit().unwrap();

    let (mut model, root) = load(
        &library,
        "0 Two\n\
         1 16 0 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n\
         1 16 40 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n",
    );
    let pair = AutoCamera::new(&mut model, root).zoom_to_fit().unwrap();
    // The pair is wider, so the camera sits further back and off-center.
    assert!(pair.z > single.z);
    assert!(pair.x > single.x);
}

#[test]
fn test_bbox_ignored_geometry_does_not_push_the_camera_back() {
    let library = library();
    let near = "0 Near\n4 16 -10 -10 0 -10 10 0 10 10 0 10 -10 0\n";
    let (mut model, root) = load(&library, near);
    let snug = AutoCamera::new(&mut model, root).zoom_to_fit().unwrap();

    let with_marker = "0 Near\n\
                       4 16 -10 -10 0 -10 10 0 10 10 0 10 -10 0\n\
                       0 !LDVIEW BBOX_IGNORE NEXT\n\
                       4 16 -900 -900 0 -900 900 0 900 900 0 900 -900 0\n";
    let (mut model, root) = load(&library, with_marker);
    let framed = AutoCamera::new(&mut model, root).zoom_to_fit().unwrap();
    assert_relative_eq!(framed.z, snug.z, epsilon = 1e-3);
}

#[test]
fn test_step_limit_frames_the_partial_model() {
    let library = library();
    let (mut model, root) = load(
        &library,
        "0 Steps\n\
         4 16 -10 -10 0 -10 10 0 10 10 0 10 -10 0\n\
         0 STEP\n\
         4 16 -80 -80 0 -80 80 0 80 80 0 80 -80 0\n",
    );
    let first = {
        let mut camera = AutoCamera::new(&mut model, root);
        camera.options.step = Some(0);
        camera.zoom_to_fit().unwrap()
    };
    let full = AutoCamera::new(&mut model, root).zoom_to_fit().unwrap();
    assert!(full.z > first.z);
}
