// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # LDraw-Lite Core Loader
//!
//! Fast LDraw model loader: line classification, geometry validation
//! and repair, BFC certification tracking, MPD splitting, and the
//! LDraw color palette.
//!
//! ## Overview
//!
//! This crate provides the core loading functionality for LDraw-Lite:
//!
//! - **Line Scanning**: Type-code classification with
//!   [lexical-core](https://docs.rs/lexical-core) and
//!   [fast-float](https://docs.rs/fast-float) number parsing
//! - **Geometry Repair**: Vertex-order correction and concave-quad
//!   splitting with per-line diagnostics
//! - **Sub-Model Registry**: Case-insensitive resolution over the LDraw
//!   library tree with cycle detection
//! - **MPD Documents**: Embedded `0 FILE` blocks, `!DATA` payloads, and
//!   `!TEXMAP` texture bindings
//! - **Color Palette**: The 512-slot table, `!COLOUR` metas, and direct
//!   color numbers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ldraw_lite_core::{MainModel, NullHooks};
//!
//! let mut model = MainModel::new("/usr/share/ldraw");
//! let root = model.load("models/car.ldr".as_ref(), &mut NullHooks)?;
//! for line in &model.doc(root).lines {
//!     if let Some(diag) = &line.header.diagnostic {
//!         eprintln!("{}", diag);
//!     }
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization support for geometry types

pub mod bounds;
pub mod comment;
pub mod document;
pub mod error;
pub mod line;
pub mod main_model;
pub mod model_ref;
pub mod palette;
pub mod shape;
pub mod vector;

pub use bounds::Bounds3;
pub use comment::CommentLine;
pub use document::{DocArena, DocFlags, DocId, Document, TexmapMethod, TexmapSettings};
pub use error::{DiagKind, Diagnostic, Error, Result, Severity};
pub use line::{ActionFlags, BfcState, Line, LineHeader, LinePayload};
pub use main_model::{FoundFile, LoadHooks, LoadOptions, MainModel, NullHooks};
pub use model_ref::ModelRefLine;
pub use palette::{ColorInfo, Palette, TRANSPARENT_ALPHA};
pub use shape::{CondLine, QuadLine, SegmentLine, TriangleLine};
pub use vector::{Matrix4, Vector3};
