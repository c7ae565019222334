// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    /// Viewport width or height was zero or negative
    #[error("degenerate viewport: {width}x{height}")]
    DegenerateViewport { width: f32, height: f32 },

    /// The model contributed no scannable points
    #[error("model has no geometry to frame")]
    NoPoints,

    /// The frustum system had no unique solution
    #[error("singular frustum system")]
    Singular,
}
