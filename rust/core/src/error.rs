// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error and diagnostic types.
//!
//! Two layers: [`Error`] for failures that abort a load outright (missing
//! root file, unusable LDraw directory, I/O), and [`Diagnostic`] for
//! per-line problems that are recorded on the affected line and reported
//! through the load hooks while the load keeps going.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for document loading
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a load
#[derive(Error, Debug)]
pub enum Error {
    #[error("LDraw directory not usable: {0}")]
    LDrawDirNotFound(PathBuf),

    #[error("Could not open model file: {0}")]
    FileNotFound(PathBuf),

    #[error("Load canceled")]
    Canceled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Diagnostic category, one per distinct failure mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiagKind {
    General,
    Parse,
    FileNotFound,
    Matrix,
    PartDeterminant,
    NonFlatQuad,
    ConcaveQuad,
    VertexOrder,
    MatchingPoints,
    Colinear,
    BfcWarning,
    BfcError,
    Mpd,
    Whitespace,
    MovedTo,
    UnofficialPart,
    ModelLoop,
    MetaCommand,
    Texmap,
}

/// Whether the affected line is unusable or merely repaired/cosmetic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Severity {
    Error,
    Warning,
}

/// One recorded problem, attached to the line that produced it
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Diagnostic {
    pub kind: DiagKind,
    pub severity: Severity,
    pub message: String,
    /// 1-based line number in the source file, 0 when not line-bound
    pub line_number: usize,
}

impl Diagnostic {
    pub fn error(kind: DiagKind, line_number: usize, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            message: message.into(),
            line_number,
        }
    }

    pub fn warning(kind: DiagKind, line_number: usize, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Warning,
            message: message.into(),
            line_number,
        }
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{} (line {}): {}", level, self.line_number, self.message)
    }
}
