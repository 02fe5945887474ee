//! Structured error records shared by every analysis stage.
//!
//! Stages never abort on domain problems: they record an `AnalysisError` at
//! the locus where the problem was observed and carry on with whatever output
//! is still derivable. Downstream stages must tolerate the resulting partial
//! data (unknown codes are treated as priority 0 with fallback dimensions).
//! Only malformed geometry (non-finite coordinates) empties a stage, and even
//! then the failure is a single `InvalidInput` record rather than a panic.

use core_geom::Point;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a recoverable analysis problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum ErrorKind {
    /// A stage was invoked before the stage it consumes had run.
    #[error("required prior stage has not run")]
    PreconditionMissing,
    /// A label leader's two endpoints landed on two different beams.
    #[error("label leader spans two beams")]
    LeaderConflict,
    /// Every member of a cross junction carries a literal span of 1.
    #[error("all members of cross junction have span 1")]
    CrossSpanOne,
    /// A junction still holds two or more fragments after every rule pass.
    #[error("junction unresolved after rule cascade")]
    UnresolvedJunction,
    /// A beam fragment had no label and no propagation source.
    #[error("beam has no label source")]
    UnknownCode,
    /// Non-finite or degenerate geometry in the stage input.
    #[error("malformed stage input")]
    InvalidInput,
}

impl ErrorKind {
    /// Short marker used when errors are surfaced in drawings or summaries.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::PreconditionMissing => "PRE",
            Self::LeaderConflict => "LDR",
            Self::CrossSpanOne => "SP1",
            Self::UnresolvedJunction => "CHK",
            Self::UnknownCode => "UNK",
            Self::InvalidInput => "BAD",
        }
    }
}

/// One recoverable problem, anchored at a drawing location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisError {
    pub kind: ErrorKind,
    pub locus: Point,
    pub detail: String,
}

impl AnalysisError {
    pub fn new(kind: ErrorKind, locus: Point, detail: impl Into<String>) -> Self {
        Self {
            kind,
            locus,
            detail: detail.into(),
        }
    }

    /// Errors without a meaningful drawing location anchor at the origin.
    pub fn unlocated(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self::new(kind, Point::new(0.0, 0.0), detail)
    }
}
