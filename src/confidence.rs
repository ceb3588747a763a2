//! Source-reported certainty.
//!
//! A `Confidence` is the number an extractor attaches to a fact. It is the
//! only input to confidence arbitration: a stored attribute value is replaced
//! only by a strictly more confident observation.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Certainty in [0.0, 1.0].
///
/// # Examples
///
/// ```
/// use factfold::Confidence;
///
/// let conf = Confidence::new(0.95).unwrap();
/// assert_eq!(conf.value(), 0.95);
/// assert!(Confidence::new(1.5).is_err());
///
/// // Source data is read leniently.
/// assert_eq!(Confidence::lenient(Some(2.0)).value(), 1.0);
/// assert_eq!(Confidence::lenient(None).value(), 1.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub struct Confidence(f32);

impl Confidence {
    /// Minimum valid confidence value.
    pub const MIN_VALUE: f32 = 0.0;

    /// Maximum valid confidence value.
    pub const MAX_VALUE: f32 = 1.0;

    /// Confidence assumed when a source does not report one.
    pub const DEFAULT_VALUE: f32 = 1.0;

    /// Creates a new confidence with validation.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::ConfidenceOutOfRange` if the value is NaN or
    /// not in [0.0, 1.0].
    pub fn new(value: f32) -> Result<Self, ValidationError> {
        if value.is_nan() || !(Self::MIN_VALUE..=Self::MAX_VALUE).contains(&value) {
            return Err(ValidationError::ConfidenceOutOfRange { value });
        }
        Ok(Self(value))
    }

    /// Reads a source-reported value: missing or NaN becomes the default,
    /// anything else is clamped into range.
    #[must_use]
    pub fn lenient(value: Option<f64>) -> Self {
        match value {
            #[allow(clippy::cast_possible_truncation)]
            Some(v) if !v.is_nan() => Self((v as f32).clamp(Self::MIN_VALUE, Self::MAX_VALUE)),
            _ => Self(Self::DEFAULT_VALUE),
        }
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self(0.0)
    }

    #[must_use]
    pub const fn one() -> Self {
        Self(1.0)
    }

    pub const fn value(self) -> f32 {
        self.0
    }

    /// Returns true if `self` would win arbitration against `stored`.
    ///
    /// Ties lose: the value already held is kept.
    #[must_use]
    pub fn beats(self, stored: Self) -> bool {
        self.0 > stored.0
    }

    #[must_use]
    pub fn max(self, other: Self) -> Self {
        if other.0 > self.0 {
            other
        } else {
            self
        }
    }
}

impl Default for Confidence {
    fn default() -> Self {
        Self(Self::DEFAULT_VALUE)
    }
}

impl PartialOrd for Confidence {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.0.partial_cmp(&other.0)
    }
}

impl TryFrom<f32> for Confidence {
    type Error = ValidationError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Confidence> for f32 {
    fn from(value: Confidence) -> Self {
        value.0
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}
