// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Replayable transform log. A `TransformState` is the ordered list of edits
// applied to an image since capture; the source pixels are never mutated.

use serde::{Deserialize, Serialize};

use crate::patch_code::PatchCode;

/// Angles closer than this to a multiple of 360 count as no rotation.
const ANGLE_EPSILON: f64 = 1e-6;
const SCALE_EPSILON: f64 = 1e-9;

/// A single replayable edit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TransformStep {
    /// Pixels removed from each edge.
    Crop {
        left: u32,
        top: u32,
        right: u32,
        bottom: u32,
    },
    /// Clockwise rotation about the image centre.
    Rotate { degrees: f64 },
    /// Both in -1000..=1000.
    BrightnessContrast { brightness: i32, contrast: i32 },
    Scale { factor: f64 },
    /// Clockwise correction applied by auto-deskew. Kept apart from
    /// `Rotate` so a user rotation never absorbs it.
    Deskew { degrees: f64 },
    /// Marks an image as carrying a patch code. Does not touch pixels.
    PatchCodeTag { code: PatchCode },
}

impl TransformStep {
    /// True when applying the step would leave the image unchanged.
    pub fn is_null(&self) -> bool {
        match self {
            Self::Crop {
                left,
                top,
                right,
                bottom,
            } => *left == 0 && *top == 0 && *right == 0 && *bottom == 0,
            Self::Rotate { degrees } | Self::Deskew { degrees } => is_full_turn(*degrees),
            Self::BrightnessContrast {
                brightness,
                contrast,
            } => *brightness == 0 && *contrast == 0,
            Self::Scale { factor } => (factor - 1.0).abs() < SCALE_EPSILON,
            Self::PatchCodeTag { .. } => false,
        }
    }

    /// Whether the step changes pixels when rendered.
    pub fn affects_pixels(&self) -> bool {
        !matches!(self, Self::PatchCodeTag { .. }) && !self.is_null()
    }

    /// Merge `next` into `self` when the pair collapses into one equivalent
    /// step. Returns `None` when the two cannot be combined.
    pub fn merge(&self, next: &TransformStep) -> Option<TransformStep> {
        match (self, next) {
            (Self::Rotate { degrees: a }, Self::Rotate { degrees: b }) => Some(Self::Rotate {
                degrees: normalize_degrees(a + b),
            }),
            (Self::Deskew { degrees: a }, Self::Deskew { degrees: b }) => Some(Self::Deskew {
                degrees: normalize_degrees(a + b),
            }),
            (Self::Scale { factor: a }, Self::Scale { factor: b }) => {
                Some(Self::Scale { factor: a * b })
            }
            // Margins of a crop taken from an already-cropped image add up.
            (
                Self::Crop {
                    left: l1,
                    top: t1,
                    right: r1,
                    bottom: b1,
                },
                Self::Crop {
                    left: l2,
                    top: t2,
                    right: r2,
                    bottom: b2,
                },
            ) => Some(Self::Crop {
                left: l1 + l2,
                top: t1 + t2,
                right: r1 + r2,
                bottom: b1 + b2,
            }),
            (Self::PatchCodeTag { .. }, Self::PatchCodeTag { code }) => {
                Some(Self::PatchCodeTag { code: *code })
            }
            // Brightness/contrast clip at the channel bounds, so two
            // adjustments are not equivalent to their sum.
            _ => None,
        }
    }
}

/// Normalise to (-180, 180].
pub fn normalize_degrees(degrees: f64) -> f64 {
    let mut d = degrees.rem_euclid(360.0);
    if d > 180.0 {
        d -= 360.0;
    }
    d
}

fn is_full_turn(degrees: f64) -> bool {
    let d = degrees.rem_euclid(360.0);
    d < ANGLE_EPSILON || 360.0 - d < ANGLE_EPSILON
}

/// Ordered, replayable list of steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformState {
    steps: Vec<TransformStep>,
}

impl TransformState {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> &[TransformStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Append `step`, merging it into the last step where possible.
    ///
    /// Null steps are skipped, and a merge that cancels out (e.g. +90 then
    /// -90) removes the last step instead of leaving a null one behind.
    pub fn add_or_simplify(&self, step: TransformStep) -> TransformState {
        if step.is_null() {
            return self.clone();
        }
        let mut steps = self.steps.clone();
        match steps.last().and_then(|last| last.merge(&step)) {
            Some(merged) if merged.is_null() => {
                steps.pop();
            }
            Some(merged) => {
                if let Some(last) = steps.last_mut() {
                    *last = merged;
                }
            }
            None => steps.push(step),
        }
        TransformState { steps }
    }

    pub fn has_patch_code_tag(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s, TransformStep::PatchCodeTag { .. }))
    }
}

impl FromIterator<TransformStep> for TransformState {
    fn from_iter<I: IntoIterator<Item = TransformStep>>(iter: I) -> Self {
        iter.into_iter()
            .fold(TransformState::empty(), |state, step| state.add_or_simplify(step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotate(degrees: f64) -> TransformStep {
        TransformStep::Rotate { degrees }
    }

    #[test]
    fn adjacent_rotations_merge() {
        let state = TransformState::empty()
            .add_or_simplify(rotate(90.0))
            .add_or_simplify(rotate(135.0));
        assert_eq!(state.steps(), &[rotate(-135.0)]);
    }

    #[test]
    fn cancelling_rotations_leave_nothing() {
        let state = TransformState::empty()
            .add_or_simplify(TransformStep::Scale { factor: 0.5 })
            .add_or_simplify(rotate(90.0))
            .add_or_simplify(rotate(270.0));
        assert_eq!(state.steps(), &[TransformStep::Scale { factor: 0.5 }]);
    }

    #[test]
    fn null_steps_are_skipped() {
        let state = TransformState::empty()
            .add_or_simplify(rotate(360.0))
            .add_or_simplify(TransformStep::BrightnessContrast {
                brightness: 0,
                contrast: 0,
            });
        assert!(state.is_empty());
    }

    #[test]
    fn brightness_contrast_never_merges() {
        let step = TransformStep::BrightnessContrast {
            brightness: 200,
            contrast: 0,
        };
        let state: TransformState = [step, step].into_iter().collect();
        assert_eq!(state.steps().len(), 2);
    }

    #[test]
    fn deskew_does_not_merge_with_rotate() {
        let state: TransformState = [rotate(180.0), TransformStep::Deskew { degrees: -1.4 }]
            .into_iter()
            .collect();
        assert_eq!(state.steps().len(), 2);
    }

    #[test]
    fn crops_add_margins() {
        let a = TransformStep::Crop {
            left: 1,
            top: 2,
            right: 3,
            bottom: 4,
        };
        let state: TransformState = [a, a].into_iter().collect();
        assert_eq!(
            state.steps(),
            &[TransformStep::Crop {
                left: 2,
                top: 4,
                right: 6,
                bottom: 8
            }]
        );
    }

    #[test]
    fn original_state_is_untouched() {
        let base = TransformState::empty().add_or_simplify(rotate(90.0));
        let _ = base.add_or_simplify(rotate(90.0));
        assert_eq!(base.steps(), &[rotate(90.0)]);
    }
}
