//! Accumulation of shares into partial sums and of partial sums into the
//! global average.

use thiserror::Error;

use crate::model::ModelUpdate;

/// Errors returned when a contribution does not fit the template it is being
/// accumulated into.
#[derive(Debug, Error, PartialEq)]
pub enum AccumulationError {
    /// the contribution contains the unknown layer `{0}`
    #[error("the contribution contains the unknown layer `{0}`")]
    UnknownLayer(String),
    /// the contribution is missing the layer `{0}`
    #[error("the contribution is missing the layer `{0}`")]
    MissingLayer(String),
    /// the `{component}` tensor of layer `{layer}` has length {actual}, expected {expected}
    #[error(
        "the `{component}` tensor of layer `{layer}` has length {actual}, expected {expected}"
    )]
    LengthMismatch {
        layer: String,
        component: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Validates that `contribution` has exactly the layer names and component
/// lengths of `template`.
fn validate(template: &ModelUpdate, contribution: &ModelUpdate) -> Result<(), AccumulationError> {
    for name in contribution.layer_names() {
        if template.get(name).is_none() {
            return Err(AccumulationError::UnknownLayer(name.clone()));
        }
    }
    for (name, expected) in template.iter() {
        let layer = contribution
            .get(name)
            .ok_or_else(|| AccumulationError::MissingLayer(name.clone()))?;
        if layer.weights.len() != expected.weights.len() {
            return Err(AccumulationError::LengthMismatch {
                layer: name.clone(),
                component: "weights",
                expected: expected.weights.len(),
                actual: layer.weights.len(),
            });
        }
        if layer.bias.len() != expected.bias.len() {
            return Err(AccumulationError::LengthMismatch {
                layer: name.clone(),
                component: "bias",
                expected: expected.bias.len(),
                actual: layer.bias.len(),
            });
        }
    }
    Ok(())
}

/// Adds `contribution`, element-wise scaled by `scale`, onto `sum`.
///
/// Must only be called after [`validate`] accepted the contribution.
fn fold(sum: &mut ModelUpdate, contribution: &ModelUpdate, scale: f64) {
    for (name, layer) in sum.iter_mut() {
        // Safe unwrap: validate() guarantees the layer exists.
        let other = contribution.get(name).unwrap();
        for (acc, value) in layer.weights.iter_mut().zip(other.weights.iter()) {
            *acc += value * scale;
        }
        for (acc, value) in layer.bias.iter_mut().zip(other.bias.iter()) {
            *acc += value * scale;
        }
    }
}

/// Element-wise accumulator a participant folds its own kept share and the
/// shares received from its peers into.
///
/// Contributions are validated against the template before they touch the
/// running sum, so a rejected share leaves the accumulator unchanged.
#[derive(Debug, Clone)]
pub struct ShareAccumulator {
    sum: ModelUpdate,
    contributions: usize,
}

impl ShareAccumulator {
    /// Creates an empty accumulator shaped like `template`.
    pub fn new(template: &ModelUpdate) -> Self {
        ShareAccumulator {
            sum: template.zeros_like(),
            contributions: 0,
        }
    }

    /// Folds one share into the running sum.
    pub fn accumulate(&mut self, share: &ModelUpdate) -> Result<(), AccumulationError> {
        validate(&self.sum, share)?;
        fold(&mut self.sum, share, 1.0);
        self.contributions += 1;
        Ok(())
    }

    /// Gets the number of shares folded in so far.
    pub fn contributions(&self) -> usize {
        self.contributions
    }

    /// Finishes the accumulation and returns the partial sum.
    pub fn into_partial_sum(self) -> ModelUpdate {
        self.sum
    }
}

/// Incremental average over a fixed number of participant partial sums.
///
/// Each contribution is divided by the participant count *before* it is
/// added, which keeps intermediate magnitudes bounded by the largest single
/// contribution instead of growing with the participant count.
#[derive(Debug, Clone)]
pub struct RunningAverage {
    sum: ModelUpdate,
    participant_count: usize,
    contributions: usize,
}

impl RunningAverage {
    /// Creates an empty average shaped like `template` over `participant_count`
    /// expected contributions.
    ///
    /// # Panics
    /// Panics if `participant_count == 0`.
    pub fn new(template: &ModelUpdate, participant_count: usize) -> Self {
        assert!(participant_count >= 1, "cannot average over zero participants");
        RunningAverage {
            sum: template.zeros_like(),
            participant_count,
            contributions: 0,
        }
    }

    /// Folds one partial sum into the average.
    pub fn accumulate(&mut self, partial_sum: &ModelUpdate) -> Result<(), AccumulationError> {
        validate(&self.sum, partial_sum)?;
        fold(&mut self.sum, partial_sum, 1.0 / self.participant_count as f64);
        self.contributions += 1;
        Ok(())
    }

    /// Gets the number of partial sums folded in so far.
    pub fn contributions(&self) -> usize {
        self.contributions
    }

    /// Whether all expected contributions have been folded in.
    pub fn is_complete(&self) -> bool {
        self.contributions == self.participant_count
    }

    /// Finishes the averaging and returns the mean update.
    pub fn into_model_update(self) -> ModelUpdate {
        self.sum
    }
}
