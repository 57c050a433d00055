//! Model representation: tensors, per-layer updates and the global model.

use std::{
    collections::BTreeMap,
    iter::FromIterator,
    slice::{Iter, IterMut},
};

use derive_more::{AsRef, Display, From, Index, IndexMut, Into};
use serde::{Deserialize, Serialize};

/// A flat numerical tensor.
///
/// Shapes are not tracked here: two tensors agree in shape iff they have the
/// same length and belong to the same layer component. (De)serializing the
/// shaped representation used by the learning framework is the job of the
/// external tensor codec, which is out of scope for this crate.
#[derive(Debug, Clone, PartialEq, From, Index, IndexMut, Into, Serialize, Deserialize)]
pub struct Tensor(Vec<f64>);

#[allow(clippy::len_without_is_empty)]
impl Tensor {
    /// Creates a zero tensor of the given length.
    pub fn zeros(len: usize) -> Self {
        Tensor(vec![0.0; len])
    }

    /// Gets the number of elements of this tensor.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Creates an iterator that yields references to the elements of this tensor.
    pub fn iter(&self) -> Iter<f64> {
        self.0.iter()
    }

    /// Creates an iterator that yields mutable references to the elements of this tensor.
    pub fn iter_mut(&mut self) -> IterMut<f64> {
        self.0.iter_mut()
    }

    /// Gets the elements of this tensor as a slice.
    pub fn as_slice(&self) -> &[f64] {
        self.0.as_slice()
    }
}

impl FromIterator<f64> for Tensor {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        Tensor(iter.into_iter().collect())
    }
}

impl IntoIterator for Tensor {
    type Item = f64;
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// The weight and bias tensors of one trainable layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerUpdate {
    pub weights: Tensor,
    pub bias: Tensor,
}

impl LayerUpdate {
    /// Creates a zero-filled layer update with the same component lengths as `self`.
    pub fn zeros_like(&self) -> Self {
        LayerUpdate {
            weights: Tensor::zeros(self.weights.len()),
            bias: Tensor::zeros(self.bias.len()),
        }
    }
}

/// A named collection of per-layer weight updates.
///
/// Layer names are the join key between the shares generated by different
/// participants, so the map is ordered to keep iteration deterministic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelUpdate(BTreeMap<String, LayerUpdate>);

#[allow(clippy::len_without_is_empty)]
impl ModelUpdate {
    /// Creates an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the update for the named layer.
    pub fn insert(&mut self, name: impl Into<String>, layer: LayerUpdate) {
        self.0.insert(name.into(), layer);
    }

    /// Gets the update of the named layer.
    pub fn get(&self, name: &str) -> Option<&LayerUpdate> {
        self.0.get(name)
    }

    /// Gets the number of layers of this update.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Creates an iterator over `(layer name, layer update)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &LayerUpdate)> {
        self.0.iter()
    }

    /// Creates an iterator that yields mutable references to the layer updates.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut LayerUpdate)> {
        self.0.iter_mut()
    }

    /// Creates an iterator over the layer names in name order.
    pub fn layer_names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Creates a zero-filled update with the same layer names and component
    /// lengths as `self`.
    pub fn zeros_like(&self) -> Self {
        self.0
            .iter()
            .map(|(name, layer)| (name.clone(), layer.zeros_like()))
            .collect()
    }
}

impl FromIterator<(String, LayerUpdate)> for ModelUpdate {
    fn from_iter<I: IntoIterator<Item = (String, LayerUpdate)>>(iter: I) -> Self {
        ModelUpdate(iter.into_iter().collect())
    }
}

impl IntoIterator for ModelUpdate {
    type Item = (String, LayerUpdate);
    type IntoIter = std::collections::btree_map::IntoIter<String, LayerUpdate>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// An opaque description of the model architecture.
///
/// The coordinator ferries this verbatim to the participants, which hand it
/// to their local learning framework. Its contents are never interpreted by
/// the protocol.
#[derive(Debug, Clone, PartialEq, Display, From, AsRef, Serialize, Deserialize)]
pub struct ModelArchitecture(String);

impl ModelArchitecture {
    pub fn new(description: impl Into<String>) -> Self {
        ModelArchitecture(description.into())
    }
}

/// The global model owned by the coordinator and broadcast at round start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalModel {
    pub architecture: ModelArchitecture,
    pub weights: ModelUpdate,
}

impl GlobalModel {
    pub fn new(architecture: ModelArchitecture, weights: ModelUpdate) -> Self {
        GlobalModel {
            architecture,
            weights,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros_like_preserves_layer_layout() {
        let mut update = ModelUpdate::new();
        update.insert(
            "conv_1",
            LayerUpdate {
                weights: Tensor::from(vec![1.0, 2.0, 3.0]),
                bias: Tensor::from(vec![4.0]),
            },
        );
        update.insert(
            "dense_1",
            LayerUpdate {
                weights: Tensor::from(vec![5.0, 6.0]),
                bias: Tensor::from(vec![7.0]),
            },
        );

        let zeros = update.zeros_like();
        assert_eq!(
            zeros.layer_names().collect::<Vec<_>>(),
            update.layer_names().collect::<Vec<_>>()
        );
        let conv = zeros.get("conv_1").unwrap();
        assert_eq!(conv.weights, Tensor::zeros(3));
        assert_eq!(conv.bias, Tensor::zeros(1));
    }

    #[test]
    fn test_layer_iteration_is_name_ordered() {
        let mut update = ModelUpdate::new();
        for name in &["dense_2", "conv_1", "dense_1"] {
            update.insert(
                *name,
                LayerUpdate {
                    weights: Tensor::zeros(1),
                    bias: Tensor::zeros(1),
                },
            );
        }
        let names: Vec<_> = update.layer_names().map(String::as_str).collect();
        assert_eq!(names, vec!["conv_1", "dense_1", "dense_2"]);
    }
}
