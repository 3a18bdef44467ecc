// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Named point and cell data arrays

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which mesh entity an array is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Association {
    Point,
    Cell,
}

impl fmt::Display for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Association::Point => write!(f, "point"),
            Association::Cell => write!(f, "cell"),
        }
    }
}

/// Typed storage for array values, tuple-major
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayValues {
    Float64(Vec<f64>),
    Int32(Vec<i32>),
}

impl ArrayValues {
    pub fn len(&self) -> usize {
        match self {
            ArrayValues::Float64(v) => v.len(),
            ArrayValues::Int32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named array with a fixed number of components per tuple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataArray {
    pub name: String,
    pub components: usize,
    pub values: ArrayValues,
}

impl DataArray {
    pub fn scalars_f64(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            components: 1,
            values: ArrayValues::Float64(values),
        }
    }

    pub fn scalars_i32(name: impl Into<String>, values: Vec<i32>) -> Self {
        Self {
            name: name.into(),
            components: 1,
            values: ArrayValues::Int32(values),
        }
    }

    pub fn vectors_f64(name: impl Into<String>, components: usize, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            components: components.max(1),
            values: ArrayValues::Float64(values),
        }
    }

    /// Number of tuples
    pub fn len(&self) -> usize {
        self.values.len() / self.components.max(1)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match &self.values {
            ArrayValues::Int32(v) => Some(v),
            ArrayValues::Float64(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match &self.values {
            ArrayValues::Float64(v) => Some(v),
            ArrayValues::Int32(_) => None,
        }
    }

    /// Component `component` of tuple `tuple`, widened to f64
    pub fn value(&self, tuple: usize, component: usize) -> f64 {
        let index = tuple * self.components + component;
        match &self.values {
            ArrayValues::Float64(v) => v[index],
            ArrayValues::Int32(v) => v[index] as f64,
        }
    }

    /// Keep only the tuples for which `keep` is true, preserving order
    pub fn filtered(&self, keep: &[bool]) -> DataArray {
        let n = self.components;
        let values = match &self.values {
            ArrayValues::Float64(v) => ArrayValues::Float64(
                v.chunks(n)
                    .zip(keep)
                    .filter(|(_, &k)| k)
                    .flat_map(|(c, _)| c.iter().copied())
                    .collect(),
            ),
            ArrayValues::Int32(v) => ArrayValues::Int32(
                v.chunks(n)
                    .zip(keep)
                    .filter(|(_, &k)| k)
                    .flat_map(|(c, _)| c.iter().copied())
                    .collect(),
            ),
        };
        DataArray {
            name: self.name.clone(),
            components: n,
            values,
        }
    }

    /// Append a copy of tuple `tuple`
    pub fn push_copy(&mut self, tuple: usize) {
        let n = self.components;
        match &mut self.values {
            ArrayValues::Float64(v) => v.extend_from_within(tuple * n..(tuple + 1) * n),
            ArrayValues::Int32(v) => v.extend_from_within(tuple * n..(tuple + 1) * n),
        }
    }

    /// Append the mean of tuples `a` and `b`. Integer arrays copy `a`, so
    /// markers and ids stay valid labels.
    pub fn push_mean(&mut self, a: usize, b: usize) {
        let n = self.components;
        match &mut self.values {
            ArrayValues::Float64(v) => {
                for k in 0..n {
                    let mean = 0.5 * (v[a * n + k] + v[b * n + k]);
                    v.push(mean);
                }
            }
            ArrayValues::Int32(v) => v.extend_from_within(a * n..(a + 1) * n),
        }
    }

    /// Build a new array by picking tuples by index; repeated indices are allowed
    pub fn gathered(&self, indices: &[usize]) -> DataArray {
        let n = self.components;
        let values = match &self.values {
            ArrayValues::Float64(v) => ArrayValues::Float64(
                indices
                    .iter()
                    .flat_map(|&i| v[i * n..(i + 1) * n].iter().copied())
                    .collect(),
            ),
            ArrayValues::Int32(v) => ArrayValues::Int32(
                indices
                    .iter()
                    .flat_map(|&i| v[i * n..(i + 1) * n].iter().copied())
                    .collect(),
            ),
        };
        DataArray {
            name: self.name.clone(),
            components: n,
            values,
        }
    }
}
