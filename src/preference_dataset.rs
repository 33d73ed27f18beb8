//! Queries, preference records and the dataset the trainer consumes.
//!
//! A query is a trajectory segment: a list of steps, each a feature vector.
//! All queries in one dataset share a shape so batches stack into dense
//! `(batch, steps, features)` tensors.

use crate::errors::{PrefError, PrefResult};
use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// A candidate trajectory segment to be compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub steps: Vec<Vec<f64>>,
}

impl Query {
    pub fn new(steps: Vec<Vec<f64>>) -> Self {
        Self { steps }
    }

    /// Single-step query.
    pub fn from_features(features: Vec<f64>) -> Self {
        Self {
            steps: vec![features],
        }
    }

    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    /// Width of the step feature vectors (0 for an empty segment).
    pub fn feature_dim(&self) -> usize {
        self.steps.first().map(Vec::len).unwrap_or(0)
    }

    /// (steps, features), or an error when the steps are ragged or empty.
    pub fn shape(&self) -> PrefResult<(usize, usize)> {
        let dim = self.feature_dim();
        if self.steps.is_empty() || dim == 0 {
            return Err(PrefError::invalid_input("query", "segment has no steps or no features"));
        }
        if self.steps.iter().any(|step| step.len() != dim) {
            return Err(PrefError::invalid_input("query", "segment steps have differing feature counts"));
        }
        if self.steps.iter().flatten().any(|value| !value.is_finite()) {
            return Err(PrefError::invalid_input("query", "segment contains non-finite features"));
        }
        Ok((self.steps.len(), dim))
    }

    /// Tensor of shape (1, steps, features).
    pub fn to_tensor(&self, device: &Device) -> PrefResult<Tensor> {
        let (steps, dim) = self.shape()?;
        let flat: Vec<f64> = self.steps.iter().flatten().copied().collect();
        Ok(Tensor::from_vec(flat, (1, steps, dim), device)?)
    }
}

/// A labeled pairwise comparison. `choice` is the probability that
/// `query_a` is preferred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceRecord {
    query_a: Query,
    query_b: Query,
    choice: f64,
}

impl PreferenceRecord {
    pub fn new(query_a: Query, query_b: Query, choice: f64) -> PrefResult<Self> {
        validate_choice(choice)?;
        Ok(Self {
            query_a,
            query_b,
            choice,
        })
    }

    pub fn query_a(&self) -> &Query {
        &self.query_a
    }

    pub fn query_b(&self) -> &Query {
        &self.query_b
    }

    pub fn choice(&self) -> f64 {
        self.choice
    }
}

fn validate_choice(choice: f64) -> PrefResult<()> {
    if !choice.is_finite() || !(0.0..=1.0).contains(&choice) {
        return Err(PrefError::invalid_input(
            "choice",
            format!("label {choice} is outside [0, 1]"),
        ));
    }
    Ok(())
}

/// Dense tensors for one batch of records.
#[derive(Debug)]
pub struct PreferenceBatch {
    pub queries_a: Tensor,
    pub queries_b: Tensor,
    pub choices: Tensor,
}

/// Fixed-length, randomly indexable collection of preference records.
#[derive(Debug, Clone, Default)]
pub struct PreferenceDataset {
    records: Vec<PreferenceRecord>,
    segment_shape: Option<(usize, usize)>,
}

impl PreferenceDataset {
    pub fn new(records: Vec<PreferenceRecord>) -> PrefResult<Self> {
        let mut segment_shape = None;

        for (index, record) in records.iter().enumerate() {
            validate_choice(record.choice)?;
            for query in [&record.query_a, &record.query_b] {
                let shape = query.shape().map_err(|e| {
                    PrefError::invalid_input(format!("records[{index}]"), e.to_string())
                })?;
                match segment_shape {
                    None => segment_shape = Some(shape),
                    Some(expected) if expected != shape => {
                        return Err(PrefError::invalid_input(
                            format!("records[{index}]"),
                            format!("segment shape {shape:?} differs from dataset shape {expected:?}"),
                        ));
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(Self {
            records,
            segment_shape,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PreferenceRecord> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PreferenceRecord> {
        self.records.iter()
    }

    /// (steps, features) shared by every query, `None` when empty.
    pub fn segment_shape(&self) -> Option<(usize, usize)> {
        self.segment_shape
    }

    /// Stack the records at `indices` into tensors on `device`.
    pub fn batch(&self, indices: &[usize], device: &Device) -> PrefResult<PreferenceBatch> {
        let (steps, dim) = self
            .segment_shape
            .ok_or_else(|| PrefError::invalid_input("dataset", "cannot batch an empty dataset"))?;

        let mut flat_a: Vec<f64> = Vec::with_capacity(indices.len() * steps * dim);
        let mut flat_b: Vec<f64> = Vec::with_capacity(indices.len() * steps * dim);
        let mut choices: Vec<f64> = Vec::with_capacity(indices.len());

        for &index in indices {
            let record = self.records.get(index).ok_or_else(|| {
                PrefError::invalid_input("index", format!("{index} out of range for {} records", self.len()))
            })?;
            flat_a.extend(record.query_a.steps.iter().flatten().copied());
            flat_b.extend(record.query_b.steps.iter().flatten().copied());
            choices.push(record.choice);
        }

        let batch_size = indices.len();
        Ok(PreferenceBatch {
            queries_a: Tensor::from_vec(flat_a, (batch_size, steps, dim), device)?,
            queries_b: Tensor::from_vec(flat_b, (batch_size, steps, dim), device)?,
            choices: Tensor::from_vec(choices, batch_size, device)?,
        })
    }

    /// Load records from a JSON Lines file, one record per line.
    pub fn from_jsonl<P: AsRef<Path>>(path: P) -> PrefResult<Self> {
        Self::new(read_jsonl(path.as_ref())?)
    }

    /// Write records as JSON Lines.
    pub fn to_jsonl<P: AsRef<Path>>(&self, path: P) -> PrefResult<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .map_err(|e| PrefError::io(format!("creating {}", path.display()), e))?;
        let mut writer = BufWriter::new(file);
        for record in &self.records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl std::ops::Index<usize> for PreferenceDataset {
    type Output = PreferenceRecord;

    fn index(&self, index: usize) -> &Self::Output {
        &self.records[index]
    }
}

/// Read a JSON Lines file into typed values. Blank lines are skipped.
pub fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> PrefResult<Vec<T>> {
    let file = File::open(path).map_err(|e| PrefError::io(format!("opening {}", path.display()), e))?;
    let mut items = Vec::new();

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| PrefError::io(format!("reading {}", path.display()), e))?;
        if line.trim().is_empty() {
            continue;
        }
        let item = serde_json::from_str(&line).map_err(|e| {
            PrefError::serialization(format!("{} line {}", path.display(), line_no + 1), e)
        })?;
        items.push(item);
    }

    Ok(items)
}

/// Load a candidate query pool from JSON Lines.
pub fn load_queries<P: AsRef<Path>>(path: P) -> PrefResult<Vec<Query>> {
    let queries: Vec<Query> = read_jsonl(path.as_ref())?;
    for (index, query) in queries.iter().enumerate() {
        query
            .shape()
            .map_err(|e| PrefError::invalid_input(format!("queries[{index}]"), e.to_string()))?;
    }
    Ok(queries)
}
