use crate::alignment::AlignmentMatrix;
use crate::constants::{
    ALIGNMENT_MATRIX_LABEL_NAME, EOS_ID, LENRATIO_LABEL_NAME, PAD_ID, TARGET_FACTOR_LABEL_NAME,
    TARGET_LABEL_NAME,
};
use crate::dataset::tensor_to_vec;
use crate::error::Result;
use std::collections::HashMap;
use tch::{Device, Kind, Tensor};

/// A training label: token ids and ratios are dense, alignments stay sparse.
#[derive(Debug)]
pub enum Label {
    Dense(Tensor),
    Sparse(AlignmentMatrix),
}

impl Label {
    pub fn dense(&self) -> Option<&Tensor> {
        match self {
            Label::Dense(tensor) => Some(tensor),
            Label::Sparse(_) => None,
        }
    }

    pub fn to_dense(&self) -> Tensor {
        match self {
            Label::Dense(tensor) => tensor.shallow_clone(),
            Label::Sparse(matrix) => matrix.to_dense(),
        }
    }
}

/// One bucket's worth of sentence pairs, handed to the training loop.
///
/// - `source`: `(samples, source_len, source_factors)`
/// - `target`: `(samples, target_len - 1, target_factors)`, EOS replaced by PAD
/// - `source_length`, `target_length`: non-PAD positions of the first factor
/// - `labels`: at least [`TARGET_LABEL_NAME`] and [`LENRATIO_LABEL_NAME`], one
///   `target_factor{i}_label` per extra target factor and
///   [`ALIGNMENT_MATRIX_LABEL_NAME`] when the data carries alignments
#[derive(Debug)]
pub struct Batch {
    pub source: Tensor,
    pub source_length: Tensor,
    pub target: Tensor,
    pub target_length: Tensor,
    pub prepended_source_length: Option<Tensor>,
    pub labels: HashMap<String, Label>,
    pub samples: usize,
    /// Valid (non-PAD) target token positions in the batch.
    pub tokens: usize,
}

impl Batch {
    pub fn label(&self, name: &str) -> Option<&Label> {
        self.labels.get(name)
    }

    /// Moves the dense tensors to `device`. Sparse labels stay host-side.
    pub fn to_device(self, device: Device) -> Self {
        Self {
            source: self.source.to_device(device),
            source_length: self.source_length.to_device(device),
            target: self.target.to_device(device),
            target_length: self.target_length.to_device(device),
            prepended_source_length: self.prepended_source_length.map(|t| t.to_device(device)),
            labels: self
                .labels
                .into_iter()
                .map(|(name, label)| match label {
                    Label::Dense(tensor) => (name, Label::Dense(tensor.to_device(device))),
                    sparse => (name, sparse),
                })
                .collect(),
            samples: self.samples,
            tokens: self.tokens,
        }
    }
}

/// Splits `(samples, len, factors)` target sequences into decoder input and labels.
///
/// The target drops the last position and has its EOS replaced by PAD; the label
/// drops the leading BOS:
///
/// ```text
/// sequence: [BOS, 4, 17, 35, 12, EOS, PAD, PAD]
/// target:   [BOS, 4, 17, 35, 12, PAD, PAD]
/// label:    [4, 17, 35, 12, EOS, PAD, PAD]
/// ```
pub fn create_target_and_shifted_label_sequences(target_and_label: &Tensor) -> (Tensor, Tensor) {
    let length = target_and_label.size()[1];
    let target = target_and_label.narrow(1, 0, length - 1);
    let target = target.masked_fill(&target.eq(EOS_ID as i64), PAD_ID as i64);
    let label = target_and_label.narrow(1, 1, length - 1);
    (target, label)
}

/// Number of non-PAD positions of the first factor of every sample.
pub fn sequence_lengths(sequences: &Tensor) -> Result<Vec<i64>> {
    let size = sequences.size();
    let (samples, length) = (size[0] as usize, size[1] as usize);
    let words: Vec<i32> = tensor_to_vec(&sequences.select(2, 0).contiguous())?;
    Ok((0..samples)
        .map(|i| {
            words[i * length..(i + 1) * length]
                .iter()
                .filter(|&&w| w != PAD_ID)
                .count() as i64
        })
        .collect())
}

pub fn create_batch_from_parallel_sample(
    source: Tensor,
    target: Tensor,
    label: Tensor,
    prepended_source_length: Option<Tensor>,
    alignment_matrix: Option<AlignmentMatrix>,
) -> Result<Batch> {
    let source_lengths = sequence_lengths(&source)?;
    let target_lengths = sequence_lengths(&target)?;
    let length_ratio: Vec<f32> = source_lengths
        .iter()
        .zip(&target_lengths)
        .map(|(&s, &t)| s as f32 / t as f32)
        .collect();

    let mut labels = HashMap::new();
    labels.insert(
        TARGET_LABEL_NAME.to_string(),
        Label::Dense(label.select(2, 0)),
    );
    for factor in 1..label.size()[2] {
        labels.insert(
            format!("{TARGET_FACTOR_LABEL_NAME}{factor}_label"),
            Label::Dense(label.select(2, factor)),
        );
    }
    labels.insert(
        LENRATIO_LABEL_NAME.to_string(),
        Label::Dense(Tensor::from_slice(&length_ratio).to_kind(Kind::Float)),
    );
    if let Some(matrix) = alignment_matrix {
        labels.insert(ALIGNMENT_MATRIX_LABEL_NAME.to_string(), Label::Sparse(matrix));
    }

    let samples = source.size()[0] as usize;
    let tokens = target_lengths.iter().sum::<i64>() as usize;
    Ok(Batch {
        source,
        source_length: Tensor::from_slice(&source_lengths),
        target,
        target_length: Tensor::from_slice(&target_lengths),
        prepended_source_length,
        labels,
        samples,
        tokens,
    })
}
