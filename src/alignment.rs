//! Token-level alignment supervision.
//!
//! An alignment between a source sentence and a target sentence is stored as one
//! row of a sparse matrix: the dense `target_len × source_len` weight matrix of the
//! bucket, flattened row-major. The rows of all samples of a bucket are stacked into
//! a single CSR matrix so they can be permuted and sliced together with the token
//! arrays.

use crate::bucket::Bucket;
use crate::error::{DataError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;
use tch::Tensor;

/// `(source_index, target_index)` pairs of one sentence pair.
pub type AlignmentIndices = Vec<(usize, usize)>;

/// Row-compressed sparse matrix, one row per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentMatrix {
    num_columns: usize,
    row_offsets: Vec<i64>,
    columns: Vec<i64>,
    values: Vec<f32>,
}

impl AlignmentMatrix {
    /// Matrix without rows. Buckets that hold no samples carry this value instead of
    /// a missing entry, so every bucket of a dataset with alignments has a matrix.
    pub fn empty(num_columns: usize) -> Self {
        Self {
            num_columns,
            row_offsets: vec![0],
            columns: vec![],
            values: vec![],
        }
    }

    /// Rebuilds a matrix from its raw CSR components, validating their structure.
    pub fn from_parts(
        num_columns: usize,
        row_offsets: Vec<i64>,
        columns: Vec<i64>,
        values: Vec<f32>,
    ) -> Result<Self> {
        let valid = !row_offsets.is_empty()
            && row_offsets[0] == 0
            && row_offsets.windows(2).all(|w| w[0] <= w[1])
            && row_offsets.last().copied() == Some(columns.len() as i64)
            && columns.len() == values.len()
            && columns.iter().all(|&c| c >= 0 && (c as usize) < num_columns);
        if !valid {
            return Err(DataError::config(format!(
                "Inconsistent sparse alignment matrix: {} row offsets, {} columns, {} values, width {}",
                row_offsets.len(),
                columns.len(),
                values.len(),
                num_columns
            )));
        }
        Ok(Self {
            num_columns,
            row_offsets,
            columns,
            values,
        })
    }

    pub fn num_rows(&self) -> usize {
        self.row_offsets.len() - 1
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn row_offsets(&self) -> &[i64] {
        &self.row_offsets
    }

    pub fn columns(&self) -> &[i64] {
        &self.columns
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    fn row_range(&self, row: usize) -> std::ops::Range<usize> {
        self.row_offsets[row] as usize..self.row_offsets[row + 1] as usize
    }

    fn push_row(&mut self, columns: &[i64], values: &[f32]) {
        self.columns.extend_from_slice(columns);
        self.values.extend_from_slice(values);
        self.row_offsets.push(self.columns.len() as i64);
    }

    /// New matrix made of the given rows, in the given order. Rows may repeat.
    pub fn select_rows(&self, rows: &[i64]) -> Self {
        let mut selected = Self::empty(self.num_columns);
        for &row in rows {
            let range = self.row_range(row as usize);
            selected.push_row(&self.columns[range.clone()], &self.values[range]);
        }
        selected
    }

    pub fn narrow(&self, start: usize, len: usize) -> Self {
        let rows: Vec<i64> = (start as i64..(start + len) as i64).collect();
        self.select_rows(&rows)
    }

    pub fn concat(matrices: &[&AlignmentMatrix]) -> Result<Self> {
        let num_columns = matrices.first().map(|m| m.num_columns).unwrap_or(0);
        let mut stacked = Self::empty(num_columns);
        for matrix in matrices {
            if matrix.num_columns != num_columns {
                return Err(DataError::config(format!(
                    "Cannot stack alignment matrices of width {} and {}",
                    num_columns, matrix.num_columns
                )));
            }
            for row in 0..matrix.num_rows() {
                let range = matrix.row_range(row);
                stacked.push_row(&matrix.columns[range.clone()], &matrix.values[range]);
            }
        }
        Ok(stacked)
    }

    pub fn to_dense_vec(&self) -> Vec<f32> {
        let mut dense = vec![0f32; self.num_rows() * self.num_columns];
        for row in 0..self.num_rows() {
            for i in self.row_range(row) {
                dense[row * self.num_columns + self.columns[i] as usize] = self.values[i];
            }
        }
        dense
    }

    pub fn to_dense(&self) -> Tensor {
        Tensor::from_slice(&self.to_dense_vec())
            .reshape(&[self.num_rows() as i64, self.num_columns as i64])
    }
}

/// Parses one line of `source-target` index pairs.
///
/// Pairs are separated by spaces or tabs; spaces around the dash and separators at
/// the start or end of the line are tolerated, so `"0-1 2-3"`, `"\t0-1\t2-3\t"` and
/// `"0 - 1 2 - 3"` all parse to `[(0, 1), (2, 3)]`.
pub fn parse_alignment_matrix_indices(line: &str) -> Result<AlignmentIndices> {
    let mut tokens: Vec<String> = vec![];
    for part in line.split_whitespace() {
        match tokens.last_mut() {
            Some(last) if last.ends_with('-') || part.starts_with('-') => last.push_str(part),
            _ => tokens.push(part.to_string()),
        }
    }
    tokens
        .iter()
        .map(|token| {
            token
                .split_once('-')
                .and_then(|(source, target)| Some((source.parse().ok()?, target.parse().ok()?)))
                .ok_or_else(|| {
                    DataError::Parse(format!("Invalid alignment token '{token}' in line '{line}'"))
                })
        })
        .collect()
}

/// Builds the single-row alignment matrix of one sentence pair in a bucket of size
/// `(source_len, target_len)`.
///
/// Each target position that is aligned to at least one source position gets
/// weights summing to 1; unaligned target positions stay all zero.
pub fn create_alignment_matrix(indices: &[(usize, usize)], bucket: Bucket) -> Result<AlignmentMatrix> {
    let (source_len, target_len) = bucket;
    let mut pairs: Vec<(usize, usize)> = Vec::with_capacity(indices.len());
    for &(source, target) in indices {
        if source >= source_len || target >= target_len {
            return Err(DataError::Parse(format!(
                "Alignment point {source}-{target} lies outside of bucket {bucket:?}"
            )));
        }
        pairs.push((target, source));
    }
    pairs.sort_unstable();
    pairs.dedup();

    let mut aligned_per_target = vec![0usize; target_len];
    for &(target, _) in &pairs {
        aligned_per_target[target] += 1;
    }
    let columns: Vec<i64> = pairs
        .iter()
        .map(|&(target, source)| (target * source_len + source) as i64)
        .collect();
    let values: Vec<f32> = pairs
        .iter()
        .map(|&(target, _)| 1.0 / aligned_per_target[target] as f32)
        .collect();

    let mut matrix = AlignmentMatrix::empty(source_len * target_len);
    matrix.push_row(&columns, &values);
    Ok(matrix)
}

/// Reads an alignment file, yielding the parsed index pairs of every line.
pub struct AlignmentMatrixReader {
    lines: Lines<BufReader<File>>,
}

impl AlignmentMatrixReader {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
        })
    }
}

impl Iterator for AlignmentMatrixReader {
    type Item = Result<AlignmentIndices>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = self.lines.next()?;
        Some(line.map_err(DataError::from).and_then(|l| parse_alignment_matrix_indices(&l)))
    }
}
