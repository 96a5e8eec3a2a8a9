//! Sparse coordinate (COO) matrices and dropout.
//!
//! Candle has no sparse storage, so [`SparseTensor`] keeps host-side
//! coordinates next to device index tensors and expresses sparse × dense
//! products as a gather followed by `index_add`. Both ops have backward
//! passes, so gradients reach the values and the dense operand.
//!
//! ```text
//! out[r, :] = Σ_{(r, c, v) ∈ A} v · X[c, :]
//! ```

use std::collections::BTreeMap;

use candle_core::{DType, Device, Tensor};

use crate::error::{Error, Result};
use crate::noise::Noise;

/// Sparse matrix in coordinate format.
#[derive(Debug, Clone)]
pub struct SparseTensor {
    rows: Vec<u32>,
    cols: Vec<u32>,
    row_ids: Tensor,
    col_ids: Tensor,
    values: Tensor,
    shape: (usize, usize),
}

impl SparseTensor {
    /// Build from parallel coordinate/value lists.
    pub fn from_triplets(
        rows: Vec<u32>,
        cols: Vec<u32>,
        values: Vec<f32>,
        shape: (usize, usize),
        device: &Device,
    ) -> Result<Self> {
        if cols.len() != rows.len() {
            return Err(Error::DimensionMismatch {
                expected: rows.len(),
                got: cols.len(),
            });
        }
        if values.len() != rows.len() {
            return Err(Error::DimensionMismatch {
                expected: rows.len(),
                got: values.len(),
            });
        }
        let n = values.len();
        let values = Tensor::from_vec(values, n, device)?;
        Self::with_values(rows, cols, values, shape)
    }

    fn with_values(
        rows: Vec<u32>,
        cols: Vec<u32>,
        values: Tensor,
        shape: (usize, usize),
    ) -> Result<Self> {
        if let Some(&r) = rows.iter().find(|&&r| r as usize >= shape.0) {
            return Err(Error::InvalidConfig(format!(
                "row index {r} out of bounds for {} rows",
                shape.0
            )));
        }
        if let Some(&c) = cols.iter().find(|&&c| c as usize >= shape.1) {
            return Err(Error::InvalidConfig(format!(
                "column index {c} out of bounds for {} columns",
                shape.1
            )));
        }
        let device = values.device().clone();
        let row_ids = Tensor::from_vec(rows.clone(), rows.len(), &device)?;
        let col_ids = Tensor::from_vec(cols.clone(), cols.len(), &device)?;
        Ok(Self {
            rows,
            cols,
            row_ids,
            col_ids,
            values,
            shape,
        })
    }

    /// Collect the nonzero entries of a dense 2-D tensor.
    pub fn from_dense(dense: &Tensor) -> Result<Self> {
        let shape = dense.dims2()?;
        let data = dense.to_dtype(DType::F32)?.to_vec2::<f32>()?;
        let mut rows = Vec::new();
        let mut cols = Vec::new();
        let mut values = Vec::new();
        for (r, row) in data.iter().enumerate() {
            for (c, &v) in row.iter().enumerate() {
                if v != 0.0 {
                    rows.push(r as u32);
                    cols.push(c as u32);
                    values.push(v);
                }
            }
        }
        Self::from_triplets(rows, cols, values, shape, dense.device())
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.rows.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn device(&self) -> &Device {
        self.values.device()
    }

    pub fn rows(&self) -> &[u32] {
        &self.rows
    }

    pub fn cols(&self) -> &[u32] {
        &self.cols
    }

    /// Stored values, shape `(nnz,)`.
    pub fn values(&self) -> &Tensor {
        &self.values
    }

    /// Row indices as a `u32` device tensor.
    pub fn row_ids(&self) -> &Tensor {
        &self.row_ids
    }

    /// Column indices as a `u32` device tensor.
    pub fn col_ids(&self) -> &Tensor {
        &self.col_ids
    }

    /// Same coordinates, new values (must have `nnz` entries).
    pub fn replace_values(&self, values: Tensor) -> Result<Self> {
        let got = values.elem_count();
        if got != self.nnz() {
            return Err(Error::DimensionMismatch {
                expected: self.nnz(),
                got,
            });
        }
        Ok(Self {
            values,
            ..self.clone()
        })
    }

    /// Materialize as a dense `(rows, cols)` tensor.
    pub fn to_dense(&self) -> Result<Tensor> {
        let (n, m) = self.shape;
        let zeros = Tensor::zeros(n * m, self.values.dtype(), self.device())?;
        if self.nnz() == 0 {
            return Ok(zeros.reshape((n, m))?);
        }
        let flat: Vec<u32> = self
            .rows
            .iter()
            .zip(&self.cols)
            .map(|(&r, &c)| r * m as u32 + c)
            .collect();
        let flat = Tensor::from_vec(flat, self.nnz(), self.device())?;
        Ok(zeros.index_add(&flat, &self.values, 0)?.reshape((n, m))?)
    }

    pub fn transpose(&self) -> Self {
        Self {
            rows: self.cols.clone(),
            cols: self.rows.clone(),
            row_ids: self.col_ids.clone(),
            col_ids: self.row_ids.clone(),
            values: self.values.clone(),
            shape: (self.shape.1, self.shape.0),
        }
    }

    /// Sparse × dense product: `(n, m) · (m, d) -> (n, d)`.
    pub fn matmul(&self, dense: &Tensor) -> Result<Tensor> {
        let (m, d) = dense.dims2()?;
        if m != self.shape.1 {
            return Err(Error::DimensionMismatch {
                expected: self.shape.1,
                got: m,
            });
        }
        let out = Tensor::zeros((self.shape.0, d), dense.dtype(), dense.device())?;
        if self.nnz() == 0 {
            return Ok(out);
        }
        let gathered = dense.index_select(&self.col_ids, 0)?;
        let weighted = gathered.broadcast_mul(&self.values.unsqueeze(1)?)?;
        Ok(out.index_add(&self.row_ids, &weighted, 0)?)
    }

    /// Sum of stored values per row, shape `(rows,)`.
    pub fn row_sums(&self) -> Result<Tensor> {
        let out = Tensor::zeros(self.shape.0, self.values.dtype(), self.device())?;
        if self.nnz() == 0 {
            return Ok(out);
        }
        Ok(out.index_add(&self.row_ids, &self.values, 0)?)
    }

    /// Keep entries where `mask` is true. Values stay attached to the graph.
    pub fn retain(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.nnz() {
            return Err(Error::DimensionMismatch {
                expected: self.nnz(),
                got: mask.len(),
            });
        }
        let keep: Vec<u32> = mask
            .iter()
            .enumerate()
            .filter(|(_, &k)| k)
            .map(|(i, _)| i as u32)
            .collect();
        let rows = keep.iter().map(|&i| self.rows[i as usize]).collect();
        let cols = keep.iter().map(|&i| self.cols[i as usize]).collect();
        let values = if keep.is_empty() {
            Tensor::zeros(0, self.values.dtype(), self.device())?
        } else {
            let n = keep.len();
            let ids = Tensor::from_vec(keep, n, self.device())?;
            self.values.index_select(&ids, 0)?
        };
        Self::with_values(rows, cols, values, self.shape)
    }

    /// Multiply every stored value by `factor`.
    pub fn scale(&self, factor: f64) -> Result<Self> {
        self.replace_values(self.values.affine(factor, 0.0)?)
    }

    /// Entries strictly below the diagonal.
    pub fn strict_lower(&self) -> Result<Self> {
        let mask: Vec<bool> = self
            .rows
            .iter()
            .zip(&self.cols)
            .map(|(r, c)| c < r)
            .collect();
        self.retain(&mask)
    }

    /// Symmetric GCN normalization `D^{-1/2} (A + I) D^{-1/2}`.
    ///
    /// Duplicate coordinates are summed. Preprocessing only: the result is
    /// detached from any graph the input values belonged to.
    pub fn normalized_adjacency(&self) -> Result<Self> {
        let (n, m) = self.shape;
        if n != m {
            return Err(Error::DimensionMismatch { expected: n, got: m });
        }
        let values = self.values.to_dtype(DType::F32)?.to_vec1::<f32>()?;
        let mut entries: BTreeMap<(u32, u32), f32> = BTreeMap::new();
        for ((&r, &c), v) in self.rows.iter().zip(&self.cols).zip(values) {
            *entries.entry((r, c)).or_insert(0.0) += v;
        }
        for i in 0..n as u32 {
            *entries.entry((i, i)).or_insert(0.0) += 1.0;
        }

        let mut degree = vec![0.0f32; n];
        for (&(r, _), &v) in &entries {
            degree[r as usize] += v;
        }
        let inv_sqrt: Vec<f32> = degree
            .iter()
            .map(|&d| if d > 0.0 { d.powf(-0.5) } else { 0.0 })
            .collect();

        let mut rows = Vec::with_capacity(entries.len());
        let mut cols = Vec::with_capacity(entries.len());
        let mut normed = Vec::with_capacity(entries.len());
        for ((r, c), v) in entries {
            rows.push(r);
            cols.push(c);
            normed.push(v * inv_sqrt[r as usize] * inv_sqrt[c as usize]);
        }
        Self::from_triplets(rows, cols, normed, self.shape, self.device())
    }
}

/// Dropout on the stored entries of a sparse matrix.
///
/// Entry `i` survives iff `floor(keep_prob + u_i) >= 1` with `u_i ~ U[0, 1)`;
/// survivors are scaled by `1 / keep_prob`. `num_nonzero` must equal
/// `x.nnz()`. Not meant for matrices beyond roughly a million stored entries
/// (one host-side uniform draw per entry). `keep_prob = 0` is not guarded and
/// yields an infinite scale.
pub fn dropout_sparse(
    x: &SparseTensor,
    keep_prob: f64,
    num_nonzero: usize,
    noise: &mut Noise,
) -> Result<SparseTensor> {
    if num_nonzero != x.nnz() {
        return Err(Error::DimensionMismatch {
            expected: x.nnz(),
            got: num_nonzero,
        });
    }
    let mask: Vec<bool> = noise
        .uniform(num_nonzero)
        .into_iter()
        .map(|u| (keep_prob + u as f64).floor() >= 1.0)
        .collect();
    x.retain(&mask)?.scale(1.0 / keep_prob)
}

/// Inverted dropout on a dense tensor, same keep rule as [`dropout_sparse`].
pub fn dropout_dense(x: &Tensor, rate: f64, noise: &mut Noise) -> Result<Tensor> {
    if rate <= 0.0 {
        return Ok(x.clone());
    }
    let keep_prob = 1.0 - rate;
    let scale = (1.0 / keep_prob) as f32;
    let mask: Vec<f32> = noise
        .uniform(x.elem_count())
        .into_iter()
        .map(|u| {
            if (keep_prob + u as f64).floor() >= 1.0 {
                scale
            } else {
                0.0
            }
        })
        .collect();
    let mask = Tensor::from_vec(mask, x.dims(), x.device())?.to_dtype(x.dtype())?;
    Ok(x.mul(&mask)?)
}
