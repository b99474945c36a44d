//! Relational datasets (dense and sparse relation matrices)
//!
//! A RESCAL dataset is an ordered list of square relation matrices over the
//! same entity set. The dataset is immutable once validated and is shared by
//! reference across every trial.

use crate::{Error, Result};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

/// Compressed sparse row matrix
///
/// Only the operations the factorization needs are provided: products with a
/// dense factor, element-wise value maps and norms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsrMatrix {
    n_rows: usize,
    n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

impl CsrMatrix {
    /// Build a CSR matrix from `(row, col, value)` triplets
    ///
    /// Duplicate coordinates are summed; explicit zeros are kept.
    ///
    /// # Errors
    /// Returns error if a coordinate is out of bounds
    pub fn from_triplets(
        n_rows: usize,
        n_cols: usize,
        triplets: &[(usize, usize, f64)],
    ) -> Result<Self> {
        let mut sorted = triplets.to_vec();
        for &(row, col, _) in &sorted {
            if row >= n_rows || col >= n_cols {
                return Err(Error::InvalidDataset(format!(
                    "entry ({row}, {col}) outside a {n_rows}x{n_cols} matrix"
                )));
            }
        }
        sorted.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        let mut indptr = vec![0usize; n_rows + 1];
        let mut indices: Vec<usize> = Vec::with_capacity(sorted.len());
        let mut data: Vec<f64> = Vec::with_capacity(sorted.len());
        let mut last: Option<(usize, usize)> = None;

        for (row, col, value) in sorted {
            if last == Some((row, col)) {
                if let Some(v) = data.last_mut() {
                    *v += value;
                }
                continue;
            }
            indptr[row + 1] += 1;
            indices.push(col);
            data.push(value);
            last = Some((row, col));
        }
        for row in 0..n_rows {
            indptr[row + 1] += indptr[row];
        }

        Ok(Self {
            n_rows,
            n_cols,
            indptr,
            indices,
            data,
        })
    }

    /// Convert a dense matrix, keeping only non-zero entries
    #[must_use]
    pub fn from_dense(dense: ArrayView2<'_, f64>) -> Self {
        let (n_rows, n_cols) = dense.dim();
        let mut indptr = Vec::with_capacity(n_rows + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for row in dense.rows() {
            for (col, &value) in row.iter().enumerate() {
                if value != 0.0 {
                    indices.push(col);
                    data.push(value);
                }
            }
            indptr.push(indices.len());
        }
        Self {
            n_rows,
            n_cols,
            indptr,
            indices,
            data,
        }
    }

    /// Matrix shape `(rows, cols)`
    #[must_use]
    pub const fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.n_cols)
    }

    /// Number of stored entries
    #[must_use]
    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    /// Stored values in row order
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.data
    }

    /// Same sparsity pattern with every stored value replaced by `f(value)`
    #[must_use]
    pub fn map_values(&self, mut f: impl FnMut(f64) -> f64) -> Self {
        Self {
            n_rows: self.n_rows,
            n_cols: self.n_cols,
            indptr: self.indptr.clone(),
            indices: self.indices.clone(),
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// `self · rhs`
    #[must_use]
    pub fn dot_dense(&self, rhs: &Array2<f64>) -> Array2<f64> {
        let mut out = Array2::zeros((self.n_rows, rhs.ncols()));
        for row in 0..self.n_rows {
            let mut out_row = out.row_mut(row);
            for idx in self.indptr[row]..self.indptr[row + 1] {
                out_row.scaled_add(self.data[idx], &rhs.row(self.indices[idx]));
            }
        }
        out
    }

    /// `selfᵀ · rhs`
    #[must_use]
    pub fn t_dot_dense(&self, rhs: &Array2<f64>) -> Array2<f64> {
        let mut out = Array2::zeros((self.n_cols, rhs.ncols()));
        for row in 0..self.n_rows {
            let rhs_row = rhs.row(row);
            for idx in self.indptr[row]..self.indptr[row + 1] {
                out.row_mut(self.indices[idx])
                    .scaled_add(self.data[idx], &rhs_row);
            }
        }
        out
    }

    /// Dense copy
    #[must_use]
    pub fn to_dense(&self) -> Array2<f64> {
        let mut out = Array2::zeros((self.n_rows, self.n_cols));
        for row in 0..self.n_rows {
            for idx in self.indptr[row]..self.indptr[row + 1] {
                out[[row, self.indices[idx]]] += self.data[idx];
            }
        }
        out
    }
}

/// One relation matrix of a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Relation {
    /// Dense `n×n` matrix
    Dense(Array2<f64>),
    /// Sparse `n×n` matrix
    Sparse(CsrMatrix),
}

impl Relation {
    /// Matrix shape `(rows, cols)`
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        match self {
            Self::Dense(m) => m.dim(),
            Self::Sparse(m) => m.shape(),
        }
    }

    /// Whether the relation is stored sparsely
    #[must_use]
    pub const fn is_sparse(&self) -> bool {
        matches!(self, Self::Sparse(_))
    }

    /// `X · rhs`
    #[must_use]
    pub fn dot(&self, rhs: &Array2<f64>) -> Array2<f64> {
        match self {
            Self::Dense(m) => m.dot(rhs),
            Self::Sparse(m) => m.dot_dense(rhs),
        }
    }

    /// `Xᵀ · rhs`
    #[must_use]
    pub fn t_dot(&self, rhs: &Array2<f64>) -> Array2<f64> {
        match self {
            Self::Dense(m) => m.t().dot(rhs),
            Self::Sparse(m) => m.t_dot_dense(rhs),
        }
    }

    /// Squared Frobenius norm
    #[must_use]
    pub fn frobenius_sq(&self) -> f64 {
        self.stored_values().map(|v| v * v).sum()
    }

    /// Sum of all entries
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.stored_values().sum()
    }

    /// Dense copy of the relation
    #[must_use]
    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            Self::Dense(m) => m.clone(),
            Self::Sparse(m) => m.to_dense(),
        }
    }

    /// Iterator over stored values (every element for dense relations)
    pub fn stored_values(&self) -> Box<dyn Iterator<Item = f64> + '_> {
        match self {
            Self::Dense(m) => Box::new(m.iter().copied()),
            Self::Sparse(m) => Box::new(m.values().iter().copied()),
        }
    }
}

impl From<Array2<f64>> for Relation {
    fn from(value: Array2<f64>) -> Self {
        Self::Dense(value)
    }
}

impl From<CsrMatrix> for Relation {
    fn from(value: CsrMatrix) -> Self {
        Self::Sparse(value)
    }
}

/// Validated list of square relation matrices sharing one entity dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationalDataset {
    relations: Vec<Relation>,
    n_entities: usize,
}

impl RelationalDataset {
    /// Validate and wrap a list of relations
    ///
    /// # Errors
    /// Returns [`Error::InvalidDataset`] if the list is empty, a matrix is not
    /// square, dimensions disagree, a value is negative or non-finite, or
    /// every entry is zero
    pub fn new(relations: Vec<Relation>) -> Result<Self> {
        let Some(first) = relations.first() else {
            return Err(Error::InvalidDataset(
                "at least one relation matrix is required".to_string(),
            ));
        };
        let (n, _) = first.shape();
        if n == 0 {
            return Err(Error::InvalidDataset(
                "relation matrices must have at least one entity".to_string(),
            ));
        }

        let mut total = 0.0;
        for (i, relation) in relations.iter().enumerate() {
            let (rows, cols) = relation.shape();
            if rows != cols {
                return Err(Error::InvalidDataset(format!(
                    "relation {i} is {rows}x{cols}; RESCAL needs square matrices"
                )));
            }
            if rows != n {
                return Err(Error::InvalidDataset(format!(
                    "relation {i} has {rows} entities, expected {n}"
                )));
            }
            for value in relation.stored_values() {
                if !value.is_finite() || value < 0.0 {
                    return Err(Error::InvalidDataset(format!(
                        "relation {i} contains {value}; values must be finite and non-negative"
                    )));
                }
                total += value;
            }
        }
        if total <= 0.0 {
            return Err(Error::InvalidDataset(
                "dataset has no non-zero entries".to_string(),
            ));
        }

        Ok(Self {
            relations,
            n_entities: n,
        })
    }

    /// Wrap dense matrices
    ///
    /// # Errors
    /// See [`RelationalDataset::new`]
    pub fn from_dense(matrices: Vec<Array2<f64>>) -> Result<Self> {
        Self::new(matrices.into_iter().map(Relation::Dense).collect())
    }

    /// Number of entities `n`
    #[must_use]
    pub const fn n_entities(&self) -> usize {
        self.n_entities
    }

    /// Number of relations `m`
    #[must_use]
    pub fn n_relations(&self) -> usize {
        self.relations.len()
    }

    /// The relation matrices in order
    #[must_use]
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Whether the relations are stored sparsely
    #[must_use]
    pub fn is_sparse(&self) -> bool {
        self.relations.iter().any(Relation::is_sparse)
    }
}
