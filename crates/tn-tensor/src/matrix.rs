use std::fmt;

use rand::Rng;

use crate::backend::ComputeBackend;
use crate::error::{Result, TensorError};

/// A dense, row-major matrix of f64 values.
///
/// Dimensions are always positive. Element access uses `(x, y)` ordering where
/// `x` is the column and `y` is the row, and every access is bounds-checked.
/// `Clone` produces an independent deep copy.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    data: Vec<f64>,
    rows: usize,
    cols: usize,
}

fn check_dims(rows: usize, cols: usize) -> Result<()> {
    if rows == 0 || cols == 0 {
        return Err(TensorError::InvalidDimensions(vec![rows, cols]));
    }
    Ok(())
}

impl Matrix {
    /// Create a zero-filled matrix.
    ///
    /// # Errors
    /// Returns `TensorError::InvalidDimensions` if either dimension is zero.
    pub fn new(rows: usize, cols: usize) -> Result<Self> {
        check_dims(rows, cols)?;
        Ok(Matrix {
            data: vec![0.0; rows * cols],
            rows,
            cols,
        })
    }

    /// Create a matrix from a row-major buffer.
    ///
    /// # Errors
    /// Fails if a dimension is zero or `data.len() != rows * cols`.
    pub fn from_vec(data: Vec<f64>, rows: usize, cols: usize) -> Result<Self> {
        check_dims(rows, cols)?;
        if data.len() != rows * cols {
            return Err(TensorError::BufferLength {
                expected: rows * cols,
                got: data.len(),
            });
        }
        Ok(Matrix { data, rows, cols })
    }

    /// Create a matrix from nested rows. All rows must have the same length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        let n_rows = rows.len();
        let n_cols = rows.first().map(|r| r.len()).unwrap_or(0);
        check_dims(n_rows, n_cols)?;

        let mut data = Vec::with_capacity(n_rows * n_cols);
        for row in rows {
            if row.len() != n_cols {
                return Err(TensorError::ShapeMismatch {
                    expected: vec![n_cols],
                    got: vec![row.len()],
                });
            }
            data.extend(row);
        }
        Ok(Matrix {
            data,
            rows: n_rows,
            cols: n_cols,
        })
    }

    /// Square identity matrix of size `n`.
    pub fn identity(n: usize) -> Result<Self> {
        let mut m = Matrix::new(n, n)?;
        for i in 0..n {
            m.data[i * n + i] = 1.0;
        }
        Ok(m)
    }

    /// A `height x width` matrix filled row-major with 1, 2, 3, ...
    ///
    /// Handy for deterministic tests.
    pub fn numbered(width: usize, height: usize) -> Result<Self> {
        let mut m = Matrix::new(height, width)?;
        for (i, v) in m.data.iter_mut().enumerate() {
            *v = (i + 1) as f64;
        }
        Ok(m)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Returns `[rows, cols]`.
    pub fn dims(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    /// Returns the underlying row-major buffer.
    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Returns row `r` as a slice.
    ///
    /// # Panics
    /// Panics if `r >= rows()`.
    pub fn row(&self, r: usize) -> &[f64] {
        &self.data[r * self.cols..(r + 1) * self.cols]
    }

    fn offset(&self, x: usize, y: usize) -> Result<usize> {
        if x >= self.cols || y >= self.rows {
            return Err(TensorError::IndexOutOfBounds {
                index: vec![x, y],
                dims: vec![self.rows, self.cols],
            });
        }
        Ok(y * self.cols + x)
    }

    /// Read the element at column `x`, row `y`.
    pub fn get(&self, x: usize, y: usize) -> Result<f64> {
        let i = self.offset(x, y)?;
        Ok(self.data[i])
    }

    /// Write the element at column `x`, row `y`.
    pub fn set(&mut self, x: usize, y: usize, value: f64) -> Result<()> {
        let i = self.offset(x, y)?;
        self.data[i] = value;
        Ok(())
    }

    /// Add `value` to the element at column `x`, row `y`.
    pub fn add_at(&mut self, x: usize, y: usize, value: f64) -> Result<()> {
        let i = self.offset(x, y)?;
        self.data[i] += value;
        Ok(())
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    /// Fill with uniform values in [-1, 1) from the thread-local RNG.
    pub fn randomize(&mut self) {
        let mut rng = rand::thread_rng();
        for v in self.data.iter_mut() {
            *v = rng.gen_range(-1.0..1.0);
        }
    }

    /// Fill with uniform values in [min, max) from the thread-local RNG.
    pub fn randomize_range(&mut self, min: f64, max: f64) -> Result<()> {
        self.randomize_with(&mut rand::thread_rng(), min, max)
    }

    /// Fill with uniform values in [min, max) drawn from `rng`.
    ///
    /// Pass a seeded `StdRng` for reproducible initialization.
    pub fn randomize_with<R: Rng + ?Sized>(&mut self, rng: &mut R, min: f64, max: f64) -> Result<()> {
        if !(min < max) {
            return Err(TensorError::InvalidRange { min, max });
        }
        for v in self.data.iter_mut() {
            *v = rng.gen_range(min..max);
        }
        Ok(())
    }

    fn ensure_same_shape(&self, other: &Matrix) -> Result<()> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(TensorError::ShapeMismatch {
                expected: self.dims().to_vec(),
                got: other.dims().to_vec(),
            });
        }
        Ok(())
    }

    pub fn add_scalar(&mut self, n: f64) {
        self.data.iter_mut().for_each(|v| *v += n);
    }

    pub fn sub_scalar(&mut self, n: f64) {
        self.add_scalar(-n);
    }

    pub fn scale(&mut self, n: f64) {
        self.data.iter_mut().for_each(|v| *v *= n);
    }

    /// Divide every element by `n`.
    ///
    /// # Errors
    /// Returns `TensorError::DivisionByZero` if `n == 0`; the matrix is untouched.
    pub fn divide_scalar(&mut self, n: f64) -> Result<()> {
        if n == 0.0 {
            return Err(TensorError::DivisionByZero);
        }
        self.data.iter_mut().for_each(|v| *v /= n);
        Ok(())
    }

    /// Elementwise in-place addition.
    pub fn add(&mut self, other: &Matrix) -> Result<()> {
        self.ensure_same_shape(other)?;
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
        Ok(())
    }

    /// Elementwise in-place subtraction.
    pub fn sub(&mut self, other: &Matrix) -> Result<()> {
        self.ensure_same_shape(other)?;
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a -= b;
        }
        Ok(())
    }

    fn zip_with(&self, other: &Matrix, f: impl Fn(f64, f64) -> f64) -> Result<Matrix> {
        self.ensure_same_shape(other)?;
        let data = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(&a, &b)| f(a, b))
            .collect();
        Ok(Matrix {
            data,
            rows: self.rows,
            cols: self.cols,
        })
    }

    fn map(&self, f: impl Fn(f64) -> f64) -> Matrix {
        Matrix {
            data: self.data.iter().map(|&v| f(v)).collect(),
            rows: self.rows,
            cols: self.cols,
        }
    }

    /// Returns `self + other` without modifying either operand.
    pub fn added(&self, other: &Matrix) -> Result<Matrix> {
        self.zip_with(other, |a, b| a + b)
    }

    /// Returns `self - other` without modifying either operand.
    pub fn subtracted(&self, other: &Matrix) -> Result<Matrix> {
        self.zip_with(other, |a, b| a - b)
    }

    /// Elementwise (Hadamard) product.
    pub fn hadamard(&self, other: &Matrix) -> Result<Matrix> {
        self.zip_with(other, |a, b| a * b)
    }

    /// Elementwise quotient `self / divisor`.
    ///
    /// # Errors
    /// Returns `TensorError::DivisionByZero` if any divisor element is zero.
    pub fn divided_elementwise(&self, divisor: &Matrix) -> Result<Matrix> {
        self.ensure_same_shape(divisor)?;
        if divisor.data.iter().any(|&d| d == 0.0) {
            return Err(TensorError::DivisionByZero);
        }
        self.zip_with(divisor, |a, b| a / b)
    }

    /// Returns a copy with `n` added to every element.
    pub fn shifted(&self, n: f64) -> Matrix {
        self.map(|v| v + n)
    }

    /// Returns a copy with every element multiplied by `n`.
    pub fn scaled(&self, n: f64) -> Matrix {
        self.map(|v| v * n)
    }

    pub fn squared(&self) -> Matrix {
        self.map(|v| v * v)
    }

    pub fn sqrt(&self) -> Matrix {
        self.map(f64::sqrt)
    }

    /// Returns a copy with every element clamped to [min, max].
    pub fn clipped(&self, min: f64, max: f64) -> Matrix {
        self.map(|v| v.max(min).min(max))
    }

    /// Transpose in place, swapping the logical dimensions and the backing layout.
    pub fn transpose(&mut self) -> &mut Self {
        *self = self.transposed();
        self
    }

    /// Returns the transpose as a new matrix.
    pub fn transposed(&self) -> Matrix {
        let mut data = vec![0.0; self.data.len()];
        for i in 0..self.rows {
            for j in 0..self.cols {
                data[j * self.rows + i] = self.data[i * self.cols + j];
            }
        }
        Matrix {
            data,
            rows: self.cols,
            cols: self.rows,
        }
    }

    /// Overwrite this matrix with the contents of a same-shaped `source`.
    pub fn copy_from(&mut self, source: &Matrix) -> Result<()> {
        self.ensure_same_shape(source)?;
        self.data.copy_from_slice(&source.data);
        Ok(())
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Arithmetic mean of all elements.
    pub fn mean(&self) -> f64 {
        self.sum() / self.data.len() as f64
    }

    /// Population variance of all elements around `mean`.
    pub fn variance(&self, mean: f64) -> f64 {
        let sq: f64 = self.data.iter().map(|v| (v - mean) * (v - mean)).sum();
        sq / self.data.len() as f64
    }

    pub fn sum_of_squares(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum()
    }

    /// Sums each column into a `1 x cols` matrix.
    pub fn column_sums(&self) -> Matrix {
        let mut data = vec![0.0; self.cols];
        for r in 0..self.rows {
            for (acc, v) in data.iter_mut().zip(self.row(r)) {
                *acc += v;
            }
        }
        Matrix {
            data,
            rows: 1,
            cols: self.cols,
        }
    }

    /// Flatten into a `1 x (rows*cols)` matrix.
    pub fn to_row_matrix(&self) -> Matrix {
        Matrix {
            data: self.data.clone(),
            rows: 1,
            cols: self.data.len(),
        }
    }

    /// Flatten into a `(rows*cols) x 1` matrix.
    pub fn to_column_matrix(&self) -> Matrix {
        Matrix {
            data: self.data.clone(),
            rows: self.data.len(),
            cols: 1,
        }
    }

    /// Largest absolute elementwise difference between two same-shaped matrices.
    pub fn max_abs_diff(&self, other: &Matrix) -> Result<f64> {
        self.ensure_same_shape(other)?;
        Ok(self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max))
    }

    /// Matrix product `self @ other` computed by `backend`. Neither operand changes.
    pub fn matmul(&self, other: &Matrix, backend: &dyn ComputeBackend) -> Result<Matrix> {
        backend.matmul(self, other)
    }

    /// Replace this matrix with `self @ other`.
    ///
    /// On error the matrix is left unchanged.
    pub fn matmul_in_place(&mut self, other: &Matrix, backend: &dyn ComputeBackend) -> Result<()> {
        *self = backend.matmul(self, other)?;
        Ok(())
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for r in 0..self.rows {
            write!(f, "\n[")?;
            for (c, v) in self.row(r).iter().enumerate() {
                if c > 0 {
                    write!(f, ",\t")?;
                }
                write!(f, "{}", (v * 1000.0).round() / 1000.0)?;
            }
            write!(f, "]")?;
            if r + 1 < self.rows {
                write!(f, ",")?;
            }
        }
        write!(f, "\n]")
    }
}
