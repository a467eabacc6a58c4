use crate::error::{Result, TensorError};

/// A 3-D buffer of f64 values with shape depth x height x width.
///
/// Storage is contiguous with channel-major layout: element `(d, h, w)` lives
/// at `d * height * width + h * width + w`. Used as the activation
/// representation for per-channel statistics (batch normalization).
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f64>,
    depth: usize,
    height: usize,
    width: usize,
}

fn check_dims(depth: usize, height: usize, width: usize) -> Result<()> {
    if depth == 0 || height == 0 || width == 0 {
        return Err(TensorError::InvalidDimensions(vec![depth, height, width]));
    }
    Ok(())
}

impl Tensor {
    /// Create a zero-filled tensor.
    pub fn new(depth: usize, height: usize, width: usize) -> Result<Self> {
        Self::filled(depth, height, width, 0.0)
    }

    /// Create a tensor with every element set to `value`.
    pub fn filled(depth: usize, height: usize, width: usize, value: f64) -> Result<Self> {
        check_dims(depth, height, width)?;
        Ok(Tensor {
            data: vec![value; depth * height * width],
            depth,
            height,
            width,
        })
    }

    /// Create a tensor from a channel-major buffer.
    ///
    /// # Errors
    /// Fails if a dimension is zero or the buffer length is not `depth * height * width`.
    pub fn from_vec(data: Vec<f64>, depth: usize, height: usize, width: usize) -> Result<Self> {
        check_dims(depth, height, width)?;
        let expected = depth * height * width;
        if data.len() != expected {
            return Err(TensorError::BufferLength {
                expected,
                got: data.len(),
            });
        }
        Ok(Tensor {
            data,
            depth,
            height,
            width,
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns `[depth, height, width]`.
    pub fn dims(&self) -> [usize; 3] {
        [self.depth, self.height, self.width]
    }

    /// Number of elements in one channel (`height * width`).
    pub fn channel_len(&self) -> usize {
        self.height * self.width
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    fn offset(&self, d: usize, h: usize, w: usize) -> Result<usize> {
        if d >= self.depth || h >= self.height || w >= self.width {
            return Err(TensorError::IndexOutOfBounds {
                index: vec![d, h, w],
                dims: self.dims().to_vec(),
            });
        }
        Ok((d * self.height + h) * self.width + w)
    }

    pub fn get(&self, d: usize, h: usize, w: usize) -> Result<f64> {
        let i = self.offset(d, h, w)?;
        Ok(self.data[i])
    }

    pub fn set(&mut self, d: usize, h: usize, w: usize, value: f64) -> Result<()> {
        let i = self.offset(d, h, w)?;
        self.data[i] = value;
        Ok(())
    }

    /// Sum over the whole buffer, all channels included.
    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// The elements of channel `d` as a row-major `height * width` slice.
    pub fn channel(&self, d: usize) -> Result<&[f64]> {
        if d >= self.depth {
            return Err(TensorError::IndexOutOfBounds {
                index: vec![d],
                dims: self.dims().to_vec(),
            });
        }
        let n = self.channel_len();
        Ok(&self.data[d * n..(d + 1) * n])
    }

    pub fn channel_mut(&mut self, d: usize) -> Result<&mut [f64]> {
        if d >= self.depth {
            return Err(TensorError::IndexOutOfBounds {
                index: vec![d],
                dims: self.dims().to_vec(),
            });
        }
        let n = self.channel_len();
        Ok(&mut self.data[d * n..(d + 1) * n])
    }

    pub fn channel_sum(&self, d: usize) -> Result<f64> {
        Ok(self.channel(d)?.iter().sum())
    }
}
