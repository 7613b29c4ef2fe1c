//! Dense `f64` tensors and their on-disk encoding.
//!
//! Layout (little endian): `b"SBTN"`, format version `u8`, rank `u32`,
//! `rank` dims as `u64`, the values as `f64`, then a SHA-256 over every
//! preceding byte.

use crate::error::{Error, Result};
use crate::fsutil::sha256_bytes;
use sha2::{Digest, Sha256};

const MAGIC: &[u8; 4] = b"SBTN";
const FORMAT_VERSION: u8 = 1;
const CHECKSUM_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::InvalidRequest(format!(
                "tensor shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn vector(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Builds a `[rows, cols]` matrix. Every row must have the same length.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(Error::InvalidRequest(format!(
                    "row {} has {} columns, expected {}",
                    i,
                    row.len(),
                    cols
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            shape: vec![rows.len(), cols],
            data,
        })
    }

    /// Packs row-major `data` as `[data.len() / cols, cols]`; a trailing
    /// partial row is dropped.
    pub fn from_row_major(cols: usize, mut data: Vec<f64>) -> Self {
        let rows = if cols == 0 { 0 } else { data.len() / cols };
        data.truncate(rows * cols);
        Self {
            shape: vec![rows, cols],
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    /// Number of rows when viewed as a batch; vectors count as one row.
    pub fn nrows(&self) -> usize {
        match self.shape.len() {
            0 | 1 => 1,
            _ => self.shape[0],
        }
    }

    /// Width of one row when viewed as a batch.
    pub fn ncols(&self) -> usize {
        match self.shape.len() {
            0 => 1,
            1 => self.shape[0],
            _ => self.shape[1..].iter().product(),
        }
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let cols = self.ncols();
        &self.data[i * cols..(i + 1) * cols]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        let cols = self.ncols().max(1);
        self.data.chunks(cols)
    }

    /// Collapses leading unit dimensions, e.g. an observation stored as
    /// `[1, d]` becomes a `[d]` vector.
    pub fn squeeze_leading(&self) -> Tensor {
        let mut shape: &[usize] = &self.shape;
        while shape.len() > 1 && shape[0] == 1 {
            shape = &shape[1..];
        }
        Tensor {
            shape: shape.to_vec(),
            data: self.data.clone(),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(9 + self.shape.len() * 8 + self.data.len() * 8 + CHECKSUM_LEN);
        out.extend_from_slice(MAGIC);
        out.push(FORMAT_VERSION);
        out.extend_from_slice(&(self.shape.len() as u32).to_le_bytes());
        for dim in &self.shape {
            out.extend_from_slice(&(*dim as u64).to_le_bytes());
        }
        for v in &self.data {
            out.extend_from_slice(&v.to_le_bytes());
        }
        let checksum = Sha256::digest(&out);
        out.extend_from_slice(&checksum);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < MAGIC.len() + 1 + 4 + CHECKSUM_LEN {
            return Err(Error::Codec(format!("blob too short ({} bytes)", bytes.len())));
        }
        let (body, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
        if Sha256::digest(body).as_slice() != checksum {
            return Err(Error::Codec("checksum mismatch".to_string()));
        }
        if &body[..4] != MAGIC {
            return Err(Error::Codec("bad magic".to_string()));
        }
        if body[4] != FORMAT_VERSION {
            return Err(Error::Codec(format!("unsupported format version {}", body[4])));
        }
        let mut cursor = 5;
        let rank = read_u32(body, &mut cursor)? as usize;
        let mut shape = Vec::with_capacity(rank.min(body.len() / 8));
        for _ in 0..rank {
            shape.push(read_u64(body, &mut cursor)? as usize);
        }
        let value_bytes = shape
            .iter()
            .try_fold(8usize, |acc, dim| acc.checked_mul(*dim))
            .ok_or_else(|| Error::Codec(format!("shape {:?} overflows", shape)))?;
        if body.len() - cursor != value_bytes {
            return Err(Error::Codec(format!(
                "shape {:?} needs {} value bytes, found {}",
                shape,
                value_bytes,
                body.len() - cursor
            )));
        }
        let data = body[cursor..]
            .chunks_exact(8)
            .map(|c| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(c);
                f64::from_le_bytes(buf)
            })
            .collect();
        Ok(Self { shape, data })
    }

    /// Hex SHA-256 of the encoded blob.
    pub fn digest(&self) -> String {
        sha256_bytes(&self.encode())
    }
}

fn read_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32> {
    let end = *cursor + 4;
    let slice = bytes
        .get(*cursor..end)
        .ok_or_else(|| Error::Codec("truncated header".to_string()))?;
    *cursor = end;
    let mut buf = [0u8; 4];
    buf.copy_from_slice(slice);
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(bytes: &[u8], cursor: &mut usize) -> Result<u64> {
    let end = *cursor + 8;
    let slice = bytes
        .get(*cursor..end)
        .ok_or_else(|| Error::Codec("truncated header".to_string()))?;
    *cursor = end;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(slice);
    Ok(u64::from_le_bytes(buf))
}
