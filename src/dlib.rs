//! Reader for dlib's serialized `shape_predictor` files.
//!
//! Accepts raw `.dat` files and bzip2-compressed `.dat.bz2` files as
//! published in the dlib-models repository, e.g.
//! `shape_predictor_68_face_landmarks.dat.bz2`.
//!
//! dlib writes integers as a control byte (high bit: sign, low nibble: byte
//! count) followed by that many little-endian bytes, and floats as an
//! integer mantissa and exponent pair.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bzip2::read::BzDecoder;

use crate::error::{Error, Result};
use crate::landmarks::{CascadeStage, ShapePredictor};
use crate::tree::{Forest, RegressionTree, Split};
use crate::types::{Point, Shape};

const FORMAT_VERSION: i64 = 1;

/// Load a landmark model, decompressing `.bz2` files on the fly.
pub fn load_shape_predictor<P: AsRef<Path>>(path: P) -> Result<ShapePredictor> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);
    if path.extension().is_some_and(|ext| ext == "bz2") {
        read_shape_predictor(BzDecoder::new(reader))
    } else {
        read_shape_predictor(reader)
    }
}

/// Parse a landmark model from an uncompressed byte stream.
pub fn read_shape_predictor<R: Read>(reader: R) -> Result<ShapePredictor> {
    let mut r = DlibReader { inner: reader };

    let version = r.int()?;
    if version != FORMAT_VERSION {
        return Err(Error::InvalidModel(format!(
            "unsupported shape_predictor version {}",
            version
        )));
    }

    let mean_shape = r.column()?;
    if mean_shape.len() % 2 != 0 {
        return Err(Error::InvalidModel(format!(
            "mean shape has an odd number of coordinates ({})",
            mean_shape.len()
        )));
    }
    let mean_shape = Shape::from_interleaved(&mean_shape);
    let n = mean_shape.len();

    let forests = r.seq(|r| r.seq(|r| r.tree(n)).map(Forest::new))?;
    let anchors = r.seq(|r| r.seq(|r| r.len()))?;
    let offsets = r.seq(|r| r.seq(|r| Ok(Point::new(r.float()?, r.float()?))))?;

    if anchors.len() != forests.len() || offsets.len() != forests.len() {
        return Err(Error::InvalidModel(format!(
            "{} cascade stages but {} anchor sets and {} offset sets",
            forests.len(),
            anchors.len(),
            offsets.len()
        )));
    }

    let cascade = forests
        .into_iter()
        .zip(anchors)
        .zip(offsets)
        .map(|((forest, anchors), offsets)| CascadeStage::new(anchors, offsets, forest, n))
        .collect::<Result<Vec<_>>>()?;

    Ok(ShapePredictor::new(mean_shape, cascade))
}

struct DlibReader<R> {
    inner: R,
}

impl<R: Read> DlibReader<R> {
    fn byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.inner.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn int(&mut self) -> Result<i64> {
        let control = self.byte()?;
        let size = (control & 0x0F) as usize;
        if size > 8 {
            return Err(Error::InvalidModel(format!("integer of {} bytes", size)));
        }
        let mut magnitude: u64 = 0;
        for i in 0..size {
            magnitude |= (self.byte()? as u64) << (8 * i);
        }
        let value = i64::try_from(magnitude)
            .map_err(|_| Error::InvalidModel(format!("integer {} out of range", magnitude)))?;
        Ok(if control & 0x80 != 0 { -value } else { value })
    }

    /// A non-negative count or index.
    fn len(&mut self) -> Result<usize> {
        let value = self.int()?;
        usize::try_from(value)
            .map_err(|_| Error::InvalidModel(format!("expected a size, got {}", value)))
    }

    fn float(&mut self) -> Result<f32> {
        let mantissa = self.int()?;
        let exponent = self.int()?;
        if mantissa == 0 {
            return Ok(0.0);
        }
        let exponent = i32::try_from(exponent)
            .map_err(|_| Error::InvalidModel(format!("float exponent {}", exponent)))?;
        Ok((mantissa as f64 * 2f64.powi(exponent)) as f32)
    }

    /// A `rows x 1` float matrix, stored with negated dimensions.
    fn column(&mut self) -> Result<Vec<f32>> {
        let rows = -self.int()?;
        let cols = -self.int()?;
        if cols != 1 || rows < 0 {
            return Err(Error::InvalidModel(format!(
                "expected a column vector, got {}x{}",
                rows, cols
            )));
        }
        (0..rows).map(|_| self.float()).collect()
    }

    /// A length-prefixed sequence.
    fn seq<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
        let count = self.len()?;
        let mut items = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            items.push(item(self)?);
        }
        Ok(items)
    }

    fn tree(&mut self, num_landmarks: usize) -> Result<RegressionTree> {
        let splits = self.seq(|r| {
            Ok(Split {
                idx1: r.len()?,
                idx2: r.len()?,
                threshold: r.float()?,
            })
        })?;
        let leaves = self.seq(|r| {
            let values = r.column()?;
            if values.len() != num_landmarks * 2 {
                return Err(Error::InvalidModel(format!(
                    "leaf has {} values, expected {}",
                    values.len(),
                    num_landmarks * 2
                )));
            }
            Ok(Shape::from_interleaved(&values))
        })?;
        RegressionTree::new(splits, leaves)
    }
}
