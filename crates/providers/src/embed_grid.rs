//! Band-major binary container for embedding rasters.
//!
//! Layout (little-endian):
//!
//! ```text
//! offset  size  field
//! 0       4     magic "EMB1"
//! 4       2     band count (u16)
//! 6       4     rows (u32)
//! 10      4     cols (u32)
//! 14      8     origin_x, UTM easting of the southwest corner (f64)
//! 22      8     origin_y, UTM northing of the southwest corner (f64)
//! 30      8     cell size in meters (f64)
//! 38      4     EPSG code (u32)
//! 42      -     f32 samples, band-major, row 0 at the north edge
//! ```

use grid_ops::RasterGeo;

pub const MAGIC: &[u8; 4] = b"EMB1";
const HEADER_LEN: usize = 42;

/// A decoded embedding raster registered in UTM meters.
#[derive(Debug, Clone)]
pub struct EmbedGrid {
    pub bands: usize,
    pub rows: usize,
    pub cols: usize,
    pub origin_x: f64,
    pub origin_y: f64,
    pub cell_size: f64,
    pub epsg: u32,
    data: Vec<f32>,
}

impl EmbedGrid {
    pub fn new(
        bands: usize,
        rows: usize,
        cols: usize,
        origin_x: f64,
        origin_y: f64,
        cell_size: f64,
        epsg: u32,
        data: Vec<f32>,
    ) -> Result<Self, EmbedCodecError> {
        if data.len() != bands * rows * cols {
            return Err(EmbedCodecError::LengthMismatch {
                expected: bands * rows * cols,
                actual: data.len(),
            });
        }
        Ok(Self {
            bands,
            rows,
            cols,
            origin_x,
            origin_y,
            cell_size,
            epsg,
            data,
        })
    }

    /// One band as a row-major slice.
    pub fn band(&self, band: usize) -> &[f32] {
        let len = self.rows * self.cols;
        &self.data[band * len..(band + 1) * len]
    }

    /// Georeference usable by the resampling kernels.
    pub fn geo(&self) -> RasterGeo {
        RasterGeo {
            origin_x: self.origin_x,
            origin_y: self.origin_y,
            cell_size: self.cell_size,
            rows: self.rows,
            cols: self.cols,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&(self.bands as u16).to_le_bytes());
        out.extend_from_slice(&(self.rows as u32).to_le_bytes());
        out.extend_from_slice(&(self.cols as u32).to_le_bytes());
        out.extend_from_slice(&self.origin_x.to_le_bytes());
        out.extend_from_slice(&self.origin_y.to_le_bytes());
        out.extend_from_slice(&self.cell_size.to_le_bytes());
        out.extend_from_slice(&self.epsg.to_le_bytes());
        for v in &self.data {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, EmbedCodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(EmbedCodecError::Truncated {
                expected: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        if &bytes[0..4] != MAGIC {
            return Err(EmbedCodecError::BadMagic);
        }

        let bands = u16::from_le_bytes(bytes[4..6].try_into().unwrap()) as usize;
        let rows = u32::from_le_bytes(bytes[6..10].try_into().unwrap()) as usize;
        let cols = u32::from_le_bytes(bytes[10..14].try_into().unwrap()) as usize;
        let origin_x = f64::from_le_bytes(bytes[14..22].try_into().unwrap());
        let origin_y = f64::from_le_bytes(bytes[22..30].try_into().unwrap());
        let cell_size = f64::from_le_bytes(bytes[30..38].try_into().unwrap());
        let epsg = u32::from_le_bytes(bytes[38..42].try_into().unwrap());

        let expected = HEADER_LEN + bands * rows * cols * 4;
        if bytes.len() != expected {
            return Err(EmbedCodecError::Truncated {
                expected,
                actual: bytes.len(),
            });
        }

        let data = bytes[HEADER_LEN..]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().unwrap()))
            .collect();

        Self::new(bands, rows, cols, origin_x, origin_y, cell_size, epsg, data)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmbedCodecError {
    #[error("embedding container has wrong magic bytes")]
    BadMagic,

    #[error("embedding container truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("sample count mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}
