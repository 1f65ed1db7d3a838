//! Single-band GeoTIFF decoding for elevation tiles and local rasters.

use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;

/// Geographic bounds of a raster in WGS84 degrees.
#[derive(Debug, Clone, Copy)]
pub struct GeoBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl GeoBounds {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }

    pub fn intersects(&self, other: &GeoBounds) -> bool {
        self.min_lon < other.max_lon
            && self.max_lon > other.min_lon
            && self.min_lat < other.max_lat
            && self.max_lat > other.min_lat
    }
}

/// A decoded single-band raster with geographic registration.
#[derive(Debug)]
pub struct GeoRaster {
    data: Vec<f32>,
    width: u32,
    height: u32,
    bounds: GeoBounds,
    nodata: Option<f32>,
}

impl GeoRaster {
    /// Decode a GeoTIFF whose bounds are known externally (tiled sources
    /// name their extent through the tile coordinate).
    pub fn decode(path: &Path, bounds: GeoBounds) -> Result<Self, GeoTiffError> {
        let file = std::fs::File::open(path)?;
        let mut decoder = configure(Decoder::new(file)?);
        let (width, height) = decoder.dimensions()?;
        let data = decode_band(&mut decoder)?;
        let nodata = read_nodata(&mut decoder);
        Ok(Self {
            data,
            width,
            height,
            bounds,
            nodata,
        })
    }

    /// Decode a GeoTIFF reading its bounds from the embedded geotransform
    /// (ModelTiepoint + ModelPixelScale tags).
    pub fn decode_with_embedded_bounds(path: &Path) -> Result<Self, GeoTiffError> {
        let file = std::fs::File::open(path)?;
        let mut decoder = configure(Decoder::new(file)?);
        let (width, height) = decoder.dimensions()?;
        let bounds = read_geotransform(&mut decoder, width, height)
            .ok_or_else(|| GeoTiffError::MissingGeoreference(path.display().to_string()))?;
        let data = decode_band(&mut decoder)?;
        let nodata = read_nodata(&mut decoder);
        Ok(Self {
            data,
            width,
            height,
            bounds,
            nodata,
        })
    }

    pub fn bounds(&self) -> GeoBounds {
        self.bounds
    }

    /// Bilinear sample at a geographic coordinate.
    ///
    /// Returns NaN outside the raster or where all contributing pixels are
    /// nodata.
    pub fn sample_bilinear(&self, lat: f64, lon: f64) -> f32 {
        if !self.bounds.contains(lat, lon) || self.width == 0 || self.height == 0 {
            return f32::NAN;
        }

        let lat_range = self.bounds.max_lat - self.bounds.min_lat;
        let lon_range = self.bounds.max_lon - self.bounds.min_lon;

        // Row 0 is the north edge.
        let x = ((lon - self.bounds.min_lon) / lon_range) * (self.width - 1) as f64;
        let y = ((self.bounds.max_lat - lat) / lat_range) * (self.height - 1) as f64;

        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);

        let fx = x - x0 as f64;
        let fy = y - y0 as f64;

        let v00 = self.pixel(x0, y0);
        let v10 = self.pixel(x1, y0);
        let v01 = self.pixel(x0, y1);
        let v11 = self.pixel(x1, y1);

        if !(v00.is_finite() && v10.is_finite() && v01.is_finite() && v11.is_finite()) {
            // Nodata neighbor: fall back to the nearest pixel.
            let near = self.pixel(x.round() as u32, y.round() as u32);
            return near;
        }

        (v00 as f64 * (1.0 - fx) * (1.0 - fy)
            + v10 as f64 * fx * (1.0 - fy)
            + v01 as f64 * (1.0 - fx) * fy
            + v11 as f64 * fx * fy) as f32
    }

    fn pixel(&self, x: u32, y: u32) -> f32 {
        let value = self.data[(y * self.width + x) as usize];
        if let Some(nodata) = self.nodata {
            if (value - nodata).abs() < 0.001 {
                return f32::NAN;
            }
        }
        value
    }

    #[cfg(test)]
    pub fn from_parts(
        data: Vec<f32>,
        width: u32,
        height: u32,
        bounds: GeoBounds,
        nodata: Option<f32>,
    ) -> Self {
        Self {
            data,
            width,
            height,
            bounds,
            nodata,
        }
    }
}

fn configure<R: std::io::Read + std::io::Seek>(decoder: Decoder<R>) -> Decoder<R> {
    // Allow large rasters; source tiles are modest but local files may not be.
    let mut limits = Limits::default();
    limits.decoding_buffer_size = 512 * 1024 * 1024;
    limits.intermediate_buffer_size = 512 * 1024 * 1024;
    limits.ifd_value_size = 512 * 1024 * 1024;
    decoder.with_limits(limits)
}

fn decode_band<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Result<Vec<f32>, GeoTiffError> {
    let result = decoder.read_image()?;
    let data = match result {
        DecodingResult::F32(data) => data,
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f32).collect(),
    };
    Ok(data)
}

/// Read bounds from the ModelTiepoint (33922) and ModelPixelScale (33550)
/// GeoTIFF tags. The tiepoint is the northwest corner.
fn read_geotransform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    width: u32,
    height: u32,
) -> Option<GeoBounds> {
    let tiepoint = decoder.get_tag_f64_vec(Tag::Unknown(33922)).ok()?;
    let scale = decoder.get_tag_f64_vec(Tag::Unknown(33550)).ok()?;
    if tiepoint.len() < 6 || scale.len() < 2 {
        return None;
    }

    let tie_x = tiepoint[3];
    let tie_y = tiepoint[4];
    let scale_x = scale[0];
    let scale_y = scale[1];

    Some(GeoBounds {
        min_lat: tie_y - height as f64 * scale_y,
        max_lat: tie_y,
        min_lon: tie_x,
        max_lon: tie_x + width as f64 * scale_x,
    })
}

/// GDAL_NODATA tag (42113), stored as an ASCII string.
fn read_nodata<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<f32> {
    decoder
        .get_tag_ascii_string(Tag::Unknown(42113))
        .ok()
        .and_then(|s| s.trim().trim_end_matches('\0').parse().ok())
}

#[derive(Debug, thiserror::Error)]
pub enum GeoTiffError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF decode error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("no geotransform tags in {0}")]
    MissingGeoreference(String),
}
