//! GRIB2 decoding for MERGE precipitation files.

use std::{fs::File, io::BufReader, path::Path};

use tracing::debug;

use super::{Grid, RasterDecoder};
use crate::error::{Result, SyncError};

/// Decodes the first submessage of a GRIB2 file, which for MERGE files is
/// the precipitation band.
pub struct Grib2Decoder;

impl RasterDecoder for Grib2Decoder {
    fn decode(&self, path: &Path) -> Result<Grid> {
        let decode_error = |reason: String| SyncError::Decode {
            path: path.to_path_buf(),
            reason,
        };

        let file = BufReader::new(File::open(path)?);
        let grib2 = grib::from_reader(file).map_err(|e| decode_error(e.to_string()))?;

        let (_, submessage) = grib2
            .iter()
            .next()
            .ok_or_else(|| decode_error("file holds no submessage".to_string()))?;

        let (width, height) = submessage
            .grid_shape()
            .map_err(|e| decode_error(e.to_string()))?;
        let latlons: Vec<(f32, f32)> = submessage
            .latlons()
            .map_err(|e| decode_error(e.to_string()))?
            .collect();

        let decoder = grib::Grib2SubmessageDecoder::from(submessage)
            .map_err(|e| decode_error(e.to_string()))?;
        let values: Vec<f32> = decoder
            .dispatch()
            .map_err(|e| decode_error(e.to_string()))?
            .collect();

        debug!(path = %path.display(), width, height, "Decoded GRIB2 submessage");

        grid_from_points(width, height, &latlons, &values).ok_or_else(|| {
            decode_error(format!(
                "{} values over {} points do not form a regular {width}x{height} grid",
                values.len(),
                latlons.len()
            ))
        })
    }
}

/// Places scattered (lat, lon) points of a regular grid into north-up row order,
/// whatever the scanning mode of the source. Longitudes above 180 are wrapped.
pub fn grid_from_points(
    width: usize,
    height: usize,
    latlons: &[(f32, f32)],
    values: &[f32],
) -> Option<Grid> {
    if width < 2 || height < 2 || latlons.len() != width * height || values.len() != latlons.len()
    {
        return None;
    }

    let wrap = |lon: f32| {
        let lon = f64::from(lon);
        if lon > 180.0 {
            lon - 360.0
        } else {
            lon
        }
    };

    let (mut west, mut east) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut south, mut north) = (f64::INFINITY, f64::NEG_INFINITY);
    for (lat, lon) in latlons {
        let (lat, lon) = (f64::from(*lat), wrap(*lon));
        west = west.min(lon);
        east = east.max(lon);
        south = south.min(lat);
        north = north.max(lat);
    }

    let cell_width = (east - west) / (width - 1) as f64;
    let cell_height = (north - south) / (height - 1) as f64;
    if cell_width <= 0.0 || cell_height <= 0.0 {
        return None;
    }

    let mut grid_values = vec![f32::NAN; width * height];
    for ((lat, lon), value) in latlons.iter().zip(values) {
        let col = ((wrap(*lon) - west) / cell_width).round() as usize;
        let row = ((north - f64::from(*lat)) / cell_height).round() as usize;
        if col >= width || row >= height {
            return None;
        }
        grid_values[row * width + col] = *value;
    }

    Some(Grid {
        width,
        height,
        west,
        north,
        cell_width,
        cell_height,
        values: grid_values,
    })
}

// -- Tests -------------------------------------------------------------------
