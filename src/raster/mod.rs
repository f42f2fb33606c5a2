//! Single-band precipitation grids.

pub mod ascii;
pub mod grib;
pub mod ingest;

use std::path::Path;

use crate::{basin::Geometry, error::Result};

pub use grib::Grib2Decoder;
pub use ingest::{RasterArtifact, RasterIngestor};

/// Decodes a fetched artifact into a grid.
pub trait RasterDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<Grid>;
}

/// Regular lon/lat grid, row-major with row 0 at the north edge.
///
/// `west` and `north` locate the centre of the first cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub width: usize,
    pub height: usize,
    pub west: f64,
    pub north: f64,
    pub cell_width: f64,
    pub cell_height: f64,
    pub values: Vec<f32>,
}

impl Grid {
    /// Builds a grid from rows listed north to south. `None` if the rows are ragged.
    pub fn from_rows(
        west: f64,
        north: f64,
        cell_width: f64,
        cell_height: f64,
        rows: Vec<Vec<f32>>,
    ) -> Option<Self> {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|row| row.len() != width) {
            return None;
        }

        Some(Grid {
            width,
            height,
            west,
            north,
            cell_width,
            cell_height,
            values: rows.into_iter().flatten().collect(),
        })
    }

    pub fn value(&self, row: usize, col: usize) -> f32 {
        self.values[row * self.width + col]
    }

    /// (lon, lat) of a cell centre.
    pub fn cell_centre(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.west + col as f64 * self.cell_width,
            self.north - row as f64 * self.cell_height,
        )
    }

    /// Arithmetic mean of the cells that are neither `no_data` nor NaN.
    pub fn mean_excluding(&self, no_data: f64) -> Option<f64> {
        let sentinel = no_data as f32;
        let (sum, count) = self
            .values
            .iter()
            .filter(|v| !v.is_nan() && **v != sentinel)
            .fold((0.0_f64, 0_usize), |(sum, count), v| {
                (sum + f64::from(*v), count + 1)
            });

        (count > 0).then(|| sum / count as f64)
    }

    /// Crops the grid to the extent of `geometry`, setting every cell whose
    /// centre falls outside it to `no_data`. `None` when the extent misses the grid.
    pub fn crop(&self, geometry: &Geometry, no_data: f64) -> Option<Grid> {
        let extent = geometry.extent();
        let (first_col, last_col) = index_range(
            extent.west - self.west,
            extent.east - self.west,
            self.cell_width,
            self.width,
        )?;
        let (first_row, last_row) = index_range(
            self.north - extent.north,
            self.north - extent.south,
            self.cell_height,
            self.height,
        )?;

        let mut values = Vec::with_capacity((last_row - first_row + 1) * (last_col - first_col + 1));
        for row in first_row..=last_row {
            for col in first_col..=last_col {
                let (lon, lat) = self.cell_centre(row, col);
                if geometry.contains(lon, lat) {
                    values.push(self.value(row, col));
                } else {
                    values.push(no_data as f32);
                }
            }
        }

        let (west, north) = self.cell_centre(first_row, first_col);
        Some(Grid {
            width: last_col - first_col + 1,
            height: last_row - first_row + 1,
            west,
            north,
            cell_width: self.cell_width,
            cell_height: self.cell_height,
            values,
        })
    }
}

// Indices whose centre offset lies within [low, high], clamped to the grid.
fn index_range(low: f64, high: f64, step: f64, len: usize) -> Option<(usize, usize)> {
    if len == 0 || step <= 0.0 {
        return None;
    }

    let first = (low / step).ceil().max(0.0);
    let last = (high / step).floor().min(len as f64 - 1.0);
    if first > last {
        return None;
    }

    Some((first as usize, last as usize))
}

// -- Tests -------------------------------------------------------------------
