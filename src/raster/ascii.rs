//! Writes grids as ESRI ASCII rasters.

use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::Path,
};

use super::Grid;

/// Writes `grid` to `path`, replacing any previous file.
pub fn write_ascii_grid(grid: &Grid, path: &Path, no_data: f64) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut out = BufWriter::new(File::create(path)?);
    write_grid(grid, &mut out, no_data)?;
    out.flush()
}

/// In-memory ASCII grid, as handed to `ST_FromGDALRaster`.
pub fn encode_ascii_grid(grid: &Grid, no_data: f64) -> Vec<u8> {
    let mut out = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = write_grid(grid, &mut out, no_data);
    out
}

// NaN cells are written as `no_data`.
fn write_grid<W: Write>(grid: &Grid, out: &mut W, no_data: f64) -> io::Result<()> {
    writeln!(out, "ncols {}", grid.width)?;
    writeln!(out, "nrows {}", grid.height)?;
    writeln!(out, "xllcenter {}", grid.west)?;
    writeln!(
        out,
        "yllcenter {}",
        grid.north - grid.height.saturating_sub(1) as f64 * grid.cell_height
    )?;
    if grid.cell_width == grid.cell_height {
        writeln!(out, "cellsize {}", grid.cell_width)?;
    } else {
        writeln!(out, "dx {}", grid.cell_width)?;
        writeln!(out, "dy {}", grid.cell_height)?;
    }
    writeln!(out, "NODATA_value {no_data}")?;

    let missing = no_data.to_string();
    for row in grid.values.chunks(grid.width.max(1)) {
        let line: Vec<String> = row
            .iter()
            .map(|value| {
                if value.is_nan() {
                    missing.clone()
                } else {
                    value.to_string()
                }
            })
            .collect();
        writeln!(out, "{}", line.join(" "))?;
    }

    Ok(())
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn should_write_header_and_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("2024010100.asc");
        let grid =
            Grid::from_rows(-49.0, -11.0, 0.5, 0.5, vec![vec![1.5, -9999.0], vec![3.0, 4.0]])
                .unwrap();

        write_ascii_grid(&grid, &path, -9999.0).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "ncols 2",
                "nrows 2",
                "xllcenter -49",
                "yllcenter -11.5",
                "cellsize 0.5",
                "NODATA_value -9999",
                "1.5 -9999",
                "3 4",
            ]
        );
    }

    #[test]
    fn should_overwrite_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crop.asc");
        let big = Grid::from_rows(0.0, 0.0, 1.0, 1.0, vec![vec![1.0; 8]; 8]).unwrap();
        let small = Grid::from_rows(0.0, 0.0, 1.0, 1.0, vec![vec![2.0]]).unwrap();

        write_ascii_grid(&big, &path, -9999.0).unwrap();
        write_ascii_grid(&small, &path, -9999.0).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 7);
        assert!(text.ends_with("2\n"));
    }

    #[test]
    fn should_encode_missing_cells_as_no_data() {
        let grid = Grid::from_rows(0.0, 1.0, 1.0, 1.0, vec![vec![f32::NAN, 2.25]]).unwrap();

        let text = String::from_utf8(encode_ascii_grid(&grid, -9999.0)).unwrap();

        assert!(text.starts_with("ncols 2\nnrows 1\n"));
        assert!(text.ends_with("-9999 2.25\n"));
    }
}
