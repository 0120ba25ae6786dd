// io.rs — Plain-text grid files.
//
// Format: one row per line, samples as whitespace-separated decimal numbers.
// The first non-blank line fixes the width; every later row must match it.
// Blank lines are skipped. On write, every sample is followed by one space
// and every row by a newline, so `1 2 3 \n` is a 3-wide row.
//
// Samples are parsed as `f32` and narrowed with `Sample::from_f32`, so an
// 8-bit grid accepts "12" but stores "12.7" as 12.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::ConvError;
use crate::grid::{Grid, Sample};

#[derive(Debug, thiserror::Error)]
pub enum GridIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// `line` is 1-based.
    #[error("line {line}: `{token}` is not a number")]
    Parse { line: usize, token: String },

    #[error("line {line}: expected {expected} samples, found {found}")]
    Ragged { line: usize, expected: usize, found: usize },

    #[error("no samples in input")]
    Empty,

    #[error(transparent)]
    Grid(#[from] ConvError),
}

/// Parse a grid from text.
pub fn read_grid<T: Sample>(reader: impl BufRead) -> Result<Grid<T>, GridIoError> {
    let mut data = Vec::new();
    let mut width = 0;
    let mut height = 0;

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let before = data.len();
        for token in line.split_whitespace() {
            let v: f32 = token
                .parse()
                .map_err(|_| GridIoError::Parse { line: i + 1, token: token.to_string() })?;
            data.push(T::from_f32(v));
        }
        let found = data.len() - before;
        if found == 0 {
            continue;
        }
        if height == 0 {
            width = found;
        } else if found != width {
            return Err(GridIoError::Ragged { line: i + 1, expected: width, found });
        }
        height += 1;
    }

    if height == 0 {
        return Err(GridIoError::Empty);
    }
    Ok(Grid::from_vec(width, height, data)?)
}

/// Write `grid` as text.
pub fn write_grid<T: Sample>(mut writer: impl Write, grid: &Grid<T>) -> Result<(), GridIoError> {
    for row in grid.rows() {
        for v in row {
            write!(writer, "{} ", v.to_f32())?;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn load_grid<T: Sample>(path: impl AsRef<Path>) -> Result<Grid<T>, GridIoError> {
    read_grid(BufReader::new(File::open(path)?))
}

pub fn save_grid<T: Sample>(path: impl AsRef<Path>, grid: &Grid<T>) -> Result<(), GridIoError> {
    write_grid(BufWriter::new(File::create(path)?), grid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_basic() {
        let text = "1 2 3\n4 5 6\n";
        let g: Grid<f32> = read_grid(text.as_bytes()).unwrap();
        assert_eq!((g.width(), g.height()), (3, 2));
        assert_eq!(g.get(2, 1), 6.0);
    }

    #[test]
    fn test_blank_lines_and_trailing_spaces() {
        let text = "\n0.5 -1 \n\n   2 3e1\n\n";
        let g: Grid<f32> = read_grid(text.as_bytes()).unwrap();
        assert_eq!(g.as_slice(), &[0.5, -1.0, 2.0, 30.0]);
    }

    #[test]
    fn test_u8_saturates() {
        let g: Grid<u8> = read_grid("300 -4 12.7\n".as_bytes()).unwrap();
        assert_eq!(g.as_slice(), &[255, 0, 12]);
    }

    #[test]
    fn test_ragged_rejected() {
        let err = read_grid::<f32>("1 2 3\n4 5\n".as_bytes()).unwrap_err();
        assert!(matches!(err, GridIoError::Ragged { line: 2, expected: 3, found: 2 }), "{err}");
    }

    #[test]
    fn test_non_numeric_rejected() {
        let err = read_grid::<f32>("1 2\n3 x\n".as_bytes()).unwrap_err();
        match err {
            GridIoError::Parse { line, token } => {
                assert_eq!(line, 2);
                assert_eq!(token, "x");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_rejected() {
        assert!(matches!(read_grid::<u8>("\n \n".as_bytes()), Err(GridIoError::Empty)));
    }

    #[test]
    fn test_write_format() {
        let g = Grid::from_vec(2, 2, vec![1.0f32, -2.5, 0.0, 4.0]).unwrap();
        let mut out = Vec::new();
        write_grid(&mut out, &g).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "1 -2.5 \n0 4 \n");
    }

    #[test]
    fn test_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("heteroconv-io-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("grid.txt");

        let g = Grid::from_fn(5, 3, |x, y| (x * 10 + y) as u8).unwrap();
        save_grid(&path, &g).unwrap();
        let back: Grid<u8> = load_grid(&path).unwrap();
        assert_eq!(back, g);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
