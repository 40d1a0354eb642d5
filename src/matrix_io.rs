//! CSV exchange format for bags and result matrices.
//!
//! Bags arrive as comma-separated rows with a blank line between bags.
//! Parsing is line-oriented rather than going through the csv reader: the
//! csv crate skips blank records, and blank lines are exactly what
//! delimits the bags. Output goes through the csv writer, one matrix at a
//! time with a blank line between matrices.

use std::io::{BufRead, Write};

use eyre::{bail, ensure, Result, WrapErr};
use ndarray::Array2;

use crate::divs::Bag;

/// Reads a sequence of bags. All bags in a stream must share a column
/// count; an empty stream is an error.
pub fn read_bags<R: BufRead>(reader: R) -> Result<Vec<Bag>> {
    let mut bags = Vec::new();
    let mut values: Vec<f32> = Vec::new();
    let mut rows = 0usize;
    let mut dim: Option<usize> = None;

    for (lineno, line) in reader.lines().enumerate() {
        let line = line.wrap_err("failed to read bag input")?;
        let line = line.trim();
        if line.is_empty() {
            if rows > 0 {
                bags.push(finish_bag(&mut values, &mut rows, dim)?);
            }
            continue;
        }

        let mut cols = 0usize;
        for token in line.split(',') {
            let value: f32 = token.trim().parse().wrap_err_with(|| {
                format!("line {}: '{}' is not a number", lineno + 1, token.trim())
            })?;
            values.push(value);
            cols += 1;
        }
        match dim {
            None => dim = Some(cols),
            Some(d) => ensure!(
                cols == d,
                "line {}: expected {d} columns, got {cols}",
                lineno + 1
            ),
        }
        rows += 1;
    }
    if rows > 0 {
        bags.push(finish_bag(&mut values, &mut rows, dim)?);
    }

    ensure!(!bags.is_empty(), "no bags found in input");
    Ok(bags)
}

fn finish_bag(values: &mut Vec<f32>, rows: &mut usize, dim: Option<usize>) -> Result<Bag> {
    let Some(dim) = dim else {
        bail!("bag has no columns");
    };
    let bag = Array2::from_shape_vec((*rows, dim), std::mem::take(values))
        .wrap_err("bag rows do not form a matrix")?;
    *rows = 0;
    Ok(bag)
}

/// Writes the result matrices as CSV, blank-line separated, in the order
/// the estimators were given.
pub fn write_matrices<W: Write>(mut writer: W, matrices: &[Array2<f64>]) -> Result<()> {
    for (idx, matrix) in matrices.iter().enumerate() {
        if idx > 0 {
            writeln!(writer)?;
        }
        let mut csv_writer = csv::Writer::from_writer(&mut writer);
        for row in matrix.rows() {
            csv_writer.write_record(row.iter().map(|v| v.to_string()))?;
        }
        csv_writer.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use float_eq::assert_float_eq;
    use ndarray::arr2;

    use super::*;

    #[test]
    fn reads_blank_line_separated_bags() {
        let input = "0.5,1.5\n2.0,3.0\n\n-1.0,0.25\n4.0,5.0\n6.0,7.0\n";
        let bags = read_bags(input.as_bytes()).unwrap();
        assert_eq!(bags.len(), 2);
        assert_eq!(bags[0].shape(), &[2, 2]);
        assert_eq!(bags[1].shape(), &[3, 2]);
        assert_float_eq!(bags[1][[0, 1]], 0.25, abs <= 1e-6);
    }

    #[test]
    fn last_bag_needs_no_trailing_blank() {
        let input = "1,2\n3,4";
        let bags = read_bags(input.as_bytes()).unwrap();
        assert_eq!(bags.len(), 1);
        assert_eq!(bags[0].shape(), &[2, 2]);
    }

    #[test]
    fn repeated_blank_lines_are_tolerated() {
        let input = "1,2\n\n\n\n3,4\n\n";
        let bags = read_bags(input.as_bytes()).unwrap();
        assert_eq!(bags.len(), 2);
    }

    #[test]
    fn rejects_ragged_rows_and_garbage() {
        assert!(read_bags("1,2\n3\n".as_bytes()).is_err());
        assert!(read_bags("1,spam\n".as_bytes()).is_err());
        assert!(read_bags("".as_bytes()).is_err());
    }

    #[test]
    fn writes_matrices_with_blank_separators() {
        let matrices = vec![arr2(&[[1.0, 2.0], [3.0, 4.0]]), arr2(&[[0.5, 0.25]])];
        let mut out = Vec::new();
        write_matrices(&mut out, &matrices).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "1,2\n3,4\n\n0.5,0.25\n");
    }

    #[test]
    fn round_trips_through_read_bags() {
        let matrices = vec![arr2(&[[1.0, 2.0], [3.0, 4.0]])];
        let mut out = Vec::new();
        write_matrices(&mut out, &matrices).unwrap();
        let bags = read_bags(out.as_slice()).unwrap();
        assert_eq!(bags.len(), 1);
        assert_eq!(bags[0].shape(), &[2, 2]);
        assert_float_eq!(bags[0][[1, 0]], 3.0, abs <= 1e-6);
    }
}
