use crate::common_io::*;
use std::io::{BufRead, Write};
use std::path::Path;

/// Triplets of a MatrixMarket coordinate file with 0-based indices
pub struct MtxTriplets {
    pub nrows: usize,
    pub ncols: usize,
    pub triplets: Vec<(usize, usize, f32)>,
}

/// Write the triplets into a MatrixMarket file with 1-based indices
/// * `triplets` - the triplets to write (0-based)
/// * `nrow` - number of rows
/// * `ncol` - number of columns
/// * `mtx_file` - the output file (e.g., "matrix.mtx.gz")
pub fn write_mtx_triplets(
    triplets: &[(usize, usize, f32)],
    nrow: usize,
    ncol: usize,
    mtx_file: impl AsRef<Path>,
) -> anyhow::Result<()> {
    let mut buf = open_buf_writer(mtx_file)?;

    // write the header
    writeln!(buf, "%%MatrixMarket matrix coordinate real general")?;
    writeln!(buf, "{}\t{}\t{}", nrow, ncol, triplets.len())?;

    for (row, col, val) in triplets {
        writeln!(buf, "{}\t{}\t{}", row + 1, col + 1, val)?;
    }

    buf.flush()?;
    Ok(())
}

/// Read a matrix market file with strict checks on the header, the
/// number of entries, the index ranges and the values (finite,
/// non-negative). Errors report the line
/// number (1-based, counting comment lines).
///
/// * `mtx_file` - Path to the matrix market file (gzipped or not)
pub fn read_mtx_triplets(mtx_file: impl AsRef<Path>) -> anyhow::Result<MtxTriplets> {
    let buf = open_buf_reader(mtx_file)?;

    let mut shape: Option<(usize, usize, usize)> = None;
    let mut triplets = vec![];

    for (line_no, line) in buf.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        let line_no = line_no + 1;

        if line.is_empty() || line.starts_with('%') || line.starts_with('#') {
            continue;
        }

        let words: Vec<&str> = line.split_whitespace().collect();
        if words.len() != 3 {
            anyhow::bail!("line {}: expected 3 fields, found {}", line_no, words.len());
        }

        match shape {
            None => {
                let parse = |x: &str| {
                    x.parse::<usize>()
                        .map_err(|_| anyhow::anyhow!("line {}: invalid header `{}`", line_no, line))
                };
                let nnz = parse(words[2])?;
                shape = Some((parse(words[0])?, parse(words[1])?, nnz));
                triplets.reserve(nnz);
            }
            Some((nrows, ncols, _)) => {
                let index = |x: &str, bound: usize| -> anyhow::Result<usize> {
                    let i = x.parse::<usize>().map_err(|_| {
                        anyhow::anyhow!("line {}: invalid index `{}`", line_no, x)
                    })?;
                    if i == 0 || i > bound {
                        anyhow::bail!("line {}: index {} out of range 1..={}", line_no, i, bound);
                    }
                    Ok(i - 1)
                };
                let row = index(words[0], nrows)?;
                let col = index(words[1], ncols)?;
                let val = words[2].parse::<f32>().map_err(|_| {
                    anyhow::anyhow!("line {}: invalid value `{}`", line_no, words[2])
                })?;
                if !val.is_finite() || val < 0.0 {
                    anyhow::bail!(
                        "line {}: value `{}` is not a finite non-negative count",
                        line_no,
                        words[2]
                    );
                }
                triplets.push((row, col, val));
            }
        }
    }

    let (nrows, ncols, nnz) = shape.ok_or_else(|| anyhow::anyhow!("failed to parse mtx header"))?;

    if triplets.len() != nnz {
        anyhow::bail!(
            "header declares {} entries, but found {}",
            nnz,
            triplets.len()
        );
    }

    Ok(MtxTriplets {
        nrows,
        ncols,
        triplets,
    })
}
