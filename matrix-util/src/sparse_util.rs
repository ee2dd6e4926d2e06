use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

pub type CsrMat = CsrMatrix<f32>;

/// Build a CSR matrix from 0-based (row, column, value) triplets.
/// Duplicated entries are summed up.
pub fn csr_from_triplets(
    nrows: usize,
    ncols: usize,
    triplets: &[(usize, usize, f32)],
) -> anyhow::Result<CsrMat> {
    let mut rows = Vec::with_capacity(triplets.len());
    let mut cols = Vec::with_capacity(triplets.len());
    let mut vals = Vec::with_capacity(triplets.len());
    for &(i, j, x) in triplets {
        rows.push(i);
        cols.push(j);
        vals.push(x);
    }
    let coo = CooMatrix::try_from_triplets(nrows, ncols, rows, cols, vals)
        .map_err(|e| anyhow::anyhow!("invalid triplets: {}", e))?;
    Ok(CsrMat::from(&coo))
}

/// Assemble a CSR matrix from per-row (column, value) entries. Each row
/// is sorted by column; explicit zeros are dropped.
pub fn csr_from_rows(ncols: usize, rows: Vec<Vec<(usize, f32)>>) -> anyhow::Result<CsrMat> {
    let nrows = rows.len();
    let nnz = rows.iter().map(|r| r.len()).sum::<usize>();

    let mut offsets = Vec::with_capacity(nrows + 1);
    let mut indices = Vec::with_capacity(nnz);
    let mut values = Vec::with_capacity(nnz);
    offsets.push(0);

    for mut row in rows {
        row.sort_by_key(|&(j, _)| j);
        for (j, x) in row {
            if j >= ncols {
                anyhow::bail!("column index {} out of range {}", j, ncols);
            }
            if x != 0.0 {
                indices.push(j);
                values.push(x);
            }
        }
        offsets.push(indices.len());
    }

    CsrMat::try_from_csr_data(nrows, ncols, offsets, indices, values)
        .map_err(|e| anyhow::anyhow!("invalid csr data: {}", e))
}

/// Take a subset of rows in the given order
pub fn select_csr_rows(mat: &CsrMat, rows: &[usize]) -> anyhow::Result<CsrMat> {
    let entries = rows
        .iter()
        .map(|&i| {
            if i >= mat.nrows() {
                anyhow::bail!("row index {} out of range {}", i, mat.nrows());
            }
            let row = mat.row(i);
            Ok(row
                .col_indices()
                .iter()
                .copied()
                .zip(row.values().iter().copied())
                .collect::<Vec<_>>())
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    csr_from_rows(mat.ncols(), entries)
}

/// Stack matrices with the same number of columns on top of each other
pub fn vstack_csr(mats: &[&CsrMat]) -> anyhow::Result<CsrMat> {
    let ncols = mats.first().map(|m| m.ncols()).unwrap_or(0);
    if let Some(m) = mats.iter().find(|m| m.ncols() != ncols) {
        anyhow::bail!("column mismatch: {} vs {}", m.ncols(), ncols);
    }
    let entries = mats
        .iter()
        .flat_map(|m| {
            m.row_iter().map(|row| {
                row.col_indices()
                    .iter()
                    .copied()
                    .zip(row.values().iter().copied())
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    csr_from_rows(ncols, entries)
}

/// (row, column, value) triplets in row-major order
pub fn csr_to_triplets(mat: &CsrMat) -> Vec<(usize, usize, f32)> {
    mat.triplet_iter().map(|(i, j, &x)| (i, j, x)).collect()
}

/// Densify a subset of rows restricted to selected columns.
///
/// * `rows` - row indices (output row order)
/// * `column_map` - `column_map[j] = Some(k)` puts column `j` at output column `k`
/// * `ncols_out` - number of output columns
pub fn dense_rows_on_columns(
    mat: &CsrMat,
    rows: &[usize],
    column_map: &[Option<usize>],
    ncols_out: usize,
) -> DMatrix<f32> {
    let mut ret = DMatrix::<f32>::zeros(rows.len(), ncols_out);
    for (r, &i) in rows.iter().enumerate() {
        let row = mat.row(i);
        for (&j, &x) in row.col_indices().iter().zip(row.values()) {
            if let Some(k) = column_map.get(j).copied().flatten() {
                ret[(r, k)] = x;
            }
        }
    }
    ret
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicated_triplets_are_summed() -> anyhow::Result<()> {
        let mat = csr_from_triplets(2, 3, &[(0, 1, 1.0), (0, 1, 2.0), (1, 2, 4.0)])?;
        assert_eq!(mat.nnz(), 2);
        assert_eq!(csr_to_triplets(&mat), vec![(0, 1, 3.0), (1, 2, 4.0)]);
        Ok(())
    }

    #[test]
    fn select_and_stack_rows() -> anyhow::Result<()> {
        let mat = csr_from_triplets(3, 2, &[(0, 0, 1.0), (1, 1, 2.0), (2, 0, 3.0)])?;
        let sub = select_csr_rows(&mat, &[2, 0])?;
        assert_eq!(csr_to_triplets(&sub), vec![(0, 0, 3.0), (1, 0, 1.0)]);

        let stacked = vstack_csr(&[&sub, &mat])?;
        assert_eq!(stacked.nrows(), 5);
        assert_eq!(stacked.nnz(), 5);

        assert!(select_csr_rows(&mat, &[3]).is_err());
        Ok(())
    }

    #[test]
    fn dense_subset_of_columns() -> anyhow::Result<()> {
        let mat = csr_from_triplets(2, 3, &[(0, 0, 1.0), (0, 2, 2.0), (1, 1, 5.0)])?;
        let dense = dense_rows_on_columns(&mat, &[1, 0], &[None, Some(0), Some(1)], 2);
        assert_eq!(dense, DMatrix::from_row_slice(2, 2, &[5.0, 0.0, 0.0, 2.0]));
        Ok(())
    }
}
