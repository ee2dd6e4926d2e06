use matrix_util::common_io::*;
use matrix_util::mtx_io::*;

#[test]
fn mtx_triplets_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mtx_file = dir.path().join("matrix.mtx.gz");

    let triplets = vec![(0, 0, 1.0), (2, 1, 3.5), (1, 3, 7.0)];
    write_mtx_triplets(&triplets, 3, 4, &mtx_file)?;

    let MtxTriplets {
        nrows,
        ncols,
        triplets: read_back,
    } = read_mtx_triplets(&mtx_file)?;

    assert_eq!((nrows, ncols), (3, 4));
    assert_eq!(read_back, triplets);
    Ok(())
}

#[test]
fn mtx_with_bad_entries_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;

    let out_of_range = dir.path().join("oor.mtx");
    write_lines(
        &["%%MatrixMarket matrix coordinate real general", "2 2 1", "3 1 1.0"],
        &out_of_range,
    )?;
    let err = read_mtx_triplets(&out_of_range).err().expect("must fail");
    assert!(err.to_string().contains("out of range"));

    let short = dir.path().join("short.mtx");
    write_lines(&["2 2 2", "1 1 1.0"], &short)?;
    let err = read_mtx_triplets(&short).err().expect("must fail");
    assert!(err.to_string().contains("declares 2 entries"));

    let garbage = dir.path().join("garbage.mtx");
    write_lines(&["2 2 1", "1 x 1.0"], &garbage)?;
    assert!(read_mtx_triplets(&garbage).is_err());

    for (name, value) in [("inf.mtx", "inf"), ("nan.mtx", "NaN"), ("neg.mtx", "-3")] {
        let file = dir.path().join(name);
        let entry = format!("2 2 {}", value);
        write_lines(&["% counts", "2 2 2", "1 1 4", entry.as_str()], &file)?;
        let err = read_mtx_triplets(&file).err().expect("must fail");
        assert!(err.to_string().contains("line 4"), "{}: {}", value, err);
    }
    Ok(())
}

#[test]
fn gzipped_lines_and_words() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = dir.path().join("features.tsv.gz");
    write_lines(&["ENSG1\tMT-CO1\tGene Expression", "ENSG2\tACTB", ""], &file)?;

    let words = read_lines_of_words_delim(&file, '\t')?;
    assert_eq!(words.len(), 2);
    assert_eq!(words[0][1].as_ref(), "MT-CO1");
    assert_eq!(words[1].len(), 2);

    assert_eq!(
        find_first_file(dir.path(), &["genes.tsv", "features.tsv.gz"]),
        Some(file.clone())
    );
    assert_eq!(basename(dir.path().join("sample_1"))?.as_ref(), "sample_1");
    Ok(())
}
