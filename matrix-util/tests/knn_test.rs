use matrix_util::knn_match::*;
use nalgebra::DMatrix;

fn line_points(n: usize) -> DMatrix<f32> {
    DMatrix::from_fn(n, 2, |i, j| if j == 0 { i as f32 } else { 0.0 })
}

#[test]
fn exact_search_is_sorted_by_distance() -> anyhow::Result<()> {
    let dict = ColumnDict::from_dmatrix_rows(&line_points(10), (0..10).collect());

    let query = vec![3.2_f32, 0.0].to_vp();
    let (names, dist) = dict.search_by_query(&query, 3);
    assert_eq!(names, vec![3, 4, 2]);
    assert!(dist.windows(2).all(|w| w[0] <= w[1]));

    assert!(dict.point(&99).is_err());
    Ok(())
}

#[test]
fn ties_are_broken_by_insertion_order() {
    let dict = ColumnDict::from_dmatrix_rows(&DMatrix::<f32>::zeros(5, 3), (0..5).collect());
    let (names, _) = dict.search_by_query(&vec![0.0_f32; 3].to_vp(), 3);
    assert_eq!(names, vec![0, 1, 2]);
}

#[test]
fn match_against_another_dictionary() -> anyhow::Result<()> {
    let source = ColumnDict::from_dmatrix_rows(&line_points(4), vec!["a", "b", "c", "d"]);
    let mut shifted = line_points(4);
    shifted.column_mut(0).add_scalar_mut(0.4);
    let target = ColumnDict::from_dmatrix_rows(&shifted, vec!["w", "x", "y", "z"]);

    let (names, _) = target.search_by_query(source.point(&"b")?, 2);
    assert_eq!(names, vec!["x", "w"]);

    let all = source.match_all_against(1, &target);
    let nearest: Vec<_> = all.iter().map(|(n, _)| n[0]).collect();
    assert_eq!(nearest, vec!["w", "x", "y", "z"]);
    Ok(())
}

#[test]
fn knn_larger_than_dictionary() {
    let dict = ColumnDict::from_dmatrix_rows(&line_points(3), (0..3).collect());
    let (names, _) = dict.search_by_query(&vec![0.0_f32, 0.0].to_vp(), 10);
    assert_eq!(names.len(), 3);
}
