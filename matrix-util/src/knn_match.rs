use nalgebra::DMatrix;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::hash::Hash;

/// Dictionaries up to this size are searched exhaustively
pub const EXACT_SEARCH_MAX: usize = 4096;

const HNSW_SEED: u64 = 42;
const HNSW_EF_SEARCH: usize = 256;

/// A dictionary of named points for k-nearest neighbour look-up.
///
/// Small dictionaries are searched exactly (ties broken by insertion
/// order); large ones go through an HNSW index built with a fixed seed,
/// so that repeated runs return the same neighbours.
pub struct ColumnDict<T> {
    hnsw: Option<instant_distance::HnswMap<VecPoint, usize>>,
    data_vec: Vec<VecPoint>,
    names: Vec<T>,
    name2index: HashMap<T, usize>,
}

impl<T> ColumnDict<T>
where
    T: Clone + Eq + Hash + Debug + Display + Send + Sync,
{
    /// Build a dictionary over the rows of `data` (n x d)
    pub fn from_dmatrix_rows(data: &DMatrix<f32>, names: Vec<T>) -> Self {
        let points = data
            .row_iter()
            .map(|x| VecPoint {
                data: x.iter().copied().collect(),
            })
            .collect::<Vec<_>>();
        Self::from_points(points, names)
    }

    pub fn from_points(data_vec: Vec<VecPoint>, names: Vec<T>) -> Self {
        debug_assert!(
            data_vec.len() == names.len(),
            "Data and names must have the same length"
        );

        let name2index = names
            .iter()
            .enumerate()
            .map(|(j, x)| (x.clone(), j))
            .collect::<HashMap<_, _>>();

        let hnsw = (data_vec.len() > EXACT_SEARCH_MAX).then(|| {
            instant_distance::Builder::default()
                .seed(HNSW_SEED)
                .ef_search(HNSW_EF_SEARCH)
                .build(data_vec.clone(), (0..data_vec.len()).collect())
        });

        ColumnDict {
            hnsw,
            data_vec,
            names,
            name2index,
        }
    }

    pub fn names(&self) -> &[T] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.data_vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_vec.is_empty()
    }

    pub fn point(&self, name: &T) -> anyhow::Result<&VecPoint> {
        self.name2index
            .get(name)
            .map(|&i| &self.data_vec[i])
            .ok_or_else(|| anyhow::anyhow!("name {} not found", name))
    }

    /// k-nearest neighbours of an arbitrary query point, sorted by
    /// distance, as (names, distances)
    pub fn search_by_query(&self, query: &VecPoint, knn: usize) -> (Vec<T>, Vec<f32>) {
        let hits = self.search_indices(query, knn);
        self.resolve(hits)
    }

    /// Match every point of this dictionary against `against` in parallel;
    /// the result follows the order of `self.names()`
    pub fn match_all_against(&self, knn: usize, against: &Self) -> Vec<(Vec<T>, Vec<f32>)> {
        self.data_vec
            .par_iter()
            .map(|query| against.search_by_query(query, knn))
            .collect()
    }

    fn resolve(&self, hits: Vec<(usize, f32)>) -> (Vec<T>, Vec<f32>) {
        hits.into_iter()
            .map(|(i, d)| (self.names[i].clone(), d))
            .unzip()
    }

    fn search_indices(&self, query: &VecPoint, knn: usize) -> Vec<(usize, f32)> {
        use instant_distance::Point;

        if knn == 0 || self.data_vec.is_empty() {
            return vec![];
        }

        if let Some(hnsw) = self.hnsw.as_ref() {
            let mut search = instant_distance::Search::default();
            hnsw.search(query, &mut search)
                .take(knn)
                .map(|item| (*item.value, item.distance))
                .collect()
        } else {
            let mut dist = self
                .data_vec
                .iter()
                .enumerate()
                .map(|(i, x)| (i, query.distance(x)))
                .collect::<Vec<_>>();
            dist.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
            dist.truncate(knn);
            dist
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
/// a wrapper for Vec<f32>
pub struct VecPoint {
    pub data: Vec<f32>,
}

pub trait MakeVecPoint {
    fn to_vp(&self) -> VecPoint;
}

impl MakeVecPoint for Vec<f32> {
    fn to_vp(&self) -> VecPoint {
        VecPoint { data: self.clone() }
    }
}

impl MakeVecPoint for [f32] {
    fn to_vp(&self) -> VecPoint {
        VecPoint {
            data: self.to_vec(),
        }
    }
}

impl MakeVecPoint for nalgebra::DVectorView<'_, f32> {
    fn to_vp(&self) -> VecPoint {
        VecPoint {
            data: self.iter().cloned().collect(),
        }
    }
}

impl instant_distance::Point for VecPoint {
    fn distance(&self, other: &Self) -> f32 {
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt()
    }
}
