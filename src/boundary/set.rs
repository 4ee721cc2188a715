use std::sync::Arc;

use ahash::AHashMap;
use geo::{BoundingRect, Rect};
use rstar::RTree;

use crate::geom::{envelope, IndexedBox};
use crate::types::{BoundaryFeature, UnitId};

/// An ordered, immutable collection of boundary features for one country,
/// with an R-tree over their bounding boxes.
///
/// Repairs never mutate a set; they build a new one.
#[derive(Debug, Clone)]
pub struct BoundarySet {
    country: String,
    features: Arc<[BoundaryFeature]>,
    rtree: RTree<IndexedBox>,
    index: AHashMap<UnitId, usize>, // First occurrence of each unit id
}

impl BoundarySet {
    /// Build a set (and its spatial index) from features in their final order.
    pub fn new(country: impl Into<String>, features: Vec<BoundaryFeature>) -> Self {
        let mut index = AHashMap::with_capacity(features.len());
        for (i, feature) in features.iter().enumerate() {
            index.entry(feature.unit_id.clone()).or_insert(i);
        }

        Self {
            country: country.into(),
            rtree: RTree::bulk_load(
                features.iter().enumerate()
                    .filter_map(|(i, feature)| IndexedBox::of(i, &feature.geometry))
                    .collect()
            ),
            features: features.into(),
            index,
        }
    }

    #[inline] pub fn country(&self) -> &str { &self.country }

    #[inline] pub fn len(&self) -> usize { self.features.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.features.is_empty() }

    #[inline] pub fn features(&self) -> &[BoundaryFeature] { &self.features }

    #[inline] pub fn get(&self, idx: usize) -> Option<&BoundaryFeature> { self.features.get(idx) }

    /// Index of a unit, if present.
    #[inline] pub fn index_of(&self, unit: &UnitId) -> Option<usize> { self.index.get(unit).copied() }

    pub fn find(&self, unit: &UnitId) -> Option<&BoundaryFeature> {
        self.index_of(unit).map(|i| &self.features[i])
    }

    pub fn unit_ids(&self) -> impl Iterator<Item = &UnitId> {
        self.features.iter().map(|f| &f.unit_id)
    }

    /// Indices of features whose bounding box intersects `rect`, ascending.
    pub(crate) fn query(&self, rect: &Rect<f64>) -> Vec<usize> {
        let mut hits: Vec<usize> = self.rtree
            .locate_in_envelope_intersecting(&envelope(rect, 0.0))
            .map(IndexedBox::idx)
            .collect();
        hits.sort_unstable();
        hits
    }

    /// All pairs `(i, j)` with `i < j` whose bounding boxes intersect, in ascending order.
    pub fn candidate_pairs(&self) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for (i, feature) in self.features.iter().enumerate() {
            let Some(rect) = feature.geometry.bounding_rect() else { continue };
            pairs.extend(self.query(&rect).into_iter().filter(|&j| j > i).map(|j| (i, j)));
        }
        pairs
    }

    /// Sum of unsigned feature areas.
    pub fn total_area(&self) -> f64 {
        self.features.iter().map(BoundaryFeature::area).sum()
    }
}
