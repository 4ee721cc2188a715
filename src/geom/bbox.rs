use geo::{BoundingRect, MultiPolygon, Rect};
use rstar::{RTreeObject, AABB};

/// A bounding box in an R-tree, associated with a geometry by its index in an arena.
#[derive(Debug, Clone)]
pub(crate) struct IndexedBox {
    idx: usize, // Index of the owning geometry
    rect: Rect<f64>,
}

impl IndexedBox {
    /// Box for `geometry`, or `None` when the geometry is empty.
    pub(crate) fn of(idx: usize, geometry: &MultiPolygon<f64>) -> Option<Self> {
        geometry.bounding_rect().map(|rect| Self { idx, rect })
    }

    /// Get the index of the owning geometry.
    #[inline] pub(crate) fn idx(&self) -> usize { self.idx }
}

impl RTreeObject for IndexedBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.rect.min().into(), self.rect.max().into())
    }
}

/// Envelope of `rect` grown by `pad` on every side.
pub(crate) fn envelope(rect: &Rect<f64>, pad: f64) -> AABB<[f64; 2]> {
    AABB::from_corners(
        [rect.min().x - pad, rect.min().y - pad],
        [rect.max().x + pad, rect.max().y + pad],
    )
}
