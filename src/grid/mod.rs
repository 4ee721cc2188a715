mod cell;
mod lattice;

pub use cell::{CoordPrecision, GridCell, GridCellId};
pub use lattice::GridLattice;
