pub mod bitmap;
pub mod node;

pub use node::{
    DenseBits, NodeBuffer, NodeType, PostingNode, SparseSlots, CONVERT_MIN_SPAN,
    DENSE_TO_SPARSE_DENSITY, SPARSE_TO_DENSE_DENSITY,
};
