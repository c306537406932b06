pub mod state;
pub mod storage;
pub mod types;

pub use state::VectorIndex;
pub use types::{distance_to_score, IndexRow, IndexStatus, QueryMatch};
