pub mod ingest;
pub mod walk_forward;
pub mod inference;

pub use ingest::*;
pub use walk_forward::*;
pub use inference::*;
