pub mod tree;
pub mod random_forest;

pub use random_forest::{ForestParams, RandomForest};
