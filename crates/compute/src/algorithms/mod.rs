pub mod isolation_forest;
pub mod lof;
