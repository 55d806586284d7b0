pub(crate) mod observations;

pub use observations::*;
