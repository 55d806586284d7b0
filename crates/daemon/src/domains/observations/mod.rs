mod download_observations;
mod normalizer;
mod processed_file;
mod record;
mod standardizer;
mod timestamps;
mod transformer;

pub use download_observations::*;
pub use normalizer::*;
pub use processed_file::*;
pub use record::*;
pub use standardizer::*;
pub use timestamps::*;
pub use transformer::*;

#[cfg(test)]
pub(crate) const SAMPLE_RESPONSE: &str =
    include_str!("../../../tests/fixtures/recife_current.json");
