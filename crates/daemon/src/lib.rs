mod db;
mod domains;
mod error;
mod pipeline;
mod utils;

pub use db::*;
pub use domains::*;
pub use error::*;
pub use pipeline::*;
pub use utils::*;
