mod api;
mod migrations;
pub mod utils;

pub use utils::*;
