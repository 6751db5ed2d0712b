pub mod guard;
pub mod migrations;
pub mod pool;
pub mod schema;

pub use guard::*;
pub use migrations::*;
pub use pool::*;
pub use schema::*;
