pub mod dump;
pub mod find_class;
pub mod info;

pub use dump::*;
pub use find_class::*;
pub use info::*;
