//! Services built on top of the object model.

pub mod dump;
pub mod generics;
pub mod host;
