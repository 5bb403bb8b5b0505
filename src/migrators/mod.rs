pub mod common;
pub mod goose;

pub use common::Hasher;
pub use goose::GooseMigrator;
