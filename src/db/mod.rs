mod repository;
mod schema;

pub use repository::{InsertReport, Repository};
