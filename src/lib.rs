pub mod csv_import;
pub mod error;
pub mod model;
pub mod orm;
pub mod router;
pub mod settings;
pub mod template;
pub mod views;

pub use error::{Error, Result};
pub use model::Person;
