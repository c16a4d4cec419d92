pub mod errors;

pub use errors::{ErrorClass, StevedoreError, StevedoreResult};
