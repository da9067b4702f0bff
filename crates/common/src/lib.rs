pub mod error;

pub use error::{StitchError, StitchResult};
