// Errors and run reporting.

pub mod errors;
pub mod json_chunk;
pub mod reporter;

pub use errors::TachyonError;
pub use json_chunk::{JsonChunkReconstitute, JsonChunkReporter};
pub use reporter::{CliReporter, Reporter, SharedWriter};
