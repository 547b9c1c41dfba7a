#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod error;
mod impls;
mod number;
mod serde;
mod stream_reader;
mod stream_writer;

pub use error::SerdeErr;
pub use serde::Serde;
pub use stream_reader::BufferReader;
pub use stream_writer::BufferWriter;
