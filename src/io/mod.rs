//! Row I/O (SPEC_FULL.md §6): reading the ingestion row population and
//! writing the terminal `data_output_path` export.

pub mod sink;
pub mod source;

pub use sink::write_rows;
pub use source::{read_rows, slice_rows, InputFormat};
