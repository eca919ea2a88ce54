/// ETL Module
///
/// The stages an import runs through:
/// - Discover: find the per-table export files under the root directory
/// - Extract: decode files in parallel on a fixed worker pool
/// - Transform: map each table to the decoder that turns its lines into rows
/// - Load: persist decoded files one transaction at a time through a single writer
pub mod discover;
pub mod extract;
pub mod load;
pub mod parsers;
pub mod transform;

pub use discover::{discover_files, table_name_for};
pub use extract::{resolve_worker_count, DecodeWorkerPool};
pub use load::{FailurePolicy, WriterReport, WriterStage};
pub use transform::{Decoder, DecoderRegistry};
