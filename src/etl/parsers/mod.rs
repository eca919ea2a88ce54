/// Parsers Module
///
/// Built-in line decoders. Format-specific decoders live with their callers and are
/// plugged in through `DecoderRegistry`.
pub mod json;

pub use json::JsonLineDecoder;
