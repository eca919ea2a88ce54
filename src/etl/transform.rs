/// Transform Module
///
/// The decoder contract and the registry that maps a table name to the decoder for its files.
/// The registry is filled before a run starts and shared read-only by every decode worker.
use crate::error::DecodeError;
use crate::models::Row;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Turns one line of an export file into one row
pub trait Decoder: Send + Sync {
    fn decode(&self, line: &str) -> Result<Row, DecodeError>;
}

impl<F> Decoder for F
where
    F: Fn(&str) -> Result<Row, DecodeError> + Send + Sync,
{
    fn decode(&self, line: &str) -> Result<Row, DecodeError> {
        self(line)
    }
}

/// Decoder registry keyed by table name
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    decoders: HashMap<String, Arc<dyn Decoder>>,
    fallback: Option<Arc<dyn Decoder>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the decoder for `table`, replacing any previous one
    pub fn register(mut self, table: impl Into<String>, decoder: impl Decoder + 'static) -> Self {
        self.decoders.insert(table.into(), Arc::new(decoder));
        self
    }

    /// Decoder used for tables without an explicit registration
    pub fn with_fallback(mut self, decoder: impl Decoder + 'static) -> Self {
        self.fallback = Some(Arc::new(decoder));
        self
    }

    /// Get the decoder for a table
    pub fn resolve(&self, table: &str) -> Option<Arc<dyn Decoder>> {
        self.decoders.get(table).or(self.fallback.as_ref()).cloned()
    }

    /// Check if a table has an explicitly registered decoder
    pub fn is_registered(&self, table: &str) -> bool {
        self.decoders.contains_key(table)
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Explicitly registered table names, sorted
    pub fn tables(&self) -> Vec<&str> {
        let mut tables: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        tables.sort_unstable();
        tables
    }
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("tables", &self.tables())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
