//! Durable stream types shared by both backends.

/// Flat string field map of one stream entry, in insertion order.
pub type StreamFields = Vec<(String, String)>;

/// One entry read from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Entry id assigned by the store (`<millis>-<seq>`).
    pub id: String,
    pub fields: StreamFields,
}

impl StreamEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Where a consumer-group read starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCursor {
    /// Entries never delivered to any consumer of the group (`>`).
    New,
    /// Entries delivered to this consumer but not yet acknowledged (`0`).
    Pending,
}

impl ReadCursor {
    pub fn as_redis_id(&self) -> &'static str {
        match self {
            Self::New => ">",
            Self::Pending => "0",
        }
    }
}
