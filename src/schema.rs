use serde::{Deserialize, Serialize};

/// A reference document used to ground replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundingDoc {
    pub source: String,
    pub content: String,
}

/// A slice of a grounding document as stored in the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub chunk_id: String,
    pub source: String,
    pub index: usize,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub text: String,
    pub source: String,
    pub score: f64,
}
