//! Configuration types.

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Store display name used when a connection carries none.
    pub default_store_name: String,
    /// How many recent thread messages to load for signal extraction.
    pub context_messages: usize,
    /// Maximum tokens for the generative reply call.
    pub max_reply_tokens: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_store_name: "Support".to_string(),
            context_messages: 10,
            max_reply_tokens: 1024,
        }
    }
}
