pub mod aggregator;
pub mod chat_stream;
pub mod config;
pub mod conversation;
pub mod message;
pub mod normalizer;
pub mod pipeline;
pub mod placeholder;
pub mod providers;
pub mod segmenter;
pub mod thinking;
