//! InferX is the streaming core of a multi-provider LLM chat client.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`api`] defines the wire payloads exchanged with Ollama, OpenAI-compatible
//!   and Gemini endpoints.
//! - [`core`] owns the stream pipeline: provider normalization, flush/commit
//!   aggregation, structured-content segmentation, the placeholder cache,
//!   thinking extraction, and the stream consumer that ties them together.
//! - [`cli`] implements the `inferx` binary (live chat, capture replay and
//!   configuration printing).
//! - [`utils`] holds small helpers shared by the layers above.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
