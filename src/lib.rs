//! Policy-checked infrastructure-as-code generation.
//!
//! A free-text ask is resolved to known modules, retrieved chunks are narrowed
//! to those modules and evaluated against the org policy, and the generator's
//! reply is split into named artifacts and persisted under the request id.
pub mod artifact;
pub mod chunk;
pub mod compose;
pub mod config;
pub mod error;
pub mod generation;
pub mod policy;
pub mod prompt;
pub mod request;
pub mod resolve;
pub mod retrieval;
pub mod store;
pub mod util;

pub use compose::{annotate, ComposeOptions, Composer};
pub use error::{ComposeError, ParseError, PersistenceError, Service, UpstreamError};
pub use request::{ComposeInput, ComposeResult, GenerationRequest};
