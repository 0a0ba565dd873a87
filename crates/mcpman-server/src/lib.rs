//! The mcpman meta-server: the fixed downstream tool set, the code-generation
//! backends, and the stdio server lifecycle.

pub mod codegen;
pub mod downstream;
pub mod engine;
pub mod format;
pub mod lifecycle;
pub mod meta;

pub use downstream::{DownstreamPeer, DownstreamServer};
pub use engine::Engine;
pub use lifecycle::InitGate;
