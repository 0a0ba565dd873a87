//! The tool-surface engine: name normalization, schema compilation, type-text
//! generation, and the static checker that validates scripts against the
//! generated surface.

pub mod check;
pub mod names;
pub mod schema;
pub mod typegen;

pub use check::{check_declarations, check_script, format_diagnostics, Diagnostic};
pub use schema::{compile_schema, Schema, ValidationError};
pub use typegen::{SurfaceTool, ToolSurface, TypeSurfaceCache};
