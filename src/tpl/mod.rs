//! The template compiler: text -> tree -> render script -> output.

pub mod ast;
pub mod cache;
pub mod codegen;
pub mod engine;
pub mod filters;
mod matcher;
pub mod parser;
pub mod position_map;
pub mod render_context;
pub mod transform;
pub mod walker;
