//! `jsoptc` compiles a JavaScript/TypeScript subset ahead of time into
//! optimized JavaScript.
//!
//! Source is parsed by the [`frontend`], lowered to HIR and optimized in
//! SSA-aware passes by the [`middle`] end, and rebuilt into source by the
//! [`backend`]. [`project`] ties modules together and drives the pipeline.

pub mod backend;
pub mod config;
pub mod error;
pub mod frontend;
mod index;
pub mod middle;
pub mod project;

pub use config::CompilerOptions;
pub use error::{CompileError, Result};
pub use frontend::SourceFile;
pub use project::{
    CompiledModule, FileSystemResolver, MemoryResolver, ModuleResolver, Project, compile_project,
};
