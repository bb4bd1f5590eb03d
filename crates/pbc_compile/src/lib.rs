//! # pbc-compile
//!
//! Module loading, type checking, and C99 code generation for the PB
//! language.
//!
//! [`pipeline::compile_root_module`] is the crate's single entry point: give
//! it a `.pb` file and an [`pbc_base::Interner`], get back one generated
//! `.c`/`.h` pair per non-native module plus aggregated vendor link
//! metadata, or the first [`diagnostic::CompileError`] any phase raised.
//! Everything else here is in service of that one call:
//!
//! - [`check`] — the two-pass type checker (`check_module`)
//! - [`loader`] — recursive module resolution and the cross-module symbol
//!   cache (`Loader`, `ModuleTable`)
//! - [`codegen`] — typed AST to C99 lowering (`generate_module`)
//! - [`diagnostic`] — the shared `CompileError` every phase converts into

pub mod check;
pub mod codegen;
pub mod diagnostic;
pub mod loader;
pub mod pipeline;

pub use check::{check_module, CheckedModule, TypeError};
pub use codegen::{generate_module, GeneratedModule, VendorBuildInfo};
pub use diagnostic::CompileError;
pub use loader::{Loader, ModuleNotFoundError, ModuleSymbol, ModuleTable, VendorMetadata};
pub use pipeline::{compile_root_module, compile_root_module_with_roots, CompileOutput, CompiledModule};
