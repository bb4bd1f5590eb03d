//! # pbc-base
//!
//! Pure structural atoms shared across the pbc workspace.
//!
//! This crate provides the foundational types every other `pbc-*` crate
//! builds on:
//!
//! - [`Interner`]/[`Symbol`] — string interning for O(1) equality
//! - [`Span`] — source location tracking
//! - [`SpannedError`]/[`Result`] — errors with source positions
//!
//! It has no knowledge of PB syntax or semantics — only generic,
//! reusable infrastructure.
//!
//! # Example
//!
//! ```
//! use pbc_base::{Interner, Span};
//!
//! let mut interner = Interner::new();
//! let hello = interner.intern("hello");
//! let span = Span::new(0, 5);
//! assert_eq!(interner.resolve(hello), "hello");
//! assert_eq!(span.len(), 5);
//! ```

pub mod error;
pub mod intern;
pub mod span;

pub use error::{Result, SpannedError};
pub use intern::{Interner, Symbol, SymbolEq};
pub use span::Span;
