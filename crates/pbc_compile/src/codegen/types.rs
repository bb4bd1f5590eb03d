//! The C99 type system the generator lowers PB types into, and the escaping/
//! mangling rules every emitted identifier goes through.
//!
//! Grounded in `logicaffeine_compile::codegen_c::types` (`CType`,
//! `is_c_reserved`/`escape_c_ident`, `CContext`), generalized from LOGOS's
//! single-translation-unit model (no name mangling needed — one program, one
//! namespace) to PB's per-module `.c`/`.h` pairs, where every exported C
//! symbol is mangled with its owning module's dotted path to avoid collisions
//! when multiple modules are linked into one executable.

use pbc_base::{Interner, Symbol};
use pbc_syntax::ast::Type;
use std::collections::BTreeSet;

/// A resolved PB type, in its C99 shape.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum CType {
    Int64,
    Float64,
    Bool,
    Str,
    Void,
    Range,
    File,
    List(Box<CType>),
    /// A user class, named by its *local* symbol — codegen only handles
    /// classes declared in the module it is currently generating (the
    /// checker does not register imported classes into a module's own
    /// `classes` table either; see DESIGN.md).
    Class(Symbol),
}

/// Lowers a checked PB [`Type`] to its C99 counterpart.
pub fn to_c_type(ty: &Type) -> CType {
    match ty {
        Type::Int => CType::Int64,
        Type::Float => CType::Float64,
        Type::Bool => CType::Bool,
        Type::Str => CType::Str,
        Type::None_ => CType::Void,
        Type::Range => CType::Range,
        Type::File => CType::File,
        Type::List(inner) => CType::List(Box::new(to_c_type(inner))),
        Type::Class(sym) => CType::Class(*sym),
    }
}

/// The mangled suffix used to name a `pb_list_<suffix>` instantiation.
///
/// Every class element type shares one generic pointer-array instantiation
/// (`pb_list_ptr`, storing `void *` elements the caller casts back) rather
/// than a distinct struct per class — PB classes are always heap pointers,
/// so a single generic array of pointers covers every class list without
/// generating one struct per class name. Nested `list[list[T]]` similarly
/// degrades to `pb_list_ptr` of boxed inner lists.
pub fn list_suffix(elem: &CType, interner: &Interner) -> String {
    match elem {
        CType::Int64 => "i64".to_string(),
        CType::Float64 => "f64".to_string(),
        CType::Bool => "bool".to_string(),
        CType::Str => "str".to_string(),
        CType::Class(_) | CType::List(_) => "ptr".to_string(),
        CType::Range | CType::File | CType::Void => {
            let _ = interner;
            "ptr".to_string()
        }
    }
}

/// The C99 spelling of a [`CType`] in value (non-list) position.
///
/// `module_prefix` mangles a locally declared class name; it is unused for
/// every other variant.
pub fn c_type_name(ty: &CType, interner: &Interner, module_prefix: &str) -> String {
    match ty {
        CType::Int64 => "int64_t".to_string(),
        CType::Float64 => "double".to_string(),
        CType::Bool => "bool".to_string(),
        CType::Str => "pb_string".to_string(),
        CType::Void => "void".to_string(),
        CType::Range => "pb_range".to_string(),
        CType::File => "pb_file *".to_string(),
        // Every list is a heap-allocated handle, never a stack value — the
        // same representation a nested `list[list[int]]` element needs, so
        // indexing never has to tell "a fresh local" and "an element pulled
        // out of another list" apart.
        CType::List(elem) => format!("pb_list_{} *", list_suffix(elem, interner)),
        CType::Class(sym) => format!("struct {}_{} *", module_prefix, escape_c_ident(interner.resolve(*sym))),
    }
}

/// C99/C11/C23 keywords, plus the handful of libc and runtime identifiers
/// generated code must never shadow. Mirrors
/// `logicaffeine_compile::codegen_c::types::is_c_reserved` with the runtime's
/// own `pb_`-prefixed vocabulary added.
pub fn is_c_reserved(name: &str) -> bool {
    matches!(
        name,
        "auto" | "break" | "case" | "char" | "const" | "continue" | "default" |
        "do" | "double" | "else" | "enum" | "extern" | "float" | "for" | "goto" |
        "if" | "int" | "long" | "register" | "return" | "short" | "signed" |
        "sizeof" | "static" | "struct" | "switch" | "typedef" | "union" |
        "unsigned" | "void" | "volatile" | "while" |
        "inline" | "restrict" | "_Bool" | "_Complex" | "_Imaginary" |
        "_Alignas" | "_Alignof" | "_Atomic" | "_Generic" | "_Noreturn" |
        "_Static_assert" | "_Thread_local" |
        "bool" | "true" | "false" | "nullptr" | "alignas" | "alignof" |
        "constexpr" | "static_assert" | "thread_local" | "typeof" |
        "printf" | "malloc" | "calloc" | "realloc" | "free" | "memcpy" |
        "strlen" | "strdup" | "snprintf" |
        "size_t" | "ssize_t" | "ptrdiff_t" | "intptr_t" |
        "main" | "argc" | "argv"
    ) || name.starts_with("pb_")
}

pub fn escape_c_ident(name: &str) -> String {
    if is_c_reserved(name) {
        format!("pbuser_{name}")
    } else {
        name.to_string()
    }
}

/// Joins a dotted module path into the `_`-separated prefix every one of
/// that module's exported C symbols is mangled with (`a.b` -> `a_b`).
pub fn module_prefix(module: &[Symbol], interner: &Interner) -> String {
    module
        .iter()
        .map(|s| escape_c_ident(interner.resolve(*s)))
        .collect::<Vec<_>>()
        .join("_")
}

/// Mangles a top-level function or class name with its owning module's
/// prefix: `mangled(["mathlib"], "add") == "mathlib_add"`.
pub fn mangled(module: &[Symbol], name: Symbol, interner: &Interner) -> String {
    format!("{}_{}", module_prefix(module, interner), escape_c_ident(interner.resolve(name)))
}

/// Every distinct `pb_list_<suffix>` instantiation a compilation actually
/// emits, collected while generating every module so the shared runtime
/// header only declares the instantiations in use (spec.md §4.6 / §9:
/// "write the declarations this invocation's codegen actually used").
#[derive(Debug, Default, Clone)]
pub struct RuntimeUsage {
    pub list_suffixes: BTreeSet<String>,
    pub uses_file_io: bool,
    pub uses_range_value: bool,
}

impl RuntimeUsage {
    pub fn merge(&mut self, other: &RuntimeUsage) {
        self.list_suffixes.extend(other.list_suffixes.iter().cloned());
        self.uses_file_io |= other.uses_file_io;
        self.uses_range_value |= other.uses_range_value;
    }

    pub fn note_type(&mut self, ty: &CType, interner: &Interner) {
        match ty {
            CType::List(elem) => {
                self.list_suffixes.insert(list_suffix(elem, interner));
                self.note_type(elem, interner);
            }
            CType::File => self.uses_file_io = true,
            CType::Range => self.uses_range_value = true,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_reserved_c_keyword() {
        assert_eq!(escape_c_ident("int"), "pbuser_int");
        assert_eq!(escape_c_ident("widget"), "widget");
    }

    #[test]
    fn escapes_runtime_prefixed_identifier() {
        assert_eq!(escape_c_ident("pb_string"), "pbuser_pb_string");
    }

    #[test]
    fn list_suffix_shares_ptr_instantiation_for_classes() {
        let interner = Interner::new();
        assert_eq!(list_suffix(&CType::Int64, &interner), "i64");
        assert_eq!(list_suffix(&CType::Class(Symbol::EMPTY), &interner), "ptr");
    }

    #[test]
    fn mangled_joins_module_path_and_name() {
        let mut interner = Interner::new();
        let add = interner.intern("add");
        let modname = interner.intern("mathlib");
        assert_eq!(mangled(&[modname], add, &interner), "mathlib_add");
    }
}
