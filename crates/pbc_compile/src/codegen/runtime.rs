//! The runtime ABI contract (spec.md §4.6 / component 9).
//!
//! The C runtime itself — `pb_string`, `pb_list_*`, exception machinery,
//! file I/O — is an external collaborator built once as a static archive
//! (spec.md §1). This module only emits the *declarations* the generated
//! `.c` files are allowed to call against: a shared `pbrt.h` that every
//! generated module `#include`s, mirroring
//! `original_source/src/main.py::copy_runtime_header` but generalized from
//! "copy one fixed `runtime.h`" to "write the declarations this invocation's
//! codegen actually used" (spec.md §9(a) note on the two generators; this is
//! the one authoritative generator's runtime surface).

use super::types::{list_suffix, RuntimeUsage};

/// Renders `pbrt.h`: typedefs and `extern` prototypes only, no bodies — the
/// runtime archive supplies the definitions at link time.
pub fn render_runtime_header(usage: &RuntimeUsage) -> String {
    let mut out = String::with_capacity(4096);
    out.push_str("#ifndef PBRT_H\n#define PBRT_H\n\n");
    out.push_str("#include <stdint.h>\n#include <stdbool.h>\n#include <stddef.h>\n\n");

    out.push_str("/* ===== tagged strings ===== */\n");
    out.push_str("typedef struct pb_string { const char *data; int64_t len; } pb_string;\n\n");
    out.push_str("pb_string pb_string_from_cstr(const char *s);\n");
    out.push_str("pb_string pb_string_concat(pb_string a, pb_string b);\n");
    out.push_str("bool pb_string_eq(pb_string a, pb_string b);\n");
    out.push_str("int pb_string_cmp(pb_string a, pb_string b);\n");
    out.push_str("int64_t pb_string_len(pb_string s);\n");
    out.push_str("const char *pb_string_cstr(pb_string s);\n\n");

    out.push_str("pb_string pb_to_str_i64(int64_t v);\n");
    out.push_str("pb_string pb_to_str_f64(double v);\n");
    out.push_str("pb_string pb_to_str_bool(bool v);\n");
    out.push_str("int64_t pb_str_to_i64(pb_string v);\n");
    out.push_str("double pb_str_to_f64(pb_string v);\n\n");

    out.push_str("/* ===== arithmetic with Python-style floor semantics ===== */\n");
    out.push_str("int64_t pb_floordiv_i64(int64_t a, int64_t b);\n");
    out.push_str("double pb_floordiv_f64(double a, double b);\n");
    out.push_str("int64_t pb_mod_i64(int64_t a, int64_t b);\n");
    out.push_str("double pb_mod_f64(double a, double b);\n\n");

    out.push_str("/* ===== stdout ===== */\n");
    out.push_str("void print_i64(int64_t v);\n");
    out.push_str("void print_f64(double v);\n");
    out.push_str("void print_bool(bool v);\n");
    out.push_str("void print_str(pb_string v);\n\n");

    if usage.uses_range_value {
        out.push_str("/* ===== range values ===== */\n");
        out.push_str("typedef struct pb_range { int64_t start; int64_t stop; } pb_range;\n");
        out.push_str("pb_range pb_range_new(int64_t start, int64_t stop);\n\n");
    }

    for suffix in &usage.list_suffixes {
        let elem_c = list_elem_c_type(suffix);
        out.push_str(&format!("/* ===== pb_list_{suffix} ===== */\n"));
        out.push_str(&format!(
            "typedef struct pb_list_{suffix} {{ {elem_c} *data; int64_t len; int64_t cap; }} pb_list_{suffix};\n"
        ));
        out.push_str(&format!("pb_list_{suffix} *pb_list_{suffix}_new(int64_t count, const {elem_c} *items);\n"));
        out.push_str(&format!("void pb_list_{suffix}_push(pb_list_{suffix} *l, {elem_c} v);\n"));
        out.push_str(&format!("{elem_c} pb_list_{suffix}_get(pb_list_{suffix} *l, int64_t idx);\n"));
        out.push_str(&format!("void pb_list_{suffix}_set(pb_list_{suffix} *l, int64_t idx, {elem_c} v);\n"));
        out.push_str(&format!("int64_t pb_list_{suffix}_len(pb_list_{suffix} *l);\n"));
        out.push_str(&format!(
            "pb_list_{suffix} *pb_list_{suffix}_concat(pb_list_{suffix} *a, pb_list_{suffix} *b);\n"
        ));
        out.push_str(&format!("pb_string pb_list_{suffix}_to_str(pb_list_{suffix} *l);\n\n"));
    }

    if usage.uses_file_io {
        out.push_str("/* ===== file i/o ===== */\n");
        out.push_str("typedef struct pb_file pb_file;\n");
        out.push_str("pb_file *pb_file_open(pb_string path);\n");
        out.push_str("pb_string pb_file_read(pb_file *f);\n");
        out.push_str("void pb_file_write(pb_file *f, pb_string s);\n");
        out.push_str("void pb_file_close(pb_file *f);\n\n");
    }

    out.push_str("/* ===== exceptions (declared per spec.md §9(b); no codegen path emits raise/try) ===== */\n");
    out.push_str("void pb_raise(pb_string message);\n");
    out.push_str("int pb_try(void (*body)(void), void (*handler)(pb_string));\n\n");

    out.push_str("#endif /* PBRT_H */\n");
    out
}

fn list_elem_c_type(suffix: &str) -> &'static str {
    match suffix {
        "i64" => "int64_t",
        "f64" => "double",
        "bool" => "bool",
        "str" => "pb_string",
        _ => "void *",
    }
}

/// The runtime list constructor/accessor names for a given suffix, grouped
/// for convenience at call sites.
pub struct ListOps {
    pub new_fn: String,
    pub get_fn: String,
    pub set_fn: String,
    pub len_fn: String,
    pub concat_fn: String,
    pub to_str_fn: String,
}

impl ListOps {
    pub fn for_suffix(suffix: &str) -> Self {
        ListOps {
            new_fn: format!("pb_list_{suffix}_new"),
            get_fn: format!("pb_list_{suffix}_get"),
            set_fn: format!("pb_list_{suffix}_set"),
            len_fn: format!("pb_list_{suffix}_len"),
            concat_fn: format!("pb_list_{suffix}_concat"),
            to_str_fn: format!("pb_list_{suffix}_to_str"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_scalar_declarations_unconditionally() {
        let usage = RuntimeUsage::default();
        let header = render_runtime_header(&usage);
        assert!(header.contains("pb_string_concat"));
        assert!(header.contains("print_i64"));
        assert!(!header.contains("pb_range_new"));
    }

    #[test]
    fn renders_only_used_list_instantiations() {
        let mut usage = RuntimeUsage::default();
        usage.list_suffixes.insert("i64".to_string());
        let header = render_runtime_header(&usage);
        assert!(header.contains("pb_list_i64"));
        assert!(!header.contains("pb_list_str"));
    }

    #[test]
    fn renders_file_io_only_when_used() {
        let mut usage = RuntimeUsage::default();
        usage.uses_file_io = true;
        let header = render_runtime_header(&usage);
        assert!(header.contains("pb_file_open"));
    }
}
