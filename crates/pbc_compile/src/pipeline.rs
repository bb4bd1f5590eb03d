//! End-to-end orchestration: a `.pb` entry file in, generated C out.
//!
//! Grounded in `compile_to_rust`/`compile_to_dir` from the teacher's
//! `src/compile.rs`: a handful of small sequential functions layered over
//! the phases (lex/parse/check/codegen) rather than one monolithic routine,
//! so each step stays independently testable.

use std::path::{Path, PathBuf};

use pbc_base::Interner;

use crate::codegen::{self, VendorBuildInfo};
use crate::diagnostic::CompileError;
use crate::loader::Loader;

/// One non-native module's generated source, ready to be written to disk.
pub struct CompiledModule {
    pub h_file_name: String,
    pub c_file_name: String,
    pub header: String,
    pub source: String,
}

/// Every generated module reachable from the root, plus the merged
/// `pbrt.h` runtime header and vendor link metadata the CLI's `build`/`run`
/// subcommands hand off to the external C toolchain (spec.md §1 — the
/// compiler driver and the runtime's own implementation are both out of
/// scope here).
pub struct CompileOutput {
    pub modules: Vec<CompiledModule>,
    pub runtime_header: String,
    pub vendor: VendorBuildInfo,
}

/// Lexes and parses `entry`, recursively loads and type-checks every module
/// it transitively imports, then generates C for every non-native module in
/// the graph. The first error from any phase aborts the whole invocation —
/// there is no partial build (spec.md §7).
pub fn compile_root_module(entry: &Path, interner: &mut Interner) -> Result<CompileOutput, CompileError> {
    let stdlib_root = entry.parent().unwrap_or(Path::new(".")).to_path_buf();
    compile_root_module_with_roots(entry, interner, stdlib_root.clone(), stdlib_root)
}

/// As [`compile_root_module`], but with explicit stdlib/vendor search roots
/// (the CLI's `-d` debug-dump flag and the integration tests both want to
/// point these at a scratch directory rather than the entry file's own
/// parent).
pub fn compile_root_module_with_roots(
    entry: &Path,
    interner: &mut Interner,
    stdlib_root: PathBuf,
    vendor_root: PathBuf,
) -> Result<CompileOutput, CompileError> {
    log::info!("compiling {}", entry.display());
    let mut loader = Loader::new(interner, stdlib_root, vendor_root);
    let root = loader.load_root(entry)?;
    log::debug!("loaded module graph rooted at {}", root.name.len());

    let mut modules = Vec::new();
    let mut usage = codegen::types::RuntimeUsage::default();

    // Sorted by dotted name (not by `Symbol`, which has no total order) so
    // generation order is deterministic across runs.
    let mut names: Vec<(String, Vec<pbc_base::Symbol>)> = loader
        .table()
        .iter()
        .map(|(path, _)| (path.iter().map(|s| loader.interner().resolve(*s)).collect::<Vec<_>>().join("."), path.clone()))
        .collect();
    names.sort_by(|a, b| a.0.cmp(&b.0));

    for (_, name) in &names {
        let module = loader.table().get(name).expect("name came from this table's own iterator");
        if let Some((generated, module_usage)) = codegen::generate_module(module, loader.interner(), loader.table())? {
            log::debug!("generated {}", generated.c_file_name);
            usage.merge(&module_usage);
            modules.push(CompiledModule {
                h_file_name: generated.h_file_name,
                c_file_name: generated.c_file_name,
                header: generated.header,
                source: generated.source,
            });
        }
    }

    let vendor = codegen::collect_vendor_build_info(loader.table());
    let runtime_header = codegen::runtime::render_runtime_header(&usage);

    Ok(CompileOutput { modules, runtime_header, vendor })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_module(dir: &Path, name: &str, source: &str) {
        let mut f = std::fs::File::create(dir.join(format!("{name}.pb"))).unwrap();
        f.write_all(source.as_bytes()).unwrap();
    }

    #[test]
    fn compiles_hello_world_to_c() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "main", "print(\"hello, world\")\n");
        let mut interner = Interner::new();
        let output = compile_root_module(&dir.path().join("main.pb"), &mut interner).unwrap();
        assert_eq!(output.modules.len(), 1);
        assert!(output.modules[0].source.contains("print_str"));
        assert!(output.runtime_header.contains("pbrt.h") || output.runtime_header.contains("PBRT_H"));
    }

    #[test]
    fn compiles_cross_module_import() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "mathlib", "def add(x: int, y: int) -> int:\n    return x + y\n");
        write_module(dir.path(), "main", "import mathlib\nresult: int = mathlib.add(1, 2)\nprint(result)\n");
        let mut interner = Interner::new();
        let output = compile_root_module(&dir.path().join("main.pb"), &mut interner).unwrap();
        assert_eq!(output.modules.len(), 2);
        let main = output.modules.iter().find(|m| m.c_file_name == "main.c").unwrap();
        assert!(main.source.contains("mathlib_add"));
        assert!(main.source.contains("#include \"mathlib.h\""));
    }

    #[test]
    fn compiles_bare_module_constant_access() {
        let dir = tempfile::tempdir().unwrap();
        write_module(
            dir.path(),
            "mathlib",
            "PI: float = 3.1415\ndef add(a: int, b: int) -> int:\n    return a + b\n",
        );
        write_module(
            dir.path(),
            "main",
            "import mathlib\nprint(mathlib.add(5, 4))\nprint(mathlib.PI)\n",
        );
        let mut interner = Interner::new();
        let output = compile_root_module(&dir.path().join("main.pb"), &mut interner).unwrap();
        let main = output.modules.iter().find(|m| m.c_file_name == "main.c").unwrap();
        assert!(main.source.contains("mathlib_PI"));
    }

    #[test]
    fn vendor_module_contributes_no_generated_source() {
        let dir = tempfile::tempdir().unwrap();
        let vendor_dir = dir.path().join("vendor");
        std::fs::create_dir_all(&vendor_dir).unwrap();
        write_module(&vendor_dir, "raylib", "def init_window(w: int, h: int) -> None:\n    pass\n");
        std::fs::write(
            vendor_dir.join("metadata.toml"),
            "vendor = true\nlink_flags = [\"-lraylib\"]\nheaders = [\"raylib.h\"]\n",
        )
        .unwrap();
        write_module(dir.path(), "main", "import vendor.raylib\nvendor.raylib.init_window(800, 600)\n");
        let mut interner = Interner::new();
        let output = compile_root_module(&dir.path().join("main.pb"), &mut interner).unwrap();
        assert_eq!(output.modules.len(), 1);
        assert_eq!(output.vendor.link_flags, vec!["-lraylib".to_string()]);
        assert!(output.modules[0].source.contains("#include \"raylib.h\""));
    }

    #[test]
    fn propagates_first_error_with_no_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "main", "x: int = \"not an int\"\n");
        let mut interner = Interner::new();
        let err = compile_root_module(&dir.path().join("main.pb"), &mut interner).unwrap_err();
        assert!(matches!(err, CompileError::Type(_)));
    }
}
