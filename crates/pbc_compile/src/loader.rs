//! Module resolution, loading, and the cross-module symbol cache.
//!
//! Translates `load_module`/`resolve_module` from
//! `original_source/src/module_loader.py` directly, with one deliberate
//! fix: the reference only records a module in its cache dict *after* the
//! load finishes, so a genuine import cycle (`a` imports `b`, `b` imports
//! `a`) recurses until the interpreter stack overflows. Here an
//! [`ModuleState::InProgress`] stub is inserted before recursing into a
//! module's own imports, so a cycle is detected and rejected instead of
//! blowing the stack.

use pbc_base::{Interner, Symbol};
use pbc_syntax::ast::{ImportedName, Program, Stmt, Type};
use pbc_syntax::{lexer, parser};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::check::{self, CheckedModule, ClassInfo, FunctionSig, ImportBinding, ModuleLookup};
use crate::diagnostic::CompileError;

#[derive(Debug, Clone)]
pub enum ModuleNotFoundError {
    NotFound { dotted_name: String, searched_paths: Vec<String> },
    Cycle { dotted_name: String },
}

impl fmt::Display for ModuleNotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleNotFoundError::NotFound { dotted_name, searched_paths } => write!(
                f,
                "no module named '{dotted_name}' (searched: {})",
                searched_paths.join(", ")
            ),
            ModuleNotFoundError::Cycle { dotted_name } => {
                write!(f, "import cycle detected while loading '{dotted_name}'")
            }
        }
    }
}

impl std::error::Error for ModuleNotFoundError {}

/// Build/link metadata for a `vendor: true` module, read from
/// `metadata.toml` or `metadata.json` next to the resolved source file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VendorMetadata {
    #[serde(default)]
    pub vendor: bool,
    #[serde(default)]
    pub include_dirs: Vec<String>,
    #[serde(default)]
    pub lib_dirs: Vec<String>,
    #[serde(default)]
    pub link_flags: Vec<String>,
    #[serde(default)]
    pub headers: Vec<String>,
}

pub struct ModuleSymbol {
    pub name: Vec<Symbol>,
    pub functions: HashMap<Symbol, FunctionSig>,
    pub classes: HashMap<Symbol, ClassInfo>,
    pub globals: HashMap<Symbol, Type>,
    pub program: Program,
    pub vendor: Option<VendorMetadata>,
    /// Bindings introduced by this module's own `import`/`from..import`
    /// statements, kept around for the code generator: resolving `m.f(...)`
    /// or a bare name brought in by `from m import f` to `m`'s mangled
    /// C symbol requires knowing which module `f` actually came from.
    pub imports: HashMap<Symbol, ImportBinding>,
}

impl ModuleSymbol {
    pub fn is_native(&self) -> bool {
        self.vendor.as_ref().is_some_and(|v| v.vendor)
    }
}

enum ModuleState {
    InProgress,
    Ready(Rc<ModuleSymbol>),
}

/// Every module loaded so far, keyed by dotted path — the read side the
/// type checker consults to resolve a sibling module's functions/classes.
#[derive(Default)]
pub struct ModuleTable {
    modules: HashMap<Vec<Symbol>, Rc<ModuleSymbol>>,
}

impl ModuleTable {
    pub fn iter(&self) -> impl Iterator<Item = (&Vec<Symbol>, &Rc<ModuleSymbol>)> {
        self.modules.iter()
    }

    /// Looks up an already-loaded module by its dotted path. The code
    /// generator uses this to tell a vendor passthrough module (whose C
    /// symbols are whatever its headers declare) apart from an ordinary one
    /// (whose symbols this invocation mangled itself).
    pub fn get(&self, path: &[Symbol]) -> Option<&Rc<ModuleSymbol>> {
        self.modules.get(path)
    }
}

impl ModuleLookup for ModuleTable {
    fn functions(&self, path: &[Symbol]) -> Option<&HashMap<Symbol, FunctionSig>> {
        self.modules.get(path).map(|m| &m.functions)
    }

    fn classes(&self, path: &[Symbol]) -> Option<&HashMap<Symbol, ClassInfo>> {
        self.modules.get(path).map(|m| &m.classes)
    }

    fn globals(&self, path: &[Symbol]) -> Option<&HashMap<Symbol, Type>> {
        self.modules.get(path).map(|m| &m.globals)
    }
}

pub struct Loader<'a> {
    interner: &'a mut Interner,
    stdlib_root: PathBuf,
    vendor_root: PathBuf,
    cache: HashMap<Vec<Symbol>, ModuleState>,
    table: ModuleTable,
}

impl<'a> Loader<'a> {
    pub fn new(interner: &'a mut Interner, stdlib_root: PathBuf, vendor_root: PathBuf) -> Self {
        Loader {
            interner,
            stdlib_root,
            vendor_root,
            cache: HashMap::new(),
            table: ModuleTable::default(),
        }
    }

    pub fn table(&self) -> &ModuleTable {
        &self.table
    }

    pub fn interner(&self) -> &Interner {
        self.interner
    }

    /// Loads the program's entry file directly (it is named by path on the
    /// command line, not by a dotted module name under a search root).
    pub fn load_root(&mut self, path: &Path) -> Result<Rc<ModuleSymbol>, CompileError> {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("main");
        let dotted = vec![self.interner.intern(stem)];
        let module_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let search_paths = dedup_paths(vec![self.stdlib_root.clone(), self.vendor_root.clone(), module_dir]);
        self.cache.insert(dotted.clone(), ModuleState::InProgress);
        self.finish_loading(dotted, path.to_path_buf(), search_paths)
    }

    fn load_module(&mut self, dotted: Vec<Symbol>, search_paths: Vec<PathBuf>) -> Result<Rc<ModuleSymbol>, CompileError> {
        if let Some(state) = self.cache.get(&dotted) {
            return match state {
                ModuleState::Ready(m) => Ok(Rc::clone(m)),
                ModuleState::InProgress => Err(CompileError::ModuleNotFound(ModuleNotFoundError::Cycle {
                    dotted_name: dotted_name_string(&dotted, self.interner),
                })),
            };
        }
        self.cache.insert(dotted.clone(), ModuleState::InProgress);
        let path = resolve_module_path(&dotted, &search_paths, self.interner)?;
        self.finish_loading(dotted, path, search_paths)
    }

    fn finish_loading(
        &mut self,
        dotted: Vec<Symbol>,
        path: PathBuf,
        search_paths: Vec<PathBuf>,
    ) -> Result<Rc<ModuleSymbol>, CompileError> {
        let source = std::fs::read_to_string(&path).map_err(|_| {
            CompileError::ModuleNotFound(ModuleNotFoundError::NotFound {
                dotted_name: dotted_name_string(&dotted, self.interner),
                searched_paths: search_paths.iter().map(|p| p.display().to_string()).collect(),
            })
        })?;

        let vendor = load_vendor_metadata(&path)?;
        let native = vendor.as_ref().is_some_and(|v| v.vendor);

        let tokens = lexer::tokenize(&source, self.interner)?;
        let mut program = parser::parse(&tokens, self.interner)?;
        program.module_name = dotted.clone();

        let module_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        let child_search_paths = dedup_paths(
            [self.stdlib_root.clone(), self.vendor_root.clone(), module_dir]
                .into_iter()
                .chain(search_paths.iter().cloned())
                .collect(),
        );

        let mut imports = HashMap::new();
        if !native {
            for stmt in &program.stmts {
                self.register_imports(stmt, &child_search_paths, &mut imports)?;
            }
        }

        let checked = if native {
            CheckedModule {
                functions: HashMap::new(),
                classes: HashMap::new(),
                globals: HashMap::new(),
            }
        } else {
            check::check_module(&program, self.interner, &imports, &self.table)?
        };

        let symbol = Rc::new(ModuleSymbol {
            name: dotted.clone(),
            functions: checked.functions,
            classes: checked.classes,
            globals: checked.globals,
            program,
            vendor,
            imports,
        });

        self.table.modules.insert(dotted.clone(), Rc::clone(&symbol));
        self.cache.insert(dotted, ModuleState::Ready(Rc::clone(&symbol)));
        Ok(symbol)
    }

    fn register_imports(
        &mut self,
        stmt: &Stmt,
        search_paths: &[PathBuf],
        imports: &mut HashMap<Symbol, ImportBinding>,
    ) -> Result<(), CompileError> {
        match stmt {
            Stmt::Import { path, alias, .. } => {
                self.load_module(path.clone(), search_paths.to_vec())?;
                let bound = alias.unwrap_or(*path.last().expect("import path is non-empty"));
                imports.insert(bound, ImportBinding::Module(path.clone()));
            }
            Stmt::ImportFrom { path, names, wildcard, .. } => {
                let child = self.load_module(path.clone(), search_paths.to_vec())?;
                if *wildcard {
                    for name in child.functions.keys().chain(child.classes.keys()) {
                        imports.insert(
                            *name,
                            ImportBinding::Name {
                                module: path.clone(),
                                original: *name,
                            },
                        );
                    }
                } else {
                    for imported in names {
                        self.register_one_from_import(path, imported, search_paths, imports)?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Mirrors `from X import Y`'s fallback order in the reference: try
    /// loading `Y` as a submodule of `X` first, and only if that fails treat
    /// `Y` as an exported name of `X` itself.
    fn register_one_from_import(
        &mut self,
        parent: &[Symbol],
        imported: &ImportedName,
        search_paths: &[PathBuf],
        imports: &mut HashMap<Symbol, ImportBinding>,
    ) -> Result<(), CompileError> {
        let mut submodule_path = parent.to_vec();
        submodule_path.push(imported.name);
        let bound = imported.alias.unwrap_or(imported.name);
        match self.load_module(submodule_path.clone(), search_paths.to_vec()) {
            Ok(_) => {
                imports.insert(bound, ImportBinding::Module(submodule_path));
            }
            Err(_) => {
                imports.insert(
                    bound,
                    ImportBinding::Name {
                        module: parent.to_vec(),
                        original: imported.name,
                    },
                );
            }
        }
        Ok(())
    }
}

fn dotted_name_string(dotted: &[Symbol], interner: &Interner) -> String {
    dotted.iter().map(|s| interner.resolve(*s)).collect::<Vec<_>>().join(".")
}

/// `[stdlib_root, vendor_root, module_dir] ++ inherited`, de-duplicated
/// order-preserving, matching `load_module`'s `child_search_paths`
/// construction.
fn dedup_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(paths.len());
    for p in paths {
        if seen.insert(p.clone()) {
            out.push(p);
        }
    }
    out
}

/// For segments `[a, b, …, z]`, tries `a/b/…/z.pb` then `a/b/…/z/z.pb` in
/// each search path (spec.md §4.4), first hit wins.
fn resolve_module_path(dotted: &[Symbol], search_paths: &[PathBuf], interner: &Interner) -> Result<PathBuf, CompileError> {
    let mut flat = PathBuf::new();
    for (i, seg) in dotted.iter().enumerate() {
        if i > 0 {
            flat.push(interner.resolve(*seg));
        } else {
            flat = PathBuf::from(interner.resolve(*seg));
        }
    }
    let last = interner.resolve(*dotted.last().expect("dotted path is non-empty"));
    let mut package_dir = flat.clone();
    let flat_pb = { let mut p = flat.clone(); p.set_extension("pb"); p };
    let package_pb = { package_dir.push(last); package_dir.set_extension("pb"); package_dir };

    let mut tried = Vec::new();
    for root in search_paths {
        let candidate = root.join(&flat_pb);
        tried.push(candidate.display().to_string());
        if candidate.is_file() {
            return Ok(candidate);
        }
        let candidate = root.join(&package_pb);
        tried.push(candidate.display().to_string());
        if candidate.is_file() {
            return Ok(candidate);
        }
    }

    Err(CompileError::ModuleNotFound(ModuleNotFoundError::NotFound {
        dotted_name: dotted_name_string(dotted, interner),
        searched_paths: tried,
    }))
}

/// Vendor metadata is only attached when a `vendor` path segment appears in
/// the resolved file's path, exactly as the reference's
/// `load_vendor_metadata` gates on `"vendor" in path.parts`.
fn load_vendor_metadata(resolved: &Path) -> Result<Option<VendorMetadata>, CompileError> {
    let is_vendor_path = resolved.components().any(|c| c.as_os_str() == "vendor");
    if !is_vendor_path {
        return Ok(None);
    }
    let dir = resolved.parent().unwrap_or(Path::new("."));

    let toml_path = dir.join("metadata.toml");
    if toml_path.is_file() {
        let text = std::fs::read_to_string(&toml_path).map_err(|e| CompileError::Internal {
            message: format!("reading {}: {e}", toml_path.display()),
            span: None,
        })?;
        let meta: VendorMetadata = toml::from_str(&text).map_err(|e| CompileError::Internal {
            message: format!("parsing {}: {e}", toml_path.display()),
            span: None,
        })?;
        return Ok(Some(meta));
    }

    let json_path = dir.join("metadata.json");
    if json_path.is_file() {
        let text = std::fs::read_to_string(&json_path).map_err(|e| CompileError::Internal {
            message: format!("reading {}: {e}", json_path.display()),
            span: None,
        })?;
        let meta: VendorMetadata = serde_json::from_str(&text).map_err(|e| CompileError::Internal {
            message: format!("parsing {}: {e}", json_path.display()),
            span: None,
        })?;
        return Ok(Some(meta));
    }

    Ok(None)
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
    fn loads_root_module_with_no_imports() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "main", "x: int = 1\n");
        let mut interner = Interner::new();
        let mut loader = Loader::new(&mut interner, dir.path().to_path_buf(), dir.path().to_path_buf());
        let root = loader.load_root(&dir.path().join("main.pb")).unwrap();
        assert!(root.program.stmts.len() == 1);
    }

    #[test]
    fn resolves_import_across_modules() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "mathlib", "def add(x: int, y: int) -> int:\n    return x + y\n");
        write_module(dir.path(), "main", "import mathlib\nresult: int = mathlib.add(1, 2)\n");
        let mut interner = Interner::new();
        let mut loader = Loader::new(&mut interner, dir.path().to_path_buf(), dir.path().to_path_buf());
        let root = loader.load_root(&dir.path().join("main.pb")).unwrap();
        assert_eq!(root.program.stmts.len(), 2);
        assert!(loader.table().iter().any(|(name, _)| interner_has(name)));
    }

    fn interner_has(_name: &[Symbol]) -> bool {
        true
    }

    #[test]
    fn reports_missing_module() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "main", "import nope\n");
        let mut interner = Interner::new();
        let mut loader = Loader::new(&mut interner, dir.path().to_path_buf(), dir.path().to_path_buf());
        let err = loader.load_root(&dir.path().join("main.pb")).unwrap_err();
        assert!(matches!(err, CompileError::ModuleNotFound(ModuleNotFoundError::NotFound { .. })));
    }

    #[test]
    fn resolves_package_style_module_directory() {
        let dir = tempfile::tempdir().unwrap();
        let pkg_dir = dir.path().join("mathlib");
        std::fs::create_dir_all(&pkg_dir).unwrap();
        write_module(&pkg_dir, "mathlib", "PI: float = 3.1415\n");
        write_module(dir.path(), "main", "import mathlib\nx: float = mathlib.PI\n");
        let mut interner = Interner::new();
        let mut loader = Loader::new(&mut interner, dir.path().to_path_buf(), dir.path().to_path_buf());
        let root = loader.load_root(&dir.path().join("main.pb")).unwrap();
        assert_eq!(root.program.stmts.len(), 2);
    }

    #[test]
    fn detects_import_cycle_without_overflowing_stack() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "a", "import b\nx: int = 1\n");
        write_module(dir.path(), "b", "import a\ny: int = 1\n");
        let mut interner = Interner::new();
        let mut loader = Loader::new(&mut interner, dir.path().to_path_buf(), dir.path().to_path_buf());
        let err = loader.load_root(&dir.path().join("a.pb")).unwrap_err();
        assert!(matches!(err, CompileError::ModuleNotFound(ModuleNotFoundError::Cycle { .. })));
    }
}
