//! Top-level codegen orchestration: structs, constructors, method/function
//! bodies, and the `.h`/`.c` pair per non-native module.
//!
//! Grounded in `logicaffeine_compile::codegen_c::mod.rs`'s
//! `codegen_c_struct_defs` (topological struct emission) and
//! `codegen_program_c` (forward declarations before definitions), generalized
//! from one monolithic translation unit to per-module pairs and from
//! "record" structs to structs carrying single inheritance (spec.md §4.5).

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use pbc_base::{Interner, Symbol};
use pbc_syntax::ast::{ClassDef, FunctionDef, Param, Program, Stmt, Type};

use crate::check::ImportBinding;
use crate::diagnostic::CompileError;
use crate::loader::{ModuleSymbol, ModuleTable};

pub mod emit;
pub mod runtime;
pub mod types;

use emit::{all_fields, emit_block, find_method, ModuleCtx};
use types::{c_type_name, escape_c_ident, mangled, module_prefix, to_c_type, RuntimeUsage};

/// A generated `.h`/`.c` pair for one non-native module.
pub struct GeneratedModule {
    pub name: Vec<Symbol>,
    pub h_file_name: String,
    pub c_file_name: String,
    pub header: String,
    pub source: String,
}

/// Build/link metadata aggregated across every native (`vendor: true`)
/// module the program transitively imports, for the external linker
/// collaborator (spec.md §1, §4.5 "native passthrough").
#[derive(Debug, Default, Clone)]
pub struct VendorBuildInfo {
    pub include_dirs: Vec<String>,
    pub lib_dirs: Vec<String>,
    pub link_flags: Vec<String>,
}

pub fn collect_vendor_build_info(table: &ModuleTable) -> VendorBuildInfo {
    let mut info = VendorBuildInfo::default();
    for (_, module) in table.iter() {
        if let Some(meta) = module.vendor.as_ref().filter(|m| m.vendor) {
            info.include_dirs.extend(meta.include_dirs.iter().cloned());
            info.lib_dirs.extend(meta.lib_dirs.iter().cloned());
            info.link_flags.extend(meta.link_flags.iter().cloned());
        }
    }
    info
}

fn collect_defs(program: &Program) -> (HashMap<Symbol, &ClassDef>, HashMap<Symbol, &FunctionDef>) {
    let mut classes = HashMap::new();
    let mut functions = HashMap::new();
    for stmt in &program.stmts {
        match stmt {
            Stmt::ClassDef(c) => {
                classes.insert(c.name, c);
            }
            Stmt::FunctionDef(f) => {
                functions.insert(f.name, f);
            }
            _ => {}
        }
    }
    (classes, functions)
}

/// Dependency-ordered class emission: a base class always textually precedes
/// its subclasses, mirroring the teacher's `codegen_c_struct_defs`
/// topological sort, even though PB's flattened field layout (below) means a
/// subclass struct never actually embeds its base by value and so has no
/// hard ordering requirement of its own.
fn topo_order_classes(program: &Program, classes: &HashMap<Symbol, &ClassDef>) -> Vec<Symbol> {
    let mut order = Vec::with_capacity(classes.len());
    let mut emitted = HashSet::new();

    fn visit(sym: Symbol, classes: &HashMap<Symbol, &ClassDef>, emitted: &mut HashSet<Symbol>, order: &mut Vec<Symbol>) {
        if emitted.contains(&sym) || !classes.contains_key(&sym) {
            return;
        }
        if let Some(base) = classes[&sym].base {
            visit(base, classes, emitted, order);
        }
        emitted.insert(sym);
        order.push(sym);
    }

    for stmt in &program.stmts {
        if let Stmt::ClassDef(c) = stmt {
            visit(c.name, classes, &mut emitted, &mut order);
        }
    }
    order
}

/// Own fields followed by inherited ones, flattened into a single struct
/// body rather than nesting the base as a sub-struct member: every field is
/// reached with a plain `ptr->field`, which is how [`emit::emit_expr`]
/// already lowers attribute access, and it needs no anonymous-struct
/// extension beyond C99. Field order still matches declaration order
/// base-first, so this is a layout-equivalent rendering of spec.md §4.5's
/// "embed the base struct as the first field".
fn emit_struct_def(class: &ClassDef, classes: &HashMap<Symbol, &ClassDef>, ctx_interner: &Interner, module_prefix: &str, usage: &mut RuntimeUsage, out: &mut String) {
    let name = format!("{module_prefix}_{}", escape_c_ident(ctx_interner.resolve(class.name)));
    let _ = writeln!(out, "struct {name} {{");
    for (field_name, field_ty) in all_fields(class, classes) {
        let cty = to_c_type(&field_ty);
        usage.note_type(&cty, ctx_interner);
        let c_name = escape_c_ident(ctx_interner.resolve(field_name));
        let c_type = c_type_name(&cty, ctx_interner, module_prefix);
        let _ = writeln!(out, "    {c_type} {c_name};");
    }
    let _ = writeln!(out, "}};\n");
}

fn method_c_name(module_prefix: &str, interner: &Interner, owner: Symbol, method: Symbol) -> String {
    format!("{module_prefix}_{}_{}", escape_c_ident(interner.resolve(owner)), escape_c_ident(interner.resolve(method)))
}

fn constructor_c_name(module_prefix: &str, interner: &Interner, class: Symbol) -> String {
    format!("{module_prefix}_{}_new", escape_c_ident(interner.resolve(class)))
}

/// Which arguments a bare `ClassName(...)` call expands to at the call site,
/// mirroring `check::check_call`'s identical two-way split: a declared
/// `__init__` (own or inherited) takes over construction; otherwise the
/// constructor positionally fills every field.
enum CtorKind<'a> {
    Init { owner: Symbol, def: &'a FunctionDef },
    Fields,
}

fn constructor_kind<'a>(class: &'a ClassDef, classes: &HashMap<Symbol, &'a ClassDef>, interner: &Interner) -> CtorKind<'a> {
    match interner.lookup("__init__").and_then(|s| find_method(class, classes, s)) {
        Some((owner, def)) => CtorKind::Init { owner, def },
        None => CtorKind::Fields,
    }
}

fn render_params(params: impl Iterator<Item = (Symbol, Type)>, interner: &Interner, module_prefix: &str, usage: &mut RuntimeUsage) -> String {
    let rendered: Vec<String> = params
        .map(|(name, ty)| {
            let cty = to_c_type(&ty);
            usage.note_type(&cty, interner);
            format!("{} {}", c_type_name(&cty, interner, module_prefix), escape_c_ident(interner.resolve(name)))
        })
        .collect();
    if rendered.is_empty() {
        "void".to_string()
    } else {
        rendered.join(", ")
    }
}

fn constructor_param_list(class: &ClassDef, classes: &HashMap<Symbol, &ClassDef>, interner: &Interner, module_prefix: &str, usage: &mut RuntimeUsage) -> String {
    match constructor_kind(class, classes, interner) {
        CtorKind::Init { def, .. } => {
            let params = &def.params[1.min(def.params.len())..];
            render_params(params.iter().map(|p: &Param| (p.name, p.declared_type.clone())), interner, module_prefix, usage)
        }
        CtorKind::Fields => render_params(all_fields(class, classes).into_iter(), interner, module_prefix, usage),
    }
}

fn emit_constructor_prototype(class: &ClassDef, classes: &HashMap<Symbol, &ClassDef>, interner: &Interner, module_prefix: &str, usage: &mut RuntimeUsage, out: &mut String) {
    let struct_name = escape_c_ident(interner.resolve(class.name));
    let params = constructor_param_list(class, classes, interner, module_prefix, usage);
    let c_name = constructor_c_name(module_prefix, interner, class.name);
    let _ = writeln!(out, "struct {module_prefix}_{struct_name} *{c_name}({params});");
}

fn emit_constructor_def(class: &ClassDef, classes: &HashMap<Symbol, &ClassDef>, ctx: &ModuleCtx, usage: &mut RuntimeUsage, out: &mut String) {
    let struct_name = format!("{}_{}", ctx.module_prefix, escape_c_ident(ctx.interner.resolve(class.name)));
    let params = constructor_param_list(class, classes, ctx.interner, &ctx.module_prefix, usage);
    let c_name = constructor_c_name(&ctx.module_prefix, ctx.interner, class.name);
    let _ = writeln!(out, "struct {struct_name} *{c_name}({params}) {{");
    let _ = writeln!(out, "    struct {struct_name} *self = malloc(sizeof(struct {struct_name}));");
    match constructor_kind(class, classes, ctx.interner) {
        CtorKind::Init { owner, def } => {
            let init_params = &def.params[1.min(def.params.len())..];
            let mut args = vec!["self".to_string()];
            args.extend(init_params.iter().map(|p| escape_c_ident(ctx.interner.resolve(p.name))));
            let init_name = method_c_name(&ctx.module_prefix, ctx.interner, owner, def.name);
            let _ = writeln!(out, "    {init_name}({});", args.join(", "));
        }
        CtorKind::Fields => {
            for (name, _) in all_fields(class, classes) {
                let c_name = escape_c_ident(ctx.interner.resolve(name));
                let _ = writeln!(out, "    self->{c_name} = {c_name};");
            }
        }
    }
    let _ = writeln!(out, "    return self;");
    let _ = writeln!(out, "}}\n");
}

fn function_params_str(params: &[Param], interner: &Interner, module_prefix: &str, usage: &mut RuntimeUsage) -> String {
    render_params(params.iter().map(|p| (p.name, p.declared_type.clone())), interner, module_prefix, usage)
}

fn emit_function_prototype(c_name: &str, f: &FunctionDef, interner: &Interner, module_prefix: &str, usage: &mut RuntimeUsage, out: &mut String) {
    let ret = to_c_type(&f.return_type.clone().unwrap_or(Type::None_));
    usage.note_type(&ret, interner);
    let ret_c = c_type_name(&ret, interner, module_prefix);
    let params = function_params_str(&f.params, interner, module_prefix, usage);
    let _ = writeln!(out, "{ret_c} {c_name}({params});");
}

fn emit_function_def(c_name: &str, f: &FunctionDef, ctx: &ModuleCtx, usage: &mut RuntimeUsage, out: &mut String) -> Result<(), CompileError> {
    let ret = to_c_type(&f.return_type.clone().unwrap_or(Type::None_));
    let ret_c = c_type_name(&ret, ctx.interner, &ctx.module_prefix);
    let mut locals: HashMap<Symbol, Type> = HashMap::new();
    let mut params_str = Vec::with_capacity(f.params.len());
    for p in &f.params {
        let cty = to_c_type(&p.declared_type);
        usage.note_type(&cty, ctx.interner);
        params_str.push(format!("{} {}", c_type_name(&cty, ctx.interner, &ctx.module_prefix), escape_c_ident(ctx.interner.resolve(p.name))));
        locals.insert(p.name, p.declared_type.clone());
    }
    let params_str = if params_str.is_empty() { "void".to_string() } else { params_str.join(", ") };
    let _ = writeln!(out, "{ret_c} {c_name}({params_str}) {{");
    emit_block(&f.body, ctx, &mut locals, usage, 1, out)?;
    let _ = writeln!(out, "}}\n");
    Ok(())
}

/// `#include` lines for every module this one's `import`/`from..import`
/// statements reach: a sibling module's own generated header, or a native
/// module's declared `headers` (spec.md §4.5's `.c`-assembly rule).
fn collect_includes(module: &ModuleSymbol, table: &ModuleTable, interner: &Interner) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for binding in module.imports.values() {
        let path = match binding {
            ImportBinding::Module(p) => p,
            ImportBinding::Name { module, .. } => module,
        };
        if !seen.insert(path.clone()) {
            continue;
        }
        if let Some(target) = table.get(path) {
            if target.is_native() {
                if let Some(vendor) = &target.vendor {
                    for h in &vendor.headers {
                        out.push(format!("#include \"{h}\""));
                    }
                }
            } else {
                let prefix = module_prefix(path, interner);
                out.push(format!("#include \"{prefix}.h\""));
            }
        }
    }
    out
}

/// Generates the `.h`/`.c` pair for one module, or `None` for a native
/// (`vendor: true`) passthrough module, which emits no C of its own (spec.md
/// §4.5 "native passthrough"). Returns the [`RuntimeUsage`] this module's
/// codegen needed, for the caller to merge across every generated module
/// before rendering the shared `pbrt.h`.
pub fn generate_module(module: &ModuleSymbol, interner: &Interner, table: &ModuleTable) -> Result<Option<(GeneratedModule, RuntimeUsage)>, CompileError> {
    if module.is_native() {
        return Ok(None);
    }

    let (classes, functions) = collect_defs(&module.program);
    let prefix = module_prefix(&module.name, interner);
    let mut usage = RuntimeUsage::default();

    let ctx = ModuleCtx {
        interner,
        module_path: &module.name,
        module_prefix: prefix.clone(),
        classes: &classes,
        functions: &functions,
        globals: &module.globals,
        imports: &module.imports,
        table,
    };

    let order = topo_order_classes(&module.program, &classes);

    let mut header = String::with_capacity(2048);
    let guard = format!("{}_H", prefix.to_uppercase());
    let _ = writeln!(header, "#ifndef {guard}");
    let _ = writeln!(header, "#define {guard}\n");
    let _ = writeln!(header, "#include \"pbrt.h\"\n");

    for sym in &order {
        emit_struct_def(classes[sym], &classes, interner, &prefix, &mut usage, &mut header);
    }

    for stmt in &module.program.stmts {
        if let Stmt::VarDecl(v) = stmt {
            let cty = to_c_type(&v.declared_type);
            usage.note_type(&cty, interner);
            let c_name = mangled(&module.name, v.name, interner);
            let c_type = c_type_name(&cty, interner, &prefix);
            let _ = writeln!(header, "extern {c_type} {c_name};");
        }
    }
    let _ = writeln!(header);

    for sym in &order {
        let class = classes[sym];
        emit_constructor_prototype(class, &classes, interner, &prefix, &mut usage, &mut header);
        for m in &class.methods {
            let c_name = method_c_name(&prefix, interner, class.name, m.name);
            emit_function_prototype(&c_name, m, interner, &prefix, &mut usage, &mut header);
        }
    }
    for stmt in &module.program.stmts {
        if let Stmt::FunctionDef(f) = stmt {
            let c_name = mangled(&module.name, f.name, interner);
            emit_function_prototype(&c_name, f, interner, &prefix, &mut usage, &mut header);
        }
    }
    let _ = writeln!(header, "\n#endif /* {guard} */");

    let mut source = String::with_capacity(4096);
    let _ = writeln!(source, "#include \"{prefix}.h\"");
    for include in collect_includes(module, table, interner) {
        let _ = writeln!(source, "{include}");
    }
    let _ = writeln!(source, "#include <stdlib.h>\n");

    for stmt in &module.program.stmts {
        if let Stmt::VarDecl(v) = stmt {
            let empty_locals = HashMap::new();
            let (code, _) = emit::emit_expr(&v.value, &ctx, &empty_locals, &mut usage)?;
            let cty = to_c_type(&v.declared_type);
            let c_name = mangled(&module.name, v.name, interner);
            let c_type = c_type_name(&cty, interner, &prefix);
            let _ = writeln!(source, "{c_type} {c_name} = {code};");
        }
    }
    let _ = writeln!(source);

    for sym in &order {
        let class = classes[sym];
        emit_constructor_def(class, &classes, &ctx, &mut usage, &mut source);
        for m in &class.methods {
            let c_name = method_c_name(&prefix, interner, class.name, m.name);
            emit_function_def(&c_name, m, &ctx, &mut usage, &mut source)?;
        }
    }
    for stmt in &module.program.stmts {
        if let Stmt::FunctionDef(f) = stmt {
            let c_name = mangled(&module.name, f.name, interner);
            emit_function_def(&c_name, f, &ctx, &mut usage, &mut source)?;
        }
    }

    Ok(Some((
        GeneratedModule {
            name: module.name.clone(),
            h_file_name: format!("{prefix}.h"),
            c_file_name: format!("{prefix}.c"),
            header,
            source,
        },
        usage,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::Loader;
    use pbc_base::Interner;
    use std::io::Write as _;

    fn write_module(dir: &std::path::Path, name: &str, source: &str) {
        let mut f = std::fs::File::create(dir.join(format!("{name}.pb"))).unwrap();
        f.write_all(source.as_bytes()).unwrap();
    }

    #[test]
    fn generates_hello_world_module() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "main", "print(\"hello\")\n");
        let mut interner = Interner::new();
        let mut loader = Loader::new(&mut interner, dir.path().to_path_buf(), dir.path().to_path_buf());
        let root = loader.load_root(&dir.path().join("main.pb")).unwrap();
        let (generated, _usage) = generate_module(&root, &interner, loader.table()).unwrap().unwrap();
        assert!(generated.source.contains("print_str"));
        assert!(generated.header.contains("#ifndef"));
    }

    #[test]
    fn generates_class_struct_and_constructor() {
        let dir = tempfile::tempdir().unwrap();
        write_module(
            dir.path(),
            "main",
            "class Player:\n    hp: int = 0\n    def get_hp(self) -> int:\n        return self.hp\n\np: Player = Player(150)\n",
        );
        let mut interner = Interner::new();
        let mut loader = Loader::new(&mut interner, dir.path().to_path_buf(), dir.path().to_path_buf());
        let root = loader.load_root(&dir.path().join("main.pb")).unwrap();
        let (generated, _usage) = generate_module(&root, &interner, loader.table()).unwrap().unwrap();
        assert!(generated.header.contains("struct main_Player {"));
        assert!(generated.source.contains("main_Player_new"));
        assert!(generated.source.contains("self->hp = hp;"));
    }

    #[test]
    fn constructs_via_declared_init_and_base_delegation() {
        let dir = tempfile::tempdir().unwrap();
        write_module(
            dir.path(),
            "main",
            "class Player:\n    hp: int = 0\n    def __init__(self, hp: int) -> None:\n        self.hp = hp\n\nclass Mage(Player):\n    mana: int = 0\n    def __init__(self, hp: int, mana: int) -> None:\n        Player.__init__(self, hp)\n        self.mana = mana\n\nm: Mage = Mage(150, 200)\n",
        );
        let mut interner = Interner::new();
        let mut loader = Loader::new(&mut interner, dir.path().to_path_buf(), dir.path().to_path_buf());
        let root = loader.load_root(&dir.path().join("main.pb")).unwrap();
        let (generated, _usage) = generate_module(&root, &interner, loader.table()).unwrap().unwrap();
        assert!(generated.source.contains("main_Player___init__(self, hp);"));
        assert!(generated.source.contains("main_Mage_new"));
    }

    #[test]
    fn native_module_generates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let vendor_dir = dir.path().join("vendor");
        std::fs::create_dir_all(&vendor_dir).unwrap();
        write_module(&vendor_dir, "raylib", "def init_window(w: int, h: int) -> None:\n    pass\n");
        std::fs::write(vendor_dir.join("metadata.toml"), "vendor = true\nheaders = [\"raylib.h\"]\n").unwrap();
        write_module(dir.path(), "main", "import vendor.raylib\nvendor.raylib.init_window(800, 600)\n");
        let mut interner = Interner::new();
        let mut loader = Loader::new(&mut interner, dir.path().to_path_buf(), dir.path().to_path_buf());
        let root = loader.load_root(&dir.path().join("main.pb")).unwrap();
        let raylib_path: Vec<Symbol> = vec![interner.lookup("vendor").unwrap(), interner.lookup("raylib").unwrap()];
        let raylib = loader.table().get(&raylib_path).unwrap();
        assert!(generate_module(raylib, &interner, loader.table()).unwrap().is_none());
        let info = collect_vendor_build_info(loader.table());
        assert_eq!(info.link_flags.len(), 0);
        assert!(loader.table().get(&raylib_path).unwrap().is_native());
        let (main_gen, _usage) = generate_module(&root, &interner, loader.table()).unwrap().unwrap();
        assert!(main_gen.source.contains("#include \"raylib.h\""));
    }
}
