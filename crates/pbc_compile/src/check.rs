//! Two-pass type checker and per-module symbol table builder.
//!
//! Pass one walks `program.stmts` once and registers every top-level
//! `FunctionDef`/`ClassDef`/`VarDecl` signature before pass two walks every
//! statement body — exactly the `TypeChecker.check()` contract in
//! `original_source/src/type_checker.py`, generalized here to also check
//! classes, homogeneous lists, and default-argument arity, none of which the
//! reference implements (it only special-cases `print`/`range`).

use pbc_base::{Interner, Span, Symbol};
use pbc_syntax::ast::{
    BinOpKind, ClassDef, Expr, FstringPart, FunctionDef, Literal, Program, Stmt, Type, UnaryOpKind, VarDecl,
};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum TypeError {
    UndefinedName { name: String, span: Span },
    UndefinedFunction { name: String, span: Span },
    UnknownType { name: String, span: Span },
    TypeMismatch { expected: String, found: String, span: Span },
    ArityMismatch { expected: usize, found: usize, span: Span },
    NotCallable { span: Span },
    UnknownAttribute { attr: String, on: String, span: Span },
    UnknownModule { path: String, span: Span },
    NotIterable { found: String, span: Span },
    HeterogeneousList { span: Span },
    EmptyList { span: Span },
    DuplicateDefinition { name: String, span: Span },
    InvalidBaseClass { name: String, span: Span },
    BreakOutsideLoop { span: Span },
    ContinueOutsideLoop { span: Span },
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeError::UndefinedName { name, span } => write!(f, "undefined name '{name}' at {}..{}", span.start, span.end),
            TypeError::UndefinedFunction { name, span } => {
                write!(f, "undefined function '{name}' at {}..{}", span.start, span.end)
            }
            TypeError::UnknownType { name, span } => write!(f, "unknown type '{name}' at {}..{}", span.start, span.end),
            TypeError::TypeMismatch { expected, found, span } => write!(
                f,
                "expected type '{expected}' but found '{found}' at {}..{}",
                span.start, span.end
            ),
            TypeError::ArityMismatch { expected, found, span } => write!(
                f,
                "expected {expected} argument(s) but found {found} at {}..{}",
                span.start, span.end
            ),
            TypeError::NotCallable { span } => write!(f, "expression is not callable at {}..{}", span.start, span.end),
            TypeError::UnknownAttribute { attr, on, span } => {
                write!(f, "no attribute '{attr}' on '{on}' at {}..{}", span.start, span.end)
            }
            TypeError::UnknownModule { path, span } => write!(f, "unknown module '{path}' at {}..{}", span.start, span.end),
            TypeError::NotIterable { found, span } => {
                write!(f, "'{found}' is not iterable at {}..{}", span.start, span.end)
            }
            TypeError::HeterogeneousList { span } => write!(f, "list elements must share one type at {}..{}", span.start, span.end),
            TypeError::EmptyList { span } => write!(f, "cannot infer element type of an empty list at {}..{}", span.start, span.end),
            TypeError::DuplicateDefinition { name, span } => {
                write!(f, "'{name}' is defined more than once at {}..{}", span.start, span.end)
            }
            TypeError::InvalidBaseClass { name, span } => {
                write!(f, "'{name}' is not a known class at {}..{}", span.start, span.end)
            }
            TypeError::BreakOutsideLoop { span } => write!(f, "'break' outside loop at {}..{}", span.start, span.end),
            TypeError::ContinueOutsideLoop { span } => {
                write!(f, "'continue' outside loop at {}..{}", span.start, span.end)
            }
        }
    }
}

impl std::error::Error for TypeError {}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSig {
    pub name: Symbol,
    pub ty: Type,
    pub has_default: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSig {
    pub params: Vec<ParamSig>,
    pub return_type: Type,
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: Symbol,
    pub base: Option<Symbol>,
    pub own_fields: Vec<(Symbol, Type)>,
    pub methods: HashMap<Symbol, FunctionSig>,
}

impl ClassInfo {
    /// Own fields followed by inherited ones, in declaration order with the
    /// base's fields first (the struct embeds the base as its first member).
    fn all_fields(&self, classes: &HashMap<Symbol, ClassInfo>) -> Vec<(Symbol, Type)> {
        let mut fields = match self.base.and_then(|b| classes.get(&b)) {
            Some(base) => base.all_fields(classes),
            None => Vec::new(),
        };
        fields.extend(self.own_fields.iter().cloned());
        fields
    }

    fn field_type(&self, classes: &HashMap<Symbol, ClassInfo>, field: Symbol) -> Option<Type> {
        if let Some((_, ty)) = self.own_fields.iter().find(|(n, _)| *n == field) {
            return Some(ty.clone());
        }
        self.base.and_then(|b| classes.get(&b)).and_then(|base| base.field_type(classes, field))
    }

    fn method(&self, classes: &HashMap<Symbol, ClassInfo>, name: Symbol) -> Option<FunctionSig> {
        if let Some(sig) = self.methods.get(&name) {
            return Some(sig.clone());
        }
        self.base.and_then(|b| classes.get(&b)).and_then(|base| base.method(classes, name))
    }

    fn is_subclass_of(&self, classes: &HashMap<Symbol, ClassInfo>, other: Symbol) -> bool {
        if self.name == other {
            return true;
        }
        match self.base {
            Some(b) if b == other => true,
            Some(b) => classes.get(&b).is_some_and(|base| base.is_subclass_of(classes, other)),
            None => false,
        }
    }
}

/// How a name brought in by `import`/`from..import` resolves against the
/// loader's module table.
#[derive(Debug, Clone)]
pub enum ImportBinding {
    Module(Vec<Symbol>),
    Name { module: Vec<Symbol>, original: Symbol },
}

/// Read-only view into already-checked modules, keyed by dotted path, that
/// the checker consults to resolve cross-module calls and attribute access.
pub trait ModuleLookup {
    fn functions(&self, path: &[Symbol]) -> Option<&HashMap<Symbol, FunctionSig>>;
    fn classes(&self, path: &[Symbol]) -> Option<&HashMap<Symbol, ClassInfo>>;
    fn globals(&self, path: &[Symbol]) -> Option<&HashMap<Symbol, Type>>;
}

pub struct CheckedModule {
    pub functions: HashMap<Symbol, FunctionSig>,
    pub classes: HashMap<Symbol, ClassInfo>,
    pub globals: HashMap<Symbol, Type>,
}

#[derive(Clone, Copy, PartialEq)]
enum Builtin {
    Print,
    Range,
    Len,
    IntCast,
    FloatCast,
    BoolCast,
    StrCast,
    Open,
}

fn lookup_builtin(name: &str) -> Option<Builtin> {
    Some(match name {
        "print" => Builtin::Print,
        "range" => Builtin::Range,
        "len" => Builtin::Len,
        "int" => Builtin::IntCast,
        "float" => Builtin::FloatCast,
        "bool" => Builtin::BoolCast,
        "str" => Builtin::StrCast,
        "open" => Builtin::Open,
        _ => return None,
    })
}

/// Checks one module's `Program` in two passes, given the import bindings
/// its own `Import`/`ImportFrom` statements introduced and a lookup into
/// already-checked sibling modules.
pub fn check_module(
    program: &Program,
    interner: &Interner,
    imports: &HashMap<Symbol, ImportBinding>,
    modules: &dyn ModuleLookup,
) -> Result<CheckedModule, TypeError> {
    let mut functions: HashMap<Symbol, FunctionSig> = HashMap::new();
    let mut classes: HashMap<Symbol, ClassInfo> = HashMap::new();
    let mut globals: HashMap<Symbol, Type> = HashMap::new();

    // Pass one: register every top-level signature before checking bodies.
    for stmt in &program.stmts {
        match stmt {
            Stmt::FunctionDef(f) => {
                if functions.contains_key(&f.name) {
                    return Err(TypeError::DuplicateDefinition {
                        name: interner.resolve(f.name).to_string(),
                        span: f.span,
                    });
                }
                functions.insert(f.name, function_sig(f, interner, None)?);
            }
            Stmt::ClassDef(c) => {
                if classes.contains_key(&c.name) {
                    return Err(TypeError::DuplicateDefinition {
                        name: interner.resolve(c.name).to_string(),
                        span: c.span,
                    });
                }
                let info = register_class(c, interner)?;
                classes.insert(c.name, info);
            }
            Stmt::VarDecl(v) => {
                globals.insert(v.name, resolve_type(&v.declared_type, interner)?);
            }
            _ => {}
        }
    }

    // A base class may be declared after its subclass in source order;
    // validate base references and recompute field types now that every
    // class is registered.
    let names: Vec<Symbol> = classes.keys().copied().collect();
    for name in &names {
        if let Some(base) = classes[name].base {
            if !classes.contains_key(&base) {
                return Err(TypeError::InvalidBaseClass {
                    name: interner.resolve(base).to_string(),
                    span: Span::default(),
                });
            }
        }
    }

    let mut env = Env {
        interner,
        functions: &functions,
        classes: &classes,
        globals: &globals,
        imports,
        modules,
    };

    // Pass two: check every statement body against the fully registered
    // module-level signatures.
    for stmt in &program.stmts {
        match stmt {
            Stmt::FunctionDef(f) => check_function_body(f, &mut env, None)?,
            Stmt::ClassDef(c) => {
                for m in &c.methods {
                    check_function_body(m, &mut env, Some(c.name))?;
                }
            }
            Stmt::VarDecl(v) => {
                let declared = resolve_type(&v.declared_type, interner)?;
                let mut scope = Scope::new();
                let value_ty = check_expr(&v.value, &mut env, &mut scope)?;
                assign_compatible(&declared, &value_ty, &classes, v.span)?;
            }
            Stmt::Import { .. } | Stmt::ImportFrom { .. } => {}
            other => {
                return Err(TypeError::UndefinedName {
                    name: format!("{other:?}"),
                    span: Span::default(),
                })
            }
        }
    }

    Ok(CheckedModule { functions, classes, globals })
}

fn function_sig(f: &FunctionDef, interner: &Interner, self_class: Option<Symbol>) -> Result<FunctionSig, TypeError> {
    let mut params = Vec::with_capacity(f.params.len());
    let mut seen_default = false;
    for (i, p) in f.params.iter().enumerate() {
        let ty = if i == 0 && self_class.is_some() && interner.resolve(p.name) == "self" {
            // The `self` convention: the first parameter literally named
            // `self` is always the owning class, regardless of what the
            // parser inferred for an untyped parameter.
            Type::Class(self_class.unwrap())
        } else {
            resolve_type(&p.declared_type, interner)?
        };
        if p.default.is_some() {
            seen_default = true;
        } else if seen_default {
            // a required parameter after a defaulted one; arity checking at
            // call sites still works left-to-right so this is not rejected
            // here, matching spec.md's silence on ordering.
        }
        params.push(ParamSig {
            name: p.name,
            ty,
            has_default: p.default.is_some(),
        });
    }
    let return_type = match &f.return_type {
        Some(t) => resolve_type(t, interner)?,
        None => Type::None_,
    };
    Ok(FunctionSig { params, return_type })
}

fn register_class(c: &ClassDef, interner: &Interner) -> Result<ClassInfo, TypeError> {
    let mut own_fields = Vec::with_capacity(c.fields.len());
    for field in &c.fields {
        own_fields.push((field.name, resolve_type(&field.declared_type, interner)?));
    }
    let mut methods = HashMap::new();
    for m in &c.methods {
        methods.insert(m.name, function_sig(m, interner, Some(c.name))?);
    }
    Ok(ClassInfo {
        name: c.name,
        base: c.base,
        own_fields,
        methods,
    })
}

fn resolve_type(ty: &Type, interner: &Interner) -> Result<Type, TypeError> {
    match ty {
        Type::Class(sym) => {
            // Primitive spellings fold into their dedicated variant even if
            // they reach here via a nested `list[...]` that re-parsed a name;
            // `Type::from_name` already does this at parse time, so a
            // `Class` here genuinely names a user type and is left for the
            // class-registration pass to validate existence of.
            let _ = interner;
            Ok(Type::Class(*sym))
        }
        Type::List(inner) => Ok(Type::List(Box::new(resolve_type(inner, interner)?))),
        other => Ok(other.clone()),
    }
}

fn type_name(ty: &Type, interner: &Interner) -> String {
    match ty {
        Type::Int => "int".to_string(),
        Type::Float => "float".to_string(),
        Type::Bool => "bool".to_string(),
        Type::Str => "str".to_string(),
        Type::None_ => "None".to_string(),
        Type::Range => "range".to_string(),
        Type::File => "file".to_string(),
        Type::List(inner) => format!("list[{}]", type_name(inner, interner)),
        Type::Class(sym) => interner.resolve(*sym).to_string(),
    }
}

/// `true` when a value of type `found` may be stored into a target declared
/// as `expected` — exact match, or a subclass value into a base-typed slot.
fn is_assignable(expected: &Type, found: &Type, classes: &HashMap<Symbol, ClassInfo>) -> bool {
    if expected == found {
        return true;
    }
    if let (Type::Class(exp_sym), Type::Class(found_sym)) = (expected, found) {
        if let Some(found_info) = classes.get(found_sym) {
            return found_info.is_subclass_of(classes, *exp_sym);
        }
    }
    false
}

fn assign_compatible(expected: &Type, found: &Type, classes: &HashMap<Symbol, ClassInfo>, span: Span) -> Result<(), TypeError> {
    if is_assignable(expected, found, classes) {
        Ok(())
    } else {
        Err(TypeError::TypeMismatch {
            expected: format!("{expected:?}"),
            found: format!("{found:?}"),
            span,
        })
    }
}

struct Env<'a> {
    interner: &'a Interner,
    functions: &'a HashMap<Symbol, FunctionSig>,
    classes: &'a HashMap<Symbol, ClassInfo>,
    globals: &'a HashMap<Symbol, Type>,
    imports: &'a HashMap<Symbol, ImportBinding>,
    modules: &'a dyn ModuleLookup,
}

/// A function body's local variables. PB has no block scoping: everything
/// assigned anywhere in a function body lives in this one flat table, as in
/// the reference (`TypeChecker.check_stmt` never pushes/pops a scope).
struct Scope {
    locals: HashMap<Symbol, Type>,
    globals_declared: Vec<Symbol>,
    loop_depth: u32,
}

impl Scope {
    fn new() -> Self {
        Scope {
            locals: HashMap::new(),
            globals_declared: Vec::new(),
            loop_depth: 0,
        }
    }
}

fn check_function_body(f: &FunctionDef, env: &mut Env, self_class: Option<Symbol>) -> Result<(), TypeError> {
    let sig = if let Some(class_sym) = self_class {
        env.classes[&class_sym].methods[&f.name].clone()
    } else {
        env.functions[&f.name].clone()
    };
    let mut scope = Scope::new();
    for p in &sig.params {
        scope.locals.insert(p.name, p.ty.clone());
    }
    scope.globals_declared = f.globals_declared.clone();
    for stmt in &f.body {
        check_stmt(stmt, env, &mut scope, &sig.return_type)?;
    }
    Ok(())
}

fn check_stmt(stmt: &Stmt, env: &mut Env, scope: &mut Scope, return_type: &Type) -> Result<(), TypeError> {
    match stmt {
        Stmt::VarDecl(v) => check_vardecl(v, env, scope),
        Stmt::Assign { target, value, span } => {
            let target_ty = check_assignable_target(target, env, scope)?;
            let value_ty = check_expr(value, env, scope)?;
            assign_compatible(&target_ty, &value_ty, env.classes, *span)
        }
        Stmt::AugAssign { target, op, value, span } => {
            let target_ty = check_assignable_target(target, env, scope)?;
            let value_ty = check_expr(value, env, scope)?;
            let result = binop_result_type(*op, &target_ty, &value_ty, *span, env.interner)?;
            assign_compatible(&target_ty, &result, env.classes, *span)
        }
        Stmt::Return { value, span } => {
            let found = match value {
                Some(e) => check_expr(e, env, scope)?,
                None => Type::None_,
            };
            assign_compatible(return_type, &found, env.classes, *span)
        }
        Stmt::If { condition, then_body, else_body, span } => {
            let cond_ty = check_expr(condition, env, scope)?;
            assign_compatible(&Type::Bool, &cond_ty, env.classes, *span)?;
            for s in then_body {
                check_stmt(s, env, scope, return_type)?;
            }
            if let Some(body) = else_body {
                for s in body {
                    check_stmt(s, env, scope, return_type)?;
                }
            }
            Ok(())
        }
        Stmt::While { condition, body, span } => {
            let cond_ty = check_expr(condition, env, scope)?;
            assign_compatible(&Type::Bool, &cond_ty, env.classes, *span)?;
            scope.loop_depth += 1;
            let result = (|| {
                for s in body {
                    check_stmt(s, env, scope, return_type)?;
                }
                Ok(())
            })();
            scope.loop_depth -= 1;
            result
        }
        Stmt::For { var_name, iterable, body, span } => {
            let iter_ty = check_expr(iterable, env, scope)?;
            let elem_ty = match &iter_ty {
                Type::Range => Type::Int,
                Type::List(inner) => (**inner).clone(),
                other => {
                    return Err(TypeError::NotIterable {
                        found: type_name(other, env.interner),
                        span: *span,
                    })
                }
            };
            scope.locals.insert(*var_name, elem_ty);
            scope.loop_depth += 1;
            let result = (|| {
                for s in body {
                    check_stmt(s, env, scope, return_type)?;
                }
                Ok(())
            })();
            scope.loop_depth -= 1;
            result
        }
        Stmt::Assert { condition, span } => {
            let cond_ty = check_expr(condition, env, scope)?;
            assign_compatible(&Type::Bool, &cond_ty, env.classes, *span)
        }
        Stmt::Global { .. } | Stmt::Pass { .. } => Ok(()),
        Stmt::Break { span } => {
            if scope.loop_depth == 0 {
                return Err(TypeError::BreakOutsideLoop { span: *span });
            }
            Ok(())
        }
        Stmt::Continue { span } => {
            if scope.loop_depth == 0 {
                return Err(TypeError::ContinueOutsideLoop { span: *span });
            }
            Ok(())
        }
        Stmt::Expr { expr, .. } => check_expr(expr, env, scope).map(|_| ()),
        Stmt::FunctionDef(_) | Stmt::ClassDef(_) => Ok(()),
        Stmt::Import { .. } | Stmt::ImportFrom { .. } => Ok(()),
    }
}

fn check_vardecl(v: &VarDecl, env: &mut Env, scope: &mut Scope) -> Result<(), TypeError> {
    let declared = resolve_type(&v.declared_type, env.interner)?;
    let value_ty = check_expr(&v.value, env, scope)?;
    assign_compatible(&declared, &value_ty, env.classes, v.span)?;
    scope.locals.insert(v.name, declared);
    Ok(())
}

fn check_assignable_target(target: &Expr, env: &mut Env, scope: &mut Scope) -> Result<Type, TypeError> {
    // targets are checked as ordinary expressions: an `Identifier` must
    // already be bound (locally, as a declared global, or as a parameter);
    // `Attribute`/`Index` resolve through the same expression checker.
    check_expr(target, env, scope)
}

fn lookup_name(name: Symbol, env: &Env, scope: &Scope, span: Span) -> Result<Type, TypeError> {
    if scope.globals_declared.contains(&name) {
        if let Some(ty) = env.globals.get(&name) {
            return Ok(ty.clone());
        }
    }
    if let Some(ty) = scope.locals.get(&name) {
        return Ok(ty.clone());
    }
    if let Some(ty) = env.globals.get(&name) {
        return Ok(ty.clone());
    }
    Err(TypeError::UndefinedName {
        name: env.interner.resolve(name).to_string(),
        span,
    })
}

fn check_expr(expr: &Expr, env: &mut Env, scope: &mut Scope) -> Result<Type, TypeError> {
    match expr {
        Expr::Literal { value, .. } => Ok(match value {
            Literal::Int(_) => Type::Int,
            Literal::Float(_) => Type::Float,
            Literal::Str(_) => Type::Str,
            Literal::Bool(_) => Type::Bool,
            Literal::None => Type::None_,
        }),
        Expr::Identifier { name, span } => lookup_name(*name, env, scope, *span),
        Expr::BinOp { left, op, right, span } => {
            let lt = check_expr(left, env, scope)?;
            let rt = check_expr(right, env, scope)?;
            binop_result_type(*op, &lt, &rt, *span, env.interner)
        }
        Expr::UnaryOp { op, operand, span } => {
            let ty = check_expr(operand, env, scope)?;
            match (op, &ty) {
                (UnaryOpKind::Neg, Type::Int) => Ok(Type::Int),
                (UnaryOpKind::Neg, Type::Float) => Ok(Type::Float),
                (UnaryOpKind::Not, Type::Bool) => Ok(Type::Bool),
                _ => Err(TypeError::TypeMismatch {
                    expected: "int, float, or bool".to_string(),
                    found: type_name(&ty, env.interner),
                    span: *span,
                }),
            }
        }
        Expr::List { elements, elem_type, span } => {
            if elements.is_empty() {
                return Err(TypeError::EmptyList { span: *span });
            }
            let mut iter = elements.iter();
            let first_ty = check_expr(iter.next().unwrap(), env, scope)?;
            for e in iter {
                let ty = check_expr(e, env, scope)?;
                if ty != first_ty {
                    return Err(TypeError::HeterogeneousList { span: *span });
                }
            }
            *elem_type.borrow_mut() = Some(first_ty.clone());
            Ok(Type::List(Box::new(first_ty)))
        }
        Expr::Dict { pairs, .. } => {
            for (k, v) in pairs {
                check_expr(k, env, scope)?;
                check_expr(v, env, scope)?;
            }
            // monomorphic `dict`: type-checked but has no codegen path
            // (DESIGN.md open question (c)).
            Ok(Type::Class(env.interner.lookup("dict").unwrap_or(Symbol::EMPTY)))
        }
        Expr::Index { base, index, elem_type, span } => {
            let base_ty = check_expr(base, env, scope)?;
            let index_ty = check_expr(index, env, scope)?;
            assign_compatible(&Type::Int, &index_ty, env.classes, *span)?;
            match base_ty {
                Type::List(inner) => {
                    *elem_type.borrow_mut() = Some((*inner).clone());
                    Ok(*inner)
                }
                other => Err(TypeError::NotIterable {
                    found: type_name(&other, env.interner),
                    span: *span,
                }),
            }
        }
        Expr::Attribute { obj, attr, span } => check_attribute(obj, *attr, *span, env, scope),
        Expr::Call { func, args, span } => check_call(func, args, *span, env, scope),
        Expr::Fstring { parts, .. } => {
            for part in parts {
                if let FstringPart::Expr(e) = part {
                    check_expr(e, env, scope)?;
                }
            }
            Ok(Type::Str)
        }
    }
}

fn check_attribute(obj: &Expr, attr: Symbol, span: Span, env: &mut Env, scope: &mut Scope) -> Result<Type, TypeError> {
    // `module.name` — obj is a bare identifier bound to an imported module.
    // Functions are only meaningful at a call site (`check_call` intercepts
    // those before reaching here); a bare `module.NAME` used as a value
    // resolves against the module's exported top-level variables.
    if let Expr::Identifier { name, .. } = obj {
        if let Some(ImportBinding::Module(path)) = env.imports.get(name) {
            return env.modules.globals(path).and_then(|g| g.get(&attr)).cloned().ok_or_else(|| {
                TypeError::UnknownAttribute {
                    attr: env.interner.resolve(attr).to_string(),
                    on: path.iter().map(|s| env.interner.resolve(*s)).collect::<Vec<_>>().join("."),
                    span,
                }
            });
        }
    }
    let obj_ty = check_expr(obj, env, scope)?;
    match &obj_ty {
        Type::Class(sym) => {
            let class = env.classes.get(sym).ok_or_else(|| TypeError::UnknownType {
                name: env.interner.resolve(*sym).to_string(),
                span,
            })?;
            class.field_type(env.classes, attr).ok_or_else(|| TypeError::UnknownAttribute {
                attr: env.interner.resolve(attr).to_string(),
                on: env.interner.resolve(*sym).to_string(),
                span,
            })
        }
        other => Err(TypeError::UnknownAttribute {
            attr: env.interner.resolve(attr).to_string(),
            on: type_name(other, env.interner),
            span,
        }),
    }
}

fn check_call(func: &Expr, args: &[Expr], span: Span, env: &mut Env, scope: &mut Scope) -> Result<Type, TypeError> {
    let arg_types: Result<Vec<Type>, TypeError> = args.iter().map(|a| check_expr(a, env, scope)).collect();
    let arg_types = arg_types?;

    match func {
        Expr::Identifier { name, span: fspan } => {
            if let Some(builtin) = lookup_builtin(env.interner.resolve(*name)) {
                if !(env.functions.contains_key(name) || env.classes.contains_key(name)) {
                    return check_builtin_call(builtin, &arg_types, args, span, env);
                }
            }
            if let Some(class) = env.classes.get(name) {
                // bare `ClassName(...)` allocates and runs `__init__` if the
                // class (or a base) declares one; otherwise it falls back to
                // positionally matching every field (own + inherited).
                let init_sig = env.interner.lookup("__init__").and_then(|s| class.method(env.classes, s));
                if let Some(sig) = init_sig {
                    let declared_params = &sig.params[1.min(sig.params.len())..];
                    check_arity(declared_params, arg_types.len(), span)?;
                    for (p, arg_ty) in declared_params.iter().zip(arg_types.iter()) {
                        assign_compatible(&p.ty, arg_ty, env.classes, span)?;
                    }
                } else {
                    let fields = class.all_fields(env.classes);
                    check_arity_exact(fields.len(), arg_types.len(), span)?;
                    for ((_, field_ty), arg_ty) in fields.iter().zip(arg_types.iter()) {
                        assign_compatible(field_ty, arg_ty, env.classes, span)?;
                    }
                }
                return Ok(Type::Class(*name));
            }
            if let Some(sig) = env.functions.get(name).cloned() {
                check_call_args(&sig, &arg_types, span)?;
                return Ok(sig.return_type);
            }
            if let Some(binding) = env.imports.get(name).cloned() {
                if let ImportBinding::Name { module, original } = binding {
                    if let Some(sig) = env.modules.functions(&module).and_then(|f| f.get(&original)).cloned() {
                        check_call_args(&sig, &arg_types, span)?;
                        return Ok(sig.return_type);
                    }
                }
            }
            Err(TypeError::UndefinedFunction {
                name: env.interner.resolve(*name).to_string(),
                span: *fspan,
            })
        }
        Expr::Attribute { obj, attr, span: aspan } => {
            // `module.function(...)`
            if let Expr::Identifier { name, .. } = obj.as_ref() {
                if let Some(ImportBinding::Module(path)) = env.imports.get(name) {
                    let sig = env
                        .modules
                        .functions(path)
                        .and_then(|f| f.get(attr))
                        .cloned()
                        .ok_or_else(|| TypeError::UnknownAttribute {
                            attr: env.interner.resolve(*attr).to_string(),
                            on: path.iter().map(|s| env.interner.resolve(*s)).collect::<Vec<_>>().join("."),
                            span: *aspan,
                        })?;
                    check_call_args(&sig, &arg_types, span)?;
                    return Ok(sig.return_type);
                }
            }
            // `BaseClass.method(self_expr, ...)` — an explicit, unbound
            // method call used to delegate to a base implementation (e.g.
            // `Player.__init__(self)` inside `Mage.__init__`). The first
            // argument fills `self` explicitly, so arity/type checking runs
            // against the full parameter list instead of skipping it.
            if let Expr::Identifier { name, .. } = obj.as_ref() {
                if let Some(class) = env.classes.get(name) {
                    let sig = class.method(env.classes, *attr).ok_or_else(|| TypeError::UnknownAttribute {
                        attr: env.interner.resolve(*attr).to_string(),
                        on: env.interner.resolve(*name).to_string(),
                        span,
                    })?;
                    check_arity(&sig.params, arg_types.len(), span)?;
                    for (p, arg_ty) in sig.params.iter().zip(arg_types.iter()) {
                        assign_compatible(&p.ty, arg_ty, env.classes, span)?;
                    }
                    return Ok(sig.return_type);
                }
            }
            // `instance.method(...)`
            let obj_ty = check_expr(obj, env, scope)?;
            if let Type::Class(sym) = &obj_ty {
                let class = env.classes.get(sym).ok_or_else(|| TypeError::UnknownType {
                    name: env.interner.resolve(*sym).to_string(),
                    span,
                })?;
                let sig = class.method(env.classes, *attr).ok_or_else(|| TypeError::UnknownAttribute {
                    attr: env.interner.resolve(*attr).to_string(),
                    on: env.interner.resolve(*sym).to_string(),
                    span,
                })?;
                // the receiver fills the implicit `self` parameter.
                let declared_params = &sig.params[1.min(sig.params.len())..];
                check_arity(declared_params, arg_types.len(), span)?;
                for (p, arg_ty) in declared_params.iter().zip(arg_types.iter()) {
                    assign_compatible(&p.ty, arg_ty, env.classes, span)?;
                }
                return Ok(sig.return_type);
            }
            Err(TypeError::NotCallable { span })
        }
        _ => Err(TypeError::NotCallable { span }),
    }
}

fn check_arity(params: &[ParamSig], found: usize, span: Span) -> Result<(), TypeError> {
    let required = params.iter().take_while(|p| !p.has_default).count();
    if found < required || found > params.len() {
        return Err(TypeError::ArityMismatch {
            expected: params.len(),
            found,
            span,
        });
    }
    Ok(())
}

fn check_arity_exact(expected: usize, found: usize, span: Span) -> Result<(), TypeError> {
    if expected != found {
        return Err(TypeError::ArityMismatch { expected, found, span });
    }
    Ok(())
}

fn check_call_args(sig: &FunctionSig, arg_types: &[Type], span: Span) -> Result<(), TypeError> {
    check_arity(&sig.params, arg_types.len(), span)?;
    for (p, arg_ty) in sig.params.iter().zip(arg_types.iter()) {
        if &p.ty != arg_ty {
            return Err(TypeError::TypeMismatch {
                expected: format!("{:?}", p.ty),
                found: format!("{arg_ty:?}"),
                span,
            });
        }
    }
    Ok(())
}

fn check_builtin_call(builtin: Builtin, arg_types: &[Type], args: &[Expr], span: Span, env: &Env) -> Result<Type, TypeError> {
    match builtin {
        Builtin::Print => Ok(Type::None_),
        Builtin::Range => {
            if arg_types.is_empty() || arg_types.len() > 2 {
                return Err(TypeError::ArityMismatch {
                    expected: 1,
                    found: arg_types.len(),
                    span,
                });
            }
            for t in arg_types {
                assign_compatible(&Type::Int, t, env.classes, span)?;
            }
            Ok(Type::Range)
        }
        Builtin::Len => {
            check_arity_exact(1, arg_types.len(), span)?;
            match &arg_types[0] {
                Type::List(_) | Type::Str => Ok(Type::Int),
                other => Err(TypeError::TypeMismatch {
                    expected: "list or str".to_string(),
                    found: type_name(other, env.interner),
                    span,
                }),
            }
        }
        Builtin::IntCast => {
            check_arity_exact(1, arg_types.len(), span)?;
            let _ = args;
            Ok(Type::Int)
        }
        Builtin::FloatCast => {
            check_arity_exact(1, arg_types.len(), span)?;
            Ok(Type::Float)
        }
        Builtin::BoolCast => {
            check_arity_exact(1, arg_types.len(), span)?;
            Ok(Type::Bool)
        }
        Builtin::StrCast => {
            check_arity_exact(1, arg_types.len(), span)?;
            Ok(Type::Str)
        }
        Builtin::Open => {
            check_arity_exact(1, arg_types.len(), span)?;
            assign_compatible(&Type::Str, &arg_types[0], env.classes, span)?;
            Ok(Type::File)
        }
    }
}

fn binop_result_type(op: BinOpKind, lt: &Type, rt: &Type, span: Span, interner: &Interner) -> Result<Type, TypeError> {
    use BinOpKind::*;
    match op {
        And | Or => {
            if *lt == Type::Bool && *rt == Type::Bool {
                Ok(Type::Bool)
            } else {
                Err(TypeError::TypeMismatch {
                    expected: "bool".to_string(),
                    found: format!("{} / {}", type_name(lt, interner), type_name(rt, interner)),
                    span,
                })
            }
        }
        Eq | NotEq | Is | IsNot => {
            if lt == rt || matches!(lt, Type::None_) || matches!(rt, Type::None_) {
                Ok(Type::Bool)
            } else {
                Err(TypeError::TypeMismatch {
                    expected: type_name(lt, interner),
                    found: type_name(rt, interner),
                    span,
                })
            }
        }
        Lt | LtEq | Gt | GtEq => match (lt, rt) {
            (Type::Int, Type::Int) | (Type::Float, Type::Float) | (Type::Str, Type::Str) => Ok(Type::Bool),
            _ => Err(TypeError::TypeMismatch {
                expected: type_name(lt, interner),
                found: type_name(rt, interner),
                span,
            }),
        },
        Add => match (lt, rt) {
            (Type::Int, Type::Int) => Ok(Type::Int),
            (Type::Float, Type::Float) => Ok(Type::Float),
            (Type::Str, Type::Str) => Ok(Type::Str),
            (Type::List(a), Type::List(b)) if a == b => Ok(Type::List(a.clone())),
            _ => Err(TypeError::TypeMismatch {
                expected: type_name(lt, interner),
                found: type_name(rt, interner),
                span,
            }),
        },
        Sub | Mul => match (lt, rt) {
            (Type::Int, Type::Int) => Ok(Type::Int),
            (Type::Float, Type::Float) => Ok(Type::Float),
            _ => Err(TypeError::TypeMismatch {
                expected: type_name(lt, interner),
                found: type_name(rt, interner),
                span,
            }),
        },
        Div => match (lt, rt) {
            (Type::Int, Type::Int) | (Type::Float, Type::Float) => Ok(Type::Float),
            _ => Err(TypeError::TypeMismatch {
                expected: type_name(lt, interner),
                found: type_name(rt, interner),
                span,
            }),
        },
        FloorDiv | Mod => match (lt, rt) {
            (Type::Int, Type::Int) => Ok(Type::Int),
            (Type::Float, Type::Float) => Ok(Type::Float),
            _ => Err(TypeError::TypeMismatch {
                expected: type_name(lt, interner),
                found: type_name(rt, interner),
                span,
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbc_syntax::{lexer, parser};
    use std::collections::HashMap as Map;

    struct EmptyModules;
    impl ModuleLookup for EmptyModules {
        fn functions(&self, _path: &[Symbol]) -> Option<&HashMap<Symbol, FunctionSig>> {
            None
        }
        fn classes(&self, _path: &[Symbol]) -> Option<&HashMap<Symbol, ClassInfo>> {
            None
        }
        fn globals(&self, _path: &[Symbol]) -> Option<&HashMap<Symbol, Type>> {
            None
        }
    }

    fn check_src(src: &str) -> Result<CheckedModule, TypeError> {
        let mut interner = Interner::new();
        let tokens = lexer::tokenize(src, &mut interner).expect("lex ok");
        let program = parser::parse(&tokens, &interner).expect("parse ok");
        let imports = Map::new();
        check_module(&program, &interner, &imports, &EmptyModules)
    }

    #[test]
    fn accepts_well_typed_function() {
        let checked = check_src("def add(x: int, y: int) -> int:\n    return x + y\n").unwrap();
        assert!(checked.functions.contains_key(&checked.functions.keys().next().copied().unwrap()));
    }

    #[test]
    fn rejects_mismatched_return_type() {
        let err = check_src("def f() -> int:\n    return \"nope\"\n").unwrap_err();
        assert!(matches!(err, TypeError::TypeMismatch { .. }));
    }

    #[test]
    fn rejects_heterogeneous_list_literal() {
        let err = check_src("x: list[int] = [1, \"two\"]\n").unwrap_err();
        assert!(matches!(err, TypeError::HeterogeneousList { .. }));
    }

    #[test]
    fn rejects_undefined_name() {
        let err = check_src("def f() -> int:\n    return y\n").unwrap_err();
        assert!(matches!(err, TypeError::UndefinedName { .. }));
    }

    #[test]
    fn allows_calling_function_with_default_argument_omitted() {
        let checked = check_src(
            "def greet(name: str = \"world\") -> None:\n    print(name)\n\ndef main() -> None:\n    greet()\n",
        )
        .unwrap();
        assert_eq!(checked.functions.len(), 2);
    }

    #[test]
    fn rejects_wrong_arity_call() {
        let err = check_src("def add(x: int, y: int) -> int:\n    return x + y\n\ndef f() -> int:\n    return add(1)\n")
            .unwrap_err();
        assert!(matches!(err, TypeError::ArityMismatch { .. }));
    }

    #[test]
    fn accepts_class_field_and_method_with_self() {
        let checked = check_src(
            "class Monster:\n    hp: int = 0\n    def get_hp(self) -> int:\n        return self.hp\n",
        )
        .unwrap();
        let class = checked.classes.values().next().unwrap();
        assert_eq!(class.own_fields.len(), 1);
    }

    #[test]
    fn floor_div_and_mod_are_int_preserving() {
        let checked = check_src("def f() -> int:\n    return 7 // 2\n").unwrap();
        assert_eq!(checked.functions.len(), 1);
    }

    #[test]
    fn true_division_always_yields_float() {
        let err = check_src("def f() -> int:\n    return 7 / 2\n").unwrap_err();
        assert!(matches!(err, TypeError::TypeMismatch { .. }));
    }

    #[test]
    fn rejects_break_outside_loop() {
        let err = check_src("def f() -> None:\n    break\n").unwrap_err();
        assert!(matches!(err, TypeError::BreakOutsideLoop { .. }));
    }

    #[test]
    fn rejects_continue_outside_loop() {
        let err = check_src("def f() -> None:\n    if True:\n        continue\n").unwrap_err();
        assert!(matches!(err, TypeError::ContinueOutsideLoop { .. }));
    }

    #[test]
    fn allows_break_inside_while_loop() {
        let checked = check_src("def f() -> None:\n    while True:\n        break\n").unwrap();
        assert_eq!(checked.functions.len(), 1);
    }

    #[test]
    fn constructs_instance_via_declared_init() {
        let checked = check_src(
            "class Player:\n    hp: int = 0\n    def __init__(self, hp: int) -> None:\n        self.hp = hp\n\ndef f() -> None:\n    p: Player = Player(150)\n",
        )
        .unwrap();
        assert_eq!(checked.classes.len(), 1);
    }

    #[test]
    fn allows_explicit_base_delegation_call() {
        let checked = check_src(
            "class Player:\n    hp: int = 0\n    def __init__(self, hp: int) -> None:\n        self.hp = hp\n\nclass Mage(Player):\n    mana: int = 0\n    def __init__(self, hp: int, mana: int) -> None:\n        Player.__init__(self, hp)\n        self.mana = mana\n",
        )
        .unwrap();
        assert_eq!(checked.classes.len(), 2);
    }

    #[test]
    fn allows_continue_inside_for_loop() {
        let checked = check_src("def f() -> None:\n    for i in range(10):\n        continue\n").unwrap();
        assert_eq!(checked.functions.len(), 1);
    }
}
