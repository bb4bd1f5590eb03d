//! Expression and statement lowering: PB AST nodes to C99 source text.
//!
//! Grounded in `logicaffeine_compile::codegen_c::emit` (`codegen_expr`,
//! `codegen_stmt`), generalized for PB's f-strings, `self`-receiver methods,
//! and cross-module calls mangled through an imported module's dotted path
//! rather than LOGOS's single flat function namespace.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Write as _;

use pbc_base::{Interner, Span, Symbol};
use pbc_syntax::ast::{BinOpKind, ClassDef, Expr, FstringPart, FunctionDef, Literal, Param, Program, Stmt, Type, UnaryOpKind};

use crate::check::ImportBinding;
use crate::diagnostic::CompileError;
use crate::loader::ModuleTable;

use super::runtime::ListOps;
use super::types::{c_type_name, escape_c_ident, list_suffix, mangled, to_c_type, CType, RuntimeUsage};

/// Everything the emitter needs about the module currently being generated,
/// plus enough of its neighbors (through `table`) to resolve an imported
/// call to the neighbor's mangled C symbol.
pub struct ModuleCtx<'a> {
    pub interner: &'a Interner,
    pub module_path: &'a [Symbol],
    pub module_prefix: String,
    pub classes: &'a HashMap<Symbol, &'a ClassDef>,
    pub functions: &'a HashMap<Symbol, &'a FunctionDef>,
    pub globals: &'a HashMap<Symbol, Type>,
    pub imports: &'a HashMap<Symbol, ImportBinding>,
    pub table: &'a ModuleTable,
}

type Locals = HashMap<Symbol, Type>;

fn internal(message: impl Into<String>, span: Span) -> CompileError {
    CompileError::Internal { message: message.into(), span: Some(span) }
}

/// Base fields followed by the class's own, in declaration order — the
/// generated struct flattens the whole chain into one body with no nested
/// `.base` member (see `generate_module`'s struct emission), so this order
/// is what fixes each field's offset and must match `ptr->field` access.
pub(crate) fn all_fields<'a>(class: &'a ClassDef, classes: &HashMap<Symbol, &'a ClassDef>) -> Vec<(Symbol, Type)> {
    let mut fields = match class.base.and_then(|b| classes.get(&b).copied()) {
        Some(base) => all_fields(base, classes),
        None => Vec::new(),
    };
    fields.extend(class.fields.iter().map(|f| (f.name, f.declared_type.clone())));
    fields
}

pub(crate) fn field_type(class: &ClassDef, classes: &HashMap<Symbol, &ClassDef>, field: Symbol) -> Option<Type> {
    if let Some(f) = class.fields.iter().find(|f| f.name == field) {
        return Some(f.declared_type.clone());
    }
    class.base.and_then(|b| classes.get(&b).copied()).and_then(|base| field_type(base, classes, field))
}

/// Walks the base chain to find which class actually defines `name`,
/// returning that class's own symbol (for method-name mangling) alongside
/// the definition.
pub(crate) fn find_method<'a>(
    class: &'a ClassDef,
    classes: &HashMap<Symbol, &'a ClassDef>,
    name: Symbol,
) -> Option<(Symbol, &'a FunctionDef)> {
    if let Some(m) = class.methods.iter().find(|m| m.name == name) {
        return Some((class.name, m));
    }
    let base = class.base?;
    find_method(classes.get(&base).copied()?, classes, name)
}

fn find_function_def(program: &Program, name: Symbol) -> Option<&FunctionDef> {
    program.stmts.iter().find_map(|s| match s {
        Stmt::FunctionDef(f) if f.name == name => Some(f),
        _ => None,
    })
}

fn find_var_decl(program: &Program, name: Symbol) -> Option<&pbc_syntax::ast::VarDecl> {
    program.stmts.iter().find_map(|s| match s {
        Stmt::VarDecl(v) if v.name == name => Some(v),
        _ => None,
    })
}

pub fn emit_expr(expr: &Expr, ctx: &ModuleCtx, locals: &Locals, usage: &mut RuntimeUsage) -> Result<(String, Type), CompileError> {
    match expr {
        Expr::Literal { value, span } => emit_literal(value, *span),
        Expr::Identifier { name, span } => {
            if let Some(ty) = locals.get(name) {
                return Ok((escape_c_ident(ctx.interner.resolve(*name)), ty.clone()));
            }
            let ty = ctx
                .globals
                .get(name)
                .cloned()
                .ok_or_else(|| internal(format!("unbound identifier '{}' during codegen", ctx.interner.resolve(*name)), *span))?;
            Ok((mangled(ctx.module_path, *name, ctx.interner), ty))
        }
        Expr::BinOp { left, op, right, span } => emit_binop(*op, left, right, *span, ctx, locals, usage),
        Expr::UnaryOp { op, operand, span } => {
            let (code, ty) = emit_expr(operand, ctx, locals, usage)?;
            match (op, &ty) {
                (UnaryOpKind::Neg, Type::Int) | (UnaryOpKind::Neg, Type::Float) => Ok((format!("(-{code})"), ty)),
                (UnaryOpKind::Not, Type::Bool) => Ok((format!("(!{code})"), Type::Bool)),
                _ => Err(internal("invalid operand to unary operator during codegen", *span)),
            }
        }
        Expr::List { elements, elem_type, span } => emit_list_literal(elements, elem_type, *span, ctx, locals, usage),
        Expr::Dict { span, .. } => Err(internal("Unsupported(DictExpr)", *span)),
        Expr::Index { base, index, elem_type, span } => emit_index(base, index, elem_type, *span, ctx, locals, usage),
        Expr::Attribute { obj, attr, span } => emit_attribute(obj, *attr, *span, ctx, locals, usage),
        Expr::Call { func, args, span } => emit_call(func, args, *span, ctx, locals, usage),
        Expr::Fstring { parts, span } => emit_fstring(parts, *span, ctx, locals, usage),
    }
}

fn emit_literal(value: &Literal, span: Span) -> Result<(String, Type), CompileError> {
    let _ = span;
    Ok(match value {
        Literal::Int(v) => (format!("INT64_C({v})"), Type::Int),
        Literal::Float(v) => (format_float_literal(*v), Type::Float),
        Literal::Bool(v) => ((if *v { "true" } else { "false" }).to_string(), Type::Bool),
        Literal::Str(s) => (format!("pb_string_from_cstr({})", c_string_literal(s)), Type::Str),
        Literal::None => ("NULL".to_string(), Type::None_),
    })
}

fn format_float_literal(v: f64) -> String {
    let s = format!("{v}");
    if s.contains('.') || s.contains('e') || s.contains("inf") || s.contains("nan") {
        s
    } else {
        format!("{s}.0")
    }
}

fn c_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn emit_binop(
    op: BinOpKind,
    left: &Expr,
    right: &Expr,
    span: Span,
    ctx: &ModuleCtx,
    locals: &Locals,
    usage: &mut RuntimeUsage,
) -> Result<(String, Type), CompileError> {
    use BinOpKind::*;
    let (lcode, lty) = emit_expr(left, ctx, locals, usage)?;
    let (rcode, rty) = emit_expr(right, ctx, locals, usage)?;
    match op {
        And => Ok((format!("({lcode} && {rcode})"), Type::Bool)),
        Or => Ok((format!("({lcode} || {rcode})"), Type::Bool)),
        Eq => {
            if lty == Type::Str || rty == Type::Str {
                Ok((format!("pb_string_eq({lcode}, {rcode})"), Type::Bool))
            } else {
                Ok((format!("({lcode} == {rcode})"), Type::Bool))
            }
        }
        NotEq => {
            if lty == Type::Str || rty == Type::Str {
                Ok((format!("(!pb_string_eq({lcode}, {rcode}))"), Type::Bool))
            } else {
                Ok((format!("({lcode} != {rcode})"), Type::Bool))
            }
        }
        Is => Ok((format!("({lcode} == {rcode})"), Type::Bool)),
        IsNot => Ok((format!("({lcode} != {rcode})"), Type::Bool)),
        Lt | LtEq | Gt | GtEq => {
            let c_op = match op {
                Lt => "<",
                LtEq => "<=",
                Gt => ">",
                GtEq => ">=",
                _ => unreachable!(),
            };
            if lty == Type::Str {
                Ok((format!("(pb_string_cmp({lcode}, {rcode}) {c_op} 0)"), Type::Bool))
            } else {
                Ok((format!("({lcode} {c_op} {rcode})"), Type::Bool))
            }
        }
        Add => match (&lty, &rty) {
            (Type::Str, Type::Str) => Ok((format!("pb_string_concat({lcode}, {rcode})"), Type::Str)),
            (Type::List(elem), Type::List(_)) => {
                let celem = to_c_type(elem);
                let suffix = list_suffix(&celem, ctx.interner);
                usage.note_type(&CType::List(Box::new(celem)), ctx.interner);
                let ops = ListOps::for_suffix(&suffix);
                Ok((format!("{}({lcode}, {rcode})", ops.concat_fn), lty.clone()))
            }
            _ => {
                let _ = span;
                Ok((format!("({lcode} + {rcode})"), lty.clone()))
            }
        },
        Sub => Ok((format!("({lcode} - {rcode})"), lty.clone())),
        Mul => Ok((format!("({lcode} * {rcode})"), lty.clone())),
        Div => {
            if lty == Type::Int {
                Ok((format!("((double)({lcode}) / (double)({rcode}))"), Type::Float))
            } else {
                Ok((format!("({lcode} / {rcode})"), Type::Float))
            }
        }
        FloorDiv => {
            let fname = if lty == Type::Int { "pb_floordiv_i64" } else { "pb_floordiv_f64" };
            Ok((format!("{fname}({lcode}, {rcode})"), lty.clone()))
        }
        Mod => {
            let fname = if lty == Type::Int { "pb_mod_i64" } else { "pb_mod_f64" };
            Ok((format!("{fname}({lcode}, {rcode})"), lty.clone()))
        }
    }
}

fn emit_list_literal(
    elements: &[Expr],
    elem_type: &RefCell<Option<Type>>,
    span: Span,
    ctx: &ModuleCtx,
    locals: &Locals,
    usage: &mut RuntimeUsage,
) -> Result<(String, Type), CompileError> {
    let elem = elem_type
        .borrow()
        .clone()
        .ok_or_else(|| internal("list element type missing after type check", span))?;
    let celem = to_c_type(&elem);
    let suffix = list_suffix(&celem, ctx.interner);
    usage.note_type(&CType::List(Box::new(celem.clone())), ctx.interner);
    let ops = ListOps::for_suffix(&suffix);
    let mut codes = Vec::with_capacity(elements.len());
    for e in elements {
        let (code, _) = emit_expr(e, ctx, locals, usage)?;
        codes.push(code);
    }
    let elem_c = c_type_name(&celem, ctx.interner, &ctx.module_prefix);
    let array = format!("({elem_c}[]){{{}}}", codes.join(", "));
    let code = format!("{}({}, {array})", ops.new_fn, elements.len());
    Ok((code, Type::List(Box::new(elem))))
}

fn emit_index(
    base: &Expr,
    index: &Expr,
    elem_type: &RefCell<Option<Type>>,
    span: Span,
    ctx: &ModuleCtx,
    locals: &Locals,
    usage: &mut RuntimeUsage,
) -> Result<(String, Type), CompileError> {
    let (bcode, _) = emit_expr(base, ctx, locals, usage)?;
    let (icode, _) = emit_expr(index, ctx, locals, usage)?;
    let elem = elem_type
        .borrow()
        .clone()
        .ok_or_else(|| internal("index element type missing after type check", span))?;
    let celem = to_c_type(&elem);
    let suffix = list_suffix(&celem, ctx.interner);
    usage.note_type(&CType::List(Box::new(celem.clone())), ctx.interner);
    let ops = ListOps::for_suffix(&suffix);
    let get_call = format!("{}({bcode}, {icode})", ops.get_fn);
    if suffix == "ptr" {
        let concrete = c_type_name(&celem, ctx.interner, &ctx.module_prefix);
        Ok((format!("(({concrete}){get_call})"), elem))
    } else {
        Ok((get_call, elem))
    }
}

fn emit_attribute(
    obj: &Expr,
    attr: Symbol,
    span: Span,
    ctx: &ModuleCtx,
    locals: &Locals,
    usage: &mut RuntimeUsage,
) -> Result<(String, Type), CompileError> {
    if let Expr::Identifier { name, .. } = obj {
        if let Some(ImportBinding::Module(path)) = ctx.imports.get(name) {
            let target = ctx
                .table
                .get(path)
                .ok_or_else(|| internal("unresolved module import during codegen", span))?;
            let decl = find_var_decl(&target.program, attr)
                .ok_or_else(|| internal("unresolved cross-module variable during codegen", span))?;
            let c_name = mangled(path, attr, ctx.interner);
            return Ok((c_name, decl.declared_type.clone()));
        }
    }
    let (obj_code, obj_ty) = emit_expr(obj, ctx, locals, usage)?;
    match &obj_ty {
        Type::Class(sym) => {
            let class = ctx.classes.get(sym).copied().ok_or_else(|| internal("unknown class during codegen", span))?;
            let ty = field_type(class, ctx.classes, attr).ok_or_else(|| internal("unknown field during codegen", span))?;
            let field_name = escape_c_ident(ctx.interner.resolve(attr));
            Ok((format!("{obj_code}->{field_name}"), ty))
        }
        _ => Err(internal("attribute access on non-class value during codegen", span)),
    }
}

/// Lowers an assignment/aug-assignment target plus its already-lowered
/// value expression into a full C statement (minus the trailing `;`).
/// Mirrors `emit_expr`'s handling of the same three target shapes
/// (`Identifier`, `Attribute`, `Index`) but produces an lvalue or a
/// `pb_list_*_set` call instead of a read.
fn emit_assign_to_target(
    target: &Expr,
    value_code: &str,
    ctx: &ModuleCtx,
    locals: &Locals,
    usage: &mut RuntimeUsage,
) -> Result<String, CompileError> {
    match target {
        Expr::Identifier { name, .. } => {
            let c_name = if locals.contains_key(name) {
                escape_c_ident(ctx.interner.resolve(*name))
            } else {
                mangled(ctx.module_path, *name, ctx.interner)
            };
            Ok(format!("{c_name} = {value_code}"))
        }
        Expr::Attribute { obj, attr, span } => {
            if let Expr::Identifier { name, .. } = obj.as_ref() {
                if let Some(ImportBinding::Module(path)) = ctx.imports.get(name) {
                    let module_target = ctx
                        .table
                        .get(path)
                        .ok_or_else(|| internal("unresolved module import during codegen", *span))?;
                    find_var_decl(&module_target.program, *attr)
                        .ok_or_else(|| internal("unresolved cross-module variable during codegen", *span))?;
                    let c_name = mangled(path, *attr, ctx.interner);
                    return Ok(format!("{c_name} = {value_code}"));
                }
            }
            let (obj_code, _) = emit_expr(obj, ctx, locals, usage)?;
            let field_name = escape_c_ident(ctx.interner.resolve(*attr));
            Ok(format!("{obj_code}->{field_name} = {value_code}"))
        }
        Expr::Index { base, index, elem_type, span } => {
            let (bcode, _) = emit_expr(base, ctx, locals, usage)?;
            let (icode, _) = emit_expr(index, ctx, locals, usage)?;
            let elem = elem_type
                .borrow()
                .clone()
                .ok_or_else(|| internal("index element type missing after type check", *span))?;
            let celem = to_c_type(&elem);
            let suffix = list_suffix(&celem, ctx.interner);
            usage.note_type(&CType::List(Box::new(celem)), ctx.interner);
            let ops = ListOps::for_suffix(&suffix);
            Ok(format!("{}({bcode}, {icode}, {value_code})", ops.set_fn))
        }
        _ => Err(internal("unsupported assignment target during codegen", target.span())),
    }
}

fn emit_call(func: &Expr, args: &[Expr], span: Span, ctx: &ModuleCtx, locals: &Locals, usage: &mut RuntimeUsage) -> Result<(String, Type), CompileError> {
    match func {
        Expr::Identifier { name, span: fspan } => emit_identifier_call(*name, *fspan, args, span, ctx, locals, usage),
        Expr::Attribute { obj, attr, span: aspan } => emit_attribute_call(obj, *attr, *aspan, args, span, ctx, locals, usage),
        _ => Err(internal("unsupported call target during codegen", span)),
    }
}

fn emit_positional_call(
    callee: &str,
    params: &[Param],
    args: &[Expr],
    ctx: &ModuleCtx,
    locals: &Locals,
    usage: &mut RuntimeUsage,
) -> Result<String, CompileError> {
    let mut codes = Vec::with_capacity(params.len());
    for (i, p) in params.iter().enumerate() {
        if i < args.len() {
            let (code, _) = emit_expr(&args[i], ctx, locals, usage)?;
            codes.push(code);
        } else if let Some(default) = &p.default {
            let (code, _) = emit_expr(default, ctx, locals, usage)?;
            codes.push(code);
        } else {
            return Err(internal("missing required argument during codegen", p.span));
        }
    }
    Ok(format!("{callee}({})", codes.join(", ")))
}

fn emit_identifier_call(
    name: Symbol,
    fspan: Span,
    args: &[Expr],
    span: Span,
    ctx: &ModuleCtx,
    locals: &Locals,
    usage: &mut RuntimeUsage,
) -> Result<(String, Type), CompileError> {
    let raw = ctx.interner.resolve(name);
    let shadowed = ctx.functions.contains_key(&name) || ctx.classes.contains_key(&name);
    if !shadowed {
        if let Some(result) = emit_builtin_call(raw, args, span, ctx, locals, usage)? {
            return Ok(result);
        }
    }
    if ctx.classes.contains_key(&name) {
        let ctor = format!("{}_{}_new", ctx.module_prefix, escape_c_ident(raw));
        let mut codes = Vec::with_capacity(args.len());
        for a in args {
            let (code, _) = emit_expr(a, ctx, locals, usage)?;
            codes.push(code);
        }
        return Ok((format!("{ctor}({})", codes.join(", ")), Type::Class(name)));
    }
    if let Some(def) = ctx.functions.get(&name).copied() {
        let callee = mangled(ctx.module_path, name, ctx.interner);
        let call = emit_positional_call(&callee, &def.params, args, ctx, locals, usage)?;
        return Ok((call, def.return_type.clone().unwrap_or(Type::None_)));
    }
    if let Some(ImportBinding::Name { module, original }) = ctx.imports.get(&name) {
        let target = ctx
            .table
            .get(module)
            .ok_or_else(|| internal("unresolved module import during codegen", fspan))?;
        let def = find_function_def(&target.program, *original)
            .ok_or_else(|| internal("unresolved cross-module function during codegen", fspan))?;
        let callee = if target.is_native() {
            escape_c_ident(ctx.interner.resolve(*original))
        } else {
            mangled(module, *original, ctx.interner)
        };
        let call = emit_positional_call(&callee, &def.params, args, ctx, locals, usage)?;
        return Ok((call, def.return_type.clone().unwrap_or(Type::None_)));
    }
    Err(internal(format!("undefined callee '{raw}' during codegen"), fspan))
}

fn emit_attribute_call(
    obj: &Expr,
    attr: Symbol,
    aspan: Span,
    args: &[Expr],
    span: Span,
    ctx: &ModuleCtx,
    locals: &Locals,
    usage: &mut RuntimeUsage,
) -> Result<(String, Type), CompileError> {
    if let Expr::Identifier { name, .. } = obj {
        if let Some(ImportBinding::Module(path)) = ctx.imports.get(name) {
            let target = ctx
                .table
                .get(path)
                .ok_or_else(|| internal("unresolved module import during codegen", aspan))?;
            let def = find_function_def(&target.program, attr)
                .ok_or_else(|| internal("unresolved cross-module function during codegen", aspan))?;
            let callee = if target.is_native() {
                escape_c_ident(ctx.interner.resolve(attr))
            } else {
                mangled(path, attr, ctx.interner)
            };
            let call = emit_positional_call(&callee, &def.params, args, ctx, locals, usage)?;
            return Ok((call, def.return_type.clone().unwrap_or(Type::None_)));
        }
    }

    let (obj_code, obj_ty) = emit_expr(obj, ctx, locals, usage)?;
    if let Type::Class(sym) = &obj_ty {
        let class = ctx.classes.get(sym).copied().ok_or_else(|| internal("unknown class during codegen", span))?;
        let (owner, method_def) =
            find_method(class, ctx.classes, attr).ok_or_else(|| internal("unresolved method during codegen", span))?;
        let callee = format!(
            "{}_{}_{}",
            ctx.module_prefix,
            escape_c_ident(ctx.interner.resolve(owner)),
            escape_c_ident(ctx.interner.resolve(attr))
        );
        let declared_params = &method_def.params[1.min(method_def.params.len())..];
        let mut codes = Vec::with_capacity(1 + args.len());
        codes.push(obj_code);
        for (i, p) in declared_params.iter().enumerate() {
            if i < args.len() {
                let (code, _) = emit_expr(&args[i], ctx, locals, usage)?;
                codes.push(code);
            } else if let Some(default) = &p.default {
                let (code, _) = emit_expr(default, ctx, locals, usage)?;
                codes.push(code);
            } else {
                return Err(internal("missing required argument during codegen", p.span));
            }
        }
        return Ok((format!("{callee}({})", codes.join(", ")), method_def.return_type.clone().unwrap_or(Type::None_)));
    }
    Err(internal("call target is not callable during codegen", span))
}

fn emit_builtin_call(
    name: &str,
    args: &[Expr],
    span: Span,
    ctx: &ModuleCtx,
    locals: &Locals,
    usage: &mut RuntimeUsage,
) -> Result<Option<(String, Type)>, CompileError> {
    Ok(Some(match name {
        "print" => {
            if args.len() != 1 {
                return Err(internal("print expects exactly one argument during codegen", span));
            }
            let (code, ty) = emit_expr(&args[0], ctx, locals, usage)?;
            let fname = match &ty {
                Type::Int => "print_i64",
                Type::Float => "print_f64",
                Type::Bool => "print_bool",
                Type::Str => "print_str",
                Type::List(elem) => {
                    let celem = to_c_type(elem);
                    let suffix = list_suffix(&celem, ctx.interner);
                    usage.note_type(&CType::List(Box::new(celem)), ctx.interner);
                    let ops = ListOps::for_suffix(&suffix);
                    return Ok(Some((format!("print_str({}({code}))", ops.to_str_fn), Type::None_)));
                }
                Type::Class(_) | Type::None_ | Type::Range | Type::File => {
                    return Err(internal("print does not support this value's type during codegen", span));
                }
            };
            (format!("{fname}({code})"), Type::None_)
        }
        "range" => {
            usage.uses_range_value = true;
            match args.len() {
                1 => {
                    let (stop, _) = emit_expr(&args[0], ctx, locals, usage)?;
                    (format!("pb_range_new(0, {stop})"), Type::Range)
                }
                2 => {
                    let (start, _) = emit_expr(&args[0], ctx, locals, usage)?;
                    let (stop, _) = emit_expr(&args[1], ctx, locals, usage)?;
                    (format!("pb_range_new({start}, {stop})"), Type::Range)
                }
                _ => return Err(internal("range expects one or two arguments during codegen", span)),
            }
        }
        "len" => {
            if args.len() != 1 {
                return Err(internal("len expects exactly one argument during codegen", span));
            }
            let (code, ty) = emit_expr(&args[0], ctx, locals, usage)?;
            match ty {
                Type::Str => (format!("pb_string_len({code})"), Type::Int),
                Type::List(elem) => {
                    let celem = to_c_type(&elem);
                    let suffix = list_suffix(&celem, ctx.interner);
                    usage.note_type(&CType::List(Box::new(celem)), ctx.interner);
                    let ops = ListOps::for_suffix(&suffix);
                    (format!("{}({code})", ops.len_fn), Type::Int)
                }
                _ => return Err(internal("len does not support this value's type during codegen", span)),
            }
        }
        "int" => {
            if args.len() != 1 {
                return Err(internal("int expects exactly one argument during codegen", span));
            }
            let (code, ty) = emit_expr(&args[0], ctx, locals, usage)?;
            (int_cast(&code, &ty, span)?, Type::Int)
        }
        "float" => {
            if args.len() != 1 {
                return Err(internal("float expects exactly one argument during codegen", span));
            }
            let (code, ty) = emit_expr(&args[0], ctx, locals, usage)?;
            (float_cast(&code, &ty, span)?, Type::Float)
        }
        "bool" => {
            if args.len() != 1 {
                return Err(internal("bool expects exactly one argument during codegen", span));
            }
            let (code, ty) = emit_expr(&args[0], ctx, locals, usage)?;
            (bool_cast(&code, &ty, span)?, Type::Bool)
        }
        "str" => {
            if args.len() != 1 {
                return Err(internal("str expects exactly one argument during codegen", span));
            }
            let (code, ty) = emit_expr(&args[0], ctx, locals, usage)?;
            (to_str_call(&code, &ty, ctx, usage, span)?, Type::Str)
        }
        "open" => {
            usage.uses_file_io = true;
            if args.len() != 1 {
                return Err(internal("open expects exactly one argument during codegen", span));
            }
            let (code, _) = emit_expr(&args[0], ctx, locals, usage)?;
            (format!("pb_file_open({code})"), Type::File)
        }
        _ => return Ok(None),
    }))
}

fn int_cast(code: &str, ty: &Type, span: Span) -> Result<String, CompileError> {
    Ok(match ty {
        Type::Int => code.to_string(),
        Type::Float | Type::Bool => format!("(int64_t)({code})"),
        Type::Str => format!("pb_str_to_i64({code})"),
        _ => return Err(internal("cannot convert this value to int during codegen", span)),
    })
}

fn float_cast(code: &str, ty: &Type, span: Span) -> Result<String, CompileError> {
    Ok(match ty {
        Type::Float => code.to_string(),
        Type::Int | Type::Bool => format!("(double)({code})"),
        Type::Str => format!("pb_str_to_f64({code})"),
        _ => return Err(internal("cannot convert this value to float during codegen", span)),
    })
}

fn bool_cast(code: &str, ty: &Type, span: Span) -> Result<String, CompileError> {
    Ok(match ty {
        Type::Bool => code.to_string(),
        Type::Int => format!("({code} != 0)"),
        Type::Float => format!("({code} != 0.0)"),
        Type::Str => format!("(pb_string_len({code}) != 0)"),
        _ => return Err(internal("cannot convert this value to bool during codegen", span)),
    })
}

fn to_str_call(code: &str, ty: &Type, ctx: &ModuleCtx, usage: &mut RuntimeUsage, span: Span) -> Result<String, CompileError> {
    Ok(match ty {
        Type::Int => format!("pb_to_str_i64({code})"),
        Type::Float => format!("pb_to_str_f64({code})"),
        Type::Bool => format!("pb_to_str_bool({code})"),
        Type::Str => code.to_string(),
        Type::List(elem) => {
            let celem = to_c_type(elem);
            let suffix = list_suffix(&celem, ctx.interner);
            usage.note_type(&CType::List(Box::new(celem)), ctx.interner);
            format!("{}({code})", ListOps::for_suffix(&suffix).to_str_fn)
        }
        Type::Class(_) | Type::None_ | Type::Range | Type::File => {
            return Err(internal("value has no string representation during codegen", span));
        }
    })
}

fn emit_fstring(parts: &[FstringPart], span: Span, ctx: &ModuleCtx, locals: &Locals, usage: &mut RuntimeUsage) -> Result<(String, Type), CompileError> {
    let _ = span;
    let mut acc: Option<String> = None;
    for part in parts {
        let piece = match part {
            FstringPart::Literal(text) => format!("pb_string_from_cstr({})", c_string_literal(text)),
            FstringPart::Expr(e) => {
                let (code, ty) = emit_expr(e, ctx, locals, usage)?;
                to_str_call(&code, &ty, ctx, usage, e.span())?
            }
        };
        acc = Some(match acc {
            Some(prev) => format!("pb_string_concat({prev}, {piece})"),
            None => piece,
        });
    }
    Ok((acc.unwrap_or_else(|| "pb_string_from_cstr(\"\")".to_string()), Type::Str))
}

/// A `def`/method body is a flat statement list with no block scoping (same
/// as the checker's [`super::super::check::Scope`]); `locals` accumulates
/// every `VarDecl`/`for`-binding seen so far exactly the way the checker's
/// pass does.
pub fn emit_block(stmts: &[Stmt], ctx: &ModuleCtx, locals: &mut Locals, usage: &mut RuntimeUsage, indent: usize, out: &mut String) -> Result<(), CompileError> {
    for s in stmts {
        emit_stmt(s, ctx, locals, usage, indent, out)?;
    }
    Ok(())
}

fn pad(indent: usize) -> String {
    "    ".repeat(indent)
}

fn emit_stmt(stmt: &Stmt, ctx: &ModuleCtx, locals: &mut Locals, usage: &mut RuntimeUsage, indent: usize, out: &mut String) -> Result<(), CompileError> {
    let ind = pad(indent);
    match stmt {
        Stmt::VarDecl(v) => {
            let (code, _) = emit_expr(&v.value, ctx, locals, usage)?;
            let cty = to_c_type(&v.declared_type);
            usage.note_type(&cty, ctx.interner);
            let c_name = escape_c_ident(ctx.interner.resolve(v.name));
            let c_type = c_type_name(&cty, ctx.interner, &ctx.module_prefix);
            let _ = writeln!(out, "{ind}{c_type} {c_name} = {code};");
            locals.insert(v.name, v.declared_type.clone());
        }
        Stmt::Assign { target, value, .. } => {
            let (vcode, _) = emit_expr(value, ctx, locals, usage)?;
            let stmt_code = emit_assign_to_target(target, &vcode, ctx, locals, usage)?;
            let _ = writeln!(out, "{ind}{stmt_code};");
        }
        // Re-lowers as `target = target <op> value` rather than a C
        // compound-assignment operator, since the operator may need a
        // runtime call (string/list concatenation). Evaluates an `Index`/
        // `Attribute` target's base subexpression twice; acceptable since
        // PB has no expression forms with observable side effects.
        Stmt::AugAssign { target, op, value, span } => {
            let combined = Expr::BinOp {
                left: Box::new(target.clone()),
                op: *op,
                right: Box::new(value.clone()),
                span: *span,
            };
            let (vcode, _) = emit_expr(&combined, ctx, locals, usage)?;
            let stmt_code = emit_assign_to_target(target, &vcode, ctx, locals, usage)?;
            let _ = writeln!(out, "{ind}{stmt_code};");
        }
        Stmt::Return { value, .. } => match value {
            Some(e) => {
                let (code, _) = emit_expr(e, ctx, locals, usage)?;
                let _ = writeln!(out, "{ind}return {code};");
            }
            None => {
                let _ = writeln!(out, "{ind}return;");
            }
        },
        Stmt::If { condition, then_body, else_body, .. } => {
            let (ccode, _) = emit_expr(condition, ctx, locals, usage)?;
            let _ = writeln!(out, "{ind}if ({ccode}) {{");
            emit_block(then_body, ctx, locals, usage, indent + 1, out)?;
            match else_body {
                Some(body) => {
                    let _ = writeln!(out, "{ind}}} else {{");
                    emit_block(body, ctx, locals, usage, indent + 1, out)?;
                    let _ = writeln!(out, "{ind}}}");
                }
                None => {
                    let _ = writeln!(out, "{ind}}}");
                }
            }
        }
        Stmt::While { condition, body, .. } => {
            let (ccode, _) = emit_expr(condition, ctx, locals, usage)?;
            let _ = writeln!(out, "{ind}while ({ccode}) {{");
            emit_block(body, ctx, locals, usage, indent + 1, out)?;
            let _ = writeln!(out, "{ind}}}");
        }
        Stmt::For { var_name, iterable, body, span } => {
            emit_for(*var_name, iterable, body, *span, ctx, locals, usage, indent, out)?
        }
        Stmt::Assert { condition, .. } => {
            let (ccode, _) = emit_expr(condition, ctx, locals, usage)?;
            let _ = writeln!(out, "{ind}if (!({ccode})) {{ pb_raise(pb_string_from_cstr(\"assertion failed\")); }}");
        }
        Stmt::Global { .. } | Stmt::Pass { .. } => {}
        Stmt::Break { .. } => {
            let _ = writeln!(out, "{ind}break;");
        }
        Stmt::Continue { .. } => {
            let _ = writeln!(out, "{ind}continue;");
        }
        Stmt::Expr { expr, .. } => {
            let (code, _) = emit_expr(expr, ctx, locals, usage)?;
            let _ = writeln!(out, "{ind}{code};");
        }
        // top-level defs are handled by `generate_module`; PB has no nested
        // function/class statements reaching this position.
        Stmt::FunctionDef(_) | Stmt::ClassDef(_) => {}
        Stmt::Import { .. } | Stmt::ImportFrom { .. } => {}
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn emit_for(
    var_name: Symbol,
    iterable: &Expr,
    body: &[Stmt],
    span: Span,
    ctx: &ModuleCtx,
    locals: &mut Locals,
    usage: &mut RuntimeUsage,
    indent: usize,
    out: &mut String,
) -> Result<(), CompileError> {
    let ind = pad(indent);
    let (icode, ity) = emit_expr(iterable, ctx, locals, usage)?;
    let var_c = escape_c_ident(ctx.interner.resolve(var_name));
    match ity {
        Type::Range => {
            usage.uses_range_value = true;
            let _ = writeln!(out, "{ind}{{");
            let _ = writeln!(out, "{ind}    pb_range __pb_range = {icode};");
            let _ = writeln!(out, "{ind}    for (int64_t {var_c} = __pb_range.start; {var_c} < __pb_range.stop; {var_c}++) {{");
            locals.insert(var_name, Type::Int);
            emit_block(body, ctx, locals, usage, indent + 2, out)?;
            let _ = writeln!(out, "{ind}    }}");
            let _ = writeln!(out, "{ind}}}");
            Ok(())
        }
        Type::List(elem) => {
            let celem = to_c_type(&elem);
            let suffix = list_suffix(&celem, ctx.interner);
            usage.note_type(&CType::List(Box::new(celem.clone())), ctx.interner);
            let elem_c = c_type_name(&celem, ctx.interner, &ctx.module_prefix);
            let ops = ListOps::for_suffix(&suffix);
            let _ = writeln!(out, "{ind}{{");
            let _ = writeln!(out, "{ind}    pb_list_{suffix} *__pb_list = {icode};");
            let _ = writeln!(
                out,
                "{ind}    for (int64_t __pb_idx = 0; __pb_idx < {}(__pb_list); __pb_idx++) {{",
                ops.len_fn
            );
            let get_expr = format!("{}(__pb_list, __pb_idx)", ops.get_fn);
            let value_expr = if suffix == "ptr" { format!("(({elem_c}){get_expr})") } else { get_expr };
            let _ = writeln!(out, "{ind}        {elem_c} {var_c} = {value_expr};");
            locals.insert(var_name, *elem);
            emit_block(body, ctx, locals, usage, indent + 2, out)?;
            let _ = writeln!(out, "{ind}    }}");
            let _ = writeln!(out, "{ind}}}");
            Ok(())
        }
        _ => Err(internal("for-loop over non-iterable during codegen", span)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbc_base::Span;

    fn ctx<'a>(
        interner: &'a Interner,
        classes: &'a HashMap<Symbol, &'a ClassDef>,
        functions: &'a HashMap<Symbol, &'a FunctionDef>,
        globals: &'a HashMap<Symbol, Type>,
        imports: &'a HashMap<Symbol, ImportBinding>,
        table: &'a ModuleTable,
        module_path: &'a [Symbol],
    ) -> ModuleCtx<'a> {
        ModuleCtx {
            interner,
            module_path,
            module_prefix: "m".to_string(),
            classes,
            functions,
            globals,
            imports,
            table,
        }
    }

    #[test]
    fn emits_int_literal_as_explicitly_sized_constant() {
        let interner = Interner::new();
        let span = Span::new(0, 1);
        let expr = Expr::Literal { value: Literal::Int(7), span };
        let (code, ty) = emit_literal_for_test(&expr, &interner);
        assert_eq!(code, "INT64_C(7)");
        assert_eq!(ty, Type::Int);
    }

    fn emit_literal_for_test(expr: &Expr, _interner: &Interner) -> (String, Type) {
        match expr {
            Expr::Literal { value, span } => emit_literal(value, *span).unwrap(),
            _ => panic!("not a literal"),
        }
    }

    #[test]
    fn string_concat_binop_dispatches_to_runtime_call() {
        let mut interner = Interner::new();
        let a = interner.intern("a");
        let b = interner.intern("b");
        let classes = HashMap::new();
        let functions = HashMap::new();
        let mut globals = HashMap::new();
        globals.insert(a, Type::Str);
        globals.insert(b, Type::Str);
        let imports = HashMap::new();
        let table = ModuleTable::default();
        let module_path: Vec<Symbol> = vec![];
        let c = ctx(&interner, &classes, &functions, &globals, &imports, &table, &module_path);
        let locals = Locals::new();
        let span = Span::new(0, 1);
        let left = Expr::Identifier { name: a, span };
        let right = Expr::Identifier { name: b, span };
        let mut usage = RuntimeUsage::default();
        let (code, ty) = emit_binop(BinOpKind::Add, &left, &right, span, &c, &locals, &mut usage).unwrap();
        assert_eq!(ty, Type::Str);
        assert!(code.starts_with("pb_string_concat("));
    }

    #[test]
    fn int_division_always_produces_float_cast_expression() {
        let interner = Interner::new();
        let classes = HashMap::new();
        let functions = HashMap::new();
        let globals = HashMap::new();
        let imports = HashMap::new();
        let table = ModuleTable::default();
        let module_path: Vec<Symbol> = vec![];
        let c = ctx(&interner, &classes, &functions, &globals, &imports, &table, &module_path);
        let locals = Locals::new();
        let span = Span::new(0, 1);
        let left = Expr::Literal { value: Literal::Int(7), span };
        let right = Expr::Literal { value: Literal::Int(2), span };
        let mut usage = RuntimeUsage::default();
        let (code, ty) = emit_binop(BinOpKind::Div, &left, &right, span, &c, &locals, &mut usage).unwrap();
        assert_eq!(ty, Type::Float);
        assert!(code.contains("(double)"));
    }

    #[test]
    fn print_call_on_list_formats_through_list_to_str() {
        let interner = Interner::new();
        let classes = HashMap::new();
        let functions = HashMap::new();
        let mut globals = HashMap::new();
        let name = {
            let mut i = Interner::new();
            i.intern("xs")
        };
        globals.insert(name, Type::List(Box::new(Type::Int)));
        let imports = HashMap::new();
        let table = ModuleTable::default();
        let module_path: Vec<Symbol> = vec![];
        let c = ctx(&interner, &classes, &functions, &globals, &imports, &table, &module_path);
        let locals = Locals::new();
        let span = Span::new(0, 1);
        let arg = Expr::Identifier { name, span };
        let mut usage = RuntimeUsage::default();
        let result = emit_builtin_call("print", std::slice::from_ref(&arg), span, &c, &locals, &mut usage);
        assert!(result.is_ok());
    }
}
