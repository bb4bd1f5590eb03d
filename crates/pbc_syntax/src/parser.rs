//! Recursive-descent parser for PB source.
//!
//! Mirrors the reference parser's `current`/`advance`/`check`/`match_tok`/
//! `expect` vocabulary (translated from `Option<Token>` returns instead of
//! `None`-sentinel booleans), generalized to also parse `list[T]` type
//! annotations, default parameter values, and import statements — none of
//! which the reference grammar's `parser.py` actually reads, despite the
//! specification requiring all three. The reference *is* followed exactly
//! for assignment-target validation, class-body shape, and elif-desugaring.
//!
//! The parser reports the first error it meets and aborts; there is no
//! resynchronisation (spec.md §4.2 "Error policy").

use crate::ast::*;
use crate::token::{LiteralValue, Token, TokenKind};
use pbc_base::{Interner, Span};
use std::cell::RefCell;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    UnexpectedToken {
        expected: String,
        found: TokenKind,
        line: u32,
    },
    TopLevelRestriction {
        line: u32,
    },
    MissingInitializer {
        line: u32,
    },
    InvalidAssignmentTarget {
        line: u32,
    },
    NestedFunctionDef {
        line: u32,
    },
    MalformedClassBody {
        message: String,
        line: u32,
    },
    UnsupportedConstruct {
        construct: &'static str,
        line: u32,
    },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedToken { expected, found, line } => {
                write!(f, "expected {expected} but found {found:?} at line {line}")
            }
            ParseError::TopLevelRestriction { line } => write!(
                f,
                "only function definitions, class definitions, imports, and typed variable \
                 declarations are allowed at the top level (line {line})"
            ),
            ParseError::MissingInitializer { line } => {
                write!(f, "variable declaration must include an initializer (line {line})")
            }
            ParseError::InvalidAssignmentTarget { line } => {
                write!(f, "invalid assignment target at line {line}")
            }
            ParseError::NestedFunctionDef { line } => {
                write!(f, "nested function definitions are not allowed (line {line})")
            }
            ParseError::MalformedClassBody { message, line } => {
                write!(f, "{message} (line {line})")
            }
            ParseError::UnsupportedConstruct { construct, line } => write!(
                f,
                "'{construct}' is recognized but not supported by this compiler (line {line})"
            ),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parses a complete token stream (as produced by [`crate::lexer::tokenize`])
/// into a [`Program`].
pub fn parse(tokens: &[Token], interner: &Interner) -> Result<Program, ParseError> {
    Parser::new(tokens, interner).parse_program()
}

struct Parser<'a> {
    tokens: &'a [Token],
    interner: &'a Interner,
    pos: usize,
    in_function_body: bool,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], interner: &'a Interner) -> Self {
        Parser {
            tokens,
            interner,
            pos: 0,
            in_function_body: false,
        }
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self, offset: usize) -> Option<TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| t.kind)
    }

    fn advance(&mut self) -> Token {
        let tok = self.current().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn match_tok(&mut self, kind: TokenKind) -> Option<Token> {
        if self.check(kind) {
            Some(self.advance())
        } else {
            None
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, ParseError> {
        self.match_tok(kind).ok_or_else(|| ParseError::UnexpectedToken {
            expected: format!("{kind:?}"),
            found: self.current().kind,
            line: self.current().line,
        })
    }

    fn line(&self) -> u32 {
        self.current().line
    }

    // ───────────────────────── top level ─────────────────────────

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut stmts = Vec::new();
        while !self.check(TokenKind::Eof) {
            stmts.push(self.parse_global_stmt()?);
        }
        Ok(Program { stmts, module_name: Vec::new() })
    }

    fn parse_global_stmt(&mut self) -> Result<Stmt, ParseError> {
        if self.match_tok(TokenKind::Def).is_some() {
            return Ok(Stmt::FunctionDef(self.parse_function()?));
        }
        if self.match_tok(TokenKind::Class).is_some() {
            return Ok(Stmt::ClassDef(self.parse_class_def()?));
        }
        if self.match_tok(TokenKind::Import).is_some() {
            return self.parse_import();
        }
        if self.match_tok(TokenKind::From).is_some() {
            return self.parse_import_from();
        }
        if self.check(TokenKind::Identifier) && self.peek_kind(1) == Some(TokenKind::Colon) {
            return self.parse_vardecl_stmt();
        }
        Err(ParseError::TopLevelRestriction { line: self.line() })
    }

    // ───────────────────────── statements ─────────────────────────

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        if self.check(TokenKind::Def) {
            if self.in_function_body {
                return Err(ParseError::NestedFunctionDef { line: self.line() });
            }
            self.advance();
            return Ok(Stmt::FunctionDef(self.parse_function()?));
        }
        if self.match_tok(TokenKind::Class).is_some() {
            return Ok(Stmt::ClassDef(self.parse_class_def()?));
        }
        if self.check(TokenKind::Try) || self.check(TokenKind::Raise) {
            let construct = if self.check(TokenKind::Try) { "try" } else { "raise" };
            return Err(ParseError::UnsupportedConstruct { construct, line: self.line() });
        }
        if let Some(tok) = self.match_tok(TokenKind::Return) {
            if self.check(TokenKind::Newline) {
                self.advance();
                return Ok(Stmt::Return { value: None, span: tok.span });
            }
            let value = self.parse_expr()?;
            let end = self.expect(TokenKind::Newline)?;
            return Ok(Stmt::Return {
                value: Some(value),
                span: tok.span.merge(end.span),
            });
        }
        if let Some(tok) = self.match_tok(TokenKind::Global) {
            let mut names = Vec::new();
            loop {
                names.push(self.expect(TokenKind::Identifier)?.lexeme);
                if self.match_tok(TokenKind::Comma).is_none() {
                    break;
                }
            }
            let end = self.expect(TokenKind::Newline)?;
            return Ok(Stmt::Global {
                names,
                span: tok.span.merge(end.span),
            });
        }
        if self.match_tok(TokenKind::If).is_some() {
            return self.parse_if();
        }
        if self.match_tok(TokenKind::While).is_some() {
            return self.parse_while();
        }
        if self.match_tok(TokenKind::For).is_some() {
            return self.parse_for();
        }
        if let Some(tok) = self.match_tok(TokenKind::Break) {
            let end = self.expect(TokenKind::Newline)?;
            return Ok(Stmt::Break { span: tok.span.merge(end.span) });
        }
        if let Some(tok) = self.match_tok(TokenKind::Continue) {
            let end = self.expect(TokenKind::Newline)?;
            return Ok(Stmt::Continue { span: tok.span.merge(end.span) });
        }
        if self.match_tok(TokenKind::Assert).is_some() {
            return self.parse_assert();
        }
        if let Some(tok) = self.match_tok(TokenKind::Pass) {
            let end = self.expect(TokenKind::Newline)?;
            return Ok(Stmt::Pass { span: tok.span.merge(end.span) });
        }
        if self.check(TokenKind::Identifier) {
            if self.peek_kind(1) == Some(TokenKind::Colon) {
                return self.parse_vardecl_stmt();
            }
            let expr = self.parse_postfix()?;
            return self.finish_expr_stmt(expr);
        }
        Err(ParseError::UnexpectedToken {
            expected: "a statement".to_string(),
            found: self.current().kind,
            line: self.line(),
        })
    }

    fn finish_expr_stmt(&mut self, expr: Expr) -> Result<Stmt, ParseError> {
        if self.check(TokenKind::Assign) {
            return self.finish_assignment(expr);
        }
        if let Some(op) = aug_assign_op(self.current().kind) {
            return self.finish_aug_assignment(expr, op);
        }
        let end = self.expect(TokenKind::Newline)?;
        let span = expr.span().merge(end.span);
        Ok(Stmt::Expr { expr, span })
    }

    fn finish_assignment(&mut self, target: Expr) -> Result<Stmt, ParseError> {
        if !target.is_assignable() {
            return Err(ParseError::InvalidAssignmentTarget { line: self.line() });
        }
        self.expect(TokenKind::Assign)?;
        let value = self.parse_expr()?;
        let end = self.expect(TokenKind::Newline)?;
        let span = target.span().merge(end.span);
        Ok(Stmt::Assign { target, value, span })
    }

    fn finish_aug_assignment(&mut self, target: Expr, op: BinOpKind) -> Result<Stmt, ParseError> {
        if !target.is_assignable() {
            return Err(ParseError::InvalidAssignmentTarget { line: self.line() });
        }
        self.advance(); // the compound-assignment operator token
        let value = self.parse_expr()?;
        let end = self.expect(TokenKind::Newline)?;
        let span = target.span().merge(end.span);
        Ok(Stmt::AugAssign { target, op, value, span })
    }

    fn parse_assert(&mut self) -> Result<Stmt, ParseError> {
        let condition = self.parse_expr()?;
        let end = self.expect(TokenKind::Newline)?;
        let span = condition.span().merge(end.span);
        Ok(Stmt::Assert { condition, span })
    }

    fn parse_vardecl_stmt(&mut self) -> Result<Stmt, ParseError> {
        Ok(Stmt::VarDecl(self.parse_vardecl_inner()?))
    }

    fn parse_vardecl_inner(&mut self) -> Result<VarDecl, ParseError> {
        let name_tok = self.expect(TokenKind::Identifier)?;
        self.expect(TokenKind::Colon)?;
        let declared_type = self.parse_type()?;
        if self.match_tok(TokenKind::Assign).is_none() {
            return Err(ParseError::MissingInitializer { line: self.line() });
        }
        let value = self.parse_expr()?;
        let end = self.expect(TokenKind::Newline)?;
        let span = name_tok.span.merge(end.span);
        Ok(VarDecl {
            name: name_tok.lexeme,
            declared_type,
            value,
            span,
        })
    }

    /// Parses a type annotation: a primitive/class name, or `list[T]`.
    fn parse_type(&mut self) -> Result<Type, ParseError> {
        let tok = self.expect(TokenKind::Identifier)?;
        if self.interner.resolve(tok.lexeme) == "list" {
            self.expect(TokenKind::LBracket)?;
            let inner = self.parse_type()?;
            self.expect(TokenKind::RBracket)?;
            return Ok(Type::List(Box::new(inner)));
        }
        Ok(Type::from_name(tok.lexeme, self.interner))
    }

    fn parse_function(&mut self) -> Result<FunctionDef, ParseError> {
        let name_tok = self.expect(TokenKind::Identifier)?;
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                let p_tok = self.expect(TokenKind::Identifier)?;
                let mut declared_type = Type::Int;
                if self.match_tok(TokenKind::Colon).is_some() {
                    declared_type = self.parse_type()?;
                }
                let mut default = None;
                if self.match_tok(TokenKind::Assign).is_some() {
                    default = Some(self.parse_default_literal()?);
                }
                params.push(Param {
                    name: p_tok.lexeme,
                    declared_type,
                    default,
                    span: p_tok.span,
                });
                if self.match_tok(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;

        let mut return_type = None;
        if self.match_tok(TokenKind::Arrow).is_some() {
            return_type = Some(self.parse_type()?);
        }
        self.expect(TokenKind::Colon)?;
        self.expect(TokenKind::Newline)?;
        self.expect(TokenKind::Indent)?;

        let was_in_fn = self.in_function_body;
        self.in_function_body = true;
        let mut body = Vec::new();
        let mut globals_declared: Vec<pbc_base::Symbol> = Vec::new();
        while self.match_tok(TokenKind::Dedent).is_none() {
            let stmt = self.parse_stmt()?;
            if let Stmt::Global { names, .. } = &stmt {
                for n in names {
                    if !globals_declared.contains(n) {
                        globals_declared.push(*n);
                    }
                }
            }
            body.push(stmt);
        }
        self.in_function_body = was_in_fn;

        Ok(FunctionDef {
            name: name_tok.lexeme,
            params,
            return_type,
            body,
            globals_declared,
            span: name_tok.span,
        })
    }

    /// A default argument expression, restricted to a constant literal
    /// (spec.md §9 "Default arguments"): an optional unary minus applied to
    /// a numeric literal, or a bare literal/`True`/`False`/`None`.
    fn parse_default_literal(&mut self) -> Result<Expr, ParseError> {
        let neg = self.match_tok(TokenKind::Minus).is_some();
        let tok = self.advance();
        let span = tok.span;
        let line = tok.line;
        let value = match tok.kind {
            TokenKind::IntLiteral => {
                let v = match tok.literal {
                    Some(LiteralValue::Int(i)) => i,
                    _ => 0,
                };
                Literal::Int(if neg { -v } else { v })
            }
            TokenKind::FloatLiteral => {
                let v = match tok.literal {
                    Some(LiteralValue::Float(f)) => f,
                    _ => 0.0,
                };
                Literal::Float(if neg { -v } else { v })
            }
            TokenKind::StringLiteral if !neg => {
                let v = match tok.literal {
                    Some(LiteralValue::Str(s)) => s,
                    _ => String::new(),
                };
                Literal::Str(v)
            }
            TokenKind::True if !neg => Literal::Bool(true),
            TokenKind::False if !neg => Literal::Bool(false),
            TokenKind::None_ if !neg => Literal::None,
            other => {
                return Err(ParseError::UnexpectedToken {
                    expected: "a constant literal default value".to_string(),
                    found: other,
                    line,
                })
            }
        };
        Ok(Expr::Literal { value, span })
    }

    fn parse_class_def(&mut self) -> Result<ClassDef, ParseError> {
        let name_tok = self.expect(TokenKind::Identifier)?;
        let mut base = None;
        if self.match_tok(TokenKind::LParen).is_some() {
            base = Some(self.expect(TokenKind::Identifier)?.lexeme);
            self.expect(TokenKind::RParen)?;
        }
        self.expect(TokenKind::Colon)?;
        self.expect(TokenKind::Newline)?;
        self.expect(TokenKind::Indent)?;

        let mut fields = Vec::new();
        let mut methods = Vec::new();
        let mut saw_method = false;

        loop {
            if self.match_tok(TokenKind::Dedent).is_some() {
                break;
            }
            if self.match_tok(TokenKind::Newline).is_some() {
                continue;
            }
            if self.check(TokenKind::Pass) {
                if !fields.is_empty() || !methods.is_empty() {
                    return Err(ParseError::MalformedClassBody {
                        message: "'pass' must be the only statement in class body".to_string(),
                        line: self.line(),
                    });
                }
                self.advance();
                self.expect(TokenKind::Newline)?;
                loop {
                    if self.match_tok(TokenKind::Dedent).is_some() {
                        break;
                    }
                    if self.match_tok(TokenKind::Newline).is_some() {
                        continue;
                    }
                    return Err(ParseError::MalformedClassBody {
                        message: "no statements allowed after 'pass' in class body".to_string(),
                        line: self.line(),
                    });
                }
                break;
            }
            if self.match_tok(TokenKind::Def).is_some() {
                methods.push(self.parse_function()?);
                saw_method = true;
                continue;
            }
            if self.check(TokenKind::Identifier) {
                if saw_method {
                    return Err(ParseError::MalformedClassBody {
                        message: "fields must be declared before methods".to_string(),
                        line: self.line(),
                    });
                }
                if self.peek_kind(1) == Some(TokenKind::Colon) {
                    fields.push(self.parse_vardecl_inner()?);
                    continue;
                }
                return Err(ParseError::MalformedClassBody {
                    message: "unexpected statement in class body".to_string(),
                    line: self.line(),
                });
            }
            return Err(ParseError::MalformedClassBody {
                message: "only methods, fields, or 'pass' allowed in class body".to_string(),
                line: self.line(),
            });
        }

        Ok(ClassDef {
            name: name_tok.lexeme,
            base,
            fields,
            methods,
            span: name_tok.span,
        })
    }

    fn parse_dotted_name(&mut self) -> Result<Vec<pbc_base::Symbol>, ParseError> {
        let mut segments = vec![self.expect(TokenKind::Identifier)?.lexeme];
        while self.match_tok(TokenKind::Dot).is_some() {
            segments.push(self.expect(TokenKind::Identifier)?.lexeme);
        }
        Ok(segments)
    }

    fn parse_import(&mut self) -> Result<Stmt, ParseError> {
        let start = self.line();
        let path = self.parse_dotted_name()?;
        let alias = if self.match_tok(TokenKind::As).is_some() {
            Some(self.expect(TokenKind::Identifier)?.lexeme)
        } else {
            None
        };
        let end = self.expect(TokenKind::Newline)?;
        let _ = start;
        Ok(Stmt::Import {
            path,
            alias,
            span: end.span,
        })
    }

    fn parse_import_from(&mut self) -> Result<Stmt, ParseError> {
        let path = self.parse_dotted_name()?;
        self.expect(TokenKind::Import)?;
        if self.match_tok(TokenKind::Star).is_some() {
            let end = self.expect(TokenKind::Newline)?;
            return Ok(Stmt::ImportFrom {
                path,
                names: Vec::new(),
                wildcard: true,
                span: end.span,
            });
        }
        let mut names = Vec::new();
        loop {
            let name = self.expect(TokenKind::Identifier)?.lexeme;
            let alias = if self.match_tok(TokenKind::As).is_some() {
                Some(self.expect(TokenKind::Identifier)?.lexeme)
            } else {
                None
            };
            names.push(ImportedName { name, alias });
            if self.match_tok(TokenKind::Comma).is_none() {
                break;
            }
        }
        let end = self.expect(TokenKind::Newline)?;
        Ok(Stmt::ImportFrom {
            path,
            names,
            wildcard: false,
            span: end.span,
        })
    }

    fn parse_if(&mut self) -> Result<Stmt, ParseError> {
        let condition = self.parse_expr()?;
        self.expect(TokenKind::Colon)?;
        self.expect(TokenKind::Newline)?;
        self.expect(TokenKind::Indent)?;
        let mut then_body = Vec::new();
        while self.match_tok(TokenKind::Dedent).is_none() {
            then_body.push(self.parse_stmt()?);
        }

        let mut else_body = None;
        if self.match_tok(TokenKind::Elif).is_some() {
            // desugar `elif` into a single nested `if` in the else branch.
            else_body = Some(vec![self.parse_if()?]);
        } else if self.match_tok(TokenKind::Else).is_some() {
            self.expect(TokenKind::Colon)?;
            self.expect(TokenKind::Newline)?;
            self.expect(TokenKind::Indent)?;
            let mut body = Vec::new();
            while self.match_tok(TokenKind::Dedent).is_none() {
                body.push(self.parse_stmt()?);
            }
            else_body = Some(body);
        }

        let span = condition.span();
        Ok(Stmt::If {
            condition,
            then_body,
            else_body,
            span,
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, ParseError> {
        let condition = self.parse_expr()?;
        self.expect(TokenKind::Colon)?;
        self.expect(TokenKind::Newline)?;
        self.expect(TokenKind::Indent)?;
        let mut body = Vec::new();
        while self.match_tok(TokenKind::Dedent).is_none() {
            body.push(self.parse_stmt()?);
        }
        let span = condition.span();
        Ok(Stmt::While { condition, body, span })
    }

    fn parse_for(&mut self) -> Result<Stmt, ParseError> {
        let var_tok = self.expect(TokenKind::Identifier)?;
        self.expect(TokenKind::In)?;
        let iterable = self.parse_expr()?;
        self.expect(TokenKind::Colon)?;
        self.expect(TokenKind::Newline)?;
        self.expect(TokenKind::Indent)?;
        let mut body = Vec::new();
        while self.match_tok(TokenKind::Dedent).is_none() {
            body.push(self.parse_stmt()?);
        }
        let span = var_tok.span;
        Ok(Stmt::For {
            var_name: var_tok.lexeme,
            iterable,
            body,
            span,
        })
    }

    // ───────────────────────── expressions ─────────────────────────
    // Precedence, low to high: or, and, comparison, additive,
    // multiplicative, unary, postfix, primary.

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_and()?;
        while self.match_tok(TokenKind::Or).is_some() {
            let right = self.parse_and()?;
            let span = expr.span().merge(right.span());
            expr = Expr::BinOp {
                left: Box::new(expr),
                op: BinOpKind::Or,
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_comparison()?;
        while self.match_tok(TokenKind::And).is_some() {
            let right = self.parse_comparison()?;
            let span = expr.span().merge(right.span());
            expr = Expr::BinOp {
                left: Box::new(expr),
                op: BinOpKind::And,
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_add_sub()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Eq => BinOpKind::Eq,
                TokenKind::NotEq => BinOpKind::NotEq,
                TokenKind::Lt => BinOpKind::Lt,
                TokenKind::LtEq => BinOpKind::LtEq,
                TokenKind::Gt => BinOpKind::Gt,
                TokenKind::GtEq => BinOpKind::GtEq,
                TokenKind::Is => {
                    self.advance();
                    if self.match_tok(TokenKind::Not).is_some() {
                        let right = self.parse_add_sub()?;
                        let span = expr.span().merge(right.span());
                        expr = Expr::BinOp {
                            left: Box::new(expr),
                            op: BinOpKind::IsNot,
                            right: Box::new(right),
                            span,
                        };
                    } else {
                        let right = self.parse_add_sub()?;
                        let span = expr.span().merge(right.span());
                        expr = Expr::BinOp {
                            left: Box::new(expr),
                            op: BinOpKind::Is,
                            right: Box::new(right),
                            span,
                        };
                    }
                    continue;
                }
                _ => break,
            };
            self.advance();
            let right = self.parse_add_sub()?;
            let span = expr.span().merge(right.span());
            expr = Expr::BinOp {
                left: Box::new(expr),
                op,
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn parse_add_sub(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_term()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinOpKind::Add,
                TokenKind::Minus => BinOpKind::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            let span = expr.span().merge(right.span());
            expr = Expr::BinOp {
                left: Box::new(expr),
                op,
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinOpKind::Mul,
                TokenKind::Slash => BinOpKind::Div,
                TokenKind::SlashSlash => BinOpKind::FloorDiv,
                TokenKind::Percent => BinOpKind::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            let span = expr.span().merge(right.span());
            expr = Expr::BinOp {
                left: Box::new(expr),
                op,
                right: Box::new(right),
                span,
            };
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if let Some(tok) = self.match_tok(TokenKind::Minus) {
            let operand = self.parse_unary()?;
            let span = tok.span.merge(operand.span());
            return Ok(Expr::UnaryOp {
                op: UnaryOpKind::Neg,
                operand: Box::new(operand),
                span,
            });
        }
        if let Some(tok) = self.match_tok(TokenKind::Not) {
            let operand = self.parse_unary()?;
            let span = tok.span.merge(operand.span());
            return Ok(Expr::UnaryOp {
                op: UnaryOpKind::Not,
                operand: Box::new(operand),
                span,
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.check(TokenKind::LParen) {
                self.advance();
                let mut args = Vec::new();
                if !self.check(TokenKind::RParen) {
                    loop {
                        args.push(self.parse_expr()?);
                        if self.match_tok(TokenKind::Comma).is_none() {
                            break;
                        }
                    }
                }
                let close = self.expect(TokenKind::RParen)?;
                let span = expr.span().merge(close.span);
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    span,
                };
            } else if self.check(TokenKind::LBracket) {
                self.advance();
                let index = self.parse_expr()?;
                let close = self.expect(TokenKind::RBracket)?;
                let span = expr.span().merge(close.span);
                expr = Expr::Index {
                    base: Box::new(expr),
                    index: Box::new(index),
                    elem_type: RefCell::new(None),
                    span,
                };
            } else if self.check(TokenKind::Dot) {
                self.advance();
                let attr_tok = self.expect(TokenKind::Identifier)?;
                let span = expr.span().merge(attr_tok.span);
                expr = Expr::Attribute {
                    obj: Box::new(expr),
                    attr: attr_tok.lexeme,
                    span,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let tok = self.current().clone();
        match tok.kind {
            TokenKind::IntLiteral => {
                self.advance();
                let v = match tok.literal {
                    Some(LiteralValue::Int(i)) => i,
                    _ => 0,
                };
                Ok(Expr::Literal {
                    value: Literal::Int(v),
                    span: tok.span,
                })
            }
            TokenKind::FloatLiteral => {
                self.advance();
                let v = match tok.literal {
                    Some(LiteralValue::Float(f)) => f,
                    _ => 0.0,
                };
                Ok(Expr::Literal {
                    value: Literal::Float(v),
                    span: tok.span,
                })
            }
            TokenKind::StringLiteral => {
                self.advance();
                let v = match tok.literal {
                    Some(LiteralValue::Str(s)) => s,
                    _ => String::new(),
                };
                Ok(Expr::Literal {
                    value: Literal::Str(v),
                    span: tok.span,
                })
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal {
                    value: Literal::Bool(true),
                    span: tok.span,
                })
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal {
                    value: Literal::Bool(false),
                    span: tok.span,
                })
            }
            TokenKind::None_ => {
                self.advance();
                Ok(Expr::Literal {
                    value: Literal::None,
                    span: tok.span,
                })
            }
            TokenKind::Identifier => {
                self.advance();
                Ok(Expr::Identifier {
                    name: tok.lexeme,
                    span: tok.span,
                })
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => self.parse_list(),
            TokenKind::LBrace => self.parse_dict(),
            TokenKind::FstringStart => self.parse_fstring(),
            other => Err(ParseError::UnexpectedToken {
                expected: "an expression".to_string(),
                found: other,
                line: tok.line,
            }),
        }
    }

    fn parse_list(&mut self) -> Result<Expr, ParseError> {
        let open = self.expect(TokenKind::LBracket)?;
        let mut elements = Vec::new();
        if !self.check(TokenKind::RBracket) {
            loop {
                elements.push(self.parse_expr()?);
                if self.match_tok(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        let close = self.expect(TokenKind::RBracket)?;
        Ok(Expr::List {
            elements,
            elem_type: RefCell::new(None),
            span: open.span.merge(close.span),
        })
    }

    fn parse_dict(&mut self) -> Result<Expr, ParseError> {
        let open = self.expect(TokenKind::LBrace)?;
        let mut pairs = Vec::new();
        if !self.check(TokenKind::RBrace) {
            loop {
                let key = self.parse_expr()?;
                self.expect(TokenKind::Colon)?;
                let value = self.parse_expr()?;
                pairs.push((key, value));
                if self.match_tok(TokenKind::Comma).is_none() {
                    break;
                }
            }
        }
        let close = self.expect(TokenKind::RBrace)?;
        Ok(Expr::Dict {
            pairs,
            span: open.span.merge(close.span),
        })
    }

    fn parse_fstring(&mut self) -> Result<Expr, ParseError> {
        let open = self.expect(TokenKind::FstringStart)?;
        let mut parts = Vec::new();
        loop {
            if let Some(tok) = self.match_tok(TokenKind::FstringMiddle) {
                if let Some(LiteralValue::Str(s)) = tok.literal {
                    parts.push(FstringPart::Literal(s));
                }
                continue;
            }
            if self.match_tok(TokenKind::LBrace).is_some() {
                let expr = self.parse_expr()?;
                self.expect(TokenKind::RBrace)?;
                parts.push(FstringPart::Expr(expr));
                continue;
            }
            break;
        }
        let end = self.expect(TokenKind::FstringEnd)?;
        Ok(Expr::Fstring {
            parts,
            span: open.span.merge(end.span),
        })
    }
}

fn aug_assign_op(kind: TokenKind) -> Option<BinOpKind> {
    Some(match kind {
        TokenKind::PlusAssign => BinOpKind::Add,
        TokenKind::MinusAssign => BinOpKind::Sub,
        TokenKind::StarAssign => BinOpKind::Mul,
        TokenKind::SlashAssign => BinOpKind::Div,
        TokenKind::SlashSlashAssign => BinOpKind::FloorDiv,
        TokenKind::PercentAssign => BinOpKind::Mod,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_src(src: &str) -> Result<Program, ParseError> {
        let mut interner = Interner::new();
        let tokens = tokenize(src, &mut interner).expect("lex ok");
        parse(&tokens, &interner)
    }

    #[test]
    fn parses_vardecl_with_initializer() {
        let program = parse_src("x: int = 10\n").unwrap();
        assert_eq!(program.stmts.len(), 1);
        assert!(matches!(program.stmts[0], Stmt::VarDecl(_)));
    }

    #[test]
    fn rejects_vardecl_without_initializer() {
        let err = parse_src("x: int\n").unwrap_err();
        assert!(matches!(err, ParseError::MissingInitializer { .. }));
    }

    #[test]
    fn rejects_bare_expression_at_top_level() {
        let err = parse_src("1 + 1\n").unwrap_err();
        assert!(matches!(err, ParseError::TopLevelRestriction { .. }));
    }

    #[test]
    fn parses_function_with_default_and_return_type() {
        let program = parse_src("def add(x: int, y: int = 1) -> int:\n    return x + y\n").unwrap();
        match &program.stmts[0] {
            Stmt::FunctionDef(f) => {
                assert_eq!(f.params.len(), 2);
                assert!(f.params[1].default.is_some());
                assert_eq!(f.return_type, Some(Type::Int));
            }
            other => panic!("expected FunctionDef, got {other:?}"),
        }
    }

    #[test]
    fn rejects_nested_function_definitions() {
        let err = parse_src("def outer():\n    def inner():\n        pass\n    pass\n").unwrap_err();
        assert!(matches!(err, ParseError::NestedFunctionDef { .. }));
    }

    #[test]
    fn desugars_elif_into_nested_if() {
        let program =
            parse_src("def f():\n    if a:\n        pass\n    elif b:\n        pass\n    else:\n        pass\n")
                .unwrap();
        match &program.stmts[0] {
            Stmt::FunctionDef(f) => match &f.body[0] {
                Stmt::If { else_body, .. } => {
                    let nested = else_body.as_ref().unwrap();
                    assert_eq!(nested.len(), 1);
                    assert!(matches!(nested[0], Stmt::If { .. }));
                }
                other => panic!("expected If, got {other:?}"),
            },
            other => panic!("expected FunctionDef, got {other:?}"),
        }
    }

    #[test]
    fn class_body_must_be_fields_then_methods() {
        let err = parse_src(
            "class C:\n    def m():\n        pass\n    x: int = 1\n",
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::MalformedClassBody { .. }));
    }

    #[test]
    fn class_with_pass_only_body_parses() {
        let program = parse_src("class C:\n    pass\n").unwrap();
        match &program.stmts[0] {
            Stmt::ClassDef(c) => {
                assert!(c.fields.is_empty());
                assert!(c.methods.is_empty());
            }
            other => panic!("expected ClassDef, got {other:?}"),
        }
    }

    #[test]
    fn rejects_call_expression_as_assignment_target() {
        let err = parse_src("def f():\n    g() = 1\n").unwrap_err();
        assert!(matches!(err, ParseError::InvalidAssignmentTarget { .. }));
    }

    #[test]
    fn parses_chained_attribute_and_index_postfix() {
        let program = parse_src("def f():\n    print(mathlib.add(5, 4))\n").unwrap();
        match &program.stmts[0] {
            Stmt::FunctionDef(fd) => match &fd.body[0] {
                Stmt::Expr { expr: Expr::Call { args, .. }, .. } => {
                    assert!(matches!(&args[0], Expr::Call { func, .. } if matches!(**func, Expr::Attribute { .. })));
                }
                other => panic!("expected call stmt, got {other:?}"),
            },
            other => panic!("expected FunctionDef, got {other:?}"),
        }
    }

    #[test]
    fn parses_list_type_annotation() {
        let program = parse_src("arr: list[int] = [1, 2]\n").unwrap();
        match &program.stmts[0] {
            Stmt::VarDecl(decl) => assert_eq!(decl.declared_type, Type::List(Box::new(Type::Int))),
            other => panic!("expected VarDecl, got {other:?}"),
        }
    }

    #[test]
    fn parses_import_and_import_from() {
        let program = parse_src("import mathlib\nfrom mathlib import add, PI as pi\n").unwrap();
        assert!(matches!(program.stmts[0], Stmt::Import { .. }));
        match &program.stmts[1] {
            Stmt::ImportFrom { names, wildcard, .. } => {
                assert!(!wildcard);
                assert_eq!(names.len(), 2);
            }
            other => panic!("expected ImportFrom, got {other:?}"),
        }
    }

    #[test]
    fn rejects_try_as_unsupported_construct() {
        let err = parse_src("def f():\n    try:\n        pass\n    except:\n        pass\n").unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedConstruct { construct: "try", .. }));
    }

    #[test]
    fn parses_fstring_with_embedded_expression() {
        let program = parse_src("def f():\n    print(f\"hi {name}\")\n").unwrap();
        match &program.stmts[0] {
            Stmt::FunctionDef(fd) => match &fd.body[0] {
                Stmt::Expr { expr: Expr::Call { args, .. }, .. } => {
                    assert!(matches!(&args[0], Expr::Fstring { .. }));
                }
                other => panic!("expected call stmt, got {other:?}"),
            },
            other => panic!("expected FunctionDef, got {other:?}"),
        }
    }
}
