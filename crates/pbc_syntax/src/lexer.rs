//! Indentation-sensitive lexer for PB source.
//!
//! PB blocks are delimited by indentation rather than braces, so the lexer
//! tracks an indent-width stack and synthesizes [`TokenKind::Indent`] and
//! [`TokenKind::Dedent`] tokens the way Python's tokenizer does. A bracket
//! depth counter suppresses line breaks inside `(...)`/`[...]`/`{...}` so a
//! call's arguments can span multiple physical lines without a `Newline`
//! splitting the statement.
//!
//! F-strings are lexed eagerly: each `{expr}` splice re-enters the ordinary
//! token scanner so the embedded expression gets the exact same lexical
//! treatment (including nested brackets and nested f-strings) as top-level
//! code, recording byte offsets relative to the whole source file.

use crate::token::{LiteralValue, Token, TokenKind};
use pbc_base::{Interner, Span};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum LexError {
    MixedIndentation { line: u32 },
    InconsistentIndentation { line: u32 },
    UnterminatedString { line: u32 },
    UnterminatedFstring { line: u32 },
    UnexpectedChar { ch: char, line: u32, column: u32 },
    InvalidNumber { text: String, line: u32 },
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::MixedIndentation { line } => {
                write!(f, "inconsistent use of tabs and spaces in indentation at line {line}")
            }
            LexError::InconsistentIndentation { line } => {
                write!(f, "unindent does not match any outer indentation level at line {line}")
            }
            LexError::UnterminatedString { line } => {
                write!(f, "unterminated string literal starting at line {line}")
            }
            LexError::UnterminatedFstring { line } => {
                write!(f, "unterminated f-string starting at line {line}")
            }
            LexError::UnexpectedChar { ch, line, column } => {
                write!(f, "unexpected character '{ch}' at line {line}, column {column}")
            }
            LexError::InvalidNumber { text, line } => {
                write!(f, "invalid numeric literal '{text}' at line {line}")
            }
        }
    }
}

impl std::error::Error for LexError {}

const INDENT_TAB_WIDTH: usize = 4;

struct Cursor<'a> {
    chars: Vec<char>,
    source: &'a str,
    byte_offsets: Vec<usize>,
    pos: usize,
    line: u32,
    column: u32,
    bracket_depth: i32,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        let mut byte_offsets = Vec::new();
        let mut chars = Vec::new();
        for (off, ch) in source.char_indices() {
            byte_offsets.push(off);
            chars.push(ch);
        }
        byte_offsets.push(source.len());
        Cursor {
            chars,
            source,
            byte_offsets,
            pos: 0,
            line: 1,
            column: 1,
            bracket_depth: 0,
        }
    }

    fn byte_pos(&self) -> usize {
        self.byte_offsets[self.pos.min(self.byte_offsets.len() - 1)]
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }
}

/// Lexes `source` into a flat token stream, or the first lexical error.
pub fn tokenize(source: &str, interner: &mut Interner) -> Result<Vec<Token>, LexError> {
    let mut cur = Cursor::new(source);
    let mut tokens = Vec::new();
    let mut indent_stack: Vec<usize> = vec![0];
    let mut at_line_start = true;

    loop {
        if at_line_start && cur.bracket_depth == 0 {
            match measure_indent(&mut cur)? {
                None => {
                    // blank or comment-only line; no structural tokens.
                    if cur.at_end() {
                        break;
                    }
                    continue;
                }
                Some(width) => {
                    emit_indent_changes(&mut tokens, &mut indent_stack, width, cur.line)?;
                }
            }
            at_line_start = false;
        }

        if cur.at_end() {
            break;
        }

        let ch = match cur.peek() {
            Some(c) => c,
            None => break,
        };

        if ch == '\n' {
            cur.advance();
            if cur.bracket_depth == 0 {
                push_token(&mut tokens, TokenKind::Newline, &cur, cur.byte_pos(), cur.byte_pos());
                at_line_start = true;
            }
            continue;
        }

        if ch == ' ' || ch == '\t' || ch == '\r' {
            cur.advance();
            continue;
        }

        if ch == '#' {
            let start = cur.byte_pos();
            let (line, column) = (cur.line, cur.column);
            let mut text = String::new();
            while let Some(c) = cur.peek() {
                if c == '\n' {
                    break;
                }
                text.push(c);
                cur.advance();
            }
            let end = cur.byte_pos();
            tokens.push(
                Token::new(TokenKind::Comment, pbc_base::Symbol::EMPTY, Span::new(start, end), line, column)
                    .with_literal(LiteralValue::Str(text)),
            );
            continue;
        }

        if ch == '\\' && cur.peek_at(1) == Some('\n') {
            // explicit line continuation
            cur.advance();
            cur.advance();
            continue;
        }

        scan_token(&mut cur, &mut tokens, interner)?;
    }

    while indent_stack.len() > 1 {
        indent_stack.pop();
        let line = cur.line;
        push_token(&mut tokens, TokenKind::Dedent, &cur, cur.byte_pos(), cur.byte_pos());
        let _ = line;
    }
    push_token(&mut tokens, TokenKind::Eof, &cur, cur.byte_pos(), cur.byte_pos());
    Ok(tokens)
}

/// Measures the indentation of the upcoming line, consuming it.
///
/// Returns `None` for blank or comment-only lines (which carry no
/// indentation significance), `Some(width)` otherwise, leaving the cursor
/// at the first non-whitespace character of the line.
fn measure_indent(cur: &mut Cursor) -> Result<Option<usize>, LexError> {
    let start_line = cur.line;
    let mut width = 0usize;
    let mut saw_tab = false;
    let mut saw_space = false;
    loop {
        match cur.peek() {
            Some(' ') => {
                saw_space = true;
                width += 1;
                cur.advance();
            }
            Some('\t') => {
                saw_tab = true;
                width += INDENT_TAB_WIDTH;
                cur.advance();
            }
            _ => break,
        }
    }
    if saw_tab && saw_space {
        return Err(LexError::MixedIndentation { line: start_line });
    }
    match cur.peek() {
        None => Ok(None),
        Some('\n') => {
            cur.advance();
            Ok(None)
        }
        Some('#') => {
            while let Some(c) = cur.peek() {
                if c == '\n' {
                    break;
                }
                cur.advance();
            }
            if cur.peek() == Some('\n') {
                cur.advance();
            }
            Ok(None)
        }
        Some(_) => Ok(Some(width)),
    }
}

fn emit_indent_changes(
    tokens: &mut Vec<Token>,
    stack: &mut Vec<usize>,
    width: usize,
    line: u32,
) -> Result<(), LexError> {
    let top = *stack.last().unwrap();
    if width > top {
        stack.push(width);
        tokens.push(Token::new(
            TokenKind::Indent,
            pbc_base::Symbol::EMPTY,
            Span::new(0, 0),
            line,
            1,
        ));
    } else if width < top {
        while *stack.last().unwrap() > width {
            stack.pop();
            tokens.push(Token::new(
                TokenKind::Dedent,
                pbc_base::Symbol::EMPTY,
                Span::new(0, 0),
                line,
                1,
            ));
        }
        if *stack.last().unwrap() != width {
            return Err(LexError::InconsistentIndentation { line });
        }
    }
    Ok(())
}

fn push_token(tokens: &mut Vec<Token>, kind: TokenKind, cur: &Cursor, start: usize, end: usize) {
    tokens.push(Token::new(
        kind,
        pbc_base::Symbol::EMPTY,
        Span::new(start, end),
        cur.line,
        cur.column,
    ));
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn scan_token(
    cur: &mut Cursor,
    tokens: &mut Vec<Token>,
    interner: &mut Interner,
) -> Result<(), LexError> {
    let line = cur.line;
    let column = cur.column;
    let start = cur.byte_pos();
    let ch = cur.peek().unwrap();

    // f-string prefix
    if ch == 'f' && matches!(cur.peek_at(1), Some('"') | Some('\'')) {
        return scan_fstring(cur, tokens, interner);
    }

    if is_ident_start(ch) {
        let mut text = String::new();
        while let Some(c) = cur.peek() {
            if is_ident_continue(c) {
                text.push(c);
                cur.advance();
            } else {
                break;
            }
        }
        let end = cur.byte_pos();
        if let Some(kw) = TokenKind::keyword(&text) {
            let sym = interner.intern(&text);
            tokens.push(Token::new(kw, sym, Span::new(start, end), line, column));
        } else {
            let sym = interner.intern(&text);
            tokens.push(Token::new(
                TokenKind::Identifier,
                sym,
                Span::new(start, end),
                line,
                column,
            ));
        }
        return Ok(());
    }

    if ch.is_ascii_digit() {
        return scan_number(cur, tokens, line, column, start);
    }

    if ch == '"' || ch == '\'' {
        return scan_string(cur, tokens, line, column, start);
    }

    cur.advance();
    let (kind, extra) = match ch {
        '(' => {
            cur.bracket_depth += 1;
            (TokenKind::LParen, None)
        }
        ')' => {
            cur.bracket_depth = (cur.bracket_depth - 1).max(0);
            (TokenKind::RParen, None)
        }
        '[' => {
            cur.bracket_depth += 1;
            (TokenKind::LBracket, None)
        }
        ']' => {
            cur.bracket_depth = (cur.bracket_depth - 1).max(0);
            (TokenKind::RBracket, None)
        }
        '{' => {
            cur.bracket_depth += 1;
            (TokenKind::LBrace, None)
        }
        '}' => {
            cur.bracket_depth = (cur.bracket_depth - 1).max(0);
            (TokenKind::RBrace, None)
        }
        ':' => (TokenKind::Colon, None),
        ';' => (TokenKind::Semicolon, None),
        ',' => (TokenKind::Comma, None),
        '.' => (TokenKind::Dot, None),
        '%' => {
            if cur.peek() == Some('=') {
                cur.advance();
                (TokenKind::PercentAssign, None)
            } else {
                (TokenKind::Percent, None)
            }
        }
        '+' => {
            if cur.peek() == Some('=') {
                cur.advance();
                (TokenKind::PlusAssign, None)
            } else {
                (TokenKind::Plus, None)
            }
        }
        '-' => {
            if cur.peek() == Some('=') {
                cur.advance();
                (TokenKind::MinusAssign, None)
            } else if cur.peek() == Some('>') {
                cur.advance();
                (TokenKind::Arrow, None)
            } else {
                (TokenKind::Minus, None)
            }
        }
        '*' => {
            if cur.peek() == Some('=') {
                cur.advance();
                (TokenKind::StarAssign, None)
            } else {
                (TokenKind::Star, None)
            }
        }
        '/' => {
            if cur.peek() == Some('/') {
                cur.advance();
                if cur.peek() == Some('=') {
                    cur.advance();
                    (TokenKind::SlashSlashAssign, None)
                } else {
                    (TokenKind::SlashSlash, None)
                }
            } else if cur.peek() == Some('=') {
                cur.advance();
                (TokenKind::SlashAssign, None)
            } else {
                (TokenKind::Slash, None)
            }
        }
        '=' => {
            if cur.peek() == Some('=') {
                cur.advance();
                (TokenKind::Eq, None)
            } else {
                (TokenKind::Assign, None)
            }
        }
        '!' => {
            if cur.peek() == Some('=') {
                cur.advance();
                (TokenKind::NotEq, None)
            } else {
                return Err(LexError::UnexpectedChar { ch, line, column });
            }
        }
        '<' => {
            if cur.peek() == Some('=') {
                cur.advance();
                (TokenKind::LtEq, None)
            } else {
                (TokenKind::Lt, None)
            }
        }
        '>' => {
            if cur.peek() == Some('=') {
                cur.advance();
                (TokenKind::GtEq, None)
            } else {
                (TokenKind::Gt, None)
            }
        }
        _ => return Err(LexError::UnexpectedChar { ch, line, column }),
    };
    let end = cur.byte_pos();
    let _ = extra;
    tokens.push(Token::new(kind, pbc_base::Symbol::EMPTY, Span::new(start, end), line, column));
    Ok(())
}

fn scan_number(
    cur: &mut Cursor,
    tokens: &mut Vec<Token>,
    line: u32,
    column: u32,
    start: usize,
) -> Result<(), LexError> {
    let mut text = String::new();
    let mut is_float = false;
    while let Some(c) = cur.peek() {
        if c.is_ascii_digit() || c == '_' {
            if c != '_' {
                text.push(c);
            }
            cur.advance();
        } else {
            break;
        }
    }
    if cur.peek() == Some('.') && cur.peek_at(1).map(|c| c.is_ascii_digit()).unwrap_or(false) {
        is_float = true;
        text.push('.');
        cur.advance();
        while let Some(c) = cur.peek() {
            if c.is_ascii_digit() || c == '_' {
                if c != '_' {
                    text.push(c);
                }
                cur.advance();
            } else {
                break;
            }
        }
    }
    if matches!(cur.peek(), Some('e') | Some('E')) {
        let save = cur.pos;
        let mut exp = String::new();
        exp.push(cur.peek().unwrap());
        cur.advance();
        if matches!(cur.peek(), Some('+') | Some('-')) {
            exp.push(cur.peek().unwrap());
            cur.advance();
        }
        if cur.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            is_float = true;
            while let Some(c) = cur.peek() {
                if c.is_ascii_digit() {
                    exp.push(c);
                    cur.advance();
                } else {
                    break;
                }
            }
            text.push_str(&exp);
        } else {
            cur.pos = save;
        }
    }
    let end = cur.byte_pos();
    let span = Span::new(start, end);
    if is_float {
        let value: f64 = text
            .parse()
            .map_err(|_| LexError::InvalidNumber { text: text.clone(), line })?;
        tokens.push(
            Token::new(TokenKind::FloatLiteral, pbc_base::Symbol::EMPTY, span, line, column)
                .with_literal(LiteralValue::Float(value)),
        );
    } else {
        let value: i64 = text
            .parse()
            .map_err(|_| LexError::InvalidNumber { text: text.clone(), line })?;
        tokens.push(
            Token::new(TokenKind::IntLiteral, pbc_base::Symbol::EMPTY, span, line, column)
                .with_literal(LiteralValue::Int(value)),
        );
    }
    Ok(())
}

fn scan_string(
    cur: &mut Cursor,
    tokens: &mut Vec<Token>,
    line: u32,
    column: u32,
    start: usize,
) -> Result<(), LexError> {
    let quote = cur.advance().unwrap();
    let mut value = String::new();
    loop {
        match cur.peek() {
            None | Some('\n') => return Err(LexError::UnterminatedString { line }),
            Some(c) if c == quote => {
                cur.advance();
                break;
            }
            Some('\\') => {
                cur.advance();
                value.push(decode_escape(cur)?);
            }
            Some(c) => {
                value.push(c);
                cur.advance();
            }
        }
    }
    let end = cur.byte_pos();
    tokens.push(
        Token::new(
            TokenKind::StringLiteral,
            pbc_base::Symbol::EMPTY,
            Span::new(start, end),
            line,
            column,
        )
        .with_literal(LiteralValue::Str(value)),
    );
    Ok(())
}

fn decode_escape(cur: &mut Cursor) -> Result<char, LexError> {
    let line = cur.line;
    let c = cur.advance().ok_or(LexError::UnterminatedString { line })?;
    Ok(match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        '\\' => '\\',
        '\'' => '\'',
        '"' => '"',
        other => other,
    })
}

/// Scans an `f"..."` literal into `FstringStart`, alternating literal-text
/// tokens and re-entrant expression tokens, and a closing `FstringEnd`.
///
/// Each `{expr}` splice is lexed by recursing into [`scan_token`] until the
/// matching `}` is found at brace-depth zero relative to the splice, so
/// nested strings, brackets, and f-strings inside the splice lex exactly as
/// they would at the top level.
fn scan_fstring(
    cur: &mut Cursor,
    tokens: &mut Vec<Token>,
    interner: &mut Interner,
) -> Result<(), LexError> {
    let start_line = cur.line;
    let start_col = cur.column;
    let start = cur.byte_pos();
    cur.advance(); // 'f'
    let quote = cur.advance().ok_or(LexError::UnterminatedFstring { line: start_line })?;

    push_token(tokens, TokenKind::FstringStart, cur, start, cur.byte_pos());

    let mut literal = String::new();
    loop {
        match cur.peek() {
            None | Some('\n') => return Err(LexError::UnterminatedFstring { line: start_line }),
            Some(c) if c == quote => {
                cur.advance();
                break;
            }
            Some('{') if cur.peek_at(1) == Some('{') => {
                literal.push('{');
                cur.advance();
                cur.advance();
            }
            Some('}') if cur.peek_at(1) == Some('}') => {
                literal.push('}');
                cur.advance();
                cur.advance();
            }
            Some('{') => {
                flush_fstring_middle(tokens, cur, &mut literal);
                cur.advance(); // consume '{'
                push_token(tokens, TokenKind::LBrace, cur, cur.byte_pos(), cur.byte_pos());
                let mut depth = 1i32;
                loop {
                    match cur.peek() {
                        None => return Err(LexError::UnterminatedFstring { line: start_line }),
                        Some('}') if depth == 1 => {
                            cur.advance();
                            push_token(tokens, TokenKind::RBrace, cur, cur.byte_pos(), cur.byte_pos());
                            break;
                        }
                        Some('}') => {
                            depth -= 1;
                            scan_token(cur, tokens, interner)?;
                        }
                        Some('{') => {
                            depth += 1;
                            scan_token(cur, tokens, interner)?;
                        }
                        Some(' ') | Some('\t') => {
                            cur.advance();
                        }
                        _ => {
                            scan_token(cur, tokens, interner)?;
                        }
                    }
                }
            }
            Some('\\') => {
                cur.advance();
                literal.push(decode_escape(cur)?);
            }
            Some(c) => {
                literal.push(c);
                cur.advance();
            }
        }
    }
    flush_fstring_middle(tokens, cur, &mut literal);
    push_token(tokens, TokenKind::FstringEnd, cur, cur.byte_pos(), cur.byte_pos());
    let _ = start_col;
    Ok(())
}

fn flush_fstring_middle(tokens: &mut Vec<Token>, cur: &Cursor, literal: &mut String) {
    if literal.is_empty() {
        return;
    }
    let pos = cur.byte_pos();
    tokens.push(
        Token::new(TokenKind::FstringMiddle, pbc_base::Symbol::EMPTY, Span::new(pos, pos), cur.line, cur.column)
            .with_literal(LiteralValue::Str(std::mem::take(literal))),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut interner = Interner::new();
        tokenize(src, &mut interner).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn tokenizes_simple_assignment() {
        let ks = kinds("x: int = 1\n");
        assert_eq!(
            ks,
            vec![
                TokenKind::Identifier,
                TokenKind::Colon,
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::IntLiteral,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn emits_indent_and_dedent() {
        let src = "if True:\n    x: int = 1\ny: int = 2\n";
        let ks = kinds(src);
        assert!(ks.contains(&TokenKind::Indent));
        assert!(ks.contains(&TokenKind::Dedent));
    }

    #[test]
    fn rejects_mixed_tabs_and_spaces() {
        let mut interner = Interner::new();
        let src = "if True:\n \tx: int = 1\n";
        let err = tokenize(src, &mut interner).unwrap_err();
        assert!(matches!(err, LexError::MixedIndentation { .. }));
    }

    #[test]
    fn suppresses_newline_inside_brackets() {
        let ks = kinds("f(1,\n2)\n");
        let newline_count = ks.iter().filter(|k| **k == TokenKind::Newline).count();
        assert_eq!(newline_count, 1);
    }

    #[test]
    fn blank_and_comment_lines_produce_no_tokens() {
        let ks = kinds("\n# a comment\n\nx: int = 1\n");
        assert_eq!(
            ks,
            vec![
                TokenKind::Identifier,
                TokenKind::Colon,
                TokenKind::Identifier,
                TokenKind::Assign,
                TokenKind::IntLiteral,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn fstring_splits_literal_and_expr() {
        let ks = kinds("f\"hi {name}\"\n");
        assert_eq!(ks[0], TokenKind::FstringStart);
        assert!(ks.contains(&TokenKind::FstringMiddle));
        assert!(ks.contains(&TokenKind::Identifier));
        assert!(ks.contains(&TokenKind::FstringEnd));
    }

    #[test]
    fn floor_div_and_compound_assign_operators() {
        let ks = kinds("x //= 2\ny %= 2\nz = x // y\n");
        assert!(ks.contains(&TokenKind::SlashSlashAssign));
        assert!(ks.contains(&TokenKind::PercentAssign));
        assert!(ks.contains(&TokenKind::SlashSlash));
    }

    #[test]
    fn comment_produces_token_not_swallowed_into_newline() {
        let ks = kinds("x: int = 1  # trailing\n");
        assert!(ks.contains(&TokenKind::Comment));
        assert_eq!(ks.last(), Some(&TokenKind::Eof));
    }

    #[test]
    fn doubled_braces_escape_to_literal() {
        let mut interner = Interner::new();
        let tokens = tokenize("f\"{{literal}}\"\n", &mut interner).unwrap();
        let middle = tokens
            .iter()
            .find(|t| t.kind == TokenKind::FstringMiddle)
            .unwrap();
        assert_eq!(middle.literal, Some(LiteralValue::Str("{literal}".to_string())));
    }
}
