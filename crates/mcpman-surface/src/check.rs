//! Static checking of scripts against the generated tool surface.
//!
//! The checker validates the properties the runtime depends on: the code is a
//! function expression taking at most one argument, annotated declarations
//! agree with their literal initializers, and object-literal arguments of
//! recognized `server.tool({...})` calls conform to the tool's input schema.
//! Diagnostics carry 1-based line/column and render as
//! `Line L, Column C: message`.

use std::collections::HashMap;
use std::fmt;

use crate::names;
use crate::schema::Schema;
use crate::typegen::ToolSurface;

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub line: usize,
    pub col: usize,
    pub message: String,
}

impl Diagnostic {
    fn new(line: usize, col: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            col,
            message: message.into(),
        }
    }

    fn at(token: &Token, message: impl Into<String>) -> Self {
        Self::new(token.line, token.col, message)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {}, Column {}: {}", self.line, self.col, self.message)
    }
}

/// Render diagnostics one per line, the format the eval/code handlers return.
pub fn format_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(Diagnostic::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

// ===== Lexer =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokKind {
    Ident,
    Number,
    Str,
    Template,
    Punct,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokKind,
    text: String,
    line: usize,
    col: usize,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn lex(mut self) -> Result<Vec<Token>, Diagnostic> {
        let mut tokens: Vec<Token> = Vec::new();

        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.bump();
                continue;
            }

            // Comments
            if ch == '/' && self.peek_at(1) == Some('/') {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.bump();
                }
                continue;
            }
            if ch == '/' && self.peek_at(1) == Some('*') {
                let (line, col) = (self.line, self.col);
                self.bump();
                self.bump();
                let mut closed = false;
                while let Some(c) = self.bump() {
                    if c == '*' && self.peek() == Some('/') {
                        self.bump();
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(Diagnostic::new(line, col, "Unterminated comment"));
                }
                continue;
            }

            let (line, col) = (self.line, self.col);

            // Identifiers and keywords
            if ch.is_ascii_alphabetic() || ch == '_' || ch == '$' {
                let mut text = String::new();
                while let Some(c) = self.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '$' {
                        text.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    kind: TokKind::Ident,
                    text,
                    line,
                    col,
                });
                continue;
            }

            // Numbers
            if ch.is_ascii_digit() {
                let mut text = String::new();
                while let Some(c) = self.peek() {
                    if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
                        text.push(c);
                        self.bump();
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    kind: TokKind::Number,
                    text,
                    line,
                    col,
                });
                continue;
            }

            // Strings
            if ch == '\'' || ch == '"' {
                let quote = ch;
                self.bump();
                let mut text = String::new();
                let mut closed = false;
                while let Some(c) = self.bump() {
                    if c == '\\' {
                        if let Some(escaped) = self.bump() {
                            text.push(escaped);
                        }
                        continue;
                    }
                    if c == quote {
                        closed = true;
                        break;
                    }
                    if c == '\n' {
                        break;
                    }
                    text.push(c);
                }
                if !closed {
                    return Err(Diagnostic::new(line, col, "Unterminated string literal"));
                }
                tokens.push(Token {
                    kind: TokKind::Str,
                    text,
                    line,
                    col,
                });
                continue;
            }

            // Template literals (contents are opaque to the checker)
            if ch == '`' {
                self.bump();
                let mut closed = false;
                let mut brace_depth = 0usize;
                while let Some(c) = self.bump() {
                    match c {
                        '\\' => {
                            self.bump();
                        }
                        '$' if self.peek() == Some('{') => {
                            self.bump();
                            brace_depth += 1;
                        }
                        '}' if brace_depth > 0 => brace_depth -= 1,
                        '`' if brace_depth == 0 => {
                            closed = true;
                            break;
                        }
                        _ => {}
                    }
                }
                if !closed {
                    return Err(Diagnostic::new(line, col, "Unterminated template literal"));
                }
                tokens.push(Token {
                    kind: TokKind::Template,
                    text: String::new(),
                    line,
                    col,
                });
                continue;
            }

            // Regex literal vs division: a slash after a value is division.
            if ch == '/' {
                let is_division = match tokens.last() {
                    Some(prev) => match prev.kind {
                        TokKind::Ident | TokKind::Number | TokKind::Str | TokKind::Template => {
                            true
                        }
                        TokKind::Punct => prev.text == ")" || prev.text == "]",
                    },
                    None => false,
                };
                if !is_division {
                    self.bump();
                    let mut in_class = false;
                    let mut closed = false;
                    while let Some(c) = self.bump() {
                        match c {
                            '\\' => {
                                self.bump();
                            }
                            '[' => in_class = true,
                            ']' => in_class = false,
                            '/' if !in_class => {
                                closed = true;
                                break;
                            }
                            '\n' => break,
                            _ => {}
                        }
                    }
                    if !closed {
                        return Err(Diagnostic::new(line, col, "Unterminated regular expression"));
                    }
                    // Flags
                    while let Some(c) = self.peek() {
                        if c.is_ascii_alphabetic() {
                            self.bump();
                        } else {
                            break;
                        }
                    }
                    tokens.push(Token {
                        kind: TokKind::Template,
                        text: String::new(),
                        line,
                        col,
                    });
                    continue;
                }
            }

            // Multi-char operators, longest first
            const OPERATORS: [&str; 18] = [
                "===", "!==", "**=", "...", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "?.",
                "+=", "-=", "*=", "/=", "**",
            ];
            let mut matched = None;
            for op in OPERATORS {
                let candidate: String = self
                    .chars
                    .iter()
                    .skip(self.pos)
                    .take(op.len())
                    .collect();
                if candidate == op {
                    matched = Some(op);
                    break;
                }
            }
            if let Some(op) = matched {
                for _ in 0..op.len() {
                    self.bump();
                }
                tokens.push(Token {
                    kind: TokKind::Punct,
                    text: op.to_string(),
                    line,
                    col,
                });
                continue;
            }

            self.bump();
            tokens.push(Token {
                kind: TokKind::Punct,
                text: ch.to_string(),
                line,
                col,
            });
        }

        Ok(tokens)
    }
}

// ===== Checks =====

/// Check a candidate script against the surface. Empty result means the code
/// is accepted for execution.
pub fn check_script(code: &str, surface: &ToolSurface) -> Vec<Diagnostic> {
    let tokens = match Lexer::new(code).lex() {
        Ok(tokens) => tokens,
        Err(diagnostic) => return vec![diagnostic],
    };

    let mut diagnostics = Vec::new();
    check_function_shape(&tokens, &mut diagnostics);
    check_bracket_balance(&tokens, &mut diagnostics);
    check_annotations(&tokens, &mut diagnostics);
    check_tool_calls(&tokens, surface, &mut diagnostics);

    diagnostics.sort_by_key(|d| (d.line, d.col));
    diagnostics
}

fn is_punct(token: &Token, text: &str) -> bool {
    token.kind == TokKind::Punct && token.text == text
}

fn is_ident(token: &Token, text: &str) -> bool {
    token.kind == TokKind::Ident && token.text == text
}

/// Find the index of the closer matching the opener at `open`.
fn matching_close(tokens: &[Token], open: usize, open_ch: &str, close_ch: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        if is_punct(token, open_ch) {
            depth += 1;
        } else if is_punct(token, close_ch) {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

fn check_function_shape(tokens: &[Token], diagnostics: &mut Vec<Diagnostic>) {
    let reject = |diagnostics: &mut Vec<Diagnostic>, line: usize, col: usize| {
        diagnostics.push(Diagnostic::new(
            line,
            col,
            "Expected a function expression (arrow or classic) taking zero or one argument",
        ));
    };

    if tokens.is_empty() {
        reject(diagnostics, 1, 1);
        return;
    }

    let mut i = 0;
    if is_ident(&tokens[i], "async") {
        i += 1;
    }
    if i >= tokens.len() {
        reject(diagnostics, tokens[0].line, tokens[0].col);
        return;
    }

    let params_range: Option<(usize, usize)> = if is_ident(&tokens[i], "function") {
        // function [name] ( params ) { ... }
        let mut j = i + 1;
        if is_punct(&tokens[j.min(tokens.len() - 1)], "*") {
            j += 1;
        }
        if j < tokens.len() && tokens[j].kind == TokKind::Ident {
            j += 1;
        }
        if j >= tokens.len() || !is_punct(&tokens[j], "(") {
            reject(diagnostics, tokens[i].line, tokens[i].col);
            return;
        }
        match matching_close(tokens, j, "(", ")") {
            Some(close) => Some((j + 1, close)),
            None => return, // bracket check reports this
        }
    } else if is_punct(&tokens[i], "(") {
        // ( params ) => ...
        let close = match matching_close(tokens, i, "(", ")") {
            Some(close) => close,
            None => return,
        };
        match tokens.get(close + 1) {
            Some(next) if is_punct(next, "=>") => Some((i + 1, close)),
            _ => {
                reject(diagnostics, tokens[i].line, tokens[i].col);
                return;
            }
        }
    } else if tokens[i].kind == TokKind::Ident {
        // param => ...
        match tokens.get(i + 1) {
            Some(next) if is_punct(next, "=>") => None, // exactly one param
            _ => {
                reject(diagnostics, tokens[i].line, tokens[i].col);
                return;
            }
        }
    } else {
        reject(diagnostics, tokens[i].line, tokens[i].col);
        return;
    };

    if let Some((start, end)) = params_range {
        let mut count = 0usize;
        let mut depth = 0usize;
        let mut saw_token = false;
        for token in &tokens[start..end] {
            saw_token = true;
            match token.text.as_str() {
                "(" | "[" | "{" if token.kind == TokKind::Punct => depth += 1,
                ")" | "]" | "}" if token.kind == TokKind::Punct => depth = depth.saturating_sub(1),
                "," if token.kind == TokKind::Punct && depth == 0 => count += 1,
                _ => {}
            }
        }
        let params = if saw_token { count + 1 } else { 0 };
        if params > 1 {
            diagnostics.push(Diagnostic::new(
                tokens[start].line,
                tokens[start].col,
                format!("Function must accept zero or one argument, found {}", params),
            ));
        }
    }
}

fn check_bracket_balance(tokens: &[Token], diagnostics: &mut Vec<Diagnostic>) {
    let mut stack: Vec<&Token> = Vec::new();

    for token in tokens {
        if token.kind != TokKind::Punct {
            continue;
        }
        match token.text.as_str() {
            "(" | "[" | "{" => stack.push(token),
            ")" | "]" | "}" => {
                let expected_open = match token.text.as_str() {
                    ")" => "(",
                    "]" => "[",
                    _ => "{",
                };
                match stack.pop() {
                    Some(open) if open.text == expected_open => {}
                    Some(open) => {
                        diagnostics.push(Diagnostic::at(
                            token,
                            format!(
                                "Unexpected token '{}': expected closer for '{}'",
                                token.text, open.text
                            ),
                        ));
                        return;
                    }
                    None => {
                        diagnostics.push(Diagnostic::at(
                            token,
                            format!("Unexpected token '{}'", token.text),
                        ));
                        return;
                    }
                }
            }
            _ => {}
        }
    }

    if let Some(open) = stack.first() {
        diagnostics.push(Diagnostic::at(
            open,
            format!("Unexpected end of input: unclosed '{}'", open.text),
        ));
    }
}

/// Literal type name of the token starting an initializer/value, if it is a
/// literal the checker understands.
fn literal_type(tokens: &[Token], i: usize) -> Option<&'static str> {
    let token = tokens.get(i)?;
    match token.kind {
        TokKind::Str | TokKind::Template => Some("string"),
        TokKind::Number => Some("number"),
        TokKind::Ident => match token.text.as_str() {
            "true" | "false" => Some("boolean"),
            "null" => Some("null"),
            "undefined" => Some("undefined"),
            _ => None,
        },
        TokKind::Punct => match token.text.as_str() {
            "{" => Some("object"),
            "[" => Some("array"),
            "-" => {
                // Negative numeric literal
                match tokens.get(i + 1) {
                    Some(next) if next.kind == TokKind::Number => Some("number"),
                    _ => None,
                }
            }
            _ => None,
        },
    }
}

/// Whether a value of `actual` literal type is assignable to the annotation.
/// Returns None when the annotation is outside the checkable subset.
fn assignable(declared: &str, actual: &str) -> Option<bool> {
    match declared {
        "any" | "unknown" => Some(true),
        "string" | "number" | "boolean" | "null" | "undefined" => Some(declared == actual),
        _ if declared.ends_with("[]") || declared.starts_with("Array<") => {
            Some(actual == "array")
        }
        _ => None,
    }
}

fn check_annotations(tokens: &[Token], diagnostics: &mut Vec<Diagnostic>) {
    let mut i = 0;
    while i + 3 < tokens.len() {
        let is_decl = tokens[i].kind == TokKind::Ident
            && matches!(tokens[i].text.as_str(), "const" | "let" | "var");
        if !(is_decl && tokens[i + 1].kind == TokKind::Ident && is_punct(&tokens[i + 2], ":")) {
            i += 1;
            continue;
        }

        // Collect annotation tokens until `=` (or statement end) at depth 0.
        let mut j = i + 3;
        let mut depth = 0usize;
        let mut annotation = String::new();
        let mut initializer = None;
        while j < tokens.len() {
            let token = &tokens[j];
            if token.kind == TokKind::Punct {
                match token.text.as_str() {
                    "(" | "[" | "{" | "<" => depth += 1,
                    ")" | "]" | "}" | ">" => {
                        if depth == 0 {
                            break;
                        }
                        depth -= 1;
                    }
                    "=" if depth == 0 => {
                        initializer = Some(j + 1);
                        break;
                    }
                    ";" | "," if depth == 0 => break,
                    _ => {}
                }
            }
            annotation.push_str(&token.text);
            j += 1;
        }

        if let Some(value_at) = initializer {
            if let Some(actual) = literal_type(tokens, value_at) {
                if assignable(&annotation, actual) == Some(false) {
                    diagnostics.push(Diagnostic::at(
                        &tokens[value_at],
                        format!(
                            "Type '{}' is not assignable to type '{}'",
                            actual, annotation
                        ),
                    ));
                }
            }
            i = value_at;
        } else {
            i = j;
        }
        i += 1;
    }
}

/// Literal kind of an object-literal value; nested objects recurse.
#[derive(Debug)]
enum LitValue {
    Primitive(&'static str, usize),
    Object(ObjectLiteral),
    Dynamic,
}

#[derive(Debug)]
struct ObjectLiteral {
    open: usize,
    entries: Vec<(String, usize, LitValue)>,
    has_spread: bool,
}

/// Parse the object literal starting at `open` (which must be `{`). Returns
/// the literal and the index just past its closing brace.
fn parse_object_literal(tokens: &[Token], open: usize) -> Option<(ObjectLiteral, usize)> {
    let close = matching_close(tokens, open, "{", "}")?;
    let mut entries = Vec::new();
    let mut has_spread = false;

    let mut i = open + 1;
    while i < close {
        let token = &tokens[i];

        if is_punct(token, ",") {
            i += 1;
            continue;
        }
        if is_punct(token, "...") {
            has_spread = true;
            i = skip_value(tokens, i + 1, close);
            continue;
        }

        // Key: identifier or string literal; anything else is dynamic.
        let key = match token.kind {
            TokKind::Ident | TokKind::Str => token.text.clone(),
            _ => {
                i = skip_value(tokens, i, close);
                continue;
            }
        };
        let key_at = i;

        match tokens.get(i + 1) {
            Some(next) if is_punct(next, ":") => {
                let value_at = i + 2;
                let value = match literal_type(tokens, value_at) {
                    Some("object") => match parse_object_literal(tokens, value_at) {
                        Some((nested, after)) => {
                            let entry = (key, key_at, LitValue::Object(nested));
                            entries.push(entry);
                            i = after;
                            continue;
                        }
                        None => LitValue::Dynamic,
                    },
                    Some(kind) => LitValue::Primitive(kind, value_at),
                    None => LitValue::Dynamic,
                };
                entries.push((key, key_at, value));
                i = skip_value(tokens, value_at, close);
            }
            _ => {
                // Shorthand `{ path }` or method: value type unknown.
                entries.push((key, key_at, LitValue::Dynamic));
                i = skip_value(tokens, i + 1, close);
            }
        }
    }

    Some((
        ObjectLiteral {
            open,
            entries,
            has_spread,
        },
        close + 1,
    ))
}

/// Advance past one value expression, stopping at a top-level `,` or `end`.
fn skip_value(tokens: &[Token], mut i: usize, end: usize) -> usize {
    let mut depth = 0usize;
    while i < end {
        let token = &tokens[i];
        if token.kind == TokKind::Punct {
            match token.text.as_str() {
                "(" | "[" | "{" => depth += 1,
                ")" | "]" | "}" => depth = depth.saturating_sub(1),
                "," if depth == 0 => return i,
                _ => {}
            }
        }
        i += 1;
    }
    end
}

fn schema_expected_type(schema: &Schema) -> Option<&'static str> {
    match schema {
        Schema::String => Some("string"),
        Schema::Number | Schema::Integer => Some("number"),
        Schema::Boolean => Some("boolean"),
        Schema::Null => Some("null"),
        Schema::Array(_) => Some("array"),
        Schema::Object { .. } => Some("object"),
        Schema::Unknown => None,
    }
}

fn check_object_against_schema(
    tokens: &[Token],
    literal: &ObjectLiteral,
    schema: &Schema,
    interface_name: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let properties = match schema {
        Schema::Object { properties } => properties,
        _ => return,
    };

    for (key, key_at, value) in &literal.entries {
        match schema.property(key) {
            None if !properties.is_empty() => {
                diagnostics.push(Diagnostic::at(
                    &tokens[*key_at],
                    format!(
                        "Object literal may only specify known properties, and '{}' does not exist in type '{}'",
                        key, interface_name
                    ),
                ));
            }
            None => {}
            Some(property) => match value {
                LitValue::Primitive(actual, value_at) => {
                    if let Some(expected) = schema_expected_type(&property.schema) {
                        if expected != *actual {
                            diagnostics.push(Diagnostic::at(
                                &tokens[*value_at],
                                format!(
                                    "Type '{}' is not assignable to type '{}'",
                                    actual, expected
                                ),
                            ));
                        }
                    }
                }
                LitValue::Object(nested) => {
                    if property.schema.is_object() {
                        check_object_against_schema(
                            tokens,
                            nested,
                            &property.schema,
                            interface_name,
                            diagnostics,
                        );
                    } else if let Some(expected) = schema_expected_type(&property.schema) {
                        diagnostics.push(Diagnostic::at(
                            &tokens[nested.open],
                            format!("Type 'object' is not assignable to type '{}'", expected),
                        ));
                    }
                }
                LitValue::Dynamic => {}
            },
        }
    }

    if !literal.has_spread {
        let present: Vec<&str> = literal
            .entries
            .iter()
            .map(|(key, _, _)| key.as_str())
            .collect();
        for required in schema.required_properties() {
            if !present.contains(&required) {
                diagnostics.push(Diagnostic::at(
                    &tokens[literal.open],
                    format!(
                        "Property '{}' is missing in type '{{...}}' but required in type '{}'",
                        required, interface_name
                    ),
                ));
            }
        }
    }
}

fn check_tool_calls(tokens: &[Token], surface: &ToolSurface, diagnostics: &mut Vec<Diagnostic>) {
    let bindings: HashMap<String, String> = surface.script_bindings().into_iter().collect();

    for i in 0..tokens.len() {
        // receiver . method (
        if tokens[i].kind != TokKind::Ident {
            continue;
        }
        if i > 0 && (is_punct(&tokens[i - 1], ".") || is_punct(&tokens[i - 1], "?.")) {
            continue;
        }
        let server = match bindings.get(&tokens[i].text) {
            Some(server) => server.clone(),
            None => continue,
        };
        let (method, open) = match (tokens.get(i + 1), tokens.get(i + 2), tokens.get(i + 3)) {
            (Some(dot), Some(method), Some(open))
                if is_punct(dot, ".")
                    && method.kind == TokKind::Ident
                    && is_punct(open, "(") =>
            {
                (i + 2, i + 3)
            }
            _ => continue,
        };

        let tool = match surface.resolve_tool(&server, &tokens[method].text) {
            Some(tool) => tool,
            None => {
                let available = surface
                    .server_tools(&server)
                    .map(|tools| {
                        tools
                            .iter()
                            .map(|t| t.name.clone())
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_default();
                diagnostics.push(Diagnostic::at(
                    &tokens[method],
                    format!(
                        "Property '{}' does not exist on server '{}'. Available tools: {}",
                        tokens[method].text, server, available
                    ),
                ));
                continue;
            }
        };

        let interface_name = format!(
            "{}{}Input",
            names::pascal(&server),
            names::pascal(&tool.name)
        );

        match tokens.get(open + 1) {
            Some(next) if is_punct(next, ")") => {
                if !tool.schema.required_properties().is_empty() {
                    diagnostics.push(Diagnostic::at(
                        &tokens[open],
                        format!(
                            "Expected 1 argument of type '{}', but got 0",
                            interface_name
                        ),
                    ));
                }
            }
            Some(next) if is_punct(next, "{") => {
                if let Some((literal, _)) = parse_object_literal(tokens, open + 1) {
                    check_object_against_schema(
                        tokens,
                        &literal,
                        &tool.schema,
                        &interface_name,
                        diagnostics,
                    );
                }
            }
            _ => {}
        }
    }
}

// ===== Declaration-text self-check =====

/// Parse the generated declaration text with the grammar the generator emits.
/// This is the fail-loud gate for the `code` handler: a failure here is a bug
/// in the type generator, never a user error.
pub fn check_declarations(text: &str) -> Result<(), Vec<Diagnostic>> {
    #[derive(PartialEq)]
    enum State {
        Top,
        Interface,
        DeclareConst,
    }

    let mut diagnostics = Vec::new();
    let mut state = State::Top;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("/**") && line.ends_with("*/") {
            continue;
        }

        match state {
            State::Top => {
                if let Some(rest) = line.strip_prefix("interface ") {
                    let ok = rest.ends_with('{')
                        && names::is_identifier(rest.trim_end_matches('{').trim());
                    if !ok {
                        diagnostics.push(Diagnostic::new(line_no, 1, "Malformed interface header"));
                    } else {
                        state = State::Interface;
                    }
                } else if let Some(rest) = line.strip_prefix("declare const ") {
                    if rest.ends_with(": {") {
                        let name = rest.trim_end_matches(": {");
                        if !names::is_identifier(name) {
                            diagnostics.push(Diagnostic::new(
                                line_no,
                                1,
                                "Malformed declare const header",
                            ));
                        } else {
                            state = State::DeclareConst;
                        }
                    } else if !(rest.contains(": ") && rest.ends_with(';')) {
                        diagnostics.push(Diagnostic::new(line_no, 1, "Malformed declare const"));
                    }
                } else if line.starts_with("declare function ") {
                    if !line.ends_with(';') {
                        diagnostics.push(Diagnostic::new(
                            line_no,
                            1,
                            "Malformed declare function",
                        ));
                    }
                } else {
                    diagnostics.push(Diagnostic::new(
                        line_no,
                        1,
                        format!("Unrecognized declaration: {}", line),
                    ));
                }
            }
            State::Interface => {
                if line == "}" {
                    state = State::Top;
                } else if !(line.ends_with(';') && line.contains(':')) {
                    diagnostics.push(Diagnostic::new(line_no, 1, "Malformed interface member"));
                }
            }
            State::DeclareConst => {
                if line == "};" {
                    state = State::Top;
                } else if !(line.contains("(input: ") && line.ends_with("): Promise<ToolOutput>;"))
                {
                    diagnostics.push(Diagnostic::new(line_no, 1, "Malformed method declaration"));
                }
            }
        }
    }

    if state != State::Top {
        diagnostics.push(Diagnostic::new(
            text.lines().count(),
            1,
            "Unterminated declaration block",
        ));
    }

    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}
