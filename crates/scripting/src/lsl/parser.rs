//! LSL Parser
//!
//! Builds the declaration set from statement lines. Control headers are
//! split off their line by balanced-parenthesis matching; whatever follows
//! the header on the same line becomes the pending line, which is how a
//! header without braces takes the next statement as its body.

use crate::api::{ApiSurface, Feature};
use crate::error::CompileError;
use crate::lsl::ast::*;
use crate::lsl::directives::FeatureFlags;
use crate::lsl::expr::{matching_close, parse_expression, split_top_level, TypeNames};
use crate::lsl::lexer::{StatementLine, Token, TokenKind};
use std::collections::HashSet;

/// LSL parser
pub struct Parser<'a> {
    lines: Vec<StatementLine>,
    pos: usize,
    pending: Option<StatementLine>,
    api: &'a ApiSurface,
    flags: &'a FeatureFlags,
    types: TypeNames<'a>,
    function_names: HashSet<String>,
    scopes: Vec<HashSet<String>>,
    decls: Declarations,
    last_line: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser
    pub fn new(lines: Vec<StatementLine>, api: &'a ApiSurface, flags: &'a FeatureFlags) -> Self {
        Self {
            lines,
            pos: 0,
            pending: None,
            api,
            flags,
            types: TypeNames::new(api, flags),
            function_names: HashSet::new(),
            scopes: Vec::new(),
            decls: Declarations::default(),
            last_line: 0,
        }
    }

    /// Parse the whole script
    pub fn parse(mut self) -> Result<Declarations, CompileError> {
        self.prescan()?;

        while let Some(line) = self.next_line() {
            let first = &line.tokens[0];

            if first.is(";") && line.tokens.len() == 1 {
                continue;
            } else if first.is_keyword("struct") {
                self.parse_struct(&line)?;
            } else if first.is_keyword("extern") || first.is_keyword("rpc") {
                self.parse_extern(&line)?;
            } else if first.is_keyword("default") || first.is_keyword("state") {
                self.parse_state(&line)?;
            } else {
                if !self.decls.states.is_empty() {
                    return Err(CompileError::syntax(
                        first.line,
                        "global variables and functions must be declared before states",
                    ));
                }
                self.parse_global_or_function(&line)?;
            }
        }

        if self.decls.states.is_empty() {
            return Err(CompileError::syntax(self.last_line, "missing default state"));
        }

        tracing::debug!(
            "Parsed {} globals, {} functions, {} states",
            self.decls.globals.len(),
            self.decls.functions.len(),
            self.decls.states.len()
        );
        Ok(self.decls)
    }

    /// Register struct and function names ahead of use
    fn prescan(&mut self) -> Result<(), CompileError> {
        let mut depth = 0usize;
        for line in &self.lines {
            let t = &line.tokens;
            if t.len() == 1 && t[0].is("{") {
                depth += 1;
                continue;
            }
            if t.len() == 1 && t[0].is("}") {
                depth = depth.saturating_sub(1);
                continue;
            }
            if depth > 0 {
                continue;
            }

            if t[0].is_keyword("struct") {
                if !self.flags.has(Feature::Structs) {
                    return Err(CompileError::syntax(t[0].line, "structures are not enabled"));
                }
                let name = t
                    .get(1)
                    .filter(|n| n.kind == TokenKind::Identifier)
                    .ok_or_else(|| CompileError::syntax(t[0].line, "expected a structure name"))?;
                if self.types.lookup(&name.text).is_some() {
                    return Err(CompileError::name(name.line, format!("type '{}' is already defined", name.text)));
                }
                self.types.add_struct(&name.text);
                continue;
            }

            let name_at = if self.types.is_type_token(&t[0]).is_some() { 1 } else { 0 };
            if let (Some(name), Some(open)) = (t.get(name_at), t.get(name_at + 1)) {
                if name.kind == TokenKind::Identifier && open.is("(") {
                    if let Some(close) = matching_close(t, name_at + 1) {
                        if close + 1 == t.len() {
                            self.function_names.insert(name.text.clone());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // ========== Line cursor ==========

    fn next_line(&mut self) -> Option<StatementLine> {
        if let Some(line) = self.pending.take() {
            return Some(line);
        }
        let line = std::mem::take(self.lines.get_mut(self.pos)?);
        self.pos += 1;
        self.last_line = line.line();
        Some(line)
    }

    fn peek_line(&self) -> Option<&StatementLine> {
        self.pending.as_ref().or_else(|| self.lines.get(self.pos))
    }

    fn peek_is(&self, text: &str) -> bool {
        self.peek_line()
            .map_or(false, |l| l.tokens.len() == 1 && l.tokens[0].is(text))
    }

    fn expect_open_brace(&mut self, line: usize) -> Result<(), CompileError> {
        if self.peek_is("{") {
            self.next_line();
            Ok(())
        } else {
            Err(CompileError::syntax(line, "expected '{'"))
        }
    }

    fn expr(&self, tokens: &[Token], line: usize) -> Result<Expr, CompileError> {
        parse_expression(tokens, &self.types, line)
    }

    // ========== Names ==========

    /// Validate a name being declared
    fn check_new_name(&self, token: &Token) -> Result<String, CompileError> {
        match token.kind {
            TokenKind::Keyword => {
                return Err(CompileError::name(token.line, format!("'{}' is a reserved word", token.text)));
            }
            TokenKind::Identifier => {}
            _ => return Err(CompileError::syntax(token.line, format!("expected a name, found '{}'", token.text))),
        }
        let name = &token.text;
        if Type::from_keyword(name).is_some() || self.types.lookup(name).is_some() {
            return Err(CompileError::name(token.line, format!("'{}' is a type name", name)));
        }
        if self.api.is_reserved(name) {
            return Err(CompileError::name(token.line, format!("'{}' is reserved by the library", name)));
        }
        Ok(name.clone())
    }

    fn parse_params(&self, tokens: &[Token], line: usize) -> Result<Vec<Param>, CompileError> {
        let mut params: Vec<Param> = Vec::new();
        if tokens.is_empty() {
            return Ok(params);
        }
        for part in split_top_level(tokens, ",") {
            let (ty, name) = match part {
                [ty, name] => (ty, name),
                _ => return Err(CompileError::syntax(line, "expected 'type name' parameter")),
            };
            let ty = self
                .types
                .is_type_token(ty)
                .ok_or_else(|| CompileError::syntax(ty.line, format!("unknown type '{}'", ty.text)))?;
            let name = self.check_new_name(name)?;
            if params.iter().any(|p| p.name == name) {
                return Err(CompileError::name(line, format!("duplicate parameter '{}'", name)));
            }
            params.push(Param { name, ty });
        }
        Ok(params)
    }

    // ========== Top level ==========

    fn parse_global_or_function(&mut self, line: &StatementLine) -> Result<(), CompileError> {
        let t = &line.tokens;
        let ln = line.line();

        if let Some(ty) = self.types.is_type_token(&t[0]) {
            let name_token = t
                .get(1)
                .ok_or_else(|| CompileError::syntax(ln, "expected a name after the type"))?;
            match t.get(2) {
                Some(open) if open.is("(") => self.parse_function(ty, name_token, &t[2..], ln),
                Some(semi) if semi.is(";") && t.len() == 3 => {
                    let name = self.check_global_name(name_token)?;
                    self.decls.globals.push(VariableDecl {
                        name,
                        ty,
                        init: None,
                        line: ln,
                    });
                    Ok(())
                }
                Some(assign) if assign.is("=") => {
                    let name = self.check_global_name(name_token)?;
                    let init = self.expr(statement_body(t, 3, ln)?, ln)?;
                    self.decls.globals.push(VariableDecl {
                        name,
                        ty,
                        init: Some(init),
                        line: ln,
                    });
                    Ok(())
                }
                _ => Err(CompileError::syntax(ln, "expected ';', '=' or '(' in declaration")),
            }
        } else if t.len() > 1 && t[1].is("(") {
            self.parse_function(Type::Void, &t[0], &t[1..], ln)
        } else {
            Err(CompileError::syntax(
                ln,
                format!("expected a global declaration, function or state, found '{}'", t[0].text),
            ))
        }
    }

    fn check_global_name(&self, token: &Token) -> Result<String, CompileError> {
        let name = self.check_new_name(token)?;
        if self.decls.globals.iter().any(|g| g.name == name) {
            return Err(CompileError::name(token.line, format!("global '{}' is already declared", name)));
        }
        if self.function_names.contains(&name) {
            return Err(CompileError::name(token.line, format!("'{}' is already a function", name)));
        }
        Ok(name)
    }

    /// `rest` starts at the opening parenthesis of the parameter list
    fn parse_function(&mut self, ret: Type, name_token: &Token, rest: &[Token], ln: usize) -> Result<(), CompileError> {
        let name = self.check_new_name(name_token)?;
        let close = matching_close(rest, 0).ok_or_else(|| CompileError::syntax(ln, "unclosed parameter list"))?;
        if close + 1 != rest.len() {
            return Err(CompileError::syntax(ln, "unexpected tokens after parameter list"));
        }
        let params = self.parse_params(&rest[1..close], ln)?;

        if self.decls.globals.iter().any(|g| g.name == name) {
            return Err(CompileError::name(ln, format!("'{}' is already a global variable", name)));
        }
        let same_signature = self.decls.functions.iter().any(|f| {
            f.name == name && f.params.len() == params.len() && f.params.iter().zip(&params).all(|(a, b)| a.ty == b.ty)
        });
        if same_signature {
            return Err(CompileError::name(
                ln,
                format!("function '{}' is already declared with these parameter types", name),
            ));
        }

        self.expect_open_brace(ln)?;
        let body = self.parse_block(&params)?;
        self.decls.functions.push(FunctionDecl {
            name,
            ret,
            params,
            body,
            line: ln,
        });
        Ok(())
    }

    fn parse_struct(&mut self, line: &StatementLine) -> Result<(), CompileError> {
        let t = &line.tokens;
        let ln = line.line();
        if t.len() != 2 {
            return Err(CompileError::syntax(ln, "expected 'struct Name'"));
        }
        let name = t[1].text.clone();
        let own_id = match self.types.lookup(&name) {
            Some(Type::Struct(id)) => id,
            _ => return Err(CompileError::internal(ln, format!("structure '{}' was not registered", name))),
        };

        self.expect_open_brace(ln)?;
        let mut fields: Vec<(String, Type)> = Vec::new();
        loop {
            let field_line = self
                .next_line()
                .ok_or_else(|| CompileError::syntax(self.last_line, "missing '}'"))?;
            let f = &field_line.tokens;
            if f.len() == 1 && f[0].is("}") {
                break;
            }
            let fl = field_line.line();
            if f.len() != 3 || !f[2].is(";") {
                return Err(CompileError::syntax(fl, "expected 'type name;' field"));
            }
            let ty = self
                .types
                .is_type_token(&f[0])
                .ok_or_else(|| CompileError::syntax(fl, format!("unknown type '{}'", f[0].text)))?;
            if let Type::Struct(id) = ty {
                if id >= own_id {
                    return Err(CompileError::type_error(fl, format!("'{}' cannot contain '{}'", name, f[0].text)));
                }
            }
            let field = self.check_new_name(&f[1])?;
            if fields.iter().any(|(n, _)| *n == field) {
                return Err(CompileError::name(fl, format!("duplicate field '{}'", field)));
            }
            fields.push((field, ty));
        }

        self.decls.structs.push(StructDecl { name, fields, line: ln });
        Ok(())
    }

    fn parse_extern(&mut self, line: &StatementLine) -> Result<(), CompileError> {
        let t = &line.tokens;
        let ln = line.line();
        if !self.flags.has(Feature::ExternRpc) {
            return Err(CompileError::syntax(ln, format!("'{}' declarations are not enabled", t[0].text)));
        }
        let rpc = t[0].is_keyword("rpc");

        let (ret, name_at) = match t.get(1).and_then(|tok| self.types.is_type_token(tok)) {
            Some(ty) => (ty, 2),
            None => (Type::Void, 1),
        };
        let name_token = t
            .get(name_at)
            .ok_or_else(|| CompileError::syntax(ln, "expected an external function name"))?;
        let name = self.check_new_name(name_token)?;

        let open = name_at + 1;
        let close = match t.get(open) {
            Some(tok) if tok.is("(") => matching_close(t, open),
            _ => None,
        }
        .ok_or_else(|| CompileError::syntax(ln, "expected a parameter list"))?;
        if close + 2 != t.len() || !t[close + 1].is(";") {
            return Err(CompileError::syntax(ln, "expected ';' after external declaration"));
        }

        let mut params = Vec::new();
        if close > open + 1 {
            for part in split_top_level(&t[open + 1..close], ",") {
                let ty = part
                    .first()
                    .and_then(|tok| self.types.is_type_token(tok))
                    .filter(|_| part.len() <= 2)
                    .ok_or_else(|| CompileError::syntax(ln, "expected a parameter type"))?;
                params.push(ty);
            }
        }

        if self.decls.externs.iter().any(|e| e.name == name) || self.function_names.contains(&name) {
            return Err(CompileError::name(ln, format!("'{}' is already declared", name)));
        }
        self.function_names.insert(name.clone());
        self.decls.externs.push(ExternDecl {
            name,
            ret,
            params,
            rpc,
            line: ln,
        });
        Ok(())
    }

    fn parse_state(&mut self, line: &StatementLine) -> Result<(), CompileError> {
        let t = &line.tokens;
        let ln = line.line();

        let name = match t.as_slice() {
            [d] if d.is_keyword("default") => "default".to_string(),
            [s, name] if s.is_keyword("state") && name.kind == TokenKind::Identifier => name.text.clone(),
            _ => return Err(CompileError::syntax(ln, "expected 'default' or 'state name'")),
        };

        if self.decls.states.is_empty() && name != "default" {
            return Err(CompileError::syntax(ln, "the default state must be declared first"));
        }
        if self.decls.state(&name).is_some() {
            return Err(CompileError::name(ln, format!("state '{}' is already declared", name)));
        }

        self.expect_open_brace(ln)?;
        let mut state = StateDecl {
            name,
            variables: Vec::new(),
            events: Vec::new(),
            line: ln,
        };

        loop {
            let member = self
                .next_line()
                .ok_or_else(|| CompileError::syntax(self.last_line, "missing '}' at end of state"))?;
            let m = &member.tokens;
            let ml = member.line();
            if m.len() == 1 && m[0].is("}") {
                break;
            }

            let is_named_timer = m.len() >= 3
                && m[0].kind == TokenKind::Identifier
                && m[0].text == "timer"
                && m[1].kind == TokenKind::Identifier
                && m[2].is("(");

            if is_named_timer {
                if !self.flags.has(Feature::NamedTimers) {
                    return Err(CompileError::syntax(ml, "named timers are not enabled"));
                }
                if m.len() != 4 || !m[3].is(")") {
                    return Err(CompileError::syntax(ml, "named timers take no parameters"));
                }
                let key = named_timer_event(&m[1].text);
                self.add_event(&mut state, key, Vec::new(), ml)?;
            } else if self.types.is_type_token(&m[0]).is_some() && m.len() >= 3 && (m[2].is(";") || m[2].is("=")) {
                if !self.flags.has(Feature::StateVariables) {
                    return Err(CompileError::syntax(ml, "state variables are not enabled"));
                }
                let variable = self.parse_state_variable(m, &state, ml)?;
                state.variables.push(variable);
            } else if m[0].kind == TokenKind::Identifier && m.len() > 1 && m[1].is("(") {
                let close = matching_close(m, 1)
                    .filter(|c| c + 1 == m.len())
                    .ok_or_else(|| CompileError::syntax(ml, "malformed event header"))?;
                let params = self.parse_params(&m[2..close], ml)?;
                let sig = self
                    .api
                    .event(&m[0].text, self.flags)
                    .ok_or_else(|| CompileError::name(ml, format!("unknown event '{}'", m[0].text)))?;
                let matches = sig.params.len() == params.len() && sig.params.iter().zip(&params).all(|(a, p)| *a == p.ty);
                if !matches {
                    let expected: Vec<&str> = sig.params.iter().map(|p| p.name()).collect();
                    return Err(CompileError::type_error(
                        ml,
                        format!("event '{}' takes ({})", sig.name, expected.join(", ")),
                    ));
                }
                self.add_event(&mut state, m[0].text.clone(), params, ml)?;
            } else {
                return Err(CompileError::syntax(ml, format!("expected an event handler, found '{}'", m[0].text)));
            }
        }

        self.decls.states.push(state);
        Ok(())
    }

    fn parse_state_variable(&self, m: &[Token], state: &StateDecl, ln: usize) -> Result<VariableDecl, CompileError> {
        let ty = self
            .types
            .is_type_token(&m[0])
            .ok_or_else(|| CompileError::syntax(ln, "expected a type"))?;
        let name = self.check_global_name(&m[1])?;
        if state.variables.iter().any(|v| v.name == name) {
            return Err(CompileError::name(ln, format!("state variable '{}' is already declared", name)));
        }
        let init = if m[2].is("=") {
            Some(self.expr(statement_body(m, 3, ln)?, ln)?)
        } else if m.len() == 3 {
            None
        } else {
            return Err(CompileError::syntax(ln, "expected ';'"));
        };
        Ok(VariableDecl { name, ty, init, line: ln })
    }

    fn add_event(&mut self, state: &mut StateDecl, name: String, params: Vec<Param>, ln: usize) -> Result<(), CompileError> {
        if state.events.iter().any(|e| e.name == name) {
            return Err(CompileError::name(
                ln,
                format!("event '{}' is already handled in state '{}'", name, state.name),
            ));
        }
        self.expect_open_brace(ln)?;
        let body = self.parse_block(&params)?;
        state.events.push(EventDecl {
            name,
            params,
            body,
            line: ln,
        });
        Ok(())
    }

    // ========== Statements ==========

    /// Parse statements up to the closing brace; the opening brace has
    /// already been consumed. Parameters share the block's scope.
    fn parse_block(&mut self, params: &[Param]) -> Result<Block, CompileError> {
        self.scopes.push(params.iter().map(|p| p.name.clone()).collect());
        let mut statements = Vec::new();

        loop {
            if self.peek_is("}") {
                self.next_line();
                break;
            }
            if self.peek_line().is_none() {
                return Err(CompileError::syntax(self.last_line, "missing '}'"));
            }
            statements.push(self.parse_statement()?);
        }

        self.scopes.pop();
        Ok(Block {
            statements,
            implicit: false,
        })
    }

    /// Body of a control statement: `rest` holds whatever followed the
    /// header on its line
    fn parse_body(&mut self, rest: Vec<Token>, ln: usize) -> Result<Block, CompileError> {
        if rest.is_empty() {
            if self.peek_is("{") {
                self.next_line();
                return self.parse_block(&[]);
            }
            if self.peek_line().is_none() {
                return Err(CompileError::syntax(ln, "expected a statement"));
            }
        } else {
            self.pending = Some(StatementLine::new(rest));
        }

        self.scopes.push(HashSet::new());
        let statement = self.parse_statement()?;
        self.scopes.pop();
        Ok(Block {
            statements: vec![statement],
            implicit: true,
        })
    }

    /// Index of the `)` closing a header that starts `keyword (`
    fn header(&self, t: &[Token], ln: usize) -> Result<usize, CompileError> {
        match t.get(1) {
            Some(open) if open.is("(") => {}
            _ => return Err(CompileError::syntax(ln, format!("expected '(' after '{}'", t[0].text))),
        }
        matching_close(t, 1).ok_or_else(|| CompileError::syntax(ln, format!("unclosed '{}' header", t[0].text)))
    }

    fn require(&self, feature: Feature, what: &str, ln: usize) -> Result<(), CompileError> {
        if self.flags.has(feature) {
            Ok(())
        } else {
            Err(CompileError::syntax(ln, format!("{} is not enabled", what)))
        }
    }

    fn parse_statement(&mut self) -> Result<Stmt, CompileError> {
        let line = self
            .next_line()
            .ok_or_else(|| CompileError::syntax(self.last_line, "expected a statement"))?;
        let t = line.tokens;
        let first = &t[0];
        let ln = first.line;

        let kind = match first.kind {
            TokenKind::Punct if first.is("{") => StmtKind::Block(self.parse_block(&[])?),
            TokenKind::Punct if first.is(";") && t.len() == 1 => StmtKind::Empty,
            TokenKind::Punct if first.is("}") => return Err(CompileError::syntax(ln, "unexpected '}'")),
            TokenKind::Punct if first.is("@") => match t.as_slice() {
                [_, name, semi] if name.kind == TokenKind::Identifier && semi.is(";") => {
                    StmtKind::Label(name.text.clone())
                }
                _ => return Err(CompileError::syntax(ln, "expected '@label;'")),
            },
            TokenKind::Keyword => self.keyword_statement(&t, ln)?,
            _ => self.simple_statement(&t, ln)?,
        };

        Ok(Stmt::new(kind, ln))
    }

    fn keyword_statement(&mut self, t: &[Token], ln: usize) -> Result<StmtKind, CompileError> {
        let kind = match t[0].text.as_str() {
            "if" => {
                let close = self.header(t, ln)?;
                let condition = self.expr(&t[2..close], ln)?;
                let then_branch = self.parse_body(t[close + 1..].to_vec(), ln)?;
                let has_else = self
                    .peek_line()
                    .map_or(false, |l| l.tokens[0].is_keyword("else"));
                let else_branch = if has_else {
                    let else_line = self
                        .next_line()
                        .ok_or_else(|| CompileError::internal(ln, "else line vanished"))?;
                    let else_ln = else_line.line();
                    Some(self.parse_body(else_line.tokens[1..].to_vec(), else_ln)?)
                } else {
                    None
                };
                StmtKind::If {
                    condition,
                    then_branch,
                    else_branch,
                }
            }
            "else" => return Err(CompileError::syntax(ln, "'else' without 'if'")),
            "while" => {
                let close = self.header(t, ln)?;
                let condition = self.expr(&t[2..close], ln)?;
                let body = self.parse_body(t[close + 1..].to_vec(), ln)?;
                StmtKind::While { condition, body }
            }
            "do" => {
                let body = self.parse_body(t[1..].to_vec(), ln)?;
                let while_line = self
                    .next_line()
                    .ok_or_else(|| CompileError::syntax(ln, "expected 'while' after 'do' body"))?;
                let w = &while_line.tokens;
                let wl = while_line.line();
                if !w[0].is_keyword("while") {
                    return Err(CompileError::syntax(wl, "expected 'while' after 'do' body"));
                }
                let close = self.header(w, wl)?;
                if close + 2 != w.len() || !w[close + 1].is(";") {
                    return Err(CompileError::syntax(wl, "expected ';' after 'do ... while'"));
                }
                let condition = self.expr(&w[2..close], wl)?;
                StmtKind::DoWhile { body, condition }
            }
            "for" => {
                let close = self.header(t, ln)?;
                let parts = split_top_level(&t[2..close], ";");
                if parts.len() != 3 {
                    return Err(CompileError::syntax(ln, "'for' header needs three clauses"));
                }
                let init = self.expression_list(parts[0], ln)?;
                let condition = if parts[1].is_empty() {
                    None
                } else {
                    Some(self.expr(parts[1], ln)?)
                };
                let step = self.expression_list(parts[2], ln)?;
                let body = self.parse_body(t[close + 1..].to_vec(), ln)?;
                StmtKind::For {
                    init,
                    condition,
                    step,
                    body,
                }
            }
            "foreach" => {
                self.require(Feature::ForEach, "'foreach'", ln)?;
                let close = self.header(t, ln)?;
                let inner = &t[2..close];
                let (declared, var_at) = match inner.first().and_then(|tok| self.types.is_type_token(tok)) {
                    Some(ty) => (Some(ty), 1),
                    None => (None, 0),
                };
                let in_ok = inner.get(var_at + 1).map_or(false, |tok| tok.is_keyword("in"));
                if !in_ok || inner.len() < var_at + 3 {
                    return Err(CompileError::syntax(ln, "expected 'foreach ([type] name in list)'"));
                }
                let variable = if declared.is_some() {
                    self.check_new_name(&inner[var_at])?
                } else {
                    inner[var_at].text.clone()
                };
                let iterable = self.expr(&inner[var_at + 2..], ln)?;

                self.scopes.push(declared.iter().map(|_| variable.clone()).collect());
                let body = self.parse_body(t[close + 1..].to_vec(), ln);
                self.scopes.pop();

                StmtKind::ForEach {
                    declared,
                    variable,
                    iterable,
                    body: body?,
                }
            }
            "switch" => {
                self.require(Feature::Switch, "'switch'", ln)?;
                let close = self.header(t, ln)?;
                if close + 1 != t.len() {
                    return Err(CompileError::syntax(ln, "expected '{' after switch header"));
                }
                let subject = self.expr(&t[2..close], ln)?;
                self.expect_open_brace(ln)?;
                let body = self.parse_block(&[])?;
                StmtKind::Switch { subject, body }
            }
            "case" => {
                self.require(Feature::Switch, "'case'", ln)?;
                match t.last() {
                    Some(colon) if colon.is(":") && t.len() > 2 => StmtKind::Case(self.expr(&t[1..t.len() - 1], ln)?),
                    _ => return Err(CompileError::syntax(ln, "expected 'case value:'")),
                }
            }
            "default" => {
                self.require(Feature::Switch, "'default' label", ln)?;
                if t.len() != 2 || !t[1].is(":") {
                    return Err(CompileError::syntax(ln, "expected 'default:'"));
                }
                StmtKind::DefaultCase
            }
            "break" | "continue" => {
                self.require(Feature::BreakContinue, &format!("'{}'", t[0].text), ln)?;
                let depth = match t {
                    [_, semi] if semi.is(";") => 1,
                    [_, n, semi] if n.kind == TokenKind::Integer && semi.is(";") => n
                        .text
                        .parse::<u32>()
                        .ok()
                        .filter(|d| *d > 0)
                        .ok_or_else(|| CompileError::syntax(ln, "loop depth must be a positive integer"))?,
                    _ => return Err(CompileError::syntax(ln, format!("expected '{} [depth];'", t[0].text))),
                };
                if t[0].text == "break" {
                    StmtKind::Break(depth)
                } else {
                    StmtKind::Continue(depth)
                }
            }
            "return" => {
                if t.len() == 2 && t[1].is(";") {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.expr(statement_body(t, 1, ln)?, ln)?))
                }
            }
            "jump" => match t {
                [_, name, semi] if name.kind == TokenKind::Identifier && semi.is(";") => StmtKind::Jump(name.text.clone()),
                _ => return Err(CompileError::syntax(ln, "expected 'jump label;'")),
            },
            "state" => match t {
                [_, name, semi] if semi.is(";") && (name.kind == TokenKind::Identifier || name.is_keyword("default")) => {
                    StmtKind::StateChange(name.text.clone())
                }
                _ => return Err(CompileError::syntax(ln, "expected 'state name;'")),
            },
            other => return Err(CompileError::syntax(ln, format!("unexpected '{}'", other))),
        };
        Ok(kind)
    }

    /// Local declaration or expression statement
    fn simple_statement(&mut self, t: &[Token], ln: usize) -> Result<StmtKind, CompileError> {
        let declares = t.len() >= 3
            && matches!(t[1].kind, TokenKind::Identifier | TokenKind::Keyword)
            && (t[2].is(";") || t[2].is("="));

        if let (true, Some(ty)) = (declares, self.types.is_type_token(&t[0])) {
            let name = self.check_new_name(&t[1])?;
            if self.function_names.contains(&name) {
                return Err(CompileError::name(ln, format!("'{}' is already a function", name)));
            }

            let init = if t[2].is("=") {
                Some(self.expr(statement_body(t, 3, ln)?, ln)?)
            } else if t.len() == 3 {
                None
            } else {
                return Err(CompileError::syntax(ln, "expected ';'"));
            };

            let scope = self
                .scopes
                .last_mut()
                .ok_or_else(|| CompileError::internal(ln, "declaration outside any block"))?;
            if !scope.insert(name.clone()) {
                return Err(CompileError::name(ln, format!("'{}' is already declared in this block", name)));
            }
            return Ok(StmtKind::Local { ty, name, init });
        }

        Ok(StmtKind::Expr(self.expr(statement_body(t, 0, ln)?, ln)?))
    }

    fn expression_list(&self, tokens: &[Token], ln: usize) -> Result<Vec<Expr>, CompileError> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        split_top_level(tokens, ",")
            .into_iter()
            .map(|part| self.expr(part, ln))
            .collect()
    }
}

/// Tokens from `start` up to a required trailing `;`
fn statement_body(t: &[Token], start: usize, ln: usize) -> Result<&[Token], CompileError> {
    match t.last() {
        Some(semi) if semi.is(";") && t.len() > start => Ok(&t[start..t.len() - 1]),
        _ => Err(CompileError::syntax(ln, "expected ';'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileErrorKind;
    use crate::lsl::lexer::tokenize;
    use lslvm_core::CompatMode;

    fn parse_mode(mode: CompatMode, source: &str) -> Result<Declarations, CompileError> {
        let api = ApiSurface::standard();
        let flags = FeatureFlags::for_mode(mode, &api);
        Parser::new(tokenize(source)?, &api, &flags).parse()
    }

    fn parse(source: &str) -> Result<Declarations, CompileError> {
        parse_mode(CompatMode::Lsl, source)
    }

    fn error_kind(source: &str) -> CompileErrorKind {
        parse(source).unwrap_err().kind
    }

    #[test]
    fn test_minimal_script() {
        let decls = parse("default { state_entry() { llSay(0, \"hi\"); } }").unwrap();
        assert_eq!(decls.states.len(), 1);
        assert_eq!(decls.states[0].events[0].name, "state_entry");
    }

    #[test]
    fn test_globals_and_functions() {
        let decls = parse(
            "integer count = 2;\nfloat half(float v) { return v / 2; }\nping() { }\ndefault { state_entry() { } }",
        )
        .unwrap();
        assert_eq!(decls.globals[0].name, "count");
        assert_eq!(decls.functions[0].ret, Type::Float);
        assert_eq!(decls.functions[1].ret, Type::Void);
    }

    #[test]
    fn test_same_block_redeclaration() {
        let err = parse("default { state_entry() { integer x; integer x; } }").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Name);

        parse("default { state_entry() { integer x; { integer x; } if (x) { integer x = 2; } } }").unwrap();
    }

    #[test]
    fn test_parameter_shares_body_scope() {
        assert_eq!(
            error_kind("f(integer a) { integer a; }\ndefault { state_entry() { } }"),
            CompileErrorKind::Name
        );
    }

    #[test]
    fn test_reserved_names() {
        assert_eq!(error_kind("integer llSay;\ndefault { state_entry() { } }"), CompileErrorKind::Name);
        assert_eq!(error_kind("default { state_entry() { integer while; } }"), CompileErrorKind::Name);
        assert_eq!(error_kind("default { state_entry() { float PI = 3; } }"), CompileErrorKind::Name);
        assert_eq!(
            error_kind("f() { }\ndefault { state_entry() { integer f; } }"),
            CompileErrorKind::Name
        );
    }

    #[test]
    fn test_events_match_signatures() {
        assert_eq!(error_kind("default { bogus_event() { } }"), CompileErrorKind::Name);
        assert_eq!(error_kind("default { touch_start(string n) { } }"), CompileErrorKind::Type);
        assert_eq!(
            error_kind("default { timer() { } timer() { } }"),
            CompileErrorKind::Name
        );
    }

    #[test]
    fn test_state_ordering() {
        assert_eq!(error_kind("integer x;"), CompileErrorKind::Syntax);
        assert_eq!(error_kind("state other { state_entry() { } }"), CompileErrorKind::Syntax);
        assert_eq!(
            error_kind("default { state_entry() { } }\ninteger late;"),
            CompileErrorKind::Syntax
        );
        let decls = parse("default { state_entry() { state other; } }\nstate other { state_entry() { } }").unwrap();
        assert_eq!(decls.states[1].name, "other");
    }

    #[test]
    fn test_implicit_blocks() {
        let decls = parse("default { state_entry() { integer b; if (b) b = 1; else if (b > 2) b = 2; else b = 3; } }").unwrap();
        let body = &decls.states[0].events[0].body.statements;
        match &body[1].kind {
            StmtKind::If {
                then_branch,
                else_branch: Some(else_branch),
                ..
            } => {
                assert!(then_branch.implicit);
                assert!(matches!(else_branch.statements[0].kind, StmtKind::If { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_do_while_and_for() {
        let decls = parse(
            "default { state_entry() { integer i; do i++; while (i < 3); for (i = 0, i++; i < 9; i += 2) ; } }",
        )
        .unwrap();
        let body = &decls.states[0].events[0].body.statements;
        assert!(matches!(body[1].kind, StmtKind::DoWhile { .. }));
        match &body[2].kind {
            StmtKind::For { init, step, .. } => {
                assert_eq!(init.len(), 2);
                assert_eq!(step.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_extended_grammar_is_gated() {
        let source = "default { state_entry() { switch (1) { case 1: break; } } }";
        assert_eq!(error_kind(source), CompileErrorKind::Syntax);
        let decls = parse_mode(CompatMode::Assl, source).unwrap();
        let body = &decls.states[0].events[0].body.statements;
        match &body[0].kind {
            StmtKind::Switch { body, .. } => {
                assert!(matches!(body.statements[0].kind, StmtKind::Case(Expr::Integer(1))));
                assert!(matches!(body.statements[1].kind, StmtKind::Break(1)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_foreach_forms() {
        let decls = parse_mode(
            CompatMode::Assl,
            "default { state_entry() { string s; foreach (s in [\"a\"]) ; foreach (integer i in [1, 2]) { continue 1; } } }",
        )
        .unwrap();
        let body = &decls.states[0].events[0].body.statements;
        assert!(matches!(&body[1].kind, StmtKind::ForEach { declared: None, .. }));
        assert!(matches!(&body[2].kind, StmtKind::ForEach { declared: Some(Type::Integer), .. }));
    }

    #[test]
    fn test_aurora_declarations() {
        let decls = parse_mode(
            CompatMode::Aurora,
            "struct Point\n{\n float x;\n float y;\n}\nextern integer hostCount(string);\n\
             default { integer visits = 1; timer pulse() { } state_entry() { Point p; p.x = 2; } }",
        )
        .unwrap();
        assert_eq!(decls.structs[0].fields.len(), 2);
        assert_eq!(decls.externs[0].params, vec![Type::String]);
        assert_eq!(decls.states[0].variables[0].name, "visits");
        assert_eq!(decls.states[0].events[0].name, "timer:pulse");
    }

    #[test]
    fn test_overloads() {
        parse("integer f(integer a) { return a; }\ninteger f(float a) { return 1; }\ndefault { state_entry() { } }").unwrap();
        assert_eq!(
            error_kind("f(integer a) { }\nf(integer b) { }\ndefault { state_entry() { } }"),
            CompileErrorKind::Name
        );
    }

    #[test]
    fn test_missing_semicolon() {
        assert_eq!(error_kind("default { state_entry() { llSay(0, \"x\") } }"), CompileErrorKind::Syntax);
    }
}
