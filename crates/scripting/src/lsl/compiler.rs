//! LSL Compiler
//!
//! Drives lexing and parsing, then generates one bytecode routine per user
//! function and event handler plus the variable initializers.

use crate::api::ApiSurface;
use crate::error::CompileError;
use crate::lsl::ast::*;
use crate::lsl::bytecode::{Chunk, Instruction};
use crate::lsl::directives::FeatureFlags;
use crate::lsl::lexer::{IncludeResolver, Lexer};
use crate::lsl::parser::Parser;
use crate::lsl::resolver::{children, CallTarget, Callable, Fragment, Resolver, Scope, Slot, Symbols, Variable};
use crate::lsl::unit::*;
use crate::lsl::value::Value;
use lslvm_config::EngineConfig;
use lslvm_core::CompatMode;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Per-compilation options
#[derive(Clone, Default)]
pub struct CompileOptions {
    /// Directive lines applied before the source, e.g. `#!Mode:assl`
    pub directives: Vec<String>,
    pub locale: String,
    /// Mode for scripts without `#!Mode:`
    pub default_mode: CompatMode,
    /// Extensions enabled for every script
    pub extensions: Vec<String>,
    pub include_resolver: Option<Arc<dyn IncludeResolver>>,
}

impl CompileOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            directives: Vec::new(),
            locale: config.locale.clone(),
            default_mode: config.default_mode,
            extensions: config.extensions.clone(),
            include_resolver: None,
        }
    }

    pub fn with_directive(mut self, line: &str) -> Self {
        self.directives.push(line.to_string());
        self
    }
}

/// LSL compiler bound to an API surface
#[derive(Clone)]
pub struct Compiler {
    api: Arc<ApiSurface>,
}

impl Compiler {
    pub fn new(api: Arc<ApiSurface>) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &Arc<ApiSurface> {
        &self.api
    }

    /// Compile source text into an executable unit
    pub fn compile(&self, source: &str, options: &CompileOptions) -> Result<ExecutableUnit, CompileError> {
        let mut lexer = Lexer::new(source).with_directives(&options.directives)?;
        if let Some(resolver) = options.include_resolver.as_deref() {
            lexer = lexer.with_include_resolver(resolver);
        }
        let lexed = lexer.tokenize()?;

        let flags = FeatureFlags::resolve(&lexed.directives, options.default_mode, &options.extensions, &self.api)?;
        let decls = Parser::new(lexed.lines, &self.api, &flags).parse()?;

        let unit = Codegen::new(&self.api, &flags, &decls).generate(self.api.clone(), &options.locale)?;
        tracing::debug!(
            "Compiled {} routines, {} fields, {} states ({} mode)",
            unit.functions.len(),
            unit.fields.len(),
            unit.states.len(),
            unit.metadata.mode
        );
        Ok(unit)
    }

    /// Validate source without keeping the unit
    pub fn check(&self, source: &str, options: &CompileOptions) -> Option<CompileError> {
        self.compile(source, options).err()
    }
}

/// Compile against the standard library
pub fn compile(source: &str, options: &CompileOptions) -> Result<ExecutableUnit, CompileError> {
    Compiler::new(Arc::new(ApiSurface::standard())).compile(source, options)
}

/// Check source against the standard library
pub fn check(source: &str, options: &CompileOptions) -> Option<CompileError> {
    compile(source, options).err()
}

/// Global and state-variable slots
#[derive(Default)]
struct Globals {
    slots: HashMap<String, Variable>,
    state_slots: Vec<HashMap<String, Variable>>,
}

enum Target {
    Loop { breaks: Vec<usize>, continues: Vec<usize> },
    Switch { breaks: Vec<usize> },
}

impl Target {
    fn breaks(&mut self) -> &mut Vec<usize> {
        match self {
            Target::Loop { breaks, .. } | Target::Switch { breaks } => breaks,
        }
    }
}

/// Storage and control-flow bookkeeping for one routine
struct FunctionBuilder<'g> {
    globals: &'g Globals,
    state: Option<usize>,
    ret: Type,
    chunk: Chunk,
    scopes: Vec<HashMap<String, Variable>>,
    next_slot: u16,
    overflow: bool,
    targets: Vec<Target>,
    labels: HashMap<String, u32>,
    jumps: Vec<(String, usize, usize)>,
}

impl<'g> FunctionBuilder<'g> {
    fn new(globals: &'g Globals, state: Option<usize>, ret: Type) -> Self {
        Self {
            globals,
            state,
            ret,
            chunk: Chunk::new(),
            scopes: Vec::new(),
            next_slot: 0,
            overflow: false,
            targets: Vec::new(),
            labels: HashMap::new(),
            jumps: Vec::new(),
        }
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str, ty: Type, line: usize) -> Result<u16, CompileError> {
        let slot = self.temp();
        let scope = self
            .scopes
            .last_mut()
            .ok_or_else(|| CompileError::internal(line, "declaration outside of any scope"))?;
        if scope.contains_key(name) {
            return Err(CompileError::name(line, format!("'{}' is already declared in this scope", name)));
        }
        scope.insert(name.to_string(), Variable { slot: Slot::Local(slot), ty });
        Ok(slot)
    }

    fn emit(&mut self, instruction: Instruction, line: usize) -> usize {
        self.chunk.write(instruction, line)
    }

    fn emit_fragment(&mut self, fragment: &Fragment, line: usize) {
        self.chunk.extend(&fragment.code, line);
    }

    fn patch_here(&mut self, at: usize) {
        let here = self.chunk.position();
        self.chunk.patch(at, here);
    }

    /// Resolve labels and package the routine
    fn finish(mut self, name: String, kind: FunctionKind, params: Vec<Type>, line: usize) -> Result<FunctionProto, CompileError> {
        let mut missing: Vec<&str> = Vec::new();
        let mut first_line = None;
        for (label, at, jump_line) in &self.jumps {
            match self.labels.get(label) {
                Some(&target) => self.chunk.patch(*at, target),
                None => {
                    if !missing.contains(&label.as_str()) {
                        missing.push(label.as_str());
                    }
                    first_line.get_or_insert(*jump_line);
                }
            }
        }
        if !missing.is_empty() {
            return Err(CompileError::label(
                first_line.unwrap_or(line),
                format!("undefined label(s) in '{}': {}", name, missing.join(", ")),
            ));
        }
        if self.overflow {
            return Err(CompileError::internal(line, format!("'{}' uses too many local slots", name)));
        }

        Ok(FunctionProto {
            name,
            kind,
            params,
            ret: self.ret,
            locals: self.next_slot,
            chunk: self.chunk,
        })
    }
}

impl Scope for FunctionBuilder<'_> {
    fn lookup(&self, name: &str) -> Option<Variable> {
        if let Some(var) = self.scopes.iter().rev().find_map(|s| s.get(name)) {
            return Some(*var);
        }
        if let Some(var) = self.state.and_then(|s| self.globals.state_slots.get(s)?.get(name)) {
            return Some(*var);
        }
        self.globals.slots.get(name).copied()
    }

    fn temp(&mut self) -> u16 {
        let slot = self.next_slot;
        match self.next_slot.checked_add(1) {
            Some(next) => self.next_slot = next,
            None => self.overflow = true,
        }
        slot
    }

    fn constant(&mut self, value: Value) -> u32 {
        self.chunk.add_constant(value)
    }
}

/// Every variable name an initializer reads
fn free_variables(expr: &Expr) -> Vec<&str> {
    let mut names = Vec::new();
    let mut stack = vec![expr];
    while let Some(node) = stack.pop() {
        match node {
            Expr::Variable(name) => names.push(name.as_str()),
            Expr::IncDec { target, .. } => stack.push(&**target),
            Expr::Assign { target, value, .. } => {
                stack.push(&**target);
                stack.push(&**value);
            }
            other => stack.extend(children(other)),
        }
    }
    names
}

struct Codegen<'c> {
    symbols: Symbols<'c>,
    globals: Globals,
    fields: Vec<FieldInfo>,
    decls: &'c Declarations,
    flags: &'c FeatureFlags,
}

impl<'c> Codegen<'c> {
    fn new(api: &'c ApiSurface, flags: &'c FeatureFlags, decls: &'c Declarations) -> Self {
        let mut symbols = Symbols::new(api, flags);
        symbols.structs = decls
            .structs
            .iter()
            .map(|s| StructLayout {
                name: s.name.clone(),
                fields: s.fields.clone(),
            })
            .collect();
        for (i, f) in decls.functions.iter().enumerate() {
            symbols.add_callable(
                &f.name,
                Callable {
                    target: CallTarget::User(i as u32),
                    params: f.params.iter().map(|p| p.ty).collect(),
                    ret: f.ret,
                },
            );
        }
        for (i, e) in decls.externs.iter().enumerate() {
            symbols.add_callable(
                &e.name,
                Callable {
                    target: CallTarget::Extern(i as u32),
                    params: e.params.clone(),
                    ret: e.ret,
                },
            );
        }

        let mut globals = Globals::default();
        let mut fields = Vec::new();
        for g in &decls.globals {
            let slot = Slot::Global(fields.len() as u32);
            globals.slots.insert(g.name.clone(), Variable { slot, ty: g.ty });
            fields.push(FieldInfo {
                name: g.name.clone(),
                ty: g.ty,
                state: None,
            });
        }
        for (si, state) in decls.states.iter().enumerate() {
            let mut slots = HashMap::new();
            for v in &state.variables {
                let slot = Slot::Global(fields.len() as u32);
                slots.insert(v.name.clone(), Variable { slot, ty: v.ty });
                fields.push(FieldInfo {
                    name: format!("{}.{}", state.name, v.name),
                    ty: v.ty,
                    state: Some(si as u16),
                });
            }
            globals.state_slots.push(slots);
        }

        Self {
            symbols,
            globals,
            fields,
            decls,
            flags,
        }
    }

    fn generate(self, api: Arc<ApiSurface>, locale: &str) -> Result<ExecutableUnit, CompileError> {
        let mut functions = Vec::new();
        for f in &self.decls.functions {
            functions.push(self.routine(&f.name, FunctionKind::Function, &f.params, f.ret, &f.body, None, f.line)?);
        }

        let mut states = Vec::new();
        for (si, state) in self.decls.states.iter().enumerate() {
            let mut handlers = HashMap::new();
            for event in &state.events {
                let name = format!("{}::{}", state.name, event.name);
                let proto = self.routine(&name, FunctionKind::Event, &event.params, Type::Void, &event.body, Some(si), event.line)?;
                handlers.insert(event.name.clone(), functions.len() as u32);
                functions.push(proto);
            }
            states.push(StateInfo {
                name: state.name.clone(),
                handlers,
            });
        }

        let live_init = functions.len() as u32;
        functions.push(self.initializer("<init>")?);
        let reset_init = functions.len() as u32;
        functions.push(self.initializer("<reset>")?);

        Ok(ExecutableUnit {
            api,
            functions,
            fields: self.fields,
            states,
            structs: self.symbols.structs,
            externs: self
                .decls
                .externs
                .iter()
                .map(|e| ExternInfo {
                    name: e.name.clone(),
                    params: e.params.clone(),
                    ret: e.ret,
                    rpc: e.rpc,
                })
                .collect(),
            live_init,
            reset_init,
            metadata: UnitMetadata {
                mode: self.flags.mode,
                flags: self.flags.clone(),
                single_precision: self.flags.single_precision,
                locale: locale.to_string(),
            },
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn routine(
        &self,
        name: &str,
        kind: FunctionKind,
        params: &[Param],
        ret: Type,
        body: &Block,
        state: Option<usize>,
        line: usize,
    ) -> Result<FunctionProto, CompileError> {
        let mut fb = FunctionBuilder::new(&self.globals, state, ret);
        fb.push_scope();
        for p in params {
            fb.declare(&p.name, p.ty, line)?;
        }
        for stmt in &body.statements {
            self.statement(&mut fb, stmt)?;
        }
        fb.pop_scope();

        let end = body.statements.last().map_or(line, |s| s.line);
        self.default_return(&mut fb, end);
        fb.finish(name.to_string(), kind, params.iter().map(|p| p.ty).collect(), line)
    }

    fn default_return(&self, fb: &mut FunctionBuilder<'_>, line: usize) {
        if fb.ret == Type::Void {
            fb.emit(Instruction::Return, line);
        } else {
            let value = Value::default_for(fb.ret, &self.symbols.structs);
            let index = fb.constant(value);
            fb.emit(Instruction::Const(index), line);
            fb.emit(Instruction::ReturnValue, line);
        }
    }

    /// Initialize globals and state variables in dependency order
    fn initializer(&self, name: &str) -> Result<FunctionProto, CompileError> {
        let mut fb = FunctionBuilder::new(&self.globals, None, Type::Void);
        fb.push_scope();

        let mut entries: Vec<(u32, &VariableDecl, Option<usize>)> = Vec::new();
        let mut slot = 0u32;
        for g in &self.decls.globals {
            entries.push((slot, g, None));
            slot += 1;
        }
        for (si, state) in self.decls.states.iter().enumerate() {
            for v in &state.variables {
                entries.push((slot, v, Some(si)));
                slot += 1;
            }
        }

        let mut ready: HashSet<u32> = entries
            .iter()
            .filter(|(_, decl, _)| decl.init.is_none())
            .map(|(slot, _, _)| *slot)
            .collect();
        let mut pending: VecDeque<usize> = (0..entries.len()).filter(|&i| entries[i].1.init.is_some()).collect();
        let mut stalled = 0;

        while let Some(i) = pending.pop_front() {
            let (slot, decl, state) = entries[i];
            let Some(init) = &decl.init else { continue };
            fb.state = state;

            let blocked = free_variables(init).into_iter().any(|var| match fb.lookup(var) {
                Some(Variable { slot: Slot::Global(g), .. }) => !ready.contains(&g),
                _ => false,
            });
            if blocked {
                pending.push_back(i);
                stalled += 1;
                if stalled >= pending.len() {
                    let names: Vec<&str> = pending.iter().map(|&p| entries[p].1.name.as_str()).collect();
                    return Err(CompileError::internal(
                        decl.line,
                        format!("cycle between variable initializers: {}", names.join(", ")),
                    ));
                }
                continue;
            }

            let resolver = Resolver::new(&self.symbols, decl.line);
            let value = resolver.resolve(init, &mut fb)?;
            let value = resolver.coerce(value, decl.ty, "initializer")?;
            fb.emit_fragment(&value, decl.line);
            if self.symbols.api.copy_on_assign(decl.ty) {
                fb.emit(Instruction::DeepCopy, decl.line);
            }
            fb.emit(Instruction::StoreGlobal(slot), decl.line);
            ready.insert(slot);
            stalled = 0;
        }

        fb.state = None;
        fb.pop_scope();
        fb.emit(Instruction::Return, 0);
        fb.finish(name.to_string(), FunctionKind::Initializer, Vec::new(), 0)
    }

    fn expression(&self, fb: &mut FunctionBuilder<'_>, expr: &Expr, line: usize) -> Result<Fragment, CompileError> {
        Resolver::new(&self.symbols, line).resolve(expr, fb)
    }

    fn condition(&self, fb: &mut FunctionBuilder<'_>, expr: &Expr, line: usize) -> Result<(), CompileError> {
        let fragment = self.expression(fb, expr, line)?;
        if fragment.ty == Type::Void {
            return Err(CompileError::type_error(line, "condition has no value"));
        }
        fb.emit_fragment(&fragment, line);
        Ok(())
    }

    /// Evaluate expressions for their side effects
    fn discard(&self, fb: &mut FunctionBuilder<'_>, exprs: &[Expr], line: usize) -> Result<(), CompileError> {
        for expr in exprs {
            let fragment = self.expression(fb, expr, line)?;
            fb.emit_fragment(&fragment, line);
            if fragment.ty != Type::Void {
                fb.emit(Instruction::Pop, line);
            }
        }
        Ok(())
    }

    fn block(&self, fb: &mut FunctionBuilder<'_>, block: &Block) -> Result<(), CompileError> {
        fb.push_scope();
        for stmt in &block.statements {
            self.statement(fb, stmt)?;
        }
        fb.pop_scope();
        Ok(())
    }

    fn statement(&self, fb: &mut FunctionBuilder<'_>, stmt: &Stmt) -> Result<(), CompileError> {
        let line = stmt.line;
        match &stmt.kind {
            StmtKind::Expr(expr) => self.discard(fb, std::slice::from_ref(expr), line)?,

            StmtKind::Local { ty, name, init } => {
                match init {
                    Some(expr) => {
                        let resolver = Resolver::new(&self.symbols, line);
                        let value = resolver.resolve(expr, fb)?;
                        let value = resolver.coerce(value, *ty, "declaration")?;
                        fb.emit_fragment(&value, line);
                        if self.symbols.api.copy_on_assign(*ty) {
                            fb.emit(Instruction::DeepCopy, line);
                        }
                    }
                    None => {
                        let index = fb.constant(Value::default_for(*ty, &self.symbols.structs));
                        fb.emit(Instruction::Const(index), line);
                    }
                }
                let slot = fb.declare(name, *ty, line)?;
                fb.emit(Instruction::StoreLocal(slot), line);
            }

            StmtKind::If { .. } => self.if_chain(fb, stmt)?,

            StmtKind::While { condition, body } => {
                let start = fb.chunk.position();
                self.condition(fb, condition, line)?;
                let exit = fb.emit(Instruction::JumpIfFalse(0), line);
                let target = self.loop_body(fb, body)?;
                self.close_loop(fb, target, start, start, Some(exit), line);
            }

            StmtKind::DoWhile { body, condition } => {
                let start = fb.chunk.position();
                let target = self.loop_body(fb, body)?;
                let check = fb.chunk.position();
                self.condition(fb, condition, line)?;
                fb.emit(Instruction::JumpIfTrue(start), line);
                if let Target::Loop { breaks, continues } = target {
                    for at in continues {
                        fb.chunk.patch(at, check);
                    }
                    for at in breaks {
                        fb.patch_here(at);
                    }
                }
            }

            StmtKind::For { init, condition, step, body } => {
                self.discard(fb, init, line)?;
                let start = fb.chunk.position();
                let exit = match condition {
                    Some(cond) => {
                        self.condition(fb, cond, line)?;
                        Some(fb.emit(Instruction::JumpIfFalse(0), line))
                    }
                    None => None,
                };
                let target = self.loop_body(fb, body)?;
                let next = fb.chunk.position();
                self.discard(fb, step, line)?;
                self.close_loop(fb, target, start, next, exit, line);
            }

            StmtKind::ForEach { declared, variable, iterable, body } => {
                self.for_each(fb, *declared, variable, iterable, body, line)?;
            }

            StmtKind::Switch { subject, body } => self.switch(fb, subject, body, line)?,

            StmtKind::Case(_) => return Err(CompileError::syntax(line, "'case' outside of a switch")),
            StmtKind::DefaultCase => return Err(CompileError::syntax(line, "'default' outside of a switch")),

            StmtKind::Break(depth) => {
                let at = fb.emit(Instruction::Jump(0), line);
                let target = Self::nth_target(fb, *depth, false, line, "break")?;
                target.breaks().push(at);
            }

            StmtKind::Continue(depth) => {
                let at = fb.emit(Instruction::Jump(0), line);
                if let Target::Loop { continues, .. } = Self::nth_target(fb, *depth, true, line, "continue")? {
                    continues.push(at);
                }
            }

            StmtKind::Return(value) => match (value, fb.ret) {
                (Some(_), Type::Void) => {
                    return Err(CompileError::type_error(line, "a void function cannot return a value"));
                }
                (Some(expr), ret) => {
                    let resolver = Resolver::new(&self.symbols, line);
                    let value = resolver.resolve(expr, fb)?;
                    let value = resolver.coerce(value, ret, "return")?;
                    fb.emit_fragment(&value, line);
                    fb.emit(Instruction::ReturnValue, line);
                }
                (None, _) => self.default_return(fb, line),
            },

            StmtKind::Jump(label) => {
                let at = fb.emit(Instruction::Jump(0), line);
                fb.jumps.push((label.clone(), at, line));
            }

            StmtKind::Label(label) => {
                let here = fb.chunk.position();
                if fb.labels.insert(label.clone(), here).is_some() {
                    return Err(CompileError::name(line, format!("label '{}' is already defined", label)));
                }
            }

            StmtKind::StateChange(name) => {
                let index = self
                    .decls
                    .state(name)
                    .ok_or_else(|| CompileError::name(line, format!("state '{}' is not defined", name)))?;
                fb.emit(Instruction::ChangeState(index as u16), line);
            }

            StmtKind::Block(block) => self.block(fb, block)?,

            StmtKind::Empty => {}
        }
        Ok(())
    }

    /// `if`/`else if` chains jump to one shared exit
    fn if_chain(&self, fb: &mut FunctionBuilder<'_>, stmt: &Stmt) -> Result<(), CompileError> {
        let mut exits = Vec::new();
        let mut current = stmt;

        while let StmtKind::If { condition, then_branch, else_branch } = &current.kind {
            let line = current.line;
            self.condition(fb, condition, line)?;
            let skip = fb.emit(Instruction::JumpIfFalse(0), line);
            self.block(fb, then_branch)?;

            let Some(otherwise) = else_branch else {
                fb.patch_here(skip);
                break;
            };
            exits.push(fb.emit(Instruction::Jump(0), line));
            fb.patch_here(skip);

            match otherwise.statements.as_slice() {
                [next] if otherwise.implicit && matches!(next.kind, StmtKind::If { .. }) => current = next,
                _ => {
                    self.block(fb, otherwise)?;
                    break;
                }
            }
        }

        for at in exits {
            fb.patch_here(at);
        }
        Ok(())
    }

    fn loop_body(&self, fb: &mut FunctionBuilder<'_>, body: &Block) -> Result<Target, CompileError> {
        fb.targets.push(Target::Loop {
            breaks: Vec::new(),
            continues: Vec::new(),
        });
        let result = self.block(fb, body);
        let target = fb.targets.pop();
        result?;
        target.ok_or_else(|| CompileError::internal(0, "loop target stack underflow"))
    }

    fn close_loop(&self, fb: &mut FunctionBuilder<'_>, target: Target, start: u32, next: u32, exit: Option<usize>, line: usize) {
        fb.emit(Instruction::Jump(start), line);
        if let Some(at) = exit {
            fb.patch_here(at);
        }
        if let Target::Loop { breaks, continues } = target {
            for at in continues {
                fb.chunk.patch(at, next);
            }
            for at in breaks {
                fb.patch_here(at);
            }
        }
    }

    /// The `depth`-th enclosing target; `continue` skips switches
    fn nth_target<'f>(
        fb: &'f mut FunctionBuilder<'_>,
        depth: u32,
        loops_only: bool,
        line: usize,
        keyword: &str,
    ) -> Result<&'f mut Target, CompileError> {
        if depth == 0 {
            return Err(CompileError::syntax(line, format!("'{}' depth must be at least 1", keyword)));
        }
        fb.targets
            .iter_mut()
            .rev()
            .filter(|t| !loops_only || matches!(t, Target::Loop { .. }))
            .nth(depth as usize - 1)
            .ok_or_else(|| {
                let scope = if loops_only { "loop" } else { "loop or switch" };
                if depth == 1 {
                    CompileError::syntax(line, format!("'{}' outside of a {}", keyword, scope))
                } else {
                    CompileError::syntax(line, format!("'{} {}' exceeds the enclosing {} nesting", keyword, depth, scope))
                }
            })
    }

    #[allow(clippy::too_many_arguments)]
    fn for_each(
        &self,
        fb: &mut FunctionBuilder<'_>,
        declared: Option<Type>,
        variable: &str,
        iterable: &Expr,
        body: &Block,
        line: usize,
    ) -> Result<(), CompileError> {
        fb.push_scope();

        let list = self.expression(fb, iterable, line)?;
        if list.ty != Type::List {
            return Err(CompileError::type_error(line, format!("foreach needs a list, found {}", list.ty)));
        }
        let items = fb.temp();
        fb.emit_fragment(&list, line);
        fb.emit(Instruction::StoreLocal(items), line);
        let index = fb.temp();
        let zero = fb.constant(Value::Integer(0));
        fb.emit(Instruction::Const(zero), line);
        fb.emit(Instruction::StoreLocal(index), line);

        let var = match declared {
            Some(ty) => {
                let slot = fb.declare(variable, ty, line)?;
                Variable { slot: Slot::Local(slot), ty }
            }
            None => fb
                .lookup(variable)
                .ok_or_else(|| CompileError::name(line, format!("'{}' is not defined", variable)))?,
        };
        if matches!(var.ty, Type::Void | Type::List | Type::Struct(_)) {
            return Err(CompileError::type_error(
                line,
                format!("foreach variable cannot be a {}", var.ty),
            ));
        }

        let start = fb.chunk.position();
        fb.emit(Instruction::LoadLocal(index), line);
        fb.emit(Instruction::LoadLocal(items), line);
        fb.emit(Instruction::ListLength, line);
        fb.emit(Instruction::Binary(BinaryOp::Less), line);
        let exit = fb.emit(Instruction::JumpIfFalse(0), line);
        fb.emit(Instruction::LoadLocal(items), line);
        fb.emit(Instruction::LoadLocal(index), line);
        fb.emit(Instruction::ListElement(var.ty), line);
        fb.emit(
            match var.slot {
                Slot::Local(s) => Instruction::StoreLocal(s),
                Slot::Global(g) => Instruction::StoreGlobal(g),
            },
            line,
        );

        let target = self.loop_body(fb, body)?;
        let next = fb.chunk.position();
        let one = fb.constant(Value::Integer(1));
        fb.emit(Instruction::LoadLocal(index), line);
        fb.emit(Instruction::Const(one), line);
        fb.emit(Instruction::Binary(BinaryOp::Add), line);
        fb.emit(Instruction::StoreLocal(index), line);
        self.close_loop(fb, target, start, next, Some(exit), line);

        fb.pop_scope();
        Ok(())
    }

    fn switch(&self, fb: &mut FunctionBuilder<'_>, subject: &Expr, body: &Block, line: usize) -> Result<(), CompileError> {
        let statements = &body.statements;
        if let Some(first) = statements.first() {
            if !matches!(first.kind, StmtKind::Case(_) | StmtKind::DefaultCase) {
                return Err(CompileError::syntax(first.line, "missing case or default before statement"));
            }
        }

        let subject = self.expression(fb, subject, line)?;
        if subject.ty == Type::Void {
            return Err(CompileError::type_error(line, "switch subject has no value"));
        }
        let subject_ty = subject.ty;
        let temp = fb.temp();
        fb.emit_fragment(&subject, line);
        fb.emit(Instruction::StoreLocal(temp), line);

        // Dispatch: compare against each case in order
        let mut dispatch: Vec<(usize, usize)> = Vec::new();
        let mut default = None;
        for (i, stmt) in statements.iter().enumerate() {
            match &stmt.kind {
                StmtKind::Case(value) => {
                    let resolver = Resolver::new(&self.symbols, stmt.line);
                    let value = resolver.resolve(value, fb)?;
                    let current = Fragment::new(vec![Instruction::LoadLocal(temp)], subject_ty);
                    let test = resolver.binary(BinaryOp::Equal, current, value)?;
                    fb.emit_fragment(&test, stmt.line);
                    dispatch.push((i, fb.emit(Instruction::JumpIfTrue(0), stmt.line)));
                }
                StmtKind::DefaultCase => {
                    if default.is_some() {
                        return Err(CompileError::syntax(stmt.line, "duplicate 'default' in switch"));
                    }
                    default = Some(i);
                }
                _ => {}
            }
        }
        let fallback = fb.emit(Instruction::Jump(0), line);

        fb.targets.push(Target::Switch { breaks: Vec::new() });
        fb.push_scope();
        let mut positions = HashMap::new();
        let mut result = Ok(());
        for (i, stmt) in statements.iter().enumerate() {
            if matches!(stmt.kind, StmtKind::Case(_) | StmtKind::DefaultCase) {
                positions.insert(i, fb.chunk.position());
            } else if let Err(e) = self.statement(fb, stmt) {
                result = Err(e);
                break;
            }
        }
        fb.pop_scope();
        let target = fb.targets.pop();
        result?;

        let end = fb.chunk.position();
        for (i, at) in dispatch {
            fb.chunk.patch(at, positions.get(&i).copied().unwrap_or(end));
        }
        fb.chunk
            .patch(fallback, default.and_then(|i| positions.get(&i).copied()).unwrap_or(end));
        if let Some(mut target) = target {
            for at in target.breaks().drain(..) {
                fb.chunk.patch(at, end);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileErrorKind;

    fn options(mode: &str) -> CompileOptions {
        CompileOptions::default().with_directive(&format!("#!Mode:{}", mode))
    }

    fn compile_lsl(source: &str) -> Result<ExecutableUnit, CompileError> {
        compile(source, &CompileOptions::default())
    }

    #[test]
    fn test_compile_minimal() {
        let unit = compile_lsl("default { state_entry() { llSay(0, \"hi\"); } }").unwrap();
        assert_eq!(unit.states.len(), 1);
        assert!(unit.handler(0, "state_entry").is_some());
        assert_eq!(unit.metadata.mode, CompatMode::Lsl);
        assert!(unit.disassemble().contains("CallBuiltin"));
    }

    #[test]
    fn test_globals_and_state_variables_get_fields() {
        let source = "integer a = 1;\ndefault {\n integer hits;\n state_entry() { hits++; }\n}";
        let unit = compile(source, &options("aurora")).unwrap();
        assert_eq!(unit.fields.len(), 2);
        assert_eq!(unit.field_index("default.hits"), Some(1));
        assert_eq!(unit.fields[1].state, Some(0));
    }

    #[test]
    fn test_initializer_order_follows_dependencies() {
        let unit = compile_lsl("integer a = b + 1;\ninteger b = 2;\ndefault { state_entry() { } }").unwrap();
        let init = &unit.functions[unit.live_init as usize].chunk.code;
        let stores: Vec<_> = init
            .iter()
            .filter_map(|i| match i {
                Instruction::StoreGlobal(g) => Some(*g),
                _ => None,
            })
            .collect();
        assert_eq!(stores, vec![1, 0]);
        assert_eq!(
            unit.functions[unit.live_init as usize].chunk,
            unit.functions[unit.reset_init as usize].chunk
        );
    }

    #[test]
    fn test_initializer_cycle() {
        let err = compile_lsl("integer a = b;\ninteger b = a;\ndefault { state_entry() { } }").unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Internal);
        assert!(err.message.contains("cycle"));
    }

    #[test]
    fn test_undefined_labels_are_aggregated() {
        let source = "default {\n state_entry() {\n jump a;\n jump b;\n jump a;\n }\n}";
        let err = compile_lsl(source).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Label);
        assert_eq!(err.line, 3);
        assert!(err.message.contains("a, b"));
    }

    #[test]
    fn test_duplicate_label() {
        let source = "default { state_entry() { @x; @x; } }";
        assert_eq!(compile_lsl(source).unwrap_err().kind, CompileErrorKind::Name);
    }

    #[test]
    fn test_switch_structure_errors() {
        let missing = "default { state_entry() { switch (1) { llSay(0, \"x\"); case 1: break; } } }";
        assert_eq!(compile(missing, &options("assl")).unwrap_err().kind, CompileErrorKind::Syntax);

        let twice = "default { state_entry() { switch (1) { default: break; default: break; } } }";
        assert_eq!(compile(twice, &options("assl")).unwrap_err().kind, CompileErrorKind::Syntax);
    }

    #[test]
    fn test_break_outside_loop() {
        let source = "default { state_entry() { break; } }";
        let err = compile(source, &options("assl")).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Syntax);

        let deep = "default { state_entry() { while (1) { break 2; } } }";
        assert_eq!(compile(deep, &options("assl")).unwrap_err().kind, CompileErrorKind::Syntax);
    }

    #[test]
    fn test_return_rules() {
        let void_value = "f() { return 1; }\ndefault { state_entry() { } }";
        assert_eq!(compile_lsl(void_value).unwrap_err().kind, CompileErrorKind::Type);

        let bare = "integer f() { return; }\ndefault { state_entry() { } }";
        assert!(compile_lsl(bare).is_ok());
    }

    #[test]
    fn test_unknown_state() {
        let source = "default { state_entry() { state nowhere; } }";
        assert_eq!(compile_lsl(source).unwrap_err().kind, CompileErrorKind::Name);
    }

    #[test]
    fn test_check_reports_first_error() {
        assert!(check("default { state_entry() { } }", &CompileOptions::default()).is_none());
        let err = check("default { state_entry() { x = 1; } }", &CompileOptions::default()).unwrap();
        assert_eq!(err.kind, CompileErrorKind::Name);
    }

    #[test]
    fn test_options_from_config() {
        let config = EngineConfig {
            default_mode: CompatMode::Assl,
            locale: "de-DE".into(),
            ..EngineConfig::default()
        };
        let unit = compile("default { state_entry() { } }", &CompileOptions::from_config(&config)).unwrap();
        assert_eq!(unit.metadata.mode, CompatMode::Assl);
        assert_eq!(unit.metadata.locale, "de-DE");
    }
}
