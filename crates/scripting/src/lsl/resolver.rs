//! Expression resolution
//!
//! Turns an expression tree into a typed instruction fragment. Traversal
//! uses an explicit work stack so deeply nested expressions cannot
//! overflow the native stack: each node is visited once to schedule its
//! children and once more to combine their fragments.

use crate::api::ApiSurface;
use crate::error::CompileError;
use crate::lsl::ast::{BinaryOp, Expr, Type, UnaryOp};
use crate::lsl::bytecode::Instruction;
use crate::lsl::directives::FeatureFlags;
use crate::lsl::operators::{explicit_cast_allowed, select_overload, OperatorTable};
use crate::lsl::unit::StructLayout;
use crate::lsl::value::Value;
use std::collections::HashMap;

/// Instructions leaving one value of `ty` on the stack (nothing for void)
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub code: Vec<Instruction>,
    pub ty: Type,
}

impl Fragment {
    pub fn new(code: Vec<Instruction>, ty: Type) -> Self {
        Self { code, ty }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Slot {
    Local(u16),
    Global(u32),
}

/// A variable visible from the current scope
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Variable {
    pub slot: Slot,
    pub ty: Type,
}

impl Variable {
    fn load(&self) -> Instruction {
        match self.slot {
            Slot::Local(s) => Instruction::LoadLocal(s),
            Slot::Global(g) => Instruction::LoadGlobal(g),
        }
    }

    fn store(&self) -> Instruction {
        match self.slot {
            Slot::Local(s) => Instruction::StoreLocal(s),
            Slot::Global(g) => Instruction::StoreGlobal(g),
        }
    }
}

/// Name lookup and storage allocation for the routine being compiled
pub trait Scope {
    fn lookup(&self, name: &str) -> Option<Variable>;

    /// Allocate an anonymous local slot
    fn temp(&mut self) -> u16;

    fn constant(&mut self, value: Value) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CallTarget {
    User(u32),
    Builtin(u32),
    Extern(u32),
}

/// Something a call expression may bind to
#[derive(Debug, Clone, PartialEq)]
pub struct Callable {
    pub target: CallTarget,
    pub params: Vec<Type>,
    pub ret: Type,
}

/// Compilation-wide symbols the resolver reads
pub struct Symbols<'a> {
    pub api: &'a ApiSurface,
    pub flags: &'a FeatureFlags,
    pub operators: OperatorTable,
    /// User functions and externs by name
    pub functions: HashMap<String, Vec<Callable>>,
    pub structs: Vec<StructLayout>,
}

impl<'a> Symbols<'a> {
    pub fn new(api: &'a ApiSurface, flags: &'a FeatureFlags) -> Self {
        Self {
            api,
            flags,
            operators: OperatorTable::standard(),
            functions: HashMap::new(),
            structs: Vec::new(),
        }
    }

    pub fn add_callable(&mut self, name: &str, callable: Callable) {
        self.functions.entry(name.to_string()).or_default().push(callable);
    }

    /// Script-declared callables first, then visible library overloads
    pub fn callables(&self, name: &str) -> Vec<Callable> {
        let mut found = self.functions.get(name).cloned().unwrap_or_default();
        for (index, sig) in self.api.function_overloads(name, self.flags) {
            found.push(Callable {
                target: CallTarget::Builtin(index as u32),
                params: sig.params.clone(),
                ret: sig.ret,
            });
        }
        found
    }

    fn struct_layout(&self, ty: Type) -> Option<&StructLayout> {
        match ty {
            Type::Struct(id) => self.structs.get(id as usize),
            _ => None,
        }
    }

    /// Whether a resolved type belongs to the valid type set
    pub fn valid_type(&self, ty: Type) -> bool {
        match ty {
            Type::Void => true,
            Type::Struct(_) => self.struct_layout(ty).is_some(),
            other => self.api.type_admitted(other, self.flags),
        }
    }
}

enum Task<'e> {
    Visit(&'e Expr),
    Build(&'e Expr),
}

/// Operand sub-expressions in evaluation order
pub(crate) fn children(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::Vector(items) | Expr::Rotation(items) | Expr::List(items) => items.iter().collect(),
        Expr::Call { args, .. } => args.iter().collect(),
        Expr::Binary { left, right, .. } => vec![&**left, &**right],
        Expr::Unary { operand, .. } | Expr::Cast { operand, .. } => vec![&**operand],
        Expr::Member { object, .. } => vec![&**object],
        Expr::Index { object, index } => vec![&**object, &**index],
        Expr::Assign { value, .. } => vec![&**value],
        _ => Vec::new(),
    }
}

/// Variable name and member chain of an assignable expression
fn member_path(expr: &Expr) -> Option<(&str, Vec<&str>)> {
    let mut fields = Vec::new();
    let mut current = expr;
    loop {
        match current {
            Expr::Variable(name) => {
                fields.reverse();
                return Some((name, fields));
            }
            Expr::Member { object, name } => {
                fields.push(name.as_str());
                current = object;
            }
            _ => return None,
        }
    }
}

/// Resolves expressions for one source line
pub struct Resolver<'s, 'a> {
    symbols: &'s Symbols<'a>,
    line: usize,
}

impl<'s, 'a> Resolver<'s, 'a> {
    pub fn new(symbols: &'s Symbols<'a>, line: usize) -> Self {
        Self { symbols, line }
    }

    pub fn resolve(&self, expr: &Expr, scope: &mut dyn Scope) -> Result<Fragment, CompileError> {
        let mut tasks = vec![Task::Visit(expr)];
        let mut done: Vec<Fragment> = Vec::new();

        while let Some(task) = tasks.pop() {
            match task {
                Task::Visit(node) => {
                    let kids = children(node);
                    if kids.is_empty() {
                        let fragment = self.build(node, Vec::new(), scope)?;
                        done.push(fragment);
                    } else {
                        tasks.push(Task::Build(node));
                        tasks.extend(kids.into_iter().rev().map(Task::Visit));
                    }
                }
                Task::Build(node) => {
                    let count = children(node).len();
                    if done.len() < count {
                        return Err(self.internal("operand stack underflow"));
                    }
                    let args = done.split_off(done.len() - count);
                    let fragment = self.build(node, args, scope)?;
                    done.push(fragment);
                }
            }
        }

        match (done.pop(), done.is_empty()) {
            (Some(fragment), true) => Ok(fragment),
            _ => Err(self.internal("expression did not resolve to one value")),
        }
    }

    fn internal(&self, message: &str) -> CompileError {
        CompileError::internal(self.line, message)
    }

    fn build(&self, expr: &Expr, args: Vec<Fragment>, scope: &mut dyn Scope) -> Result<Fragment, CompileError> {
        let fragment = match expr {
            Expr::Integer(i) => self.literal(Value::Integer(*i), scope),
            Expr::Long(l) => self.literal(Value::Long(*l), scope),
            Expr::Float(f) => self.literal(Value::Float(*f), scope),
            Expr::String(s) => self.literal(Value::string(s.clone()), scope),
            Expr::Variable(name) => self.variable(name, scope)?,
            Expr::List(_) => self.list(args)?,
            Expr::Vector(_) => self.components(args, Instruction::MakeVector, Type::Vector)?,
            Expr::Rotation(_) => self.components(args, Instruction::MakeRotation, Type::Rotation)?,
            Expr::Call { name, .. } => self.call(name, args)?,
            Expr::Binary { op, .. } => {
                let mut args = args.into_iter();
                match (args.next(), args.next()) {
                    (Some(left), Some(right)) => self.binary(*op, left, right)?,
                    _ => return Err(self.internal("binary operator without operands")),
                }
            }
            Expr::Unary { op, .. } => self.unary(*op, single(args, self.line)?)?,
            Expr::Cast { ty, .. } => self.cast(*ty, single(args, self.line)?)?,
            Expr::Member { name, .. } => self.member(single(args, self.line)?, name)?,
            Expr::Index { .. } => {
                let mut args = args.into_iter();
                match (args.next(), args.next()) {
                    (Some(object), Some(index)) => self.index(object, index)?,
                    _ => return Err(self.internal("index without operands")),
                }
            }
            Expr::Assign { target, op, .. } => self.assign(target, *op, single(args, self.line)?, scope)?,
            Expr::IncDec { target, increment, prefix } => self.inc_dec(target, *increment, *prefix, scope)?,
        };

        if !self.symbols.valid_type(fragment.ty) {
            return Err(self.internal(&format!("resolved type '{}' is not a valid type", fragment.ty)));
        }
        Ok(fragment)
    }

    fn literal(&self, value: Value, scope: &mut dyn Scope) -> Fragment {
        let ty = value.type_of();
        Fragment::new(vec![Instruction::Const(scope.constant(value))], ty)
    }

    fn variable(&self, name: &str, scope: &mut dyn Scope) -> Result<Fragment, CompileError> {
        if let Some(var) = scope.lookup(name) {
            return Ok(Fragment::new(vec![var.load()], var.ty));
        }
        if let Some(constant) = self.symbols.api.constant(name, self.symbols.flags) {
            return Ok(self.literal(constant.value.clone(), scope));
        }
        Err(CompileError::name(self.line, format!("'{}' is not defined", name)))
    }

    fn list(&self, items: Vec<Fragment>) -> Result<Fragment, CompileError> {
        let count = u16::try_from(items.len())
            .map_err(|_| CompileError::syntax(self.line, "list literal has too many elements"))?;
        let mut code = Vec::new();
        for item in items {
            if matches!(item.ty, Type::Void | Type::List | Type::Struct(_)) {
                return Err(CompileError::type_error(
                    self.line,
                    format!("a list cannot contain a {}", item.ty),
                ));
            }
            code.extend(item.code);
        }
        code.push(Instruction::MakeList(count));
        Ok(Fragment::new(code, Type::List))
    }

    fn components(&self, items: Vec<Fragment>, make: Instruction, ty: Type) -> Result<Fragment, CompileError> {
        let mut code = Vec::new();
        for item in items {
            code.extend(self.coerce(item, Type::Float, "component")?.code);
        }
        code.push(make);
        Ok(Fragment::new(code, ty))
    }

    /// Apply an implicit cast or fail with a type error
    pub fn coerce(&self, fragment: Fragment, to: Type, context: &str) -> Result<Fragment, CompileError> {
        if fragment.ty == to {
            return Ok(fragment);
        }
        if fragment.ty != Type::Void && self.symbols.api.can_implicitly_cast(fragment.ty, to) {
            let mut code = fragment.code;
            code.push(Instruction::Cast(to));
            return Ok(Fragment::new(code, to));
        }
        Err(CompileError::type_error(
            self.line,
            format!("cannot use {} as {} in {}", fragment.ty, to, context),
        ))
    }

    fn describe(types: &[Type]) -> String {
        types.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ")
    }

    fn call(&self, name: &str, args: Vec<Fragment>) -> Result<Fragment, CompileError> {
        let candidates = self.symbols.callables(name);
        if candidates.is_empty() {
            return Err(CompileError::name(self.line, format!("function '{}' is not defined", name)));
        }

        let arg_types: Vec<Type> = args.iter().map(|a| a.ty).collect();
        let params: Vec<Vec<Type>> = candidates.iter().map(|c| c.params.clone()).collect();
        let api = self.symbols.api;
        let chosen = select_overload(&arg_types, &params, |from, to| api.can_implicitly_cast(from, to))
            .map_err(|count| {
                CompileError::type_error(
                    self.line,
                    format!(
                        "no overload of '{}' accepts ({}); {} candidate(s) take {} argument(s)",
                        name,
                        Self::describe(&arg_types),
                        count,
                        arg_types.len()
                    ),
                )
            })?;
        let callable = &candidates[chosen];

        let argc = u16::try_from(args.len())
            .map_err(|_| CompileError::syntax(self.line, "too many arguments"))?;
        let mut code = Vec::new();
        for (arg, param) in args.into_iter().zip(&callable.params) {
            code.extend(self.coerce(arg, *param, "argument")?.code);
        }
        code.push(match callable.target {
            CallTarget::User(function) => Instruction::Call { function, argc },
            CallTarget::Builtin(builtin) => Instruction::CallBuiltin { builtin, argc },
            CallTarget::Extern(index) => Instruction::CallExtern { index, argc },
        });
        Ok(Fragment::new(code, callable.ret))
    }

    /// Combine two operand fragments with a binary operator
    pub fn binary(&self, op: BinaryOp, left: Fragment, right: Fragment) -> Result<Fragment, CompileError> {
        let sigs = self.symbols.operators.binary(op);
        let params: Vec<Vec<Type>> = sigs.iter().map(|s| vec![s.left, s.right]).collect();
        let api = self.symbols.api;
        let chosen = select_overload(&[left.ty, right.ty], &params, |from, to| api.can_implicitly_cast(from, to))
            .map_err(|count| {
                CompileError::type_error(
                    self.line,
                    format!(
                        "operator '{}' is not defined for {} and {} ({} candidate(s))",
                        op.symbol(),
                        left.ty,
                        right.ty,
                        count
                    ),
                )
            })?;
        let sig = sigs[chosen];

        let mut code = self.coerce(left, sig.left, "operand")?.code;
        code.extend(self.coerce(right, sig.right, "operand")?.code);
        code.push(Instruction::Binary(op));
        Ok(Fragment::new(code, sig.result))
    }

    fn unary(&self, op: UnaryOp, operand: Fragment) -> Result<Fragment, CompileError> {
        let sigs = self.symbols.operators.unary(op);
        let params: Vec<Vec<Type>> = sigs.iter().map(|(t, _)| vec![*t]).collect();
        let api = self.symbols.api;
        let chosen = select_overload(&[operand.ty], &params, |from, to| api.can_implicitly_cast(from, to))
            .map_err(|_| {
                CompileError::type_error(
                    self.line,
                    format!("operator '{}' is not defined for {}", op.symbol(), operand.ty),
                )
            })?;
        let (param, result) = sigs[chosen];

        let mut code = self.coerce(operand, param, "operand")?.code;
        code.push(Instruction::Unary(op));
        Ok(Fragment::new(code, result))
    }

    fn cast(&self, to: Type, operand: Fragment) -> Result<Fragment, CompileError> {
        if operand.ty == to {
            return Ok(operand);
        }
        if !explicit_cast_allowed(operand.ty, to) {
            return Err(CompileError::type_error(
                self.line,
                format!("cannot cast {} to {}", operand.ty, to),
            ));
        }
        let mut code = operand.code;
        code.push(Instruction::Cast(to));
        Ok(Fragment::new(code, to))
    }

    /// Component index and type of `ty.name`
    fn member_info(&self, ty: Type, name: &str) -> Result<(u8, Type), CompileError> {
        let found = match (ty, name) {
            (Type::Vector | Type::Rotation, "x") => Some((0, Type::Float)),
            (Type::Vector | Type::Rotation, "y") => Some((1, Type::Float)),
            (Type::Vector | Type::Rotation, "z") => Some((2, Type::Float)),
            (Type::Rotation, "s") => Some((3, Type::Float)),
            (Type::Struct(_), _) => self
                .symbols
                .struct_layout(ty)
                .and_then(|layout| layout.field(name))
                .and_then(|(i, t)| u8::try_from(i).ok().map(|i| (i, t))),
            _ => None,
        };
        let struct_name = self.symbols.struct_layout(ty).map(|l| l.name.clone());
        found.ok_or_else(|| {
            CompileError::type_error(
                self.line,
                format!(
                    "{} has no member '{}'",
                    struct_name.unwrap_or_else(|| ty.to_string()),
                    name
                ),
            )
        })
    }

    fn member(&self, object: Fragment, name: &str) -> Result<Fragment, CompileError> {
        let (index, ty) = self.member_info(object.ty, name)?;
        let mut code = object.code;
        code.push(Instruction::GetComponent(index));
        Ok(Fragment::new(code, ty))
    }

    fn index(&self, object: Fragment, index: Fragment) -> Result<Fragment, CompileError> {
        let operators: Vec<_> = self
            .symbols
            .api
            .this_operators(self.symbols.flags)
            .into_iter()
            .filter(|op| op.container == object.ty)
            .collect();
        if operators.is_empty() {
            return Err(CompileError::type_error(
                self.line,
                format!("{} cannot be indexed", object.ty),
            ));
        }

        let params: Vec<Vec<Type>> = operators.iter().map(|op| vec![op.index]).collect();
        let api = self.symbols.api;
        let chosen = select_overload(&[index.ty], &params, |from, to| api.can_implicitly_cast(from, to))
            .map_err(|_| {
                CompileError::type_error(
                    self.line,
                    format!("{} cannot be indexed by {}", object.ty, index.ty),
                )
            })?;
        let operator = operators[chosen];

        let mut code = object.code;
        code.extend(self.coerce(index, operator.index, "index")?.code);
        code.push(Instruction::Index(operator.ret));
        Ok(Fragment::new(code, operator.ret))
    }

    /// Resolve an assignable expression to its variable and member chain
    fn target(&self, target: &Expr, scope: &dyn Scope) -> Result<(Variable, Vec<u8>, Type), CompileError> {
        let (name, fields) = member_path(target).ok_or_else(|| {
            let message = if matches!(target, Expr::Index { .. }) {
                "indexed elements cannot be assigned"
            } else {
                "invalid assignment target"
            };
            CompileError::syntax(self.line, message)
        })?;

        let var = scope.lookup(name).ok_or_else(|| {
            if self.symbols.api.constant(name, self.symbols.flags).is_some() {
                CompileError::type_error(self.line, format!("cannot assign to constant '{}'", name))
            } else {
                CompileError::name(self.line, format!("'{}' is not defined", name))
            }
        })?;

        let mut path = Vec::with_capacity(fields.len());
        let mut ty = var.ty;
        for field in fields {
            let (index, field_ty) = self.member_info(ty, field)?;
            path.push(index);
            ty = field_ty;
        }
        Ok((var, path, ty))
    }

    fn read_path(var: &Variable, path: &[u8], ty: Type) -> Fragment {
        let mut code = vec![var.load()];
        code.extend(path.iter().map(|&i| Instruction::GetComponent(i)));
        Fragment::new(code, ty)
    }

    /// Store the value in local `value` through the member chain
    fn write_back(var: &Variable, path: &[u8], value: u16) -> Vec<Instruction> {
        let mut code = vec![var.load()];
        for &i in &path[..path.len() - 1] {
            code.push(Instruction::Dup);
            code.push(Instruction::GetComponent(i));
        }
        code.push(Instruction::LoadLocal(value));
        code.extend(path.iter().rev().map(|&i| Instruction::SetComponent(i)));
        code.push(var.store());
        code
    }

    /// Result of `current op= value` brought back to the target type
    fn compound(&self, op: BinaryOp, current: Fragment, value: Fragment, target: Type) -> Result<Fragment, CompileError> {
        let result = self.binary(op, current, value)?;
        if self.symbols.api.can_implicitly_cast(result.ty, target) {
            return self.coerce(result, target, "assignment");
        }
        if result.ty.is_numeric() && target.is_numeric() {
            let mut code = result.code;
            code.push(Instruction::Cast(target));
            return Ok(Fragment::new(code, target));
        }
        Err(CompileError::type_error(
            self.line,
            format!("cannot assign {} to {}", result.ty, target),
        ))
    }

    fn assign(
        &self,
        target: &Expr,
        op: Option<BinaryOp>,
        value: Fragment,
        scope: &mut dyn Scope,
    ) -> Result<Fragment, CompileError> {
        let (var, path, ty) = self.target(target, scope)?;

        let value = match op {
            None => self.coerce(value, ty, "assignment")?,
            Some(op) => self.compound(op, Self::read_path(&var, &path, ty), value, ty)?,
        };
        let mut code = value.code;
        if self.symbols.api.copy_on_assign(ty) {
            code.push(Instruction::DeepCopy);
        }

        if path.is_empty() {
            code.push(Instruction::Dup);
            code.push(var.store());
        } else {
            let temp = scope.temp();
            code.push(Instruction::StoreLocal(temp));
            code.extend(Self::write_back(&var, &path, temp));
            code.push(Instruction::LoadLocal(temp));
        }
        Ok(Fragment::new(code, ty))
    }

    fn inc_dec(&self, target: &Expr, increment: bool, prefix: bool, scope: &mut dyn Scope) -> Result<Fragment, CompileError> {
        let (var, path, ty) = self.target(target, scope)?;
        let one = match ty {
            Type::Integer => Value::Integer(1),
            Type::Long => Value::Long(1),
            Type::Float => Value::Float(1.0),
            other => {
                return Err(CompileError::type_error(
                    self.line,
                    format!("'{}' requires a numeric variable, found {}", if increment { "++" } else { "--" }, other),
                ))
            }
        };
        let op = if increment { BinaryOp::Add } else { BinaryOp::Sub };
        let one = Instruction::Const(scope.constant(one));

        let mut code = Self::read_path(&var, &path, ty).code;
        if path.is_empty() {
            if prefix {
                code.extend([one, Instruction::Binary(op), Instruction::Dup, var.store()]);
            } else {
                code.extend([Instruction::Dup, one, Instruction::Binary(op), var.store()]);
            }
            return Ok(Fragment::new(code, ty));
        }

        let updated = scope.temp();
        let result = if prefix {
            code.extend([one, Instruction::Binary(op), Instruction::StoreLocal(updated)]);
            updated
        } else {
            let original = scope.temp();
            code.extend([
                Instruction::StoreLocal(original),
                Instruction::LoadLocal(original),
                one,
                Instruction::Binary(op),
                Instruction::StoreLocal(updated),
            ]);
            original
        };
        code.extend(Self::write_back(&var, &path, updated));
        code.push(Instruction::LoadLocal(result));
        Ok(Fragment::new(code, ty))
    }
}

fn single(args: Vec<Fragment>, line: usize) -> Result<Fragment, CompileError> {
    let mut args = args.into_iter();
    match (args.next(), args.next()) {
        (Some(arg), None) => Ok(arg),
        _ => Err(CompileError::internal(line, "expected a single operand")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileErrorKind;
    use crate::lsl::bytecode::Chunk;
    use lslvm_core::CompatMode;

    struct TestScope {
        vars: HashMap<String, Variable>,
        chunk: Chunk,
        temps: u16,
    }

    impl TestScope {
        fn new() -> Self {
            let mut vars = HashMap::new();
            vars.insert("i".into(), Variable { slot: Slot::Local(0), ty: Type::Integer });
            vars.insert("v".into(), Variable { slot: Slot::Local(1), ty: Type::Vector });
            vars.insert("l".into(), Variable { slot: Slot::Global(0), ty: Type::List });
            Self {
                vars,
                chunk: Chunk::new(),
                temps: 2,
            }
        }
    }

    impl Scope for TestScope {
        fn lookup(&self, name: &str) -> Option<Variable> {
            self.vars.get(name).copied()
        }

        fn temp(&mut self) -> u16 {
            self.temps += 1;
            self.temps - 1
        }

        fn constant(&mut self, value: Value) -> u32 {
            self.chunk.add_constant(value)
        }
    }

    fn resolve(source: &Expr, mode: CompatMode) -> Result<Fragment, CompileError> {
        let api = ApiSurface::standard();
        let flags = FeatureFlags::for_mode(mode, &api);
        let symbols = Symbols::new(&api, &flags);
        let mut scope = TestScope::new();
        Resolver::new(&symbols, 1).resolve(source, &mut scope)
    }

    fn var(name: &str) -> Box<Expr> {
        Box::new(Expr::Variable(name.into()))
    }

    #[test]
    fn test_integer_widens_to_float() {
        let expr = Expr::Binary {
            op: BinaryOp::Add,
            left: var("i"),
            right: Box::new(Expr::Float(1.5)),
        };
        let fragment = resolve(&expr, CompatMode::Lsl).unwrap();
        assert_eq!(fragment.ty, Type::Float);
        assert!(fragment.code.contains(&Instruction::Cast(Type::Float)));
    }

    #[test]
    fn test_undefined_names() {
        let err = resolve(&Expr::Variable("nope".into()), CompatMode::Lsl).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Name);

        let call = Expr::Call { name: "llNope".into(), args: Vec::new() };
        assert_eq!(resolve(&call, CompatMode::Lsl).unwrap_err().kind, CompileErrorKind::Name);
    }

    #[test]
    fn test_constant_resolves_to_literal() {
        let fragment = resolve(&Expr::Variable("PI".into()), CompatMode::Lsl).unwrap();
        assert_eq!(fragment.ty, Type::Float);
        assert_eq!(fragment.code.len(), 1);
    }

    #[test]
    fn test_list_assignment_copies() {
        let expr = Expr::Assign {
            target: var("l"),
            op: None,
            value: Box::new(Expr::List(vec![Expr::Integer(1)])),
        };
        let fragment = resolve(&expr, CompatMode::Lsl).unwrap();
        assert!(fragment.code.contains(&Instruction::DeepCopy));
        assert!(fragment.code.ends_with(&[Instruction::Dup, Instruction::StoreGlobal(0)]));
    }

    #[test]
    fn test_component_assignment_writes_back() {
        let expr = Expr::Assign {
            target: Box::new(Expr::Member { object: var("v"), name: "y".into() }),
            op: None,
            value: Box::new(Expr::Integer(3)),
        };
        let fragment = resolve(&expr, CompatMode::Lsl).unwrap();
        assert_eq!(fragment.ty, Type::Float);
        assert!(fragment.code.contains(&Instruction::SetComponent(1)));
        assert!(fragment.code.contains(&Instruction::StoreLocal(1)));
    }

    #[test]
    fn test_type_errors() {
        let expr = Expr::Binary {
            op: BinaryOp::Sub,
            left: Box::new(Expr::String("a".into())),
            right: Box::new(Expr::Integer(1)),
        };
        assert_eq!(resolve(&expr, CompatMode::Lsl).unwrap_err().kind, CompileErrorKind::Type);

        let nested = Expr::List(vec![Expr::Variable("l".into())]);
        assert_eq!(resolve(&nested, CompatMode::Lsl).unwrap_err().kind, CompileErrorKind::Type);

        let call = Expr::Call {
            name: "llStringLength".into(),
            args: vec![Expr::Integer(1)],
        };
        let err = resolve(&call, CompatMode::Lsl).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::Type);
        assert!(err.message.contains("1 candidate"));
    }

    #[test]
    fn test_indexing_requires_assl() {
        let expr = Expr::Index {
            object: var("l"),
            index: Box::new(Expr::Integer(0)),
        };
        assert_eq!(resolve(&expr, CompatMode::Lsl).unwrap_err().kind, CompileErrorKind::Type);
        assert!(resolve(&expr, CompatMode::Assl).is_ok());
    }

    #[test]
    fn test_deep_nesting_resolves() {
        let mut expr = Expr::Integer(0);
        for _ in 0..2_000 {
            expr = Expr::Binary {
                op: BinaryOp::Add,
                left: Box::new(expr),
                right: Box::new(Expr::Integer(1)),
            };
        }
        let fragment = resolve(&expr, CompatMode::Lsl).unwrap();
        assert_eq!(fragment.ty, Type::Integer);
    }
}
