//! Tree-walking evaluator.
//!
//! Every statement executes to a `Flow` signal; raised exceptions travel
//! the `Err` rail so try/except/finally unwinding is explicit. Control
//! signals unwind to the nearest matching frame, and a signal escaping
//! with no frame to absorb it is an interpreter bug surfaced as an
//! internal error rather than swallowed.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::ast::{
    AssignTarget, BinaryOperator, BoolOperator, CompareOperator, ComprehensionKind,
    ExceptHandler, Expression, FStringPart, Program, Statement, UnaryOperator,
};
use crate::binder::{Args, bind_arguments};
use crate::builtins;
use crate::context::{ExecutionContext, NativeCall};
use crate::environment::{EnvRef, Environment};
use crate::exception::Raised;
use crate::interpreter::HostState;
use crate::value::{
    ClassValue, Dict, FunctionBody, FunctionValue, InstanceValue, Set, Value, compare_values,
    iter_values, values_equal,
};

const MAX_CALL_DEPTH: usize = 1000;

/// Result of executing one statement.
pub enum Flow {
    Normal(Value),
    Return(Value),
    Break,
    Continue,
}

pub struct Evaluator<'a> {
    ctx: &'a ExecutionContext,
    output: &'a mut dyn Write,
    host: &'a mut HostState,
    call_depth: usize,
    /// Exception currently being handled, for bare `raise`.
    active_exception: Option<Raised>,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(
        ctx: &'a ExecutionContext,
        output: &'a mut dyn Write,
        host: &'a mut HostState,
    ) -> Self {
        Self {
            ctx,
            output,
            host,
            call_depth: 0,
            active_exception: None,
        }
    }

    /// Runs a whole program, yielding the value of the last top-level
    /// expression or assignment.
    pub fn run_program(&mut self, program: &Program, env: &EnvRef) -> Result<Value, Raised> {
        let mut last = Value::None;
        for statement in &program.statements {
            match self.exec_statement(statement, env)? {
                Flow::Normal(value) => {
                    if matches!(statement, Statement::Expr(_) | Statement::Assign { .. }) {
                        last = value;
                    }
                }
                Flow::Break | Flow::Continue => {
                    return Err(Raised::runtime_error("loop control outside of a loop"));
                }
                Flow::Return(_) => {
                    return Err(Raised::runtime_error(
                        "internal error: return signal escaped all call frames",
                    ));
                }
            }
        }
        Ok(last)
    }

    fn exec_block(&mut self, statements: &[Statement], env: &EnvRef) -> Result<Flow, Raised> {
        for statement in statements {
            match self.exec_statement(statement, env)? {
                Flow::Normal(_) => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal(Value::None))
    }

    fn exec_statement(&mut self, statement: &Statement, env: &EnvRef) -> Result<Flow, Raised> {
        match statement {
            Statement::Expr(expr) => Ok(Flow::Normal(self.eval(expr, env)?)),
            Statement::Assign { target, value } => {
                let value = self.eval(value, env)?;
                self.assign(target, value.clone(), env)?;
                Ok(Flow::Normal(value))
            }
            Statement::AugAssign { target, op, value } => {
                // The target's object and index evaluate once, shared
                // between the read and the write-back.
                match target {
                    AssignTarget::Name(name) => {
                        let current = Environment::get(env, name).ok_or_else(|| {
                            Raised::name_error(format!("name '{name}' is not defined"))
                        })?;
                        let operand = self.eval(value, env)?;
                        let updated = self.binary_op(*op, current, operand)?;
                        Environment::set(env, name, updated);
                    }
                    AssignTarget::Index { object, index } => {
                        let object = self.eval(object, env)?;
                        let index = self.eval(index, env)?;
                        let current = self.index_value(&object, &index)?;
                        let operand = self.eval(value, env)?;
                        let updated = self.binary_op(*op, current, operand)?;
                        store_index(&object, index, updated)?;
                    }
                    AssignTarget::Attribute { object, name } => {
                        let object = self.eval(object, env)?;
                        let current = self.attribute(&object, name)?;
                        let operand = self.eval(value, env)?;
                        let updated = self.binary_op(*op, current, operand)?;
                        store_attribute(&object, name, updated)?;
                    }
                }
                Ok(Flow::Normal(Value::None))
            }
            Statement::If {
                branches,
                else_body,
            } => {
                for (condition, body) in branches {
                    if self.eval(condition, env)?.is_truthy() {
                        return self.exec_block(body, env);
                    }
                }
                self.exec_block(else_body, env)
            }
            Statement::While { condition, body } => {
                loop {
                    self.ctx.check_interrupt()?;
                    if !self.eval(condition, env)?.is_truthy() {
                        break;
                    }
                    match self.exec_block(body, env)? {
                        Flow::Normal(_) | Flow::Continue => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal(Value::None))
            }
            Statement::For {
                target,
                iterable,
                body,
            } => {
                let iterable = self.eval(iterable, env)?;
                for item in iter_values(&iterable)? {
                    self.ctx.check_interrupt()?;
                    bind_loop_target(target, item, env)?;
                    match self.exec_block(body, env)? {
                        Flow::Normal(_) | Flow::Continue => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal(Value::None))
            }
            Statement::FunctionDef { name, params, body } => {
                let function = self.make_function(name, params, FunctionBody::Block(Rc::new(body.clone())), env)?;
                Environment::set(env, name, function);
                Ok(Flow::Normal(Value::None))
            }
            Statement::ClassDef { name, base, body } => {
                let class = self.make_class(name, base.as_deref(), body, env)?;
                Environment::set(env, name, class);
                Ok(Flow::Normal(Value::None))
            }
            Statement::Try {
                body,
                handlers,
                finally_body,
            } => self.exec_try(body, handlers, finally_body, env),
            Statement::Raise(value) => {
                let raised = match value {
                    Some(expr) => {
                        let value = self.eval(expr, env)?;
                        match value {
                            Value::Exception(raised) => (*raised).clone(),
                            Value::Str(message) => Raised::user(message),
                            other => Raised::user(other.to_string()),
                        }
                    }
                    None => self.active_exception.clone().ok_or_else(|| {
                        Raised::runtime_error("no active exception to re-raise")
                    })?,
                };
                Err(raised)
            }
            Statement::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::None,
                };
                Ok(Flow::Return(value))
            }
            Statement::Break => Ok(Flow::Break),
            Statement::Continue => Ok(Flow::Continue),
            Statement::Pass => Ok(Flow::Normal(Value::None)),
            Statement::Import { name } => {
                let library = self.host.resolve_import(name)?;
                Environment::set(env, name, library);
                Ok(Flow::Normal(Value::None))
            }
            Statement::FromImport { module, names } => {
                let library = self.host.resolve_import(module)?;
                let Value::Library(library) = library else {
                    return Err(Raised::import_error(format!(
                        "'{module}' is not a library"
                    )));
                };
                for name in names {
                    let member = library.member(name).ok_or_else(|| {
                        Raised::import_error(format!(
                            "cannot import '{name}' from '{module}'"
                        ))
                    })?;
                    Environment::set(env, name, member);
                }
                Ok(Flow::Normal(Value::None))
            }
            Statement::Global(names) => {
                for name in names {
                    Environment::mark_global(env, name);
                }
                Ok(Flow::Normal(Value::None))
            }
        }
    }

    fn exec_try(
        &mut self,
        body: &[Statement],
        handlers: &[ExceptHandler],
        finally_body: &[Statement],
        env: &EnvRef,
    ) -> Result<Flow, Raised> {
        let primary = self.exec_block(body, env);
        let outcome = match primary {
            Err(raised) => match find_handler(handlers, &raised) {
                Some(handler) => {
                    if let Some(binding) = &handler.binding {
                        Environment::set(
                            env,
                            binding,
                            Value::Exception(Rc::new(raised.clone())),
                        );
                    }
                    let saved = self.active_exception.replace(raised);
                    let handled = self.exec_block(&handler.body, env);
                    self.active_exception = saved;
                    handled
                }
                None => Err(raised),
            },
            ok => ok,
        };
        // Finally runs on every exit path; its own non-normal flow or
        // exception supersedes the pending outcome.
        if !finally_body.is_empty() {
            match self.exec_block(finally_body, env)? {
                Flow::Normal(_) => {}
                other => return Ok(other),
            }
        }
        outcome
    }

    fn make_function(
        &mut self,
        name: &str,
        params: &[crate::ast::Parameter],
        body: FunctionBody,
        env: &EnvRef,
    ) -> Result<Value, Raised> {
        // Defaults evaluate once, now; a mutable default is shared across
        // every later call.
        let mut defaults = Vec::with_capacity(params.len());
        for param in params {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr, env)?),
                None => None,
            });
        }
        Ok(Value::Function(Rc::new(FunctionValue {
            name: name.to_string(),
            params: params.to_vec(),
            defaults,
            body,
            env: Rc::clone(env),
            bound_self: None,
        })))
    }

    fn make_class(
        &mut self,
        name: &str,
        base: Option<&str>,
        body: &[Statement],
        env: &EnvRef,
    ) -> Result<Value, Raised> {
        let base = match base {
            Some(base_name) => match Environment::get(env, base_name) {
                Some(Value::Class(class)) => Some(class),
                Some(other) => {
                    return Err(Raised::type_error(format!(
                        "base of '{name}' must be a class, not {}",
                        other.type_name()
                    )));
                }
                None => {
                    return Err(Raised::name_error(format!(
                        "name '{base_name}' is not defined"
                    )));
                }
            },
            None => None,
        };
        let mut methods = FxHashMap::default();
        for statement in body {
            if let Statement::FunctionDef {
                name: method_name,
                params,
                body,
            } = statement
            {
                let method = self.make_function(
                    method_name,
                    params,
                    FunctionBody::Block(Rc::new(body.clone())),
                    env,
                )?;
                methods.insert(method_name.clone(), method);
            }
        }
        Ok(Value::Class(Rc::new(ClassValue {
            name: name.to_string(),
            base,
            methods,
        })))
    }

    fn assign(&mut self, target: &AssignTarget, value: Value, env: &EnvRef) -> Result<(), Raised> {
        match target {
            AssignTarget::Name(name) => {
                Environment::set(env, name, value);
                Ok(())
            }
            AssignTarget::Index { object, index } => {
                let object = self.eval(object, env)?;
                let index = self.eval(index, env)?;
                store_index(&object, index, value)
            }
            AssignTarget::Attribute { object, name } => {
                let object = self.eval(object, env)?;
                store_attribute(&object, name, value)
            }
        }
    }

    pub fn eval(&mut self, expr: &Expression, env: &EnvRef) -> Result<Value, Raised> {
        match expr {
            Expression::Integer(value) => Ok(Value::Int(*value)),
            Expression::Float(value) => Ok(Value::Float(*value)),
            Expression::Boolean(value) => Ok(Value::Bool(*value)),
            Expression::Str(value) => Ok(Value::str(value.clone())),
            Expression::NoneLiteral => Ok(Value::None),
            Expression::Identifier(name) => Environment::get(env, name)
                .ok_or_else(|| Raised::name_error(format!("name '{name}' is not defined"))),
            Expression::FString(parts) => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(literal) => text.push_str(literal),
                        FStringPart::Expr(expr) => {
                            text.push_str(&self.eval(expr, env)?.to_string());
                        }
                    }
                }
                Ok(Value::Str(text))
            }
            Expression::List(elements) => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.eval(element, env)?);
                }
                Ok(Value::list(items))
            }
            Expression::Tuple(elements) => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.eval(element, env)?);
                }
                Ok(Value::Tuple(Rc::new(items)))
            }
            Expression::Dict(entries) => {
                let mut dict = Dict::new();
                for (key, value) in entries {
                    let key = self.eval(key, env)?;
                    let value = self.eval(value, env)?;
                    dict.insert(key, value)?;
                }
                Ok(Value::dict(dict))
            }
            Expression::Set(elements) => {
                let mut set = Set::new();
                for element in elements {
                    set.insert(self.eval(element, env)?)?;
                }
                Ok(Value::set(set))
            }
            Expression::BinaryOp { left, op, right } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                self.binary_op(*op, left, right)
            }
            Expression::BoolOp { op, left, right } => {
                let left = self.eval(left, env)?;
                match op {
                    BoolOperator::And if !left.is_truthy() => Ok(left),
                    BoolOperator::Or if left.is_truthy() => Ok(left),
                    _ => self.eval(right, env),
                }
            }
            Expression::UnaryOp { op, operand } => {
                let value = self.eval(operand, env)?;
                match op {
                    UnaryOperator::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOperator::Neg => match value {
                        Value::Int(i) => i
                            .checked_neg()
                            .map(Value::Int)
                            .ok_or_else(|| Raised::value_error("integer overflow")),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        other => Err(Raised::type_error(format!(
                            "bad operand type for unary -: '{}'",
                            other.type_name()
                        ))),
                    },
                    UnaryOperator::Invert => Ok(Value::Int(!value.as_int()?)),
                }
            }
            Expression::Compare { first, rest } => {
                let mut left = self.eval(first, env)?;
                for (op, expr) in rest {
                    let right = self.eval(expr, env)?;
                    if !self.compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expression::Call {
                callee,
                args,
                kwargs,
            } => {
                let callee = self.eval(callee, env)?;
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval(arg, env)?);
                }
                let mut kwarg_values = Vec::with_capacity(kwargs.len());
                for (name, expr) in kwargs {
                    kwarg_values.push((name.clone(), self.eval(expr, env)?));
                }
                self.call_value(&callee, arg_values, kwarg_values)
            }
            Expression::Index { object, index } => {
                let object = self.eval(object, env)?;
                let index = self.eval(index, env)?;
                self.index_value(&object, &index)
            }
            Expression::Slice {
                object,
                start,
                stop,
                step,
            } => {
                let object = self.eval(object, env)?;
                let start = self.eval_optional(start.as_deref(), env)?;
                let stop = self.eval_optional(stop.as_deref(), env)?;
                let step = self.eval_optional(step.as_deref(), env)?;
                slice_value(&object, start, stop, step)
            }
            Expression::Attribute { object, name } => {
                let object = self.eval(object, env)?;
                self.attribute(&object, name)
            }
            Expression::Lambda { params, body } => self.make_function(
                "<lambda>",
                params,
                FunctionBody::Expr(Rc::new((**body).clone())),
                env,
            ),
            Expression::Comprehension {
                kind,
                element,
                value,
                target,
                iterable,
                filter,
            } => {
                let iterable = self.eval(iterable, env)?;
                // Fresh child frame: the loop variable must not leak out.
                let scope = Environment::child(env);
                let mut list_items = Vec::new();
                let mut dict_items = Dict::new();
                let mut set_items = Set::new();
                for item in iter_values(&iterable)? {
                    self.ctx.check_interrupt()?;
                    bind_loop_target(target, item, &scope)?;
                    if let Some(filter) = filter
                        && !self.eval(filter, &scope)?.is_truthy()
                    {
                        continue;
                    }
                    match kind {
                        ComprehensionKind::List => {
                            list_items.push(self.eval(element, &scope)?);
                        }
                        ComprehensionKind::Dict => {
                            let key = self.eval(element, &scope)?;
                            let value_expr = value.as_deref().ok_or_else(|| {
                                Raised::runtime_error(
                                    "internal error: dict comprehension without value",
                                )
                            })?;
                            let value = self.eval(value_expr, &scope)?;
                            dict_items.insert(key, value)?;
                        }
                        ComprehensionKind::Set => {
                            set_items.insert(self.eval(element, &scope)?)?;
                        }
                    }
                }
                Ok(match kind {
                    ComprehensionKind::List => Value::list(list_items),
                    ComprehensionKind::Dict => Value::dict(dict_items),
                    ComprehensionKind::Set => Value::set(set_items),
                })
            }
        }
    }

    fn eval_optional(
        &mut self,
        expr: Option<&Expression>,
        env: &EnvRef,
    ) -> Result<Option<Value>, Raised> {
        match expr {
            Some(expr) => Ok(Some(self.eval(expr, env)?)),
            None => Ok(None),
        }
    }

    /// Calls any callable value: script function, native, or class
    /// constructor.
    pub fn call_value(
        &mut self,
        callee: &Value,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, Raised> {
        self.ctx.check_interrupt()?;
        match callee {
            Value::Function(func) => self.call_function(func, args, kwargs),
            Value::Builtin(func) => {
                let mut call = NativeCall {
                    args: Args::new(args, kwargs),
                    ctx: self.ctx,
                    output: &mut *self.output,
                };
                (func.func)(&mut call)
            }
            Value::Class(class) => {
                let instance = Value::Instance(Rc::new(InstanceValue {
                    class: Rc::clone(class),
                    fields: RefCell::new(FxHashMap::default()),
                }));
                if let Some(init) = class.resolve_method("__init__") {
                    let bound = bind_method(&init, &instance)?;
                    self.call_value(&bound, args, kwargs)?;
                } else if !args.is_empty() || !kwargs.is_empty() {
                    return Err(Raised::arity_error(format!(
                        "{}() takes no arguments",
                        class.name
                    )));
                }
                Ok(instance)
            }
            other => Err(Raised::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(
        &mut self,
        func: &Rc<FunctionValue>,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Result<Value, Raised> {
        if self.call_depth >= MAX_CALL_DEPTH {
            return Err(Raised::runtime_error(
                "maximum recursion depth exceeded",
            ));
        }
        let bound = bind_arguments(
            &func.name,
            &func.params,
            &func.defaults,
            func.bound_self.clone(),
            args,
            kwargs,
        )?;
        let frame = Environment::child(&func.env);
        for (name, value) in bound {
            Environment::set(&frame, &name, value);
        }
        self.call_depth += 1;
        let result = match &func.body {
            FunctionBody::Block(body) => match self.exec_block(body, &frame) {
                Ok(Flow::Return(value)) => Ok(value),
                Ok(Flow::Normal(_)) => Ok(Value::None),
                Ok(Flow::Break | Flow::Continue) => Err(Raised::runtime_error(
                    "internal error: loop control signal escaped a function frame",
                )),
                Err(raised) => Err(raised),
            },
            FunctionBody::Expr(expr) => self.eval(expr, &frame),
        };
        self.call_depth -= 1;
        result
    }

    fn attribute(&mut self, object: &Value, name: &str) -> Result<Value, Raised> {
        match object {
            Value::Instance(instance) => {
                if let Some(field) = instance.fields.borrow().get(name) {
                    return Ok(field.clone());
                }
                let method = instance.class.resolve_method(name).ok_or_else(|| {
                    Raised::attribute_error(format!(
                        "'{}' object has no attribute '{name}'",
                        instance.class.name
                    ))
                })?;
                bind_method(&method, object)
            }
            Value::Class(class) => class.resolve_method(name).ok_or_else(|| {
                Raised::attribute_error(format!(
                    "class '{}' has no attribute '{name}'",
                    class.name
                ))
            }),
            Value::Library(library) => library.member(name).ok_or_else(|| {
                Raised::attribute_error(format!(
                    "library '{}' has no member '{name}'",
                    library.name
                ))
            }),
            Value::List(items) => builtins::list_method(items, name).ok_or_else(|| {
                Raised::attribute_error(format!("'list' object has no attribute '{name}'"))
            }),
            Value::Str(text) => builtins::str_method(text, name).ok_or_else(|| {
                Raised::attribute_error(format!("'str' object has no attribute '{name}'"))
            }),
            Value::Dict(dict) => builtins::dict_method(dict, name).ok_or_else(|| {
                Raised::attribute_error(format!("'dict' object has no attribute '{name}'"))
            }),
            Value::Set(set) => builtins::set_method(set, name).ok_or_else(|| {
                Raised::attribute_error(format!("'set' object has no attribute '{name}'"))
            }),
            other => Err(Raised::attribute_error(format!(
                "'{}' object has no attribute '{name}'",
                other.type_name()
            ))),
        }
    }

    fn index_value(&mut self, object: &Value, index: &Value) -> Result<Value, Raised> {
        match object {
            Value::List(items) => {
                let items = items.borrow();
                let position = normalize_index(index.as_int()?, items.len())?;
                Ok(items[position].clone())
            }
            Value::Tuple(items) => {
                let position = normalize_index(index.as_int()?, items.len())?;
                Ok(items[position].clone())
            }
            Value::Str(text) => {
                let chars: Vec<char> = text.chars().collect();
                let position = normalize_index(index.as_int()?, chars.len())?;
                Ok(Value::Str(chars[position].to_string()))
            }
            Value::Dict(dict) => dict
                .borrow()
                .get(index)?
                .ok_or_else(|| Raised::key_error(index.repr())),
            other => Err(Raised::type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn compare(&mut self, op: CompareOperator, left: &Value, right: &Value) -> Result<bool, Raised> {
        match op {
            CompareOperator::Eq => self.equals(left, right),
            CompareOperator::NotEq => Ok(!self.equals(left, right)?),
            CompareOperator::Less => {
                Ok(compare_values(left, right)? == std::cmp::Ordering::Less)
            }
            CompareOperator::LessEq => {
                Ok(compare_values(left, right)? != std::cmp::Ordering::Greater)
            }
            CompareOperator::Greater => {
                Ok(compare_values(left, right)? == std::cmp::Ordering::Greater)
            }
            CompareOperator::GreaterEq => {
                Ok(compare_values(left, right)? != std::cmp::Ordering::Less)
            }
            CompareOperator::In => self.contains(right, left),
            CompareOperator::NotIn => Ok(!self.contains(right, left)?),
        }
    }

    /// Equality with `__eq__` dispatch for instances; everything else is
    /// plain value equality with identity fallback.
    fn equals(&mut self, left: &Value, right: &Value) -> Result<bool, Raised> {
        if let Value::Instance(instance) = left
            && let Some(eq) = instance.class.resolve_method("__eq__")
        {
            let bound = bind_method(&eq, left)?;
            let result = self.call_value(&bound, vec![right.clone()], vec![])?;
            return Ok(result.is_truthy());
        }
        if let Value::Instance(instance) = right
            && let Some(eq) = instance.class.resolve_method("__eq__")
        {
            let bound = bind_method(&eq, right)?;
            let result = self.call_value(&bound, vec![left.clone()], vec![])?;
            return Ok(result.is_truthy());
        }
        Ok(values_equal(left, right))
    }

    fn contains(&mut self, container: &Value, needle: &Value) -> Result<bool, Raised> {
        match container {
            Value::Str(text) => Ok(text.contains(needle.as_str()?)),
            Value::List(items) => {
                for item in items.borrow().iter() {
                    if self.equals(item, needle)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Value::Tuple(items) => {
                for item in items.iter() {
                    if self.equals(item, needle)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Value::Dict(dict) => dict.borrow().contains(needle),
            Value::Set(set) => set.borrow().contains(needle),
            other => Err(Raised::type_error(format!(
                "argument of type '{}' is not a container",
                other.type_name()
            ))),
        }
    }

    fn binary_op(&mut self, op: BinaryOperator, left: Value, right: Value) -> Result<Value, Raised> {
        use BinaryOperator::*;
        match (&left, &right) {
            (Value::Int(a), Value::Int(b)) => int_op(op, *a, *b),
            // Bools are integers for arithmetic: True + True == 2.
            (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
                int_op(op, left.as_int()?, right.as_int()?)
            }
            (
                Value::Int(_) | Value::Float(_) | Value::Bool(_),
                Value::Int(_) | Value::Float(_) | Value::Bool(_),
            ) => float_op(op, left.as_float()?, right.as_float()?),
            (Value::Str(a), Value::Str(b)) if op == Add => {
                Ok(Value::Str(format!("{a}{b}")))
            }
            (Value::Str(s), Value::Int(n)) | (Value::Int(n), Value::Str(s)) if op == Mul => {
                Ok(Value::Str(s.repeat((*n).max(0) as usize)))
            }
            (Value::List(a), Value::List(b)) if op == Add => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                Ok(Value::list(items))
            }
            (Value::List(items), Value::Int(n)) | (Value::Int(n), Value::List(items))
                if op == Mul =>
            {
                let source = items.borrow();
                let mut result = Vec::with_capacity(source.len() * (*n).max(0) as usize);
                for _ in 0..(*n).max(0) {
                    result.extend(source.iter().cloned());
                }
                Ok(Value::list(result))
            }
            (Value::Tuple(a), Value::Tuple(b)) if op == Add => {
                let mut items = a.as_ref().clone();
                items.extend(b.iter().cloned());
                Ok(Value::Tuple(Rc::new(items)))
            }
            _ => Err(Raised::type_error(format!(
                "unsupported operand types for {}: '{}' and '{}'",
                op_symbol(op),
                left.type_name(),
                right.type_name()
            ))),
        }
    }
}

fn op_symbol(op: BinaryOperator) -> &'static str {
    use BinaryOperator::*;
    match op {
        Add => "+",
        Sub => "-",
        Mul => "*",
        Div => "/",
        FloorDiv => "//",
        Mod => "%",
        Pow => "**",
        BitAnd => "&",
        BitOr => "|",
        BitXor => "^",
        Shl => "<<",
        Shr => ">>",
    }
}

fn store_index(object: &Value, index: Value, value: Value) -> Result<(), Raised> {
    match object {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let position = normalize_index(index.as_int()?, items.len())?;
            items[position] = value;
            Ok(())
        }
        Value::Dict(dict) => {
            dict.borrow_mut().insert(index, value)?;
            Ok(())
        }
        other => Err(Raised::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn store_attribute(object: &Value, name: &str, value: Value) -> Result<(), Raised> {
    match object {
        Value::Instance(instance) => {
            instance.fields.borrow_mut().insert(name.to_string(), value);
            Ok(())
        }
        other => Err(Raised::attribute_error(format!(
            "'{}' object has no settable attribute '{name}'",
            other.type_name()
        ))),
    }
}

fn int_op(op: BinaryOperator, a: i64, b: i64) -> Result<Value, Raised> {
    use BinaryOperator::*;
    let overflow = || Raised::value_error("integer overflow");
    match op {
        Add => a.checked_add(b).map(Value::Int).ok_or_else(overflow),
        Sub => a.checked_sub(b).map(Value::Int).ok_or_else(overflow),
        Mul => a.checked_mul(b).map(Value::Int).ok_or_else(overflow),
        // True division always yields a float.
        Div => {
            if b == 0 {
                Err(Raised::zero_division("division by zero"))
            } else {
                Ok(Value::Float(a as f64 / b as f64))
            }
        }
        FloorDiv => {
            if b == 0 {
                return Err(Raised::zero_division("integer division by zero"));
            }
            // checked: i64::MIN / -1 overflows.
            let quotient = a.checked_div(b).ok_or_else(overflow)?;
            let remainder = a.checked_rem(b).ok_or_else(overflow)?;
            // Floor toward negative infinity, not toward zero.
            if remainder != 0 && (remainder < 0) != (b < 0) {
                Ok(Value::Int(quotient - 1))
            } else {
                Ok(Value::Int(quotient))
            }
        }
        Mod => {
            if b == 0 {
                return Err(Raised::zero_division("integer modulo by zero"));
            }
            let remainder = a.checked_rem(b).ok_or_else(overflow)?;
            // The result takes the sign of the divisor.
            if remainder != 0 && (remainder < 0) != (b < 0) {
                Ok(Value::Int(remainder + b))
            } else {
                Ok(Value::Int(remainder))
            }
        }
        Pow => {
            if b < 0 {
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let exponent = u32::try_from(b).map_err(|_| overflow())?;
            a.checked_pow(exponent).map(Value::Int).ok_or_else(overflow)
        }
        BitAnd => Ok(Value::Int(a & b)),
        BitOr => Ok(Value::Int(a | b)),
        BitXor => Ok(Value::Int(a ^ b)),
        Shl => {
            let shift = u32::try_from(b)
                .map_err(|_| Raised::value_error("negative shift count"))?;
            a.checked_shl(shift).map(Value::Int).ok_or_else(overflow)
        }
        Shr => {
            let shift = u32::try_from(b)
                .map_err(|_| Raised::value_error("negative shift count"))?;
            a.checked_shr(shift).map(Value::Int).ok_or_else(overflow)
        }
    }
}

fn float_op(op: BinaryOperator, a: f64, b: f64) -> Result<Value, Raised> {
    use BinaryOperator::*;
    match op {
        Add => Ok(Value::Float(a + b)),
        Sub => Ok(Value::Float(a - b)),
        Mul => Ok(Value::Float(a * b)),
        Div => {
            if b == 0.0 {
                Err(Raised::zero_division("float division by zero"))
            } else {
                Ok(Value::Float(a / b))
            }
        }
        FloorDiv => {
            if b == 0.0 {
                Err(Raised::zero_division("float floor division by zero"))
            } else {
                Ok(Value::Float((a / b).floor()))
            }
        }
        Mod => {
            if b == 0.0 {
                Err(Raised::zero_division("float modulo by zero"))
            } else {
                // Same sign as the divisor, matching integer modulo.
                Ok(Value::Float(a - b * (a / b).floor()))
            }
        }
        Pow => Ok(Value::Float(a.powf(b))),
        BitAnd | BitOr | BitXor | Shl | Shr => Err(Raised::type_error(
            "bitwise operations require integers",
        )),
    }
}

/// Produces the callable for `instance.method`: user functions are
/// re-bound with the receiver prepended, natives pass through.
pub(crate) fn bind_method(method: &Value, receiver: &Value) -> Result<Value, Raised> {
    match method {
        Value::Function(func) => Ok(Value::Function(Rc::new(FunctionValue {
            name: func.name.clone(),
            params: func.params.clone(),
            defaults: func.defaults.clone(),
            body: match &func.body {
                FunctionBody::Block(body) => FunctionBody::Block(Rc::clone(body)),
                FunctionBody::Expr(expr) => FunctionBody::Expr(Rc::clone(expr)),
            },
            env: Rc::clone(&func.env),
            bound_self: Some(receiver.clone()),
        }))),
        Value::Builtin(_) => Ok(method.clone()),
        other => Err(Raised::type_error(format!(
            "'{}' object is not a method",
            other.type_name()
        ))),
    }
}

fn bind_loop_target(target: &[String], item: Value, env: &EnvRef) -> Result<(), Raised> {
    if target.len() == 1 {
        Environment::set(env, &target[0], item);
        return Ok(());
    }
    let parts = match &item {
        Value::Tuple(items) => items.as_ref().clone(),
        Value::List(items) => items.borrow().clone(),
        other => {
            return Err(Raised::type_error(format!(
                "cannot unpack '{}' into {} names",
                other.type_name(),
                target.len()
            )));
        }
    };
    if parts.len() != target.len() {
        return Err(Raised::value_error(format!(
            "expected {} values to unpack, got {}",
            target.len(),
            parts.len()
        )));
    }
    for (name, value) in target.iter().zip(parts) {
        Environment::set(env, name, value);
    }
    Ok(())
}

fn normalize_index(index: i64, len: usize) -> Result<usize, Raised> {
    let len = len as i64;
    let actual = if index < 0 { index + len } else { index };
    if actual < 0 || actual >= len {
        return Err(Raised::index_error("index out of range"));
    }
    Ok(actual as usize)
}

/// Python slice semantics: out-of-range bounds clamp, negative indices
/// count from the end, negative step walks backward, and the result is
/// always a fresh collection.
fn slice_value(
    object: &Value,
    start: Option<Value>,
    stop: Option<Value>,
    step: Option<Value>,
) -> Result<Value, Raised> {
    let step = match step {
        Some(value) => value.as_int()?,
        None => 1,
    };
    if step == 0 {
        return Err(Raised::value_error("slice step cannot be zero"));
    }
    let start = start.map(|v| v.as_int()).transpose()?;
    let stop = stop.map(|v| v.as_int()).transpose()?;
    match object {
        Value::List(items) => {
            let items = items.borrow();
            Ok(Value::list(slice_elements(&items, start, stop, step)))
        }
        Value::Tuple(items) => Ok(Value::Tuple(Rc::new(slice_elements(
            items, start, stop, step,
        )))),
        Value::Str(text) => {
            let chars: Vec<char> = text.chars().collect();
            let sliced: String = slice_elements(&chars, start, stop, step)
                .into_iter()
                .collect();
            Ok(Value::Str(sliced))
        }
        other => Err(Raised::type_error(format!(
            "'{}' object cannot be sliced",
            other.type_name()
        ))),
    }
}

fn slice_elements<T: Clone>(
    items: &[T],
    start: Option<i64>,
    stop: Option<i64>,
    step: i64,
) -> Vec<T> {
    let len = items.len() as i64;
    let clamp = |index: i64| -> i64 {
        let adjusted = if index < 0 { index + len } else { index };
        if step > 0 {
            adjusted.clamp(0, len)
        } else {
            adjusted.clamp(-1, len - 1)
        }
    };
    let start = clamp(start.unwrap_or(if step > 0 { 0 } else { len - 1 }));
    let stop = match stop {
        Some(stop) => clamp(stop),
        None => {
            if step > 0 {
                len
            } else {
                -1
            }
        }
    };
    let mut result = Vec::new();
    let mut index = start;
    while (step > 0 && index < stop) || (step < 0 && index > stop) {
        result.push(items[index as usize].clone());
        index += step;
    }
    result
}

fn find_handler<'h>(handlers: &'h [ExceptHandler], raised: &Raised) -> Option<&'h ExceptHandler> {
    handlers.iter().find(|handler| {
        // A bare except catches everything, including SystemExit.
        handler.kinds.is_empty()
            || handler
                .kinds
                .iter()
                .any(|kind| raised.matches_handler(kind))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse_tokens;
    use indoc::indoc;

    fn run(source: &str) -> Result<Value, Raised> {
        let env = Environment::new_root();
        builtins::seed_builtin_globals(&env);
        let ctx = ExecutionContext::new();
        let mut sink = Vec::new();
        let mut host = HostState::new();
        let mut evaluator = Evaluator::new(&ctx, &mut sink, &mut host);
        let program = parse_tokens(tokenize(source).expect("tokenize failed"))
            .expect("parse failed");
        evaluator.run_program(&program, &env)
    }

    fn eval_ok(source: &str) -> Value {
        run(source).expect("evaluation failed")
    }

    fn run_output(source: &str) -> String {
        let env = Environment::new_root();
        builtins::seed_builtin_globals(&env);
        let ctx = ExecutionContext::new();
        let mut sink = Vec::new();
        let mut host = HostState::new();
        let mut evaluator = Evaluator::new(&ctx, &mut sink, &mut host);
        let program = parse_tokens(tokenize(source).expect("tokenize failed"))
            .expect("parse failed");
        evaluator
            .run_program(&program, &env)
            .expect("evaluation failed");
        String::from_utf8(sink).expect("output was not utf-8")
    }

    #[test]
    fn floor_division_and_modulo_follow_python_signs() {
        assert_eq!(eval_ok("-7 // 2").as_int().unwrap(), -4);
        assert_eq!(eval_ok("-7 % 2").as_int().unwrap(), 1);
        assert_eq!(eval_ok("7 // -2").as_int().unwrap(), -4);
        assert_eq!(eval_ok("7 % -2").as_int().unwrap(), -1);
    }

    #[test]
    fn min_int_division_and_negation_raise_instead_of_panicking() {
        // i64::MIN spelled without an out-of-range literal.
        let err = run("(-9223372036854775807 - 1) // -1").unwrap_err();
        assert_eq!(err.kind, crate::exception::ExceptionKind::Value);
        assert!(err.message.contains("integer overflow"));

        let err = run("(-9223372036854775807 - 1) % -1").unwrap_err();
        assert_eq!(err.kind, crate::exception::ExceptionKind::Value);

        let err = run("-(-9223372036854775807 - 1)").unwrap_err();
        assert_eq!(err.kind, crate::exception::ExceptionKind::Value);
    }

    #[test]
    fn huge_negative_exponents_stay_in_float_range() {
        assert!(matches!(eval_ok("2 ** -2"), Value::Float(f) if f == 0.25));
        let value = eval_ok("2 ** (-9223372036854775807 - 1)");
        assert!(matches!(value, Value::Float(f) if f == 0.0));
    }

    #[test]
    fn bools_behave_as_integers_in_arithmetic() {
        assert!(matches!(eval_ok("True + True"), Value::Int(2)));
        assert!(matches!(eval_ok("True * 3"), Value::Int(3)));
        assert!(matches!(eval_ok("True + 1.5"), Value::Float(f) if f == 2.5));
    }

    #[test]
    fn augmented_index_assignment_evaluates_its_target_once() {
        let source = indoc! {"
            calls = 0
            xs = [10]
            def pick():
                global calls
                calls += 1
                return xs
            pick()[0] += 1
            [calls, xs[0]]
        "};
        assert_eq!(eval_ok(source).to_string(), "[1, 11]");
    }

    #[test]
    fn true_division_always_yields_float() {
        assert!(matches!(eval_ok("6 / 3"), Value::Float(f) if f == 2.0));
        assert!(matches!(eval_ok("7 // 2"), Value::Int(3)));
    }

    #[test]
    fn division_by_zero_raises() {
        let err = run("1 / 0").unwrap_err();
        assert_eq!(err.kind, crate::exception::ExceptionKind::ZeroDivision);
    }

    #[test]
    fn assignment_aliases_lists_and_slicing_copies() {
        let source = indoc! {"
            a = [1, 2, 3]
            b = a
            c = a[:]
            a.append(4)
            [len(b), len(c)]
        "};
        assert_eq!(eval_ok(source).to_string(), "[4, 3]");
    }

    #[test]
    fn negative_step_slices_reverse() {
        assert_eq!(eval_ok("[1, 2, 3, 4][::-1]").to_string(), "[4, 3, 2, 1]");
        assert_eq!(eval_ok("'hello'[::-1]").to_string(), "olleh");
        assert_eq!(eval_ok("[1, 2, 3, 4, 5][1:4:2]").to_string(), "[2, 4]");
    }

    #[test]
    fn negative_indices_count_from_the_end() {
        assert_eq!(eval_ok("[10, 20, 30][-1]").as_int().unwrap(), 30);
        let err = run("[1][5]").unwrap_err();
        assert_eq!(err.kind, crate::exception::ExceptionKind::Index);
    }

    #[test]
    fn defined_function_adds_integers() {
        let source = indoc! {"
            def add(a, b):
                return a + b
            add(2, 3)
        "};
        assert_eq!(eval_ok(source).as_int().unwrap(), 5);
    }

    #[test]
    fn closures_capture_their_defining_frame() {
        let source = indoc! {"
            def make_counter():
                count = [0]
                def bump():
                    count.append(len(count))
                    return len(count)
                return bump
            counter = make_counter()
            counter()
            counter()
        "};
        assert_eq!(eval_ok(source).as_int().unwrap(), 3);
    }

    #[test]
    fn global_statement_writes_the_root_binding() {
        let source = indoc! {"
            total = 0
            def bump():
                global total
                total = total + 1
            bump()
            bump()
            total
        "};
        assert_eq!(eval_ok(source).as_int().unwrap(), 2);
    }

    #[test]
    fn mutable_default_is_shared_across_calls() {
        let source = indoc! {"
            def push(x, acc=[]):
                acc.append(x)
                return len(acc)
            push(1)
            push(2)
        "};
        assert_eq!(eval_ok(source).as_int().unwrap(), 2);
    }

    #[test]
    fn single_inheritance_dispatches_overrides_and_inherited_methods() {
        let source = indoc! {"
            class Animal:
                def __init__(self, name):
                    self.name = name
                def speak(self):
                    return 'generic'
                def label(self):
                    return self.name
            class Dog(Animal):
                def speak(self):
                    return 'woof'
            d = Dog('rex')
            [d.speak(), d.label()]
        "};
        assert_eq!(eval_ok(source).to_string(), "['woof', 'rex']");
    }

    #[test]
    fn instance_eq_method_drives_equality() {
        let source = indoc! {"
            class Point:
                def __init__(self, x):
                    self.x = x
                def __eq__(self, other):
                    return self.x == other.x
            Point(1) == Point(1)
        "};
        assert!(eval_ok(source).is_truthy());
    }

    #[test]
    fn instances_without_eq_compare_by_identity() {
        let source = indoc! {"
            class Box:
                def __init__(self):
                    pass
            a = Box()
            b = Box()
            [a == a, a == b]
        "};
        assert_eq!(eval_ok(source).to_string(), "[True, False]");
    }

    #[test]
    fn finally_runs_on_every_path() {
        let source = indoc! {"
            log = []
            def attempt(n):
                try:
                    if n == 1:
                        raise 'one'
                    if n == 2:
                        raise 'two'
                    return 'ok'
                except Exception as e:
                    if n == 1:
                        return str(e)
                    raise e
                finally:
                    log.append(n)
            results = []
            results.append(attempt(0))
            results.append(attempt(1))
            try:
                attempt(2)
            except as e:
                results.append(str(e))
            [results, log]
        "};
        assert_eq!(
            eval_ok(source).to_string(),
            "[['ok', 'one', 'two'], [0, 1, 2]]"
        );
    }

    #[test]
    fn raised_string_binds_and_stringifies() {
        let source = indoc! {"
            try:
                raise 'boom'
            except as e:
                result = str(e)
            finally:
                pass
            result
        "};
        assert_eq!(eval_ok(source).to_string(), "boom");
    }

    #[test]
    fn uncaught_exception_escapes_the_run() {
        let err = run("raise 'unhandled'").unwrap_err();
        assert_eq!(err.message, "unhandled");
    }

    #[test]
    fn bare_raise_rethrows_the_active_exception() {
        let source = indoc! {"
            caught = []
            try:
                try:
                    raise 'inner'
                except as e:
                    raise
            except as e:
                caught.append(str(e))
            caught
        "};
        assert_eq!(eval_ok(source).to_string(), "['inner']");
    }

    #[test]
    fn chained_comparison_short_circuits() {
        assert!(eval_ok("1 < 2 < 3").is_truthy());
        assert!(!eval_ok("1 < 2 < 2").is_truthy());
    }

    #[test]
    fn boolean_operators_return_operand_values() {
        assert_eq!(eval_ok("0 or 'fallback'").to_string(), "fallback");
        assert_eq!(eval_ok("'x' and 5").as_int().unwrap(), 5);
        assert_eq!(eval_ok("0 and 5").as_int().unwrap(), 0);
    }

    #[test]
    fn comprehension_variable_does_not_leak() {
        let source = indoc! {"
            squares = [i * i for i in range(3)]
            squares
        "};
        assert_eq!(eval_ok(source).to_string(), "[0, 1, 4]");
        let err = run(indoc! {"
            squares = [i * i for i in range(3)]
            i
        "})
        .unwrap_err();
        assert_eq!(err.kind, crate::exception::ExceptionKind::Name);
    }

    #[test]
    fn dict_and_set_comprehensions_build_containers() {
        assert_eq!(
            eval_ok("{k: k * 2 for k in range(3)}").to_string(),
            "{0: 0, 1: 2, 2: 4}"
        );
        assert_eq!(eval_ok("len({x % 2 for x in range(10)})").as_int().unwrap(), 2);
    }

    #[test]
    fn for_loop_unpacks_pairs() {
        let source = indoc! {"
            total = 0
            for k, v in {'a': 1, 'b': 2}.items():
                total += v
            total
        "};
        assert_eq!(eval_ok(source).as_int().unwrap(), 3);
    }

    #[test]
    fn while_loop_honors_break_and_continue() {
        let source = indoc! {"
            n = 0
            total = 0
            while True:
                n += 1
                if n > 10:
                    break
                if n % 2 == 0:
                    continue
                total += n
            total
        "};
        assert_eq!(eval_ok(source).as_int().unwrap(), 25);
    }

    #[test]
    fn fstring_interpolates_expressions() {
        let source = indoc! {"
            name = 'world'
            f'hello {name}, {1 + 1}'
        "};
        assert_eq!(eval_ok(source).to_string(), "hello world, 2");
    }

    #[test]
    fn lambda_and_kwargs_bind() {
        let source = indoc! {"
            def describe(first, *rest, **extra):
                return [first, len(rest), extra.get('color', 'none')]
            describe(1, 2, 3, color='red')
        "};
        assert_eq!(eval_ok(source).to_string(), "[1, 2, 'red']");
        assert_eq!(eval_ok("(lambda a, b=2: a * b)(5)").as_int().unwrap(), 10);
    }

    #[test]
    fn print_writes_to_the_sink() {
        assert_eq!(run_output("print('a', 1, [2])"), "a 1 [2]\n");
    }

    #[test]
    fn membership_covers_strings_lists_and_dicts() {
        assert!(eval_ok("'ell' in 'hello'").is_truthy());
        assert!(eval_ok("2 in [1, 2]").is_truthy());
        assert!(eval_ok("'k' in {'k': 1}").is_truthy());
        assert!(eval_ok("3 not in [1, 2]").is_truthy());
    }

    #[test]
    fn unknown_name_raises_name_error() {
        let err = run("missing_name").unwrap_err();
        assert_eq!(err.kind, crate::exception::ExceptionKind::Name);
        assert!(err.message.contains("missing_name"));
    }

    #[test]
    fn recursion_depth_is_bounded() {
        let source = indoc! {"
            def spin():
                return spin()
            spin()
        "};
        let err = run(source).unwrap_err();
        assert!(err.message.contains("recursion"));
    }

    #[test]
    fn power_is_right_associative_and_unary_binds_looser() {
        assert_eq!(eval_ok("2 ** 3 ** 2").as_int().unwrap(), 512);
        assert_eq!(eval_ok("-2 ** 2").as_int().unwrap(), -4);
    }

    #[test]
    fn string_and_list_repetition() {
        assert_eq!(eval_ok("'ab' * 3").to_string(), "ababab");
        assert_eq!(eval_ok("[0] * 3").to_string(), "[0, 0, 0]");
        assert_eq!(eval_ok("[1] + [2]").to_string(), "[1, 2]");
    }

    #[test]
    fn augmented_index_assignment_updates_in_place() {
        let source = indoc! {"
            xs = [1, 2, 3]
            xs[1] += 10
            xs
        "};
        assert_eq!(eval_ok(source).to_string(), "[1, 12, 3]");
    }

    #[test]
    fn heterogeneous_dict_keys_do_not_collide() {
        let source = indoc! {"
            d = {}
            d[1] = 'int'
            d['1'] = 'str'
            [d[1], d['1'], len(d)]
        "};
        assert_eq!(eval_ok(source).to_string(), "['int', 'str', 2]");
    }
}
