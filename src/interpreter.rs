//! Embedder-facing interpreter: variable marshalling, extension
//! registration, host-initiated calls, and output redirection.

use std::io::Write;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::builtins::seed_builtin_globals;
use crate::context::ExecutionContext;
use crate::environment::{EnvRef, Environment};
use crate::errors::EvalError;
use crate::evaluator::Evaluator;
use crate::exception::Raised;
use crate::lexer::tokenize;
use crate::library::Library;
use crate::parser::parse_tokens;
use crate::value::{NativeFunction, Value};

pub type ImportResolver = Box<dyn Fn(&str) -> Option<Library>>;

/// Registered libraries and the on-demand import resolver with its
/// once-per-name cache.
pub(crate) struct HostState {
    libraries: IndexMap<String, Library>,
    resolver: Option<ImportResolver>,
    resolver_cache: FxHashMap<String, Option<Value>>,
}

impl HostState {
    pub(crate) fn new() -> Self {
        Self {
            libraries: IndexMap::new(),
            resolver: None,
            resolver_cache: FxHashMap::default(),
        }
    }

    /// Resolves `import name`: registered libraries first, then the
    /// on-demand resolver. The resolver is consulted exactly once per
    /// name; hits and misses are both cached.
    pub(crate) fn resolve_import(&mut self, name: &str) -> Result<Value, Raised> {
        if let Some(library) = self.libraries.get(name) {
            return Ok(Value::Library(std::rc::Rc::new(library.clone())));
        }
        if let Some(cached) = self.resolver_cache.get(name) {
            return cached.clone().ok_or_else(|| missing_library(name));
        }
        let resolved = self
            .resolver
            .as_ref()
            .and_then(|resolver| resolver(name))
            .map(|library| Value::Library(std::rc::Rc::new(library)));
        self.resolver_cache.insert(name.to_string(), resolved.clone());
        resolved.ok_or_else(|| missing_library(name))
    }
}

fn missing_library(name: &str) -> Raised {
    Raised::import_error(format!("no library named '{name}'"))
}

enum OutputMode {
    Inherit,
    Capture(Vec<u8>),
    Writer(Box<dyn Write>),
}

pub struct Interpreter {
    globals: EnvRef,
    host: HostState,
    output: OutputMode,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Fresh instance with the builtin functions seeded into an empty
    /// global frame.
    pub fn new() -> Self {
        let globals = Environment::new_root();
        seed_builtin_globals(&globals);
        Self {
            globals,
            host: HostState::new(),
            output: OutputMode::Inherit,
        }
    }

    pub fn eval(&mut self, source: &str) -> Result<Value, EvalError> {
        self.eval_with_context(&ExecutionContext::new(), source)
    }

    /// Parses and evaluates, returning the value of the last top-level
    /// expression or assignment. Output written before a runtime failure
    /// stays in the sink.
    pub fn eval_with_context(
        &mut self,
        ctx: &ExecutionContext,
        source: &str,
    ) -> Result<Value, EvalError> {
        let program = parse_tokens(tokenize(source)?)?;
        self.run(ctx, |evaluator, globals| {
            evaluator.run_program(&program, globals)
        })
    }

    pub fn set_var(&mut self, name: &str, value: impl Into<Value>) {
        Environment::set(&self.globals, name, value.into());
    }

    pub fn get_var(&self, name: &str) -> Option<Value> {
        Environment::get(&self.globals, name)
    }

    pub fn get_var_as_int(&self, name: &str) -> Option<i64> {
        self.get_var(name)?.as_int().ok()
    }

    pub fn get_var_as_float(&self, name: &str) -> Option<f64> {
        self.get_var(name)?.as_float().ok()
    }

    pub fn get_var_as_string(&self, name: &str) -> Option<String> {
        match self.get_var(name)? {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_var_as_bool(&self, name: &str) -> Option<bool> {
        match self.get_var(name)? {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn get_var_as_list(&self, name: &str) -> Option<Vec<Value>> {
        Some(self.get_var(name)?.as_list().ok()?.borrow().clone())
    }

    pub fn get_var_as_dict(&self, name: &str) -> Option<Vec<(Value, Value)>> {
        let dict = self.get_var(name)?.as_dict().ok()?;
        let pairs = dict
            .borrow()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Some(pairs)
    }

    /// Registers a host function as a global builtin.
    pub fn register_func(
        &mut self,
        name: &str,
        help: &str,
        func: impl Fn(&mut crate::context::NativeCall<'_>) -> Result<Value, Raised> + 'static,
    ) {
        let builtin = Value::Builtin(std::rc::Rc::new(NativeFunction {
            name: name.to_string(),
            help: help.to_string(),
            func: Box::new(func),
        }));
        Environment::set(&self.globals, name, builtin);
    }

    /// Help text of a registered global builtin.
    pub fn help_text(&self, name: &str) -> Option<String> {
        match self.get_var(name)? {
            Value::Builtin(func) => Some(func.help.clone()),
            _ => None,
        }
    }

    pub fn register_library(&mut self, library: Library) {
        self.host.libraries.insert(library.name.clone(), library);
    }

    pub fn register_sub_library(
        &mut self,
        parent: &str,
        library: Library,
    ) -> Result<(), EvalError> {
        let Some(parent) = self.host.libraries.get_mut(parent) else {
            return Err(EvalError::Exception(missing_library(parent)));
        };
        parent.add_child(library);
        Ok(())
    }

    /// On-demand import callback, consulted once per unresolved name.
    pub fn set_import_resolver(&mut self, resolver: impl Fn(&str) -> Option<Library> + 'static) {
        self.host.resolver = Some(Box::new(resolver));
        self.host.resolver_cache.clear();
    }

    pub fn call_function(&mut self, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        self.call_function_with_context(&ExecutionContext::new(), name, args)
    }

    pub fn call_function_with_context(
        &mut self,
        ctx: &ExecutionContext,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, EvalError> {
        let callee = Environment::get(&self.globals, name).ok_or_else(|| {
            EvalError::Exception(Raised::name_error(format!("name '{name}' is not defined")))
        })?;
        self.run(ctx, |evaluator, _| evaluator.call_value(&callee, args, vec![]))
    }

    /// Instantiates a script-defined class by name.
    pub fn create_instance(&mut self, class_name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        let class = Environment::get(&self.globals, class_name).ok_or_else(|| {
            EvalError::Exception(Raised::name_error(format!(
                "name '{class_name}' is not defined"
            )))
        })?;
        if !matches!(class, Value::Class(_)) {
            return Err(EvalError::Exception(Raised::type_error(format!(
                "'{class_name}' is not a class"
            ))));
        }
        self.run(&ExecutionContext::new(), |evaluator, _| {
            evaluator.call_value(&class, args, vec![])
        })
    }

    pub fn call_method(
        &mut self,
        instance: &Value,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, EvalError> {
        let method = method_on(instance, name)?;
        self.run(&ExecutionContext::new(), |evaluator, _| {
            evaluator.call_value(&method, args, vec![])
        })
    }

    /// Redirects `print` into an internal buffer readable with
    /// `take_output`.
    pub fn capture_output(&mut self) {
        self.output = OutputMode::Capture(Vec::new());
    }

    /// Returns and clears the captured output.
    pub fn take_output(&mut self) -> String {
        match &mut self.output {
            OutputMode::Capture(buffer) => {
                String::from_utf8_lossy(&std::mem::take(buffer)).into_owned()
            }
            _ => String::new(),
        }
    }

    pub fn set_output_writer(&mut self, writer: Box<dyn Write>) {
        self.output = OutputMode::Writer(writer);
    }

    fn run<R>(
        &mut self,
        ctx: &ExecutionContext,
        body: impl FnOnce(&mut Evaluator<'_>, &EnvRef) -> Result<R, Raised>,
    ) -> Result<R, EvalError> {
        let host = &mut self.host;
        let globals = &self.globals;
        let result = match &mut self.output {
            OutputMode::Inherit => {
                let mut stdout = std::io::stdout();
                let mut evaluator = Evaluator::new(ctx, &mut stdout, host);
                body(&mut evaluator, globals)
            }
            OutputMode::Capture(buffer) => {
                let mut evaluator = Evaluator::new(ctx, buffer, host);
                body(&mut evaluator, globals)
            }
            OutputMode::Writer(writer) => {
                let mut evaluator = Evaluator::new(ctx, &mut **writer, host);
                body(&mut evaluator, globals)
            }
        };
        result.map_err(EvalError::from)
    }
}

fn method_on(instance: &Value, name: &str) -> Result<Value, EvalError> {
    let Value::Instance(inner) = instance else {
        return Err(EvalError::Exception(Raised::type_error(format!(
            "expected instance, got {}",
            instance.type_name()
        ))));
    };
    let method = inner.class.resolve_method(name).ok_or_else(|| {
        EvalError::Exception(Raised::attribute_error(format!(
            "'{}' object has no attribute '{name}'",
            inner.class.name
        )))
    })?;
    // Re-bind with the receiver, matching attribute access from script.
    crate::evaluator::bind_method(&method, instance).map_err(EvalError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn eval_returns_the_last_expression_value() {
        let mut interp = Interpreter::new();
        let value = interp.eval("x = 2\nx + 3").unwrap();
        assert_eq!(value.as_int().unwrap(), 5);
    }

    #[test]
    fn variables_round_trip_between_host_and_script() {
        let mut interp = Interpreter::new();
        interp.set_var("threshold", 10);
        interp.eval("passed = threshold > 5").unwrap();
        assert_eq!(interp.get_var_as_bool("passed"), Some(true));
        assert_eq!(interp.get_var_as_int("threshold"), Some(10));
        assert_eq!(interp.get_var_as_int("missing"), None);
    }

    #[test]
    fn registered_function_is_callable_from_script() {
        let mut interp = Interpreter::new();
        interp.register_func("triple", "triple(n) -> int", |call| {
            Ok(Value::Int(call.args.int_at(0, "n")? * 3))
        });
        assert_eq!(interp.eval("triple(4)").unwrap().as_int().unwrap(), 12);
        assert_eq!(interp.help_text("triple").as_deref(), Some("triple(n) -> int"));
    }

    #[test]
    fn host_calls_a_script_function() {
        let mut interp = Interpreter::new();
        interp
            .eval(indoc! {"
                def add(a, b):
                    return a + b
            "})
            .unwrap();
        let result = interp
            .call_function("add", vec![Value::Int(2), Value::Int(3)])
            .unwrap();
        assert_eq!(result.as_int().unwrap(), 5);
    }

    #[test]
    fn create_instance_and_call_method() {
        let mut interp = Interpreter::new();
        interp
            .eval(indoc! {"
                class Greeter:
                    def __init__(self, name):
                        self.name = name
                    def greet(self):
                        return 'hi ' + self.name
            "})
            .unwrap();
        let instance = interp
            .create_instance("Greeter", vec![Value::str("pat")])
            .unwrap();
        let greeting = interp.call_method(&instance, "greet", vec![]).unwrap();
        assert_eq!(greeting.to_string(), "hi pat");
    }

    #[test]
    fn captured_output_clears_on_read() {
        let mut interp = Interpreter::new();
        interp.capture_output();
        interp.eval("print('once')").unwrap();
        assert_eq!(interp.take_output(), "once\n");
        assert_eq!(interp.take_output(), "");
    }

    #[test]
    fn import_resolver_is_consulted_once_per_name() {
        use std::cell::Cell;
        use std::rc::Rc;

        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        let mut interp = Interpreter::new();
        interp.set_import_resolver(move |name| {
            seen.set(seen.get() + 1);
            if name == "maths" {
                let mut library = Library::new("maths");
                library.add_constant("answer", Value::Int(42));
                Some(library)
            } else {
                None
            }
        });

        interp.eval("import maths\nimport maths\nx = maths.answer").unwrap();
        assert_eq!(interp.get_var_as_int("x"), Some(42));
        assert_eq!(calls.get(), 1);

        assert!(interp.eval("import nothing").is_err());
        assert!(interp.eval("import nothing").is_err());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn exit_surfaces_as_a_typed_result() {
        let mut interp = Interpreter::new();
        let err = interp.eval("exit(3)").unwrap_err();
        assert!(matches!(err, EvalError::Exit { code: 3 }));
    }
}
