//! Runtime value model: a closed tagged union with Python-flavored
//! truthiness, rendering, and aliasing rules.
//!
//! Containers (list/dict/set) hold their storage behind `Rc<RefCell<..>>`
//! so plain assignment aliases the container instead of copying it;
//! scalars copy. Dict and set keys are canonicalized to a type-tagged
//! string so `1` and `"1"` occupy distinct slots while `True` and `1`
//! share one.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::ast::{Expression, Parameter, Statement};
use crate::environment::EnvRef;
use crate::exception::Raised;
use crate::library::Library;

pub type NativeFn = Box<dyn Fn(&mut crate::context::NativeCall<'_>) -> Result<Value, Raised>>;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<Vec<Value>>),
    Dict(Rc<RefCell<Dict>>),
    Set(Rc<RefCell<Set>>),
    Function(Rc<FunctionValue>),
    Builtin(Rc<NativeFunction>),
    Class(Rc<ClassValue>),
    Instance(Rc<InstanceValue>),
    Exception(Rc<Raised>),
    Library(Rc<Library>),
}

/// A user-defined function or lambda, closing over its defining frame.
pub struct FunctionValue {
    pub name: String,
    pub params: Vec<Parameter>,
    /// Default values aligned with `params`, evaluated once at definition
    /// time. Mutable defaults are therefore shared across calls.
    pub defaults: Vec<Option<Value>>,
    pub body: FunctionBody,
    pub env: EnvRef,
    /// Receiver prepended as the first argument when set (bound method).
    pub bound_self: Option<Value>,
}

pub enum FunctionBody {
    Block(Rc<Vec<Statement>>),
    Expr(Rc<Expression>),
}

pub struct NativeFunction {
    pub name: String,
    pub help: String,
    pub func: NativeFn,
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

pub struct ClassValue {
    pub name: String,
    pub base: Option<Rc<ClassValue>>,
    pub methods: FxHashMap<String, Value>,
}

impl ClassValue {
    /// Walks self then the base chain; first match wins.
    pub fn resolve_method(&self, name: &str) -> Option<Value> {
        if let Some(method) = self.methods.get(name) {
            return Some(method.clone());
        }
        self.base.as_ref().and_then(|base| base.resolve_method(name))
    }

    pub fn is_subclass_of(&self, other: &Rc<ClassValue>) -> bool {
        let mut current = Some(self);
        while let Some(class) = current {
            if std::ptr::eq(class as *const ClassValue, Rc::as_ptr(other)) {
                return true;
            }
            current = class.base.as_deref();
        }
        false
    }
}

pub struct InstanceValue {
    pub class: Rc<ClassValue>,
    pub fields: RefCell<FxHashMap<String, Value>>,
}

/// Insertion-ordered dictionary keyed by canonical key tag; each slot
/// keeps the original key value for iteration and rendering.
#[derive(Default)]
pub struct Dict {
    entries: IndexMap<String, (Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<(), Raised> {
        let tag = canonical_key(&key)?;
        self.entries.insert(tag, (key, value));
        Ok(())
    }

    pub fn get(&self, key: &Value) -> Result<Option<Value>, Raised> {
        let tag = canonical_key(key)?;
        Ok(self.entries.get(&tag).map(|(_, value)| value.clone()))
    }

    pub fn remove(&mut self, key: &Value) -> Result<Option<Value>, Raised> {
        let tag = canonical_key(key)?;
        Ok(self.entries.shift_remove(&tag).map(|(_, value)| value))
    }

    pub fn contains(&self, key: &Value) -> Result<bool, Raised> {
        let tag = canonical_key(key)?;
        Ok(self.entries.contains_key(&tag))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.values().map(|(key, _)| key)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.values().map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.values().map(|(key, value)| (key, value))
    }
}

/// Insertion-ordered set over the same canonical key space as `Dict`.
#[derive(Default)]
pub struct Set {
    entries: IndexMap<String, Value>,
}

impl Set {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, value: Value) -> Result<(), Raised> {
        let tag = canonical_key(&value)?;
        self.entries.entry(tag).or_insert(value);
        Ok(())
    }

    pub fn remove(&mut self, value: &Value) -> Result<bool, Raised> {
        let tag = canonical_key(value)?;
        Ok(self.entries.shift_remove(&tag).is_some())
    }

    pub fn contains(&self, value: &Value) -> Result<bool, Raised> {
        let tag = canonical_key(value)?;
        Ok(self.entries.contains_key(&tag))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }
}

/// Canonical hash tag for dict/set keys.
///
/// `True`/`1` and `1.0` fold onto the integer tag so they alias, matching
/// Python's cross-type hash equality; `1` and `"1"` stay distinct.
pub fn canonical_key(value: &Value) -> Result<String, Raised> {
    match value {
        Value::None => Ok("n:".to_string()),
        Value::Bool(b) => Ok(format!("i:{}", i64::from(*b))),
        Value::Int(i) => Ok(format!("i:{i}")),
        Value::Float(f) => {
            if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                Ok(format!("i:{}", *f as i64))
            } else {
                Ok(format!("f:{}", f.to_bits()))
            }
        }
        Value::Str(s) => Ok(format!("s:{s}")),
        Value::Tuple(items) => {
            let mut tag = String::from("t:(");
            for item in items.iter() {
                tag.push_str(&canonical_key(item)?);
                tag.push(',');
            }
            tag.push(')');
            Ok(tag)
        }
        other => Err(Raised::type_error(format!(
            "unhashable type: '{}'",
            other.type_name()
        ))),
    }
}

impl Value {
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(dict: Dict) -> Self {
        Value::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn set(set: Set) -> Self {
        Value::Set(Rc::new(RefCell::new(set)))
    }

    pub fn str(text: impl Into<String>) -> Self {
        Value::Str(text.into())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin",
            Value::Class(_) => "class",
            Value::Instance(_) => "instance",
            Value::Exception(_) => "exception",
            Value::Library(_) => "library",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Tuple(items) => !items.is_empty(),
            Value::Dict(dict) => !dict.borrow().is_empty(),
            Value::Set(set) => !set.borrow().is_empty(),
            _ => true,
        }
    }

    // Coercion accessors. These fail with TypeError-kind exceptions so a
    // bad native argument never turns into a host panic.

    pub fn as_int(&self) -> Result<i64, Raised> {
        match self {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(i64::from(*b)),
            other => Err(Raised::type_error(format!(
                "expected int, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn as_float(&self) -> Result<f64, Raised> {
        match self {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            Value::Bool(b) => Ok(f64::from(u8::from(*b))),
            other => Err(Raised::type_error(format!(
                "expected float, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn as_str(&self) -> Result<&str, Raised> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(Raised::type_error(format!(
                "expected str, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn as_bool(&self) -> Result<bool, Raised> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(Raised::type_error(format!(
                "expected bool, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn as_list(&self) -> Result<Rc<RefCell<Vec<Value>>>, Raised> {
        match self {
            Value::List(items) => Ok(Rc::clone(items)),
            other => Err(Raised::type_error(format!(
                "expected list, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn as_dict(&self) -> Result<Rc<RefCell<Dict>>, Raised> {
        match self {
            Value::Dict(dict) => Ok(Rc::clone(dict)),
            other => Err(Raised::type_error(format!(
                "expected dict, got {}",
                other.type_name()
            ))),
        }
    }

    /// `repr()` rendering: strings quoted, containers rendered recursively.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => {
                let escaped = s
                    .replace('\\', "\\\\")
                    .replace('\'', "\\'")
                    .replace('\n', "\\n")
                    .replace('\t', "\\t");
                format!("'{escaped}'")
            }
            other => other.render(),
        }
    }

    fn render(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => s.clone(),
            Value::List(items) => {
                let parts: Vec<String> = items.borrow().iter().map(Value::repr).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(Value::repr).collect();
                if parts.len() == 1 {
                    format!("({},)", parts[0])
                } else {
                    format!("({})", parts.join(", "))
                }
            }
            Value::Dict(dict) => {
                let parts: Vec<String> = dict
                    .borrow()
                    .iter()
                    .map(|(key, value)| format!("{}: {}", key.repr(), value.repr()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Set(set) => {
                if set.borrow().is_empty() {
                    return "set()".to_string();
                }
                let parts: Vec<String> = set.borrow().iter().map(Value::repr).collect();
                format!("{{{}}}", parts.join(", "))
            }
            Value::Function(func) => format!("<function {}>", func.name),
            Value::Builtin(func) => format!("<builtin {}>", func.name),
            Value::Class(class) => format!("<class {}>", class.name),
            Value::Instance(instance) => format!("<{} instance>", instance.class.name),
            Value::Exception(raised) => raised.to_string(),
            Value::Library(library) => format!("<library {}>", library.name),
        }
    }
}

/// Floats always render with a decimal point or exponent, as Python does.
fn format_float(f: f64) -> String {
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if f.is_nan() {
        return "nan".to_string();
    }
    let text = f.to_string();
    if text.contains('.') || text.contains('e') {
        text
    } else {
        format!("{text}.0")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repr())
    }
}

/// Value equality: numeric across Int/Float/Bool, structural for
/// containers, identity for instances and callables.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
        (Value::Bool(a), Value::Int(b)) | (Value::Int(b), Value::Bool(a)) => i64::from(*a) == *b,
        (Value::Bool(a), Value::Float(b)) | (Value::Float(b), Value::Bool(a)) => {
            f64::from(u8::from(*a)) == *b
        }
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            if Rc::ptr_eq(a, b) {
                return true;
            }
            let a = a.borrow();
            let b = b.borrow();
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
        }
        (Value::Tuple(a), Value::Tuple(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
        }
        (Value::Dict(a), Value::Dict(b)) => {
            if Rc::ptr_eq(a, b) {
                return true;
            }
            let a = a.borrow();
            let b = b.borrow();
            if a.len() != b.len() {
                return false;
            }
            a.iter().all(|(key, value)| {
                matches!(b.get(key), Ok(Some(other)) if values_equal(value, &other))
            })
        }
        (Value::Set(a), Value::Set(b)) => {
            if Rc::ptr_eq(a, b) {
                return true;
            }
            let a = a.borrow();
            let b = b.borrow();
            a.len() == b.len() && a.iter().all(|item| matches!(b.contains(item), Ok(true)))
        }
        (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
        (Value::Builtin(a), Value::Builtin(b)) => Rc::ptr_eq(a, b),
        (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
        (Value::Exception(a), Value::Exception(b)) => a == b,
        _ => false,
    }
}

// Native→Value marshalling for the embedder surface.

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::list(value)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::None
    }
}

/// Ordering for `<`/`>` comparisons, `sorted`, `min`, and `max`.
/// Numbers compare across Int/Float; strings, lists, and tuples compare
/// lexicographically; anything else is a TypeError.
pub fn compare_values(left: &Value, right: &Value) -> Result<std::cmp::Ordering, Raised> {
    use std::cmp::Ordering;
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (
            Value::Int(_) | Value::Float(_) | Value::Bool(_),
            Value::Int(_) | Value::Float(_) | Value::Bool(_),
        ) => {
            let a = left.as_float()?;
            let b = right.as_float()?;
            a.partial_cmp(&b).ok_or_else(|| {
                Raised::value_error("cannot order nan values")
            })
        }
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::List(a), Value::List(b)) => {
            compare_sequences(a.borrow().as_slice(), b.borrow().as_slice())
        }
        (Value::Tuple(a), Value::Tuple(b)) => compare_sequences(a, b),
        _ => Err(Raised::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn compare_sequences(a: &[Value], b: &[Value]) -> Result<std::cmp::Ordering, Raised> {
    for (x, y) in a.iter().zip(b.iter()) {
        let ordering = compare_values(x, y)?;
        if ordering != std::cmp::Ordering::Equal {
            return Ok(ordering);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

/// Materializes an iterable into a vector of elements: list/tuple/set
/// items, string characters, dict keys. Non-iterables are a TypeError.
pub fn iter_values(value: &Value) -> Result<Vec<Value>, Raised> {
    match value {
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Tuple(items) => Ok(items.as_ref().clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Dict(dict) => Ok(dict.borrow().keys().cloned().collect()),
        Value::Set(set) => Ok(set.borrow().iter().cloned().collect()),
        other => Err(Raised::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}
