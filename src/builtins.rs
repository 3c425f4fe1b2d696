//! Core builtin functions seeded into every fresh global frame, plus the
//! method tables for builtin container and string types.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use crate::context::NativeCall;
use crate::environment::{EnvRef, Environment};
use crate::exception::Raised;
use crate::value::{
    Dict, NativeFunction, Set, Value, compare_values, iter_values, values_equal,
};

fn native(
    name: &str,
    help: &str,
    func: impl Fn(&mut NativeCall<'_>) -> Result<Value, Raised> + 'static,
) -> Value {
    Value::Builtin(Rc::new(NativeFunction {
        name: name.to_string(),
        help: help.to_string(),
        func: Box::new(func),
    }))
}

/// Installs the builtin functions into a global frame.
pub fn seed_builtin_globals(env: &EnvRef) {
    let define = |name: &str, value: Value| Environment::set(env, name, value);

    define(
        "print",
        native("print", "print(values...): write values to the output sink", |call| {
            let rendered: Vec<String> = (0..call.args.len())
                .map(|i| call.args.get(i).map(Value::to_string).unwrap_or_default())
                .collect();
            writeln!(call.output, "{}", rendered.join(" "))
                .map_err(|err| Raised::runtime_error(format!("print failed: {err}")))?;
            Ok(Value::None)
        }),
    );

    define(
        "len",
        native("len", "len(x) -> int: element count of a container or string", |call| {
            let value = call.args.require(0, "x")?;
            let length = match value {
                Value::Str(s) => s.chars().count(),
                Value::List(items) => items.borrow().len(),
                Value::Tuple(items) => items.len(),
                Value::Dict(dict) => dict.borrow().len(),
                Value::Set(set) => set.borrow().len(),
                other => {
                    return Err(Raised::type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )));
                }
            };
            Ok(Value::Int(length as i64))
        }),
    );

    define(
        "range",
        native("range", "range(stop) / range(start, stop, step=1) -> list", |call| {
            let (start, stop, step) = match call.args.len() {
                1 => (0, call.args.int_at(0, "stop")?, 1),
                2 => (call.args.int_at(0, "start")?, call.args.int_at(1, "stop")?, 1),
                3 => (
                    call.args.int_at(0, "start")?,
                    call.args.int_at(1, "stop")?,
                    call.args.int_at(2, "step")?,
                ),
                n => {
                    return Err(Raised::arity_error(format!(
                        "range() takes 1 to 3 arguments but {n} were given"
                    )));
                }
            };
            if step == 0 {
                return Err(Raised::value_error("range() step must not be zero"));
            }
            let mut items = Vec::new();
            let mut current = start;
            while (step > 0 && current < stop) || (step < 0 && current > stop) {
                items.push(Value::Int(current));
                current += step;
            }
            Ok(Value::list(items))
        }),
    );

    define(
        "str",
        native("str", "str(x) -> str: display rendering of a value", |call| {
            Ok(Value::Str(match call.args.get(0) {
                Some(value) => value.to_string(),
                None => String::new(),
            }))
        }),
    );

    define(
        "repr",
        native("repr", "repr(x) -> str: source-like rendering of a value", |call| {
            Ok(Value::Str(call.args.require(0, "x")?.repr()))
        }),
    );

    define(
        "int",
        native("int", "int(x) -> int: convert, truncating floats toward zero", |call| {
            match call.args.require(0, "x")? {
                Value::Int(i) => Ok(Value::Int(*i)),
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                Value::Float(f) => Ok(Value::Int(f.trunc() as i64)),
                Value::Str(s) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                    Raised::value_error(format!("invalid literal for int(): '{s}'"))
                }),
                other => Err(Raised::type_error(format!(
                    "int() argument must be a number or string, not '{}'",
                    other.type_name()
                ))),
            }
        }),
    );

    define(
        "float",
        native("float", "float(x) -> float", |call| {
            match call.args.require(0, "x")? {
                Value::Float(f) => Ok(Value::Float(*f)),
                Value::Int(i) => Ok(Value::Float(*i as f64)),
                Value::Bool(b) => Ok(Value::Float(f64::from(u8::from(*b)))),
                Value::Str(s) => s.trim().parse::<f64>().map(Value::Float).map_err(|_| {
                    Raised::value_error(format!("invalid literal for float(): '{s}'"))
                }),
                other => Err(Raised::type_error(format!(
                    "float() argument must be a number or string, not '{}'",
                    other.type_name()
                ))),
            }
        }),
    );

    define(
        "bool",
        native("bool", "bool(x) -> bool: truthiness of a value", |call| {
            Ok(Value::Bool(
                call.args.get(0).map(Value::is_truthy).unwrap_or(false),
            ))
        }),
    );

    define(
        "list",
        native("list", "list(iterable=()) -> list: shallow copy into a new list", |call| {
            match call.args.get(0) {
                Some(value) => Ok(Value::list(iter_values(value)?)),
                None => Ok(Value::list(Vec::new())),
            }
        }),
    );

    define(
        "dict",
        native("dict", "dict(mapping=()) -> dict: shallow copy into a new dict", |call| {
            let mut copy = Dict::new();
            if let Some(value) = call.args.get(0) {
                let source = value.as_dict()?;
                for (key, value) in source.borrow().iter() {
                    copy.insert(key.clone(), value.clone())?;
                }
            }
            for (name, value) in call.args.keywords() {
                copy.insert(Value::str(name.clone()), value.clone())?;
            }
            Ok(Value::dict(copy))
        }),
    );

    define(
        "set",
        native("set", "set(iterable=()) -> set", |call| {
            let mut set = Set::new();
            if let Some(value) = call.args.get(0) {
                for item in iter_values(value)? {
                    set.insert(item)?;
                }
            }
            Ok(Value::set(set))
        }),
    );

    define(
        "type",
        native("type", "type(x) -> str: type name of a value", |call| {
            let value = call.args.require(0, "x")?;
            if let Value::Instance(instance) = value {
                return Ok(Value::str(instance.class.name.clone()));
            }
            Ok(Value::str(value.type_name()))
        }),
    );

    define(
        "abs",
        native("abs", "abs(x) -> number", |call| {
            match call.args.require(0, "x")? {
                Value::Int(i) => Ok(Value::Int(i.abs())),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(Raised::type_error(format!(
                    "bad operand type for abs(): '{}'",
                    other.type_name()
                ))),
            }
        }),
    );

    define(
        "min",
        native("min", "min(iterable) or min(a, b, ...)", |call| {
            extremum(call, "min", std::cmp::Ordering::Less)
        }),
    );

    define(
        "max",
        native("max", "max(iterable) or max(a, b, ...)", |call| {
            extremum(call, "max", std::cmp::Ordering::Greater)
        }),
    );

    define(
        "sum",
        native("sum", "sum(iterable) -> number", |call| {
            let items = iter_values(call.args.require(0, "iterable")?)?;
            let mut total = Value::Int(0);
            for item in items {
                total = match (&total, &item) {
                    (Value::Int(a), Value::Int(b)) => Value::Int(a + b),
                    _ => Value::Float(total.as_float()? + item.as_float()?),
                };
            }
            Ok(total)
        }),
    );

    define(
        "sorted",
        native("sorted", "sorted(iterable) -> list: new list in ascending order", |call| {
            let mut items = iter_values(call.args.require(0, "iterable")?)?;
            sort_values(&mut items)?;
            if call
                .args
                .kwarg("reverse")
                .is_some_and(Value::is_truthy)
            {
                items.reverse();
            }
            Ok(Value::list(items))
        }),
    );

    define(
        "exit",
        native("exit", "exit(code=0): request interpreter exit", |call| {
            let code = match call.args.get(0) {
                Some(value) => value.as_int()?,
                None => 0,
            };
            Err(Raised::system_exit(code))
        }),
    );
}

fn extremum(
    call: &mut NativeCall<'_>,
    name: &str,
    keep: std::cmp::Ordering,
) -> Result<Value, Raised> {
    let candidates = if call.args.len() == 1 {
        iter_values(call.args.require(0, "iterable")?)?
    } else {
        (0..call.args.len())
            .filter_map(|i| call.args.get(i).cloned())
            .collect()
    };
    let mut best: Option<Value> = None;
    for candidate in candidates {
        best = Some(match best {
            None => candidate,
            Some(current) => {
                if compare_values(&candidate, &current)? == keep {
                    candidate
                } else {
                    current
                }
            }
        });
    }
    best.ok_or_else(|| Raised::value_error(format!("{name}() arg is an empty sequence")))
}

/// Sorts in place with the script ordering rules, surfacing the first
/// comparison failure instead of panicking inside `sort_by`.
fn sort_values(items: &mut [Value]) -> Result<(), Raised> {
    let mut failure: Option<Raised> = None;
    items.sort_by(|a, b| match compare_values(a, b) {
        Ok(ordering) => ordering,
        Err(raised) => {
            failure.get_or_insert(raised);
            std::cmp::Ordering::Equal
        }
    });
    match failure {
        Some(raised) => Err(raised),
        None => Ok(()),
    }
}

/// Bound methods on list values. The closure captures the shared storage,
/// so mutation is visible through every alias of the list.
pub fn list_method(items: &Rc<RefCell<Vec<Value>>>, name: &str) -> Option<Value> {
    let items = Rc::clone(items);
    let method = match name {
        "append" => native("list.append", "append(x): add x at the end", move |call| {
            items.borrow_mut().push(call.args.require(0, "x")?.clone());
            Ok(Value::None)
        }),
        "pop" => native("list.pop", "pop(index=-1) -> value", move |call| {
            let mut storage = items.borrow_mut();
            let len = storage.len() as i64;
            let index = match call.args.get(0) {
                Some(value) => value.as_int()?,
                None => -1,
            };
            let actual = if index < 0 { index + len } else { index };
            if actual < 0 || actual >= len {
                return Err(Raised::index_error("pop index out of range"));
            }
            Ok(storage.remove(actual as usize))
        }),
        "extend" => native("list.extend", "extend(iterable): append every element", move |call| {
            let extra = iter_values(call.args.require(0, "iterable")?)?;
            items.borrow_mut().extend(extra);
            Ok(Value::None)
        }),
        "insert" => native("list.insert", "insert(index, x)", move |call| {
            let mut storage = items.borrow_mut();
            let len = storage.len() as i64;
            let mut index = call.args.int_at(0, "index")?;
            if index < 0 {
                index += len;
            }
            let clamped = index.clamp(0, len) as usize;
            storage.insert(clamped, call.args.require(1, "x")?.clone());
            Ok(Value::None)
        }),
        "remove" => native("list.remove", "remove(x): delete the first equal element", move |call| {
            let target = call.args.require(0, "x")?;
            let mut storage = items.borrow_mut();
            match storage.iter().position(|item| values_equal(item, target)) {
                Some(position) => {
                    storage.remove(position);
                    Ok(Value::None)
                }
                None => Err(Raised::value_error("list.remove(x): x not in list")),
            }
        }),
        "index" => native("list.index", "index(x) -> int: position of the first equal element", move |call| {
            let target = call.args.require(0, "x")?;
            let storage = items.borrow();
            storage
                .iter()
                .position(|item| values_equal(item, target))
                .map(|position| Value::Int(position as i64))
                .ok_or_else(|| Raised::value_error("value not in list"))
        }),
        "sort" => native("list.sort", "sort(): order the list in place", move |_call| {
            let mut storage = items.borrow_mut();
            sort_values(&mut storage)?;
            Ok(Value::None)
        }),
        "reverse" => native("list.reverse", "reverse(): reverse the list in place", move |_call| {
            items.borrow_mut().reverse();
            Ok(Value::None)
        }),
        "copy" => native("list.copy", "copy() -> list: shallow copy", move |_call| {
            Ok(Value::list(items.borrow().clone()))
        }),
        "count" => native("list.count", "count(x) -> int", move |call| {
            let target = call.args.require(0, "x")?;
            let count = items
                .borrow()
                .iter()
                .filter(|item| values_equal(item, target))
                .count();
            Ok(Value::Int(count as i64))
        }),
        _ => return None,
    };
    Some(method)
}

pub fn str_method(text: &str, name: &str) -> Option<Value> {
    let text = text.to_string();
    let method = match name {
        "upper" => native("str.upper", "upper() -> str", move |_call| {
            Ok(Value::Str(text.to_uppercase()))
        }),
        "lower" => native("str.lower", "lower() -> str", move |_call| {
            Ok(Value::Str(text.to_lowercase()))
        }),
        "strip" => native("str.strip", "strip() -> str: trim surrounding whitespace", move |_call| {
            Ok(Value::str(text.trim()))
        }),
        "split" => native("str.split", "split(sep=None) -> list", move |call| {
            let parts: Vec<Value> = match call.args.get(0) {
                Some(sep) => text
                    .split(sep.as_str()?)
                    .map(Value::str)
                    .collect(),
                None => text.split_whitespace().map(Value::str).collect(),
            };
            Ok(Value::list(parts))
        }),
        "join" => native("str.join", "join(list) -> str: concatenate with this separator", move |call| {
            let items = call.args.list_at(0, "list")?;
            let mut parts = Vec::new();
            for item in items.borrow().iter() {
                parts.push(item.as_str()?.to_string());
            }
            Ok(Value::Str(parts.join(&text)))
        }),
        "replace" => native("str.replace", "replace(old, new) -> str", move |call| {
            let old = call.args.str_at(0, "old")?;
            let new = call.args.str_at(1, "new")?;
            Ok(Value::Str(text.replace(old, new)))
        }),
        "startswith" => native("str.startswith", "startswith(prefix) -> bool", move |call| {
            Ok(Value::Bool(text.starts_with(call.args.str_at(0, "prefix")?)))
        }),
        "endswith" => native("str.endswith", "endswith(suffix) -> bool", move |call| {
            Ok(Value::Bool(text.ends_with(call.args.str_at(0, "suffix")?)))
        }),
        "find" => native("str.find", "find(sub) -> int: character index or -1", move |call| {
            let needle = call.args.str_at(0, "sub")?;
            match text.find(needle) {
                Some(byte_pos) => Ok(Value::Int(text[..byte_pos].chars().count() as i64)),
                None => Ok(Value::Int(-1)),
            }
        }),
        "format" => native("str.format", "format(args...) -> str: fill {} placeholders", move |call| {
            format_template(&text, call)
        }),
        _ => return None,
    };
    Some(method)
}

/// `{}` holes fill sequentially, `{0}` by position; `{{`/`}}` escape.
fn format_template(template: &str, call: &mut NativeCall<'_>) -> Result<Value, Raised> {
    let mut result = String::new();
    let mut next_index = 0usize;
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                result.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                result.push('}');
            }
            '{' => {
                let mut spec = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(inner) => spec.push(inner),
                        None => {
                            return Err(Raised::value_error(
                                "unmatched '{' in format string",
                            ));
                        }
                    }
                }
                let index = if spec.is_empty() {
                    let index = next_index;
                    next_index += 1;
                    index
                } else {
                    spec.parse::<usize>().map_err(|_| {
                        Raised::value_error(format!("bad format placeholder '{{{spec}}}'"))
                    })?
                };
                let value = call.args.get(index).ok_or_else(|| {
                    Raised::index_error("format index out of range")
                })?;
                result.push_str(&value.to_string());
            }
            '}' => return Err(Raised::value_error("unmatched '}' in format string")),
            _ => result.push(c),
        }
    }
    Ok(Value::Str(result))
}

pub fn dict_method(dict: &Rc<RefCell<Dict>>, name: &str) -> Option<Value> {
    let dict = Rc::clone(dict);
    let method = match name {
        "get" => native("dict.get", "get(key, default=None) -> value", move |call| {
            let key = call.args.require(0, "key")?;
            match dict.borrow().get(key)? {
                Some(value) => Ok(value),
                None => Ok(call.args.get(1).cloned().unwrap_or(Value::None)),
            }
        }),
        "keys" => native("dict.keys", "keys() -> list", move |_call| {
            Ok(Value::list(dict.borrow().keys().cloned().collect()))
        }),
        "values" => native("dict.values", "values() -> list", move |_call| {
            Ok(Value::list(dict.borrow().values().cloned().collect()))
        }),
        "items" => native("dict.items", "items() -> list of (key, value) tuples", move |_call| {
            let pairs: Vec<Value> = dict
                .borrow()
                .iter()
                .map(|(key, value)| Value::Tuple(Rc::new(vec![key.clone(), value.clone()])))
                .collect();
            Ok(Value::list(pairs))
        }),
        "pop" => native("dict.pop", "pop(key, default?) -> value", move |call| {
            let key = call.args.require(0, "key")?.clone();
            match dict.borrow_mut().remove(&key)? {
                Some(value) => Ok(value),
                None => match call.args.get(1) {
                    Some(default) => Ok(default.clone()),
                    None => Err(Raised::key_error(key.repr())),
                },
            }
        }),
        "update" => native("dict.update", "update(other): merge another dict's entries", move |call| {
            let other = call.args.dict_at(0, "other")?;
            if Rc::ptr_eq(&dict, &other) {
                return Ok(Value::None);
            }
            let mut target = dict.borrow_mut();
            for (key, value) in other.borrow().iter() {
                target.insert(key.clone(), value.clone())?;
            }
            Ok(Value::None)
        }),
        "copy" => native("dict.copy", "copy() -> dict: shallow copy", move |_call| {
            let mut copy = Dict::new();
            for (key, value) in dict.borrow().iter() {
                copy.insert(key.clone(), value.clone())?;
            }
            Ok(Value::dict(copy))
        }),
        _ => return None,
    };
    Some(method)
}

pub fn set_method(set: &Rc<RefCell<Set>>, name: &str) -> Option<Value> {
    let set = Rc::clone(set);
    let method = match name {
        "add" => native("set.add", "add(x)", move |call| {
            set.borrow_mut().insert(call.args.require(0, "x")?.clone())?;
            Ok(Value::None)
        }),
        "remove" => native("set.remove", "remove(x): delete x, KeyError when absent", move |call| {
            let target = call.args.require(0, "x")?;
            if set.borrow_mut().remove(target)? {
                Ok(Value::None)
            } else {
                Err(Raised::key_error(target.repr()))
            }
        }),
        "contains" => native("set.contains", "contains(x) -> bool", move |call| {
            Ok(Value::Bool(set.borrow().contains(call.args.require(0, "x")?)?))
        }),
        _ => return None,
    };
    Some(method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::Args;
    use crate::context::ExecutionContext;

    fn call_value(value: &Value, args: Vec<Value>) -> Result<Value, Raised> {
        let Value::Builtin(func) = value else {
            panic!("expected builtin");
        };
        let ctx = ExecutionContext::new();
        let mut sink = Vec::new();
        let mut call = NativeCall {
            args: Args::new(args, vec![]),
            ctx: &ctx,
            output: &mut sink,
        };
        (func.func)(&mut call)
    }

    fn global(name: &str) -> Value {
        let env = Environment::new_root();
        seed_builtin_globals(&env);
        Environment::get(&env, name).expect("builtin not seeded")
    }

    #[test]
    fn range_handles_negative_steps() {
        let result = call_value(
            &global("range"),
            vec![Value::Int(5), Value::Int(0), Value::Int(-2)],
        )
        .unwrap();
        assert_eq!(result.to_string(), "[5, 3, 1]");
    }

    #[test]
    fn int_conversion_truncates_and_parses() {
        let int = global("int");
        assert_eq!(call_value(&int, vec![Value::Float(-3.9)]).unwrap().as_int().unwrap(), -3);
        assert_eq!(call_value(&int, vec![Value::str(" 42 ")]).unwrap().as_int().unwrap(), 42);
        assert!(call_value(&int, vec![Value::str("3.5")]).is_err());
    }

    #[test]
    fn sum_stays_integer_until_a_float_appears() {
        let sum = global("sum");
        let ints = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert!(matches!(call_value(&sum, vec![ints]).unwrap(), Value::Int(3)));
        let mixed = Value::list(vec![Value::Int(1), Value::Float(0.5)]);
        assert!(matches!(call_value(&sum, vec![mixed]).unwrap(), Value::Float(_)));
    }

    #[test]
    fn sorted_returns_a_new_ordered_list() {
        let source = Value::list(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
        let result = call_value(&global("sorted"), vec![source.clone()]).unwrap();
        assert_eq!(result.to_string(), "[1, 2, 3]");
        assert_eq!(source.to_string(), "[3, 1, 2]");
    }

    #[test]
    fn list_append_mutates_through_the_shared_handle() {
        let storage = Rc::new(RefCell::new(vec![Value::Int(1)]));
        let append = list_method(&storage, "append").unwrap();
        call_value(&append, vec![Value::Int(2)]).unwrap();
        assert_eq!(storage.borrow().len(), 2);
    }

    #[test]
    fn list_pop_supports_negative_indices() {
        let storage = Rc::new(RefCell::new(vec![Value::Int(1), Value::Int(2)]));
        let pop = list_method(&storage, "pop").unwrap();
        assert_eq!(call_value(&pop, vec![]).unwrap().as_int().unwrap(), 2);
        assert!(call_value(&pop, vec![Value::Int(5)]).is_err());
    }

    #[test]
    fn str_format_fills_sequential_and_indexed_holes() {
        let format = str_method("{}-{0}-{1}", "format").unwrap();
        let result = call_value(&format, vec![Value::str("a"), Value::str("b")]).unwrap();
        assert_eq!(result.to_string(), "a-a-b");
    }

    #[test]
    fn str_find_reports_character_positions() {
        let find = str_method("héllo", "find").unwrap();
        assert_eq!(call_value(&find, vec![Value::str("llo")]).unwrap().as_int().unwrap(), 2);
        assert_eq!(call_value(&find, vec![Value::str("zz")]).unwrap().as_int().unwrap(), -1);
    }

    #[test]
    fn dict_pop_without_default_raises_key_error() {
        let dict = Rc::new(RefCell::new(Dict::new()));
        let pop = dict_method(&dict, "pop").unwrap();
        let err = call_value(&pop, vec![Value::str("missing")]).unwrap_err();
        assert_eq!(err.kind, crate::exception::ExceptionKind::Key);
    }

    #[test]
    fn exit_builtin_raises_system_exit_with_code() {
        let err = call_value(&global("exit"), vec![Value::Int(3)]).unwrap_err();
        assert_eq!(err.kind, crate::exception::ExceptionKind::SystemExit);
        assert_eq!(err.exit_code, Some(3));
    }
}
