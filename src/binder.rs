//! Argument binding for script functions and the typed argument view
//! handed to native functions.

use indexmap::IndexMap;

use crate::ast::{Parameter, ParameterKind};
use crate::exception::Raised;
use crate::value::{Dict, Value};

/// Binds a call site's arguments against a declared parameter list,
/// producing the name→value pairs for the new call frame.
///
/// Positionals fill declared parameters left to right; excess positionals
/// flow to `*args` when declared; keywords match declared names or flow to
/// `**kwargs`. Defaults were evaluated at definition time, so a mutable
/// default is the same container on every call.
pub fn bind_arguments(
    func_name: &str,
    params: &[Parameter],
    defaults: &[Option<Value>],
    bound_self: Option<Value>,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<Vec<(String, Value)>, Raised> {
    let mut positional_params = Vec::new();
    let mut vararg: Option<&str> = None;
    let mut kwarg: Option<&str> = None;
    for (index, param) in params.iter().enumerate() {
        match param.kind {
            ParameterKind::Positional => {
                positional_params.push((param.name.as_str(), defaults[index].clone()));
            }
            ParameterKind::VarArgs => vararg = Some(&param.name),
            ParameterKind::KwArgs => kwarg = Some(&param.name),
        }
    }

    let mut incoming: Vec<Value> = Vec::with_capacity(args.len() + 1);
    if let Some(receiver) = bound_self {
        incoming.push(receiver);
    }
    incoming.extend(args);

    let mut slots: IndexMap<&str, Option<Value>> = positional_params
        .iter()
        .map(|(name, _)| (*name, None))
        .collect();

    let mut overflow = Vec::new();
    for (index, value) in incoming.into_iter().enumerate() {
        if index < positional_params.len() {
            slots[index] = Some(value);
        } else {
            overflow.push(value);
        }
    }
    if !overflow.is_empty() && vararg.is_none() {
        return Err(Raised::arity_error(format!(
            "{func_name}() takes {} positional arguments but {} were given",
            positional_params.len(),
            positional_params.len() + overflow.len()
        )));
    }

    let mut extra_keywords = Dict::new();
    for (name, value) in kwargs {
        if let Some(slot) = slots.get_mut(name.as_str()) {
            if slot.is_some() {
                return Err(Raised::type_error(format!(
                    "{func_name}() got multiple values for argument '{name}'"
                )));
            }
            *slot = Some(value);
        } else if kwarg.is_some() {
            extra_keywords.insert(Value::Str(name), value)?;
        } else {
            return Err(Raised::type_error(format!(
                "{func_name}() got an unexpected keyword argument '{name}'"
            )));
        }
    }

    let mut bound = Vec::with_capacity(params.len());
    for ((name, default), (_, filled)) in positional_params.into_iter().zip(slots) {
        match filled.or(default) {
            Some(value) => bound.push((name.to_string(), value)),
            None => {
                return Err(Raised::arity_error(format!(
                    "{func_name}() missing required argument '{name}'"
                )));
            }
        }
    }
    if let Some(name) = vararg {
        bound.push((name.to_string(), Value::Tuple(overflow.into())));
    }
    if let Some(name) = kwarg {
        bound.push((name.to_string(), Value::dict(extra_keywords)));
    }
    Ok(bound)
}

/// Call-site arguments as seen by a native function, with typed getters
/// performing the documented coercions.
pub struct Args {
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
        Self {
            positional,
            keywords,
        }
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.keywords
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn keywords(&self) -> &[(String, Value)] {
        &self.keywords
    }

    pub fn require(&self, index: usize, name: &str) -> Result<&Value, Raised> {
        self.positional.get(index).ok_or_else(|| {
            Raised::arity_error(format!("missing required argument '{name}'"))
        })
    }

    pub fn expect_arity(&self, count: usize, func: &str) -> Result<(), Raised> {
        if self.positional.len() != count {
            return Err(Raised::arity_error(format!(
                "{func}() takes {count} arguments but {} were given",
                self.positional.len()
            )));
        }
        Ok(())
    }

    /// Declared-int coercion: floats truncate toward zero, bools widen.
    pub fn int_at(&self, index: usize, name: &str) -> Result<i64, Raised> {
        match self.require(index, name)? {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(i64::from(*b)),
            Value::Float(f) => Ok(f.trunc() as i64),
            other => Err(Raised::type_error(format!(
                "argument '{name}' expects int, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn float_at(&self, index: usize, name: &str) -> Result<f64, Raised> {
        match self.require(index, name)? {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            Value::Bool(b) => Ok(f64::from(u8::from(*b))),
            other => Err(Raised::type_error(format!(
                "argument '{name}' expects float, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn str_at(&self, index: usize, name: &str) -> Result<&str, Raised> {
        match self.require(index, name)? {
            Value::Str(s) => Ok(s),
            other => Err(Raised::type_error(format!(
                "argument '{name}' expects str, got {}",
                other.type_name()
            ))),
        }
    }

    /// Loose string coercion: renders any value with its `str()` form.
    pub fn text_at(&self, index: usize, name: &str) -> Result<String, Raised> {
        Ok(self.require(index, name)?.to_string())
    }

    /// Declared-bool coercion uses truthiness, so `if`-style arguments work.
    pub fn bool_at(&self, index: usize, name: &str) -> Result<bool, Raised> {
        Ok(self.require(index, name)?.is_truthy())
    }

    pub fn list_at(
        &self,
        index: usize,
        name: &str,
    ) -> Result<std::rc::Rc<std::cell::RefCell<Vec<Value>>>, Raised> {
        self.require(index, name)?.as_list().map_err(|_| {
            Raised::type_error(format!(
                "argument '{name}' expects list, got {}",
                self.positional[index].type_name()
            ))
        })
    }

    pub fn dict_at(
        &self,
        index: usize,
        name: &str,
    ) -> Result<std::rc::Rc<std::cell::RefCell<Dict>>, Raised> {
        self.require(index, name)?.as_dict().map_err(|_| {
            Raised::type_error(format!(
                "argument '{name}' expects dict, got {}",
                self.positional[index].type_name()
            ))
        })
    }

    pub fn into_positional(self) -> Vec<Value> {
        self.positional
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Parameter;

    fn make_params(spec: &[(&str, Option<Value>, ParameterKind)]) -> (Vec<Parameter>, Vec<Option<Value>>) {
        let mut params = Vec::new();
        let mut defaults = Vec::new();
        for (name, default, kind) in spec {
            params.push(Parameter {
                name: (*name).to_string(),
                default: None,
                kind: *kind,
            });
            defaults.push(default.clone());
        }
        (params, defaults)
    }

    #[test]
    fn positionals_fill_left_to_right_with_defaults() {
        let (params, defaults) = make_params(&[
            ("a", None, ParameterKind::Positional),
            ("b", Some(Value::Int(10)), ParameterKind::Positional),
        ]);
        let bound = bind_arguments("f", &params, &defaults, None, vec![Value::Int(1)], vec![])
            .unwrap();
        assert_eq!(bound[0].0, "a");
        assert_eq!(bound[0].1.as_int().unwrap(), 1);
        assert_eq!(bound[1].1.as_int().unwrap(), 10);
    }

    #[test]
    fn excess_positionals_flow_to_varargs() {
        let (params, defaults) = make_params(&[
            ("a", None, ParameterKind::Positional),
            ("rest", None, ParameterKind::VarArgs),
        ]);
        let bound = bind_arguments(
            "f",
            &params,
            &defaults,
            None,
            vec![Value::Int(1), Value::Int(2), Value::Int(3)],
            vec![],
        )
        .unwrap();
        let Value::Tuple(rest) = &bound[1].1 else {
            panic!("expected varargs tuple");
        };
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn excess_positionals_without_varargs_is_arity_error() {
        let (params, defaults) = make_params(&[("a", None, ParameterKind::Positional)]);
        let err = bind_arguments(
            "f",
            &params,
            &defaults,
            None,
            vec![Value::Int(1), Value::Int(2)],
            vec![],
        )
        .unwrap_err();
        assert!(err.message.contains("takes 1 positional arguments"));
    }

    #[test]
    fn unknown_keyword_flows_to_kwargs_or_errors() {
        let (params, defaults) = make_params(&[
            ("a", None, ParameterKind::Positional),
            ("extra", None, ParameterKind::KwArgs),
        ]);
        let bound = bind_arguments(
            "f",
            &params,
            &defaults,
            None,
            vec![Value::Int(1)],
            vec![("color".to_string(), Value::str("red"))],
        )
        .unwrap();
        let dict = bound[1].1.as_dict().unwrap();
        assert!(dict.borrow().contains(&Value::str("color")).unwrap());

        let (params, defaults) = make_params(&[("a", None, ParameterKind::Positional)]);
        let err = bind_arguments(
            "f",
            &params,
            &defaults,
            None,
            vec![Value::Int(1)],
            vec![("color".to_string(), Value::str("red"))],
        )
        .unwrap_err();
        assert!(err.message.contains("unexpected keyword argument 'color'"));
    }

    #[test]
    fn duplicate_binding_is_rejected() {
        let (params, defaults) = make_params(&[("a", None, ParameterKind::Positional)]);
        let err = bind_arguments(
            "f",
            &params,
            &defaults,
            None,
            vec![Value::Int(1)],
            vec![("a".to_string(), Value::Int(2))],
        )
        .unwrap_err();
        assert!(err.message.contains("multiple values for argument 'a'"));
    }

    #[test]
    fn bound_self_consumes_the_first_slot() {
        let (params, defaults) = make_params(&[
            ("self", None, ParameterKind::Positional),
            ("x", None, ParameterKind::Positional),
        ]);
        let bound = bind_arguments(
            "m",
            &params,
            &defaults,
            Some(Value::str("receiver")),
            vec![Value::Int(7)],
            vec![],
        )
        .unwrap();
        assert_eq!(bound[0].1.as_str().unwrap(), "receiver");
        assert_eq!(bound[1].1.as_int().unwrap(), 7);
    }

    #[test]
    fn declared_int_truncates_float_arguments() {
        let args = Args::new(vec![Value::Float(3.9), Value::Float(-3.9)], vec![]);
        assert_eq!(args.int_at(0, "a").unwrap(), 3);
        assert_eq!(args.int_at(1, "b").unwrap(), -3);
    }

    #[test]
    fn declared_int_rejects_strings() {
        let args = Args::new(vec![Value::str("5")], vec![]);
        let err = args.int_at(0, "count").unwrap_err();
        assert!(err.message.contains("'count' expects int"));
    }
}
