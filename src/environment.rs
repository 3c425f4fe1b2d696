//! Lexical scope chain.
//!
//! Frames are shared by reference: a closure captures the frame it was
//! defined in, so later mutation through either handle is visible to both.
//! `global name` marks the name in the current frame; assignments to a
//! marked name land in the root frame instead of creating a local.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::value::Value;

pub type EnvRef = Rc<RefCell<Environment>>;

pub struct Environment {
    bindings: FxHashMap<String, Value>,
    globals: FxHashSet<String>,
    parent: Option<EnvRef>,
}

impl Environment {
    pub fn new_root() -> EnvRef {
        Rc::new(RefCell::new(Self {
            bindings: FxHashMap::default(),
            globals: FxHashSet::default(),
            parent: None,
        }))
    }

    pub fn child(parent: &EnvRef) -> EnvRef {
        Rc::new(RefCell::new(Self {
            bindings: FxHashMap::default(),
            globals: FxHashSet::default(),
            parent: Some(Rc::clone(parent)),
        }))
    }

    pub fn mark_global(env: &EnvRef, name: &str) {
        env.borrow_mut().globals.insert(name.to_string());
    }

    /// Resolves a name by walking the frame chain outward.
    pub fn get(env: &EnvRef, name: &str) -> Option<Value> {
        let frame = env.borrow();
        if let Some(value) = frame.bindings.get(name) {
            return Some(value.clone());
        }
        let parent = frame.parent.clone()?;
        drop(frame);
        Self::get(&parent, name)
    }

    /// Binds in the current frame, or in the root frame when the name is
    /// marked `global` here.
    pub fn set(env: &EnvRef, name: &str, value: Value) {
        if env.borrow().globals.contains(name) {
            let root = Self::root(env);
            root.borrow_mut().bindings.insert(name.to_string(), value);
            return;
        }
        env.borrow_mut().bindings.insert(name.to_string(), value);
    }

    pub fn contains(env: &EnvRef, name: &str) -> bool {
        Self::get(env, name).is_some()
    }

    pub fn root(env: &EnvRef) -> EnvRef {
        let parent = env.borrow().parent.clone();
        match parent {
            Some(parent) => Self::root(&parent),
            None => Rc::clone(env),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_parent_frames() {
        let root = Environment::new_root();
        Environment::set(&root, "x", Value::Int(1));
        let inner = Environment::child(&root);
        assert_eq!(Environment::get(&inner, "x").unwrap().as_int().unwrap(), 1);
    }

    #[test]
    fn assignment_shadows_in_the_current_frame() {
        let root = Environment::new_root();
        Environment::set(&root, "x", Value::Int(1));
        let inner = Environment::child(&root);
        Environment::set(&inner, "x", Value::Int(2));
        assert_eq!(Environment::get(&inner, "x").unwrap().as_int().unwrap(), 2);
        assert_eq!(Environment::get(&root, "x").unwrap().as_int().unwrap(), 1);
    }

    #[test]
    fn global_marker_redirects_assignment_to_root() {
        let root = Environment::new_root();
        Environment::set(&root, "count", Value::Int(0));
        let inner = Environment::child(&root);
        Environment::mark_global(&inner, "count");
        Environment::set(&inner, "count", Value::Int(5));
        assert_eq!(
            Environment::get(&root, "count").unwrap().as_int().unwrap(),
            5
        );
        assert!(inner.borrow().bindings.get("count").is_none());
    }

    #[test]
    fn captured_frame_sees_later_mutation() {
        let root = Environment::new_root();
        let shared = Environment::child(&root);
        let alias = Rc::clone(&shared);
        Environment::set(&shared, "x", Value::Int(10));
        assert_eq!(Environment::get(&alias, "x").unwrap().as_int().unwrap(), 10);
    }
}
