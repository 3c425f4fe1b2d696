//! Importable libraries: named bundles of native functions, constants,
//! and sub-libraries, plus the template mechanism that binds a fixed
//! config into a fresh set of closures per instantiation.

use std::path::Path;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::context::NativeCall;
use crate::exception::Raised;
use crate::sandbox::SandboxPolicy;
use crate::value::{NativeFn, NativeFunction, Value};

#[derive(Clone, Default)]
pub struct Library {
    pub name: String,
    pub description: String,
    functions: IndexMap<String, Rc<NativeFunction>>,
    constants: IndexMap<String, Value>,
    children: IndexMap<String, Rc<Library>>,
}

impl Library {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        help: impl Into<String>,
        func: impl Fn(&mut NativeCall<'_>) -> Result<Value, Raised> + 'static,
    ) {
        let name = name.into();
        self.functions.insert(
            name.clone(),
            Rc::new(NativeFunction {
                name,
                help: help.into(),
                func: Box::new(func),
            }),
        );
    }

    pub fn add_constant(&mut self, name: impl Into<String>, value: Value) {
        self.constants.insert(name.into(), value);
    }

    pub fn add_child(&mut self, library: Library) {
        self.children
            .insert(library.name.clone(), Rc::new(library));
    }

    /// Member lookup used by `lib.name` attribute access and
    /// `from lib import name`.
    pub fn member(&self, name: &str) -> Option<Value> {
        if let Some(func) = self.functions.get(name) {
            return Some(Value::Builtin(Rc::clone(func)));
        }
        if let Some(constant) = self.constants.get(name) {
            return Some(constant.clone());
        }
        self.children
            .get(name)
            .map(|child| Value::Library(Rc::clone(child)))
    }

    pub fn help_for(&self, name: &str) -> Option<&str> {
        self.functions.get(name).map(|func| func.help.as_str())
    }

    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.functions
            .keys()
            .chain(self.constants.keys())
            .chain(self.children.keys())
            .map(String::as_str)
    }
}

struct TemplateFunction<C> {
    name: String,
    help: String,
    build: Box<dyn Fn(&C) -> NativeFn>,
}

/// A library factory: `instantiate(config)` produces a `Library` whose
/// natives close over their own copy of the config, so N concurrently
/// running interpreters can hold N capability sets with no shared state.
pub struct LibraryTemplate<C> {
    name: String,
    description: String,
    functions: Vec<TemplateFunction<C>>,
    constants: Vec<(String, Value)>,
}

impl<C> LibraryTemplate<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            functions: Vec::new(),
            constants: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn add_function(
        mut self,
        name: impl Into<String>,
        help: impl Into<String>,
        build: impl Fn(&C) -> NativeFn + 'static,
    ) -> Self {
        self.functions.push(TemplateFunction {
            name: name.into(),
            help: help.into(),
            build: Box::new(build),
        });
        self
    }

    pub fn add_constant(mut self, name: impl Into<String>, value: Value) -> Self {
        self.constants.push((name.into(), value));
        self
    }

    pub fn instantiate(&self, config: &C) -> Library {
        let mut library = Library::new(self.name.clone()).with_description(self.description.clone());
        for function in &self.functions {
            let native = (function.build)(config);
            library.functions.insert(
                function.name.clone(),
                Rc::new(NativeFunction {
                    name: function.name.clone(),
                    help: function.help.clone(),
                    func: native,
                }),
            );
        }
        for (name, value) in &self.constants {
            library.add_constant(name.clone(), value.clone());
        }
        library
    }
}

/// Sandboxed filesystem library template. Every function validates its
/// path against the policy captured at instantiation time.
pub fn file_library() -> LibraryTemplate<SandboxPolicy> {
    LibraryTemplate::new("files")
        .with_description("sandboxed filesystem access")
        .add_function(
            "read_file",
            "read_file(path) -> str: read a file within the allowed paths",
            |policy: &SandboxPolicy| {
                let policy = policy.clone();
                Box::new(move |call: &mut NativeCall<'_>| {
                    call.ctx.check_interrupt()?;
                    let path = call.args.str_at(0, "path")?;
                    let resolved = policy.check_path(Path::new(path))?;
                    std::fs::read_to_string(&resolved)
                        .map(Value::Str)
                        .map_err(|err| {
                            Raised::runtime_error(format!("cannot read '{path}': {err}"))
                        })
                })
            },
        )
        .add_function(
            "write_file",
            "write_file(path, text): write a file within the allowed paths",
            |policy: &SandboxPolicy| {
                let policy = policy.clone();
                Box::new(move |call: &mut NativeCall<'_>| {
                    call.ctx.check_interrupt()?;
                    let path = call.args.str_at(0, "path")?.to_string();
                    let text = call.args.text_at(1, "text")?;
                    let resolved = policy.check_path(Path::new(&path))?;
                    std::fs::write(&resolved, text).map_err(|err| {
                        Raised::runtime_error(format!("cannot write '{path}': {err}"))
                    })?;
                    Ok(Value::None)
                })
            },
        )
        .add_function(
            "list_dir",
            "list_dir(path) -> list: entry names of a directory within the allowed paths",
            |policy: &SandboxPolicy| {
                let policy = policy.clone();
                Box::new(move |call: &mut NativeCall<'_>| {
                    call.ctx.check_interrupt()?;
                    let path = call.args.str_at(0, "path")?;
                    let resolved = policy.check_path(Path::new(path))?;
                    let entries = std::fs::read_dir(&resolved).map_err(|err| {
                        Raised::runtime_error(format!("cannot list '{path}': {err}"))
                    })?;
                    let mut names = Vec::new();
                    for entry in entries {
                        let entry = entry.map_err(|err| {
                            Raised::runtime_error(format!("cannot list '{path}': {err}"))
                        })?;
                        names.push(Value::Str(entry.file_name().to_string_lossy().into_owned()));
                    }
                    names.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
                    Ok(Value::list(names))
                })
            },
        )
}
