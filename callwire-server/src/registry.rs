//! Command registry.
//!
//! The registry maps command names to handlers and is shared by the server
//! and every connection. A single mutex guards the table; handlers are cloned
//! out as `Arc`s and run without holding it.

use crate::error::CommandError;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};

/// Positional parameter list of a command, used for arity checks and `help`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    params: Vec<String>,
    variadic: Option<String>,
}

impl Signature {
    /// A command taking no arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a required positional parameter.
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(name.into());
        self
    }

    /// Accepts any number of trailing arguments.
    pub fn variadic(mut self, name: impl Into<String>) -> Self {
        self.variadic = Some(name.into());
        self
    }

    /// Number of required arguments.
    pub fn required(&self) -> usize {
        self.params.len()
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic.is_some()
    }

    /// Returns whether a call with `count` arguments fits this signature.
    pub fn accepts(&self, count: usize) -> bool {
        if self.is_variadic() {
            count >= self.params.len()
        } else {
            count == self.params.len()
        }
    }

    fn expected(&self) -> String {
        if self.is_variadic() {
            format!("at least {}", self.params.len())
        } else {
            self.params.len().to_string()
        }
    }

    /// Builds the error for a call with the wrong number of arguments.
    pub fn arity_error(&self, name: &str, given: usize) -> CommandError {
        CommandError::Arity {
            name: name.to_string(),
            expected: self.expected(),
            given,
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.params.clone();
        if let Some(ref rest) = self.variadic {
            parts.push(format!("*{}", rest));
        }
        write!(f, "({})", parts.join(", "))
    }
}

/// A named, invokable command.
pub trait Command: Send + Sync {
    /// Name the command is registered under.
    fn name(&self) -> &str;

    /// Declared positional parameters.
    fn signature(&self) -> &Signature;

    /// Runs the command. Argument count has already been checked against
    /// [`Command::signature`].
    fn invoke(&self, args: &[Value]) -> Result<Value, CommandError>;
}

type Handler = dyn Fn(&[Value]) -> Result<Value, CommandError> + Send + Sync;

/// A command backed by a closure.
pub struct FnCommand {
    name: String,
    signature: Signature,
    handler: Box<Handler>,
}

impl FnCommand {
    pub fn new<F>(name: impl Into<String>, signature: Signature, handler: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, CommandError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            signature,
            handler: Box::new(handler),
        }
    }
}

impl Command for FnCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn invoke(&self, args: &[Value]) -> Result<Value, CommandError> {
        (self.handler)(args)
    }
}

impl fmt::Debug for FnCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FnCommand({}{})", self.name, self.signature)
    }
}

/// A bundle of commands supplied by a deployment.
pub trait Plugin: Send + Sync {
    /// Name used by the `import` command.
    fn name(&self) -> &str;

    /// Commands exported by this plugin.
    fn commands(&self) -> Vec<Arc<dyn Command>>;
}

/// Plugins available to the `import` command, keyed by name.
#[derive(Default, Clone)]
pub struct PluginCatalog {
    plugins: HashMap<String, Arc<dyn Plugin>>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a plugin; a later plugin with the same name replaces the earlier one.
    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.insert(plugin.name().to_string(), plugin);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.get(name).cloned()
    }

    /// Returns plugin names sorted alphabetically.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Thread-safe table of commands.
pub struct Registry {
    commands: Mutex<BTreeMap<String, Arc<dyn Command>>>,
    catalog: PluginCatalog,
}

impl Registry {
    /// Creates a registry holding only the built-in commands.
    pub fn new() -> Arc<Self> {
        Self::with_catalog(PluginCatalog::new())
    }

    /// Creates a registry whose `import` command can load from `catalog`.
    pub fn with_catalog(catalog: PluginCatalog) -> Arc<Self> {
        let registry = Arc::new_cyclic(|weak: &Weak<Registry>| {
            let mut commands: BTreeMap<String, Arc<dyn Command>> = BTreeMap::new();

            let this = weak.clone();
            commands.insert(
                "help".to_string(),
                Arc::new(FnCommand::new("help", Signature::new(), move |_| {
                    let registry = this
                        .upgrade()
                        .ok_or_else(|| CommandError::failed("registry dropped"))?;
                    Ok(Value::String(registry.help()))
                })),
            );

            let this = weak.clone();
            commands.insert(
                "import".to_string(),
                Arc::new(FnCommand::new(
                    "import",
                    Signature::new().param("name"),
                    move |args| {
                        let name = args.first().and_then(Value::as_str).ok_or_else(|| {
                            CommandError::InvalidArgument("plugin name must be a string".into())
                        })?;
                        let registry = this
                            .upgrade()
                            .ok_or_else(|| CommandError::failed("registry dropped"))?;
                        registry.import(name).map(Value::String)
                    },
                )),
            );

            Registry {
                commands: Mutex::new(commands),
                catalog,
            }
        });
        tracing::debug!("Registry created with built-in commands: help, import");
        registry
    }

    /// Registers a command under its own name.
    ///
    /// Overriding an existing command is allowed and logged; the last
    /// registration wins.
    pub fn register(&self, command: Arc<dyn Command>) {
        let name = command.name().to_string();
        let previous = self.commands.lock().insert(name.clone(), command);
        if previous.is_some() {
            tracing::warn!("Overriding command {}", name);
        } else {
            tracing::debug!("Binding command {}", name);
        }
    }

    /// Registers a closure as a command.
    pub fn register_fn<F>(&self, name: impl Into<String>, signature: Signature, handler: F)
    where
        F: Fn(&[Value]) -> Result<Value, CommandError> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnCommand::new(name, signature, handler)));
    }

    /// Registers every command exported by a plugin. Returns how many were
    /// registered.
    pub fn load(&self, plugin: &dyn Plugin) -> usize {
        let commands = plugin.commands();
        let count = commands.len();
        for command in commands {
            self.register(command);
        }
        tracing::info!("Loaded plugin {} ({} commands)", plugin.name(), count);
        count
    }

    /// Loads a plugin from the catalog by name.
    pub fn import(&self, name: &str) -> Result<String, CommandError> {
        let plugin = self
            .catalog
            .get(name)
            .ok_or_else(|| CommandError::PluginNotFound(name.to_string()))?;
        self.load(plugin.as_ref());
        Ok(format!("Module {} loaded", name))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.commands.lock().contains_key(name)
    }

    /// Returns the command registered under `name`.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Command>, CommandError> {
        self.lookup(name)
            .ok_or_else(|| CommandError::NotFound(name.to_string()))
    }

    /// Existence check and fetch under one lock acquisition.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands.lock().get(name).cloned()
    }

    /// Returns registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.commands.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.commands.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.lock().is_empty()
    }

    /// Renders one `name(signature)` line per command.
    pub fn help(&self) -> String {
        let commands = self.commands.lock();
        let mut out = String::new();
        for (name, command) in commands.iter() {
            out.push_str(name);
            out.push_str(&command.signature().to_string());
            out.push('\n');
        }
        out
    }

    /// Returns the plugin catalog.
    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }
}
