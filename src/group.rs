use std::{
    any::Any,
    collections::HashMap,
    sync::{Arc, Weak},
};

use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::{
    builtin,
    context::ExecutionContext,
    event::Event,
    logging::{Logger, TracingLogger},
    process::{Process, ProcessSpec},
    runner::Runner,
    scope::{LexicalScope, Prototype, Scope, ScopeRef},
    Error, RuntimeResult,
};

/// The root scope of one script, shared by every process it launches.
///
/// Besides definitions a group holds the plugins configured during setup,
/// the logger handed to actions, the exit event once one was broadcast, and
/// the global variables set by top-level statements.
pub struct Group {
    scope: Arc<LexicalScope>,
    plugins: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    runner: Weak<Runner>,
    logger: Arc<dyn Logger>,
    exit_event: Mutex<Option<Event>>,
    globals: ExecutionContext,
}

impl Group {
    /// Creates a group with every builtin defined.
    pub fn new(runner: &Arc<Runner>) -> RuntimeResult<Arc<Self>> {
        let config = runner.config();
        let group = Arc::new_cyclic(|weak: &Weak<Group>| Group {
            scope: LexicalScope::root(config.debug),
            plugins: RwLock::new(HashMap::new()),
            runner: Arc::downgrade(runner),
            logger: Arc::new(TracingLogger::new(config.log_url.clone())),
            exit_event: Mutex::new(None),
            globals: ExecutionContext::builder(runner.token().clone())
                .weak_group(weak.clone())
                .build(),
        });
        builtin::register(&group.scope())?;
        Ok(group)
    }

    pub fn scope(self: &Arc<Self>) -> ScopeRef {
        self.clone()
    }

    pub fn runner(&self) -> RuntimeResult<Arc<Runner>> {
        self.runner
            .upgrade()
            .ok_or_else(|| Error::internal("runner is gone"))
    }

    pub fn logger(&self) -> Arc<dyn Logger> {
        self.logger.clone()
    }

    /// Context of the setup phase. Values set here are visible to every run.
    pub fn globals(&self) -> &ExecutionContext {
        &self.globals
    }

    /// A fresh context for running an action outside of any process.
    pub fn context(self: &Arc<Self>) -> ExecutionContext {
        ExecutionContext::builder(self.globals.token().clone())
            .parent(self.globals.clone())
            .group(self)
            .build()
    }

    pub fn set_plugin<T: Any + Send + Sync>(&self, key: &str, plugin: Arc<T>) {
        self.plugins.write().insert(key.to_string(), plugin);
    }

    pub fn get_plugin<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let plugin = self.plugins.read().get(key).cloned()?;
        plugin.downcast::<T>().ok()
    }

    /// Like `get_plugin`, failing with `NotFound` when setup never
    /// registered the plugin.
    pub fn require_plugin<T: Any + Send + Sync>(&self, key: &str) -> RuntimeResult<Arc<T>> {
        self.get_plugin(key).ok_or_else(|| {
            Error::not_found(format!("initialize {} plugin in the setup section", key))
        })
    }

    /// Creates a process and registers it with the runner.
    pub fn process(self: &Arc<Self>, spec: ProcessSpec) -> RuntimeResult<Arc<Process>> {
        let runner = self.runner()?;
        let process = Process::new(spec, self.clone(), runner.config().process_queue_size);
        runner.add_process(process.clone())?;
        info!(process = %process.name(), "process registered");
        Ok(process)
    }

    /// Sends an event to everyone listening on the group. Exit events are
    /// also remembered and end the runner's wait.
    pub fn broadcast(&self, event: Event) -> RuntimeResult<()> {
        if event.exit_code().is_some() {
            *self.exit_event.lock() = Some(event.clone());
        }
        self.runner()?.broadcast(event);
        Ok(())
    }

    pub fn exit_event(&self) -> Option<Event> {
        self.exit_event.lock().clone()
    }

    /// Runs the closers registered during setup.
    pub async fn close(&self) -> RuntimeResult<()> {
        self.globals.close().await
    }
}

impl Scope for Group {
    fn add_definition(&self, name: &str, prototype: Prototype) -> RuntimeResult<()> {
        self.scope.add_definition(name, prototype)
    }

    fn lookup_local(&self, name: &str) -> Option<Prototype> {
        self.scope.lookup_local(name)
    }

    fn parent(&self) -> Option<ScopeRef> {
        None
    }

    fn local_names(&self) -> Vec<String> {
        self.scope.local_names()
    }

    fn debug(&self) -> bool {
        self.scope.debug()
    }
}
