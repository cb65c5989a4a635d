//! Name-keyed handler table.
//!
//! Every command port owns one [`HandlerTable`], filled once at start-up.
//! A handler is an async closure over shared service state `S` and the
//! request's [`Arguments`]. The table enforces the minimum argument count
//! before the handler runs, so handlers only narrow and act.

use std::collections::HashMap;
use std::future::Future;
use std::net::Ipv4Addr;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use nimo_core::{Connection, Value};

use crate::commands::CommandSpec;
use crate::request::Request;
use crate::response::{CommandFailure, Response};

/// Result every handler produces.
pub type HandlerResult = Result<Response, CommandFailure>;

/// Boxed future returned by a stored handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

type BoxedHandler<S> = Arc<dyn Fn(Arc<S>, Arguments) -> HandlerFuture + Send + Sync>;

struct Entry<S> {
    spec: CommandSpec,
    handler: BoxedHandler<S>,
}

/// Command name to handler mapping for one service.
pub struct HandlerTable<S> {
    entries: HashMap<&'static str, Entry<S>>,
}

impl<S> Default for HandlerTable<S> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<S: Send + Sync + 'static> HandlerTable<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handler` to `spec.name`, replacing any earlier binding.
    pub fn register<F, Fut>(&mut self, spec: CommandSpec, handler: F) -> &mut Self
    where
        F: Fn(Arc<S>, Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: BoxedHandler<S> =
            Arc::new(move |state: Arc<S>, args: Arguments| -> HandlerFuture {
                Box::pin(handler(state, args))
            });
        self.entries.insert(spec.name, Entry { spec, handler });
        self
    }

    pub fn contains(&self, command: &str) -> bool {
        self.entries.contains_key(command)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Runs the handler for `request`.
    ///
    /// Returns `None` for an unknown command. Arity and narrowing failures
    /// come back as failed simple responses.
    pub async fn dispatch(&self, state: Arc<S>, request: Request) -> Option<Response> {
        let entry = self.entries.get(request.command.as_str())?;
        if request.arguments.len() < entry.spec.min_args {
            debug!(
                command = %request.command,
                got = request.arguments.len(),
                need = entry.spec.min_args,
                "Rejecting request with missing arguments"
            );
            return Some(CommandFailure::missing_arguments().into());
        }

        let handler = Arc::clone(&entry.handler);
        let args = Arguments::new(request.command, request.arguments);
        let command = args.command().to_string();
        match handler(state, args).await {
            Ok(response) => Some(response),
            Err(failure) => {
                debug!(command = %command, reason = %failure, "Command failed");
                Some(failure.into())
            }
        }
    }
}

// ============================================================================
// Arguments
// ============================================================================

/// Positional request arguments with narrowing accessors.
///
/// Each accessor returns [`CommandFailure::invalid_arguments`] when the
/// argument is absent or of the wrong variant.
#[derive(Debug, Clone, PartialEq)]
pub struct Arguments {
    command: String,
    values: Vec<Value>,
}

impl Arguments {
    pub fn new(command: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            values,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Narrows argument `index` with `f`.
    pub fn narrow<'a, T>(
        &'a self,
        index: usize,
        f: impl FnOnce(&'a Value) -> Option<T>,
    ) -> Result<T, CommandFailure> {
        self.values
            .get(index)
            .and_then(f)
            .ok_or_else(CommandFailure::invalid_arguments)
    }

    pub fn string(&self, index: usize) -> Result<String, CommandFailure> {
        self.narrow(index, Value::as_str).map(str::to_string)
    }

    /// A string argument that must not be empty.
    pub fn name(&self, index: usize) -> Result<String, CommandFailure> {
        let name = self.string(index)?;
        if name.is_empty() {
            return Err(CommandFailure::invalid_arguments());
        }
        Ok(name)
    }

    pub fn logical(&self, index: usize) -> Result<bool, CommandFailure> {
        self.narrow(index, Value::as_logical)
    }

    pub fn integer(&self, index: usize) -> Result<i64, CommandFailure> {
        self.narrow(index, Value::as_integer)
    }

    pub fn address(&self, index: usize) -> Result<Ipv4Addr, CommandFailure> {
        self.narrow(index, Value::as_address)
    }

    pub fn array(&self, index: usize) -> Result<&[Value], CommandFailure> {
        self.narrow(index, Value::as_array)
    }

    pub fn connection(&self, index: usize) -> Result<Connection, CommandFailure> {
        self.narrow(index, Connection::from_value)
    }

    /// An argument that may be absent; present but mistyped is still an error.
    pub fn optional_connection(&self, index: usize) -> Result<Option<Connection>, CommandFailure> {
        match self.values.get(index) {
            None => Ok(None),
            Some(value) => Connection::from_value(value)
                .map(Some)
                .ok_or_else(CommandFailure::invalid_arguments),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{INVALID_ARGUMENTS, MISSING_ARGUMENTS};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const ECHO: CommandSpec = CommandSpec::new("echo", 1);
    const COUNT: CommandSpec = CommandSpec::new("count", 0);

    struct Counter {
        hits: AtomicUsize,
    }

    async fn echo(state: Arc<Counter>, args: Arguments) -> HandlerResult {
        state.hits.fetch_add(1, Ordering::SeqCst);
        let text = args.string(0)?;
        Ok(Response::complex([text]))
    }

    async fn count(state: Arc<Counter>, _args: Arguments) -> HandlerResult {
        Ok(Response::complex([state.hits.load(Ordering::SeqCst)]))
    }

    fn table() -> HandlerTable<Counter> {
        let mut table = HandlerTable::new();
        table.register(ECHO, echo).register(COUNT, count);
        table
    }

    fn state() -> Arc<Counter> {
        Arc::new(Counter {
            hits: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_dispatch_runs_handler() {
        let table = table();
        let state = state();
        let response = table
            .dispatch(Arc::clone(&state), Request::new("echo", vec![Value::from("hi")]))
            .await
            .unwrap();
        assert_eq!(response, Response::complex(["hi"]));
        assert_eq!(table.names(), vec!["count", "echo"]);
    }

    #[tokio::test]
    async fn test_missing_arguments_skip_handler() {
        let table = table();
        let state = state();
        let response = table
            .dispatch(Arc::clone(&state), Request::new("echo", vec![]))
            .await
            .unwrap();
        assert_eq!(response.reason(), Some(MISSING_ARGUMENTS));
        assert_eq!(state.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_argument_variant() {
        let table = table();
        let response = table
            .dispatch(state(), Request::new("echo", vec![Value::Integer(3)]))
            .await
            .unwrap();
        assert_eq!(response.reason(), Some(INVALID_ARGUMENTS));
    }

    #[tokio::test]
    async fn test_unknown_command_is_none() {
        let table = table();
        assert!(table
            .dispatch(state(), Request::new("bogus", vec![]))
            .await
            .is_none());
        assert!(!table.contains("bogus"));
    }

    #[test]
    fn test_optional_connection() {
        let args = Arguments::new("startChannel", vec![Value::from("/in")]);
        assert_eq!(args.optional_connection(1), Ok(None));

        let args = Arguments::new("startChannel", vec![Value::from("/in"), Value::Integer(1)]);
        assert_eq!(
            args.optional_connection(1),
            Err(CommandFailure::invalid_arguments())
        );
    }

    #[test]
    fn test_name_rejects_empty() {
        let args = Arguments::new("removeNode", vec![Value::from("")]);
        assert_eq!(args.name(0), Err(CommandFailure::invalid_arguments()));
    }
}
