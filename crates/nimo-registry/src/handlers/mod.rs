//! Registry command handlers.
//!
//! Each handler narrows its arguments, performs exactly one operation
//! through the [`RegistryHandle`], and turns the outcome into a response:
//!
//! | Outcome                 | Response payload            |
//! |-------------------------|-----------------------------|
//! | mutator succeeded       | simple `true`               |
//! | mutator failed          | simple `false` + reason     |
//! | single lookup           | `[found, record]`/`[false]` |
//! | "all" query             | `[record, ...]`             |
//! | count / presence query  | `[count]` / `[present]`     |
//!
//! Status notifications are not sent from here. The actor publishes an
//! event for each successful mutation and the status broadcaster relays it.

use nimo_core::{Record, Value};
use nimo_protocol::{CommandFailure, HandlerResult, HandlerTable, Response};

use crate::registry::{RegistryError, RegistryHandle};

mod applications;
mod channels;
mod connections;
mod machines;
mod nodes;

/// Builds the handler table for every registry command.
pub fn registry_handlers() -> HandlerTable<RegistryHandle> {
    let mut table = HandlerTable::new();
    machines::register(&mut table);
    nodes::register(&mut table);
    channels::register(&mut table);
    connections::register(&mut table);
    applications::register(&mut table);
    table
}

// ============================================================================
// Response helpers
// ============================================================================

/// Maps a mutator outcome to a simple response.
fn completed<T>(result: Result<T, RegistryError>) -> HandlerResult {
    result
        .map(|_| Response::success())
        .map_err(|err| CommandFailure::new(err.to_string()))
}

/// `[true, record]` when present, `[false]` otherwise.
fn found<R: Record>(record: Option<R>) -> HandlerResult {
    Ok(match record {
        Some(record) => Response::complex([Value::Logical(true), record.to_value()]),
        None => Response::complex([Value::Logical(false)]),
    })
}

fn records<R: Record>(items: &[R]) -> HandlerResult {
    Ok(Response::complex(items.iter().map(Record::to_value)))
}

fn count(n: usize) -> HandlerResult {
    Ok(Response::complex([n]))
}

fn present(is_present: bool) -> HandlerResult {
    Ok(Response::complex([is_present]))
}
