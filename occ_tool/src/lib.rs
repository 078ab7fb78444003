//! # OCC Tool
//!
//! Library half of the `occ` command-line tool: argument definitions,
//! configuration resolution and the subcommands themselves.
//!
//! ```text
//! occ [--config FILE] [--device DEV] [--kind hardware|pipe|socket] [--debug]
//!     status | dump | discover | verify | read | write | reset
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod cli;
pub mod commands;
pub mod error;

pub use cli::{Args, Command, resolve_config};
pub use commands::Context;
pub use error::{ToolError, ToolResult};

use std::io::Write;
use std::time::Duration;

/// Run `command` with `context`, writing its report to `out`.
pub fn execute(context: &Context<'_>, command: &Command, out: &mut dyn Write) -> ToolResult<()> {
    match command {
        Command::Status => context.status(out),
        Command::Dump { count, timeout } => {
            context.dump(out, *count, timeout.map(Duration::from_millis))
        }
        Command::Discover { timeout } => context.discover(out, Duration::from_millis(*timeout)),
        Command::Verify => context.verify(out),
        Command::Read { bar, offset, count } => context.read_registers(out, *bar, *offset, *count),
        Command::Write {
            bar,
            offset,
            values,
        } => context.write_registers(*bar, *offset, values),
        Command::Reset => context.reset(),
    }
}
