use std::{
    io::{self, IsTerminal},
    result::Result as StdResult,
    sync::Arc,
};

use anyhow::{Result, anyhow};
use tether_term::{Output, OutputError, Quiet, Terminal};

/// Decide whether to color output from the CLI flags and the terminal.
pub fn color_choice(color: bool, no_color: bool) -> bool {
    if color {
        true
    } else if no_color {
        false
    } else {
        io::stdout().is_terminal()
    }
}

/// Build the output handler for this invocation.
pub fn build_output(quiet: bool, color: bool) -> Arc<dyn Output> {
    if quiet {
        Arc::new(Quiet)
    } else {
        Arc::new(Terminal::new(color))
    }
}

/// Emit an output result, converting terminal failures into errors.
pub fn emit(result: StdResult<(), OutputError>) -> Result<()> {
    result.map_err(|e| anyhow!("Output operation failed: {e}"))
}
