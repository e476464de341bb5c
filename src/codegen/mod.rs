//! Code generation: emitting transformed modules as IR text.

pub mod printer;

pub use printer::{format_instruction, IrPrinter};

use crate::ir::{Function, Module};

/// Print a module with the default printer.
pub fn print_module(module: &Module) -> String {
    IrPrinter::new().print_module(module)
}

/// Print a single function with the default printer.
pub fn print_function(func: &Function) -> String {
    IrPrinter::new().print_function(func)
}
