/*!
## Machine Module

The EightBall engine: symbol table and storage arena, the dual-mode
expression and statement machinery, the bytecode emitter and subroutine
linker, and the program store. One `Runtime` value owns all of it.

*/

/// Addresses in the target VM and in the interpreter's storage arena.
pub type Address = u16;

mod console;
mod emit;
mod expr;
mod frame;
mod heap;
mod link;
mod op;
mod program;
mod runtime;
mod stack;
mod var;

pub use console::{Console, ScriptConsole};
pub use emit::Emitter;
pub use heap::Heap;
pub use link::Linker;
pub use op::Opcode;
pub use program::Program;
pub use runtime::Runtime;
pub use stack::Stack;
