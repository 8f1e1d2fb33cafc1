//! # EightBall
//!
//! The Eight Bit Algorithmic Language, as an interactive environment:
//! ```text
//!       ***    EightBall    ***
//! >
//! ```
//!
//! A line-oriented editor, an immediate-mode interpreter, and a one-pass
//! compiler emitting bytecode for the companion stack virtual machine.
//! The same source runs either way; `run` tree-walks it, `comp "file"`
//! lowers it and writes the image.

pub mod lang;
pub mod mach;
pub mod term;
