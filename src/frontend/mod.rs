//! Frontend: Lexer and Parser for the textual SSA IR.
//!
//! This module reads the textual form of compiled device modules into a
//! [`Module`](crate::ir::Module).
//!
//! ## Input Overview
//!
//! The accepted text is the usual assembly form of compiler IR:
//!
//! ```text
//! define void @kernel(ptr %A, i32 %N) {
//! entry:
//!   br label %loop
//! loop:
//!   %i = phi i32 [ 0, %entry ], [ %i.next, %loop ]
//!   %p = getelementptr float, ptr %A, i32 %i
//!   store float 0.0, ptr %p
//!   %i.next = add i32 %i, 1
//!   %c = icmp slt i32 %i.next, %N
//!   br i1 %c, label %loop, label %exit
//! exit:
//!   ret void
//! }
//!
//! !nvvm.annotations = !{!0}
//! !0 = !{ptr @kernel, !"kernel", i32 1}
//! ```
//!
//! Header lines, globals, attribute groups and metadata bodies the tool
//! does not model are carried through as text.

pub mod lexer;
pub mod parser;
pub mod token;

// Re-exports
pub use lexer::Lexer;
pub use parser::{parse_module, Parser};
pub use token::{Token, TokenKind};
