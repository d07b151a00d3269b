//! Backend: TAC to typed assembly, and assembly-level symbol conversion

pub mod ast;
pub mod lower;
pub mod symtab;
