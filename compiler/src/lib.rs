// sdfc — SDFG compiler core
//
// Library root. The program model, its analyses, and the lowering passes
// live in the modules below; `pipeline` wires them together.

pub mod codegen;
pub mod config;
pub mod data;
pub mod diag;
pub mod dot;
pub mod dtypes;
pub mod error;
pub mod graph;
pub mod id;
pub mod lexer;
pub mod lower;
pub mod memlet;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod propagate;
pub mod schedule;
pub mod sdfg;
pub mod serialize;
pub mod state_index;
pub mod subset;
pub mod symbolic;
pub mod tree;
pub mod validate;
