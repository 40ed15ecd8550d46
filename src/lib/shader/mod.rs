//! Material node graph, its evaluation into shading-language source and its text format.

pub mod channel;
pub mod eval;
pub mod graph;
pub mod parsing;
pub mod value;
