pub mod ast;
pub mod hand_parser;

pub use hand_parser::{SyntaxError, parse};
