pub mod symtab;
pub mod types;
