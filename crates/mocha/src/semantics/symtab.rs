use std::collections::HashMap;

use thiserror::Error;

use super::types::VarType;

// slot 0 of the entry-point frame holds the implicit argument array
const RESERVED_SLOTS: u16 = 1;

/// One declared variable. The slot is assigned at declaration and never
/// changes for the variable's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub var_type: VarType,
    pub slot: u16,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SymtabError {
    #[error("name `{0}` already bound in this scope")]
    AlreadyDeclared(String),
}

/// Stack of lexical scopes with a monotonic slot arena.
///
/// Scopes map names to variables, innermost last; a name may appear at most
/// once per scope, and lookups walk innermost to outermost so inner
/// declarations shadow outer ones. Slots are handed out from a counter that
/// only grows: closing a scope drops its bindings but never returns slots,
/// so two sibling scopes can never place values of different representation
/// kinds into the same slot. Doubles take two slots.
#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<HashMap<String, Variable>>,
    next_slot: u16,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            scopes: Vec::new(),
            next_slot: RESERVED_SLOTS,
        }
    }

    pub fn open_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn close_scope(&mut self) {
        let closed = self.scopes.pop();
        debug_assert!(closed.is_some(), "close_scope without matching open_scope");
    }

    /// Declare a new variable in the innermost scope.
    pub fn declare(&mut self, name: &str, var_type: VarType) -> Result<Variable, SymtabError> {
        let slot = self.next_slot;
        let scope = self
            .scopes
            .last_mut()
            .expect("declaration outside any scope");
        if scope.contains_key(name) {
            return Err(SymtabError::AlreadyDeclared(name.to_string()));
        }
        let variable = Variable {
            name: name.to_string(),
            var_type,
            slot,
        };
        scope.insert(name.to_string(), variable.clone());
        self.next_slot += var_type.slot_width();
        Ok(variable)
    }

    /// Resolve a name, innermost scope first.
    pub fn lookup(&self, name: &str) -> Option<&Variable> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// High-water mark of the local frame, including the reserved slot.
    pub fn max_locals(&self) -> u16 {
        self.next_slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_grow_monotonically() {
        let mut symtab = SymbolTable::new();
        symtab.open_scope();
        let a = symtab.declare("a", VarType::Int).unwrap();
        assert_eq!(a.slot, 1);

        symtab.open_scope();
        let b = symtab.declare("b", VarType::Double).unwrap();
        assert_eq!(b.slot, 2);
        symtab.close_scope();

        // a sibling scope must not reuse the double's slots
        symtab.open_scope();
        let c = symtab.declare("c", VarType::Str).unwrap();
        assert_eq!(c.slot, 4);
        symtab.close_scope();

        symtab.close_scope();
        assert_eq!(symtab.max_locals(), 5);
    }

    #[test]
    fn test_shadowing_resolves_innermost() {
        let mut symtab = SymbolTable::new();
        symtab.open_scope();
        symtab.declare("x", VarType::Int).unwrap();
        symtab.open_scope();
        symtab.declare("x", VarType::Str).unwrap();
        assert_eq!(symtab.lookup("x").unwrap().var_type, VarType::Str);
        symtab.close_scope();
        assert_eq!(symtab.lookup("x").unwrap().var_type, VarType::Int);
    }

    #[test]
    fn test_duplicate_in_same_scope_rejected() {
        let mut symtab = SymbolTable::new();
        symtab.open_scope();
        symtab.declare("x", VarType::Int).unwrap();
        assert_eq!(
            symtab.declare("x", VarType::Int),
            Err(SymtabError::AlreadyDeclared("x".to_string()))
        );
    }
}
