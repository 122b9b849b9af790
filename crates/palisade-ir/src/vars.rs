use std::fmt;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::PolyError;

/// Index of a symbolic variable inside a [`VarRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VarId(pub u32);

impl VarId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Ordered set of variable names. Ids are assigned in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VarRegistry {
    names: IndexSet<String>,
}

impl VarRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a new variable. Names must be non-empty and unique.
    pub fn declare(&mut self, name: &str) -> Result<VarId, PolyError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(PolyError::EmptyVariableName);
        }
        let (index, inserted) = self.names.insert_full(trimmed.to_string());
        if !inserted {
            return Err(PolyError::DuplicateVariable(trimmed.to_string()));
        }
        Ok(VarId(index as u32))
    }

    /// Declare every name in order and return their ids.
    pub fn declare_all<S: AsRef<str>>(&mut self, names: &[S]) -> Result<Vec<VarId>, PolyError> {
        names.iter().map(|n| self.declare(n.as_ref())).collect()
    }

    pub fn lookup(&self, name: &str) -> Option<VarId> {
        self.names.get_index_of(name).map(|i| VarId(i as u32))
    }

    pub fn name(&self, id: VarId) -> Option<&str> {
        self.names.get_index(id.index()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VarId, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, n)| (VarId(i as u32), n.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declaration_order_defines_ids() {
        let mut reg = VarRegistry::new();
        let ids = reg.declare_all(&["x1", "x2", "varsigma1"]).unwrap();
        assert_eq!(ids, vec![VarId(0), VarId(1), VarId(2)]);
        assert_eq!(reg.lookup("x2"), Some(VarId(1)));
        assert_eq!(reg.name(VarId(2)), Some("varsigma1"));
        assert_eq!(reg.lookup("y"), None);
    }

    #[test]
    fn duplicate_and_empty_names_are_rejected() {
        let mut reg = VarRegistry::new();
        reg.declare("x").unwrap();
        assert!(matches!(
            reg.declare(" x "),
            Err(PolyError::DuplicateVariable(name)) if name == "x"
        ));
        assert!(matches!(reg.declare("  "), Err(PolyError::EmptyVariableName)));
    }
}
