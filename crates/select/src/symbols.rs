//! Names known to a collection.

use rustc_hash::FxHashMap;

use rst_core::positions::PositionType;

use crate::methods::MethodId;

/// Words with fixed meaning in the grammar.
pub const RESERVED_WORDS: &[&str] = &["and", "or", "xor", "not", "of", "group", "to"];

/// What a name refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Symbol {
    Reserved,
    Method(MethodId),
    /// Bound variable (index into the collection's roots)
    Variable(usize),
    /// External group (position in the bound group set)
    Group(usize),
    PositionType(PositionType),
}

impl Symbol {
    pub fn category(&self) -> &'static str {
        match self {
            Symbol::Reserved => "reserved word",
            Symbol::Method(_) => "method",
            Symbol::Variable(_) => "variable",
            Symbol::Group(_) => "group",
            Symbol::PositionType(_) => "position type",
        }
    }
}

/// Name table; each name belongs to exactly one category.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: FxHashMap<String, Symbol>,
}

impl SymbolTable {
    /// Table holding the reserved words and every position type name.
    pub fn new() -> Self {
        let mut table = Self::default();
        for &word in RESERVED_WORDS {
            table.symbols.insert(word.to_string(), Symbol::Reserved);
        }
        for &name in PositionType::NAMES {
            if let Ok(ptype) = name.parse() {
                table
                    .symbols
                    .insert(name.to_string(), Symbol::PositionType(ptype));
            }
        }
        table
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    /// Add a name, failing if it is already taken.
    pub fn add(&mut self, name: &str, symbol: Symbol) -> Result<(), String> {
        if let Some(existing) = self.symbols.get(name) {
            return Err(format!(
                "'{}' is already defined as a {}",
                name,
                existing.category()
            ));
        }
        self.symbols.insert(name.to_string(), symbol);
        Ok(())
    }

    /// Remove every group symbol.
    pub fn remove_groups(&mut self) {
        self.symbols.retain(|_, s| !matches!(s, Symbol::Group(_)));
    }

    /// Names of one category, sorted.
    pub fn names<F: Fn(&Symbol) -> bool>(&self, filter: F) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .symbols
            .iter()
            .filter(|(_, s)| filter(s))
            .map(|(n, _)| n.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

/// Group names usable as bare identifiers.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
