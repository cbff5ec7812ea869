use std::collections::HashMap;

use crate::bytecode::Param;
use crate::value::TypeTag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Global,
    Local,
    Parameter,
    Function,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    /// Variable type, or return type for functions.
    pub ty: TypeTag,
    /// Empty for everything but functions.
    pub params: Vec<Param>,
}

/// Name lookup the emitter needs while choosing load variants.
pub trait SymbolTable {
    /// Is `name` defined anywhere visible?
    fn verify(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    fn get(&self, name: &str) -> Option<&Symbol>;
}

/// Built-in callables dispatched by the VM when no user function matches.
pub const BUILTINS: &[&str] = &["print", "println"];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Two layers: globals and functions for the whole program, and the
/// parameters and locals of the function currently being compiled.
#[derive(Debug, Default)]
pub struct Registry {
    globals: HashMap<String, Symbol>,
    function: Option<HashMap<String, Symbol>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclareError {
    Duplicate(String),
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn declare_global(&mut self, name: &str, ty: TypeTag) -> Result<(), DeclareError> {
        self.insert_global(Symbol { name: name.to_string(), kind: SymbolKind::Global, ty, params: Vec::new() })
    }

    pub fn declare_function(&mut self, name: &str, ret: TypeTag, params: Vec<Param>) -> Result<(), DeclareError> {
        self.insert_global(Symbol { name: name.to_string(), kind: SymbolKind::Function, ty: ret, params })
    }

    fn insert_global(&mut self, symbol: Symbol) -> Result<(), DeclareError> {
        if self.globals.contains_key(&symbol.name) {
            return Err(DeclareError::Duplicate(symbol.name));
        }
        self.globals.insert(symbol.name.clone(), symbol);
        Ok(())
    }

    /// Open the function layer and bind `params` into it.
    pub fn enter_function(&mut self, params: &[Param]) {
        let layer = params
            .iter()
            .map(|p| {
                let sym = Symbol { name: p.name.clone(), kind: SymbolKind::Parameter, ty: p.ty, params: Vec::new() };
                (p.name.clone(), sym)
            })
            .collect();
        self.function = Some(layer);
    }

    pub fn leave_function(&mut self) {
        self.function = None;
    }

    /// Declare a local in the open function layer, or a global when none is open.
    /// Redeclaring a local replaces it; locals may shadow globals.
    pub fn declare_local(&mut self, name: &str, ty: TypeTag) -> Result<(), DeclareError> {
        match &mut self.function {
            Some(layer) => {
                let sym = Symbol { name: name.to_string(), kind: SymbolKind::Local, ty, params: Vec::new() };
                layer.insert(name.to_string(), sym);
                Ok(())
            }
            None => self.declare_global(name, ty),
        }
    }

    pub fn function(&self, name: &str) -> Option<&Symbol> {
        self.globals.get(name).filter(|s| s.kind == SymbolKind::Function)
    }

    /// Nearest visible name within edit distance 3, for "did you mean" hints.
    pub fn closest(&self, name: &str) -> Option<String> {
        let layer = self.function.iter().flat_map(|l| l.keys());
        closest_match(name, self.globals.keys().chain(layer))
    }
}

impl SymbolTable for Registry {
    fn get(&self, name: &str) -> Option<&Symbol> {
        self.function
            .as_ref()
            .and_then(|layer| layer.get(name))
            .or_else(|| self.globals.get(name))
    }
}

fn closest_match<'a>(name: &str, candidates: impl Iterator<Item = &'a String>) -> Option<String> {
    let mut best: Option<(&String, usize)> = None;
    for candidate in candidates {
        let dist = levenshtein(name, candidate);
        if dist <= 3 && best.is_none_or(|(_, d)| dist < d) {
            best = Some((candidate, dist));
        }
    }
    best.map(|(s, _)| s.clone())
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut row = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            row[j + 1] = (prev[j + 1] + 1).min(row[j] + 1).min(prev[j] + cost);
        }
        prev = row;
    }
    prev[b.len()]
}
