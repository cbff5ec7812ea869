use std::collections::HashMap;

use crate::bytecode::Scope;
use crate::value::{TypeTag, Value};

use super::FaultKind;

/// One variable dictionary: the global one or a single call's locals.
#[derive(Debug, Clone)]
pub struct Context {
    pub name: String,
    pub global: bool,
    vars: HashMap<String, Value>,
    /// Set by `Enter`; `Void` until then.
    pub ret: TypeTag,
    /// Operand stack depth `Return` restores.
    pub stack_base: usize,
}

impl Context {
    fn new(name: &str, global: bool, stack_base: usize) -> Self {
        Context { name: name.to_string(), global, vars: HashMap::new(), ret: TypeTag::Void, stack_base }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        match self.vars.get_mut(name) {
            Some(slot) => *slot = value,
            None => {
                self.vars.insert(name.to_string(), value);
            }
        }
    }
}

/// The global context plus a LIFO list of call contexts. Locals never see
/// their caller's variables.
#[derive(Debug)]
pub struct Scopes {
    global: Context,
    locals: Vec<Context>,
}

impl Default for Scopes {
    fn default() -> Self {
        Scopes { global: Context::new("global", true, 0), locals: Vec::new() }
    }
}

impl Scopes {
    pub fn new() -> Self {
        Scopes::default()
    }

    pub fn push_local(&mut self, name: &str, stack_base: usize) {
        self.locals.push(Context::new(name, false, stack_base));
    }

    pub fn pop_local(&mut self) -> Option<Context> {
        self.locals.pop()
    }

    pub fn depth(&self) -> usize {
        self.locals.len()
    }

    pub fn global(&self) -> &Context {
        &self.global
    }

    pub fn innermost(&self) -> Option<&Context> {
        self.locals.last()
    }

    pub fn innermost_mut(&mut self) -> Option<&mut Context> {
        self.locals.last_mut()
    }

    /// Scan-pass initialisation; an existing value is left alone.
    pub fn init_global(&mut self, name: &str, ty: TypeTag) {
        if self.global.get(name).is_none() {
            self.global.set(name, ty.default_value());
        }
    }

    pub fn load(&self, scope: Scope, name: &str) -> Result<Value, FaultKind> {
        let found = match scope {
            Scope::Resolve => self.innermost().and_then(|c| c.get(name)).or_else(|| self.global.get(name)),
            Scope::Global => self.global.get(name),
            Scope::Local => {
                let ctx = self.innermost().ok_or_else(|| FaultKind::NoLocalContext(name.to_string()))?;
                ctx.get(name)
            }
        };
        found.cloned().ok_or_else(|| FaultKind::Unresolved(name.to_string()))
    }

    /// Write `value`. A local store with no active call context still lands
    /// in the global context but reports the fault.
    pub fn store(&mut self, scope: Scope, name: &str, value: Value) -> Result<(), FaultKind> {
        match scope {
            Scope::Resolve => {
                let use_local =
                    self.innermost().is_some_and(|c| c.get(name).is_some()) || self.global.get(name).is_none();
                let target = match self.locals.last_mut() {
                    Some(ctx) if use_local => ctx,
                    _ => &mut self.global,
                };
                target.set(name, value);
                Ok(())
            }
            Scope::Global => {
                self.global.set(name, value);
                Ok(())
            }
            Scope::Local => match self.locals.last_mut() {
                Some(ctx) => {
                    ctx.set(name, value);
                    Ok(())
                }
                None => {
                    self.global.set(name, value);
                    Err(FaultKind::NoLocalContext(name.to_string()))
                }
            },
        }
    }
}
