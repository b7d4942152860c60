//! Activations and variable storage.

use std::{cell::RefCell, rc::Rc, sync::Arc};

use pyrite_lang::{
    CellKind, CodeObject, Storage,
    ir::{LineFlag, TempId, TryId, VarAccess, YieldId},
};
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::{
    error::{ErrorKind, TraceEntry, Unwind, raise},
    interpreter::Runtime,
    value::{Namespace, Value},
};

/// Module-level variables: slots for names the binder saw, extended by
/// name for everything set dynamically.
#[derive(Debug, Default)]
pub struct Globals {
    slots: RefCell<Vec<Option<Value>>>,
    index: RefCell<FxHashMap<SmolStr, usize>>,
    names: RefCell<Vec<SmolStr>>,
}

impl Globals {
    pub fn new(names: &[SmolStr]) -> Rc<Globals> {
        let index = names.iter().enumerate().map(|(i, n)| (n.clone(), i)).collect();
        Rc::new(Globals {
            slots: RefCell::new(vec![None; names.len()]),
            index: RefCell::new(index),
            names: RefCell::new(names.to_vec()),
        })
    }

    pub fn slot(&self, slot: u32) -> Option<Value> {
        self.slots.borrow().get(slot as usize).cloned().flatten()
    }

    pub fn set_slot(&self, slot: u32, value: Value) {
        if let Some(entry) = self.slots.borrow_mut().get_mut(slot as usize) {
            *entry = Some(value);
        }
    }

    pub fn clear_slot(&self, slot: u32) -> bool {
        self.slots
            .borrow_mut()
            .get_mut(slot as usize)
            .and_then(Option::take)
            .is_some()
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        let slot = *self.index.borrow().get(name)?;
        self.slot(slot as u32)
    }

    pub fn set(&self, name: &SmolStr, value: Value) {
        let slot = self.index.borrow().get(name).copied();
        match slot {
            Some(slot) => self.set_slot(slot as u32, value),
            None => {
                let mut slots = self.slots.borrow_mut();
                self.index.borrow_mut().insert(name.clone(), slots.len());
                self.names.borrow_mut().push(name.clone());
                slots.push(Some(value));
            }
        }
    }

    pub fn remove(&self, name: &str) -> bool {
        let slot = self.index.borrow().get(name).copied();
        slot.is_some_and(|slot| self.clear_slot(slot as u32))
    }

    /// Bound names and values in slot order.
    pub fn items(&self) -> Vec<(SmolStr, Value)> {
        let slots = self.slots.borrow();
        self.names
            .borrow()
            .iter()
            .zip(slots.iter())
            .filter_map(|(name, value)| value.clone().map(|v| (name.clone(), v)))
            .collect()
    }
}

/// One entry of a closure tuple.
#[derive(Clone)]
pub enum Captured {
    Cell(Rc<RefCell<Option<Value>>>),
    /// The locals dictionary of a function that needs one.
    Namespace(Rc<RefCell<Namespace>>),
}

impl Captured {
    pub fn cell() -> Self {
        Captured::Cell(Rc::new(RefCell::new(None)))
    }
}

/// Where a resuming generator frame is headed.
#[derive(Debug)]
pub(crate) struct Resume {
    pub target: YieldId,
    path: Vec<u32>,
    depth: usize,
}

pub struct Frame {
    pub(crate) rt: Rc<Runtime>,
    pub code: Arc<CodeObject>,
    pub globals: Rc<Globals>,
    pub locals: Vec<Option<Value>>,
    pub temps: Vec<Option<Value>>,
    pub closure: Vec<Captured>,
    pub namespace: Option<Rc<RefCell<Namespace>>>,
    pub line: u32,
    /// This frame already appended its line to the propagating exception.
    pub(crate) line_recorded: bool,
    /// Exceptions of the handlers currently running, innermost last.
    pub(crate) handling: Vec<Value>,
    /// Outcomes parked while a `finally` block runs.
    pub(crate) pending: FxHashMap<TryId, Result<Value, Unwind>>,
    pub(crate) resume: Option<Resume>,
    pub(crate) sent: Option<Value>,
    pub(crate) injected: Option<Value>,
}

impl Frame {
    pub(crate) fn new(rt: Rc<Runtime>, code: Arc<CodeObject>, globals: Rc<Globals>, mut closure: Vec<Captured>) -> Frame {
        let layout = &code.layout;
        let mut namespace = layout.namespace.then(|| Rc::new(RefCell::new(Namespace::default())));
        for kind in &layout.cells {
            closure.push(match kind {
                CellKind::Cell => Captured::cell(),
                CellKind::Namespace => Captured::Namespace(Rc::clone(namespace.get_or_insert_default())),
            });
        }
        Frame {
            rt,
            locals: vec![None; layout.locals as usize],
            temps: vec![None; layout.temps as usize],
            closure,
            namespace,
            line: code.first_line,
            line_recorded: false,
            handling: Vec::new(),
            pending: FxHashMap::default(),
            resume: None,
            sent: None,
            injected: None,
            globals,
            code,
        }
    }

    pub fn load(&self, var: &VarAccess, guarded: bool) -> Result<Value, Unwind> {
        let name = &var.name;
        match var.storage {
            Storage::Local(slot) => match &self.locals[slot as usize] {
                Some(v) => Ok(v.clone()),
                None if guarded => Err(unbound_local(name)),
                None => Err(raise(
                    ErrorKind::SystemError,
                    format!("unchecked read of unbound local '{name}'"),
                )),
            },
            Storage::Cell(index) | Storage::Free(index) => match self.closure.get(index as usize) {
                Some(Captured::Cell(cell)) => cell.borrow().clone().ok_or_else(|| {
                    if matches!(var.storage, Storage::Cell(_)) {
                        unbound_local(name)
                    } else {
                        raise(
                            ErrorKind::NameError,
                            format!("free variable '{name}' referenced before assignment in enclosing scope"),
                        )
                    }
                }),
                _ => Err(bad_closure(name)),
            },
            Storage::Global(slot) => self
                .globals
                .slot(slot)
                .or_else(|| self.rt.builtin(name))
                .ok_or_else(|| not_defined(name)),
            Storage::Name => {
                if let Some(ns) = &self.namespace
                    && let Some(v) = ns.borrow().get(name)
                {
                    return Ok(v.clone());
                }
                self.global_or_builtin(name)
            }
            Storage::Dictionary => self
                .namespace
                .as_ref()
                .and_then(|ns| ns.borrow().get(name).cloned())
                .ok_or_else(|| unbound_local(name)),
            Storage::FreeDictionary(index) => match self.closure.get(index as usize) {
                Some(Captured::Namespace(ns)) => match ns.borrow().get(name) {
                    Some(v) => Ok(v.clone()),
                    None => self.global_or_builtin(name),
                },
                _ => Err(bad_closure(name)),
            },
        }
    }

    fn global_or_builtin(&self, name: &str) -> Result<Value, Unwind> {
        self.globals
            .get(name)
            .or_else(|| self.rt.builtin(name))
            .ok_or_else(|| not_defined(name))
    }

    pub fn store(&mut self, var: &VarAccess, value: Value) -> Result<(), Unwind> {
        match var.storage {
            Storage::Local(slot) => self.locals[slot as usize] = Some(value),
            Storage::Cell(index) | Storage::Free(index) => match self.closure.get(index as usize) {
                Some(Captured::Cell(cell)) => *cell.borrow_mut() = Some(value),
                _ => return Err(bad_closure(&var.name)),
            },
            Storage::Global(slot) => self.globals.set_slot(slot, value),
            Storage::Name => match &self.namespace {
                Some(ns) => {
                    ns.borrow_mut().insert(var.name.clone(), value);
                }
                None => self.globals.set(&var.name, value),
            },
            Storage::Dictionary => {
                self.namespace
                    .get_or_insert_default()
                    .borrow_mut()
                    .insert(var.name.clone(), value);
            }
            Storage::FreeDictionary(index) => match self.closure.get(index as usize) {
                Some(Captured::Namespace(ns)) => {
                    ns.borrow_mut().insert(var.name.clone(), value);
                }
                _ => return Err(bad_closure(&var.name)),
            },
        }
        Ok(())
    }

    /// An unchecked delete leaves an already unbound variable alone.
    pub fn delete(&mut self, var: &VarAccess, checked: bool) -> Result<(), Unwind> {
        let name = &var.name;
        let removed = match var.storage {
            Storage::Local(slot) => self.locals[slot as usize].take().is_some(),
            Storage::Cell(index) | Storage::Free(index) => match self.closure.get(index as usize) {
                Some(Captured::Cell(cell)) => cell.borrow_mut().take().is_some(),
                _ => return Err(bad_closure(name)),
            },
            Storage::Global(slot) => self.globals.clear_slot(slot),
            Storage::Name => match &self.namespace {
                Some(ns) => ns.borrow_mut().remove(name).is_some(),
                None => self.globals.remove(name),
            },
            Storage::Dictionary => self
                .namespace
                .as_ref()
                .is_some_and(|ns| ns.borrow_mut().remove(name).is_some()),
            Storage::FreeDictionary(index) => match self.closure.get(index as usize) {
                Some(Captured::Namespace(ns)) => ns.borrow_mut().remove(name).is_some(),
                _ => return Err(bad_closure(name)),
            },
        };
        if checked && !removed {
            return Err(match var.storage {
                Storage::Local(_) | Storage::Cell(_) | Storage::Dictionary => unbound_local(name),
                _ => not_defined(name),
            });
        }
        Ok(())
    }

    pub fn temp(&self, temp: TempId) -> Result<Value, Unwind> {
        self.temps
            .get(temp as usize)
            .cloned()
            .flatten()
            .ok_or_else(|| raise(ErrorKind::SystemError, format!("temporary ${temp} read before it was set")))
    }

    pub fn set_temp(&mut self, temp: TempId, value: Value) {
        if let Some(slot) = self.temps.get_mut(temp as usize) {
            *slot = Some(value);
        }
    }

    /// Marks an exception as raised afresh in this frame so the next
    /// traceback record takes the current line.
    pub(crate) fn failed(&mut self, unwind: Unwind) -> Unwind {
        if matches!(unwind, Unwind::Exception(_)) {
            self.line_recorded = false;
        }
        unwind
    }

    /// Appends this frame's line to the exception unless already done.
    pub(crate) fn record_traceback(&mut self, exception: &Value) {
        if self.line_recorded {
            return;
        }
        if let Some(instance) = exception.as_instance() {
            instance.traceback.borrow_mut().push(TraceEntry {
                code: self.code.name.clone(),
                line: self.line,
            });
        }
        self.line_recorded = true;
    }

    pub(crate) fn line_flag(&mut self, flag: LineFlag) {
        match flag {
            LineFlag::Save(temp) => {
                self.set_temp(temp, Value::Bool(self.line_recorded));
                self.line_recorded = false;
            }
            LineFlag::Restore(temp) => {
                self.line_recorded = matches!(self.temp(temp), Ok(Value::Bool(true)));
            }
            LineFlag::Clear => self.line_recorded = false,
        }
    }

    /// Re-raises the exception of the innermost running handler.
    pub(crate) fn rethrow(&self) -> Unwind {
        match self.handling.last() {
            Some(exception) => Unwind::Exception(exception.clone()),
            None => raise(ErrorKind::RuntimeError, "No active exception to reraise"),
        }
    }

    pub(crate) fn start_resume(&mut self, target: YieldId) -> Result<(), Unwind> {
        let Some(path) = self.code.resume_path(target) else {
            return Err(raise(ErrorKind::SystemError, format!("no resumption point {target}")));
        };
        self.resume = Some(Resume {
            target,
            path: path.to_vec(),
            depth: 0,
        });
        Ok(())
    }

    /// Next child step when a resumable node is re-entered during resumption.
    pub(crate) fn seek(&mut self) -> Option<u32> {
        let resume = self.resume.as_mut()?;
        let step = resume.path.get(resume.depth).copied()?;
        resume.depth += 1;
        Some(step)
    }

    /// Whether `id` is the suspension point being resumed; clears the
    /// resumption state when it is.
    pub(crate) fn resumed_at(&mut self, id: YieldId) -> bool {
        match &self.resume {
            Some(resume) if resume.target == id && resume.depth == resume.path.len() => {
                self.resume = None;
                true
            }
            _ => false,
        }
    }

    /// Snapshot of the frame's variables as `locals()` shows them.
    pub fn locals_snapshot(&self) -> Vec<(SmolStr, Value)> {
        if let Some(ns) = &self.namespace {
            return ns.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        }
        if self.code.kind == pyrite_lang::ScopeKind::Module {
            return self.globals.items();
        }
        // Parameters are the only slot names a code object carries.
        self.code
            .params
            .iter()
            .filter_map(|p| {
                let value = match p.storage {
                    Storage::Local(slot) => self.locals[slot as usize].clone(),
                    Storage::Cell(index) => match self.closure.get(index as usize) {
                        Some(Captured::Cell(cell)) => cell.borrow().clone(),
                        _ => None,
                    },
                    _ => None,
                };
                value.map(|v| (p.name.clone(), v))
            })
            .collect()
    }
}

fn unbound_local(name: &str) -> Unwind {
    raise(
        ErrorKind::UnboundLocalError,
        format!("local variable '{name}' referenced before assignment"),
    )
}

fn not_defined(name: &str) -> Unwind {
    raise(ErrorKind::NameError, format!("name '{name}' is not defined"))
}

fn bad_closure(name: &str) -> Unwind {
    raise(ErrorKind::SystemError, format!("closure entry for '{name}' has the wrong kind"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_globals_slots_and_names() {
        let globals = Globals::new(&["a".into(), "b".into()]);
        globals.set_slot(1, Value::Int(2));
        globals.set(&"c".into(), Value::Int(3));
        assert_eq!(globals.get("b"), Some(Value::Int(2)));
        assert_eq!(globals.get("a"), None);
        assert_eq!(globals.slot(2), Some(Value::Int(3)));

        let names: Vec<_> = globals.items().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "c"]);

        assert!(globals.remove("b"));
        assert!(!globals.remove("b"));
        assert!(!globals.clear_slot(9));
    }

    #[test]
    fn test_captured_cells_are_shared() {
        let cell = Captured::cell();
        let alias = cell.clone();
        if let Captured::Cell(c) = &cell {
            *c.borrow_mut() = Some(Value::Int(5));
        }
        let Captured::Cell(c) = alias else {
            panic!("expected a cell");
        };
        assert_eq!(*c.borrow(), Some(Value::Int(5)));
    }
}
