mod reference;
mod variable;

use std::fmt;

use rustc_hash::FxHashMap;
use smol_str::SmolStr;

pub use reference::{Reference, ReferenceId};
pub use variable::{Storage, Variable, VariableId, VariableKind};

use crate::{
    arena::{Arena, ArenaId},
    ast::NodeId,
    range::Span,
};

pub type ScopeId = ArenaId<Scope>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Module,
    Class,
    Function,
    Lambda,
    Comprehension,
}

impl ScopeKind {
    /// Functions, lambdas and comprehensions expose their locals to nested
    /// scopes through cells. Classes and modules do not.
    pub fn is_function_like(self) -> bool {
        matches!(
            self,
            ScopeKind::Function | ScopeKind::Lambda | ScopeKind::Comprehension
        )
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKind::Module => write!(f, "module"),
            ScopeKind::Class => write!(f, "class"),
            ScopeKind::Function => write!(f, "function"),
            ScopeKind::Lambda => write!(f, "lambda"),
            ScopeKind::Comprehension => write!(f, "comprehension"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeFlags {
    /// Locals live in a runtime name -> value dictionary.
    pub needs_dictionary: bool,
    /// Names can be bound at runtime in ways the binder cannot see.
    pub has_late_bound_sets: bool,
    pub contains_import_star: bool,
    pub contains_unqualified_exec: bool,
    pub contains_exception_handling: bool,
    /// A nested scope captures one of this scope's variables.
    pub contains_nested_free_variables: bool,
    pub is_generator: bool,
    /// A function with a `for` loop is always compiled.
    pub has_for_loop: bool,
}

/// One entry of a closure tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClosureEntry {
    Cell(VariableId),
    /// Locals dictionary of a dictionary-backed function.
    Namespace(ScopeId),
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    pub name: SmolStr,
    /// Node that introduced the scope.
    pub node: NodeId,
    pub span: Span,
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    pub flags: ScopeFlags,
    variables: FxHashMap<SmolStr, VariableId>,
    variable_order: Vec<VariableId>,
    references: FxHashMap<SmolStr, ReferenceId>,
    reference_order: Vec<ReferenceId>,
    pub parameters: Vec<VariableId>,
    pub nonlocal_names: FxHashMap<SmolStr, Span>,
    pub referenced_globals: Vec<SmolStr>,
    /// Captured from enclosing scopes, in registration order.
    pub free_variables: Vec<ClosureEntry>,
    /// Owned by this scope and captured by nested scopes.
    pub cell_variables: Vec<ClosureEntry>,
    /// Set by the finishing pass: free entries followed by cell entries.
    pub closure: Vec<ClosureEntry>,
    /// For each free entry, its index in the parent's closure tuple.
    pub closure_map: Vec<u32>,
    pub storage: FxHashMap<SmolStr, Storage>,
    pub local_count: u32,
}

impl Scope {
    pub fn new(kind: ScopeKind, name: SmolStr, node: NodeId, span: Span, parent: Option<ScopeId>) -> Self {
        Self {
            kind,
            name,
            node,
            span,
            parent,
            children: Vec::new(),
            flags: ScopeFlags::default(),
            variables: FxHashMap::default(),
            variable_order: Vec::new(),
            references: FxHashMap::default(),
            reference_order: Vec::new(),
            parameters: Vec::new(),
            nonlocal_names: FxHashMap::default(),
            referenced_globals: Vec::new(),
            free_variables: Vec::new(),
            cell_variables: Vec::new(),
            closure: Vec::new(),
            closure_map: Vec::new(),
            storage: FxHashMap::default(),
            local_count: 0,
        }
    }

    pub fn lookup(&self, name: &str) -> Option<VariableId> {
        self.variables.get(name).copied()
    }

    pub fn lookup_reference(&self, name: &str) -> Option<ReferenceId> {
        self.references.get(name).copied()
    }

    pub fn is_referenced(&self, name: &str) -> bool {
        self.references.contains_key(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = VariableId> + '_ {
        self.variable_order.iter().copied()
    }

    pub fn references(&self) -> impl Iterator<Item = ReferenceId> + '_ {
        self.reference_order.iter().copied()
    }

    pub fn storage_of(&self, name: &str) -> Option<Storage> {
        self.storage.get(name).copied()
    }

    pub fn closure_index(&self, entry: ClosureEntry) -> Option<u32> {
        self.closure.iter().position(|e| *e == entry).map(|i| i as u32)
    }

    pub fn is_closure(&self) -> bool {
        !self.free_variables.is_empty()
    }

    pub fn add_free_variable(&mut self, entry: ClosureEntry) {
        if !self.free_variables.contains(&entry) {
            self.free_variables.push(entry);
        }
    }

    pub fn add_cell_variable(&mut self, entry: ClosureEntry) {
        if !self.cell_variables.contains(&entry) {
            self.cell_variables.push(entry);
        }
    }

    pub fn add_referenced_global(&mut self, name: &SmolStr) {
        if !self.referenced_globals.contains(name) {
            self.referenced_globals.push(name.clone());
        }
    }

    fn insert_variable(&mut self, name: SmolStr, id: VariableId) {
        self.variables.insert(name, id);
        self.variable_order.push(id);
    }
}

/// Arena-backed scope graph for one module.
#[derive(Debug, Clone)]
pub struct ScopeTree {
    scopes: Arena<Scope>,
    variables: Arena<Variable>,
    references: Arena<Reference>,
    module: ScopeId,
    global_names: Vec<SmolStr>,
    global_index: FxHashMap<SmolStr, u32>,
}

impl ScopeTree {
    pub fn new(module_node: NodeId, span: Span) -> Self {
        let mut scopes = Arena::new(16);
        let module = scopes.alloc(Scope::new(
            ScopeKind::Module,
            SmolStr::new_static("<module>"),
            module_node,
            span,
            None,
        ));
        Self {
            scopes,
            variables: Arena::new(64),
            references: Arena::new(64),
            module,
            global_names: Vec::new(),
            global_index: FxHashMap::default(),
        }
    }

    pub fn module(&self) -> ScopeId {
        self.module
    }

    pub fn add_scope(
        &mut self,
        kind: ScopeKind,
        name: SmolStr,
        node: NodeId,
        span: Span,
        parent: ScopeId,
    ) -> ScopeId {
        let id = self
            .scopes
            .alloc(Scope::new(kind, name, node, span, Some(parent)));
        self.scopes[parent].children.push(id);
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id]
    }

    pub fn scope_ids(&self) -> impl Iterator<Item = ScopeId> + use<> {
        self.scopes.ids()
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    pub fn variable(&self, id: VariableId) -> &Variable {
        &self.variables[id]
    }

    pub fn variable_mut(&mut self, id: VariableId) -> &mut Variable {
        &mut self.variables[id]
    }

    pub fn reference(&self, id: ReferenceId) -> &Reference {
        &self.references[id]
    }

    pub fn reference_mut(&mut self, id: ReferenceId) -> &mut Reference {
        &mut self.references[id]
    }

    /// Enclosing scopes, innermost first, excluding `id` itself.
    pub fn ancestors(&self, id: ScopeId) -> impl Iterator<Item = ScopeId> + '_ {
        std::iter::successors(self.scopes[id].parent, |s| self.scopes[*s].parent)
    }

    /// Creates-or-fetches a variable owned by `scope`.
    pub fn define(&mut self, scope: ScopeId, name: &SmolStr, kind: VariableKind, span: Span) -> VariableId {
        if let Some(id) = self.scopes[scope].lookup(name) {
            return id;
        }
        let id = self
            .variables
            .alloc(Variable::new(name.clone(), kind, scope, span));
        self.scopes[scope].insert_variable(name.clone(), id);
        if kind == VariableKind::Global || scope == self.module {
            self.global_slot(name);
        }
        if kind == VariableKind::Parameter {
            self.scopes[scope].parameters.push(id);
        }
        id
    }

    /// Maps `name` in `scope` onto an existing variable owned elsewhere.
    pub fn alias(&mut self, scope: ScopeId, name: &SmolStr, variable: VariableId) {
        self.scopes[scope].insert_variable(name.clone(), variable);
    }

    /// The module-level variable for `name`, created on demand.
    pub fn ensure_global(&mut self, name: &SmolStr, span: Span) -> VariableId {
        let module = self.module;
        self.define(module, name, VariableKind::Global, span)
    }

    pub fn add_reference(&mut self, scope: ScopeId, name: &SmolStr, span: Span) -> ReferenceId {
        if let Some(id) = self.scopes[scope].lookup_reference(name) {
            return id;
        }
        let id = self
            .references
            .alloc(Reference::new(name.clone(), scope, span));
        let s = &mut self.scopes[scope];
        s.references.insert(name.clone(), id);
        s.reference_order.push(id);
        id
    }

    /// Index of `name` in the module-wide global table, allocated on demand.
    pub fn global_slot(&mut self, name: &SmolStr) -> u32 {
        if let Some(index) = self.global_index.get(name) {
            return *index;
        }
        let index = self.global_names.len() as u32;
        self.global_names.push(name.clone());
        self.global_index.insert(name.clone(), index);
        index
    }

    pub fn global_names(&self) -> &[SmolStr] {
        &self.global_names
    }

    /// The variable a name denotes in `scope` after binding.
    pub fn resolved(&self, scope: ScopeId, name: &str) -> Option<VariableId> {
        self.scopes[scope]
            .lookup_reference(name)
            .and_then(|r| self.references[r].variable)
    }

    /// Variables owned by `scope` that the flow checker tracks.
    pub fn tracked_variables(&self, scope: ScopeId) -> Vec<VariableId> {
        self.scopes[scope]
            .variables()
            .filter(|v| {
                let variable = &self.variables[*v];
                variable.scope == scope && !variable.is_global()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> ScopeTree {
        ScopeTree::new(NodeId::fresh(), Span::default())
    }

    #[test]
    fn test_define_is_create_or_fetch() {
        let mut tree = tree();
        let module = tree.module();
        let f = tree.add_scope(ScopeKind::Function, "f".into(), NodeId::fresh(), Span::default(), module);
        let a = tree.define(f, &"x".into(), VariableKind::Local, Span::default());
        let b = tree.define(f, &"x".into(), VariableKind::Local, Span::default());
        assert_eq!(a, b);
        assert_eq!(tree.scope(f).variables().count(), 1);
        assert_eq!(tree.scope(module).children, vec![f]);
    }

    #[test]
    fn test_module_variables_get_global_slots() {
        let mut tree = tree();
        let module = tree.module();
        tree.define(module, &"a".into(), VariableKind::Global, Span::default());
        tree.ensure_global(&"b".into(), Span::default());
        assert_eq!(tree.global_names(), &["a", "b"]);
        assert_eq!(tree.global_slot(&"b".into()), 1);
    }

    #[test]
    fn test_ancestors_innermost_first() {
        let mut tree = tree();
        let module = tree.module();
        let f = tree.add_scope(ScopeKind::Function, "f".into(), NodeId::fresh(), Span::default(), module);
        let g = tree.add_scope(ScopeKind::Function, "g".into(), NodeId::fresh(), Span::default(), f);
        assert_eq!(tree.ancestors(g).collect::<Vec<_>>(), vec![f, module]);
    }

    #[test]
    fn test_references_are_shared_per_name() {
        let mut tree = tree();
        let module = tree.module();
        let a = tree.add_reference(module, &"x".into(), Span::new(0, 1));
        let b = tree.add_reference(module, &"x".into(), Span::new(5, 6));
        assert_eq!(a, b);
        assert_eq!(tree.reference(a).span, Span::new(0, 1));
    }

    #[test]
    fn test_free_and_cell_lists_dedup() {
        let mut scope = Scope::new(ScopeKind::Function, "f".into(), NodeId::fresh(), Span::default(), None);
        let entry = ClosureEntry::Cell(VariableId::new(3));
        scope.add_free_variable(entry);
        scope.add_free_variable(entry);
        scope.add_cell_variable(entry);
        assert_eq!(scope.free_variables.len(), 1);
        assert_eq!(scope.cell_variables.len(), 1);
        assert!(scope.is_closure());
    }
}
