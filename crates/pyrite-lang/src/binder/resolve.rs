//! Second binder pass: resolve references across scopes, verify scope-level
//! restrictions and classify the storage of every name.

use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::{
    diagnostic::DiagnosticSink,
    range::Span,
    scope::{ClosureEntry, ScopeId, ScopeKind, ScopeTree, Storage, VariableId, VariableKind},
};

pub(super) fn bind_references(tree: &mut ScopeTree, order: &[ScopeId], sink: &mut DiagnosticSink) {
    for &scope in order {
        let references: Vec<_> = tree.scope(scope).references().collect();
        for reference in references {
            let (name, span) = {
                let r = tree.reference(reference);
                (r.name.clone(), r.span)
            };
            let variable = bind_reference(tree, scope, &name, span, sink);
            tree.reference_mut(reference).variable = variable;

            if let Some(variable) = variable {
                let v = tree.variable(variable);
                if let Some(deleted) = v.deleted
                    && v.scope != scope
                    && v.scope != tree.module()
                {
                    sink.error(
                        format!("can not delete variable '{name}' referenced in nested scope"),
                        deleted,
                    );
                }
            }
            tracing::trace!(scope = %tree.scope(scope).name, %name, ?variable, "reference resolved");
        }
    }
}

fn bind_reference(
    tree: &mut ScopeTree,
    scope: ScopeId,
    name: &SmolStr,
    span: Span,
    sink: &mut DiagnosticSink,
) -> Option<VariableId> {
    let kind = tree.scope(scope).kind;
    if let Some(variable) = tree.scope(scope).lookup(name) {
        if tree.variable(variable).is_global() {
            if scope != tree.module() {
                tree.scope_mut(scope).add_referenced_global(name);
            }
            return Some(variable);
        }
        // Class-body locals are accessed by name, like a dictionary.
        if kind == ScopeKind::Class {
            return None;
        }
        return Some(variable);
    }

    let nonlocal = tree.scope(scope).nonlocal_names.get(name).copied();
    let ancestors: Vec<_> = tree.ancestors(scope).collect();
    for parent in ancestors {
        if nonlocal.is_some() && !tree.scope(parent).kind.is_function_like() {
            continue;
        }
        if let Some(variable) = try_bind_outer(tree, parent, scope, name) {
            if let Some(span) = nonlocal
                && tree.variable(variable).is_global()
            {
                sink.error(format!("no binding for nonlocal '{name}' found"), span);
                return None;
            }
            return Some(variable);
        }
    }

    if let Some(span) = nonlocal {
        sink.error(format!("no binding for nonlocal '{name}' found"), span);
        return None;
    }

    match kind {
        ScopeKind::Module => Some(tree.ensure_global(name, span)),
        ScopeKind::Class => None,
        _ if tree.scope(scope).flags.has_late_bound_sets => None,
        _ => {
            let variable = tree.ensure_global(name, span);
            tree.scope_mut(scope).add_referenced_global(name);
            Some(variable)
        }
    }
}

/// Asks `owner` to bind `name` on behalf of the nested scope `from`.
///
/// Only function-like scopes expose their locals; a class exposes nothing
/// except the implicit `__class__` cell used by zero-argument `super()`.
fn try_bind_outer(tree: &mut ScopeTree, owner: ScopeId, from: ScopeId, name: &SmolStr) -> Option<VariableId> {
    let o = tree.scope(owner);
    let exposes = o.kind.is_function_like() || (o.kind == ScopeKind::Class && name == "__class__");
    if !exposes {
        return None;
    }
    let variable = o.lookup(name)?;
    let needs_dictionary = o.kind.is_function_like() && o.flags.needs_dictionary;
    tree.scope_mut(owner).flags.contains_nested_free_variables = true;

    match tree.variable(variable).kind {
        VariableKind::Local | VariableKind::Parameter => {
            tree.variable_mut(variable).accessed_in_nested_scope = true;
            let entry = if needs_dictionary {
                ClosureEntry::Namespace(owner)
            } else {
                ClosureEntry::Cell(variable)
            };

            tree.scope_mut(from).add_free_variable(entry);
            let intermediate: Vec<_> = tree.ancestors(from).take_while(|s| *s != owner).collect();
            for scope in intermediate {
                tree.scope_mut(scope).add_free_variable(entry);
            }
            tree.scope_mut(owner).add_cell_variable(entry);
        }
        VariableKind::Global => tree.scope_mut(from).add_referenced_global(name),
    }
    Some(variable)
}

pub(super) fn verify(tree: &ScopeTree, order: &[ScopeId], sink: &mut DiagnosticSink) {
    for &scope in order {
        let s = tree.scope(scope);
        if s.kind != ScopeKind::Function {
            continue;
        }
        let nested = s
            .parent
            .is_some_and(|p| tree.scope(p).kind == ScopeKind::Function);

        if s.flags.contains_import_star && (nested || s.is_closure()) {
            sink.error(
                format!(
                    "import * is not allowed in function '{}' because it is a nested function",
                    s.name
                ),
                s.span,
            );
        }
        if s.flags.contains_import_star && s.flags.contains_nested_free_variables {
            sink.error(
                format!(
                    "import * is not allowed in function '{}' because it contains a nested function with free variables",
                    s.name
                ),
                s.span,
            );
        }
        if s.flags.contains_unqualified_exec && s.flags.contains_nested_free_variables {
            sink.error(
                format!(
                    "unqualified exec is not allowed in function '{}' because it contains a nested function with free variables",
                    s.name
                ),
                s.span,
            );
        }
        if s.flags.contains_unqualified_exec && s.is_closure() {
            sink.error(
                format!(
                    "unqualified exec is not allowed in function '{}' because it is a nested function",
                    s.name
                ),
                s.span,
            );
        }
    }
}

/// Builds closure tuples and resolves the storage of every referenced name.
/// `order` lists parents before children, so a parent's tuple is final
/// before any child indexes into it.
pub(super) fn finish(tree: &mut ScopeTree, order: &[ScopeId]) {
    for &scope in order {
        let parent_closure = tree
            .scope(scope)
            .parent
            .map(|p| tree.scope(p).closure.clone())
            .unwrap_or_default();

        let s = tree.scope(scope);
        let mut closure = s.free_variables.clone();
        let closure_map: Vec<u32> = s
            .free_variables
            .iter()
            .map(|entry| {
                let Some(index) = parent_closure.iter().position(|e| e == entry) else {
                    panic!(
                        "free variable {entry:?} of '{}' is missing from the parent closure",
                        s.name
                    );
                };
                index as u32
            })
            .collect();
        for entry in &s.cell_variables {
            if !closure.contains(entry) {
                closure.push(*entry);
            }
        }

        let function_like = s.kind.is_function_like();
        let needs_dictionary = s.flags.needs_dictionary;
        let mut slots: FxHashMap<VariableId, u32> = FxHashMap::default();
        if function_like && !needs_dictionary {
            for variable in s.variables() {
                let v = tree.variable(variable);
                if v.scope == scope && !v.is_global() && !closure.contains(&ClosureEntry::Cell(variable)) {
                    slots.insert(variable, slots.len() as u32);
                }
            }
        }

        let references: Vec<_> = s
            .references()
            .map(|r| {
                let r = tree.reference(r);
                (r.name.clone(), r.variable)
            })
            .collect();
        let mut storage = FxHashMap::default();
        for (name, variable) in references {
            let resolved = match variable {
                None => Storage::Name,
                Some(variable) => {
                    let v = tree.variable(variable);
                    if v.is_global() {
                        Storage::Global(tree.global_slot(&name))
                    } else if v.scope == scope {
                        if !function_like {
                            Storage::Name
                        } else if needs_dictionary {
                            Storage::Dictionary
                        } else if let Some(index) = position(&closure, ClosureEntry::Cell(variable)) {
                            Storage::Cell(index)
                        } else {
                            Storage::Local(slots[&variable])
                        }
                    } else {
                        let owner = tree.scope(v.scope);
                        if owner.kind.is_function_like() && owner.flags.needs_dictionary {
                            match position(&closure, ClosureEntry::Namespace(v.scope)) {
                                Some(index) => Storage::FreeDictionary(index),
                                None => panic!("namespace of '{}' missing from closure", owner.name),
                            }
                        } else {
                            match position(&closure, ClosureEntry::Cell(variable)) {
                                Some(index) => Storage::Free(index),
                                None => panic!("free variable '{name}' missing from closure"),
                            }
                        }
                    }
                }
            };
            tracing::debug!(scope = %tree.scope(scope).name, %name, storage = %resolved, "storage classified");
            storage.insert(name, resolved);
        }

        let s = tree.scope_mut(scope);
        s.local_count = slots.len() as u32;
        s.closure = closure;
        s.closure_map = closure_map;
        s.storage = storage;
    }
}

fn position(closure: &[ClosureEntry], entry: ClosureEntry) -> Option<u32> {
    closure.iter().position(|e| *e == entry).map(|i| i as u32)
}
