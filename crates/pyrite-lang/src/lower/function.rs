use smol_str::SmolStr;

use super::Lowerer;
use crate::{
    ast::{
        ClassDef, Expr, ExprKind, FunctionDef, NodeId, Parameters, Stmt, StmtKind, docstring,
        walk::{self, Visitor},
    },
    constant::Constant,
    ir::{self, ClassSpec, FunctionSpec, TempId},
    range::Span,
};

impl Lowerer<'_, '_> {
    pub(super) fn function_def(&mut self, node: NodeId, def: &FunctionDef, span: Span) -> ir::Expr {
        let decorators = self.decorators(&def.decorators);
        let (defaults, kw_defaults, mut annotations) = self.parameter_values(&def.params);
        if let Some(returns) = &def.returns {
            annotations.push((SmolStr::new_static("return"), self.expr(returns)));
        }

        let code = {
            let mut inner = self.nested(node);
            let mut body = inner.function_prologue();
            body.extend(inner.body(&def.body));
            body.push(inner.implicit_return());
            inner.build_code(
                def.name.clone(),
                Some(&def.params),
                docstring(&def.body).cloned(),
                span,
                ir::Expr::Block(body),
            )
        };

        let function = ir::Expr::MakeFunction(Box::new(FunctionSpec {
            code,
            defaults,
            kw_defaults,
            annotations,
        }));
        let value = self.decorate(decorators, function);
        ir::Expr::store(self.var(&def.name), value)
    }

    pub(super) fn lambda(&mut self, expr: &Expr, params: &Parameters, body: &Expr) -> ir::Expr {
        let (defaults, kw_defaults, annotations) = self.parameter_values(params);
        let code = {
            let mut inner = self.nested(expr.id);
            let mut items = inner.function_prologue();
            let value = inner.expr(body);
            items.push(if inner.generator {
                ir::Expr::YieldBreak(Box::new(value))
            } else {
                ir::Expr::Return(Box::new(value))
            });
            inner.build_code(
                SmolStr::new_static("<lambda>"),
                Some(params),
                None,
                expr.span,
                ir::Expr::Block(items),
            )
        };
        ir::Expr::MakeFunction(Box::new(FunctionSpec {
            code,
            defaults,
            kw_defaults,
            annotations,
        }))
    }

    pub(super) fn class_def(&mut self, node: NodeId, class: &ClassDef, span: Span) -> ir::Expr {
        let decorators = self.decorators(&class.decorators);
        let bases = class.bases.iter().map(|b| self.expr(b)).collect();

        let body = {
            let mut inner = self.nested(node);
            let mut items = vec![ir::Expr::store(
                inner.var_or_name("__module__"),
                inner.builtin("__name__"),
            )];
            if let Some(doc) = docstring(&class.body) {
                items.push(ir::Expr::store(
                    inner.var_or_name("__doc__"),
                    ir::Expr::Constant(Constant::Str(doc.clone())),
                ));
            }
            items.extend(inner.body(&class.body));
            items.push(ir::Expr::none());
            inner.build_code(
                class.name.clone(),
                None,
                docstring(&class.body).cloned(),
                span,
                ir::Expr::Block(items),
            )
        };
        self.shared.class_bodies.push(body.clone());

        let class_value = ir::Expr::MakeClass(Box::new(ClassSpec {
            name: class.name.clone(),
            bases,
            body,
            self_attrs: self_attributes(class),
        }));
        let value = self.decorate(decorators, class_value);
        ir::Expr::store(self.var(&class.name), value)
    }

    /// Decorator expressions are evaluated top to bottom before the
    /// definition, then applied innermost first.
    fn decorators(&mut self, decorators: &[Expr]) -> Vec<(TempId, ir::Expr)> {
        decorators
            .iter()
            .map(|d| (self.new_temp(), self.expr(d)))
            .collect()
    }

    fn decorate(&mut self, decorators: Vec<(TempId, ir::Expr)>, value: ir::Expr) -> ir::Expr {
        if decorators.is_empty() {
            return value;
        }
        let decorated = decorators
            .iter()
            .rev()
            .fold(value, |value, (temp, _)| ir::Expr::call(ir::Expr::temp(*temp), vec![value]));
        let mut items: Vec<_> = decorators
            .into_iter()
            .map(|(temp, decorator)| ir::Expr::set_temp(temp, decorator))
            .collect();
        items.push(decorated);
        ir::Expr::Block(items)
    }

    /// Positional defaults, keyword-only defaults and annotations, all
    /// evaluated in the defining scope.
    #[allow(clippy::type_complexity)]
    fn parameter_values(
        &mut self,
        params: &Parameters,
    ) -> (Vec<ir::Expr>, Vec<(SmolStr, ir::Expr)>, Vec<(SmolStr, ir::Expr)>) {
        let defaults = params
            .args
            .iter()
            .filter_map(|p| p.default.as_ref())
            .map(|d| self.expr(d))
            .collect();
        let kw_defaults = params
            .kwonly
            .iter()
            .filter_map(|p| p.default.as_ref().map(|d| (p.name.clone(), d)))
            .map(|(name, d)| (name, self.expr(d)))
            .collect();
        let annotations = params
            .iter()
            .filter_map(|p| p.annotation.as_ref().map(|a| (p.name.clone(), a)))
            .map(|(name, a)| (name, self.expr(a)))
            .collect();
        (defaults, kw_defaults, annotations)
    }
}

/// Attribute names assigned through the first parameter of `__init__`,
/// deduplicated in first-seen order.
pub(super) fn self_attributes(class: &ClassDef) -> Vec<SmolStr> {
    let init = class.body.iter().find_map(|stmt| match &stmt.kind {
        StmtKind::FunctionDef(def) if def.name == "__init__" => Some(def),
        _ => None,
    });
    let Some(init) = init else {
        return Vec::new();
    };
    let Some(receiver) = init.params.first() else {
        return Vec::new();
    };

    let mut collector = SelfAttributes {
        receiver: &receiver.name,
        names: Vec::new(),
    };
    walk::walk_body(&mut collector, &init.body);
    collector.names
}

struct SelfAttributes<'a> {
    receiver: &'a SmolStr,
    names: Vec<SmolStr>,
}

impl SelfAttributes<'_> {
    fn target(&mut self, target: &Expr) {
        match &target.kind {
            ExprKind::Attribute { value, attr } if value.as_name() == Some(self.receiver) => {
                if !self.names.contains(attr) {
                    self.names.push(attr.clone());
                }
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                for item in items {
                    self.target(item);
                }
            }
            ExprKind::Starred(inner) => self.target(inner),
            _ => {}
        }
    }
}

impl Visitor for SelfAttributes<'_> {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            // Nested scopes have their own receiver.
            StmtKind::FunctionDef(_) | StmtKind::ClassDef(_) => return,
            StmtKind::Assign { targets, .. } => {
                for target in targets {
                    self.target(target);
                }
            }
            StmtKind::AugAssign { target, .. } => self.target(target),
            _ => {}
        }
        walk::walk_stmt(self, stmt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, build::*};

    fn class_with_init(body: Vec<Stmt>) -> ClassDef {
        match class("C", vec![], vec![def("__init__", params(&["self", "a"]), body)]).kind {
            StmtKind::ClassDef(class) => *class,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_self_attributes_in_first_seen_order() {
        let class = class_with_init(vec![
            assign(vec![attr(name("self"), "x")], int(1)),
            assign(
                vec![tuple(vec![attr(name("self"), "y"), attr(name("self"), "x")])],
                name("a"),
            ),
            if_(
                name("a"),
                vec![aug_assign(attr(name("self"), "z"), BinaryOp::Add, int(1))],
                vec![],
            ),
            assign(vec![attr(name("other"), "w")], int(2)),
            def("helper", params(&["self"]), vec![assign(vec![attr(name("self"), "v")], int(3))]),
        ]);
        assert_eq!(self_attributes(&class), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_self_attributes_without_init() {
        let class = match class("C", vec![], vec![pass()]).kind {
            StmtKind::ClassDef(class) => *class,
            _ => unreachable!(),
        };
        assert!(self_attributes(&class).is_empty());
    }
}
