//! Read-only traversal over the AST.
//!
//! Implementors override the `visit_*` hooks they care about and call the
//! matching `walk_*` function to keep descending.

use super::node::{Comprehension, Expr, ExprKind, Parameters, Stmt, StmtKind};

pub trait Visitor {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    fn visit_parameters(&mut self, params: &Parameters) {
        walk_parameters(self, params);
    }
}

pub fn walk_body<V: Visitor + ?Sized>(visitor: &mut V, body: &[Stmt]) {
    for stmt in body {
        visitor.visit_stmt(stmt);
    }
}

pub fn walk_parameters<V: Visitor + ?Sized>(visitor: &mut V, params: &Parameters) {
    for param in params.iter() {
        if let Some(default) = &param.default {
            visitor.visit_expr(default);
        }
        if let Some(annotation) = &param.annotation {
            visitor.visit_expr(annotation);
        }
    }
}

fn walk_comprehensions<V: Visitor + ?Sized>(visitor: &mut V, generators: &[Comprehension]) {
    for generator in generators {
        visitor.visit_expr(&generator.iter);
        visitor.visit_expr(&generator.target);
        for cond in &generator.ifs {
            visitor.visit_expr(cond);
        }
    }
}

pub fn walk_stmt<V: Visitor + ?Sized>(visitor: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::Expr(e) => visitor.visit_expr(e),
        StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue
        | StmtKind::Global(_)
        | StmtKind::Nonlocal(_)
        | StmtKind::Import(_)
        | StmtKind::ImportFrom { .. } => {}
        StmtKind::Assign { targets, value } => {
            visitor.visit_expr(value);
            for target in targets {
                visitor.visit_expr(target);
            }
        }
        StmtKind::AugAssign { target, value, .. } => {
            visitor.visit_expr(target);
            visitor.visit_expr(value);
        }
        StmtKind::Del(targets) => {
            for target in targets {
                visitor.visit_expr(target);
            }
        }
        StmtKind::Return(value) => {
            if let Some(value) = value {
                visitor.visit_expr(value);
            }
        }
        StmtKind::If { test, body, orelse } | StmtKind::While { test, body, orelse } => {
            visitor.visit_expr(test);
            walk_body(visitor, body);
            walk_body(visitor, orelse);
        }
        StmtKind::For {
            target,
            iter,
            body,
            orelse,
        } => {
            visitor.visit_expr(iter);
            visitor.visit_expr(target);
            walk_body(visitor, body);
            walk_body(visitor, orelse);
        }
        StmtKind::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => {
            walk_body(visitor, body);
            for handler in handlers {
                if let Some(typ) = &handler.typ {
                    visitor.visit_expr(typ);
                }
                walk_body(visitor, &handler.body);
            }
            walk_body(visitor, orelse);
            walk_body(visitor, finalbody);
        }
        StmtKind::With { items, body } => {
            for item in items {
                visitor.visit_expr(&item.context);
                if let Some(target) = &item.target {
                    visitor.visit_expr(target);
                }
            }
            walk_body(visitor, body);
        }
        StmtKind::Raise { exc, cause } => {
            if let Some(exc) = exc {
                visitor.visit_expr(exc);
            }
            if let Some(cause) = cause {
                visitor.visit_expr(cause);
            }
        }
        StmtKind::Assert { test, msg } => {
            visitor.visit_expr(test);
            if let Some(msg) = msg {
                visitor.visit_expr(msg);
            }
        }
        StmtKind::FunctionDef(def) => {
            for decorator in &def.decorators {
                visitor.visit_expr(decorator);
            }
            visitor.visit_parameters(&def.params);
            if let Some(returns) = &def.returns {
                visitor.visit_expr(returns);
            }
            walk_body(visitor, &def.body);
        }
        StmtKind::ClassDef(def) => {
            for decorator in &def.decorators {
                visitor.visit_expr(decorator);
            }
            for base in &def.bases {
                visitor.visit_expr(base);
            }
            walk_body(visitor, &def.body);
        }
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Constant(_) | ExprKind::Name(_) => {}
        ExprKind::Attribute { value, .. } | ExprKind::Starred(value) => visitor.visit_expr(value),
        ExprKind::Subscript { value, index } => {
            visitor.visit_expr(value);
            visitor.visit_expr(index);
        }
        ExprKind::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                visitor.visit_expr(part);
            }
        }
        ExprKind::Tuple(items)
        | ExprKind::List(items)
        | ExprKind::Set(items)
        | ExprKind::JoinedStr(items) => {
            for item in items {
                visitor.visit_expr(item);
            }
        }
        ExprKind::Dict(entries) => {
            for (key, value) in entries {
                visitor.visit_expr(key);
                visitor.visit_expr(value);
            }
        }
        ExprKind::Unary { operand, .. } => visitor.visit_expr(operand),
        ExprKind::Binary { left, right, .. } => {
            visitor.visit_expr(left);
            visitor.visit_expr(right);
        }
        ExprKind::BoolOp { values, .. } => {
            for value in values {
                visitor.visit_expr(value);
            }
        }
        ExprKind::Compare { left, comparisons } => {
            visitor.visit_expr(left);
            for (_, right) in comparisons {
                visitor.visit_expr(right);
            }
        }
        ExprKind::IfExp { test, body, orelse } => {
            visitor.visit_expr(test);
            visitor.visit_expr(body);
            visitor.visit_expr(orelse);
        }
        ExprKind::Call { func, args } => {
            visitor.visit_expr(func);
            for arg in args {
                visitor.visit_expr(arg.value());
            }
        }
        ExprKind::Lambda { params, body } => {
            visitor.visit_parameters(params);
            visitor.visit_expr(body);
        }
        ExprKind::ListComp { elt, generators }
        | ExprKind::SetComp { elt, generators }
        | ExprKind::GeneratorExp { elt, generators } => {
            walk_comprehensions(visitor, generators);
            visitor.visit_expr(elt);
        }
        ExprKind::DictComp {
            key,
            value,
            generators,
        } => {
            walk_comprehensions(visitor, generators);
            visitor.visit_expr(key);
            visitor.visit_expr(value);
        }
        ExprKind::Yield(value) => {
            if let Some(value) = value {
                visitor.visit_expr(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;

    #[derive(Default)]
    struct NameCollector(Vec<String>);

    impl Visitor for NameCollector {
        fn visit_expr(&mut self, expr: &Expr) {
            if let ExprKind::Name(name) = &expr.kind {
                self.0.push(name.to_string());
            }
            walk_expr(self, expr);
        }
    }

    #[test]
    fn test_walk_visits_in_evaluation_order() {
        let body = vec![
            assign(vec![name("a")], call(name("f"), vec![pos(name("b"))])),
            for_(name("i"), name("xs"), vec![expr_stmt(name("i"))], vec![]),
        ];
        let mut collector = NameCollector::default();
        walk_body(&mut collector, &body);
        assert_eq!(collector.0, vec!["f", "b", "a", "xs", "i", "i"]);
    }

    #[test]
    fn test_walk_descends_into_comprehensions() {
        let body = vec![expr_stmt(list_comp(
            name("x"),
            vec![comp_for(name("x"), name("outer"), vec![name("cond")])],
        ))];
        let mut collector = NameCollector::default();
        walk_body(&mut collector, &body);
        assert_eq!(collector.0, vec!["outer", "x", "cond", "x"]);
    }
}
