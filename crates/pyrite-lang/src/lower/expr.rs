use std::sync::Arc;

use super::{Lowerer, fold};
use crate::{
    ast::{Arg, BoolOp, CompareOp, Expr, ExprKind, UnaryOp},
    constant::Constant,
    ir::{self, ArgKind, CallArg, RuntimeOp},
};

impl Lowerer<'_, '_> {
    pub(super) fn expr(&mut self, expr: &Expr) -> ir::Expr {
        match &expr.kind {
            ExprKind::Constant(c) => ir::Expr::Constant(c.clone()),
            ExprKind::Name(name) => ir::Expr::Load {
                var: self.var(name),
                guarded: self.bindings().is_guarded(expr.id),
            },
            ExprKind::Attribute { value, attr } => {
                ir::Expr::op(RuntimeOp::GetAttr(attr.clone()), vec![self.expr(value)])
            }
            ExprKind::Subscript { value, index } => self.subscript(value, index),
            ExprKind::Slice { lower, upper, step } => {
                let mut bound = |b: &Option<Box<Expr>>| match b {
                    Some(b) => self.expr(b),
                    None => ir::Expr::none(),
                };
                let args = vec![bound(lower), bound(upper), bound(step)];
                ir::Expr::call(self.builtin("slice"), args)
            }
            ExprKind::Tuple(items) => {
                let items = self.exprs(items);
                match self.constants(&items) {
                    Some(folded) => ir::Expr::Constant(Constant::Tuple(folded)),
                    None => ir::Expr::op(RuntimeOp::BuildTuple, items),
                }
            }
            ExprKind::List(items) => {
                let items = self.exprs(items);
                match self.constants(&items) {
                    // A fresh list per evaluation; only the elements are shared.
                    Some(folded) if !folded.is_empty() => ir::Expr::op(
                        RuntimeOp::ListFromConstant,
                        vec![ir::Expr::Constant(Constant::Tuple(folded))],
                    ),
                    _ => ir::Expr::op(RuntimeOp::BuildList, items),
                }
            }
            ExprKind::Set(items) => ir::Expr::op(RuntimeOp::BuildSet, self.exprs(items)),
            ExprKind::Dict(entries) => {
                let mut args = Vec::with_capacity(entries.len() * 2);
                for (key, value) in entries {
                    args.push(self.expr(key));
                    args.push(self.expr(value));
                }
                ir::Expr::op(RuntimeOp::BuildDict, args)
            }
            ExprKind::Unary { op, operand } => {
                let operand = self.expr(operand);
                if self.options().optimize
                    && let Some(folded) = operand.as_constant().and_then(|c| fold::unary(*op, c))
                {
                    return ir::Expr::Constant(folded);
                }
                match op {
                    UnaryOp::Not => ir::Expr::op(RuntimeOp::Not, vec![operand]),
                    op => ir::Expr::op(RuntimeOp::Unary(*op), vec![operand]),
                }
            }
            ExprKind::Binary { op, left, right } => {
                let left = self.expr(left);
                let right = self.expr(right);
                if self.options().optimize
                    && let (Some(l), Some(r)) = (left.as_constant(), right.as_constant())
                    && let Some(folded) = fold::binary(*op, l, r)
                {
                    return ir::Expr::Constant(folded);
                }
                ir::Expr::op(RuntimeOp::Binary(*op), vec![left, right])
            }
            ExprKind::BoolOp { op, values } => self.bool_op(*op, values),
            ExprKind::Compare { left, comparisons } => {
                let left = self.expr(left);
                self.compare_chain(left, comparisons)
            }
            ExprKind::IfExp { test, body, orelse } => {
                if self.options().optimize
                    && let ExprKind::Constant(c) = &test.kind
                {
                    return if c.is_truthy() {
                        self.expr(body)
                    } else {
                        self.expr(orelse)
                    };
                }
                let test = ir::Expr::is_true(self.expr(test));
                ir::Expr::if_(test, self.expr(body), self.expr(orelse))
            }
            ExprKind::Call { func, args } => self.call(expr, func, args),
            ExprKind::Lambda { params, body } => self.lambda(expr, params, body),
            ExprKind::ListComp { .. }
            | ExprKind::SetComp { .. }
            | ExprKind::DictComp { .. }
            | ExprKind::GeneratorExp { .. } => self.comprehension(expr),
            ExprKind::Yield(value) => {
                let value = value.as_ref().map_or_else(ir::Expr::none, |v| self.expr(v));
                self.suspend(value)
            }
            ExprKind::Starred(_) => panic!("starred expression outside a target reached lowering"),
            ExprKind::JoinedStr(parts) => {
                ir::Expr::op(RuntimeOp::JoinStr(parts.len() as u32), self.exprs(parts))
            }
        }
    }

    fn exprs(&mut self, items: &[Expr]) -> Vec<ir::Expr> {
        items.iter().map(|item| self.expr(item)).collect()
    }

    /// Builtin looked up by name, bypassing any slot the binder assigned.
    pub(super) fn builtin(&self, name: &str) -> ir::Expr {
        ir::Expr::Load {
            var: ir::VarAccess::new(name, crate::scope::Storage::Name),
            guarded: false,
        }
    }

    /// Elements of a literal display made only of constants.
    fn constants(&self, items: &[ir::Expr]) -> Option<Arc<[Constant]>> {
        if !self.options().optimize {
            return None;
        }
        items
            .iter()
            .map(|item| item.as_constant().cloned())
            .collect::<Option<Vec<_>>>()
            .map(Arc::from)
    }

    /// Suspension point: `Yield`, then the injected-exception check, then
    /// the sent value.
    pub(super) fn suspend(&mut self, value: ir::Expr) -> ir::Expr {
        let id = self.new_yield();
        let sent = self.new_temp();
        ir::Expr::Block(vec![
            ir::Expr::set_temp(
                sent,
                ir::Expr::Yield {
                    id,
                    value: Box::new(value),
                },
            ),
            ir::Expr::GeneratorCheck,
            ir::Expr::temp(sent),
        ])
    }

    /// `a and b and c`: each operand evaluated at most once, the result is
    /// the first falsy operand or the last one.
    fn bool_op(&mut self, op: BoolOp, values: &[Expr]) -> ir::Expr {
        let Some((first, rest)) = values.split_first() else {
            return ir::Expr::none();
        };
        let first = self.expr(first);
        if rest.is_empty() {
            return first;
        }
        let temp = self.new_temp();
        let rest = self.bool_op(op, rest);
        let test = ir::Expr::is_true(ir::Expr::temp(temp));
        let branch = match op {
            BoolOp::And => ir::Expr::if_(test, rest, ir::Expr::temp(temp)),
            BoolOp::Or => ir::Expr::if_(test, ir::Expr::temp(temp), rest),
        };
        ir::Expr::Block(vec![ir::Expr::set_temp(temp, first), branch])
    }

    /// `a < b < c` as `a < b and b < c` with `b` evaluated once.
    fn compare_chain(&mut self, left: ir::Expr, comparisons: &[(CompareOp, Expr)]) -> ir::Expr {
        let Some(((op, right), rest)) = comparisons.split_first() else {
            return left;
        };
        let right = self.expr(right);
        if rest.is_empty() {
            return ir::Expr::op(RuntimeOp::Compare(*op), vec![left, right]);
        }

        let middle = self.new_temp();
        let result = self.new_temp();
        let first = ir::Expr::op(
            RuntimeOp::Compare(*op),
            vec![
                left,
                ir::Expr::Block(vec![ir::Expr::set_temp(middle, right), ir::Expr::temp(middle)]),
            ],
        );
        let rest = self.compare_chain(ir::Expr::temp(middle), rest);
        ir::Expr::Block(vec![
            ir::Expr::set_temp(result, first),
            ir::Expr::if_(
                ir::Expr::is_true(ir::Expr::temp(result)),
                rest,
                ir::Expr::temp(result),
            ),
        ])
    }

    fn call(&mut self, expr: &Expr, func: &Expr, args: &[Arg]) -> ir::Expr {
        let callee = self.expr(func);
        if self.bindings().is_super_call(expr.id) {
            return ir::Expr::call(callee, self.super_args());
        }

        let args = args
            .iter()
            .map(|arg| {
                let kind = match arg {
                    Arg::Positional(_) => ArgKind::Positional,
                    Arg::Star(_) => ArgKind::Star,
                    Arg::Keyword(name, _) => ArgKind::Keyword(name.clone()),
                    Arg::DoubleStar(_) => ArgKind::DoubleStar,
                };
                CallArg {
                    kind,
                    value: self.expr(arg.value()),
                }
            })
            .collect();
        ir::Expr::Call {
            callee: Box::new(callee),
            args,
        }
    }

    /// `super()` in a method becomes `super(__class__, <first parameter>)`.
    fn super_args(&self) -> Vec<ir::Expr> {
        let tree = &self.bindings().tree;
        let Some(&first) = tree.scope(self.scope).parameters.first() else {
            panic!("zero-argument super() recorded for a method without parameters");
        };
        let first = tree.variable(first).name.clone();
        vec![self.load("__class__"), self.load(&first)]
    }
}
