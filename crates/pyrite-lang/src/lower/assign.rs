use super::Lowerer;
use crate::{
    ast::{BinaryOp, Expr, ExprKind},
    constant::Constant,
    ir::{self, RuntimeOp},
};

/// How a subscript addresses its container.
enum Index {
    Item(ir::Expr),
    Slice([ir::Expr; 3]),
    /// Comma-separated subscript.
    Multi(Vec<ir::Expr>),
}

impl Index {
    fn operands(self) -> Vec<ir::Expr> {
        match self {
            Index::Item(index) => vec![index],
            Index::Slice(bounds) => bounds.into(),
            Index::Multi(items) => items,
        }
    }

    fn ops(&self) -> (RuntimeOp, RuntimeOp, RuntimeOp) {
        match self {
            Index::Item(_) => (RuntimeOp::GetItem, RuntimeOp::SetItem, RuntimeOp::DelItem),
            Index::Slice(_) => (RuntimeOp::GetSlice, RuntimeOp::SetSlice, RuntimeOp::DelSlice),
            Index::Multi(items) => {
                let n = items.len() as u32;
                (RuntimeOp::GetIndex(n), RuntimeOp::SetIndex(n), RuntimeOp::DelIndex(n))
            }
        }
    }
}

fn has_starred(items: &[Expr]) -> bool {
    items.iter().any(|e| matches!(e.kind, ExprKind::Starred(_)))
}

fn sequence(expr: &Expr) -> Option<&[Expr]> {
    match &expr.kind {
        ExprKind::Tuple(items) | ExprKind::List(items) => Some(items),
        _ => None,
    }
}

impl Lowerer<'_, '_> {
    pub(super) fn assign(&mut self, targets: &[Expr], value: &Expr) -> ir::Expr {
        match targets {
            [target] => {
                if let (Some(left), Some(right)) = (sequence(target), sequence(value))
                    && left.len() == right.len()
                    && !has_starred(left)
                    && !has_starred(right)
                {
                    return self.pairwise_assign(left, right);
                }
                let value = self.expr(value);
                self.store_target(target, value)
            }
            _ => {
                // a = b = value: evaluate once, store left to right.
                let temp = self.new_temp();
                let mut items = vec![ir::Expr::set_temp(temp, self.expr(value))];
                for target in targets {
                    items.push(self.store_target(target, ir::Expr::temp(temp)));
                }
                ir::Expr::Block(items)
            }
        }
    }

    /// `a, b = x, y`: every right-hand item is evaluated before any store.
    fn pairwise_assign(&mut self, targets: &[Expr], values: &[Expr]) -> ir::Expr {
        let temps: Vec<_> = values.iter().map(|_| self.new_temp()).collect();
        let mut items: Vec<_> = values
            .iter()
            .zip(&temps)
            .map(|(value, temp)| ir::Expr::set_temp(*temp, self.expr(value)))
            .collect();
        for (target, temp) in targets.iter().zip(&temps) {
            items.push(self.store_target(target, ir::Expr::temp(*temp)));
        }
        ir::Expr::Block(items)
    }

    /// Stores an already lowered value into `target`.
    pub(super) fn store_target(&mut self, target: &Expr, value: ir::Expr) -> ir::Expr {
        match &target.kind {
            ExprKind::Name(name) => ir::Expr::store(self.var(name), value),
            ExprKind::Attribute { value: object, attr } => {
                let (prelude, value) = self.spill_value(value);
                let object = self.expr(object);
                with_prelude(
                    prelude,
                    ir::Expr::op(RuntimeOp::SetAttr(attr.clone()), vec![object, value]),
                )
            }
            ExprKind::Subscript { value: object, index } => {
                let (prelude, value) = self.spill_value(value);
                let object = self.expr(object);
                let index = self.index(index);
                let (_, set, _) = index.ops();
                let mut operands = vec![object];
                operands.extend(index.operands());
                operands.push(value);
                with_prelude(prelude, ir::Expr::op(set, operands))
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => self.unpack(items, value),
            ExprKind::Starred(inner) => self.store_target(inner, value),
            _ => panic!("invalid assignment target reached lowering at {:?}", target.span),
        }
    }

    /// Moves a value with possible side effects into a temporary so it is
    /// evaluated before the target's own sub-expressions.
    fn spill_value(&mut self, value: ir::Expr) -> (Option<ir::Expr>, ir::Expr) {
        match value {
            ir::Expr::Temp(_) | ir::Expr::Constant(_) => (None, value),
            value => {
                let temp = self.new_temp();
                (Some(ir::Expr::set_temp(temp, value)), ir::Expr::temp(temp))
            }
        }
    }

    fn unpack(&mut self, items: &[Expr], value: ir::Expr) -> ir::Expr {
        let count = items.len() as u32;
        let op = match items
            .iter()
            .position(|e| matches!(e.kind, ExprKind::Starred(_)))
        {
            Some(star) => RuntimeOp::UnpackStarred {
                before: star as u32,
                after: count - star as u32 - 1,
            },
            None => RuntimeOp::Unpack(count),
        };
        let temp = self.new_temp();
        let mut out = vec![ir::Expr::set_temp(temp, ir::Expr::op(op, vec![value]))];
        for (i, item) in items.iter().enumerate() {
            let element = ir::Expr::op(
                RuntimeOp::GetItem,
                vec![ir::Expr::temp(temp), ir::Expr::Constant(Constant::Int(i as i64))],
            );
            out.push(self.store_target(item, element));
        }
        ir::Expr::Block(out)
    }

    fn index(&mut self, index: &Expr) -> Index {
        match &index.kind {
            ExprKind::Slice { lower, upper, step } => {
                let mut bound = |b: &Option<Box<Expr>>| match b {
                    Some(b) => self.expr(b),
                    None => ir::Expr::Constant(Constant::Missing),
                };
                Index::Slice([bound(lower), bound(upper), bound(step)])
            }
            ExprKind::Tuple(items) if !items.is_empty() => {
                Index::Multi(items.iter().map(|i| self.expr(i)).collect())
            }
            _ => Index::Item(self.expr(index)),
        }
    }

    pub(super) fn subscript(&mut self, object: &Expr, index: &Expr) -> ir::Expr {
        let object = self.expr(object);
        let index = self.index(index);
        let (get, _, _) = index.ops();
        let mut operands = vec![object];
        operands.extend(index.operands());
        ir::Expr::op(get, operands)
    }

    /// `target op= value` with the container and index evaluated once.
    pub(super) fn aug_assign(&mut self, target: &Expr, op: BinaryOp, value: &Expr) -> ir::Expr {
        let combine = |current: ir::Expr, value: ir::Expr| {
            ir::Expr::op(RuntimeOp::InPlace(op), vec![current, value])
        };
        match &target.kind {
            ExprKind::Name(name) => {
                let current = ir::Expr::Load {
                    var: self.var(name),
                    guarded: self.bindings().is_guarded(target.id),
                };
                let value = self.expr(value);
                ir::Expr::store(self.var(name), combine(current, value))
            }
            ExprKind::Attribute { value: object, attr } => {
                let temp = self.new_temp();
                let object = self.expr(object);
                let value = self.expr(value);
                ir::Expr::Block(vec![
                    ir::Expr::set_temp(temp, object),
                    ir::Expr::op(
                        RuntimeOp::SetAttr(attr.clone()),
                        vec![
                            ir::Expr::temp(temp),
                            combine(
                                ir::Expr::op(RuntimeOp::GetAttr(attr.clone()), vec![ir::Expr::temp(temp)]),
                                value,
                            ),
                        ],
                    ),
                ])
            }
            ExprKind::Subscript { value: object, index } => {
                let object = self.expr(object);
                let index = self.index(index);
                let (get, set, _) = index.ops();

                let mut items = Vec::new();
                let mut operands = Vec::new();
                for operand in std::iter::once(object).chain(index.operands()) {
                    let temp = self.new_temp();
                    items.push(ir::Expr::set_temp(temp, operand));
                    operands.push(ir::Expr::temp(temp));
                }
                let value = self.expr(value);
                let current = ir::Expr::op(get, operands.clone());
                operands.push(combine(current, value));
                items.push(ir::Expr::op(set, operands));
                ir::Expr::Block(items)
            }
            _ => panic!("invalid augmented assignment target reached lowering at {:?}", target.span),
        }
    }

    pub(super) fn delete_target(&mut self, target: &Expr) -> ir::Expr {
        match &target.kind {
            ExprKind::Name(name) => ir::Expr::Delete {
                var: self.var(name),
                checked: true,
            },
            ExprKind::Attribute { value, attr } => {
                ir::Expr::op(RuntimeOp::DelAttr(attr.clone()), vec![self.expr(value)])
            }
            ExprKind::Subscript { value, index } => {
                let object = self.expr(value);
                let index = self.index(index);
                let (_, _, del) = index.ops();
                let mut operands = vec![object];
                operands.extend(index.operands());
                ir::Expr::op(del, operands)
            }
            ExprKind::Tuple(items) | ExprKind::List(items) => {
                ir::Expr::Block(items.iter().map(|item| self.delete_target(item)).collect())
            }
            _ => panic!("invalid delete target reached lowering at {:?}", target.span),
        }
    }
}

fn with_prelude(prelude: Option<ir::Expr>, expr: ir::Expr) -> ir::Expr {
    match prelude {
        Some(prelude) => ir::Expr::Block(vec![prelude, expr]),
        None => expr,
    }
}
