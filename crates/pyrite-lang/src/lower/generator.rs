//! Generator bodies are rewritten so every `Yield` sits at a position a
//! resumed frame can seek back into: a chain of blocks, branches, loops,
//! try regions and stores from the root.

use std::mem;

use crate::ir::{Expr, TempId};

/// Hoists operands evaluated before a nested `Yield` into temporaries so
/// the `Yield` itself ends up on a resumable path.
///
/// `(call f (yield#0 x))` becomes
/// `(block (= $t f) (= $u (yield#0 x)) (call $t $u))`.
pub(super) fn spill(mut expr: Expr, temps: &mut TempId) -> Expr {
    if !expr.contains_yield() {
        return expr;
    }
    if expr.resumable_children().is_some() {
        for child in expr.children_mut() {
            let taken = mem::replace(child, Expr::none());
            *child = spill(taken, temps);
        }
        return expr;
    }

    let mut prelude = Vec::new();
    {
        let children = expr.children_mut();
        let last = children.iter().rposition(|c| c.contains_yield());
        if let Some(last) = last {
            for child in children.into_iter().take(last + 1) {
                let temp = *temps;
                *temps += 1;
                let taken = mem::replace(child, Expr::temp(temp));
                prelude.push(Expr::set_temp(temp, spill(taken, temps)));
            }
        }
    }
    if prelude.is_empty() {
        // A `Yield` whose value is yield-free.
        return expr;
    }
    prelude.push(expr);
    Expr::Block(prelude)
}

/// Path of child steps from the root to each `Yield`, indexed by yield id.
///
/// # Panics
///
/// When a `Yield` is nested under a node that cannot be resumed into; run
/// [`spill`] first.
pub fn resumption_table(body: &Expr) -> Vec<Vec<u32>> {
    let mut table = Vec::new();
    let mut path = Vec::new();
    collect(body, &mut path, &mut table);
    table
}

fn collect(expr: &Expr, path: &mut Vec<u32>, table: &mut Vec<Vec<u32>>) {
    if let Expr::Yield { id, value } = expr {
        assert!(!value.contains_yield(), "yield at non-resumable position");
        let id = *id as usize;
        if table.len() <= id {
            table.resize(id + 1, Vec::new());
        }
        table[id] = path.clone();
        return;
    }
    match expr.resumable_children() {
        Some(children) => {
            for (step, child) in children {
                path.push(step);
                collect(child, path, table);
                path.pop();
            }
        }
        None => assert!(!expr.contains_yield(), "yield at non-resumable position"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{RuntimeOp, TryRegion};

    fn yield_(id: u32, value: Expr) -> Expr {
        Expr::Yield {
            id,
            value: Box::new(value),
        }
    }

    #[test]
    fn test_spill_call_arguments() {
        let mut temps = 3;
        let expr = Expr::call(Expr::temp(0), vec![yield_(0, Expr::none()), Expr::temp(1)]);
        let spilled = spill(expr, &mut temps);
        assert_eq!(
            spilled.to_string(),
            "(block (= $3 $0) (= $4 (yield#0 None)) (call $3 $4 $1))"
        );
        assert_eq!(temps, 5);
        assert_eq!(resumption_table(&spilled), vec![vec![1, 0]]);
    }

    #[test]
    fn test_spill_nested_yield_value() {
        let mut temps = 0;
        let expr = yield_(1, Expr::op(RuntimeOp::Not, vec![yield_(0, Expr::none())]));
        let spilled = spill(expr, &mut temps);
        assert_eq!(
            spilled.to_string(),
            "(block (= $0 (block (= $1 (yield#0 None)) (not $1))) (yield#1 $0))"
        );
        assert_eq!(resumption_table(&spilled), vec![vec![0, 0, 0, 0], vec![1]]);
    }

    #[test]
    fn test_resumable_paths_through_try_and_loop() {
        let body = Expr::Block(vec![
            Expr::set_temp(0, Expr::none()),
            Expr::Try(Box::new(TryRegion {
                id: 0,
                body: Expr::Loop {
                    body: Box::new(Expr::if_(
                        Expr::temp(0),
                        Expr::set_temp(1, yield_(0, Expr::temp(0))),
                        Expr::Break(0),
                    )),
                    break_label: 0,
                    continue_label: 1,
                },
                handler: None,
                finally: Some(yield_(1, Expr::none())),
            })),
        ]);
        let spilled = spill(body.clone(), &mut 2);
        assert_eq!(spilled, body);
        assert_eq!(
            resumption_table(&spilled),
            vec![vec![1, 0, 0, 1, 0], vec![1, 2]]
        );
    }

    #[test]
    #[should_panic(expected = "yield at non-resumable position")]
    fn test_unspilled_yield_panics() {
        resumption_table(&Expr::Return(Box::new(yield_(0, Expr::none()))));
    }
}
