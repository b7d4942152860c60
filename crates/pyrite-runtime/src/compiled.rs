//! The compiled tier: a lowered tree turned into nested closures once and
//! reused for every later invocation.
//!
//! Nodes a suspended generator can resume into consult [`Frame::seek`] on
//! entry and skip straight to the child on the resumption path.

use std::sync::Arc;

use pyrite_lang::{
    ExpressionCompiler,
    ir::{self, ArgKind, Expr, TempId, TryRegion},
};
use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::{
    call,
    error::Unwind,
    frame::Frame,
    ops,
    value::{Args, Value},
};

type Node = Box<dyn Fn(&mut Frame) -> Result<Value, Unwind> + Send + Sync>;

pub struct Delegate {
    root: Node,
    nodes: usize,
}

impl Delegate {
    pub fn run(&self, frame: &mut Frame) -> Result<Value, Unwind> {
        (self.root)(frame)
    }

    /// Size of the tree the delegate was built from.
    pub fn nodes(&self) -> usize {
        self.nodes
    }
}

/// Compiles lowered trees into [`Delegate`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosureCompiler;

impl ExpressionCompiler for ClosureCompiler {
    type Delegate = Delegate;

    fn compile(&self, expr: &ir::Expr) -> Delegate {
        Delegate {
            root: compile(expr),
            nodes: expr.size(),
        }
    }
}

fn compile(expr: &Expr) -> Node {
    match expr {
        Expr::Constant(c) => {
            let c = c.clone();
            Box::new(move |_| Ok(Value::from_constant(&c)))
        }
        Expr::Load { var, guarded } => {
            let (var, guarded) = (var.clone(), *guarded);
            Box::new(move |f| f.load(&var, guarded).map_err(|e| f.failed(e)))
        }
        Expr::Store { var, value } => {
            let var = var.clone();
            let value = compile(value);
            Box::new(move |f| {
                f.seek();
                let v = value(f)?;
                f.store(&var, v).map_err(|e| f.failed(e))?;
                Ok(Value::None)
            })
        }
        Expr::Delete { var, checked } => {
            let (var, checked) = (var.clone(), *checked);
            Box::new(move |f| {
                f.delete(&var, checked).map_err(|e| f.failed(e))?;
                Ok(Value::None)
            })
        }
        Expr::Temp(temp) => {
            let temp = *temp;
            Box::new(move |f| f.temp(temp))
        }
        Expr::SetTemp { temp, value } => {
            let temp = *temp;
            let value = compile(value);
            Box::new(move |f| {
                f.seek();
                let v = value(f)?;
                f.set_temp(temp, v);
                Ok(Value::None)
            })
        }
        Expr::Op { op, args } => {
            let op = op.clone();
            let args: Vec<Node> = args.iter().map(compile).collect();
            Box::new(move |f| {
                let mut values = SmallVec::<[Value; 4]>::with_capacity(args.len());
                for arg in &args {
                    values.push(arg(f)?);
                }
                ops::apply(f, &op, values).map_err(|e| f.failed(e))
            })
        }
        Expr::Call { callee, args } => compile_call(callee, args),
        Expr::Block(items) => {
            let items: Vec<Node> = items.iter().map(compile).collect();
            Box::new(move |f| {
                let start = f.seek().unwrap_or(0) as usize;
                let mut last = Value::None;
                for item in items.iter().skip(start) {
                    last = item(f)?;
                }
                Ok(last)
            })
        }
        Expr::If { test, then, orelse } => {
            let (test, then, orelse) = (compile(test), compile(then), compile(orelse));
            Box::new(move |f| match f.seek() {
                Some(1) => then(f),
                Some(2) => orelse(f),
                _ => {
                    let condition = test(f)?;
                    if ops::truthy(f, &condition)? { then(f) } else { orelse(f) }
                }
            })
        }
        Expr::Loop {
            body,
            break_label,
            continue_label,
        } => {
            let (body, break_label, continue_label) = (compile(body), *break_label, *continue_label);
            Box::new(move |f| {
                f.seek();
                loop {
                    match body(f) {
                        Ok(_) => {}
                        Err(Unwind::Break(label)) if label == break_label => return Ok(Value::None),
                        Err(Unwind::Continue(label)) if label == continue_label => {}
                        Err(e) => return Err(e),
                    }
                }
            })
        }
        Expr::Labeled { label, body } => {
            let (label, body) = (*label, compile(body));
            Box::new(move |f| {
                f.seek();
                match body(f) {
                    Err(Unwind::Break(exit)) if exit == label => Ok(Value::None),
                    result => result,
                }
            })
        }
        Expr::Break(label) => {
            let label = *label;
            Box::new(move |_| Err(Unwind::Break(label)))
        }
        Expr::Continue(label) => {
            let label = *label;
            Box::new(move |_| Err(Unwind::Continue(label)))
        }
        Expr::Return(value) | Expr::YieldBreak(value) => {
            let value = compile(value);
            Box::new(move |f| Err(Unwind::Return(value(f)?)))
        }
        Expr::Try(region) => compile_try(region),
        Expr::Throw(value) => {
            let value = compile(value);
            Box::new(move |f| {
                let exception = value(f)?;
                Err(f.failed(Unwind::Exception(exception)))
            })
        }
        Expr::Rethrow => Box::new(|f| Err(f.rethrow())),
        Expr::MakeFunction(spec) => {
            let code = Arc::clone(&spec.code);
            let defaults: Vec<Node> = spec.defaults.iter().map(compile).collect();
            let kw_defaults = named(&spec.kw_defaults);
            let annotations = named(&spec.annotations);
            Box::new(move |f| {
                let defaults = defaults.iter().map(|d| d(f)).collect::<Result<Vec<_>, _>>()?;
                let kw_defaults = eval_named(f, &kw_defaults)?;
                let annotations = eval_named(f, &annotations)?;
                call::make_function(f, &code, defaults, kw_defaults, annotations).map_err(|e| f.failed(e))
            })
        }
        Expr::MakeClass(spec) => {
            let (name, body, self_attrs) = (spec.name.clone(), Arc::clone(&spec.body), spec.self_attrs.clone());
            let bases: Vec<Node> = spec.bases.iter().map(compile).collect();
            Box::new(move |f| {
                let bases = bases.iter().map(|b| b(f)).collect::<Result<Vec<_>, _>>()?;
                call::make_class(f, &name, &body, bases, &self_attrs).map_err(|e| f.failed(e))
            })
        }
        Expr::Yield { id, value } => {
            let (id, value) = (*id, compile(value));
            Box::new(move |f| {
                if f.resumed_at(id) {
                    return Ok(f.sent.take().unwrap_or_default());
                }
                let value = value(f)?;
                Err(Unwind::Suspend { id, value })
            })
        }
        Expr::GeneratorCheck => Box::new(|f| match f.injected.take() {
            Some(exception) => Err(f.failed(Unwind::Exception(exception))),
            None => Ok(Value::None),
        }),
        Expr::SetLine(line) => {
            let line = *line;
            Box::new(move |f| {
                f.line = line;
                Ok(Value::None)
            })
        }
        Expr::LineFlag(flag) => {
            let flag = *flag;
            Box::new(move |f| {
                f.line_flag(flag);
                Ok(Value::None)
            })
        }
    }
}

fn named(items: &[(SmolStr, Expr)]) -> Vec<(SmolStr, Node)> {
    items.iter().map(|(name, e)| (name.clone(), compile(e))).collect()
}

fn eval_named(frame: &mut Frame, items: &[(SmolStr, Node)]) -> Result<Vec<(SmolStr, Value)>, Unwind> {
    let mut out = Vec::with_capacity(items.len());
    for (name, node) in items {
        out.push((name.clone(), node(frame)?));
    }
    Ok(out)
}

fn compile_call(callee: &Expr, args: &[ir::CallArg]) -> Node {
    let callee = compile(callee);
    let kinds: Vec<ArgKind> = args.iter().map(|a| a.kind.clone()).collect();
    let values: Vec<Node> = args.iter().map(|a| compile(&a.value)).collect();
    let positional_only = kinds.iter().all(|k| *k == ArgKind::Positional);
    Box::new(move |f| {
        let target = callee(f)?;
        let mut evaluated = Vec::with_capacity(values.len());
        for value in &values {
            evaluated.push(value(f)?);
        }
        let args = if positional_only {
            Args::positional(evaluated)
        } else {
            call::collect_args(f, kinds.iter().zip(evaluated)).map_err(|e| f.failed(e))?
        };
        call::call(f, &target, args)
    })
}

/// Exceptions leaving the body are recorded at the failing line before the
/// handler or `finally` runs. A suspension inside the region leaves it
/// without running `finally`; the outcome parked for a `finally` survives
/// suspensions inside that `finally`.
fn compile_try(region: &TryRegion) -> Node {
    let id = region.id;
    let body = compile(&region.body);
    let handler: Option<(TempId, Node)> = region.handler.as_ref().map(|h| (h.exception, compile(&h.body)));
    let finally = region.finally.as_ref().map(compile);
    Box::new(move |f| {
        let outcome = match f.seek() {
            Some(2) => None,
            Some(1) => handler.as_ref().map(|(temp, handler)| run_handler(f, *temp, handler)),
            _ => {
                let result = body(f);
                Some(match (result, &handler) {
                    (Err(Unwind::Exception(exception)), Some((temp, handler))) => {
                        f.record_traceback(&exception);
                        f.set_temp(*temp, exception);
                        run_handler(f, *temp, handler)
                    }
                    (result, _) => result,
                })
            }
        };

        let Some(finally) = &finally else {
            return outcome.unwrap_or(Ok(Value::None));
        };
        if let Some(outcome) = outcome {
            if matches!(outcome, Err(Unwind::Suspend { .. })) {
                return outcome;
            }
            if let Err(Unwind::Exception(exception)) = &outcome {
                f.record_traceback(exception);
            }
            f.pending.insert(id, outcome);
        }
        match finally(f) {
            Ok(_) => f.pending.remove(&id).unwrap_or(Ok(Value::None)),
            Err(suspend @ Unwind::Suspend { .. }) => Err(suspend),
            Err(e) => {
                f.pending.remove(&id);
                Err(e)
            }
        }
    })
}

fn run_handler(frame: &mut Frame, temp: TempId, handler: &Node) -> Result<Value, Unwind> {
    let exception = frame.temp(temp)?;
    frame.handling.push(exception);
    let result = handler(frame);
    frame.handling.pop();
    result
}

#[cfg(test)]
mod tests {
    use pyrite_lang::ExpressionCompiler;

    use super::*;

    #[test]
    fn test_delegate_reports_tree_size() {
        let expr = Expr::Block(vec![Expr::none(), Expr::temp(0)]);
        let delegate = ClosureCompiler.compile(&expr);
        assert_eq!(delegate.nodes(), 3);
    }
}
