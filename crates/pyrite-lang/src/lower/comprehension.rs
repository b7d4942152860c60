use super::Lowerer;
use crate::{
    ast::{Comprehension, Expr, ExprKind, Param, Parameters},
    binder::COMPREHENSION_ARG,
    ir::{self, FunctionSpec, RuntimeOp, TempId},
};

/// What the innermost loop of a comprehension does with each element.
enum Produce<'e> {
    List(&'e Expr),
    Set(&'e Expr),
    Dict(&'e Expr, &'e Expr),
    Generator(&'e Expr),
}

impl Lowerer<'_, '_> {
    /// A comprehension is a call of an anonymous function of one argument:
    /// the outermost iterable, evaluated in the enclosing scope.
    pub(super) fn comprehension(&mut self, expr: &Expr) -> ir::Expr {
        let (produce, generators) = match &expr.kind {
            ExprKind::ListComp { elt, generators } => (Produce::List(elt), generators),
            ExprKind::SetComp { elt, generators } => (Produce::Set(elt), generators),
            ExprKind::DictComp {
                key,
                value,
                generators,
            } => (Produce::Dict(key, value), generators),
            ExprKind::GeneratorExp { elt, generators } => (Produce::Generator(elt), generators),
            _ => panic!("not a comprehension at {:?}", expr.span),
        };
        let Some(first) = generators.first() else {
            panic!("comprehension without a for clause reached lowering");
        };

        let outer = self.expr(&first.iter);
        let params = Parameters {
            args: vec![Param {
                name: COMPREHENSION_ARG.into(),
                span: first.iter.span,
                default: None,
                annotation: None,
            }],
            ..Parameters::default()
        };

        let code = {
            let mut inner = self.nested(expr.id);
            let name = inner.bindings().tree.scope(inner.scope).name.clone();
            let mut items = inner.function_prologue();
            let result = match produce {
                Produce::Generator(_) => None,
                Produce::List(_) => Some(RuntimeOp::BuildList),
                Produce::Set(_) => Some(RuntimeOp::BuildSet),
                Produce::Dict(..) => Some(RuntimeOp::BuildDict),
            }
            .map(|build| {
                let temp = inner.new_temp();
                items.push(ir::Expr::set_temp(temp, ir::Expr::op(build, vec![])));
                temp
            });

            let iterable = inner.load(COMPREHENSION_ARG);
            items.push(inner.comprehension_loops(generators, iterable, &produce, result));
            items.push(match result {
                Some(temp) => ir::Expr::Return(Box::new(ir::Expr::temp(temp))),
                None => ir::Expr::YieldBreak(Box::new(ir::Expr::none())),
            });
            inner.build_code(name, Some(&params), None, expr.span, ir::Expr::Block(items))
        };

        let function = ir::Expr::MakeFunction(Box::new(FunctionSpec {
            code,
            defaults: Vec::new(),
            kw_defaults: Vec::new(),
            annotations: Vec::new(),
        }));
        ir::Expr::call(function, vec![outer])
    }

    fn comprehension_loops(
        &mut self,
        generators: &[Comprehension],
        iterable: ir::Expr,
        produce: &Produce<'_>,
        result: Option<TempId>,
    ) -> ir::Expr {
        let Some((generator, rest)) = generators.split_first() else {
            return self.produce(produce, result);
        };
        self.for_loop(
            iterable,
            false,
            |this, current| {
                let store = this.store_target(&generator.target, current);
                let mut inner = match rest.first() {
                    Some(next) => {
                        let iterable = this.expr(&next.iter);
                        this.comprehension_loops(rest, iterable, produce, result)
                    }
                    None => this.produce(produce, result),
                };
                for cond in generator.ifs.iter().rev() {
                    let test = ir::Expr::is_true(this.expr(cond));
                    inner = ir::Expr::if_(test, inner, ir::Expr::none());
                }
                ir::Expr::Block(vec![store, inner])
            },
            |_| ir::Expr::none(),
        )
    }

    fn produce(&mut self, produce: &Produce<'_>, result: Option<TempId>) -> ir::Expr {
        let target = || match result {
            Some(temp) => ir::Expr::temp(temp),
            None => panic!("collecting comprehension without a result temporary"),
        };
        match produce {
            Produce::List(elt) => ir::Expr::op(RuntimeOp::ListAppend, vec![target(), self.expr(elt)]),
            Produce::Set(elt) => ir::Expr::op(RuntimeOp::SetAdd, vec![target(), self.expr(elt)]),
            Produce::Dict(key, value) => {
                let key = self.expr(key);
                let value = self.expr(value);
                ir::Expr::op(RuntimeOp::DictSet, vec![target(), key, value])
            }
            Produce::Generator(elt) => {
                let value = self.expr(elt);
                self.suspend(value)
            }
        }
    }
}
