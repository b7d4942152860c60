use smol_str::SmolStr;

use super::{LoopLabels, Lowerer};
use crate::{
    ast::{Alias, ExceptHandler, Expr, Stmt, StmtKind, WithItem},
    constant::Constant,
    ir::{self, CallArg, Handler, LineFlag, RuntimeOp, TryRegion},
};

impl Lowerer<'_, '_> {
    /// Lowers one statement; `None` for statements with no runtime effect.
    pub(super) fn stmt(&mut self, stmt: &Stmt) -> Option<ir::Expr> {
        tracing::trace!(node = %stmt.id, line = self.line_of(stmt.span), "lowering statement");
        let lowered = match &stmt.kind {
            StmtKind::Expr(value) => self.expr(value),
            StmtKind::Pass | StmtKind::Global(_) | StmtKind::Nonlocal(_) => return None,
            StmtKind::Assign { targets, value } => self.assign(targets, value),
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value),
            StmtKind::Del(targets) => {
                ir::Expr::block(targets.iter().map(|t| self.delete_target(t)).collect())
            }
            StmtKind::Return(value) => {
                let value = value.as_ref().map_or_else(ir::Expr::none, |v| self.expr(v));
                if self.generator {
                    ir::Expr::YieldBreak(Box::new(value))
                } else {
                    ir::Expr::Return(Box::new(value))
                }
            }
            StmtKind::Break => ir::Expr::Break(self.current_loop().break_label),
            StmtKind::Continue => ir::Expr::Continue(self.current_loop().continue_label),
            StmtKind::If { test, body, orelse } => {
                let test = ir::Expr::is_true(self.expr(test));
                let then = ir::Expr::Block(self.body(body));
                let orelse = ir::Expr::Block(self.body(orelse));
                ir::Expr::if_(test, then, orelse)
            }
            StmtKind::While { test, body, orelse } => self.while_loop(test, body, orelse),
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.expr(iter);
                self.for_loop(
                    iterable,
                    !orelse.is_empty(),
                    |this, current| {
                        let mut items = vec![this.store_target(target, current)];
                        items.extend(this.body(body));
                        ir::Expr::Block(items)
                    },
                    |this| ir::Expr::Block(this.body(orelse)),
                )
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => self.try_stmt(body, handlers, orelse, finalbody),
            StmtKind::With { items, body } => self.with_stmt(items, body),
            StmtKind::Raise { exc, cause } => self.raise(exc.as_ref(), cause.as_ref()),
            StmtKind::Assert { test, msg } => self.assert(test, msg.as_ref()),
            StmtKind::Import(names) => {
                ir::Expr::block(names.iter().map(|alias| self.import(alias)).collect())
            }
            StmtKind::ImportFrom {
                module,
                names,
                level,
            } => self.import_from(module.as_ref(), names, *level),
            StmtKind::FunctionDef(def) => self.function_def(stmt.id, def, stmt.span),
            StmtKind::ClassDef(class) => self.class_def(stmt.id, class, stmt.span),
        };
        Some(lowered)
    }

    fn current_loop(&self) -> LoopLabels {
        match self.loops.last() {
            Some(labels) => *labels,
            None => panic!("break or continue outside a loop reached lowering"),
        }
    }

    /// `Labeled(exit, [Loop(if test: body else break), orelse])`.
    ///
    /// A `break` in the body leaves through `exit` and skips `orelse`; the
    /// loop's own break label is the natural exit.
    fn while_loop(&mut self, test: &Expr, body: &[Stmt], orelse: &[Stmt]) -> ir::Expr {
        let exit = self.new_label();
        let loop_break = self.new_label();
        let loop_continue = self.new_label();
        self.loops.push(LoopLabels {
            break_label: if orelse.is_empty() { loop_break } else { exit },
            continue_label: loop_continue,
        });
        let test = ir::Expr::is_true(self.expr(test));
        let body = ir::Expr::Block(self.body(body));
        self.loops.pop();

        let looped = ir::Expr::Loop {
            body: Box::new(ir::Expr::if_(test, body, ir::Expr::Break(loop_break))),
            break_label: loop_break,
            continue_label: loop_continue,
        };
        if orelse.is_empty() {
            looped
        } else {
            let orelse = ir::Expr::Block(self.body(orelse));
            ir::Expr::Labeled {
                label: exit,
                body: Box::new(ir::Expr::Block(vec![looped, orelse])),
            }
        }
    }

    /// Iterates `iterable` through the enumerator protocol. `body` receives
    /// the expression producing the current item; the iterator is disposed
    /// in a `finally` on every exit path.
    pub(super) fn for_loop(
        &mut self,
        iterable: ir::Expr,
        has_else: bool,
        body: impl FnOnce(&mut Self, ir::Expr) -> ir::Expr,
        orelse: impl FnOnce(&mut Self) -> ir::Expr,
    ) -> ir::Expr {
        let iterator = self.new_temp();
        let dispose = self.new_temp();
        let exit = self.new_label();
        let loop_break = self.new_label();
        let loop_continue = self.new_label();

        self.loops.push(LoopLabels {
            break_label: if has_else { exit } else { loop_break },
            continue_label: loop_continue,
        });
        let current = ir::Expr::op(RuntimeOp::Current, vec![ir::Expr::temp(iterator)]);
        let body = body(self, current);
        self.loops.pop();

        let move_next = ir::Expr::op(RuntimeOp::MoveNext, vec![ir::Expr::temp(iterator)]);
        let looped = ir::Expr::Loop {
            body: Box::new(ir::Expr::if_(move_next, body, ir::Expr::Break(loop_break))),
            break_label: loop_break,
            continue_label: loop_continue,
        };
        let inner = if has_else {
            let orelse = orelse(self);
            ir::Expr::Labeled {
                label: exit,
                body: Box::new(ir::Expr::Block(vec![looped, orelse])),
            }
        } else {
            looped
        };

        let id = self.new_try();
        ir::Expr::Block(vec![
            ir::Expr::set_temp(iterator, ir::Expr::op(RuntimeOp::GetEnumerator, vec![iterable])),
            ir::Expr::set_temp(
                dispose,
                ir::Expr::op(RuntimeOp::NeedsDisposal, vec![ir::Expr::temp(iterator)]),
            ),
            ir::Expr::Try(Box::new(TryRegion {
                id,
                body: inner,
                handler: None,
                finally: Some(ir::Expr::if_(
                    ir::Expr::temp(dispose),
                    ir::Expr::op(RuntimeOp::Dispose, vec![ir::Expr::temp(iterator)]),
                    ir::Expr::none(),
                )),
            })),
        ])
    }

    fn try_stmt(
        &mut self,
        body: &[Stmt],
        handlers: &[ExceptHandler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
    ) -> ir::Expr {
        let mut inner = if handlers.is_empty() {
            let mut items = self.body(body);
            items.extend(self.body(orelse));
            ir::Expr::Block(items)
        } else if orelse.is_empty() {
            let body = ir::Expr::Block(self.body(body));
            let handler = self.handlers(handlers);
            let id = self.new_try();
            ir::Expr::Try(Box::new(TryRegion {
                id,
                body,
                handler: Some(handler),
                finally: None,
            }))
        } else {
            // `else` runs only when the body completed, outside the handlers.
            let completed = self.new_temp();
            let mut items = self.body(body);
            items.push(ir::Expr::set_temp(completed, ir::Expr::Constant(Constant::Bool(true))));
            let handler = self.handlers(handlers);
            let id = self.new_try();
            let orelse = ir::Expr::Block(self.body(orelse));
            ir::Expr::Block(vec![
                ir::Expr::set_temp(completed, ir::Expr::Constant(Constant::Bool(false))),
                ir::Expr::Try(Box::new(TryRegion {
                    id,
                    body: ir::Expr::Block(items),
                    handler: Some(handler),
                    finally: None,
                })),
                ir::Expr::if_(ir::Expr::temp(completed), orelse, ir::Expr::none()),
            ])
        };

        if !finalbody.is_empty() {
            let saved = self.new_temp();
            let mut finally = vec![ir::Expr::LineFlag(LineFlag::Save(saved))];
            finally.extend(self.body(finalbody));
            finally.push(ir::Expr::LineFlag(LineFlag::Restore(saved)));
            let id = self.new_try();
            inner = ir::Expr::Try(Box::new(TryRegion {
                id,
                body: inner,
                handler: None,
                finally: Some(ir::Expr::Block(finally)),
            }));
        }
        inner
    }

    /// Tests each clause in source order; an unmatched exception is
    /// re-raised.
    fn handlers(&mut self, handlers: &[ExceptHandler]) -> Handler {
        let exception = self.new_temp();
        let mut chain = ir::Expr::Rethrow;
        for handler in handlers.iter().rev() {
            let matched = self.handler_body(handler, exception);
            chain = match &handler.typ {
                None => matched,
                Some(typ) => {
                    let test = ir::Expr::op(
                        RuntimeOp::ExceptionMatches,
                        vec![ir::Expr::temp(exception), self.expr(typ)],
                    );
                    ir::Expr::if_(test, matched, chain)
                }
            };
        }
        Handler {
            exception,
            body: chain,
        }
    }

    fn handler_body(&mut self, handler: &ExceptHandler, exception: ir::TempId) -> ir::Expr {
        let body = ir::Expr::Block(self.body(&handler.body));
        let body = match &handler.name {
            None => body,
            Some(name) => {
                let var = self.var(name);
                let id = self.new_try();
                ir::Expr::Block(vec![
                    ir::Expr::store(var.clone(), ir::Expr::temp(exception)),
                    ir::Expr::Try(Box::new(TryRegion {
                        id,
                        body,
                        handler: None,
                        finally: Some(ir::Expr::Delete {
                            var,
                            checked: false,
                        }),
                    })),
                ])
            }
        };
        ir::Expr::Block(vec![body, ir::Expr::LineFlag(LineFlag::Clear)])
    }

    fn with_stmt(&mut self, items: &[WithItem], body: &[Stmt]) -> ir::Expr {
        let Some((first, rest)) = items.split_first() else {
            return ir::Expr::Block(self.body(body));
        };

        let manager = self.new_temp();
        let exit = self.new_temp();
        let entered = self.new_temp();
        let clean = self.new_temp();
        let exception = self.new_temp();

        let context = self.expr(&first.context);
        let mut inner = Vec::new();
        if let Some(target) = &first.target {
            inner.push(self.store_target(target, ir::Expr::temp(entered)));
        }
        if rest.is_empty() {
            inner.extend(self.body(body));
        } else {
            inner.push(self.with_stmt(rest, body));
        }

        let call_exit = |args: Vec<ir::Expr>| ir::Expr::Call {
            callee: Box::new(ir::Expr::temp(exit)),
            args: args.into_iter().map(CallArg::positional).collect(),
        };
        let suppressed = ir::Expr::is_true(call_exit(vec![
            ir::Expr::op(RuntimeOp::TypeOf, vec![ir::Expr::temp(exception)]),
            ir::Expr::temp(exception),
            ir::Expr::none(),
        ]));
        let handler = ir::Expr::Block(vec![
            ir::Expr::set_temp(clean, ir::Expr::Constant(Constant::Bool(false))),
            ir::Expr::if_(suppressed, ir::Expr::none(), ir::Expr::Rethrow),
            ir::Expr::LineFlag(LineFlag::Clear),
        ]);
        let finally = ir::Expr::if_(
            ir::Expr::temp(clean),
            call_exit(vec![ir::Expr::none(), ir::Expr::none(), ir::Expr::none()]),
            ir::Expr::none(),
        );

        let id = self.new_try();
        ir::Expr::Block(vec![
            ir::Expr::set_temp(manager, context),
            ir::Expr::set_temp(
                exit,
                ir::Expr::op(RuntimeOp::GetAttr(SmolStr::new_static("__exit__")), vec![ir::Expr::temp(manager)]),
            ),
            ir::Expr::set_temp(
                entered,
                ir::Expr::call(
                    ir::Expr::op(
                        RuntimeOp::GetAttr(SmolStr::new_static("__enter__")),
                        vec![ir::Expr::temp(manager)],
                    ),
                    vec![],
                ),
            ),
            ir::Expr::set_temp(clean, ir::Expr::Constant(Constant::Bool(true))),
            ir::Expr::Try(Box::new(TryRegion {
                id,
                body: ir::Expr::Block(inner),
                handler: Some(Handler {
                    exception,
                    body: handler,
                }),
                finally: Some(finally),
            })),
        ])
    }

    fn raise(&mut self, exc: Option<&Expr>, cause: Option<&Expr>) -> ir::Expr {
        let Some(exc) = exc else {
            return ir::Expr::Rethrow;
        };
        let mut exception = ir::Expr::op(RuntimeOp::MakeException, vec![self.expr(exc)]);
        if let Some(cause) = cause {
            exception = ir::Expr::op(RuntimeOp::SetCause, vec![exception, self.expr(cause)]);
        }
        ir::Expr::Throw(Box::new(exception))
    }

    fn assert(&mut self, test: &Expr, msg: Option<&Expr>) -> ir::Expr {
        let test = ir::Expr::is_true(self.expr(test));
        let args = msg.map(|m| vec![self.expr(m)]).unwrap_or_default();
        let error = ir::Expr::call(
            ir::Expr::Load {
                var: ir::VarAccess::new("AssertionError", crate::scope::Storage::Name),
                guarded: false,
            },
            args,
        );
        ir::Expr::if_(
            test,
            ir::Expr::none(),
            ir::Expr::Throw(Box::new(ir::Expr::op(RuntimeOp::MakeException, vec![error]))),
        )
    }

    fn import(&mut self, alias: &Alias) -> ir::Expr {
        let module = ir::Expr::op(
            RuntimeOp::Import {
                name: alias.name.clone(),
                level: 0,
                top: alias.asname.is_none(),
            },
            vec![],
        );
        ir::Expr::store(self.var(&alias.bound_name()), module)
    }

    fn import_from(&mut self, module: Option<&SmolStr>, names: &[Alias], level: u32) -> ir::Expr {
        let import = ir::Expr::op(
            RuntimeOp::Import {
                name: module.cloned().unwrap_or_default(),
                level,
                top: false,
            },
            vec![],
        );
        if names.iter().any(Alias::is_star) {
            return ir::Expr::op(RuntimeOp::ImportStar, vec![import]);
        }

        let module = self.new_temp();
        let mut items = vec![ir::Expr::set_temp(module, import)];
        for alias in names {
            let bound = alias.asname.as_ref().unwrap_or(&alias.name);
            let value = ir::Expr::op(
                RuntimeOp::ImportFrom(alias.name.clone()),
                vec![ir::Expr::temp(module)],
            );
            items.push(ir::Expr::store(self.var(bound), value));
        }
        ir::Expr::Block(items)
    }
}
