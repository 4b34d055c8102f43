//! The state-stack evaluator
//!
//! Each call to [`advance`] pops one [`Frame`] off a thread's continuation
//! and performs one increment of work: it may push frames for
//! sub-expressions, push a value for the frame beneath, or unwind the stack
//! for an abrupt completion. No guest construct recurses on the host
//! stack, so a continuation can be paused after any step.

use std::rc::Rc;

use crate::ast::{
    AssignOp, Expression, Literal, LexicalName, MemberProperty, Statement, UnaryOp, UpdateOp,
    VariableKind,
};
use crate::bridge::ResolverId;
use crate::conversions::{array_index, to_int32};
use crate::error::EngineError;
use crate::heap::{Class, FunctionData, ObjectData, ObjectId, Property, SetOutcome};
use crate::interpreter::natives::{NativeCall, NativeOutcome};
use crate::interpreter::operators::OpError;
use crate::interpreter::state::{Abrupt, Continuation, Frame, TryPhase};
use crate::interpreter::{ErrorKind, Interpreter};
use crate::scheduler::{Resume, ThreadId};
use crate::scope::{Assignment, ScopeId, ScopeKind};
use crate::value::{JsString, Value};

/// Why evaluation of a frame stopped early
#[derive(Debug)]
pub(crate) enum Fault {
    /// A guest exception
    Throw(Value),
    /// A host error; the step fails
    Host(EngineError),
}

impl From<EngineError> for Fault {
    fn from(error: EngineError) -> Self {
        Fault::Host(error)
    }
}

pub(crate) type Eval<T> = Result<T, Fault>;

/// What a single step asks of the scheduler
#[derive(Debug)]
pub(crate) enum Signal {
    Continue,
    Yield,
    Sleep(u64),
    Block(Option<ResolverId>),
    Done(Value),
    Threw { value: Value, stack: String },
}

/// Perform one step of `thread`, whose continuation is `k`.
pub(crate) fn advance(
    interp: &mut Interpreter,
    thread: ThreadId,
    k: &mut Continuation,
    resume: Option<Resume>,
) -> Result<Signal, EngineError> {
    let outcome = match resume {
        Some(resume) => resume_native(k, resume),
        None => match k.frames.pop() {
            Some(frame) => interp.dispatch(thread, k, frame),
            None => return Ok(Signal::Done(finish_value(k))),
        },
    };
    let signal = match outcome {
        Ok(signal) => signal,
        Err(Fault::Throw(value)) => interp.unwind(k, Abrupt::Throw(value))?,
        Err(Fault::Host(error)) => return Err(error),
    };
    if matches!(signal, Signal::Continue) && k.is_finished() {
        return Ok(Signal::Done(finish_value(k)));
    }
    Ok(signal)
}

/// Completion value of a finished continuation: a call result if one is
/// left on the value stack, else the last expression statement's value.
fn finish_value(k: &mut Continuation) -> Value {
    k.values
        .pop()
        .unwrap_or_else(|| std::mem::take(&mut k.last_value))
}

fn resume_native(k: &mut Continuation, resume: Resume) -> Eval<Signal> {
    match k.frames.pop() {
        Some(Frame::AwaitNative { .. }) => match resume {
            Resume::Value(value) => {
                k.values.push(value);
                Ok(Signal::Continue)
            }
            Resume::Error(error) => Err(Fault::Throw(error)),
        },
        _ => Err(EngineError::corrupt("resumed a thread that was not waiting on a native call").into()),
    }
}

fn pop_value(k: &mut Continuation) -> Result<Value, EngineError> {
    k.values
        .pop()
        .ok_or_else(|| EngineError::corrupt("value stack underflow"))
}

fn split_args(k: &mut Continuation, argc: usize) -> Result<Vec<Value>, EngineError> {
    let at = k
        .values
        .len()
        .checked_sub(argc)
        .ok_or_else(|| EngineError::corrupt("value stack underflow"))?;
    Ok(k.values.split_off(at))
}

fn key_frame(property: &MemberProperty) -> Frame {
    match property {
        MemberProperty::Static(name) => Frame::Push(Value::String(name.clone())),
        MemberProperty::Computed(expr) => Frame::Expr(Rc::clone(expr)),
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Boolean(b) => Value::Boolean(*b),
        Literal::Number(n) => Value::Number(*n),
        Literal::String(s) => Value::String(s.clone()),
    }
}

impl Interpreter {
    fn dispatch(&mut self, thread: ThreadId, k: &mut Continuation, frame: Frame) -> Eval<Signal> {
        match frame {
            Frame::Expr(expr) => return self.eval_expression(k, expr),
            Frame::Stmt(stmt) => return self.exec_statement(k, stmt, Vec::new()),

            Frame::Push(value) => k.values.push(value),
            Frame::Discard => {
                pop_value(k)?;
            }

            Frame::BinaryRight { op, right } => {
                k.frames.push(Frame::BinaryApply { op });
                k.frames.push(Frame::Expr(right));
            }
            Frame::BinaryApply { op } => {
                let right = pop_value(k)?;
                let left = pop_value(k)?;
                let result = self.binary(k, op, &left, &right)?;
                k.values.push(result);
            }
            Frame::LogicalRight { op, right } => {
                let left = pop_value(k)?;
                let short_circuit = match op {
                    crate::ast::LogicalOp::And => !left.to_boolean(),
                    crate::ast::LogicalOp::Or => left.to_boolean(),
                };
                if short_circuit {
                    k.values.push(left);
                } else {
                    k.frames.push(Frame::Expr(right));
                }
            }
            Frame::UnaryApply { op } => {
                let operand = pop_value(k)?;
                let result = self.unary(op, &operand);
                k.values.push(result);
            }
            Frame::ConditionalBranch {
                consequent,
                alternate,
            } => {
                let test = pop_value(k)?;
                k.frames.push(Frame::Expr(if test.to_boolean() {
                    consequent
                } else {
                    alternate
                }));
            }

            Frame::MemberGet => {
                let key = pop_value(k)?;
                let object = pop_value(k)?;
                let value = self.get_member(k, &object, &key)?;
                k.values.push(value);
            }
            Frame::DeleteMember => {
                let key = pop_value(k)?;
                let object = pop_value(k)?;
                let result = self.delete_member(k, &object, &key)?;
                k.values.push(Value::Boolean(result));
            }
            Frame::MethodLookup { .. } => {
                let key = pop_value(k)?;
                let object = pop_value(k)?;
                let function = self.get_member(k, &object, &key)?;
                k.values.push(object);
                k.values.push(function);
            }

            Frame::CallArgs {
                arguments,
                next,
                name,
            } => match arguments.get(next).cloned() {
                Some(argument) => {
                    k.frames.push(Frame::CallArgs {
                        arguments,
                        next: next + 1,
                        name,
                    });
                    k.frames.push(Frame::Expr(argument));
                }
                None => return self.invoke(thread, k, arguments.len(), name),
            },
            Frame::Invoke { argc, name } => return self.invoke(thread, k, argc, name),
            Frame::NewArgs {
                arguments,
                next,
                name,
            } => match arguments.get(next).cloned() {
                Some(argument) => {
                    k.frames.push(Frame::NewArgs {
                        arguments,
                        next: next + 1,
                        name,
                    });
                    k.frames.push(Frame::Expr(argument));
                }
                None => return self.construct(thread, k, arguments.len(), name),
            },
            Frame::Construct { argc, name } => return self.construct(thread, k, argc, name),

            Frame::ArrayLiteral {
                elements,
                mut next,
                mut done,
            } => {
                if next > 0 && matches!(elements.get(next - 1), Some(Some(_))) {
                    done.push(Some(pop_value(k)?));
                }
                while let Some(None) = elements.get(next) {
                    done.push(None);
                    next += 1;
                }
                match elements.get(next).cloned().flatten() {
                    Some(element) => {
                        k.frames.push(Frame::ArrayLiteral {
                            elements,
                            next: next + 1,
                            done,
                        });
                        k.frames.push(Frame::Expr(element));
                    }
                    None => {
                        let array = self.array_with_holes(done);
                        k.values.push(Value::Object(array));
                    }
                }
            }
            Frame::ObjectLiteral {
                properties,
                next,
                object,
            } => {
                if let Some(done) = next.checked_sub(1).and_then(|i| properties.get(i)) {
                    let value = pop_value(k)?;
                    self.heap
                        .define(object, done.key.clone(), Property::data(value));
                }
                match properties.get(next) {
                    Some(property) => {
                        let value = Rc::clone(&property.value);
                        k.frames.push(Frame::ObjectLiteral {
                            properties,
                            next: next + 1,
                            object,
                        });
                        k.frames.push(Frame::Expr(value));
                    }
                    None => k.values.push(Value::Object(object)),
                }
            }

            Frame::AssignName { name, op } => {
                let mut value = pop_value(k)?;
                if let Some(op) = op {
                    let old = pop_value(k)?;
                    value = self.binary(k, op, &old, &value)?;
                }
                self.write_name(k, &name, value.clone())?;
                k.values.push(value);
            }
            Frame::AssignMemberRead { op, value } => {
                let key = pop_value(k)?;
                let object = pop_value(k)?;
                let old = self.get_member(k, &object, &key)?;
                k.values.push(object);
                k.values.push(key);
                k.values.push(old);
                k.frames.push(Frame::AssignMember { op: Some(op) });
                k.frames.push(Frame::Expr(value));
            }
            Frame::AssignMember { op } => {
                let mut value = pop_value(k)?;
                if let Some(op) = op {
                    let old = pop_value(k)?;
                    value = self.binary(k, op, &old, &value)?;
                }
                let key = pop_value(k)?;
                let object = pop_value(k)?;
                self.put_member(k, &object, &key, value.clone())?;
                k.values.push(value);
            }
            Frame::UpdateMember { op, prefix } => {
                let key = pop_value(k)?;
                let object = pop_value(k)?;
                let old = self.get_member(k, &object, &key)?;
                let old = self.ops().to_number(&old);
                let new = updated(op, old);
                self.put_member(k, &object, &key, Value::Number(new))?;
                k.values.push(Value::Number(if prefix { new } else { old }));
            }

            Frame::Statements { body, next } => {
                if let Some(stmt) = body.get(next).cloned() {
                    if next + 1 < body.len() {
                        k.frames.push(Frame::Statements {
                            body,
                            next: next + 1,
                        });
                    }
                    k.frames.push(Frame::Stmt(stmt));
                }
            }
            Frame::ExprStmtDone => {
                k.last_value = pop_value(k)?;
            }
            Frame::Declarators { kind, list, next } => {
                if let Some(declarator) = list.get(next) {
                    let name = declarator.name.clone();
                    let init = declarator.init.clone();
                    if next + 1 < list.len() {
                        k.frames.push(Frame::Declarators {
                            kind,
                            list,
                            next: next + 1,
                        });
                    }
                    match init {
                        Some(init) => {
                            k.frames.push(Frame::InitBinding { name, kind });
                            k.frames.push(Frame::Expr(init));
                        }
                        None if kind != VariableKind::Var => {
                            self.init_lexical(k, &name, Value::Undefined)?;
                        }
                        None => {}
                    }
                }
            }
            Frame::InitBinding { name, kind } => {
                let value = pop_value(k)?;
                match kind {
                    VariableKind::Var => self.write_name(k, &name, value)?,
                    VariableKind::Let | VariableKind::Const => self.init_lexical(k, &name, value)?,
                }
            }
            Frame::BlockExit { scope } => k.scope = scope,

            Frame::IfBranch {
                consequent,
                alternate,
            } => {
                let test = pop_value(k)?;
                if test.to_boolean() {
                    k.frames.push(Frame::Stmt(consequent));
                } else if let Some(alternate) = alternate {
                    k.frames.push(Frame::Stmt(alternate));
                }
            }

            Frame::WhileLoop { test, body, labels } => {
                k.frames.push(Frame::WhileCheck {
                    test: Rc::clone(&test),
                    body,
                    labels,
                });
                k.frames.push(Frame::Expr(test));
            }
            Frame::WhileCheck { test, body, labels } => {
                if pop_value(k)?.to_boolean() {
                    k.frames.push(Frame::WhileLoop {
                        test,
                        body: Rc::clone(&body),
                        labels,
                    });
                    k.frames.push(Frame::Stmt(body));
                }
            }
            Frame::DoWhileLoop { body, test, labels } => {
                k.frames.push(Frame::DoWhileCheck {
                    body,
                    test: Rc::clone(&test),
                    labels,
                });
                k.frames.push(Frame::Expr(test));
            }
            Frame::DoWhileCheck { body, test, labels } => {
                if pop_value(k)?.to_boolean() {
                    k.frames.push(Frame::DoWhileLoop {
                        body: Rc::clone(&body),
                        test,
                        labels,
                    });
                    k.frames.push(Frame::Stmt(body));
                }
            }

            Frame::ForNext {
                test,
                update,
                body,
                labels,
                run_update,
            } => match (run_update, update.clone(), test.clone()) {
                (true, Some(update), _) => {
                    k.frames.push(Frame::ForNext {
                        test,
                        update: Some(Rc::clone(&update)),
                        body,
                        labels,
                        run_update: false,
                    });
                    k.frames.push(Frame::Discard);
                    k.frames.push(Frame::Expr(update));
                }
                (_, _, Some(test_expr)) => {
                    k.frames.push(Frame::ForCheck {
                        test,
                        update,
                        body,
                        labels,
                    });
                    k.frames.push(Frame::Expr(test_expr));
                }
                (_, _, None) => {
                    k.frames.push(Frame::ForNext {
                        test,
                        update,
                        body: Rc::clone(&body),
                        labels,
                        run_update: true,
                    });
                    k.frames.push(Frame::Stmt(body));
                }
            },
            Frame::ForCheck {
                test,
                update,
                body,
                labels,
            } => {
                if pop_value(k)?.to_boolean() {
                    k.frames.push(Frame::ForNext {
                        test,
                        update,
                        body: Rc::clone(&body),
                        labels,
                        run_update: true,
                    });
                    k.frames.push(Frame::Stmt(body));
                }
            }

            Frame::ForInStart {
                left,
                declares,
                body,
                labels,
            } => {
                let subject = pop_value(k)?;
                if let Some(object) = self.to_object(&subject) {
                    let keys = self
                        .heap
                        .enumerable_keys(object, self.config.max_proto_depth);
                    k.frames.push(Frame::ForInNext {
                        object,
                        keys,
                        next: 0,
                        left,
                        declares,
                        body,
                        labels,
                    });
                }
            }
            Frame::ForInNext {
                object,
                keys,
                next,
                left,
                declares,
                body,
                labels,
            } => {
                // Keys deleted during the loop are skipped.
                let depth = self.config.max_proto_depth;
                let found = keys
                    .iter()
                    .enumerate()
                    .skip(next)
                    .find(|(_, key)| self.heap.has_property(object, key, depth))
                    .map(|(i, key)| (i, key.clone()));
                if let Some((index, key)) = found {
                    k.frames.push(Frame::ForInNext {
                        object,
                        keys,
                        next: index + 1,
                        left: Rc::clone(&left),
                        declares,
                        body: Rc::clone(&body),
                        labels,
                    });
                    k.frames.push(Frame::Stmt(body));
                    match (&*left, declares) {
                        (Expression::Identifier(name), true) => {
                            k.frames.push(Frame::InitBinding {
                                name: name.clone(),
                                kind: VariableKind::Let,
                            });
                            k.frames.push(Frame::Push(Value::String(key)));
                        }
                        _ => {
                            k.frames.push(Frame::Discard);
                            k.frames.push(Frame::Expr(Rc::new(Expression::Assign {
                                op: AssignOp::Assign,
                                target: left,
                                value: Rc::new(Expression::Literal(Literal::String(key))),
                            })));
                        }
                    }
                }
            }

            Frame::SwitchStart { cases } => {
                let discriminant = pop_value(k)?;
                k.frames.push(Frame::SwitchMatch {
                    discriminant,
                    cases,
                    next: 0,
                });
            }
            Frame::SwitchMatch {
                discriminant,
                cases,
                next,
            } => {
                let candidate = cases
                    .iter()
                    .enumerate()
                    .skip(next)
                    .find_map(|(i, case)| case.test.clone().map(|t| (i, t)));
                match candidate {
                    Some((index, test)) => {
                        k.frames.push(Frame::SwitchTest {
                            discriminant,
                            cases,
                            index,
                        });
                        k.frames.push(Frame::Expr(test));
                    }
                    None => {
                        if let Some(default) = cases.iter().position(|c| c.test.is_none()) {
                            k.frames.push(Frame::SwitchBody {
                                cases,
                                next: default,
                            });
                        }
                    }
                }
            }
            Frame::SwitchTest {
                discriminant,
                cases,
                index,
            } => {
                let value = pop_value(k)?;
                if discriminant.strict_equals(&value) {
                    k.frames.push(Frame::SwitchBody { cases, next: index });
                } else {
                    k.frames.push(Frame::SwitchMatch {
                        discriminant,
                        cases,
                        next: index + 1,
                    });
                }
            }
            Frame::SwitchBody { cases, next } => {
                if let Some(case) = cases.get(next) {
                    let body = case.body.clone();
                    k.frames.push(Frame::SwitchBody {
                        cases,
                        next: next + 1,
                    });
                    k.frames.push(Frame::Statements { body, next: 0 });
                }
            }

            Frame::Try { node, .. } => {
                // Block or handler finished normally.
                let Statement::Try(statement) = &*node else {
                    return Err(EngineError::corrupt("try frame without a try statement").into());
                };
                if let Some(finalizer) = &statement.finalizer {
                    k.frames.push(Frame::Finally { saved: None });
                    k.frames.push(Frame::Stmt(Rc::clone(finalizer)));
                }
            }
            Frame::Finally { saved } => match saved {
                None => {}
                Some(Abrupt::Throw(value)) => return Err(Fault::Throw(value)),
                Some(abrupt) => return Ok(self.unwind(k, abrupt)?),
            },
            Frame::ReturnValue => {
                let value = pop_value(k)?;
                return Ok(self.unwind(k, Abrupt::Return(value))?);
            }
            Frame::ThrowValue => return Err(Fault::Throw(pop_value(k)?)),
            Frame::Labeled { .. } => {}

            Frame::CallBoundary {
                saved_scope,
                saved_last,
                height,
                construct,
                ..
            } => {
                self.leave_call(k, saved_scope, saved_last, height, construct, Value::Undefined);
            }
            Frame::AwaitNative { native } => {
                return Err(EngineError::corrupt(format!(
                    "'{}' call resumed without a settlement",
                    native
                ))
                .into());
            }
        }
        Ok(Signal::Continue)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Statements
    // ═══════════════════════════════════════════════════════════════════════

    fn exec_statement(
        &mut self,
        k: &mut Continuation,
        stmt: Rc<Statement>,
        mut labels: Vec<JsString>,
    ) -> Eval<Signal> {
        match &*stmt {
            Statement::VariableDeclaration(decl) => {
                k.frames.push(Frame::Declarators {
                    kind: decl.kind,
                    list: Rc::clone(&decl.declarations),
                    next: 0,
                });
            }
            Statement::FunctionDeclaration(_) | Statement::Empty | Statement::Debugger => {}

            Statement::Block(block) => {
                if !block.lexical.is_empty() {
                    self.enter_block(k, &block.lexical);
                }
                k.frames.push(Frame::Statements {
                    body: block.body.clone(),
                    next: 0,
                });
            }
            Statement::If(s) => {
                k.frames.push(Frame::IfBranch {
                    consequent: Rc::clone(&s.consequent),
                    alternate: s.alternate.clone(),
                });
                k.frames.push(Frame::Expr(Rc::clone(&s.test)));
            }
            Statement::Switch(s) => {
                if !labels.is_empty() {
                    k.frames.push(Frame::Labeled { labels });
                }
                k.frames.push(Frame::SwitchStart {
                    cases: Rc::clone(&s.cases),
                });
                k.frames.push(Frame::Expr(Rc::clone(&s.discriminant)));
            }
            Statement::For(s) => {
                if !s.lexical.is_empty() {
                    self.enter_block(k, &s.lexical);
                }
                k.frames.push(Frame::ForNext {
                    test: s.test.clone(),
                    update: s.update.clone(),
                    body: Rc::clone(&s.body),
                    labels,
                    run_update: false,
                });
                match &s.init {
                    Some(crate::ast::ForInit::Declaration(decl)) => {
                        k.frames.push(Frame::Stmt(Rc::clone(decl)));
                    }
                    Some(crate::ast::ForInit::Expression(expr)) => {
                        k.frames.push(Frame::Discard);
                        k.frames.push(Frame::Expr(Rc::clone(expr)));
                    }
                    None => {}
                }
            }
            Statement::ForIn(s) => {
                let declares = !s.lexical.is_empty();
                if declares {
                    self.enter_block(k, &s.lexical);
                }
                k.frames.push(Frame::ForInStart {
                    left: Rc::clone(&s.left),
                    declares,
                    body: Rc::clone(&s.body),
                    labels,
                });
                k.frames.push(Frame::Expr(Rc::clone(&s.right)));
            }
            Statement::While(s) => {
                k.frames.push(Frame::WhileLoop {
                    test: Rc::clone(&s.test),
                    body: Rc::clone(&s.body),
                    labels,
                });
            }
            Statement::DoWhile(s) => {
                k.frames.push(Frame::DoWhileLoop {
                    body: Rc::clone(&s.body),
                    test: Rc::clone(&s.test),
                    labels,
                });
                k.frames.push(Frame::Stmt(Rc::clone(&s.body)));
            }
            Statement::Try(s) => {
                k.frames.push(Frame::Try {
                    node: Rc::clone(&stmt),
                    phase: TryPhase::Block,
                    scope: k.scope,
                    height: k.values.len(),
                    depth: k.depth,
                });
                k.frames.push(Frame::Stmt(Rc::clone(&s.block)));
            }

            Statement::Return(argument) => match argument {
                Some(expr) => {
                    k.frames.push(Frame::ReturnValue);
                    k.frames.push(Frame::Expr(Rc::clone(expr)));
                }
                None => return Ok(self.unwind(k, Abrupt::Return(Value::Undefined))?),
            },
            Statement::Break(label) => return Ok(self.unwind(k, Abrupt::Break(label.clone()))?),
            Statement::Continue(label) => {
                return Ok(self.unwind(k, Abrupt::Continue(label.clone()))?);
            }
            Statement::Throw(expr) => {
                k.frames.push(Frame::ThrowValue);
                k.frames.push(Frame::Expr(Rc::clone(expr)));
            }
            Statement::Expression(expr) => {
                k.frames.push(Frame::ExprStmtDone);
                k.frames.push(Frame::Expr(Rc::clone(expr)));
            }
            Statement::Labeled(s) => {
                labels.push(s.label.clone());
                if s.body.is_loop() || matches!(&*s.body, Statement::Labeled(_)) {
                    return self.exec_statement(k, Rc::clone(&s.body), labels);
                }
                k.frames.push(Frame::Labeled { labels });
                return self.exec_statement(k, Rc::clone(&s.body), Vec::new());
            }
        }
        Ok(Signal::Continue)
    }

    /// Open a block scope holding `names`; a `BlockExit` restores the
    /// current scope when the block ends.
    fn enter_block(&mut self, k: &mut Continuation, names: &[LexicalName]) {
        let scope = self
            .scopes
            .create(ScopeKind::Block, Some(k.scope), Value::Undefined);
        for name in names {
            self.scopes
                .declare(scope, name.name.clone(), Value::Undefined, !name.constant);
        }
        k.frames.push(Frame::BlockExit { scope: k.scope });
        k.scope = scope;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Abrupt completions
    // ═══════════════════════════════════════════════════════════════════════

    /// Pop frames until something handles `abrupt`.
    fn unwind(&mut self, k: &mut Continuation, abrupt: Abrupt) -> Result<Signal, EngineError> {
        let trace = match abrupt {
            Abrupt::Throw(_) => Some(k.stack_trace()),
            _ => None,
        };

        while let Some(frame) = k.frames.pop() {
            match frame {
                Frame::CallBoundary {
                    saved_scope,
                    saved_last,
                    height,
                    construct,
                    ..
                } => match abrupt {
                    Abrupt::Return(value) => {
                        self.leave_call(k, saved_scope, saved_last, height, construct, value);
                        return Ok(Signal::Continue);
                    }
                    Abrupt::Throw(_) => {
                        k.scope = saved_scope;
                        k.values.truncate(height);
                        k.last_value = saved_last;
                        k.depth = k.depth.saturating_sub(1);
                    }
                    Abrupt::Break(_) | Abrupt::Continue(_) => {
                        return Err(EngineError::corrupt(
                            "break or continue crossed a function boundary",
                        ));
                    }
                },
                Frame::Try {
                    node,
                    phase,
                    scope,
                    height,
                    depth,
                } => {
                    k.scope = scope;
                    k.values.truncate(height);
                    k.depth = depth;
                    let Statement::Try(statement) = &*node else {
                        return Err(EngineError::corrupt("try frame without a try statement"));
                    };
                    if let (Abrupt::Throw(value), TryPhase::Block, Some(handler)) =
                        (&abrupt, phase, &statement.handler)
                    {
                        let catch_scope =
                            self.scopes
                                .create(ScopeKind::Catch, Some(scope), Value::Undefined);
                        self.scopes
                            .declare(catch_scope, handler.param.clone(), value.clone(), true);
                        let body = Rc::clone(&handler.body);
                        k.frames.push(Frame::Try {
                            node: Rc::clone(&node),
                            phase: TryPhase::Catch,
                            scope,
                            height,
                            depth,
                        });
                        k.frames.push(Frame::BlockExit { scope });
                        k.frames.push(Frame::Stmt(body));
                        k.scope = catch_scope;
                        return Ok(Signal::Continue);
                    }
                    if let Some(finalizer) = &statement.finalizer {
                        let finalizer = Rc::clone(finalizer);
                        k.frames.push(Frame::Finally {
                            saved: Some(abrupt),
                        });
                        k.frames.push(Frame::Stmt(finalizer));
                        return Ok(Signal::Continue);
                    }
                }
                Frame::BlockExit { scope } => k.scope = scope,
                Frame::SwitchBody { .. } if matches!(abrupt, Abrupt::Break(None)) => {
                    return Ok(Signal::Continue);
                }
                Frame::Labeled { labels } => {
                    if let Abrupt::Break(Some(label)) = &abrupt {
                        if labels.contains(label) {
                            return Ok(Signal::Continue);
                        }
                    }
                }
                frame => {
                    let targeted = frame.loop_labels().is_some_and(|labels| match &abrupt {
                        Abrupt::Break(None) | Abrupt::Continue(None) => true,
                        Abrupt::Break(Some(label)) | Abrupt::Continue(Some(label)) => {
                            labels.contains(label)
                        }
                        Abrupt::Return(_) | Abrupt::Throw(_) => false,
                    });
                    if targeted {
                        if matches!(abrupt, Abrupt::Continue(_)) {
                            k.frames.push(frame);
                        }
                        return Ok(Signal::Continue);
                    }
                }
            }
        }

        match abrupt {
            Abrupt::Throw(value) => {
                let stack = format!(
                    "{}{}",
                    self.ops().to_string(&value),
                    trace.unwrap_or_default()
                );
                Ok(Signal::Threw { value, stack })
            }
            Abrupt::Return(value) => Ok(Signal::Done(value)),
            Abrupt::Break(_) | Abrupt::Continue(_) => Err(EngineError::corrupt(
                "break or continue outside of a loop",
            )),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Expressions
    // ═══════════════════════════════════════════════════════════════════════

    fn eval_expression(&mut self, k: &mut Continuation, expr: Rc<Expression>) -> Eval<Signal> {
        match &*expr {
            Expression::Literal(literal) => k.values.push(literal_value(literal)),
            Expression::Identifier(name) => {
                let value = self.read_name(k, name)?;
                k.values.push(value);
            }
            Expression::This => {
                let this = self
                    .scopes
                    .this_value(k.scope, self.config.max_scope_depth)?;
                k.values.push(this);
            }
            Expression::Array(elements) => {
                k.frames.push(Frame::ArrayLiteral {
                    elements: Rc::clone(elements),
                    next: 0,
                    done: Vec::with_capacity(elements.len()),
                });
            }
            Expression::Object(properties) => {
                let object = self.create_object();
                k.frames.push(Frame::ObjectLiteral {
                    properties: Rc::clone(properties),
                    next: 0,
                    object,
                });
            }
            Expression::Function(node) => {
                let function = self.create_closure(Rc::clone(node), k.scope)?;
                k.values.push(Value::Object(function));
            }

            Expression::Unary(UnaryOp::Typeof, argument) => match &**argument {
                // typeof tolerates undeclared names
                Expression::Identifier(name) => {
                    let value = self
                        .scopes
                        .lookup(k.scope, name, self.config.max_scope_depth)?
                        .unwrap_or_default();
                    let type_name = self.ops().type_of(&value);
                    k.values.push(Value::from(type_name));
                }
                _ => {
                    k.frames.push(Frame::UnaryApply { op: UnaryOp::Typeof });
                    k.frames.push(Frame::Expr(Rc::clone(argument)));
                }
            },
            Expression::Unary(UnaryOp::Delete, argument) => match &**argument {
                Expression::Member { object, property } => {
                    k.frames.push(Frame::DeleteMember);
                    k.frames.push(key_frame(property));
                    k.frames.push(Frame::Expr(Rc::clone(object)));
                }
                Expression::Identifier(_) => k.values.push(Value::Boolean(false)),
                _ => {
                    k.frames.push(Frame::Push(Value::Boolean(true)));
                    k.frames.push(Frame::Discard);
                    k.frames.push(Frame::Expr(Rc::clone(argument)));
                }
            },
            Expression::Unary(op, argument) => {
                k.frames.push(Frame::UnaryApply { op: *op });
                k.frames.push(Frame::Expr(Rc::clone(argument)));
            }

            Expression::Update { op, prefix, target } => match &**target {
                Expression::Identifier(name) => {
                    let old = self.read_name(k, name)?;
                    let old = self.ops().to_number(&old);
                    let new = updated(*op, old);
                    self.write_name(k, name, Value::Number(new))?;
                    k.values
                        .push(Value::Number(if *prefix { new } else { old }));
                }
                Expression::Member { object, property } => {
                    k.frames.push(Frame::UpdateMember {
                        op: *op,
                        prefix: *prefix,
                    });
                    k.frames.push(key_frame(property));
                    k.frames.push(Frame::Expr(Rc::clone(object)));
                }
                _ => {
                    return Err(self.throw_error(
                        k,
                        ErrorKind::Reference,
                        "Invalid left-hand side expression in update operation",
                    ));
                }
            },
            Expression::Binary { op, left, right } => {
                k.frames.push(Frame::BinaryRight {
                    op: *op,
                    right: Rc::clone(right),
                });
                k.frames.push(Frame::Expr(Rc::clone(left)));
            }
            Expression::Logical { op, left, right } => {
                k.frames.push(Frame::LogicalRight {
                    op: *op,
                    right: Rc::clone(right),
                });
                k.frames.push(Frame::Expr(Rc::clone(left)));
            }
            Expression::Conditional {
                test,
                consequent,
                alternate,
            } => {
                k.frames.push(Frame::ConditionalBranch {
                    consequent: Rc::clone(consequent),
                    alternate: Rc::clone(alternate),
                });
                k.frames.push(Frame::Expr(Rc::clone(test)));
            }
            Expression::Assign { op, target, value } => match &**target {
                Expression::Identifier(name) => {
                    let binary = op.binary_op();
                    if binary.is_some() {
                        let old = self.read_name(k, name)?;
                        k.values.push(old);
                    }
                    k.frames.push(Frame::AssignName {
                        name: name.clone(),
                        op: binary,
                    });
                    k.frames.push(Frame::Expr(Rc::clone(value)));
                }
                Expression::Member { object, property } => {
                    match op.binary_op() {
                        None => {
                            k.frames.push(Frame::AssignMember { op: None });
                            k.frames.push(Frame::Expr(Rc::clone(value)));
                        }
                        Some(binary) => {
                            k.frames.push(Frame::AssignMemberRead {
                                op: binary,
                                value: Rc::clone(value),
                            });
                        }
                    }
                    k.frames.push(key_frame(property));
                    k.frames.push(Frame::Expr(Rc::clone(object)));
                }
                _ => {
                    return Err(self.throw_error(
                        k,
                        ErrorKind::Reference,
                        "Invalid left-hand side in assignment",
                    ));
                }
            },
            Expression::Sequence(items) => {
                for (i, item) in items.iter().enumerate().rev() {
                    k.frames.push(Frame::Expr(Rc::clone(item)));
                    if i > 0 {
                        k.frames.push(Frame::Discard);
                    }
                }
            }
            Expression::Call { callee, arguments } => {
                let name = callee.describe().map(JsString::from);
                k.frames.push(Frame::CallArgs {
                    arguments: Rc::clone(arguments),
                    next: 0,
                    name: name.clone(),
                });
                match &**callee {
                    Expression::Member { object, property } => {
                        k.frames.push(Frame::MethodLookup { name });
                        k.frames.push(key_frame(property));
                        k.frames.push(Frame::Expr(Rc::clone(object)));
                    }
                    _ => {
                        k.frames.push(Frame::Expr(Rc::clone(callee)));
                        k.frames.push(Frame::Push(Value::Undefined));
                    }
                }
            }
            Expression::New { callee, arguments } => {
                k.frames.push(Frame::NewArgs {
                    arguments: Rc::clone(arguments),
                    next: 0,
                    name: callee.describe().map(JsString::from),
                });
                k.frames.push(Frame::Expr(Rc::clone(callee)));
            }
            Expression::Member { object, property } => {
                k.frames.push(Frame::MemberGet);
                k.frames.push(key_frame(property));
                k.frames.push(Frame::Expr(Rc::clone(object)));
            }
        }
        Ok(Signal::Continue)
    }

    fn unary(&self, op: UnaryOp, operand: &Value) -> Value {
        let ops = self.ops();
        match op {
            UnaryOp::Minus => Value::Number(-ops.to_number(operand)),
            UnaryOp::Plus => Value::Number(ops.to_number(operand)),
            UnaryOp::Not => Value::Boolean(!operand.to_boolean()),
            UnaryOp::BitNot => Value::from(!to_int32(ops.to_number(operand))),
            UnaryOp::Typeof => Value::from(ops.type_of(operand)),
            UnaryOp::Void => Value::Undefined,
            UnaryOp::Delete => Value::Boolean(true),
        }
    }

    fn binary(
        &mut self,
        k: &Continuation,
        op: crate::ast::BinaryOp,
        left: &Value,
        right: &Value,
    ) -> Eval<Value> {
        let result = self.ops().binary(op, left, right);
        result.map_err(|error| match error {
            OpError::Type(message) => self.throw_error(k, ErrorKind::Type, message),
        })
    }

    fn array_with_holes(&mut self, items: Vec<Option<Value>>) -> ObjectId {
        let length = items.len();
        let array = self.create_array(Vec::new());
        for (index, item) in items.into_iter().enumerate() {
            if let Some(value) = item {
                self.heap
                    .define(array, index.to_string(), Property::data(value));
            }
        }
        self.heap.set(
            array,
            "length",
            Value::from(length as f64),
            self.config.max_proto_depth,
        );
        array
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Calls
    // ═══════════════════════════════════════════════════════════════════════

    fn invoke(
        &mut self,
        thread: ThreadId,
        k: &mut Continuation,
        argc: usize,
        name: Option<JsString>,
    ) -> Eval<Signal> {
        let args = split_args(k, argc)?;
        let callee = pop_value(k)?;
        let this = pop_value(k)?;

        let function = callee
            .as_object()
            .and_then(|id| self.heap.get(id).and_then(|o| o.function().cloned()).map(|f| (id, f)));
        match function {
            Some((id, FunctionData::Guest { node, scope })) => {
                self.enter_guest(k, id, node, scope, this, args, name, None)
            }
            Some((id, FunctionData::Native { id: native })) => {
                self.call_native(thread, k, id, native, this, args, false)
            }
            None => {
                let shown = self.callee_name(name, &callee);
                Err(self.throw_error(k, ErrorKind::Type, format!("{} is not a function", shown)))
            }
        }
    }

    fn construct(
        &mut self,
        thread: ThreadId,
        k: &mut Continuation,
        argc: usize,
        name: Option<JsString>,
    ) -> Eval<Signal> {
        let args = split_args(k, argc)?;
        let callee = pop_value(k)?;

        let function = callee
            .as_object()
            .and_then(|id| self.heap.get(id).and_then(|o| o.function().cloned()).map(|f| (id, f)));
        match function {
            Some((id, FunctionData::Guest { node, scope })) => {
                let proto = self
                    .get_property(id, "prototype")
                    .as_object()
                    .unwrap_or(self.intrinsics.object_prototype);
                let object = self.heap.alloc(Class::Object, Some(proto), ObjectData::Ordinary);
                self.enter_guest(
                    k,
                    id,
                    node,
                    scope,
                    Value::Object(object),
                    args,
                    name,
                    Some(object),
                )
            }
            Some((id, FunctionData::Native { id: native })) => {
                self.call_native(thread, k, id, native, Value::Undefined, args, true)
            }
            None => {
                let shown = self.callee_name(name, &callee);
                Err(self.throw_error(k, ErrorKind::Type, format!("{} is not a constructor", shown)))
            }
        }
    }

    fn callee_name(&self, name: Option<JsString>, callee: &Value) -> String {
        match name {
            Some(name) => name.to_string(),
            None => self.ops().to_string(callee).to_string(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn enter_guest(
        &mut self,
        k: &mut Continuation,
        function: ObjectId,
        node: Rc<crate::ast::FunctionNode>,
        closure: ScopeId,
        this: Value,
        args: Vec<Value>,
        call_name: Option<JsString>,
        construct: Option<ObjectId>,
    ) -> Eval<Signal> {
        if k.depth >= self.config.max_call_depth {
            return Err(self.throw_error(
                k,
                ErrorKind::Range,
                "Maximum call stack size exceeded",
            ));
        }

        let scope = self
            .scopes
            .create(ScopeKind::Function, Some(closure), this);
        for (i, param) in node.params.iter().enumerate() {
            let value = args.get(i).cloned().unwrap_or_default();
            self.scopes.declare(scope, param.clone(), value, true);
        }
        if !node.params.iter().any(|p| p == "arguments") {
            let arguments = self.heap.alloc(
                Class::Arguments,
                Some(self.intrinsics.object_prototype),
                ObjectData::Ordinary,
            );
            let length = args.len() as f64;
            for (i, value) in args.into_iter().enumerate() {
                self.heap
                    .define(arguments, i.to_string(), Property::data(value));
            }
            self.heap
                .define_hidden(arguments, "length", Value::from(length));
            self.scopes
                .declare(scope, JsString::from("arguments"), Value::Object(arguments), true);
        }
        self.instantiate_hoisted(scope, &node.hoisted)?;

        let name = node
            .name
            .clone()
            .or(call_name)
            .unwrap_or_else(|| JsString::from(""));
        k.frames.push(Frame::CallBoundary {
            function,
            name,
            saved_scope: k.scope,
            saved_last: std::mem::take(&mut k.last_value),
            height: k.values.len(),
            construct,
        });
        k.frames.push(Frame::Statements {
            body: node.body.clone(),
            next: 0,
        });
        k.scope = scope;
        k.depth += 1;
        Ok(Signal::Continue)
    }

    fn leave_call(
        &mut self,
        k: &mut Continuation,
        saved_scope: ScopeId,
        saved_last: Value,
        height: usize,
        construct: Option<ObjectId>,
        result: Value,
    ) {
        k.scope = saved_scope;
        k.values.truncate(height);
        k.last_value = saved_last;
        k.depth = k.depth.saturating_sub(1);
        let result = match (construct, &result) {
            (Some(object), value) if !matches!(value, Value::Object(_)) => Value::Object(object),
            _ => result,
        };
        k.values.push(result);
    }

    #[allow(clippy::too_many_arguments)]
    fn call_native(
        &mut self,
        thread: ThreadId,
        k: &mut Continuation,
        callee: ObjectId,
        native: JsString,
        this: Value,
        args: Vec<Value>,
        construct: bool,
    ) -> Eval<Signal> {
        let f = self
            .natives
            .get(&native)
            .ok_or_else(|| EngineError::UnknownNative(native.to_string()))?;
        let (outcome, resolver) = {
            let mut call = NativeCall::new(self, k, thread, callee, this, args, construct);
            let outcome = f(&mut call);
            (outcome, call.issued_resolver())
        };

        match outcome {
            NativeOutcome::Return(value) => {
                k.values.push(value);
                Ok(Signal::Continue)
            }
            NativeOutcome::Throw(value) => Err(Fault::Throw(value)),
            NativeOutcome::Block => {
                tracing::debug!(
                    target: "spindle::bridge",
                    %thread,
                    native = %native,
                    resolver = ?resolver,
                    "bridge.block"
                );
                k.frames.push(Frame::AwaitNative { native });
                Ok(Signal::Block(resolver))
            }
            NativeOutcome::Sleep(0) | NativeOutcome::Yield => {
                k.values.push(Value::Undefined);
                Ok(Signal::Yield)
            }
            NativeOutcome::Sleep(ms) => {
                k.values.push(Value::Undefined);
                Ok(Signal::Sleep(self.now().saturating_add(ms)))
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Names and members
    // ═══════════════════════════════════════════════════════════════════════

    fn read_name(&mut self, k: &Continuation, name: &JsString) -> Eval<Value> {
        match self
            .scopes
            .lookup(k.scope, name, self.config.max_scope_depth)?
        {
            Some(value) => Ok(value),
            None => Err(self.throw_error(k, ErrorKind::Reference, format!("{} is not defined", name))),
        }
    }

    fn write_name(&mut self, k: &Continuation, name: &JsString, value: Value) -> Eval<()> {
        match self
            .scopes
            .assign(k.scope, name, value, self.config.max_scope_depth)?
        {
            Assignment::Done => Ok(()),
            Assignment::Immutable => Err(self.throw_error(
                k,
                ErrorKind::Type,
                "Assignment to constant variable.",
            )),
            Assignment::Unresolved => {
                Err(self.throw_error(k, ErrorKind::Reference, format!("{} is not defined", name)))
            }
        }
    }

    /// Initialize the nearest `let`/`const` binding of `name`.
    fn init_lexical(&mut self, k: &Continuation, name: &JsString, value: Value) -> Result<(), EngineError> {
        let scope = self
            .scopes
            .resolve(k.scope, name, self.config.max_scope_depth)?
            .ok_or_else(|| EngineError::corrupt(format!("'{}' was never declared", name)))?;
        self.scopes.initialize(scope, name, value)
    }

    fn get_member(&mut self, k: &Continuation, object: &Value, key: &Value) -> Eval<Value> {
        let key = self.ops().to_key(key);
        let depth = self.config.max_proto_depth;
        let proto = match object {
            Value::Object(id) => return Ok(self.heap.get_value(*id, &key, depth)),
            Value::String(s) => {
                if key == "length" {
                    return Ok(Value::from(s.utf16_len() as f64));
                }
                if let Some(index) = array_index(&key) {
                    return Ok(s
                        .code_unit_at(index as usize)
                        .map(Value::String)
                        .unwrap_or_default());
                }
                self.intrinsics.string_prototype
            }
            Value::Number(_) => self.intrinsics.number_prototype,
            Value::Boolean(_) => self.intrinsics.boolean_prototype,
            Value::Undefined | Value::Null => {
                let message = format!(
                    "Cannot read property '{}' of {}",
                    key,
                    self.ops().to_string(object)
                );
                return Err(self.throw_error(k, ErrorKind::Type, message));
            }
        };
        Ok(self.heap.get_value(proto, &key, depth))
    }

    fn put_member(&mut self, k: &Continuation, object: &Value, key: &Value, value: Value) -> Eval<()> {
        let key = self.ops().to_key(key);
        let id = match object {
            Value::Object(id) => *id,
            Value::Undefined | Value::Null => {
                let message = format!(
                    "Cannot set property '{}' of {}",
                    key,
                    self.ops().to_string(object)
                );
                return Err(self.throw_error(k, ErrorKind::Type, message));
            }
            // Writes to primitives are dropped.
            _ => return Ok(()),
        };
        match self.heap.set(id, &key, value, self.config.max_proto_depth) {
            SetOutcome::Done => Ok(()),
            SetOutcome::ReadOnly => Err(self.throw_error(
                k,
                ErrorKind::Type,
                format!("Cannot assign to read only property '{}' of object", key),
            )),
            SetOutcome::NotExtensible => Err(self.throw_error(
                k,
                ErrorKind::Type,
                format!("Cannot add property {}, object is not extensible", key),
            )),
            SetOutcome::InvalidLength => {
                Err(self.throw_error(k, ErrorKind::Range, "Invalid array length"))
            }
            SetOutcome::NoSuchObject => Err(EngineError::UnknownObject(id).into()),
        }
    }

    fn delete_member(&mut self, k: &Continuation, object: &Value, key: &Value) -> Eval<bool> {
        let key = self.ops().to_key(key);
        match object {
            Value::Object(id) => {
                if self.heap.delete(*id, &key) {
                    Ok(true)
                } else {
                    Err(self.throw_error(
                        k,
                        ErrorKind::Type,
                        format!("Cannot delete property '{}' of {}", key, self.display(object)),
                    ))
                }
            }
            Value::Undefined | Value::Null => {
                let message = format!(
                    "Cannot convert undefined or null to object (deleting '{}')",
                    key
                );
                Err(self.throw_error(k, ErrorKind::Type, message))
            }
            _ => Ok(true),
        }
    }

    /// A guest exception carrying `k`'s stack.
    fn throw_error(&mut self, k: &Continuation, kind: ErrorKind, message: impl Into<String>) -> Fault {
        let trace = k.stack_trace();
        Fault::Throw(Value::Object(self.make_error(kind, &message.into(), &trace)))
    }
}

fn updated(op: UpdateOp, old: f64) -> f64 {
    match op {
        UpdateOp::Increment => old + 1.0,
        UpdateOp::Decrement => old - 1.0,
    }
}
