//! Explicit evaluator states
//!
//! A thread's continuation is a stack of [`Frame`]s plus a stack of partial
//! values. Each frame is one pending piece of work on the guest program:
//! "evaluate this expression", "apply this operator to the two values on
//! top", "run the next statement of this block". Frames are plain data, so
//! a paused thread can be serialized and resumed in another process.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::ast::{
    BinaryOp, Expression, LogicalOp, ObjectProperty, Statement, StatementList, SwitchCase,
    UnaryOp, UpdateOp, VariableDeclarator, VariableKind,
};
use crate::heap::ObjectId;
use crate::scope::ScopeId;
use crate::value::{JsString, Value};

/// Abrupt completion travelling down the state stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Abrupt {
    Return(Value),
    Break(Option<JsString>),
    Continue(Option<JsString>),
    Throw(Value),
}

/// Which part of a `try` statement is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TryPhase {
    Block,
    Catch,
}

/// A frame on the evaluation stack
///
/// Expression frames leave exactly one value on the value stack when they
/// complete; statement frames leave none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    // ═══════════════════════════════════════════════════════════════════════
    // Expression Evaluation
    // ═══════════════════════════════════════════════════════════════════════
    /// Evaluate an expression
    Expr(Rc<Expression>),

    /// Push a value that is already known (static member keys)
    Push(Value),

    /// Drop the top value
    Discard,

    /// Binary: left done, evaluate right
    BinaryRight { op: BinaryOp, right: Rc<Expression> },

    /// Binary: both done, compute result
    BinaryApply { op: BinaryOp },

    /// Logical: left done, maybe short-circuit
    LogicalRight { op: LogicalOp, right: Rc<Expression> },

    /// Unary: operand done, apply operator
    UnaryApply { op: UnaryOp },

    /// Conditional: test done, pick branch
    ConditionalBranch {
        consequent: Rc<Expression>,
        alternate: Rc<Expression>,
    },

    /// Member: object and key done, read the property
    MemberGet,

    /// `delete obj[key]`: object and key done
    DeleteMember,

    /// Call through a member: object and key done, leave `this` and the
    /// function on the stack
    MethodLookup { name: Option<JsString> },

    /// Call: `this` and callee done, evaluate the argument at `next`
    CallArgs {
        arguments: Rc<[Rc<Expression>]>,
        next: usize,
        name: Option<JsString>,
    },

    /// `this`, callee and `argc` arguments are on the stack
    Invoke {
        argc: usize,
        name: Option<JsString>,
    },

    /// Constructor and `argc` arguments are on the stack
    Construct {
        argc: usize,
        name: Option<JsString>,
    },

    /// New: constructor done, evaluate the argument at `next`
    NewArgs {
        arguments: Rc<[Rc<Expression>]>,
        next: usize,
        name: Option<JsString>,
    },

    /// Array literal: element at `next` is evaluated next; `None` marks a
    /// hole
    ArrayLiteral {
        elements: Rc<[Option<Rc<Expression>>]>,
        next: usize,
        done: Vec<Option<Value>>,
    },

    /// Object literal: value of property `next - 1` is on the stack
    ObjectLiteral {
        properties: Rc<[ObjectProperty]>,
        next: usize,
        object: ObjectId,
    },

    /// Assign to a name; the right-hand side (and, for compound operators,
    /// the old value beneath it) is on the stack
    AssignName {
        name: JsString,
        op: Option<BinaryOp>,
    },

    /// Compound member assignment: object and key done, read the old value
    /// then evaluate the right-hand side
    AssignMemberRead {
        op: BinaryOp,
        value: Rc<Expression>,
    },

    /// Member assignment: object, key, [old value,] right-hand side done
    AssignMember { op: Option<BinaryOp> },

    /// `++`/`--` on a member: object and key done
    UpdateMember { op: UpdateOp, prefix: bool },

    // ═══════════════════════════════════════════════════════════════════════
    // Statement Execution
    // ═══════════════════════════════════════════════════════════════════════
    /// Execute a statement
    Stmt(Rc<Statement>),

    /// Execute the statement at `next`, then the rest
    Statements { body: StatementList, next: usize },

    /// Expression statement done: the value becomes the completion value
    ExprStmtDone,

    /// Variable declaration: initialize the declarator at `next`
    Declarators {
        kind: VariableKind,
        list: Rc<[VariableDeclarator]>,
        next: usize,
    },

    /// Declarator initializer done
    InitBinding { name: JsString, kind: VariableKind },

    /// Leave a block scope
    BlockExit { scope: ScopeId },

    /// If: test done
    IfBranch {
        consequent: Rc<Statement>,
        alternate: Option<Rc<Statement>>,
    },

    /// While: about to test; also the break/continue target
    WhileLoop {
        test: Rc<Expression>,
        body: Rc<Statement>,
        labels: Vec<JsString>,
    },

    /// While: test done
    WhileCheck {
        test: Rc<Expression>,
        body: Rc<Statement>,
        labels: Vec<JsString>,
    },

    /// Do-while: body done, test next; also the break/continue target
    DoWhileLoop {
        body: Rc<Statement>,
        test: Rc<Expression>,
        labels: Vec<JsString>,
    },

    /// Do-while: test done
    DoWhileCheck {
        body: Rc<Statement>,
        test: Rc<Expression>,
        labels: Vec<JsString>,
    },

    /// For: between iterations; `run_update` is false before the first one
    ForNext {
        test: Option<Rc<Expression>>,
        update: Option<Rc<Expression>>,
        body: Rc<Statement>,
        labels: Vec<JsString>,
        run_update: bool,
    },

    /// For: test done
    ForCheck {
        test: Option<Rc<Expression>>,
        update: Option<Rc<Expression>>,
        body: Rc<Statement>,
        labels: Vec<JsString>,
    },

    /// For-in: object done, collect keys. `declares` is set for
    /// `for (let k in ...)`, whose binding is initialized rather than assigned.
    ForInStart {
        left: Rc<Expression>,
        declares: bool,
        body: Rc<Statement>,
        labels: Vec<JsString>,
    },

    /// For-in: between iterations
    ForInNext {
        object: ObjectId,
        keys: Vec<JsString>,
        next: usize,
        left: Rc<Expression>,
        declares: bool,
        body: Rc<Statement>,
        labels: Vec<JsString>,
    },

    /// Switch: discriminant done
    SwitchStart { cases: Rc<[SwitchCase]> },

    /// Switch: try the case at `next`
    SwitchMatch {
        discriminant: Value,
        cases: Rc<[SwitchCase]>,
        next: usize,
    },

    /// Switch: case test at `index` done
    SwitchTest {
        discriminant: Value,
        cases: Rc<[SwitchCase]>,
        index: usize,
    },

    /// Switch: run case bodies from `next` on (fall-through); the break target
    SwitchBody {
        cases: Rc<[SwitchCase]>,
        next: usize,
    },

    /// Try: guards the block or handler beneath it. `node` is the `try`
    /// statement itself.
    Try {
        node: Rc<Statement>,
        phase: TryPhase,
        scope: ScopeId,
        height: usize,
        depth: usize,
    },

    /// Finally block running; re-raises `saved` once it completes normally
    Finally { saved: Option<Abrupt> },

    /// Return: argument done
    ReturnValue,

    /// Throw: argument done
    ThrowValue,

    /// Labeled statement; target of `break label`
    Labeled { labels: Vec<JsString> },

    /// Guest function call in progress; restores the caller on completion
    CallBoundary {
        function: ObjectId,
        name: JsString,
        saved_scope: ScopeId,
        saved_last: Value,
        height: usize,
        construct: Option<ObjectId>,
    },

    /// Blocked native call; the settled value (or error) resumes here
    AwaitNative { native: JsString },
}

impl Frame {
    /// Loop frames that `continue` (and unlabeled `break`) target
    pub fn loop_labels(&self) -> Option<&[JsString]> {
        match self {
            Frame::WhileLoop { labels, .. }
            | Frame::DoWhileLoop { labels, .. }
            | Frame::ForNext { labels, .. }
            | Frame::ForInNext { labels, .. } => Some(labels),
            _ => None,
        }
    }
}

/// The complete paused state of one thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Continuation {
    pub frames: Vec<Frame>,
    pub values: Vec<Value>,
    /// Innermost scope of the running code
    pub scope: ScopeId,
    /// Value of the last expression statement at the current call level
    pub last_value: Value,
    /// Number of guest calls in progress
    pub depth: usize,
}

impl Continuation {
    pub fn new(scope: ScopeId) -> Self {
        Self {
            frames: Vec::new(),
            values: Vec::new(),
            scope,
            last_value: Value::Undefined,
            depth: 0,
        }
    }

    /// No work left: the thread's program or call has run to the end.
    pub fn is_finished(&self) -> bool {
        self.frames.is_empty()
    }

    /// Function names of the calls in progress, innermost first.
    pub fn call_names(&self) -> Vec<JsString> {
        self.frames
            .iter()
            .rev()
            .filter_map(|f| match f {
                Frame::CallBoundary { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// A stack trace in the conventional `    at name` form.
    pub fn stack_trace(&self) -> String {
        let mut trace = String::new();
        for name in self.call_names() {
            trace.push_str("\n    at ");
            trace.push_str(if name.is_empty() { "<anonymous>" } else { &name });
        }
        trace.push_str("\n    at <thread>");
        trace
    }
}
