//! Abstract Syntax Tree for the guest language
//!
//! Nodes are shared through `Rc` so that evaluator states can hold on to the
//! sub-tree they are working on without copying it. The tree is serde
//! serializable because those states are part of a checkpoint.

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::value::JsString;

/// A statement list (program, function body, block, case body)
pub type StatementList = Rc<[Rc<Statement>]>;

/// A complete program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub body: StatementList,
    pub hoisted: Hoisted,
}

/// Declarations instantiated when a function (or the program) is entered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hoisted {
    /// `var` names, in first-declaration order
    pub vars: Vec<JsString>,
    /// `let`/`const` names declared directly in the body
    pub lexical: Vec<LexicalName>,
    /// Function declarations, instantiated before the first statement runs
    pub functions: Vec<Rc<FunctionNode>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexicalName {
    pub name: JsString,
    pub constant: bool,
}

/// A function declaration or expression
#[derive(Debug, Serialize, Deserialize)]
pub struct FunctionNode {
    pub name: Option<JsString>,
    pub params: Vec<JsString>,
    pub body: StatementList,
    pub hoisted: Hoisted,
    /// A named function expression binds its own name in a scope of its own.
    pub is_expression: bool,
    /// Original source text, for dumps and `Function.prototype.toString`
    pub source: JsString,
    pub line: u32,
}

// ============ STATEMENTS ============

#[derive(Debug, Serialize, Deserialize)]
pub enum Statement {
    VariableDeclaration(VariableDeclaration),
    /// Hoisted; a no-op when reached
    FunctionDeclaration(Rc<FunctionNode>),

    Block(BlockStatement),
    If(IfStatement),
    Switch(SwitchStatement),
    For(ForStatement),
    ForIn(ForInStatement),
    While(WhileStatement),
    DoWhile(DoWhileStatement),
    Try(TryStatement),

    Return(Option<Rc<Expression>>),
    Break(Option<JsString>),
    Continue(Option<JsString>),
    Throw(Rc<Expression>),

    Expression(Rc<Expression>),
    Labeled(LabeledStatement),
    Empty,
    Debugger,
}

impl Statement {
    pub fn is_loop(&self) -> bool {
        matches!(
            self,
            Statement::For(_) | Statement::ForIn(_) | Statement::While(_) | Statement::DoWhile(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableKind {
    Var,
    Let,
    Const,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VariableDeclaration {
    pub kind: VariableKind,
    pub declarations: Rc<[VariableDeclarator]>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VariableDeclarator {
    pub name: JsString,
    pub init: Option<Rc<Expression>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockStatement {
    pub body: StatementList,
    /// `let`/`const` names scoped to this block; empty means no block scope
    pub lexical: Rc<[LexicalName]>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IfStatement {
    pub test: Rc<Expression>,
    pub consequent: Rc<Statement>,
    pub alternate: Option<Rc<Statement>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SwitchStatement {
    pub discriminant: Rc<Expression>,
    pub cases: Rc<[SwitchCase]>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SwitchCase {
    /// `None` for `default:`
    pub test: Option<Rc<Expression>>,
    pub body: StatementList,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum ForInit {
    Declaration(Rc<Statement>),
    Expression(Rc<Expression>),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ForStatement {
    pub init: Option<ForInit>,
    pub test: Option<Rc<Expression>>,
    pub update: Option<Rc<Expression>>,
    pub body: Rc<Statement>,
    /// `let`/`const` names from the init clause
    pub lexical: Rc<[LexicalName]>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ForInStatement {
    /// Assignment target for each key (an identifier or member expression)
    pub left: Rc<Expression>,
    /// `for (let k in ...)` declares `k` in a block scope around the loop
    pub lexical: Rc<[LexicalName]>,
    pub right: Rc<Expression>,
    pub body: Rc<Statement>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WhileStatement {
    pub test: Rc<Expression>,
    pub body: Rc<Statement>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DoWhileStatement {
    pub body: Rc<Statement>,
    pub test: Rc<Expression>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TryStatement {
    pub block: Rc<Statement>,
    pub handler: Option<CatchClause>,
    pub finalizer: Option<Rc<Statement>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CatchClause {
    pub param: JsString,
    pub body: Rc<Statement>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LabeledStatement {
    pub label: JsString,
    pub body: Rc<Statement>,
}

// ============ EXPRESSIONS ============

#[derive(Debug, Serialize, Deserialize)]
pub enum Expression {
    Literal(Literal),
    Identifier(JsString),
    This,
    /// `None` entries are holes (`[1, , 3]`)
    Array(Rc<[Option<Rc<Expression>>]>),
    Object(Rc<[ObjectProperty]>),
    Function(Rc<FunctionNode>),

    Unary(UnaryOp, Rc<Expression>),
    Update {
        op: UpdateOp,
        prefix: bool,
        target: Rc<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Rc<Expression>,
        right: Rc<Expression>,
    },
    Logical {
        op: LogicalOp,
        left: Rc<Expression>,
        right: Rc<Expression>,
    },
    Conditional {
        test: Rc<Expression>,
        consequent: Rc<Expression>,
        alternate: Rc<Expression>,
    },
    Assign {
        op: AssignOp,
        target: Rc<Expression>,
        value: Rc<Expression>,
    },
    Sequence(Rc<[Rc<Expression>]>),
    Call {
        callee: Rc<Expression>,
        arguments: Rc<[Rc<Expression>]>,
    },
    New {
        callee: Rc<Expression>,
        arguments: Rc<[Rc<Expression>]>,
    },
    Member {
        object: Rc<Expression>,
        property: MemberProperty,
    },
}

impl Expression {
    /// A short description used in "is not a function" messages.
    pub fn describe(&self) -> Option<String> {
        match self {
            Expression::Identifier(name) => Some(name.to_string()),
            Expression::This => Some("this".to_string()),
            Expression::Member { object, property } => {
                let base = object.describe()?;
                match property {
                    MemberProperty::Static(name) => Some(format!("{}.{}", base, name)),
                    MemberProperty::Computed(_) => Some(format!("{}[...]", base)),
                }
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Boolean(bool),
    Number(#[serde(with = "crate::value::number_repr")] f64),
    String(JsString),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ObjectProperty {
    pub key: JsString,
    pub value: Rc<Expression>,
}

#[derive(Debug, Serialize, Deserialize)]
pub enum MemberProperty {
    Static(JsString),
    Computed(Rc<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Minus,
    Plus,
    Not,
    BitNot,
    Typeof,
    Void,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOp {
    Increment,
    Decrement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Comparison
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,

    // Bitwise
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
    URShift,

    // Other
    In,
    Instanceof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,
    ModAssign,
    LShiftAssign,
    RShiftAssign,
    URShiftAssign,
    BitAndAssign,
    BitOrAssign,
    BitXorAssign,
}

impl AssignOp {
    /// The binary operator a compound assignment applies, if any.
    pub fn binary_op(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::AddAssign => Some(BinaryOp::Add),
            AssignOp::SubAssign => Some(BinaryOp::Sub),
            AssignOp::MulAssign => Some(BinaryOp::Mul),
            AssignOp::DivAssign => Some(BinaryOp::Div),
            AssignOp::ModAssign => Some(BinaryOp::Mod),
            AssignOp::LShiftAssign => Some(BinaryOp::LShift),
            AssignOp::RShiftAssign => Some(BinaryOp::RShift),
            AssignOp::URShiftAssign => Some(BinaryOp::URShift),
            AssignOp::BitAndAssign => Some(BinaryOp::BitAnd),
            AssignOp::BitOrAssign => Some(BinaryOp::BitOr),
            AssignOp::BitXorAssign => Some(BinaryOp::BitXor),
        }
    }
}
