//! Syntax tree shared by the parser and the tree-walking evaluator.
//!
//! Nodes are built once per parse and walked read-only; re-evaluating a
//! program never mutates its tree.

#[derive(Debug, PartialEq, Clone)]
pub enum Expression {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Str(String),
    NoneLiteral,
    Identifier(String),
    FString(Vec<FStringPart>),
    List(Vec<Expression>),
    Tuple(Vec<Expression>),
    Dict(Vec<(Expression, Expression)>),
    Set(Vec<Expression>),
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    BoolOp {
        op: BoolOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    /// Chained comparison: `a < b <= c` keeps one leftmost operand and a
    /// list of (operator, operand) links evaluated left to right.
    Compare {
        first: Box<Expression>,
        rest: Vec<(CompareOperator, Expression)>,
    },
    Call {
        callee: Box<Expression>,
        args: Vec<Expression>,
        kwargs: Vec<(String, Expression)>,
    },
    Index {
        object: Box<Expression>,
        index: Box<Expression>,
    },
    Slice {
        object: Box<Expression>,
        start: Option<Box<Expression>>,
        stop: Option<Box<Expression>>,
        step: Option<Box<Expression>>,
    },
    Attribute {
        object: Box<Expression>,
        name: String,
    },
    Lambda {
        params: Vec<Parameter>,
        body: Box<Expression>,
    },
    Comprehension {
        kind: ComprehensionKind,
        element: Box<Expression>,
        /// Value expression for dict comprehensions.
        value: Option<Box<Expression>>,
        target: Vec<String>,
        iterable: Box<Expression>,
        filter: Option<Box<Expression>>,
    },
}

#[derive(Debug, PartialEq, Clone)]
pub enum FStringPart {
    Literal(String),
    Expr(Expression),
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ComprehensionKind {
    List,
    Dict,
    Set,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum BoolOperator {
    And,
    Or,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum UnaryOperator {
    Neg,
    Not,
    Invert,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum CompareOperator {
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    In,
    NotIn,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ParameterKind {
    Positional,
    VarArgs,
    KwArgs,
}

#[derive(Debug, PartialEq, Clone)]
pub struct Parameter {
    pub name: String,
    pub default: Option<Expression>,
    pub kind: ParameterKind,
}

impl Parameter {
    pub fn positional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
            kind: ParameterKind::Positional,
        }
    }
}

/// Assignment target forms accepted by the parser.
#[derive(Debug, PartialEq, Clone)]
pub enum AssignTarget {
    Name(String),
    Index {
        object: Expression,
        index: Expression,
    },
    Attribute {
        object: Expression,
        name: String,
    },
}

#[derive(Debug, PartialEq, Clone)]
pub struct ExceptHandler {
    /// Exception kind names to match; empty means catch-all.
    pub kinds: Vec<String>,
    pub binding: Option<String>,
    pub body: Vec<Statement>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Statement {
    FunctionDef {
        name: String,
        params: Vec<Parameter>,
        body: Vec<Statement>,
    },
    ClassDef {
        name: String,
        base: Option<String>,
        body: Vec<Statement>,
    },
    Assign {
        target: AssignTarget,
        value: Expression,
    },
    AugAssign {
        target: AssignTarget,
        op: BinaryOperator,
        value: Expression,
    },
    If {
        /// `if`/`elif` arms in source order.
        branches: Vec<(Expression, Vec<Statement>)>,
        else_body: Vec<Statement>,
    },
    While {
        condition: Expression,
        body: Vec<Statement>,
    },
    For {
        target: Vec<String>,
        iterable: Expression,
        body: Vec<Statement>,
    },
    Try {
        body: Vec<Statement>,
        handlers: Vec<ExceptHandler>,
        finally_body: Vec<Statement>,
    },
    Raise(Option<Expression>),
    Return(Option<Expression>),
    Break,
    Continue,
    Pass,
    Import {
        name: String,
    },
    FromImport {
        module: String,
        names: Vec<String>,
    },
    Global(Vec<String>),
    Expr(Expression),
}

#[derive(Debug, PartialEq, Clone)]
pub struct Program {
    pub statements: Vec<Statement>,
}
