use core::fmt;
use std::time::Duration;

/// Root AST definition: one parsed script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub statements: Vec<Statement>,
}

impl Program {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self { statements }
    }
}

/// Literal values as they appear in source.
///
/// Containers nest literals only; general expression lists (for example a
/// parallel composition group) use [`Expression::List`] instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Duration(Duration),
    List(Vec<Literal>),
    Map(Vec<(String, Literal)>),
    Tuple(Vec<Literal>),
    Set(Vec<Literal>),
    Null,
}

/// The four variable partitions of an execution context.
///
/// Unqualified names resolve to `local` only; a qualified read of
/// `scope:name` never falls back to another partition.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Local,
    Private,
    Public,
    System,
}

/// Binary operators, including the composition operator `|`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    LessThanEqual,
    GreaterThanEqual,
    And,
    Or,
    /// Sequential function composition. Only meaningful inside a
    /// declarative function body.
    Pipe,
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::LessThan => "<",
            Self::GreaterThan => ">",
            Self::LessThanEqual => "<=",
            Self::GreaterThanEqual => ">=",
            Self::And => "and",
            Self::Or => "or",
            Self::Pipe => "|",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Negate,
}

/// A call-site argument, positional or named.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Positional(Expression),
    Named { name: String, value: Expression },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    /// Unqualified identifier; resolves in the `local` scope (or, inside a
    /// composition, the pipeline capture namespace first).
    Variable(String),
    /// Scope-qualified reference: `scope:name`.
    ScopedRef {
        scope: Scope,
        name: String,
    },
    /// General list expression. Outside a composition body this evaluates
    /// to a list value; inside one it denotes a parallel group.
    List(Vec<Expression>),
    BinaryOp {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    FunctionCall {
        function: String,
        arguments: Vec<Argument>,
    },
    /// Sugar for `method(receiver, args...)` with struct-method dispatch.
    MethodCall {
        receiver: Box<Expression>,
        method: String,
        arguments: Vec<Argument>,
    },
    FieldAccess {
        object: Box<Expression>,
        field: String,
    },
    Index {
        object: Box<Expression>,
        index: Box<Expression>,
    },
    /// Call to the opaque reasoning collaborator. The optional type hint
    /// drives response coercion and struct-description prompting.
    Reason {
        arguments: Vec<Argument>,
        expected_type: Option<String>,
    },
    /// The `$$` marker. Valid only inside a composition body.
    Placeholder,
    /// `stage as name` inside a composition body.
    CaptureAs {
        stage: Box<Expression>,
        name: String,
    },
}

impl Expression {
    /// Short operand description used in composition diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Expression::Literal(lit) => format!("literal {:?}", lit),
            Expression::Variable(name) => format!("identifier '{}'", name),
            Expression::ScopedRef { scope, name } => format!("reference '{}:{}'", scope, name),
            Expression::List(_) => "list expression".to_string(),
            Expression::BinaryOp { op, .. } => format!("'{}' expression", op),
            Expression::UnaryOp { .. } => "unary expression".to_string(),
            Expression::FunctionCall { function, .. } => format!("call to '{}'", function),
            Expression::MethodCall { method, .. } => format!("method call '{}'", method),
            Expression::FieldAccess { field, .. } => format!("field access '.{}'", field),
            Expression::Index { .. } => "index expression".to_string(),
            Expression::Reason { .. } => "reason expression".to_string(),
            Expression::Placeholder => "placeholder '$$'".to_string(),
            Expression::CaptureAs { name, .. } => format!("capture 'as {}'", name),
        }
    }
}

/// A declared parameter: name, type annotation, optional default.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    pub name: String,
    pub type_annotation: TypeAnnotation,
    pub default: Option<Expression>,
}

impl ParamDef {
    pub fn new(name: impl Into<String>, type_annotation: TypeAnnotation) -> Self {
        Self {
            name: name.into(),
            type_annotation,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Expression) -> Self {
        self.default = Some(default);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TypeAnnotation {
    /// Matches any runtime type.
    #[default]
    Any,
    /// Matches the named runtime type exactly (a primitive name or a
    /// registered struct type name).
    Named(String),
}

impl TypeAnnotation {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }
}

impl fmt::Display for TypeAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Named(name) => write!(f, "{}", name),
        }
    }
}

/// Function definition node. Multiple definitions may share a name to form
/// a polymorphic family; the registry keeps them in registration order.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<ParamDef>,
    /// Name of a trailing variadic parameter capturing extra positional
    /// arguments as a list.
    pub variadic: Option<String>,
    pub return_type: Option<String>,
    pub body: FunctionDefBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionDefBody {
    /// Ordinary imperative body.
    Block(Vec<Statement>),
    /// Declarative composition body (`def p(x) = f | g`). Validated and
    /// lowered into a pipeline when the definition is evaluated.
    Composition(Expression),
}

/// Struct type definition: ordered fields, each with a declared type name
/// and an optional free-text description surfaced to reasoning prompts.
#[derive(Debug, Clone, PartialEq)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub type_name: String,
    pub description: Option<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// One `on <Condition>` arm of a `try` statement. A `None` condition
/// catches every runtime error.
#[derive(Debug, Clone, PartialEq)]
pub struct OnHandler {
    pub condition: Option<String>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Expression(Expression),
    /// Assignment to one or more targets. Multiple targets unpack a tuple
    /// value positionally. Targets are variables, scoped references, or
    /// struct field accesses.
    Assignment {
        targets: Vec<Expression>,
        value: Expression,
    },
    Return(Option<Expression>),
    If {
        condition: Expression,
        then_block: Vec<Statement>,
        else_block: Option<Vec<Statement>>,
    },
    While {
        condition: Expression,
        body: Vec<Statement>,
    },
    For {
        variable: String,
        iterable: Expression,
        body: Vec<Statement>,
    },
    Break,
    Continue,
    /// Runtime error interception: handlers match by condition name.
    Try {
        body: Vec<Statement>,
        handlers: Vec<OnHandler>,
    },
    StructDef(StructDef),
    FunctionDef(FunctionDef),
    Block(Vec<Statement>),
}
