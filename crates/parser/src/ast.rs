#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn join(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

pub type ExprWithSpan<'a> = (Expr<'a>, Span);
pub type StmtWithSpan<'a> = (Stmt<'a>, Span);

#[derive(Clone, Debug, Default)]
pub struct Module<'a> {
    pub body: Vec<StmtWithSpan<'a>>,
}

#[derive(Clone, Debug)]
pub enum Stmt<'a> {
    Expr(ExprWithSpan<'a>),
    Assign {
        targets: Vec<ExprWithSpan<'a>>,
        value: ExprWithSpan<'a>,
    },
    AugAssign {
        target: ExprWithSpan<'a>,
        op: BinOp,
        value: ExprWithSpan<'a>,
    },
    Pass,
    Break,
    Continue,
    Return(Option<ExprWithSpan<'a>>),
    Raise {
        exc: Option<ExprWithSpan<'a>>,
        cause: Option<ExprWithSpan<'a>>,
    },
    Global(Vec<&'a str>),
    Nonlocal(Vec<&'a str>),
    Delete(Vec<ExprWithSpan<'a>>),
    Assert {
        test: ExprWithSpan<'a>,
        msg: Option<ExprWithSpan<'a>>,
    },
    Import(Vec<Alias<'a>>),
    ImportFrom {
        module: Option<&'a str>,
        names: ImportNames<'a>,
        level: usize,
    },
    If {
        test: ExprWithSpan<'a>,
        body: Vec<StmtWithSpan<'a>>,
        orelse: Vec<StmtWithSpan<'a>>,
    },
    While {
        test: ExprWithSpan<'a>,
        body: Vec<StmtWithSpan<'a>>,
        orelse: Vec<StmtWithSpan<'a>>,
    },
    For {
        target: ExprWithSpan<'a>,
        iter: ExprWithSpan<'a>,
        body: Vec<StmtWithSpan<'a>>,
        orelse: Vec<StmtWithSpan<'a>>,
    },
    Try {
        body: Vec<StmtWithSpan<'a>>,
        handlers: Vec<ExceptHandler<'a>>,
        orelse: Vec<StmtWithSpan<'a>>,
        finalbody: Vec<StmtWithSpan<'a>>,
    },
    With {
        items: Vec<WithItem<'a>>,
        body: Vec<StmtWithSpan<'a>>,
    },
    FunctionDef {
        name: &'a str,
        params: Params<'a>,
        body: Vec<StmtWithSpan<'a>>,
        decorators: Vec<ExprWithSpan<'a>>,
    },
    ClassDef {
        name: &'a str,
        bases: Vec<Arg<'a>>,
        body: Vec<StmtWithSpan<'a>>,
        decorators: Vec<ExprWithSpan<'a>>,
    },
}

impl Stmt<'_> {
    /// Short construct name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Stmt::Expr(_) => "expression statement",
            Stmt::Assign { .. } => "assignment",
            Stmt::AugAssign { .. } => "augmented assignment",
            Stmt::Pass => "pass",
            Stmt::Break => "break",
            Stmt::Continue => "continue",
            Stmt::Return(_) => "return",
            Stmt::Raise { .. } => "raise",
            Stmt::Global(_) => "global",
            Stmt::Nonlocal(_) => "nonlocal",
            Stmt::Delete(_) => "del",
            Stmt::Assert { .. } => "assert",
            Stmt::Import(_) => "import",
            Stmt::ImportFrom { .. } => "from-import",
            Stmt::If { .. } => "if",
            Stmt::While { .. } => "while",
            Stmt::For { .. } => "for",
            Stmt::Try { .. } => "try",
            Stmt::With { .. } => "with",
            Stmt::FunctionDef { .. } => "function definition",
            Stmt::ClassDef { .. } => "class definition",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alias<'a> {
    /// Dotted name as written, e.g. `a.b.c`.
    pub name: &'a str,
    pub asname: Option<&'a str>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportNames<'a> {
    Star,
    List(Vec<Alias<'a>>),
}

#[derive(Clone, Debug)]
pub struct ExceptHandler<'a> {
    pub typ: Option<ExprWithSpan<'a>>,
    pub name: Option<&'a str>,
    pub body: Vec<StmtWithSpan<'a>>,
    pub span: Span,
}

#[derive(Clone, Debug)]
pub struct WithItem<'a> {
    pub context: ExprWithSpan<'a>,
    pub vars: Option<ExprWithSpan<'a>>,
}

#[derive(Clone, Debug, Default)]
pub struct Params<'a> {
    pub args: Vec<Param<'a>>,
    pub vararg: Option<&'a str>,
    pub kwonly: Vec<Param<'a>>,
    pub kwarg: Option<&'a str>,
}

impl<'a> Params<'a> {
    pub fn names(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.args
            .iter()
            .map(|p| p.name)
            .chain(self.vararg)
            .chain(self.kwonly.iter().map(|p| p.name))
            .chain(self.kwarg)
    }

    pub fn defaults(&self) -> impl Iterator<Item = &ExprWithSpan<'a>> {
        self.args
            .iter()
            .chain(&self.kwonly)
            .filter_map(|p| p.default.as_ref())
    }
}

#[derive(Clone, Debug)]
pub struct Param<'a> {
    pub name: &'a str,
    pub default: Option<ExprWithSpan<'a>>,
}

#[derive(Clone, Debug)]
pub enum Arg<'a> {
    Positional(ExprWithSpan<'a>),
    Keyword(&'a str, ExprWithSpan<'a>),
    Star(ExprWithSpan<'a>),
    DoubleStar(ExprWithSpan<'a>),
}

impl<'a> Arg<'a> {
    pub fn value(&self) -> &ExprWithSpan<'a> {
        match self {
            Arg::Positional(e) | Arg::Keyword(_, e) | Arg::Star(e) | Arg::DoubleStar(e) => e,
        }
    }
}

#[derive(Clone, Debug)]
pub enum Expr<'a> {
    Name(&'a str),
    Const(Const),
    Num(Num<'a>),
    Str(String),
    Bytes(Vec<u8>),
    FormattedStr(String),
    BinOp {
        op: BinOp,
        left: Box<ExprWithSpan<'a>>,
        right: Box<ExprWithSpan<'a>>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<ExprWithSpan<'a>>,
    },
    BoolOp {
        op: BoolOp,
        left: Box<ExprWithSpan<'a>>,
        right: Box<ExprWithSpan<'a>>,
    },
    Compare {
        left: Box<ExprWithSpan<'a>>,
        ops: Vec<(CmpOp, ExprWithSpan<'a>)>,
    },
    Call {
        func: Box<ExprWithSpan<'a>>,
        args: Vec<Arg<'a>>,
    },
    Attribute {
        value: Box<ExprWithSpan<'a>>,
        attr: &'a str,
    },
    Subscript {
        value: Box<ExprWithSpan<'a>>,
        index: Box<ExprWithSpan<'a>>,
    },
    Slice {
        lower: Option<Box<ExprWithSpan<'a>>>,
        upper: Option<Box<ExprWithSpan<'a>>>,
        step: Option<Box<ExprWithSpan<'a>>>,
    },
    List(Vec<ExprWithSpan<'a>>),
    Tuple(Vec<ExprWithSpan<'a>>),
    Set(Vec<ExprWithSpan<'a>>),
    Dict(Vec<(ExprWithSpan<'a>, ExprWithSpan<'a>)>),
    Lambda {
        params: Params<'a>,
        body: Box<ExprWithSpan<'a>>,
    },
    IfExp {
        test: Box<ExprWithSpan<'a>>,
        body: Box<ExprWithSpan<'a>>,
        orelse: Box<ExprWithSpan<'a>>,
    },
    Comprehension {
        kind: CompKind,
        element: Box<ExprWithSpan<'a>>,
        /// Value expression of a dict comprehension.
        value: Option<Box<ExprWithSpan<'a>>>,
        generators: Vec<CompFor<'a>>,
    },
    Starred(Box<ExprWithSpan<'a>>),
    Yield(Option<Box<ExprWithSpan<'a>>>),
}

impl Expr<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            Expr::Name(_) => "name",
            Expr::Const(_) => "constant",
            Expr::Num(_) => "number",
            Expr::Str(_) => "string literal",
            Expr::Bytes(_) => "bytes literal",
            Expr::FormattedStr(_) => "f-string",
            Expr::BinOp { .. } => "binary operation",
            Expr::UnaryOp { .. } => "unary operation",
            Expr::BoolOp { .. } => "boolean operation",
            Expr::Compare { .. } => "comparison",
            Expr::Call { .. } => "function call",
            Expr::Attribute { .. } => "attribute",
            Expr::Subscript { .. } => "subscript",
            Expr::Slice { .. } => "slice",
            Expr::List(_) => "list display",
            Expr::Tuple(_) => "tuple",
            Expr::Set(_) => "set display",
            Expr::Dict(_) => "dict display",
            Expr::Lambda { .. } => "lambda",
            Expr::IfExp { .. } => "conditional expression",
            Expr::Comprehension { .. } => "comprehension",
            Expr::Starred(_) => "starred expression",
            Expr::Yield(_) => "yield expression",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Const {
    True,
    False,
    None,
    Ellipsis,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Num<'a> {
    Int(&'a str),
    Float(&'a str),
    Imaginary(&'a str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    MatMul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
    Invert,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompKind {
    List,
    Set,
    Dict,
    Generator,
}

#[derive(Clone, Debug)]
pub struct CompFor<'a> {
    pub target: ExprWithSpan<'a>,
    pub iter: ExprWithSpan<'a>,
    pub ifs: Vec<ExprWithSpan<'a>>,
}
