use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use parser::{
    Arg, CompFor, Expr, ExprWithSpan, ImportNames, Module, Params, Span, Stmt, StmtWithSpan,
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;
use std::collections::BTreeSet;
use typed_arena::Arena;

static BUILTINS: Lazy<FxHashSet<&'static str>> = Lazy::new(|| {
    [
        "ArithmeticError", "AssertionError", "AttributeError", "BaseException", "Exception",
        "False", "GeneratorExit", "ImportError", "IndexError", "KeyError", "KeyboardInterrupt",
        "LookupError", "NameError", "None", "NotImplemented", "NotImplementedError",
        "OSError", "OverflowError", "RuntimeError", "StopIteration", "SystemExit", "True",
        "TypeError", "UnboundLocalError", "UnicodeDecodeError", "UnicodeEncodeError",
        "ValueError", "ZeroDivisionError", "__import__", "__name__", "abs", "all", "any",
        "bin", "bool", "bytearray", "bytes", "callable", "chr", "classmethod", "dict", "dir",
        "divmod", "enumerate", "filter", "float", "frozenset", "getattr", "globals", "hasattr",
        "hash", "hex", "id", "int", "isinstance", "issubclass", "iter", "len", "list", "locals",
        "map", "max", "min", "next", "object", "oct", "open", "ord", "pow", "print", "property",
        "range", "repr", "reversed", "round", "set", "setattr", "slice", "sorted",
        "staticmethod", "str", "sum", "super", "tuple", "type", "vars", "zip",
    ]
    .into_iter()
    .collect()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Module,
    Function,
    Class,
    Comprehension,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Local,
    Free,
    Global,
    Builtin,
}

/// One lexical scope. Every name the scope mentions is classified when the
/// tree is built and the classification never changes afterwards.
pub struct Block<'b> {
    pub kind: BlockKind,
    pub name: String,
    parent: Option<&'b Block<'b>>,
    children: RefCell<FxHashMap<Span, &'b Block<'b>>>,
    params: Vec<String>,
    bound: BTreeSet<String>,
    bindings: FxHashMap<String, Binding>,
}

impl<'b> Block<'b> {
    pub fn parent(&self) -> Option<&'b Block<'b>> {
        self.parent
    }

    /// Scope introduced by the definition, lambda or comprehension at `span`.
    pub fn child(&self, span: Span) -> Option<&'b Block<'b>> {
        self.children.borrow().get(&span).copied()
    }

    pub fn binding(&self, name: &str) -> Binding {
        match self.bindings.get(name) {
            Some(b) => *b,
            None => resolve_outer(self.parent, name),
        }
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Names that live in target variables of this scope, excluding
    /// parameters, in sorted order.
    pub fn variables(&self) -> impl Iterator<Item = &str> + use<'_, 'b> {
        self.bound
            .iter()
            .filter(|n| !self.params.contains(*n) && self.bindings.get(*n) == Some(&Binding::Local))
            .map(String::as_str)
    }
}

fn resolve_outer(mut scope: Option<&Block<'_>>, name: &str) -> Binding {
    while let Some(b) = scope {
        match b.kind {
            BlockKind::Class => (),
            BlockKind::Module => return module_binding(b.bindings.get(name).copied(), name),
            BlockKind::Function | BlockKind::Comprehension => match b.bindings.get(name) {
                Some(Binding::Local | Binding::Free) => return Binding::Free,
                Some(Binding::Global | Binding::Builtin) => return Binding::Global,
                None => (),
            },
        }
        scope = b.parent;
    }
    module_binding(None, name)
}

fn module_binding(found: Option<Binding>, name: &str) -> Binding {
    match found {
        Some(b) => b,
        None if BUILTINS.contains(name) => Binding::Builtin,
        None => Binding::Global,
    }
}

/// Nearest enclosing function-like scope that binds `name` itself.
fn nonlocal_target(mut scope: Option<&Block<'_>>, name: &str) -> bool {
    while let Some(b) = scope {
        match b.kind {
            BlockKind::Class => (),
            BlockKind::Module => return false,
            BlockKind::Function | BlockKind::Comprehension => match b.bindings.get(name) {
                Some(Binding::Local | Binding::Free) => return true,
                Some(Binding::Global | Binding::Builtin) => return false,
                None => (),
            },
        }
        scope = b.parent;
    }
    false
}

pub fn build<'b>(arena: &'b Arena<Block<'b>>, module: &Module) -> Result<&'b Block<'b>> {
    let mut scan = Scan::default();
    scan.stmts(&module.body);
    make(arena, None, BlockKind::Module, "<module>", Vec::new(), scan)
}

fn make<'b, 's, 'a>(
    arena: &'b Arena<Block<'b>>,
    parent: Option<&'b Block<'b>>,
    kind: BlockKind,
    name: &str,
    params: Vec<String>,
    scan: Scan<'s, 'a>,
) -> Result<&'b Block<'b>> {
    for (n, span) in &scan.nonlocals {
        if kind == BlockKind::Module {
            return Err(Error::scope(
                "nonlocal declaration not allowed at module level",
                *span,
            ));
        }
        if scan.globals.contains_key(n) {
            return Err(Error::scope(format!("name '{n}' is nonlocal and global"), *span));
        }
        if params.iter().any(|p| p == n) {
            return Err(Error::scope(format!("name '{n}' is parameter and nonlocal"), *span));
        }
    }
    for (n, span) in &scan.globals {
        if params.iter().any(|p| p == n) {
            return Err(Error::scope(format!("name '{n}' is parameter and global"), *span));
        }
    }
    if let Some(e) = &scan.misplaced {
        return Err(e.clone());
    }
    let mut bindings = FxHashMap::default();
    let names: BTreeSet<&str> = scan
        .bound
        .iter()
        .chain(&scan.used)
        .chain(scan.globals.keys())
        .chain(scan.nonlocals.keys())
        .copied()
        .chain(params.iter().map(String::as_str))
        .collect();
    for n in names {
        let binding = if scan.globals.contains_key(n) {
            Binding::Global
        } else if let Some(span) = scan.nonlocals.get(n) {
            if !nonlocal_target(parent, n) {
                return Err(Error::scope(
                    format!("no binding for nonlocal '{n}' found"),
                    *span,
                ));
            }
            Binding::Free
        } else if kind == BlockKind::Module {
            module_binding(
                scan.bound.contains(n).then_some(Binding::Global),
                n,
            )
        } else if scan.bound.contains(n) || params.iter().any(|p| p == n) {
            Binding::Local
        } else {
            resolve_outer(parent, n)
        };
        bindings.insert(n.to_string(), binding);
    }
    let block: &'b Block<'b> = arena.alloc(Block {
        kind,
        name: name.to_string(),
        parent,
        children: RefCell::new(FxHashMap::default()),
        bound: scan
            .bound
            .iter()
            .map(|s| s.to_string())
            .chain(params.iter().cloned())
            .collect(),
        params,
        bindings,
    });
    for child in scan.children {
        let (span, built) = match child {
            Child::Function {
                name,
                params,
                body,
                span,
            } => {
                let mut inner = Scan::default();
                inner.stmts(body);
                let params = params.names().map(str::to_string).collect();
                (span, make(arena, Some(block), BlockKind::Function, name, params, inner)?)
            }
            Child::Lambda { params, body, span } => {
                let mut inner = Scan::default();
                inner.expr(body);
                let params = params.names().map(str::to_string).collect();
                let name = "<lambda>";
                (span, make(arena, Some(block), BlockKind::Function, name, params, inner)?)
            }
            Child::Class { name, body, span } => {
                let mut inner = Scan::default();
                inner.stmts(body);
                (span, make(arena, Some(block), BlockKind::Class, name, Vec::new(), inner)?)
            }
            Child::Comprehension {
                element,
                value,
                generators,
                span,
            } => {
                let mut inner = Scan::default();
                for (i, g) in generators.iter().enumerate() {
                    inner.target(&g.target);
                    if i > 0 {
                        inner.expr(&g.iter);
                    }
                    g.ifs.iter().for_each(|e| inner.expr(e));
                }
                inner.expr(element);
                if let Some(value) = value {
                    inner.expr(value);
                }
                let kind = BlockKind::Comprehension;
                (span, make(arena, Some(block), kind, "<comprehension>", Vec::new(), inner)?)
            }
        };
        block.children.borrow_mut().insert(span, built);
    }
    Ok(block)
}

enum Child<'s, 'a> {
    Function {
        name: &'a str,
        params: &'s Params<'a>,
        body: &'s [StmtWithSpan<'a>],
        span: Span,
    },
    Lambda {
        params: &'s Params<'a>,
        body: &'s ExprWithSpan<'a>,
        span: Span,
    },
    Class {
        name: &'a str,
        body: &'s [StmtWithSpan<'a>],
        span: Span,
    },
    Comprehension {
        element: &'s ExprWithSpan<'a>,
        value: Option<&'s ExprWithSpan<'a>>,
        generators: &'s [CompFor<'a>],
        span: Span,
    },
}

/// Names a single scope binds and mentions, without descending into nested
/// scopes.
#[derive(Default)]
struct Scan<'s, 'a> {
    bound: BTreeSet<&'a str>,
    used: BTreeSet<&'a str>,
    globals: FxHashMap<&'a str, Span>,
    nonlocals: FxHashMap<&'a str, Span>,
    /// Whether the first mention of a name stored to it.
    first_mention: FxHashMap<&'a str, bool>,
    misplaced: Option<Error>,
    children: Vec<Child<'s, 'a>>,
}

impl<'s, 'a> Scan<'s, 'a> {
    fn bind(&mut self, name: &'a str) {
        self.first_mention.entry(name).or_insert(true);
        self.bound.insert(name);
    }

    fn mention(&mut self, name: &'a str) {
        self.first_mention.entry(name).or_insert(false);
        self.used.insert(name);
    }

    /// A `global` or `nonlocal` must precede every other mention of the name.
    fn declare(&mut self, name: &'a str, kind: &str, span: Span) {
        if self.misplaced.is_some() {
            return;
        }
        if let Some(&stored) = self.first_mention.get(name) {
            let order = if stored {
                "assigned to before"
            } else {
                "used prior to"
            };
            self.misplaced = Some(Error::scope(
                format!("name '{name}' is {order} {kind} declaration"),
                span,
            ));
        }
    }

    fn stmts(&mut self, stmts: &'s [StmtWithSpan<'a>]) {
        for s in stmts {
            self.stmt(s);
        }
    }

    fn stmt(&mut self, (stmt, span): &'s StmtWithSpan<'a>) {
        match stmt {
            Stmt::Expr(e) => self.expr(e),
            Stmt::Assign { targets, value } => {
                self.expr(value);
                targets.iter().for_each(|t| self.target(t));
            }
            Stmt::AugAssign { target, value, .. } => {
                self.expr(value);
                if let (Expr::Name(n), _) = target {
                    self.mention(*n);
                }
                self.target(target);
            }
            Stmt::Pass | Stmt::Break | Stmt::Continue => (),
            Stmt::Return(e) => {
                if let Some(e) = e {
                    self.expr(e)
                }
            }
            Stmt::Raise { exc, cause } => {
                exc.iter().chain(cause).for_each(|e| self.expr(e));
            }
            Stmt::Global(names) => {
                for n in names {
                    self.declare(*n, "global", *span);
                    self.globals.entry(*n).or_insert(*span);
                }
            }
            Stmt::Nonlocal(names) => {
                for n in names {
                    self.declare(*n, "nonlocal", *span);
                    self.nonlocals.entry(*n).or_insert(*span);
                }
            }
            Stmt::Delete(targets) => targets.iter().for_each(|t| self.target(t)),
            Stmt::Assert { test, msg } => {
                self.expr(test);
                if let Some(msg) = msg {
                    self.expr(msg);
                }
            }
            Stmt::Import(aliases) => {
                for a in aliases {
                    let bound = match a.asname {
                        Some(asname) => asname,
                        None => a.name.split('.').next().unwrap_or(a.name),
                    };
                    self.bind(bound);
                }
            }
            Stmt::ImportFrom { names, .. } => {
                if let ImportNames::List(aliases) = names {
                    for a in aliases {
                        self.bind(a.asname.unwrap_or(a.name));
                    }
                }
            }
            Stmt::If { test, body, orelse } | Stmt::While { test, body, orelse } => {
                self.expr(test);
                self.stmts(body);
                self.stmts(orelse);
            }
            Stmt::For {
                target,
                iter,
                body,
                orelse,
            } => {
                self.expr(iter);
                self.target(target);
                self.stmts(body);
                self.stmts(orelse);
            }
            Stmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => {
                self.stmts(body);
                for h in handlers {
                    if let Some(t) = &h.typ {
                        self.expr(t);
                    }
                    if let Some(n) = h.name {
                        self.bind(n);
                    }
                    self.stmts(&h.body);
                }
                self.stmts(orelse);
                self.stmts(finalbody);
            }
            Stmt::With { items, body } => {
                for item in items {
                    self.expr(&item.context);
                    if let Some(v) = &item.vars {
                        self.target(v);
                    }
                }
                self.stmts(body);
            }
            Stmt::FunctionDef {
                name,
                params,
                body,
                decorators,
            } => {
                decorators.iter().for_each(|d| self.expr(d));
                params.defaults().for_each(|d| self.expr(d));
                self.bind(*name);
                self.children.push(Child::Function {
                    name: *name,
                    params,
                    body,
                    span: *span,
                });
            }
            Stmt::ClassDef {
                name,
                bases,
                body,
                decorators,
            } => {
                decorators.iter().for_each(|d| self.expr(d));
                bases.iter().for_each(|b| self.expr(b.value()));
                self.bind(*name);
                self.children.push(Child::Class {
                    name: *name,
                    body,
                    span: *span,
                });
            }
        }
    }

    fn target(&mut self, target: &'s ExprWithSpan<'a>) {
        match &target.0 {
            Expr::Name(n) => {
                self.bind(*n);
            }
            Expr::Tuple(items) | Expr::List(items) => items.iter().for_each(|t| self.target(t)),
            Expr::Starred(inner) => self.target(inner),
            _ => self.expr(target),
        }
    }

    fn expr(&mut self, (expr, span): &'s ExprWithSpan<'a>) {
        match expr {
            Expr::Name(n) => {
                self.mention(*n);
            }
            Expr::Const(_) | Expr::Num(_) | Expr::Str(_) | Expr::Bytes(_) | Expr::FormattedStr(_) => {}
            Expr::BinOp { left, right, .. } | Expr::BoolOp { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::UnaryOp { operand, .. } => self.expr(operand),
            Expr::Compare { left, ops } => {
                self.expr(left);
                ops.iter().for_each(|(_, e)| self.expr(e));
            }
            Expr::Call { func, args } => {
                self.expr(func);
                args.iter().map(Arg::value).for_each(|e| self.expr(e));
            }
            Expr::Attribute { value, .. } => self.expr(value),
            Expr::Subscript { value, index } => {
                self.expr(value);
                self.expr(index);
            }
            Expr::Slice { lower, upper, step } => {
                for e in [lower, upper, step].into_iter().flatten() {
                    self.expr(e);
                }
            }
            Expr::List(items) | Expr::Tuple(items) | Expr::Set(items) => {
                items.iter().for_each(|e| self.expr(e))
            }
            Expr::Dict(items) => {
                for (k, v) in items {
                    self.expr(k);
                    self.expr(v);
                }
            }
            Expr::Lambda { params, body } => {
                params.defaults().for_each(|d| self.expr(d));
                self.children.push(Child::Lambda {
                    params,
                    body,
                    span: *span,
                });
            }
            Expr::IfExp { test, body, orelse } => {
                self.expr(test);
                self.expr(body);
                self.expr(orelse);
            }
            Expr::Comprehension {
                element,
                value,
                generators,
                ..
            } => {
                if let Some(first) = generators.first() {
                    self.expr(&first.iter);
                }
                self.children.push(Child::Comprehension {
                    element,
                    value: value.as_deref(),
                    generators,
                    span: *span,
                });
            }
            Expr::Starred(inner) => self.expr(inner),
            Expr::Yield(value) => {
                if let Some(v) = value {
                    self.expr(v);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_scopes(src: &str, f: impl FnOnce(&Block<'_>)) {
        let module = parser::parse(src).unwrap();
        let arena = Arena::new();
        let root = build(&arena, &module).unwrap();
        f(root)
    }

    fn first_child<'b>(block: &Block<'b>) -> &'b Block<'b> {
        let children = block.children.borrow();
        let mut spans: Vec<_> = children.keys().copied().collect();
        spans.sort();
        children[&spans[0]]
    }

    #[test]
    fn module_names_are_global_or_builtin() {
        with_scopes("x = len(y)\n", |root| {
            assert_eq!(root.binding("x"), Binding::Global);
            assert_eq!(root.binding("y"), Binding::Global);
            assert_eq!(root.binding("len"), Binding::Builtin);
        });
    }

    #[test]
    fn function_locals_and_free_names() {
        let src = "def f(a):\n    b = a\n    def g():\n        return a + b + c\n    return g\n";
        with_scopes(src, |root| {
            let f = first_child(root);
            assert_eq!(f.binding("a"), Binding::Local);
            assert_eq!(f.binding("b"), Binding::Local);
            assert_eq!(f.variables().collect::<Vec<_>>(), ["b", "g"]);
            let g = first_child(f);
            assert_eq!(g.binding("a"), Binding::Free);
            assert_eq!(g.binding("b"), Binding::Free);
            assert_eq!(g.binding("c"), Binding::Global);
        });
    }

    #[test]
    fn global_and_nonlocal_declarations() {
        let src = "def f():\n    x = 1\n    def g():\n        nonlocal x\n        global y\n        x = y = 2\n";
        with_scopes(src, |root| {
            let g = first_child(first_child(root));
            assert_eq!(g.binding("x"), Binding::Free);
            assert_eq!(g.binding("y"), Binding::Global);
            assert_eq!(g.variables().count(), 0);
        });
    }

    #[test]
    fn class_scope_is_skipped_by_methods() {
        let src = "def f():\n    x = 1\n    class C:\n        x = 2\n        def m(self):\n            return x\n";
        with_scopes(src, |root| {
            let c = first_child(first_child(root));
            assert_eq!(c.kind, BlockKind::Class);
            assert_eq!(c.binding("x"), Binding::Local);
            let m = first_child(c);
            assert_eq!(m.binding("x"), Binding::Free);
        });
    }

    #[test]
    fn comprehension_targets_are_local() {
        with_scopes("def f(xs):\n    return [x + y for x in xs]\n", |root| {
            let comp = first_child(first_child(root));
            assert_eq!(comp.kind, BlockKind::Comprehension);
            assert_eq!(comp.binding("x"), Binding::Local);
            assert_eq!(comp.binding("y"), Binding::Global);
        });
    }

    fn scope_error(src: &str) -> String {
        let module = parser::parse(src).unwrap();
        let arena = Arena::new();
        match build(&arena, &module) {
            Err(e @ Error::Scope { .. }) => e.to_string(),
            Err(e) => panic!("{e}"),
            Ok(_) => panic!("no scope error"),
        }
    }

    #[test]
    fn scope_errors() {
        assert_eq!(
            scope_error("nonlocal x\n"),
            "nonlocal declaration not allowed at module level"
        );
        assert_eq!(
            scope_error("def f():\n    nonlocal x\n"),
            "no binding for nonlocal 'x' found"
        );
        assert_eq!(
            scope_error("def f():\n    x = 1\n    def g():\n        global x\n        nonlocal x\n"),
            "name 'x' is nonlocal and global"
        );
        assert_eq!(
            scope_error("def f(a):\n    global a\n"),
            "name 'a' is parameter and global"
        );
    }

    #[test]
    fn declarations_must_come_first() {
        assert_eq!(
            scope_error("def f():\n    x = 1\n    global x\n"),
            "name 'x' is assigned to before global declaration"
        );
        assert_eq!(
            scope_error("def f():\n    print(x)\n    global x\n"),
            "name 'x' is used prior to global declaration"
        );
        assert_eq!(
            scope_error("def f():\n    x = 1\n    def g():\n        x += 1\n        nonlocal x\n"),
            "name 'x' is used prior to nonlocal declaration"
        );
        with_scopes("def f():\n    global x\n    x = 1\n    return y\n", |root| {
            assert_eq!(first_child(root).binding("x"), Binding::Global);
        });
    }
}
