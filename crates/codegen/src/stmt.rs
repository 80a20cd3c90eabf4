use crate::block::{Block, BlockKind};
use crate::error::{Error, Result};
use crate::pool::{write_temps, GoType, Pool};
use crate::util::{convert_name, go_str};
use crate::writer::Writer;
use crate::{Import, ImportBinding, ImportResolver, ModuleInfo};
use itertools::Itertools;
use parser::{
    Arg, ExceptHandler, ExprWithSpan, ImportNames, Params, Span, Stmt, StmtWithSpan,
    WithItem,
};
use std::collections::BTreeMap;
use std::mem;

/// Control-flow context of the statement being lowered.
pub(crate) enum Frame {
    /// Generated function returning `(*πg.Object, *πg.BaseException)`.
    Function,
    /// Class body closure returning `*πg.BaseException`.
    Class,
    Loop {
        label: String,
        sentinel: Option<String>,
    },
    Try {
        label: String,
    },
    Finally {
        label: String,
        exit: String,
        /// Recorded exits and the statement that first requested each.
        exits: BTreeMap<Exit, Span>,
    },
}

/// Pending control transfer recorded while leaving a finally zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Exit {
    Return = 1,
    Break = 2,
    Continue = 3,
}

pub(crate) enum FunctionBody<'s, 'a> {
    Stmts(&'s [StmtWithSpan<'a>]),
    Expr(&'s ExprWithSpan<'a>),
}

pub(crate) struct Visitor<'v, 'b> {
    pub(crate) w: Writer,
    pub(crate) pool: &'v mut Pool,
    resolver: &'v mut dyn ImportResolver,
    pub(crate) block: &'b Block<'b>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) class_ns: Option<String>,
    pub(crate) info: &'v ModuleInfo<'v>,
}

impl<'v, 'b> Visitor<'v, 'b> {
    pub(crate) fn new(
        pool: &'v mut Pool,
        resolver: &'v mut dyn ImportResolver,
        block: &'b Block<'b>,
        info: &'v ModuleInfo<'v>,
        frames: Vec<Frame>,
    ) -> Self {
        Visitor {
            w: Writer::new(),
            pool,
            resolver,
            block,
            frames,
            class_ns: None,
            info,
        }
    }

    pub(crate) fn finish(self) -> String {
        self.w.into_string()
    }

    /// Statement that hands the pending error to the innermost handler.
    pub(crate) fn propagate(&self) -> String {
        for f in self.frames.iter().rev() {
            match f {
                Frame::Try { label } | Frame::Finally { label, .. } => {
                    return format!("break {label}")
                }
                Frame::Function => return "return nil, πE".to_string(),
                Frame::Class => return "return πE".to_string(),
                Frame::Loop { .. } => (),
            }
        }
        "return nil, πE".to_string()
    }

    /// Emits `lhs πE = call` and the error check after it. `lhs` is either
    /// empty or ends with `, `.
    pub(crate) fn checked(&mut self, lhs: &str, call: &str) {
        let propagate = self.propagate();
        self.w.write(&format!("if {lhs}πE = {call}; πE != nil {{"));
        self.w.indent_block(1).write(&propagate);
        self.w.write("}");
    }

    pub(crate) fn call_obj(&mut self, call: &str) -> String {
        let t = self.pool.alloc_temp(GoType::Object);
        self.checked(&format!("{t}, "), call);
        t
    }

    pub(crate) fn call_err(&mut self, call: &str) {
        self.checked("", call)
    }

    pub(crate) fn is_true(&mut self, obj: &str) -> String {
        let b = self.pool.alloc_temp(GoType::Bool);
        self.checked(&format!("{b}, "), &format!("πg.IsTrue(πF, {obj})"));
        b
    }

    pub(crate) fn raise(&mut self, exc: &str) {
        self.w.write(&format!("πE = {exc}"));
        let propagate = self.propagate();
        self.w.write(&propagate);
    }

    /// Runs `f` against a fresh writer and nests what it wrote one level
    /// deeper into the current one.
    pub(crate) fn indented<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let outer = mem::take(&mut self.w);
        let result = f(self);
        let inner = mem::replace(&mut self.w, outer);
        self.w.indent_block(1).write(inner.as_str());
        result
    }

    /// Lowers code of another scope into a detached fragment.
    pub(crate) fn nested(
        &mut self,
        block: &'b Block<'b>,
        frames: Vec<Frame>,
        class_ns: Option<String>,
        f: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<String> {
        let w = mem::take(&mut self.w);
        let block = mem::replace(&mut self.block, block);
        let frames = mem::replace(&mut self.frames, frames);
        let class_ns = mem::replace(&mut self.class_ns, class_ns);
        let result = f(self);
        let inner = mem::replace(&mut self.w, w);
        self.block = block;
        self.frames = frames;
        self.class_ns = class_ns;
        result.map(|()| inner.into_string())
    }

    pub(crate) fn child_block(&self, span: Span) -> Result<&'b Block<'b>> {
        self.block
            .child(span)
            .ok_or_else(|| Error::codegen("no scope recorded for nested definition", span))
    }

    pub(crate) fn visit_stmts(&mut self, stmts: &[StmtWithSpan<'_>]) -> Result<()> {
        stmts.iter().try_for_each(|s| self.visit_stmt(s))
    }

    fn visit_stmt(&mut self, (stmt, span): &StmtWithSpan<'_>) -> Result<()> {
        let span = *span;
        match stmt {
            Stmt::Expr(e) => {
                self.visit_expr(e)?;
            }
            Stmt::Assign { targets, value } => {
                let mut v = self.visit_expr(value)?;
                if targets.len() > 1 && !v.starts_with("πTemp") {
                    let t = self.pool.alloc_temp(GoType::Object);
                    self.w.write(&format!("{t} = {v}"));
                    v = t;
                }
                for t in targets {
                    self.assign_target(t, &v)?;
                }
            }
            Stmt::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            Stmt::Pass | Stmt::Global(_) | Stmt::Nonlocal(_) => (),
            Stmt::Break => self.emit_jump(Exit::Break, span)?,
            Stmt::Continue => self.emit_jump(Exit::Continue, span)?,
            Stmt::Return(value) => {
                if self.block.kind != BlockKind::Function {
                    return Err(Error::codegen("'return' outside function", span));
                }
                let v = match value {
                    Some(e) => self.visit_expr(e)?,
                    None => "πg.None".to_string(),
                };
                self.emit_return(&v, span);
            }
            Stmt::Raise { exc, cause } => {
                let exc = match exc {
                    Some(e) => self.visit_expr(e)?,
                    None => "nil".to_string(),
                };
                let cause = match cause {
                    Some(e) => self.visit_expr(e)?,
                    None => "nil".to_string(),
                };
                self.raise(&format!("πF.Raise({exc}, {cause})"));
            }
            Stmt::Delete(targets) => {
                for t in targets {
                    self.delete_target(t)?;
                }
            }
            Stmt::Assert { test, msg } => {
                let t = self.visit_expr(test)?;
                let b = self.is_true(&t);
                self.w.write(&format!("if !{b} {{"));
                self.indented(|v| {
                    let exc = match msg {
                        Some(m) => {
                            let m = v.visit_expr(m)?;
                            v.call_obj(&format!(
                                "πg.AssertionErrorType.ToObject().Call(πF, []*πg.Object{{{m}}}, nil)"
                            ))
                        }
                        None => "πg.AssertionErrorType.ToObject()".to_string(),
                    };
                    v.raise(&format!("πF.Raise({exc}, nil)"));
                    Ok(())
                })?;
                self.w.write("}");
            }
            Stmt::Import(aliases) => {
                for alias in aliases {
                    let import = self
                        .resolver
                        .import(alias)
                        .map_err(|message| Error::Import { message, span })?;
                    self.emit_import(&import, span)?;
                }
            }
            Stmt::ImportFrom {
                module: Some("__future__"),
                level: 0,
                ..
            } => (),
            Stmt::ImportFrom {
                module,
                names,
                level,
            } => {
                if matches!(names, ImportNames::Star) && self.block.kind != BlockKind::Module {
                    return Err(Error::codegen(
                        "import * only allowed at module level",
                        span,
                    ));
                }
                let imports = self
                    .resolver
                    .import_from(*module, *level, names)
                    .map_err(|message| Error::Import { message, span })?;
                for import in &imports {
                    self.emit_import(import, span)?;
                }
            }
            Stmt::If { test, body, orelse } => {
                let t = self.visit_expr(test)?;
                let b = self.is_true(&t);
                self.w.write(&format!("if {b} {{"));
                self.indented(|v| v.visit_stmts(body))?;
                if !orelse.is_empty() {
                    self.w.write("} else {");
                    self.indented(|v| v.visit_stmts(orelse))?;
                }
                self.w.write("}");
            }
            Stmt::While { test, body, orelse } => {
                let sentinel = self.sentinel(orelse);
                let label = self.pool.label("πLoop");
                self.w.write_label(&label);
                self.w.write("for {");
                self.frames.push(Frame::Loop {
                    label: label.clone(),
                    sentinel: sentinel.clone(),
                });
                let result = self.indented(|v| {
                    let t = v.visit_expr(test)?;
                    let b = v.is_true(&t);
                    v.w.write(&format!("if !{b} {{\n\tbreak {label}\n}}"));
                    v.visit_stmts(body)
                });
                self.frames.pop();
                result?;
                self.w.write("}");
                self.orelse(sentinel, orelse)?;
            }
            Stmt::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.visit_expr(iter)?;
                let sentinel = self.sentinel(orelse);
                self.for_loop(&iterable, target, sentinel.clone(), |v| v.visit_stmts(body))?;
                self.orelse(sentinel, orelse)?;
            }
            Stmt::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => self.visit_try(body, handlers, orelse, finalbody)?,
            Stmt::With { items, body } => self.visit_with(items, body)?,
            Stmt::FunctionDef {
                name,
                params,
                body,
                decorators,
            } => {
                let decorators = self.decorators(decorators)?;
                let f = self.function(name, params, FunctionBody::Stmts(body), span)?;
                let f = self.decorate(f, &decorators);
                self.store_name(name, &f)?;
            }
            Stmt::ClassDef {
                name,
                bases,
                body,
                decorators,
            } => self.visit_class(name, bases, body, decorators, span)?,
        }
        Ok(())
    }

    fn sentinel(&mut self, orelse: &[StmtWithSpan<'_>]) -> Option<String> {
        if orelse.is_empty() {
            return None;
        }
        let s = self.pool.alloc_temp(GoType::Bool);
        self.w.write(&format!("{s} = true"));
        Some(s)
    }

    fn orelse(&mut self, sentinel: Option<String>, orelse: &[StmtWithSpan<'_>]) -> Result<()> {
        if let Some(s) = sentinel {
            self.w.write(&format!("if {s} {{"));
            self.indented(|v| v.visit_stmts(orelse))?;
            self.w.write("}");
        }
        Ok(())
    }

    /// Iterates `iterable`, binding each item to `target` before `body`.
    pub(crate) fn for_loop(
        &mut self,
        iterable: &str,
        target: &ExprWithSpan<'_>,
        sentinel: Option<String>,
        body: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        let it = self.call_obj(&format!("πg.Iter(πF, {iterable})"));
        let label = self.pool.label("πLoop");
        self.w.write_label(&label);
        self.w.write("for {");
        self.frames.push(Frame::Loop {
            label: label.clone(),
            sentinel,
        });
        let result = self.indented(|v| {
            let item = v.pool.alloc_temp(GoType::Object);
            let propagate = v.propagate();
            v.w.write(&format!(
                "if {item}, πE = πg.Next(πF, {it}); πE != nil {{\n\
                 \tif πE.IsInstance(πg.StopIterationType) {{\n\
                 \t\tπE = nil\n\
                 \t\tbreak {label}\n\
                 \t}}\n\
                 \t{propagate}\n\
                 }}"
            ));
            v.assign_target(target, &item)?;
            body(v)
        });
        self.frames.pop();
        result?;
        self.w.write("}");
        Ok(())
    }

    fn emit_jump(&mut self, exit: Exit, span: Span) -> Result<()> {
        for f in self.frames.iter_mut().rev() {
            match f {
                Frame::Loop { label, sentinel } => {
                    let jump = if exit == Exit::Break {
                        if let Some(s) = sentinel {
                            self.w.write(&format!("{s} = false"));
                        }
                        format!("break {label}")
                    } else {
                        format!("continue {label}")
                    };
                    self.w.write(&jump);
                    return Ok(());
                }
                Frame::Finally { label, exit: var, exits } => {
                    exits.entry(exit).or_insert(span);
                    self.w.write(&format!("{var} = {}\nbreak {label}", exit as u8));
                    return Ok(());
                }
                Frame::Try { .. } => (),
                Frame::Function | Frame::Class => break,
            }
        }
        let keyword = match exit {
            Exit::Continue => "continue",
            _ => "break",
        };
        Err(Error::codegen(format!("'{keyword}' outside loop"), span))
    }

    fn emit_return(&mut self, value: &str, span: Span) {
        for f in self.frames.iter_mut().rev() {
            match f {
                Frame::Finally { label, exit, exits } => {
                    exits.entry(Exit::Return).or_insert(span);
                    if value != "πR" {
                        self.w.write(&format!("πR = {value}"));
                    }
                    self.w.write(&format!("{exit} = {}\nbreak {label}", Exit::Return as u8));
                    return;
                }
                Frame::Function | Frame::Class => break,
                Frame::Loop { .. } | Frame::Try { .. } => (),
            }
        }
        self.w.write(&format!("return {value}, nil"));
    }

    fn visit_try(
        &mut self,
        body: &[StmtWithSpan<'_>],
        handlers: &[ExceptHandler<'_>],
        orelse: &[StmtWithSpan<'_>],
        finalbody: &[StmtWithSpan<'_>],
    ) -> Result<()> {
        if finalbody.is_empty() {
            return self.try_except(body, handlers, orelse);
        }
        self.finally_zone(
            |v| {
                if handlers.is_empty() {
                    v.visit_stmts(body)
                } else {
                    v.try_except(body, handlers, orelse)
                }
            },
            |v, _| v.visit_stmts(finalbody),
        )
    }

    fn try_except(
        &mut self,
        body: &[StmtWithSpan<'_>],
        handlers: &[ExceptHandler<'_>],
        orelse: &[StmtWithSpan<'_>],
    ) -> Result<()> {
        let label = self.pool.label("πTry");
        self.w.write_label(&label);
        self.w.write("for range [1]int{} {");
        self.frames.push(Frame::Try {
            label: label.clone(),
        });
        let result = self.indented(|v| {
            v.visit_stmts(body)?;
            v.w.write(&format!("break {label}"));
            Ok(())
        });
        self.frames.pop();
        result?;
        self.w.write("}");
        self.w.write("if πE != nil {");
        self.indented(|v| {
            let exc = v.pool.alloc_temp(GoType::Exception);
            v.w.write(&format!("{exc} = πE\nπE = nil\nπF.SetExc({exc})"));
            v.handlers(handlers, &exc)
        })?;
        if !orelse.is_empty() {
            self.w.write("} else {");
            self.indented(|v| v.visit_stmts(orelse))?;
        }
        self.w.write("}");
        Ok(())
    }

    /// Tests handlers in order against the caught exception; the first match
    /// runs and an unmatched exception is raised again.
    fn handlers(&mut self, handlers: &[ExceptHandler<'_>], exc: &str) -> Result<()> {
        let Some((h, rest)) = handlers.split_first() else {
            self.raise(exc);
            return Ok(());
        };
        let Some(typ) = &h.typ else {
            return self.handler_body(h, exc);
        };
        let t = self.visit_expr(typ)?;
        let matched = self.pool.alloc_temp(GoType::Bool);
        self.checked(
            &format!("{matched}, "),
            &format!("πg.IsInstance(πF, {exc}.ToObject(), {t})"),
        );
        self.w.write(&format!("if {matched} {{"));
        self.indented(|v| v.handler_body(h, exc))?;
        self.w.write("} else {");
        self.indented(|v| v.handlers(rest, exc))?;
        self.w.write("}");
        Ok(())
    }

    fn handler_body(&mut self, h: &ExceptHandler<'_>, exc: &str) -> Result<()> {
        if let Some(name) = h.name {
            self.store_name(name, &format!("{exc}.ToObject()"))?;
        }
        self.visit_stmts(&h.body)?;
        self.w.write("πF.RestoreExc(nil, nil)");
        Ok(())
    }

    /// Runs `zone` so that errors and `return`/`break`/`continue` leaving it
    /// pass through `cleanup` first. `cleanup` sees the temp holding the
    /// pending error and may clear it to swallow the error.
    fn finally_zone(
        &mut self,
        zone: impl FnOnce(&mut Self) -> Result<()>,
        cleanup: impl FnOnce(&mut Self, &str) -> Result<()>,
    ) -> Result<()> {
        let exit = self.pool.alloc_temp(GoType::Int);
        let label = self.pool.label("πFin");
        self.w.write(&format!("{exit} = 0"));
        self.w.write_label(&label);
        self.w.write("for range [1]int{} {");
        self.frames.push(Frame::Finally {
            label: label.clone(),
            exit: exit.clone(),
            exits: BTreeMap::new(),
        });
        let result = self.indented(|v| {
            zone(v)?;
            v.w.write(&format!("break {label}"));
            Ok(())
        });
        let exits = match self.frames.pop() {
            Some(Frame::Finally { exits, .. }) => exits,
            _ => BTreeMap::new(),
        };
        result?;
        self.w.write("}");
        let saved = self.pool.alloc_temp(GoType::Exception);
        self.w.write(&format!("{saved} = πE\nπE = nil"));
        cleanup(self, &saved)?;
        self.w.write(&format!("if {saved} != nil {{"));
        self.indented(|v| {
            v.raise(&saved);
            Ok(())
        })?;
        self.w.write("}");
        for (e, span) in exits {
            self.w.write(&format!("if {exit} == {} {{", e as u8));
            self.indented(|v| match e {
                Exit::Return => {
                    v.emit_return("πR", span);
                    Ok(())
                }
                Exit::Break | Exit::Continue => v.emit_jump(e, span),
            })?;
            self.w.write("}");
        }
        Ok(())
    }

    fn visit_with(&mut self, items: &[WithItem<'_>], body: &[StmtWithSpan<'_>]) -> Result<()> {
        let Some((item, rest)) = items.split_first() else {
            return self.visit_stmts(body);
        };
        let manager = self.visit_expr(&item.context)?;
        let exit_name = self.pool.intern("__exit__");
        let enter_name = self.pool.intern("__enter__");
        let exit_fn = self.call_obj(&format!("πg.GetAttr(πF, {manager}, {exit_name}, nil)"));
        let enter_fn = self.call_obj(&format!("πg.GetAttr(πF, {manager}, {enter_name}, nil)"));
        let value = self.call_obj(&format!("{enter_fn}.Call(πF, nil, nil)"));
        if let Some(vars) = &item.vars {
            self.assign_target(vars, &value)?;
        }
        self.finally_zone(
            |v| v.visit_with(rest, body),
            |v, saved| {
                v.w.write(&format!("if {saved} != nil {{"));
                v.indented(|v| {
                    let exc = format!("{saved}.ToObject()");
                    let r = v.call_obj(&format!(
                        "{exit_fn}.Call(πF, []*πg.Object{{{exc}.Type().ToObject(), {exc}, πg.None}}, nil)"
                    ));
                    let swallow = v.is_true(&r);
                    v.w.write(&format!("if {swallow} {{\n\t{saved} = nil\n}}"));
                    Ok(())
                })?;
                v.w.write("} else {");
                v.indented(|v| {
                    v.checked(
                        "_, ",
                        &format!("{exit_fn}.Call(πF, []*πg.Object{{πg.None, πg.None, πg.None}}, nil)"),
                    );
                    Ok(())
                })?;
                v.w.write("}");
                Ok(())
            },
        )
    }

    fn emit_import(&mut self, import: &Import, span: Span) -> Result<()> {
        let modules = self.pool.alloc_temp(GoType::Objects);
        self.checked(
            &format!("{modules}, "),
            &format!("πg.ImportModule(πF, {})", go_str(&import.name)),
        );
        let last = import.name.split('.').count() - 1;
        for binding in &import.bindings {
            match binding {
                ImportBinding::Module { name, index } => {
                    self.store_name(name, &format!("{modules}[{index}]"))?
                }
                ImportBinding::Member { name, attr } => {
                    let attr = self.pool.intern(attr);
                    let member =
                        self.call_obj(&format!("πg.GetAttr(πF, {modules}[{last}], {attr}, nil)"));
                    self.store_name(name, &member)?;
                }
                ImportBinding::Star => {
                    if self.block.kind != BlockKind::Module {
                        return Err(Error::codegen(
                            "import * only allowed at module level",
                            span,
                        ));
                    }
                    self.call_err(&format!("πg.LoadMembers(πF, {modules}[{last}])"));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn decorators(&mut self, decorators: &[ExprWithSpan<'_>]) -> Result<Vec<String>> {
        decorators.iter().map(|d| self.visit_expr(d)).collect()
    }

    pub(crate) fn decorate(&mut self, mut value: String, decorators: &[String]) -> String {
        for d in decorators.iter().rev() {
            value = self.call_obj(&format!("{d}.Call(πF, []*πg.Object{{{value}}}, nil)"));
        }
        value
    }

    /// Builds a function object; the body runs in its own scope.
    pub(crate) fn function(
        &mut self,
        name: &str,
        params: &Params<'_>,
        body: FunctionBody<'_, '_>,
        span: Span,
    ) -> Result<String> {
        if !params.kwonly.is_empty() {
            return Err(Error::unsupported("keyword-only parameters", span));
        }
        let mut param_list = Vec::with_capacity(params.args.len());
        for p in &params.args {
            let default = match &p.default {
                Some(d) => self.visit_expr(d)?,
                None => "nil".to_string(),
            };
            param_list.push(format!("{{{}, {default}}}", go_str(p.name)));
        }
        let flags = params
            .vararg
            .map(|_| "πg.CodeFlagVarArg")
            .into_iter()
            .chain(params.kwarg.map(|_| "πg.CodeFlagKWArg"))
            .join(" | ");
        let flags = if flags.is_empty() { "0".to_string() } else { flags };
        let param_list = if param_list.is_empty() {
            "nil".to_string()
        } else {
            format!("[]πg.Param{{{}}}", param_list.join(", "))
        };
        let block = self.child_block(span)?;
        log::trace!("lowering function {name}");
        self.pool.open_frame();
        let code = self.nested(block, vec![Frame::Function], None, |v| match body {
            FunctionBody::Stmts(stmts) => v.visit_stmts(stmts),
            FunctionBody::Expr(e) => {
                let r = v.visit_expr(e)?;
                v.w.write(&format!("return {r}, nil"));
                Ok(())
            }
        });
        let temps = self.pool.close_frame();
        let code = code?;
        let mut inner = Writer::new();
        inner.write("var πR *πg.Object\n_ = πR\nvar πE *πg.BaseException\n_ = πE");
        for (i, p) in block.params().iter().enumerate() {
            let var = local_var(p);
            inner.write(&format!("var {var} *πg.Object = πArgs[{i}]\n_ = {var}"));
        }
        write_locals(block, &mut inner);
        write_temps(&temps, &mut inner);
        inner.write(&code);
        inner.write("return πg.None, nil");
        let f = self.pool.alloc_temp(GoType::Object);
        self.w.write(&format!(
            "{f} = πg.NewFunction(πg.NewCode({}, {}, {param_list}, {flags}, \
             func(πF *πg.Frame, πArgs []*πg.Object) (*πg.Object, *πg.BaseException) {{",
            go_str(name),
            go_str(self.info.filename),
        ));
        self.w.indent_block(1).write(inner.as_str());
        self.w.write("}), πF.Globals()).ToObject()");
        Ok(f)
    }

    fn visit_class(
        &mut self,
        name: &str,
        bases: &[Arg<'_>],
        body: &[StmtWithSpan<'_>],
        decorators: &[ExprWithSpan<'_>],
        span: Span,
    ) -> Result<()> {
        let decorators = self.decorators(decorators)?;
        let mut base_values = Vec::with_capacity(bases.len());
        for b in bases {
            match b {
                Arg::Positional(e) => base_values.push(self.visit_expr(e)?),
                _ => return Err(Error::unsupported("keyword arguments in class bases", span)),
            }
        }
        let bases = self.pool.alloc_temp(GoType::Object);
        self.w.write(&format!(
            "{bases} = πg.NewTuple({}).ToObject()",
            base_values.join(", ")
        ));
        let ns = self.pool.alloc_temp(GoType::Dict);
        self.w.write(&format!("{ns} = πg.NewDict()"));
        let module_key = self.pool.intern("__module__");
        let module_name = self.pool.intern(self.info.name);
        self.call_err(&format!(
            "{ns}.SetItem(πF, {module_key}.ToObject(), {module_name}.ToObject())"
        ));
        let block = self.child_block(span)?;
        let code = self.nested(block, vec![Frame::Class], Some(ns.clone()), |v| {
            v.visit_stmts(body)
        })?;
        self.w.write("πE = func() *πg.BaseException {");
        {
            let mut w = self.w.indent_block(1);
            w.write(&code);
            w.write("return nil");
        }
        self.w.write("}()");
        self.w.write("if πE != nil {");
        let propagate = self.propagate();
        self.w.indent_block(1).write(&propagate);
        self.w.write("}");
        let class_name = self.pool.intern(name);
        let cls = self.call_obj(&format!(
            "πg.TypeType.ToObject().Call(πF, []*πg.Object{{{class_name}.ToObject(), {bases}, {ns}.ToObject()}}, nil)"
        ));
        let cls = self.decorate(cls, &decorators);
        self.store_name(name, &cls)
    }
}

pub(crate) fn local_var(name: &str) -> String {
    format!("µ{}", convert_name(name))
}

/// Declares the target variables backing a scope's local names.
pub(crate) fn write_locals(block: &Block<'_>, w: &mut Writer) {
    for name in block.variables() {
        let var = local_var(name);
        w.write(&format!("var {var} *πg.Object\n_ = {var}"));
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::{lower, lower_err, try_lower};

    /// Trimmed line following the first line that trims to `line`.
    fn line_after<'c>(code: &'c str, line: &str) -> &'c str {
        let mut lines = code.lines().map(str::trim);
        lines.find(|l| *l == line).unwrap();
        lines.next().unwrap()
    }

    fn caught(code: &str) -> Vec<&str> {
        code.lines()
            .filter_map(|l| l.trim().strip_prefix("πF.SetExc("))
            .map(|rest| rest.trim_end_matches(')'))
            .collect()
    }

    #[test]
    fn while_else_uses_sentinel() {
        let code = lower("while x:\n    break\nelse:\n    y = 1\n");
        assert!(code.contains("πLoop1:\nfor {"));
        assert!(code.contains("= true"));
        assert!(code.contains("= false\n\tbreak πLoop1"));
        assert!(code.contains("break πLoop1"));
    }

    #[test]
    fn for_loop_stops_on_stop_iteration() {
        let code = lower("for a, b in pairs:\n    continue\n");
        assert!(code.contains("πg.Iter(πF, πTemp001)"));
        assert!(code.contains("πg.Next(πF, πTemp002)"));
        assert!(code.contains("if πE.IsInstance(πg.StopIterationType) {"));
        assert!(code.contains("πg.Unpack(πF, πTemp003, 2)"));
        assert!(code.contains("continue πLoop1"));
    }

    #[test]
    fn try_except_matches_handlers_in_order() {
        let code = lower("try:\n    f()\nexcept ValueError as e:\n    g(e)\nexcept:\n    pass\n");
        assert!(code.contains("πTry1:\nfor range [1]int{} {"));
        assert!(code.contains("\tbreak πTry1\n"));
        assert!(code.contains("πF.SetExc("));
        assert!(code.contains("πg.IsInstance(πF, πTemp"));
        assert!(code.contains("πF.Globals().SetItem(πF, ße.ToObject(), πTemp"));
    }

    #[test]
    fn try_else_runs_only_without_error() {
        let code = lower("try:\n    f()\nexcept ValueError:\n    g()\nelse:\n    h()\n");
        let (caught_branch, else_branch) = code.rsplit_once("\n} else {\n").unwrap();
        let caught_branch = &caught_branch[caught_branch.find("\nif πE != nil {\n").unwrap()..];
        assert!(caught_branch.contains("πE = nil\n"));
        assert!(caught_branch.contains("ßg"));
        assert!(!caught_branch.contains("ßh"));
        assert!(else_branch.contains("πg.ResolveGlobal(πF, ßh)"));
        assert!(!else_branch.contains("ßg"));
        assert!(code.ends_with("}\n"));
    }

    #[test]
    fn unmatched_handlers_propagate_outward() {
        let src = "def f():\n    try:\n        try:\n            g()\n        except KeyError:\n            pass\n    except ValueError:\n        pass\n";
        let code = lower(src);
        let excs = caught(&code);
        assert_eq!(excs.len(), 2);
        assert_eq!(line_after(&code, &format!("πE = {}", excs[0])), "break πTry1");
        assert_eq!(line_after(&code, &format!("πE = {}", excs[1])), "return nil, πE");
        assert_eq!(code.matches("πF.RestoreExc(nil, nil)").count(), 2);
    }

    #[test]
    fn handlers_clear_the_current_exception() {
        let code = lower("try:\n    f()\nexcept:\n    g()\n");
        let exc = caught(&code)[0];
        let set = code.find(&format!("πF.SetExc({exc})")).unwrap();
        let call = code.find("πg.ResolveGlobal(πF, ßg)").unwrap();
        let restore = code.find("πF.RestoreExc(nil, nil)").unwrap();
        assert!(set < call && call < restore);
    }

    #[test]
    fn jump_replayed_outside_loop_keeps_its_location() {
        let src = "x = 1\ntry:\n    break\nfinally:\n    pass\n";
        let e = try_lower(src).unwrap_err();
        assert_eq!(e.to_string(), "'break' outside loop");
        assert_eq!(e.span().start, src.find("break").unwrap());
    }

    #[test]
    fn return_through_finally() {
        let code = lower("def f():\n    try:\n        return 1\n    finally:\n        g()\n");
        assert!(code.contains("πR = πg.NewInt(1).ToObject()"));
        assert!(code.contains("break πFin1"));
        assert!(code.contains("return πR, nil"));
    }

    #[test]
    fn break_through_finally_is_replayed() {
        let code = lower("for x in y:\n    try:\n        break\n    finally:\n        pass\n");
        assert!(code.contains(" = 2\n"));
        assert!(code.contains(" == 2 {"));
        assert!(code.contains("break πLoop1"));
    }

    #[test]
    fn with_statement_protocol() {
        let code = lower("with open(p) as f:\n    pass\n");
        assert!(code.contains("πg.GetAttr(πF, πTemp"));
        assert!(code.contains("ß__enter__"));
        assert!(code.contains("ß__exit__"));
        assert!(code.contains("[]*πg.Object{πg.None, πg.None, πg.None}"));
        assert!(code.contains(".Type().ToObject()"));
    }

    #[test]
    fn raise_and_assert() {
        let code = lower("assert x, 'm'\nraise ValueError from None\n");
        assert!(code.contains("πg.AssertionErrorType.ToObject().Call(πF, []*πg.Object{ßm.ToObject()}, nil)"));
        assert!(code.contains("πF.Raise(πTemp"));
        assert!(code.contains(", πg.None)"));
    }

    #[test]
    fn imports_bind_modules_and_members() {
        let code = lower("from __future__ import division\nimport a.b\nfrom c import d as e\n");
        assert!(!code.contains("__future__"));
        assert!(code.contains("πg.ImportModule(πF, \"a.b\")"));
        assert!(code.contains("πF.Globals().SetItem(πF, ßa.ToObject(), πTemp001[0])"));
        assert!(code.contains("πg.GetAttr(πF, πTemp002[0], ßd, nil)"));
        assert!(code.contains("ße.ToObject()"));
        assert!(lower("from m import *\n").contains("πg.LoadMembers(πF, πTemp001[0])"));
    }

    #[test]
    fn global_and_nonlocal_stores() {
        let code = lower("def f():\n    global x\n    x = 1\n");
        assert!(code.contains("πF.Globals().SetItem(πF, ßx.ToObject(), πg.NewInt(1).ToObject())"));
        let code = lower("def f():\n    x = 1\n    def g():\n        nonlocal x\n        x = 2\n");
        assert!(code.contains("µx = πg.NewInt(2).ToObject()"));
        assert_eq!(code.matches("var µx ").count(), 1);
    }

    #[test]
    fn decorated_function() {
        let code = lower("@d\ndef f(a, b=1, *c, **k):\n    pass\n");
        assert!(code.contains(
            "πg.NewCode(\"f\", \"test.py\", []πg.Param{{\"a\", nil}, {\"b\", πg.NewInt(1).ToObject()}}, \
             πg.CodeFlagVarArg | πg.CodeFlagKWArg, func(πF *πg.Frame, πArgs []*πg.Object)"
        ));
        assert!(code.contains("var µk *πg.Object = πArgs[3]"));
        assert!(code.contains(".Call(πF, []*πg.Object{πTemp002}, nil)"));
        assert!(code.contains("πF.Globals().SetItem(πF, ßf.ToObject(), πTemp003)"));
    }

    #[test]
    fn rejected_statements() {
        assert_eq!(lower_err("return 1\n"), "'return' outside function");
        assert_eq!(lower_err("break\n"), "'break' outside loop");
        assert_eq!(lower_err("while x:\n    def f():\n        continue\n"), "'continue' outside loop");
        assert_eq!(
            lower_err("def f():\n    from m import *\n"),
            "import * only allowed at module level"
        );
        assert_eq!(
            lower_err("def f(*, a):\n    pass\n"),
            "keyword-only parameters is not supported"
        );
        assert_eq!(
            lower_err("class C(metaclass=M):\n    pass\n"),
            "keyword arguments in class bases is not supported"
        );
        assert_eq!(lower_err("from . import x\n"), "relative import outside of a package");
    }
}
