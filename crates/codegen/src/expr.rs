use crate::block::Binding;
use crate::error::{Error, Result};
use crate::pool::{write_temps, GoType};
use crate::stmt::{local_var, write_locals, Frame, FunctionBody, Visitor};
use crate::util::{go_bytes, go_str};
use crate::writer::Writer;
use easy_ext::ext;
use parser::{
    Arg, BinOp, BoolOp, CmpOp, CompFor, CompKind, Const, Expr, ExprWithSpan, Num, Span, UnaryOp,
};

#[ext(BinOpExt)]
impl BinOp {
    /// Name of the runtime function implementing the operator.
    pub fn runtime_fn(self, inplace: bool, true_division: bool) -> String {
        let name = match self {
            BinOp::Add => "Add",
            BinOp::Sub => "Sub",
            BinOp::Mul => "Mul",
            BinOp::MatMul => "MatMul",
            BinOp::Div if true_division => "TrueDiv",
            BinOp::Div => "Div",
            BinOp::FloorDiv => "FloorDiv",
            BinOp::Mod => "Mod",
            BinOp::Pow => "Pow",
            BinOp::LShift => "LShift",
            BinOp::RShift => "RShift",
            BinOp::BitOr => "Or",
            BinOp::BitXor => "Xor",
            BinOp::BitAnd => "And",
        };
        if inplace {
            format!("πg.I{name}")
        } else {
            format!("πg.{name}")
        }
    }
}

/// Where a comprehension puts each produced element.
struct CompInsert<'s, 'a> {
    kind: CompKind,
    acc: String,
    element: &'s ExprWithSpan<'a>,
    value: Option<&'s ExprWithSpan<'a>>,
}

impl<'v, 'b> Visitor<'v, 'b> {
    /// Lowers an expression and returns a Go expression of type
    /// `*πg.Object` holding its value.
    pub(crate) fn visit_expr(&mut self, (expr, span): &ExprWithSpan<'_>) -> Result<String> {
        let span = *span;
        let value = match expr {
            Expr::Name(name) => self.load_name(name)?,
            Expr::Const(c) => match c {
                Const::True => "πg.True.ToObject()".to_string(),
                Const::False => "πg.False.ToObject()".to_string(),
                Const::None => "πg.None".to_string(),
                Const::Ellipsis => "πg.Ellipsis".to_string(),
            },
            Expr::Num(Num::Int(text)) => int_literal(text),
            Expr::Num(Num::Float(text)) => format!("πg.NewFloat({}).ToObject()", text.replace('_', "")),
            Expr::Num(Num::Imaginary(_)) => {
                return Err(Error::unsupported("imaginary literals", span))
            }
            Expr::Str(s) => format!("{}.ToObject()", self.pool.intern(s)),
            Expr::Bytes(b) => format!("πg.NewBytes([]byte({})...).ToObject()", go_bytes(b)),
            Expr::FormattedStr(_) => return Err(Error::unsupported("f-strings", span)),
            Expr::Yield(_) => return Err(Error::unsupported("generators", span)),
            Expr::BinOp { op, left, right } => {
                let l = self.visit_expr(left)?;
                let r = self.visit_expr(right)?;
                let f = op.runtime_fn(false, self.info.future.division);
                self.call_obj(&format!("{f}(πF, {l}, {r})"))
            }
            Expr::UnaryOp { op, operand } => {
                let v = self.visit_expr(operand)?;
                match op {
                    UnaryOp::Not => {
                        let b = self.is_true(&v);
                        format!("πg.GetBool(!{b}).ToObject()")
                    }
                    UnaryOp::Neg => self.call_obj(&format!("πg.Neg(πF, {v})")),
                    UnaryOp::Pos => self.call_obj(&format!("πg.Pos(πF, {v})")),
                    UnaryOp::Invert => self.call_obj(&format!("πg.Invert(πF, {v})")),
                }
            }
            Expr::BoolOp { op, left, right } => {
                let result = self.pool.alloc_temp(GoType::Object);
                let l = self.visit_expr(left)?;
                self.w.write(&format!("{result} = {l}"));
                let b = self.is_true(&result);
                let cond = match op {
                    BoolOp::And => b,
                    BoolOp::Or => format!("!{b}"),
                };
                self.w.write(&format!("if {cond} {{"));
                self.indented(|v| {
                    let r = v.visit_expr(right)?;
                    v.w.write(&format!("{result} = {r}"));
                    Ok(())
                })?;
                self.w.write("}");
                result
            }
            Expr::Compare { left, ops } => {
                let result = self.pool.alloc_temp(GoType::Object);
                let l = self.visit_expr(left)?;
                self.compare(l, ops, &result)?;
                result
            }
            Expr::Call { func, args } => self.call(func, args, span)?,
            Expr::Attribute { value, attr } => {
                let v = self.visit_expr(value)?;
                let attr = self.pool.intern(attr);
                self.call_obj(&format!("πg.GetAttr(πF, {v}, {attr}, nil)"))
            }
            Expr::Subscript { value, index } => {
                let v = self.visit_expr(value)?;
                let i = self.visit_expr(index)?;
                self.call_obj(&format!("πg.GetItem(πF, {v}, {i})"))
            }
            Expr::Slice { lower, upper, step } => {
                let mut parts = Vec::with_capacity(3);
                for e in [lower, upper, step] {
                    parts.push(match e {
                        Some(e) => self.visit_expr(e)?,
                        None => "nil".to_string(),
                    });
                }
                format!("πg.NewSlice({}).ToObject()", parts.join(", "))
            }
            Expr::List(items) | Expr::Tuple(items) => {
                let elems = self.elements(items)?;
                let ctor = match expr {
                    Expr::List(_) => "NewList",
                    _ => "NewTuple",
                };
                let t = self.pool.alloc_temp(GoType::Object);
                self.w.write(&format!("{t} = πg.{ctor}({}).ToObject()", elems.join(", ")));
                t
            }
            Expr::Set(items) => {
                let elems = self.elements(items)?;
                let s = self.pool.alloc_temp(GoType::Set);
                self.w.write(&format!("{s} = πg.NewSet()"));
                for e in elems {
                    self.call_err(&format!("{s}.Add(πF, {e})"));
                }
                format!("{s}.ToObject()")
            }
            Expr::Dict(items) => {
                let d = self.pool.alloc_temp(GoType::Dict);
                self.w.write(&format!("{d} = πg.NewDict()"));
                for (k, v) in items {
                    let k = self.visit_expr(k)?;
                    let v = self.visit_expr(v)?;
                    self.call_err(&format!("{d}.SetItem(πF, {k}, {v})"));
                }
                format!("{d}.ToObject()")
            }
            Expr::Lambda { params, body } => {
                self.function("<lambda>", params, FunctionBody::Expr(body), span)?
            }
            Expr::IfExp { test, body, orelse } => {
                let result = self.pool.alloc_temp(GoType::Object);
                let t = self.visit_expr(test)?;
                let b = self.is_true(&t);
                self.w.write(&format!("if {b} {{"));
                self.indented(|v| {
                    let r = v.visit_expr(body)?;
                    v.w.write(&format!("{result} = {r}"));
                    Ok(())
                })?;
                self.w.write("} else {");
                self.indented(|v| {
                    let r = v.visit_expr(orelse)?;
                    v.w.write(&format!("{result} = {r}"));
                    Ok(())
                })?;
                self.w.write("}");
                result
            }
            Expr::Comprehension {
                kind,
                element,
                value,
                generators,
            } => self.comprehension(*kind, element, value.as_deref(), generators, span)?,
            Expr::Starred(_) => {
                return Err(Error::codegen("can't use starred expression here", span))
            }
        };
        Ok(value)
    }

    fn elements(&mut self, items: &[ExprWithSpan<'_>]) -> Result<Vec<String>> {
        items
            .iter()
            .map(|item| match item {
                (Expr::Starred(_), span) => {
                    Err(Error::unsupported("starred display elements", *span))
                }
                _ => self.visit_expr(item),
            })
            .collect()
    }

    fn compare(
        &mut self,
        left: String,
        ops: &[(CmpOp, ExprWithSpan<'_>)],
        result: &str,
    ) -> Result<()> {
        let Some(((op, right), rest)) = ops.split_first() else {
            return Ok(());
        };
        let r = self.visit_expr(right)?;
        let value = match op {
            CmpOp::Eq => self.call_obj(&format!("πg.Eq(πF, {left}, {r})")),
            CmpOp::NotEq => self.call_obj(&format!("πg.NE(πF, {left}, {r})")),
            CmpOp::Lt => self.call_obj(&format!("πg.LT(πF, {left}, {r})")),
            CmpOp::LtE => self.call_obj(&format!("πg.LE(πF, {left}, {r})")),
            CmpOp::Gt => self.call_obj(&format!("πg.GT(πF, {left}, {r})")),
            CmpOp::GtE => self.call_obj(&format!("πg.GE(πF, {left}, {r})")),
            CmpOp::In | CmpOp::NotIn => {
                let b = self.pool.alloc_temp(GoType::Bool);
                self.checked(&format!("{b}, "), &format!("πg.Contains(πF, {r}, {left})"));
                let not = if *op == CmpOp::NotIn { "!" } else { "" };
                format!("πg.GetBool({not}{b}).ToObject()")
            }
            CmpOp::Is => format!("πg.GetBool({left} == {r}).ToObject()"),
            CmpOp::IsNot => format!("πg.GetBool({left} != {r}).ToObject()"),
        };
        if rest.is_empty() {
            self.w.write(&format!("{result} = {value}"));
            return Ok(());
        }
        let b = self.is_true(&value);
        self.w.write(&format!("if {b} {{"));
        self.indented(|v| v.compare(r, rest, result))?;
        self.w.write("} else {");
        self.w.indent_block(1).write(&format!("{result} = {value}"));
        self.w.write("}");
        Ok(())
    }

    fn call(&mut self, func: &ExprWithSpan<'_>, args: &[Arg<'_>], span: Span) -> Result<String> {
        let f = self.visit_expr(func)?;
        let mut positional = Vec::new();
        let mut keywords = Vec::new();
        let mut star = None;
        let mut double_star = None;
        for arg in args {
            match arg {
                Arg::Positional(e) => {
                    if star.is_some() {
                        return Err(Error::unsupported("positional arguments after *args", span));
                    }
                    positional.push(self.visit_expr(e)?);
                }
                Arg::Keyword(name, e) => {
                    let v = self.visit_expr(e)?;
                    keywords.push(format!("{{{}, {v}}}", go_str(name)));
                }
                Arg::Star(e) => {
                    if star.is_some() {
                        return Err(Error::unsupported("multiple *args in a call", span));
                    }
                    star = Some(self.visit_expr(e)?);
                }
                Arg::DoubleStar(e) => {
                    if double_star.is_some() {
                        return Err(Error::unsupported("multiple **kwargs in a call", span));
                    }
                    double_star = Some(self.visit_expr(e)?);
                }
            }
        }
        let args = if positional.is_empty() {
            "nil".to_string()
        } else {
            format!("[]*πg.Object{{{}}}", positional.join(", "))
        };
        let kwargs = if keywords.is_empty() {
            "nil".to_string()
        } else {
            format!("πg.KWArgs{{{}}}", keywords.join(", "))
        };
        if star.is_none() && double_star.is_none() {
            return Ok(self.call_obj(&format!("{f}.Call(πF, {args}, {kwargs})")));
        }
        let star = star.unwrap_or_else(|| "nil".to_string());
        let double_star = double_star.unwrap_or_else(|| "nil".to_string());
        Ok(self.call_obj(&format!(
            "πg.Invoke(πF, {f}, {args}, {star}, {kwargs}, {double_star})"
        )))
    }

    fn comprehension(
        &mut self,
        kind: CompKind,
        element: &ExprWithSpan<'_>,
        value: Option<&ExprWithSpan<'_>>,
        generators: &[CompFor<'_>],
        span: Span,
    ) -> Result<String> {
        let Some(first) = generators.first() else {
            return Err(Error::codegen("comprehension without a 'for' clause", span));
        };
        let iterable = self.visit_expr(&first.iter)?;
        let block = self.child_block(span)?;
        self.pool.open_frame();
        let code = self.nested(block, vec![Frame::Function], None, |v| {
            let (acc_type, ctor) = match kind {
                CompKind::List | CompKind::Generator => (GoType::List, "πg.NewList()"),
                CompKind::Set => (GoType::Set, "πg.NewSet()"),
                CompKind::Dict => (GoType::Dict, "πg.NewDict()"),
            };
            let acc = v.pool.alloc_temp(acc_type);
            v.w.write(&format!("{acc} = {ctor}"));
            let insert = CompInsert {
                kind,
                acc: acc.clone(),
                element,
                value,
            };
            v.comp_loop(&iterable, generators, &insert)?;
            v.w.write(&format!("return {acc}.ToObject(), nil"));
            Ok(())
        });
        let temps = self.pool.close_frame();
        let code = code?;
        let mut inner = Writer::new();
        write_locals(block, &mut inner);
        write_temps(&temps, &mut inner);
        inner.write(&code);
        let result = self.pool.alloc_temp(GoType::Object);
        self.w.write(&format!(
            "{result}, πE = func() (*πg.Object, *πg.BaseException) {{"
        ));
        self.w.indent_block(1).write(inner.as_str());
        self.w.write("}()");
        let propagate = self.propagate();
        self.w.write("if πE != nil {");
        self.w.indent_block(1).write(&propagate);
        self.w.write("}");
        if kind == CompKind::Generator {
            return Ok(self.call_obj(&format!("πg.Iter(πF, {result})")));
        }
        Ok(result)
    }

    fn comp_loop(
        &mut self,
        iterable: &str,
        generators: &[CompFor<'_>],
        insert: &CompInsert<'_, '_>,
    ) -> Result<()> {
        let Some((g, rest)) = generators.split_first() else {
            return self.comp_insert(insert);
        };
        self.for_loop(iterable, &g.target, None, |v| v.comp_clauses(&g.ifs, rest, insert))
    }

    fn comp_clauses(
        &mut self,
        ifs: &[ExprWithSpan<'_>],
        rest: &[CompFor<'_>],
        insert: &CompInsert<'_, '_>,
    ) -> Result<()> {
        if let Some((cond, more)) = ifs.split_first() {
            let c = self.visit_expr(cond)?;
            let b = self.is_true(&c);
            self.w.write(&format!("if {b} {{"));
            self.indented(|v| v.comp_clauses(more, rest, insert))?;
            self.w.write("}");
            return Ok(());
        }
        match rest.first() {
            Some(next) => {
                let iterable = self.visit_expr(&next.iter)?;
                self.comp_loop(&iterable, rest, insert)
            }
            None => self.comp_insert(insert),
        }
    }

    fn comp_insert(&mut self, insert: &CompInsert<'_, '_>) -> Result<()> {
        let e = self.visit_expr(insert.element)?;
        let acc = &insert.acc;
        match (insert.kind, insert.value) {
            (CompKind::Dict, Some(value)) => {
                let v = self.visit_expr(value)?;
                self.call_err(&format!("{acc}.SetItem(πF, {e}, {v})"));
            }
            (CompKind::Set, _) => self.call_err(&format!("{acc}.Add(πF, {e})")),
            _ => self.w.write(&format!("{acc}.Append({e})")),
        }
        Ok(())
    }

    fn unbound_check(&mut self, name: &str, binding: Binding) {
        let var = local_var(name);
        let (typ, message) = match binding {
            Binding::Free => (
                "πg.NameErrorType",
                format!("free variable '{name}' referenced before assignment in enclosing scope"),
            ),
            _ => (
                "πg.UnboundLocalErrorType",
                format!("local variable '{name}' referenced before assignment"),
            ),
        };
        let propagate = self.propagate();
        self.w.write(&format!(
            "if {var} == nil {{\n\tπE = πF.RaiseType({typ}, {})\n\t{propagate}\n}}",
            go_str(&message)
        ));
    }

    pub(crate) fn load_name(&mut self, name: &str) -> Result<String> {
        let binding = self.block.binding(name);
        let key = self.pool.intern(name);
        let value = match (self.class_ns.clone(), binding) {
            (Some(ns), Binding::Local) => {
                let call = format!("πg.ResolveClass(πF, {ns}, nil, {key})");
                self.call_obj(&call)
            }
            (Some(ns), Binding::Free) => {
                let call = format!("πg.ResolveClass(πF, {ns}, {}, {key})", local_var(name));
                self.call_obj(&call)
            }
            (_, Binding::Global | Binding::Builtin) => {
                self.call_obj(&format!("πg.ResolveGlobal(πF, {key})"))
            }
            (None, Binding::Local | Binding::Free) => {
                self.unbound_check(name, binding);
                let t = self.pool.alloc_temp(GoType::Object);
                self.w.write(&format!("{t} = {}", local_var(name)));
                t
            }
        };
        Ok(value)
    }

    pub(crate) fn store_name(&mut self, name: &str, value: &str) -> Result<()> {
        let binding = self.block.binding(name);
        match (self.class_ns.clone(), binding) {
            (Some(ns), Binding::Local) => {
                let key = self.pool.intern(name);
                let call = format!("{ns}.SetItem(πF, {key}.ToObject(), {value})");
                self.call_err(&call);
            }
            (_, Binding::Global | Binding::Builtin) => {
                let key = self.pool.intern(name);
                self.call_err(&format!("πF.Globals().SetItem(πF, {key}.ToObject(), {value})"));
            }
            _ => self.w.write(&format!("{} = {value}", local_var(name))),
        }
        Ok(())
    }

    fn delete_name(&mut self, name: &str) {
        let binding = self.block.binding(name);
        match (self.class_ns.clone(), binding) {
            (Some(ns), Binding::Local) => {
                let key = self.pool.intern(name);
                let call = format!("{ns}.DelItem(πF, {key}.ToObject())");
                self.call_err(&call);
            }
            (_, Binding::Global | Binding::Builtin) => {
                let key = self.pool.intern(name);
                self.call_err(&format!("πF.Globals().DelItem(πF, {key}.ToObject())"));
            }
            _ => {
                self.unbound_check(name, binding);
                self.w.write(&format!("{} = nil", local_var(name)));
            }
        }
    }

    pub(crate) fn assign_target(&mut self, target: &ExprWithSpan<'_>, value: &str) -> Result<()> {
        let (expr, span) = target;
        match expr {
            Expr::Name(name) => self.store_name(name, value)?,
            Expr::Attribute { value: obj, attr } => {
                let o = self.visit_expr(obj)?;
                let attr = self.pool.intern(attr);
                self.call_err(&format!("πg.SetAttr(πF, {o}, {attr}, {value})"));
            }
            Expr::Subscript { value: obj, index } => {
                let o = self.visit_expr(obj)?;
                let i = self.visit_expr(index)?;
                self.call_err(&format!("πg.SetItem(πF, {o}, {i}, {value})"));
            }
            Expr::Tuple(items) | Expr::List(items) => {
                if let Some((_, span)) = items.iter().find(|(e, _)| matches!(e, Expr::Starred(_))) {
                    return Err(Error::unsupported("starred assignment targets", *span));
                }
                let unpacked = self.pool.alloc_temp(GoType::Objects);
                self.checked(
                    &format!("{unpacked}, "),
                    &format!("πg.Unpack(πF, {value}, {})", items.len()),
                );
                for (i, item) in items.iter().enumerate() {
                    self.assign_target(item, &format!("{unpacked}[{i}]"))?;
                }
            }
            Expr::Starred(_) => return Err(Error::unsupported("starred assignment targets", *span)),
            other => {
                return Err(Error::codegen(format!("cannot assign to {}", other.kind()), *span))
            }
        }
        Ok(())
    }

    pub(crate) fn delete_target(&mut self, (expr, span): &ExprWithSpan<'_>) -> Result<()> {
        match expr {
            Expr::Name(name) => self.delete_name(name),
            Expr::Attribute { value, attr } => {
                let o = self.visit_expr(value)?;
                let attr = self.pool.intern(attr);
                self.call_err(&format!("πg.DelAttr(πF, {o}, {attr})"));
            }
            Expr::Subscript { value, index } => {
                let o = self.visit_expr(value)?;
                let i = self.visit_expr(index)?;
                self.call_err(&format!("πg.DelItem(πF, {o}, {i})"));
            }
            Expr::Tuple(items) | Expr::List(items) => {
                for item in items {
                    self.delete_target(item)?;
                }
            }
            other => {
                return Err(Error::codegen(format!("cannot delete {}", other.kind()), *span))
            }
        }
        Ok(())
    }

    pub(crate) fn aug_assign(
        &mut self,
        target: &ExprWithSpan<'_>,
        op: BinOp,
        value: &ExprWithSpan<'_>,
    ) -> Result<()> {
        let f = op.runtime_fn(true, self.info.future.division);
        match &target.0 {
            Expr::Name(name) => {
                let current = self.load_name(name)?;
                let v = self.visit_expr(value)?;
                let r = self.call_obj(&format!("{f}(πF, {current}, {v})"));
                self.store_name(name, &r)
            }
            Expr::Attribute { value: obj, attr } => {
                let o = self.visit_expr(obj)?;
                let attr = self.pool.intern(attr);
                let current = self.call_obj(&format!("πg.GetAttr(πF, {o}, {attr}, nil)"));
                let v = self.visit_expr(value)?;
                let r = self.call_obj(&format!("{f}(πF, {current}, {v})"));
                self.call_err(&format!("πg.SetAttr(πF, {o}, {attr}, {r})"));
                Ok(())
            }
            Expr::Subscript { value: obj, index } => {
                let o = self.visit_expr(obj)?;
                let i = self.visit_expr(index)?;
                let current = self.call_obj(&format!("πg.GetItem(πF, {o}, {i})"));
                let v = self.visit_expr(value)?;
                let r = self.call_obj(&format!("{f}(πF, {current}, {v})"));
                self.call_err(&format!("πg.SetItem(πF, {o}, {i}, {r})"));
                Ok(())
            }
            other => Err(Error::codegen(
                format!("illegal target for augmented assignment: {}", other.kind()),
                target.1,
            )),
        }
    }
}

/// Small literals become machine ints; anything wider is parsed by the
/// runtime as a long.
fn int_literal(text: &str) -> String {
    let digits = text.replace('_', "");
    let lower = digits.to_ascii_lowercase();
    let (body, base) = match lower.get(..2) {
        Some("0x") => (&digits[2..], 16),
        Some("0o") => (&digits[2..], 8),
        Some("0b") => (&digits[2..], 2),
        _ => (digits.as_str(), 10),
    };
    match i64::from_str_radix(body, base) {
        Ok(v) => format!("πg.NewInt({v}).ToObject()"),
        Err(_) => format!("πg.NewLongFromString({}, {base}).ToObject()", go_str(body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{lower, lower_err};

    #[test]
    fn operator_functions() {
        assert_eq!(BinOp::Add.runtime_fn(false, false), "πg.Add");
        assert_eq!(BinOp::Div.runtime_fn(false, false), "πg.Div");
        assert_eq!(BinOp::Div.runtime_fn(true, true), "πg.ITrueDiv");
        assert_eq!(BinOp::BitXor.runtime_fn(true, false), "πg.IXor");
    }

    #[test]
    fn integer_literals() {
        assert_eq!(int_literal("1_000"), "πg.NewInt(1000).ToObject()");
        assert_eq!(int_literal("0xff"), "πg.NewInt(255).ToObject()");
        assert_eq!(int_literal("0b101"), "πg.NewInt(5).ToObject()");
        assert_eq!(
            int_literal("123456789012345678901234567890"),
            "πg.NewLongFromString(\"123456789012345678901234567890\", 10).ToObject()"
        );
    }

    #[test]
    fn module_names_go_through_globals() {
        let code = lower("x = 1\ny = x + len\n");
        assert!(code.contains("πF.Globals().SetItem(πF, ßx.ToObject(), πg.NewInt(1).ToObject())"));
        assert!(code.contains("πg.ResolveGlobal(πF, ßx)"));
        assert!(code.contains("πg.ResolveGlobal(πF, ßlen)"));
        assert!(code.contains("πg.Add(πF, πTemp001, πTemp002)"));
    }

    #[test]
    fn division_follows_future_flag() {
        assert!(lower("x = 1 / 2\n").contains("πg.Div(πF"));
        let code = lower("from __future__ import division\nx = 1 / 2\nx /= 3\n");
        assert!(code.contains("πg.TrueDiv(πF"));
        assert!(code.contains("πg.ITrueDiv(πF"));
    }

    #[test]
    fn function_locals_have_unbound_checks() {
        let code = lower("def f(a):\n    b = a\n    return b\n");
        assert!(code.contains("var µa *πg.Object = πArgs[0]"));
        assert!(code.contains("var µb *πg.Object"));
        assert!(code.contains("if µb == nil {"));
        assert!(code.contains("local variable 'b' referenced before assignment"));
        let snapshot = |var: &str| {
            code.lines()
                .filter_map(|l| l.trim().strip_suffix(&format!(" = {var}")))
                .find(|t| t.starts_with("πTemp"))
                .unwrap()
                .to_string()
        };
        let a = snapshot("µa");
        assert!(code.contains(&format!("µb = {a}\n")));
        let b = snapshot("µb");
        assert!(code.contains(&format!("return {b}, nil")));
    }

    #[test]
    fn local_loads_are_read_before_later_operands() {
        let src = "def f():\n    x = 1\n    def g():\n        nonlocal x\n        x = 2\n        return x\n    return x + g()\n";
        let code = lower(src);
        let add = code.lines().find(|l| l.contains("πg.Add(πF, ")).unwrap();
        let left = add.split("πg.Add(πF, ").nth(1).unwrap().split(',').next().unwrap();
        let snapshot = code.find(&format!("{left} = µx\n")).unwrap();
        let call = code.rfind(".Call(πF, nil, nil)").unwrap();
        assert!(snapshot < call);
    }

    #[test]
    fn chained_comparison_short_circuits() {
        let code = lower("r = 1 < 2 < 3\n");
        assert!(code.contains("πg.LT(πF, πg.NewInt(1).ToObject(), πg.NewInt(2).ToObject())"));
        assert!(code.contains("πg.LT(πF, πg.NewInt(2).ToObject(), πg.NewInt(3).ToObject())"));
        assert!(code.contains("} else {"));
    }

    #[test]
    fn membership_and_identity() {
        let code = lower("r = a not in b\ns = a is None\n");
        assert!(code.contains("πg.Contains(πF, "));
        assert!(code.contains("πg.GetBool(!πTemp"));
        assert!(code.contains(" == πg.None).ToObject()"));
    }

    #[test]
    fn calls_with_star_arguments() {
        let code = lower("f(1, k=2)\ng(*a, **kw)\n");
        assert!(code.contains(".Call(πF, []*πg.Object{πg.NewInt(1).ToObject()}, πg.KWArgs{{\"k\", πg.NewInt(2).ToObject()}})"));
        assert!(code.contains("πg.Invoke(πF, "));
    }

    #[test]
    fn displays() {
        let code = lower("x = [1, 'a']\ny = {1: 2}\nz = {3}\nt = (b'\\x00',)\n");
        assert!(code.contains("πg.NewList(πg.NewInt(1).ToObject(), ßa.ToObject()).ToObject()"));
        assert!(code.contains("= πg.NewDict()"));
        assert!(code.contains(".Add(πF, πg.NewInt(3).ToObject())"));
        assert!(code.contains("πg.NewBytes([]byte(\"\\x00\")...).ToObject()"));
    }

    #[test]
    fn comprehension_runs_in_closure() {
        let code = lower("def f(xs):\n    return [x for x in xs if x]\n");
        assert!(code.contains("πE = func() (*πg.Object, *πg.BaseException) {"));
        assert!(code.contains("var µx *πg.Object"));
        let x = code
            .lines()
            .filter_map(|l| l.trim().strip_suffix(" = µx"))
            .filter(|t| t.starts_with("πTemp"))
            .last()
            .unwrap();
        assert!(code.contains(&format!(".Append({x})")));
        assert!(code.contains("πg.StopIterationType"));
        let code = lower("g = (x for x in y)\n");
        assert!(code.contains("πg.Iter(πF, πTemp"));
    }

    #[test]
    fn class_body_names_use_namespace() {
        let code = lower("class C(object):\n    x = 1\n    y = x\n");
        assert!(code.contains(".SetItem(πF, ß__module__.ToObject(), ß__main__.ToObject())"));
        assert!(code.contains("πg.ResolveClass(πF, πTemp"));
        assert!(code.contains("πg.TypeType.ToObject().Call(πF, []*πg.Object{ßC.ToObject(), "));
    }

    #[test]
    fn unsupported_expressions() {
        assert_eq!(lower_err("x = 1j\n"), "imaginary literals is not supported");
        assert_eq!(lower_err("x = f'{a}'\n"), "f-strings is not supported");
        assert_eq!(lower_err("a, *b = c\n"), "starred assignment targets is not supported");
        assert_eq!(lower_err("x = [*a]\n"), "starred display elements is not supported");
        assert_eq!(lower_err("def f():\n    yield 1\n"), "generators is not supported");
        assert_eq!(lower_err("f() = 1\n"), "cannot assign to function call");
    }
}
