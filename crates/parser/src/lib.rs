mod ast;
mod grammar;
mod layout;

use ariadne::{sources, Color, Label, Report, ReportKind};
pub use ast::*;
use chumsky::prelude::*;
use grammar::{Header, Line};
use std::io::Write;
use std::iter::Peekable;
use std::ops::Range;
use std::vec::IntoIter;

pub fn parse(src: &str) -> Result<Module<'_>, ParseError> {
    let lines = layout::logical_lines(src).map_err(|(range, message)| ParseError {
        issues: vec![Issue {
            reason: message.clone(),
            message,
            range,
        }],
    })?;
    let mut parsed = Vec::with_capacity(lines.len());
    let mut issues = Vec::new();
    for l in lines {
        match grammar::line(l.offset).parse(l.text).into_result() {
            Ok(line) => parsed.push(Parsed {
                indent: l.indent,
                line,
                span: Span {
                    start: l.offset,
                    end: l.offset + l.text.len(),
                },
            }),
            Err(es) => issues.extend(es.into_iter().map(|e| Issue {
                range: l.offset + e.span().start..l.offset + e.span().end,
                message: e.to_string(),
                reason: e.reason().to_string(),
            })),
        }
    }
    if !issues.is_empty() {
        return Err(ParseError { issues });
    }
    let mut builder = Builder {
        lines: parsed.into_iter().peekable(),
    };
    let body = builder.block(0)?;
    match builder.lines.next() {
        None => Ok(Module { body }),
        Some(l) => Err(Issue::new(
            l.span,
            "unindent does not match any outer indentation level",
        )
        .into()),
    }
}

struct Parsed<'a> {
    indent: usize,
    line: Line<'a>,
    span: Span,
}

/// Rebuilds the statement tree from logical lines by indentation.
struct Builder<'a> {
    lines: Peekable<IntoIter<Parsed<'a>>>,
}

type Body<'a> = Vec<StmtWithSpan<'a>>;

impl<'a> Builder<'a> {
    fn block(&mut self, indent: usize) -> Result<Body<'a>, Issue> {
        let mut body = Vec::new();
        let mut decorators = Vec::new();
        while let Some(next) = self.lines.peek() {
            if next.indent < indent {
                break;
            }
            if next.indent > indent {
                return Err(Issue::new(next.span, "unexpected indent"));
            }
            let Some(Parsed { line, span, .. }) = self.lines.next() else {
                break;
            };
            match line {
                Line::Decorator(e) => {
                    decorators.push(e);
                    continue;
                }
                Line::Simple(stmts) => {
                    if !decorators.is_empty() {
                        return Err(Issue::new(span, "decorator must precede a definition"));
                    }
                    body.extend(stmts)
                }
                Line::Compound {
                    header,
                    span,
                    suite,
                } => {
                    let decorated = matches!(header, Header::Def(..) | Header::Class(..));
                    if !decorators.is_empty() && !decorated {
                        return Err(Issue::new(span, "decorator must precede a definition"));
                    }
                    let stmt = self.compound(indent, header, span, suite, &mut decorators)?;
                    body.push(stmt);
                }
            }
        }
        if let Some((_, span)) = decorators.first() {
            return Err(Issue::new(*span, "decorator must precede a definition"));
        }
        Ok(body)
    }

    fn suite(
        &mut self,
        indent: usize,
        header: Span,
        inline: Option<Body<'a>>,
    ) -> Result<Body<'a>, Issue> {
        if let Some(body) = inline {
            return Ok(body);
        }
        match self.lines.peek() {
            Some(next) if next.indent > indent => {
                let inner = next.indent;
                self.block(inner)
            }
            _ => Err(Issue::new(header, "expected an indented block")),
        }
    }

    /// Consumes the next line when it continues the current statement with
    /// the given clause keyword.
    fn clause(
        &mut self,
        indent: usize,
        keyword: &str,
    ) -> Option<(Header<'a>, Span, Option<Body<'a>>)> {
        let next = self.lines.peek()?;
        match &next.line {
            Line::Compound { header, .. }
                if next.indent == indent && header.keyword() == keyword =>
            {
                match self.lines.next() {
                    Some(Parsed {
                        line:
                            Line::Compound {
                                header,
                                span,
                                suite,
                            },
                        ..
                    }) => Some((header, span, suite)),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn else_clause(&mut self, indent: usize) -> Result<Body<'a>, Issue> {
        match self.clause(indent, "else") {
            Some((_, span, suite)) => self.suite(indent, span, suite),
            None => Ok(Vec::new()),
        }
    }

    fn compound(
        &mut self,
        indent: usize,
        header: Header<'a>,
        span: Span,
        inline: Option<Body<'a>>,
        decorators: &mut Vec<ExprWithSpan<'a>>,
    ) -> Result<StmtWithSpan<'a>, Issue> {
        let stmt = match header {
            Header::If(test) => {
                let body = self.suite(indent, span, inline)?;
                let mut elifs = Vec::new();
                while let Some((Header::Elif(test), span, suite)) = self.clause(indent, "elif") {
                    elifs.push((test, self.suite(indent, span, suite)?, span));
                }
                let mut orelse = self.else_clause(indent)?;
                for (test, body, span) in elifs.into_iter().rev() {
                    orelse = vec![with_span(Stmt::If { test, body, orelse }, span)];
                }
                Stmt::If { test, body, orelse }
            }
            Header::While(test) => {
                let body = self.suite(indent, span, inline)?;
                let orelse = self.else_clause(indent)?;
                Stmt::While { test, body, orelse }
            }
            Header::For(target, iter) => {
                let body = self.suite(indent, span, inline)?;
                let orelse = self.else_clause(indent)?;
                Stmt::For {
                    target,
                    iter,
                    body,
                    orelse,
                }
            }
            Header::Try => {
                let body = self.suite(indent, span, inline)?;
                let mut handlers = Vec::new();
                while let Some((Header::Except(clause), span, suite)) =
                    self.clause(indent, "except")
                {
                    let (typ, name) = match clause {
                        Some((typ, name)) => (Some(typ), name),
                        None => (None, None),
                    };
                    if handlers
                        .last()
                        .is_some_and(|h: &ExceptHandler| h.typ.is_none())
                    {
                        return Err(Issue::new(span, "default 'except:' must be last"));
                    }
                    let body = self.suite(indent, span, suite)?;
                    handlers.push(ExceptHandler {
                        typ,
                        name,
                        body,
                        span,
                    });
                }
                let orelse = if handlers.is_empty() {
                    Vec::new()
                } else {
                    self.else_clause(indent)?
                };
                let finalbody = match self.clause(indent, "finally") {
                    Some((_, span, suite)) => self.suite(indent, span, suite)?,
                    None if handlers.is_empty() => {
                        return Err(Issue::new(span, "expected 'except' or 'finally' block"))
                    }
                    None => Vec::new(),
                };
                Stmt::Try {
                    body,
                    handlers,
                    orelse,
                    finalbody,
                }
            }
            Header::With(items) => Stmt::With {
                items,
                body: self.suite(indent, span, inline)?,
            },
            Header::Def(name, params) => Stmt::FunctionDef {
                name,
                params,
                body: self.suite(indent, span, inline)?,
                decorators: std::mem::take(decorators),
            },
            Header::Class(name, bases) => Stmt::ClassDef {
                name,
                bases,
                body: self.suite(indent, span, inline)?,
                decorators: std::mem::take(decorators),
            },
            clause @ (Header::Elif(_) | Header::Else | Header::Except(_) | Header::Finally) => {
                return Err(Issue::new(
                    span,
                    format!("unexpected '{}' clause", clause.keyword()),
                ))
            }
        };
        Ok(with_span(stmt, span))
    }
}

fn with_span(stmt: Stmt<'_>, header: Span) -> StmtWithSpan<'_> {
    let span = match &stmt {
        Stmt::If { body, orelse, .. }
        | Stmt::While { body, orelse, .. }
        | Stmt::For { body, orelse, .. } => {
            stmts_span(header, body).join(stmts_span(header, orelse))
        }
        Stmt::Try {
            body,
            handlers,
            orelse,
            finalbody,
        } => handlers
            .iter()
            .fold(stmts_span(header, body), |s, h| {
                s.join(stmts_span(h.span, &h.body))
            })
            .join(stmts_span(header, orelse))
            .join(stmts_span(header, finalbody)),
        Stmt::With { body, .. } | Stmt::FunctionDef { body, .. } | Stmt::ClassDef { body, .. } => {
            stmts_span(header, body)
        }
        _ => header,
    };
    (stmt, span)
}

fn stmts_span(header: Span, body: &[StmtWithSpan]) -> Span {
    body.iter().fold(header, |s, (_, b)| s.join(*b))
}

#[derive(Debug, Clone)]
struct Issue {
    range: Range<usize>,
    message: String,
    reason: String,
}

impl Issue {
    fn new(span: Span, message: impl Into<String>) -> Self {
        let message = message.into();
        Issue {
            range: span.start..span.end,
            reason: message.clone(),
            message,
        }
    }
}

impl From<Issue> for ParseError {
    fn from(issue: Issue) -> Self {
        ParseError {
            issues: vec![issue],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParseError {
    issues: Vec<Issue>,
}

impl ParseError {
    pub fn write(&self, mut w: impl Write, file_name: &str, src: &str) -> std::io::Result<()> {
        for e in &self.issues {
            Report::build(ReportKind::Error, file_name, e.range.start)
                .with_message(&e.message)
                .with_label(
                    Label::new((file_name.to_string(), e.range.clone()))
                        .with_message(&e.reason)
                        .with_color(Color::Red),
                )
                .finish()
                .write(sources([(file_name.to_string(), src)]), &mut w)?
        }
        Ok(())
    }

    /// One-based line and column of the first problem.
    pub fn position(&self, src: &str) -> (usize, usize) {
        let start = self
            .issues
            .first()
            .map_or(0, |e| e.range.start)
            .min(src.len());
        let before = src.get(..start).unwrap_or(src);
        let line = before.matches('\n').count() + 1;
        let col = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
        (line, col)
    }

    pub fn message(&self) -> &str {
        self.issues.first().map_or("invalid syntax", |e| &e.message)
    }
}
