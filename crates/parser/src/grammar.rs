use crate::ast::*;
use chumsky::prelude::*;
use chumsky::text::unicode::keyword;
use chumsky::text::Char;
use std::iter::once;

pub(crate) type Extra<'a> = extra::Err<Rich<'a, char>>;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue",
    "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if", "import",
    "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try", "while",
    "with", "yield",
];

pub(crate) enum Line<'a> {
    Simple(Vec<StmtWithSpan<'a>>),
    Compound {
        header: Header<'a>,
        span: Span,
        suite: Option<Vec<StmtWithSpan<'a>>>,
    },
    Decorator(ExprWithSpan<'a>),
}

#[derive(Clone, Debug)]
pub(crate) enum Header<'a> {
    If(ExprWithSpan<'a>),
    Elif(ExprWithSpan<'a>),
    Else,
    While(ExprWithSpan<'a>),
    For(ExprWithSpan<'a>, ExprWithSpan<'a>),
    Try,
    Except(Option<(ExprWithSpan<'a>, Option<&'a str>)>),
    Finally,
    With(Vec<WithItem<'a>>),
    Def(&'a str, Params<'a>),
    Class(&'a str, Vec<Arg<'a>>),
}

impl Header<'_> {
    pub(crate) fn keyword(&self) -> &'static str {
        match self {
            Header::If(_) => "if",
            Header::Elif(_) => "elif",
            Header::Else => "else",
            Header::While(_) => "while",
            Header::For(..) => "for",
            Header::Try => "try",
            Header::Except(_) => "except",
            Header::Finally => "finally",
            Header::With(_) => "with",
            Header::Def(..) => "def",
            Header::Class(..) => "class",
        }
    }
}

/// Shifts spans of a line-local parse back into source coordinates.
#[derive(Clone, Copy)]
struct Offset(usize);

impl Offset {
    fn span(self, s: SimpleSpan) -> Span {
        Span {
            start: self.0 + s.start,
            end: self.0 + s.end,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum StrKind {
    Text,
    Bytes,
    Formatted,
}

enum Trailer<'a> {
    Call(Vec<Arg<'a>>),
    Attr(&'a str),
    Index(ExprWithSpan<'a>),
}

#[derive(Clone)]
enum Tail<'a> {
    Comp(Vec<CompFor<'a>>),
    Seq(Vec<ExprWithSpan<'a>>, bool),
}

#[derive(Clone)]
enum DictTail<'a> {
    Comp(Vec<CompFor<'a>>),
    Items(Vec<(ExprWithSpan<'a>, ExprWithSpan<'a>)>),
}

enum ParamItem<'a> {
    Normal(Param<'a>),
    VarArg(Option<&'a str>),
    KwArg(&'a str),
}

fn whitespace<'a>() -> impl Parser<'a, &'a str, (), Extra<'a>> + Copy {
    let comment = just('#')
        .then(any().and_is(just('\n').not()).repeated())
        .ignored();
    any()
        .filter(|c: &char| c.is_whitespace())
        .ignored()
        .or(just("\\\r\n").ignored())
        .or(just("\\\n").ignored())
        .or(comment)
        .repeated()
}

fn ident<'a>() -> impl Parser<'a, &'a str, &'a str, Extra<'a>> + Copy {
    any()
        .filter(|c: &char| c.is_ident_start() || *c == '_')
        .then(any().filter(|c: &char| c.is_ident_continue()).repeated())
        .to_slice()
        .filter(|s: &&str| !KEYWORDS.contains(s))
}

fn number<'a>() -> impl Parser<'a, &'a str, Num<'a>, Extra<'a>> + Clone {
    let digits = any().filter(|c: &char| c.is_ascii_digit()).then(
        any()
            .filter(|c: &char| c.is_ascii_digit() || *c == '_')
            .repeated(),
    );
    let exponent = one_of("eE")
        .then(one_of("+-").or_not())
        .then(digits.clone());
    let radix = just('0')
        .then(one_of("xXoObB"))
        .then(
            any()
                .filter(|c: &char| c.is_ascii_hexdigit() || *c == '_')
                .repeated()
                .at_least(1),
        )
        .to_slice()
        .map(Num::Int);
    let float = choice((
        digits
            .clone()
            .then(just('.'))
            .then(digits.clone().or_not())
            .then(exponent.clone().or_not())
            .ignored(),
        just('.')
            .then(digits.clone())
            .then(exponent.clone().or_not())
            .ignored(),
        digits.clone().then(exponent).ignored(),
    ))
    .to_slice();
    choice((
        radix,
        float
            .clone()
            .or(digits.clone().to_slice())
            .then(one_of("jJ"))
            .to_slice()
            .map(Num::Imaginary),
        float.map(Num::Float),
        digits.to_slice().map(Num::Int),
    ))
}

fn string_body<'a>() -> impl Parser<'a, &'a str, String, Extra<'a>> + Copy {
    custom(move |inp| {
        let q = inp.parse(one_of("'\""))?;
        let marker = inp.save();
        let triple = if inp.parse(just(q).then(just(q))).is_ok() {
            true
        } else {
            inp.rewind(marker);
            false
        };
        let mut s = String::new();
        loop {
            let c = inp.parse(any())?;
            if c == '\\' {
                s.push(c);
                s.push(inp.parse(any())?);
            } else if c == q {
                if !triple {
                    break Ok(s);
                }
                let marker = inp.save();
                if inp.parse(just(q).then(just(q))).is_ok() {
                    break Ok(s);
                }
                inp.rewind(marker);
                s.push(c);
            } else {
                s.push(c);
            }
        }
    })
}

fn string<'a>() -> impl Parser<'a, &'a str, (StrKind, String), Extra<'a>> + Copy {
    one_of("rRbBuUfF")
        .repeated()
        .at_most(2)
        .to_slice()
        .then(string_body())
        .map(|(prefix, raw): (&str, String)| {
            let prefix = prefix.to_ascii_lowercase();
            let value = if prefix.contains('r') {
                raw
            } else {
                unescape(&raw)
            };
            let kind = if prefix.contains('b') {
                StrKind::Bytes
            } else if prefix.contains('f') {
                StrKind::Formatted
            } else {
                StrKind::Text
            };
            (kind, value)
        })
}

fn concat_strings<'a>(parts: Vec<(StrKind, String)>) -> Expr<'a> {
    let kind = parts.first().map_or(StrKind::Text, |(k, _)| *k);
    let formatted = parts.iter().any(|(k, _)| *k == StrKind::Formatted);
    let value: String = parts.into_iter().map(|(_, s)| s).collect();
    if formatted {
        Expr::FormattedStr(value)
    } else if kind == StrKind::Bytes {
        Expr::Bytes(value.chars().map(|c| c as u32 as u8).collect())
    } else {
        Expr::Str(value)
    }
}

pub(crate) fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(e) = chars.next() else {
            out.push('\\');
            break;
        };
        match e {
            '\n' => (),
            '\\' | '\'' | '"' => out.push(e),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            'x' | 'u' | 'U' => {
                let len = match e {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let mut digits = String::new();
                while digits.len() < len {
                    match chars.peek() {
                        Some(d) if d.is_ascii_hexdigit() => {
                            digits.push(*d);
                            chars.next();
                        }
                        _ => break,
                    }
                }
                match u32::from_str_radix(&digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                {
                    Some(ch) if digits.len() == len => out.push(ch),
                    _ => {
                        out.push('\\');
                        out.push(e);
                        out.push_str(&digits);
                    }
                }
            }
            '0'..='7' => {
                let mut value = e.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(value).unwrap_or('\u{FFFD}'));
            }
            _ => {
                out.push('\\');
                out.push(e);
            }
        }
    }
    out
}

/// Comma separated items; a lone item without a trailing comma stays as is,
/// anything else becomes a tuple.
fn sequence<'a, P>(
    item: P,
    at: Offset,
) -> impl Parser<'a, &'a str, ExprWithSpan<'a>, Extra<'a>> + Clone
where
    P: Parser<'a, &'a str, ExprWithSpan<'a>, Extra<'a>> + Clone,
{
    let comma = just(',').padded_by(whitespace());
    item.clone()
        .then(comma.ignore_then(item).repeated().collect::<Vec<_>>())
        .then(comma.or_not())
        .map_with(move |((first, rest), trailing), x| {
            let s: SimpleSpan = x.span();
            {
                if rest.is_empty() && trailing.is_none() {
                    first
                } else {
                    (Expr::Tuple(once(first).chain(rest).collect()), at.span(s))
                }
            }
        })
}

fn binary<'a, P, O>(
    operand: P,
    op: O,
) -> impl Parser<'a, &'a str, ExprWithSpan<'a>, Extra<'a>> + Clone
where
    P: Parser<'a, &'a str, ExprWithSpan<'a>, Extra<'a>> + Clone,
    O: Parser<'a, &'a str, BinOp, Extra<'a>> + Clone,
{
    operand.clone().foldl(
        op.padded_by(whitespace()).then(operand).repeated(),
        |left, (op, right)| {
            let span = left.1.join(right.1);
            (
                Expr::BinOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            )
        },
    )
}

fn parameters<'a, P>(param: P) -> impl Parser<'a, &'a str, Params<'a>, Extra<'a>> + Clone
where
    P: Parser<'a, &'a str, (&'a str, Option<ExprWithSpan<'a>>), Extra<'a>> + Clone,
{
    let ws = whitespace();
    choice((
        just("**")
            .padded_by(ws)
            .ignore_then(param.clone())
            .map(|(name, _)| ParamItem::KwArg(name)),
        just('*')
            .padded_by(ws)
            .ignore_then(param.clone().or_not())
            .map(|p| ParamItem::VarArg(p.map(|(name, _)| name))),
        param.map(|(name, default)| ParamItem::Normal(Param { name, default })),
    ))
    .padded_by(ws)
    .separated_by(just(','))
    .allow_trailing()
    .collect::<Vec<_>>()
    .map(|items| {
        let mut params = Params::default();
        let mut star_seen = false;
        for item in items {
            match item {
                ParamItem::Normal(p) if star_seen => params.kwonly.push(p),
                ParamItem::Normal(p) => params.args.push(p),
                ParamItem::VarArg(name) => {
                    star_seen = true;
                    params.vararg = name;
                }
                ParamItem::KwArg(name) => params.kwarg = Some(name),
            }
        }
        params
    })
}

fn comprehension<'a>(
    kind: CompKind,
    element: ExprWithSpan<'a>,
    generators: Vec<CompFor<'a>>,
) -> Expr<'a> {
    Expr::Comprehension {
        kind,
        element: Box::new(element),
        value: None,
        generators,
    }
}

pub(crate) fn line<'a>(offset: usize) -> impl Parser<'a, &'a str, Line<'a>, Extra<'a>> {
    let at = Offset(offset);
    let ws = whitespace();
    let ident = ident();
    let comma = just(',').padded_by(ws);

    let mut test = Recursive::declare();
    let mut or_test = Recursive::declare();
    let mut or_expr = Recursive::declare();

    let star_expr = just('*')
        .padded_by(ws)
        .ignore_then(or_expr.clone())
        .map_with(move |e, x| {
            let s: SimpleSpan = x.span();
            (Expr::Starred(Box::new(e)), at.span(s))
        });
    let test_or_star = star_expr.clone().or(test.clone()).boxed();
    let target_item = star_expr.or(or_expr.clone()).boxed();

    let comp_for = keyword("for")
        .ignore_then(sequence(target_item.clone(), at).padded_by(ws))
        .then_ignore(keyword("in"))
        .then(or_test.clone().padded_by(ws))
        .then(
            keyword("if")
                .ignore_then(or_test.clone().padded_by(ws))
                .repeated()
                .collect::<Vec<_>>(),
        )
        .map(|((target, iter), ifs)| CompFor { target, iter, ifs });
    let comp_fors = comp_for.repeated().at_least(1).collect::<Vec<_>>().boxed();

    let tail = choice((
        comp_fors.clone().map(Tail::Comp),
        comma
            .ignore_then(test_or_star.clone())
            .repeated()
            .collect::<Vec<_>>()
            .then(comma.or_not())
            .map(|(rest, trailing)| Tail::Seq(rest, trailing.is_some())),
    ))
    .boxed();

    let paren = test_or_star
        .clone()
        .padded_by(ws)
        .then(tail.clone())
        .or_not()
        .map(|body| match body {
            None => Expr::Tuple(Vec::new()),
            Some((first, Tail::Comp(generators))) => {
                comprehension(CompKind::Generator, first, generators)
            }
            Some((first, Tail::Seq(rest, trailing))) => {
                if rest.is_empty() && !trailing {
                    first.0
                } else {
                    Expr::Tuple(once(first).chain(rest).collect())
                }
            }
        })
        .padded_by(ws)
        .delimited_by(just('('), just(')'));

    let list = test_or_star
        .clone()
        .padded_by(ws)
        .then(tail.clone())
        .or_not()
        .map(|body| match body {
            None => Expr::List(Vec::new()),
            Some((first, Tail::Comp(generators))) => {
                comprehension(CompKind::List, first, generators)
            }
            Some((first, Tail::Seq(rest, _))) => Expr::List(once(first).chain(rest).collect()),
        })
        .padded_by(ws)
        .delimited_by(just('['), just(']'));

    let dict_item = test
        .clone()
        .padded_by(ws)
        .then_ignore(just(':'))
        .then(test.clone().padded_by(ws));
    let dict_body = dict_item
        .clone()
        .then(choice((
            comp_fors.clone().map(DictTail::Comp),
            comma
                .ignore_then(dict_item)
                .repeated()
                .collect::<Vec<_>>()
                .then_ignore(comma.or_not())
                .map(DictTail::Items),
        )))
        .map(|((key, value), tail)| match tail {
            DictTail::Comp(generators) => Expr::Comprehension {
                kind: CompKind::Dict,
                element: Box::new(key),
                value: Some(Box::new(value)),
                generators,
            },
            DictTail::Items(rest) => Expr::Dict(once((key, value)).chain(rest).collect()),
        });
    let set_body = test_or_star
        .clone()
        .padded_by(ws)
        .then(tail)
        .map(|(first, tail)| match tail {
            Tail::Comp(generators) => comprehension(CompKind::Set, first, generators),
            Tail::Seq(rest, _) => Expr::Set(once(first).chain(rest).collect()),
        });
    let brace = choice((dict_body, set_body, empty().to(Expr::Dict(Vec::new()))))
        .padded_by(ws)
        .delimited_by(just('{'), just('}'));

    let atom = choice((
        just("...").to(Expr::Const(Const::Ellipsis)),
        string()
            .separated_by(ws)
            .at_least(1)
            .collect::<Vec<_>>()
            .map(concat_strings),
        number().map(Expr::Num),
        keyword("None").to(Expr::Const(Const::None)),
        keyword("True").to(Expr::Const(Const::True)),
        keyword("False").to(Expr::Const(Const::False)),
        paren,
        list,
        brace,
        ident.map(Expr::Name),
    ))
    .map_with(move |e, x| {
        let s: SimpleSpan = x.span();
        (e, at.span(s))
    })
    .boxed();

    let arg = choice((
        just("**")
            .padded_by(ws)
            .ignore_then(test.clone())
            .map(Arg::DoubleStar),
        just('*')
            .padded_by(ws)
            .ignore_then(test.clone())
            .map(Arg::Star),
        ident
            .then_ignore(ws)
            .then_ignore(just('=').then(just('=').not()))
            .then(test.clone().padded_by(ws))
            .map(|(name, value)| Arg::Keyword(name, value)),
        test.clone()
            .then(comp_fors.clone().or_not())
            .map_with(move |(e, generators), x| {
                let s: SimpleSpan = x.span();
                match generators {
                    None => Arg::Positional(e),
                    Some(generators) => Arg::Positional((
                        comprehension(CompKind::Generator, e, generators),
                        at.span(s),
                    )),
                }
            }),
    ));
    let args = arg
        .padded_by(ws)
        .separated_by(just(','))
        .allow_trailing()
        .collect::<Vec<_>>()
        .padded_by(ws)
        .delimited_by(just('('), just(')'))
        .boxed();

    let slice = test
        .clone()
        .or_not()
        .padded_by(ws)
        .then_ignore(just(':'))
        .then(test.clone().or_not().padded_by(ws))
        .then(
            just(':')
                .ignore_then(test.clone().or_not().padded_by(ws))
                .or_not(),
        )
        .map_with(move |((lower, upper), step), x| {
            let s: SimpleSpan = x.span();
            {
                (
                    Expr::Slice {
                        lower: lower.map(Box::new),
                        upper: upper.map(Box::new),
                        step: step.flatten().map(Box::new),
                    },
                    at.span(s),
                )
            }
        });
    let subscript = slice.or(test.clone()).padded_by(ws);

    let trailer = choice((
        args.clone().map(Trailer::Call),
        just('.')
            .padded_by(ws)
            .ignore_then(ident)
            .map(Trailer::Attr),
        sequence(subscript, at)
            .padded_by(ws)
            .delimited_by(just('['), just(']'))
            .map(Trailer::Index),
    ))
    .map_with(move |t, x| {
        let s: SimpleSpan = x.span();
        (t, at.span(s))
    });

    let primary = atom
        .foldl(
            ws.ignore_then(trailer).repeated(),
            |value, (trailer, tspan)| {
                let span = value.1.join(tspan);
                let e = match trailer {
                    Trailer::Call(args) => Expr::Call {
                        func: Box::new(value),
                        args,
                    },
                    Trailer::Attr(attr) => Expr::Attribute {
                        value: Box::new(value),
                        attr,
                    },
                    Trailer::Index(index) => Expr::Subscript {
                        value: Box::new(value),
                        index: Box::new(index),
                    },
                };
                (e, span)
            },
        )
        .boxed();

    let factor = recursive(|factor: Recursive<dyn Parser<'a, &'a str, ExprWithSpan<'a>, Extra<'a>>>| {
        let power = primary
            .clone()
            .then(
                just("**")
                    .padded_by(ws)
                    .ignore_then(factor.clone())
                    .or_not(),
            )
            .map(|(base, exp)| match exp {
                None => base,
                Some(exp) => {
                    let span = base.1.join(exp.1);
                    (
                        Expr::BinOp {
                            op: BinOp::Pow,
                            left: Box::new(base),
                            right: Box::new(exp),
                        },
                        span,
                    )
                }
            });
        let unary = one_of("+-~")
            .then_ignore(ws)
            .then(factor)
            .map_with(move |(op, operand), x| {
                let s: SimpleSpan = x.span();
                {
                    let op = match op {
                        '+' => UnaryOp::Pos,
                        '-' => UnaryOp::Neg,
                        _ => UnaryOp::Invert,
                    };
                    (
                        Expr::UnaryOp {
                            op,
                            operand: Box::new(operand),
                        },
                        at.span(s),
                    )
                }
            });
        unary.or(power)
    })
    .boxed();

    let term = binary(
        factor,
        choice((
            just("//").to(BinOp::FloorDiv),
            just('*').to(BinOp::Mul),
            just('@').to(BinOp::MatMul),
            just('/').to(BinOp::Div),
            just('%').to(BinOp::Mod),
        )),
    )
    .boxed();
    let arith = binary(
        term,
        choice((just('+').to(BinOp::Add), just('-').to(BinOp::Sub))),
    )
    .boxed();
    let shift = binary(
        arith,
        choice((just("<<").to(BinOp::LShift), just(">>").to(BinOp::RShift))),
    )
    .boxed();
    let band = binary(shift, just('&').to(BinOp::BitAnd)).boxed();
    let bxor = binary(band, just('^').to(BinOp::BitXor)).boxed();
    let bor = binary(bxor, just('|').to(BinOp::BitOr)).boxed();
    or_expr.define(bor);

    let cmp_op = choice((
        just("==").to(CmpOp::Eq),
        just("!=").to(CmpOp::NotEq),
        just("<=").to(CmpOp::LtE),
        just(">=").to(CmpOp::GtE),
        just('<').to(CmpOp::Lt),
        just('>').to(CmpOp::Gt),
        keyword("not").then(ws).then(keyword("in")).to(CmpOp::NotIn),
        keyword("in").to(CmpOp::In),
        keyword("is").then(ws).then(keyword("not")).to(CmpOp::IsNot),
        keyword("is").to(CmpOp::Is),
    ));
    let comparison = or_expr
        .clone()
        .then(
            cmp_op
                .padded_by(ws)
                .then(or_expr.clone())
                .repeated()
                .collect::<Vec<_>>(),
        )
        .map(|(left, ops)| {
            if ops.is_empty() {
                left
            } else {
                let span = ops.last().map_or(left.1, |(_, e)| left.1.join(e.1));
                (
                    Expr::Compare {
                        left: Box::new(left),
                        ops,
                    },
                    span,
                )
            }
        })
        .boxed();

    let not_test = recursive(|not_test| {
        keyword("not")
            .then(ws)
            .ignore_then(not_test)
            .map_with(move |e, x| {
                let s: SimpleSpan = x.span();
                {
                    (
                        Expr::UnaryOp {
                            op: UnaryOp::Not,
                            operand: Box::new(e),
                        },
                        at.span(s),
                    )
                }
            })
            .or(comparison)
    })
    .boxed();
    let bool_op = |op: BoolOp| {
        move |left: ExprWithSpan<'a>, right: ExprWithSpan<'a>| {
            let span = left.1.join(right.1);
            (
                Expr::BoolOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            )
        }
    };
    let and_test = not_test
        .clone()
        .foldl(
            keyword("and")
                .padded_by(ws)
                .ignore_then(not_test)
                .repeated(),
            bool_op(BoolOp::And),
        )
        .boxed();
    or_test.define(and_test.clone().foldl(
        keyword("or").padded_by(ws).ignore_then(and_test).repeated(),
        bool_op(BoolOp::Or),
    ));

    let lambda_param = ident.then(just('=').padded_by(ws).ignore_then(test.clone()).or_not());
    let lambdef = keyword("lambda")
        .ignore_then(parameters(lambda_param).padded_by(ws))
        .then_ignore(just(':'))
        .then(test.clone().padded_by(ws))
        .map_with(move |(params, body), x| {
            let s: SimpleSpan = x.span();
            {
                (
                    Expr::Lambda {
                        params,
                        body: Box::new(body),
                    },
                    at.span(s),
                )
            }
        });
    let conditional = or_test
        .clone()
        .then(
            keyword("if")
                .padded_by(ws)
                .ignore_then(or_test.clone())
                .then_ignore(keyword("else").padded_by(ws))
                .then(test.clone())
                .or_not(),
        )
        .map(|(body, cond)| match cond {
            None => body,
            Some((test, orelse)) => {
                let span = body.1.join(orelse.1);
                (
                    Expr::IfExp {
                        test: Box::new(test),
                        body: Box::new(body),
                        orelse: Box::new(orelse),
                    },
                    span,
                )
            }
        });
    test.define(lambdef.or(conditional));

    let testlist = sequence(test_or_star.clone(), at).boxed();
    let yield_expr = keyword("yield")
        .ignore_then(ws.ignore_then(testlist.clone()).or_not())
        .map_with(move |value, x| {
            let s: SimpleSpan = x.span();
            (Expr::Yield(value.map(Box::new)), at.span(s))
        });
    let rhs = yield_expr.or(testlist.clone()).boxed();

    let augop = choice((
        just("+=").to(BinOp::Add),
        just("-=").to(BinOp::Sub),
        just("**=").to(BinOp::Pow),
        just("*=").to(BinOp::Mul),
        just("@=").to(BinOp::MatMul),
        just("//=").to(BinOp::FloorDiv),
        just("/=").to(BinOp::Div),
        just("%=").to(BinOp::Mod),
        just("<<=").to(BinOp::LShift),
        just(">>=").to(BinOp::RShift),
        just("&=").to(BinOp::BitAnd),
        just("^=").to(BinOp::BitXor),
        just("|=").to(BinOp::BitOr),
    ));
    let aug_assign = testlist
        .clone()
        .then(augop.padded_by(ws))
        .then(rhs.clone())
        .map(|((target, op), value)| Stmt::AugAssign { target, op, value });
    let assign_or_expr = rhs
        .clone()
        .then(
            just('=')
                .then(just('=').not())
                .padded_by(ws)
                .ignore_then(rhs)
                .repeated()
                .collect::<Vec<_>>(),
        )
        .map(|(first, mut rest)| match rest.pop() {
            None => Stmt::Expr(first),
            Some(value) => Stmt::Assign {
                targets: once(first).chain(rest).collect(),
                value,
            },
        });

    let return_stmt = keyword("return")
        .ignore_then(ws.ignore_then(testlist.clone()).or_not())
        .map(Stmt::Return);
    let raise_stmt = keyword("raise")
        .ignore_then(
            ws.ignore_then(test.clone())
                .then(
                    keyword("from")
                        .padded_by(ws)
                        .ignore_then(test.clone())
                        .or_not(),
                )
                .or_not(),
        )
        .map(|raised| match raised {
            None => Stmt::Raise {
                exc: None,
                cause: None,
            },
            Some((exc, cause)) => Stmt::Raise {
                exc: Some(exc),
                cause,
            },
        });
    let names = ident
        .padded_by(ws)
        .separated_by(just(','))
        .at_least(1)
        .collect::<Vec<_>>();
    let global_stmt = keyword("global")
        .ignore_then(names.clone())
        .map(Stmt::Global);
    let nonlocal_stmt = keyword("nonlocal").ignore_then(names).map(Stmt::Nonlocal);
    let del_stmt = keyword("del")
        .ignore_then(
            or_expr
                .clone()
                .padded_by(ws)
                .separated_by(just(','))
                .at_least(1)
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .map(Stmt::Delete);
    let assert_stmt = keyword("assert")
        .ignore_then(test.clone().padded_by(ws))
        .then(just(',').ignore_then(test.clone().padded_by(ws)).or_not())
        .map(|(test, msg)| Stmt::Assert { test, msg });

    let dotted = ident.then(just('.').then(ident).repeated()).to_slice();
    let dotted_as = dotted
        .then(keyword("as").padded_by(ws).ignore_then(ident).or_not())
        .map(|(name, asname)| Alias { name, asname });
    let import_stmt = keyword("import")
        .ignore_then(
            dotted_as
                .padded_by(ws)
                .separated_by(just(','))
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .map(Stmt::Import);
    let import_as = ident
        .then(keyword("as").padded_by(ws).ignore_then(ident).or_not())
        .map(|(name, asname)| Alias { name, asname });
    let import_list = import_as
        .padded_by(ws)
        .separated_by(just(','))
        .at_least(1)
        .allow_trailing()
        .collect::<Vec<_>>();
    let from_stmt = keyword("from")
        .ignore_then(ws.ignore_then(just('.').padded_by(ws).repeated().count()))
        .then(dotted.or_not())
        .then_ignore(keyword("import").padded_by(ws))
        .then(choice((
            just('*').to(ImportNames::Star),
            import_list
                .clone()
                .padded_by(ws)
                .delimited_by(just('('), just(')'))
                .map(ImportNames::List),
            import_list.map(ImportNames::List),
        )))
        .map(|((level, module), names)| Stmt::ImportFrom {
            module,
            names,
            level,
        });

    let small_stmt = choice((
        keyword("pass").to(Stmt::Pass),
        keyword("break").to(Stmt::Break),
        keyword("continue").to(Stmt::Continue),
        return_stmt,
        raise_stmt,
        global_stmt,
        nonlocal_stmt,
        del_stmt,
        assert_stmt,
        import_stmt,
        from_stmt,
        aug_assign,
        assign_or_expr,
    ))
    .map_with(move |stmt, x| {
        let s: SimpleSpan = x.span();
        (stmt, at.span(s))
    });
    let simple_stmts = small_stmt
        .padded_by(ws)
        .separated_by(just(';'))
        .at_least(1)
        .allow_trailing()
        .collect::<Vec<_>>()
        .boxed();

    let def_param = ident
        .then_ignore(just(':').padded_by(ws).ignore_then(test.clone()).or_not())
        .then(just('=').padded_by(ws).ignore_then(test.clone()).or_not());
    let with_item = test
        .clone()
        .then(
            keyword("as")
                .padded_by(ws)
                .ignore_then(target_item.clone())
                .or_not(),
        )
        .map(|(context, vars)| WithItem { context, vars });
    let header = choice((
        keyword("if")
            .ignore_then(test.clone().padded_by(ws))
            .map(Header::If),
        keyword("elif")
            .ignore_then(test.clone().padded_by(ws))
            .map(Header::Elif),
        keyword("else").to(Header::Else),
        keyword("while")
            .ignore_then(test.clone().padded_by(ws))
            .map(Header::While),
        keyword("for")
            .ignore_then(sequence(target_item, at).padded_by(ws))
            .then_ignore(keyword("in"))
            .then(testlist.padded_by(ws))
            .map(|(target, iter)| Header::For(target, iter)),
        keyword("try").to(Header::Try),
        keyword("except")
            .ignore_then(
                test.clone()
                    .padded_by(ws)
                    .then(keyword("as").ignore_then(ident.padded_by(ws)).or_not())
                    .or_not(),
            )
            .map(Header::Except),
        keyword("finally").to(Header::Finally),
        keyword("with")
            .ignore_then(
                with_item
                    .padded_by(ws)
                    .separated_by(just(','))
                    .at_least(1)
                    .collect::<Vec<_>>(),
            )
            .map(Header::With),
        keyword("def")
            .ignore_then(ident.padded_by(ws))
            .then(
                parameters(def_param)
                    .padded_by(ws)
                    .delimited_by(just('('), just(')')),
            )
            .then_ignore(just("->").padded_by(ws).ignore_then(test.clone()).or_not())
            .map(|(name, params)| Header::Def(name, params)),
        keyword("class")
            .ignore_then(ident.padded_by(ws))
            .then(args.or_not())
            .map(|(name, bases)| Header::Class(name, bases.unwrap_or_default())),
    ))
    .map_with(move |header, x| {
        let s: SimpleSpan = x.span();
        (header, at.span(s))
    });

    let compound = header
        .then_ignore(just(':').padded_by(ws))
        .then(simple_stmts.clone().or_not())
        .map(|((header, span), suite)| Line::Compound {
            header,
            span,
            suite,
        });
    let decorator = just('@')
        .ignore_then(test.padded_by(ws))
        .map(Line::Decorator);

    choice((decorator, compound, simple_stmts.map(Line::Simple)))
        .padded_by(ws)
        .then_ignore(end())
}

#[cfg(test)]
mod tests {
    use super::unescape;

    #[test]
    fn unescape_sequences() {
        assert_eq!(unescape(r"a\nb"), "a\nb");
        assert_eq!(unescape(r"\x41é"), "Aé");
        assert_eq!(unescape(r"\101"), "A");
        assert_eq!(unescape(r"\q"), "\\q");
        assert_eq!(unescape("a\\\nb"), "ab");
    }
}
