//! # Script parser
//!
//! A small expression grammar; whitespace and `//` comments are
//! insignificant:
//!
//! ```text
//! expr    := call | struct | list | string | integer | bool | null | ident
//! call    := path '(' [expr (',' expr)* [',']] ')'
//! struct  := ident '{' [ident ':' expr (',' ident ':' expr)* [',']] '}'
//! list    := '[' [expr (',' expr)* [',']] ']'
//! path    := ident ['.' ident]
//! string  := '"' (escape | char)* '"'
//! integer := ['-'] digit+
//! ```
//!
//! Marshaled expression trees are valid input.

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{
        alpha1, alphanumeric1, char, digit1, multispace1, none_of, not_line_ending,
    },
    combinator::{all_consuming, cut, map, map_res, opt, recognize, value},
    error::{context, VerboseError, VerboseErrorKind},
    multi::{fold_many0, many0, many0_count, separated_list0},
    sequence::{delimited, pair, preceded, separated_pair, terminated},
    IResult,
};

use crate::{Error, RuntimeResult};

pub type ParserResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

/// Syntax tree of one expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    String(String),
    Int(i64),
    Bool(bool),
    Null,
    Ident(String),
    List(Vec<Node>),
    Call {
        package: Option<String>,
        name: String,
        args: Vec<Node>,
    },
    Struct {
        name: String,
        fields: Vec<(String, Node)>,
    },
}

impl Node {
    pub fn call<S: Into<String>>(name: S, args: Vec<Node>) -> Self {
        Node::Call {
            package: None,
            name: name.into(),
            args,
        }
    }

    pub fn ident<S: Into<String>>(name: S) -> Self {
        Node::Ident(name.into())
    }

    pub fn string<S: Into<String>>(value: S) -> Self {
        Node::String(value.into())
    }
}

fn ws(input: &str) -> ParserResult<()> {
    value(
        (),
        many0_count(alt((
            value((), multispace1),
            value((), preceded(tag("//"), not_line_ending)),
        ))),
    )(input)
}

fn ident(input: &str) -> ParserResult<&str> {
    context(
        "identifier",
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0_count(alt((alphanumeric1, tag("_")))),
        )),
    )(input)
}

fn escape(input: &str) -> ParserResult<char> {
    preceded(
        char('\\'),
        cut(context(
            "escape sequence",
            alt((
                value('"', char('"')),
                value('\\', char('\\')),
                value('\n', char('n')),
                value('\t', char('t')),
                value('\r', char('r')),
            )),
        )),
    )(input)
}

#[tracing::instrument(level = "debug", skip(input))]
fn string_literal(input: &str) -> ParserResult<String> {
    context(
        "string literal",
        preceded(
            char('"'),
            cut(terminated(
                fold_many0(alt((escape, none_of("\"\\"))), String::new, |mut s, c| {
                    s.push(c);
                    s
                }),
                char('"'),
            )),
        ),
    )(input)
}

#[tracing::instrument(level = "debug", skip(input))]
fn integer_literal(input: &str) -> ParserResult<i64> {
    context(
        "integer literal",
        map_res(recognize(pair(opt(char('-')), digit1)), |s: &str| {
            s.parse::<i64>()
        }),
    )(input)
}

/// Comma separated items with an optional trailing comma.
fn items<'a, O, F>(item: F) -> impl FnMut(&'a str) -> ParserResult<'a, Vec<O>>
where
    F: FnMut(&'a str) -> ParserResult<'a, O>,
{
    terminated(
        separated_list0(char(','), item),
        opt(preceded(ws, char(','))),
    )
}

#[tracing::instrument(level = "debug", skip(input))]
fn list(input: &str) -> ParserResult<Node> {
    context(
        "list",
        map(
            preceded(
                char('['),
                cut(terminated(items(expr), preceded(ws, char(']')))),
            ),
            Node::List,
        ),
    )(input)
}

fn field(input: &str) -> ParserResult<(String, Node)> {
    context(
        "struct field",
        map(
            separated_pair(delimited(ws, ident, ws), char(':'), expr),
            |(name, node)| (name.to_string(), node),
        ),
    )(input)
}

/// Identifiers, keywords, calls and struct literals all start with a path.
#[tracing::instrument(level = "debug", skip(input))]
fn path_expr(input: &str) -> ParserResult<Node> {
    let (input, first) = ident(input)?;
    let (input, second) = opt(preceded(char('.'), ident))(input)?;
    let (rest, _) = ws(input)?;

    if rest.starts_with('(') {
        let (rest, args) = context(
            "call",
            preceded(
                char('('),
                cut(terminated(items(expr), preceded(ws, char(')')))),
            ),
        )(rest)?;
        let (package, name) = match second {
            Some(name) => (Some(first.to_string()), name.to_string()),
            None => (None, first.to_string()),
        };
        return Ok((rest, Node::Call { package, name, args }));
    }

    if second.is_none() && rest.starts_with('{') {
        let (rest, fields) = context(
            "struct literal",
            preceded(
                char('{'),
                cut(terminated(items(field), preceded(ws, char('}')))),
            ),
        )(rest)?;
        return Ok((
            rest,
            Node::Struct {
                name: first.to_string(),
                fields,
            },
        ));
    }

    let node = match (first, second) {
        ("true", None) => Node::Bool(true),
        ("false", None) => Node::Bool(false),
        ("null", None) => Node::Null,
        (first, Some(second)) => Node::Ident(format!("{}.{}", first, second)),
        (first, None) => Node::Ident(first.to_string()),
    };
    Ok((input, node))
}

#[tracing::instrument(level = "debug", skip(input))]
pub fn expr(input: &str) -> ParserResult<Node> {
    context(
        "expression",
        delimited(
            ws,
            alt((
                map(string_literal, Node::String),
                list,
                map(integer_literal, Node::Int),
                path_expr,
            )),
            ws,
        ),
    )(input)
}

fn to_error(source: &str, err: nom::Err<VerboseError<&str>>) -> Error {
    let err = match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => e,
        nom::Err::Incomplete(_) => {
            return Error::Parse {
                message: "incomplete input".to_string(),
                line: 1,
                column: 1,
            }
        }
    };
    let remaining = err.errors.first().map(|(rest, _)| *rest).unwrap_or(source);
    let offset = source.len() - remaining.len();
    let consumed = &source[..offset];
    let line = consumed.matches('\n').count() + 1;
    let column = consumed
        .rsplit('\n')
        .next()
        .map(|l| l.chars().count())
        .unwrap_or(0)
        + 1;
    let expected = err.errors.iter().find_map(|(_, kind)| match kind {
        VerboseErrorKind::Context(ctx) => Some(*ctx),
        _ => None,
    });
    let message = match (expected, remaining.chars().next()) {
        (Some(ctx), Some(c)) => format!("invalid {} near {:?}", ctx, c),
        (Some(ctx), None) => format!("unexpected end of input in {}", ctx),
        (None, Some(c)) => format!("unexpected {:?}", c),
        (None, None) => "unexpected end of input".to_string(),
    };
    Error::Parse {
        message,
        line,
        column,
    }
}

/// Parses a single expression.
pub fn parse(source: &str) -> RuntimeResult<Node> {
    all_consuming(expr)(source)
        .map(|(_, node)| node)
        .map_err(|e| to_error(source, e))
}

/// Parses a script: any number of top-level expressions.
pub fn parse_script(source: &str) -> RuntimeResult<Vec<Node>> {
    all_consuming(terminated(many0(expr), ws))(source)
        .map(|(_, nodes)| nodes)
        .map_err(|e| to_error(source, e))
}
