//! Declaration file syntax, parsed with chumsky.
//!
//! The grammar produces a flat list of comment and declaration items. Doc
//! comments are attached afterwards by line number, so only syntax is checked
//! here. Whether a declaration is documented and whether its values are
//! supported is decided by the caller, after the whole file has parsed.

use super::Literal;
use chumsky::extra;
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

/// Extra type for parsers - uses Rich errors for line/column reporting
pub(crate) type Extra<'src> = extra::Err<Rich<'src, char>>;

/// Reserved words that cannot be declared.
const KEYWORDS: &[&str] = &[
    "break",
    "case",
    "chan",
    "const",
    "continue",
    "default",
    "defer",
    "else",
    "fallthrough",
    "for",
    "func",
    "go",
    "goto",
    "if",
    "import",
    "interface",
    "map",
    "package",
    "range",
    "return",
    "select",
    "struct",
    "switch",
    "type",
    "var",
];

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Literal),
    Ident(String),
    /// Syntactically fine but not a plain literal or name.
    Unsupported,
}

/// One declaration line with its doc comment resolved.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DeclLine {
    pub names: Vec<String>,
    pub type_tag: Option<String>,
    pub values: Vec<Expr>,
    pub doc: Option<String>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SyntaxError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

// ============================================================================
// Intermediate types (before doc attachment)
// ============================================================================

#[derive(Debug, Clone)]
enum Item {
    Comment { text: String, span: SimpleSpan },
    Decl(RawDecl),
    Blank,
}

#[derive(Debug, Clone)]
struct RawDecl {
    names: Vec<(String, SimpleSpan)>,
    type_tag: Option<String>,
    values: Vec<Expr>,
    span: SimpleSpan,
}

struct CommentGroup {
    lines: Vec<String>,
    end_line: usize,
}

// ============================================================================
// Primitive parsers
// ============================================================================

/// Spaces and tabs; newlines are significant.
fn ws<'src>() -> impl Parser<'src, &'src str, (), Extra<'src>> + Clone {
    one_of(" \t\r").repeated().ignored()
}

/// Parser for identifiers: a letter or underscore, then letters, digits and
/// underscores
pub(crate) fn ident<'src>() -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    any()
        .filter(|c: &char| c.is_alphabetic() || *c == '_')
        .then(
            any()
                .filter(|c: &char| c.is_alphanumeric() || *c == '_')
                .repeated(),
        )
        .to_slice()
        .map(|s: &str| s.to_string())
        .labelled("identifier")
}

/// `//` to end of line, or `/* ... */`. Yields the trimmed text.
fn comment<'src>() -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    let line = just("//").ignore_then(none_of("\n").repeated().to_slice());
    let block = just("/*")
        .ignore_then(any().and_is(just("*/").not()).repeated().to_slice())
        .then_ignore(just("*/").labelled("end of comment"));
    line.or(block)
        .map(|text: &str| text.trim().to_string())
        .labelled("comment")
}

/// Numeric literal, including hex/octal/binary integers and imaginary
/// numbers. The text is scanned loosely and validated as a whole.
pub(crate) fn number<'src>() -> impl Parser<'src, &'src str, Literal, Extra<'src>> + Clone {
    let digit = any().filter(char::is_ascii_digit);
    let start = choice((
        digit.clone().ignored(),
        just('.').then(digit.rewind()).ignored(),
    ));
    let exponent = one_of("eEpP").then(one_of("+-").or_not()).ignored();
    let body = any()
        .filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_' || *c == '.')
        .ignored();

    start
        .then(choice((exponent, body)).repeated())
        .to_slice()
        .try_map(|text: &str, span| parse_number(text).map_err(|msg| Rich::custom(span, msg)))
        .labelled("number")
}

fn hex_escape<'src>(
    prefix: char,
    len: usize,
) -> impl Parser<'src, &'src str, char, Extra<'src>> + Clone {
    just(prefix)
        .ignore_then(
            any()
                .filter(|c: &char| c.is_ascii_hexdigit())
                .repeated()
                .exactly(len)
                .to_slice(),
        )
        .try_map(|digits: &str, span| code_point(digits, 16, span))
}

/// Backslash escape inside a string or rune delimited by `quote`.
fn escape<'src>(quote: char) -> impl Parser<'src, &'src str, char, Extra<'src>> + Clone {
    let simple = one_of("abfnrtv\\")
        .map(|c| match c {
            'a' => '\u{07}',
            'b' => '\u{08}',
            'f' => '\u{0c}',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'v' => '\u{0b}',
            other => other,
        })
        .or(just(quote));
    let octal = any()
        .filter(|c: &char| ('0'..='7').contains(c))
        .repeated()
        .exactly(3)
        .to_slice()
        .try_map(|digits: &str, span| code_point(digits, 8, span));

    just('\\')
        .ignore_then(choice((
            simple,
            hex_escape('x', 2),
            hex_escape('u', 4),
            hex_escape('U', 8),
            octal,
        )))
        .labelled("escape sequence")
}

fn code_point<'src>(digits: &str, radix: u32, span: SimpleSpan) -> Result<char, Rich<'src, char>> {
    u32::from_str_radix(digits, radix)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| Rich::custom(span, "escape sequence is not a valid character"))
}

/// Parser for string literals: "interpreted" or `raw`
pub(crate) fn string_literal<'src>() -> impl Parser<'src, &'src str, String, Extra<'src>> + Clone {
    let interpreted = escape('"')
        .or(none_of("\"\\\n"))
        .repeated()
        .collect::<String>()
        .delimited_by(just('"'), just('"').labelled("closing quote"));
    // Carriage returns are dropped from raw strings.
    let raw = none_of("`")
        .repeated()
        .to_slice()
        .delimited_by(just('`'), just('`').labelled("closing backquote"))
        .map(|s: &str| s.replace('\r', ""));
    interpreted.or(raw).labelled("string literal")
}

/// Parser for rune literals: 'a', '\n'
pub(crate) fn rune<'src>() -> impl Parser<'src, &'src str, char, Extra<'src>> + Clone {
    escape('\'')
        .or(none_of("'\\\n"))
        .delimited_by(just('\''), just('\'').labelled("closing quote"))
        .labelled("rune literal")
}

pub(crate) fn literal<'src>() -> impl Parser<'src, &'src str, Literal, Extra<'src>> + Clone {
    choice((
        number(),
        string_literal().map(Literal::Str),
        rune().map(Literal::Rune),
    ))
}

// ============================================================================
// Expressions
// ============================================================================

/// Any expression the file could hold. Only a literal, a signed numeric
/// literal or a bare name is classified as supported; calls, selectors,
/// parenthesised and composite expressions and operations are recognised
/// so they can be reported by name.
pub(crate) fn expr<'src>() -> impl Parser<'src, &'src str, Expr, Extra<'src>> + Clone {
    recursive(|expr| {
        let inner = expr.clone().padded();
        let element = inner
            .clone()
            .then(just(':').ignore_then(inner.clone()).or_not())
            .ignored();
        let elements = element
            .separated_by(just(','))
            .allow_trailing()
            .collect::<Vec<_>>()
            .padded();
        let args = elements.clone().delimited_by(just('('), just(')'));
        let index = inner.clone().or_not().delimited_by(just('['), just(']'));
        let body = elements.delimited_by(just('{'), just('}'));

        let operand = choice((
            literal().map(Expr::Literal),
            ident().map(Expr::Ident),
            inner.delimited_by(just('('), just(')')).to(Expr::Unsupported),
            // []T{...}
            index
                .clone()
                .then(ident())
                .then(body.clone())
                .to(Expr::Unsupported),
        ));
        let suffix = choice((
            just('.').ignore_then(ident()).ignored(),
            args.ignored(),
            index.ignored(),
            body.ignored(),
        ));
        let primary = operand
            .then(suffix.repeated().collect::<Vec<_>>())
            .map(|(expr, suffixes)| {
                if suffixes.is_empty() {
                    expr
                } else {
                    Expr::Unsupported
                }
            });

        let unary = one_of("-+!^&*")
            .then_ignore(ws())
            .repeated()
            .collect::<Vec<char>>()
            .then(primary)
            .map(|(ops, expr)| match (ops.as_slice(), expr) {
                ([], expr) => expr,
                (['-'], Expr::Literal(lit)) => negate(lit),
                _ => Expr::Unsupported,
            });

        let operator = choice((
            just("&&").ignored(),
            just("||").ignored(),
            just("==").ignored(),
            just("!=").ignored(),
            just("<=").ignored(),
            just(">=").ignored(),
            just("<<").ignored(),
            just(">>").ignored(),
            just("&^").ignored(),
            one_of("+-*/%&|^<>").ignored(),
        ))
        .labelled("operator");
        // `/` must not start a trailing comment.
        let comment_start = choice((just("//"), just("/*")));

        unary
            .clone()
            .then(
                ws()
                    .ignore_then(comment_start.not())
                    .ignore_then(operator)
                    .then_ignore(ws())
                    .ignore_then(unary)
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(first, rest)| {
                if rest.is_empty() {
                    first
                } else {
                    Expr::Unsupported
                }
            })
    })
}

fn negate(lit: Literal) -> Expr {
    match lit {
        Literal::Int(n) => Expr::Literal(Literal::Int(-n)),
        Literal::Float(f) => Expr::Literal(Literal::Float(-f)),
        Literal::Imag(f) => Expr::Literal(Literal::Imag(-f)),
        Literal::Rune(_) | Literal::Str(_) => Expr::Unsupported,
    }
}

// ============================================================================
// Declarations
// ============================================================================

/// Parser for one declaration: `name[, name...] [type] = expr[, expr...]`
fn declaration<'src>() -> impl Parser<'src, &'src str, RawDecl, Extra<'src>> + Clone {
    let names = ident()
        .map_with(|name, e| (name, e.span()))
        .separated_by(just(',').padded_by(ws()))
        .at_least(1)
        .collect::<Vec<_>>();
    let type_tag = ws().ignore_then(ident()).or_not();
    let values = expr()
        .separated_by(just(',').padded_by(ws()))
        .at_least(1)
        .collect::<Vec<_>>();
    // A declaration runs to the end of its line; only a comment may follow.
    let line_end = choice((
        just("//").ignored(),
        just("/*").ignored(),
        just('\n').ignored(),
        end(),
    ))
    .rewind();

    names
        .then(type_tag)
        .then_ignore(just('=').padded_by(ws()).labelled("'='"))
        .then(values)
        .then_ignore(ws())
        .then_ignore(line_end)
        .map_with(|((names, type_tag), values), e| RawDecl {
            names,
            type_tag,
            values,
            span: e.span(),
        })
        .labelled("declaration")
}

fn items<'src>() -> impl Parser<'src, &'src str, Vec<Item>, Extra<'src>> {
    choice((
        comment().map_with(|text, e| Item::Comment {
            text,
            span: e.span(),
        }),
        declaration().map(Item::Decl),
        just('\n').to(Item::Blank),
    ))
    .padded_by(ws())
    .repeated()
    .collect::<Vec<_>>()
    .then_ignore(ws())
    .then_ignore(end())
}

// ============================================================================
// File parsing
// ============================================================================

/// Byte offsets of line starts, for turning spans into line/column.
struct LineIndex<'a> {
    src: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(src: &'a str) -> Self {
        let starts = std::iter::once(0)
            .chain(src.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { src, starts }
    }

    /// One-based line and column (in characters) of a byte offset.
    fn position(&self, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.src.len());
        let line = self.starts.partition_point(|&start| start <= offset);
        let start = self.starts[line - 1];
        let column = self.src[start..offset].chars().count() + 1;
        (line, column)
    }

    fn line(&self, offset: usize) -> usize {
        self.position(offset).0
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> SyntaxError {
        let (line, column) = self.position(offset);
        SyntaxError {
            line,
            column,
            message: message.into(),
        }
    }
}

/// Parse a whole file. A comment group ending on the line right above a
/// declaration becomes its doc; comments after a declaration on the same line
/// are ignored.
pub(crate) fn parse(src: &str) -> Result<Vec<DeclLine>, SyntaxError> {
    let index = LineIndex::new(src);
    let items = items().parse(src).into_result().map_err(|errs| {
        match errs.first() {
            Some(e) => index.error(e.span().start, describe(e)),
            None => index.error(0, "invalid declaration file"),
        }
    })?;

    let mut lines = Vec::new();
    let mut group: Option<CommentGroup> = None;
    let mut last_decl_line = 0;
    for item in items {
        match item {
            Item::Blank => {}
            Item::Comment { text, span } => {
                let line = index.line(span.start);
                if line == last_decl_line {
                    continue;
                }
                let end_line = index.line(span.end);
                match group.as_mut() {
                    Some(g) if line <= g.end_line + 1 => {
                        g.lines.push(text);
                        g.end_line = end_line;
                    }
                    _ => {
                        group = Some(CommentGroup {
                            lines: vec![text],
                            end_line,
                        })
                    }
                }
            }
            Item::Decl(decl) => {
                let line = index.line(decl.span.start);
                last_decl_line = index.line(decl.span.end);
                let doc = group
                    .take()
                    .filter(|g| g.end_line + 1 == line)
                    .map(|g| g.lines.join("\n"));
                lines.push(check(&index, decl, doc, line)?);
            }
        }
    }
    Ok(lines)
}

fn check(
    index: &LineIndex<'_>,
    decl: RawDecl,
    doc: Option<String>,
    line: usize,
) -> Result<DeclLine, SyntaxError> {
    for (name, span) in &decl.names {
        if KEYWORDS.contains(&name.as_str()) {
            return Err(index.error(span.start, format!("unexpected keyword {}", name)));
        }
    }
    if decl.names.len() != decl.values.len() {
        return Err(index.error(
            decl.span.start,
            format!(
                "{} names but {} values",
                decl.names.len(),
                decl.values.len()
            ),
        ));
    }
    Ok(DeclLine {
        names: decl.names.into_iter().map(|(name, _)| name).collect(),
        type_tag: decl.type_tag,
        values: decl.values,
        doc,
        line,
    })
}

fn describe(e: &Rich<'_, char>) -> String {
    let found = e
        .found()
        .map_or("end of input".to_string(), |c| format!("{:?}", c));
    format!("{} (found {})", e.reason(), found)
}

fn parse_number(text: &str) -> Result<Literal, String> {
    let invalid = || format!("invalid number literal {:?}", text);
    let clean: String = text.chars().filter(|c| *c != '_').collect();

    if let Some(body) = clean.strip_suffix('i') {
        return parse_number(body).and_then(|lit| match lit {
            Literal::Int(n) => Ok(Literal::Imag(n as f64)),
            Literal::Float(f) => Ok(Literal::Imag(f)),
            _ => Err(invalid()),
        });
    }

    let lower = clean.to_ascii_lowercase();
    let radix_body = [("0x", 16), ("0b", 2), ("0o", 8)]
        .iter()
        .find_map(|(prefix, radix)| lower.strip_prefix(prefix).map(|body| (body, *radix)));
    if let Some((body, radix)) = radix_body {
        if radix == 16 && (body.contains('.') || body.contains('p')) {
            return Err(format!("hexadecimal floats are not supported: {:?}", text));
        }
        return i128::from_str_radix(body, radix)
            .map(Literal::Int)
            .map_err(|_| invalid());
    }

    if lower.contains(['.', 'e']) {
        return lower.parse::<f64>().map(Literal::Float).map_err(|_| invalid());
    }
    if lower.len() > 1 && lower.starts_with('0') {
        return i128::from_str_radix(&lower[1..], 8)
            .map(Literal::Int)
            .map_err(|_| invalid());
    }
    lower.parse::<i128>().map(Literal::Int).map_err(|_| invalid())
}
