//! Canonical source text for expressions
//!
//! Mirrors the reference unparser: precedence decides parentheses, string
//! constants print as their repr, and every fragment is rendered on its own
//! at test precedence, so a bare tuple comes out parenthesized.

use super::ast::{
    Arg, BinOp, BoolOp, Comprehension, Constant, Expr, FStringPart, Param, ParamKind, UnaryOp,
};

/// Quotes an f-string may use, in order of preference
const ALL_QUOTES: [&str; 4] = ["'", "\"", "\"\"\"", "'''"];

/// Binding strength, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    NamedExpr,
    Tuple,
    Yield,
    Test,
    Or,
    And,
    Not,
    Cmp,
    Expr,
    BXor,
    BAnd,
    Shift,
    Arith,
    Term,
    Factor,
    Power,
    Await,
    Atom,
}

impl Prec {
    const ORDER: [Self; 18] = [
        Self::NamedExpr,
        Self::Tuple,
        Self::Yield,
        Self::Test,
        Self::Or,
        Self::And,
        Self::Not,
        Self::Cmp,
        Self::Expr,
        Self::BXor,
        Self::BAnd,
        Self::Shift,
        Self::Arith,
        Self::Term,
        Self::Factor,
        Self::Power,
        Self::Await,
        Self::Atom,
    ];

    /// One step tighter, saturating at `Atom`
    fn next(self) -> Self {
        let index = self as usize;
        Self::ORDER.get(index + 1).copied().unwrap_or(Self::Atom)
    }

    const fn of_binop(op: BinOp) -> Self {
        match op {
            BinOp::Add | BinOp::Sub => Self::Arith,
            BinOp::Mult | BinOp::MatMult | BinOp::Div | BinOp::FloorDiv | BinOp::Mod => {
                Self::Term
            }
            BinOp::Pow => Self::Power,
            BinOp::LShift | BinOp::RShift => Self::Shift,
            BinOp::BitOr => Self::Expr,
            BinOp::BitXor => Self::BXor,
            BinOp::BitAnd => Self::BAnd,
        }
    }
}

/// Render `expr` the way it would print as a standalone expression
#[must_use]
pub fn unparse(expr: &Expr) -> String {
    let mut out = Unparser::default();
    out.expr(expr, Prec::Test);
    out.buf
}

#[derive(Default)]
struct Unparser {
    buf: String,
    /// Inside an f-string field, where string literals pick quotes rather
    /// than escapes
    avoid_backslashes: bool,
}

impl Unparser {
    fn write(&mut self, s: &str) {
        self.buf.push_str(s);
    }

    fn open(&mut self, parens: bool) {
        if parens {
            self.buf.push('(');
        }
    }

    fn close(&mut self, parens: bool) {
        if parens {
            self.buf.push(')');
        }
    }

    fn comma_separated(&mut self, items: &[Expr], prec: Prec) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            self.expr(item, prec);
        }
    }

    /// Tuple elements; a single element keeps its trailing comma
    fn tuple_items(&mut self, items: &[Expr]) {
        if let [only] = items {
            self.expr(only, Prec::Test);
            self.write(",");
        } else {
            self.comma_separated(items, Prec::Test);
        }
    }

    fn expr(&mut self, expr: &Expr, ctx: Prec) {
        match expr {
            Expr::Name(name) => self.write(name),
            Expr::Constant(constant) => self.constant(constant),
            Expr::JoinedStr(parts) => self.joined_str(parts),
            Expr::Tuple(elts) => {
                let parens = elts.is_empty() || ctx > Prec::Tuple;
                self.open(parens);
                self.tuple_items(elts);
                self.close(parens);
            }
            Expr::List(elts) => {
                self.write("[");
                self.comma_separated(elts, Prec::Test);
                self.write("]");
            }
            Expr::Set(elts) => {
                self.write("{");
                self.comma_separated(elts, Prec::Test);
                self.write("}");
            }
            Expr::Dict(entries) => {
                self.write("{");
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    if let Some(key) = key {
                        self.expr(key, Prec::Test);
                        self.write(": ");
                        self.expr(value, Prec::Test);
                    } else {
                        self.write("**");
                        self.expr(value, Prec::Expr);
                    }
                }
                self.write("}");
            }
            Expr::BoolOp { op, values } => {
                let (word, mut prec) = match op {
                    BoolOp::And => (" and ", Prec::And),
                    BoolOp::Or => (" or ", Prec::Or),
                };
                let parens = ctx > prec;
                self.open(parens);
                // Each successive operand binds one level tighter
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.write(word);
                    }
                    prec = prec.next();
                    self.expr(value, prec);
                }
                self.close(parens);
            }
            Expr::NamedExpr { target, value } => {
                let parens = ctx > Prec::NamedExpr;
                self.open(parens);
                self.expr(target, Prec::Atom);
                self.write(" := ");
                self.expr(value, Prec::Atom);
                self.close(parens);
            }
            Expr::BinOp { left, op, right } => {
                let prec = Prec::of_binop(*op);
                let (left_prec, right_prec) = if *op == BinOp::Pow {
                    (prec.next(), prec)
                } else {
                    (prec, prec.next())
                };
                let parens = ctx > prec;
                self.open(parens);
                self.expr(left, left_prec);
                self.write(" ");
                self.write(op.symbol());
                self.write(" ");
                self.expr(right, right_prec);
                self.close(parens);
            }
            Expr::UnaryOp { op, operand } => {
                let (symbol, prec) = match op {
                    UnaryOp::Not => ("not ", Prec::Not),
                    UnaryOp::Invert => ("~", Prec::Factor),
                    UnaryOp::UAdd => ("+", Prec::Factor),
                    UnaryOp::USub => ("-", Prec::Factor),
                };
                let parens = ctx > prec;
                self.open(parens);
                self.write(symbol);
                self.expr(operand, prec);
                self.close(parens);
            }
            Expr::Lambda { params, body } => {
                let parens = ctx > Prec::Test;
                self.open(parens);
                self.write("lambda");
                if !params.is_empty() {
                    self.write(" ");
                    self.params(params);
                }
                self.write(": ");
                self.expr(body, Prec::Test);
                self.close(parens);
            }
            Expr::IfExp { test, body, orelse } => {
                let parens = ctx > Prec::Test;
                self.open(parens);
                self.expr(body, Prec::Test.next());
                self.write(" if ");
                self.expr(test, Prec::Test.next());
                self.write(" else ");
                self.expr(orelse, Prec::Test);
                self.close(parens);
            }
            Expr::Compare { left, comparisons } => {
                let parens = ctx > Prec::Cmp;
                self.open(parens);
                self.expr(left, Prec::Cmp.next());
                for (op, right) in comparisons {
                    self.write(" ");
                    self.write(op.symbol());
                    self.write(" ");
                    self.expr(right, Prec::Cmp.next());
                }
                self.close(parens);
            }
            Expr::Call { func, args } => {
                self.expr(func, Prec::Atom);
                self.write("(");
                // Positional and starred arguments print before keywords
                let (positional, keywords): (Vec<&Arg>, Vec<&Arg>) = args
                    .iter()
                    .partition(|arg| matches!(arg, Arg::Positional(_) | Arg::Starred(_)));
                for (i, arg) in positional.into_iter().chain(keywords).enumerate() {
                    if i > 0 {
                        self.write(", ");
                    }
                    self.arg(arg);
                }
                self.write(")");
            }
            Expr::Attribute { value, attr } => {
                self.expr(value, Prec::Atom);
                // `1 .real`, since `1.real` would lex as a float
                if matches!(**value, Expr::Constant(Constant::Int(_))) {
                    self.write(" ");
                }
                self.write(".");
                self.write(attr);
            }
            Expr::Subscript { value, slice } => {
                self.expr(value, Prec::Atom);
                self.write("[");
                match &**slice {
                    Expr::Tuple(elts) if !elts.is_empty() => self.tuple_items(elts),
                    other => self.expr(other, Prec::Test),
                }
                self.write("]");
            }
            Expr::Slice { lower, upper, step } => {
                if let Some(lower) = lower {
                    self.expr(lower, Prec::Test);
                }
                self.write(":");
                if let Some(upper) = upper {
                    self.expr(upper, Prec::Test);
                }
                if let Some(step) = step {
                    self.write(":");
                    self.expr(step, Prec::Test);
                }
            }
            Expr::Starred(value) => {
                self.write("*");
                self.expr(value, Prec::Expr);
            }
            Expr::Await(value) => {
                let parens = ctx > Prec::Await;
                self.open(parens);
                self.write("await ");
                self.expr(value, Prec::Atom);
                self.close(parens);
            }
            Expr::Yield(value) => {
                let parens = ctx > Prec::Yield;
                self.open(parens);
                self.write("yield");
                if let Some(value) = value {
                    self.write(" ");
                    self.expr(value, Prec::Test);
                }
                self.close(parens);
            }
            Expr::YieldFrom(value) => {
                let parens = ctx > Prec::Yield;
                self.open(parens);
                self.write("yield from ");
                self.expr(value, Prec::Test);
                self.close(parens);
            }
            Expr::ListComp { elt, generators } => {
                self.write("[");
                self.expr(elt, Prec::Test);
                self.generators(generators);
                self.write("]");
            }
            Expr::SetComp { elt, generators } => {
                self.write("{");
                self.expr(elt, Prec::Test);
                self.generators(generators);
                self.write("}");
            }
            Expr::DictComp {
                key,
                value,
                generators,
            } => {
                self.write("{");
                self.expr(key, Prec::Test);
                self.write(": ");
                self.expr(value, Prec::Test);
                self.generators(generators);
                self.write("}");
            }
            Expr::GeneratorExp { elt, generators } => {
                self.write("(");
                self.expr(elt, Prec::Test);
                self.generators(generators);
                self.write(")");
            }
        }
    }

    fn joined_str(&mut self, parts: &[FStringPart]) {
        self.write("f");
        let pieces: Vec<(String, bool)> = parts
            .iter()
            .map(|part| (fstring_piece(part), matches!(part, FStringPart::Literal(_))))
            .collect();

        if self.avoid_backslashes {
            let body: String = pieces.into_iter().map(|(text, _)| text).collect();
            self.quoted_avoiding_backslashes(&body);
            return;
        }

        // Each piece narrows the quotes that can still delimit the whole
        let mut quotes = ALL_QUOTES.to_vec();
        let mut body = String::new();
        for (text, is_literal) in pieces {
            let (escaped, narrowed) = literal_body(&text, &quotes, is_literal);
            body.push_str(&escaped);
            quotes = narrowed;
        }
        let quote = quotes.first().copied().unwrap_or("'");
        self.write(quote);
        self.write(&body);
        self.write(quote);
    }

    fn quoted_avoiding_backslashes(&mut self, text: &str) {
        let (body, quotes) = literal_body(text, &ALL_QUOTES, false);
        let quote = quotes.first().copied().unwrap_or("'");
        self.write(quote);
        self.write(&body);
        self.write(quote);
    }

    fn generators(&mut self, generators: &[Comprehension]) {
        for generator in generators {
            self.write(if generator.is_async {
                " async for "
            } else {
                " for "
            });
            self.expr(&generator.target, Prec::Tuple);
            self.write(" in ");
            self.expr(&generator.iter, Prec::Test.next());
            for condition in &generator.ifs {
                self.write(" if ");
                self.expr(condition, Prec::Test.next());
            }
        }
    }

    fn arg(&mut self, arg: &Arg) {
        match arg {
            Arg::Positional(value) => self.expr(value, Prec::Test),
            Arg::Starred(value) => {
                self.write("*");
                self.expr(value, Prec::Expr);
            }
            Arg::Keyword(name, value) => {
                self.write(name);
                self.write("=");
                self.expr(value, Prec::Test);
            }
            Arg::DoubleStarred(value) => {
                self.write("**");
                self.expr(value, Prec::Test);
            }
        }
    }

    fn params(&mut self, params: &[Param]) {
        for (i, param) in params.iter().enumerate() {
            if i > 0 {
                self.write(", ");
            }
            match param.kind {
                ParamKind::PositionalOnlyMarker => self.write("/"),
                ParamKind::KeywordOnlyMarker => self.write("*"),
                ParamKind::VarArgs => {
                    self.write("*");
                    self.write(&param.name);
                }
                ParamKind::KwArgs => {
                    self.write("**");
                    self.write(&param.name);
                }
                ParamKind::Normal => {
                    self.write(&param.name);
                    if let Some(default) = &param.default {
                        self.write("=");
                        self.expr(default, Prec::Test);
                    }
                }
            }
        }
    }

    fn constant(&mut self, constant: &Constant) {
        match constant {
            Constant::None => self.write("None"),
            Constant::Bool(true) => self.write("True"),
            Constant::Bool(false) => self.write("False"),
            Constant::Ellipsis => self.write("..."),
            Constant::Int(text) | Constant::Float(text) | Constant::Complex(text) => {
                self.write(text);
            }
            Constant::Str { value, unicode } => {
                if *unicode {
                    self.write("u");
                }
                if self.avoid_backslashes {
                    self.quoted_avoiding_backslashes(value);
                } else {
                    let repr = str_repr(value);
                    self.write(&repr);
                }
            }
            Constant::Bytes(value) => {
                let repr = bytes_repr(value);
                self.write(&repr);
            }
        }
    }
}

/// One f-string piece as it appears between the quotes, before escaping
fn fstring_piece(part: &FStringPart) -> String {
    match part {
        FStringPart::Literal(text) => text.replace('{', "{{").replace('}', "}}"),
        FStringPart::Field {
            value,
            conversion,
            format_spec,
        } => {
            let mut inner = Unparser {
                buf: String::new(),
                avoid_backslashes: true,
            };
            inner.expr(value, Prec::Test.next());

            let mut out = String::from("{");
            // `{ {` so the braces do not read as an escaped `{{`
            if inner.buf.starts_with('{') {
                out.push(' ');
            }
            out.push_str(&inner.buf);
            if let Some(conversion) = conversion {
                out.push('!');
                out.push(*conversion);
            }
            if let Some(spec) = format_spec {
                out.push(':');
                out.extend(spec.iter().map(fstring_piece));
            }
            out.push('}');
            out
        }
    }
}

/// Escape `text` for use between quotes and keep the `quotes` that can
/// still delimit it, best first.
///
/// Tabs and newlines stay literal unless `escape_whitespace` is set. When
/// no quote fits, the text falls back to its repr body.
fn literal_body(
    text: &str,
    quotes: &[&'static str],
    escape_whitespace: bool,
) -> (String, Vec<&'static str>) {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if !escape_whitespace && matches!(c, '\n' | '\t') {
            escaped.push(c);
        } else if c == '\\' || !is_printable(c) {
            push_escape(&mut escaped, c);
        } else {
            escaped.push(c);
        }
    }

    let mut possible = quotes.to_vec();
    if escaped.contains('\n') {
        possible.retain(|quote| quote.len() == 3);
    }
    possible.retain(|quote| !escaped.contains(*quote));

    if possible.is_empty() {
        let repr = str_repr(text);
        let first = if repr.starts_with('"') { "\"" } else { "'" };
        let quote = quotes
            .iter()
            .copied()
            .find(|quote| quote.starts_with(first))
            .unwrap_or(first);
        let body = repr[1..repr.len() - 1].to_string();
        return (body, vec![quote]);
    }

    if let Some(last) = escaped.chars().last() {
        // Prefer a quote that does not collide with the final character
        possible.sort_by_key(|quote| quote.starts_with(last));
        if possible.first().is_some_and(|quote| quote.starts_with(last)) {
            escaped.pop();
            escaped.push('\\');
            escaped.push(last);
        }
    }
    (escaped, possible)
}

fn is_printable(c: char) -> bool {
    c == ' ' || !(c.is_control() || c.is_whitespace())
}

/// Backslash escape for one character, as `unicode_escape` writes it
fn push_escape(out: &mut String, c: char) {
    match c {
        '\\' => out.push_str("\\\\"),
        '\n' => out.push_str("\\n"),
        '\r' => out.push_str("\\r"),
        '\t' => out.push_str("\\t"),
        c => {
            let code = u32::from(c);
            if code < 0x100 {
                out.push_str(&format!("\\x{code:02x}"));
            } else if code < 0x1_0000 {
                out.push_str(&format!("\\u{code:04x}"));
            } else {
                out.push_str(&format!("\\U{code:08x}"));
            }
        }
    }
}

/// Prefer single quotes unless the text contains one and no double quote
fn pick_quote(has_single: bool, has_double: bool) -> char {
    if has_single && !has_double { '"' } else { '\'' }
}

fn str_repr(value: &str) -> String {
    let quote = pick_quote(value.contains('\''), value.contains('"'));
    let mut out = String::with_capacity(value.len() + 2);
    out.push(quote);
    for c in value.chars() {
        match c {
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if c != '\\' && is_printable(c) => out.push(c),
            c => push_escape(&mut out, c),
        }
    }
    out.push(quote);
    out
}

fn bytes_repr(value: &[u8]) -> String {
    let quote = pick_quote(value.contains(&b'\''), value.contains(&b'"'));
    let mut out = String::with_capacity(value.len() + 3);
    out.push('b');
    out.push(quote);
    for &byte in value {
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b if char::from(b) == quote => {
                out.push('\\');
                out.push(quote);
            }
            0x20..=0x7e => out.push(char::from(byte)),
            _ => out.push_str(&format!("\\x{byte:02x}")),
        }
    }
    out.push(quote);
    out
}
