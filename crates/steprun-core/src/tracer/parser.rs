//! Recursive-descent parser over the token stream
//!
//! Follows the Python 3 grammar closely enough that any program the
//! reference parser accepts yields the same statement structure, and
//! obviously broken input is rejected.

use super::ParseError;
use super::ast::{
    Alias, Arg, BinOp, BoolOp, CmpOp, Comprehension, Constant, ExceptHandler, Expr, FStringPart,
    MatchCase, Param, ParamKind, Pattern, Stmt, StmtKind, UnaryOp, WithItem,
};
use super::fstring::{self, Piece};
use super::lexer::{StrToken, Token, TokenKind, tokenize, unescape};

type ParseResult<T> = Result<T, ParseError>;

const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue",
    "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if", "import",
    "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try", "while",
    "with", "yield",
];

const AUGMENTED: &[&str] = &[
    "+=", "-=", "*=", "/=", "//=", "%=", "**=", "@=", "&=", "|=", "^=", "<<=", ">>=",
];

/// Nested expressions, operator chains, patterns and `elif`s allowed at once.
///
/// Every level is a frame while parsing and a tree level for whatever walks
/// the result afterwards.
const MAX_NESTING: usize = 1000;

/// Parse a whole module into its top-level statements
pub fn parse_module(source: &str) -> ParseResult<Vec<Stmt>> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    parser.module()
}

fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    // ---- token helpers ----

    fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek_nth(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek().kind, TokenKind::Op(o) if o == op)
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Name(n) if n == keyword)
    }

    fn nth_is_keyword(&self, n: usize, keyword: &str) -> bool {
        matches!(&self.peek_nth(n).kind, TokenKind::Name(name) if name == keyword)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        let found = self.at_op(op);
        if found {
            self.pos += 1;
        }
        found
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let found = self.at_keyword(keyword);
        if found {
            self.pos += 1;
        }
        found
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        let token = self.peek();
        ParseError::new(message, token.line, token.column)
    }

    /// Count one more level of nesting
    fn descend(&mut self) -> ParseResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(self.error_here("source too complex to parse"));
        }
        self.depth += 1;
        Ok(())
    }

    /// Run `parse` one level deeper
    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        self.descend()?;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn expect_op(&mut self, op: &str) -> ParseResult<Token> {
        if self.at_op(op) {
            Ok(self.advance())
        } else {
            Err(self.error_here(format!("expected '{op}'")))
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> ParseResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error_here(format!("expected '{keyword}'")))
        }
    }

    fn expect_newline(&mut self) -> ParseResult<()> {
        if matches!(self.peek().kind, TokenKind::Newline) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error_here("invalid syntax"))
        }
    }

    fn expect_name(&mut self) -> ParseResult<String> {
        match &self.peek().kind {
            TokenKind::Name(name) if !is_keyword(name) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error_here("invalid syntax")),
        }
    }

    /// Whether the current token can begin an expression
    fn starts_expression(&self) -> bool {
        match &self.peek().kind {
            TokenKind::Name(name) => {
                !is_keyword(name)
                    || matches!(
                        name.as_str(),
                        "not" | "lambda" | "await" | "None" | "True" | "False"
                    )
            }
            TokenKind::Number(_) | TokenKind::Str(_) => true,
            TokenKind::Op(op) => matches!(*op, "(" | "[" | "{" | "-" | "+" | "~" | "*" | "..."),
            TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent | TokenKind::EndMarker => {
                false
            }
        }
    }

    fn at_comprehension(&self) -> bool {
        self.at_keyword("for") || (self.at_keyword("async") && self.nth_is_keyword(1, "for"))
    }

    // ---- statements ----

    fn module(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut body = Vec::new();
        loop {
            match self.peek().kind {
                TokenKind::EndMarker => return Ok(body),
                TokenKind::Newline => self.pos += 1,
                TokenKind::Indent => return Err(self.error_here("unexpected indent")),
                TokenKind::Dedent => return Err(self.error_here("unexpected unindent")),
                _ => body.extend(self.statement()?),
            }
        }
    }

    fn statement(&mut self) -> ParseResult<Vec<Stmt>> {
        let keyword = match &self.peek().kind {
            TokenKind::Name(name) => Some(name.clone()),
            TokenKind::Op("@") => Some("@".to_string()),
            _ => None,
        };
        let stmt = match keyword.as_deref() {
            Some("if") => self.if_statement()?,
            Some("while") => self.while_statement()?,
            Some("for") => self.for_statement(false)?,
            Some("try") => self.try_statement()?,
            Some("with") => self.with_statement(false)?,
            Some("def") => self.function_def(Vec::new(), false)?,
            Some("class") => self.class_def(Vec::new())?,
            Some("@") => self.decorated()?,
            Some("async") => self.async_statement()?,
            Some("match") => match self.match_statement()? {
                Some(stmt) => stmt,
                None => return self.simple_statements(),
            },
            _ => return self.simple_statements(),
        };
        Ok(vec![stmt])
    }

    fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect_op(":")?;
        if !matches!(self.peek().kind, TokenKind::Newline) {
            return self.simple_statements();
        }
        self.pos += 1;
        if !matches!(self.peek().kind, TokenKind::Indent) {
            return Err(self.error_here("expected an indented block"));
        }
        self.pos += 1;

        let mut body = Vec::new();
        loop {
            match self.peek().kind {
                TokenKind::Dedent => {
                    self.pos += 1;
                    return Ok(body);
                }
                TokenKind::EndMarker => return Ok(body),
                TokenKind::Indent => return Err(self.error_here("unexpected indent")),
                _ => body.extend(self.statement()?),
            }
        }
    }

    fn if_statement(&mut self) -> ParseResult<Stmt> {
        // Entered on `if` or `elif`
        let line = self.advance().line;
        let test = self.named_expression()?;
        let body = self.block()?;
        let orelse = if self.at_keyword("elif") {
            vec![self.nested(Self::if_statement)?]
        } else if self.eat_keyword("else") {
            self.block()?
        } else {
            Vec::new()
        };
        Ok(Stmt {
            line,
            kind: StmtKind::If { test, body, orelse },
        })
    }

    fn else_block(&mut self) -> ParseResult<Vec<Stmt>> {
        if self.eat_keyword("else") {
            self.block()
        } else {
            Ok(Vec::new())
        }
    }

    fn while_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.advance().line;
        let test = self.named_expression()?;
        let body = self.block()?;
        let orelse = self.else_block()?;
        Ok(Stmt {
            line,
            kind: StmtKind::While { test, body, orelse },
        })
    }

    fn for_statement(&mut self, is_async: bool) -> ParseResult<Stmt> {
        let line = self.advance().line;
        let target = self.target_list()?;
        validate_target(&target, self.peek())?;
        self.expect_keyword("in")?;
        let iter = self.star_expressions()?;
        let body = self.block()?;
        let orelse = self.else_block()?;
        Ok(Stmt {
            line,
            kind: StmtKind::For {
                is_async,
                target,
                iter,
                body,
                orelse,
            },
        })
    }

    fn try_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.advance().line;
        let body = self.block()?;

        let mut handlers = Vec::new();
        while self.at_keyword("except") {
            let handler_line = self.advance().line;
            let kind = if self.at_op(":") {
                None
            } else {
                Some(self.expression()?)
            };
            let name = if self.eat_keyword("as") {
                Some(self.expect_name()?)
            } else {
                None
            };
            let handler_body = self.block()?;
            handlers.push(ExceptHandler {
                line: handler_line,
                kind,
                name,
                body: handler_body,
            });
        }

        let orelse = if handlers.is_empty() {
            Vec::new()
        } else {
            self.else_block()?
        };
        let finalbody = if self.eat_keyword("finally") {
            self.block()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error_here("expected 'except' or 'finally' block"));
        }

        Ok(Stmt {
            line,
            kind: StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            },
        })
    }

    fn with_statement(&mut self, is_async: bool) -> ParseResult<Stmt> {
        let line = self.advance().line;
        let items = match self.parenthesized_with_items() {
            Some(items) => items,
            None => {
                let mut items = vec![self.with_item()?];
                while self.eat_op(",") {
                    items.push(self.with_item()?);
                }
                items
            }
        };
        let body = self.block()?;
        Ok(Stmt {
            line,
            kind: StmtKind::With {
                is_async,
                items,
                body,
            },
        })
    }

    /// `with (a as b, c):`; `None` (consuming nothing) when the parentheses
    /// turn out to belong to the first context expression
    fn parenthesized_with_items(&mut self) -> Option<Vec<WithItem>> {
        if !self.at_op("(") {
            return None;
        }
        let (start, depth) = (self.pos, self.depth);
        self.pos += 1;
        let mut items = Vec::new();
        while !self.at_op(")") {
            match self.with_item() {
                Ok(item) => items.push(item),
                Err(_) => break,
            }
            if !self.eat_op(",") {
                break;
            }
        }
        if !items.is_empty() && self.eat_op(")") && self.at_op(":") {
            return Some(items);
        }
        self.pos = start;
        self.depth = depth;
        None
    }

    fn with_item(&mut self) -> ParseResult<WithItem> {
        let context = self.expression()?;
        let vars = if self.eat_keyword("as") {
            let target = self.star_target()?;
            validate_target(&target, self.peek())?;
            Some(target)
        } else {
            None
        };
        Ok(WithItem { context, vars })
    }

    /// `match` is a soft keyword: `None` (consuming nothing) unless the line
    /// opens a block of `case`s
    fn match_statement(&mut self) -> ParseResult<Option<Stmt>> {
        let (start, depth) = (self.pos, self.depth);
        let line = self.advance().line;
        let opens_cases = |parser: &Self| {
            parser.at_op(":")
                && matches!(parser.peek_nth(1).kind, TokenKind::Newline)
                && matches!(parser.peek_nth(2).kind, TokenKind::Indent)
                && parser.nth_is_keyword(3, "case")
        };
        let subject = match self.match_subject() {
            Ok(subject) if opens_cases(self) => subject,
            _ => {
                self.pos = start;
                self.depth = depth;
                return Ok(None);
            }
        };
        self.pos += 3;

        let mut cases = Vec::new();
        while self.at_keyword("case") {
            self.pos += 1;
            let pattern = self.patterns()?;
            let guard = if self.eat_keyword("if") {
                Some(self.named_expression()?)
            } else {
                None
            };
            let body = self.block()?;
            cases.push(MatchCase {
                pattern,
                guard,
                body,
            });
        }
        match self.peek().kind {
            TokenKind::Dedent => self.pos += 1,
            TokenKind::EndMarker => {}
            _ => return Err(self.error_here("expected 'case' block")),
        }
        Ok(Some(Stmt {
            line,
            kind: StmtKind::Match { subject, cases },
        }))
    }

    fn match_subject(&mut self) -> ParseResult<Expr> {
        let first = self.star_named_expression()?;
        if !self.at_op(",") {
            if matches!(first, Expr::Starred(_)) {
                return Err(self.error_here("invalid syntax"));
            }
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(",") {
            if self.at_op(":") {
                break;
            }
            elts.push(self.star_named_expression()?);
        }
        Ok(Expr::Tuple(elts))
    }

    // ---- patterns ----

    /// Top-level case pattern; a bare comma list is a sequence
    fn patterns(&mut self) -> ParseResult<Pattern> {
        let first = self.maybe_star_pattern()?;
        if !self.at_op(",") {
            if matches!(first, Pattern::Star(_)) {
                return Err(self.error_here("invalid syntax"));
            }
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_op(",") {
            if self.at_op(":") || self.at_keyword("if") {
                break;
            }
            items.push(self.maybe_star_pattern()?);
        }
        Ok(Pattern::Sequence(items))
    }

    fn maybe_star_pattern(&mut self) -> ParseResult<Pattern> {
        if !self.eat_op("*") {
            return self.pattern();
        }
        let name = self.expect_name()?;
        Ok(Pattern::Star((name != "_").then_some(name)))
    }

    fn pattern(&mut self) -> ParseResult<Pattern> {
        let pattern = self.or_pattern()?;
        if !self.eat_keyword("as") {
            return Ok(pattern);
        }
        let name = self.expect_name()?;
        if name == "_" {
            return Err(self.error_here("cannot use '_' as a target"));
        }
        Ok(Pattern::As {
            pattern: Some(Box::new(pattern)),
            name: Some(name),
        })
    }

    fn or_pattern(&mut self) -> ParseResult<Pattern> {
        let first = self.nested(Self::closed_pattern)?;
        if !self.at_op("|") {
            return Ok(first);
        }
        let mut alternatives = vec![first];
        while self.eat_op("|") {
            alternatives.push(self.nested(Self::closed_pattern)?);
        }
        Ok(Pattern::Or(alternatives))
    }

    fn closed_pattern(&mut self) -> ParseResult<Pattern> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Name(name) => match name.as_str() {
                "None" => {
                    self.pos += 1;
                    Ok(Pattern::Singleton(Constant::None))
                }
                "True" | "False" => {
                    self.pos += 1;
                    Ok(Pattern::Singleton(Constant::Bool(name == "True")))
                }
                _ if is_keyword(&name) => Err(self.error_here("invalid syntax")),
                _ => {
                    let target = self.name_or_attribute()?;
                    if self.eat_op("(") {
                        return self.class_pattern(target);
                    }
                    Ok(match target {
                        Expr::Name(name) if name == "_" => Pattern::As {
                            pattern: None,
                            name: None,
                        },
                        Expr::Name(name) => Pattern::As {
                            pattern: None,
                            name: Some(name),
                        },
                        attribute => Pattern::Value(attribute),
                    })
                }
            },
            TokenKind::Number(_) | TokenKind::Op("-") => Ok(Pattern::Value(self.number_pattern()?)),
            TokenKind::Str(_) => Ok(Pattern::Value(self.literal_string_pattern()?)),
            TokenKind::Op("(") => {
                self.pos += 1;
                if self.eat_op(")") {
                    return Ok(Pattern::Sequence(Vec::new()));
                }
                let first = self.maybe_star_pattern()?;
                if !self.at_op(",") {
                    if matches!(first, Pattern::Star(_)) {
                        return Err(self.error_here("invalid syntax"));
                    }
                    self.expect_op(")")?;
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat_op(",") {
                    if self.at_op(")") {
                        break;
                    }
                    items.push(self.maybe_star_pattern()?);
                }
                self.expect_op(")")?;
                Ok(Pattern::Sequence(items))
            }
            TokenKind::Op("[") => {
                self.pos += 1;
                let mut items = Vec::new();
                while !self.at_op("]") {
                    items.push(self.maybe_star_pattern()?);
                    if !self.eat_op(",") {
                        break;
                    }
                }
                self.expect_op("]")?;
                Ok(Pattern::Sequence(items))
            }
            TokenKind::Op("{") => {
                self.pos += 1;
                self.mapping_pattern()
            }
            _ => Err(self.error_here("invalid syntax")),
        }
    }

    fn name_or_attribute(&mut self) -> ParseResult<Expr> {
        let mut expr = Expr::Name(self.expect_name()?);
        while self.eat_op(".") {
            expr = Expr::Attribute {
                value: Box::new(expr),
                attr: self.expect_name()?,
            };
        }
        Ok(expr)
    }

    /// `-1`, `2.5`, `1 + 2j`
    fn number_pattern(&mut self) -> ParseResult<Expr> {
        let negative = self.eat_op("-");
        let TokenKind::Number(text) = &self.peek().kind else {
            return Err(self.error_here("invalid syntax"));
        };
        let mut value = Expr::Constant(number_constant(text));
        self.pos += 1;
        if negative {
            value = Expr::UnaryOp {
                op: UnaryOp::USub,
                operand: Box::new(value),
            };
        }

        let op = if self.at_op("+") {
            BinOp::Add
        } else if self.at_op("-") {
            BinOp::Sub
        } else {
            return Ok(value);
        };
        self.pos += 1;
        let imaginary = match &self.peek().kind {
            TokenKind::Number(text) => number_constant(text),
            _ => return Err(self.error_here("invalid syntax")),
        };
        if !matches!(imaginary, Constant::Complex(_)) {
            return Err(self.error_here("imaginary number required in complex literal"));
        }
        self.pos += 1;
        Ok(Expr::BinOp {
            left: Box::new(value),
            op,
            right: Box::new(Expr::Constant(imaginary)),
        })
    }

    fn literal_string_pattern(&mut self) -> ParseResult<Expr> {
        let value = self.strings()?;
        if matches!(value, Expr::JoinedStr(_)) {
            return Err(self.error_here("patterns may only match literals and attribute lookups"));
        }
        Ok(value)
    }

    /// Mapping pattern contents after `{`, consuming the closing `}`
    fn mapping_pattern(&mut self) -> ParseResult<Pattern> {
        let mut keys = Vec::new();
        let mut patterns = Vec::new();
        let mut rest = None;
        while !self.at_op("}") {
            if rest.is_some() {
                return Err(self.error_here("invalid syntax"));
            }
            if self.eat_op("**") {
                rest = Some(self.expect_name()?);
            } else {
                keys.push(self.mapping_key()?);
                self.expect_op(":")?;
                patterns.push(self.pattern()?);
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op("}")?;
        Ok(Pattern::Mapping {
            keys,
            patterns,
            rest,
        })
    }

    fn mapping_key(&mut self) -> ParseResult<Expr> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(_) | TokenKind::Op("-") => self.number_pattern(),
            TokenKind::Str(_) => self.literal_string_pattern(),
            TokenKind::Name(name) if matches!(name.as_str(), "None" | "True" | "False") => {
                self.atom()
            }
            TokenKind::Name(_) => match self.name_or_attribute()? {
                attribute @ Expr::Attribute { .. } => Ok(attribute),
                _ => Err(ParseError::new(
                    "mapping pattern keys may only match literals and attribute lookups",
                    token.line,
                    token.column,
                )),
            },
            _ => Err(self.error_here("invalid syntax")),
        }
    }

    /// Class pattern arguments after `(`, consuming the closing `)`
    fn class_pattern(&mut self, cls: Expr) -> ParseResult<Pattern> {
        let mut patterns = Vec::new();
        let mut keywords = Vec::new();
        while !self.at_op(")") {
            let is_keyword_pattern = matches!(&self.peek().kind, TokenKind::Name(n) if !is_keyword(n))
                && matches!(self.peek_nth(1).kind, TokenKind::Op("="));
            if is_keyword_pattern {
                let name = self.expect_name()?;
                self.pos += 1;
                keywords.push((name, self.pattern()?));
            } else if keywords.is_empty() {
                patterns.push(self.pattern()?);
            } else {
                return Err(self.error_here("positional patterns follow keyword patterns"));
            }
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(Pattern::Class {
            cls,
            patterns,
            keywords,
        })
    }

    fn decorated(&mut self) -> ParseResult<Stmt> {
        let mut decorators = Vec::new();
        while self.eat_op("@") {
            decorators.push(self.named_expression()?);
            self.expect_newline()?;
        }
        if self.at_keyword("def") {
            self.function_def(decorators, false)
        } else if self.at_keyword("class") {
            self.class_def(decorators)
        } else if self.at_keyword("async") && self.nth_is_keyword(1, "def") {
            self.pos += 1;
            self.function_def(decorators, true)
        } else {
            Err(self.error_here("invalid syntax"))
        }
    }

    fn async_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.advance().line;
        let mut stmt = if self.at_keyword("def") {
            self.function_def(Vec::new(), true)?
        } else if self.at_keyword("for") {
            self.for_statement(true)?
        } else if self.at_keyword("with") {
            self.with_statement(true)?
        } else {
            return Err(self.error_here("invalid syntax"));
        };
        stmt.line = line;
        Ok(stmt)
    }

    fn function_def(&mut self, decorators: Vec<Expr>, is_async: bool) -> ParseResult<Stmt> {
        let line = self.advance().line;
        let name = self.expect_name()?;
        self.expect_op("(")?;
        let params = self.parameters(")", true)?;
        self.expect_op(")")?;
        let returns = if self.eat_op("->") {
            Some(self.expression()?)
        } else {
            None
        };
        let body = self.block()?;
        Ok(Stmt {
            line,
            kind: StmtKind::FunctionDef {
                is_async,
                name,
                decorators,
                params,
                returns,
                body,
            },
        })
    }

    fn class_def(&mut self, decorators: Vec<Expr>) -> ParseResult<Stmt> {
        let line = self.advance().line;
        let name = self.expect_name()?;
        let bases = if self.eat_op("(") {
            self.call_arguments()?
        } else {
            Vec::new()
        };
        let body = self.block()?;
        Ok(Stmt {
            line,
            kind: StmtKind::ClassDef {
                name,
                decorators,
                bases,
                body,
            },
        })
    }

    /// Parameter list up to (not including) `close`
    fn parameters(&mut self, close: &str, annotated: bool) -> ParseResult<Vec<Param>> {
        let mut params = Vec::new();
        while !self.at_op(close) {
            let param = if self.eat_op("/") {
                Param {
                    kind: ParamKind::PositionalOnlyMarker,
                    name: String::new(),
                    annotation: None,
                    default: None,
                }
            } else if self.eat_op("**") {
                let name = self.expect_name()?;
                let annotation = self.annotation(annotated)?;
                Param {
                    kind: ParamKind::KwArgs,
                    name,
                    annotation,
                    default: None,
                }
            } else if self.eat_op("*") {
                if self.at_op(",") || self.at_op(close) {
                    Param {
                        kind: ParamKind::KeywordOnlyMarker,
                        name: String::new(),
                        annotation: None,
                        default: None,
                    }
                } else {
                    let name = self.expect_name()?;
                    let annotation = self.annotation(annotated)?;
                    Param {
                        kind: ParamKind::VarArgs,
                        name,
                        annotation,
                        default: None,
                    }
                }
            } else {
                let name = self.expect_name()?;
                let annotation = self.annotation(annotated)?;
                let default = if self.eat_op("=") {
                    Some(self.expression()?)
                } else {
                    None
                };
                Param {
                    kind: ParamKind::Normal,
                    name,
                    annotation,
                    default,
                }
            };
            params.push(param);
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(params)
    }

    fn annotation(&mut self, annotated: bool) -> ParseResult<Option<Expr>> {
        if annotated && self.eat_op(":") {
            Ok(Some(self.expression()?))
        } else {
            Ok(None)
        }
    }

    fn simple_statements(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut stmts = vec![self.simple_statement()?];
        while self.eat_op(";") {
            if matches!(self.peek().kind, TokenKind::Newline) {
                break;
            }
            stmts.push(self.simple_statement()?);
        }
        self.expect_newline()?;
        Ok(stmts)
    }

    fn simple_statement(&mut self) -> ParseResult<Stmt> {
        let line = self.peek().line;
        let keyword = match &self.peek().kind {
            TokenKind::Name(name) if is_keyword(name) => Some(name.clone()),
            _ => None,
        };

        let kind = match keyword.as_deref() {
            Some("pass") => {
                self.pos += 1;
                StmtKind::Pass
            }
            Some("break") => {
                self.pos += 1;
                StmtKind::Break
            }
            Some("continue") => {
                self.pos += 1;
                StmtKind::Continue
            }
            Some("return") => {
                self.pos += 1;
                let value = if self.starts_expression() {
                    Some(self.star_expressions()?)
                } else {
                    None
                };
                StmtKind::Return(value)
            }
            Some("raise") => {
                self.pos += 1;
                let (exc, cause) = if self.starts_expression() {
                    let exc = self.expression()?;
                    let cause = if self.eat_keyword("from") {
                        Some(self.expression()?)
                    } else {
                        None
                    };
                    (Some(exc), cause)
                } else {
                    (None, None)
                };
                StmtKind::Raise { exc, cause }
            }
            Some("global") => {
                self.pos += 1;
                StmtKind::Global(self.name_list()?)
            }
            Some("nonlocal") => {
                self.pos += 1;
                StmtKind::Nonlocal(self.name_list()?)
            }
            Some("del") => {
                self.pos += 1;
                let targets = match self.star_expressions()? {
                    Expr::Tuple(elts) => elts,
                    target => vec![target],
                };
                for target in &targets {
                    validate_target(target, self.peek())?;
                }
                StmtKind::Delete(targets)
            }
            Some("assert") => {
                self.pos += 1;
                let test = self.expression()?;
                let msg = if self.eat_op(",") {
                    Some(self.expression()?)
                } else {
                    None
                };
                StmtKind::Assert { test, msg }
            }
            Some("import") => {
                self.pos += 1;
                self.import_names()?
            }
            Some("from") => {
                self.pos += 1;
                self.import_from()?
            }
            _ => self.expression_statement()?,
        };
        Ok(Stmt { line, kind })
    }

    fn name_list(&mut self) -> ParseResult<Vec<String>> {
        let mut names = vec![self.expect_name()?];
        while self.eat_op(",") {
            names.push(self.expect_name()?);
        }
        Ok(names)
    }

    fn dotted_name(&mut self) -> ParseResult<String> {
        let mut name = self.expect_name()?;
        while self.eat_op(".") {
            name.push('.');
            name.push_str(&self.expect_name()?);
        }
        Ok(name)
    }

    fn import_names(&mut self) -> ParseResult<StmtKind> {
        let mut aliases = Vec::new();
        loop {
            let name = self.dotted_name()?;
            let asname = if self.eat_keyword("as") {
                Some(self.expect_name()?)
            } else {
                None
            };
            aliases.push(Alias { name, asname });
            if !self.eat_op(",") {
                break;
            }
        }
        Ok(StmtKind::Import(aliases))
    }

    fn import_from(&mut self) -> ParseResult<StmtKind> {
        let mut level = 0;
        loop {
            if self.eat_op(".") {
                level += 1;
            } else if self.eat_op("...") {
                level += 3;
            } else {
                break;
            }
        }
        let module = if self.at_keyword("import") {
            None
        } else {
            Some(self.dotted_name()?)
        };
        if module.is_none() && level == 0 {
            return Err(self.error_here("invalid syntax"));
        }
        self.expect_keyword("import")?;

        if self.eat_op("*") {
            return Ok(StmtKind::ImportFrom {
                module,
                level,
                names: vec![Alias {
                    name: "*".into(),
                    asname: None,
                }],
            });
        }

        let parenthesized = self.eat_op("(");
        let mut names = Vec::new();
        loop {
            if parenthesized && self.at_op(")") {
                break;
            }
            let name = self.expect_name()?;
            let asname = if self.eat_keyword("as") {
                Some(self.expect_name()?)
            } else {
                None
            };
            names.push(Alias { name, asname });
            if !self.eat_op(",") {
                break;
            }
        }
        if parenthesized {
            self.expect_op(")")?;
        }
        if names.is_empty() {
            return Err(self.error_here("invalid syntax"));
        }
        Ok(StmtKind::ImportFrom {
            module,
            level,
            names,
        })
    }

    fn assigned_value(&mut self) -> ParseResult<Expr> {
        if self.at_keyword("yield") {
            self.yield_expression()
        } else {
            self.star_expressions()
        }
    }

    fn expression_statement(&mut self) -> ParseResult<StmtKind> {
        let first = self.assigned_value()?;

        if self.at_op("=") {
            let mut targets = vec![first];
            let value = loop {
                self.expect_op("=")?;
                let next = self.assigned_value()?;
                if self.at_op("=") {
                    targets.push(next);
                } else {
                    break next;
                }
            };
            for target in &targets {
                validate_target(target, self.peek())?;
            }
            return Ok(StmtKind::Assign { targets, value });
        }

        if let TokenKind::Op(op) = self.peek().kind {
            if AUGMENTED.contains(&op) {
                if !matches!(
                    first,
                    Expr::Name(_) | Expr::Attribute { .. } | Expr::Subscript { .. }
                ) {
                    return Err(self.error_here(format!(
                        "'{}' is an illegal expression for augmented assignment",
                        describe(&first)
                    )));
                }
                self.pos += 1;
                let op = BinOp::from_augmented(op)
                    .ok_or_else(|| self.error_here("invalid syntax"))?;
                let value = self.assigned_value()?;
                return Ok(StmtKind::AugAssign {
                    target: first,
                    op,
                    value,
                });
            }
        }

        if self.at_op(":") {
            if !matches!(
                first,
                Expr::Name(_) | Expr::Attribute { .. } | Expr::Subscript { .. }
            ) {
                return Err(self.error_here("illegal target for annotation"));
            }
            self.pos += 1;
            let annotation = self.expression()?;
            let value = if self.eat_op("=") {
                Some(self.assigned_value()?)
            } else {
                None
            };
            return Ok(StmtKind::AnnAssign {
                target: first,
                annotation,
                value,
            });
        }

        Ok(StmtKind::Expr(first))
    }

    // ---- expressions ----

    fn star_expressions(&mut self) -> ParseResult<Expr> {
        let first = self.star_expression()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(",") {
            if !self.starts_expression() {
                break;
            }
            elts.push(self.star_expression()?);
        }
        Ok(Expr::Tuple(elts))
    }

    fn star_expression(&mut self) -> ParseResult<Expr> {
        if self.eat_op("*") {
            Ok(Expr::Starred(Box::new(self.bitwise_or()?)))
        } else {
            self.expression()
        }
    }

    fn star_named_expression(&mut self) -> ParseResult<Expr> {
        if self.eat_op("*") {
            Ok(Expr::Starred(Box::new(self.bitwise_or()?)))
        } else {
            self.named_expression()
        }
    }

    /// Assignment target list such as `a, (b, *c)`; stops before `in`
    fn target_list(&mut self) -> ParseResult<Expr> {
        let first = self.star_target()?;
        if !self.at_op(",") {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(",") {
            if !self.starts_expression() {
                break;
            }
            elts.push(self.star_target()?);
        }
        Ok(Expr::Tuple(elts))
    }

    fn star_target(&mut self) -> ParseResult<Expr> {
        if self.eat_op("*") {
            Ok(Expr::Starred(Box::new(self.bitwise_or()?)))
        } else {
            self.bitwise_or()
        }
    }

    fn named_expression(&mut self) -> ParseResult<Expr> {
        let is_walrus = matches!(&self.peek().kind, TokenKind::Name(n) if !is_keyword(n))
            && matches!(self.peek_nth(1).kind, TokenKind::Op(":="));
        if !is_walrus {
            return self.expression();
        }
        let target = Expr::Name(self.expect_name()?);
        self.pos += 1;
        let value = self.expression()?;
        Ok(Expr::NamedExpr {
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn expression(&mut self) -> ParseResult<Expr> {
        self.nested(|parser| {
            if parser.at_keyword("lambda") {
                return parser.lambda();
            }
            let body = parser.disjunction()?;
            if !parser.eat_keyword("if") {
                return Ok(body);
            }
            let test = parser.disjunction()?;
            parser.expect_keyword("else")?;
            let orelse = parser.expression()?;
            Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            })
        })
    }

    fn lambda(&mut self) -> ParseResult<Expr> {
        self.pos += 1;
        let params = self.parameters(":", false)?;
        self.expect_op(":")?;
        let body = self.expression()?;
        Ok(Expr::Lambda {
            params,
            body: Box::new(body),
        })
    }

    fn bool_chain(
        &mut self,
        keyword: &str,
        op: BoolOp,
        operand: fn(&mut Self) -> ParseResult<Expr>,
    ) -> ParseResult<Expr> {
        let first = operand(self)?;
        if !self.at_keyword(keyword) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_keyword(keyword) {
            values.push(operand(self)?);
        }
        Ok(Expr::BoolOp { op, values })
    }

    fn disjunction(&mut self) -> ParseResult<Expr> {
        self.bool_chain("or", BoolOp::Or, Self::conjunction)
    }

    fn conjunction(&mut self) -> ParseResult<Expr> {
        self.bool_chain("and", BoolOp::And, Self::inversion)
    }

    fn inversion(&mut self) -> ParseResult<Expr> {
        if self.eat_keyword("not") {
            let operand = self.nested(Self::inversion)?;
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison_operator(&mut self) -> Option<CmpOp> {
        let (op, width) = match &self.peek().kind {
            TokenKind::Op("==") => (CmpOp::Eq, 1),
            TokenKind::Op("!=") => (CmpOp::NotEq, 1),
            TokenKind::Op("<") => (CmpOp::Lt, 1),
            TokenKind::Op("<=") => (CmpOp::LtE, 1),
            TokenKind::Op(">") => (CmpOp::Gt, 1),
            TokenKind::Op(">=") => (CmpOp::GtE, 1),
            TokenKind::Name(n) if n == "in" => (CmpOp::In, 1),
            TokenKind::Name(n) if n == "not" && self.nth_is_keyword(1, "in") => (CmpOp::NotIn, 2),
            TokenKind::Name(n) if n == "is" && self.nth_is_keyword(1, "not") => (CmpOp::IsNot, 2),
            TokenKind::Name(n) if n == "is" => (CmpOp::Is, 1),
            _ => return None,
        };
        self.pos += width;
        Some(op)
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let left = self.bitwise_or()?;
        let mut comparisons = Vec::new();
        while let Some(op) = self.comparison_operator() {
            comparisons.push((op, self.bitwise_or()?));
        }
        if comparisons.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                comparisons,
            })
        }
    }

    /// One left-associative binary level; every operator nests the tree once more
    fn binary_level(
        &mut self,
        operators: &[(&str, BinOp)],
        operand: fn(&mut Self) -> ParseResult<Expr>,
    ) -> ParseResult<Expr> {
        let depth = self.depth;
        let mut left = operand(self)?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Op(symbol) => operators
                    .iter()
                    .find(|(s, _)| *s == symbol)
                    .map(|(_, op)| *op),
                _ => None,
            };
            let Some(op) = op else {
                self.depth = depth;
                return Ok(left);
            };
            self.descend()?;
            self.pos += 1;
            let right = operand(self)?;
            left = Expr::BinOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
    }

    fn bitwise_or(&mut self) -> ParseResult<Expr> {
        self.binary_level(&[("|", BinOp::BitOr)], Self::bitwise_xor)
    }

    fn bitwise_xor(&mut self) -> ParseResult<Expr> {
        self.binary_level(&[("^", BinOp::BitXor)], Self::bitwise_and)
    }

    fn bitwise_and(&mut self) -> ParseResult<Expr> {
        self.binary_level(&[("&", BinOp::BitAnd)], Self::shift_expr)
    }

    fn shift_expr(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[("<<", BinOp::LShift), (">>", BinOp::RShift)],
            Self::sum,
        )
    }

    fn sum(&mut self) -> ParseResult<Expr> {
        self.binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::term)
    }

    fn term(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[
                ("*", BinOp::Mult),
                ("/", BinOp::Div),
                ("//", BinOp::FloorDiv),
                ("%", BinOp::Mod),
                ("@", BinOp::MatMult),
            ],
            Self::factor,
        )
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        let op = match self.peek().kind {
            TokenKind::Op("+") => UnaryOp::UAdd,
            TokenKind::Op("-") => UnaryOp::USub,
            TokenKind::Op("~") => UnaryOp::Invert,
            _ => return self.power(),
        };
        self.pos += 1;
        let operand = self.nested(Self::factor)?;
        Ok(Expr::UnaryOp {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> ParseResult<Expr> {
        let base = self.await_primary()?;
        if !self.eat_op("**") {
            return Ok(base);
        }
        let exponent = self.nested(Self::factor)?;
        Ok(Expr::BinOp {
            left: Box::new(base),
            op: BinOp::Pow,
            right: Box::new(exponent),
        })
    }

    fn await_primary(&mut self) -> ParseResult<Expr> {
        if self.eat_keyword("await") {
            return Ok(Expr::Await(Box::new(self.primary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let depth = self.depth;
        let mut expr = self.atom()?;
        loop {
            if matches!(self.peek().kind, TokenKind::Op("." | "(" | "[")) {
                self.descend()?;
            }
            if self.eat_op(".") {
                let attr = self.expect_name()?;
                expr = Expr::Attribute {
                    value: Box::new(expr),
                    attr,
                };
            } else if self.eat_op("(") {
                let args = self.call_arguments()?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                };
            } else if self.eat_op("[") {
                let slice = self.slices()?;
                expr = Expr::Subscript {
                    value: Box::new(expr),
                    slice: Box::new(slice),
                };
            } else {
                self.depth = depth;
                return Ok(expr);
            }
        }
    }

    /// Arguments after an opening `(`, consuming the closing `)`
    fn call_arguments(&mut self) -> ParseResult<Vec<Arg>> {
        let mut args = Vec::new();
        while !self.at_op(")") {
            let arg = if self.eat_op("*") {
                Arg::Starred(self.expression()?)
            } else if self.eat_op("**") {
                Arg::DoubleStarred(self.expression()?)
            } else if matches!(&self.peek().kind, TokenKind::Name(n) if !is_keyword(n))
                && matches!(self.peek_nth(1).kind, TokenKind::Op("="))
            {
                let name = self.expect_name()?;
                self.pos += 1;
                Arg::Keyword(name, self.expression()?)
            } else {
                let value = self.named_expression()?;
                if self.at_comprehension() {
                    let generators = self.comprehensions()?;
                    Arg::Positional(Expr::GeneratorExp {
                        elt: Box::new(value),
                        generators,
                    })
                } else {
                    Arg::Positional(value)
                }
            };
            args.push(arg);
            if !self.eat_op(",") {
                break;
            }
        }
        self.expect_op(")")?;
        Ok(args)
    }

    /// Subscript contents after `[`, consuming the closing `]`
    fn slices(&mut self) -> ParseResult<Expr> {
        let first = self.slice()?;
        if !self.at_op(",") {
            self.expect_op("]")?;
            // `a[*b]` indexes with a one-element tuple
            if matches!(first, Expr::Starred(_)) {
                return Ok(Expr::Tuple(vec![first]));
            }
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.eat_op(",") {
            if self.at_op("]") {
                break;
            }
            elts.push(self.slice()?);
        }
        self.expect_op("]")?;
        Ok(Expr::Tuple(elts))
    }

    fn slice(&mut self) -> ParseResult<Expr> {
        let lower = if self.at_op(":") {
            None
        } else {
            let value = self.star_named_expression()?;
            if !self.at_op(":") {
                return Ok(value);
            }
            Some(Box::new(value))
        };
        self.expect_op(":")?;
        let upper = if self.at_slice_bound() {
            None
        } else {
            Some(Box::new(self.expression()?))
        };
        let step = if self.eat_op(":") && !self.at_slice_bound() {
            Some(Box::new(self.expression()?))
        } else {
            None
        };
        Ok(Expr::Slice { lower, upper, step })
    }

    fn at_slice_bound(&self) -> bool {
        self.at_op(":") || self.at_op("]") || self.at_op(",")
    }

    fn comprehensions(&mut self) -> ParseResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while self.at_comprehension() {
            let is_async = self.eat_keyword("async");
            self.expect_keyword("for")?;
            let target = self.target_list()?;
            validate_target(&target, self.peek())?;
            self.expect_keyword("in")?;
            let iter = self.disjunction()?;
            let mut ifs = Vec::new();
            while self.eat_keyword("if") {
                ifs.push(self.disjunction()?);
            }
            generators.push(Comprehension {
                is_async,
                target,
                iter,
                ifs,
            });
        }
        Ok(generators)
    }

    fn yield_expression(&mut self) -> ParseResult<Expr> {
        self.expect_keyword("yield")?;
        if self.eat_keyword("from") {
            return Ok(Expr::YieldFrom(Box::new(self.expression()?)));
        }
        if self.starts_expression() {
            Ok(Expr::Yield(Some(Box::new(self.star_expressions()?))))
        } else {
            Ok(Expr::Yield(None))
        }
    }

    fn atom(&mut self) -> ParseResult<Expr> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Name(name) => {
                self.pos += 1;
                match name.as_str() {
                    "None" => Ok(Expr::Constant(Constant::None)),
                    "True" => Ok(Expr::Constant(Constant::Bool(true))),
                    "False" => Ok(Expr::Constant(Constant::Bool(false))),
                    _ if is_keyword(&name) => Err(ParseError::new(
                        "invalid syntax",
                        token.line,
                        token.column,
                    )),
                    _ => Ok(Expr::Name(name)),
                }
            }
            TokenKind::Number(text) => {
                self.pos += 1;
                Ok(Expr::Constant(number_constant(&text)))
            }
            TokenKind::Str(_) => self.strings(),
            TokenKind::Op("...") => {
                self.pos += 1;
                Ok(Expr::Constant(Constant::Ellipsis))
            }
            TokenKind::Op("(") => {
                self.pos += 1;
                self.parenthesized()
            }
            TokenKind::Op("[") => {
                self.pos += 1;
                self.list_display()
            }
            TokenKind::Op("{") => {
                self.pos += 1;
                self.brace_display()
            }
            _ => Err(ParseError::new("invalid syntax", token.line, token.column)),
        }
    }

    /// Adjacent string literals concatenate
    fn strings(&mut self) -> ParseResult<Expr> {
        let start = self.peek().clone();
        let mut parts: Vec<(StrToken, usize, usize)> = Vec::new();
        while let TokenKind::Str(part) = &self.peek().kind {
            let token = self.peek();
            parts.push((part.clone(), token.line, token.column));
            self.pos += 1;
        }

        let bytes = parts.iter().filter(|(p, ..)| p.bytes).count();
        if bytes != 0 && bytes != parts.len() {
            return Err(ParseError::new(
                "cannot mix bytes and nonbytes literals",
                start.line,
                start.column,
            ));
        }

        if parts.iter().any(|(p, ..)| p.formatted) {
            let mut joined = Vec::new();
            for (part, line, column) in &parts {
                if part.formatted {
                    let pieces = fstring::split(&part.body, part.raw)
                        .map_err(|message| ParseError::new(message, *line, *column))?;
                    self.joined_parts(&pieces, part.raw, (*line, *column), &mut joined)?;
                } else {
                    push_literal(&mut joined, &part.value);
                }
            }
            return Ok(Expr::JoinedStr(joined));
        }

        let value: String = parts.iter().map(|(p, ..)| p.value.as_str()).collect();
        if bytes != 0 {
            let bytes = value
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect();
            return Ok(Expr::Constant(Constant::Bytes(bytes)));
        }
        let unicode = parts.first().is_some_and(|(p, ..)| p.unicode);
        Ok(Expr::Constant(Constant::Str { value, unicode }))
    }

    /// Convert scanned f-string pieces into tree parts, appending to `out`
    fn joined_parts(
        &self,
        pieces: &[Piece],
        raw: bool,
        at: (usize, usize),
        out: &mut Vec<FStringPart>,
    ) -> ParseResult<()> {
        let error = |message: String| ParseError::new(message, at.0, at.1);
        for piece in pieces {
            match piece {
                Piece::Literal(text) => {
                    if raw {
                        push_literal(out, text);
                    } else {
                        push_literal(out, &unescape(text, false).map_err(error)?);
                    }
                }
                Piece::Field(field) => {
                    let value = self.field_expression(&field.expression, at)?;
                    if let Some(debug) = &field.debug {
                        push_literal(out, debug);
                    }
                    let format_spec = match &field.spec {
                        Some(spec) => {
                            let mut parts = Vec::new();
                            self.joined_parts(spec, raw, at, &mut parts)?;
                            Some(parts)
                        }
                        None => None,
                    };
                    // `{x=}` shows the repr unless a conversion or spec says otherwise
                    let conversion = match field.conversion {
                        None if field.debug.is_some() && format_spec.is_none() => Some('r'),
                        conversion => conversion,
                    };
                    out.push(FStringPart::Field {
                        value: Box::new(value),
                        conversion,
                        format_spec,
                    });
                }
            }
        }
        Ok(())
    }

    /// A replacement field parses as if it were written `(expression)`
    fn field_expression(&self, text: &str, (line, column): (usize, usize)) -> ParseResult<Expr> {
        let in_fstring = |err: ParseError| {
            let message = if err.message.starts_with("f-string") {
                err.message
            } else {
                format!("f-string: {}", err.message)
            };
            ParseError::new(message, line, column)
        };
        let tokens = tokenize(&format!("({text})")).map_err(in_fstring)?;
        let mut parser = Self {
            tokens,
            pos: 0,
            depth: self.depth,
        };
        let value = parser.atom().map_err(in_fstring)?;
        if !matches!(parser.peek().kind, TokenKind::Newline) {
            return Err(in_fstring(parser.error_here("invalid syntax")));
        }
        Ok(value)
    }

    fn parenthesized(&mut self) -> ParseResult<Expr> {
        if self.eat_op(")") {
            return Ok(Expr::Tuple(Vec::new()));
        }
        if self.at_keyword("yield") {
            let value = self.yield_expression()?;
            self.expect_op(")")?;
            return Ok(value);
        }

        let first = self.star_named_expression()?;
        if self.at_comprehension() {
            let generators = self.comprehensions()?;
            self.expect_op(")")?;
            return Ok(Expr::GeneratorExp {
                elt: Box::new(first),
                generators,
            });
        }
        if !self.at_op(",") {
            self.expect_op(")")?;
            return Ok(first);
        }

        let mut elts = vec![first];
        while self.eat_op(",") {
            if self.at_op(")") {
                break;
            }
            elts.push(self.star_named_expression()?);
        }
        self.expect_op(")")?;
        Ok(Expr::Tuple(elts))
    }

    /// Elements after an opening bracket up to and including `close`
    fn elements(&mut self, first: Expr, close: &str) -> ParseResult<Vec<Expr>> {
        let mut elts = vec![first];
        while self.eat_op(",") {
            if self.at_op(close) {
                break;
            }
            elts.push(self.star_named_expression()?);
        }
        self.expect_op(close)?;
        Ok(elts)
    }

    fn list_display(&mut self) -> ParseResult<Expr> {
        if self.eat_op("]") {
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.star_named_expression()?;
        if self.at_comprehension() {
            let generators = self.comprehensions()?;
            self.expect_op("]")?;
            return Ok(Expr::ListComp {
                elt: Box::new(first),
                generators,
            });
        }
        Ok(Expr::List(self.elements(first, "]")?))
    }

    fn brace_display(&mut self) -> ParseResult<Expr> {
        if self.eat_op("}") {
            return Ok(Expr::Dict(Vec::new()));
        }

        let first_entry = if self.eat_op("**") {
            Some((None, self.bitwise_or()?))
        } else {
            None
        };
        let (key, value) = if let Some(entry) = first_entry {
            entry
        } else {
            let first = self.star_named_expression()?;
            if !self.at_op(":") {
                if self.at_comprehension() {
                    let generators = self.comprehensions()?;
                    self.expect_op("}")?;
                    return Ok(Expr::SetComp {
                        elt: Box::new(first),
                        generators,
                    });
                }
                return Ok(Expr::Set(self.elements(first, "}")?));
            }
            self.pos += 1;
            let value = self.expression()?;
            if self.at_comprehension() {
                let generators = self.comprehensions()?;
                self.expect_op("}")?;
                return Ok(Expr::DictComp {
                    key: Box::new(first),
                    value: Box::new(value),
                    generators,
                });
            }
            (Some(first), value)
        };

        let mut entries = vec![(key, value)];
        while self.eat_op(",") {
            if self.at_op("}") {
                break;
            }
            if self.eat_op("**") {
                entries.push((None, self.bitwise_or()?));
            } else {
                let key = self.expression()?;
                self.expect_op(":")?;
                entries.push((Some(key), self.expression()?));
            }
        }
        self.expect_op("}")?;
        Ok(Expr::Dict(entries))
    }
}

/// Append literal text, merging it into a preceding literal
fn push_literal(parts: &mut Vec<FStringPart>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(FStringPart::Literal(last)) = parts.last_mut() {
        last.push_str(text);
    } else {
        parts.push(FStringPart::Literal(text.to_string()));
    }
}

/// Reject targets Python refuses to bind, e.g. `f() = 1`
fn validate_target(target: &Expr, at: &Token) -> ParseResult<()> {
    match target {
        Expr::Name(_) | Expr::Attribute { .. } | Expr::Subscript { .. } => Ok(()),
        Expr::Tuple(elts) | Expr::List(elts) => {
            elts.iter().try_for_each(|elt| validate_target(elt, at))
        }
        Expr::Starred(inner) => validate_target(inner, at),
        other => Err(ParseError::new(
            format!("cannot assign to {}", describe(other)),
            at.line,
            at.column,
        )),
    }
}

fn describe(expr: &Expr) -> &'static str {
    match expr {
        Expr::Call { .. } => "function call",
        Expr::Constant(Constant::None | Constant::Bool(_) | Constant::Ellipsis) => "constant",
        Expr::Constant(_) | Expr::Dict(_) | Expr::Set(_) => "literal",
        Expr::JoinedStr(_) => "f-string expression",
        Expr::Lambda { .. } => "lambda",
        Expr::IfExp { .. } => "conditional expression",
        Expr::Compare { .. } => "comparison",
        Expr::NamedExpr { .. } => "named expression",
        Expr::Await(_) => "await expression",
        Expr::Yield(_) | Expr::YieldFrom(_) => "yield expression",
        Expr::ListComp { .. } => "list comprehension",
        Expr::SetComp { .. } => "set comprehension",
        Expr::DictComp { .. } => "dict comprehension",
        Expr::GeneratorExp { .. } => "generator expression",
        Expr::Tuple(_) => "tuple",
        Expr::List(_) => "list",
        Expr::Name(_) => "name",
        Expr::Attribute { .. } => "attribute",
        Expr::Subscript { .. } => "subscript",
        Expr::Starred(_) => "starred",
        Expr::BoolOp { .. } | Expr::BinOp { .. } | Expr::UnaryOp { .. } | Expr::Slice { .. } => {
            "expression"
        }
    }
}

/// Numeric literal text to its normalized constant
fn number_constant(text: &str) -> Constant {
    let clean: String = text.chars().filter(|c| *c != '_').collect();
    let lower = clean.to_ascii_lowercase();

    if let Some(digits) = lower.strip_suffix('j') {
        let repr = format_float_text(digits);
        let repr = repr.strip_suffix(".0").unwrap_or(&repr);
        return Constant::Complex(format!("{repr}j"));
    }
    for (prefix, radix) in [("0x", 16), ("0o", 8), ("0b", 2)] {
        if let Some(digits) = lower.strip_prefix(prefix) {
            return Constant::Int(
                u128::from_str_radix(digits, radix).map_or(clean.clone(), |v| v.to_string()),
            );
        }
    }
    if lower.contains(['.', 'e']) {
        return Constant::Float(format_float_text(&lower));
    }
    let trimmed = clean.trim_start_matches('0');
    Constant::Int(if trimmed.is_empty() { "0" } else { trimmed }.to_string())
}

fn format_float_text(text: &str) -> String {
    text.parse::<f64>().map_or_else(|_| text.to_string(), python_float_repr)
}

/// `repr(float)`: shortest round-trip digits, exponent outside 1e-4..1e16
fn python_float_repr(value: f64) -> String {
    if value.is_infinite() {
        // The literal that overflows to inf
        return "1e309".to_string();
    }
    if value == 0.0 {
        return "0.0".to_string();
    }

    let scientific = format!("{value:e}");
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();

    if (-4..16).contains(&exponent) {
        let point = exponent + 1;
        if point <= 0 {
            let zeros = "0".repeat(point.unsigned_abs() as usize);
            format!("0.{zeros}{digits}")
        } else {
            let point = point.unsigned_abs() as usize;
            if digits.len() <= point {
                format!("{digits}{}.0", "0".repeat(point - digits.len()))
            } else {
                format!("{}.{}", &digits[..point], &digits[point..])
            }
        }
    } else {
        let (head, tail) = digits.split_at(1);
        let fraction = if tail.is_empty() {
            String::new()
        } else {
            format!(".{tail}")
        };
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{head}{fraction}e{sign}{:02}", exponent.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Vec<Stmt> {
        parse_module(source).unwrap()
    }

    #[test]
    fn elif_nests_inside_orelse_with_its_own_line() {
        let module = parse("if a:\n    pass\nelif b:\n    pass\nelse:\n    x = 1\n");
        assert_eq!(module.len(), 1);
        let StmtKind::If { orelse, .. } = &module[0].kind else {
            panic!("expected if");
        };
        assert_eq!(orelse.len(), 1);
        assert_eq!(orelse[0].line, 3);
        assert!(matches!(&orelse[0].kind, StmtKind::If { orelse, .. } if orelse.len() == 1));
    }

    #[test]
    fn chained_assignment_keeps_every_target() {
        let module = parse("a = b = 1");
        let StmtKind::Assign { targets, value } = &module[0].kind else {
            panic!("expected assign");
        };
        assert_eq!(
            targets,
            &[Expr::Name("a".into()), Expr::Name("b".into())]
        );
        assert_eq!(value, &Expr::Constant(Constant::Int("1".into())));
    }

    #[test]
    fn semicolons_split_statements_on_one_line() {
        let module = parse("a = 1; b = 2; print(a)");
        assert_eq!(module.len(), 3);
        assert!(module.iter().all(|stmt| stmt.line == 1));
    }

    #[test]
    fn for_target_stops_before_in() {
        let module = parse("for i, (j, k) in pairs:\n    pass\n");
        let StmtKind::For { target, iter, .. } = &module[0].kind else {
            panic!("expected for");
        };
        assert!(matches!(target, Expr::Tuple(elts) if elts.len() == 2));
        assert_eq!(iter, &Expr::Name("pairs".into()));
    }

    #[test]
    fn compound_statements_parse() {
        let source = "\
import os, sys as system
from ..pkg import (a, b as c,)
@decorator(1)
class Point(Base, metaclass=Meta):
    x: int = 0
    async def move(self, dx, /, *, dy=0, **kw) -> None:
        async with lock as held, other:
            await self.step(dx)
        async for item in stream():
            yield item
try:
    risky()
except (ValueError, KeyError) as err:
    raise RuntimeError('bad') from err
except Exception:
    pass
else:
    ok = True
finally:
    del tmp, cache[0]
while n > 0:
    n -= 1
else:
    assert n == 0, 'done'
lambda_fn = lambda x, *rest, y=2: x if y else rest
squares = {k: v ** 2 for k, v in items if v}
";
        let module = parse(source);
        assert_eq!(module.len(), 7);
        assert_eq!(module[2].line, 4);
        assert_eq!(module[3].line, 11);
    }

    #[test]
    fn syntax_errors_are_reported() {
        for source in [
            "int x = 1;",
            "if x\n    pass",
            "def f(:\n  pass",
            "x = ",
            "f() = 1",
            "1 += 2",
            "  indented = 1",
            "for x in:\n  pass",
            "try:\n  pass\n",
            "return return",
            "else:\n  pass",
        ] {
            assert!(parse_module(source).is_err(), "accepted: {source:?}");
        }
    }

    #[test]
    fn match_is_a_soft_keyword() {
        let module = parse(
            "match point:\n    case Point(x=0) if ok:\n        pass\n    case [1, *rest]:\n        pass\n",
        );
        let StmtKind::Match { subject, cases } = &module[0].kind else {
            panic!("expected match");
        };
        assert_eq!(subject, &Expr::Name("point".into()));
        assert_eq!(cases.len(), 2);
        assert!(cases[0].guard.is_some());
        assert!(matches!(&cases[0].pattern, Pattern::Class { keywords, .. } if keywords.len() == 1));
        assert_eq!(
            cases[1].pattern,
            Pattern::Sequence(vec![
                Pattern::Value(Expr::Constant(Constant::Int("1".into()))),
                Pattern::Star(Some("rest".into())),
            ])
        );

        for source in ["match = 1", "match(x)", "match.value = 2", "match[0], y = z"] {
            assert!(
                !matches!(parse(source)[0].kind, StmtKind::Match { .. }),
                "{source:?}"
            );
        }
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        for source in [
            "match x:\n    case 1 +:\n        pass\n",
            "match x:\n    case f'{y}':\n        pass\n",
            "match x:\n    case {y: 1}:\n        pass\n",
            "match x:\n    case P(a=1, b):\n        pass\n",
            "match x:\n    case *y:\n        pass\n",
            "match x:\n    case y as _:\n        pass\n",
            "match x:\n    case 1:\n        pass\n    y = 2\n",
        ] {
            assert!(parse_module(source).is_err(), "accepted: {source:?}");
        }
    }

    #[test]
    fn with_items_may_be_parenthesized() {
        let items = |source: &str| match &parse(source)[0].kind {
            StmtKind::With { items, .. } => items.clone(),
            other => panic!("expected with, got {other:?}"),
        };
        assert_eq!(items("with (a as b, c as d,):\n    pass\n").len(), 2);
        assert_eq!(items("with (open(p)) as f, g:\n    pass\n").len(), 2);

        let grouped = items("with (a, b) as c:\n    pass\n");
        assert_eq!(grouped.len(), 1);
        assert!(matches!(&grouped[0].context, Expr::Tuple(elts) if elts.len() == 2));
    }

    #[test]
    fn fstring_fields_parse_as_expressions() {
        let module = parse("s = f'{a!r:>{w}} and {b=}'");
        let StmtKind::Assign { value, .. } = &module[0].kind else {
            panic!("expected assign");
        };
        let Expr::JoinedStr(parts) = value else {
            panic!("expected f-string, got {value:?}");
        };
        assert_eq!(parts.len(), 3);
        assert!(matches!(
            &parts[0],
            FStringPart::Field { conversion: Some('r'), format_spec: Some(spec), .. } if spec.len() == 2
        ));
        assert_eq!(parts[1], FStringPart::Literal(" and b=".into()));
        assert!(matches!(&parts[2], FStringPart::Field { conversion: Some('r'), format_spec: None, .. }));
    }

    #[test]
    fn numbers_normalize_like_python() {
        assert_eq!(number_constant("0x1F"), Constant::Int("31".into()));
        assert_eq!(number_constant("1_000"), Constant::Int("1000".into()));
        assert_eq!(number_constant("00"), Constant::Int("0".into()));
        assert_eq!(number_constant("1.50"), Constant::Float("1.5".into()));
        assert_eq!(number_constant("1e3"), Constant::Float("1000.0".into()));
        assert_eq!(number_constant("1e16"), Constant::Float("1e+16".into()));
        assert_eq!(number_constant(".0001"), Constant::Float("0.0001".into()));
        assert_eq!(number_constant("1.5e-5"), Constant::Float("1.5e-05".into()));
        assert_eq!(number_constant("2j"), Constant::Complex("2j".into()));
    }

    #[test]
    fn adjacent_strings_concatenate() {
        let module = parse("s = 'a' \"b\"");
        let StmtKind::Assign { value, .. } = &module[0].kind else {
            panic!("expected assign");
        };
        assert_eq!(
            value,
            &Expr::Constant(Constant::Str {
                value: "ab".into(),
                unicode: false,
            })
        );
        assert!(parse_module("s = 'a' b'b'").is_err());
    }
}
