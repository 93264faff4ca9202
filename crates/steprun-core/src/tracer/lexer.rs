//! Tokenizer for Python 3 source
//!
//! Produces logical-line tokens with INDENT/DEDENT, the way the reference
//! tokenizer does: blank and comment-only lines vanish, newlines inside
//! brackets are ignored and `\` joins physical lines.

use super::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Name(String),
    Number(String),
    Str(StrToken),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    EndMarker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrToken {
    /// Body as written between the quotes
    pub body: String,
    /// Body with escapes processed (equal to `body` for raw strings)
    pub value: String,
    pub raw: bool,
    pub bytes: bool,
    pub formatted: bool,
    /// Written with a `u` prefix
    pub unicode: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// 1-based
    pub line: usize,
    /// 1-based
    pub column: usize,
}

const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "...", "->", ":=", "**", "//", "<<", ">>", "<=", ">=", "==", "!=",
    "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "@=", "+", "-", "*", "/", "%", "@", "&", "|",
    "^", "~", "<", ">", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";", "=",
];

const STRING_PREFIXES: &[&str] = &["r", "u", "b", "f", "br", "rb", "fr", "rf"];

/// Open brackets allowed at once
const MAX_BRACKET_DEPTH: usize = 200;

/// Indentation levels allowed, counting the outermost
const MAX_INDENT_LEVELS: usize = 100;

pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    /// Indentation widths with tabs expanded to 8 and to 1 columns
    indents: Vec<(usize, usize)>,
    /// Open brackets with their positions
    brackets: Vec<(char, usize, usize)>,
    at_line_start: bool,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            indents: vec![(0, 0)],
            brackets: Vec::new(),
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        match c {
            '\n' => {
                self.line += 1;
                self.column = 1;
            }
            // A lone \r is a line break too; \r\n counts once, on the \n.
            '\r' if self.peek() != Some('\n') => {
                self.line += 1;
                self.column = 1;
            }
            _ => self.column += 1,
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.line, self.column)
    }

    fn push(&mut self, kind: TokenKind, line: usize, column: usize) {
        self.tokens.push(Token { kind, line, column });
    }

    fn at_newline(&self) -> bool {
        matches!(self.peek(), Some('\n' | '\r'))
    }

    fn bump_newline(&mut self) {
        if self.peek() == Some('\r') {
            self.bump();
        }
        if self.peek() == Some('\n') {
            self.bump();
        }
    }

    fn skip_comment(&mut self) {
        while self.peek().is_some() && !self.at_newline() {
            self.bump();
        }
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        loop {
            if self.at_line_start && self.brackets.is_empty() {
                let width = self.read_indent();
                match self.peek() {
                    None => break,
                    Some('#') => {
                        self.skip_comment();
                        continue;
                    }
                    Some('\n' | '\r') => {
                        self.bump_newline();
                        continue;
                    }
                    Some(_) => {
                        self.indent_to(width)?;
                        self.at_line_start = false;
                    }
                }
            }

            let Some(c) = self.peek() else { break };
            let (line, column) = (self.line, self.column);
            match c {
                ' ' | '\t' | '\x0c' => {
                    self.bump();
                }
                '#' => self.skip_comment(),
                '\n' | '\r' => {
                    self.bump_newline();
                    if self.brackets.is_empty() {
                        self.push(TokenKind::Newline, line, column);
                        self.at_line_start = true;
                    }
                }
                '\\' => {
                    self.bump();
                    if !self.at_newline() {
                        return Err(
                            self.error("unexpected character after line continuation character")
                        );
                    }
                    self.bump_newline();
                    if self.peek().is_none() {
                        return Err(self.error("unexpected EOF while parsing"));
                    }
                }
                '\'' | '"' => {
                    let token = self.read_string("")?;
                    self.push(TokenKind::Str(token), line, column);
                }
                c if c.is_ascii_digit() => {
                    let number = self.read_number()?;
                    self.push(TokenKind::Number(number), line, column);
                }
                '.' if self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) => {
                    let number = self.read_number()?;
                    self.push(TokenKind::Number(number), line, column);
                }
                c if is_ident_start(c) => {
                    let name = self.read_name();
                    if matches!(self.peek(), Some('\'' | '"'))
                        && STRING_PREFIXES.contains(&name.to_ascii_lowercase().as_str())
                    {
                        let token = self.read_string(&name.to_ascii_lowercase())?;
                        self.push(TokenKind::Str(token), line, column);
                    } else {
                        self.push(TokenKind::Name(name), line, column);
                    }
                }
                _ => {
                    let op = self.read_operator()?;
                    self.push(TokenKind::Op(op), line, column);
                }
            }
        }

        if let Some(&(open, line, column)) = self.brackets.last() {
            return Err(ParseError::new(
                format!("'{open}' was never closed"),
                line,
                column,
            ));
        }

        let (line, column) = (self.line, self.column);
        if !self.at_line_start {
            self.push(TokenKind::Newline, line, column);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, line, column);
        }
        self.push(TokenKind::EndMarker, line, column);
        Ok(self.tokens)
    }

    /// Leading whitespace measured twice: tabs to the next multiple of 8,
    /// and tabs as a single column
    fn read_indent(&mut self) -> (usize, usize) {
        let (mut width, mut alt) = (0, 0);
        loop {
            match self.peek() {
                Some(' ') => {
                    width += 1;
                    alt += 1;
                }
                Some('\t') => {
                    width = (width / 8 + 1) * 8;
                    alt += 1;
                }
                Some('\x0c') => (width, alt) = (0, 0),
                _ => return (width, alt),
            }
            self.bump();
        }
    }

    /// Emit INDENT/DEDENT for a new logical line.
    ///
    /// Both measures must order the line against the stack the same way,
    /// otherwise its meaning depends on the tab size.
    fn indent_to(&mut self, (width, alt): (usize, usize)) -> Result<(), ParseError> {
        let (line, column) = (self.line, self.column);
        let (current, current_alt) = self.indents.last().copied().unwrap_or((0, 0));
        if width > current {
            if alt <= current_alt {
                return Err(self.error("inconsistent use of tabs and spaces in indentation"));
            }
            if self.indents.len() >= MAX_INDENT_LEVELS {
                return Err(self.error("too many levels of indentation"));
            }
            self.indents.push((width, alt));
            self.push(TokenKind::Indent, line, column);
            return Ok(());
        }
        while width < self.indents.last().map_or(0, |level| level.0) {
            self.indents.pop();
            self.push(TokenKind::Dedent, line, column);
        }
        let (current, current_alt) = self.indents.last().copied().unwrap_or((0, 0));
        if current != width {
            return Err(self.error("unindent does not match any outer indentation level"));
        }
        if current_alt != alt {
            return Err(self.error("inconsistent use of tabs and spaces in indentation"));
        }
        Ok(())
    }

    fn read_name(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if !is_ident_continue(c) {
                break;
            }
            name.push(c);
            self.bump();
        }
        name
    }

    fn read_number(&mut self) -> Result<String, ParseError> {
        let mut text = String::new();
        let radix_prefix = self.peek() == Some('0')
            && matches!(self.peek_at(1), Some('x' | 'X' | 'o' | 'O' | 'b' | 'B'));

        if radix_prefix {
            for _ in 0..2 {
                text.extend(self.bump());
            }
            while let Some(c) = self.peek() {
                if !(c.is_ascii_hexdigit() || c == '_') {
                    break;
                }
                text.push(c);
                self.bump();
            }
        } else {
            self.read_digits(&mut text);
            if self.peek() == Some('.') {
                text.extend(self.bump());
                self.read_digits(&mut text);
            }
            if matches!(self.peek(), Some('e' | 'E')) {
                let signed = matches!(self.peek_at(1), Some('+' | '-'));
                let digit_at = if signed { 2 } else { 1 };
                if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                    text.extend(self.bump());
                    if signed {
                        text.extend(self.bump());
                    }
                    self.read_digits(&mut text);
                }
            }
            if matches!(self.peek(), Some('j' | 'J')) {
                text.extend(self.bump());
            }
        }

        if self.peek().is_some_and(is_ident_continue) {
            return Err(self.error("invalid decimal literal"));
        }
        Ok(text)
    }

    fn read_digits(&mut self, text: &mut String) {
        while let Some(c) = self.peek() {
            if !(c.is_ascii_digit() || c == '_') {
                break;
            }
            text.push(c);
            self.bump();
        }
    }

    fn read_string(&mut self, prefix: &str) -> Result<StrToken, ParseError> {
        let (line, column) = (self.line, self.column);
        let Some(quote) = self.bump() else {
            return Err(self.error("unterminated string literal"));
        };
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut body = String::new();
        loop {
            let Some(c) = self.bump() else {
                let message = if triple {
                    "unterminated triple-quoted string literal"
                } else {
                    "unterminated string literal"
                };
                return Err(ParseError::new(message, line, column));
            };
            match c {
                '\\' => {
                    let Some(escaped) = self.bump() else {
                        return Err(ParseError::new("unterminated string literal", line, column));
                    };
                    body.push('\\');
                    body.push(escaped);
                }
                c if c == quote => {
                    if !triple {
                        break;
                    }
                    if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                        self.bump();
                        self.bump();
                        break;
                    }
                    body.push(c);
                }
                '\n' | '\r' if !triple => {
                    return Err(ParseError::new("unterminated string literal", line, column));
                }
                c => body.push(c),
            }
        }

        let raw = prefix.contains('r');
        let bytes = prefix.contains('b');
        let formatted = prefix.contains('f');
        let unicode = prefix.contains('u');
        if bytes && !body.is_ascii() {
            return Err(ParseError::new(
                "bytes can only contain ASCII literal characters",
                line,
                column,
            ));
        }
        // f-string bodies are split into fields before escapes are processed
        let value = if raw || formatted {
            body.clone()
        } else {
            unescape(&body, bytes).map_err(|message| ParseError::new(message, line, column))?
        };

        Ok(StrToken {
            body,
            value,
            raw,
            bytes,
            formatted,
            unicode,
        })
    }

    fn read_operator(&mut self) -> Result<&'static str, ParseError> {
        let (line, column) = (self.line, self.column);
        let rest: String = self.chars[self.pos..].iter().take(3).collect();
        let Some(op) = OPERATORS.iter().copied().find(|op| rest.starts_with(op)) else {
            let c = self.peek().unwrap_or_default();
            return Err(self.error(format!("invalid character '{c}' (U+{:04X})", c as u32)));
        };
        for _ in 0..op.chars().count() {
            self.bump();
        }

        match op {
            "(" | "[" | "{" => {
                if self.brackets.len() >= MAX_BRACKET_DEPTH {
                    return Err(ParseError::new("too many nested parentheses", line, column));
                }
                let open = op.chars().next().unwrap_or('(');
                self.brackets.push((open, line, column));
            }
            ")" | "]" | "}" => {
                let close = op.chars().next().unwrap_or(')');
                match self.brackets.pop() {
                    None => {
                        return Err(ParseError::new(format!("unmatched '{close}'"), line, column));
                    }
                    Some((open, ..)) if matching(open) != close => {
                        return Err(ParseError::new(
                            format!(
                                "closing parenthesis '{close}' does not match opening parenthesis '{open}'"
                            ),
                            line,
                            column,
                        ));
                    }
                    Some(_) => {}
                }
            }
            _ => {}
        }
        Ok(op)
    }
}

const fn matching(open: char) -> char {
    match open {
        '[' => ']',
        '{' => '}',
        _ => ')',
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

/// Process backslash escapes in a non-raw literal body
pub fn unescape(body: &str, bytes: bool) -> Result<String, String> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(escaped) = chars.next() else {
            out.push('\\');
            break;
        };
        match escaped {
            '\n' => {}
            '\r' => {
                chars.next_if_eq(&'\n');
            }
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\x0b'),
            '0'..='7' => {
                let mut code = escaped.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(digit) => {
                            code = code * 8 + digit;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.extend(char::from_u32(code));
            }
            'x' => push_hex_escape(&mut out, &mut chars, 2, 'x'),
            'u' if !bytes => push_hex_escape(&mut out, &mut chars, 4, 'u'),
            'U' if !bytes => push_hex_escape(&mut out, &mut chars, 8, 'U'),
            'N' if !bytes => out.push(named_escape(&mut chars)?),
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

/// `\N{NAME}` after the `N`
fn named_escape(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<char, String> {
    const MALFORMED: &str = "(unicode error) malformed \\N character escape";
    if chars.next_if_eq(&'{').is_none() {
        return Err(MALFORMED.into());
    }
    let mut name = String::new();
    loop {
        match chars.next() {
            Some('}') => break,
            Some(c) => name.push(c),
            None => return Err(MALFORMED.into()),
        }
    }
    unicode_names2::character(&name)
        .ok_or_else(|| format!("(unicode error) unknown Unicode character name {name:?}"))
}

fn push_hex_escape(
    out: &mut String,
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    digits: usize,
    marker: char,
) {
    let mut hex = String::new();
    for _ in 0..digits {
        match chars.peek() {
            Some(d) if d.is_ascii_hexdigit() => {
                hex.push(*d);
                chars.next();
            }
            _ => break,
        }
    }
    match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
        Some(c) if hex.len() == digits => out.push(c),
        _ => {
            out.push('\\');
            out.push(marker);
            out.push_str(&hex);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    fn name(s: &str) -> TokenKind {
        TokenKind::Name(s.into())
    }

    #[test]
    fn indentation_produces_indent_and_dedent() {
        let tokens = kinds("if x:\n    y = 2\nz\n");
        assert_eq!(
            tokens,
            vec![
                name("if"),
                name("x"),
                TokenKind::Op(":"),
                TokenKind::Newline,
                TokenKind::Indent,
                name("y"),
                TokenKind::Op("="),
                TokenKind::Number("2".into()),
                TokenKind::Newline,
                TokenKind::Dedent,
                name("z"),
                TokenKind::Newline,
                TokenKind::EndMarker,
            ]
        );
    }

    #[test]
    fn blank_and_comment_lines_are_ignored() {
        let tokens = kinds("a\n\n   # note\n\t\nb");
        assert_eq!(
            tokens,
            vec![
                name("a"),
                TokenKind::Newline,
                name("b"),
                TokenKind::Newline,
                TokenKind::EndMarker
            ]
        );
    }

    #[test]
    fn newlines_inside_brackets_are_joined() {
        let tokens = tokenize("f(1,\n  2)\nx").unwrap();
        let newline_count = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Newline)
            .count();
        assert_eq!(newline_count, 2);
        assert_eq!(tokens.last().unwrap().kind, TokenKind::EndMarker);
        let x = tokens.iter().find(|t| t.kind == name("x")).unwrap();
        assert_eq!(x.line, 3);
    }

    #[test]
    fn strings_with_prefixes_and_escapes() {
        let tokens = kinds(r#"s = 'a\n' + r"\d" + b'\x41' + f"{x}""#);
        let strings: Vec<StrToken> = tokens
            .into_iter()
            .filter_map(|kind| match kind {
                TokenKind::Str(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(strings[0].value, "a\n");
        assert_eq!(strings[1].value, "\\d");
        assert!(strings[2].bytes);
        assert_eq!(strings[2].value, "A");
        assert!(strings[3].formatted);
        assert_eq!(strings[3].body, "{x}");
    }

    #[test]
    fn triple_quoted_strings_span_lines() {
        let tokens = tokenize("doc = \"\"\"one\ntwo\"\"\"\nnext").unwrap();
        let next = tokens.iter().find(|t| t.kind == name("next")).unwrap();
        assert_eq!(next.line, 3);
    }

    #[test]
    fn longest_operator_wins() {
        assert_eq!(
            kinds("a **= b // c")[1..4],
            [TokenKind::Op("**="), name("b"), TokenKind::Op("//")]
        );
    }

    #[test]
    fn numbers_in_every_form() {
        let tokens = kinds("0x1F 1_000 3.14 1e-3 .5 2j");
        let numbers: Vec<String> = tokens
            .into_iter()
            .filter_map(|kind| match kind {
                TokenKind::Number(n) => Some(n),
                _ => None,
            })
            .collect();
        assert_eq!(numbers, ["0x1F", "1_000", "3.14", "1e-3", ".5", "2j"]);
    }

    #[test]
    fn errors_carry_positions() {
        let err = tokenize("x = 'open\n").unwrap_err();
        assert_eq!((err.line, err.column), (1, 5));

        let err = tokenize("if x:\n        a\n    b\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("unindent"));

        let err = tokenize("f(1, 2\n").unwrap_err();
        assert!(err.message.contains("never closed"));

        let err = tokenize("x = (1]").unwrap_err();
        assert!(err.message.contains("does not match"));

        assert!(tokenize("int x = 1;$").is_err());
    }

    #[test]
    fn bracket_nesting_is_capped_at_two_hundred() {
        let fits = format!("x = {}1{}", "(".repeat(200), ")".repeat(200));
        assert!(tokenize(&fits).is_ok());

        let deep = format!("x = {}1{}", "[".repeat(201), "]".repeat(201));
        let err = tokenize(&deep).unwrap_err();
        assert_eq!(err.message, "too many nested parentheses");
        assert_eq!((err.line, err.column), (1, 205));
    }

    #[test]
    fn indentation_is_capped_at_one_hundred_levels() {
        let nest = |levels: usize| -> String {
            (0..levels)
                .map(|level| format!("{}if x:\n", " ".repeat(level)))
                .chain(std::iter::once(format!("{}pass\n", " ".repeat(levels))))
                .collect()
        };
        assert!(tokenize(&nest(99)).is_ok());

        let err = tokenize(&nest(100)).unwrap_err();
        assert_eq!(err.message, "too many levels of indentation");
        assert_eq!(err.line, 101);
    }

    #[test]
    fn tab_width_must_not_change_the_meaning() {
        let err = tokenize("if x:\n\ty = 1\n        z = 2\n").unwrap_err();
        assert_eq!(err.message, "inconsistent use of tabs and spaces in indentation");
        assert_eq!(err.line, 3);

        let err = tokenize("if x:\n        y = 1\n\tz = 2\n").unwrap_err();
        assert!(err.message.contains("inconsistent"));

        // Tabs used the same way on every line are fine.
        assert!(tokenize("if x:\n\ty = 1\n\tif y:\n\t\tz = 2\n").is_ok());
        assert!(tokenize("if x:\n  \ty = 1\n  \tz = 2\n").is_ok());
    }

    #[test]
    fn named_escapes_and_the_u_prefix() {
        let tokens = kinds(r"s = '\N{BULLET}\N{latin small letter a}' + u'x' + rb'\N'");
        let strings: Vec<StrToken> = tokens
            .into_iter()
            .filter_map(|kind| match kind {
                TokenKind::Str(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(strings[0].value, "\u{2022}a");
        assert!(!strings[0].unicode);
        assert!(strings[1].unicode);
        assert_eq!(strings[2].value, "\\N");

        let err = tokenize(r"s = '\N{NO SUCH CHARACTER}'").unwrap_err();
        assert!(err.message.contains("unknown Unicode character name"));
        assert_eq!((err.line, err.column), (1, 5));
        assert!(tokenize(r"s = '\N'").is_err());
    }
}
