//! Splitting f-string bodies into literal text and replacement fields
//!
//! The scanner only finds field boundaries. Expressions are handed back as
//! source text for the parser, and literal escapes are left for the caller.

/// Open brackets allowed inside one replacement field
const MAX_FIELD_BRACKETS: usize = 200;

/// Replacement fields inside format specs may nest this deep
const MAX_SPEC_NESTING: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Piece {
    /// Text with `{{`/`}}` collapsed and escapes still unprocessed
    Literal(String),
    Field(Field),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Expression source between the brace and the first `=`, `!`, `:` or `}`
    pub expression: String,
    /// `expression=` as written, trailing whitespace included, for `{x=}`
    pub debug: Option<String>,
    pub conversion: Option<char>,
    pub spec: Option<Vec<Piece>>,
}

/// Split an f-string body as written between its quotes
pub fn split(body: &str, raw: bool) -> Result<Vec<Piece>, String> {
    let mut scanner = Scanner {
        chars: body.chars().collect(),
        pos: 0,
        raw,
    };
    scanner.pieces(0)
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    raw: bool,
}

impl Scanner {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    /// Literal text and fields up to the end of the body, or up to the `}`
    /// that closes the enclosing format spec
    fn pieces(&mut self, nesting: usize) -> Result<Vec<Piece>, String> {
        let mut pieces = Vec::new();
        let mut literal = String::new();

        while let Some(c) = self.peek() {
            match c {
                '{' if self.peek_at(1) == Some('{') => {
                    literal.push('{');
                    self.pos += 2;
                }
                '}' if nesting > 0 => break,
                '}' if self.peek_at(1) == Some('}') => {
                    literal.push('}');
                    self.pos += 2;
                }
                '}' => return Err("f-string: single '}' is not allowed".into()),
                '{' => {
                    if !literal.is_empty() {
                        pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                    }
                    pieces.push(Piece::Field(self.field(nesting)?));
                }
                '\\' if !self.raw => {
                    literal.push('\\');
                    self.pos += 1;
                    match self.peek() {
                        // The braces of `\N{...}` belong to the escape
                        Some('N') if self.peek_at(1) == Some('{') => {
                            while let Some(c) = self.peek() {
                                literal.push(c);
                                self.pos += 1;
                                if c == '}' {
                                    break;
                                }
                            }
                        }
                        Some(next) if next != '{' && next != '}' => {
                            literal.push(next);
                            self.pos += 1;
                        }
                        _ => {}
                    }
                }
                c => {
                    literal.push(c);
                    self.pos += 1;
                }
            }
        }

        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }
        Ok(pieces)
    }

    /// One replacement field, entered on its `{`
    fn field(&mut self, nesting: usize) -> Result<Field, String> {
        if nesting >= MAX_SPEC_NESTING {
            return Err("f-string: expressions nested too deeply".into());
        }
        self.pos += 1;
        let start = self.pos;
        let end = self.expression_end(start)?;
        let expression: String = self.chars[start..end].iter().collect();
        if expression.trim().is_empty() {
            return Err("f-string: empty expression not allowed".into());
        }

        let debug = if self.peek() == Some('=') {
            self.pos += 1;
            while self.peek().is_some_and(char::is_whitespace) {
                self.pos += 1;
            }
            Some(self.chars[start..self.pos].iter().collect())
        } else {
            None
        };

        let conversion = if self.peek() == Some('!') {
            self.pos += 1;
            match self.peek() {
                Some(c @ ('s' | 'r' | 'a')) if matches!(self.peek_at(1), Some(':' | '}')) => {
                    self.pos += 1;
                    Some(c)
                }
                _ => {
                    return Err(
                        "f-string: invalid conversion character: expected 's', 'r', or 'a'"
                            .into(),
                    );
                }
            }
        } else {
            None
        };

        let spec = if self.peek() == Some(':') {
            self.pos += 1;
            Some(self.pieces(nesting + 1)?)
        } else {
            None
        };

        if self.peek() != Some('}') {
            return Err("f-string: expecting '}'".into());
        }
        self.pos += 1;
        Ok(Field {
            expression,
            debug,
            conversion,
            spec,
        })
    }

    /// Scan past the expression text, stopping on the first top-level
    /// `=`, `!`, `:` or `}` that ends it
    fn expression_end(&mut self, start: usize) -> Result<usize, String> {
        let mut brackets: Vec<char> = Vec::new();
        let mut quote: Option<(char, bool)> = None;

        loop {
            let Some(c) = self.peek() else {
                return Err("f-string: expecting '}'".into());
            };

            if let Some((open, triple)) = quote {
                if c == '\\' {
                    return Err("f-string expression part cannot include a backslash".into());
                }
                let closes = c == open
                    && (!triple || (self.peek_at(1) == Some(open) && self.peek_at(2) == Some(open)));
                if closes {
                    self.pos += if triple { 3 } else { 1 };
                    quote = None;
                } else {
                    self.pos += 1;
                }
                continue;
            }

            match c {
                '\\' => {
                    return Err("f-string expression part cannot include a backslash".into());
                }
                '#' => return Err("f-string expression part cannot include '#'".into()),
                '\'' | '"' => {
                    let triple = self.peek_at(1) == Some(c) && self.peek_at(2) == Some(c);
                    quote = Some((c, triple));
                    self.pos += if triple { 3 } else { 1 };
                }
                '(' | '[' | '{' => {
                    if brackets.len() >= MAX_FIELD_BRACKETS {
                        return Err("f-string: too many nested parenthesis".into());
                    }
                    brackets.push(c);
                    self.pos += 1;
                }
                ')' | ']' | '}' => match brackets.pop() {
                    None if c == '}' => return Ok(self.pos),
                    None => return Err(format!("f-string: unmatched '{c}'")),
                    Some(open) if closing(open) != c => {
                        return Err(format!(
                            "f-string: closing parenthesis '{c}' does not match opening parenthesis '{open}'"
                        ));
                    }
                    Some(_) => self.pos += 1,
                },
                '!' if brackets.is_empty() && self.peek_at(1) != Some('=') => return Ok(self.pos),
                ':' if brackets.is_empty() => return Ok(self.pos),
                '=' if brackets.is_empty() => {
                    let after_operator = self.pos > start
                        && matches!(self.chars[self.pos - 1], '=' | '!' | '<' | '>');
                    if self.peek_at(1) == Some('=') {
                        self.pos += 2;
                    } else if after_operator {
                        self.pos += 1;
                    } else {
                        return Ok(self.pos);
                    }
                }
                _ => self.pos += 1,
            }
        }
    }
}

const fn closing(open: char) -> char {
    match open {
        '[' => ']',
        '{' => '}',
        _ => ')',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(expression: &str) -> Field {
        Field {
            expression: expression.into(),
            debug: None,
            conversion: None,
            spec: None,
        }
    }

    #[test]
    fn literals_and_fields_alternate() {
        assert_eq!(
            split("a{x}b{{c}}", false).unwrap(),
            vec![
                Piece::Literal("a".into()),
                Piece::Field(field("x")),
                Piece::Literal("b{c}".into()),
            ]
        );
    }

    #[test]
    fn conversion_spec_and_debug_text() {
        let pieces = split("{ value = !r:>{width}}", false).unwrap();
        let [Piece::Field(found)] = pieces.as_slice() else {
            panic!("expected one field: {pieces:?}");
        };
        assert_eq!(found.expression, " value ");
        assert_eq!(found.debug.as_deref(), Some(" value = "));
        assert_eq!(found.conversion, Some('r'));
        assert_eq!(
            found.spec,
            Some(vec![Piece::Literal(">".into()), Piece::Field(field("width"))])
        );
    }

    #[test]
    fn operators_inside_the_expression_do_not_end_it() {
        let pieces = split("{a != b}{c == d}{e <= f}{g[1:2]}{h['}']}", false).unwrap();
        let expressions: Vec<&str> = pieces
            .iter()
            .filter_map(|piece| match piece {
                Piece::Field(f) => Some(f.expression.as_str()),
                Piece::Literal(_) => None,
            })
            .collect();
        assert_eq!(expressions, ["a != b", "c == d", "e <= f", "g[1:2]", "h['}']"]);
    }

    #[test]
    fn named_escapes_keep_their_braces() {
        assert_eq!(
            split(r"\N{BULLET} {x}", false).unwrap()[0],
            Piece::Literal(r"\N{BULLET} ".into())
        );
        assert_eq!(
            split(r"\{x}", true).unwrap(),
            vec![Piece::Literal("\\".into()), Piece::Field(field("x"))]
        );
    }

    #[test]
    fn malformed_bodies_are_rejected() {
        for (body, message) in [
            ("}", "single '}'"),
            ("{}", "empty expression"),
            ("{x", "expecting '}'"),
            ("{x!z}", "invalid conversion character"),
            ("{x#}", "cannot include '#'"),
            ("{'\\n'}", "backslash"),
            ("{x:{y:{z}}}", "nested too deeply"),
            ("{a)}", "unmatched ')'"),
        ] {
            let err = split(body, false).unwrap_err();
            assert!(err.contains(message), "{body:?} gave {err:?}");
        }
    }
}
