use std::str::Chars;

use itertools::{PeekNth, peek_nth};
use once_cell::sync::Lazy;
use strum::EnumString;

use crate::{
    SourceFile,
    error::{CompileError, Result},
};

#[derive(Debug)]
pub struct Lexer<'source> {
    source: &'source SourceFile,
    position: usize,
    chars: PeekNth<Chars<'source>>,
    saw_newline: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// A line terminator appeared between the previous token and this one.
    /// Drives automatic semicolon insertion in the parser.
    pub newline_before: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /* Words */
    Keyword(Keyword), // function
    Identifier,       // foo

    /* Literals */
    NumberLiteral, // 1.5
    StringLiteral, // "hello"

    /* Delimiters */
    OpenParen,    // (
    CloseParen,   // )
    OpenBracket,  // [
    CloseBracket, // ]
    OpenBrace,    // {
    CloseBrace,   // }
    Semicolon,    // ;
    Comma,        // ,

    /* Other */
    Dot,          // .
    Ellipsis,     // ...
    Question,     // ?
    Colon,        // :
    Arrow,        // =>
    PlusPlus,     // ++
    MinusMinus,   // --

    /* Operators */
    Operator, // + - * / % ** << >> >>> & | ^ ! ~ == != === !== < <= > >=
    LogicalAnd,         // &&
    LogicalOr,          // ||
    NullishCoalescing,  // ??
    Assignment,         // = += -= ... ??=
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Keyword {
    Var,
    Let,
    Const,
    Function,
    Return,
    If,
    Else,
    While,
    Do,
    For,
    Break,
    Continue,
    Throw,
    Class,
    Extends,
    New,
    This,
    Typeof,
    Void,
    Delete,
    In,
    Instanceof,
    Import,
    Export,
    Default,
    True,
    False,
    Null,
    Static,
}

/// Punctuators ordered longest first so the first prefix match wins
static PUNCTUATORS: Lazy<Vec<(&'static str, TokenKind)>> = Lazy::new(|| {
    let mut table = vec![
        (">>>=", TokenKind::Assignment),
        ("...", TokenKind::Ellipsis),
        ("===", TokenKind::Operator),
        ("!==", TokenKind::Operator),
        ("**=", TokenKind::Assignment),
        ("<<=", TokenKind::Assignment),
        (">>=", TokenKind::Assignment),
        (">>>", TokenKind::Operator),
        ("&&=", TokenKind::Assignment),
        ("||=", TokenKind::Assignment),
        ("??=", TokenKind::Assignment),
        ("=>", TokenKind::Arrow),
        ("==", TokenKind::Operator),
        ("!=", TokenKind::Operator),
        ("<=", TokenKind::Operator),
        (">=", TokenKind::Operator),
        ("&&", TokenKind::LogicalAnd),
        ("||", TokenKind::LogicalOr),
        ("??", TokenKind::NullishCoalescing),
        ("++", TokenKind::PlusPlus),
        ("--", TokenKind::MinusMinus),
        ("+=", TokenKind::Assignment),
        ("-=", TokenKind::Assignment),
        ("*=", TokenKind::Assignment),
        ("/=", TokenKind::Assignment),
        ("%=", TokenKind::Assignment),
        ("&=", TokenKind::Assignment),
        ("|=", TokenKind::Assignment),
        ("^=", TokenKind::Assignment),
        ("**", TokenKind::Operator),
        ("<<", TokenKind::Operator),
        (">>", TokenKind::Operator),
        ("(", TokenKind::OpenParen),
        (")", TokenKind::CloseParen),
        ("[", TokenKind::OpenBracket),
        ("]", TokenKind::CloseBracket),
        ("{", TokenKind::OpenBrace),
        ("}", TokenKind::CloseBrace),
        (";", TokenKind::Semicolon),
        (",", TokenKind::Comma),
        (".", TokenKind::Dot),
        ("?", TokenKind::Question),
        (":", TokenKind::Colon),
        ("=", TokenKind::Assignment),
    ];

    for op in ["+", "-", "*", "/", "%", "&", "|", "^", "!", "~", "<", ">"] {
        table.push((op, TokenKind::Operator));
    }

    table.sort_by_key(|(text, _)| std::cmp::Reverse(text.len()));
    table
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn to(self, other: Span) -> Span {
        Span::new(self.start, other.end)
    }
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source SourceFile) -> Self {
        Self {
            source,
            chars: peek_nth(source.contents.chars()),
            position: 0,
            saw_newline: false,
        }
    }

    /// Lexes the entire source file up front
    pub fn tokenize(source: &'source SourceFile) -> Result<Vec<Token>> {
        let mut lexer = Self::new(source);
        let mut tokens = Vec::new();

        while let Some(token) = lexer.next()? {
            tokens.push(token);
        }

        Ok(tokens)
    }

    fn error(&self, message: String) -> CompileError {
        let (line, column) = self.source.line_and_column(self.position);

        CompileError::Syntax {
            message,
            origin: self.source.origin.to_string(),
            line,
            column,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.position += c.len_utf8();
        Some(c)
    }

    fn peek_is(&mut self, n: usize, expected: char) -> bool {
        self.chars.peek_nth(n).is_some_and(|c| *c == expected)
    }

    fn ignore_whitespace(&mut self) {
        while let Some(c) = self.chars.peek().copied() {
            if !c.is_whitespace() {
                break;
            }

            if c == '\n' {
                self.saw_newline = true;
            }

            self.bump();
        }
    }

    fn ignore_line(&mut self) {
        while let Some(c) = self.chars.peek().copied() {
            if c == '\n' {
                break;
            }

            self.bump();
        }
    }

    fn ignore_block_comment(&mut self) -> Result<()> {
        // Consume the opening `/*`
        self.bump();
        self.bump();

        loop {
            match self.bump() {
                Some('*') if self.peek_is(0, '/') => {
                    self.bump();
                    return Ok(());
                }
                Some('\n') => self.saw_newline = true,
                Some(_) => {}
                None => return Err(self.error("unterminated block comment".to_owned())),
            }
        }
    }

    fn read_wrapped_escapable(&mut self, wrapper: char) -> Result<TokenKind> {
        // Consume first wrapper
        self.bump();

        while let Some(c) = self.chars.peek().copied() {
            if c == '\n' {
                return Err(self.error("reached end of line while reading string literal".into()));
            }

            self.bump();

            // Skip whatever is escaped, including the wrapper itself
            if c == '\\' {
                self.bump();
                continue;
            }

            if c == wrapper {
                return Ok(TokenKind::StringLiteral);
            }
        }

        Err(self.error("reached end of file while reading string literal".into()))
    }

    // Keyword or identifier
    fn read_word(&mut self, start_position: usize) -> TokenKind {
        while let Some(c) = self.chars.peek().copied() {
            if !(c.is_alphanumeric() || c == '_' || c == '$') {
                break;
            }

            self.bump();
        }

        let value = &self.source.contents[start_position..self.position];

        match value.parse() {
            Ok(keyword) => TokenKind::Keyword(keyword),
            Err(_) => TokenKind::Identifier,
        }
    }

    fn read_number(&mut self) -> Result<TokenKind> {
        if self.peek_is(0, '0')
            && self
                .chars
                .peek_nth(1)
                .is_some_and(|c| matches!(c, 'x' | 'X' | 'b' | 'B' | 'o' | 'O'))
        {
            self.bump();
            self.bump();

            while self.chars.peek().is_some_and(|c| c.is_ascii_alphanumeric()) {
                self.bump();
            }

            return Ok(TokenKind::NumberLiteral);
        }

        let mut seen_dot = false;
        let mut seen_exponent = false;

        while let Some(c) = self.chars.peek().copied() {
            match c {
                '0'..='9' | '_' => {}
                '.' if !seen_dot && !seen_exponent => seen_dot = true,
                'e' | 'E' if !seen_exponent => {
                    seen_exponent = true;

                    if self.chars.peek_nth(1).is_some_and(|c| *c == '+' || *c == '-') {
                        self.bump();
                    }
                }
                _ => break,
            }

            self.bump();
        }

        if self
            .chars
            .peek()
            .is_some_and(|c| c.is_alphabetic() || *c == '_' || *c == '$')
        {
            return Err(self.error("identifier starts immediately after numeric literal".into()));
        }

        Ok(TokenKind::NumberLiteral)
    }

    fn read_punctuator(&mut self) -> Option<TokenKind> {
        let rest = &self.source.contents[self.position..];
        let (text, kind) = PUNCTUATORS.iter().find(|(text, _)| rest.starts_with(text))?;

        for _ in 0..text.len() {
            self.bump();
        }

        Some(*kind)
    }

    pub fn next(&mut self) -> Result<Option<Token>> {
        while let Some(c) = self.chars.peek().copied() {
            let start_position = self.position;

            let kind = match c {
                // Ignore whitespace
                c if c.is_whitespace() => {
                    self.ignore_whitespace();
                    continue;
                }
                // Ignore comments
                '/' if self.peek_is(1, '/') => {
                    self.ignore_line();
                    continue;
                }
                '/' if self.peek_is(1, '*') => {
                    self.ignore_block_comment()?;
                    continue;
                }

                // String literals
                '"' | '\'' => self.read_wrapped_escapable(c)?,
                '`' => return Err(self.error("template literals are not supported".into())),

                // Number literals
                n if n.is_ascii_digit() => self.read_number()?,
                '.' if self.chars.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) => {
                    self.read_number()?
                }

                // Identifiers and keywords
                a if a.is_alphabetic() || a == '_' || a == '$' => self.read_word(start_position),

                _ => match self.read_punctuator() {
                    Some(kind) => kind,
                    None => return Err(self.error(format!("unexpected character `{c}`"))),
                },
            };

            let newline_before = std::mem::take(&mut self.saw_newline);

            return Ok(Some(Token {
                kind,
                span: Span::new(start_position, self.position),
                newline_before,
            }));
        }

        Ok(None)
    }
}

/// Decodes the raw text of a string literal token (including its quotes)
pub fn decode_string_literal(raw: &str) -> String {
    let inner = &raw[1..raw.len().saturating_sub(1).max(1)];
    let mut decoded = String::with_capacity(inner.len());
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            decoded.push(c);
            continue;
        }

        match chars.next() {
            Some('n') => decoded.push('\n'),
            Some('t') => decoded.push('\t'),
            Some('r') => decoded.push('\r'),
            Some('0') => decoded.push('\0'),
            Some('b') => decoded.push('\u{8}'),
            Some('f') => decoded.push('\u{c}'),
            Some('v') => decoded.push('\u{b}'),
            Some('u') => {
                let hex = chars.by_ref().take(4).collect::<String>();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(c) => decoded.push(c),
                    None => decoded.push_str(&hex),
                }
            }
            Some('x') => {
                let hex = chars.by_ref().take(2).collect::<String>();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(c) => decoded.push(c),
                    None => decoded.push_str(&hex),
                }
            }
            Some(other) => decoded.push(other),
            None => {}
        }
    }

    decoded
}

/// Parses the raw text of a numeric literal token
pub fn parse_number_literal(raw: &str) -> Option<f64> {
    let raw = raw.replace('_', "");
    let lower = raw.to_ascii_lowercase();

    let radix = match lower.get(..2) {
        Some("0x") => 16,
        Some("0b") => 2,
        Some("0o") => 8,
        _ => return raw.parse().ok(),
    };

    u64::from_str_radix(&raw[2..], radix).ok().map(|n| n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let source = SourceFile::from_memory(source);
        Lexer::tokenize(&source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn longest_punctuator_wins() {
        assert_eq!(
            kinds("a >>>= b === c"),
            vec![
                TokenKind::Identifier,
                TokenKind::Assignment,
                TokenKind::Identifier,
                TokenKind::Operator,
                TokenKind::Identifier,
            ]
        );
        assert_eq!(
            kinds("(...xs) => x ?? y"),
            vec![
                TokenKind::OpenParen,
                TokenKind::Ellipsis,
                TokenKind::Identifier,
                TokenKind::CloseParen,
                TokenKind::Arrow,
                TokenKind::Identifier,
                TokenKind::NullishCoalescing,
                TokenKind::Identifier,
            ]
        );
    }

    #[test]
    fn comments_are_skipped_and_newlines_recorded() {
        let source = SourceFile::from_memory("let a // trailing\n/* block\n */ b");
        let tokens = Lexer::tokenize(&source).unwrap();

        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::Let));
        assert!(!tokens[1].newline_before);
        assert!(tokens[2].newline_before);
    }

    #[test]
    fn literals() {
        assert_eq!(decode_string_literal(r#""a\nb\"c""#), "a\nb\"c");
        assert_eq!(decode_string_literal(r"'A'"), "A");
        assert_eq!(parse_number_literal("0xff"), Some(255.0));
        assert_eq!(parse_number_literal("1e3"), Some(1000.0));
        assert_eq!(parse_number_literal(".5"), Some(0.5));
    }

    #[test]
    fn unterminated_string_is_a_syntax_error() {
        let source = SourceFile::from_memory("let s = 'abc\n';");
        let error = Lexer::tokenize(&source).unwrap_err();

        assert!(matches!(error, CompileError::Syntax { line: 1, .. }));
    }
}
