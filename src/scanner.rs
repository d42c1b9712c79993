use std::{iter::Peekable, str::Chars};
use strum_macros::{Display, EnumString};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
pub enum TokenType {
    // Single-character tokens.
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Slash,
    Star,

    // One or two character tokens.
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,

    // Literals.
    Identifier,
    String,
    Number,

    // Keywords.
    And,
    Class,
    Else,
    False,
    For,
    Fun,
    If,
    Nil,
    Or,
    Print,
    Return,
    Super,
    This,
    True,
    Var,
    While,

    Error,
    Eof,
}

static KEYWORDS: phf::Map<&'static str, TokenType> = phf::phf_map! {
    "and" => TokenType::And,
    "class" => TokenType::Class,
    "else" => TokenType::Else,
    "false" => TokenType::False,
    "for" => TokenType::For,
    "fun" => TokenType::Fun,
    "if" => TokenType::If,
    "nil" => TokenType::Nil,
    "or" => TokenType::Or,
    "print" => TokenType::Print,
    "return" => TokenType::Return,
    "super" => TokenType::Super,
    "this" => TokenType::This,
    "true" => TokenType::True,
    "var" => TokenType::Var,
    "while" => TokenType::While,
};

#[derive(Debug, Clone)]
pub struct Token<'a> {
    pub token_type: TokenType,
    pub value: &'a str,
    pub line: i32,
}

impl<'a> Token<'a> {
    pub fn synthetic(token_type: TokenType, value: &'a str) -> Token<'a> {
        Token { token_type, value, line: 0 }
    }
}

pub struct Scanner<'a> {
    source: &'a str,
    chars: Peekable<Chars<'a>>,
    start: usize,
    current: usize,
    line: i32,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Box<Scanner<'a>> {
        Box::new(Scanner {
            source,
            chars: source.chars().peekable(),
            start: 0,
            current: 0,
            line: 1,
        })
    }

    pub fn scan_token(&mut self) -> Token<'a> {
        self.skip_whitespace();
        self.start = self.current;

        if self.is_end() {
            return self.make_token(TokenType::Eof);
        }

        let c = self.advance();

        if Self::is_alpha(c) {
            return self.make_identifier_token();
        }

        if Self::is_digit(c) {
            return self.make_number_token();
        }

        match c {
            '(' => self.make_token(TokenType::LeftParen),
            ')' => self.make_token(TokenType::RightParen),
            '{' => self.make_token(TokenType::LeftBrace),
            '}' => self.make_token(TokenType::RightBrace),
            ';' => self.make_token(TokenType::Semicolon),
            ',' => self.make_token(TokenType::Comma),
            '.' => self.make_token(TokenType::Dot),
            '-' => self.make_token(TokenType::Minus),
            '+' => self.make_token(TokenType::Plus),
            '/' => self.make_token(TokenType::Slash),
            '*' => self.make_token(TokenType::Star),
            '"' => self.make_string_token(),
            '!' => {
                if self.match_char('=') {
                    self.make_token(TokenType::BangEqual)
                } else {
                    self.make_token(TokenType::Bang)
                }
            }
            '=' => {
                if self.match_char('=') {
                    self.make_token(TokenType::EqualEqual)
                } else {
                    self.make_token(TokenType::Equal)
                }
            }
            '<' => {
                if self.match_char('=') {
                    self.make_token(TokenType::LessEqual)
                } else {
                    self.make_token(TokenType::Less)
                }
            }
            '>' => {
                if self.match_char('=') {
                    self.make_token(TokenType::GreaterEqual)
                } else {
                    self.make_token(TokenType::Greater)
                }
            }
            _ => self.error_token("Unexpected character."),
        }
    }

    fn is_digit(ch: char) -> bool {
        ch.is_ascii_digit()
    }

    fn is_alpha(ch: char) -> bool {
        ch.is_ascii_alphabetic() || ch == '_'
    }

    fn make_identifier_token(&mut self) -> Token<'a> {
        loop {
            match self.peek() {
                Some(c) if Self::is_alpha(*c) || Self::is_digit(*c) => self.advance(),
                _ => break,
            };
        }

        let lexeme = &self.source[self.start..self.current];
        let token_type = KEYWORDS
            .get(lexeme)
            .copied()
            .unwrap_or(TokenType::Identifier);
        self.make_token(token_type)
    }

    fn make_number_token(&mut self) -> Token<'a> {
        loop {
            match self.peek() {
                Some(c) if Self::is_digit(*c) => self.advance(),
                _ => break,
            };
        }

        // An optional fractional part, only when a digit follows the dot.
        if let Some('.') = self.peek().copied() {
            if let Some(c) = self.peek_next() {
                if Self::is_digit(c) {
                    self.advance();
                    loop {
                        match self.peek() {
                            Some(c) if Self::is_digit(*c) => self.advance(),
                            _ => break,
                        };
                    }
                }
            }
        }

        self.make_token(TokenType::Number)
    }

    fn make_string_token(&mut self) -> Token<'a> {
        loop {
            match self.peek().copied() {
                Some('"') => break,
                Some('\n') => {
                    self.line += 1;
                    self.advance();
                }
                Some(_) => {
                    self.advance();
                }
                None => return self.error_token("Unterminated string."),
            }
        }

        // The closing quote.
        self.advance();
        self.make_token(TokenType::String)
    }

    fn skip_whitespace(&mut self) {
        loop {
            match (self.peek().copied(), self.peek_next()) {
                (Some('\n'), _) => {
                    self.line += 1;
                    self.advance();
                }
                (Some(c), _) if c.is_whitespace() => {
                    self.advance();
                }
                (Some('/'), Some('/')) => {
                    while let Some(ch) = self.peek() {
                        if *ch == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => return,
            }
        }
    }

    fn peek(&mut self) -> Option<&char> {
        self.chars.peek()
    }

    fn peek_next(&self) -> Option<char> {
        let mut iter = self.chars.clone();
        iter.next();
        iter.next()
    }

    fn is_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn make_token(&self, token_type: TokenType) -> Token<'a> {
        Token {
            token_type,
            value: &self.source[self.start..self.current],
            line: self.line,
        }
    }

    fn error_token(&self, reason: &'static str) -> Token<'a> {
        Token {
            token_type: TokenType::Error,
            value: reason,
            line: self.line,
        }
    }

    fn match_char(&mut self, expected: char) -> bool {
        if let Some(&next_char) = self.chars.peek() {
            if next_char == expected {
                self.advance();
                return true;
            }
        }
        false
    }

    fn advance(&mut self) -> char {
        if let Some(next_char) = self.chars.next() {
            self.current += next_char.len_utf8();
            next_char
        } else {
            '\0'
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_all(source: &str) -> Vec<(TokenType, &str)> {
        let mut scanner = Scanner::new(source);
        let mut tokens = vec![];
        loop {
            let token = scanner.scan_token();
            if token.token_type == TokenType::Eof {
                break;
            }
            tokens.push((token.token_type, token.value));
        }
        tokens
    }

    #[test]
    fn test_keywords_and_identifiers() {
        let tokens = scan_all("this is for if fun fun1 forfor class super");
        assert_eq!(
            tokens,
            vec![
                (TokenType::This, "this"),
                (TokenType::Identifier, "is"),
                (TokenType::For, "for"),
                (TokenType::If, "if"),
                (TokenType::Fun, "fun"),
                (TokenType::Identifier, "fun1"),
                (TokenType::Identifier, "forfor"),
                (TokenType::Class, "class"),
                (TokenType::Super, "super"),
            ]
        );
    }

    #[test]
    fn test_two_char_operators() {
        let tokens = scan_all("! != = == < <= > >=");
        let kinds: Vec<TokenType> = tokens.iter().map(|(t, _)| *t).collect();
        assert_eq!(
            kinds,
            vec![
                TokenType::Bang,
                TokenType::BangEqual,
                TokenType::Equal,
                TokenType::EqualEqual,
                TokenType::Less,
                TokenType::LessEqual,
                TokenType::Greater,
                TokenType::GreaterEqual,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let tokens = scan_all("12 3.25 4. .5");
        assert_eq!(
            tokens,
            vec![
                (TokenType::Number, "12"),
                (TokenType::Number, "3.25"),
                (TokenType::Number, "4"),
                (TokenType::Dot, "."),
                (TokenType::Dot, "."),
                (TokenType::Number, "5"),
            ]
        );
    }

    #[test]
    fn test_string_literal_and_line_tracking() {
        let mut scanner = Scanner::new("\"one\ntwo\"\nx");
        let token = scanner.scan_token();
        assert_eq!(token.token_type, TokenType::String);
        assert_eq!(token.value, "\"one\ntwo\"");
        let token = scanner.scan_token();
        assert_eq!(token.token_type, TokenType::Identifier);
        assert_eq!(token.line, 3);
    }

    #[test]
    fn test_comments_are_skipped() {
        let tokens = scan_all("a // the rest is gone != ==\nb");
        assert_eq!(
            tokens,
            vec![(TokenType::Identifier, "a"), (TokenType::Identifier, "b")]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let mut scanner = Scanner::new("\"oops");
        let token = scanner.scan_token();
        assert_eq!(token.token_type, TokenType::Error);
        assert_eq!(token.value, "Unterminated string.");
    }
}
