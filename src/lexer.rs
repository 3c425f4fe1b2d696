//! Indentation-aware tokenizer.
//!
//! Tracks an indent stack and synthesizes `Indent`/`Dedent` tokens the way
//! Python does; logical newlines are suppressed inside open brackets and
//! after a trailing backslash.

use std::{iter::Peekable, str::CharIndices};

use thiserror::Error;

use crate::token::{Span, Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LexError {
    #[error("Unexpected character '{ch}' at line {line}, column {column}")]
    UnexpectedCharacter { ch: char, line: usize, column: usize },
    #[error("Unterminated string literal at line {line}, column {column}")]
    UnterminatedString { line: usize, column: usize },
    #[error("Invalid number literal '{text}' at line {line}, column {column}")]
    InvalidNumber {
        text: String,
        line: usize,
        column: usize,
    },
    #[error("Invalid dedent to {width} spaces at line {line}")]
    InconsistentDedent { width: usize, line: usize },
    #[error("Tabs are not supported for indentation at line {line}")]
    TabIndent { line: usize },
}

pub struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
    indent_stack: Vec<usize>,
    pending_tokens: Vec<Token>,
    bracket_depth: usize,
    at_line_start: bool,
    eof_reached: bool,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
            indent_stack: vec![0],
            pending_tokens: Vec::new(),
            bracket_depth: 0,
            at_line_start: true,
            eof_reached: false,
            line: 1,
            column: 0,
        }
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        if let Some(token) = self.pending_tokens.pop() {
            return Ok(token);
        }
        if self.eof_reached {
            return Ok(self.marker_token(TokenKind::Eof));
        }

        loop {
            if self.at_line_start {
                self.at_line_start = false;
                if let Some(token) = self.handle_indentation()? {
                    return Ok(token);
                }
            }

            self.skip_spaces();

            if let Some(&(_, '#')) = self.chars.peek() {
                while let Some(&(_, c)) = self.chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.advance_char();
                }
                continue;
            }

            let Some(&(start_idx, ch)) = self.chars.peek() else {
                return Ok(self.finish_input());
            };

            let start_line = self.line;
            let start_column = self.column;

            match ch {
                '\n' => {
                    self.advance_char();
                    if self.bracket_depth > 0 {
                        continue;
                    }
                    self.at_line_start = true;
                    return Ok(Token::new(
                        TokenKind::Newline,
                        self.span_from(start_idx, start_line, start_column),
                    ));
                }
                '\\' => {
                    self.advance_char();
                    match self.chars.peek() {
                        Some(&(_, '\n')) => {
                            self.advance_char();
                            continue;
                        }
                        _ => {
                            return Err(LexError::UnexpectedCharacter {
                                ch: '\\',
                                line: start_line,
                                column: start_column,
                            });
                        }
                    }
                }
                '"' | '\'' => {
                    return self.read_string(ch, false, start_idx, start_line, start_column);
                }
                'f' | 'F' if self.peek_second_is_quote() => {
                    self.advance_char(); // consume the prefix
                    let Some(&(quote_idx, quote)) = self.chars.peek() else {
                        unreachable!("quote presence checked above");
                    };
                    return self.read_string(quote, true, quote_idx, start_line, start_column);
                }
                c if c.is_alphabetic() || c == '_' => {
                    return Ok(self.read_identifier(start_idx, start_line, start_column));
                }
                c if c.is_ascii_digit() => {
                    return self.read_number(start_idx, start_line, start_column);
                }
                _ => return self.read_operator(start_idx, start_line, start_column),
            }
        }
    }

    /// Compares the current line's leading width against the indent stack and
    /// queues `Indent`/`Dedent` tokens. Blank and comment-only lines keep the
    /// previous indentation so they never open or close blocks.
    fn handle_indentation(&mut self) -> Result<Option<Token>, LexError> {
        let indent_level = self.count_indentation()?;
        let current_indent = *self.indent_stack.last().unwrap();
        let span = self.marker_span();

        if indent_level > current_indent {
            self.indent_stack.push(indent_level);
            return Ok(Some(Token::new(TokenKind::Indent, span)));
        }
        if indent_level < current_indent {
            while let Some(&top) = self.indent_stack.last() {
                if top > indent_level {
                    self.indent_stack.pop();
                    self.pending_tokens.push(Token::new(TokenKind::Dedent, span));
                } else {
                    break;
                }
            }
            if *self.indent_stack.last().unwrap() != indent_level {
                return Err(LexError::InconsistentDedent {
                    width: indent_level,
                    line: self.line,
                });
            }
            if let Some(token) = self.pending_tokens.pop() {
                return Ok(Some(token));
            }
        }
        Ok(None)
    }

    fn count_indentation(&mut self) -> Result<usize, LexError> {
        // Look ahead without consuming to leave blank lines untouched.
        let mut lookahead = self.chars.clone();
        let mut is_blank_line = false;
        while let Some(&(_, c)) = lookahead.peek() {
            match c {
                ' ' => {
                    lookahead.next();
                }
                '\t' => return Err(LexError::TabIndent { line: self.line }),
                '\n' | '#' => {
                    is_blank_line = true;
                    break;
                }
                _ => break,
            }
        }
        if is_blank_line {
            return Ok(*self.indent_stack.last().unwrap());
        }

        let mut count = 0;
        while let Some(&(_, c)) = self.chars.peek() {
            if c == ' ' {
                self.advance_char();
                count += 1;
            } else {
                break;
            }
        }
        Ok(count)
    }

    fn finish_input(&mut self) -> Token {
        self.eof_reached = true;
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            let span = self.marker_span();
            self.pending_tokens.push(Token::new(TokenKind::Dedent, span));
        }
        if let Some(token) = self.pending_tokens.pop() {
            return token;
        }
        self.marker_token(TokenKind::Eof)
    }

    fn read_identifier(&mut self, start: usize, line: usize, column: usize) -> Token {
        self.advance_char();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.advance_char();
            } else {
                break;
            }
        }
        let end_idx = self.current_index();
        let ident = &self.input[start..end_idx];
        let kind = TokenKind::keyword(ident)
            .unwrap_or_else(|| TokenKind::Identifier(ident.to_string()));
        Token::new(kind, self.span_at(start, end_idx, line, column))
    }

    fn read_number(&mut self, start: usize, line: usize, column: usize) -> Result<Token, LexError> {
        let mut is_float = false;
        self.advance_char();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                self.advance_char();
            } else {
                break;
            }
        }
        if let Some(&(dot_idx, '.')) = self.chars.peek() {
            let after_dot = self.input[dot_idx + 1..].chars().next();
            if after_dot.is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.advance_char();
                while let Some(&(_, c)) = self.chars.peek() {
                    if c.is_ascii_digit() {
                        self.advance_char();
                    } else {
                        break;
                    }
                }
            }
        }
        if let Some(&(exp_idx, 'e' | 'E')) = self.chars.peek() {
            let mut rest = self.input[exp_idx + 1..].chars();
            let first = rest.next();
            let exponent_follows = match first {
                Some('+' | '-') => rest.next().is_some_and(|c| c.is_ascii_digit()),
                Some(c) => c.is_ascii_digit(),
                Option::None => false,
            };
            if exponent_follows {
                is_float = true;
                self.advance_char(); // e
                if matches!(self.chars.peek(), Some(&(_, '+' | '-'))) {
                    self.advance_char();
                }
                while let Some(&(_, c)) = self.chars.peek() {
                    if c.is_ascii_digit() {
                        self.advance_char();
                    } else {
                        break;
                    }
                }
            }
        }

        let end_idx = self.current_index();
        let text = &self.input[start..end_idx];
        let kind = if is_float {
            let value = text.parse::<f64>().map_err(|_| LexError::InvalidNumber {
                text: text.to_string(),
                line,
                column,
            })?;
            TokenKind::Float(value)
        } else {
            let value = text.parse::<i64>().map_err(|_| LexError::InvalidNumber {
                text: text.to_string(),
                line,
                column,
            })?;
            TokenKind::Int(value)
        };
        Ok(Token::new(kind, self.span_at(start, end_idx, line, column)))
    }

    fn read_string(
        &mut self,
        quote: char,
        is_fstring: bool,
        start: usize,
        line: usize,
        column: usize,
    ) -> Result<Token, LexError> {
        self.advance_char(); // opening quote
        let mut content = String::new();
        loop {
            let Some(&(idx, c)) = self.chars.peek() else {
                return Err(LexError::UnterminatedString { line, column });
            };
            match c {
                c if c == quote => {
                    self.advance_char();
                    let span = self.span_at(start, idx + c.len_utf8(), line, column);
                    let kind = if is_fstring {
                        TokenKind::FStr(content)
                    } else {
                        TokenKind::Str(content)
                    };
                    return Ok(Token::new(kind, span));
                }
                '\n' => return Err(LexError::UnterminatedString { line, column }),
                '\\' => {
                    self.advance_char();
                    let Some(&(_, escaped)) = self.chars.peek() else {
                        return Err(LexError::UnterminatedString { line, column });
                    };
                    self.advance_char();
                    match escaped {
                        'n' => content.push('\n'),
                        't' => content.push('\t'),
                        'r' => content.push('\r'),
                        '0' => content.push('\0'),
                        '\\' => content.push('\\'),
                        '\'' => content.push('\''),
                        '"' => content.push('"'),
                        other => {
                            content.push('\\');
                            content.push(other);
                        }
                    }
                }
                _ => {
                    content.push(c);
                    self.advance_char();
                }
            }
        }
    }

    fn read_operator(
        &mut self,
        start: usize,
        line: usize,
        column: usize,
    ) -> Result<Token, LexError> {
        let (_, ch) = self.advance_char().expect("operator char peeked");
        let followed_by = |lexer: &mut Self, expected: char| -> bool {
            if let Some(&(_, c)) = lexer.chars.peek()
                && c == expected
            {
                lexer.advance_char();
                return true;
            }
            false
        };

        let kind = match ch {
            '=' if followed_by(self, '=') => TokenKind::Eq,
            '=' => TokenKind::Assign,
            '+' if followed_by(self, '=') => TokenKind::PlusAssign,
            '+' => TokenKind::Plus,
            '-' if followed_by(self, '=') => TokenKind::MinusAssign,
            '-' => TokenKind::Minus,
            '*' if followed_by(self, '*') => TokenKind::DoubleStar,
            '*' if followed_by(self, '=') => TokenKind::StarAssign,
            '*' => TokenKind::Star,
            '/' if followed_by(self, '/') => TokenKind::DoubleSlash,
            '/' if followed_by(self, '=') => TokenKind::SlashAssign,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '<' if followed_by(self, '=') => TokenKind::LessEq,
            '<' if followed_by(self, '<') => TokenKind::Shl,
            '<' => TokenKind::Less,
            '>' if followed_by(self, '=') => TokenKind::GreaterEq,
            '>' if followed_by(self, '>') => TokenKind::Shr,
            '>' => TokenKind::Greater,
            '!' if followed_by(self, '=') => TokenKind::NotEq,
            '&' => TokenKind::Amp,
            '|' => TokenKind::Pipe,
            '^' => TokenKind::Caret,
            '~' => TokenKind::Tilde,
            '.' => TokenKind::Dot,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semicolon,
            '(' => {
                self.bracket_depth += 1;
                TokenKind::LParen
            }
            ')' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                TokenKind::RParen
            }
            '[' => {
                self.bracket_depth += 1;
                TokenKind::LBracket
            }
            ']' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                TokenKind::RBracket
            }
            '{' => {
                self.bracket_depth += 1;
                TokenKind::LBrace
            }
            '}' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                TokenKind::RBrace
            }
            other => {
                return Err(LexError::UnexpectedCharacter {
                    ch: other,
                    line,
                    column,
                });
            }
        };
        let end_idx = self.current_index();
        Ok(Token::new(kind, self.span_at(start, end_idx, line, column)))
    }

    fn peek_second_is_quote(&mut self) -> bool {
        let mut lookahead = self.chars.clone();
        lookahead.next();
        matches!(lookahead.peek(), Some(&(_, '"' | '\'')))
    }

    fn skip_spaces(&mut self) {
        while let Some(&(_, c)) = self.chars.peek() {
            if c == ' ' || c == '\t' {
                self.advance_char();
            } else {
                break;
            }
        }
    }

    fn advance_char(&mut self) -> Option<(usize, char)> {
        let next = self.chars.next();
        if let Some((_, c)) = next {
            if c == '\n' {
                self.line += 1;
                self.column = 0;
            } else {
                self.column += 1;
            }
        }
        next
    }

    fn current_index(&mut self) -> usize {
        self.chars
            .peek()
            .map(|(idx, _)| *idx)
            .unwrap_or(self.input.len())
    }

    fn span_at(&self, start: usize, end: usize, line: usize, column: usize) -> Span {
        Span {
            start,
            end,
            line,
            column,
        }
    }

    fn span_from(&mut self, start: usize, line: usize, column: usize) -> Span {
        let end = self.current_index();
        self.span_at(start, end, line, column)
    }

    fn marker_span(&mut self) -> Span {
        let index = self.current_index();
        Span {
            start: index,
            end: index,
            line: self.line,
            column: self.column,
        }
    }

    fn marker_token(&mut self, kind: TokenKind) -> Token {
        let span = self.marker_span();
        Token::new(kind, span)
    }
}

pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let is_eof = matches!(token.kind, TokenKind::Eof);
        tokens.push(token);
        if is_eof {
            break;
        }
    }
    Ok(tokens)
}
