//! Recursive-descent statement parser with precedence-climbing expressions.
//!
//! Statements mirror the block structure the lexer encodes as
//! `Indent`/`Dedent`; expressions use one binding-power level per method,
//! loosest first.

use thiserror::Error;

use crate::ast::{
    AssignTarget, BinaryOperator, BoolOperator, CompareOperator, ComprehensionKind, ExceptHandler,
    Expression, FStringPart, Parameter, ParameterKind, Program, Statement, UnaryOperator,
};
use crate::lexer;
use crate::token::{Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq)]
#[error("Expected {expected}, got {found} at line {line}, column {column}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub expected: String,
    pub found: String,
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    def_depth: usize,
    class_depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            def_depth: 0,
            class_depth: 0,
        }
    }

    pub fn parse_program(mut self) -> Result<Program, ParseError> {
        let mut statements = Vec::new();
        while !self.check(&TokenKind::Eof) {
            if self.consume_newlines() {
                continue;
            }
            statements.push(self.parse_statement()?);
        }
        Ok(Program { statements })
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        match &self.current().kind {
            TokenKind::Def => self.parse_function_def(),
            TokenKind::Class => self.parse_class_def(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Try => self.parse_try(),
            TokenKind::Return => {
                self.advance();
                if self.def_depth == 0 {
                    return Err(self.error_at_current("'return' inside a function"));
                }
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect_statement_end()?;
                Ok(Statement::Return(value))
            }
            TokenKind::Raise => {
                self.advance();
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect_statement_end()?;
                Ok(Statement::Raise(value))
            }
            TokenKind::Break => {
                self.advance();
                self.expect_statement_end()?;
                Ok(Statement::Break)
            }
            TokenKind::Continue => {
                self.advance();
                self.expect_statement_end()?;
                Ok(Statement::Continue)
            }
            TokenKind::Pass => {
                self.advance();
                self.expect_statement_end()?;
                Ok(Statement::Pass)
            }
            TokenKind::Import => {
                self.advance();
                let name = self.expect_identifier()?;
                self.expect_statement_end()?;
                Ok(Statement::Import { name })
            }
            TokenKind::From => {
                self.advance();
                let module = self.expect_identifier()?;
                self.expect(&TokenKind::Import)?;
                let mut names = vec![self.expect_identifier()?];
                while self.eat(&TokenKind::Comma) {
                    names.push(self.expect_identifier()?);
                }
                self.expect_statement_end()?;
                Ok(Statement::FromImport { module, names })
            }
            TokenKind::Global => {
                self.advance();
                let mut names = vec![self.expect_identifier()?];
                while self.eat(&TokenKind::Comma) {
                    names.push(self.expect_identifier()?);
                }
                self.expect_statement_end()?;
                Ok(Statement::Global(names))
            }
            _ => self.parse_assignment_or_expression(),
        }
    }

    fn parse_assignment_or_expression(&mut self) -> Result<Statement, ParseError> {
        let expr = self.parse_expression()?;
        let statement = match &self.current().kind {
            TokenKind::Assign => {
                self.advance();
                let target = self.assignment_target(expr)?;
                let value = self.parse_expression()?;
                Statement::Assign { target, value }
            }
            TokenKind::PlusAssign
            | TokenKind::MinusAssign
            | TokenKind::StarAssign
            | TokenKind::SlashAssign => {
                let op = match self.current().kind {
                    TokenKind::PlusAssign => BinaryOperator::Add,
                    TokenKind::MinusAssign => BinaryOperator::Sub,
                    TokenKind::StarAssign => BinaryOperator::Mul,
                    _ => BinaryOperator::Div,
                };
                self.advance();
                let target = self.assignment_target(expr)?;
                let value = self.parse_expression()?;
                Statement::AugAssign { target, op, value }
            }
            _ => Statement::Expr(expr),
        };
        self.expect_statement_end()?;
        Ok(statement)
    }

    fn assignment_target(&self, expr: Expression) -> Result<AssignTarget, ParseError> {
        match expr {
            Expression::Identifier(name) => Ok(AssignTarget::Name(name)),
            Expression::Index { object, index } => Ok(AssignTarget::Index {
                object: *object,
                index: *index,
            }),
            Expression::Attribute { object, name } => Ok(AssignTarget::Attribute {
                object: *object,
                name,
            }),
            _ => Err(self.error_at_current("an assignable name, index, or attribute")),
        }
    }

    fn parse_function_def(&mut self) -> Result<Statement, ParseError> {
        self.expect(&TokenKind::Def)?;
        let name = self.expect_identifier()?;
        let params = self.parse_parameter_list()?;
        self.def_depth += 1;
        let body = self.parse_block();
        self.def_depth -= 1;
        Ok(Statement::FunctionDef {
            name,
            params,
            body: body?,
        })
    }

    fn parse_class_def(&mut self) -> Result<Statement, ParseError> {
        if self.def_depth > 0 || self.class_depth > 0 {
            return Err(self.error_at_current("'class' at top level (nested classes are not supported)"));
        }
        self.expect(&TokenKind::Class)?;
        let name = self.expect_identifier()?;
        let base = if self.eat(&TokenKind::LParen) {
            if self.eat(&TokenKind::RParen) {
                None
            } else {
                let base = self.expect_identifier()?;
                if self.check(&TokenKind::Comma) {
                    return Err(self.error_at_current("a single base class"));
                }
                self.expect(&TokenKind::RParen)?;
                Some(base)
            }
        } else {
            None
        };
        self.class_depth += 1;
        let body = self.parse_block();
        self.class_depth -= 1;
        let body = body?;
        for statement in &body {
            if !matches!(statement, Statement::FunctionDef { .. } | Statement::Pass) {
                return Err(self.error_at_current("only method definitions or pass in a class body"));
            }
        }
        Ok(Statement::ClassDef { name, base, body })
    }

    fn parse_parameter_list(&mut self) -> Result<Vec<Parameter>, ParseError> {
        self.expect(&TokenKind::LParen)?;
        let mut params: Vec<Parameter> = Vec::new();
        let mut seen_vararg = false;
        let mut seen_kwarg = false;
        while !self.check(&TokenKind::RParen) {
            if seen_kwarg {
                return Err(self.error_at_current("no parameter after **kwargs"));
            }
            if self.eat(&TokenKind::Star) {
                if seen_vararg {
                    return Err(self.error_at_current("at most one *args parameter"));
                }
                seen_vararg = true;
                let name = self.expect_identifier()?;
                params.push(Parameter {
                    name,
                    default: None,
                    kind: ParameterKind::VarArgs,
                });
            } else if self.eat(&TokenKind::DoubleStar) {
                seen_kwarg = true;
                let name = self.expect_identifier()?;
                params.push(Parameter {
                    name,
                    default: None,
                    kind: ParameterKind::KwArgs,
                });
            } else {
                let name = self.expect_identifier()?;
                let default = if self.eat(&TokenKind::Assign) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                params.push(Parameter {
                    name,
                    default,
                    kind: ParameterKind::Positional,
                });
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_if(&mut self) -> Result<Statement, ParseError> {
        self.expect(&TokenKind::If)?;
        let mut branches = Vec::new();
        let condition = self.parse_expression()?;
        let body = self.parse_block()?;
        branches.push((condition, body));
        let mut else_body = Vec::new();
        loop {
            if self.eat(&TokenKind::Elif) {
                let condition = self.parse_expression()?;
                let body = self.parse_block()?;
                branches.push((condition, body));
            } else if self.eat(&TokenKind::Else) {
                else_body = self.parse_block()?;
                break;
            } else {
                break;
            }
        }
        Ok(Statement::If {
            branches,
            else_body,
        })
    }

    fn parse_while(&mut self) -> Result<Statement, ParseError> {
        self.expect(&TokenKind::While)?;
        let condition = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Statement::While { condition, body })
    }

    fn parse_for(&mut self) -> Result<Statement, ParseError> {
        self.expect(&TokenKind::For)?;
        let target = self.parse_loop_target()?;
        self.expect(&TokenKind::In)?;
        let iterable = self.parse_expression()?;
        let body = self.parse_block()?;
        Ok(Statement::For {
            target,
            iterable,
            body,
        })
    }

    fn parse_loop_target(&mut self) -> Result<Vec<String>, ParseError> {
        let parenthesized = self.eat(&TokenKind::LParen);
        let mut names = vec![self.expect_identifier()?];
        while self.eat(&TokenKind::Comma) {
            names.push(self.expect_identifier()?);
        }
        if parenthesized {
            self.expect(&TokenKind::RParen)?;
        }
        Ok(names)
    }

    fn parse_try(&mut self) -> Result<Statement, ParseError> {
        self.expect(&TokenKind::Try)?;
        let body = self.parse_block()?;
        let mut handlers = Vec::new();
        while self.check(&TokenKind::Except) {
            self.advance();
            let mut kinds = Vec::new();
            let mut binding = None;
            if self.eat(&TokenKind::As) {
                binding = Some(self.expect_identifier()?);
            } else if let TokenKind::Identifier(_) = self.current().kind {
                kinds.push(self.expect_identifier()?);
                while self.eat(&TokenKind::Comma) {
                    kinds.push(self.expect_identifier()?);
                }
                if self.eat(&TokenKind::As) {
                    binding = Some(self.expect_identifier()?);
                }
            }
            let handler_body = self.parse_block()?;
            handlers.push(ExceptHandler {
                kinds,
                binding,
                body: handler_body,
            });
        }
        let finally_body = if self.eat(&TokenKind::Finally) {
            self.parse_block_after_keyword()?
        } else {
            Vec::new()
        };
        if handlers.is_empty() && finally_body.is_empty() {
            return Err(self.error_at_current("'except' or 'finally' after try block"));
        }
        Ok(Statement::Try {
            body,
            handlers,
            finally_body,
        })
    }

    /// Parses `: NEWLINE INDENT statements DEDENT`.
    fn parse_block(&mut self) -> Result<Vec<Statement>, ParseError> {
        self.expect(&TokenKind::Colon)?;
        self.parse_block_body()
    }

    fn parse_block_after_keyword(&mut self) -> Result<Vec<Statement>, ParseError> {
        self.expect(&TokenKind::Colon)?;
        self.parse_block_body()
    }

    fn parse_block_body(&mut self) -> Result<Vec<Statement>, ParseError> {
        self.expect(&TokenKind::Newline)?;
        self.expect(&TokenKind::Indent)?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::Dedent) && !self.check(&TokenKind::Eof) {
            if self.consume_newlines() {
                continue;
            }
            body.push(self.parse_statement()?);
        }
        self.expect(&TokenKind::Dedent)?;
        Ok(body)
    }

    // Expression parsing, loosest binding first.

    pub fn parse_expression(&mut self) -> Result<Expression, ParseError> {
        if self.check(&TokenKind::Lambda) {
            return self.parse_lambda();
        }
        self.parse_or()
    }

    fn parse_lambda(&mut self) -> Result<Expression, ParseError> {
        self.expect(&TokenKind::Lambda)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::Colon) {
            loop {
                let name = self.expect_identifier()?;
                let default = if self.eat(&TokenKind::Assign) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                params.push(Parameter {
                    name,
                    default,
                    kind: ParameterKind::Positional,
                });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::Colon)?;
        let body = self.parse_expression()?;
        Ok(Expression::Lambda {
            params,
            body: Box::new(body),
        })
    }

    fn parse_or(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_and()?;
        while self.eat(&TokenKind::Or) {
            let right = self.parse_and()?;
            expr = Expression::BoolOp {
                op: BoolOperator::Or,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_not()?;
        while self.eat(&TokenKind::And) {
            let right = self.parse_not()?;
            expr = Expression::BoolOp {
                op: BoolOperator::And,
                left: Box::new(expr),
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn parse_not(&mut self) -> Result<Expression, ParseError> {
        if self.eat(&TokenKind::Not) {
            let operand = self.parse_not()?;
            return Ok(Expression::UnaryOp {
                op: UnaryOperator::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expression, ParseError> {
        let first = self.parse_bit_or()?;
        let mut rest = Vec::new();
        loop {
            let op = match &self.current().kind {
                TokenKind::Eq => CompareOperator::Eq,
                TokenKind::NotEq => CompareOperator::NotEq,
                TokenKind::Less => CompareOperator::Less,
                TokenKind::LessEq => CompareOperator::LessEq,
                TokenKind::Greater => CompareOperator::Greater,
                TokenKind::GreaterEq => CompareOperator::GreaterEq,
                TokenKind::In => CompareOperator::In,
                TokenKind::Not if self.peek_is(&TokenKind::In) => CompareOperator::NotIn,
                _ => break,
            };
            self.advance();
            if op == CompareOperator::NotIn {
                self.advance(); // the `in` after `not`
            }
            let operand = self.parse_bit_or()?;
            rest.push((op, operand));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expression::Compare {
                first: Box::new(first),
                rest,
            })
        }
    }

    fn parse_bit_or(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_bit_xor()?;
        while self.eat(&TokenKind::Pipe) {
            let right = self.parse_bit_xor()?;
            expr = binary(expr, BinaryOperator::BitOr, right);
        }
        Ok(expr)
    }

    fn parse_bit_xor(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_bit_and()?;
        while self.eat(&TokenKind::Caret) {
            let right = self.parse_bit_and()?;
            expr = binary(expr, BinaryOperator::BitXor, right);
        }
        Ok(expr)
    }

    fn parse_bit_and(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_shift()?;
        while self.eat(&TokenKind::Amp) {
            let right = self.parse_shift()?;
            expr = binary(expr, BinaryOperator::BitAnd, right);
        }
        Ok(expr)
    }

    fn parse_shift(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_additive()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Shl => BinaryOperator::Shl,
                TokenKind::Shr => BinaryOperator::Shr,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_additive(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_multiplicative()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOperator::Add,
                TokenKind::Minus => BinaryOperator::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinaryOperator::Mul,
                TokenKind::Slash => BinaryOperator::Div,
                TokenKind::DoubleSlash => BinaryOperator::FloorDiv,
                TokenKind::Percent => BinaryOperator::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            expr = binary(expr, op, right);
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expression, ParseError> {
        let op = match self.current().kind {
            TokenKind::Minus => Some(UnaryOperator::Neg),
            TokenKind::Tilde => Some(UnaryOperator::Invert),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expression::UnaryOp {
                op,
                operand: Box::new(operand),
            });
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expression, ParseError> {
        let base = self.parse_postfix()?;
        if self.eat(&TokenKind::DoubleStar) {
            // Right-associative; the exponent may itself carry a unary sign.
            let exponent = self.parse_unary()?;
            return Ok(binary(base, BinaryOperator::Pow, exponent));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match &self.current().kind {
                TokenKind::LParen => {
                    self.advance();
                    let (args, kwargs) = self.parse_call_arguments()?;
                    expr = Expression::Call {
                        callee: Box::new(expr),
                        args,
                        kwargs,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    expr = self.parse_index_or_slice(expr)?;
                }
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_identifier()?;
                    expr = Expression::Attribute {
                        object: Box::new(expr),
                        name,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call_arguments(
        &mut self,
    ) -> Result<(Vec<Expression>, Vec<(String, Expression)>), ParseError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expression)> = Vec::new();
        while !self.check(&TokenKind::RParen) {
            if let TokenKind::Identifier(name) = &self.current().kind
                && self.peek_is(&TokenKind::Assign)
            {
                let name = name.clone();
                self.advance();
                self.advance();
                let value = self.parse_expression()?;
                kwargs.push((name, value));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error_at_current("no positional argument after keyword arguments"));
                }
                args.push(self.parse_expression()?);
            }
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok((args, kwargs))
    }

    fn parse_index_or_slice(&mut self, object: Expression) -> Result<Expression, ParseError> {
        let start = if self.check(&TokenKind::Colon) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        if !self.eat(&TokenKind::Colon) {
            let index = start.ok_or_else(|| self.error_at_current("an index expression"))?;
            self.expect(&TokenKind::RBracket)?;
            return Ok(Expression::Index {
                object: Box::new(object),
                index,
            });
        }
        let stop = if self.check(&TokenKind::Colon) || self.check(&TokenKind::RBracket) {
            None
        } else {
            Some(Box::new(self.parse_expression()?))
        };
        let step = if self.eat(&TokenKind::Colon) && !self.check(&TokenKind::RBracket) {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        self.expect(&TokenKind::RBracket)?;
        Ok(Expression::Slice {
            object: Box::new(object),
            start,
            stop,
            step,
        })
    }

    fn parse_primary(&mut self) -> Result<Expression, ParseError> {
        let expr = match &self.current().kind {
            TokenKind::Int(value) => {
                let value = *value;
                self.advance();
                Expression::Integer(value)
            }
            TokenKind::Float(value) => {
                let value = *value;
                self.advance();
                Expression::Float(value)
            }
            TokenKind::Str(text) => {
                let text = text.clone();
                self.advance();
                Expression::Str(text)
            }
            TokenKind::FStr(text) => {
                let text = text.clone();
                let parts = self.parse_fstring(&text)?;
                self.advance();
                Expression::FString(parts)
            }
            TokenKind::True => {
                self.advance();
                Expression::Boolean(true)
            }
            TokenKind::False => {
                self.advance();
                Expression::Boolean(false)
            }
            TokenKind::None => {
                self.advance();
                Expression::NoneLiteral
            }
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Expression::Identifier(name)
            }
            TokenKind::LParen => {
                self.advance();
                if self.eat(&TokenKind::RParen) {
                    Expression::Tuple(Vec::new())
                } else {
                    let first = self.parse_expression()?;
                    if self.check(&TokenKind::Comma) {
                        let mut elements = vec![first];
                        while self.eat(&TokenKind::Comma) {
                            if self.check(&TokenKind::RParen) {
                                break;
                            }
                            elements.push(self.parse_expression()?);
                        }
                        self.expect(&TokenKind::RParen)?;
                        Expression::Tuple(elements)
                    } else {
                        self.expect(&TokenKind::RParen)?;
                        first
                    }
                }
            }
            TokenKind::LBracket => {
                self.advance();
                self.parse_list_literal()?
            }
            TokenKind::LBrace => {
                self.advance();
                self.parse_brace_literal()?
            }
            TokenKind::Lambda => self.parse_lambda()?,
            _ => return Err(self.error_at_current("an expression")),
        };
        Ok(expr)
    }

    fn parse_list_literal(&mut self) -> Result<Expression, ParseError> {
        if self.eat(&TokenKind::RBracket) {
            return Ok(Expression::List(Vec::new()));
        }
        let first = self.parse_expression()?;
        if self.check(&TokenKind::For) {
            let comp = self.parse_comprehension_tail(ComprehensionKind::List, first, None)?;
            self.expect(&TokenKind::RBracket)?;
            return Ok(comp);
        }
        let mut elements = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBracket) {
                break;
            }
            elements.push(self.parse_expression()?);
        }
        self.expect(&TokenKind::RBracket)?;
        Ok(Expression::List(elements))
    }

    fn parse_brace_literal(&mut self) -> Result<Expression, ParseError> {
        if self.eat(&TokenKind::RBrace) {
            return Ok(Expression::Dict(Vec::new()));
        }
        let first = self.parse_expression()?;
        if self.eat(&TokenKind::Colon) {
            let value = self.parse_expression()?;
            if self.check(&TokenKind::For) {
                let comp =
                    self.parse_comprehension_tail(ComprehensionKind::Dict, first, Some(value))?;
                self.expect(&TokenKind::RBrace)?;
                return Ok(comp);
            }
            let mut entries = vec![(first, value)];
            while self.eat(&TokenKind::Comma) {
                if self.check(&TokenKind::RBrace) {
                    break;
                }
                let key = self.parse_expression()?;
                self.expect(&TokenKind::Colon)?;
                let value = self.parse_expression()?;
                entries.push((key, value));
            }
            self.expect(&TokenKind::RBrace)?;
            return Ok(Expression::Dict(entries));
        }
        if self.check(&TokenKind::For) {
            let comp = self.parse_comprehension_tail(ComprehensionKind::Set, first, None)?;
            self.expect(&TokenKind::RBrace)?;
            return Ok(comp);
        }
        let mut elements = vec![first];
        while self.eat(&TokenKind::Comma) {
            if self.check(&TokenKind::RBrace) {
                break;
            }
            elements.push(self.parse_expression()?);
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(Expression::Set(elements))
    }

    fn parse_comprehension_tail(
        &mut self,
        kind: ComprehensionKind,
        element: Expression,
        value: Option<Expression>,
    ) -> Result<Expression, ParseError> {
        self.expect(&TokenKind::For)?;
        let target = self.parse_loop_target()?;
        self.expect(&TokenKind::In)?;
        let iterable = self.parse_expression()?;
        let filter = if self.eat(&TokenKind::If) {
            Some(Box::new(self.parse_expression()?))
        } else {
            None
        };
        Ok(Expression::Comprehension {
            kind,
            element: Box::new(element),
            value: value.map(Box::new),
            target,
            iterable: Box::new(iterable),
            filter,
        })
    }

    /// Splits the raw f-string body into literal chunks and `{expression}`
    /// holes; each hole is tokenized and parsed with a fresh sub-parser.
    fn parse_fstring(&self, text: &str) -> Result<Vec<FStringPart>, ParseError> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    if !literal.is_empty() {
                        parts.push(FStringPart::Literal(std::mem::take(&mut literal)));
                    }
                    let mut depth = 1usize;
                    let mut hole = String::new();
                    for inner in chars.by_ref() {
                        match inner {
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                        hole.push(inner);
                    }
                    if depth != 0 {
                        return Err(self.error_at_current("'}' closing an f-string expression"));
                    }
                    let expr = self.parse_fstring_hole(&hole)?;
                    parts.push(FStringPart::Expr(expr));
                }
                '}' => return Err(self.error_at_current("'{' before '}' in f-string")),
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            parts.push(FStringPart::Literal(literal));
        }
        Ok(parts)
    }

    fn parse_fstring_hole(&self, source: &str) -> Result<Expression, ParseError> {
        let span = self.current().span;
        let tokens = lexer::tokenize(source).map_err(|err| ParseError {
            line: span.line,
            column: span.column,
            expected: "a valid f-string expression".to_string(),
            found: err.to_string(),
        })?;
        let mut sub = Parser::new(tokens);
        let expr = sub.parse_expression()?;
        if !sub.check(&TokenKind::Eof) {
            return Err(ParseError {
                line: span.line,
                column: span.column,
                expected: "a single expression in f-string hole".to_string(),
                found: sub.current().kind.describe(),
            });
        }
        Ok(expr)
    }

    // Token plumbing.

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_is(&self, kind: &TokenKind) -> bool {
        self.tokens
            .get(self.pos + 1)
            .is_some_and(|token| &token.kind == kind)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.current().kind == kind
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), ParseError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error_at_current(&kind.describe()))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        if let TokenKind::Identifier(name) = &self.current().kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error_at_current("an identifier"))
        }
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.current().kind,
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof | TokenKind::Dedent
        )
    }

    fn expect_statement_end(&mut self) -> Result<(), ParseError> {
        match self.current().kind {
            TokenKind::Newline | TokenKind::Semicolon => {
                self.advance();
                Ok(())
            }
            TokenKind::Eof | TokenKind::Dedent => Ok(()),
            _ => Err(self.error_at_current("end of statement")),
        }
    }

    fn consume_newlines(&mut self) -> bool {
        let mut consumed = false;
        while matches!(
            self.current().kind,
            TokenKind::Newline | TokenKind::Semicolon
        ) {
            consumed = true;
            self.advance();
        }
        consumed
    }

    fn error_at_current(&self, expected: &str) -> ParseError {
        let token = self.current();
        ParseError {
            line: token.span.line,
            column: token.span.column,
            expected: expected.to_string(),
            found: token.kind.describe(),
        }
    }
}

fn binary(left: Expression, op: BinaryOperator, right: Expression) -> Expression {
    Expression::BinaryOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

pub fn parse_tokens(tokens: Vec<Token>) -> Result<Program, ParseError> {
    Parser::new(tokens).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use indoc::indoc;

    fn parse(input: &str) -> Program {
        parse_tokens(tokenize(input).expect("tokenize failed")).expect("parse failed")
    }

    fn parse_err(input: &str) -> ParseError {
        parse_tokens(tokenize(input).expect("tokenize failed")).expect_err("expected parse error")
    }

    #[test]
    fn parses_function_with_defaults_and_varargs() {
        let program = parse("def f(a, b=1, *rest, **extra):\n    return a\n");
        let Statement::FunctionDef { name, params, .. } = &program.statements[0] else {
            panic!("expected function def");
        };
        assert_eq!(name, "f");
        assert_eq!(params.len(), 4);
        assert_eq!(params[1].default, Some(Expression::Integer(1)));
        assert_eq!(params[2].kind, ParameterKind::VarArgs);
        assert_eq!(params[3].kind, ParameterKind::KwArgs);
    }

    #[test]
    fn power_binds_tighter_than_unary_minus() {
        let program = parse("x = -2 ** 2\n");
        let Statement::Assign { value, .. } = &program.statements[0] else {
            panic!("expected assignment");
        };
        assert_eq!(
            value,
            &Expression::UnaryOp {
                op: UnaryOperator::Neg,
                operand: Box::new(Expression::BinaryOp {
                    left: Box::new(Expression::Integer(2)),
                    op: BinaryOperator::Pow,
                    right: Box::new(Expression::Integer(2)),
                }),
            }
        );
    }

    #[test]
    fn parses_chained_comparison_into_one_node() {
        let program = parse("ok = 1 < x < 10\n");
        let Statement::Assign { value, .. } = &program.statements[0] else {
            panic!("expected assignment");
        };
        let Expression::Compare { rest, .. } = value else {
            panic!("expected comparison chain");
        };
        assert_eq!(rest.len(), 2);
    }

    #[test]
    fn parses_slice_with_omitted_parts() {
        let program = parse("y = xs[::2]\n");
        let Statement::Assign { value, .. } = &program.statements[0] else {
            panic!("expected assignment");
        };
        let Expression::Slice {
            start, stop, step, ..
        } = value
        else {
            panic!("expected slice");
        };
        assert!(start.is_none());
        assert!(stop.is_none());
        assert_eq!(step.as_deref(), Some(&Expression::Integer(2)));
    }

    #[test]
    fn parses_comprehension_with_filter() {
        let program = parse("ys = [x * x for x in xs if x > 0]\n");
        let Statement::Assign { value, .. } = &program.statements[0] else {
            panic!("expected assignment");
        };
        let Expression::Comprehension {
            kind,
            target,
            filter,
            ..
        } = value
        else {
            panic!("expected comprehension");
        };
        assert_eq!(*kind, ComprehensionKind::List);
        assert_eq!(target, &vec!["x".to_string()]);
        assert!(filter.is_some());
    }

    #[test]
    fn parses_dict_comprehension() {
        let program = parse("m = {k: v * 2 for k, v in pairs}\n");
        let Statement::Assign { value, .. } = &program.statements[0] else {
            panic!("expected assignment");
        };
        let Expression::Comprehension { kind, value, .. } = value else {
            panic!("expected comprehension");
        };
        assert_eq!(*kind, ComprehensionKind::Dict);
        assert!(value.is_some());
    }

    #[test]
    fn parses_fstring_holes() {
        let program = parse("s = f\"a={a} b={b + 1}\"\n");
        let Statement::Assign { value, .. } = &program.statements[0] else {
            panic!("expected assignment");
        };
        let Expression::FString(parts) = value else {
            panic!("expected f-string");
        };
        assert_eq!(parts.len(), 4);
        assert!(matches!(parts[1], FStringPart::Expr(_)));
        assert!(matches!(parts[3], FStringPart::Expr(_)));
    }

    #[test]
    fn parses_try_except_finally() {
        let input = indoc! {"
            try:
                risky()
            except ValueError as e:
                handle(e)
            finally:
                done()
        "};
        let program = parse(input);
        let Statement::Try {
            handlers,
            finally_body,
            ..
        } = &program.statements[0]
        else {
            panic!("expected try statement");
        };
        assert_eq!(handlers[0].kinds, vec!["ValueError".to_string()]);
        assert_eq!(handlers[0].binding, Some("e".to_string()));
        assert_eq!(finally_body.len(), 1);
    }

    #[test]
    fn rejects_two_base_classes() {
        let err = parse_err("class C(A, B):\n    pass\n");
        assert!(err.expected.contains("single base class"));
    }

    #[test]
    fn rejects_nested_class_definitions() {
        let err = parse_err("def f():\n    class C:\n        pass\n");
        assert!(err.expected.contains("nested classes are not supported"));
    }

    #[test]
    fn rejects_return_outside_function() {
        let err = parse_err("return 1\n");
        assert!(err.expected.contains("'return' inside a function"));
    }

    #[test]
    fn rejects_positional_after_keyword_argument() {
        let err = parse_err("f(a=1, 2)\n");
        assert!(err.expected.contains("no positional argument"));
    }

    #[test]
    fn parses_augmented_assignment() {
        let program = parse("x += 2\n");
        assert!(matches!(
            program.statements[0],
            Statement::AugAssign {
                op: BinaryOperator::Add,
                ..
            }
        ));
    }

    #[test]
    fn parses_import_forms() {
        let program = parse("import math\nfrom strings import upper, lower\n");
        assert_eq!(
            program.statements[0],
            Statement::Import {
                name: "math".to_string()
            }
        );
        assert_eq!(
            program.statements[1],
            Statement::FromImport {
                module: "strings".to_string(),
                names: vec!["upper".to_string(), "lower".to_string()],
            }
        );
    }
}
