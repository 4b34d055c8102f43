//! Parser for guest source code
//!
//! Recursive descent for statements, precedence climbing for binary
//! operators. Hoisting is resolved here: every function node (and the
//! program) records its `var` names, its block-free `let`/`const` names and
//! its function declarations, so the evaluator can instantiate them on entry
//! without another pass over the body.

use std::rc::Rc;

use crate::ast::*;
use crate::conversions::number_to_string;
use crate::error::EngineError;
use crate::lexer::{Lexer, Span, Token, TokenKind};
use crate::value::JsString;

/// Deepest nesting of statements, expressions and operator chains accepted.
/// Bounds the depth of every tree the parser builds.
pub const MAX_NESTING: usize = 1000;

const STACK_RED_ZONE: usize = 64 * 1024;
const STACK_GROW_SIZE: usize = 2 * 1024 * 1024;

/// Per-function parsing state
#[derive(Default)]
struct FunctionContext {
    hoisted: Hoisted,
    /// Lexical names of the blocks currently open inside this function
    blocks: Vec<Vec<LexicalName>>,
    /// Active labels and whether each one labels a loop
    labels: Vec<(JsString, bool)>,
    loop_depth: usize,
    breakable_depth: usize,
    is_function: bool,
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    peeked: Option<(Token, bool)>,
    newline_before: bool,
    function: FunctionContext,
    outer_functions: Vec<FunctionContext>,
    /// Disallow `in` as a binary operator (for-statement initializers)
    no_in: bool,
    depth: usize,
}

/// Parse a complete program.
pub fn parse(source: &str) -> Result<Program, EngineError> {
    Parser::new(source).parse_program()
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token();
        let newline_before = lexer.had_newline_before();
        Self {
            lexer,
            current,
            peeked: None,
            newline_before,
            function: FunctionContext::default(),
            outer_functions: Vec::new(),
            no_in: false,
            depth: 0,
        }
    }

    pub fn parse_program(&mut self) -> Result<Program, EngineError> {
        let mut body = Vec::new();
        while !self.is_at_end() {
            body.push(Rc::new(self.parse_statement()?));
        }
        let context = std::mem::take(&mut self.function);
        Ok(Program {
            body: body.into(),
            hoisted: context.hoisted,
        })
    }

    // ============ STATEMENTS ============

    fn parse_statement(&mut self) -> Result<Statement, EngineError> {
        self.nested(Self::parse_statement_inner)
    }

    fn parse_statement_inner(&mut self) -> Result<Statement, EngineError> {
        let is_label =
            matches!(self.current.kind, TokenKind::Identifier(_)) && self.peek_is(&TokenKind::Colon);
        if is_label {
            return self.parse_labeled_statement();
        }
        match &self.current.kind {
            TokenKind::Var | TokenKind::Let | TokenKind::Const => {
                let decl = self.parse_variable_declaration()?;
                self.expect_semicolon()?;
                Ok(Statement::VariableDeclaration(decl))
            }
            TokenKind::Function => {
                let node = self.parse_function(false)?;
                if node.name.is_none() {
                    return Err(self.error("Function statements require a name"));
                }
                self.context().hoisted.functions.push(Rc::clone(&node));
                Ok(Statement::FunctionDeclaration(node))
            }
            TokenKind::LBrace => self.parse_block_statement(),
            TokenKind::If => self.parse_if_statement(),
            TokenKind::For => self.parse_for_statement(),
            TokenKind::While => self.parse_while_statement(),
            TokenKind::Do => self.parse_do_while_statement(),
            TokenKind::Switch => self.parse_switch_statement(),
            TokenKind::Try => self.parse_try_statement(),
            TokenKind::Return => self.parse_return_statement(),
            TokenKind::Break => self.parse_break_statement(),
            TokenKind::Continue => self.parse_continue_statement(),
            TokenKind::Throw => self.parse_throw_statement(),
            TokenKind::With => Err(self.error("'with' statements are not supported")),
            TokenKind::Semicolon => {
                self.advance();
                Ok(Statement::Empty)
            }
            TokenKind::Debugger => {
                self.advance();
                self.expect_semicolon()?;
                Ok(Statement::Debugger)
            }
            _ => {
                let expr = self.parse_expression()?;
                self.expect_semicolon()?;
                Ok(Statement::Expression(Rc::new(expr)))
            }
        }
    }

    fn parse_variable_declaration(&mut self) -> Result<VariableDeclaration, EngineError> {
        let kind = match self.current.kind {
            TokenKind::Let => VariableKind::Let,
            TokenKind::Const => VariableKind::Const,
            _ => VariableKind::Var,
        };
        self.advance();

        let mut declarations = Vec::new();
        loop {
            let name = self.parse_binding_identifier()?;
            let init = if self.match_token(&TokenKind::Eq) {
                Some(Rc::new(self.parse_assignment_expression()?))
            } else {
                None
            };
            if kind == VariableKind::Const && init.is_none() && !self.check(&TokenKind::In) {
                return Err(self.error("Missing initializer in const declaration"));
            }
            self.declare(kind, &name)?;
            declarations.push(VariableDeclarator { name, init });
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }

        Ok(VariableDeclaration {
            kind,
            declarations: declarations.into(),
        })
    }

    /// Record a declaration for hoisting.
    fn declare(&mut self, kind: VariableKind, name: &JsString) -> Result<(), EngineError> {
        let context = self.context();
        match kind {
            VariableKind::Var => {
                if !context.hoisted.vars.contains(name) {
                    context.hoisted.vars.push(name.clone());
                }
            }
            VariableKind::Let | VariableKind::Const => {
                let entry = LexicalName {
                    name: name.clone(),
                    constant: kind == VariableKind::Const,
                };
                let list = match context.blocks.last_mut() {
                    Some(block) => block,
                    None => &mut context.hoisted.lexical,
                };
                let duplicate = list.iter().any(|l| l.name == entry.name);
                if !duplicate {
                    list.push(entry);
                }
                if duplicate {
                    return Err(self.error(&format!(
                        "Identifier '{}' has already been declared",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    fn parse_block_statement(&mut self) -> Result<Statement, EngineError> {
        self.require_token(&TokenKind::LBrace)?;
        self.context().blocks.push(Vec::new());
        let mut body = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            match self.parse_statement() {
                Ok(stmt) => body.push(Rc::new(stmt)),
                Err(e) => {
                    self.context().blocks.pop();
                    return Err(e);
                }
            }
        }
        let lexical = self.context().blocks.pop().unwrap_or_default();
        self.require_token(&TokenKind::RBrace)?;
        Ok(Statement::Block(BlockStatement {
            body: body.into(),
            lexical: lexical.into(),
        }))
    }

    fn parse_if_statement(&mut self) -> Result<Statement, EngineError> {
        self.advance(); // if
        self.require_token(&TokenKind::LParen)?;
        let test = Rc::new(self.parse_expression()?);
        self.require_token(&TokenKind::RParen)?;
        let consequent = Rc::new(self.parse_statement()?);
        let alternate = if self.match_token(&TokenKind::Else) {
            Some(Rc::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Statement::If(IfStatement {
            test,
            consequent,
            alternate,
        }))
    }

    fn parse_for_statement(&mut self) -> Result<Statement, EngineError> {
        self.advance(); // for
        self.require_token(&TokenKind::LParen)?;
        self.context().blocks.push(Vec::new());
        let result = self.parse_for_rest();
        let lexical: Rc<[LexicalName]> = self.context().blocks.pop().unwrap_or_default().into();
        Ok(match result? {
            Statement::For(mut f) => {
                f.lexical = lexical;
                Statement::For(f)
            }
            Statement::ForIn(mut f) => {
                f.lexical = lexical;
                Statement::ForIn(f)
            }
            other => other,
        })
    }

    fn parse_for_rest(&mut self) -> Result<Statement, EngineError> {
        let mut init = None;
        if !self.check(&TokenKind::Semicolon) {
            let saved_no_in = std::mem::replace(&mut self.no_in, true);
            let parsed = if matches!(
                self.current.kind,
                TokenKind::Var | TokenKind::Let | TokenKind::Const
            ) {
                self.parse_variable_declaration().map(|decl| {
                    ForInit::Declaration(Rc::new(Statement::VariableDeclaration(decl)))
                })
            } else {
                self.parse_expression().map(|e| ForInit::Expression(Rc::new(e)))
            };
            self.no_in = saved_no_in;
            init = Some(parsed?);
        }

        if self.match_token(&TokenKind::In) {
            let left = match init {
                Some(ForInit::Declaration(stmt)) => match &*stmt {
                    Statement::VariableDeclaration(decl) => {
                        let [declarator] = &*decl.declarations else {
                            return Err(self.error("Invalid left-hand side in for-in loop"));
                        };
                        if declarator.init.is_some() {
                            return Err(self.error("for-in loop variable declaration may not have an initializer"));
                        }
                        Rc::new(Expression::Identifier(declarator.name.clone()))
                    }
                    _ => return Err(self.error("Invalid left-hand side in for-in loop")),
                },
                Some(ForInit::Expression(expr)) => {
                    self.check_assignment_target(&expr)?;
                    expr
                }
                None => return Err(self.error("Invalid left-hand side in for-in loop")),
            };
            let right = Rc::new(self.parse_expression()?);
            self.require_token(&TokenKind::RParen)?;
            let body = Rc::new(self.parse_loop_body()?);
            return Ok(Statement::ForIn(ForInStatement {
                left,
                lexical: Rc::from(Vec::new()),
                right,
                body,
            }));
        }

        self.require_token(&TokenKind::Semicolon)?;
        let test = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(Rc::new(self.parse_expression()?))
        };
        self.require_token(&TokenKind::Semicolon)?;
        let update = if self.check(&TokenKind::RParen) {
            None
        } else {
            Some(Rc::new(self.parse_expression()?))
        };
        self.require_token(&TokenKind::RParen)?;
        let body = Rc::new(self.parse_loop_body()?);
        Ok(Statement::For(ForStatement {
            init,
            test,
            update,
            body,
            lexical: Rc::from(Vec::new()),
        }))
    }

    fn parse_loop_body(&mut self) -> Result<Statement, EngineError> {
        self.context().loop_depth += 1;
        self.context().breakable_depth += 1;
        let body = self.parse_statement();
        self.context().loop_depth -= 1;
        self.context().breakable_depth -= 1;
        body
    }

    fn parse_while_statement(&mut self) -> Result<Statement, EngineError> {
        self.advance(); // while
        self.require_token(&TokenKind::LParen)?;
        let test = Rc::new(self.parse_expression()?);
        self.require_token(&TokenKind::RParen)?;
        let body = Rc::new(self.parse_loop_body()?);
        Ok(Statement::While(WhileStatement { test, body }))
    }

    fn parse_do_while_statement(&mut self) -> Result<Statement, EngineError> {
        self.advance(); // do
        let body = Rc::new(self.parse_loop_body()?);
        self.require_token(&TokenKind::While)?;
        self.require_token(&TokenKind::LParen)?;
        let test = Rc::new(self.parse_expression()?);
        self.require_token(&TokenKind::RParen)?;
        // A semicolon after do-while is always optional
        self.match_token(&TokenKind::Semicolon);
        Ok(Statement::DoWhile(DoWhileStatement { body, test }))
    }

    fn parse_switch_statement(&mut self) -> Result<Statement, EngineError> {
        self.advance(); // switch
        self.require_token(&TokenKind::LParen)?;
        let discriminant = Rc::new(self.parse_expression()?);
        self.require_token(&TokenKind::RParen)?;
        self.require_token(&TokenKind::LBrace)?;

        self.context().blocks.push(Vec::new());
        self.context().breakable_depth += 1;
        let cases = self.parse_switch_cases();
        self.context().breakable_depth -= 1;
        let lexical = self.context().blocks.pop().unwrap_or_default();
        let cases = cases?;

        let switch = Statement::Switch(SwitchStatement {
            discriminant,
            cases: cases.into(),
        });
        if lexical.is_empty() {
            Ok(switch)
        } else {
            Ok(Statement::Block(BlockStatement {
                body: Rc::from(vec![Rc::new(switch)]),
                lexical: lexical.into(),
            }))
        }
    }

    fn parse_switch_cases(&mut self) -> Result<Vec<SwitchCase>, EngineError> {
        let mut cases = Vec::new();
        let mut seen_default = false;
        while !self.match_token(&TokenKind::RBrace) {
            let test = if self.match_token(&TokenKind::Case) {
                Some(Rc::new(self.parse_expression()?))
            } else if self.match_token(&TokenKind::Default) {
                if seen_default {
                    return Err(self.error("More than one default clause in switch statement"));
                }
                seen_default = true;
                None
            } else {
                return Err(self.unexpected_token("'case', 'default' or '}'"));
            };
            self.require_token(&TokenKind::Colon)?;
            let mut body = Vec::new();
            while !matches!(
                self.current.kind,
                TokenKind::Case | TokenKind::Default | TokenKind::RBrace | TokenKind::Eof
            ) {
                body.push(Rc::new(self.parse_statement()?));
            }
            cases.push(SwitchCase {
                test,
                body: body.into(),
            });
        }
        Ok(cases)
    }

    fn parse_try_statement(&mut self) -> Result<Statement, EngineError> {
        self.advance(); // try
        let block = Rc::new(self.parse_block_statement()?);

        let handler = if self.match_token(&TokenKind::Catch) {
            self.require_token(&TokenKind::LParen)?;
            let param = self.parse_binding_identifier()?;
            self.require_token(&TokenKind::RParen)?;
            let body = Rc::new(self.parse_block_statement()?);
            Some(CatchClause { param, body })
        } else {
            None
        };

        let finalizer = if self.match_token(&TokenKind::Finally) {
            Some(Rc::new(self.parse_block_statement()?))
        } else {
            None
        };

        if handler.is_none() && finalizer.is_none() {
            return Err(self.error("Missing catch or finally after try"));
        }

        Ok(Statement::Try(TryStatement {
            block,
            handler,
            finalizer,
        }))
    }

    fn parse_return_statement(&mut self) -> Result<Statement, EngineError> {
        if !self.context().is_function {
            return Err(self.error("Illegal return statement"));
        }
        self.advance(); // return
        let argument = if self.at_statement_end() {
            None
        } else {
            Some(Rc::new(self.parse_expression()?))
        };
        self.expect_semicolon()?;
        Ok(Statement::Return(argument))
    }

    fn parse_break_statement(&mut self) -> Result<Statement, EngineError> {
        self.advance(); // break
        let label = self.parse_jump_label()?;
        match &label {
            Some(name) => {
                if !self.context().labels.iter().any(|(l, _)| l == name) {
                    return Err(self.error(&format!("Undefined label '{}'", name)));
                }
            }
            None => {
                if self.context().breakable_depth == 0 {
                    return Err(self.error("Illegal break statement"));
                }
            }
        }
        self.expect_semicolon()?;
        Ok(Statement::Break(label))
    }

    fn parse_continue_statement(&mut self) -> Result<Statement, EngineError> {
        self.advance(); // continue
        let label = self.parse_jump_label()?;
        match &label {
            Some(name) => {
                let is_loop = self
                    .context()
                    .labels
                    .iter()
                    .rev()
                    .find(|(l, _)| l == name)
                    .map(|(_, is_loop)| *is_loop);
                match is_loop {
                    Some(true) => {}
                    Some(false) => {
                        return Err(self.error(&format!(
                            "Illegal continue statement: '{}' does not denote an iteration statement",
                            name
                        )));
                    }
                    None => return Err(self.error(&format!("Undefined label '{}'", name))),
                }
            }
            None => {
                if self.context().loop_depth == 0 {
                    return Err(self.error("Illegal continue statement"));
                }
            }
        }
        self.expect_semicolon()?;
        Ok(Statement::Continue(label))
    }

    fn parse_jump_label(&mut self) -> Result<Option<JsString>, EngineError> {
        if self.newline_before {
            return Ok(None);
        }
        if let TokenKind::Identifier(name) = &self.current.kind {
            let name = name.clone();
            self.advance();
            return Ok(Some(name));
        }
        Ok(None)
    }

    fn parse_throw_statement(&mut self) -> Result<Statement, EngineError> {
        self.advance(); // throw
        if self.newline_before {
            return Err(self.error("Illegal newline after throw"));
        }
        let argument = Rc::new(self.parse_expression()?);
        self.expect_semicolon()?;
        Ok(Statement::Throw(argument))
    }

    fn parse_labeled_statement(&mut self) -> Result<Statement, EngineError> {
        // Gather the whole chain `a: b: stmt` so every label knows whether it
        // names a loop.
        let mut chain = Vec::new();
        loop {
            let name = match &self.current.kind {
                TokenKind::Identifier(name) => name.clone(),
                _ => break,
            };
            if !self.peek_is(&TokenKind::Colon) {
                break;
            }
            if self.context().labels.iter().any(|(l, _)| *l == name) || chain.contains(&name) {
                return Err(self.error(&format!("Label '{}' has already been declared", name)));
            }
            chain.push(name);
            self.advance(); // label
            self.advance(); // :
        }

        let is_loop = matches!(
            self.current.kind,
            TokenKind::For | TokenKind::While | TokenKind::Do
        );
        for name in &chain {
            self.context().labels.push((name.clone(), is_loop));
        }
        let body = self.parse_statement();
        let keep = self.context().labels.len().saturating_sub(chain.len());
        self.context().labels.truncate(keep);

        let mut statement = body?;
        for label in chain.into_iter().rev() {
            statement = Statement::Labeled(LabeledStatement {
                label,
                body: Rc::new(statement),
            });
        }
        Ok(statement)
    }

    // ============ FUNCTIONS ============

    fn parse_function(&mut self, is_expression: bool) -> Result<Rc<FunctionNode>, EngineError> {
        let start = self.current.span;
        self.require_token(&TokenKind::Function)?;

        let name = if let TokenKind::Identifier(_) = &self.current.kind {
            Some(self.parse_binding_identifier()?)
        } else {
            None
        };

        self.require_token(&TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                params.push(self.parse_binding_identifier()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.require_token(&TokenKind::RParen)?;
        self.require_token(&TokenKind::LBrace)?;

        let saved_no_in = std::mem::replace(&mut self.no_in, false);
        let outer = std::mem::replace(
            &mut self.function,
            FunctionContext {
                is_function: true,
                ..Default::default()
            },
        );
        self.outer_functions.push(outer);
        let mut body = Vec::new();
        let mut failure = None;
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            match self.parse_statement() {
                Ok(stmt) => body.push(Rc::new(stmt)),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        let outer = self.outer_functions.pop().unwrap_or_default();
        let context = std::mem::replace(&mut self.function, outer);
        self.no_in = saved_no_in;
        if let Some(e) = failure {
            return Err(e);
        }

        let end = self.current.span.end;
        self.require_token(&TokenKind::RBrace)?;
        let source = self.lexer.source().get(start.start..end).unwrap_or("");

        Ok(Rc::new(FunctionNode {
            name,
            params,
            body: body.into(),
            hoisted: context.hoisted,
            is_expression,
            source: JsString::from(source),
            line: start.line,
        }))
    }

    // ============ EXPRESSIONS ============

    fn parse_expression(&mut self) -> Result<Expression, EngineError> {
        let first = self.parse_assignment_expression()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut expressions = vec![Rc::new(first)];
        while self.match_token(&TokenKind::Comma) {
            expressions.push(Rc::new(self.parse_assignment_expression()?));
        }
        Ok(Expression::Sequence(expressions.into()))
    }

    fn parse_assignment_expression(&mut self) -> Result<Expression, EngineError> {
        self.nested(Self::parse_assignment_inner)
    }

    fn parse_assignment_inner(&mut self) -> Result<Expression, EngineError> {
        let target = self.parse_conditional_expression()?;
        let Some(op) = self.current_assignment_op() else {
            return Ok(target);
        };
        self.check_assignment_target(&target)?;
        self.advance();
        let value = self.parse_assignment_expression()?;
        Ok(Expression::Assign {
            op,
            target: Rc::new(target),
            value: Rc::new(value),
        })
    }

    fn parse_conditional_expression(&mut self) -> Result<Expression, EngineError> {
        let test = self.parse_binary_expression(0)?;
        if !self.match_token(&TokenKind::Question) {
            return Ok(test);
        }
        let saved_no_in = std::mem::replace(&mut self.no_in, false);
        let consequent = self.parse_assignment_expression();
        self.no_in = saved_no_in;
        let consequent = consequent?;
        self.require_token(&TokenKind::Colon)?;
        let alternate = self.parse_assignment_expression()?;
        Ok(Expression::Conditional {
            test: Rc::new(test),
            consequent: Rc::new(consequent),
            alternate: Rc::new(alternate),
        })
    }

    fn parse_binary_expression(&mut self, min_prec: u8) -> Result<Expression, EngineError> {
        let mut left = self.parse_unary_expression()?;
        let mut chained = 0;

        loop {
            if let Some((op, prec)) = self.current_logical_op() {
                if prec < min_prec {
                    break;
                }
                self.advance();
                self.deepen(&mut chained)?;
                let right = self.parse_binary_expression(prec + 1)?;
                left = Expression::Logical {
                    op,
                    left: Rc::new(left),
                    right: Rc::new(right),
                };
                continue;
            }
            let Some((op, prec)) = self.current_binary_op() else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.advance();
            self.deepen(&mut chained)?;
            let right = self.parse_binary_expression(prec + 1)?;
            left = Expression::Binary {
                op,
                left: Rc::new(left),
                right: Rc::new(right),
            };
        }

        self.depth -= chained;
        Ok(left)
    }

    fn parse_unary_expression(&mut self) -> Result<Expression, EngineError> {
        self.nested(Self::parse_unary_inner)
    }

    fn parse_unary_inner(&mut self) -> Result<Expression, EngineError> {
        if let Some(op) = self.current_unary_op() {
            self.advance();
            let argument = self.parse_unary_expression()?;
            return Ok(Expression::Unary(op, Rc::new(argument)));
        }

        if let Some(op) = self.current_update_op() {
            self.advance();
            let target = self.parse_unary_expression()?;
            self.check_assignment_target(&target)?;
            return Ok(Expression::Update {
                op,
                prefix: true,
                target: Rc::new(target),
            });
        }

        self.parse_postfix_expression()
    }

    fn parse_postfix_expression(&mut self) -> Result<Expression, EngineError> {
        let expr = self.parse_left_hand_side_expression()?;

        // No line terminator allowed before a postfix operator
        if !self.newline_before {
            if let Some(op) = self.current_update_op() {
                self.check_assignment_target(&expr)?;
                self.advance();
                return Ok(Expression::Update {
                    op,
                    prefix: false,
                    target: Rc::new(expr),
                });
            }
        }

        Ok(expr)
    }

    fn parse_left_hand_side_expression(&mut self) -> Result<Expression, EngineError> {
        let mut expr = self.parse_member_expression()?;
        let mut chained = 0;
        loop {
            if self.check(&TokenKind::LParen) {
                self.deepen(&mut chained)?;
                let arguments = self.parse_call_arguments()?;
                expr = Expression::Call {
                    callee: Rc::new(expr),
                    arguments,
                };
            } else if let Some(property) = self.parse_member_property()? {
                self.deepen(&mut chained)?;
                expr = Expression::Member {
                    object: Rc::new(expr),
                    property,
                };
            } else {
                break;
            }
        }
        self.depth -= chained;
        Ok(expr)
    }

    /// Member expression, including `new` with an argument list.
    fn parse_member_expression(&mut self) -> Result<Expression, EngineError> {
        let mut expr = if self.match_token(&TokenKind::New) {
            let callee = self.nested(Self::parse_member_expression)?;
            let arguments = if self.check(&TokenKind::LParen) {
                self.parse_call_arguments()?
            } else {
                Rc::from(Vec::new())
            };
            Expression::New {
                callee: Rc::new(callee),
                arguments,
            }
        } else {
            self.parse_primary_expression()?
        };

        let mut chained = 0;
        while let Some(property) = self.parse_member_property()? {
            self.deepen(&mut chained)?;
            expr = Expression::Member {
                object: Rc::new(expr),
                property,
            };
        }
        self.depth -= chained;
        Ok(expr)
    }

    /// `.name` or `[expr]`, if one follows.
    fn parse_member_property(&mut self) -> Result<Option<MemberProperty>, EngineError> {
        if self.match_token(&TokenKind::Dot) {
            let name = self.parse_identifier_name()?;
            return Ok(Some(MemberProperty::Static(name)));
        }
        if self.match_token(&TokenKind::LBracket) {
            let saved_no_in = std::mem::replace(&mut self.no_in, false);
            let property = self.parse_expression();
            self.no_in = saved_no_in;
            let property = property?;
            self.require_token(&TokenKind::RBracket)?;
            return Ok(Some(MemberProperty::Computed(Rc::new(property))));
        }
        Ok(None)
    }

    fn parse_call_arguments(&mut self) -> Result<Rc<[Rc<Expression>]>, EngineError> {
        self.require_token(&TokenKind::LParen)?;
        let saved_no_in = std::mem::replace(&mut self.no_in, false);
        let mut arguments = Vec::new();
        let mut result = Ok(());
        while !self.check(&TokenKind::RParen) {
            match self.parse_assignment_expression() {
                Ok(arg) => arguments.push(Rc::new(arg)),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.no_in = saved_no_in;
        result?;
        self.require_token(&TokenKind::RParen)?;
        Ok(arguments.into())
    }

    fn parse_primary_expression(&mut self) -> Result<Expression, EngineError> {
        let expr = match &self.current.kind {
            TokenKind::Number(n) => Expression::Literal(Literal::Number(*n)),
            TokenKind::String(s) => Expression::Literal(Literal::String(s.clone())),
            TokenKind::True => Expression::Literal(Literal::Boolean(true)),
            TokenKind::False => Expression::Literal(Literal::Boolean(false)),
            TokenKind::Null => Expression::Literal(Literal::Null),
            TokenKind::This => Expression::This,
            TokenKind::Identifier(name) => Expression::Identifier(name.clone()),
            TokenKind::Function => {
                let node = self.parse_function(true)?;
                return Ok(Expression::Function(node));
            }
            TokenKind::LParen => {
                self.advance();
                let saved_no_in = std::mem::replace(&mut self.no_in, false);
                let inner = self.parse_expression();
                self.no_in = saved_no_in;
                let inner = inner?;
                self.require_token(&TokenKind::RParen)?;
                return Ok(inner);
            }
            TokenKind::LBracket => return self.parse_array_literal(),
            TokenKind::LBrace => return self.parse_object_literal(),
            TokenKind::Slash | TokenKind::SlashEq => {
                return Err(self.error("Regular expression literals are not supported"));
            }
            _ => return Err(self.unexpected_token("expression")),
        };
        self.advance();
        Ok(expr)
    }

    fn parse_array_literal(&mut self) -> Result<Expression, EngineError> {
        self.require_token(&TokenKind::LBracket)?;
        let saved_no_in = std::mem::replace(&mut self.no_in, false);
        let mut elements = Vec::new();
        let mut result = Ok(());
        while !self.check(&TokenKind::RBracket) && !self.is_at_end() {
            if self.match_token(&TokenKind::Comma) {
                elements.push(None);
                continue;
            }
            match self.parse_assignment_expression() {
                Ok(e) => elements.push(Some(Rc::new(e))),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
            if !self.check(&TokenKind::RBracket) {
                if let Err(e) = self.require_token(&TokenKind::Comma) {
                    result = Err(e);
                    break;
                }
            }
        }
        self.no_in = saved_no_in;
        result?;
        self.require_token(&TokenKind::RBracket)?;
        Ok(Expression::Array(elements.into()))
    }

    fn parse_object_literal(&mut self) -> Result<Expression, EngineError> {
        self.require_token(&TokenKind::LBrace)?;
        let saved_no_in = std::mem::replace(&mut self.no_in, false);
        let result = self.parse_object_properties();
        self.no_in = saved_no_in;
        let properties = result?;
        self.require_token(&TokenKind::RBrace)?;
        Ok(Expression::Object(properties.into()))
    }

    fn parse_object_properties(&mut self) -> Result<Vec<ObjectProperty>, EngineError> {
        let mut properties = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            let key = self.parse_property_name()?;
            if (key == "get" || key == "set") && !self.check(&TokenKind::Colon) {
                return Err(self.error("Accessor properties are not supported"));
            }
            self.require_token(&TokenKind::Colon)?;
            let value = Rc::new(self.parse_assignment_expression()?);
            properties.push(ObjectProperty { key, value });
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        Ok(properties)
    }

    fn parse_property_name(&mut self) -> Result<JsString, EngineError> {
        let name = match &self.current.kind {
            TokenKind::String(s) => s.clone(),
            TokenKind::Number(n) => JsString::from(number_to_string(*n)),
            _ => return self.parse_identifier_name(),
        };
        self.advance();
        Ok(name)
    }

    // ============ HELPERS ============

    fn parse_binding_identifier(&mut self) -> Result<JsString, EngineError> {
        match &self.current.kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected_token("identifier")),
        }
    }

    /// An IdentifierName: identifiers plus reserved words (after `.` or as
    /// an object key).
    fn parse_identifier_name(&mut self) -> Result<JsString, EngineError> {
        let name = match &self.current.kind {
            TokenKind::Identifier(name) => name.clone(),
            kind => match keyword_text(kind) {
                Some(text) => JsString::from(text),
                None => return Err(self.unexpected_token("property name")),
            },
        };
        self.advance();
        Ok(name)
    }

    fn check_assignment_target(&self, expr: &Expression) -> Result<(), EngineError> {
        match expr {
            Expression::Identifier(_) | Expression::Member { .. } => Ok(()),
            _ => Err(self.error("Invalid left-hand side in assignment")),
        }
    }

    fn context(&mut self) -> &mut FunctionContext {
        &mut self.function
    }

    fn advance(&mut self) {
        let next = match self.peeked.take() {
            Some(peeked) => peeked,
            None => {
                let token = self.lexer.next_token();
                (token, self.lexer.had_newline_before())
            }
        };
        self.current = next.0;
        self.newline_before = next.1;
    }

    fn peek_is(&mut self, kind: &TokenKind) -> bool {
        if self.peeked.is_none() {
            let token = self.lexer.next_token();
            self.peeked = Some((token, self.lexer.had_newline_before()));
        }
        self.peeked.as_ref().is_some_and(|(t, _)| &t.kind == kind)
    }

    fn require_token(&mut self, kind: &TokenKind) -> Result<(), EngineError> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected_token(&format!("{:?}", kind)))
        }
    }

    /// Automatic semicolon insertion
    fn expect_semicolon(&mut self) -> Result<(), EngineError> {
        if self.match_token(&TokenKind::Semicolon) {
            return Ok(());
        }
        if self.check(&TokenKind::RBrace) || self.is_at_end() || self.newline_before {
            return Ok(());
        }
        Err(self.unexpected_token("';'"))
    }

    fn at_statement_end(&self) -> bool {
        self.newline_before
            || matches!(
                self.current.kind,
                TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
            )
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.current.kind == kind
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current.kind, TokenKind::Eof)
    }

    /// Run `parse` one nesting level deeper, on a grown stack if needed.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("Program is nested too deeply"));
        }
        self.depth += 1;
        let result = stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || parse(self));
        self.depth -= 1;
        result
    }

    /// Account for one more link in an operator chain. The caller gives the
    /// levels back with `self.depth -= chained` once the chain ends.
    fn deepen(&mut self, chained: &mut usize) -> Result<(), EngineError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("Program is nested too deeply"));
        }
        self.depth += 1;
        *chained += 1;
        Ok(())
    }

    fn error(&self, message: &str) -> EngineError {
        let span: Span = self.current.span;
        EngineError::syntax_error(message, span.line, span.column)
    }

    fn unexpected_token(&self, expected: &str) -> EngineError {
        match &self.current.kind {
            TokenKind::Error(message) => self.error(message),
            TokenKind::Eof => self.error("Unexpected end of input"),
            found => self.error(&format!("Expected {}, found {:?}", expected, found)),
        }
    }

    fn current_binary_op(&self) -> Option<(BinaryOp, u8)> {
        let op = match self.current.kind {
            TokenKind::Pipe => (BinaryOp::BitOr, 3),
            TokenKind::Caret => (BinaryOp::BitXor, 4),
            TokenKind::Amp => (BinaryOp::BitAnd, 5),
            TokenKind::EqEq => (BinaryOp::Eq, 6),
            TokenKind::BangEq => (BinaryOp::NotEq, 6),
            TokenKind::EqEqEq => (BinaryOp::StrictEq, 6),
            TokenKind::BangEqEq => (BinaryOp::StrictNotEq, 6),
            TokenKind::Lt => (BinaryOp::Lt, 7),
            TokenKind::LtEq => (BinaryOp::LtEq, 7),
            TokenKind::Gt => (BinaryOp::Gt, 7),
            TokenKind::GtEq => (BinaryOp::GtEq, 7),
            TokenKind::Instanceof => (BinaryOp::Instanceof, 7),
            TokenKind::In if !self.no_in => (BinaryOp::In, 7),
            TokenKind::LtLt => (BinaryOp::LShift, 8),
            TokenKind::GtGt => (BinaryOp::RShift, 8),
            TokenKind::GtGtGt => (BinaryOp::URShift, 8),
            TokenKind::Plus => (BinaryOp::Add, 9),
            TokenKind::Minus => (BinaryOp::Sub, 9),
            TokenKind::Star => (BinaryOp::Mul, 10),
            TokenKind::Slash => (BinaryOp::Div, 10),
            TokenKind::Percent => (BinaryOp::Mod, 10),
            _ => return None,
        };
        Some(op)
    }

    fn current_logical_op(&self) -> Option<(LogicalOp, u8)> {
        match self.current.kind {
            TokenKind::PipePipe => Some((LogicalOp::Or, 1)),
            TokenKind::AmpAmp => Some((LogicalOp::And, 2)),
            _ => None,
        }
    }

    fn current_unary_op(&self) -> Option<UnaryOp> {
        match self.current.kind {
            TokenKind::Minus => Some(UnaryOp::Minus),
            TokenKind::Plus => Some(UnaryOp::Plus),
            TokenKind::Bang => Some(UnaryOp::Not),
            TokenKind::Tilde => Some(UnaryOp::BitNot),
            TokenKind::Typeof => Some(UnaryOp::Typeof),
            TokenKind::Void => Some(UnaryOp::Void),
            TokenKind::Delete => Some(UnaryOp::Delete),
            _ => None,
        }
    }

    fn current_update_op(&self) -> Option<UpdateOp> {
        match self.current.kind {
            TokenKind::PlusPlus => Some(UpdateOp::Increment),
            TokenKind::MinusMinus => Some(UpdateOp::Decrement),
            _ => None,
        }
    }

    fn current_assignment_op(&self) -> Option<AssignOp> {
        match self.current.kind {
            TokenKind::Eq => Some(AssignOp::Assign),
            TokenKind::PlusEq => Some(AssignOp::AddAssign),
            TokenKind::MinusEq => Some(AssignOp::SubAssign),
            TokenKind::StarEq => Some(AssignOp::MulAssign),
            TokenKind::SlashEq => Some(AssignOp::DivAssign),
            TokenKind::PercentEq => Some(AssignOp::ModAssign),
            TokenKind::LtLtEq => Some(AssignOp::LShiftAssign),
            TokenKind::GtGtEq => Some(AssignOp::RShiftAssign),
            TokenKind::GtGtGtEq => Some(AssignOp::URShiftAssign),
            TokenKind::AmpEq => Some(AssignOp::BitAndAssign),
            TokenKind::PipeEq => Some(AssignOp::BitOrAssign),
            TokenKind::CaretEq => Some(AssignOp::BitXorAssign),
            _ => None,
        }
    }
}

/// Source text of keyword tokens, for use as property names.
fn keyword_text(kind: &TokenKind) -> Option<&'static str> {
    let text = match kind {
        TokenKind::True => "true",
        TokenKind::False => "false",
        TokenKind::Null => "null",
        TokenKind::Var => "var",
        TokenKind::Let => "let",
        TokenKind::Const => "const",
        TokenKind::Function => "function",
        TokenKind::Return => "return",
        TokenKind::If => "if",
        TokenKind::Else => "else",
        TokenKind::For => "for",
        TokenKind::While => "while",
        TokenKind::Do => "do",
        TokenKind::Break => "break",
        TokenKind::Continue => "continue",
        TokenKind::Switch => "switch",
        TokenKind::Case => "case",
        TokenKind::Default => "default",
        TokenKind::Try => "try",
        TokenKind::Catch => "catch",
        TokenKind::Finally => "finally",
        TokenKind::Throw => "throw",
        TokenKind::New => "new",
        TokenKind::This => "this",
        TokenKind::Typeof => "typeof",
        TokenKind::Instanceof => "instanceof",
        TokenKind::In => "in",
        TokenKind::Void => "void",
        TokenKind::Delete => "delete",
        TokenKind::Debugger => "debugger",
        TokenKind::With => "with",
        _ => return None,
    };
    Some(text)
}
