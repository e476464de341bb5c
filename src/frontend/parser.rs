//! Parser for the textual IR.
//!
//! This module implements a recursive descent parser that converts a token
//! stream into a [`Module`]. Values and blocks may be referenced before they
//! are defined: the first reference reserves an arena slot, the definition
//! fills it in, and anything still unfilled when the function closes is
//! reported as undefined.

use std::collections::{HashMap, HashSet};

use crate::frontend::lexer::Lexer;
use crate::frontend::token::{Token, TokenKind};
use crate::ir::{
    BinaryOp, BlockId, CastOp, Constant, Declaration, FloatPredicate, Function, InstId, InstKind, Instruction,
    IntPredicate, MetadataOperand, Module, NamedMetadata, Param, Type, Value,
};
use crate::utils::errors::{KfError, ParseError, ParseErrorKind};
use crate::utils::location::Span;

type PResult<T> = Result<T, ParseError>;

/// Instruction flags that carry no meaning for this tool.
const IGNORED_FLAGS: &[&str] = &[
    "nsw", "nuw", "exact", "disjoint", "inbounds", "nusw", "fast", "nnan", "ninf", "nsz", "arcp",
    "contract", "afn", "reassoc", "volatile", "samesign",
];

/// Per-function symbol tables used while a body is being read.
struct Scope {
    func: Function,
    values: HashMap<String, InstId>,
    defined: HashSet<InstId>,
    first_use: HashMap<InstId, (String, Span)>,
    blocks: HashMap<String, BlockId>,
    placed: HashSet<BlockId>,
    block_use: HashMap<BlockId, Span>,
}

impl Scope {
    fn new(func: Function) -> Self {
        Self {
            func,
            values: HashMap::new(),
            defined: HashSet::new(),
            first_use: HashMap::new(),
            blocks: HashMap::new(),
            placed: HashSet::new(),
            block_use: HashMap::new(),
        }
    }

    fn value_ref(&mut self, name: &str, span: Span) -> Value {
        if let Some(index) = self.func.param_index(name) {
            return Value::Param(index);
        }
        if let Some(&id) = self.values.get(name) {
            return Value::Inst(id);
        }
        let id = self.func.reserve_inst();
        self.values.insert(name.to_string(), id);
        self.first_use.insert(id, (name.to_string(), span));
        Value::Inst(id)
    }

    fn block_ref(&mut self, name: &str, span: Span) -> BlockId {
        if let Some(&id) = self.blocks.get(name) {
            return id;
        }
        let id = self.func.reserve_block(name);
        self.blocks.insert(name.to_string(), id);
        self.block_use.insert(id, span);
        id
    }

    fn define_block(&mut self, name: &str, span: Span) -> PResult<BlockId> {
        let id = self.block_ref(name, span);
        if !self.placed.insert(id) {
            return Err(ParseError::new(
                ParseErrorKind::DuplicateDefinition,
                format!("Block '{}' defined twice", name),
                span,
            ));
        }
        self.func.place_block(id);
        Ok(id)
    }

    fn define_value(&mut self, block: BlockId, inst: Instruction, span: Span) -> PResult<InstId> {
        let Some(name) = inst.name.clone() else {
            let id = self.func.reserve_inst();
            self.func.place_inst(block, id, inst);
            self.defined.insert(id);
            return Ok(id);
        };
        if self.func.param_index(&name).is_some() {
            return Err(ParseError::new(
                ParseErrorKind::DuplicateDefinition,
                format!("'%{}' shadows a parameter", name),
                span,
            ));
        }
        let id = match self.values.get(&name) {
            Some(&id) => id,
            None => {
                let id = self.func.reserve_inst();
                self.values.insert(name.clone(), id);
                id
            }
        };
        if !self.defined.insert(id) {
            return Err(ParseError::new(
                ParseErrorKind::DuplicateDefinition,
                format!("Value '%{}' defined twice", name),
                span,
            ));
        }
        self.func.place_inst(block, id, inst);
        Ok(id)
    }

    fn finish(self) -> PResult<Function> {
        for (id, (name, span)) in &self.first_use {
            if !self.defined.contains(id) {
                return Err(ParseError::new(
                    ParseErrorKind::UndefinedValue,
                    format!("Use of undefined value '%{}'", name),
                    *span,
                ));
            }
        }
        for (name, id) in &self.blocks {
            if !self.placed.contains(id) {
                let span = self.block_use.get(id).copied().unwrap_or_default();
                return Err(ParseError::new(
                    ParseErrorKind::UndefinedBlock,
                    format!("Branch to undefined block '%{}'", name),
                    span,
                ));
            }
        }
        Ok(self.func)
    }
}

/// A parser for the textual IR.
pub struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    /// Tokenize `source` and create a parser over it.
    pub fn new(source: &'a str) -> Result<Self, KfError> {
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Self { source, tokens, pos: 0 })
    }

    // ---------------------------------------------------------------------
    // Token helpers
    // ---------------------------------------------------------------------

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self, ahead: usize) -> TokenKind {
        self.tokens
            .get(self.pos + ahead)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::Eof)
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.pos.saturating_sub(1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if !token.is_eof() {
            self.pos += 1;
        }
        token
    }

    fn is_at_end(&self) -> bool {
        self.current().is_eof()
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn check_word(&self, word: &str) -> bool {
        self.check(TokenKind::Identifier) && self.current().lexeme == word
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_word(&mut self, word: &str) -> bool {
        if self.check_word(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, kind: ParseErrorKind, message: impl Into<String>) -> ParseError {
        let mut err = ParseError::new(kind, message, self.current().span);
        err.found = Some(self.current().lexeme.clone());
        if self.is_at_end() {
            err.kind = ParseErrorKind::UnexpectedEof;
        }
        err
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> PResult<Token> {
        if self.check(kind) {
            return Ok(self.advance());
        }
        let mut err = self.error(ParseErrorKind::ExpectedToken, message);
        err.expected = vec![kind.name().to_string()];
        Err(err)
    }

    fn consume_word(&mut self, word: &str) -> PResult<()> {
        if self.match_word(word) {
            Ok(())
        } else {
            let mut err = self.error(ParseErrorKind::ExpectedToken, format!("Expected '{}'", word));
            err.expected = vec![word.to_string()];
            Err(err)
        }
    }

    fn skip_flags(&mut self) {
        while self.check(TokenKind::Identifier) && IGNORED_FLAGS.contains(&self.current().lexeme.as_str()) {
            self.advance();
        }
    }

    /// Whether the current token starts a type.
    fn at_type(&self) -> bool {
        self.check(TokenKind::Identifier) && Type::from_keyword(&self.current().lexeme).is_some()
    }

    /// Text of the source between two tokens, inclusive.
    fn source_text(&self, first: usize, last: usize) -> String {
        let start = self.tokens[first].span.start_offset;
        let end = self.tokens[last].span.end_offset;
        self.source[start..end].to_string()
    }

    /// Consume a top-level entity this parser does not model: the rest of
    /// its line, extended through any brace it opens. Returns its text.
    fn skip_entity(&mut self) -> String {
        let first = self.pos;
        let line = self.current().span.start_line;
        let mut depth = 0i32;
        while !self.is_at_end() {
            let token = self.current();
            if depth == 0 && token.span.start_line != line && self.pos > first {
                break;
            }
            match token.kind {
                TokenKind::LeftBrace | TokenKind::LeftParen => depth += 1,
                TokenKind::RightBrace | TokenKind::RightParen => depth -= 1,
                _ => {}
            }
            self.advance();
        }
        self.source_text(first, self.pos.saturating_sub(1).max(first))
    }

    // ---------------------------------------------------------------------
    // Module
    // ---------------------------------------------------------------------

    /// Parse a complete module.
    pub fn parse_module(&mut self) -> PResult<Module> {
        let mut module = Module::new();

        while !self.is_at_end() {
            match self.current().kind {
                TokenKind::Define => {
                    let func = self.parse_define()?;
                    if module.function(&func.name).is_some() {
                        return Err(ParseError::new(
                            ParseErrorKind::DuplicateDefinition,
                            format!("Function '@{}' defined twice", func.name),
                            self.previous().span,
                        ));
                    }
                    module.functions.push(func);
                }
                TokenKind::Declare => {
                    let decl = self.parse_declare()?;
                    module.declarations.push(decl);
                }
                TokenKind::MetadataName => self.parse_metadata(&mut module)?,
                TokenKind::Identifier if self.current().lexeme == "attributes" => {
                    let text = self.skip_entity();
                    module.attributes.push(text);
                }
                _ => {
                    let text = self.skip_entity();
                    module.header.push(text);
                }
            }
        }

        Ok(module)
    }

    fn parse_type(&mut self) -> PResult<Type> {
        if !self.check(TokenKind::Identifier) {
            return Err(self.error(ParseErrorKind::ExpectedType, "Expected a type"));
        }
        let Some(ty) = Type::from_keyword(&self.current().lexeme) else {
            return Err(self.error(
                ParseErrorKind::ExpectedType,
                format!("Unknown type '{}'", self.current().lexeme),
            ));
        };
        self.advance();
        // Typed pointers (`float*`) are read as opaque pointers.
        if self.check(TokenKind::Star) {
            while self.match_token(TokenKind::Star) {}
            return Ok(Type::Ptr);
        }
        if ty == Type::Ptr && self.match_word("addrspace") {
            self.consume(TokenKind::LeftParen, "Expected '(' after addrspace")?;
            self.consume(TokenKind::Integer, "Expected address space number")?;
            self.consume(TokenKind::RightParen, "Expected ')' after address space")?;
        }
        Ok(ty)
    }

    /// Skip linkage, visibility and attributes up to `<type> @name`.
    fn parse_signature_head(&mut self) -> PResult<(Type, String)> {
        loop {
            if self.at_type() && matches!(self.peek_kind(1), TokenKind::GlobalName | TokenKind::Star) {
                let ty = self.parse_type()?;
                let name = self.consume(TokenKind::GlobalName, "Expected function name")?;
                return Ok((ty, name.name().to_string()));
            }
            if self.is_at_end() || self.check(TokenKind::LeftParen) {
                return Err(self.error(ParseErrorKind::ExpectedType, "Expected return type and function name"));
            }
            self.advance();
        }
    }

    /// Skip parameter attributes such as `noundef`, `align 4` or `nocapture`.
    fn skip_param_attrs(&mut self) {
        loop {
            if self.check(TokenKind::Identifier) && !self.at_type() {
                self.advance();
                if self.check(TokenKind::Integer) {
                    self.advance();
                }
                if self.check(TokenKind::LeftParen) {
                    while !self.is_at_end() && !self.match_token(TokenKind::RightParen) {
                        self.advance();
                    }
                }
            } else {
                break;
            }
        }
    }

    fn parse_define(&mut self) -> PResult<Function> {
        self.consume(TokenKind::Define, "Expected 'define'")?;
        let (ret_ty, name) = self.parse_signature_head()?;

        self.consume(TokenKind::LeftParen, "Expected '(' after function name")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                let ty = self.parse_type()?;
                self.skip_param_attrs();
                let param_name = if self.check(TokenKind::LocalName) {
                    self.advance().name().to_string()
                } else {
                    params.len().to_string()
                };
                if params.iter().any(|p: &Param| p.name == param_name) {
                    return Err(ParseError::new(
                        ParseErrorKind::DuplicateDefinition,
                        format!("Parameter '%{}' declared twice", param_name),
                        self.previous().span,
                    ));
                }
                params.push(Param::new(param_name, ty));
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after parameters")?;

        while !self.is_at_end() && !self.check(TokenKind::LeftBrace) {
            self.advance();
        }
        self.consume(TokenKind::LeftBrace, "Expected '{' to open function body")?;

        let mut scope = Scope::new(Function::new(name, ret_ty, params));
        let mut current: Option<BlockId> = None;

        while !self.check(TokenKind::RightBrace) {
            if self.is_at_end() {
                return Err(self.error(ParseErrorKind::UnexpectedEof, "Unterminated function body"));
            }
            let is_label = matches!(self.current().kind, TokenKind::Identifier | TokenKind::Integer)
                && self.peek_kind(1) == TokenKind::Colon;
            if is_label {
                let label = self.advance();
                self.advance();
                current = Some(scope.define_block(&label.lexeme, label.span)?);
                continue;
            }
            let block = match current {
                Some(block) => block,
                None => {
                    let span = self.current().span;
                    let block = scope.define_block("entry", span)?;
                    current = Some(block);
                    block
                }
            };
            self.parse_instruction(&mut scope, block)?;
        }
        self.consume(TokenKind::RightBrace, "Expected '}' to close function body")?;

        scope.finish()
    }

    fn parse_declare(&mut self) -> PResult<Declaration> {
        self.consume(TokenKind::Declare, "Expected 'declare'")?;
        let (ret_ty, name) = self.parse_signature_head()?;

        self.consume(TokenKind::LeftParen, "Expected '(' after function name")?;
        let mut params = Vec::new();
        let mut varargs = false;
        if !self.check(TokenKind::RightParen) {
            loop {
                if self.match_token(TokenKind::Ellipsis) {
                    varargs = true;
                    break;
                }
                params.push(self.parse_type()?);
                self.skip_param_attrs();
                self.match_token(TokenKind::LocalName);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expected ')' after parameters")?;

        // Trailing function attributes on the same line.
        let line = self.previous().span.start_line;
        while !self.is_at_end() && self.current().span.start_line == line {
            self.advance();
        }

        Ok(Declaration {
            name,
            ret_ty,
            params,
            varargs,
        })
    }

    fn parse_metadata(&mut self, module: &mut Module) -> PResult<()> {
        let start = self.pos;
        let name_token = self.advance();
        let name = name_token.name().to_string();
        self.consume(TokenKind::Equal, "Expected '=' after metadata name")?;

        let numbered = name.parse::<u32>().ok();
        let Some(id) = numbered else {
            // Named list: `!name = !{!0, !1}`
            self.consume(TokenKind::Bang, "Expected '!{' for named metadata")?;
            self.consume(TokenKind::LeftBrace, "Expected '{' for named metadata")?;
            let mut nodes = Vec::new();
            while !self.check(TokenKind::RightBrace) {
                let node = self.consume(TokenKind::MetadataName, "Expected metadata node reference")?;
                let id = node.name().parse::<u32>().map_err(|_| {
                    ParseError::new(
                        ParseErrorKind::UnexpectedToken,
                        "Named metadata must list numbered nodes",
                        node.span,
                    )
                })?;
                nodes.push(id);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
            self.consume(TokenKind::RightBrace, "Expected '}' after metadata list")?;
            module.named_metadata.push(NamedMetadata { name, nodes });
            return Ok(());
        };

        let body_start = self.pos;
        self.match_word("distinct");
        if self.check(TokenKind::Bang) && self.peek_kind(1) == TokenKind::LeftBrace {
            let attempt = self.parse_metadata_tuple();
            if let Ok(operands) = attempt {
                module.metadata.insert(id, operands);
                return Ok(());
            }
            self.pos = body_start;
        }

        // Debug info or other specialized nodes: keep the body as written.
        self.pos = start;
        self.skip_entity();
        let text = self.source_text(body_start, self.pos.saturating_sub(1).max(body_start));
        module.metadata.insert(id, vec![MetadataOperand::Raw(text)]);
        Ok(())
    }

    fn parse_metadata_tuple(&mut self) -> PResult<Vec<MetadataOperand>> {
        self.consume(TokenKind::Bang, "Expected '!'")?;
        self.consume(TokenKind::LeftBrace, "Expected '{'")?;
        let mut operands = Vec::new();
        while !self.check(TokenKind::RightBrace) {
            let operand = match self.current().kind {
                TokenKind::MetadataString => MetadataOperand::String(self.advance().name().to_string()),
                TokenKind::MetadataName => {
                    let token = self.advance();
                    match token.name().parse::<u32>() {
                        Ok(n) => MetadataOperand::Node(n),
                        Err(_) => return Err(self.error(ParseErrorKind::UnexpectedToken, "Unsupported metadata operand")),
                    }
                }
                TokenKind::Null => {
                    self.advance();
                    MetadataOperand::Null
                }
                _ => {
                    let ty = self.parse_type()?;
                    match self.current().kind {
                        TokenKind::GlobalName => MetadataOperand::Function(self.advance().name().to_string()),
                        TokenKind::Integer if ty.is_int() => {
                            let token = self.advance();
                            MetadataOperand::Int(ty, parse_int(&token)?)
                        }
                        TokenKind::Null => {
                            self.advance();
                            MetadataOperand::Null
                        }
                        _ => return Err(self.error(ParseErrorKind::UnexpectedToken, "Unsupported metadata operand")),
                    }
                }
            };
            operands.push(operand);
            if !self.match_token(TokenKind::Comma) {
                break;
            }
        }
        self.consume(TokenKind::RightBrace, "Expected '}' after metadata operands")?;
        Ok(operands)
    }

    // ---------------------------------------------------------------------
    // Values
    // ---------------------------------------------------------------------

    fn parse_value(&mut self, scope: &mut Scope, ty: Type) -> PResult<Value> {
        let token = self.current().clone();
        let value = match token.kind {
            TokenKind::LocalName => scope.value_ref(token.name(), token.span),
            TokenKind::GlobalName => Value::Function(token.name().to_string()),
            TokenKind::Integer => {
                let value = parse_int(&token)?;
                if ty.is_float() {
                    Value::Const(Constant::float(ty, value as f64))
                } else {
                    Value::int(ty, value)
                }
            }
            TokenKind::Float => Value::Const(parse_float(&token, ty)?),
            TokenKind::True => Value::int(Type::I1, 1),
            TokenKind::False => Value::int(Type::I1, 0),
            TokenKind::Null => Value::Const(Constant::Null),
            TokenKind::Undef => Value::Const(Constant::Undef(ty)),
            _ => return Err(self.error(ParseErrorKind::UnexpectedToken, "Expected a value")),
        };
        self.advance();
        Ok(value)
    }

    fn parse_typed_value(&mut self, scope: &mut Scope) -> PResult<(Type, Value)> {
        let ty = self.parse_type()?;
        self.skip_param_attrs();
        let value = self.parse_value(scope, ty)?;
        Ok((ty, value))
    }

    fn parse_label(&mut self, scope: &mut Scope) -> PResult<BlockId> {
        self.consume_word("label")?;
        let token = self.consume(TokenKind::LocalName, "Expected block name")?;
        Ok(scope.block_ref(token.name(), token.span))
    }

    /// Skip `, align N` and `, !kind !N` suffixes.
    fn skip_trailing(&mut self) {
        while self.check(TokenKind::Comma) {
            match self.peek_kind(1) {
                TokenKind::Identifier if self.tokens.get(self.pos + 1).map(|t| t.lexeme == "align").unwrap_or(false) => {
                    self.advance();
                    self.advance();
                    self.match_token(TokenKind::Integer);
                }
                TokenKind::MetadataName => {
                    self.advance();
                    self.advance();
                    if !self.match_token(TokenKind::MetadataName) && self.match_token(TokenKind::Bang) {
                        let mut depth = 0;
                        while !self.is_at_end() {
                            let kind = self.advance().kind;
                            match kind {
                                TokenKind::LeftBrace => depth += 1,
                                TokenKind::RightBrace => {
                                    depth -= 1;
                                    if depth <= 0 {
                                        break;
                                    }
                                }
                                _ => {}
                            }
                        }
                    }
                }
                _ => break,
            }
        }
    }

    // ---------------------------------------------------------------------
    // Instructions
    // ---------------------------------------------------------------------

    fn parse_instruction(&mut self, scope: &mut Scope, block: BlockId) -> PResult<()> {
        let start = self.current().span;
        let name = if self.check(TokenKind::LocalName) && self.peek_kind(1) == TokenKind::Equal {
            let token = self.advance();
            self.advance();
            Some(token.name().to_string())
        } else {
            None
        };

        while self.match_word("tail") || self.match_word("musttail") || self.match_word("notail") {}

        if !self.check(TokenKind::Identifier) {
            return Err(self.error(ParseErrorKind::UnknownOpcode, "Expected an instruction"));
        }
        let opcode = self.advance().lexeme;

        let (ty, kind) = match opcode.as_str() {
            "phi" => {
                self.skip_flags();
                let ty = self.parse_type()?;
                let mut incoming = Vec::new();
                loop {
                    self.consume(TokenKind::LeftBracket, "Expected '[' in phi")?;
                    let value = self.parse_value(scope, ty)?;
                    self.consume(TokenKind::Comma, "Expected ',' in phi incoming pair")?;
                    let pred = self.consume(TokenKind::LocalName, "Expected predecessor block")?;
                    let pred = scope.block_ref(pred.name(), pred.span);
                    self.consume(TokenKind::RightBracket, "Expected ']' in phi")?;
                    incoming.push((value, pred));
                    if !(self.check(TokenKind::Comma) && self.peek_kind(1) == TokenKind::LeftBracket) {
                        break;
                    }
                    self.advance();
                }
                (ty, InstKind::Phi { incoming })
            }
            "icmp" => {
                self.skip_flags();
                let pred_token = self.consume(TokenKind::Identifier, "Expected icmp predicate")?;
                let pred = IntPredicate::from_mnemonic(&pred_token.lexeme).ok_or_else(|| {
                    ParseError::new(
                        ParseErrorKind::UnexpectedToken,
                        format!("Unknown icmp predicate '{}'", pred_token.lexeme),
                        pred_token.span,
                    )
                })?;
                let (op_ty, lhs) = self.parse_typed_value(scope)?;
                self.consume(TokenKind::Comma, "Expected ',' between icmp operands")?;
                let rhs = self.parse_value(scope, op_ty)?;
                (Type::I1, InstKind::ICmp { pred, lhs, rhs })
            }
            "fcmp" => {
                self.skip_flags();
                let pred_token = self.advance();
                let pred = FloatPredicate::from_mnemonic(&pred_token.lexeme).ok_or_else(|| {
                    ParseError::new(
                        ParseErrorKind::UnexpectedToken,
                        format!("Unknown fcmp predicate '{}'", pred_token.lexeme),
                        pred_token.span,
                    )
                })?;
                let (op_ty, lhs) = self.parse_typed_value(scope)?;
                self.consume(TokenKind::Comma, "Expected ',' between fcmp operands")?;
                let rhs = self.parse_value(scope, op_ty)?;
                (Type::I1, InstKind::FCmp { pred, lhs, rhs })
            }
            "select" => {
                self.skip_flags();
                let (_, cond) = self.parse_typed_value(scope)?;
                self.consume(TokenKind::Comma, "Expected ',' in select")?;
                let (ty, then_value) = self.parse_typed_value(scope)?;
                self.consume(TokenKind::Comma, "Expected ',' in select")?;
                let (_, else_value) = self.parse_typed_value(scope)?;
                (
                    ty,
                    InstKind::Select {
                        cond,
                        then_value,
                        else_value,
                    },
                )
            }
            "getelementptr" => {
                self.skip_flags();
                let elem_ty = self.parse_type()?;
                self.consume(TokenKind::Comma, "Expected ',' after element type")?;
                let (_, base) = self.parse_typed_value(scope)?;
                let mut indices = Vec::new();
                while self.check(TokenKind::Comma) && self.peek_kind(1) == TokenKind::Identifier {
                    let is_type = self
                        .tokens
                        .get(self.pos + 1)
                        .map(|t| Type::from_keyword(&t.lexeme).is_some())
                        .unwrap_or(false);
                    if !is_type {
                        break;
                    }
                    self.advance();
                    indices.push(self.parse_typed_value(scope)?.1);
                }
                (Type::Ptr, InstKind::GetElementPtr { elem_ty, base, indices })
            }
            "load" => {
                self.skip_flags();
                let ty = self.parse_type()?;
                self.consume(TokenKind::Comma, "Expected ',' after loaded type")?;
                let (_, addr) = self.parse_typed_value(scope)?;
                (ty, InstKind::Load { addr })
            }
            "store" => {
                self.skip_flags();
                let (_, value) = self.parse_typed_value(scope)?;
                self.consume(TokenKind::Comma, "Expected ',' between store operands")?;
                let (_, addr) = self.parse_typed_value(scope)?;
                (Type::Void, InstKind::Store { value, addr })
            }
            "call" => {
                while self.check(TokenKind::Identifier) && !self.at_type() {
                    self.advance();
                }
                let ret_ty = self.parse_type()?;
                // Explicit function type, as in `call i32 (ptr, ...) @printf`.
                if self.check(TokenKind::LeftParen) {
                    while !self.is_at_end() && !self.match_token(TokenKind::RightParen) {
                        self.advance();
                    }
                }
                let callee = self.consume(TokenKind::GlobalName, "Expected callee")?;
                self.consume(TokenKind::LeftParen, "Expected '(' after callee")?;
                let mut args = Vec::new();
                if !self.check(TokenKind::RightParen) {
                    loop {
                        args.push(self.parse_typed_value(scope)?.1);
                        if !self.match_token(TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.consume(TokenKind::RightParen, "Expected ')' after call arguments")?;
                while self.check(TokenKind::AttrGroup) {
                    self.advance();
                }
                (
                    ret_ty,
                    InstKind::Call {
                        callee: callee.name().to_string(),
                        args,
                    },
                )
            }
            "br" => {
                if self.check_word("label") {
                    let dest = self.parse_label(scope)?;
                    (Type::Void, InstKind::Br { dest })
                } else {
                    let (_, cond) = self.parse_typed_value(scope)?;
                    self.consume(TokenKind::Comma, "Expected ',' after branch condition")?;
                    let then_dest = self.parse_label(scope)?;
                    self.consume(TokenKind::Comma, "Expected ',' between branch targets")?;
                    let else_dest = self.parse_label(scope)?;
                    (
                        Type::Void,
                        InstKind::CondBr {
                            cond,
                            then_dest,
                            else_dest,
                        },
                    )
                }
            }
            "ret" => {
                if self.match_word("void") {
                    (Type::Void, InstKind::Ret { value: None })
                } else {
                    let (_, value) = self.parse_typed_value(scope)?;
                    (Type::Void, InstKind::Ret { value: Some(value) })
                }
            }
            "unreachable" => (Type::Void, InstKind::Unreachable),
            other => {
                if let Some(op) = BinaryOp::from_mnemonic(other) {
                    self.skip_flags();
                    let (ty, lhs) = self.parse_typed_value(scope)?;
                    self.consume(TokenKind::Comma, "Expected ',' between operands")?;
                    let rhs = self.parse_value(scope, ty)?;
                    (ty, InstKind::Binary { op, lhs, rhs })
                } else if let Some(op) = CastOp::from_mnemonic(other) {
                    self.skip_flags();
                    let (_, value) = self.parse_typed_value(scope)?;
                    self.consume_word("to")?;
                    let ty = self.parse_type()?;
                    (ty, InstKind::Cast { op, value })
                } else {
                    return Err(ParseError::new(
                        ParseErrorKind::UnknownOpcode,
                        format!("Unknown instruction '{}'", other),
                        self.previous().span,
                    ));
                }
            }
        };

        self.skip_trailing();

        if name.is_some() && ty == Type::Void {
            return Err(ParseError::new(
                ParseErrorKind::UnexpectedToken,
                format!("Instruction '{}' produces no value to name", opcode),
                start,
            ));
        }
        let span = start.merge(&self.previous().span);
        scope.define_value(block, Instruction::new(name, ty, kind), span)?;
        Ok(())
    }
}

fn parse_int(token: &Token) -> PResult<i64> {
    token.lexeme.parse::<i64>().map_err(|_| {
        ParseError::new(
            ParseErrorKind::UnexpectedToken,
            format!("Integer literal '{}' out of range", token.lexeme),
            token.span,
        )
    })
}

fn parse_float(token: &Token, ty: Type) -> PResult<Constant> {
    let invalid = || {
        ParseError::new(
            ParseErrorKind::UnexpectedToken,
            format!("Invalid floating-point literal '{}'", token.lexeme),
            token.span,
        )
    };
    if let Some(hex) = token.lexeme.strip_prefix("0x") {
        let bits = u64::from_str_radix(hex, 16).map_err(|_| invalid())?;
        return Ok(Constant::Float { ty, bits });
    }
    let value: f64 = token.lexeme.parse().map_err(|_| invalid())?;
    Ok(Constant::float(ty, value))
}

/// Parse IR text into a module.
pub fn parse_module(source: &str) -> Result<Module, KfError> {
    let mut parser = Parser::new(source)?;
    Ok(parser.parse_module()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::ParseErrorKind;

    fn parse(source: &str) -> Module {
        parse_module(source).expect("module parses")
    }

    fn parse_err(source: &str) -> ParseError {
        match parse_module(source) {
            Err(KfError::Parse(err)) => err,
            other => panic!("expected a parse error, got {:?}", other.map(|_| ())),
        }
    }

    const VECADD: &str = r#"
; ModuleID = 'vecadd.cu'
source_filename = "vecadd.cu"
target triple = "nvptx64-nvidia-cuda"

define dso_local void @_Z6vecAddPfS_S_i(ptr noundef %A, ptr noundef %B, ptr noundef %C, i32 noundef %N) #0 {
entry:
  br label %for.ph
for.ph:
  br label %for.body
for.body:
  %i = phi i32 [ 0, %for.ph ], [ %i.next, %for.body ]
  %idx = sext i32 %i to i64
  %pa = getelementptr inbounds float, ptr %A, i64 %idx
  %a = load float, ptr %pa, align 4
  %pb = getelementptr inbounds float, ptr %B, i64 %idx
  %b = load float, ptr %pb, align 4
  %s = fadd contract float %a, %b
  %pc = getelementptr inbounds float, ptr %C, i64 %idx
  store float %s, ptr %pc, align 4, !tbaa !7
  %i.next = add nsw i32 %i, 1
  %cmp = icmp slt i32 %i.next, %N
  br i1 %cmp, label %for.body, label %exit
exit:
  ret void
}

declare i32 @printf(ptr, ...)

attributes #0 = { convergent mustprogress "target-cpu"="sm_70" }

!nvvm.annotations = !{!0}
!0 = !{ptr @_Z6vecAddPfS_S_i, !"kernel", i32 1}
!7 = !DIFile(filename: "vecadd.cu", directory: "/tmp")
"#;

    #[test]
    fn test_parses_kernel_module() {
        let module = parse(VECADD);
        assert_eq!(module.functions.len(), 1);
        assert_eq!(module.declarations.len(), 1);
        assert!(module.declarations[0].varargs);
        assert_eq!(module.header.len(), 2);
        assert_eq!(module.attributes.len(), 1);

        let func = &module.functions[0];
        assert_eq!(func.name, "_Z6vecAddPfS_S_i");
        assert_eq!(func.params.len(), 4);
        assert_eq!(func.params[3].ty, Type::I32);
        assert_eq!(func.num_blocks(), 4);
        assert_eq!(func.num_insts(), 15);

        assert_eq!(module.named_metadata[0].name, "nvvm.annotations");
        assert_eq!(
            module.metadata[&0],
            vec![
                MetadataOperand::Function("_Z6vecAddPfS_S_i".into()),
                MetadataOperand::String("kernel".into()),
                MetadataOperand::Int(Type::I32, 1),
            ]
        );
        assert!(matches!(&module.metadata[&7][0], MetadataOperand::Raw(text) if text.starts_with("!DIFile")));
    }

    #[test]
    fn test_forward_references_resolve() {
        let module = parse(VECADD);
        let func = &module.functions[0];
        let body = func.block_by_name("for.body").expect("body block");
        let phi = func.phis(body)[0];
        let InstKind::Phi { incoming } = &func.inst(phi).kind else {
            panic!("expected phi");
        };
        let next = incoming[1].0.as_inst().expect("instruction operand");
        assert_eq!(func.inst(next).name.as_deref(), Some("i.next"));
        assert_eq!(func.inst(next).block(), Some(body));
        assert_eq!(incoming[1].1, body);
    }

    #[test]
    fn test_unlabeled_entry_block() {
        let module = parse("define i32 @id(i32 %x) {\n  ret i32 %x\n}\n");
        let func = &module.functions[0];
        assert_eq!(func.block_name(func.entry().expect("entry")), "entry");
    }

    #[test]
    fn test_undefined_value() {
        let err = parse_err("define void @f() {\nentry:\n  %x = add i32 %y, 1\n  ret void\n}\n");
        assert_eq!(err.kind, ParseErrorKind::UndefinedValue);
        assert!(err.message.contains("%y"));
        assert_eq!(err.span.start_line, 3);
    }

    #[test]
    fn test_undefined_block() {
        let err = parse_err("define void @f() {\nentry:\n  br label %nowhere\n}\n");
        assert_eq!(err.kind, ParseErrorKind::UndefinedBlock);
    }

    #[test]
    fn test_duplicate_value() {
        let err = parse_err("define void @f(i32 %n) {\nentry:\n  %x = add i32 %n, 1\n  %x = add i32 %n, 2\n  ret void\n}\n");
        assert_eq!(err.kind, ParseErrorKind::DuplicateDefinition);
    }

    #[test]
    fn test_unknown_opcode() {
        let err = parse_err("define void @f() {\nentry:\n  frobnicate i32 1\n  ret void\n}\n");
        assert_eq!(err.kind, ParseErrorKind::UnknownOpcode);
    }

    #[test]
    fn test_unterminated_body() {
        let err = parse_err("define void @f() {\nentry:\n  ret void\n");
        assert_eq!(err.kind, ParseErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_typed_pointers_read_as_ptr() {
        let module = parse("define void @f(float* %p) {\nentry:\n  %v = load float, float* %p\n  ret void\n}\n");
        assert_eq!(module.functions[0].params[0].ty, Type::Ptr);
    }
}
