//! Push parser for selection statements.
//!
//! Tokens are pushed one at a time. A statement is parsed by recursive
//! descent once its separator arrives and its nodes are appended to the
//! collection's arena. A failing statement is dropped; statements committed
//! before it stay.

use std::mem;
use std::path::PathBuf;

use rst_core::positions::PositionType;

use crate::ast::{
    ArithOp, BoolOp, CmpOp, Matcher, NodeArena, NodeId, NodeKind, RangeSpec, RootKind,
    StringPattern, ValueType,
};
use crate::error::{Diagnostic, Diagnostics, Result, SelectionError};
use crate::index::IndexGroups;
use crate::lexer::{Lexer, SpannedToken, Token};
use crate::methods::{MethodFlags, MethodId, MethodRegistry, ParamKind};
use crate::resolve::resolve_subtree;
use crate::selection::SelectionRoot;
use crate::source::{LineSource, Prompt};
use crate::symbols::{is_identifier, Symbol, SymbolTable};

/// Collection state a parser appends to.
pub(crate) struct ParseState<'a> {
    pub nodes: &'a mut NodeArena,
    pub roots: &'a mut Vec<SelectionRoot>,
    pub symbols: &'a mut SymbolTable,
    pub methods: &'a MethodRegistry,
    /// Resolve group references as statements are committed
    pub resolve_groups: bool,
    pub groups: Option<&'a IndexGroups>,
}

/// Result of pushing one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushStatus {
    /// Feed more tokens
    More,
    /// Input complete; remaining tokens are not needed
    Accept,
    /// Input complete with errors
    Abort,
}

/// Resumable statement parser fed one token at a time.
pub(crate) struct PushParser<'a> {
    state: ParseState<'a>,
    /// Text the pending token spans refer to
    input: String,
    pending: Vec<SpannedToken>,
    /// Current statement already failed lexically; skip to the separator
    poisoned: bool,
    errors: Diagnostics,
    unresolved: Diagnostics,
    expected: Option<usize>,
    produced: usize,
    finished: Option<PushStatus>,
}

impl<'a> PushParser<'a> {
    pub fn new(state: ParseState<'a>, expected: Option<usize>) -> Self {
        Self {
            state,
            input: String::new(),
            pending: Vec::new(),
            poisoned: false,
            errors: Diagnostics::new(),
            unresolved: Diagnostics::new(),
            expected,
            produced: 0,
            finished: None,
        }
    }

    /// Text subsequent token spans refer to.
    pub fn set_input(&mut self, input: &str) {
        debug_assert!(self.pending.is_empty());
        self.input.clear();
        self.input.push_str(input);
    }

    /// Selections committed so far.
    pub fn produced(&self) -> usize {
        self.produced
    }

    pub fn push(&mut self, tok: SpannedToken) -> PushStatus {
        if let Some(status) = self.finished {
            return status;
        }
        match tok.token {
            Token::Separator | Token::Eof => {
                let at_eof = tok.token == Token::Eof;
                self.finish_statement();
                if self.expected.is_some_and(|n| self.produced >= n) {
                    return self.finish(PushStatus::Accept);
                }
                if at_eof {
                    return self.finish_input();
                }
                PushStatus::More
            }
            Token::Error(ref message) => {
                if !self.poisoned {
                    let (input, span) = line_context(&self.input, tok.span);
                    self.errors.push(
                        Diagnostic::new(message.clone())
                            .with_span(span.0, span.1)
                            .with_input(input),
                    );
                    self.poisoned = true;
                    self.pending.clear();
                }
                PushStatus::More
            }
            _ => {
                if !self.poisoned {
                    self.pending.push(tok);
                }
                PushStatus::More
            }
        }
    }

    fn finish(&mut self, status: PushStatus) -> PushStatus {
        self.finished = Some(status);
        status
    }

    fn finish_input(&mut self) -> PushStatus {
        if let Some(n) = self.expected {
            if self.produced < n {
                self.errors.push(Diagnostic::new(format!(
                    "Too few selections provided: expected {}, got {}",
                    n, self.produced
                )));
            }
        }
        if self.errors.is_empty() && self.unresolved.is_empty() {
            self.finish(PushStatus::Accept)
        } else {
            self.finish(PushStatus::Abort)
        }
    }

    /// Drain errors collected so far (interactive sources report them per line).
    pub fn take_errors(&mut self) -> Diagnostics {
        let mut errors = mem::take(&mut self.errors);
        errors.append(&mut self.unresolved);
        errors
    }

    /// Outcome of the whole pass.
    pub fn into_result(mut self) -> Result<()> {
        if !self.errors.is_empty() {
            self.errors.append(&mut self.unresolved);
            return Err(SelectionError::Parse(self.errors));
        }
        self.unresolved.into_result(SelectionError::UnresolvedGroup)
    }

    fn finish_statement(&mut self) {
        if mem::take(&mut self.poisoned) || self.pending.is_empty() {
            self.pending.clear();
            return;
        }
        let mut tokens = mem::take(&mut self.pending);
        let (start, end) = match (tokens.first(), tokens.last()) {
            (Some(first), Some(last)) => (first.span.0, last.span.1),
            _ => return,
        };
        tokens.push(SpannedToken {
            token: Token::Eof,
            span: (end, end),
        });
        let text = self.input[start..end].to_string();

        let mark = self.state.nodes.len();
        let owner = self.state.roots.len();
        let parsed = StatementParser {
            state: &mut self.state,
            tokens: &tokens,
            pos: 0,
            text: &text,
            offset: start,
            owner,
        }
        .statement();
        match parsed {
            Ok(stmt) => self.commit(stmt, text, mark),
            Err(d) => {
                self.state.nodes.truncate(mark);
                self.errors.push(d);
            }
        }
        tokens.clear();
        self.pending = tokens;
    }

    fn commit(&mut self, stmt: Statement, text: String, mark: usize) {
        let state = &mut self.state;
        if state.resolve_groups {
            let mut errors = Diagnostics::new();
            resolve_subtree(state.nodes, stmt.expr, state.groups, &text, &mut errors);
            if !errors.is_empty() {
                state.nodes.truncate(mark);
                self.unresolved.append(&mut errors);
                return;
            }
        }
        let owner = state.roots.len();
        if let Some(name) = &stmt.variable {
            if let Err(e) = state.symbols.add(name, Symbol::Variable(owner)) {
                state.nodes.truncate(mark);
                self.errors
                    .push(Diagnostic::new(e).with_span(0, name.len()).with_input(text));
                return;
            }
        }
        let kind = if stmt.variable.is_some() {
            RootKind::Variable
        } else {
            RootKind::Selection
        };
        let root = state.nodes.push(
            NodeKind::Root(kind),
            vec![stmt.expr],
            owner,
            Some((0, text.len())),
            false,
            false,
        );
        let name = stmt
            .variable
            .or(stmt.label)
            .unwrap_or_else(|| text[stmt.expr_start..].to_string());
        log::debug!("parsed {:?} '{}'", kind, text);
        state.roots.push(SelectionRoot::new(root, kind, name, text));
        if kind == RootKind::Selection {
            self.produced += 1;
        }
    }
}

/// Line of `input` holding `span`, with the span made relative to it.
fn line_context(input: &str, span: (usize, usize)) -> (String, (usize, usize)) {
    let start = input[..span.0].rfind('\n').map_or(0, |i| i + 1);
    let end = input[span.0..]
        .find('\n')
        .map_or(input.len(), |i| span.0 + i);
    (
        input[start..end].to_string(),
        (span.0 - start, span.1.min(end) - start),
    )
}

/// One parsed statement before it is committed as a root.
struct Statement {
    expr: NodeId,
    variable: Option<String>,
    label: Option<String>,
    /// Offset of the expression within the statement text
    expr_start: usize,
}

/// Recursive descent over the tokens of one statement.
struct StatementParser<'p, 'a> {
    state: &'p mut ParseState<'a>,
    /// Statement tokens followed by an `Eof` sentinel
    tokens: &'p [SpannedToken],
    pos: usize,
    text: &'p str,
    offset: usize,
    owner: usize,
}

type ParseResult<T> = std::result::Result<T, Diagnostic>;

impl StatementParser<'_, '_> {
    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn peek(&self, ahead: usize) -> &Token {
        &self.tokens[(self.pos + ahead).min(self.tokens.len() - 1)].token
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn at_word(&self, word: &str) -> bool {
        self.current().is_word(word)
    }

    /// Span of token `i` relative to the statement text.
    fn token_span(&self, i: usize) -> (usize, usize) {
        let (s, e) = self.tokens[i.min(self.tokens.len() - 1)].span;
        (s - self.offset, e - self.offset)
    }

    /// Span from token `start` to the last consumed token.
    fn span_from(&self, start: usize) -> (usize, usize) {
        let last = self.pos.max(start + 1) - 1;
        (self.token_span(start).0, self.token_span(last).1)
    }

    fn error_at(&self, i: usize, message: impl Into<String>) -> Diagnostic {
        let (s, e) = self.token_span(i);
        Diagnostic::new(message)
            .with_span(s, e)
            .with_input(self.text)
    }

    fn error(&self, message: impl Into<String>) -> Diagnostic {
        self.error_at(self.pos, message)
    }

    fn expect_word(&mut self, word: &str, context: &str) -> ParseResult<()> {
        if self.at_word(word) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!(
                "Expected '{}' in '{}', found {}",
                word,
                context,
                self.current()
            )))
        }
    }

    fn node(
        &mut self,
        kind: NodeKind,
        children: Vec<NodeId>,
        start: usize,
        dynamic: bool,
        topology: bool,
    ) -> NodeId {
        let span = self.span_from(start);
        self.state
            .nodes
            .push(kind, children, self.owner, Some(span), dynamic, topology)
    }

    // statement = IDENT "=" expr | [STRING] expr
    fn statement(mut self) -> ParseResult<Statement> {
        let mut variable = None;
        let mut label = None;
        if let (Token::Ident(name), Token::Assign) = (self.peek(0), self.peek(1)) {
            let name = name.clone();
            if !is_identifier(&name) {
                return Err(self.error(format!("Invalid variable name '{}'", name)));
            }
            if let Some(existing) = self.state.symbols.get(&name) {
                return Err(self.error(format!(
                    "'{}' is already defined as a {}",
                    name,
                    existing.category()
                )));
            }
            variable = Some(name);
            self.advance();
            self.advance();
        } else if let Token::Str(text) = self.peek(0) {
            if starts_expression(self.peek(1)) {
                label = Some(text.clone());
                self.advance();
            }
        }
        let expr_start = self.token_span(self.pos).0;
        let expr = self.parse_or()?;
        if *self.current() != Token::Eof {
            return Err(self.error(format!("Unexpected {}", self.current())));
        }
        Ok(Statement {
            expr,
            variable,
            label,
            expr_start,
        })
    }

    fn parse_binary(
        &mut self,
        word: &str,
        op: BoolOp,
        next: fn(&mut Self) -> ParseResult<NodeId>,
    ) -> ParseResult<NodeId> {
        let start = self.pos;
        let mut left = next(self)?;
        while self.at_word(word) {
            self.advance();
            let right = next(self)?;
            left = self.node(NodeKind::Boolean(op), vec![left, right], start, false, false);
        }
        Ok(left)
    }

    // or = xor ("or" xor)*
    fn parse_or(&mut self) -> ParseResult<NodeId> {
        self.parse_binary("or", BoolOp::Or, Self::parse_xor)
    }

    // xor = and ("xor" and)*
    fn parse_xor(&mut self) -> ParseResult<NodeId> {
        self.parse_binary("xor", BoolOp::Xor, Self::parse_and)
    }

    // and = not ("and" not)*
    fn parse_and(&mut self) -> ParseResult<NodeId> {
        self.parse_binary("and", BoolOp::And, Self::parse_not)
    }

    // not = "not" not | cmp
    fn parse_not(&mut self) -> ParseResult<NodeId> {
        if self.at_word("not") {
            let start = self.pos;
            self.advance();
            let inner = self.parse_not()?;
            Ok(self.node(NodeKind::Boolean(BoolOp::Not), vec![inner], start, false, false))
        } else {
            self.parse_cmp()
        }
    }

    // cmp = sum [cmpop sum]
    fn parse_cmp(&mut self) -> ParseResult<NodeId> {
        let start = self.pos;
        let left = self.parse_sum()?;
        let op = match self.current() {
            Token::Gt => CmpOp::Gt,
            Token::Lt => CmpOp::Lt,
            Token::Ge => CmpOp::Ge,
            Token::Le => CmpOp::Le,
            Token::Eq => CmpOp::Eq,
            Token::Ne => CmpOp::Ne,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_sum()?;
        Ok(self.node(NodeKind::Compare(op), vec![left, right], start, false, false))
    }

    // sum = prod (("+" | "-") prod)*
    fn parse_sum(&mut self) -> ParseResult<NodeId> {
        let start = self.pos;
        let mut left = self.parse_prod()?;
        loop {
            let op = match self.current() {
                Token::Plus => ArithOp::Add,
                Token::Dash => ArithOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_prod()?;
            left = self.node(NodeKind::Arithmetic(op), vec![left, right], start, false, false);
        }
    }

    // prod = unary (("*" | "/") unary)*
    fn parse_prod(&mut self) -> ParseResult<NodeId> {
        let start = self.pos;
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current() {
                Token::Star => ArithOp::Mul,
                Token::Slash => ArithOp::Div,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = self.node(NodeKind::Arithmetic(op), vec![left, right], start, false, false);
        }
    }

    // unary = "-" unary | primary
    fn parse_unary(&mut self) -> ParseResult<NodeId> {
        if *self.current() == Token::Dash {
            let start = self.pos;
            self.advance();
            let inner = self.parse_unary()?;
            let neg = NodeKind::Arithmetic(ArithOp::Neg);
            return Ok(self.node(neg, vec![inner], start, false, false));
        }
        self.parse_primary()
    }

    // operand = "not" operand | primary
    fn parse_operand(&mut self) -> ParseResult<NodeId> {
        if self.at_word("not") {
            let start = self.pos;
            self.advance();
            let inner = self.parse_operand()?;
            return Ok(self.node(NodeKind::Boolean(BoolOp::Not), vec![inner], start, false, false));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> ParseResult<NodeId> {
        let start = self.pos;
        match self.current().clone() {
            Token::LParen => {
                self.advance();
                let inner = self.parse_or()?;
                if *self.current() != Token::RParen {
                    return Err(self.error(format!("Expected ')', found {}", self.current())));
                }
                self.advance();
                Ok(inner)
            }
            Token::Integer(i) => {
                self.advance();
                Ok(self.node(NodeKind::Literal(i as f64), vec![], start, false, false))
            }
            Token::Float(x) => {
                self.advance();
                Ok(self.node(NodeKind::Literal(x), vec![], start, false, false))
            }
            Token::Str(name) => {
                self.advance();
                Ok(self.group_reference(Some(name), None, start))
            }
            Token::Ident(word) if word == "group" => self.parse_group(),
            Token::Ident(word) => {
                let symbol = self.state.symbols.get(&word).cloned();
                match symbol {
                    Some(Symbol::Method(id)) => self.parse_method(id),
                    Some(Symbol::PositionType(ptype)) => self.parse_positions(ptype),
                    Some(Symbol::Variable(root)) => {
                        self.advance();
                        let target = &self.state.nodes[self.state.roots[root].node];
                        let (dynamic, topology) = (target.dynamic, target.requires_topology);
                        Ok(self.node(
                            NodeKind::VariableRef { name: word, root },
                            vec![],
                            start,
                            dynamic,
                            topology,
                        ))
                    }
                    Some(Symbol::Group(_)) => {
                        self.advance();
                        Ok(self.group_reference(Some(word), None, start))
                    }
                    Some(Symbol::Reserved) => Err(self.error(format!("Unexpected '{}'", word))),
                    None => Err(self.error(format!("Unknown keyword '{}'", word))),
                }
            }
            tok => Err(self.error(format!("Expected selection expression, found {}", tok))),
        }
    }

    fn group_reference(&mut self, name: Option<String>, id: Option<usize>, start: usize) -> NodeId {
        self.node(NodeKind::GroupReference { name, id }, vec![], start, false, false)
    }

    // "group" (STRING | IDENT | INT)
    fn parse_group(&mut self) -> ParseResult<NodeId> {
        let start = self.pos;
        self.advance();
        match self.current().clone() {
            Token::Str(name) | Token::Ident(name) => {
                self.advance();
                Ok(self.group_reference(Some(name), None, start))
            }
            Token::Integer(i) if i >= 0 => {
                self.advance();
                Ok(self.group_reference(None, Some(i as usize), start))
            }
            tok => Err(self.error(format!("Expected group name or number, found {}", tok))),
        }
    }

    // POSTYPE "of" operand
    fn parse_positions(&mut self, ptype: PositionType) -> ParseResult<NodeId> {
        let start = self.pos;
        self.advance();
        self.expect_word("of", &format!("{} of ...", ptype))?;
        let child = self.parse_operand()?;
        Ok(self.node(
            NodeKind::Positions(ptype),
            vec![child],
            start,
            true,
            ptype.requires_topology(),
        ))
    }

    fn parse_method(&mut self, id: MethodId) -> ParseResult<NodeId> {
        let start = self.pos;
        let methods = self.state.methods;
        let sig = methods.signature(id);
        self.advance();
        let mut children = Vec::new();
        let mut choices = Vec::new();
        for param in &sig.params {
            if let Some(keyword) = param.keyword {
                self.expect_word(keyword, &sig.usage())?;
            }
            match param.kind {
                ParamKind::Real => children.push(self.parse_sum()?),
                ParamKind::Group | ParamKind::Positions => children.push(self.parse_operand()?),
                ParamKind::Choice(words) => {
                    let found = match self.current() {
                        Token::Ident(w) => words.iter().find(|c| **c == w.as_str()).copied(),
                        _ => None,
                    };
                    let Some(word) = found else {
                        return Err(self.error(format!(
                            "Expected one of {} in '{}', found {}",
                            words.join(", "),
                            sig.usage(),
                            self.current()
                        )));
                    };
                    choices.push(word);
                    self.advance();
                }
            }
        }
        let matcher = match sig.returns {
            ValueType::Str => self.parse_patterns(),
            ValueType::Int => self.parse_ranges()?,
            _ => None,
        };
        Ok(self.node(
            NodeKind::MethodCall {
                method: id,
                choices,
                matcher,
            },
            children,
            start,
            sig.flags.contains(MethodFlags::DYNAMIC),
            sig.flags.contains(MethodFlags::REQUIRES_TOPOLOGY),
        ))
    }

    // (STRING | IDENT | INT)*, stopping at known names
    fn parse_patterns(&mut self) -> Option<Matcher> {
        let mut patterns = Vec::new();
        loop {
            let pattern = match self.current() {
                Token::Str(s) => StringPattern::new(s),
                Token::Ident(s) if !self.state.symbols.contains(s) => StringPattern::new(s),
                Token::Integer(i) => StringPattern::new(&i.to_string()),
                _ => break,
            };
            patterns.push(pattern);
            self.advance();
        }
        (!patterns.is_empty()).then_some(Matcher::Patterns(patterns))
    }

    // range (","? range)* ; range = INT [("to" | "-" | ":") INT]
    fn parse_ranges(&mut self) -> ParseResult<Option<Matcher>> {
        let mut ranges = Vec::new();
        while let Token::Integer(lo) = *self.current() {
            let start = self.pos;
            self.advance();
            let is_range =
                matches!(self.current(), Token::Dash | Token::Colon) || self.at_word("to");
            if is_range {
                self.advance();
                let Token::Integer(hi) = *self.current() else {
                    return Err(self.error(format!("Expected range end, found {}", self.current())));
                };
                self.advance();
                if hi < lo {
                    let (s, e) = self.span_from(start);
                    return Err(Diagnostic::new(format!("Invalid range {} to {}", lo, hi))
                        .with_span(s, e)
                        .with_input(self.text));
                }
                ranges.push(RangeSpec::Range(lo, hi));
            } else {
                ranges.push(RangeSpec::Single(lo));
            }
            if *self.current() == Token::Comma {
                self.advance();
                if !matches!(self.current(), Token::Integer(_)) {
                    return Err(self.error(format!(
                        "Expected integer after ',', found {}",
                        self.current()
                    )));
                }
            }
        }
        Ok((!ranges.is_empty()).then_some(Matcher::Ranges(ranges)))
    }
}

/// Whether a token after a string may begin the labelled expression.
fn starts_expression(tok: &Token) -> bool {
    match tok {
        Token::Ident(w) => !matches!(w.as_str(), "and" | "or" | "xor" | "of" | "to"),
        Token::Str(_) | Token::Integer(_) | Token::Float(_) | Token::LParen | Token::Dash => true,
        _ => false,
    }
}

/// Parse complete text; `;`, newlines and comments as in files.
pub(crate) fn parse_text(state: ParseState<'_>, text: &str, expected: Option<usize>) -> Result<()> {
    let mut parser = PushParser::new(state, expected);
    parser.set_input(text);
    let mut lexer = Lexer::new(text);
    loop {
        let tok = lexer.next_token();
        let at_eof = tok.token == Token::Eof;
        match parser.push(tok) {
            PushStatus::More if !at_eof => {}
            PushStatus::Accept if !at_eof => {
                if lexer.any(|t| !matches!(t.token, Token::Separator | Token::Eof)) {
                    log::warn!(
                        "ignoring input after the expected {} selections",
                        parser.produced()
                    );
                }
                break;
            }
            _ => break,
        }
    }
    parser.into_result()
}

/// Read one logical line, joining physical lines that end in `\`.
fn read_logical_line(source: &mut dyn LineSource) -> std::io::Result<Option<String>> {
    let Some(mut line) = source.next_line(Prompt::Statement)? else {
        return Ok(None);
    };
    loop {
        let trimmed = line.trim_end().len();
        if !line[..trimmed].ends_with('\\') {
            return Ok(Some(line));
        }
        line.truncate(trimmed - 1);
        match source.next_line(Prompt::Continuation)? {
            Some(next) => {
                line.push(' ');
                line.push_str(&next);
            }
            // end of input during a continuation
            None => return Ok(Some(line)),
        }
    }
}

/// Parse statements pulled line by line from `source`.
pub(crate) fn parse_lines(
    state: ParseState<'_>,
    source: &mut dyn LineSource,
    expected: Option<usize>,
) -> Result<()> {
    let interactive = source.is_interactive();
    let mut parser = PushParser::new(state, expected);
    let io_error = |e| SelectionError::Io {
        path: PathBuf::from("<input>"),
        source: e,
    };
    loop {
        let Some(line) = read_logical_line(source).map_err(io_error)? else {
            parser.push(SpannedToken {
                token: Token::Eof,
                span: (0, 0),
            });
            break;
        };
        parser.set_input(&line);
        let mut lexer = Lexer::new(&line);
        let mut status = PushStatus::More;
        for tok in lexer.by_ref() {
            let tok = match tok.token {
                Token::Eof => SpannedToken {
                    token: Token::Separator,
                    span: tok.span,
                },
                _ => tok,
            };
            status = parser.push(tok);
            if status != PushStatus::More {
                break;
            }
        }
        if interactive {
            let errors = parser.take_errors();
            if !errors.is_empty() {
                source.report(&errors.to_string());
            }
        }
        match status {
            PushStatus::More => {}
            PushStatus::Accept => {
                if lexer.any(|t| !matches!(t.token, Token::Separator | Token::Eof)) {
                    log::warn!(
                        "ignoring input after the expected {} selections",
                        parser.produced()
                    );
                }
                break;
            }
            PushStatus::Abort => break,
        }
    }
    parser.into_result()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Interactive, ReaderSource};

    struct Fixture {
        nodes: NodeArena,
        roots: Vec<SelectionRoot>,
        symbols: SymbolTable,
        methods: MethodRegistry,
        groups: Option<IndexGroups>,
    }

    impl Fixture {
        fn new() -> Self {
            let methods = MethodRegistry::with_builtins();
            let mut symbols = SymbolTable::new();
            for (name, id) in methods.names() {
                symbols.add(name, Symbol::Method(id)).unwrap();
            }
            Self {
                nodes: NodeArena::new(),
                roots: Vec::new(),
                symbols,
                methods,
                groups: None,
            }
        }

        fn state(&mut self) -> ParseState<'_> {
            ParseState {
                nodes: &mut self.nodes,
                roots: &mut self.roots,
                symbols: &mut self.symbols,
                methods: &self.methods,
                resolve_groups: self.groups.is_some(),
                groups: self.groups.as_ref(),
            }
        }

        fn parse(&mut self, text: &str) -> Result<()> {
            parse_text(self.state(), text, None)
        }

        fn expr(&self, root: usize) -> &NodeKind {
            let root = &self.nodes[self.roots[root].node];
            &self.nodes[root.children[0]].kind
        }
    }

    #[test]
    fn test_precedence() {
        let mut f = Fixture::new();
        f.parse("name CA or resname ALA and not water").unwrap();
        assert!(matches!(f.expr(0), NodeKind::Boolean(BoolOp::Or)));
        let root = &f.nodes[f.roots[0].node];
        let or = &f.nodes[root.children[0]];
        assert!(matches!(f.nodes[or.children[1]].kind, NodeKind::Boolean(BoolOp::And)));
    }

    #[test]
    fn test_matchers() {
        let mut f = Fixture::new();
        f.parse("name CA \"C*\" 1HB; resid 1 to 3, 5 7-9").unwrap();
        match f.expr(0) {
            NodeKind::MethodCall { matcher: Some(Matcher::Patterns(p)), .. } => {
                assert_eq!(p.len(), 3);
                assert_eq!(p[1], StringPattern::Glob("C*".into()));
            }
            other => panic!("unexpected {:?}", other),
        }
        match f.expr(1) {
            NodeKind::MethodCall { matcher: Some(Matcher::Ranges(r)), .. } => {
                assert_eq!(
                    r,
                    &vec![RangeSpec::Range(1, 3), RangeSpec::Single(5), RangeSpec::Range(7, 9)]
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_method_parameters() {
        let mut f = Fixture::new();
        f.parse("within 0.5 of res_com of resname LIG and name CA")
            .unwrap();
        assert!(matches!(f.expr(0), NodeKind::Boolean(BoolOp::And)));
        let within = f.nodes.iter().find(|(_, n)| {
            matches!(n.kind, NodeKind::MethodCall { ref choices, .. } if choices.is_empty())
                && n.children.len() == 2
        });
        let (_, within) = within.unwrap();
        assert!(within.dynamic);
        assert!(within.requires_topology);
        assert!(matches!(f.nodes[within.children[1]].kind, NodeKind::Positions(_)));

        f.parse("same residue as name CA").unwrap();
        assert!(matches!(
            f.expr(1),
            NodeKind::MethodCall { choices, .. } if choices == &vec!["residue"]
        ));
    }

    #[test]
    fn test_labels_and_variables() {
        let mut f = Fixture::new();
        f.parse("lig = resname LIG\n\"near ligand\" within 5 of lig\nlig")
            .unwrap();
        assert_eq!(f.roots.len(), 3);
        assert!(f.roots[0].is_variable());
        assert_eq!(f.roots[0].name, "lig");
        assert_eq!(f.roots[0].text, "lig = resname LIG");
        assert_eq!(f.roots[1].name, "near ligand");
        assert_eq!(f.roots[1].text, "\"near ligand\" within 5 of lig");
        assert_eq!(f.roots[2].name, "lig");
        assert!(matches!(f.expr(2), NodeKind::VariableRef { root: 0, .. }));
        assert!(f.nodes[f.roots[2].node].requires_topology);
    }

    #[test]
    fn test_redefinition_is_rejected() {
        let mut f = Fixture::new();
        let err = f.parse("a = all; a = none").unwrap_err();
        assert!(err.to_string().contains("'a' is already defined as a variable"));
        let err = Fixture::new().parse("name = all").unwrap_err();
        assert!(err.to_string().contains("already defined as a method"));
    }

    #[test]
    fn test_errors_are_aggregated_and_statements_kept() {
        let mut f = Fixture::new();
        let err = f.parse("name CA; within of x; resname LIG; bogus").unwrap_err();
        let diags = err.diagnostics().unwrap();
        assert_eq!(diags.len(), 2);
        assert!(diags.to_string().contains("Unknown keyword 'bogus'"));
        assert_eq!(f.roots.len(), 2);
        assert_eq!(f.roots[1].text, "resname LIG");
    }

    #[test]
    fn test_failed_statement_leaves_no_nodes() {
        let mut f = Fixture::new();
        f.parse("all").unwrap();
        let before = f.nodes.len();
        assert!(f.parse("name CA and (resid 1").is_err());
        assert_eq!(f.nodes.len(), before);
    }

    #[test]
    fn test_lexical_error_caret() {
        let mut f = Fixture::new();
        let err = f.parse("name CA\nname \"CB").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Unterminated string"));
        assert!(msg.contains("\n  name \"CB\n       ^"));
        assert_eq!(f.roots.len(), 1);
    }

    #[test]
    fn test_group_references() {
        let mut f = Fixture::new();
        f.parse("group \"A\"; group 1; \"B\"").unwrap();
        assert!(matches!(f.expr(0), NodeKind::GroupReference { name: Some(n), .. } if n == "A"));
        assert!(matches!(f.expr(1), NodeKind::GroupReference { id: Some(1), .. }));

        let mut f = Fixture::new();
        f.groups = Some(IndexGroups::new().with_group("A", [0, 2, 4]));
        f.parse("group \"A\"").unwrap();
        assert!(matches!(f.expr(0), NodeKind::ConstantGroup { .. }));
        let err = f.parse("group \"Z\"").unwrap_err();
        assert!(matches!(err, SelectionError::UnresolvedGroup(_)));
        assert_eq!(f.roots.len(), 1);
    }

    #[test]
    fn test_expected_count_accepts_early() {
        let mut f = Fixture::new();
        parse_text(f.state(), "all; none; bogus", Some(2)).unwrap();
        assert_eq!(f.roots.len(), 2);

        let mut f = Fixture::new();
        let err = parse_text(f.state(), "all", Some(2)).unwrap_err();
        assert!(err.to_string().contains("Too few selections provided"));
        assert_eq!(f.roots.len(), 1);
    }

    #[test]
    fn test_line_continuation() {
        let mut f = Fixture::new();
        let mut src = ReaderSource::new("name CA and \\\n  resname ALA\n\n;;all".as_bytes());
        parse_lines(f.state(), &mut src, None).unwrap();
        assert_eq!(f.roots.len(), 2);
        assert_eq!(f.roots[0].text, "name CA and    resname ALA");
    }

    #[test]
    fn test_interactive_reports_and_continues() {
        let mut f = Fixture::new();
        let mut out = Vec::new();
        {
            let mut src = Interactive::new(ReaderSource::new("bogus\nall\n".as_bytes()), &mut out);
            parse_lines(f.state(), &mut src, Some(1)).unwrap();
        }
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("Unknown keyword 'bogus'"));
        assert_eq!(f.roots.len(), 1);
    }

    #[test]
    fn test_interactive_too_few() {
        let mut f = Fixture::new();
        let mut src = Interactive::new(ReaderSource::new("all\n".as_bytes()), Vec::new());
        let err = parse_lines(f.state(), &mut src, Some(2)).unwrap_err();
        assert!(matches!(err, SelectionError::Parse(_)));
        assert_eq!(f.roots.len(), 1);
    }
}
