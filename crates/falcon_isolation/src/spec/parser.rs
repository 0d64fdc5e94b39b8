use std::collections::HashSet;
use std::iter::Peekable;

use tracing::debug;

use super::lexer::{Keyword, Lexer, Spanned, Token};
use super::model::{Permutation, SessionSpec, Spec, SqlBlock, Step};
use crate::error::{IsolationError, IsolationResult};

/// Parse a spec document.
///
/// ```text
/// document    := [keywords] setup* teardown* session+ permutation*
/// keywords    := "keywords" BLOCK
/// setup       := "setup" BLOCK
/// teardown    := "teardown" BLOCK
/// session     := "session" ID [setup] step+ [teardown]
/// step        := "step" ID BLOCK
/// permutation := "permutation" ID+
/// ```
pub fn parse_spec(text: &str) -> IsolationResult<Spec> {
    Parser::new(text).parse()
}

/// A recursive-descent parser over the spec token stream.
pub struct Parser<'a> {
    lexer: Peekable<Lexer<'a>>,
    /// Position of the last consumed token, for end-of-input errors.
    last_position: (usize, usize),
}

impl<'a> Parser<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            lexer: Lexer::new(text).peekable(),
            last_position: (1, 1),
        }
    }

    pub fn parse(mut self) -> IsolationResult<Spec> {
        let mut spec = Spec::default();

        if self.next_is(Keyword::Keywords)? {
            self.next()?;
            let block = self.expect_block()?;
            spec.keywords = parse_keyword_lines(&block);
        }
        while self.next_is(Keyword::Setup)? {
            self.next()?;
            spec.setups.push(SqlBlock::new(self.expect_block()?));
        }
        while self.next_is(Keyword::Teardown)? {
            self.next()?;
            spec.teardowns.push(SqlBlock::new(self.expect_block()?));
        }

        let mut session_tags = HashSet::new();
        loop {
            let session = self.parse_session()?;
            if !session_tags.insert(session.tag.clone()) {
                return Err(IsolationError::DuplicateSession(session.tag));
            }
            spec.sessions.push(session);
            if !self.next_is(Keyword::Session)? {
                break;
            }
        }

        while self.next_is(Keyword::Permutation)? {
            self.next()?;
            let mut tags = vec![self.expect_identifier()?];
            while let Some(tag) = self.next_if_identifier()? {
                tags.push(tag);
            }
            spec.permutations.push(Permutation::new(tags));
        }

        if let Some(spanned) = self.lexer.next().transpose()? {
            return Err(unexpected(&spanned));
        }

        debug!("parsed spec: {}", spec.summary());
        Ok(spec)
    }

    fn parse_session(&mut self) -> IsolationResult<SessionSpec> {
        self.expect_keyword(Keyword::Session)?;
        let tag = self.expect_identifier()?;

        let setup = if self.next_is(Keyword::Setup)? {
            self.next()?;
            Some(SqlBlock::new(self.expect_block()?))
        } else {
            None
        };

        let mut steps: Vec<Step> = Vec::new();
        loop {
            self.expect_keyword(Keyword::Step)?;
            let step_tag = self.expect_identifier()?;
            if steps.iter().any(|s| s.tag == step_tag) {
                return Err(IsolationError::DuplicateStep {
                    session: tag,
                    step: step_tag,
                });
            }
            let sql = SqlBlock::new(self.expect_block()?);
            steps.push(Step {
                tag: step_tag,
                session_tag: tag.clone(),
                sql,
            });
            if !self.next_is(Keyword::Step)? {
                break;
            }
        }

        let teardown = if self.next_is(Keyword::Teardown)? {
            self.next()?;
            Some(SqlBlock::new(self.expect_block()?))
        } else {
            None
        };

        Ok(SessionSpec {
            tag,
            setup,
            teardown,
            steps,
        })
    }

    /// Consumes the next token, failing at end of input.
    fn next(&mut self) -> IsolationResult<Spanned> {
        match self.lexer.next().transpose()? {
            Some(spanned) => {
                self.last_position = (spanned.line, spanned.column);
                Ok(spanned)
            }
            None => Err(self.end_of_input()),
        }
    }

    fn peek(&mut self) -> IsolationResult<Option<&Spanned>> {
        if let Some(Err(_)) = self.lexer.peek() {
            if let Some(Err(e)) = self.lexer.next() {
                return Err(e);
            }
        }
        Ok(self.lexer.peek().and_then(|r| r.as_ref().ok()))
    }

    fn next_is(&mut self, keyword: Keyword) -> IsolationResult<bool> {
        Ok(matches!(
            self.peek()?,
            Some(Spanned { token: Token::Keyword(k), .. }) if *k == keyword
        ))
    }

    fn next_if_identifier(&mut self) -> IsolationResult<Option<String>> {
        let is_ident = matches!(
            self.peek()?,
            Some(Spanned {
                token: Token::Identifier(_),
                ..
            })
        );
        if !is_ident {
            return Ok(None);
        }
        match self.next()?.token {
            Token::Identifier(ident) => Ok(Some(ident)),
            _ => Ok(None),
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> IsolationResult<()> {
        let spanned = self.next()?;
        match spanned.token {
            Token::Keyword(k) if k == keyword => Ok(()),
            _ => Err(unexpected(&spanned)),
        }
    }

    fn expect_identifier(&mut self) -> IsolationResult<String> {
        let spanned = self.next()?;
        match spanned.token {
            Token::Identifier(ident) => Ok(ident),
            _ => Err(unexpected(&spanned)),
        }
    }

    fn expect_block(&mut self) -> IsolationResult<String> {
        let spanned = self.next()?;
        match spanned.token {
            Token::SqlBlock(raw) => Ok(raw),
            _ => Err(unexpected(&spanned)),
        }
    }

    fn end_of_input(&self) -> IsolationError {
        let (line, column) = self.last_position;
        IsolationError::Syntax {
            line,
            column,
            unexpected: "end of input".to_string(),
        }
    }
}

fn unexpected(spanned: &Spanned) -> IsolationError {
    IsolationError::Syntax {
        line: spanned.line,
        column: spanned.column,
        unexpected: spanned.token.to_string(),
    }
}

/// One command per non-empty line.
fn parse_keyword_lines(block: &str) -> Vec<String> {
    block
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}
