use std::fmt;

use crate::error::{IsolationError, IsolationResult};

/// A lexer token
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Keyword(Keyword),
    /// A double-quoted tag, without the quotes.
    Identifier(String),
    /// The exact text between `{` and its matching `}`.
    SqlBlock(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Keyword(k) => write!(f, "keyword '{}'", k),
            Token::Identifier(s) => write!(f, "identifier \"{}\"", s),
            Token::SqlBlock(_) => write!(f, "SQL block"),
        }
    }
}

impl From<Keyword> for Token {
    fn from(keyword: Keyword) -> Self {
        Self::Keyword(keyword)
    }
}

/// Lexer keywords
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keyword {
    Keywords,
    Setup,
    Teardown,
    Session,
    Step,
    Permutation,
}

impl Keyword {
    /// The keyword spelled `word`, if any. Keywords are case-sensitive.
    fn lookup(word: &str) -> Option<Self> {
        Some(match word {
            "keywords" => Self::Keywords,
            "setup" => Self::Setup,
            "teardown" => Self::Teardown,
            "session" => Self::Session,
            "step" => Self::Step,
            "permutation" => Self::Permutation,
            _ => return None,
        })
    }

    fn to_str(self) -> &'static str {
        match self {
            Self::Keywords => "keywords",
            Self::Setup => "setup",
            Self::Teardown => "teardown",
            Self::Session => "session",
            Self::Step => "step",
            Self::Permutation => "permutation",
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_str())
    }
}

/// A token with the position (1-based) where it starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
    pub column: usize,
}

/// A lexer tokenizes a spec document as an iterator.
///
/// `#` starts a comment running to the end of the line, except inside SQL
/// blocks, whose text is passed through untouched.
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Iterator for Lexer<'a> {
    type Item = IsolationResult<Spanned>;

    fn next(&mut self) -> Option<Self::Item> {
        self.scan().transpose()
    }
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Lexer<'a> {
        Lexer {
            input,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Line and column of the next character to scan.
    pub fn location(&self) -> (usize, usize) {
        (self.line, self.column)
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Consumes whitespace and `#` comments.
    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '#' {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.bump();
                }
            } else {
                break;
            }
        }
    }

    fn scan(&mut self) -> IsolationResult<Option<Spanned>> {
        self.skip_trivia();
        let (line, column) = self.location();
        let token = match self.peek() {
            None => return Ok(None),
            Some('"') => self.scan_identifier(line, column)?,
            Some('{') => self.scan_sql_block(line, column)?,
            Some(c) if c.is_alphabetic() => self.scan_keyword(line, column)?,
            Some(c) => {
                return Err(IsolationError::Syntax {
                    line,
                    column,
                    unexpected: format!("character '{}'", c),
                })
            }
        };
        Ok(Some(Spanned {
            token,
            line,
            column,
        }))
    }

    fn scan_identifier(&mut self, line: usize, column: usize) -> IsolationResult<Token> {
        self.bump();
        let start = self.pos;
        loop {
            match self.peek() {
                Some('"') => {
                    let ident = self.input[start..self.pos].to_string();
                    self.bump();
                    return Ok(Token::Identifier(ident));
                }
                Some('\n') | None => {
                    return Err(IsolationError::Syntax {
                        line,
                        column,
                        unexpected: "unterminated identifier".to_string(),
                    })
                }
                Some(_) => {
                    self.bump();
                }
            }
        }
    }

    fn scan_sql_block(&mut self, line: usize, column: usize) -> IsolationResult<Token> {
        self.bump();
        let start = self.pos;
        let mut depth = 1usize;
        loop {
            let end = self.pos;
            match self.bump() {
                Some('{') => depth += 1,
                Some('}') => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(Token::SqlBlock(self.input[start..end].to_string()));
                    }
                }
                Some(_) => {}
                None => {
                    return Err(IsolationError::Syntax {
                        line,
                        column,
                        unexpected: "unterminated SQL block".to_string(),
                    })
                }
            }
        }
    }

    fn scan_keyword(&mut self, line: usize, column: usize) -> IsolationResult<Token> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.bump();
            } else {
                break;
            }
        }
        let word = &self.input[start..self.pos];
        Keyword::lookup(word)
            .map(Token::Keyword)
            .ok_or_else(|| IsolationError::Syntax {
                line,
                column,
                unexpected: format!("word '{}'", word),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        Lexer::new(input)
            .map(|t| t.map(|s| s.token))
            .collect::<IsolationResult<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_keywords_identifiers_and_blocks() {
        let toks = tokens("session \"s1\"\nstep \"a\" { SELECT 1; }");
        assert_eq!(
            toks,
            vec![
                Keyword::Session.into(),
                Token::Identifier("s1".into()),
                Keyword::Step.into(),
                Token::Identifier("a".into()),
                Token::SqlBlock(" SELECT 1; ".into()),
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped_outside_blocks() {
        let toks = tokens("# leading comment\nsetup { SELECT '#x'; } # trailing");
        assert_eq!(
            toks,
            vec![Keyword::Setup.into(), Token::SqlBlock(" SELECT '#x'; ".into())]
        );
    }

    #[test]
    fn test_nested_braces_stay_in_block() {
        let toks = tokens("setup { SELECT '{1,2}'::int[]; }");
        assert_eq!(toks[1], Token::SqlBlock(" SELECT '{1,2}'::int[]; ".into()));
    }

    #[test]
    fn test_positions() {
        let spanned: Vec<Spanned> = Lexer::new("setup\n  {x}")
            .collect::<IsolationResult<Vec<_>>>()
            .unwrap();
        assert_eq!((spanned[0].line, spanned[0].column), (1, 1));
        assert_eq!((spanned[1].line, spanned[1].column), (2, 3));
    }

    #[test]
    fn test_location_tracks_consumed_input() {
        let mut lexer = Lexer::new("setup\n  {x}  ");
        assert_eq!(lexer.location(), (1, 1));
        let first = lexer.next().unwrap().unwrap();
        assert_eq!(first.token, Keyword::Setup.into());
        assert_eq!(lexer.location(), (1, 6));
        lexer.next().unwrap().unwrap();
        assert_eq!(lexer.location(), (2, 6));
        assert!(lexer.next().is_none());
        assert_eq!(lexer.location(), (2, 8));
    }

    #[test]
    fn test_keyword_lookup_is_exact() {
        assert_eq!(Keyword::lookup("permutation"), Some(Keyword::Permutation));
        assert_eq!(Keyword::lookup("keywords"), Some(Keyword::Keywords));
        assert_eq!(Keyword::lookup("Setup"), None);
        assert_eq!(Keyword::lookup("steps"), None);
    }

    #[test]
    fn test_unknown_word_is_syntax_error() {
        let err = Lexer::new("setup {x}\nsesion \"s1\"")
            .collect::<IsolationResult<Vec<_>>>()
            .unwrap_err();
        match err {
            IsolationError::Syntax {
                line,
                column,
                unexpected,
            } => {
                assert_eq!((line, column), (2, 1));
                assert_eq!(unexpected, "word 'sesion'");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unterminated_block() {
        let err = Lexer::new("setup { SELECT 1;")
            .collect::<IsolationResult<Vec<_>>>()
            .unwrap_err();
        assert!(matches!(err, IsolationError::Syntax { line: 1, column: 7, .. }));
    }
}
