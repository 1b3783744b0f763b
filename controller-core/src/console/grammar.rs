#![allow(clippy::module_name_repetitions)]

//! Lexer and parser for operator command lines.
//!
//! The lexer uses `regal` to produce a bounded token stream; the parser runs
//! `winnow` combinators over those tokens, driven by the argument layouts in
//! [`super::catalog`].

use core::fmt;
use core::ops::Range;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
#[allow(deprecated)]
use winnow::error::ErrorKind;
use winnow::error::{ErrMode, ParserError};
use winnow::prelude::*;
use winnow::stream::Stream;

use super::catalog::{self, ArgSpec, ChoiceTag, CommandTag, Keyword};
use crate::{event_manager::InterlockKind, ps_module::PsState};

/// Maximum number of tokens produced per command line.
pub const MAX_TOKENS: usize = 16;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

/// Lexical token kinds.
#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    /// Decimal literal with optional sign and fraction.
    #[regex(r"-?[0-9]+(?:\.[0-9]+)?")]
    Number,
    /// Identifier or keyword (case-insensitive match performed later).
    #[regex(r"[A-Za-z][A-Za-z0-9-]*")]
    Ident,
    /// Inline whitespace is ignored.
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    /// End-of-line token (`\r`, `\n`, or `\r\n`).
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    /// Pseudo variant used when the lexer encounters unsupported input.
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// Token emitted by the lexer with a byte span back into the source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    /// Input produced more tokens than the static buffer allows.
    TooManyTokens { processed: usize },
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens { processed } => {
                write!(f, "line too long after {processed} tokens")
            }
            LexError::Engine => f.write_str("lexer engine error"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarErrorKind<'a> {
    UnexpectedToken {
        expected: &'static str,
        found: &'a str,
        span: Range<usize>,
    },
    UnexpectedEnd {
        expected: &'static str,
    },
    InvalidNumber {
        span: Range<usize>,
    },
    InvalidIndex {
        span: Range<usize>,
    },
    InvalidToken {
        span: Range<usize>,
        lexeme: &'a str,
    },
}

impl fmt::Display for GrammarErrorKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarErrorKind::UnexpectedToken {
                expected,
                found,
                span,
            } => write!(f, "expected {expected}, found `{found}` at {}", span.start),
            GrammarErrorKind::UnexpectedEnd { expected } => {
                write!(f, "missing {expected}")
            }
            GrammarErrorKind::InvalidNumber { span } => {
                write!(f, "invalid number at {}", span.start)
            }
            GrammarErrorKind::InvalidIndex { span } => {
                write!(f, "index must be 0..=31 at {}", span.start)
            }
            GrammarErrorKind::InvalidToken { span, lexeme } => {
                write!(f, "unsupported input `{lexeme}` at {}", span.start)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrammarError<'a> {
    pub kind: GrammarErrorKind<'a>,
}

impl fmt::Display for GrammarError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl<'a> GrammarError<'a> {
    fn unexpected(expected: &'static str, token: Option<&Token<'a>>) -> Self {
        GrammarError {
            kind: match token {
                Some(tok) if tok.kind != TokenKind::Eol => GrammarErrorKind::UnexpectedToken {
                    expected,
                    found: tok.lexeme,
                    span: tok.span.clone(),
                },
                _ => GrammarErrorKind::UnexpectedEnd { expected },
            },
        }
    }

    fn invalid_number(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidNumber {
                span: token.span.clone(),
            },
        }
    }

    fn invalid_index(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidIndex {
                span: token.span.clone(),
            },
        }
    }

    fn invalid_token(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidToken {
                span: token.span.clone(),
                lexeme: token.lexeme,
            },
        }
    }
}

type Input<'src, 'slice> = &'slice [Token<'src>];

#[allow(deprecated)]
impl<'src, 'slice> ParserError<Input<'src, 'slice>> for GrammarError<'src>
where
    'src: 'slice,
{
    fn from_error_kind(input: &Input<'src, 'slice>, _kind: ErrorKind) -> Self {
        GrammarError::unexpected("token", input.first())
    }

    fn append(
        self,
        _input: &Input<'src, 'slice>,
        _token_start: &<Input<'src, 'slice> as Stream>::Checkpoint,
        _kind: ErrorKind,
    ) -> Self {
        self
    }

    fn or(self, other: Self) -> Self {
        other
    }
}

/// Combined lex/parse error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Lex(LexError),
    Grammar(GrammarError<'a>),
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => err.fmt(f),
            ParseError::Grammar(err) => err.fmt(f),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopMode {
    Open,
    Closed,
}

/// Structured commands produced by the parser.
#[derive(Clone, Debug, PartialEq)]
pub enum Command<'a> {
    TurnOn,
    TurnOff,
    Reset,
    Status,
    Setpoint(f32),
    Mode(PsState),
    Loop(LoopMode),
    Interlock { kind: InterlockKind, index: u8 },
    Help(HelpCommand<'a>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelpCommand<'a> {
    pub topic: Option<&'a str>,
}

/// Tokenize the provided line.
///
/// # Errors
///
/// Returns [`LexError`] when the line does not fit the token buffer.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let compiled = TokenKind::lexer();
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let partial = cache
        .rebuild(compiled, line)
        .map_err(map_incremental_error)?;
    let mut buffer = TokenBuffer::new();

    let complete = cache
        .tokens()
        .filter(|record| !record.skipped)
        .map(|record| (record.token, record.start, record.end));
    let trailing = partial
        .filter(|partial| !partial.fragment.is_empty())
        .map(|partial| {
            (
                TokenKind::Error,
                partial.start,
                partial.start + partial.fragment.len(),
            )
        });

    for (kind, start, end) in complete.chain(trailing) {
        let span = start..end;
        let lexeme = &line[span.clone()];
        buffer
            .push(Token { kind, lexeme, span })
            .map_err(|_| LexError::TooManyTokens {
                processed: MAX_TOKENS + 1,
            })?;
    }

    Ok(buffer)
}

fn map_incremental_error(error: IncrementalError) -> LexError {
    match error {
        IncrementalError::TokenOverflow => LexError::TooManyTokens {
            processed: MAX_TOKENS,
        },
        _ => LexError::Engine,
    }
}

/// Parse one command line.
///
/// # Errors
///
/// Returns [`ParseError`] for unsupported characters, unknown keywords,
/// missing or malformed arguments and trailing input.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let tokens = lex(line).map_err(ParseError::Lex)?;

    if let Some(token) = tokens.iter().find(|token| token.kind == TokenKind::Error) {
        return Err(ParseError::Grammar(GrammarError::invalid_token(token)));
    }

    let mut input = tokens.as_slice();
    let command = match command().parse_next(&mut input) {
        Ok(command) => command,
        Err(ErrMode::Backtrack(err) | ErrMode::Cut(err)) => {
            return Err(ParseError::Grammar(err));
        }
        Err(ErrMode::Incomplete(_)) => {
            return Err(ParseError::Grammar(GrammarError::unexpected(
                "token",
                input.first(),
            )));
        }
    };

    match input.iter().find(|token| token.kind != TokenKind::Eol) {
        Some(token) => Err(ParseError::Grammar(GrammarError::unexpected(
            "end of command",
            Some(token),
        ))),
        None => Ok(command),
    }
}

fn command<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, Command<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let keyword = expect_kind(TokenKind::Ident, "command").parse_next(input)?;
        let Some(spec) = catalog::find(keyword.lexeme) else {
            return Err(ErrMode::Cut(GrammarError::unexpected(
                "command",
                Some(&keyword),
            )));
        };

        match (spec.tag, spec.args) {
            (CommandTag::TurnOn, _) => Ok(Command::TurnOn),
            (CommandTag::TurnOff, _) => Ok(Command::TurnOff),
            (CommandTag::Reset, _) => Ok(Command::Reset),
            (CommandTag::Status, _) => Ok(Command::Status),
            (CommandTag::Setpoint, _) => Ok(Command::Setpoint(number().parse_next(input)?)),
            (CommandTag::Mode | CommandTag::Loop, ArgSpec::Choice(choices)) => {
                match choice(choices, spec.usage).parse_next(input)?.tag {
                    ChoiceTag::Mode(state) => Ok(Command::Mode(state)),
                    ChoiceTag::OpenLoop => Ok(Command::Loop(LoopMode::Open)),
                    ChoiceTag::ClosedLoop => Ok(Command::Loop(LoopMode::Closed)),
                    ChoiceTag::Kind(_) => Err(ErrMode::Cut(GrammarError::unexpected(
                        spec.usage, None,
                    ))),
                }
            }
            (CommandTag::Interlock, ArgSpec::ChoiceThenIndex(choices)) => {
                let ChoiceTag::Kind(kind) = choice(choices, spec.usage).parse_next(input)?.tag
                else {
                    return Err(ErrMode::Cut(GrammarError::unexpected(spec.usage, None)));
                };
                let index = interlock_index().parse_next(input)?;
                Ok(Command::Interlock { kind, index })
            }
            (CommandTag::Help, _) => Ok(Command::Help(HelpCommand {
                topic: topic().parse_next(input)?,
            })),
            _ => Err(ErrMode::Cut(GrammarError::unexpected(spec.usage, None))),
        }
    }
}

fn choice<'src, 'slice>(
    choices: &'static [Keyword],
    label: &'static str,
) -> impl Parser<Input<'src, 'slice>, &'static Keyword, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let token = expect_kind(TokenKind::Ident, label).parse_next(input)?;
        catalog::find_choice(choices, token.lexeme)
            .ok_or_else(|| ErrMode::Cut(GrammarError::unexpected(label, Some(&token))))
    }
}

fn number<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, f32, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let token = expect_kind(TokenKind::Number, "number").parse_next(input)?;
        token
            .lexeme
            .parse::<f32>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| ErrMode::Cut(GrammarError::invalid_number(&token)))
    }
}

fn interlock_index<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, u8, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let token = expect_kind(TokenKind::Number, "interlock index").parse_next(input)?;
        token
            .lexeme
            .parse::<u8>()
            .ok()
            .filter(|index| *index < 32)
            .ok_or_else(|| ErrMode::Cut(GrammarError::invalid_index(&token)))
    }
}

fn topic<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, Option<&'src str>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == TokenKind::Ident => {
            *input = rest;
            Ok(Some(token.lexeme))
        }
        Some((token, _)) if token.kind != TokenKind::Eol => Err(ErrMode::Cut(
            GrammarError::unexpected("command name", Some(token)),
        )),
        _ => Ok(None),
    }
}

fn expect_kind<'src, 'slice>(
    kind: TokenKind,
    label: &'static str,
) -> impl Parser<Input<'src, 'slice>, Token<'src>, GrammarError<'src>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Ok(token.clone())
        }
        other => Err(ErrMode::Backtrack(GrammarError::unexpected(
            label,
            other.map(|(token, _)| token),
        ))),
    }
}
