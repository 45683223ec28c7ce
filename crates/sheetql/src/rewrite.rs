// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Query rewriting
//!
//! The caller writes queries against sheet and header names. The query is
//! split into tokens with the sqlparser tokenizer so that replacement only
//! ever happens on whole tokens: string literals (including dollar-quoted
//! and `E'...'` strings), comments and identifiers that merely contain a
//! logical name are copied through untouched.
//!
//! - `[Sheet Name]` resolves as a sheet first, then as a column.
//! - `"Header"` resolves as a column first, then as a sheet.
//! - Bare headers, including ones with spaces or punctuation, resolve by
//!   longest match starting at a word.
//!
//! Names with no mapping are left as written. A query the tokenizer rejects
//! is passed through unchanged and the engine reports the error.

use diagnostics::*;
use sqlparser::dialect::Dialect;
use sqlparser::tokenizer::{
    Location, Token as SqlToken, Tokenizer, TokenizerError, Whitespace,
};

use crate::materialize::quote_identifier;
use crate::resolve::IdentifierMap;

/// DuckDB lexical rules plus `[bracketed]` sheet references
#[derive(Debug, Default)]
pub(crate) struct SheetDialect;

impl Dialect for SheetDialect {
    fn is_identifier_start(&self, ch: char) -> bool {
        ch.is_alphabetic() || ch == '_'
    }

    fn is_identifier_part(&self, ch: char) -> bool {
        ch.is_alphanumeric() || ch == '_'
    }

    fn is_delimited_identifier_start(&self, ch: char) -> bool {
        ch == '"' || ch == '['
    }

    fn supports_string_escape_constant(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Whitespace,
    Comment,
    Word,
    Number,
    StringLiteral,
    QuotedIdentifier,
    Bracketed,
    Punct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token<'a> {
    pub(crate) kind: TokenKind,
    pub(crate) text: &'a str,
    pub(crate) start: usize,
    /// Unescaped name of a quoted or bracketed identifier
    pub(crate) name: Option<String>,
}

impl Token<'_> {
    fn end(&self) -> usize {
        self.start + self.text.len()
    }
}

/// Words that are never taken as a bare single-word header
const RESERVED: &[&str] = &[
    "ALL", "AND", "AS", "ASC", "BETWEEN", "BY", "CASE", "CAST", "CROSS", "DESC", "DISTINCT",
    "ELSE", "END", "EXCEPT", "EXISTS", "FALSE", "FROM", "FULL", "GROUP", "HAVING", "ILIKE", "IN",
    "INNER", "INTERSECT", "IS", "JOIN", "LEFT", "LIKE", "LIMIT", "NOT", "NULL", "OFFSET", "ON",
    "OR", "ORDER", "OUTER", "RIGHT", "SELECT", "THEN", "TRUE", "UNION", "USING", "WHEN", "WHERE",
    "WITH",
];

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(word))
}

/// Maps the tokenizer's 1-based line/column locations to byte offsets
struct LineIndex<'a> {
    sql: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(sql: &'a str) -> Self {
        let mut starts = vec![0];
        starts.extend(sql.match_indices('\n').map(|(i, _)| i + 1));
        Self { sql, starts }
    }

    fn offset(&self, location: Location) -> usize {
        let line = usize::try_from(location.line).unwrap_or(usize::MAX);
        let column = usize::try_from(location.column).unwrap_or(usize::MAX);
        let Some(&start) = self.starts.get(line.saturating_sub(1)) else {
            return self.sql.len();
        };
        self.sql[start..]
            .char_indices()
            .nth(column.saturating_sub(1))
            .map_or(self.sql.len(), |(i, _)| start + i)
    }
}

fn classify(token: &SqlToken) -> (TokenKind, Option<String>) {
    match token {
        SqlToken::Whitespace(Whitespace::SingleLineComment { .. })
        | SqlToken::Whitespace(Whitespace::MultiLineComment(_)) => (TokenKind::Comment, None),
        SqlToken::Whitespace(_) => (TokenKind::Whitespace, None),
        SqlToken::Word(word) => match word.quote_style {
            None => (TokenKind::Word, None),
            Some('[') => (TokenKind::Bracketed, Some(word.value.clone())),
            Some(_) => (TokenKind::QuotedIdentifier, Some(word.value.clone())),
        },
        SqlToken::Number(..) => (TokenKind::Number, None),
        SqlToken::SingleQuotedString(_)
        | SqlToken::DoubleQuotedString(_)
        | SqlToken::DollarQuotedString(_)
        | SqlToken::EscapedStringLiteral(_)
        | SqlToken::NationalStringLiteral(_)
        | SqlToken::HexStringLiteral(_) => (TokenKind::StringLiteral, None),
        _ => (TokenKind::Punct, None),
    }
}

/// Split `sql` into tokens covering every byte
pub(crate) fn tokenize(sql: &str) -> Result<Vec<Token<'_>>, TokenizerError> {
    let dialect = SheetDialect;
    let lexed = Tokenizer::new(&dialect, sql).tokenize_with_location()?;
    let lines = LineIndex::new(sql);

    let mut tokens = Vec::with_capacity(lexed.len());
    let mut start = 0;
    for lexed in &lexed {
        if matches!(lexed.token, SqlToken::EOF) {
            continue;
        }
        let end = lines.offset(lexed.span.end).max(start);
        let (kind, name) = classify(&lexed.token);
        tokens.push(Token {
            kind,
            text: &sql[start..end],
            start,
            name,
        });
        start = end;
    }
    if start < sql.len() {
        tokens.push(Token {
            kind: TokenKind::Whitespace,
            text: &sql[start..],
            start,
            name: None,
        });
    }
    Ok(tokens)
}

/// Rewrite logical references in `sql` to quoted physical identifiers
pub fn rewrite(sql: &str, names: &IdentifierMap) -> String {
    let tokens = match tokenize(sql) {
        Ok(tokens) => tokens,
        Err(e) => {
            let reason = e.to_string();
            debug!("Query not rewritten, tokenizer rejected it: {reason}", reason: reason);
            return sql.to_string();
        }
    };

    let mut candidates: Vec<&str> = names.column_names().collect();
    candidates.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut out = String::with_capacity(sql.len() + 16);
    let mut replaced = 0usize;
    let mut index = 0;

    while index < tokens.len() {
        let token = &tokens[index];
        let physical = match (token.kind, token.name.as_deref()) {
            (TokenKind::Bracketed, Some(inner)) => {
                let inner = inner.trim();
                names.table(inner).or_else(|| names.column(inner))
            }
            (TokenKind::QuotedIdentifier, Some(inner)) => {
                names.column(inner).or_else(|| names.table(inner))
            }
            (TokenKind::Word, _) => {
                if let Some((last, logical)) = bare_match(sql, &tokens, index, &candidates) {
                    match names.column(logical) {
                        Some(physical) => {
                            out.push_str(&quote_identifier(physical));
                            replaced += 1;
                        }
                        None => out.push_str(&sql[token.start..tokens[last].end()]),
                    }
                    index = last + 1;
                    continue;
                }
                None
            }
            _ => None,
        };

        match physical {
            Some(physical) => {
                out.push_str(&quote_identifier(physical));
                replaced += 1;
            }
            None => out.push_str(token.text),
        }
        index += 1;
    }

    debug!("Rewrote {replaced} identifier references", replaced: replaced);
    out
}

/// Longest logical column name spelled out from token `first`, returned with
/// the index of its last token
fn bare_match<'n>(
    sql: &str,
    tokens: &[Token<'_>],
    first: usize,
    candidates: &[&'n str],
) -> Option<(usize, &'n str)> {
    let start = tokens[first].start;
    let rest = &sql[start..];

    for &name in candidates {
        if !rest.starts_with(name) {
            continue;
        }
        let end = start + name.len();

        let mut last = None;
        for (offset, token) in tokens[first..].iter().enumerate() {
            if !matches!(
                token.kind,
                TokenKind::Word | TokenKind::Number | TokenKind::Whitespace | TokenKind::Punct
            ) {
                break;
            }
            if token.end() == end {
                last = Some(first + offset);
                break;
            }
            if token.end() > end {
                break;
            }
        }
        let Some(last) = last else {
            continue;
        };

        if last == first {
            if is_reserved(name) {
                continue;
            }
            let next = tokens[last + 1..]
                .iter()
                .find(|t| t.kind != TokenKind::Whitespace);
            if next.is_some_and(|t| t.text == "(") {
                continue;
            }
        }
        return Some((last, name));
    }
    None
}
