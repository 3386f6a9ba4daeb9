//! SQL parsing front-end.
//!
//! Wraps `sqlparser` with the dialect that matches the configured provider,
//! and provides the lexical helpers the classifier and rewriter share:
//! leading keywords, placeholder usage, qualified names and identifier
//! quoting.

use crate::error::RlsError;
use sluice_core::{Identifier, ParamStyle, ProviderKind};
use sqlparser::ast::{Ident, ObjectName, Statement};
use sqlparser::dialect::{
    BigQueryDialect, Dialect, DuckDbDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect,
    SnowflakeDialect,
};
use sqlparser::keywords::ALL_KEYWORDS;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

/// Parses SQL with the dialect of one provider.
#[derive(Debug, Clone, Copy)]
pub struct SqlAnalyzer {
    provider: ProviderKind,
}

impl Default for SqlAnalyzer {
    fn default() -> Self {
        Self::new(ProviderKind::Postgres)
    }
}

impl SqlAnalyzer {
    /// Create a new SQL analyzer for a provider.
    pub fn new(provider: ProviderKind) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn dialect(&self) -> Box<dyn Dialect> {
        match self.provider {
            ProviderKind::Postgres => Box::new(PostgreSqlDialect {}),
            ProviderKind::Mysql => Box::new(MySqlDialect {}),
            ProviderKind::Sqlite => Box::new(SQLiteDialect {}),
            ProviderKind::Duckdb => Box::new(DuckDbDialect {}),
            ProviderKind::Snowflake => Box::new(SnowflakeDialect {}),
            ProviderKind::Bigquery => Box::new(BigQueryDialect {}),
        }
    }

    /// Parse a SQL string into statements.
    pub fn parse(&self, sql: &str) -> Result<Vec<Statement>, RlsError> {
        let dialect = self.dialect();
        Parser::parse_sql(dialect.as_ref(), sql).map_err(|_| RlsError::ParseError)
    }

    /// Tokenize without parsing.
    pub fn tokenize(&self, sql: &str) -> Result<Vec<Token>, RlsError> {
        let dialect = self.dialect();
        Tokenizer::new(dialect.as_ref(), sql)
            .tokenize()
            .map_err(|_| RlsError::ParseError)
    }

    /// Lexical summary of a statement, available even when parsing fails.
    pub fn lex(&self, sql: &str) -> Result<LexSummary, RlsError> {
        let tokens = self.tokenize(sql)?;
        Ok(LexSummary::from_tokens(&tokens))
    }

    /// Count the placeholders a statement already uses.
    pub fn placeholders(&self, sql: &str) -> Result<PlaceholderUsage, RlsError> {
        let tokens = self.tokenize(sql)?;
        let mut usage = PlaceholderUsage::default();
        for token in &tokens {
            if let Token::Placeholder(p) = token {
                if let Some(n) = p.strip_prefix('$') {
                    match n.parse::<usize>() {
                        Ok(n) => usage.max_numbered = usage.max_numbered.max(n),
                        Err(_) => usage.named += 1,
                    }
                } else if p.starts_with('?') {
                    usage.positional += 1;
                } else {
                    usage.named += 1;
                }
            }
        }
        Ok(usage)
    }
}

/// Keywords and statement count recovered from the token stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LexSummary {
    /// First keyword, upper-cased. `None` when the statement does not start
    /// with an unquoted word.
    pub leading: Option<String>,
    /// Second keyword, upper-cased (`CREATE ROLE`, `ALTER SYSTEM`).
    pub second: Option<String>,
    /// Tokens other than whitespace, comments and semicolons.
    pub significant_tokens: usize,
    /// Tokens follow a top-level semicolon.
    pub multiple_statements: bool,
}

impl LexSummary {
    fn from_tokens(tokens: &[Token]) -> Self {
        let mut summary = LexSummary::default();
        let mut words = Vec::with_capacity(2);
        let mut seen_semicolon = false;
        let mut leading_done = false;

        for token in tokens {
            match token {
                Token::Whitespace(_) | Token::EOF => continue,
                Token::SemiColon => {
                    if summary.significant_tokens > 0 {
                        seen_semicolon = true;
                    }
                    continue;
                }
                _ => {}
            }

            if seen_semicolon {
                summary.multiple_statements = true;
            }
            summary.significant_tokens += 1;

            if leading_done {
                continue;
            }
            match token {
                Token::LParen if words.is_empty() => {}
                Token::Word(w) if w.quote_style.is_none() => {
                    words.push(w.value.to_ascii_uppercase());
                    if words.len() == 2 {
                        leading_done = true;
                    }
                }
                _ => leading_done = true,
            }
        }

        let mut words = words.into_iter();
        summary.leading = words.next();
        summary.second = words.next();
        summary
    }
}

/// Placeholders found in a statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaceholderUsage {
    /// `?` / `?N` placeholders.
    pub positional: usize,
    /// Highest `$N` index.
    pub max_numbered: usize,
    /// Named placeholders (`:name`, `$name`, `@name`).
    pub named: usize,
}

/// A table name as written in the statement, split into identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    /// Catalog and schema qualifiers, outermost first.
    qualifiers: Vec<Identifier>,
    table: Identifier,
}

impl QualifiedName {
    /// Read an object name from the AST. `None` when a part is not a plain
    /// identifier.
    pub fn from_object_name(name: &ObjectName) -> Option<Self> {
        let mut parts = name
            .0
            .iter()
            .map(|part| part.as_ident().map(identifier))
            .collect::<Option<Vec<_>>>()?;
        let table = parts.pop()?;
        Some(Self {
            qualifiers: parts,
            table,
        })
    }

    pub fn table(&self) -> &Identifier {
        &self.table
    }

    /// The schema qualifier (`db.schema.table` yields `schema`).
    pub fn schema(&self) -> Option<&Identifier> {
        self.qualifiers.last()
    }

    /// Whether the name refers to a system catalog.
    pub fn is_system_catalog(&self) -> bool {
        if let Some(schema) = self.schema() {
            let schema = schema.value.to_ascii_lowercase();
            if schema == "pg_catalog" || schema == "information_schema" {
                return true;
            }
        }
        self.table.value.to_ascii_lowercase().starts_with("pg_")
    }

    /// Display form for decision metadata (`schema.table` or `table`).
    pub fn display_name(&self) -> String {
        match self.schema() {
            Some(schema) => format!("{}.{}", schema.value, self.table.value),
            None => self.table.value.clone(),
        }
    }
}

/// An AST identifier with its quoting kept.
pub fn identifier(ident: &Ident) -> Identifier {
    Identifier {
        value: ident.value.clone(),
        quoted: ident.quote_style.is_some(),
    }
}

/// Render a configured identifier for a provider.
///
/// Plain lower-case, non-keyword identifiers are emitted bare; everything
/// else is quoted with the provider's identifier quote.
pub fn quote_ident(ident: &str, provider: ProviderKind) -> String {
    let mut chars = ident.chars();
    let simple = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !ALL_KEYWORDS.contains(&ident.to_ascii_uppercase().as_str());
    if simple {
        return ident.to_string();
    }

    match provider {
        ProviderKind::Mysql | ProviderKind::Bigquery => format!("`{}`", ident.replace('`', "``")),
        _ => format!("\"{}\"", ident.replace('"', "\"\"")),
    }
}

/// Placeholder text for the `index`-th (1-based) bound parameter.
pub fn placeholder(style: ParamStyle, index: usize) -> String {
    match style {
        ParamStyle::Dollar => format!("${index}"),
        ParamStyle::QuestionMark => "?".to_string(),
    }
}
