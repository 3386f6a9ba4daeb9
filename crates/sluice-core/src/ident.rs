//! Identifier matching.
//!
//! Whether `orders`, `ORDERS` and `"Orders"` name the same relation depends
//! on the backend. Every comparison between a name written in a statement,
//! a CTE name, a configured table and a catalog entry goes through
//! [`IdentifierCase::compare`], so the rewriter and the schema lookup agree
//! with the database about what a reference resolves to.

use crate::config::ProviderKind;

/// An identifier as written, without its quotes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    pub value: String,
    pub quoted: bool,
}

impl Identifier {
    pub fn bare(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            quoted: false,
        }
    }

    pub fn quoted(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            quoted: true,
        }
    }

    /// Split a configured `schema.table` entry on dots outside double quotes.
    ///
    /// `"Orders"` is quoted, `orders` is bare; `""` inside quotes is a literal
    /// quote.
    pub fn parse_path(path: &str) -> Vec<Identifier> {
        let mut parts = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        let mut in_quotes = false;
        let mut chars = path.trim().chars().peekable();

        while let Some(ch) = chars.next() {
            match (ch, in_quotes) {
                ('"', true) if chars.peek() == Some(&'"') => {
                    chars.next();
                    current.push('"');
                }
                ('"', true) => in_quotes = false,
                ('"', false) => {
                    in_quotes = true;
                    quoted = true;
                }
                ('.', false) => {
                    parts.push(Identifier {
                        value: std::mem::take(&mut current),
                        quoted,
                    });
                    quoted = false;
                }
                (ch, _) => current.push(ch),
            }
        }
        parts.push(Identifier {
            value: current,
            quoted,
        });
        parts
    }
}

/// Result of comparing two identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameMatch {
    Same,
    Different,
    /// The answer depends on server settings this process cannot see.
    Ambiguous,
}

/// How a backend decides identifier equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierCase {
    /// Unquoted names fold to lower case, quoted names are exact (Postgres).
    FoldLower,
    /// Unquoted names fold to upper case, quoted names are exact (Snowflake).
    FoldUpper,
    /// Case never matters, quoted or not (SQLite, DuckDB).
    Insensitive,
    /// Table name case depends on server configuration (MySQL
    /// `lower_case_table_names`, BigQuery datasets).
    ServerDefined,
}

impl IdentifierCase {
    pub fn for_provider(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Postgres => IdentifierCase::FoldLower,
            ProviderKind::Snowflake => IdentifierCase::FoldUpper,
            ProviderKind::Sqlite | ProviderKind::Duckdb => IdentifierCase::Insensitive,
            ProviderKind::Mysql | ProviderKind::Bigquery => IdentifierCase::ServerDefined,
        }
    }

    fn fold(&self, ident: &Identifier) -> String {
        match (self, ident.quoted) {
            (IdentifierCase::FoldLower, false) => ident.value.to_lowercase(),
            (IdentifierCase::FoldUpper, false) => ident.value.to_uppercase(),
            _ => ident.value.clone(),
        }
    }

    pub fn compare(&self, a: &Identifier, b: &Identifier) -> NameMatch {
        let same = match self {
            IdentifierCase::FoldLower | IdentifierCase::FoldUpper => self.fold(a) == self.fold(b),
            IdentifierCase::Insensitive => a.value.to_lowercase() == b.value.to_lowercase(),
            IdentifierCase::ServerDefined => {
                if a.value == b.value {
                    true
                } else if a.value.to_lowercase() == b.value.to_lowercase() {
                    return NameMatch::Ambiguous;
                } else {
                    false
                }
            }
        };
        if same { NameMatch::Same } else { NameMatch::Different }
    }

    /// Compare a written identifier with a name as the catalog stores it.
    pub fn matches_stored(&self, written: &Identifier, stored: &str) -> NameMatch {
        self.compare(written, &Identifier::quoted(stored))
    }
}
