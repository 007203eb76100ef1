//! Clause fragments shared by statement builders.

/// Quote an identifier with backticks, doubling embedded backticks
pub fn quote(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Render `` `table`.`column` ``
pub fn qualified(table: &str, column: &str) -> String {
    format!("{}.{}", quote(table), quote(column))
}

/// AND-joined WHERE fragments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WhereClause {
    fragments: Vec<String>,
}

impl WhereClause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a condition; parameters live in the statement's shared mapping
    pub fn push(&mut self, fragment: impl Into<String>) {
        self.fragments.push(fragment.into());
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    /// Empty when there are no conditions, otherwise `" WHERE a AND b"`
    pub fn to_sql(&self) -> String {
        if self.fragments.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.fragments.join(" AND "))
        }
    }
}

/// LIMIT and OFFSET
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimitClause {
    limit: Option<u64>,
    offset: Option<u64>,
}

impl LimitClause {
    pub fn set_limit(&mut self, limit: u64) {
        self.limit = Some(limit);
    }

    pub fn set_offset(&mut self, offset: u64) {
        self.offset = Some(offset);
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// OFFSET is only rendered together with a LIMIT
    pub fn to_sql(&self) -> String {
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => format!(" LIMIT {limit} OFFSET {offset}"),
            (Some(limit), None) => format!(" LIMIT {limit}"),
            (None, _) => String::new(),
        }
    }
}
