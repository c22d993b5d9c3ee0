//! Header/schema drift detection

use crate::gateway::ToolGateway;

/// Incoming header compared against the target table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaAlignment {
    /// Normalised header columns
    pub header: Vec<String>,
    /// Normalised schema columns
    pub schema: Vec<String>,
    /// Header columns the schema lacks, in header order
    pub missing: Vec<String>,
}

impl SchemaAlignment {
    /// Diff raw column lists (trimmed, lower-cased)
    #[must_use]
    pub fn diff(header: &[String], schema: &[String]) -> Self {
        let header = normalize(header);
        let schema = normalize(schema);
        let missing = header
            .iter()
            .filter(|c| !schema.contains(c))
            .cloned()
            .collect();
        Self { header, schema, missing }
    }

    /// Both sides were read
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.header.is_empty() && !self.schema.is_empty()
    }

    /// Both sides read and nothing missing
    #[inline]
    #[must_use]
    pub fn is_aligned(&self) -> bool {
        self.is_complete() && self.missing.is_empty()
    }
}

fn normalize(columns: &[String]) -> Vec<String> {
    columns
        .iter()
        .map(|c| c.trim().trim_matches(|q| q == '"' || q == '\'').to_lowercase())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Read the incoming header and the table schema and diff them. A side that
/// cannot be read comes back empty, which is never "aligned".
pub async fn check_alignment(gateway: &dyn ToolGateway, table: &str) -> SchemaAlignment {
    let header = gateway.get_incoming_header("*").await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "incoming header unavailable");
        Vec::new()
    });
    let schema = gateway.inspect_schema(table).await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, table, "schema unavailable");
        Vec::new()
    });
    SchemaAlignment::diff(&header, &schema)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn normalises_before_diffing() {
        let alignment = SchemaAlignment::diff(&cols(&[" ID ", "Amount", "\"Region\""]), &cols(&["id", "amount"]));
        assert_eq!(alignment.missing, cols(&["region"]));
        assert!(!alignment.is_aligned());
    }

    #[test]
    fn aligned_only_when_both_sides_known() {
        assert!(SchemaAlignment::diff(&cols(&["a", "b"]), &cols(&["b", "a", "c"])).is_aligned());
        assert!(!SchemaAlignment::diff(&[], &cols(&["a"])).is_aligned());
        assert!(!SchemaAlignment::diff(&cols(&["a"]), &[]).is_aligned());
    }
}
