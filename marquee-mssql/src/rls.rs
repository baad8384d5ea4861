//! Row-level security policy for tenant shards.
//!
//! SQL Server enforces tenant scoping through a security policy: a
//! schema-bound predicate function compares a row's venue id against the
//! tenant key bound into `SESSION_CONTEXT`, and the policy attaches that
//! predicate to every tenant-owned table as both a filter and a block
//! predicate. Once installed, a routed connection only ever sees (or
//! mutates) the bound tenant's rows; the application never adds WHERE
//! clauses for tenancy.

use smol_str::SmolStr;

use marquee_catalog::TENANT_SESSION_KEY;

/// Generated tenant security policy for one shard database.
#[derive(Debug, Clone)]
pub struct TenantRlsPolicy {
    /// Schema holding the security objects.
    pub schema: SmolStr,
    /// Predicate column present on every protected table.
    pub predicate_column: SmolStr,
    /// Protected tables (unqualified, assumed `dbo`).
    pub tables: Vec<SmolStr>,
}

impl Default for TenantRlsPolicy {
    fn default() -> Self {
        Self {
            schema: SmolStr::new_static("rls"),
            predicate_column: SmolStr::new_static("venue_id"),
            tables: [
                "venues",
                "customers",
                "sections",
                "events",
                "event_sections",
                "tickets",
            ]
            .into_iter()
            .map(SmolStr::new)
            .collect(),
        }
    }
}

impl TenantRlsPolicy {
    /// Name of the predicate function.
    fn function_name(&self) -> String {
        format!("{}.fn_tenant_filter", self.schema)
    }

    /// SQL creating the security schema.
    pub fn schema_sql(&self) -> String {
        format!("CREATE SCHEMA {}", self.schema)
    }

    /// SQL creating the predicate function.
    pub fn predicate_sql(&self) -> String {
        format!(
            "CREATE FUNCTION {function}(@{column} INT)\n\
             \x20   RETURNS TABLE\n\
             WITH SCHEMABINDING\n\
             AS\n\
             \x20   RETURN SELECT 1 AS allowed\n\
             \x20   WHERE @{column} = CAST(SESSION_CONTEXT(N'{session_key}') AS INT)",
            function = self.function_name(),
            column = self.predicate_column,
            session_key = TENANT_SESSION_KEY,
        )
    }

    /// SQL creating the security policy over all protected tables.
    pub fn policy_sql(&self) -> String {
        let mut predicates = Vec::with_capacity(self.tables.len() * 2);
        for table in &self.tables {
            predicates.push(format!(
                "ADD FILTER PREDICATE {}({}) ON dbo.{}",
                self.function_name(),
                self.predicate_column,
                table
            ));
            predicates.push(format!(
                "ADD BLOCK PREDICATE {}({}) ON dbo.{} AFTER INSERT",
                self.function_name(),
                self.predicate_column,
                table
            ));
        }
        format!(
            "CREATE SECURITY POLICY {}.tenant_policy\n{}\nWITH (STATE = ON)",
            self.schema,
            predicates.join(",\n")
        )
    }

    /// The full setup, one executable batch per statement. Each statement
    /// must run in its own batch, so they are never joined.
    pub fn statements(&self) -> Vec<String> {
        vec![self.schema_sql(), self.predicate_sql(), self.policy_sql()]
    }
}
