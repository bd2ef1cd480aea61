use crate::connection_manager::ConnectionManager;
use crate::error::SessionError;
use crate::profiles::ProfileStore;
use crate::query_dispatcher::QueryOptions;
use crate::result_normalizer::NormalizedResultSet;
use crate::session::SessionBackend;

pub const PREVIEW_ROW_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSummary {
    pub field: String,
    pub data_type: String,
}

impl ColumnSummary {
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} ({})", self.field, self.data_type)
    }
}

#[must_use]
pub fn quote_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

#[must_use]
pub fn preview_sql(database: &str, table: &str) -> String {
    format!(
        "SELECT * FROM {}.{} LIMIT {PREVIEW_ROW_LIMIT}",
        quote_identifier(database),
        quote_identifier(table)
    )
}

/// Database -> table -> column navigation on top of a connection manager.
pub struct SchemaExplorer<'a, B: SessionBackend, S: ProfileStore> {
    manager: &'a ConnectionManager<B, S>,
    options: QueryOptions,
}

impl<'a, B: SessionBackend, S: ProfileStore> SchemaExplorer<'a, B, S> {
    #[must_use]
    pub fn new(manager: &'a ConnectionManager<B, S>) -> Self {
        Self {
            manager,
            options: QueryOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// The profile's selected databases, or every database the server lists
    /// when none are selected.
    pub async fn databases(&self, profile_id: &str) -> Result<Vec<String>, SessionError> {
        let profile = self.manager.profile(profile_id)?;
        if !profile.selected_databases.is_empty() {
            return Ok(profile.selected_databases);
        }

        let result = self.run(profile_id, "SHOW DATABASES").await?;
        Ok(result.column_texts(0))
    }

    pub async fn tables(
        &self,
        profile_id: &str,
        database: &str,
    ) -> Result<Vec<String>, SessionError> {
        self.run(profile_id, &format!("USE {}", quote_identifier(database)))
            .await?;
        let result = self.run(profile_id, "SHOW TABLES").await?;
        Ok(result.column_texts(0))
    }

    pub async fn columns(
        &self,
        profile_id: &str,
        database: &str,
        table: &str,
    ) -> Result<Vec<ColumnSummary>, SessionError> {
        let sql = format!(
            "SHOW COLUMNS FROM {}.{}",
            quote_identifier(database),
            quote_identifier(table)
        );
        let result = self.run(profile_id, &sql).await?;

        Ok(result
            .rows()
            .map(|row| ColumnSummary {
                field: row
                    .get("Field")
                    .map(|value| value.as_text().to_string())
                    .unwrap_or_default(),
                data_type: row
                    .get("Type")
                    .map(|value| value.as_text().to_string())
                    .unwrap_or_default(),
            })
            .collect())
    }

    pub async fn preview(
        &self,
        profile_id: &str,
        database: &str,
        table: &str,
    ) -> Result<NormalizedResultSet, SessionError> {
        self.run(profile_id, &preview_sql(database, table)).await
    }

    async fn run(&self, profile_id: &str, sql: &str) -> Result<NormalizedResultSet, SessionError> {
        self.manager
            .execute_query(profile_id, sql, &self.options)
            .await
    }
}
