use crate::error::MigrateError;

pub struct Utils {}

impl Utils {
    const BACKUP_SUFFIX: &str = "_backup";

    /// Returns `name` wrapped in double quotes after checking that it is a plain
    /// SQL identifier. Table names are spliced into statements that cannot take
    /// bound parameters, so anything other than `[A-Za-z_][A-Za-z0-9_]*` is rejected.
    pub fn quote_ident(name: &str) -> Result<String, MigrateError> {
        let mut chars = name.chars();
        let valid = match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        };

        if !valid {
            return Err(MigrateError::Error(format!(
                "'{}' is not a valid table or column name",
                name
            )));
        }

        Ok(format!("\"{}\"", name))
    }

    pub fn backup_table_name(table: &str) -> Result<String, MigrateError> {
        let backup = format!("{}{}", table, Self::BACKUP_SUFFIX);
        Self::quote_ident(&backup)?;
        Ok(backup)
    }

    pub fn column_list(columns: &[&str]) -> String {
        columns.join(", ")
    }
}
