use crate::config::types::*;

/// Trait for merging optional configuration values
pub trait Merge<T> {
    fn merge(self, other: T) -> T;
}

impl<T> Merge<Option<T>> for Option<T> {
    fn merge(self, other: Option<T>) -> Option<T> {
        other.or(self)
    }
}

impl Merge<ConfigInput> for ConfigInput {
    fn merge(self, other: ConfigInput) -> ConfigInput {
        ConfigInput {
            database: match (self.database, other.database) {
                (None, None) => None,
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (Some(a), Some(b)) => Some(a.merge_with(b)),
            },
            goose: match (self.goose, other.goose) {
                (None, None) => None,
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (Some(a), Some(b)) => Some(a.merge_with(b)),
            },
        }
    }
}

impl DatabaseInput {
    pub fn merge_with(self, other: DatabaseInput) -> DatabaseInput {
        DatabaseInput {
            driver_name: other.driver_name.or(self.driver_name),
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            user: other.user.or(self.user),
            password: other.password.or(self.password),
            database: other.database.or(self.database),
            options: other.options.or(self.options),
            test_role: self.test_role.merge(other.test_role),
            force_terminate_connections: other
                .force_terminate_connections
                .or(self.force_terminate_connections),
        }
    }
}

impl GooseInput {
    pub fn merge_with(self, other: GooseInput) -> GooseInput {
        GooseInput {
            migrations_dir: other.migrations_dir.or(self.migrations_dir),
            table_name: other.table_name.or(self.table_name),
            allow_missing: other.allow_missing.or(self.allow_missing),
        }
    }
}
