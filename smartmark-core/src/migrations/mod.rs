//! Database migrations - embedded SQL files
//!
//! Migrations are compiled into the binary at build time using include_str!.
//! Each migration is a tuple of (name, sql_content), applied in order.

/// All migrations for the local bookmarks database.
/// Format: (filename, sql_content)
///
/// When adding a migration, create NNN_description.sql and append it here.
pub const MIGRATIONS: &[(&str, &str)] = &[
    ("000_migrations.sql", include_str!("000_migrations.sql")),
    ("001_bookmarks.sql", include_str!("001_bookmarks.sql")),
];
