//! SQLite schema definitions for the library database.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};

const RECORDS_FK: ForeignKey = ForeignKey {
    foreign_table: "records",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const TAGS_FK: ForeignKey = ForeignKey {
    foreign_table: "tags",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const USERS_FK: ForeignKey = ForeignKey {
    foreign_table: "users",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

// =============================================================================
// Version 1
// =============================================================================

const RECORDS_TABLE_V1: Table = Table {
    name: "records",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("path", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("series", &SqlType::Text),
        sqlite_column!(
            "updated_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_records_updated_at", "updated_at")],
    unique_constraints: &[],
};

const TAGS_TABLE_V1: Table = Table {
    name: "tags",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true, is_unique = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

const RECORD_TAGS_TABLE_V1: Table = Table {
    name: "record_tags",
    columns: &[
        sqlite_column!(
            "record_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&RECORDS_FK)
        ),
        sqlite_column!(
            "tag_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&TAGS_FK)
        ),
    ],
    indices: &[("idx_record_tags_tag_id", "tag_id")],
    unique_constraints: &[&["record_id", "tag_id"]],
};

const USERS_TABLE_V1: Table = Table {
    name: "users",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("username", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("last_active", &SqlType::Integer),
    ],
    indices: &[],
    unique_constraints: &[],
};

const BOOKMARKS_TABLE_V1: Table = Table {
    name: "bookmarks",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "record_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&RECORDS_FK)
        ),
        sqlite_column!("user_id", &SqlType::Integer, foreign_key = Some(&USERS_FK)),
        sqlite_column!("session_key", &SqlType::Text),
        sqlite_column!("page", &SqlType::Integer),
        sqlite_column!("finished", &SqlType::Integer),
        sqlite_column!("fit_to", &SqlType::Text),
        sqlite_column!("two_pages", &SqlType::Integer),
        sqlite_column!(
            "updated_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_bookmarks_record_id", "record_id")],
    unique_constraints: &[],
};

const SEARCH_QUERIES_TABLE_V1: Table = Table {
    name: "search_queries",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("text", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("used_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_search_queries_used_at", "used_at")],
    unique_constraints: &[],
};

pub const LIBRARY_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[
        RECORDS_TABLE_V1,
        TAGS_TABLE_V1,
        RECORD_TAGS_TABLE_V1,
        USERS_TABLE_V1,
        BOOKMARKS_TABLE_V1,
        SEARCH_QUERIES_TABLE_V1,
    ],
    migration: None,
}];
