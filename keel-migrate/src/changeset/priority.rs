//! Changeset priorities. Lower runs earlier within a phase.
//!
//! Bands: 0-99 namespace-level objects, 500s renames, 1000s drops,
//! 2000s creates, 3000s column alterations, 4000s constraint and index
//! creation, 5000s changes to existing definitions.

pub const CREATE_SCHEMA: i32 = 0;
pub const CREATE_EXTENSION: i32 = 1;
pub const CREATE_ENUM: i32 = 2;
pub const CHANGE_ENUM: i32 = 3;

// Renames sort ahead of every other alter-phase change, including changes
// promoted from expand, so those address objects under their new names.
pub const RENAME_TABLE: i32 = 500;
pub const RENAME_COLUMN: i32 = 501;

pub const DROP_TRIGGER: i32 = 1001;
pub const DROP_INDEX: i32 = 1002;
pub const DROP_CONSTRAINT: i32 = 1003;
pub const DROP_PRIMARY_KEY: i32 = 1004;
pub const DROP_COLUMN: i32 = 1005;
pub const DROP_TABLE: i32 = 1006;
pub const DROP_ENUM: i32 = 1007;
pub const DROP_EXTENSION: i32 = 1008;
pub const DROP_SCHEMA: i32 = 1009;

pub const CREATE_TABLE: i32 = 2001;
pub const CREATE_COLUMN: i32 = 2002;

pub const COLUMN_DATA_TYPE: i32 = 3001;
pub const COLUMN_IDENTITY_ADD: i32 = 3003;
pub const COLUMN_IDENTITY_DROP: i32 = 3004;
pub const COLUMN_DEFAULT_ADD: i32 = 3005;
pub const COLUMN_DEFAULT_DROP: i32 = 3006;
pub const COLUMN_DEFAULT_CHANGE: i32 = 3007;
pub const COLUMN_NULLABILITY: i32 = 3008;
pub const COLUMN_IDENTITY_CHANGE: i32 = 3009;

pub const CREATE_PRIMARY_KEY: i32 = 4001;
pub const CREATE_CONSTRAINT: i32 = 4002;
pub const CREATE_INDEX: i32 = 4003;
pub const CREATE_TRIGGER: i32 = 4004;

pub const UPDATE_PRIMARY_KEY: i32 = 5001;
pub const CHANGE_INDEX: i32 = 5002;
pub const CHANGE_UNIQUE: i32 = 5003;
pub const CHANGE_FOREIGN_KEY: i32 = 5004;
pub const CHANGE_CHECK: i32 = 5005;
pub const REPLACE_TRIGGER: i32 = 5006;

/// Whether the priority belongs to the drop band.
pub fn is_drop(priority: i32) -> bool {
    (1000..2000).contains(&priority)
}
