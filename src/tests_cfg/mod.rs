//! Shared fixtures for unit tests.
//!
//! A small shop schema covering every relation shape:
//! - `order` has one `customer` (and `customer` has many `order`)
//! - `post` and `tag` are linked through the `post_tag` bridge
//! - `note` is related to nothing

use crate::database::Database;
use crate::mock::MockExecutor;
use crate::schema::{Entity, FieldKind, Schema};

pub fn shop_schema() -> Schema {
    Schema::new()
        .with(
            Entity::new("customer")
                .field("id", FieldKind::Integer)
                .field("name", FieldKind::Text)
                .field("vip", FieldKind::Boolean),
        )
        .with(
            Entity::new("order")
                .field("id", FieldKind::Integer)
                .field("customer_id", FieldKind::Integer)
                .field("total", FieldKind::Real),
        )
        .with(
            Entity::new("post")
                .field("id", FieldKind::Integer)
                .field("title", FieldKind::Text)
                .field("meta", FieldKind::Json),
        )
        .with(
            Entity::new("tag")
                .field("id", FieldKind::Integer)
                .field("name", FieldKind::Text),
        )
        .with(
            Entity::new("post_tag")
                .field("id", FieldKind::Integer)
                .field("post_id", FieldKind::Integer)
                .field("tag_id", FieldKind::Integer),
        )
        .with(
            Entity::new("note")
                .field("id", FieldKind::Integer)
                .field("body", FieldKind::Text),
        )
}

/// Database over the shop schema with a scripted handle
pub fn mock_db() -> (Database, MockExecutor) {
    let mock = MockExecutor::new();
    (Database::new(shop_schema(), mock.clone()), mock)
}
