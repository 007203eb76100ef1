//! Relationship resolution between two entities.
//!
//! [`resolve_relation`] turns the schema's classification of `primary` and
//! `other` into a [`RelationPlan`]: the filter shape a query on `primary`
//! needs in order to keep only the rows related to a given `other` row.

use crate::error::QueryError;
use crate::query::clause::qualified;
use crate::schema::{Entity, RelationType, Schema};

/// How rows of the primary entity are tied to a related row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationPlan {
    /// The primary entity holds the other's foreign key in `column`;
    /// match it against the related row's primary key
    HasOne { column: String },
    /// The other entity holds the primary's foreign key; match the primary
    /// key against the related row's `foreign_key` value
    HasMany { foreign_key: String },
    /// Many-to-many through a junction table
    Bridge(BridgePlan),
}

/// Tables and keys of a many-to-many relation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgePlan {
    pub bridge: String,
    pub primary: String,
    pub primary_id: String,
    pub primary_key_column: String,
    pub other: String,
    pub other_id: String,
    pub other_key_column: String,
}

impl BridgePlan {
    /// Placeholder bound to the related row's id
    pub fn placeholder(&self) -> String {
        format!(":{}", self.bridge)
    }

    /// Extra selected column exposing which related row a result came through
    pub fn extra_field(&self) -> String {
        qualified(&self.bridge, &self.other_key_column)
    }

    /// The three WHERE fragments linking primary, bridge and other
    pub fn filters(&self) -> [String; 3] {
        [
            format!(
                "{} = {}",
                qualified(&self.bridge, &self.primary_key_column),
                qualified(&self.primary, &self.primary_id)
            ),
            format!(
                "{} = {}",
                qualified(&self.bridge, &self.other_key_column),
                qualified(&self.other, &self.other_id)
            ),
            format!(
                "{} IN ({})",
                qualified(&self.other, &self.other_id),
                self.placeholder()
            ),
        ]
    }
}

/// Decide how to filter `primary` rows by a row of `other`
///
/// A direct foreign key wins over a bridge table.
///
/// # Errors
///
/// Returns `QueryError::RelationNotFound` naming both entities when neither a
/// foreign key nor a bridge links them.
pub fn resolve_relation(
    schema: &Schema,
    primary: &Entity,
    other: &Entity,
) -> Result<RelationPlan, QueryError> {
    match schema.relation(primary, other) {
        RelationType::HasOne => Ok(RelationPlan::HasOne {
            column: other.foreign_key().into_owned(),
        }),
        RelationType::HasMany => Ok(RelationPlan::HasMany {
            foreign_key: primary.foreign_key().into_owned(),
        }),
        RelationType::Unrelated => match schema.bridge(primary, other) {
            Some(bridge) => Ok(RelationPlan::Bridge(BridgePlan {
                bridge: bridge.name().to_string(),
                primary: primary.name().to_string(),
                primary_id: primary.primary_key().to_string(),
                primary_key_column: primary.foreign_key().into_owned(),
                other: other.name().to_string(),
                other_id: other.primary_key().to_string(),
                other_key_column: other.foreign_key().into_owned(),
            })),
            None => Err(QueryError::RelationNotFound {
                entity: primary.name().to_string(),
                other: other.name().to_string(),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests_cfg::shop_schema;

    #[test]
    fn test_has_one_plan() {
        let schema = shop_schema();
        let order = schema.entity("order").unwrap();
        let customer = schema.entity("customer").unwrap();

        let plan = resolve_relation(&schema, order, customer).unwrap();
        assert_eq!(
            plan,
            RelationPlan::HasOne {
                column: "customer_id".to_string()
            }
        );
    }

    #[test]
    fn test_has_many_plan() {
        let schema = shop_schema();
        let order = schema.entity("order").unwrap();
        let customer = schema.entity("customer").unwrap();

        let plan = resolve_relation(&schema, customer, order).unwrap();
        assert_eq!(
            plan,
            RelationPlan::HasMany {
                foreign_key: "customer_id".to_string()
            }
        );
    }

    #[test]
    fn test_bridge_plan_fragments() {
        let schema = shop_schema();
        let post = schema.entity("post").unwrap();
        let tag = schema.entity("tag").unwrap();

        let RelationPlan::Bridge(plan) = resolve_relation(&schema, post, tag).unwrap() else {
            panic!("expected a bridge plan");
        };
        assert_eq!(plan.placeholder(), ":post_tag");
        assert_eq!(plan.extra_field(), "`post_tag`.`tag_id`");
        assert_eq!(
            plan.filters(),
            [
                "`post_tag`.`post_id` = `post`.`id`".to_string(),
                "`post_tag`.`tag_id` = `tag`.`id`".to_string(),
                "`tag`.`id` IN (:post_tag)".to_string(),
            ]
        );
    }

    #[test]
    fn test_unrelated_entities() {
        let schema = shop_schema();
        let post = schema.entity("post").unwrap();
        let note = schema.entity("note").unwrap();

        let err = resolve_relation(&schema, post, note).unwrap_err();
        assert!(matches!(
            err,
            QueryError::RelationNotFound { ref entity, ref other } if entity == "post" && other == "note"
        ));
    }
}
