//! Per-leaf JSON Schema argument contracts (SPEC_FULL §4.4's `validateLeafArgs`).
//!
//! Grounded on `runner/src/validation/mod.rs`'s `ValidationError` shape (a `thiserror`
//! enum of named validation failures) for the error type, and on `executors/http.rs`'s
//! `json_schema` assertion handling for the actual validation mechanism: each leaf's raw
//! schema document is built once and cached behind a `once_cell::sync::Lazy`;
//! `jsonschema::JSONSchema::compile` itself still runs per call, since the compiled form
//! borrows from the schema `Value` and can't be stored alongside it in the same static.

use std::collections::HashMap;

use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use thiserror::Error;

use crate::protocol::LeafKind;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid-args: {0}")]
    InvalidArgs(String),
}

fn schema_for(leaf: LeafKind) -> Value {
    match leaf {
        LeafKind::CraftRecipe => json!({
            "type": "object",
            "required": ["recipe", "count"],
            "properties": {
                "recipe": {"type": "string", "minLength": 1},
                "count": {"type": "integer", "minimum": 1}
            }
        }),
        LeafKind::AcquireMaterial | LeafKind::DigBlock => json!({
            "type": "object",
            "required": ["item", "count"],
            "properties": {
                "item": {"type": "string", "minLength": 1},
                "count": {"type": "integer", "minimum": 1}
            }
        }),
        LeafKind::Smelt => json!({
            "type": "object",
            "required": ["input", "count"],
            "properties": {
                "input": {"type": "string", "minLength": 1},
                "count": {"type": "integer", "minimum": 1}
            }
        }),
        LeafKind::PlaceBlock | LeafKind::PlaceWorkstation => json!({
            "type": "object",
            "required": ["block"],
            "properties": {
                "block": {"type": "string", "minLength": 1},
                "position": {"type": "object"}
            }
        }),
        LeafKind::ExploreForResources => json!({
            "type": "object",
            "required": ["radius"],
            "properties": {
                "radius": {"type": "number", "minimum": 1}
            }
        }),
        LeafKind::StepForwardSafely | LeafKind::RetreatFromThreat => json!({
            "type": "object",
            "properties": {
                "distance": {"type": "number", "minimum": 0}
            }
        }),
    }
}

struct CompiledSchema {
    schema: Value,
}

impl CompiledSchema {
    fn validate(&self, args: &Value) -> Result<(), String> {
        if let Value::Object(map) = args {
            if map.is_empty() {
                if let Some(required) = self.schema.get("required") {
                    if required.as_array().map(|a| !a.is_empty()).unwrap_or(false) {
                        return Err("empty object where a shape is mandatory".to_string());
                    }
                }
            }
        }

        let compiled = JSONSchema::compile(&self.schema)
            .map_err(|e| format!("invalid schema for leaf: {e}"))?;

        match compiled.validate(args) {
            Ok(()) => Ok(()),
            Err(errors) => {
                let detail = errors
                    .map(|e| e.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(detail)
            }
        }
    }
}

static LEAF_SCHEMAS: Lazy<HashMap<&'static str, CompiledSchema>> = Lazy::new(|| {
    let leaves = [
        LeafKind::CraftRecipe,
        LeafKind::AcquireMaterial,
        LeafKind::Smelt,
        LeafKind::PlaceBlock,
        LeafKind::PlaceWorkstation,
        LeafKind::ExploreForResources,
        LeafKind::StepForwardSafely,
        LeafKind::RetreatFromThreat,
        LeafKind::DigBlock,
    ];

    leaves
        .into_iter()
        .map(|leaf| {
            (
                leaf.as_name(),
                CompiledSchema {
                    schema: schema_for(leaf),
                },
            )
        })
        .collect()
});

/// Validates `args` against `leaf_name`'s contract. `strict` controls whether an unknown
/// leaf name itself is an error (strict, the default) or silently accepted (used by
/// callers that have already rejected unknown leaves earlier in the pipeline).
pub fn validate_leaf_args(leaf_name: &str, args: &Value, strict: bool) -> Option<String> {
    match LEAF_SCHEMAS.get(leaf_name) {
        Some(compiled) => compiled.validate(args).err(),
        None if strict => Some(format!("unrecognized leaf: {leaf_name}")),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn craft_recipe_requires_recipe_and_count() {
        let err = validate_leaf_args("craft_recipe", &json!({}), true);
        assert!(err.is_some());
    }

    #[test]
    fn craft_recipe_valid_args_pass() {
        let err = validate_leaf_args("craft_recipe", &json!({"recipe": "oak_planks", "count": 4}), true);
        assert!(err.is_none());
    }

    #[test]
    fn wrong_type_is_rejected() {
        let err = validate_leaf_args(
            "acquire_material",
            &json!({"item": "iron_ore", "count": "four"}),
            true,
        );
        assert!(err.is_some());
    }

    #[test]
    fn unrecognized_leaf_is_rejected_in_strict_mode() {
        let err = validate_leaf_args("not_a_leaf", &json!({}), true);
        assert!(err.is_some());
    }

    #[test]
    fn unrecognized_leaf_passes_in_non_strict_mode() {
        let err = validate_leaf_args("not_a_leaf", &json!({}), false);
        assert!(err.is_none());
    }

    #[test]
    fn empty_object_rejected_when_shape_mandatory() {
        let err = validate_leaf_args("smelt", &json!({}), true);
        assert!(err.is_some());
    }

    #[test]
    fn leaf_with_no_required_fields_accepts_empty_object() {
        let err = validate_leaf_args("step_forward_safely", &json!({}), true);
        assert!(err.is_none());
    }
}
