//! Step-to-Leaf Resolver and Arg Validator (SPEC_FULL §4.4).
//!
//! Turns a raw `Step` into a `LeafExecution` the executor can dispatch, applies legacy
//! alias rewriting, and flags tasks whose steps cannot be resolved at all
//! (`normalizeTaskStepsToOptionA`).
//!
//! `INTENT_LEAVES` is exposed in `crate::protocol` as a plain slice; here it's mirrored
//! into a `once_cell::sync::Lazy<HashSet<_>>` the way the teacher keeps `INTERPOLATION_RE`
//! as a compiled-once `Lazy` static in `context/mod.rs`, since every resolution call needs
//! O(1) membership rather than a linear scan.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde_json::{json, Value};

use crate::protocol::{
    is_intent_leaf, ArgsSource, LeafExecution, LeafKind, PlanningIncompleteReason, Step,
    Task, INTENT_LEAVES, SENTINEL_INPUT, SENTINEL_RECIPE,
};

static INTENT_LEAF_SET: Lazy<HashSet<&'static str>> =
    Lazy::new(|| INTENT_LEAVES.iter().copied().collect());

/// Legacy leaf names still accepted on input, mapped to their current replacement.
/// Never emitted — only recognized when rewriting inbound steps (SPEC_FULL §9).
static LEGACY_LEAF_ALIASES: Lazy<std::collections::HashMap<&'static str, &'static str>> =
    Lazy::new(|| {
        let mut m = std::collections::HashMap::new();
        m.insert("dig_block", "acquire_material");
        m
    });

/// Resolves `step.meta` to a dispatchable `LeafExecution`, or `None` if the leaf is
/// absent or an intent leaf (SPEC_FULL §4.4).
pub fn step_to_leaf_execution(step: &Step) -> Option<LeafExecution> {
    let leaf_name = step.meta.leaf.as_deref()?;

    if INTENT_LEAF_SET.contains(leaf_name) {
        return None;
    }

    let (resolved_leaf, original_leaf) = match LEGACY_LEAF_ALIASES.get(leaf_name) {
        Some(rewritten) => (*rewritten, Some(leaf_name.to_string())),
        None => (leaf_name, None),
    };

    if let Some(args) = step.meta.args.as_ref().filter(|v| v.is_object()) {
        return Some(LeafExecution {
            leaf_name: resolved_leaf.to_string(),
            args: args.clone(),
            args_source: ArgsSource::Explicit,
            original_leaf,
        });
    }

    if let Some(produces) = &step.meta.produces {
        return Some(LeafExecution {
            leaf_name: resolved_leaf.to_string(),
            args: args_from_produces(resolved_leaf, produces),
            args_source: ArgsSource::Derived,
            original_leaf,
        });
    }

    Some(LeafExecution {
        leaf_name: resolved_leaf.to_string(),
        args: default_args_for(resolved_leaf),
        args_source: ArgsSource::Default,
        original_leaf,
    })
}

fn args_from_produces(leaf_name: &str, produces: &[crate::protocol::Produces]) -> Value {
    let first = produces.first();
    match LeafKind::from_name(leaf_name) {
        Some(LeafKind::CraftRecipe) => json!({
            "recipe": first.map(|p| p.name.clone()).unwrap_or_default(),
            "count": first.map(|p| p.count).unwrap_or(1),
        }),
        Some(LeafKind::AcquireMaterial) | Some(LeafKind::DigBlock) => json!({
            "item": first.map(|p| p.name.clone()).unwrap_or_default(),
            "count": first.map(|p| p.count).unwrap_or(1),
        }),
        Some(LeafKind::Smelt) => json!({
            "input": first.map(|p| p.name.clone()).unwrap_or_default(),
            "count": first.map(|p| p.count).unwrap_or(1),
        }),
        _ => json!({}),
    }
}

fn default_args_for(leaf_name: &str) -> Value {
    match LeafKind::from_name(leaf_name) {
        Some(LeafKind::CraftRecipe) => json!({ "recipe": SENTINEL_RECIPE, "count": 1 }),
        Some(LeafKind::AcquireMaterial) | Some(LeafKind::DigBlock) => {
            json!({ "item": SENTINEL_INPUT, "count": 1 })
        }
        Some(LeafKind::Smelt) => json!({ "input": SENTINEL_INPUT, "count": 1 }),
        _ => json!({}),
    }
}

/// Canonicalizes field names per a per-leaf schema. Currently a pass-through for leaves
/// whose wire args already match their canonical shape; place alias handling here as
/// new leaves grow alternate spellings.
pub fn normalize_leaf_args(_leaf_name: &str, args: Value) -> Value {
    args
}

/// Walks all of a task's steps; if any has an unknown leaf or an intent leaf, sets
/// `metadata.planning_incomplete = true` and appends a reason (SPEC_FULL §4.4).
pub fn normalize_task_steps_to_option_a(task: &mut Task) {
    for step in &task.steps {
        let Some(leaf_name) = step.meta.leaf.as_deref() else {
            continue;
        };

        if is_intent_leaf(leaf_name) {
            task.metadata.planning_incomplete = true;
            task.metadata.planning_incomplete_reasons.push(PlanningIncompleteReason {
                leaf: leaf_name.to_string(),
                reason: "intent_leaf_not_executable".to_string(),
            });
        } else if LeafKind::from_name(leaf_name).is_none()
            && !LEGACY_LEAF_ALIASES.contains_key(leaf_name)
        {
            task.metadata.planning_incomplete = true;
            task.metadata.planning_incomplete_reasons.push(PlanningIncompleteReason {
                leaf: leaf_name.to_string(),
                reason: "unknown_leaf".to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{StepMeta, TaskMetadata, TaskStatus};

    fn step(leaf: Option<&str>, args: Option<Value>) -> Step {
        Step {
            id: "s1".to_string(),
            order: 0,
            label: None,
            done: false,
            meta: StepMeta {
                leaf: leaf.map(String::from),
                args,
                produces: None,
                authority: None,
            },
        }
    }

    #[test]
    fn absent_leaf_resolves_to_none() {
        assert!(step_to_leaf_execution(&step(None, None)).is_none());
    }

    #[test]
    fn intent_leaf_resolves_to_none() {
        let s = step(Some("task_type_craft"), None);
        assert!(step_to_leaf_execution(&s).is_none());
    }

    #[test]
    fn explicit_object_args_are_used_verbatim() {
        let s = step(Some("craft_recipe"), Some(json!({"recipe": "oak_planks", "count": 4})));
        let exec = step_to_leaf_execution(&s).unwrap();
        assert_eq!(exec.args_source, ArgsSource::Explicit);
        assert_eq!(exec.args["recipe"], "oak_planks");
    }

    #[test]
    fn missing_args_and_produces_falls_back_to_sentinel_default() {
        let s = step(Some("craft_recipe"), None);
        let exec = step_to_leaf_execution(&s).unwrap();
        assert_eq!(exec.args_source, ArgsSource::Default);
        assert_eq!(exec.args["recipe"], SENTINEL_RECIPE);
    }

    #[test]
    fn legacy_leaf_alias_is_rewritten_and_records_original() {
        let s = step(Some("dig_block"), Some(json!({"item": "iron_ore", "count": 1})));
        let exec = step_to_leaf_execution(&s).unwrap();
        assert_eq!(exec.leaf_name, "acquire_material");
        assert_eq!(exec.original_leaf.as_deref(), Some("dig_block"));
    }

    #[test]
    fn normalize_flags_unknown_and_intent_leaves() {
        let mut task = Task {
            id: "t1".to_string(),
            title: None,
            steps: vec![
                step(Some("not_a_real_leaf"), None),
                step(Some("task_type_craft"), None),
                step(Some("craft_recipe"), Some(json!({"recipe": "x", "count": 1}))),
            ],
            metadata: TaskMetadata::default(),
            progress: 0.0,
            status: TaskStatus::Active,
        };

        normalize_task_steps_to_option_a(&mut task);

        assert!(task.metadata.planning_incomplete);
        assert_eq!(task.metadata.planning_incomplete_reasons.len(), 2);
        assert_eq!(task.metadata.planning_incomplete_reasons[0].reason, "unknown_leaf");
        assert_eq!(
            task.metadata.planning_incomplete_reasons[1].reason,
            "intent_leaf_not_executable"
        );
    }
}
