//! Event-type definitions and the matching registry.
//!
//! An event type is a named, statically registered rule describing which
//! record mutations produce deliverable events. The category is a closed
//! sum type carrying its own predicate, so matching is a method call on the
//! variant rather than a branch on a metadata label.

use relay_core::models::{Mutation, MutationKind, Record};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Matching rule variants for an event type.
///
/// Insert variants look only at the new record. Update variants compare
/// against the old record and never match when it is absent. Store variants
/// cover insert-or-update writes: they apply the update rule when the old
/// record is present and the insert rule otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventCategory {
    /// Any insert on the table.
    Insert,
    /// Insert where the named field is non-blank.
    InsertWithField {
        /// Field that must carry a non-blank value.
        field: String,
    },
    /// Insert where the named field equals one of the target values.
    InsertWithValue {
        /// Field compared against the value set.
        field: String,
        /// Accepted values; one match suffices.
        values: Vec<String>,
    },
    /// Any update on the table.
    Update,
    /// Update where the named field changed.
    UpdateWithField {
        /// Field whose value must differ from the old record's.
        field: String,
    },
    /// Update where the named field changed and now equals a target value.
    UpdateWithValue {
        /// Field compared against the value set.
        field: String,
        /// Accepted values; one match suffices.
        values: Vec<String>,
    },
    /// Any insert-or-update write on the table.
    Store,
    /// Insert-or-update write, with the field rule of the matching variant.
    StoreWithField {
        /// Field gated by the non-blank (insert) or changed (update) rule.
        field: String,
    },
    /// Insert-or-update write, with the value rule of the matching variant.
    StoreWithValue {
        /// Field compared against the value set.
        field: String,
        /// Accepted values; one match suffices.
        values: Vec<String>,
    },
    /// Fired by an explicit host trigger rather than a record mutation
    /// rule; carries whatever record context the host supplies.
    AdHoc,
}

impl EventCategory {
    /// The mutation kind this category is registered under.
    pub fn trigger(&self) -> MutationKind {
        match self {
            Self::Insert | Self::InsertWithField { .. } | Self::InsertWithValue { .. } => {
                MutationKind::Insert
            },
            Self::Update | Self::UpdateWithField { .. } | Self::UpdateWithValue { .. } => {
                MutationKind::Update
            },
            Self::Store | Self::StoreWithField { .. } | Self::StoreWithValue { .. } => {
                MutationKind::Store
            },
            Self::AdHoc => MutationKind::AdHoc,
        }
    }

    /// Evaluates this category's predicate against a mutation.
    ///
    /// The caller has already matched trigger kind and table; this checks
    /// only the field/value condition.
    pub fn matches(&self, mutation: &Mutation) -> bool {
        match self {
            Self::Insert | Self::Update | Self::Store | Self::AdHoc => true,

            Self::InsertWithField { field } => !mutation.record.field_is_blank(field),

            Self::InsertWithValue { field, values } => value_matches(&mutation.record, field, values),

            Self::UpdateWithField { field } => field_changed(mutation, field),

            Self::UpdateWithValue { field, values } => {
                field_changed(mutation, field) && value_matches(&mutation.record, field, values)
            },

            Self::StoreWithField { field } => match mutation.old_record {
                Some(_) => field_changed(mutation, field),
                None => !mutation.record.field_is_blank(field),
            },

            Self::StoreWithValue { field, values } => match mutation.old_record {
                Some(_) => {
                    field_changed(mutation, field) && value_matches(&mutation.record, field, values)
                },
                None => value_matches(&mutation.record, field, values),
            },
        }
    }
}

/// True when the field's new value equals any member of the value set.
fn value_matches(record: &Record, field: &str, values: &[String]) -> bool {
    record
        .field_text(field)
        .is_some_and(|value| values.iter().any(|target| *target == value))
}

/// True when the field's value differs between old and new record. An
/// update without an old record never counts as changed.
fn field_changed(mutation: &Mutation, field: &str) -> bool {
    match &mutation.old_record {
        Some(old) => old.field_text(field) != mutation.record.field_text(field),
        None => false,
    }
}

/// A registered event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTypeDefinition {
    /// Unique event-type name, referenced by subscriptions.
    pub name: String,

    /// Source table the rule watches. Ad-hoc types keep a logical table
    /// name for payload context.
    pub table: String,

    /// Matching rule.
    pub category: EventCategory,
}

impl EventTypeDefinition {
    /// Creates a definition.
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        category: EventCategory,
    ) -> Self {
        Self { name: name.into(), table: table.into(), category }
    }
}

/// Process-wide registry of event types, immutable after startup.
///
/// Indexed by (trigger kind, table) so a mutation only evaluates the
/// definitions that could possibly match it.
#[derive(Debug, Default)]
pub struct EventTypeRegistry {
    by_trigger: HashMap<(MutationKind, String), Vec<EventTypeDefinition>>,
    by_name: HashMap<String, EventTypeDefinition>,
}

impl EventTypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an event type. Later registrations with the same name
    /// replace earlier ones.
    pub fn register(&mut self, definition: EventTypeDefinition) {
        let key = (definition.category.trigger(), definition.table.clone());
        let bucket = self.by_trigger.entry(key).or_default();
        bucket.retain(|existing| existing.name != definition.name);
        bucket.push(definition.clone());
        self.by_name.insert(definition.name.clone(), definition);
    }

    /// Registers many event types, builder-style.
    #[must_use]
    pub fn with(mut self, definition: EventTypeDefinition) -> Self {
        self.register(definition);
        self
    }

    /// Definitions registered for a trigger kind and table.
    pub fn candidates(&self, kind: MutationKind, table: &str) -> &[EventTypeDefinition] {
        self.by_trigger
            .get(&(kind, table.to_string()))
            .map_or(&[], Vec::as_slice)
    }

    /// Looks up a definition by name.
    pub fn get(&self, name: &str) -> Option<&EventTypeDefinition> {
        self.by_name.get(name)
    }

    /// Number of registered event types.
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
