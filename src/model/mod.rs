//! Data model for docket.
//!
//! Record shapes shared by both storage backends. Field names and their
//! snake_case serde spellings are the on-disk JSONL wire format, so any
//! change here is a format change.
//!
//! - [`item`] - Item records, status/priority enums, create/patch inputs
//! - [`relations`] - Dependency, Retrospective, Reminder, Link records

pub mod item;
pub mod relations;

pub use item::{Item, ItemPatch, ItemStatus, NewItem, Priority};
pub use relations::{
    Dependency, DependencyType, Link, NewDependency, NewLink, NewReminder, NewRetrospective,
    Outcome, Reminder, ReminderPatch, Retrospective, TriggerType,
};
