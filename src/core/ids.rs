//! Purpose: Generate message identifiers.
//! Exports: `IdGenerator`, `RandomIds`.
//! Invariants: Ids are canonical hyphenated lowercase UUIDs (8-4-4-4-12).
//! Invariants: Ids are random v4 values; nothing about issued ids is persisted.
use uuid::Uuid;

pub trait IdGenerator: Send + Sync + 'static {
    fn next_id(&self) -> String;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&self) -> String {
        Uuid::new_v4().hyphenated().to_string()
    }
}
