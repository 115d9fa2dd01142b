//! Unique id source.

use std::cell::Cell;

pub trait IdSource {
    fn new_id(&self) -> String;
}

/// Time-ordered ids with a random suffix.
#[derive(Debug, Default, Clone, Copy)]
pub struct UlidSource;

impl IdSource for UlidSource {
    fn new_id(&self) -> String {
        ulid::Ulid::new().to_string().to_lowercase()
    }
}

/// Deterministic `prefix-1`, `prefix-2`, ... ids.
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    next: Cell<u64>,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: Cell::new(1),
        }
    }
}

impl IdSource for SequentialIds {
    fn new_id(&self) -> String {
        let n = self.next.get();
        self.next.set(n + 1);
        format!("{}-{}", self.prefix, n)
    }
}
