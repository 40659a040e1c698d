use anyhow::{bail, Result};
use std::fmt;
use std::sync::Arc;

/// Named subscription point. The name is fixed for the lifetime of the value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Queue {
    name: Arc<str>,
}

impl Queue {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            bail!("queue name cannot be empty");
        }
        Ok(Self {
            name: Arc::from(trimmed),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
