//! Append-only stage output store threaded through one pipeline attempt.

use std::collections::BTreeMap;

use anyhow::{Result, anyhow};

/// Ordered `output_key -> text` mapping.
///
/// Keys are unique and entries are never replaced, so a stage can only see
/// what earlier stages of the same attempt produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutput {
    entries: Vec<(String, String)>,
}

impl StageOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage output. Errors if the key was already written.
    pub fn insert(&mut self, key: &str, text: String) -> Result<()> {
        if self.get(key).is_some() {
            return Err(anyhow!("stage output `{key}` already written"));
        }
        self.entries.push((key.to_string(), text));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Template context: the stage outputs layered over the run inputs.
    ///
    /// Fails if a stage key shadows an input name.
    pub fn render_context<'a>(
        &'a self,
        inputs: &[(&'a str, &'a str)],
    ) -> Result<BTreeMap<&'a str, &'a str>> {
        let mut ctx: BTreeMap<&str, &str> = inputs.iter().copied().collect();
        for (key, value) in &self.entries {
            if ctx.insert(key.as_str(), value.as_str()).is_some() {
                return Err(anyhow!("stage output `{key}` shadows a run input"));
            }
        }
        Ok(ctx)
    }
}
