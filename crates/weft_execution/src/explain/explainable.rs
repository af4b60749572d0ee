use std::fmt;

/// Configuration for producing explain entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExplainConfig {
    /// Include low-level details in the output.
    pub verbose: bool,
}

/// A single entry in an explain output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplainEntry {
    pub name: String,
    pub items: Vec<(String, String)>,
}

impl ExplainEntry {
    pub fn new(name: impl Into<String>) -> Self {
        ExplainEntry {
            name: name.into(),
            items: Vec::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.items.push((key.into(), value.to_string()));
        self
    }

    pub fn with_values<V: fmt::Display>(
        mut self,
        key: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let value = values
            .into_iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        self.items.push((key.into(), format!("[{value}]")));
        self
    }
}

impl fmt::Display for ExplainEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.items.is_empty() {
            write!(f, "(")?;
            for (idx, (key, value)) in self.items.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key} = {value}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

pub trait Explainable {
    /// Create an explain entry for this item.
    fn explain_entry(&self, conf: ExplainConfig) -> ExplainEntry;
}
