use serde::{Serialize, Deserialize};

use crate::constants::DEFAULT_CATEGORY_PREFIXES;
use crate::error::{PipelineError, Result};

/// A tabular category identified by a file-name prefix.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
pub struct Category {
    pub prefix: String,
}

impl Category {
    pub fn new(prefix: &str) -> Self {
        Category { prefix: prefix.to_string() }
    }

    pub fn matches(&self, file_name: &str) -> bool {
        file_name.starts_with(&self.prefix)
    }
}

/// Ordered category list with first-match-wins precedence.
///
/// A file belongs to the first category whose prefix starts its name.
/// Construction rejects empty or duplicate prefixes and any prefix that can
/// never win because an earlier prefix already covers it (e.g. `app` before
/// `app_data`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySet {
    categories: Vec<Category>,
}

impl CategorySet {
    pub fn new<S: AsRef<str>>(prefixes: &[S]) -> Result<Self> {
        if prefixes.is_empty() {
            return Err(PipelineError::config("categories", "at least one category prefix is required"));
        }

        let mut categories: Vec<Category> = Vec::with_capacity(prefixes.len());
        for raw in prefixes {
            let prefix = raw.as_ref().trim();
            if prefix.is_empty() {
                return Err(PipelineError::config("categories", "category prefixes must not be empty"));
            }
            if let Some(earlier) = categories.iter().find(|c| prefix.starts_with(&c.prefix)) {
                let message = if earlier.prefix == prefix {
                    format!("duplicate category prefix '{}'", prefix)
                } else {
                    format!("category prefix '{}' is shadowed by earlier prefix '{}'", prefix, earlier.prefix)
                };
                return Err(PipelineError::config("categories", message));
            }
            categories.push(Category::new(prefix));
        }

        Ok(CategorySet { categories })
    }

    /// First category matching `file_name`, if any
    pub fn classify(&self, file_name: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.matches(file_name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Category> {
        self.categories.iter()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

impl Default for CategorySet {
    fn default() -> Self {
        CategorySet {
            categories: DEFAULT_CATEGORY_PREFIXES.iter().map(|p| Category::new(p)).collect(),
        }
    }
}
