//! Query options: sorting, pagination and per-verb link pagination.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Pagination for the related elements of one verb.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LinkOptions {
    #[serde(deserialize_with = "sort_path")]
    pub sort_by: Vec<String>,
    pub sort_dir: SortDirection,
    pub skip: usize,
    pub limit: Option<usize>,
}

/// Options accepted by `query`. Sort is applied before `skip`, and `skip`
/// before `limit`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueryOptions {
    pub limit: Option<usize>,
    pub skip: usize,
    /// Property path; a bare string is a one-element path.
    #[serde(deserialize_with = "sort_path")]
    pub sort_by: Vec<String>,
    pub sort_dir: SortDirection,
    pub links: BTreeMap<String, LinkOptions>,
}

impl QueryOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn sorted_by<S: Into<String>>(
        mut self,
        path: impl IntoIterator<Item = S>,
        dir: SortDirection,
    ) -> Self {
        self.sort_by = path.into_iter().map(Into::into).collect();
        self.sort_dir = dir;
        self
    }

    /// Options for the related elements of `verb`.
    pub fn link_options(&self, verb: &str) -> LinkOptions {
        self.links.get(verb).cloned().unwrap_or_default()
    }
}

fn sort_path<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Path {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Path::deserialize(deserializer)? {
        Path::One(key) => vec![key],
        Path::Many(keys) => keys,
    })
}
