use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Field visibility tree sent with an issuance request.
///
/// A field with `sd: true` is issued as a salted, hashed disclosure that the holder reveals
/// explicitly. A field with `sd: false` is always visible; it still carries `children` when
/// some of its nested claims are disclosable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectiveDisclosureSpec {
    pub fields: BTreeMap<String, FieldSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub sd: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<SelectiveDisclosureSpec>,
}

impl SelectiveDisclosureSpec {
    /// Build the tree from dot separated claim paths, each marked disclosable.
    ///
    /// ```ignore
    /// let spec = SelectiveDisclosureSpec::build(["Person.givenName", "Person.birthDate"]);
    /// ```
    pub fn build<I, S>(disclosable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::from_schema(disclosable.into_iter().map(|path| (path, true)))
    }

    /// Build the tree from a declarative schema of claim path to disclosable flag.
    ///
    /// Intermediate fields not listed themselves are always visible. A path listed twice keeps
    /// its last flag.
    pub fn from_schema<I, S>(schema: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: AsRef<str>,
    {
        let mut spec = Self::default();
        for (path, sd) in schema {
            let path = path.as_ref();
            let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
            if segments.is_empty() {
                warn!(path, "ignoring empty claim path");
                continue;
            }
            spec.insert(&segments, sd);
        }
        spec
    }

    fn insert(&mut self, segments: &[&str], sd: bool) {
        let Some((first, rest)) = segments.split_first() else {
            return;
        };
        let field = self.fields.entry((*first).to_owned()).or_default();
        if rest.is_empty() {
            field.sd = sd;
        } else {
            field
                .children
                .get_or_insert_with(Default::default)
                .insert(rest, sd);
        }
    }

    /// Whether the claim at the dot separated `path` is disclosable.
    pub fn is_disclosable(&self, path: &str) -> bool {
        let mut spec = self;
        let mut segments = path.split('.').filter(|s| !s.is_empty()).peekable();
        while let Some(segment) = segments.next() {
            let Some(field) = spec.fields.get(segment) else {
                return false;
            };
            if segments.peek().is_none() {
                return field.sd;
            }
            let Some(children) = &field.children else {
                return false;
            };
            spec = children;
        }
        false
    }
}
