use std::collections::HashSet;

/// Namespace allow/deny lists, fixed at construction.
///
/// A non-empty include set admits only its members. The exclude set always
/// wins, even for a namespace that is also included.
#[derive(Clone, Debug, Default)]
pub struct NamespaceFilter {
    include: HashSet<String>,
    exclude: HashSet<String>,
}

impl NamespaceFilter {
    pub fn new<I, E>(include: I, exclude: E) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        E: IntoIterator,
        E::Item: Into<String>,
    {
        Self {
            include: include.into_iter().map(Into::into).collect(),
            exclude: exclude.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allows(&self, namespace: &str) -> bool {
        if !self.include.is_empty() && !self.include.contains(namespace) {
            return false;
        }
        !self.exclude.contains(namespace)
    }
}
