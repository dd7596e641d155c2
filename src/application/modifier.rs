//! Item rewrites selected by query parameters.

use crate::domain::feed::Item;
use crate::domain::query::QueryParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    RemoveDescription,
    RemoveContent,
}

impl Modifier {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "rm.description" => Some(Self::RemoveDescription),
            "rm.content" => Some(Self::RemoveContent),
            _ => None,
        }
    }

    pub fn apply(self, item: &mut Item) {
        match self {
            Self::RemoveDescription => item.description.clear(),
            Self::RemoveContent => item.content.clear(),
        }
    }
}

/// Modifiers named in a request, applied in parameter order.
pub fn from_params(params: &QueryParams) -> Vec<Modifier> {
    params
        .pairs()
        .filter_map(|(name, _)| Modifier::parse(name))
        .collect()
}
