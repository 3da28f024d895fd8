//! Route tags and the per-playthrough branch context.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which pre-authored content variant later stages should use.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RouteTag {
    #[default]
    None,
    Route1,
    Route2,
    Route3,
}

impl RouteTag {
    /// Whether this tag selects a concrete variant.
    #[must_use]
    pub const fn is_routed(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for RouteTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Route1 => write!(f, "route1"),
            Self::Route2 => write!(f, "route2"),
            Self::Route3 => write!(f, "route3"),
        }
    }
}

/// Mutable record threaded through every stage of one level playthrough.
///
/// A fresh context is created at level start; replays and level advances
/// replace it rather than mutating the old one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchContext {
    route: RouteTag,
    last_chosen_index: Option<usize>,
}

impl BranchContext {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            route: RouteTag::None,
            last_chosen_index: None,
        }
    }

    /// Route currently steering content selection.
    #[must_use]
    pub const fn route(&self) -> RouteTag {
        self.route
    }

    /// Slot picked by the most recent choice, `None` before any pick.
    #[must_use]
    pub const fn last_chosen_index(&self) -> Option<usize> {
        self.last_chosen_index
    }

    /// True until the first choice of the playthrough is recorded.
    #[must_use]
    pub const fn is_fresh(&self) -> bool {
        self.last_chosen_index.is_none() && !self.route.is_routed()
    }

    /// Record a pick. A `RouteTag::None` route keeps the carried route.
    pub fn record_choice(&mut self, slot: usize, next_route: RouteTag) {
        self.last_chosen_index = Some(slot);
        if next_route.is_routed() {
            self.route = next_route;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_has_no_route_or_choice() {
        let ctx = BranchContext::new();
        assert_eq!(ctx.route(), RouteTag::None);
        assert_eq!(ctx.last_chosen_index(), None);
        assert!(ctx.is_fresh());
        assert_eq!(ctx, BranchContext::default());
    }

    #[test]
    fn route_carries_forward_until_overwritten() {
        let mut ctx = BranchContext::new();
        ctx.record_choice(1, RouteTag::Route2);
        assert_eq!(ctx.route(), RouteTag::Route2);

        ctx.record_choice(0, RouteTag::None);
        assert_eq!(ctx.route(), RouteTag::Route2);
        assert_eq!(ctx.last_chosen_index(), Some(0));

        ctx.record_choice(1, RouteTag::Route1);
        assert_eq!(ctx.route(), RouteTag::Route1);
        assert!(!ctx.is_fresh());
    }

    #[test]
    fn route_tags_serialize_snake_case() {
        let json = serde_json::to_string(&RouteTag::Route1).unwrap();
        assert_eq!(json, "\"route1\"");
        assert_eq!(RouteTag::Route3.to_string(), "route3");
    }
}
