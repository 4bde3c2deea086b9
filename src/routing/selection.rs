//! Backend Selection
//!
//! Picks one backend among the registrations interested in an event.
//! Candidates are always presented in registration order.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::server::ServerConnection;

/// Strategy choosing among interested backends
pub trait SelectionStrategy: Send + Sync {
    /// Pick one of `candidates`, which are non-empty and in registration order
    fn select<'a>(&self, candidates: &'a [Arc<ServerConnection>]) -> Option<&'a Arc<ServerConnection>>;

    fn name(&self) -> &'static str;
}

/// Always the earliest registration
#[derive(Debug, Default)]
pub struct FirstMatch;

impl SelectionStrategy for FirstMatch {
    fn select<'a>(&self, candidates: &'a [Arc<ServerConnection>]) -> Option<&'a Arc<ServerConnection>> {
        candidates.first()
    }

    fn name(&self) -> &'static str {
        "first_match"
    }
}

/// Rotates through the interested registrations
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl SelectionStrategy for RoundRobin {
    fn select<'a>(&self, candidates: &'a [Arc<ServerConnection>]) -> Option<&'a Arc<ServerConnection>> {
        if candidates.is_empty() {
            return None;
        }
        let turn = self.cursor.fetch_add(1, Ordering::Relaxed);
        candidates.get(turn % candidates.len())
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

/// Configurable selection policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    #[default]
    FirstMatch,
    RoundRobin,
}

impl SelectionPolicy {
    /// Build a fresh strategy instance for one hub
    pub fn build(&self) -> Box<dyn SelectionStrategy> {
        match self {
            SelectionPolicy::FirstMatch => Box::new(FirstMatch),
            SelectionPolicy::RoundRobin => Box::new(RoundRobin::default()),
        }
    }
}

impl std::str::FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "first_match" => Ok(SelectionPolicy::FirstMatch),
            "round_robin" => Ok(SelectionPolicy::RoundRobin),
            other => Err(format!("Unknown selection policy: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(n: usize) -> Vec<Arc<ServerConnection>> {
        (0..n)
            .map(|i| {
                let (connection, _rx) =
                    ServerConnection::new("chat", &format!("backend-{}", i), ["connect"], 4);
                Arc::new(connection)
            })
            .collect()
    }

    #[test]
    fn test_first_match_is_stable() {
        let backends = candidates(3);
        let strategy = FirstMatch;
        for _ in 0..5 {
            let picked = strategy.select(&backends).unwrap();
            assert_eq!(picked.identity(), "backend-0");
        }
    }

    #[test]
    fn test_round_robin_rotates() {
        let backends = candidates(3);
        let strategy = RoundRobin::default();
        let picked: Vec<_> = (0..4)
            .map(|_| strategy.select(&backends).unwrap().identity().to_string())
            .collect();
        assert_eq!(picked, vec!["backend-0", "backend-1", "backend-2", "backend-0"]);
    }

    #[test]
    fn test_empty_candidates() {
        assert!(FirstMatch.select(&[]).is_none());
        assert!(RoundRobin::default().select(&[]).is_none());
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("first_match".parse(), Ok(SelectionPolicy::FirstMatch));
        assert_eq!("round-robin".parse(), Ok(SelectionPolicy::RoundRobin));
        assert!("weighted".parse::<SelectionPolicy>().is_err());
        assert_eq!(SelectionPolicy::default().build().name(), "first_match");
    }
}
