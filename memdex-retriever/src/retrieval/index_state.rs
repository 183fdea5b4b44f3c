use serde::{Deserialize, Serialize};

/// Freshness of one agent's index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    /// Metadata is missing or no longer matches the memory document
    /// The next query or explicit refresh rebuilds it
    #[default]
    Stale,

    /// A rebuild holds the agent's lock
    Rebuilding,

    /// Metadata matches the current document and configuration
    Fresh,
}

impl IndexState {
    pub fn is_fresh(&self) -> bool {
        matches!(self, IndexState::Fresh)
    }

    /// Check if the next query will trigger a rebuild
    pub fn needs_rebuild(&self) -> bool {
        matches!(self, IndexState::Stale)
    }
}

impl std::fmt::Display for IndexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexState::Stale => write!(f, "stale"),
            IndexState::Rebuilding => write!(f, "rebuilding"),
            IndexState::Fresh => write!(f, "fresh"),
        }
    }
}

impl std::str::FromStr for IndexState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stale" => Ok(IndexState::Stale),
            "rebuilding" | "building" => Ok(IndexState::Rebuilding),
            "fresh" | "ready" => Ok(IndexState::Fresh),
            _ => Err(format!(
                "Invalid index state: '{s}'. Valid values are: stale, rebuilding, fresh"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_state_properties() {
        assert!(IndexState::Stale.needs_rebuild());
        assert!(!IndexState::Stale.is_fresh());

        assert!(!IndexState::Rebuilding.needs_rebuild());
        assert!(!IndexState::Rebuilding.is_fresh());

        assert!(IndexState::Fresh.is_fresh());
        assert!(!IndexState::Fresh.needs_rebuild());

        assert_eq!(IndexState::default(), IndexState::Stale);
    }

    #[test]
    fn test_from_str() {
        assert_eq!("stale".parse::<IndexState>().unwrap(), IndexState::Stale);
        assert_eq!(
            "Rebuilding".parse::<IndexState>().unwrap(),
            IndexState::Rebuilding
        );
        assert_eq!("FRESH".parse::<IndexState>().unwrap(), IndexState::Fresh);
        assert!("warm".parse::<IndexState>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        for state in [IndexState::Stale, IndexState::Rebuilding, IndexState::Fresh] {
            assert_eq!(state.to_string().parse::<IndexState>().unwrap(), state);
        }
        assert_eq!(
            serde_json::to_string(&IndexState::Rebuilding).unwrap(),
            "\"rebuilding\""
        );
    }
}
