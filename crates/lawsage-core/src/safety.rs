//! Pre-flight audit of a request and the post-hoc grounding check.

use thiserror::Error;
use tracing::{info, warn};

use crate::types::Source;

pub const SUPPORTED_JURISDICTIONS: &[&str] = &[
    "Federal",
    "Alabama",
    "Alaska",
    "Arizona",
    "Arkansas",
    "California",
    "Colorado",
    "Connecticut",
    "Delaware",
    "Florida",
    "Georgia",
    "Hawaii",
    "Idaho",
    "Illinois",
    "Indiana",
    "Iowa",
    "Kansas",
    "Kentucky",
    "Louisiana",
    "Maine",
    "Maryland",
    "Massachusetts",
    "Michigan",
    "Minnesota",
    "Mississippi",
    "Missouri",
    "Montana",
    "Nebraska",
    "Nevada",
    "New Hampshire",
    "New Jersey",
    "New Mexico",
    "New York",
    "North Carolina",
    "North Dakota",
    "Ohio",
    "Oklahoma",
    "Oregon",
    "Pennsylvania",
    "Rhode Island",
    "South Carolina",
    "South Dakota",
    "Tennessee",
    "Texas",
    "Utah",
    "Vermont",
    "Virginia",
    "Washington",
    "West Virginia",
    "Wisconsin",
    "Wyoming",
];

const PROHIBITED_TERMS: &[&str] = &[
    "how to commit",
    "bypass security",
    "illegal drugs",
    "hack",
    "exploit",
    "untraceable",
    "avoid taxes illegally",
    "commit fraud",
    "obstruct justice",
    "tamper with evidence",
];

/// Grounding is satisfied once this many retrieved sources are cited.
pub const MIN_GROUNDED_SOURCES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SafetyViolation {
    #[error("jurisdiction is missing")]
    MissingJurisdiction,

    #[error("unsupported jurisdiction '{0}'")]
    UnsupportedJurisdiction(String),

    #[error("request contains prohibited content")]
    ProhibitedContent,
}

/// Reject requests without a supported jurisdiction or with prohibited content.
/// Runs before any generation call.
pub fn red_team_audit(user_input: &str, jurisdiction: &str) -> Result<(), SafetyViolation> {
    let jurisdiction = jurisdiction.trim();
    if jurisdiction.chars().count() < 2 {
        return Err(SafetyViolation::MissingJurisdiction);
    }
    if !SUPPORTED_JURISDICTIONS.contains(&jurisdiction) {
        warn!(jurisdiction, "red team audit: unsupported jurisdiction");
        return Err(SafetyViolation::UnsupportedJurisdiction(jurisdiction.to_string()));
    }
    let lower = user_input.to_lowercase();
    if PROHIBITED_TERMS.iter().any(|t| lower.contains(t)) {
        warn!("red team audit: prohibited content");
        return Err(SafetyViolation::ProhibitedContent);
    }
    Ok(())
}

/// Whether the final text cites enough of the grounding sources, matched by
/// title or URI. With fewer than [`MIN_GROUNDED_SOURCES`] sources available the
/// check passes so long as there is at least one.
pub fn validate_grounding(final_output: &str, sources: &[Source]) -> bool {
    if sources.is_empty() {
        return false;
    }
    if sources.len() < MIN_GROUNDED_SOURCES {
        info!(sources = sources.len(), "fewer grounding sources than required, proceeding");
        return true;
    }
    let text = final_output.to_lowercase();
    let cited = sources
        .iter()
        .filter(|s| {
            let title = s.title.trim().to_lowercase();
            let by_title = !title.is_empty() && text.contains(&title);
            let by_uri = s
                .uri
                .as_deref()
                .is_some_and(|u| !u.is_empty() && text.contains(&u.to_lowercase()));
            by_title || by_uri
        })
        .count();
    cited >= MIN_GROUNDED_SOURCES
}
