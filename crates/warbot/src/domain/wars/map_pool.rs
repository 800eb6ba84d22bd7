//! Fixed map catalogue and the decider subset for the final planned map.

use super::WarFormat;
use crate::domain::Error;

pub const MAP_POOL: [&str; 23] = [
    "Frostfire - Suppression",
    "Blizzard - Demolition",
    "Night Stalker - Demolition",
    "Desert Glory - Extraction",
    "Rat's Nest - Suppression",
    "Abandoned - Suppression",
    "The Ruins - Demolition",
    "Blood Lake - Extraction",
    "Bitter Jungle - Demolition",
    "Death Trap - Extraction",
    "Sandstorm - Breach",
    "Fish Hook - Extraction",
    "Crossroads - Demolition",
    "Crossroads Night - Demolition",
    "Fox Hunt - Escort",
    "The Mixer - Escort",
    "Vigilance - Suppression",
    "Requiem - Demolition",
    "Guidance - Escort",
    "Chain Reaction - Suppression",
    "Sujo - Breach",
    "Enowapi - Breach",
    "Shadow Falls - Suppression",
];

/// Only these may close out a series.
pub const DECIDER_MAPS: [&str; 2] = ["Crossroads - Demolition", "Crossroads Night - Demolition"];

pub fn is_known_map(name: &str) -> bool {
    MAP_POOL.contains(&name)
}

pub fn is_decider(name: &str) -> bool {
    DECIDER_MAPS.contains(&name)
}

/// Validate a planned map list for the given format: exact length, all names
/// from the catalogue, last entry from the decider subset.
pub fn validate_plan(format: WarFormat, names: &[String]) -> Result<(), Error> {
    let needed = format.required_maps();
    if names.len() != needed {
        return Err(Error::InvalidFieldValue(format!(
            "a {} needs exactly {} maps, got {}",
            format,
            needed,
            names.len()
        )));
    }
    for name in names {
        if !is_known_map(name) {
            return Err(Error::InvalidFieldValue(format!("unknown map '{}'", name)));
        }
    }
    let last = names.last().map(String::as_str).unwrap_or_default();
    if !is_decider(last) {
        return Err(Error::InvalidFieldValue(format!(
            "the last map must be one of: {}",
            DECIDER_MAPS.join(", ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn accepts_a_valid_bo3_plan() {
        let names = plan(&[
            "Blizzard - Demolition",
            "Abandoned - Suppression",
            "Crossroads - Demolition",
        ]);
        assert!(validate_plan(WarFormat::Bo3, &names).is_ok());
    }

    #[test]
    fn rejects_wrong_length_and_non_decider_last() {
        let short = plan(&["Blizzard - Demolition", "Crossroads - Demolition"]);
        assert!(validate_plan(WarFormat::Bo3, &short).is_err());

        let bad_last = plan(&[
            "Blizzard - Demolition",
            "Abandoned - Suppression",
            "Sujo - Breach",
        ]);
        assert!(validate_plan(WarFormat::Bo3, &bad_last).is_err());

        let unknown = plan(&[
            "Blizzard - Demolition",
            "Not A Map",
            "Crossroads - Demolition",
        ]);
        assert!(validate_plan(WarFormat::Bo3, &unknown).is_err());
    }
}
