//! Profile loading and validation
//!
//! Profiles are static input at process start. Loading fails closed:
//! any malformed profile rejects the whole set with a config error.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use tracing::info;

use crate::error::{Error, Result};

use super::types::Profile;

/// Immutable, validated set of profiles keyed by id
#[derive(Debug, Clone)]
pub struct ProfileSet {
    profiles: HashMap<String, Profile>,
    ordered_ids: Vec<String>,
}

impl ProfileSet {
    /// Build a set from already-constructed profiles, validating each
    pub fn new(profiles: Vec<Profile>) -> Result<Self> {
        if profiles.is_empty() {
            return Err(Error::Config("no profiles supplied".to_string()));
        }

        let mut map = HashMap::with_capacity(profiles.len());
        let mut ordered_ids = Vec::with_capacity(profiles.len());

        for profile in profiles {
            profile.validate()?;
            if map.contains_key(&profile.id) {
                return Err(Error::Config(format!(
                    "duplicate profile id: {}",
                    profile.id
                )));
            }
            ordered_ids.push(profile.id.clone());
            map.insert(profile.id.clone(), profile);
        }

        info!("Loaded {} behavioral profiles", map.len());
        Ok(Self {
            profiles: map,
            ordered_ids,
        })
    }

    /// Look up a profile by id
    pub fn get(&self, id: &str) -> Result<&Profile> {
        self.profiles
            .get(id)
            .ok_or_else(|| Error::UnknownProfile(id.to_string()))
    }

    /// Ids in load order
    pub fn ids(&self) -> &[String] {
        &self.ordered_ids
    }

    /// Iterate over all profiles in load order
    pub fn iter(&self) -> impl Iterator<Item = &Profile> {
        self.ordered_ids.iter().map(|id| &self.profiles[id])
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Load and validate profiles from a JSON array
pub fn load_profiles(json: &str) -> Result<ProfileSet> {
    let profiles: Vec<Profile> = serde_json::from_str(json)?;
    ProfileSet::new(profiles)
}

/// Load and validate profiles from a JSON file
pub fn load_profiles_file(path: impl AsRef<Path>) -> Result<ProfileSet> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read profiles file: {}", path.display()))?;
    load_profiles(&content)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::profile::types::test_fixtures::sample_profile;

    #[test]
    fn test_load_valid_set() {
        let profiles = vec![sample_profile("a"), sample_profile("b")];
        let json = serde_json::to_string(&profiles).unwrap();

        let set = load_profiles(&json).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("a").unwrap().id, "a");
        assert_eq!(set.ids(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_bad_split_fails_closed() {
        let mut bad = sample_profile("a");
        bad.patterns[0].exit_split = vec![0.3, 0.3];
        let json = serde_json::to_string(&vec![bad]).unwrap();

        let err = load_profiles(&json).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let profiles = vec![sample_profile("a"), sample_profile("a")];
        let json = serde_json::to_string(&profiles).unwrap();
        assert!(load_profiles(&json).is_err());
    }

    #[test]
    fn test_empty_set_rejected() {
        assert!(load_profiles("[]").is_err());
    }

    #[test]
    fn test_unknown_profile_lookup() {
        let set = ProfileSet::new(vec![sample_profile("a")]).unwrap();
        assert!(matches!(
            set.get("missing").unwrap_err(),
            Error::UnknownProfile(_)
        ));
    }

    #[test]
    fn test_load_from_file() {
        let profiles = vec![sample_profile("a")];
        let json = serde_json::to_string(&profiles).unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let set = load_profiles_file(file.path()).unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        assert!(matches!(
            load_profiles("{not json").unwrap_err(),
            Error::Serialization(_)
        ));
    }
}
