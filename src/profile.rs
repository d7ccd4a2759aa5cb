//! Per-title profiles.
//!
//! A profile answers, for one title, everything the core would otherwise
//! branch on: engine and file versions, tag and name-table layouts, key
//! material and post-processing, native struct overrides and forced custom
//! versions.  Profiles are looked up once, before decoding starts.
//!
//! ```json
//! {
//!   "titles": [{
//!     "title": "example",
//!     "engine": { "major": 4, "minor": 27 },
//!     "tag_layout": "classic",
//!     "crypto": { "key": "00..ff", "post": [{ "kind": "salt_xor" }] }
//!   }]
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::crypto::{AesKey, DecryptionContext, PostProcessSpec};
use crate::error::ErrorKind;
use crate::names::NameLayout;
use crate::property::{NativeLayout, NativeStructs, PropertyDecoder, TagLayout};
use crate::version::{CustomVersionTable, EngineVersion, Guid};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoProfile {
    /// AES-256 key, hex.
    pub key:  Option<String>,
    #[serde(default)]
    pub post: Vec<PostProcessSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleProfile {
    pub title:                   String,
    pub engine:                  EngineVersion,
    /// Used when the package summary carries no file version.
    pub file_version:            i32,
    pub tag_layout:              TagLayout,
    pub name_layout:             NameLayout,
    pub large_world_coordinates: bool,
    pub crypto:                  Option<CryptoProfile>,
    /// Native struct name -> layout, replacing or extending the built-ins.
    pub struct_overrides:        BTreeMap<String, NativeLayout>,
    /// Custom versions forced regardless of what the archive stores.
    pub custom_versions:         BTreeMap<Guid, i32>,
}

impl Default for TitleProfile {
    fn default() -> Self {
        Self {
            title:                   "default".into(),
            engine:                  EngineVersion::ue4(27),
            file_version:            522,
            tag_layout:              TagLayout::Classic,
            name_layout:             NameLayout::MODERN,
            large_world_coordinates: false,
            crypto:                  None,
            struct_overrides:        BTreeMap::new(),
            custom_versions:         BTreeMap::new(),
        }
    }
}

impl TitleProfile {
    pub fn needs_decryption(&self) -> bool {
        self.crypto.is_some()
    }

    pub fn natives(&self) -> NativeStructs {
        let mut natives = NativeStructs::builtin(self.large_world_coordinates);
        for (name, layout) in &self.struct_overrides {
            natives.insert(name, layout.clone());
        }
        natives
    }

    /// A property decoder configured for this title.
    pub fn decoder(&self) -> PropertyDecoder {
        PropertyDecoder::new(self.tag_layout).with_natives(self.natives())
    }

    /// Apply forced custom versions on top of what an archive stored.
    pub fn merge_versions(&self, table: &mut CustomVersionTable) {
        for (guid, version) in &self.custom_versions {
            table.set(*guid, *version);
        }
    }

    /// Key material and post-processing for one archive.  `archive_path`
    /// locates the sibling key file when a trailer step is configured.
    pub fn decryption_context(&self, archive_path: Option<&Path>) -> Result<DecryptionContext, ErrorKind> {
        let crypto = self.crypto.as_ref().ok_or(crate::crypto::CryptoError::MissingKey)?;
        let key = crypto.key.as_deref().map(AesKey::from_hex).transpose()?;
        DecryptionContext::from_specs(key, &crypto.post, archive_path)
    }
}

#[derive(Deserialize)]
struct RegistryFile {
    titles: Vec<TitleProfile>,
}

/// Title -> profile lookup.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: HashMap<String, TitleProfile>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, profile: TitleProfile) {
        self.profiles.insert(profile.title.clone(), profile);
    }

    pub fn from_json(json: &str) -> Result<Self, ErrorKind> {
        let file: RegistryFile = serde_json::from_str(json).map_err(|e| ErrorKind::BadProfile(e.to_string()))?;
        let mut reg = Self::new();
        for p in file.titles {
            if reg.profiles.contains_key(&p.title) {
                return Err(ErrorKind::BadProfile(format!("title `{}` is listed twice", p.title)));
            }
            reg.insert(p);
        }
        Ok(reg)
    }

    pub fn load(path: &Path) -> Result<Self, ErrorKind> {
        let text = fs::read_to_string(path)?;
        let reg = Self::from_json(&text)?;
        tracing::debug!(path = %path.display(), titles = reg.len(), "loaded profiles");
        Ok(reg)
    }

    pub fn get(&self, title: &str) -> Result<&TitleProfile, ErrorKind> {
        self.profiles.get(title).ok_or_else(|| ErrorKind::UnknownProfile(title.to_owned()))
    }

    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PostProcess;
    use crate::error::ErrorClass;

    const JSON: &str = r#"{
        "titles": [
            { "title": "plain" },
            {
                "title": "salted",
                "engine": { "major": 4, "minor": 22 },
                "tag_layout": "flagged",
                "name_layout": { "hashes": false, "flags64": true },
                "large_world_coordinates": true,
                "crypto": {
                    "key": "0101010101010101010101010101010101010101010101010101010101010101",
                    "post": [{ "kind": "salt_xor" }, { "kind": "edge_lane" }]
                },
                "struct_overrides": { "Vector": [{ "name": "X", "kind": "i32" }] },
                "custom_versions": { "375EC13C-06E4-48FB-B500-84F0262A717E": 4 }
            }
        ]
    }"#;

    #[test]
    fn registry_lookup() {
        let reg = ProfileRegistry::from_json(JSON).unwrap();
        assert_eq!(reg.len(), 2);
        let plain = reg.get("plain").unwrap();
        assert_eq!(plain.engine, EngineVersion::ue4(27));
        assert!(!plain.needs_decryption());

        let salted = reg.get("salted").unwrap();
        assert_eq!(salted.tag_layout, TagLayout::Flagged);
        assert_eq!(salted.name_layout, NameLayout::LEGACY);
        assert_eq!(salted.natives().get("Vector").map(Vec::len), Some(1));
        assert!(salted.natives().large_world_coordinates());

        let err = reg.get("missing").unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[test]
    fn crypto_context_from_profile() {
        let reg = ProfileRegistry::from_json(JSON).unwrap();
        let ctx = reg.get("salted").unwrap().decryption_context(None).unwrap();
        assert_eq!(ctx.steps(), &[PostProcess::SaltXor, PostProcess::EdgeLane { first: 1, last: 1 }]);

        let err = reg.get("plain").unwrap().decryption_context(None).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[test]
    fn forced_versions_win() {
        let reg = ProfileRegistry::from_json(JSON).unwrap();
        let guid: Guid = "375EC13C-06E4-48FB-B500-84F0262A717E".parse().unwrap();
        let mut table: CustomVersionTable = [(guid, 1)].into_iter().collect();
        reg.get("salted").unwrap().merge_versions(&mut table);
        assert_eq!(table.get(&guid), 4);
    }

    #[test]
    fn malformed_documents() {
        assert!(matches!(ProfileRegistry::from_json("{"), Err(ErrorKind::BadProfile(_))));
        let dup = r#"{ "titles": [{ "title": "a" }, { "title": "a" }] }"#;
        assert!(matches!(ProfileRegistry::from_json(dup), Err(ErrorKind::BadProfile(_))));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profiles.json");
        std::fs::write(&path, JSON).unwrap();
        assert_eq!(ProfileRegistry::load(&path).unwrap().len(), 2);
        assert!(ProfileRegistry::load(&dir.path().join("nope.json")).is_err());
    }
}
