use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    pub guid: String,
    pub name: String,
    pub space_guid: String,
    /// Instances currently running
    #[serde(default)]
    pub instances: u32,
    /// Instances the user asked for
    #[serde(default)]
    pub desired_instances: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceMetadata {
    pub guid: String,
    pub name: String,
    pub org_guid: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgMetadata {
    pub guid: String,
    pub name: String,
}

/**
 * Resolves platform GUIDs to human readable names.
 *
 * The statistics only ever store GUIDs. Names are looked up when something is
 * displayed, so a slow or stale metadata source can't corrupt the numbers.
 */
pub trait MetadataProvider {
    fn app(&self, guid: &str) -> Option<AppMetadata>;
    fn space(&self, guid: &str) -> Option<SpaceMetadata>;
    fn org(&self, guid: &str) -> Option<OrgMetadata>;
}

#[derive(thiserror::Error, Debug)]
pub enum MetadataError {
    #[error("Error reading metadata file")]
    File(#[from] std::io::Error),
    #[error("Error parsing metadata JSON")]
    JsonParsing(#[from] serde_json::Error),
}

/// A fixed set of metadata, e.g., loaded from a JSON dump of the platform's API.
/// Format: `{"apps": [..], "spaces": [..], "orgs": [..]}`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StaticMetadata {
    apps: HashMap<String, AppMetadata>,
    spaces: HashMap<String, SpaceMetadata>,
    orgs: HashMap<String, OrgMetadata>,
}

#[derive(Deserialize)]
struct StaticMetadataFile {
    #[serde(default)]
    apps: Vec<AppMetadata>,
    #[serde(default)]
    spaces: Vec<SpaceMetadata>,
    #[serde(default)]
    orgs: Vec<OrgMetadata>,
}

impl StaticMetadata {
    pub fn new(apps: Vec<AppMetadata>, spaces: Vec<SpaceMetadata>, orgs: Vec<OrgMetadata>) -> Self {
        StaticMetadata {
            apps: apps.into_iter().map(|a| (a.guid.clone(), a)).collect(),
            spaces: spaces.into_iter().map(|s| (s.guid.clone(), s)).collect(),
            orgs: orgs.into_iter().map(|o| (o.guid.clone(), o)).collect(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<StaticMetadata, MetadataError> {
        let file: StaticMetadataFile = serde_json::from_str(json)?;
        let md = StaticMetadata::new(file.apps, file.spaces, file.orgs);
        log::debug!(
            "Loaded metadata for {} apps, {} spaces, {} orgs",
            md.apps.len(),
            md.spaces.len(),
            md.orgs.len()
        );
        Ok(md)
    }

    pub fn from_json_file(path: &str) -> Result<StaticMetadata, MetadataError> {
        let json = std::fs::read_to_string(path)?;
        StaticMetadata::from_json_str(&json)
    }
}

impl MetadataProvider for StaticMetadata {
    fn app(&self, guid: &str) -> Option<AppMetadata> {
        self.apps.get(guid).cloned()
    }

    fn space(&self, guid: &str) -> Option<SpaceMetadata> {
        self.spaces.get(guid).cloned()
    }

    fn org(&self, guid: &str) -> Option<OrgMetadata> {
        self.orgs.get(guid).cloned()
    }
}

/// The app's name, or its GUID if we don't know it
pub fn display_app_name(provider: &dyn MetadataProvider, app_guid: &str) -> String {
    provider
        .app(app_guid)
        .map(|a| a.name)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| app_guid.to_string())
}

/// `(space name, org name)` of an app; empty strings for anything unknown
pub fn display_space_and_org(provider: &dyn MetadataProvider, app_guid: &str) -> (String, String) {
    let space = provider
        .app(app_guid)
        .and_then(|a| provider.space(&a.space_guid));
    let org = space.as_ref().and_then(|s| provider.org(&s.org_guid));
    (
        space.map(|s| s.name).unwrap_or_default(),
        org.map(|o| o.name).unwrap_or_default(),
    )
}
