use crate::{config::DirectoryConfig, data::RawEntry, read::read_export};
use anyhow::Context;
use serde::{de::DeserializeOwned, Deserialize};
use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    path::PathBuf,
};
use tracing::{debug, info};

/// Somewhere the current state of the account directory can be fetched from.
pub(crate) trait Directory {
    fn fetch(&self) -> Result<Vec<RawEntry>, anyhow::Error>;
}

#[derive(Debug, Deserialize)]
pub(crate) struct Membership {
    pub user_name: String,
    pub state: String,
}

#[derive(Debug, Deserialize)]
struct MembersResponse {
    #[serde(default)]
    memberships: Vec<Membership>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UserMetadata {
    pub unix_name: String,
    #[serde(default)]
    pub join_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct User {
    pub kind: String,
    pub metadata: UserMetadata,
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    #[serde(default)]
    items: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct GroupMetadata {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Group {
    metadata: GroupMetadata,
}

#[derive(Debug, Deserialize)]
struct GroupsResponse {
    #[serde(default)]
    groups: Vec<Group>,
}

/// Client for the directory's REST API. The token is read once, when the client is
/// built, and passed along as a query parameter.
pub(crate) struct HttpDirectory {
    agent: ureq::Agent,
    base_url: String,
    root_group: String,
    token: String,
}

impl HttpDirectory {
    pub fn new(config: &DirectoryConfig) -> Result<Self, anyhow::Error> {
        Ok(Self {
            agent: ureq::Agent::new_with_defaults(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            root_group: config.root_group.clone(),
            token: config.read_token()?,
        })
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, anyhow::Error> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(%url, "directory request");
        let response = self
            .agent
            .get(&url)
            .query("token", &self.token)
            .call()
            .with_context(|| format!("directory request to {url} failed"))?;
        response
            .into_body()
            .read_json::<T>()
            .with_context(|| format!("unexpected directory response from {url}"))
    }

    fn members(&self, group: &str) -> Result<Vec<Membership>, anyhow::Error> {
        Ok(self
            .get::<MembersResponse>(&format!("groups/{group}/members"))?
            .memberships)
    }
}

impl Directory for HttpDirectory {
    fn fetch(&self) -> Result<Vec<RawEntry>, anyhow::Error> {
        let root = self.members(&self.root_group)?;
        let users = self.get::<UsersResponse>("users")?.items;
        let groups = self.get::<GroupsResponse>("groups")?.groups;
        let mut memberships = Vec::with_capacity(groups.len());
        for group in groups {
            let members = self.members(&group.metadata.name)?;
            memberships.push((group.metadata.name, members));
        }
        let entries = assemble(root, users, memberships);
        info!(accounts = entries.len(), root_group = %self.root_group, "fetched directory");
        Ok(entries)
    }
}

/// Joins the three directory views into one entry per member of the root group.
/// Users outside the root group are not accounts of ours and are left out even if
/// they show up in other groups.
pub(crate) fn assemble(
    root: Vec<Membership>,
    users: Vec<User>,
    memberships: Vec<(String, Vec<Membership>)>,
) -> Vec<RawEntry> {
    let mut entries: BTreeMap<String, RawEntry> = root
        .into_iter()
        .map(|m| {
            let entry = RawEntry {
                identifier: Some(m.user_name.clone()),
                status: Some(m.state),
                ..RawEntry::default()
            };
            (m.user_name, entry)
        })
        .collect();
    let join_dates: HashMap<String, Option<String>> = users
        .into_iter()
        .filter(|u| u.kind.eq_ignore_ascii_case("user"))
        .map(|u| (u.metadata.unix_name, u.metadata.join_date))
        .collect();
    for (name, entry) in entries.iter_mut() {
        entry.join_date = join_dates.get(name).cloned().flatten();
    }
    for (group, members) in memberships {
        for member in members {
            if let Some(entry) = entries.get_mut(&member.user_name) {
                entry.groups.insert(group.clone(), member.state);
            }
        }
    }
    entries.into_values().collect()
}

/// A CSV dump of the directory standing in for the live service.
pub(crate) struct CsvExport {
    pub path: PathBuf,
}

impl Directory for CsvExport {
    fn fetch(&self) -> Result<Vec<RawEntry>, anyhow::Error> {
        let file = File::open(&self.path)
            .with_context(|| format!("cannot open directory export {}", self.path.display()))?;
        let entries = read_export(file)
            .with_context(|| format!("cannot read directory export {}", self.path.display()))?;
        info!(accounts = entries.len(), path = %self.path.display(), "read directory export");
        Ok(entries)
    }
}
