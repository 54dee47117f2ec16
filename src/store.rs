// This file is part of bracket-warden.
//
// bracket-warden is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// bracket-warden is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::PathBuf,
};

use crate::{TenantId, tournament::TournamentSerialized, utils};

const TOURNAMENT_PREFIX: &str = "tournament-";
const TOURNAMENT_SUFFIX: &str = ".ron";
const ARCHIVE_FILE: &str = "archive.ron";

/// Durable snapshots, one RON file per tenant.
///
/// A file holds `Some(snapshot)` or the empty marker `None`; a missing
/// file reads the same as the marker, so a first run and a hard-reset
/// tenant look identical.
#[derive(Clone, Debug)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    /// # Errors
    ///
    /// If the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Opens the store in the platform's local data folder.
    ///
    /// # Errors
    ///
    /// If no data folder is available or it cannot be created.
    pub fn open_default() -> anyhow::Result<Self> {
        Self::open(utils::data_folder()?)
    }

    fn tournament_file(&self, tenant: TenantId) -> PathBuf {
        self.dir
            .join(format!("{TOURNAMENT_PREFIX}{tenant}{TOURNAMENT_SUFFIX}"))
    }

    /// # Errors
    ///
    /// If the file exists but cannot be read or parsed.
    pub fn get(&self, tenant: TenantId) -> anyhow::Result<Option<TournamentSerialized>> {
        let file = self.tournament_file(tenant);
        match fs::read_to_string(&file) {
            Ok(string) => match ron::from_str(&string) {
                Ok(snapshot) => Ok(snapshot),
                Err(err) => Err(anyhow::Error::msg(format!(
                    "RON: {}: {err}",
                    file.display()
                ))),
            },
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(anyhow::Error::msg(format!("{}: {err}", file.display()))),
        }
    }

    /// Writes the snapshot, or the empty marker when `None`.
    ///
    /// # Errors
    ///
    /// If serializing or writing fails.
    pub fn set(
        &self,
        tenant: TenantId,
        snapshot: Option<&TournamentSerialized>,
    ) -> anyhow::Result<()> {
        let string = ron::ser::to_string_pretty(&snapshot, ron::ser::PrettyConfig::default())?;
        fs::write(self.tournament_file(tenant), string)?;
        Ok(())
    }

    /// Every tenant with a snapshot file on disk, empty markers included.
    ///
    /// # Errors
    ///
    /// If the directory cannot be listed.
    pub fn tenants(&self) -> anyhow::Result<Vec<TenantId>> {
        let mut tenants = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };

            if let Some(stem) = name
                .strip_prefix(TOURNAMENT_PREFIX)
                .and_then(|rest| rest.strip_suffix(TOURNAMENT_SUFFIX))
                && let Ok(tenant) = stem.parse::<TenantId>()
            {
                tenants.push(tenant);
            }
        }

        tenants.sort_unstable();
        Ok(tenants)
    }

    /// Appends a closed tournament to the archive, one RON record per
    /// line.
    ///
    /// # Errors
    ///
    /// If serializing or appending fails.
    pub fn append_archive(&self, snapshot: &TournamentSerialized) -> anyhow::Result<()> {
        let mut string = ron::ser::to_string(snapshot)?;
        string.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(ARCHIVE_FILE))?;

        file.write_all(string.as_bytes())?;
        Ok(())
    }

    /// # Errors
    ///
    /// If the archive exists but cannot be read or parsed.
    pub fn archived(&self) -> anyhow::Result<Vec<TournamentSerialized>> {
        let file = self.dir.join(ARCHIVE_FILE);
        let string = match fs::read_to_string(&file) {
            Ok(string) => string,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(anyhow::Error::msg(format!("{}: {err}", file.display()))),
        };

        let mut archived = Vec::new();
        for line in string.lines() {
            match ron::from_str(line) {
                Ok(snapshot) => archived.push(snapshot),
                Err(err) => {
                    return Err(anyhow::Error::msg(format!(
                        "RON: {}: {err}",
                        file.display()
                    )));
                }
            }
        }

        Ok(archived)
    }
}
