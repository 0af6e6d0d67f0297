use crate::layout::StoreLayout;
use crate::record::{read_record, write_record};
use crate::{validate_record_id, StoreError};
use pipfleet_schema::{validate_env_name, ManagementUnit, VirtualEnvironment};
use std::fs;

/// Management units and, nested beneath each, their virtual environments.
pub struct UnitStore {
    layout: StoreLayout,
}

impl UnitStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    pub fn put(&self, unit: &ManagementUnit) -> Result<(), StoreError> {
        validate_record_id(&unit.id)?;
        fs::create_dir_all(self.layout.unit_dir(&unit.id))?;
        write_record(&self.layout.unit_file(&unit.id), unit)
    }

    pub fn get(&self, unit_id: &str) -> Result<ManagementUnit, StoreError> {
        validate_record_id(unit_id)?;
        let path = self.layout.unit_file(unit_id);
        if !path.exists() {
            return Err(StoreError::UnitNotFound(unit_id.to_owned()));
        }
        read_record(&path, unit_id)
    }

    pub fn exists(&self, unit_id: &str) -> bool {
        validate_record_id(unit_id).is_ok() && self.layout.unit_file(unit_id).exists()
    }

    /// Remove the unit together with every virtual environment and library
    /// recorded under it.
    pub fn remove(&self, unit_id: &str) -> Result<(), StoreError> {
        validate_record_id(unit_id)?;
        let dir = self.layout.unit_dir(unit_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            crate::fsync_dir(&self.layout.units_dir())?;
        }
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<ManagementUnit>, StoreError> {
        let dir = self.layout.units_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name_str = name.to_str().unwrap_or("");
            if name_str.starts_with('.') || !self.layout.unit_file(name_str).exists() {
                continue;
            }
            match self.get(name_str) {
                Ok(unit) => results.push(unit),
                Err(e) => {
                    tracing::warn!("skipping corrupted unit entry '{name_str}': {e}");
                }
            }
        }
        results.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(results)
    }

    /// Look up a unit by exact id, falling back to a unique name match.
    pub fn resolve(&self, id_or_name: &str) -> Result<ManagementUnit, StoreError> {
        if self.exists(id_or_name) {
            return self.get(id_or_name);
        }
        let mut matches = self
            .list()?
            .into_iter()
            .filter(|u| u.name == id_or_name);
        match (matches.next(), matches.next()) {
            (Some(unit), None) => Ok(unit),
            (Some(_), Some(_)) => Err(StoreError::InvalidName(format!(
                "unit name '{id_or_name}' is ambiguous, use the unit id"
            ))),
            _ => Err(StoreError::UnitNotFound(id_or_name.to_owned())),
        }
    }

    pub fn put_env(&self, unit_id: &str, env: &VirtualEnvironment) -> Result<(), StoreError> {
        validate_env_name(&env.name).map_err(|e| StoreError::InvalidName(e.to_string()))?;
        if !self.exists(unit_id) {
            return Err(StoreError::UnitNotFound(unit_id.to_owned()));
        }
        fs::create_dir_all(self.layout.venvs_dir(unit_id))?;
        write_record(&self.layout.venv_file(unit_id, &env.name), env)
    }

    pub fn find_env(
        &self,
        unit_id: &str,
        name: &str,
    ) -> Result<Option<VirtualEnvironment>, StoreError> {
        validate_record_id(unit_id)?;
        validate_env_name(name).map_err(|e| StoreError::InvalidName(e.to_string()))?;
        let path = self.layout.venv_file(unit_id, name);
        if !path.exists() {
            return Ok(None);
        }
        read_record(&path, &format!("{unit_id}/{name}")).map(Some)
    }

    pub fn get_env(&self, unit_id: &str, name: &str) -> Result<VirtualEnvironment, StoreError> {
        self.find_env(unit_id, name)?
            .ok_or_else(|| StoreError::EnvNotFound {
                unit: unit_id.to_owned(),
                name: name.to_owned(),
            })
    }

    /// Deleting an environment drops its installed libraries with it.
    pub fn remove_env(&self, unit_id: &str, name: &str) -> Result<(), StoreError> {
        validate_record_id(unit_id)?;
        validate_env_name(name).map_err(|e| StoreError::InvalidName(e.to_string()))?;
        let path = self.layout.venv_file(unit_id, name);
        if path.exists() {
            fs::remove_file(path)?;
            crate::fsync_dir(&self.layout.venvs_dir(unit_id))?;
        }
        Ok(())
    }

    pub fn list_envs(&self, unit_id: &str) -> Result<Vec<VirtualEnvironment>, StoreError> {
        validate_record_id(unit_id)?;
        let dir = self.layout.venvs_dir(unit_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
            if !entry.file_type()?.is_file() || !is_json {
                continue;
            }
            let label = format!("{unit_id}/{}", entry.file_name().to_string_lossy());
            match read_record::<VirtualEnvironment>(&path, &label) {
                Ok(env) => results.push(env),
                Err(e) => {
                    tracing::warn!("skipping corrupted environment entry '{label}': {e}");
                }
            }
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }
}
