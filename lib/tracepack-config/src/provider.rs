use std::path::Path;

use figment::{
    providers::{Data, Format, Json, Yaml},
    value::{Dict, Map},
    Error, Metadata, Profile, Provider,
};

/// A file-backed provider whose contents are read once, up front.
///
/// Reading eagerly means a missing or malformed file is reported when it is added to the loader, rather than the first
/// time a value is queried.
pub struct FileProvider {
    data: Map<Profile, Dict>,
    metadata: Metadata,
}

impl FileProvider {
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Self::from_file::<Yaml, _>(path, "YAML file")
    }

    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Self::from_file::<Json, _>(path, "JSON file")
    }

    fn from_file<F: Format, P: AsRef<Path>>(path: P, name: &'static str) -> Result<Self, Error> {
        let file_data = std::fs::read_to_string(path.as_ref()).map_err(|e| e.to_string())?;
        let data = Data::<F>::string(&file_data).data()?;

        Ok(Self {
            data,
            metadata: Metadata::from(name, path.as_ref()),
        })
    }
}

impl Provider for FileProvider {
    fn metadata(&self) -> Metadata {
        self.metadata.clone()
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        Ok(self.data.clone())
    }
}
