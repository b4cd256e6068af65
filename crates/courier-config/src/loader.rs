use crate::model::MqConfig;
use courier_core::{CourierError, CourierResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Environment variable consulted when no explicit path is given to
/// [`load_config`].
pub const CONFIG_PATH_ENV: &str = "COURIER_CONFIG_PATH";

fn cache() -> &'static Mutex<HashMap<PathBuf, Arc<MqConfig>>> {
    static CACHE: OnceLock<Mutex<HashMap<PathBuf, Arc<MqConfig>>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Loads and validates the YAML configuration document.
///
/// The path comes from the argument, or from `COURIER_CONFIG_PATH` when
/// the argument is `None`. Parsed documents are cached per path for the
/// lifetime of the process; `use_cache: false` bypasses the lookup and
/// refreshes the cache entry from disk.
pub fn load_config(path: Option<&Path>, use_cache: bool) -> CourierResult<Arc<MqConfig>> {
    let path: PathBuf = match path {
        Some(p) => p.to_path_buf(),
        None => std::env::var(CONFIG_PATH_ENV).map(PathBuf::from).map_err(|_| {
            CourierError::Config(format!(
                "no config path given and {CONFIG_PATH_ENV} is not set"
            ))
        })?,
    };

    if use_cache {
        if let Some(config) = cache().lock().get(&path) {
            debug!(path = %path.display(), "Using cached config");
            return Ok(Arc::clone(config));
        }
    }

    let raw = std::fs::read_to_string(&path)?;
    let config: MqConfig = serde_yaml_ng::from_str(&raw).map_err(|e| {
        CourierError::Config(format!(
            "invalid config document at {}: {e}",
            path.display()
        ))
    })?;
    let config = Arc::new(config);
    cache().lock().insert(path.clone(), Arc::clone(&config));
    debug!(path = %path.display(), buses = config.buses().len(), "Loaded config");
    Ok(config)
}
