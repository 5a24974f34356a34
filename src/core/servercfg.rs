//! `server.cfg` placeholder rendering and txAdmin `config.json` generation.

use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_RECIPE_NAME: &str = "Unknown Recipe";
pub const DEFAULT_RECIPE_AUTHOR: &str = "Unknown Author";
pub const DEFAULT_RECIPE_DESCRIPTION: &str = "No description provided.";

const SERVER_ENDPOINTS: &str = "endpoint_add_tcp \"0.0.0.0:30120\"\nendpoint_add_udp \"0.0.0.0:30120\"";

const ADD_PRINCIPALS_MASTER: &str = "# Deployer Note: this admin master has no identifiers to be automatically added.\n# add_principal identifier.discord:111111111111111111 group.admin #example";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{} not found", path.display())]
    Missing { path: PathBuf },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: {detail}", path.display())]
    Json { path: PathBuf, detail: String },
}

/// Values substituted into a recipe's `server.cfg`.
#[derive(Debug, Clone, Default)]
pub struct ServerSettings {
    pub server_name: String,
    pub max_clients: u32,
    pub license_key: String,
    pub db_connection_string: String,
    pub recipe_name: Option<String>,
    pub recipe_author: Option<String>,
    pub recipe_description: Option<String>,
}

/// Replace the known `{{placeholders}}` in `template`. Others are kept.
pub fn render_server_cfg(template: &str, settings: &ServerSettings) -> String {
    let or_default = |v: &Option<String>, d: &str| match v.as_deref() {
        Some(s) if !s.trim().is_empty() => s.to_string(),
        _ => d.to_string(),
    };
    let replacements = [
        ("{{serverEndpoints}}", SERVER_ENDPOINTS.to_string()),
        ("{{maxClients}}", settings.max_clients.to_string()),
        ("{{svLicense}}", settings.license_key.clone()),
        ("{{serverName}}", settings.server_name.clone()),
        (
            "{{recipeName}}",
            or_default(&settings.recipe_name, DEFAULT_RECIPE_NAME),
        ),
        (
            "{{recipeAuthor}}",
            or_default(&settings.recipe_author, DEFAULT_RECIPE_AUTHOR),
        ),
        (
            "{{recipeDescription}}",
            or_default(&settings.recipe_description, DEFAULT_RECIPE_DESCRIPTION),
        ),
        ("{{dbConnectionString}}", settings.db_connection_string.clone()),
        ("{{addPrincipalsMaster}}", ADD_PRINCIPALS_MASTER.to_string()),
    ];

    let mut out = template.to_string();
    for (placeholder, value) in &replacements {
        out = out.replace(placeholder, value);
    }
    out
}

/// Render `<root>/server.cfg` in place.
pub fn update_server_cfg(root: &Path, settings: &ServerSettings) -> Result<PathBuf, RenderError> {
    let path = root.join("server.cfg");
    let template = std::fs::read_to_string(&path).map_err(|source| match source.kind() {
        std::io::ErrorKind::NotFound => RenderError::Missing { path: path.clone() },
        _ => RenderError::Io {
            path: path.clone(),
            source,
        },
    })?;
    std::fs::write(&path, render_server_cfg(&template, settings)).map_err(|source| {
        RenderError::Io {
            path: path.clone(),
            source,
        }
    })?;
    Ok(path)
}

/// Write `<out_dir>/config.json` from an example txAdmin config, pointing it
/// at the deployment `root`.
pub fn write_txadmin_config(
    example: &Path,
    out_dir: &Path,
    server_name: &str,
    root: &Path,
) -> Result<PathBuf, RenderError> {
    let io = |path: &Path| {
        let path = path.to_path_buf();
        move |source| RenderError::Io { path, source }
    };
    let raw = std::fs::read_to_string(example).map_err(io(example))?;
    let mut config: serde_json::Value =
        serde_json::from_str(&raw).map_err(|e| RenderError::Json {
            path: example.to_path_buf(),
            detail: e.to_string(),
        })?;

    let root_str = root.display().to_string();
    set_path(&mut config, &["global", "serverName"], server_name.into());
    set_path(&mut config, &["fxRunner", "serverDataPath"], root_str.clone().into());
    set_path(
        &mut config,
        &["fxRunner", "cfgPath"],
        format!("{}/server.cfg", root_str).into(),
    );

    std::fs::create_dir_all(out_dir).map_err(io(out_dir))?;
    let out = out_dir.join("config.json");
    let pretty = serde_json::to_string_pretty(&config).map_err(|e| RenderError::Json {
        path: out.clone(),
        detail: e.to_string(),
    })?;
    std::fs::write(&out, pretty).map_err(io(&out))?;
    Ok(out)
}

/// Set a nested key, creating intermediate objects (and replacing non-objects).
fn set_path(value: &mut serde_json::Value, keys: &[&str], leaf: serde_json::Value) {
    let Some((last, parents)) = keys.split_last() else {
        return;
    };
    let mut cursor = value;
    for key in parents {
        if !cursor.is_object() {
            *cursor = serde_json::Value::Object(serde_json::Map::new());
        }
        cursor = match cursor {
            serde_json::Value::Object(map) => map
                .entry(key.to_string())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new())),
            _ => return,
        };
    }
    if !cursor.is_object() {
        *cursor = serde_json::Value::Object(serde_json::Map::new());
    }
    if let serde_json::Value::Object(map) = cursor {
        map.insert(last.to_string(), leaf);
    }
}
