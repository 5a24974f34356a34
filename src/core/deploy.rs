//! Unattended deployment settings (`deploy.json`), database naming and
//! connection strings.

use super::error::LoadError;
use super::types::{SqlConnectionInfo, SqlDriver};
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

/// Server license key shape issued by the Cfx.re keymaster.
static LICENSE_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^cfxk_[A-Za-z0-9]{20}_[A-Za-z0-9]{6}$").ok());

/// Default server slot count.
pub const DEFAULT_MAX_CLIENTS: u32 = 48;

/// Contents of a `deploy.json` file. Unknown keys are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployFile {
    #[serde(default = "default_sql_server")]
    pub sql_server: String,
    #[serde(default = "default_sql_port", deserialize_with = "number_or_string")]
    pub sql_port: u16,
    #[serde(default = "default_sql_user")]
    pub sql_user: String,
    #[serde(default)]
    pub sql_pass: String,
    /// Empty means "generate from the recipe name"
    #[serde(default)]
    pub sql_db: String,
    #[serde(default)]
    pub sql_driver: SqlDriver,
    pub recipe_url: String,
    pub deploy_folder: String,
    #[serde(default)]
    pub remove_git: bool,
    #[serde(default = "default_server_name")]
    pub server_name: String,
    #[serde(default = "default_max_clients", deserialize_with = "number_or_string")]
    pub max_clients: u32,
    #[serde(default)]
    pub sv_license_key: String,
}

fn default_sql_server() -> String {
    "localhost".to_string()
}

fn default_sql_port() -> u16 {
    3306
}

fn default_sql_user() -> String {
    "root".to_string()
}

fn default_server_name() -> String {
    "FXServer".to_string()
}

fn default_max_clients() -> u32 {
    DEFAULT_MAX_CLIENTS
}

/// Accept `3306` as well as `"3306"`.
fn number_or_string<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64> + std::str::FromStr,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }
    use serde::de::Error;
    let out_of_range = || D::Error::custom("number out of range");
    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => T::try_from(n).map_err(|_| out_of_range()),
        Raw::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| D::Error::custom(format!("expected a number, got '{}'", s))),
    }
}

impl DeployFile {
    /// Read and check a `deploy.json`.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: Self = serde_json::from_str(&content)
            .map_err(|e| LoadError::Invalid(format!("{}: {}", path.display(), e)))?;
        file.validate()?;
        Ok(file)
    }

    pub fn validate(&self) -> Result<(), LoadError> {
        check_deploy_folder(&self.deploy_folder)?;
        if !self.sv_license_key.is_empty() && !is_valid_license(&self.sv_license_key) {
            return Err(LoadError::Invalid(
                "svLicenseKey does not look like a cfxk_ license key".to_string(),
            ));
        }
        if self.recipe_url.trim().is_empty() {
            return Err(LoadError::Invalid("recipeUrl must not be empty".to_string()));
        }
        Ok(())
    }

    /// Connection parameters, generating a database name when none is set.
    pub fn sql_info(&self, recipe_name: &str) -> SqlConnectionInfo {
        let database = if self.sql_db.trim().is_empty() {
            generate_db_name(recipe_name)
        } else {
            self.sql_db.clone()
        };
        SqlConnectionInfo {
            host: self.sql_server.clone(),
            port: self.sql_port,
            user: self.sql_user.clone(),
            password: self.sql_pass.clone(),
            database,
            driver: self.sql_driver,
        }
    }
}

/// `<base>/fxServer/txData/<folder>`.
pub fn deployment_root(base: &Path, folder: &str) -> Result<PathBuf, LoadError> {
    check_deploy_folder(folder)?;
    Ok(base.join("fxServer").join("txData").join(folder))
}

/// The deploy folder is a single plain directory name.
fn check_deploy_folder(folder: &str) -> Result<(), LoadError> {
    let mut components = Path::new(folder).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(LoadError::Invalid(format!(
            "deployFolder '{}' must be a single directory name",
            folder
        ))),
    }
}

pub fn is_valid_license(key: &str) -> bool {
    LICENSE_PATTERN
        .as_ref()
        .is_some_and(|re| re.is_match(key))
}

/// `<RecipeNameWithoutSpaces>_<6 uppercase hex chars>`.
pub fn generate_db_name(recipe_name: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut hasher = blake3::Hasher::new();
    hasher.update(recipe_name.as_bytes());
    hasher.update(&nanos.to_le_bytes());
    hasher.update(&std::process::id().to_le_bytes());
    let hex = hasher.finalize().to_hex();
    let suffix = hex.as_str()[..6].to_ascii_uppercase();

    let name: String = recipe_name.chars().filter(|c| !c.is_whitespace()).collect();
    format!("{}_{}", name, suffix)
}

/// `mysql://{user}:{password}@{host}:{port}/{database}`.
pub fn connection_string(info: &SqlConnectionInfo) -> String {
    format!(
        "mysql://{}:{}@{}:{}/{}",
        info.user, info.password, info.host, info.port, info.database
    )
}
