//! SQL execution for `connect_database` and `query_database`.
//!
//! Each task opens its own connection and drops it when done; nothing is
//! pooled across tasks.

use crate::core::error::TaskError;
use crate::core::types::{SqlConnectionInfo, SqlDriver};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Opens connections to the deployment database.
pub trait DatabaseGateway {
    fn connect(&self, info: &SqlConnectionInfo) -> Result<Box<dyn SqlConnection>, TaskError>;

    /// Make sure `info.database` exists before a run.
    fn prepare(&self, info: &SqlConnectionInfo) -> Result<PreparedDatabase, TaskError> {
        drop(self.connect(info)?);
        Ok(PreparedDatabase {
            server_login: info.clone(),
            created: false,
        })
    }
}

/// Result of [`prepare_database`].
#[derive(Debug, Clone)]
pub struct PreparedDatabase {
    /// Credentials the deployed server should connect with
    pub server_login: SqlConnectionInfo,
    /// The database did not exist and was created
    pub created: bool,
}

/// A live connection able to run a `;`-separated statement batch.
pub trait SqlConnection {
    /// Execute every statement of `sql` in order on this connection.
    fn execute_batch(&mut self, sql: &str) -> Result<(), TaskError>;
}

/// Pick the gateway for a driver. SQLite files resolve under `root`.
pub fn gateway_for(driver: SqlDriver, root: &Path) -> Box<dyn DatabaseGateway> {
    match driver {
        SqlDriver::Mysql => Box::new(MysqlGateway),
        SqlDriver::Sqlite => Box::new(SqliteGateway::new(root)),
    }
}

/// Run the `connect_database` action: open and close a connection.
pub fn check_connection(
    gateway: &dyn DatabaseGateway,
    info: &SqlConnectionInfo,
) -> Result<(), TaskError> {
    let conn = gateway.connect(info)?;
    drop(conn);
    info!(host = %info.host, database = %info.database, "database reachable");
    Ok(())
}

/// Pre-run database check, outside the task loop.
///
/// A missing MySQL database is created when connecting as `root`, together
/// with a dedicated login for the server. Other users get a connection
/// failure.
pub fn prepare_database(
    gateway: &dyn DatabaseGateway,
    info: &SqlConnectionInfo,
) -> Result<PreparedDatabase, TaskError> {
    let prepared = gateway.prepare(info)?;
    if prepared.created {
        info!(
            database = %info.database,
            login = %prepared.server_login.user,
            "created database"
        );
    } else {
        debug!(database = %info.database, "database exists");
    }
    Ok(prepared)
}

/// Run the `query_database` action.
///
/// `file` (read relative to the deployment root) wins over `query`. With
/// neither present the task yields [`TaskError::EmptyQuery`].
pub fn run_query(
    gateway: &dyn DatabaseGateway,
    info: &SqlConnectionInfo,
    file: Option<&Path>,
    query: Option<&str>,
) -> Result<(), TaskError> {
    let sql = match (file, query) {
        (Some(path), _) => std::fs::read_to_string(path).map_err(|e| TaskError::io(path, e))?,
        (None, Some(q)) => q.to_string(),
        (None, None) => return Err(TaskError::EmptyQuery),
    };
    let mut conn = gateway.connect(info)?;
    debug!(bytes = sql.len(), "executing statement batch");
    conn.execute_batch(&sql)
}

// ============================================================================
// MySQL
// ============================================================================

/// MySQL/MariaDB gateway. Sessions use `utf8mb4_unicode_ci`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MysqlGateway;

impl MysqlGateway {
    fn opts(info: &SqlConnectionInfo, database: Option<&str>) -> mysql::OptsBuilder {
        mysql::OptsBuilder::new()
            .ip_or_hostname(Some(info.host.clone()))
            .tcp_port(info.port)
            .user(Some(info.user.clone()))
            .pass(Some(info.password.clone()))
            .db_name(database.map(str::to_string))
            .init(vec!["SET NAMES utf8mb4 COLLATE utf8mb4_unicode_ci"])
    }

    fn open(info: &SqlConnectionInfo, database: Option<&str>) -> Result<mysql::Conn, TaskError> {
        mysql::Conn::new(Self::opts(info, database))
            .map_err(|e| TaskError::DatabaseConnectionFailure(e.to_string()))
    }
}

impl DatabaseGateway for MysqlGateway {
    fn connect(&self, info: &SqlConnectionInfo) -> Result<Box<dyn SqlConnection>, TaskError> {
        let conn = Self::open(info, Some(&info.database))?;
        Ok(Box::new(MysqlConnection(conn)))
    }

    fn prepare(&self, info: &SqlConnectionInfo) -> Result<PreparedDatabase, TaskError> {
        use mysql::prelude::Queryable;

        let fail = |e: mysql::Error| TaskError::DatabaseStatementFailure(e.to_string());
        let mut conn = Self::open(info, None)?;
        let version: Option<String> = conn.query_first("SELECT VERSION()").map_err(fail)?;
        info!(host = %info.host, version = ?version, "database server reachable");

        let existing: Option<String> = conn
            .exec_first(
                "SELECT SCHEMA_NAME FROM INFORMATION_SCHEMA.SCHEMATA WHERE SCHEMA_NAME = ?",
                (info.database.as_str(),),
            )
            .map_err(fail)?;
        if existing.is_some() {
            return Ok(PreparedDatabase {
                server_login: info.clone(),
                created: false,
            });
        }
        if info.user != "root" {
            return Err(TaskError::DatabaseConnectionFailure(format!(
                "database '{}' does not exist and user '{}' may not create it",
                info.database, info.user
            )));
        }

        let login = SqlConnectionInfo {
            user: login_name(&info.database),
            password: generate_password(),
            ..info.clone()
        };
        for stmt in provisioning_statements(&info.database, &login.user, &login.password) {
            conn.query_drop(stmt).map_err(fail)?;
        }
        Ok(PreparedDatabase {
            server_login: login,
            created: true,
        })
    }
}

/// MySQL account names are limited to 32 characters.
fn login_name(database: &str) -> String {
    database.chars().take(32).collect()
}

/// 32 lowercase hex characters.
fn generate_password() -> String {
    use std::hash::{BuildHasher, Hasher};
    use std::time::{SystemTime, UNIX_EPOCH};

    let seed = std::collections::hash_map::RandomState::new()
        .build_hasher()
        .finish();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed.to_le_bytes());
    hasher.update(&nanos.to_le_bytes());
    hasher.update(&std::process::id().to_le_bytes());
    hasher.finalize().to_hex().as_str()[..32].to_string()
}

fn provisioning_statements(database: &str, user: &str, password: &str) -> Vec<String> {
    let db = quote_ident(database);
    let account = format!("{}@'localhost'", quote_literal(user));
    let password = quote_literal(password);
    vec![
        format!(
            "CREATE DATABASE {} CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci",
            db
        ),
        format!("CREATE USER IF NOT EXISTS {} IDENTIFIED BY {}", account, password),
        format!("ALTER USER {} IDENTIFIED BY {}", account, password),
        format!("GRANT ALL PRIVILEGES ON {}.* TO {}", db, account),
        "FLUSH PRIVILEGES".to_string(),
    ]
}

fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

struct MysqlConnection(mysql::Conn);

impl SqlConnection for MysqlConnection {
    fn execute_batch(&mut self, sql: &str) -> Result<(), TaskError> {
        use mysql::prelude::Queryable;

        let fail = |e: mysql::Error| TaskError::DatabaseStatementFailure(e.to_string());
        let mut result = self.0.query_iter(sql).map_err(fail)?;
        // Drain every result set; a failing later statement surfaces here.
        while let Some(set) = result.iter() {
            for row in set {
                row.map_err(fail)?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// SQLite
// ============================================================================

/// SQLite gateway. `database` names a file, relative to the deployment root
/// unless absolute.
#[derive(Debug, Clone)]
pub struct SqliteGateway {
    root: PathBuf,
}

impl SqliteGateway {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn db_path(&self, database: &str) -> PathBuf {
        let p = Path::new(database);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        }
    }
}

impl DatabaseGateway for SqliteGateway {
    fn connect(&self, info: &SqlConnectionInfo) -> Result<Box<dyn SqlConnection>, TaskError> {
        let path = self.db_path(&info.database);
        let conn = rusqlite::Connection::open(&path).map_err(|e| {
            TaskError::DatabaseConnectionFailure(format!("{}: {}", path.display(), e))
        })?;
        Ok(Box::new(SqliteConnection(conn)))
    }

    fn prepare(&self, info: &SqlConnectionInfo) -> Result<PreparedDatabase, TaskError> {
        let created = !self.db_path(&info.database).exists();
        drop(self.connect(info)?);
        Ok(PreparedDatabase {
            server_login: info.clone(),
            created,
        })
    }
}

struct SqliteConnection(rusqlite::Connection);

impl SqlConnection for SqliteConnection {
    fn execute_batch(&mut self, sql: &str) -> Result<(), TaskError> {
        self.0
            .execute_batch(sql)
            .map_err(|e| TaskError::DatabaseStatementFailure(e.to_string()))
    }
}
