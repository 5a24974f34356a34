//! CLI subcommands: init, validate, run, render, status.

use crate::core::deploy::{self, DeployFile, DEFAULT_MAX_CLIENTS};
use crate::core::executor::{self, RunConfig, RunObserver, Toolbox};
use crate::core::parser::{self, Severity};
use crate::core::recipe::{self, RecipeSource};
use crate::core::servercfg::{self, ServerSettings};
use crate::core::types::*;
use crate::journal::eventlog;
use crate::resources::database;
use crate::resources::vcs::GitCli;
use crate::transport::http::HttpTransport;
use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter recipe.yaml and deploy.json
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Parse a recipe and report unknown or malformed tasks
    Validate {
        /// Recipe path or http(s) URL
        #[arg(short, long, default_value = "recipe.yaml")]
        file: String,
    },

    /// Provision a deployment by running a recipe
    Run(RunArgs),

    /// Render server.cfg placeholders of an existing deployment
    Render(RenderArgs),

    /// Summarize the most recent run from the journal
    Status {
        /// Journal directory
        #[arg(long, default_value = ".fxdeploy")]
        journal_dir: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct SqlArgs {
    #[arg(long, default_value = "localhost")]
    pub sql_host: String,

    #[arg(long, default_value_t = 3306)]
    pub sql_port: u16,

    #[arg(long, default_value = "root")]
    pub sql_user: String,

    #[arg(long, env = "FXDEPLOY_SQL_PASSWORD", default_value = "", hide_env_values = true)]
    pub sql_password: String,

    /// Database name (generated from the recipe name when omitted)
    #[arg(long)]
    pub sql_database: Option<String>,

    #[arg(long, value_enum, default_value_t = SqlDriver::Mysql)]
    pub sql_driver: SqlDriver,
}

impl SqlArgs {
    fn info(&self, recipe_name: &str) -> SqlConnectionInfo {
        SqlConnectionInfo {
            host: self.sql_host.clone(),
            port: self.sql_port,
            user: self.sql_user.clone(),
            password: self.sql_password.clone(),
            database: self
                .sql_database
                .clone()
                .unwrap_or_else(|| deploy::generate_db_name(recipe_name)),
            driver: self.sql_driver,
        }
    }
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    #[arg(long, default_value = "FXServer")]
    pub server_name: String,

    #[arg(long, default_value_t = DEFAULT_MAX_CLIENTS)]
    pub max_clients: u32,

    /// Server license key (cfxk_...)
    #[arg(long, default_value = "")]
    pub license_key: String,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Recipe path or http(s) URL
    #[arg(short, long, default_value = "recipe.yaml")]
    pub recipe: String,

    /// Unattended settings file; overrides recipe, SQL, server and folder flags
    #[arg(long)]
    pub deploy_file: Option<PathBuf>,

    /// Directory holding fxServer/txData
    #[arg(long, default_value = ".")]
    pub base_dir: PathBuf,

    /// Folder under fxServer/txData to deploy into
    #[arg(long, default_value = "default")]
    pub deploy_folder: String,

    /// Deploy into this directory instead of <base-dir>/fxServer/txData/<folder>
    #[arg(long, conflicts_with = "deploy_file")]
    pub root: Option<PathBuf>,

    #[command(flatten)]
    pub sql: SqlArgs,

    #[command(flatten)]
    pub server: ServerArgs,

    /// Append a remove_git task to the recipe
    #[arg(long)]
    pub remove_git: bool,

    /// Render server.cfg placeholders after a complete run
    #[arg(long)]
    pub render_cfg: bool,

    /// Example txAdmin config.json to fill in after a complete run
    #[arg(long)]
    pub txadmin_example: Option<PathBuf>,

    #[arg(long, default_value = ".fxdeploy")]
    pub journal_dir: PathBuf,

    /// Do not write the run journal
    #[arg(long)]
    pub no_journal: bool,

    /// Hide download progress bars
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Deployment directory containing server.cfg
    #[arg(long)]
    pub root: PathBuf,

    /// Recipe whose name/author/description fill the template
    #[arg(short, long)]
    pub recipe: Option<String>,

    #[command(flatten)]
    pub sql: SqlArgs,

    #[command(flatten)]
    pub server: ServerArgs,
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Run(args) => cmd_run(&args),
        Commands::Render(args) => cmd_render(&args),
        Commands::Status { journal_dir } => cmd_status(&journal_dir),
    }
}

const STARTER_RECIPE: &str = r#"name: My Server
author: me
description: Starter recipe generated by fxdeploy init
tasks:
  - action: ensure_dir
    path: resources
  - action: write_file
    file: server.cfg
    data: |
      {{serverEndpoints}}
      sv_hostname "{{serverName}}"
      sv_maxclients {{maxClients}}
      sv_licenseKey "{{svLicense}}"
      set mysql_connection_string "{{dbConnectionString}}"
"#;

const STARTER_DEPLOY: &str = r#"{
  "sqlServer": "localhost",
  "sqlPort": 3306,
  "sqlUser": "root",
  "sqlPass": "",
  "sqlDb": "",
  "recipeUrl": "recipe.yaml",
  "deployFolder": "default",
  "removeGit": false,
  "serverName": "My Server",
  "maxClients": 48,
  "svLicenseKey": ""
}
"#;

fn cmd_init(path: &Path) -> Result<()> {
    let recipe_path = path.join("recipe.yaml");
    let deploy_path = path.join("deploy.json");
    for p in [&recipe_path, &deploy_path] {
        if p.exists() {
            bail!("{} already exists", p.display());
        }
    }

    std::fs::create_dir_all(path).with_context(|| format!("cannot create {}", path.display()))?;
    std::fs::write(&recipe_path, STARTER_RECIPE)
        .with_context(|| format!("cannot write {}", recipe_path.display()))?;
    std::fs::write(&deploy_path, STARTER_DEPLOY)
        .with_context(|| format!("cannot write {}", deploy_path.display()))?;

    println!("Initialized fxdeploy project at {}", path.display());
    println!("  Created: {}", recipe_path.display());
    println!("  Created: {}", deploy_path.display());
    Ok(())
}

fn cmd_validate(location: &str) -> Result<()> {
    let transport = HttpTransport::new(false)?;
    let recipe = recipe::load_recipe(&RecipeSource::parse(location), &transport)?;
    let findings = parser::validate_recipe(&recipe);

    println!("{} ({} tasks)", recipe.name, recipe.tasks.len());
    for (i, task) in recipe.tasks.iter().enumerate() {
        println!("  {:>3}. {}", i + 1, describe(task));
    }

    let errors = findings
        .iter()
        .filter(|f| f.severity == Severity::Error)
        .count();
    for f in &findings {
        match f.severity {
            Severity::Warning => eprintln!("  WARNING: {}", f),
            Severity::Error => eprintln!("  ERROR: {}", f),
        }
    }

    if !parser::is_runnable(&findings) {
        bail!("{} validation error(s)", errors);
    }
    println!("OK");
    Ok(())
}

/// `action (key: value, ...)`.
fn describe(task: &Task) -> String {
    let params: Vec<String> = task
        .summary()
        .into_iter()
        .map(|(k, v)| format!("{}: {}", k, v))
        .collect();
    if params.is_empty() {
        task.action_name().to_string()
    } else {
        format!("{} ({})", task.action_name(), params.join(", "))
    }
}

/// Prints the outcome stream to stdout.
struct ConsoleObserver;

impl RunObserver for ConsoleObserver {
    fn task_started(&mut self, index: usize, total: usize, task: &Task) {
        println!("[{}/{}] Processing task: {}", index + 1, total, describe(task));
    }

    fn task_finished(&mut self, report: &TaskReport) {
        match report.outcome.error() {
            None => println!(
                "      {} ({:.1}s)",
                report.outcome.label(),
                report.duration.as_secs_f64()
            ),
            Some(e) => println!("      {}: {}", report.outcome.label(), e),
        }
    }
}

/// Everything `run` needs once flags and deploy.json are merged.
struct RunPlan {
    source: RecipeSource,
    base_dir: PathBuf,
    root: PathBuf,
    remove_git: bool,
    server: ServerSettings,
    /// SQL settings come from here when set, otherwise from flags
    deploy: Option<DeployFile>,
}

fn plan_run(args: &RunArgs) -> Result<RunPlan> {
    let base_dir = std::path::absolute(&args.base_dir)
        .with_context(|| format!("cannot resolve {}", args.base_dir.display()))?;

    if let Some(path) = &args.deploy_file {
        let file = DeployFile::load(path)?;
        println!("Using settings from {}", path.display());
        return Ok(RunPlan {
            source: RecipeSource::parse(&file.recipe_url),
            root: deploy::deployment_root(&base_dir, &file.deploy_folder)?,
            base_dir,
            remove_git: file.remove_git || args.remove_git,
            server: ServerSettings {
                server_name: file.server_name.clone(),
                max_clients: file.max_clients,
                license_key: file.sv_license_key.clone(),
                ..ServerSettings::default()
            },
            deploy: Some(file),
        });
    }

    if !args.server.license_key.is_empty() && !deploy::is_valid_license(&args.server.license_key)
    {
        bail!("--license-key does not look like a cfxk_ license key");
    }
    let root = match &args.root {
        Some(r) => {
            std::path::absolute(r).with_context(|| format!("cannot resolve {}", r.display()))?
        }
        None => deploy::deployment_root(&base_dir, &args.deploy_folder)?,
    };
    Ok(RunPlan {
        source: RecipeSource::parse(&args.recipe),
        base_dir,
        root,
        remove_git: args.remove_git,
        server: ServerSettings {
            server_name: args.server.server_name.clone(),
            max_clients: args.server.max_clients,
            license_key: args.server.license_key.clone(),
            ..ServerSettings::default()
        },
        deploy: None,
    })
}

fn cmd_run(args: &RunArgs) -> Result<()> {
    let plan = plan_run(args)?;
    let transport = HttpTransport::new(!args.quiet)?;

    let mut recipe = recipe::load_recipe(&plan.source, &transport)
        .with_context(|| format!("cannot load recipe {}", plan.source))?;
    // Malformed tasks abort the run when reached, not up front.
    for f in parser::validate_recipe(&recipe) {
        match f.severity {
            Severity::Warning => eprintln!("  WARNING: {}", f),
            Severity::Error => eprintln!("  ERROR: {}", f),
        }
    }
    if plan.remove_git {
        recipe = recipe::with_remove_git(recipe);
    }

    let sql = match &plan.deploy {
        Some(file) => file.sql_info(&recipe.name),
        None => args.sql.info(&recipe.name),
    };

    std::fs::create_dir_all(&plan.root)
        .with_context(|| format!("cannot create {}", plan.root.display()))?;
    let context = DeploymentContext {
        root: plan.root.clone(),
        sql,
    };

    println!("Recipe:      {}", recipe.name);
    println!("Deploy to:   {}", context.root.display());
    println!("Database:    {} ({})", context.sql.database, context.sql.driver);
    println!();

    let git = GitCli::default();
    let gateway = database::gateway_for(context.sql.driver, &context.root);
    let prepared = database::prepare_database(gateway.as_ref(), &context.sql)
        .with_context(|| format!("cannot prepare database {}", context.sql.database))?;
    if prepared.created {
        println!(
            "Created database {} (login: {})",
            context.sql.database, prepared.server_login.user
        );
        println!();
    }

    let cfg = RunConfig {
        context: &context,
        tools: Toolbox {
            vcs: &git,
            transport: &transport,
            database: gateway.as_ref(),
        },
        journal_dir: (!args.no_journal).then(|| args.journal_dir.clone()),
    };
    let report = executor::run_recipe(&recipe, &cfg, &mut ConsoleObserver)?;

    println!();
    if let Some(failed) = report.failure() {
        let err = failed
            .outcome
            .error()
            .map(|e| e.to_string())
            .unwrap_or_default();
        println!(
            "Run aborted: {} ok, {} skipped, FAILED at task #{} ({})",
            report.succeeded(),
            report.skipped(),
            failed.index + 1,
            failed.action
        );
        return Err(anyhow!(
            "task #{} ({}) failed: {}",
            failed.index + 1,
            failed.action,
            err
        ));
    }
    println!(
        "Run complete: {} ok, {} skipped ({:.1}s).",
        report.succeeded(),
        report.skipped(),
        report.total_duration.as_secs_f64()
    );

    let settings = ServerSettings {
        db_connection_string: deploy::connection_string(&prepared.server_login),
        recipe_name: Some(recipe.name.clone()),
        recipe_author: recipe.author.clone(),
        recipe_description: recipe.description.clone(),
        ..plan.server
    };
    if args.render_cfg {
        let path = servercfg::update_server_cfg(&context.root, &settings)?;
        println!("Rendered {}", path.display());
    }
    if let Some(example) = &args.txadmin_example {
        let out_dir = plan.base_dir.join("fxServer").join("txData").join("default");
        let path =
            servercfg::write_txadmin_config(example, &out_dir, &settings.server_name, &context.root)?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn cmd_render(args: &RenderArgs) -> Result<()> {
    let (name, author, description) = match &args.recipe {
        Some(location) => {
            let transport = HttpTransport::new(false)?;
            let r = recipe::load_recipe(&RecipeSource::parse(location), &transport)?;
            (Some(r.name), r.author, r.description)
        }
        None => (None, None, None),
    };
    let sql = args.sql.info(name.as_deref().unwrap_or("fxserver"));
    let settings = ServerSettings {
        server_name: args.server.server_name.clone(),
        max_clients: args.server.max_clients,
        license_key: args.server.license_key.clone(),
        db_connection_string: deploy::connection_string(&sql),
        recipe_name: name,
        recipe_author: author,
        recipe_description: description,
    };
    let path = servercfg::update_server_cfg(&args.root, &settings)?;
    println!("Rendered {}", path.display());
    Ok(())
}

fn cmd_status(journal_dir: &Path) -> Result<()> {
    let events = eventlog::read_events(journal_dir)?;
    let Some(run) = eventlog::last_run(&events) else {
        println!("No runs recorded in {}", journal_dir.display());
        return Ok(());
    };

    println!("Last run:  {} ({})", run.run_id, run.recipe);
    println!("Started:   {}", run.started);
    match &run.finished {
        Some(ts) => println!("Finished:  {}", ts),
        None => println!("Finished:  (no completion record)"),
    }
    println!("Tasks:     {} ok, {} skipped", run.succeeded, run.skipped);
    if let Some((index, action, error)) = &run.failure {
        println!("Failed:    task #{} ({}): {}", index + 1, action, error);
    }
    Ok(())
}
