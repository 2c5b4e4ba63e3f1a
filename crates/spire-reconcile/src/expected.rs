//! Expected-configuration rendering and expected file attributes

use crate::params::{AgentParams, ServerParams};
use crate::{Error, Result};
use minijinja::{Environment, context};
use spire_model::digest::{digest_config_str, digest_service_unit_str};
use spire_model::dirs::{AgentDirs, ServerDirs};
use spire_model::file_stat::{FileModes, FileStat, FileStats, FileType};
use spire_model::state::State;
use spire_system::Scope;
use spire_system::fs::{current_user_name, primary_group_of};
use std::path::{Path, PathBuf};

const AGENT_CONF_TMPL: &str = include_str!("templates/agent.conf.j2");
const AGENT_ENV_TMPL: &str = include_str!("templates/agent.env.j2");
const AGENT_SERVICE_TMPL: &str = include_str!("templates/agent.service.j2");
const SERVER_CONF_TMPL: &str = include_str!("templates/server.conf.j2");
const SERVER_ENV_TMPL: &str = include_str!("templates/server.env.j2");
const SERVER_SERVICE_TMPL: &str = include_str!("templates/server.service.j2");

/// The declared configuration, rendered and digested
///
/// Only a present expectation renders anything; an absent expectation keeps
/// every digest `None` so existing files register as divergence.
#[derive(Debug, Clone, Default)]
pub struct ExpectedConfig {
    /// Expected service scope
    pub scope: Option<Scope>,
    /// Expected binary version
    pub version: Option<String>,
    /// Rendered configuration file in the pass's work dir
    pub conf_file: Option<PathBuf>,
    /// Rendered environment file in the pass's work dir
    pub env_file: Option<PathBuf>,
    /// Rendered service unit file in the pass's work dir
    pub service_file: Option<PathBuf>,
    /// Trust bundle fetched from the server, written to the work dir
    pub trust_bundle_file: Option<PathBuf>,
    /// Normalized digest of the rendered configuration
    pub conf_digest: Option<String>,
    /// Normalized digest of the rendered service unit
    pub service_digest: Option<String>,
}

impl ExpectedConfig {
    /// The expectation for an absent installation
    pub fn absent() -> Self {
        Self::default()
    }

    /// Render the agent expectation into the pass's work dir
    ///
    /// The join token is only known once the server granted one; rendering
    /// with `None` uses a placeholder, which is sound because the
    /// environment file is diffed by existence, not content.
    pub fn for_agent(
        params: &AgentParams,
        dirs: &AgentDirs,
        work_dir: &Path,
        join_token: Option<&str>,
        trust_bundle: Option<&str>,
    ) -> Result<Self> {
        if params.state == State::Absent {
            return Ok(Self::absent());
        }
        let scope = Scope::or_default(None, params.service_scope.as_deref());

        let conf = render(
            "agent.conf",
            AGENT_CONF_TMPL,
            context! {
                data_dir => dirs.dirs.data_dir.display().to_string(),
                log_level => params.log_level,
                log_dir => dirs.dirs.log_dir.display().to_string(),
                server_address => params.server_address,
                server_port => params.server_port,
                socket_path => params.socket_path,
                trust_bundle_path => dirs.trust_bundle_file.display().to_string(),
                trust_domain => params.trust_domain,
            },
        )?;
        let env = render(
            "agent.env",
            AGENT_ENV_TMPL,
            context! { join_token => join_token.unwrap_or("TO-BE-GENERATED") },
        )?;
        let service = render(
            "agent.service",
            AGENT_SERVICE_TMPL,
            context! {
                env_file => dirs.dirs.env_file.display().to_string(),
                conf_file => dirs.dirs.conf_file.display().to_string(),
                executable => dirs.dirs.executable.display().to_string(),
                wanted_by => wanted_by(scope),
            },
        )?;

        let conf_file = write_rendered(work_dir, "agent.conf", &conf)?;
        let env_file = write_rendered(work_dir, "agent.env", &env)?;
        let service_file =
            write_rendered(work_dir, &dirs.dirs.service_full_name, &service)?;
        let trust_bundle_file = match trust_bundle {
            Some(bundle) => Some(write_rendered(work_dir, "trust_bundle.pem", bundle)?),
            None => None,
        };

        Ok(Self {
            scope: Some(scope),
            version: Some(params.version.clone()),
            conf_digest: Some(digest_config_str(&conf)?),
            service_digest: Some(digest_service_unit_str(&service)),
            conf_file: Some(conf_file),
            env_file: Some(env_file),
            service_file: Some(service_file),
            trust_bundle_file,
        })
    }

    /// Render the server expectation into the pass's work dir
    pub fn for_server(params: &ServerParams, dirs: &ServerDirs, work_dir: &Path) -> Result<Self> {
        if params.state == State::Absent {
            return Ok(Self::absent());
        }
        let scope = Scope::or_default(None, params.service_scope.as_deref());

        let conf = render(
            "server.conf",
            SERVER_CONF_TMPL,
            context! {
                bind_address => params.bind_address,
                bind_port => params.bind_port,
                data_dir => dirs.dirs.data_dir.display().to_string(),
                log_level => params.log_level,
                log_dir => dirs.dirs.log_dir.display().to_string(),
                registration_uds_path => params
                    .registration_uds_path
                    .clone()
                    .unwrap_or_else(|| "/tmp/spire-registration.sock".to_string()),
                trust_domain => params.trust_domain,
            },
        )?;
        let env = render(
            "server.env",
            SERVER_ENV_TMPL,
            context! { log_level => params.log_level },
        )?;
        let service = render(
            "server.service",
            SERVER_SERVICE_TMPL,
            context! {
                env_file => dirs.dirs.env_file.display().to_string(),
                conf_file => dirs.dirs.conf_file.display().to_string(),
                executable => dirs.dirs.executable.display().to_string(),
                wanted_by => wanted_by(scope),
            },
        )?;

        let conf_file = write_rendered(work_dir, "server.conf", &conf)?;
        let env_file = write_rendered(work_dir, "server.env", &env)?;
        let service_file =
            write_rendered(work_dir, &dirs.dirs.service_full_name, &service)?;

        Ok(Self {
            scope: Some(scope),
            version: Some(params.version.clone()),
            conf_digest: Some(digest_config_str(&conf)?),
            service_digest: Some(digest_service_unit_str(&service)),
            conf_file: Some(conf_file),
            env_file: Some(env_file),
            service_file: Some(service_file),
            trust_bundle_file: None,
        })
    }
}

fn render(label: &str, source: &'static str, ctx: minijinja::Value) -> Result<String> {
    let mut env = Environment::new();
    env.add_template(label, source)
        .map_err(|source| Error::Template {
            label: label.to_string(),
            source,
        })?;
    let template = env.get_template(label).map_err(|source| Error::Template {
        label: label.to_string(),
        source,
    })?;
    template.render(ctx).map_err(|source| Error::Template {
        label: label.to_string(),
        source,
    })
}

fn write_rendered(work_dir: &Path, name: &str, content: &str) -> Result<PathBuf> {
    let path = work_dir.join(name);
    std::fs::write(&path, content)?;
    Ok(path)
}

fn wanted_by(scope: Scope) -> &'static str {
    match scope {
        Scope::User => "default.target",
        _ => "multi-user.target",
    }
}

/// Resolve the owner and group expected on managed paths
///
/// Falls back to the invoking user so converged installations owned by the
/// operator do not register spurious ownership drift.
pub fn resolve_owner_group(declared_owner: Option<&str>) -> (Option<String>, Option<String>) {
    let owner = declared_owner
        .map(str::to_string)
        .or_else(current_user_name);
    let group = owner.as_deref().and_then(primary_group_of);
    (owner, group)
}

/// Build the expected attribute set for every managed path
pub fn expected_file_stats(
    state: State,
    dirs: &[PathBuf],
    files_not_exec: &[PathBuf],
    files_exec: &[PathBuf],
    modes: &FileModes,
    owner: Option<&str>,
    group: Option<&str>,
) -> FileStats {
    let mut stats = FileStats::default();
    if state == State::Absent {
        for path in dirs.iter().chain(files_not_exec).chain(files_exec) {
            stats.insert(path.clone(), FileStat::from_issue("known to be absent"));
        }
        return stats;
    }
    let present = |mode: u32, ftype: FileType| FileStat {
        exists: true,
        owner: owner.map(str::to_string),
        group: group.map(str::to_string),
        mode: Some(mode),
        ftype: Some(ftype),
        issue: None,
    };
    for path in dirs {
        stats.insert(path.clone(), present(modes.dir, FileType::Directory));
    }
    for path in files_not_exec {
        stats.insert(path.clone(), present(modes.file, FileType::File));
    }
    for path in files_exec {
        stats.insert(path.clone(), present(modes.exe, FileType::File));
    }
    stats
}
