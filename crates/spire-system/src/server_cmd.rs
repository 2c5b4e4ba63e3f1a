//! Operations executed through the `spire-server` CLI

use crate::health::server_socket_args;
use crate::{Error, Result};
use spire_exec::{Command, CommandExecutor};
use spire_model::agent_entry::{AgentEntryFilter, AgentRegistrationEntry, parse_agent_list};
use spire_model::server_entry::{
    EntryParams, EntryShowOutcome, entries_having_same_identity, need_change,
};
use spire_model::state::State;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Commands addressed at a SPIRE server installation
pub struct ServerCommands {
    executor: Arc<dyn CommandExecutor>,
    executable: PathBuf,
    registration_uds_path: Option<String>,
}

impl ServerCommands {
    /// Address the server binary under the given install dir
    ///
    /// An empty install dir falls back to `spire-server` on the PATH.
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        install_dir: Option<&Path>,
        registration_uds_path: Option<String>,
    ) -> Self {
        let executable = match install_dir {
            Some(dir) => dir.join("bin").join("spire-server"),
            None => PathBuf::from("spire-server"),
        };
        Self {
            executor,
            executable,
            registration_uds_path,
        }
    }

    /// The resolved server executable path
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn uds_args(&self) -> Vec<String> {
        server_socket_args(self.registration_uds_path.as_deref())
    }

    async fn run(&self, args: Vec<String>, action: &str) -> Result<spire_exec::ExecOutcome> {
        let mut cmd = Command::new(self.executable.display().to_string());
        cmd.args(args);
        debug!(command = %cmd, action, "running spire-server command");
        let outcome = self.executor.run(cmd).await?;
        if outcome.failed() {
            return Err(Error::ServerCommandFailed {
                action: action.to_string(),
                outcome: outcome.describe(),
            });
        }
        Ok(outcome)
    }

    /// The server's version string
    ///
    /// The binary prints its version to stderr; stdout is the fallback in
    /// case that ever changes.
    pub async fn version(&self) -> Result<String> {
        let outcome = self.run(vec!["--version".to_string()], "server version").await?;
        let version = if !outcome.has_blank_stderr() {
            outcome.stderr
        } else {
            outcome.stdout
        };
        Ok(version.trim().to_string())
    }

    /// The server's trust bundle, PEM-encoded
    pub async fn bundle_show(&self) -> Result<String> {
        let mut args = vec!["bundle".to_string(), "show".to_string()];
        args.extend(self.uds_args());
        let outcome = self.run(args, "bundle show").await?;
        Ok(outcome.stdout)
    }

    /// Generate a join token, optionally bound to an extra SPIFFE ID
    pub async fn token_generate(
        &self,
        additional_spiffe_id: Option<&str>,
        ttl_seconds: Option<u32>,
    ) -> Result<String> {
        let mut args = vec!["token".to_string(), "generate".to_string()];
        if let Some(spiffe_id) = additional_spiffe_id {
            if !spiffe_id.trim().is_empty() {
                args.push("-spiffeID".to_string());
                args.push(spiffe_id.to_string());
            }
        }
        if let Some(ttl) = ttl_seconds {
            args.push("-ttl".to_string());
            args.push(ttl.to_string());
        }
        args.extend(self.uds_args());
        let outcome = self.run(args, "token generate").await?;
        extract_join_token(&outcome.stdout).ok_or_else(|| {
            Error::ServerCommandFailed {
                action: "token generate".to_string(),
                outcome: format!("bad token generate stdout format: {:?}", outcome.stdout),
            }
        })
    }

    /// The attested agents known to the server, filtered
    pub async fn agent_list(
        &self,
        filter: &AgentEntryFilter,
    ) -> Result<Vec<AgentRegistrationEntry>> {
        let mut args = vec!["agent".to_string(), "list".to_string()];
        args.extend(self.uds_args());
        let outcome = self.run(args, "agent list").await?;
        let entries = parse_agent_list(&outcome.stdout)?;
        Ok(entries.into_iter().filter(|e| filter.matches(e)).collect())
    }

    /// Show the registration entries matching the params' identity fields
    ///
    /// Never fails on unparsable stdout; the outcome carries `parse_error`
    /// beside the raw output instead.
    pub async fn entry_show(&self, params: &EntryParams) -> Result<EntryShowOutcome> {
        let mut keys = vec!["registration_uds_path"];
        for key in ["downstream", "federates_with", "parent_id", "selector", "spiffe_id"] {
            if identity_contains(params, key) {
                keys.push(key);
            }
        }
        let mut args = vec!["entry".to_string(), "show".to_string()];
        args.extend(entry_args(params, &keys)?);
        let mut cmd = Command::new(self.executable.display().to_string());
        cmd.args(args);
        let outcome = self.executor.run(cmd).await?;
        if outcome.failed() {
            return Err(Error::ServerCommandFailed {
                action: "entry show".to_string(),
                outcome: outcome.describe(),
            });
        }
        Ok(EntryShowOutcome::from_output(
            outcome.code,
            &outcome.stdout,
            &outcome.stderr,
        ))
    }

    /// Create a registration entry
    pub async fn entry_create(&self, params: &EntryParams) -> Result<()> {
        let keys = [
            "admin",
            "dns_name",
            "downstream",
            "entry_expiry",
            "federates_with",
            "node",
            "parent_id",
            "registration_uds_path",
            "selector",
            "spiffe_id",
            "ttl",
        ];
        let mut args = vec!["entry".to_string(), "create".to_string()];
        args.extend(entry_args(params, &keys)?);
        self.run(args, "entry create").await.map(|_| ())
    }

    /// Update a registration entry by entry id
    pub async fn entry_update(&self, params: &EntryParams) -> Result<()> {
        require_entry_id(params, "entry update")?;
        let keys = [
            "entry_id",
            "admin",
            "dns_name",
            "downstream",
            "entry_expiry",
            "federates_with",
            "parent_id",
            "registration_uds_path",
            "selector",
            "spiffe_id",
            "ttl",
        ];
        let mut args = vec!["entry".to_string(), "update".to_string()];
        args.extend(entry_args(params, &keys)?);
        self.run(args, "entry update").await.map(|_| ())
    }

    /// Drive the declared entry to its target state
    ///
    /// Entries are addressed by their identity field subset: absent deletes
    /// every match, present creates when nothing matches and updates in
    /// place when the first match diverges. Returns whether anything
    /// changed.
    pub async fn entry_ensure(&self, params: &EntryParams) -> Result<bool> {
        let show = self.entry_show(params).await?;
        if let Some(parse_error) = &show.parse_error {
            return Err(Error::Precondition(format!(
                "cannot reconcile entry, show output unparsable: {parse_error}"
            )));
        }
        let matched = entries_having_same_identity(params, &show.entries);

        if params.state == State::Absent {
            if matched.is_empty() {
                return Ok(false);
            }
            for entry in matched {
                let mut delete_params = params.clone();
                delete_params.entry_id = entry.entry_id.clone();
                self.entry_delete(&delete_params).await?;
            }
            return Ok(true);
        }

        let first = matched.first().copied();
        if !need_change(params, first) {
            return Ok(false);
        }
        match first {
            None => self.entry_create(params).await?,
            Some(actual) => {
                let mut update_params = params.clone();
                update_params.entry_id = actual.entry_id.clone();
                self.entry_update(&update_params).await?;
            }
        }
        Ok(true)
    }

    /// Delete a registration entry by entry id
    pub async fn entry_delete(&self, params: &EntryParams) -> Result<()> {
        require_entry_id(params, "entry delete")?;
        let keys = ["registration_uds_path", "entry_id"];
        let mut args = vec!["entry".to_string(), "delete".to_string()];
        args.extend(entry_args(params, &keys)?);
        self.run(args, "entry delete").await.map(|_| ())
    }
}

fn require_entry_id(params: &EntryParams, action: &str) -> Result<()> {
    match &params.entry_id {
        Some(id) if !id.trim().is_empty() => Ok(()),
        _ => Err(Error::Precondition(format!(
            "<spire-server {action}> requires entry_id"
        ))),
    }
}

fn identity_contains(params: &EntryParams, key: &str) -> bool {
    use spire_model::server_entry::EntryField;
    params.identity_args.iter().any(|field| {
        matches!(
            (field, key),
            (EntryField::SpiffeId, "spiffe_id")
                | (EntryField::ParentId, "parent_id")
                | (EntryField::Selector, "selector")
                | (EntryField::DnsName, "dns_name")
                | (EntryField::FederatesWith, "federates_with")
                | (EntryField::Admin, "admin")
                | (EntryField::Downstream, "downstream")
                | (EntryField::Node, "node")
        )
    })
}

/// Map declared entry params onto `spire-server entry …` CLI flags
///
/// List-valued params repeat their flag per value; bool-valued params emit
/// the bare flag only when true.
fn entry_args(params: &EntryParams, keys: &[&str]) -> Result<Vec<String>> {
    fn push_scalar(args: &mut Vec<String>, flag: &str, value: Option<String>) {
        if let Some(value) = value {
            args.push(flag.to_string());
            args.push(value);
        }
    }

    let mut args = Vec::new();
    for key in keys {
        match *key {
            "entry_id" => push_scalar(&mut args, "-entryID", params.entry_id.clone()),
            "spiffe_id" => push_scalar(&mut args, "-spiffeID", params.spiffe_id.clone()),
            "parent_id" => push_scalar(&mut args, "-parentID", params.parent_id.clone()),
            "ttl" => push_scalar(&mut args, "-ttl", params.ttl.map(|t| t.to_string())),
            "entry_expiry" => push_scalar(
                &mut args,
                "-entryExpiry",
                params.entry_expiry.map(|e| e.to_string()),
            ),
            "registration_uds_path" => push_scalar(
                &mut args,
                "-registrationUDSPath",
                params.registration_uds_path.clone(),
            ),
            "selector" => {
                for value in &params.selector {
                    args.push("-selector".to_string());
                    args.push(value.clone());
                }
            }
            "dns_name" => {
                for value in &params.dns_name {
                    args.push("-dns".to_string());
                    args.push(value.clone());
                }
            }
            "federates_with" => {
                for value in &params.federates_with {
                    args.push("-federatesWith".to_string());
                    args.push(value.clone());
                }
            }
            "admin" => {
                if params.admin == Some(true) {
                    args.push("-admin".to_string());
                }
            }
            "downstream" => {
                if params.downstream == Some(true) {
                    args.push("-downstream".to_string());
                }
            }
            "node" => {
                if params.node == Some(true) {
                    args.push("-node".to_string());
                }
            }
            unsupported => {
                return Err(Error::Precondition(format!(
                    "unsupported entry param key {unsupported:?}"
                )));
            }
        }
    }
    Ok(args)
}

/// Pull the join token out of `token generate` stdout
///
/// The CLI prints `Token: <value>`; a bare single-token stdout is accepted
/// as a fallback.
pub fn extract_join_token(stdout: &str) -> Option<String> {
    for line in stdout.lines() {
        if let Some(rest) = line.trim().strip_prefix("Token:") {
            let token = rest.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    let trimmed = stdout.trim();
    if !trimmed.is_empty() && !trimmed.contains(char::is_whitespace) {
        return Some(trimmed.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use spire_exec::{ExecOutcome, ScriptedExecutor};

    fn commands(exec: ScriptedExecutor) -> ServerCommands {
        ServerCommands::new(
            Arc::new(exec),
            Some(Path::new("/opt/spire")),
            Some("/tmp/spire-registration.sock".to_string()),
        )
    }

    #[test]
    fn test_executable_resolution() {
        let cmds = commands(ScriptedExecutor::new());
        assert_eq!(
            cmds.executable(),
            Path::new("/opt/spire/bin/spire-server")
        );
        let on_path = ServerCommands::new(Arc::new(ScriptedExecutor::new()), None, None);
        assert_eq!(on_path.executable(), Path::new("spire-server"));
    }

    #[smol_potat::test]
    async fn test_version_prefers_stderr() {
        let exec = ScriptedExecutor::new().on(
            ["/opt/spire/bin/spire-server", "--version"],
            ExecOutcome::ok_stderr("1.0.2\n"),
        );
        assert_eq!(commands(exec).version().await.unwrap(), "1.0.2");

        let exec = ScriptedExecutor::new().on(
            ["/opt/spire/bin/spire-server", "--version"],
            ExecOutcome::ok("0.12.3\n"),
        );
        assert_eq!(commands(exec).version().await.unwrap(), "0.12.3");
    }

    #[smol_potat::test]
    async fn test_token_generate_args_and_parse() {
        let exec = ScriptedExecutor::new().on(
            ["/opt/spire/bin/spire-server", "token", "generate"],
            ExecOutcome::ok("Token: 0fea8c5a-9f3e-4c55-9a4a-2f3c4b6c7d8e\n"),
        );
        let cmds = commands(exec);
        let token = cmds
            .token_generate(Some("spiffe://example.org/agent/local1"), Some(600))
            .await
            .unwrap();
        assert_eq!(token, "0fea8c5a-9f3e-4c55-9a4a-2f3c4b6c7d8e");
    }

    #[test]
    fn test_extract_join_token() {
        assert_eq!(
            extract_join_token("Token: abc-123\n").as_deref(),
            Some("abc-123")
        );
        assert_eq!(extract_join_token("abc-123\n").as_deref(), Some("abc-123"));
        assert_eq!(extract_join_token("weird output here"), None);
        assert_eq!(extract_join_token(""), None);
    }

    #[smol_potat::test]
    async fn test_entry_create_records_expected_argv() {
        let exec = Arc::new(ScriptedExecutor::new().on(
            ["/opt/spire/bin/spire-server", "entry", "create"],
            ExecOutcome::ok(""),
        ));
        let cmds = ServerCommands::new(exec.clone(), Some(Path::new("/opt/spire")), None);
        let params = EntryParams {
            spiffe_id: Some("spiffe://example.org/workload".to_string()),
            selector: vec!["unix:uid:1000".to_string(), "unix:gid:1000".to_string()],
            admin: Some(true),
            downstream: Some(false),
            ttl: Some(600),
            ..EntryParams::default()
        };
        cmds.entry_create(&params).await.unwrap();

        let argv = exec.calls().pop().unwrap();
        // repeated flag per selector value
        assert_eq!(argv.iter().filter(|a| *a == "-selector").count(), 2);
        // bare flag only when true
        assert!(argv.contains(&"-admin".to_string()));
        assert!(!argv.contains(&"-downstream".to_string()));
        assert!(argv.windows(2).any(|w| w[0] == "-ttl" && w[1] == "600"));
        assert!(
            argv.windows(2)
                .any(|w| w[0] == "-spiffeID" && w[1] == "spiffe://example.org/workload")
        );
    }

    #[smol_potat::test]
    async fn test_entry_update_requires_entry_id() {
        let cmds = commands(ScriptedExecutor::new());
        let err = cmds.entry_update(&EntryParams::default()).await.unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));
        let err = cmds.entry_delete(&EntryParams::default()).await.unwrap_err();
        assert!(matches!(err, Error::Precondition(_)));
    }

    #[smol_potat::test]
    async fn test_entry_show_parses_entries() {
        let stdout = "Found 1 entry\n\
            Entry ID  : e-1\n\
            SPIFFE ID : spiffe://example.org/workload\n\
            Parent ID : spiffe://example.org/agent\n\
            TTL       : 3600\n\
            Selector  : unix:uid:1000\n";
        let exec = ScriptedExecutor::new().on(
            ["/opt/spire/bin/spire-server", "entry", "show"],
            ExecOutcome::ok(stdout),
        );
        let cmds = commands(exec);
        let params = EntryParams {
            spiffe_id: Some("spiffe://example.org/workload".to_string()),
            parent_id: Some("spiffe://example.org/agent".to_string()),
            ..EntryParams::default()
        };
        let outcome = cmds.entry_show(&params).await.unwrap();
        assert!(!outcome.parsing_failed());
        assert_eq!(outcome.entries.len(), 1);
        assert_eq!(outcome.entries[0].entry_id.as_deref(), Some("e-1"));
    }

    #[smol_potat::test]
    async fn test_entry_ensure_creates_when_nothing_matches() {
        let exec = Arc::new(
            ScriptedExecutor::new()
                .on(
                    ["/opt/spire/bin/spire-server", "entry", "show"],
                    ExecOutcome::ok("Found 0 entries\n"),
                )
                .on(
                    ["/opt/spire/bin/spire-server", "entry", "create"],
                    ExecOutcome::ok(""),
                ),
        );
        let cmds = ServerCommands::new(exec.clone(), Some(Path::new("/opt/spire")), None);
        let params = EntryParams {
            spiffe_id: Some("spiffe://example.org/workload".to_string()),
            parent_id: Some("spiffe://example.org/agent".to_string()),
            ..EntryParams::default()
        };
        assert!(cmds.entry_ensure(&params).await.unwrap());
        assert_eq!(exec.calls_containing("create").len(), 1);
    }

    #[smol_potat::test]
    async fn test_entry_ensure_noop_when_converged() {
        let stdout = "Found 1 entry\n\
            Entry ID  : e-1\n\
            SPIFFE ID : spiffe://example.org/workload\n\
            Parent ID : spiffe://example.org/agent\n\
            TTL       : 3600\n";
        let exec = Arc::new(ScriptedExecutor::new().on(
            ["/opt/spire/bin/spire-server", "entry", "show"],
            ExecOutcome::ok(stdout),
        ));
        let cmds = ServerCommands::new(exec.clone(), Some(Path::new("/opt/spire")), None);
        let params = EntryParams {
            spiffe_id: Some("spiffe://example.org/workload".to_string()),
            parent_id: Some("spiffe://example.org/agent".to_string()),
            ..EntryParams::default()
        };
        assert!(!cmds.entry_ensure(&params).await.unwrap());
        // only the show probe ran
        assert_eq!(exec.calls().len(), 1);
    }

    #[smol_potat::test]
    async fn test_entry_ensure_updates_divergent_match_in_place() {
        let stdout = "Found 1 entry\n\
            Entry ID  : e-1\n\
            SPIFFE ID : spiffe://example.org/workload\n\
            Parent ID : spiffe://example.org/agent\n\
            TTL       : 3600\n";
        let exec = Arc::new(
            ScriptedExecutor::new()
                .on(
                    ["/opt/spire/bin/spire-server", "entry", "show"],
                    ExecOutcome::ok(stdout),
                )
                .on(
                    ["/opt/spire/bin/spire-server", "entry", "update"],
                    ExecOutcome::ok(""),
                ),
        );
        let cmds = ServerCommands::new(exec.clone(), Some(Path::new("/opt/spire")), None);
        let params = EntryParams {
            spiffe_id: Some("spiffe://example.org/workload".to_string()),
            parent_id: Some("spiffe://example.org/agent".to_string()),
            ttl: Some(600),
            ..EntryParams::default()
        };
        assert!(cmds.entry_ensure(&params).await.unwrap());
        let update_argv = exec.calls_containing("update").pop().unwrap();
        // the update is keyed by the matched entry's id
        assert!(update_argv.windows(2).any(|w| w[0] == "-entryID" && w[1] == "e-1"));
    }

    #[smol_potat::test]
    async fn test_entry_ensure_absent_deletes_every_match() {
        let stdout = "Found 2 entries\n\
            Entry ID  : e-1\n\
            SPIFFE ID : spiffe://example.org/workload\n\
            Parent ID : spiffe://example.org/agent\n\
            \n\
            Entry ID  : e-2\n\
            SPIFFE ID : spiffe://example.org/workload\n\
            Parent ID : spiffe://example.org/agent\n";
        let exec = Arc::new(
            ScriptedExecutor::new()
                .on(
                    ["/opt/spire/bin/spire-server", "entry", "show"],
                    ExecOutcome::ok(stdout),
                )
                .on(
                    ["/opt/spire/bin/spire-server", "entry", "delete"],
                    ExecOutcome::ok(""),
                ),
        );
        let cmds = ServerCommands::new(exec.clone(), Some(Path::new("/opt/spire")), None);
        let params = EntryParams {
            state: State::Absent,
            spiffe_id: Some("spiffe://example.org/workload".to_string()),
            parent_id: Some("spiffe://example.org/agent".to_string()),
            ..EntryParams::default()
        };
        assert!(cmds.entry_ensure(&params).await.unwrap());
        assert_eq!(exec.calls_containing("delete").len(), 2);
    }

    #[smol_potat::test]
    async fn test_agent_list_filters() {
        let stdout = "Found 1 attested agent:\n\n\
            Spiffe ID         : spiffe://example.org/myagent\n\
            Attestation type  : join_token\n\
            Expiration time   : 2030-01-01 00:00:00 +0000 UTC\n\
            Serial number     : 42\n";
        let exec = ScriptedExecutor::new().on(
            ["/opt/spire/bin/spire-server", "agent", "list"],
            ExecOutcome::ok(stdout),
        );
        let cmds = commands(exec);
        let filter = AgentEntryFilter {
            spiffe_ids: vec!["spiffe://example.org/myagent".to_string()],
            ..AgentEntryFilter::default()
        };
        let entries = cmds.agent_list(&filter).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].serial_number, "42");
    }
}
