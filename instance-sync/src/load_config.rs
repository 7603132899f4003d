/// `load_config` module: loads a static YAML run configuration and injects the
/// secrets (API tokens, default member password) from the environment.
///
/// This module is the only place where untrusted YAML is parsed and mapped to
/// the engine's strongly-typed inputs.
///
/// # Responsibilities
/// - Parse the user-supplied YAML file into [`CliConfig`]
/// - Read `SRC_API_TOKEN`, `DST_API_TOKEN` and `DEFAULT_MEMBER_PASSWORD`
/// - Reject combinations the engine cannot run with (short tokens, a link
///   rewrite without fast mode, new members without a password)
/// - Map the result onto a [`RunRecord`] and a [`SyncContext`]
///
/// # Errors
/// All errors use `anyhow::Error` and are surfaced at the CLI boundary.
use anyhow::Result;
use instance_sync_core::config::{MemberScenario, SelectionManifest};
use instance_sync_core::context::SyncContext;
use instance_sync_core::model::{Id, Scenario};
use instance_sync_core::run_record::RunRecord;
use instance_sync_core::transcode::FfmpegTranscoder;
use instance_sync_core::transfer::LinkRewrite;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

pub const SRC_TOKEN_ENV: &str = "SRC_API_TOKEN";
pub const DST_TOKEN_ENV: &str = "DST_API_TOKEN";
pub const DEFAULT_PASSWORD_ENV: &str = "DEFAULT_MEMBER_PASSWORD";

/// Instance API tokens are exactly this long.
pub const TOKEN_LEN: usize = 128;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    pub server: String,
}

#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub src_token: String,
    pub dst_token: String,
    pub default_password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CliConfig {
    pub source: ServerSection,
    pub destination: ServerSection,
    pub team_id: Id,
    pub selection: SelectionManifest,
    pub scenario: Scenario,
    pub members_scenario: MemberScenario,
    pub fast_mode: bool,
    pub link_rewrite: Option<LinkRewrite>,
    pub transcode_videos: bool,
    pub scratch_dir: PathBuf,
    pub record_path: Option<PathBuf>,
    pub secrets: Secrets,
}

fn default_scratch_dir() -> PathBuf {
    PathBuf::from("storage")
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    source: ServerSection,
    destination: ServerSection,
    team_id: Id,
    #[serde(default)]
    selection: SelectionManifest,
    #[serde(default)]
    scenario: Scenario,
    #[serde(default)]
    members_scenario: MemberScenario,
    #[serde(default)]
    fast_mode: bool,
    #[serde(default)]
    link_rewrite: Option<LinkRewrite>,
    #[serde(default)]
    transcode_videos: bool,
    #[serde(default = "default_scratch_dir")]
    scratch_dir: PathBuf,
    #[serde(default)]
    record_path: Option<PathBuf>,
}

/// Loads a static YAML config file (no secrets) and injects the secrets from
/// the environment. The result is validated before it is returned.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CliConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let raw: RawConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let secrets = Secrets {
        src_token: require_env(SRC_TOKEN_ENV)?,
        dst_token: require_env(DST_TOKEN_ENV)?,
        default_password: env::var(DEFAULT_PASSWORD_ENV).ok().filter(|p| !p.is_empty()),
    };

    let config = CliConfig {
        source: raw.source,
        destination: raw.destination,
        team_id: raw.team_id,
        selection: raw.selection,
        scenario: raw.scenario,
        members_scenario: raw.members_scenario,
        fast_mode: raw.fast_mode,
        link_rewrite: raw.link_rewrite,
        transcode_videos: raw.transcode_videos,
        scratch_dir: raw.scratch_dir,
        record_path: raw.record_path,
        secrets,
    };
    config.validate()?;
    Ok(config)
}

pub fn require_env(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) => Ok(value),
        Err(e) => {
            error!(error = ?e, variable = name, "Required environment variable missing");
            Err(anyhow::anyhow!("{name} must be set in the environment"))
        }
    }
}

pub fn validate_token(name: &str, token: &str) -> Result<()> {
    if token.len() != TOKEN_LEN {
        return Err(anyhow::anyhow!(
            "{name} must be {TOKEN_LEN} characters long, got {}",
            token.len()
        ));
    }
    Ok(())
}

impl CliConfig {
    pub fn validate(&self) -> Result<()> {
        validate_token(SRC_TOKEN_ENV, &self.secrets.src_token)?;
        validate_token(DST_TOKEN_ENV, &self.secrets.dst_token)?;

        if let Some(rewrite) = &self.link_rewrite {
            if !self.fast_mode {
                return Err(anyhow::anyhow!("link_rewrite requires fast_mode"));
            }
            if rewrite.bucket.trim().is_empty() {
                return Err(anyhow::anyhow!("link_rewrite.bucket must not be empty"));
            }
        }

        if !self.selection.members.is_empty() && self.secrets.default_password.is_none() {
            return Err(anyhow::anyhow!(
                "{DEFAULT_PASSWORD_ENV} must be set when members are selected"
            ));
        }
        Ok(())
    }

    /// Everything needed to repeat this run non-interactively.
    pub fn to_record(&self) -> RunRecord {
        RunRecord {
            src_server: self.source.server.clone(),
            src_token: self.secrets.src_token.clone(),
            team_id: self.team_id,
            selection: self.selection.clone(),
            scenario: self.scenario,
            members_scenario: self.members_scenario,
            default_password: self.secrets.default_password.clone(),
            fast_mode: self.fast_mode,
            link_rewrite: self.link_rewrite.clone(),
            transcode_videos: self.transcode_videos,
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            source = %self.source.server,
            destination = %self.destination.server,
            team_id = self.team_id,
            scenario = %self.scenario,
            scratch_dir = %self.scratch_dir.display(),
            record_path = ?self.record_path,
            "Loaded run configuration"
        );
        self.selection.trace_loaded();
    }
}

/// Builds the run context for `record`, with ffmpeg as the transcoder.
pub fn context_for(record: &RunRecord, scratch_dir: &Path) -> SyncContext {
    SyncContext::new(scratch_dir)
        .with_fast_mode(record.fast_mode, record.link_rewrite.clone())
        .with_transcoding(record.transcode_videos, Arc::new(FfmpegTranscoder::default()))
}
