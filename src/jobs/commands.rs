use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{JobAction, JobCreate};
use crate::config::Settings;
use crate::profiles::{ProfileEntry, ProfilesConfig};
use crate::resolver::DocPaths;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("runner program not found: {0}")]
    RunnerMissing(String),
    #[error("unknown {group} profile `{profile}`")]
    UnknownProfile { group: String, profile: String },
    #[error("document `{0}` has no working directory")]
    MissingWorkDir(String),
    #[error("document `{0}` has no export to operate on")]
    NoExport(String),
    #[error("document `{doc}` has no export version `{version}`")]
    UnknownExportVersion { doc: String, version: String },
    #[error("query must be non-empty")]
    EmptyQuery,
}

// The whitelisted subcommand template per action. Everything the runner
// receives starts from this table; caller-supplied values only ever join
// as discrete, validated argv elements.
fn action_template(action: JobAction) -> &'static [&'static str] {
    match action {
        JobAction::AsrBatch => &["pipeline", "asr-batch"],
        JobAction::LexiconScan => &["rag", "lexicon", "scan"],
        JobAction::LexiconApply => &["rag", "lexicon", "apply"],
        JobAction::RagExport => &["rag", "export"],
        JobAction::RagDoctor => &["rag", "doctor"],
        JobAction::RagQuery => &["rag", "query"],
    }
}

pub fn build_asr_batch(
    settings: &Settings,
    profiles: &ProfilesConfig,
    profile: Option<&str>,
) -> Result<JobCreate, CommandError> {
    let runner = runner_program(settings)?;
    let mut argv = base_argv(&runner, JobAction::AsrBatch);
    argv.extend(profile_args(&profiles.asr, "asr", profile)?);
    Ok(JobCreate {
        action: JobAction::AsrBatch,
        argv,
        cwd: runner_cwd(settings),
        doc_id: None,
        profile_id: profile.map(str::to_string),
        requires_write_lock: true,
        artifacts: Vec::new(),
    })
}

pub fn build_lexicon_scan(
    settings: &Settings,
    profiles: &ProfilesConfig,
    paths: &DocPaths,
    profile: Option<&str>,
) -> Result<JobCreate, CommandError> {
    let runner = runner_program(settings)?;
    let work_dir = work_dir(paths)?;
    let mut argv = base_argv(&runner, JobAction::LexiconScan);
    argv.push("--input".to_string());
    argv.push(work_dir.display().to_string());
    argv.extend(profile_args(&profiles.lexicon, "lexicon", profile)?);
    Ok(JobCreate {
        action: JobAction::LexiconScan,
        argv,
        cwd: runner_cwd(settings),
        doc_id: Some(paths.doc_id.to_string()),
        profile_id: profile.map(str::to_string),
        requires_write_lock: true,
        artifacts: paths
            .suggested_rules()
            .map(|p| vec![p.display().to_string()])
            .unwrap_or_default(),
    })
}

pub fn build_lexicon_apply(
    settings: &Settings,
    profiles: &ProfilesConfig,
    paths: &DocPaths,
    profile: Option<&str>,
) -> Result<JobCreate, CommandError> {
    let runner = runner_program(settings)?;
    let work_dir = work_dir(paths)?;
    let mut argv = base_argv(&runner, JobAction::LexiconApply);
    argv.push("--input".to_string());
    argv.push(work_dir.display().to_string());
    argv.extend(profile_args(&profiles.lexicon, "lexicon", profile)?);
    let artifacts = [paths.validated_rules(), paths.stamp_path()]
        .into_iter()
        .flatten()
        .map(|p| p.display().to_string())
        .collect();
    Ok(JobCreate {
        action: JobAction::LexiconApply,
        argv,
        cwd: runner_cwd(settings),
        doc_id: Some(paths.doc_id.to_string()),
        profile_id: profile.map(str::to_string),
        requires_write_lock: true,
        artifacts,
    })
}

pub fn build_rag_export(
    settings: &Settings,
    profiles: &ProfilesConfig,
    paths: &DocPaths,
    version_tag: Option<&str>,
    force: bool,
    profile: Option<&str>,
) -> Result<JobCreate, CommandError> {
    let runner = runner_program(settings)?;
    let work_dir = work_dir(paths)?;
    let mut argv = base_argv(&runner, JobAction::RagExport);
    argv.push("--input".to_string());
    argv.push(work_dir.display().to_string());
    argv.extend(profile_args(&profiles.rag, "rag", profile)?);
    if force {
        argv.push("--force".to_string());
    }
    if let Some(tag) = version_tag {
        argv.push("--version-tag".to_string());
        argv.push(tag.to_string());
    }
    let export_dir = settings.rag_doc_dir(paths.doc_id.as_str());
    Ok(JobCreate {
        action: JobAction::RagExport,
        argv,
        cwd: runner_cwd(settings),
        doc_id: Some(paths.doc_id.to_string()),
        profile_id: profile.map(str::to_string),
        requires_write_lock: true,
        artifacts: vec![export_dir.display().to_string()],
    })
}

pub fn build_rag_doctor(
    settings: &Settings,
    profiles: &ProfilesConfig,
    paths: &DocPaths,
    version_tag: Option<&str>,
    profile: Option<&str>,
) -> Result<JobCreate, CommandError> {
    let runner = runner_program(settings)?;
    let export_input = resolve_export_input(settings, paths, version_tag)?;
    let mut argv = base_argv(&runner, JobAction::RagDoctor);
    argv.push("--input".to_string());
    argv.push(export_input.display().to_string());
    argv.extend(profile_args(&profiles.rag, "rag", profile)?);
    Ok(JobCreate {
        action: JobAction::RagDoctor,
        argv,
        cwd: runner_cwd(settings),
        doc_id: Some(paths.doc_id.to_string()),
        profile_id: profile.map(str::to_string),
        requires_write_lock: false,
        artifacts: vec![export_input.display().to_string()],
    })
}

#[allow(clippy::too_many_arguments)]
pub fn build_rag_query(
    settings: &Settings,
    profiles: &ProfilesConfig,
    paths: &DocPaths,
    query: &str,
    top_k: Option<u32>,
    version_tag: Option<&str>,
    profile: Option<&str>,
) -> Result<JobCreate, CommandError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(CommandError::EmptyQuery);
    }
    let runner = runner_program(settings)?;
    let export_input = resolve_export_input(settings, paths, version_tag)?;
    let mut argv = base_argv(&runner, JobAction::RagQuery);
    argv.push("--input".to_string());
    argv.push(export_input.display().to_string());
    argv.push("--query".to_string());
    argv.push(query.to_string());
    if let Some(top_k) = top_k {
        argv.push("--top-k".to_string());
        argv.push(top_k.to_string());
    }
    argv.extend(profile_args(&profiles.rag, "rag", profile)?);
    Ok(JobCreate {
        action: JobAction::RagQuery,
        argv,
        cwd: runner_cwd(settings),
        doc_id: Some(paths.doc_id.to_string()),
        profile_id: profile.map(str::to_string),
        requires_write_lock: false,
        artifacts: vec![export_input.display().to_string()],
    })
}

/// Existing export version directories, newest tag first.
pub fn export_versions(settings: &Settings, doc_id: &str) -> Vec<String> {
    let base = settings.rag_doc_dir(doc_id);
    let Ok(entries) = fs::read_dir(&base) else {
        return Vec::new();
    };
    let mut versions: Vec<String> = entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    versions.sort_by(|a, b| b.cmp(a));
    versions
}

fn resolve_export_input(
    settings: &Settings,
    paths: &DocPaths,
    version_tag: Option<&str>,
) -> Result<PathBuf, CommandError> {
    let doc_id = paths.doc_id.to_string();
    let base = settings.rag_doc_dir(&doc_id);
    if !base.is_dir() {
        return Err(CommandError::NoExport(doc_id));
    }
    match version_tag {
        Some(version) => {
            let target = base.join(version);
            if !target.is_dir() {
                return Err(CommandError::UnknownExportVersion {
                    doc: doc_id,
                    version: version.to_string(),
                });
            }
            Ok(target)
        }
        None => {
            let latest = export_versions(settings, &doc_id)
                .into_iter()
                .next()
                .ok_or(CommandError::NoExport(doc_id))?;
            Ok(base.join(latest))
        }
    }
}

fn work_dir(paths: &DocPaths) -> Result<&Path, CommandError> {
    paths
        .work_dir
        .as_deref()
        .ok_or_else(|| CommandError::MissingWorkDir(paths.doc_id.to_string()))
}

fn runner_program(settings: &Settings) -> Result<String, CommandError> {
    let path = &settings.runner_path;
    if !path.is_file() {
        return Err(CommandError::RunnerMissing(path.display().to_string()));
    }
    Ok(path.display().to_string())
}

fn runner_cwd(settings: &Settings) -> Option<PathBuf> {
    settings.runner_path.parent().and_then(Path::parent).map(Path::to_path_buf)
}

fn base_argv(runner: &str, action: JobAction) -> Vec<String> {
    let mut argv = vec![runner.to_string()];
    argv.extend(action_template(action).iter().map(|part| part.to_string()));
    argv
}

fn profile_args(
    group: &BTreeMap<String, ProfileEntry>,
    group_name: &str,
    profile: Option<&str>,
) -> Result<Vec<String>, CommandError> {
    let Some(profile) = profile else {
        return Ok(Vec::new());
    };
    let entry = group
        .get(profile)
        .ok_or_else(|| CommandError::UnknownProfile {
            group: group_name.to_string(),
            profile: profile.to_string(),
        })?;
    Ok(entry.args.clone())
}
