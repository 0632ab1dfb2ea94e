use crate::config::schema::{CleanPolicy, ResolvedSweep, SweepConfig};
use anyhow::{bail, Context, Result};
use std::path::{Component, Path, PathBuf};
use tally_core::sample::DayWindow;
use time::macros::format_description;
use time::Date;

/// State dirs live under this directory unless `output.dir` says otherwise.
pub const STATE_ROOT: &str = ".tally";

/// Load and validate a sweep config from a YAML file.
pub fn load_config(path: &Path) -> Result<SweepConfig> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a sweep config from a YAML string.
pub fn parse_config(yaml: &str) -> Result<SweepConfig> {
    let mut raw: serde_yml::Value = serde_yml::from_str(yaml).context("invalid YAML syntax")?;

    expand_variables(&mut raw);

    let config: SweepConfig =
        serde_yml::from_value(raw).context("sweep config schema validation failed")?;

    validate_config(&config)?;

    Ok(config)
}

/// Resolve every path of a validated config.
///
/// `base` is the directory relative paths in the config are taken from
/// (normally the config file's directory). `repo_override` replaces
/// `config.repo`.
pub fn resolve(config: &SweepConfig, base: &Path, repo_override: Option<&Path>) -> Result<ResolvedSweep> {
    let repo = match repo_override {
        Some(p) => absolutize(p)?,
        None => absolutize(&base.join(&config.repo))?,
    };
    let repo = repo
        .canonicalize()
        .with_context(|| format!("repository not found: {}", repo.display()))?;
    // Exclusions and the stage path are relative to the work tree root.
    if !repo.join(".git").exists() {
        bail!("repo must be the root of a git work tree: {}", repo.display());
    }

    let fixture_source = absolutize(&base.join(&config.fixture.source))?;
    let fixture_source = fixture_source
        .canonicalize()
        .with_context(|| format!("fixture not found: {}", fixture_source.display()))?;
    if !fixture_source.is_dir() {
        bail!("fixture must be a directory: {}", fixture_source.display());
    }

    let stage = relative_in_repo(&config.fixture.stage)
        .with_context(|| format!("invalid fixture.stage \"{}\"", config.fixture.stage))?;
    let stage_key = slash_path(&stage);

    let mut exclude = Vec::new();
    for ex in &config.clean.exclude {
        let rel = relative_in_repo(ex).with_context(|| format!("invalid clean.exclude \"{ex}\""))?;
        exclude.push(slash_path(&rel));
    }

    let state_dir = match &config.output.dir {
        Some(dir) => normalize_lexically(&repo.join(dir)),
        None => repo.join(STATE_ROOT).join(&config.name),
    };
    if let Ok(rel) = state_dir.strip_prefix(&repo) {
        let key = if config.output.dir.is_none() {
            STATE_ROOT.to_string()
        } else {
            slash_path(rel)
        };
        if key.is_empty() {
            bail!("output.dir must not be the repository root");
        }
        if !exclude.contains(&key) {
            exclude.push(key);
        }
    }

    let clean = CleanPolicy {
        ignored: config.clean.ignored,
        exclude,
    };

    // The stage must be wiped by cleaning, so no exclusion may cover it.
    if clean.is_excluded(&stage_key) {
        bail!("fixture.stage \"{stage_key}\" is excluded from cleaning and would survive between days");
    }
    if let Some(ex) = clean
        .exclude
        .iter()
        .find(|ex| ex.starts_with(&format!("{stage_key}/")))
    {
        bail!("fixture.stage \"{stage_key}\" contains the excluded path \"{ex}\"");
    }

    // A permanent fixture inside the tree must be protected from cleaning,
    // and must not overlap the staging location.
    if let Ok(rel) = fixture_source.strip_prefix(&repo) {
        let fixture_key = slash_path(rel);
        if fixture_key.is_empty() {
            bail!("fixture.source must not be the repository root");
        }
        if fixture_key == stage_key
            || fixture_key.starts_with(&format!("{stage_key}/"))
            || stage_key.starts_with(&format!("{fixture_key}/"))
        {
            bail!(
                "fixture.stage \"{stage_key}\" overlaps the permanent fixture \"{fixture_key}\"; \
                 stage under a distinct temporary name"
            );
        }
        if !clean.is_excluded(&fixture_key) {
            bail!(
                "fixture.source \"{fixture_key}\" is inside the repository but not in clean.exclude; \
                 cleaning between days would delete it"
            );
        }
    }

    let window = DayWindow {
        since: config.since.as_deref().map(parse_day).transpose()?,
        until: config.until.as_deref().map(parse_day).transpose()?,
    };

    Ok(ResolvedSweep {
        config: config.clone(),
        repo,
        fixture_source,
        stage,
        state_dir,
        window,
        clean,
    })
}

/// Recursively expand `${{ env.VAR }}` in all string values.
fn expand_variables(value: &mut serde_yml::Value) {
    match value {
        serde_yml::Value::String(s) => {
            if s.contains("${{") {
                *s = expand_env_vars(s);
            }
        }
        serde_yml::Value::Mapping(m) => {
            for (_, v) in m.iter_mut() {
                expand_variables(v);
            }
        }
        serde_yml::Value::Sequence(seq) => {
            for v in seq.iter_mut() {
                expand_variables(v);
            }
        }
        _ => {}
    }
}

/// Replace `${{ env.VAR_NAME }}` with the environment variable value.
fn expand_env_vars(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(start) = rest.find("${{") {
        result.push_str(&rest[..start]);
        let after_start = &rest[start + 3..];
        if let Some(end) = after_start.find("}}") {
            let expr = after_start[..end].trim();
            if let Some(var_name) = expr.strip_prefix("env.") {
                let val = std::env::var(var_name.trim()).unwrap_or_default();
                result.push_str(&val);
            } else {
                result.push_str(&rest[start..start + 3 + end + 2]);
            }
            rest = &after_start[end + 2..];
        } else {
            result.push_str(&rest[start..]);
            rest = "";
        }
    }
    result.push_str(rest);
    result
}

/// Validate constraints that can't be expressed in serde.
fn validate_config(config: &SweepConfig) -> Result<()> {
    if !is_kebab_case(&config.name) {
        bail!(
            "sweep name must be kebab-case (lowercase letters, digits, hyphens), got: \"{}\"",
            config.name
        );
    }

    if config.command.trim().is_empty() {
        bail!("command must not be empty");
    }

    if config.timeout_sec == 0 {
        bail!("timeout_sec must be greater than zero");
    }

    if config.rev.trim().is_empty() || config.rev.starts_with('-') {
        bail!("rev must be a revision or range, got: \"{}\"", config.rev);
    }

    regex::Regex::new(&config.summary_pattern)
        .with_context(|| format!("invalid summary_pattern \"{}\"", config.summary_pattern))?;

    if config.fixture.source.trim().is_empty() {
        bail!("fixture.source must not be empty");
    }
    relative_in_repo(&config.fixture.stage)
        .with_context(|| format!("invalid fixture.stage \"{}\"", config.fixture.stage))?;

    let since = config.since.as_deref().map(parse_day).transpose()?;
    let until = config.until.as_deref().map(parse_day).transpose()?;
    if let (Some(s), Some(u)) = (since, until) {
        if s > u {
            bail!("since ({s}) is after until ({u})");
        }
    }

    Ok(())
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_day(s: &str) -> Result<Date> {
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(s.trim(), format).with_context(|| format!("invalid date \"{s}\" (expected YYYY-MM-DD)"))
}

/// A non-empty path below the repository root: no `..`, not absolute, not
/// inside `.git`.
fn relative_in_repo(s: &str) -> Result<PathBuf> {
    let path = Path::new(s.trim());
    if path.is_absolute() {
        bail!("must be relative to the repository root");
    }
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => bail!("must not contain `..` or a root"),
        }
    }
    if out.as_os_str().is_empty() {
        bail!("must not be the repository root");
    }
    if out.starts_with(".git") {
        bail!("must not be inside .git");
    }
    Ok(out)
}

fn absolutize(p: &Path) -> Result<PathBuf> {
    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()?.join(p)
    };
    Ok(normalize_lexically(&abs))
}

/// Fold `.` and `..` without touching the filesystem.
fn normalize_lexically(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in p.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn slash_path(p: &Path) -> String {
    p.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn is_kebab_case(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    let first = s.as_bytes()[0];
    if !(first.is_ascii_lowercase() || first.is_ascii_digit()) {
        return false;
    }
    s.bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}
