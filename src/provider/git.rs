//! # Git CLI Transport
//!
//! [`GitTransport`] backed by the `git` command line.
//!
//! Credentials are passed to git the usual ways:
//! - basic auth is injected into the HTTPS URL
//! - an SSH key is written to a `0600` file and used through `GIT_SSH_COMMAND`
//! - CA bundles and client certificates are written to files and passed as
//!   `http.*` config overrides
//!
//! Credential files live in a sibling directory of the working copy
//! (`<dest>.auth`) so they never end up inside the tree that gets applied.

use crate::controller::git::{ChannelConnection, CloneOptions, GitRef};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::GitTransport;

/// Runs `git` as a subprocess
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: String,
}

impl GitCli {
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn binary_path(&self) -> Result<PathBuf> {
        which::which(&self.binary).with_context(|| format!("git binary '{}' not found", self.binary))
    }

    async fn git(&self, session: &GitSession, cwd: Option<&Path>, args: &[&str]) -> Result<String> {
        let mut command = tokio::process::Command::new(self.binary_path()?);
        if let Some(cwd) = cwd {
            command.arg("-C").arg(cwd);
        }
        for setting in &session.config {
            command.arg("-c").arg(setting);
        }
        command.args(args);
        for (key, value) in &session.env {
            command.env(key, value);
        }
        command.env("GIT_TERMINAL_PROMPT", "0");

        let shown = session.redact(&args.join(" "));
        debug!("Running git {shown}");

        let output = command
            .output()
            .await
            .with_context(|| format!("failed to execute git {shown}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow::anyhow!(
                "git {shown} failed: {}",
                session.redact(stderr.trim())
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl GitTransport for GitCli {
    async fn clone_repo(
        &self,
        options: &CloneOptions,
        channel: &ChannelConnection,
    ) -> Result<String> {
        let dest = &options.dest_dir;
        let session = GitSession::prepare(channel, &auth_dir(dest)).await?;

        if dest.exists() {
            tokio::fs::remove_dir_all(dest)
                .await
                .with_context(|| format!("failed to remove stale working copy {}", dest.display()))?;
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let depth = options.depth.max(1).to_string();
        let dest_str = dest.to_string_lossy();
        match &options.git_ref {
            GitRef::Branch(name) | GitRef::Tag(name) => {
                self.git(
                    &session,
                    None,
                    &[
                        "clone",
                        "--depth",
                        &depth,
                        "--single-branch",
                        "--branch",
                        name,
                        &session.url,
                        &dest_str,
                    ],
                )
                .await?;
            }
            GitRef::DefaultBranch => {
                self.git(
                    &session,
                    None,
                    &["clone", "--depth", &depth, &session.url, &dest_str],
                )
                .await?;
            }
            GitRef::Commit(sha) => {
                self.git(&session, None, &["init", "--quiet", &dest_str])
                    .await?;
                self.git(
                    &session,
                    Some(dest),
                    &["remote", "add", "origin", &session.url],
                )
                .await?;
                self.git(
                    &session,
                    Some(dest),
                    &["fetch", "--depth", &depth, "origin", sha],
                )
                .await?;
                self.git(&session, Some(dest), &["checkout", "--quiet", "FETCH_HEAD"])
                    .await?;
            }
        }

        let head = self
            .git(&session, Some(dest), &["rev-parse", "HEAD"])
            .await?;
        Ok(head.trim().to_string())
    }

    async fn remote_head(
        &self,
        options: &CloneOptions,
        channel: &ChannelConnection,
    ) -> Result<String> {
        let session = GitSession::prepare(channel, &auth_dir(&options.dest_dir)).await?;
        let pattern = match &options.git_ref {
            GitRef::Commit(sha) => return Ok(sha.clone()),
            GitRef::Branch(branch) => format!("refs/heads/{branch}"),
            GitRef::Tag(tag) => format!("refs/tags/{tag}"),
            GitRef::DefaultBranch => "HEAD".to_string(),
        };

        let listing = self
            .git(&session, None, &["ls-remote", &session.url, &pattern])
            .await?;
        parse_ls_remote(&listing, &pattern).ok_or_else(|| {
            anyhow::anyhow!(
                "{} has no {pattern}",
                redact_url_credentials(&channel.url)
            )
        })
    }
}

/// Per-invocation git settings derived from a channel connection
#[derive(Default)]
struct GitSession {
    url: String,
    config: Vec<String>,
    env: Vec<(String, String)>,
    secrets: Vec<String>,
}

impl std::fmt::Debug for GitSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitSession")
            .field("url", &self.redact(&self.url))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GitSession {
    async fn prepare(channel: &ChannelConnection, auth_dir: &Path) -> Result<Self> {
        let connection = &channel.connection;
        let mut session = GitSession {
            url: channel.url.clone(),
            ..GitSession::default()
        };

        if connection.has_basic_auth() && is_http_url(&channel.url) {
            session.url = prepare_https_url(&channel.url, &connection.user, &connection.token);
            session.secrets.push(connection.token.clone());
        }

        if connection.insecure_skip_verify {
            session.config.push("http.sslVerify=false".to_string());
        }

        let needs_files = !connection.ssh_key.is_empty()
            || !connection.ca_certs.is_empty()
            || connection.has_client_cert();
        if needs_files {
            tokio::fs::create_dir_all(auth_dir)
                .await
                .with_context(|| format!("failed to create {}", auth_dir.display()))?;
        }

        if !connection.ssh_key.is_empty() {
            if !connection.passphrase.is_empty() {
                warn!(
                    "SSH key for {} has a passphrase, which git cannot use non-interactively",
                    redact_url_credentials(&channel.url)
                );
            }
            let key_path = auth_dir.join("id_key");
            write_private_file(&key_path, &with_trailing_newline(&connection.ssh_key)).await?;
            session.env.push((
                "GIT_SSH_COMMAND".to_string(),
                format!(
                    "ssh -i {} -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null",
                    key_path.display()
                ),
            ));
        }

        if !connection.ca_certs.is_empty() && !connection.insecure_skip_verify {
            let ca_path = auth_dir.join("ca.crt");
            write_private_file(&ca_path, &with_trailing_newline(&connection.ca_certs)).await?;
            session
                .config
                .push(format!("http.sslCAInfo={}", ca_path.display()));
        }

        if connection.has_client_cert() {
            let cert_path = auth_dir.join("client.crt");
            let key_path = auth_dir.join("client.key");
            write_private_file(&cert_path, &with_trailing_newline(&connection.client_cert)).await?;
            write_private_file(&key_path, &with_trailing_newline(&connection.client_key)).await?;
            session
                .config
                .push(format!("http.sslCert={}", cert_path.display()));
            session
                .config
                .push(format!("http.sslKey={}", key_path.display()));
        }

        Ok(session)
    }

    fn redact(&self, text: &str) -> String {
        let mut text = redact_url_credentials(text);
        for secret in self.secrets.iter().filter(|s| !s.is_empty()) {
            text = text.replace(secret.as_str(), "***");
        }
        text
    }
}

fn auth_dir(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".auth");
    dest.with_file_name(name)
}

fn is_http_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("https://") || lower.starts_with("http://")
}

fn with_trailing_newline(content: &str) -> String {
    if content.ends_with('\n') {
        content.to_string()
    } else {
        format!("{content}\n")
    }
}

async fn write_private_file(path: &Path, content: &str) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    let mut perms = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("failed to read metadata of {}", path.display()))?
        .permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms)
        .await
        .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    Ok(())
}

/// Inject `username:password` into an HTTPS URL, replacing existing credentials
#[must_use]
pub fn prepare_https_url(repo_url: &str, username: &str, password: &str) -> String {
    let (scheme, rest) = match repo_url.find("://") {
        Some(end) => (&repo_url[..end + 3], &repo_url[end + 3..]),
        None => ("https://", repo_url),
    };
    let host_and_path = match rest.find('/') {
        Some(slash) => match rest[..slash].rfind('@') {
            Some(at) => &rest[at + 1..],
            None => rest,
        },
        None => rest.rfind('@').map_or(rest, |at| &rest[at + 1..]),
    };
    format!("{scheme}{username}:{password}@{host_and_path}")
}

/// Replace any `user:password@` part of URLs in `text` with `***@`
#[must_use]
pub fn redact_url_credentials(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find("://") {
        let (head, tail) = rest.split_at(pos + 3);
        out.push_str(head);
        let authority_end = tail
            .find(|c: char| c == '/' || c.is_whitespace())
            .unwrap_or(tail.len());
        match tail[..authority_end].rfind('@') {
            Some(at) if tail[..at].contains(':') => {
                out.push_str("***@");
                rest = &tail[at + 1..];
            }
            _ => rest = tail,
        }
    }
    out.push_str(rest);
    out
}

/// Commit for `pattern` in `git ls-remote` output, preferring a peeled tag
fn parse_ls_remote(listing: &str, pattern: &str) -> Option<String> {
    let peeled = format!("{pattern}^{{}}");
    let mut direct = None;
    for line in listing.lines() {
        let Some((sha, name)) = line.split_once('\t') else {
            continue;
        };
        let name = name.trim();
        if name == peeled {
            return Some(sha.trim().to_string());
        }
        if name == pattern && direct.is_none() {
            direct = Some(sha.trim().to_string());
        }
    }
    direct
}
