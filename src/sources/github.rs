//! GitHub profile, repositories, and READMEs via the REST API.
//!
//! Produces one document for the user profile, one per public repository
//! summary, and (when `include_readmes`) one per README. Set `GITHUB_TOKEN`
//! to raise the API rate limit.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use profile_rag_core::models::{Document, OriginRef};

use super::SourceAdapter;
use crate::config::GithubSourceConfig;

#[derive(Debug, Deserialize)]
struct UserProfile {
    login: String,
    name: Option<String>,
    bio: Option<String>,
    location: Option<String>,
    company: Option<String>,
    blog: Option<String>,
    #[serde(default)]
    public_repos: u64,
}

#[derive(Debug, Deserialize)]
struct Repository {
    name: String,
    full_name: String,
    description: Option<String>,
    language: Option<String>,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    html_url: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    fork: bool,
}

#[derive(Debug, Deserialize)]
struct Readme {
    content: String,
    #[serde(default)]
    encoding: String,
}

pub struct GithubSource {
    config: GithubSourceConfig,
    client: reqwest::Client,
    token: Option<String>,
}

impl GithubSource {
    pub fn new(config: GithubSourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("profile-rag/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            config,
            client,
            token: std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.is_empty()),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// GET a JSON resource. `Ok(None)` on 404.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = self.api_url(path);
        let mut request = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("GitHub API error {} for {}: {}", status, url, body);
        }
        let value = response
            .json()
            .await
            .with_context(|| format!("Invalid JSON from {}", url))?;
        Ok(Some(value))
    }

    async fn readme(&self, repo: &Repository) -> Result<Option<String>> {
        let readme: Option<Readme> = self
            .get_json(&format!("/repos/{}/readme", repo.full_name))
            .await?;
        match readme {
            Some(r) => decode_readme(&r).map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SourceAdapter for GithubSource {
    fn name(&self) -> String {
        format!("github:{}", self.config.username)
    }

    async fn fetch(&self) -> Result<Vec<Document>> {
        let username = &self.config.username;
        let profile: UserProfile = self
            .get_json(&format!("/users/{}", username))
            .await?
            .with_context(|| format!("GitHub user not found: {}", username))?;

        let mut documents = vec![Document::new(
            profile_text(&profile),
            OriginRef::profile("github").with_title(profile.login.clone()),
        )];

        let repos: Vec<Repository> = self
            .get_json(&format!("/users/{}/repos?per_page=100&sort=updated", username))
            .await?
            .unwrap_or_default();
        tracing::debug!(username = %username, repos = repos.len(), "fetched repositories");

        for repo in repos {
            documents.push(Document::new(
                repository_text(&repo),
                OriginRef::repository(repo.html_url.clone()).with_title(repo.name.clone()),
            ));

            if !self.config.include_readmes {
                continue;
            }
            match self.readme(&repo).await {
                Ok(Some(text)) if !text.trim().is_empty() => documents.push(Document::new(
                    format!("README for {}:\n{}", repo.name, text),
                    OriginRef::repository(format!("{}#readme", repo.html_url))
                        .with_title(format!("{} README", repo.name)),
                )),
                Ok(_) => {}
                Err(e) => tracing::warn!(repo = %repo.full_name, error = %e, "skipping README"),
            }
        }

        Ok(documents)
    }
}

fn profile_text(profile: &UserProfile) -> String {
    let mut text = format!("GitHub Profile: {}\n", profile.login);
    push_field(&mut text, "Name", profile.name.as_deref());
    push_field(&mut text, "Bio", profile.bio.as_deref());
    push_field(&mut text, "Location", profile.location.as_deref());
    push_field(&mut text, "Company", profile.company.as_deref());
    push_field(&mut text, "Website", profile.blog.as_deref());
    text.push_str(&format!("Public Repositories: {}\n", profile.public_repos));
    text
}

fn repository_text(repo: &Repository) -> String {
    let mut text = format!("Repository: {}\n", repo.name);
    push_field(&mut text, "Description", repo.description.as_deref());
    push_field(&mut text, "Language", repo.language.as_deref());
    if !repo.topics.is_empty() {
        text.push_str(&format!("Topics: {}\n", repo.topics.join(", ")));
    }
    if repo.fork {
        text.push_str("Fork: yes\n");
    }
    text.push_str(&format!("Stars: {}\n", repo.stargazers_count));
    text.push_str(&format!("Forks: {}\n", repo.forks_count));
    text.push_str(&format!("URL: {}\n", repo.html_url));
    text
}

fn push_field(text: &mut String, label: &str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        text.push_str(&format!("{}: {}\n", label, value));
    }
}

fn decode_readme(readme: &Readme) -> Result<String> {
    if readme.encoding != "base64" {
        return Ok(readme.content.clone());
    }
    // GitHub wraps the base64 payload at 60 columns.
    let compact: String = readme
        .content
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .context("README is not valid base64")?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use profile_rag_core::models::OriginKind;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn mock_api() -> Router {
        Router::new()
            .route(
                "/users/octo",
                get(|| async {
                    Json(serde_json::json!({
                        "login": "octo",
                        "name": "Octo Cat",
                        "bio": "Builds ML systems",
                        "location": null,
                        "public_repos": 2
                    }))
                }),
            )
            .route(
                "/users/octo/repos",
                get(|| async {
                    Json(serde_json::json!([
                        {
                            "name": "darth",
                            "full_name": "octo/darth",
                            "description": "Voice assistant",
                            "language": "Python",
                            "stargazers_count": 3,
                            "forks_count": 1,
                            "html_url": "https://github.com/octo/darth"
                        },
                        {
                            "name": "notes",
                            "full_name": "octo/notes",
                            "description": null,
                            "language": null,
                            "html_url": "https://github.com/octo/notes"
                        }
                    ]))
                }),
            )
            .route(
                "/repos/{owner}/{repo}/readme",
                get(|Path((_owner, repo)): Path<(String, String)>| async move {
                    if repo == "darth" {
                        let encoded = base64::engine::general_purpose::STANDARD
                            .encode("# Darth\nA voice assistant.");
                        Ok(Json(serde_json::json!({
                            "content": encoded,
                            "encoding": "base64"
                        })))
                    } else {
                        Err(StatusCode::NOT_FOUND)
                    }
                }),
            )
    }

    fn github_config(api_base: String) -> GithubSourceConfig {
        GithubSourceConfig {
            username: "octo".to_string(),
            include_readmes: true,
            api_base,
            timeout_secs: 5,
            optional: false,
        }
    }

    #[tokio::test]
    async fn fetches_profile_repos_and_readmes() {
        let base = serve(mock_api()).await;
        let source = GithubSource::new(github_config(base)).unwrap();
        let docs = source.fetch().await.unwrap();

        assert_eq!(docs.len(), 4);
        assert_eq!(docs[0].origin.kind, OriginKind::Profile);
        assert!(docs[0].text.contains("Bio: Builds ML systems"));
        assert!(!docs[0].text.contains("Location"));
        assert!(docs[1].text.contains("Repository: darth"));
        assert!(docs[1].text.contains("Language: Python"));
        assert_eq!(docs[2].text, "README for darth:\n# Darth\nA voice assistant.");
        assert_eq!(docs[3].origin.locator, "https://github.com/octo/notes");
    }

    #[tokio::test]
    async fn unknown_user_is_an_error() {
        let base = serve(mock_api()).await;
        let mut config = github_config(base);
        config.username = "ghost".to_string();
        let source = GithubSource::new(config).unwrap();
        assert!(source.fetch().await.is_err());
    }

    #[test]
    fn wrapped_base64_readme_decodes() {
        let readme = Readme {
            content: "IyBI\nZWxs\nbw==\n".to_string(),
            encoding: "base64".to_string(),
        };
        assert_eq!(decode_readme(&readme).unwrap(), "# Hello");
    }
}
