//! Static `ConfigService` over a parsed configuration.

use crate::{ConfigResult, ServerConfig};
use shipyard_core::Project;
use shipyard_core::project::ConfigService;
use shipyard_core::provider::ProviderCredential;
use std::sync::Arc;

/// Projects and credentials fixed at load time.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigService {
    projects: Vec<Arc<Project>>,
    credentials: Vec<ProviderCredential>,
}

impl StaticConfigService {
    pub fn new(projects: Vec<Project>, credentials: Vec<ProviderCredential>) -> Self {
        Self {
            projects: projects.into_iter().map(Arc::new).collect(),
            credentials,
        }
    }

    /// Resolve every credential's token through `lookup` (normally the
    /// process environment).
    pub fn from_config(
        config: &ServerConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> ConfigResult<Self> {
        let credentials = config
            .credentials
            .iter()
            .map(|c| c.resolve(&lookup))
            .collect::<ConfigResult<Vec<_>>>()?;

        Ok(Self::new(config.projects.clone(), credentials))
    }
}

impl ConfigService for StaticConfigService {
    fn projects(&self) -> Vec<Arc<Project>> {
        self.projects.clone()
    }

    fn provider_credentials(&self) -> Vec<ProviderCredential> {
        self.credentials.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_server_config;

    #[test]
    fn test_projects_scoped_to_credential() {
        let config = parse_server_config(
            r#"
            credential "ci-bot" provider="github" token-env="GITHUB_TOKEN"
            project "app" {
                repo "acme/app" provider="github"
                command "make"
            }
            project "mirror" {
                repo "acme/mirror" provider="gitlab"
                command "make"
            }
            "#,
        )
        .unwrap();

        let service =
            StaticConfigService::from_config(&config, |_| Some("token".to_string())).unwrap();
        let credential = &service.provider_credentials()[0];

        assert_eq!(service.projects().len(), 2);
        let scoped = service.projects_for(credential);
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id.as_str(), "app");

        let mirror = service
            .projects()
            .into_iter()
            .find(|p| p.id.as_str() == "mirror")
            .unwrap();
        assert!(service.credential_for(&mirror).is_none());
    }
}
