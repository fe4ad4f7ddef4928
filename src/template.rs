//! Path and title templates
//!
//! Templates contain `{Team}`, `{Repository}` and `{Owner}` placeholders which are
//! filled in per repository before any secret path or key title is used.

use thiserror::Error;

use crate::error::RotationError;
use crate::models::{Repository, Team};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown placeholder {{{0}}} (supported: {{Team}}, {{Repository}}, {{Owner}})")]
    UnknownPlaceholder(String),

    #[error("unterminated placeholder starting at offset {0}")]
    Unterminated(usize),
}

/// A template bound to one (team, repository, owner) triple
#[derive(Debug, Clone)]
pub struct Template<'a> {
    team: &'a str,
    repository: &'a str,
    owner: &'a str,
    template: &'a str,
}

impl<'a> Template<'a> {
    pub fn new(team: &'a str, repository: &'a str, owner: &'a str, template: &'a str) -> Self {
        Self {
            team,
            repository,
            owner,
            template,
        }
    }

    /// Render the template, failing on any placeholder outside the supported set
    pub fn render(&self) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template;
        let mut offset = 0;

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let end = after
                .find('}')
                .ok_or(TemplateError::Unterminated(offset + start))?;

            let value = match &after[..end] {
                "Team" => self.team,
                "Repository" => self.repository,
                "Owner" => self.owner,
                other => return Err(TemplateError::UnknownPlaceholder(other.to_string())),
            };
            out.push_str(value);

            let consumed = start + 1 + end + 1;
            offset += consumed;
            rest = &rest[consumed..];
        }
        out.push_str(rest);

        Ok(out)
    }
}

/// The three templates used for every repository in a run
#[derive(Debug, Clone)]
pub struct Templates {
    pub token_path: String,
    pub key_path: String,
    pub title: String,
}

/// Concrete strings for one repository. Never shared between repositories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub token_path: String,
    pub key_path: String,
    pub title: String,
}

impl ResolvedPaths {
    pub fn resolve(
        team: &Team,
        repository: &Repository,
        templates: &Templates,
    ) -> Result<Self, RotationError> {
        let render = |field: &'static str, template: &str| {
            Template::new(&team.name, &repository.name, &repository.owner, template)
                .render()
                .map_err(|source| RotationError::TemplateResolution { field, source })
        };

        Ok(Self {
            token_path: render("token path", &templates.token_path)?,
            key_path: render("key path", &templates.key_path)?,
            title: render("title", &templates.title)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BooleanString;

    #[test]
    fn test_render_all_placeholders() {
        let rendered = Template::new("team", "repo", "telia-oss", "/concourse/{Team}/{Owner}/{Repository}")
            .render()
            .unwrap();
        assert_eq!(rendered, "/concourse/team/telia-oss/repo");
    }

    #[test]
    fn test_render_repeated_placeholder() {
        let rendered = Template::new("t", "r", "o", "{Team}-{Team}-deploy-key").render().unwrap();
        assert_eq!(rendered, "t-t-deploy-key");
    }

    #[test]
    fn test_render_without_placeholders() {
        let rendered = Template::new("t", "r", "o", "static-title").render().unwrap();
        assert_eq!(rendered, "static-title");
    }

    #[test]
    fn test_render_unknown_placeholder() {
        let err = Template::new("T", "A", "O", "/concourse/{Team}/{Repository}/{Something}")
            .render()
            .unwrap_err();
        assert_eq!(err, TemplateError::UnknownPlaceholder("Something".to_string()));
    }

    #[test]
    fn test_render_placeholder_is_case_sensitive() {
        let err = Template::new("T", "A", "O", "{team}").render().unwrap_err();
        assert_eq!(err, TemplateError::UnknownPlaceholder("team".to_string()));
    }

    #[test]
    fn test_render_unterminated() {
        let err = Template::new("T", "A", "O", "/concourse/{Team}/{Owner").render().unwrap_err();
        assert_eq!(err, TemplateError::Unterminated(18));
    }

    #[test]
    fn test_resolved_paths() {
        let team = Team {
            name: "test-team".to_string(),
            repositories: vec![],
        };
        let repository = Repository {
            name: "test-repository".to_string(),
            owner: "telia-oss".to_string(),
            read_only: BooleanString(true),
        };
        let templates = Templates {
            token_path: "/concourse/{Team}/{Owner}".to_string(),
            key_path: "/concourse/{Team}/{Repository}".to_string(),
            title: "concourse-{Team}-deploy-key".to_string(),
        };

        let paths = ResolvedPaths::resolve(&team, &repository, &templates).unwrap();
        assert_eq!(paths.token_path, "/concourse/test-team/telia-oss");
        assert_eq!(paths.key_path, "/concourse/test-team/test-repository");
        assert_eq!(paths.title, "concourse-test-team-deploy-key");
    }

    #[test]
    fn test_resolved_paths_reports_failing_field() {
        let team = Team {
            name: "T".to_string(),
            repositories: vec![],
        };
        let repository = Repository {
            name: "A".to_string(),
            owner: "O".to_string(),
            read_only: BooleanString(false),
        };
        let templates = Templates {
            token_path: "/concourse/{Team}/{Owner}".to_string(),
            key_path: "/concourse/{Team}/{Repository}/{Something}".to_string(),
            title: "concourse-{Team}-deploy-key".to_string(),
        };

        match ResolvedPaths::resolve(&team, &repository, &templates) {
            Err(RotationError::TemplateResolution { field, .. }) => assert_eq!(field, "key path"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
