use crate::{
    error::{Result, TaskError},
    models::{NewRequirement, NewTask},
};
use regex::Regex;
use std::sync::OnceLock;

/// Field-level validation for records entering the store.
///
/// Transition legality lives in [`crate::transition`]; this validator only
/// covers the shape of externally supplied data (ingested tasks and
/// requirements, surface parameters).
pub struct RecordValidator;

fn requirement_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Stable human-readable keys like "FR-12" or "NFR-3"
    PATTERN.get_or_init(|| Regex::new(r"^[A-Z][A-Z0-9]{0,7}-\d{1,4}$").unwrap())
}

impl RecordValidator {
    /// Validate a task identifier.
    ///
    /// Identifiers are opaque but must be non-empty, at most 64 characters,
    /// and free of whitespace so they survive being quoted in prompts, CLI
    /// arguments and log lines.
    pub fn validate_task_id(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(TaskError::empty_field("id"));
        }

        if id.len() > 64 {
            return Err(TaskError::Validation(
                "task id must be at most 64 characters long".to_string(),
            ));
        }

        if id.chars().any(char::is_whitespace) {
            return Err(TaskError::Validation(
                "task id cannot contain whitespace".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate a task title: non-blank, at most 200 characters.
    pub fn validate_title(title: &str) -> Result<()> {
        let trimmed = title.trim();

        if trimmed.is_empty() {
            return Err(TaskError::empty_field("title"));
        }

        if trimmed.len() > 200 {
            return Err(TaskError::Validation(
                "task title must be at most 200 characters long".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate a requirement key against the `FR-12` shape.
    pub fn validate_requirement_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(TaskError::empty_field("key"));
        }

        if !requirement_key_pattern().is_match(key) {
            return Err(TaskError::Validation(format!(
                "invalid requirement key '{key}': expected a short uppercase prefix and a number, e.g. FR-12"
            )));
        }

        Ok(())
    }

    /// Validate an artifact name: non-blank snake_case identifier.
    pub fn validate_artifact_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(TaskError::empty_field("name"));
        }

        let valid = name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid {
            return Err(TaskError::Validation(format!(
                "invalid artifact name '{name}': use lowercase letters, digits and underscores"
            )));
        }

        Ok(())
    }

    /// Validate a complete NewTask before insertion.
    pub fn validate_new_task(task: &NewTask) -> Result<()> {
        Self::validate_task_id(&task.id)?;
        Self::validate_title(&task.title)?;

        if task.description.trim().is_empty() {
            return Err(TaskError::empty_field("description"));
        }

        for dependency in &task.dependencies {
            if dependency == &task.id {
                return Err(TaskError::Validation(format!(
                    "task '{}' cannot depend on itself",
                    task.id
                )));
            }
            Self::validate_task_id(dependency)?;
        }

        Ok(())
    }

    /// Validate a complete NewRequirement before insertion.
    pub fn validate_new_requirement(requirement: &NewRequirement) -> Result<()> {
        Self::validate_requirement_key(&requirement.key)?;
        Self::validate_title(&requirement.title)?;

        if requirement.text.trim().is_empty() {
            return Err(TaskError::empty_field("text"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequirementKind;

    #[test]
    fn test_valid_task_ids() {
        assert!(RecordValidator::validate_task_id("T1").is_ok());
        assert!(RecordValidator::validate_task_id("auth-service").is_ok());
        assert!(RecordValidator::validate_task_id("a".repeat(64).as_str()).is_ok());
    }

    #[test]
    fn test_invalid_task_ids() {
        assert!(RecordValidator::validate_task_id("").is_err());
        assert!(RecordValidator::validate_task_id("has space").is_err());
        assert!(RecordValidator::validate_task_id(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_requirement_keys() {
        assert!(RecordValidator::validate_requirement_key("FR-12").is_ok());
        assert!(RecordValidator::validate_requirement_key("NFR-3").is_ok());
        assert!(RecordValidator::validate_requirement_key("RISK-101").is_ok());

        assert!(RecordValidator::validate_requirement_key("").is_err());
        assert!(RecordValidator::validate_requirement_key("fr-12").is_err());
        assert!(RecordValidator::validate_requirement_key("FR12").is_err());
        assert!(RecordValidator::validate_requirement_key("FR-").is_err());
        assert!(RecordValidator::validate_requirement_key("TOOLONGPREFIX-1").is_err());
    }

    #[test]
    fn test_artifact_names() {
        assert!(RecordValidator::validate_artifact_name("implementation_plan").is_ok());
        assert!(RecordValidator::validate_artifact_name("fix_plan").is_ok());

        assert!(RecordValidator::validate_artifact_name("").is_err());
        assert!(RecordValidator::validate_artifact_name("Implementation Plan").is_err());
        assert!(RecordValidator::validate_artifact_name("plan.md").is_err());
    }

    #[test]
    fn test_validate_new_task() {
        let mut new_task = NewTask::new("T1", "Auth", "Add authentication");
        assert!(RecordValidator::validate_new_task(&new_task).is_ok());

        new_task.dependencies = vec!["T1".to_string()];
        assert!(RecordValidator::validate_new_task(&new_task).is_err());

        let blank = NewTask::new("T2", "   ", "desc");
        assert!(RecordValidator::validate_new_task(&blank).is_err());
    }

    #[test]
    fn test_validate_new_requirement() {
        let requirement = NewRequirement {
            key: "FR-1".to_string(),
            title: "Login".to_string(),
            text: "Users can log in".to_string(),
            kind: RequirementKind::Functional,
        };
        assert!(RecordValidator::validate_new_requirement(&requirement).is_ok());

        let bad_key = NewRequirement {
            key: "login".to_string(),
            ..requirement.clone()
        };
        assert!(RecordValidator::validate_new_requirement(&bad_key).is_err());
    }
}
