use serde::Serialize;
use tracing::{info, warn};

use super::conditions::evaluate;
use crate::models::field::{Condition, ConditionOperator, FieldValues};
use crate::models::template::RoleRule;
use crate::services::profile::ProfileService;

/// Roles of every matching rule, in rule order without duplicates.
pub fn matching_roles(rules: &[RoleRule], values: &FieldValues) -> Vec<String> {
    let mut roles: Vec<String> = Vec::new();
    for rule in rules {
        let condition = Condition::new(&rule.field, ConditionOperator::Equals, Some(&rule.value));
        if evaluate(&condition, values) && !roles.contains(&rule.role) {
            roles.push(rule.role.clone());
        }
    }
    roles
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleGrantFailure {
    pub role: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoleGrantReport {
    pub granted: Vec<String>,
    pub failed: Vec<RoleGrantFailure>,
}

impl RoleGrantReport {
    pub fn failed_roles(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.role.clone()).collect()
    }
}

/// Best effort: a failing grant is reported and the rest still run.
pub async fn grant_roles(
    profile: &dyn ProfileService,
    user_id: &str,
    roles: &[String],
) -> RoleGrantReport {
    let mut report = RoleGrantReport::default();
    for role in roles {
        match profile.grant_role(user_id, role).await {
            Ok(()) => {
                info!(user_id, role = %role, "role granted");
                report.granted.push(role.clone());
            }
            Err(err) => {
                warn!(user_id, role = %role, ?err, "role grant failed");
                report.failed.push(RoleGrantFailure {
                    role: role.clone(),
                    reason: err.to_string(),
                });
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::profile::{InMemoryProfileService, MockProfileService, ProfileError};
    use mockall::predicate::eq;
    use serde_json::json;

    fn submission() -> FieldValues {
        let mut values = FieldValues::new();
        values.insert("request_type".into(), json!("id_card"));
        values.insert("faculty".into(), json!("technical"));
        values
    }

    #[test]
    fn every_matching_rule_contributes() {
        let rules = vec![
            RoleRule::new("request_type", "id_card", "student"),
            RoleRule::new("faculty", "technical", "lab_access"),
            RoleRule::new("faculty", "economics", "trading_floor"),
            RoleRule::new("request_type", "id_card", "student"),
        ];
        assert_eq!(matching_roles(&rules, &submission()), vec!["student", "lab_access"]);
    }

    #[tokio::test]
    async fn submitter_gains_both_roles_additively() {
        let profile = InMemoryProfileService::new();
        profile.grant_role("S1", "alumni").await.unwrap();

        let rules = vec![
            RoleRule::new("request_type", "id_card", "student"),
            RoleRule::new("faculty", "technical", "lab_access"),
        ];
        let roles = matching_roles(&rules, &submission());
        let report = grant_roles(&profile, "S1", &roles).await;

        assert!(report.failed.is_empty());
        let held: Vec<String> = profile.roles("S1").await.unwrap().into_iter().collect();
        assert_eq!(held, vec!["alumni", "lab_access", "student"]);
    }

    #[tokio::test]
    async fn failed_grant_does_not_stop_the_rest() {
        let mut profile = MockProfileService::new();
        profile
            .expect_grant_role()
            .with(eq("S1"), eq("ghost_role"))
            .times(1)
            .returning(|_, role| Err(ProfileError::UnknownRole(role.to_string())));
        profile
            .expect_grant_role()
            .with(eq("S1"), eq("student"))
            .times(1)
            .returning(|_, _| Ok(()));

        let report = grant_roles(&profile, "S1", &["ghost_role".into(), "student".into()]).await;
        assert_eq!(report.granted, vec!["student"]);
        assert_eq!(report.failed_roles(), vec!["ghost_role"]);
        assert_eq!(report.failed[0].reason, "unknown role `ghost_role`");
    }
}
