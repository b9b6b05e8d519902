//! Saved contact filters.
//!
//! A list holds `field operator value` rules joined with AND. Rules are kept
//! as free-form strings so saved lists survive field renames; anything the
//! evaluator does not understand simply fails to match.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    clock::Clock,
    error::{CrmError, CrmResult, EntityKind, ValidationError},
    model::{Contact, DynamicList, FilterRule},
    store::CrmStore,
    validation::validate_length,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RuleField {
    ContactTagIds,
    Name,
    FirstName,
    LastName,
    Email,
    Company,
}

impl RuleField {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "contactTagIds" => RuleField::ContactTagIds,
            "name" => RuleField::Name,
            "firstName" => RuleField::FirstName,
            "lastName" => RuleField::LastName,
            "email" => RuleField::Email,
            "company" => RuleField::Company,
            _ => return None,
        })
    }

    fn text(self, contact: &Contact) -> Option<String> {
        let value = match self {
            RuleField::ContactTagIds => return None,
            RuleField::Name => contact.full_name(),
            RuleField::FirstName => contact.first_name.clone(),
            RuleField::LastName => contact.last_name.clone().unwrap_or_default(),
            RuleField::Email => contact.email.clone().unwrap_or_default(),
            RuleField::Company => contact.company.clone().unwrap_or_default(),
        };
        Some(value)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RuleOperator {
    HasTag,
    NotHasTag,
    Contains,
    NotContains,
    Is,
    IsNot,
}

impl RuleOperator {
    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "has_tag" => RuleOperator::HasTag,
            "not_has_tag" => RuleOperator::NotHasTag,
            "contains" => RuleOperator::Contains,
            "not_contains" => RuleOperator::NotContains,
            "is" => RuleOperator::Is,
            "is_not" => RuleOperator::IsNot,
            _ => return None,
        })
    }
}

/// True when `contact` satisfies one rule.
pub fn rule_matches(contact: &Contact, rule: &FilterRule) -> bool {
    let (Some(field), Some(operator)) = (
        RuleField::parse(&rule.field),
        RuleOperator::parse(&rule.operator),
    ) else {
        return false;
    };

    if field == RuleField::ContactTagIds {
        // A value that is not a tag id can never be a member.
        let member = Uuid::parse_str(rule.value.trim())
            .is_ok_and(|id| contact.tag_ids.contains(&id));
        return match operator {
            RuleOperator::HasTag => member,
            RuleOperator::NotHasTag => !member,
            _ => false,
        };
    }

    let Some(text) = field.text(contact) else {
        return false;
    };
    let haystack = text.trim().to_lowercase();
    let needle = rule.value.trim().to_lowercase();
    match operator {
        RuleOperator::Contains => haystack.contains(&needle),
        RuleOperator::NotContains => !haystack.contains(&needle),
        RuleOperator::Is => haystack == needle,
        RuleOperator::IsNot => haystack != needle,
        RuleOperator::HasTag | RuleOperator::NotHasTag => false,
    }
}

/// True when `contact` satisfies every rule of `list`.
pub fn matches(contact: &Contact, list: &DynamicList) -> bool {
    list.rules.iter().all(|rule| rule_matches(contact, rule))
}

#[derive(Clone)]
pub struct DynamicListService {
    store: Arc<dyn CrmStore>,
    clock: Arc<dyn Clock>,
}

impl DynamicListService {
    pub fn new(store: Arc<dyn CrmStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    #[instrument(name = "crm.lists.create", skip_all, fields(name = %name))]
    pub async fn create_list(
        &self,
        name: &str,
        tag_ids: Vec<Uuid>,
        rules: Vec<FilterRule>,
    ) -> CrmResult<DynamicList> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::ListNameRequired.into());
        }
        validate_length("name", name, 128)?;
        for rule in &rules {
            if RuleField::parse(&rule.field).is_none()
                || RuleOperator::parse(&rule.operator).is_none()
            {
                warn!(field = %rule.field, operator = %rule.operator, "rule will never match");
            }
        }
        let list = DynamicList {
            id: Uuid::new_v4(),
            name: name.to_string(),
            tag_ids,
            rules,
        };
        self.store.insert_list(list).await
    }

    pub async fn get_list(&self, id: Uuid) -> CrmResult<DynamicList> {
        self.store
            .find_list(id)
            .await?
            .ok_or_else(|| CrmError::not_found(EntityKind::DynamicList, id))
    }

    pub async fn list_lists(&self) -> CrmResult<Vec<DynamicList>> {
        self.store.list_lists().await
    }

    /// Active contacts the list selects.
    pub async fn matching_contacts(&self, list_id: Uuid) -> CrmResult<Vec<Contact>> {
        let list = self.get_list(list_id).await?;
        let contacts = self.store.list_contacts().await?;
        Ok(contacts
            .into_iter()
            .filter(|contact| matches(contact, &list))
            .collect())
    }

    /// Adds the list's tags to every matching contact and returns how many
    /// contacts changed.
    #[instrument(name = "crm.lists.apply", skip(self))]
    pub async fn apply_dynamic_list(&self, list_id: Uuid) -> CrmResult<usize> {
        let list = self.get_list(list_id).await?;
        let mut updated = 0;
        for contact in self.matching_contacts(list_id).await? {
            let mut tag_ids = contact.tag_ids.clone();
            for id in &list.tag_ids {
                if !tag_ids.contains(id) {
                    tag_ids.push(*id);
                }
            }
            if tag_ids.len() != contact.tag_ids.len() {
                self.store
                    .set_contact_tags(contact.id, tag_ids, self.clock.now())
                    .await?;
                updated += 1;
            }
        }
        info!(updated, "dynamic list applied");
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::{
        clock::{FixedClock, SystemClock},
        store::{ContactRepository, MemoryStore},
    };

    fn contact(email: Option<&str>, tags: Vec<Uuid>) -> Contact {
        let now = Utc::now();
        Contact {
            id: Uuid::new_v4(),
            first_name: "Marta".into(),
            last_name: Some("Vidal".into()),
            email: email.map(str::to_string),
            company: None,
            tag_ids: tags,
            folder_url: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn list(rules: Vec<FilterRule>) -> DynamicList {
        DynamicList {
            id: Uuid::new_v4(),
            name: "Acme buyers".into(),
            tag_ids: vec![],
            rules,
        }
    }

    #[test]
    fn email_and_tag_rules_are_a_conjunction() {
        let t1 = Uuid::new_v4();
        let acme = list(vec![
            FilterRule::new("email", "contains", "acme"),
            FilterRule::new("contactTagIds", "has_tag", t1.to_string()),
        ]);
        assert!(matches(&contact(Some("Sales@ACME.com"), vec![t1]), &acme));
        assert!(!matches(&contact(Some("sales@other.com"), vec![t1]), &acme));
        assert!(!matches(&contact(Some("sales@acme.com"), vec![]), &acme));
    }

    #[test]
    fn empty_rule_lists_match_everything() {
        assert!(matches(&contact(None, vec![]), &list(vec![])));
    }

    #[test]
    fn missing_values_compare_as_empty() {
        let c = contact(None, vec![]);
        assert!(rule_matches(&c, &FilterRule::new("email", "is", "")));
        assert!(rule_matches(&c, &FilterRule::new("company", "not_contains", "x")));
        assert!(!rule_matches(&c, &FilterRule::new("email", "contains", "x")));
    }

    #[test]
    fn name_joins_first_and_last() {
        let c = contact(None, vec![]);
        assert!(rule_matches(&c, &FilterRule::new("name", "is", "marta vidal")));
        assert!(rule_matches(&c, &FilterRule::new("lastName", "is_not", "Puig")));
    }

    #[test]
    fn unknown_or_mismatched_rules_never_match() {
        let c = contact(Some("a@b.c"), vec![]);
        assert!(!rule_matches(&c, &FilterRule::new("phone", "contains", "")));
        assert!(!rule_matches(&c, &FilterRule::new("email", "has_tag", "a")));
        assert!(!rule_matches(&c, &FilterRule::new("contactTagIds", "contains", "")));
        assert!(rule_matches(
            &c,
            &FilterRule::new("contactTagIds", "not_has_tag", "not-a-uuid")
        ));
    }

    #[tokio::test]
    async fn applying_a_list_tags_only_new_matches() {
        let store = Arc::new(MemoryStore::new());
        let vip = Uuid::new_v4();
        let tagged = store
            .insert_contact(contact(Some("a@acme.com"), vec![vip]))
            .await
            .unwrap();
        let fresh = store
            .insert_contact(contact(Some("b@acme.com"), vec![]))
            .await
            .unwrap();
        store
            .insert_contact(contact(Some("c@else.com"), vec![]))
            .await
            .unwrap();

        let applied_at = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();
        let service = DynamicListService::new(store.clone(), Arc::new(FixedClock(applied_at)));
        let list = service
            .create_list(
                "Acme",
                vec![vip],
                vec![FilterRule::new("email", "contains", "acme")],
            )
            .await
            .unwrap();

        assert_eq!(service.matching_contacts(list.id).await.unwrap().len(), 2);
        assert_eq!(service.apply_dynamic_list(list.id).await.unwrap(), 1);
        let fresh = store.find_contact(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.tag_ids, vec![vip]);
        assert_eq!(fresh.updated_at, applied_at);
        let tagged = store.find_contact(tagged.id).await.unwrap().unwrap();
        assert_eq!(tagged.tag_ids, vec![vip]);
        assert_ne!(tagged.updated_at, applied_at);
        assert_eq!(service.apply_dynamic_list(list.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_lists_are_not_found() {
        let service = DynamicListService::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock));
        let err = service.apply_dynamic_list(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
