use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::{
    archive::Archive,
    clock::Clock,
    error::{CrmError, CrmResult, EntityKind, ValidationError},
    model::{Contact, NewContact},
    store::CrmStore,
    validation::{normalize_optional, validate_length},
};

const NAME_MAX: usize = 128;

#[derive(Clone)]
pub struct ContactService {
    store: Arc<dyn CrmStore>,
    clock: Arc<dyn Clock>,
    archive: Archive,
}

impl ContactService {
    pub fn new(store: Arc<dyn CrmStore>, clock: Arc<dyn Clock>, archive: Archive) -> Self {
        Self {
            store,
            clock,
            archive,
        }
    }

    #[instrument(name = "crm.contacts.create", skip_all)]
    pub async fn create_contact(&self, input: NewContact) -> CrmResult<Contact> {
        let first_name = input.first_name.trim().to_string();
        if first_name.is_empty() {
            return Err(ValidationError::FirstNameRequired.into());
        }
        validate_length("firstName", &first_name, NAME_MAX)?;
        let last_name = normalize_optional(input.last_name);
        if let Some(last) = &last_name {
            validate_length("lastName", last, NAME_MAX)?;
        }
        let mut tag_ids = Vec::with_capacity(input.tag_ids.len());
        for id in input.tag_ids {
            if !tag_ids.contains(&id) {
                tag_ids.push(id);
            }
        }
        let now = self.clock.now();
        let contact = Contact {
            id: Uuid::new_v4(),
            first_name,
            last_name,
            email: normalize_optional(input.email),
            company: normalize_optional(input.company),
            tag_ids,
            folder_url: normalize_optional(input.folder_url),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.store.insert_contact(contact).await
    }

    pub async fn get_contact(&self, id: Uuid) -> CrmResult<Contact> {
        self.store
            .find_contact(id)
            .await?
            .ok_or_else(|| CrmError::not_found(EntityKind::Contact, id))
    }

    pub async fn list_contacts(&self) -> CrmResult<Vec<Contact>> {
        self.store.list_contacts().await
    }

    pub async fn delete_contact(&self, id: Uuid) -> CrmResult<()> {
        self.archive
            .archive(EntityKind::Contact, id)
            .await
            .map(|_| ())
    }

    pub async fn restore_contact(&self, id: Uuid) -> CrmResult<Contact> {
        self.archive.restore(EntityKind::Contact, id).await?;
        self.get_contact(id).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{clock::FixedClock, config::ArchivePolicy, store::MemoryStore};

    fn service() -> ContactService {
        let store = Arc::new(MemoryStore::new());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock(Utc::now()));
        let archive = Archive::new(store.clone(), clock.clone(), ArchivePolicy::default());
        ContactService::new(store, clock, archive)
    }

    #[tokio::test]
    async fn blank_optionals_are_dropped_and_tags_deduplicated() {
        let contacts = service();
        let tag = Uuid::new_v4();
        let contact = contacts
            .create_contact(NewContact {
                first_name: " Grace ".into(),
                last_name: Some(" ".into()),
                email: Some("grace@navy.mil".into()),
                company: None,
                tag_ids: vec![tag, tag],
                folder_url: None,
            })
            .await
            .unwrap();
        assert_eq!(contact.first_name, "Grace");
        assert_eq!(contact.last_name, None);
        assert_eq!(contact.tag_ids, vec![tag]);
    }

    #[tokio::test]
    async fn contacts_need_a_first_name() {
        let err = service()
            .create_contact(NewContact::default())
            .await
            .unwrap_err();
        assert_eq!(err.as_validation(), Some(&ValidationError::FirstNameRequired));
    }

    #[tokio::test]
    async fn delete_and_restore_round_trip_through_the_archive() {
        let contacts = service();
        let contact = contacts
            .create_contact(NewContact {
                first_name: "Linus".into(),
                ..NewContact::default()
            })
            .await
            .unwrap();
        contacts.delete_contact(contact.id).await.unwrap();
        assert!(contacts.list_contacts().await.unwrap().is_empty());
        contacts.restore_contact(contact.id).await.unwrap();
        assert_eq!(contacts.list_contacts().await.unwrap().len(), 1);
    }
}
