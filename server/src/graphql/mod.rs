mod types;

use async_graphql::{
    Context, EmptySubscription, Error, ErrorExtensions, ID, MaybeUndefined, Object, Schema,
};
use platform_api::{ApiError, internal_error};
use products_crm::{
    Crm, CrmError,
    model::{DealPatch, Delivery, NewDeal, NewTask},
    store::StageCatalog,
};
use tracing::instrument;
use uuid::Uuid;

pub use types::*;

pub type SchemaType = Schema<QueryRoot, MutationRoot, EmptySubscription>;

pub fn build_schema(crm: Crm) -> SchemaType {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(crm)
        .finish()
}

fn crm<'a>(ctx: &Context<'a>) -> async_graphql::Result<&'a Crm> {
    ctx.data::<Crm>()
}

/// Maps service errors onto the shared API error codes.
fn crm_error(err: CrmError) -> Error {
    let api = match err {
        CrmError::NotFound { .. } => ApiError::not_found(err.to_string()),
        CrmError::Validation(inner) => ApiError::validation(inner.to_string()),
        CrmError::Store(inner) => ApiError::Internal(inner),
    };
    api.extend()
}

fn parse_uuid(id: &ID) -> async_graphql::Result<Uuid> {
    Uuid::parse_str(id.as_str())
        .map_err(|_| ApiError::validation(format!("invalid id `{}`", id.as_str())).extend())
}

fn parse_uuids(ids: &[ID]) -> async_graphql::Result<Vec<Uuid>> {
    ids.iter().map(parse_uuid).collect()
}

#[derive(Default)]
pub struct QueryRoot;

#[Object]
impl QueryRoot {
    #[instrument(name = "graphql.deals", skip_all)]
    async fn deals(
        &self,
        ctx: &Context<'_>,
        stage: Option<String>,
    ) -> async_graphql::Result<Vec<DealNode>> {
        let deals = crm(ctx)?
            .deals
            .list_deals(stage.as_deref())
            .await
            .map_err(crm_error)?;
        Ok(deals.into_iter().map(DealNode::from).collect())
    }

    async fn deal(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<DealNode> {
        let deal = crm(ctx)?
            .deals
            .get_deal(parse_uuid(&id)?)
            .await
            .map_err(crm_error)?;
        Ok(deal.into())
    }

    async fn tags(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<TagNode>> {
        let registry = crm(ctx)?.tags.registry().await.map_err(crm_error)?;
        Ok(registry.sorted().iter().cloned().map(TagNode::from).collect())
    }

    async fn tasks(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "dealId")] deal_id: Option<ID>,
    ) -> async_graphql::Result<Vec<TaskNode>> {
        let service = &crm(ctx)?.tasks;
        let tasks = match deal_id {
            Some(deal_id) => service.tasks_for_deal(parse_uuid(&deal_id)?).await,
            None => service.list_tasks().await,
        }
        .map_err(crm_error)?;
        Ok(tasks.into_iter().map(TaskNode::from).collect())
    }

    async fn stages(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<StageNode>> {
        let stages = crm(ctx)?.store().list_stages().await.map_err(crm_error)?;
        Ok(stages.into_iter().map(StageNode::from).collect())
    }

    #[graphql(name = "dynamicListMatches")]
    async fn dynamic_list_matches(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "listId")] list_id: ID,
    ) -> async_graphql::Result<Vec<ContactNode>> {
        let contacts = crm(ctx)?
            .lists
            .matching_contacts(parse_uuid(&list_id)?)
            .await
            .map_err(crm_error)?;
        Ok(contacts.into_iter().map(ContactNode::from).collect())
    }
}

#[derive(Default)]
pub struct MutationRoot;

#[Object]
impl MutationRoot {
    #[instrument(name = "graphql.create_deal", skip_all)]
    async fn create_deal(
        &self,
        ctx: &Context<'_>,
        input: NewDealInput,
    ) -> async_graphql::Result<DealNode> {
        let assigned_user_id = input.assigned_user_id.as_ref().map(parse_uuid).transpose()?;
        let deal = crm(ctx)?
            .deals
            .create_deal(NewDeal {
                title: input.title,
                stage: input.stage,
                contact_ids: parse_uuids(&input.contact_ids)?,
                assigned_user_id,
                delivery: Delivery {
                    date: input.delivery_date,
                    notes: input.delivery_notes,
                },
            })
            .await
            .map_err(crm_error)?;
        Ok(deal.into())
    }

    #[instrument(name = "graphql.update_deal", skip_all)]
    async fn update_deal(
        &self,
        ctx: &Context<'_>,
        input: UpdateDealInput,
    ) -> async_graphql::Result<DealNode> {
        let crm = crm(ctx)?;
        let id = parse_uuid(&input.id)?;
        let assigned_user_id = match &input.assigned_user_id {
            MaybeUndefined::Undefined => None,
            MaybeUndefined::Null => Some(None),
            MaybeUndefined::Value(user) => Some(Some(parse_uuid(user)?)),
        };
        let delivery = if input.delivery_date.is_some() || input.delivery_notes.is_some() {
            let current = crm.deals.get_deal(id).await.map_err(crm_error)?.delivery;
            Some(Delivery {
                date: input.delivery_date.or(current.date),
                notes: input.delivery_notes.or(current.notes),
            })
        } else {
            None
        };
        let patch = DealPatch {
            title: input.title,
            stage: input.stage,
            contact_ids: input.contact_ids.as_deref().map(parse_uuids).transpose()?,
            tag_ids: input.tag_ids.as_deref().map(parse_uuids).transpose()?,
            assigned_user_id,
            delivery,
            sort_index: None,
        };
        let deal = crm.deals.update_deal(id, patch).await.map_err(crm_error)?;
        Ok(deal.into())
    }

    async fn move_deal(
        &self,
        ctx: &Context<'_>,
        id: ID,
        stage: String,
        #[graphql(name = "beforeId")] before_id: Option<ID>,
    ) -> async_graphql::Result<DealNode> {
        let before = before_id.as_ref().map(parse_uuid).transpose()?;
        let deal = crm(ctx)?
            .deals
            .move_deal(parse_uuid(&id)?, &stage, before)
            .await
            .map_err(crm_error)?;
        Ok(deal.into())
    }

    async fn delete_deal(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<bool> {
        crm(ctx)?
            .deals
            .delete_deal(parse_uuid(&id)?)
            .await
            .map_err(crm_error)?;
        Ok(true)
    }

    async fn restore_deal(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<DealNode> {
        let deal = crm(ctx)?
            .deals
            .restore_deal(parse_uuid(&id)?)
            .await
            .map_err(crm_error)?;
        Ok(deal.into())
    }

    #[instrument(name = "graphql.create_task", skip_all)]
    async fn create_task(
        &self,
        ctx: &Context<'_>,
        input: NewTaskInput,
    ) -> async_graphql::Result<TaskNode> {
        let task = crm(ctx)?
            .tasks
            .create_task(NewTask {
                title: input.title,
                deal_id: input.deal_id.as_ref().map(parse_uuid).transpose()?,
                responsible_user_id: input
                    .responsible_user_id
                    .as_ref()
                    .map(parse_uuid)
                    .transpose()?,
                due_date: input.due_date,
            })
            .await
            .map_err(crm_error)?;
        Ok(task.into())
    }

    async fn complete_task(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<TaskNode> {
        let task = crm(ctx)?
            .tasks
            .complete_task(parse_uuid(&id)?)
            .await
            .map_err(crm_error)?;
        Ok(task.into())
    }

    async fn create_tag(
        &self,
        ctx: &Context<'_>,
        name: String,
        #[graphql(default = "#9e9e9e")] color: String,
    ) -> async_graphql::Result<TagNode> {
        let tag = crm(ctx)?
            .tags
            .create_tag(&name, &color)
            .await
            .map_err(crm_error)?;
        Ok(tag.into())
    }

    async fn reorder_tag(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "draggedId")] dragged_id: ID,
        #[graphql(name = "targetId")] target_id: ID,
    ) -> async_graphql::Result<TagNode> {
        let tag = crm(ctx)?
            .tags
            .reorder(parse_uuid(&dragged_id)?, parse_uuid(&target_id)?)
            .await
            .map_err(crm_error)?;
        Ok(tag.into())
    }

    #[instrument(name = "graphql.apply_dynamic_list", skip_all)]
    async fn apply_dynamic_list(
        &self,
        ctx: &Context<'_>,
        #[graphql(name = "listId")] list_id: ID,
    ) -> async_graphql::Result<ApplyListPayload> {
        let updated = crm(ctx)?
            .lists
            .apply_dynamic_list(parse_uuid(&list_id)?)
            .await
            .map_err(crm_error)?;
        Ok(ApplyListPayload {
            updated: i32::try_from(updated).map_err(internal_error)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_graphql::{Request, Value, Variables};
    use chrono::{TimeZone, Utc};
    use products_crm::{
        ArchivePolicy, AutomationConfig, FixedClock, MemoryStore,
        model::{Tag, User},
        store::{TagRepository, UserDirectory},
    };
    use serde_json::json;

    use super::*;

    struct Fixture {
        schema: SchemaType,
        admin: Uuid,
        uv: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::with_default_pipeline());
        let admin = store
            .insert_user(User {
                id: Uuid::new_v4(),
                display_name: "Admin".into(),
                email: None,
            })
            .await
            .unwrap();
        store
            .insert_user(User {
                id: Uuid::new_v4(),
                display_name: "Producción".into(),
                email: None,
            })
            .await
            .unwrap();
        let uv = store
            .insert_tag(Tag {
                id: Uuid::new_v4(),
                name: "UV".into(),
                color: "#7e57c2".into(),
                sort_index: 10.0,
            })
            .await
            .unwrap();
        let clock = Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2025, 9, 1, 8, 0, 0).unwrap(),
        ));
        let crm = Crm::new(
            store,
            clock,
            AutomationConfig::default(),
            ArchivePolicy::default(),
        );
        Fixture {
            schema: build_schema(crm),
            admin: admin.id,
            uv: uv.id,
        }
    }

    fn error_code(response: &async_graphql::Response) -> Option<Value> {
        response
            .errors
            .first()
            .and_then(|err| err.extensions.as_ref())
            .and_then(|ext| ext.get("code"))
            .cloned()
    }

    async fn create_deal(fx: &Fixture) -> String {
        let response = fx
            .schema
            .execute(
                Request::new(
                    "mutation($user: ID!) { createDeal(input: {title: \"Stickers\", assignedUserId: $user}) { id stage } }",
                )
                .variables(Variables::from_json(json!({"user": fx.admin.to_string()}))),
            )
            .await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        let body = response.data.into_json().unwrap();
        assert_eq!(body["createDeal"]["stage"], "Nuevos");
        body["createDeal"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn stages_are_listed_in_board_order() {
        let fx = fixture().await;
        let response = fx.schema.execute("{ stages { key } }").await;
        let body = response.data.into_json().unwrap();
        assert_eq!(body["stages"][0]["key"], "Nuevos");
        assert_eq!(body["stages"][4]["key"], "Entregado");
    }

    #[tokio::test]
    async fn clearing_the_assignee_surfaces_a_validation_error() {
        let fx = fixture().await;
        let deal = create_deal(&fx).await;
        let response = fx
            .schema
            .execute(
                Request::new(
                    "mutation($id: ID!) { updateDeal(input: {id: $id, assignedUserId: null}) { id } }",
                )
                .variables(Variables::from_json(json!({"id": deal}))),
            )
            .await;
        assert_eq!(error_code(&response), Some(Value::from("VALIDATION")));
        assert_eq!(
            response.errors[0].message,
            "deal cannot be left without an assignee"
        );
    }

    #[tokio::test]
    async fn entering_production_with_a_tag_runs_automation() {
        let fx = fixture().await;
        let deal = create_deal(&fx).await;
        let response = fx
            .schema
            .execute(
                Request::new(
                    "mutation($id: ID!, $tag: ID!) { updateDeal(input: {id: $id, stage: \"Producción\", tagIds: [$tag]}) { stage tagIds } }",
                )
                .variables(Variables::from_json(
                    json!({"id": deal, "tag": fx.uv.to_string()}),
                )),
            )
            .await;
        assert!(response.errors.is_empty(), "{:?}", response.errors);
        let body = response.data.into_json().unwrap();
        assert_eq!(body["updateDeal"]["tagIds"], json!([fx.uv.to_string()]));

        let response = fx
            .schema
            .execute(
                Request::new("query($id: ID) { tasks(dealId: $id) { title } }")
                    .variables(Variables::from_json(json!({"id": deal}))),
            )
            .await;
        let body = response.data.into_json().unwrap();
        assert_eq!(
            body["tasks"],
            json!([{"title": "Impresión UV"}, {"title": "Send quote"}])
        );
    }

    #[tokio::test]
    async fn unknown_deals_are_not_found() {
        let fx = fixture().await;
        let response = fx
            .schema
            .execute(
                Request::new("query($id: ID!) { deal(id: $id) { id } }")
                    .variables(Variables::from_json(json!({"id": Uuid::new_v4().to_string()}))),
            )
            .await;
        assert_eq!(error_code(&response), Some(Value::from("NOT_FOUND")));
    }

    #[tokio::test]
    async fn unassigned_tasks_are_rejected() {
        let fx = fixture().await;
        let response = fx
            .schema
            .execute("mutation { createTask(input: {title: \"Call\"}) { id } }")
            .await;
        assert_eq!(error_code(&response), Some(Value::from("VALIDATION")));
        assert_eq!(response.errors[0].message, "task needs a responsible user");
    }
}
