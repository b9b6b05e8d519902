use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "deal")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub title: String,
    #[sea_orm(indexed)]
    pub stage: String,
    /// JSON array of contact ids, in display order.
    pub contact_ids: Json,
    /// JSON array of tag ids.
    pub tag_ids: Json,
    #[sea_orm(indexed)]
    pub assigned_user_id: Option<Uuid>,
    pub delivery_date: Option<Date>,
    pub delivery_notes: Option<String>,
    pub sort_index: f64,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
    pub deleted_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::pipeline_stage::Entity",
        from = "Column::Stage",
        to = "super::pipeline_stage::Column::Key"
    )]
    Stage,
    #[sea_orm(
        belongs_to = "super::app_user::Entity",
        from = "Column::AssignedUserId",
        to = "super::app_user::Column::Id"
    )]
    AssignedUser,
}

impl Related<super::pipeline_stage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Stage.def()
    }
}

impl Related<super::app_user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AssignedUser.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
