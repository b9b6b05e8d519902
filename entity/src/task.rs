use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "task")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub title: String,
    pub completed: bool,
    pub due_date: Option<Date>,
    /// Weak reference: deleting the deal leaves the task in place.
    #[sea_orm(indexed)]
    pub deal_id: Option<Uuid>,
    #[sea_orm(indexed)]
    pub responsible_user_id: Uuid,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
    pub deleted_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::deal::Entity",
        from = "Column::DealId",
        to = "super::deal::Column::Id"
    )]
    Deal,
    #[sea_orm(
        belongs_to = "super::app_user::Entity",
        from = "Column::ResponsibleUserId",
        to = "super::app_user::Column::Id"
    )]
    ResponsibleUser,
}

impl Related<super::deal::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Deal.def()
    }
}

impl Related<super::app_user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ResponsibleUser.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
