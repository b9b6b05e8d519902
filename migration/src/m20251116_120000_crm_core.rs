use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum AppUser {
    Table,
    Id,
    DisplayName,
    Email,
}

#[derive(DeriveIden)]
enum Tag {
    Table,
    Id,
    Name,
    Color,
    SortIndex,
}

#[derive(DeriveIden)]
enum Contact {
    Table,
    Id,
    FirstName,
    LastName,
    Email,
    Company,
    TagIds,
    FolderUrl,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(DeriveIden)]
enum Deal {
    Table,
    Id,
    Title,
    Stage,
    ContactIds,
    TagIds,
    AssignedUserId,
    DeliveryDate,
    DeliveryNotes,
    SortIndex,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(DeriveIden)]
enum Task {
    Table,
    Id,
    Title,
    Completed,
    DueDate,
    DealId,
    ResponsibleUserId,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(DeriveIden)]
enum DynamicList {
    Table,
    Id,
    Name,
    TagIds,
    Rules,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AppUser::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(AppUser::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(AppUser::DisplayName)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(ColumnDef::new(AppUser::Email).string_len(320))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_app_user_display_name")
                    .table(AppUser::Table)
                    .col(AppUser::DisplayName)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Tag::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Tag::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Tag::Name).string_len(128).not_null())
                    .col(ColumnDef::new(Tag::Color).string_len(32).not_null())
                    .col(ColumnDef::new(Tag::SortIndex).double().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_tag_sort_index")
                    .table(Tag::Table)
                    .col(Tag::SortIndex)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Contact::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Contact::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(Contact::FirstName)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Contact::LastName).string_len(128))
                    .col(ColumnDef::new(Contact::Email).string_len(320))
                    .col(ColumnDef::new(Contact::Company).string_len(256))
                    .col(ColumnDef::new(Contact::TagIds).json().not_null())
                    .col(ColumnDef::new(Contact::FolderUrl).string_len(1024))
                    .col(
                        ColumnDef::new(Contact::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Contact::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Contact::DeletedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_contact_email")
                    .table(Contact::Table)
                    .col(Contact::Email)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Deal::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Deal::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Deal::Title).string_len(256).not_null())
                    .col(ColumnDef::new(Deal::Stage).string().not_null())
                    .col(ColumnDef::new(Deal::ContactIds).json().not_null())
                    .col(ColumnDef::new(Deal::TagIds).json().not_null())
                    .col(ColumnDef::new(Deal::AssignedUserId).uuid())
                    .col(ColumnDef::new(Deal::DeliveryDate).date())
                    .col(ColumnDef::new(Deal::DeliveryNotes).text())
                    .col(ColumnDef::new(Deal::SortIndex).double().not_null())
                    .col(
                        ColumnDef::new(Deal::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Deal::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Deal::DeletedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_deal_stage_sort")
                    .table(Deal::Table)
                    .col(Deal::Stage)
                    .col(Deal::SortIndex)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_deal_assigned_user")
                    .table(Deal::Table)
                    .col(Deal::AssignedUserId)
                    .to_owned(),
            )
            .await?;

        // No foreign key on deal_id: tasks outlive the deals they point at.
        manager
            .create_table(
                Table::create()
                    .table(Task::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Task::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Task::Title).string_len(256).not_null())
                    .col(
                        ColumnDef::new(Task::Completed)
                            .boolean()
                            .not_null()
                            .default(Expr::value(false)),
                    )
                    .col(ColumnDef::new(Task::DueDate).date())
                    .col(ColumnDef::new(Task::DealId).uuid())
                    .col(ColumnDef::new(Task::ResponsibleUserId).uuid().not_null())
                    .col(
                        ColumnDef::new(Task::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Task::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Task::DeletedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_task_deal")
                    .table(Task::Table)
                    .col(Task::DealId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_task_responsible_user")
                    .table(Task::Table)
                    .col(Task::ResponsibleUserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DynamicList::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DynamicList::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DynamicList::Name)
                            .string_len(256)
                            .not_null(),
                    )
                    .col(ColumnDef::new(DynamicList::TagIds).json().not_null())
                    .col(ColumnDef::new(DynamicList::Rules).json().not_null())
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DynamicList::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Task::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Deal::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Contact::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Tag::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AppUser::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}
