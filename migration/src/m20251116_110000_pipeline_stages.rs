use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

/// Default workshop pipeline, in board order.
const DEFAULT_STAGES: &[(&str, &str, i16)] = &[
    ("Nuevos", "Nuevos", 10),
    ("Presupuesto enviado", "Presupuesto enviado", 20),
    ("Compra de material", "Compra de material", 30),
    ("Producción", "Producción", 40),
    ("Entregado", "Entregado", 50),
];

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PipelineStage::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PipelineStage::Key)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PipelineStage::DisplayName)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PipelineStage::SortOrder)
                            .small_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_pipeline_stage_order")
                    .table(PipelineStage::Table)
                    .col(PipelineStage::SortOrder)
                    .unique()
                    .to_owned(),
            )
            .await?;

        for (key, display_name, sort_order) in DEFAULT_STAGES.iter().copied() {
            let insert = Query::insert()
                .into_table(PipelineStage::Table)
                .columns(vec![
                    PipelineStage::Key,
                    PipelineStage::DisplayName,
                    PipelineStage::SortOrder,
                ])
                .values_panic(vec![key.into(), display_name.into(), sort_order.into()])
                .on_conflict(
                    OnConflict::column(PipelineStage::Key)
                        .do_nothing()
                        .to_owned(),
                )
                .to_owned();
            manager.exec_stmt(insert).await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PipelineStage::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum PipelineStage {
    Table,
    Key,
    DisplayName,
    SortOrder,
}
