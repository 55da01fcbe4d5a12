//! Migration to create the usage_logs table.
//!
//! Append-only audit records of provider calls made with leased keys.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UsageLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UsageLogs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(UsageLogs::UserId).uuid().null())
                    .col(ColumnDef::new(UsageLogs::Provider).text().not_null())
                    .col(ColumnDef::new(UsageLogs::Model).text().null())
                    .col(ColumnDef::new(UsageLogs::Endpoint).text().null())
                    .col(ColumnDef::new(UsageLogs::StatusCode).integer().not_null())
                    .col(
                        ColumnDef::new(UsageLogs::DurationMs)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(UsageLogs::PromptPreview).text().null())
                    .col(
                        ColumnDef::new(UsageLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_usage_logs_provider_created")
                    .table(UsageLogs::Table)
                    .col(UsageLogs::Provider)
                    .col(UsageLogs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_usage_logs_provider_created")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(UsageLogs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum UsageLogs {
    Table,
    Id,
    UserId,
    Provider,
    Model,
    Endpoint,
    StatusCode,
    DurationMs,
    PromptPreview,
    CreatedAt,
}
