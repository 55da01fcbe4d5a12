//! Migration to create the api_keys table.
//!
//! This migration creates the api_keys table holding the shared pool of
//! provider credentials, together with the usage bookkeeping columns the
//! lease path maintains.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ApiKeys::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(ApiKeys::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(ApiKeys::Provider).text().not_null())
                    .col(ColumnDef::new(ApiKeys::SecretCiphertext).binary().not_null())
                    .col(ColumnDef::new(ApiKeys::SecretFingerprint).text().not_null())
                    .col(ColumnDef::new(ApiKeys::DisplayName).text().not_null())
                    .col(
                        ColumnDef::new(ApiKeys::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(ApiKeys::UsageCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ApiKeys::LastUsedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ApiKeys::IsRateLimited)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ApiKeys::RateLimitResetAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ApiKeys::Tier)
                            .text()
                            .not_null()
                            .default("free"),
                    )
                    .col(
                        ColumnDef::new(ApiKeys::ErrorCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ApiKeys::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ApiKeys::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Candidate filtering for lease selection
        manager
            .create_index(
                Index::create()
                    .name("idx_api_keys_provider_active")
                    .table(ApiKeys::Table)
                    .col(ApiKeys::Provider)
                    .col(ApiKeys::IsActive)
                    .to_owned(),
            )
            .await?;

        // One row per physical credential
        manager
            .create_index(
                Index::create()
                    .name("idx_api_keys_secret_fingerprint")
                    .table(ApiKeys::Table)
                    .col(ApiKeys::SecretFingerprint)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_api_keys_provider_active").to_owned())
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_api_keys_secret_fingerprint")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ApiKeys::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ApiKeys {
    Table,
    Id,
    Provider,
    SecretCiphertext,
    SecretFingerprint,
    DisplayName,
    IsActive,
    UsageCount,
    LastUsedAt,
    IsRateLimited,
    RateLimitResetAt,
    Tier,
    ErrorCount,
    CreatedAt,
    UpdatedAt,
}
