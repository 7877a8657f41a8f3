use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use core_types::{AiModel, AiProvider, ModelKind, ProviderKind, ids};
use serde_json::Value;
use sqlx::Row;

use crate::{SqliteStorage, parse_rfc3339, timestamp};

#[derive(Debug, Clone)]
pub struct NewProvider {
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderChanges {
    pub name: Option<String>,
    pub kind: Option<ProviderKind>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewModel {
    pub provider_id: String,
    pub name: String,
    pub display_name: Option<String>,
    pub kind: ModelKind,
}

impl SqliteStorage {
    pub async fn create_provider(&self, new: NewProvider) -> Result<AiProvider> {
        let id = ids::generate(ids::PROVIDER);
        sqlx::query(
            r#"
            INSERT INTO ai_providers(id, name, kind, base_url, api_key, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            "#,
        )
        .bind(&id)
        .bind(&new.name)
        .bind(new.kind.as_str())
        .bind(&new.base_url)
        .bind(&new.api_key)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;

        self.get_provider(&id)
            .await?
            .with_context(|| format!("provider {id} vanished after insert"))
    }

    pub async fn get_provider(&self, id: &str) -> Result<Option<AiProvider>> {
        let row = sqlx::query(
            "SELECT id, name, kind, base_url, api_key, created_at, updated_at FROM ai_providers WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut provider = map_provider_row(row)?;
        provider.models = self.models_of(&provider.id).await?;
        Ok(Some(provider))
    }

    /// Newest first, each with its models.
    pub async fn list_providers(&self) -> Result<Vec<AiProvider>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, kind, base_url, api_key, created_at, updated_at
            FROM ai_providers
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        let mut providers = rows
            .into_iter()
            .map(map_provider_row)
            .collect::<Result<Vec<_>>>()?;

        let mut models: HashMap<String, Vec<AiModel>> = HashMap::new();
        let model_rows = sqlx::query(
            "SELECT id, provider_id, name, display_name, kind FROM ai_models ORDER BY rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in model_rows {
            let model = map_model_row(row)?;
            models.entry(model.provider_id.clone()).or_default().push(model);
        }
        for provider in &mut providers {
            provider.models = models.remove(&provider.id).unwrap_or_default();
        }
        Ok(providers)
    }

    pub async fn update_provider(
        &self,
        id: &str,
        changes: ProviderChanges,
    ) -> Result<Option<AiProvider>> {
        let Some(current) = self.get_provider(id).await? else {
            return Ok(None);
        };

        sqlx::query(
            r#"
            UPDATE ai_providers
            SET name = ?1, kind = ?2, base_url = ?3, api_key = ?4, updated_at = ?5
            WHERE id = ?6
            "#,
        )
        .bind(changes.name.unwrap_or(current.name))
        .bind(changes.kind.unwrap_or(current.kind).as_str())
        .bind(changes.base_url.unwrap_or(current.base_url))
        .bind(changes.api_key.unwrap_or(current.api_key))
        .bind(timestamp(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_provider(id).await
    }

    /// Removes the provider and all of its models.
    pub async fn delete_provider(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM ai_models WHERE provider_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM ai_providers WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn create_model(&self, new: NewModel) -> Result<AiModel> {
        let id = ids::generate(ids::MODEL);
        sqlx::query(
            r#"
            INSERT INTO ai_models(id, provider_id, name, display_name, kind)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&id)
        .bind(&new.provider_id)
        .bind(&new.name)
        .bind(&new.display_name)
        .bind(new.kind.as_str())
        .execute(&self.pool)
        .await?;

        Ok(AiModel {
            id,
            provider_id: new.provider_id,
            name: new.name,
            display_name: new.display_name,
            kind: new.kind,
        })
    }

    pub async fn get_model(&self, id: &str) -> Result<Option<AiModel>> {
        let row = sqlx::query(
            "SELECT id, provider_id, name, display_name, kind FROM ai_models WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(map_model_row).transpose()
    }

    pub async fn delete_model(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ai_models WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn models_of(&self, provider_id: &str) -> Result<Vec<AiModel>> {
        let rows = sqlx::query(
            "SELECT id, provider_id, name, display_name, kind FROM ai_models WHERE provider_id = ?1 ORDER BY rowid ASC",
        )
        .bind(provider_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_model_row).collect()
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<Value>> {
        let row = sqlx::query("SELECT value_json FROM system_settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            serde_json::from_str(row.get::<&str, _>("value_json"))
                .with_context(|| format!("invalid json in setting {key}"))
        })
        .transpose()
    }

    pub async fn put_setting(&self, key: &str, value: &Value, description: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO system_settings(key, value_json, description)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json
            "#,
        )
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .bind(description)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn map_provider_row(row: sqlx::sqlite::SqliteRow) -> Result<AiProvider> {
    let kind = row.get::<&str, _>("kind");
    Ok(AiProvider {
        id: row.get("id"),
        name: row.get("name"),
        kind: ProviderKind::parse(kind)
            .with_context(|| format!("invalid provider kind in database: {kind}"))?,
        base_url: row.get("base_url"),
        api_key: row.get("api_key"),
        models: Vec::new(),
        created_at: parse_rfc3339(row.get::<String, _>("created_at"))?,
        updated_at: parse_rfc3339(row.get::<String, _>("updated_at"))?,
    })
}

fn map_model_row(row: sqlx::sqlite::SqliteRow) -> Result<AiModel> {
    let kind = row.get::<&str, _>("kind");
    Ok(AiModel {
        id: row.get("id"),
        provider_id: row.get("provider_id"),
        name: row.get("name"),
        display_name: row.get("display_name"),
        kind: ModelKind::parse(kind)
            .with_context(|| format!("invalid model kind in database: {kind}"))?,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn deepseek() -> NewProvider {
        NewProvider {
            name: "DeepSeek".to_string(),
            kind: ProviderKind::DeepSeek,
            base_url: "https://api.deepseek.com".to_string(),
            api_key: "sk-test".to_string(),
        }
    }

    #[tokio::test]
    async fn providers_nest_models_and_cascade() {
        let storage = SqliteStorage::in_memory().await.expect("storage");
        let provider = storage.create_provider(deepseek()).await.expect("provider");
        let model = storage
            .create_model(NewModel {
                provider_id: provider.id.clone(),
                name: "deepseek-chat".to_string(),
                display_name: None,
                kind: ModelKind::Chat,
            })
            .await
            .expect("model");

        let listed = storage.list_providers().await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].models.len(), 1);
        assert_eq!(listed[0].models[0].id, model.id);

        assert!(storage.delete_provider(&provider.id).await.expect("delete"));
        assert!(storage.get_model(&model.id).await.expect("get").is_none());
        assert!(!storage.delete_provider(&provider.id).await.expect("delete"));
    }

    #[tokio::test]
    async fn partial_provider_update() {
        let storage = SqliteStorage::in_memory().await.expect("storage");
        let provider = storage.create_provider(deepseek()).await.expect("provider");
        let updated = storage
            .update_provider(
                &provider.id,
                ProviderChanges {
                    api_key: Some("sk-new".to_string()),
                    ..ProviderChanges::default()
                },
            )
            .await
            .expect("update")
            .expect("present");
        assert_eq!(updated.api_key, "sk-new");
        assert_eq!(updated.base_url, "https://api.deepseek.com");
    }

    #[tokio::test]
    async fn settings_upsert() {
        let storage = SqliteStorage::in_memory().await.expect("storage");
        assert!(storage.get_setting("k").await.expect("get").is_none());
        storage
            .put_setting("k", &json!({"a": 1}), "test")
            .await
            .expect("put");
        storage
            .put_setting("k", &json!({"a": 2}), "test")
            .await
            .expect("put");
        assert_eq!(
            storage.get_setting("k").await.expect("get"),
            Some(json!({"a": 2}))
        );
    }
}
