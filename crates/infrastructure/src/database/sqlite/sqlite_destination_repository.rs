use async_trait::async_trait;
use reminder_core::{
    models::{Destination, TagRoute},
    traits::{DestinationRepository, TagRouteRepository},
    ReminderResult,
};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::database::mapping::MappingHelpers;

pub struct SqliteDestinationRepository {
    pool: SqlitePool,
}

impl SqliteDestinationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_destination(row: &SqliteRow) -> ReminderResult<Destination> {
        Ok(Destination {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            platform: row.try_get("platform")?,
            name: row.try_get("name")?,
            config: MappingHelpers::parse_json_value(row, "config")?,
            enabled: row.try_get("enabled")?,
            sort_order: row.try_get("sort_order")?,
            remark: row.try_get("remark")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl DestinationRepository for SqliteDestinationRepository {
    async fn list_enabled_by_owner(&self, owner_id: i64) -> ReminderResult<Vec<Destination>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM push_destinations
            WHERE owner_id = ? AND enabled = 1
            ORDER BY sort_order, id
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_destination).collect()
    }

    async fn get_by_id(&self, id: i64) -> ReminderResult<Option<Destination>> {
        let row = sqlx::query("SELECT * FROM push_destinations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_destination).transpose()
    }

    async fn save(&self, destination: &Destination) -> ReminderResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO push_destinations (
                id, owner_id, platform, name, config, enabled, sort_order, remark, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(destination.id)
        .bind(destination.owner_id)
        .bind(&destination.platform)
        .bind(&destination.name)
        .bind(MappingHelpers::to_json_text(&destination.config)?)
        .bind(destination.enabled)
        .bind(destination.sort_order)
        .bind(&destination.remark)
        .bind(destination.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub struct SqliteTagRouteRepository {
    pool: SqlitePool,
}

impl SqliteTagRouteRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_route(row: &SqliteRow) -> ReminderResult<TagRoute> {
        Ok(TagRoute {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            tag_name: row.try_get("tag_name")?,
            destination_ids: MappingHelpers::parse_id_list(row, "destination_ids"),
            enabled: row.try_get("enabled")?,
            remark: row.try_get("remark")?,
        })
    }
}

#[async_trait]
impl TagRouteRepository for SqliteTagRouteRepository {
    async fn list_enabled_by_owner(&self, owner_id: i64) -> ReminderResult<Vec<TagRoute>> {
        let rows = sqlx::query(
            "SELECT * FROM tag_routes WHERE owner_id = ? AND enabled = 1 ORDER BY id",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_route).collect()
    }

    async fn save(&self, route: &TagRoute) -> ReminderResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO tag_routes (id, owner_id, tag_name, destination_ids, enabled, remark)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(route.id)
        .bind(route.owner_id)
        .bind(&route.tag_name)
        .bind(MappingHelpers::to_json_text(&route.destination_ids)?)
        .bind(route.enabled)
        .bind(&route.remark)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::test_pool;
    use crate::testing::sample_destination;

    #[tokio::test]
    async fn test_destinations_sorted_and_filtered() {
        let repo = SqliteDestinationRepository::new(test_pool().await);

        let mut second = sample_destination(1, 100, "bark");
        second.sort_order = 2;
        second.config = serde_json::json!({"deviceKey": "abcdefghijkl"});
        let mut first = sample_destination(2, 100, "email");
        first.sort_order = 1;
        let mut disabled = sample_destination(3, 100, "pushme");
        disabled.enabled = false;
        let other_owner = sample_destination(4, 200, "bark");

        for destination in [&second, &first, &disabled, &other_owner] {
            repo.save(destination).await.unwrap();
        }

        let listed = repo.list_enabled_by_owner(100).await.unwrap();
        let ids: Vec<i64> = listed.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(listed[1].param("deviceKey"), Some("abcdefghijkl"));

        let loaded = repo.get_by_id(3).await.unwrap().unwrap();
        assert!(!loaded.enabled);

        // save 覆盖已有记录
        second.name = "我的手机".to_string();
        repo.save(&second).await.unwrap();
        assert_eq!(repo.get_by_id(1).await.unwrap().unwrap().name, "我的手机");
    }

    #[tokio::test]
    async fn test_tag_routes() {
        let repo = SqliteTagRouteRepository::new(test_pool().await);
        repo.save(&TagRoute::new(1, 100, "work", vec![10, 11])).await.unwrap();
        let mut disabled = TagRoute::new(2, 100, "home", vec![12]);
        disabled.enabled = false;
        repo.save(&disabled).await.unwrap();

        let routes = repo.list_enabled_by_owner(100).await.unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].tag_name, "work");
        assert_eq!(routes[0].destination_ids, vec![10, 11]);
    }
}
